use async_trait::async_trait;
use uuid::Uuid;

use crate::errors::{AggregationError, Result};
use crate::models::{Profile, Scope};

/// Read access to user profiles in the primary store.
#[async_trait]
pub trait ProfileDirectory: Send + Sync {
    async fn profile(&self, user_id: Uuid) -> anyhow::Result<Option<Profile>>;
}

/// Resolves an authenticated principal into a staff scope.
///
/// `principal` is `None` when the request carried no valid session.
pub async fn authorize(
    profiles: &dyn ProfileDirectory,
    principal: Option<Uuid>,
) -> Result<Scope> {
    let user_id = principal.ok_or(AggregationError::Unauthenticated)?;

    let profile = profiles
        .profile(user_id)
        .await
        .map_err(|err| AggregationError::ProfileLookup(format!("{err:#}")))?
        .ok_or_else(|| AggregationError::ProfileLookup(format!("no profile for user {user_id}")))?;

    match profile.role {
        Some(role) if role.is_staff() => Ok(Scope {
            user_id,
            role,
            school_id: profile.school_id,
        }),
        other => {
            let role = other.map(|role| role.as_str()).unwrap_or("none");
            tracing::info!(%user_id, role, "recompute denied by role gate");
            Err(AggregationError::Forbidden(role.to_string()))
        }
    }
}

/// Checks that `classroom_id` belongs to the caller's school.
/// `classroom_school` is the school the primary store reports for it.
pub fn check_classroom_scope(
    scope: &Scope,
    classroom_id: Uuid,
    classroom_school: Option<Uuid>,
) -> Result<()> {
    match (scope.school_id, classroom_school) {
        (Some(own), Some(theirs)) if own == theirs => Ok(()),
        _ => Err(AggregationError::ClassroomOutOfScope { classroom_id }),
    }
}
