use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::errors::{AggregationError, Result};
use crate::gate::{self, ProfileDirectory};
use crate::models::{
    ProgressFilter, ProgressRecord, RecomputeOutcome, RecomputeRequest, Scope,
};
use crate::stats;
use crate::store::{self, AggregateStore};

/// Read side of the primary store.
#[async_trait]
pub trait ProgressSource: Send + Sync {
    async fn fetch_progress(&self, filter: ProgressFilter) -> anyhow::Result<Vec<ProgressRecord>>;

    /// School that owns `classroom_id`, or `None` if it does not exist.
    async fn classroom_school(&self, classroom_id: Uuid) -> anyhow::Result<Option<Uuid>>;
}

#[derive(Debug, Clone)]
pub struct RecomputeSettings {
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub enforce_classroom_scope: bool,
}

impl Default for RecomputeSettings {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(10),
            enforce_classroom_scope: true,
        }
    }
}

/// Gate, fetch, aggregate and persist, in that order.
pub struct Recomputer {
    profiles: Arc<dyn ProfileDirectory>,
    progress: Arc<dyn ProgressSource>,
    store: Option<Arc<dyn AggregateStore>>,
    settings: RecomputeSettings,
}

impl Recomputer {
    pub fn new(
        profiles: Arc<dyn ProfileDirectory>,
        progress: Arc<dyn ProgressSource>,
        store: Option<Arc<dyn AggregateStore>>,
        settings: RecomputeSettings,
    ) -> Self {
        Self {
            profiles,
            progress,
            store,
            settings,
        }
    }

    /// Handles a trigger from an authenticated caller.
    pub async fn recompute_for(
        &self,
        principal: Option<Uuid>,
        request: RecomputeRequest,
    ) -> Result<RecomputeOutcome> {
        let scope = gate::authorize(self.profiles.as_ref(), principal).await?;
        tracing::debug!(user_id = %scope.user_id, role = scope.role.as_str(), "recompute authorized");

        let classroom_id = parse_id("classroom_id", request.classroom_id.as_deref())?;
        let requested_school = parse_id("school_id", request.school_id.as_deref())?;
        if requested_school.is_some() && requested_school != scope.school_id {
            tracing::warn!(
                user_id = %scope.user_id,
                requested = ?requested_school,
                own = ?scope.school_id,
                "ignoring school_id outside the caller's scope"
            );
        }

        let filter = resolve_filter(classroom_id, scope.school_id)?;
        if let ProgressFilter::Classroom(id) = filter {
            self.check_ownership(&scope, id).await?;
        }

        self.recompute(filter).await
    }

    /// Recomputes without a caller gate; used by operator tooling.
    pub async fn recompute(&self, filter: ProgressFilter) -> Result<RecomputeOutcome> {
        let records = tokio::time::timeout(
            self.settings.read_timeout,
            self.progress.fetch_progress(filter),
        )
        .await
        .map_err(|_| {
            AggregationError::Read(format!(
                "timed out after {}s",
                self.settings.read_timeout.as_secs()
            ))
        })?
        .map_err(|err| AggregationError::Read(format!("{err:#}")))?;

        let aggregates = stats::aggregate(&records);
        tracing::info!(
            ?filter,
            records = records.len(),
            latest_submission = ?records.iter().map(|record| record.date_submitted).max(),
            classrooms = aggregates.len(),
            "calculated class averages"
        );

        let persisted = match &self.store {
            Some(store) => {
                store::replace_aggregates(store.as_ref(), &aggregates, self.settings.write_timeout)
                    .await?
            }
            None => {
                tracing::warn!("analytics store not configured; averages were not persisted");
                0
            }
        };

        Ok(RecomputeOutcome {
            aggregates,
            persisted,
        })
    }

    async fn check_ownership(&self, scope: &Scope, classroom_id: Uuid) -> Result<()> {
        if !self.settings.enforce_classroom_scope {
            tracing::warn!(
                %classroom_id,
                user_id = %scope.user_id,
                "classroom ownership check disabled; trusting caller"
            );
            return Ok(());
        }

        let owner = tokio::time::timeout(
            self.settings.read_timeout,
            self.progress.classroom_school(classroom_id),
        )
        .await
        .map_err(|_| AggregationError::Read("classroom lookup timed out".to_string()))?
        .map_err(|err| AggregationError::Read(format!("{err:#}")))?;

        gate::check_classroom_scope(scope, classroom_id, owner)
    }
}

/// Picks the read filter; a classroom wins over a school.
pub fn resolve_filter(classroom_id: Option<Uuid>, school_id: Option<Uuid>) -> Result<ProgressFilter> {
    match (classroom_id, school_id) {
        (Some(id), _) => Ok(ProgressFilter::Classroom(id)),
        (None, Some(id)) => Ok(ProgressFilter::School(id)),
        (None, None) => Err(AggregationError::MissingFilter),
    }
}

fn parse_id(field: &str, value: Option<&str>) -> Result<Option<Uuid>> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(raw) => Uuid::parse_str(raw)
            .map(Some)
            .map_err(|err| AggregationError::InvalidRequest(format!("{field}: {err}"))),
    }
}
