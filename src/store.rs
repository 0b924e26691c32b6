use std::time::Duration;

use async_trait::async_trait;

use crate::errors::{AggregationError, Result, StoreError};
use crate::models::ClassroomAggregate;

/// Write side of the analytics store.
///
/// `replace` must swap every stored row for the given classrooms with the
/// new aggregates as one atomic step, and return the number of classrooms
/// replaced.
#[async_trait]
pub trait AggregateStore: Send + Sync {
    async fn replace(&self, aggregates: &[ClassroomAggregate]) -> std::result::Result<usize, StoreError>;
}

/// Replaces stored aggregates for the classrooms present in `aggregates`.
/// An empty batch never reaches the store.
pub async fn replace_aggregates(
    store: &dyn AggregateStore,
    aggregates: &[ClassroomAggregate],
    timeout: Duration,
) -> Result<usize> {
    if aggregates.is_empty() {
        tracing::debug!("no classrooms to replace; skipping analytics write");
        return Ok(0);
    }

    let replaced = tokio::time::timeout(timeout, store.replace(aggregates))
        .await
        .map_err(|_| {
            AggregationError::Write(format!("timed out after {}s", timeout.as_secs()))
        })??;

    tracing::info!(classrooms = replaced, "replaced stored class averages");
    Ok(replaced)
}
