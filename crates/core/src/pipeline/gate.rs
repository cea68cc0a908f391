use crate::pipeline::PipelineError;
use crate::storage::ResultStore;
use chrono::NaiveDate;

/// Read-only idempotency check: work is needed when no durable result exists
/// for the (security, date) pair, or when the caller forces a re-run. Never
/// writes, so asking twice is always safe.
///
/// A failed existence check is its own error kind: "could not tell" must not
/// collapse into either "work needed" (duplicate model spend) or "already
/// done" (silent gap in the results).
pub async fn needs_work(
    results: &dyn ResultStore,
    security_id: &str,
    as_of_date: NaiveDate,
    force: bool,
) -> Result<bool, PipelineError> {
    if force {
        return Ok(true);
    }

    match results.exists(security_id, as_of_date).await {
        Ok(found) => Ok(!found),
        Err(err) => Err(PipelineError::IdempotencyCheckFailure {
            security_id: security_id.to_string(),
            detail: format!("{err:#}"),
        }),
    }
}
