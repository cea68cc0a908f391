#[cfg(test)]
pub mod memory;
pub mod queue;
pub mod results;
pub mod tracking;

use anyhow::Context;

pub use queue::{NackOutcome, QueueDelivery, WorkQueue};
pub use results::ResultStore;
pub use tracking::TrackingStore;

pub async fn migrate(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("sqlx migrations failed")?;
    Ok(())
}
