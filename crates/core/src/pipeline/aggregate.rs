use crate::domain::portfolio::{Action, ClassifyThresholds, PortfolioClassification};
use crate::domain::sentiment::SentimentResult;
use crate::storage::ResultStore;
use chrono::NaiveDate;
use std::collections::HashMap;

/// Pure classification over already-loaded results. Securities appear in
/// universe order within each bucket; a security with no persisted result for
/// the date lands in `unscored`, never in HOLD.
pub fn classify_results(
    as_of_date: NaiveDate,
    universe: &[String],
    results: &HashMap<String, SentimentResult>,
    thresholds: &ClassifyThresholds,
) -> PortfolioClassification {
    let mut classification = PortfolioClassification {
        as_of_date,
        buys: Vec::new(),
        holds: Vec::new(),
        sells: Vec::new(),
        unscored: Vec::new(),
    };

    for security_id in universe {
        match results.get(security_id) {
            Some(result) => match thresholds.action_for_score(result.score) {
                Action::Buy => classification.buys.push(security_id.clone()),
                Action::Hold => classification.holds.push(security_id.clone()),
                Action::Sell => classification.sells.push(security_id.clone()),
            },
            None => classification.unscored.push(security_id.clone()),
        }
    }

    classification
}

/// Load the date's persisted results and classify the universe against them.
/// Read-only and deterministic for a fixed store state.
pub async fn classify(
    store: &dyn ResultStore,
    as_of_date: NaiveDate,
    universe: &[String],
    thresholds: &ClassifyThresholds,
) -> anyhow::Result<PortfolioClassification> {
    let rows = store.list_for_date(as_of_date).await?;
    let by_security: HashMap<String, SentimentResult> = rows
        .into_iter()
        .map(|r| (r.security_id.clone(), r))
        .collect();

    Ok(classify_results(
        as_of_date,
        universe,
        &by_security,
        thresholds,
    ))
}
