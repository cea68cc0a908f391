use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Score cutoffs for the BUY/HOLD/SELL partition. Boundary scores (exactly
/// `buy_above` or `sell_below`) are HOLD.
#[derive(Debug, Clone, Copy)]
pub struct ClassifyThresholds {
    pub buy_above: i32,
    pub sell_below: i32,
}

impl Default for ClassifyThresholds {
    fn default() -> Self {
        Self {
            buy_above: 2,
            sell_below: -2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Buy,
    Hold,
    Sell,
}

impl ClassifyThresholds {
    pub fn action_for_score(&self, score: i32) -> Action {
        if score > self.buy_above {
            Action::Buy
        } else if score < self.sell_below {
            Action::Sell
        } else {
            Action::Hold
        }
    }
}

/// Derived portfolio-level view for one date. Recomputed on demand from the
/// persisted per-security results; never the source of truth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioClassification {
    pub as_of_date: NaiveDate,
    pub buys: Vec<String>,
    pub holds: Vec<String>,
    pub sells: Vec<String>,
    pub unscored: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundary_scores_are_hold() {
        let t = ClassifyThresholds::default();
        assert_eq!(t.action_for_score(3), Action::Buy);
        assert_eq!(t.action_for_score(2), Action::Hold);
        assert_eq!(t.action_for_score(0), Action::Hold);
        assert_eq!(t.action_for_score(-2), Action::Hold);
        assert_eq!(t.action_for_score(-3), Action::Sell);
    }
}
