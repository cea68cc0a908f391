//! Console rendering for the classify and status subcommands.

use chrono::{NaiveDate, Utc};
use marketmood_core::domain::portfolio::PortfolioClassification;
use marketmood_core::domain::sentiment::SentimentResult;
use marketmood_core::domain::tracking::{TrackingRecord, TrackingStatus};
use std::collections::HashMap;

pub fn render_classification(
    c: &PortfolioClassification,
    results: &HashMap<String, SentimentResult>,
) -> String {
    let mut out = String::new();
    out.push_str(&format!("Portfolio classification for {}\n", c.as_of_date));
    out.push_str(&format!(
        "  scored: {}  unscored: {}\n\n",
        c.buys.len() + c.holds.len() + c.sells.len(),
        c.unscored.len()
    ));

    push_bucket(&mut out, "BUY", &c.buys, results);
    push_bucket(&mut out, "HOLD", &c.holds, results);
    push_bucket(&mut out, "SELL", &c.sells, results);
    push_bucket(&mut out, "UNSCORED", &c.unscored, results);
    out
}

fn push_bucket(
    out: &mut String,
    label: &str,
    securities: &[String],
    results: &HashMap<String, SentimentResult>,
) {
    out.push_str(&format!("{label} ({})\n", securities.len()));
    for security_id in securities {
        match results.get(security_id) {
            Some(r) => out.push_str(&format!(
                "  {security_id:<20} score={:+}  confidence={:<6}  articles={}\n",
                r.score,
                r.confidence.as_str(),
                r.article_count
            )),
            None => out.push_str(&format!("  {security_id}\n")),
        }
    }
    out.push('\n');
}

pub fn render_tracking(
    as_of_date: NaiveDate,
    universe: &[String],
    records: &[TrackingRecord],
    pending_grace_secs: i64,
) -> String {
    let by_security: HashMap<&str, &TrackingRecord> = records
        .iter()
        .map(|r| (r.security_id.as_str(), r))
        .collect();
    let now = Utc::now();

    let mut out = String::new();
    out.push_str(&format!("Scrape tracking for {as_of_date}\n\n"));

    let mut counts = (0usize, 0usize, 0usize, 0usize); // succeeded, pending, failed, untracked
    for security_id in universe {
        match by_security.get(security_id.as_str()) {
            Some(record) => {
                let stale = record.status == TrackingStatus::Pending
                    && record.is_stale_pending(now, pending_grace_secs);
                let status = if stale {
                    "PENDING (stale)"
                } else {
                    record.status.as_str()
                };
                match record.status {
                    TrackingStatus::Succeeded => counts.0 += 1,
                    TrackingStatus::Pending => counts.1 += 1,
                    TrackingStatus::Failed => counts.2 += 1,
                }
                out.push_str(&format!(
                    "  {security_id:<20} {status:<16} attempts={}",
                    record.attempt_count
                ));
                if let Some(err) = &record.last_error {
                    out.push_str(&format!("  last_error={err}"));
                }
                out.push('\n');
            }
            None => {
                counts.3 += 1;
                out.push_str(&format!("  {security_id:<20} UNTRACKED\n"));
            }
        }
    }

    out.push_str(&format!(
        "\nsucceeded={} pending={} failed={} untracked={}\n",
        counts.0, counts.1, counts.2, counts.3
    ));
    out
}
