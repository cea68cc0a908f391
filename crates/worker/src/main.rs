use anyhow::Context;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use marketmood_core::config::{Policy, Settings};
use marketmood_core::llm::anthropic::AnthropicClient;
use marketmood_core::news::HttpNewsClient;
use marketmood_core::pipeline::{
    run_consumer, Analyzer, BatchOptions, ConsumeOptions, DispatchMode, Dispatcher,
};
use marketmood_core::storage::queue::PgWorkQueue;
use marketmood_core::storage::results::PgResultStore;
use marketmood_core::storage::tracking::PgTrackingStore;

mod report;

#[derive(Debug, Parser)]
#[command(name = "marketmood_worker")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Analyze one security for one date.
    Single {
        security_id: String,

        /// Market as-of date (YYYY-MM-DD). Defaults to the most recent
        /// completed IST trading day.
        #[arg(long)]
        as_of_date: Option<String>,

        /// Re-analyze even when a result already exists.
        #[arg(long)]
        force: bool,
    },

    /// Dispatch the whole universe for one date.
    Batch {
        #[arg(long)]
        as_of_date: Option<String>,

        /// DIRECT runs in-process; QUEUED enqueues for consumers.
        #[arg(long, default_value = "DIRECT")]
        mode: String,

        /// Worker-pool size for DIRECT mode.
        #[arg(long)]
        concurrency: Option<usize>,

        /// Dispatch only the first N securities of the universe.
        #[arg(long)]
        max_items: Option<usize>,

        #[arg(long)]
        force: bool,
    },

    /// Consume queued analysis requests.
    Consume {
        /// Exit at the first empty poll instead of waiting for more work.
        #[arg(long)]
        drain: bool,

        #[arg(long, default_value_t = 5)]
        poll_interval_secs: u64,
    },

    /// Print the BUY/HOLD/SELL classification for one date.
    Classify {
        #[arg(long)]
        as_of_date: Option<String>,
    },

    /// Print per-security tracking status for one date.
    Status {
        #[arg(long)]
        as_of_date: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();
    let policy = Policy::from_env()?;

    let pool = connect(&settings).await?;
    marketmood_core::storage::migrate(&pool).await?;

    let results = Arc::new(PgResultStore::new(pool.clone(), &policy.results_prefix));
    let tracking = Arc::new(PgTrackingStore::new(pool.clone()));
    let queue = Arc::new(PgWorkQueue::new(pool.clone(), policy.max_delivery_count));

    match args.command {
        Command::Single {
            security_id,
            as_of_date,
            force,
        } => {
            let as_of_date = resolve_date(as_of_date.as_deref())?;
            let analyzer = build_analyzer(&settings, results, tracking, policy)?;

            match analyzer.analyze(&security_id, as_of_date, force).await {
                Ok(outcome) => {
                    println!("{}", serde_json::to_string_pretty(&outcome.result)?);
                    if !outcome.fresh {
                        tracing::info!(security_id, "returned existing result");
                    }
                }
                Err(err) => {
                    sentry_anyhow::capture_anyhow(&anyhow::Error::new(err.clone()));
                    anyhow::bail!("analysis failed: {err}");
                }
            }
        }

        Command::Batch {
            as_of_date,
            mode,
            concurrency,
            max_items,
            force,
        } => {
            let as_of_date = resolve_date(as_of_date.as_deref())?;
            let mode = DispatchMode::parse(&mode)?;
            let universe = marketmood_core::universe::load_universe_from_settings(&settings).await?;

            let options = BatchOptions {
                concurrency: concurrency.unwrap_or(policy.direct_concurrency),
                max_items,
                force,
            };
            let analyzer = Arc::new(build_analyzer(&settings, results, tracking, policy)?);
            let dispatcher = Dispatcher::new(analyzer, queue);

            let summary = dispatcher
                .dispatch_all(&universe, as_of_date, mode, &options)
                .await;
            if !summary.failed.is_empty() {
                for failure in &summary.failed {
                    tracing::warn!(
                        security_id = failure.security_id,
                        kind = failure.kind,
                        error = failure.error,
                        "batch item failed"
                    );
                }
            }
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }

        Command::Consume {
            drain,
            poll_interval_secs,
        } => {
            let analyzer = Arc::new(build_analyzer(&settings, results, tracking, policy)?);
            let options = ConsumeOptions {
                poll_interval: Duration::from_secs(poll_interval_secs),
                drain,
            };
            let stats = run_consumer(analyzer, queue, options).await?;
            tracing::info!(
                processed = stats.processed,
                succeeded = stats.succeeded,
                failed = stats.failed,
                dead_lettered = stats.dead_lettered,
                "consumer finished"
            );
        }

        Command::Classify { as_of_date } => {
            let as_of_date = resolve_date(as_of_date.as_deref())?;
            let universe = marketmood_core::universe::load_universe_from_settings(&settings).await?;
            let classification = marketmood_core::pipeline::classify(
                results.as_ref(),
                as_of_date,
                &universe,
                &policy.classify,
            )
            .await?;
            let by_security = marketmood_core::storage::ResultStore::list_for_date(
                results.as_ref(),
                as_of_date,
            )
            .await?
            .into_iter()
            .map(|r| (r.security_id.clone(), r))
            .collect();
            print!(
                "{}",
                report::render_classification(&classification, &by_security)
            );
        }

        Command::Status { as_of_date } => {
            let as_of_date = resolve_date(as_of_date.as_deref())?;
            let universe = marketmood_core::universe::load_universe_from_settings(&settings).await?;
            let records = marketmood_core::storage::TrackingStore::list_for_date(
                tracking.as_ref(),
                as_of_date,
            )
            .await?;
            print!(
                "{}",
                report::render_tracking(as_of_date, &universe, &records, policy.pending_grace_secs)
            );
        }
    }

    Ok(())
}

fn build_analyzer(
    settings: &Settings,
    results: Arc<PgResultStore>,
    tracking: Arc<PgTrackingStore>,
    policy: Policy,
) -> anyhow::Result<Analyzer> {
    let news = Arc::new(HttpNewsClient::from_settings(settings)?);
    let model = Arc::new(AnthropicClient::from_settings(settings)?);
    Ok(Analyzer::new(news, model, results, tracking, policy))
}

async fn connect(settings: &Settings) -> anyhow::Result<sqlx::PgPool> {
    let db_url = settings.require_database_url()?;
    sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(db_url)
        .await
        .context("connect DATABASE_URL failed")
}

fn resolve_date(arg: Option<&str>) -> anyhow::Result<chrono::NaiveDate> {
    marketmood_core::time::resolve_as_of_date(arg, chrono::Utc::now())
}

fn init_sentry(settings: &Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
