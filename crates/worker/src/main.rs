use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tradingpal_core::analysis::ThresholdAnalyzer;
use tradingpal_core::domain::snapshot::View;
use tradingpal_core::pricing::HttpPriceProvider;
use tradingpal_core::refresh::{IndustryTable, LeaseExpiry, RefreshOptions};
use tradingpal_core::service::{assemble, Components};
use tradingpal_core::storage::memory::InMemoryPortfolioStore;
use tradingpal_core::storage::portfolio::PgPortfolioStore;
use tradingpal_core::storage::PortfolioStore;
use tradingpal_core::time::MarketSessionTracker;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ViewArg {
    All,
    Buy,
    Sell,
}

impl From<ViewArg> for View {
    fn from(v: ViewArg) -> Self {
        match v {
            ViewArg::All => View::All,
            ViewArg::Buy => View::ToBuy,
            ViewArg::Sell => View::ToSell,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "tradingpal_worker")]
struct Args {
    /// Fetch fresh quotes for every entry instead of allowing cached ones.
    #[arg(long)]
    quick: bool,

    /// Which snapshot view to print.
    #[arg(long, value_enum, default_value_t = ViewArg::All)]
    view: ViewArg,

    /// Run against a JSON array of entries instead of DATABASE_URL.
    #[arg(long, value_name = "FILE")]
    in_memory: Option<PathBuf>,

    /// Advance and persist lease inactivity counters like the API does.
    #[arg(long)]
    tick_leases: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = tradingpal_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();

    let res = run(args, settings).await;
    if let Err(e) = &res {
        sentry_anyhow::capture_anyhow(e);
    }
    res
}

async fn run(args: Args, settings: tradingpal_core::config::Settings) -> anyhow::Result<()> {
    let store: Arc<dyn PortfolioStore> = match &args.in_memory {
        Some(path) => Arc::new(InMemoryPortfolioStore::from_json_file(path)?),
        None => {
            let db_url = settings.require_database_url()?;
            Arc::new(
                PgPortfolioStore::connect(db_url)
                    .await
                    .context("connect DATABASE_URL failed")?,
            )
        }
    };

    let mut options = RefreshOptions::from_env()?;
    if !args.tick_leases {
        options.lease_expiry = LeaseExpiry::Disabled;
    }

    let (service, mut scheduler) = assemble(Components {
        store,
        prices: Arc::new(HttpPriceProvider::from_settings(&settings)?),
        analyzer: Arc::new(ThresholdAnalyzer::from_env()),
        sessions: Arc::new(MarketSessionTracker::default()),
        industries: IndustryTable::default(),
        options,
    });

    let now = chrono::Utc::now();
    scheduler
        .run_cycle(args.quick, now)
        .await
        .context("refresh cycle failed")?;

    let snapshot = service.snapshot(args.view.into());
    tracing::info!(
        view = ?args.view,
        records = snapshot.list.len(),
        failed = snapshot.summary.fail_counter,
        "refresh cycle done"
    );
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}

fn init_sentry(settings: &tradingpal_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
