use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::json;

use tradingpal_core::analysis::ThresholdAnalyzer;
use tradingpal_core::domain::entry::{PortfolioEntry, LOCK_REFRESHING};
use tradingpal_core::domain::snapshot::{Snapshot, View};
use tradingpal_core::domain::update::EntryUpdate;
use tradingpal_core::pricing::{PriceError, PriceInfo, PriceProvider};
use tradingpal_core::refresh::{IndustryTable, RefreshOptions, RefreshScheduler, Trigger};
use tradingpal_core::service::{assemble, Components, PortfolioService};
use tradingpal_core::storage::memory::InMemoryPortfolioStore;
use tradingpal_core::storage::PortfolioStore;
use tradingpal_core::time::{ExchangeRule, MarketSessionTracker, TickerMatch};

struct TablePrices {
    quotes: HashMap<&'static str, (f64, &'static str)>,
}

#[async_trait::async_trait]
impl PriceProvider for TablePrices {
    fn provider_name(&self) -> &'static str {
        "table"
    }

    async fn fetch(
        &self,
        ticker: &str,
        _currency: &str,
        _use_cache: bool,
        _include_static: bool,
    ) -> Result<PriceInfo, PriceError> {
        let (price, industry) = self
            .quotes
            .get(ticker)
            .copied()
            .ok_or_else(|| PriceError::NotFound(ticker.to_string()))?;
        Ok(PriceInfo {
            price,
            price_in_sek: price,
            convert_to_sek_ratio: 1.0,
            industry: industry.to_string(),
            employees: 100,
            statistics: None,
        })
    }
}

fn portfolio() -> Vec<PortfolioEntry> {
    serde_json::from_value(json!([
        { "ticker": "AAA", "name": "AAA Inc", "currency": "SEK", "count": 10,
          "totalInvestedSek": 800, "boughtAt": null, "soldAt": null },
        { "ticker": "BBB", "name": "BBB Corp", "currency": "SEK", "count": 3,
          "totalInvestedSek": 900, "boughtAt": null, "soldAt": null,
          "manualOverridePriceSek": 500.0 },
        { "ticker": "CCC", "name": "CCC Bank", "currency": "SEK", "count": 4,
          "totalInvestedSek": 400, "boughtAt": 50.0, "soldAt": null },
        { "ticker": "DDD", "name": "DDD Oil", "currency": "SEK", "count": 2,
          "totalInvestedSek": 300, "boughtAt": null, "soldAt": 100.0 },
        { "ticker": "EEE", "name": "EEE Pharma", "currency": "SEK", "count": 1,
          "totalInvestedSek": 200, "boughtAt": null, "soldAt": 100.0 }
    ]))
    .unwrap()
}

fn prices() -> TablePrices {
    TablePrices {
        quotes: HashMap::from([
            ("AAA", (100.0, "Software")),
            ("CCC", (60.0, "Banks - Regional")),
            ("DDD", (80.0, "Oil & Gas")),
            ("EEE", (50.0, "Drug Manufacturers")),
        ]),
    }
}

struct World {
    service: PortfolioService,
    scheduler: RefreshScheduler,
    store: Arc<InMemoryPortfolioStore>,
}

fn world() -> World {
    let store = Arc::new(InMemoryPortfolioStore::new(portfolio()));
    let always_open = ExchangeRule::new(
        "test",
        TickerMatch::NoSuffix,
        (0, 0),
        (23, 59),
        chrono_tz::UTC,
    )
    .unwrap();
    let (service, scheduler) = assemble(Components {
        store: store.clone(),
        prices: Arc::new(prices()),
        analyzer: Arc::new(ThresholdAnalyzer::default()),
        sessions: Arc::new(MarketSessionTracker::new(vec![always_open], HashSet::new())),
        industries: IndustryTable::default(),
        options: RefreshOptions::default(),
    });
    World {
        service,
        scheduler,
        store,
    }
}

fn monday_noon() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 5, 12, 0, 0).unwrap()
}

fn record<'a>(snapshot: &'a Snapshot, ticker: &str) -> &'a PortfolioEntry {
    &snapshot
        .list
        .iter()
        .find(|r| r.ticker_name == ticker)
        .unwrap()
        .current_stock
        .entry
}

#[tokio::test]
async fn cycle_publishes_consistent_views() {
    let mut w = world();
    w.scheduler.run_cycle(false, monday_noon()).await.unwrap();

    let all = w.service.snapshot(View::All);
    let to_buy = w.service.snapshot(View::ToBuy);
    let to_sell = w.service.snapshot(View::ToSell);

    assert_eq!(all.summary, to_buy.summary);
    assert_eq!(all.summary, to_sell.summary);
    assert_eq!(all.summary.updated_utc, Some(monday_noon()));

    assert_eq!(all.summary.success_counter, 4);
    assert_eq!(all.summary.fail_counter, 1);
    assert_eq!(all.summary.failed_to_lookup, vec!["BBB Corp".to_string()]);
    // 1000 + 1500 (override) + 240 + 160 + 50
    assert_eq!(all.summary.total_global_value_sek, 2950);
    assert_eq!(all.summary.total_invested_sek, 1700);
    assert_eq!(all.summary.total_employees, 400);

    let sell: Vec<_> = to_sell.list.iter().map(|r| r.ticker_name.as_str()).collect();
    assert_eq!(sell, ["CCC"]);
    assert_eq!(to_sell.list[0].number_to_sell, Some(2));

    let buy: Vec<_> = to_buy.list.iter().map(|r| r.ticker_name.as_str()).collect();
    assert_eq!(buy, ["EEE", "DDD"]);

    let industries = all.industries.unwrap();
    let names: Vec<_> = industries.iter().map(|i| i.industry.as_str()).collect();
    assert_eq!(names, ["drug industry", "oil industry", "banking", "Software"]);
    assert!(industries
        .windows(2)
        .all(|w| w[0].total_value_sek <= w[1].total_value_sek));
}

#[tokio::test]
async fn edit_session_round_trip() {
    let mut w = world();
    let t0 = monday_noon();
    w.scheduler.run_cycle(false, t0).await.unwrap();

    let token = w.service.acquire_lock("CCC").await.unwrap();
    assert_eq!(
        w.scheduler.tick(t0 + Duration::seconds(15)).await,
        Some(Trigger::Forced { quick: true })
    );

    let all = w.service.snapshot(View::All);
    assert_eq!(record(&all, "CCC").lock_key, LOCK_REFRESHING);
    assert!(all
        .list
        .iter()
        .find(|r| r.ticker_name == "CCC")
        .unwrap()
        .current_stock
        .ticker_is_locked);
    let stored = w.store.load_all().await.unwrap();
    assert_eq!(stored["CCC"].lock_key, token);

    let change: EntryUpdate = serde_json::from_value(json!({
        "ticker": "CCC",
        "lockKey": token,
        "count": 6,
        "totalInvestedSek": 520
    }))
    .unwrap();
    w.service.apply_update(&change, true).await.unwrap();

    assert_eq!(
        w.scheduler.tick(t0 + Duration::seconds(30)).await,
        Some(Trigger::Forced { quick: false })
    );
    let all = w.service.snapshot(View::All);
    assert_eq!(record(&all, "CCC").count, 6);
    assert_eq!(record(&all, "CCC").lock_key, 0);

    let logged = w.service.take_first_change().unwrap();
    assert_eq!(logged.ticker, "CCC");
    assert_eq!(logged.purchased_stocks, 2);
    assert_eq!(logged.purchase_value_sek, 120);

    assert_eq!(w.scheduler.tick(t0 + Duration::seconds(45)).await, None);
}

#[tokio::test]
async fn abandoned_lease_expires_after_threshold() {
    let mut w = world();
    let t0 = monday_noon();
    w.service.acquire_lock("AAA").await.unwrap();

    // Default threshold is three passes; the fourth releases.
    for i in 0..4 {
        w.scheduler
            .run_cycle(false, t0 + Duration::minutes(i))
            .await
            .unwrap();
    }

    let stored = w.store.load_all().await.unwrap();
    assert_eq!(stored["AAA"].lock_key, 0);
    assert_eq!(stored["AAA"].lock_counter, 0);
    assert!(w.service.acquire_lock("AAA").await.is_ok());
}
