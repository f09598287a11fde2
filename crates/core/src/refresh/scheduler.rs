use crate::error::CoreError;
use crate::refresh::builder::SnapshotBuilder;
use crate::refresh::cache::SnapshotCache;
use crate::refresh::{LeaseExpiry, RefreshOptions, RefreshSignal};
use crate::storage::lock::LockManager;
use crate::storage::{Portfolio, SharedStore};
use crate::time::MarketSessionTracker;
use chrono::{DateTime, Utc};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Why a cycle ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Forced { quick: bool },
    SessionEdge,
    IntervalElapsed,
}

/// Drives refresh cycles. Owned by exactly one loop; `tick` takes `&mut self`
/// and awaits the whole cycle, so cycles cannot overlap.
pub struct RefreshScheduler {
    store: Arc<SharedStore>,
    builder: SnapshotBuilder,
    cache: Arc<SnapshotCache>,
    signal: Arc<RefreshSignal>,
    sessions: Arc<MarketSessionTracker>,
    locks: LockManager,
    options: RefreshOptions,
    last_completed: Option<DateTime<Utc>>,
    interval: Duration,
}

impl RefreshScheduler {
    pub fn new(
        store: Arc<SharedStore>,
        builder: SnapshotBuilder,
        cache: Arc<SnapshotCache>,
        signal: Arc<RefreshSignal>,
        sessions: Arc<MarketSessionTracker>,
        locks: LockManager,
        options: RefreshOptions,
    ) -> Self {
        let interval = jittered(&options);
        Self {
            store,
            builder,
            cache,
            signal,
            sessions,
            locks,
            options,
            last_completed: None,
            interval,
        }
    }

    pub fn current_interval(&self) -> Duration {
        self.interval
    }

    pub fn last_completed(&self) -> Option<DateTime<Utc>> {
        self.last_completed
    }

    /// Evaluates every trigger condition once. All conditions are sampled on
    /// each call so a session edge is consumed even when a force request is
    /// pending, which keeps it from causing a second cycle on the next tick.
    pub fn due(&mut self, now: DateTime<Utc>) -> Option<Trigger> {
        let forced = self.signal.take();
        let edge = self.sessions.sessions_changed_at(now);
        let elapsed = match self.last_completed {
            None => true,
            Some(at) => (now - at)
                .to_std()
                .map_or(false, |since| since > self.interval),
        };

        if let Some(quick) = forced {
            Some(Trigger::Forced { quick })
        } else if edge {
            Some(Trigger::SessionEdge)
        } else if elapsed {
            Some(Trigger::IntervalElapsed)
        } else {
            None
        }
    }

    /// One scheduling decision, running a full cycle when due.
    pub async fn tick(&mut self, now: DateTime<Utc>) -> Option<Trigger> {
        let trigger = self.due(now)?;
        let quick = matches!(trigger, Trigger::Forced { quick: true });
        tracing::debug!(?trigger, "refresh cycle due");

        if let Err(err) = self.run_cycle(quick, now).await {
            tracing::error!(error = %err, ?trigger, "refresh cycle aborted; keeping last snapshots");
            // Retry on the next tick rather than waiting out a full interval.
            self.signal.request(quick);
        }
        Some(trigger)
    }

    /// Loads the portfolio, builds all views and publishes them as one set.
    pub async fn run_cycle(&mut self, quick: bool, now: DateTime<Utc>) -> Result<(), CoreError> {
        let entries = self.load_for_cycle().await?;
        let set = self.builder.build(&entries, quick, now).await;
        self.cache.publish_set(set);

        self.last_completed = Some(now);
        self.interval = jittered(&self.options);
        tracing::debug!(next_interval_secs = self.interval.as_secs(), "refresh interval re-armed");
        Ok(())
    }

    async fn load_for_cycle(&self) -> Result<Portfolio, CoreError> {
        match self.options.lease_expiry {
            LeaseExpiry::Disabled => self.store.load_all().await,
            LeaseExpiry::EachCycle => {
                let writer = self.store.write().await;
                let mut entries = writer.load_all().await?;

                let changed: Portfolio = entries
                    .values_mut()
                    .filter_map(|e| self.locks.tick(e).then(|| (e.ticker.clone(), e.clone())))
                    .collect();
                if !changed.is_empty() {
                    writer.save_all(&changed).await?;
                    tracing::debug!(changed = changed.len(), "persisted lease counters");
                }
                Ok(entries)
            }
        }
    }

    /// Runs until `stop` flips to true or its sender is dropped.
    pub async fn run(mut self, mut stop: watch::Receiver<bool>) {
        tracing::info!(
            tick_secs = self.options.tick.as_secs(),
            interval_min_secs = self.options.interval_min.as_secs(),
            interval_max_secs = self.options.interval_max.as_secs(),
            "refresh scheduler started"
        );

        loop {
            if *stop.borrow() {
                break;
            }

            self.tick(Utc::now()).await;

            tokio::select! {
                _ = tokio::time::sleep(self.options.tick) => {}
                changed = stop.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::info!("refresh scheduler stopped");
    }
}

fn jittered(options: &RefreshOptions) -> Duration {
    let min = options.interval_min.as_secs();
    let max = options.interval_max.as_secs().max(min);
    Duration::from_secs(rand::thread_rng().gen_range(min..=max))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::ThresholdAnalyzer;
    use crate::domain::entry::PortfolioEntry;
    use crate::domain::snapshot::View;
    use crate::pricing::{PriceError, PriceInfo, PriceProvider};
    use crate::refresh::industry::IndustryTable;
    use crate::storage::memory::InMemoryPortfolioStore;
    use crate::storage::PortfolioStore;
    use chrono::TimeZone;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingPrices {
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl PriceProvider for CountingPrices {
        fn provider_name(&self) -> &'static str {
            "counting"
        }

        async fn fetch(&self, _: &str, _: &str, _: bool, _: bool) -> Result<PriceInfo, PriceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(PriceInfo {
                price: 10.0,
                price_in_sek: 10.0,
                convert_to_sek_ratio: 1.0,
                industry: "Software".to_string(),
                employees: 1,
                statistics: None,
            })
        }
    }

    fn entry(ticker: &str, lock_key: i64) -> PortfolioEntry {
        PortfolioEntry {
            ticker: ticker.to_string(),
            name: ticker.to_string(),
            currency: "SEK".to_string(),
            count: 0,
            total_invested_sek: 0,
            bought_at: None,
            sold_at: None,
            switched_at: None,
            lock_key,
            lock_counter: 0,
            manual_override_price_sek: None,
        }
    }

    struct Harness {
        scheduler: RefreshScheduler,
        signal: Arc<RefreshSignal>,
        cache: Arc<SnapshotCache>,
        store: Arc<InMemoryPortfolioStore>,
        prices: Arc<CountingPrices>,
    }

    fn harness(options: RefreshOptions, entries: Vec<PortfolioEntry>) -> Harness {
        let store = Arc::new(InMemoryPortfolioStore::new(entries));
        let prices = Arc::new(CountingPrices::default());
        let sessions = Arc::new(MarketSessionTracker::new(
            crate::time::market_session::default_rules(),
            HashSet::new(),
        ));
        let locks = LockManager::new(options.auto_release_after);
        let builder = SnapshotBuilder::new(
            sessions.clone(),
            locks,
            prices.clone(),
            Arc::new(ThresholdAnalyzer::default()),
            IndustryTable::default(),
        );
        let cache = Arc::new(SnapshotCache::default());
        let signal = Arc::new(RefreshSignal::default());
        let scheduler = RefreshScheduler::new(
            Arc::new(SharedStore::new(store.clone())),
            builder,
            cache.clone(),
            signal.clone(),
            sessions,
            locks,
            options,
        );
        Harness {
            scheduler,
            signal,
            cache,
            store,
            prices,
        }
    }

    fn fixed_interval(secs: u64) -> RefreshOptions {
        RefreshOptions {
            interval_min: Duration::from_secs(secs),
            interval_max: Duration::from_secs(secs),
            ..Default::default()
        }
    }

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        // Monday 2026-01-05; Stockholm opens 08:02 UTC.
        Utc.with_ymd_and_hms(2026, 1, 5, h, m, s).unwrap()
    }

    #[tokio::test]
    async fn first_tick_runs_and_publishes() {
        let mut h = harness(fixed_interval(600), vec![entry("AAA", 0)]);
        assert!(h.scheduler.tick(at(7, 0, 0)).await.is_some());
        assert_eq!(h.scheduler.last_completed(), Some(at(7, 0, 0)));
        assert_eq!(h.cache.read(View::All).list.len(), 1);
    }

    #[tokio::test]
    async fn interval_gates_unforced_cycles() {
        let mut h = harness(fixed_interval(600), vec![entry("AAA", 0)]);
        h.scheduler.tick(at(7, 0, 0)).await;

        assert_eq!(h.scheduler.tick(at(7, 5, 0)).await, None);
        assert_eq!(h.scheduler.tick(at(7, 10, 0)).await, None);
        assert_eq!(
            h.scheduler.tick(at(7, 10, 1)).await,
            Some(Trigger::IntervalElapsed)
        );
        assert_eq!(h.prices.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn force_request_runs_on_next_tick_only() {
        let mut h = harness(fixed_interval(600), vec![entry("AAA", 0)]);
        h.scheduler.tick(at(7, 0, 0)).await;

        h.signal.request(true);
        assert_eq!(
            h.scheduler.tick(at(7, 0, 15)).await,
            Some(Trigger::Forced { quick: true })
        );
        assert_eq!(h.scheduler.tick(at(7, 0, 30)).await, None);
    }

    #[tokio::test]
    async fn session_edge_triggers_exactly_one_cycle() {
        let mut h = harness(fixed_interval(7200), vec![entry("AAA", 0)]);
        h.scheduler.tick(at(7, 0, 0)).await;
        assert_eq!(h.scheduler.tick(at(8, 1, 45)).await, None);

        // Stockholm opens between these ticks.
        assert_eq!(
            h.scheduler.tick(at(8, 2, 0)).await,
            Some(Trigger::SessionEdge)
        );
        assert_eq!(h.scheduler.tick(at(8, 2, 15)).await, None);
        assert_eq!(h.scheduler.tick(at(8, 2, 30)).await, None);
        assert_eq!(h.prices.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn edge_coinciding_with_force_is_not_replayed() {
        let mut h = harness(fixed_interval(7200), vec![entry("AAA", 0)]);
        h.scheduler.tick(at(7, 0, 0)).await;

        h.signal.request(false);
        assert_eq!(
            h.scheduler.tick(at(8, 2, 0)).await,
            Some(Trigger::Forced { quick: false })
        );
        assert_eq!(h.scheduler.tick(at(8, 2, 15)).await, None);
    }

    #[tokio::test]
    async fn each_cycle_expires_abandoned_leases() {
        let options = RefreshOptions {
            auto_release_after: 1,
            ..fixed_interval(60)
        };
        let mut h = harness(options, vec![entry("CCC", 4_444_444)]);

        h.scheduler.run_cycle(false, at(7, 0, 0)).await.unwrap();
        let stored = h.store.load_all().await.unwrap();
        assert_eq!(stored["CCC"].lock_key, 4_444_444);
        assert_eq!(stored["CCC"].lock_counter, 1);
        assert!(h.cache.read(View::All).list[0].current_stock.ticker_is_locked);

        h.scheduler.run_cycle(false, at(7, 2, 0)).await.unwrap();
        let stored = h.store.load_all().await.unwrap();
        assert_eq!(stored["CCC"].lock_key, 0);
        assert_eq!(stored["CCC"].lock_counter, 0);
        assert!(!h.cache.read(View::All).list[0].current_stock.ticker_is_locked);
    }

    #[tokio::test]
    async fn disabled_lease_expiry_never_writes() {
        let options = RefreshOptions {
            auto_release_after: 0,
            lease_expiry: LeaseExpiry::Disabled,
            ..fixed_interval(60)
        };
        let mut h = harness(options, vec![entry("CCC", 4_444_444)]);

        h.scheduler.run_cycle(false, at(7, 0, 0)).await.unwrap();
        h.scheduler.run_cycle(false, at(7, 2, 0)).await.unwrap();
        let stored = h.store.load_all().await.unwrap();
        assert_eq!(stored["CCC"].lock_key, 4_444_444);
        assert_eq!(stored["CCC"].lock_counter, 0);
    }

    #[tokio::test]
    async fn interval_is_rearmed_within_bounds() {
        let options = RefreshOptions {
            interval_min: Duration::from_secs(100),
            interval_max: Duration::from_secs(200),
            ..Default::default()
        };
        let mut h = harness(options, vec![]);
        for i in 0..20 {
            h.scheduler.run_cycle(false, at(7, i, 0)).await.unwrap();
            let secs = h.scheduler.current_interval().as_secs();
            assert!((100..=200).contains(&secs));
        }
    }

    #[tokio::test]
    async fn run_stops_when_signalled() {
        let h = harness(fixed_interval(600), vec![]);
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(h.scheduler.run(rx));
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
    }
}
