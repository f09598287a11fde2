use crate::analysis::Analyzer;
use crate::domain::change_log::{ChangeLog, ChangeLogEntry};
use crate::domain::entry::PortfolioEntry;
use crate::domain::snapshot::{Snapshot, View};
use crate::domain::update::{EntryDraft, EntryUpdate};
use crate::error::CoreError;
use crate::pricing::{PriceError, PriceInfo, PriceProvider};
use crate::refresh::{
    IndustryTable, RefreshOptions, RefreshScheduler, RefreshSignal, SnapshotBuilder, SnapshotCache,
};
use crate::storage::lock::LockManager;
use crate::storage::{PortfolioStore, SharedStore};
use crate::time::MarketSessionTracker;
use chrono::Utc;
use std::sync::Arc;

/// Everything needed to wire a service and its scheduler together.
pub struct Components {
    pub store: Arc<dyn PortfolioStore>,
    pub prices: Arc<dyn PriceProvider>,
    pub analyzer: Arc<dyn Analyzer>,
    pub sessions: Arc<MarketSessionTracker>,
    pub industries: IndustryTable,
    pub options: RefreshOptions,
}

/// Builds a service and the scheduler that feeds its snapshot cache. Both
/// share one store writer lock and one force-refresh signal.
pub fn assemble(components: Components) -> (PortfolioService, RefreshScheduler) {
    let Components {
        store,
        prices,
        analyzer,
        sessions,
        industries,
        options,
    } = components;

    let store = Arc::new(SharedStore::new(store));
    let cache = Arc::new(SnapshotCache::default());
    let signal = Arc::new(RefreshSignal::default());
    let locks = LockManager::new(options.auto_release_after);

    let builder = SnapshotBuilder::new(
        sessions.clone(),
        locks,
        prices.clone(),
        analyzer,
        industries,
    );
    let scheduler = RefreshScheduler::new(
        store.clone(),
        builder,
        cache.clone(),
        signal.clone(),
        sessions,
        locks,
        options,
    );
    let service = PortfolioService {
        store,
        cache,
        signal,
        locks,
        prices,
        change_log: ChangeLog::default(),
    };
    (service, scheduler)
}

/// Portfolio operations exposed to the HTTP layer.
pub struct PortfolioService {
    store: Arc<SharedStore>,
    cache: Arc<SnapshotCache>,
    signal: Arc<RefreshSignal>,
    locks: LockManager,
    prices: Arc<dyn PriceProvider>,
    change_log: ChangeLog,
}

impl PortfolioService {
    pub fn force_refresh(&self, quick: bool) {
        tracing::debug!(quick, "forced refresh requested");
        self.signal.request(quick);
    }

    pub fn refresh_pending(&self) -> bool {
        self.signal.is_pending()
    }

    /// Last published view. Empty until the first cycle completes.
    pub fn snapshot(&self, view: View) -> Snapshot {
        self.cache.read(view)
    }

    /// Current store contents, bypassing the snapshot cache.
    pub async fn entries(&self) -> Result<Vec<PortfolioEntry>, CoreError> {
        Ok(self.store.load_all().await?.into_values().collect())
    }

    pub async fn acquire_lock(&self, ticker: &str) -> Result<i64, CoreError> {
        let token = {
            let writer = self.store.write().await;
            let mut entry = writer
                .load(ticker)
                .await?
                .ok_or_else(|| CoreError::NotFound(ticker.to_string()))?;
            let token = self.locks.acquire(&mut entry)?;
            writer.save(&entry).await?;
            token
        };

        tracing::info!(ticker, "lock acquired");
        self.signal.request(true);
        Ok(token)
    }

    /// Releases a held lease. Releasing an unlocked entry is a no-op.
    pub async fn release_lock(&self, ticker: &str, token: i64) -> Result<(), CoreError> {
        let released = {
            let writer = self.store.write().await;
            let mut entry = writer
                .load(ticker)
                .await?
                .ok_or_else(|| CoreError::NotFound(ticker.to_string()))?;
            let released = self.locks.release(&mut entry, token)?;
            if released {
                writer.save(&entry).await?;
            }
            released
        };

        if released {
            tracing::info!(ticker, "lock released");
            self.signal.request(false);
        }
        Ok(())
    }

    /// Applies a field-level update. Existing entries must be leased with a
    /// matching token when `require_token` is set; unknown tickers are created.
    /// The lease is released on success.
    pub async fn apply_update(
        &self,
        update: &EntryUpdate,
        require_token: bool,
    ) -> Result<PortfolioEntry, CoreError> {
        let ticker = update.ticker.trim();
        if ticker.is_empty() {
            return Err(CoreError::validation("ticker must not be empty"));
        }

        let updated = {
            let writer = self.store.write().await;
            let existing = writer.load(ticker).await?;
            if let (Some(entry), true) = (&existing, require_token) {
                self.locks.verify(entry, update.lock_key)?;
            }

            let draft = existing
                .clone()
                .map(EntryDraft::from)
                .unwrap_or_else(|| EntryDraft::empty(ticker));
            let updated = update.apply(draft)?;
            writer.save(&updated).await?;

            self.change_log
                .record(existing.as_ref(), &updated, update.traded_by_bot, Utc::now());
            updated
        };

        tracing::info!(ticker, count = updated.count, "updated stock");
        self.signal.request(false);
        Ok(updated)
    }

    /// Removes an entry. Requires the caller to hold its lease.
    pub async fn delete_entry(&self, ticker: &str, token: Option<i64>) -> Result<(), CoreError> {
        {
            let writer = self.store.write().await;
            let entry = writer
                .load(ticker)
                .await?
                .ok_or_else(|| CoreError::NotFound(ticker.to_string()))?;
            self.locks.verify(&entry, token)?;
            writer.delete(ticker).await?;
        }

        tracing::info!(ticker, "deleted stock");
        self.signal.request(false);
        Ok(())
    }

    pub fn take_first_change(&self) -> Option<ChangeLogEntry> {
        self.change_log.take_first()
    }

    /// Live price lookup outside the refresh cycle. Cached quotes are allowed.
    pub async fn ticker_value(&self, ticker: &str, currency: &str) -> Result<PriceInfo, PriceError> {
        self.prices.fetch(ticker, currency, true, false).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::ThresholdAnalyzer;
    use crate::storage::memory::InMemoryPortfolioStore;
    use std::collections::HashSet;

    struct NoPrices;

    #[async_trait::async_trait]
    impl PriceProvider for NoPrices {
        fn provider_name(&self) -> &'static str {
            "none"
        }

        async fn fetch(&self, ticker: &str, _: &str, _: bool, _: bool) -> Result<PriceInfo, PriceError> {
            Err(PriceError::NotFound(ticker.to_string()))
        }
    }

    fn entry(ticker: &str, lock_key: i64) -> PortfolioEntry {
        PortfolioEntry {
            ticker: ticker.to_string(),
            name: format!("{ticker} AB"),
            currency: "SEK".to_string(),
            count: 10,
            total_invested_sek: 1000,
            bought_at: Some(120.0),
            sold_at: None,
            switched_at: Some(120.0),
            lock_key,
            lock_counter: 0,
            manual_override_price_sek: None,
        }
    }

    fn service(entries: Vec<PortfolioEntry>) -> (PortfolioService, Arc<InMemoryPortfolioStore>) {
        let store = Arc::new(InMemoryPortfolioStore::new(entries));
        let (service, _scheduler) = assemble(Components {
            store: store.clone(),
            prices: Arc::new(NoPrices),
            analyzer: Arc::new(ThresholdAnalyzer::default()),
            sessions: Arc::new(MarketSessionTracker::new(
                crate::time::market_session::default_rules(),
                HashSet::new(),
            )),
            industries: IndustryTable::default(),
            options: RefreshOptions::default(),
        });
        (service, store)
    }

    fn update(value: serde_json::Value) -> EntryUpdate {
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn concurrent_acquire_has_one_winner() {
        let (service, _) = service(vec![entry("CCC", 0)]);
        let (a, b) = tokio::join!(service.acquire_lock("CCC"), service.acquire_lock("CCC"));

        let winners = [&a, &b].iter().filter(|r| r.is_ok()).count();
        assert_eq!(winners, 1);
        let loser = if a.is_ok() { b } else { a };
        assert!(matches!(loser, Err(CoreError::AlreadyLocked(_))));
    }

    #[tokio::test]
    async fn acquire_persists_token_and_requests_refresh() {
        let (service, store) = service(vec![entry("CCC", 0)]);
        let token = service.acquire_lock("CCC").await.unwrap();

        assert!((1_000_000..1_000_000_000).contains(&token));
        assert_eq!(store.load_all().await.unwrap()["CCC"].lock_key, token);
        assert!(service.refresh_pending());
    }

    #[tokio::test]
    async fn acquire_unknown_ticker_is_not_found() {
        let (service, _) = service(vec![]);
        assert!(matches!(
            service.acquire_lock("NOPE").await,
            Err(CoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn release_checks_token_and_tolerates_unlocked() {
        let (service, store) = service(vec![entry("CCC", 2_000_000), entry("DDD", 0)]);

        assert!(matches!(
            service.release_lock("CCC", 3_000_000).await,
            Err(CoreError::TokenMismatch(_))
        ));
        service.release_lock("CCC", 2_000_000).await.unwrap();
        assert_eq!(store.load_all().await.unwrap()["CCC"].lock_key, 0);

        service.signal.take();
        service.release_lock("DDD", 123).await.unwrap();
        assert!(!service.refresh_pending());
    }

    #[tokio::test]
    async fn update_requires_matching_lease() {
        let (service, _) = service(vec![entry("CCC", 0)]);
        let change = update(serde_json::json!({ "ticker": "CCC", "count": 11, "lockKey": 5 }));
        assert!(matches!(
            service.apply_update(&change, true).await,
            Err(CoreError::LockRequired(_))
        ));

        let token = service.acquire_lock("CCC").await.unwrap();
        let wrong = update(serde_json::json!({ "ticker": "CCC", "count": 11, "lockKey": token + 1 }));
        assert!(matches!(
            service.apply_update(&wrong, true).await,
            Err(CoreError::TokenMismatch(_))
        ));
    }

    #[tokio::test]
    async fn update_releases_lease_and_logs_trade() {
        let (service, store) = service(vec![entry("CCC", 0)]);
        let token = service.acquire_lock("CCC").await.unwrap();

        let change = update(serde_json::json!({
            "ticker": "CCC",
            "lockKey": token,
            "count": 14,
            "totalInvestedSek": 1400,
            "tradedByBot": true
        }));
        let updated = service.apply_update(&change, true).await.unwrap();
        assert_eq!(updated.count, 14);
        assert_eq!(updated.lock_key, 0);
        assert_eq!(store.load_all().await.unwrap()["CCC"].count, 14);

        let logged = service.take_first_change().unwrap();
        assert_eq!(logged.purchased_stocks, 4);
        assert_eq!(logged.purchase_value_sek, 400);
        assert!(logged.traded_by_bot);
        assert!(service.take_first_change().is_none());
    }

    #[tokio::test]
    async fn update_rejects_both_thresholds() {
        let (service, store) = service(vec![entry("CCC", 0)]);
        let change = update(serde_json::json!({ "ticker": "CCC", "soldAt": 150.0 }));
        assert!(matches!(
            service.apply_update(&change, false).await,
            Err(CoreError::Validation(_))
        ));
        assert_eq!(store.load_all().await.unwrap()["CCC"].sold_at, None);
    }

    #[tokio::test]
    async fn update_creates_new_entries() {
        let (service, store) = service(vec![]);
        let change = update(serde_json::json!({
            "ticker": "NEW.ST",
            "name": "New AB",
            "count": 0,
            "totalInvestedSek": 0,
            "boughtAt": null,
            "soldAt": 42.0
        }));
        let created = service.apply_update(&change, true).await.unwrap();
        assert_eq!(created.currency, "SEK");
        assert_eq!(created.lock_key, 0);
        assert_eq!(created.switched_at, None);
        assert!(store.load_all().await.unwrap().contains_key("NEW.ST"));

        let logged = service.take_first_change().unwrap();
        assert_eq!(logged.purchased_stocks, 0);
    }

    #[tokio::test]
    async fn delete_needs_the_lease() {
        let (service, store) = service(vec![entry("CCC", 0)]);
        assert!(matches!(
            service.delete_entry("CCC", None).await,
            Err(CoreError::LockRequired(_))
        ));

        let token = service.acquire_lock("CCC").await.unwrap();
        service.delete_entry("CCC", Some(token)).await.unwrap();
        assert!(store.load_all().await.unwrap().is_empty());
        assert!(matches!(
            service.delete_entry("CCC", Some(token)).await,
            Err(CoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn snapshot_is_empty_before_first_cycle() {
        let (service, _) = service(vec![entry("CCC", 0)]);
        assert!(service.snapshot(View::All).list.is_empty());
        assert!(matches!(
            service.ticker_value("CCC", "SEK").await,
            Err(PriceError::NotFound(_))
        ));
    }
}
