pub mod lock;
pub mod memory;
pub mod portfolio;

use crate::domain::entry::PortfolioEntry;
use crate::error::CoreError;
use anyhow::Context;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

pub type Portfolio = BTreeMap<String, PortfolioEntry>;

pub async fn migrate(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("sqlx migrations failed")?;
    Ok(())
}

/// Key-value persistence of portfolio entries, keyed by ticker.
#[async_trait::async_trait]
pub trait PortfolioStore: Send + Sync {
    async fn load_all(&self) -> anyhow::Result<Portfolio>;

    /// Upserts the given entries; entries not in `entries` are left alone.
    async fn save_all(&self, entries: &Portfolio) -> anyhow::Result<()>;

    async fn delete(&self, ticker: &str) -> anyhow::Result<bool>;
}

/// A store plus the single writer lock every read-modify-write must hold.
pub struct SharedStore {
    store: Arc<dyn PortfolioStore>,
    writer: Mutex<()>,
}

impl SharedStore {
    pub fn new(store: Arc<dyn PortfolioStore>) -> Self {
        Self {
            store,
            writer: Mutex::new(()),
        }
    }

    /// Unserialized read, for consumers that never write back.
    pub async fn load_all(&self) -> Result<Portfolio, CoreError> {
        self.store
            .load_all()
            .await
            .map_err(CoreError::StoreUnavailable)
    }

    pub async fn write(&self) -> StoreWriter<'_> {
        StoreWriter {
            _guard: self.writer.lock().await,
            store: self.store.as_ref(),
        }
    }
}

/// Exclusive access to the store for one read-modify-write sequence.
pub struct StoreWriter<'a> {
    _guard: MutexGuard<'a, ()>,
    store: &'a dyn PortfolioStore,
}

impl StoreWriter<'_> {
    pub async fn load_all(&self) -> Result<Portfolio, CoreError> {
        self.store
            .load_all()
            .await
            .map_err(CoreError::StoreUnavailable)
    }

    pub async fn load(&self, ticker: &str) -> Result<Option<PortfolioEntry>, CoreError> {
        Ok(self.load_all().await?.remove(ticker))
    }

    pub async fn save(&self, entry: &PortfolioEntry) -> Result<(), CoreError> {
        let single = BTreeMap::from([(entry.ticker.clone(), entry.clone())]);
        self.save_all(&single).await
    }

    pub async fn save_all(&self, entries: &Portfolio) -> Result<(), CoreError> {
        self.store
            .save_all(entries)
            .await
            .map_err(CoreError::StoreUnavailable)
    }

    pub async fn delete(&self, ticker: &str) -> Result<bool, CoreError> {
        self.store
            .delete(ticker)
            .await
            .map_err(CoreError::StoreUnavailable)
    }
}
