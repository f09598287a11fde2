use crate::domain::entry::PortfolioEntry;
use crate::storage::{Portfolio, PortfolioStore};
use anyhow::Context;
use tokio::sync::Mutex;

/// Store backed by a map; used by tests and the worker's fixture mode.
#[derive(Debug, Default)]
pub struct InMemoryPortfolioStore {
    entries: Mutex<Portfolio>,
}

impl InMemoryPortfolioStore {
    pub fn new(entries: impl IntoIterator<Item = PortfolioEntry>) -> Self {
        Self {
            entries: Mutex::new(
                entries
                    .into_iter()
                    .map(|e| (e.ticker.clone(), e))
                    .collect(),
            ),
        }
    }

    /// Reads a JSON array of entries.
    pub fn from_json_file(path: &std::path::Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read portfolio fixture {}", path.display()))?;
        let entries: Vec<PortfolioEntry> = serde_json::from_str(&text)
            .with_context(|| format!("portfolio fixture is not valid JSON: {}", path.display()))?;
        Ok(Self::new(entries))
    }
}

#[async_trait::async_trait]
impl PortfolioStore for InMemoryPortfolioStore {
    async fn load_all(&self) -> anyhow::Result<Portfolio> {
        Ok(self.entries.lock().await.clone())
    }

    async fn save_all(&self, entries: &Portfolio) -> anyhow::Result<()> {
        let mut stored = self.entries.lock().await;
        for (ticker, entry) in entries {
            stored.insert(ticker.clone(), entry.clone());
        }
        Ok(())
    }

    async fn delete(&self, ticker: &str) -> anyhow::Result<bool> {
        Ok(self.entries.lock().await.remove(ticker).is_some())
    }
}
