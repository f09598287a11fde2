use crate::domain::entry::PortfolioEntry;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use uuid::Uuid;

/// One applied update, as handed out to downstream bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeLogEntry {
    pub id: Uuid,
    pub ticker: String,
    pub name: String,
    pub currency: String,
    pub count: i64,
    pub total_invested_sek: i64,
    pub bought_at: Option<f64>,
    pub sold_at: Option<f64>,
    pub switched_at: Option<f64>,
    pub purchased_stocks: i64,
    pub purchase_value_sek: i64,
    pub date: DateTime<Utc>,
    pub traded_by_bot: bool,
}

/// FIFO of applied updates. In-memory only.
#[derive(Debug, Default)]
pub struct ChangeLog {
    queue: Mutex<VecDeque<ChangeLogEntry>>,
}

impl ChangeLog {
    pub fn record(
        &self,
        before: Option<&PortfolioEntry>,
        after: &PortfolioEntry,
        traded_by_bot: bool,
        now: DateTime<Utc>,
    ) -> ChangeLogEntry {
        let (old_count, old_invested) = before
            .map(|e| (e.count, e.total_invested_sek))
            .unwrap_or((0, 0));

        let item = ChangeLogEntry {
            id: Uuid::new_v4(),
            ticker: after.ticker.clone(),
            name: after.name.clone(),
            currency: after.currency.clone(),
            count: after.count,
            total_invested_sek: after.total_invested_sek,
            bought_at: after.bought_at,
            sold_at: after.sold_at,
            switched_at: after.switched_at,
            purchased_stocks: after.count - old_count,
            purchase_value_sek: after.total_invested_sek - old_invested,
            date: now,
            traded_by_bot,
        };

        tracing::info!(
            ticker = %item.ticker,
            purchased_stocks = item.purchased_stocks,
            purchase_value_sek = item.purchase_value_sek,
            traded_by_bot,
            "added to stock change log"
        );

        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(item.clone());
        item
    }

    pub fn take_first(&self) -> Option<ChangeLogEntry> {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
