use serde::{Deserialize, Serialize};

pub const LOCK_UNLOCKED: i64 = 0;

/// Lock key written on the in-memory refresh copy of a held entry. Never persisted.
pub const LOCK_REFRESHING: i64 = -1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioEntry {
    pub ticker: String,
    pub name: String,
    pub currency: String,
    /// Zero means the ticker is only watched.
    pub count: i64,
    pub total_invested_sek: i64,
    pub bought_at: Option<f64>,
    pub sold_at: Option<f64>,
    /// Threshold at which the entry last flipped between buy and sell mode.
    #[serde(default)]
    pub switched_at: Option<f64>,
    #[serde(default)]
    pub lock_key: i64,
    #[serde(default)]
    pub lock_counter: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manual_override_price_sek: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradingMode {
    Buy,
    Sell,
    Neutral,
}

impl PortfolioEntry {
    pub fn trading_mode(&self) -> TradingMode {
        match (self.bought_at, self.sold_at) {
            (Some(_), None) => TradingMode::Buy,
            (None, Some(_)) => TradingMode::Sell,
            _ => TradingMode::Neutral,
        }
    }

    pub fn holds_position(&self) -> bool {
        self.count > 0
    }

    pub fn is_locked(&self) -> bool {
        self.lock_key > 0
    }
}
