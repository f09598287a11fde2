use crate::domain::entry::PortfolioEntry;
use crate::pricing::KeyStatistics;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum View {
    All,
    ToBuy,
    ToSell,
}

/// Copy of a stored entry as seen by one refresh cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshedEntry {
    #[serde(flatten)]
    pub entry: PortfolioEntry,
    /// Set when a human edit was pending while the ticker was refreshed.
    pub ticker_is_locked: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotRecord {
    pub ticker_name: String,
    pub current_stock: RefreshedEntry,
    pub single_stock_price_sek: f64,
    pub price_orig_currency: f64,
    pub currency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub number_to_sell: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub number_to_buy: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buy_indication: Option<f64>,
    #[serde(flatten)]
    pub statistics: Option<KeyStatistics>,
}

/// Aggregates shared verbatim by the three snapshots of one cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleSummary {
    pub updated_utc: Option<DateTime<Utc>>,
    pub sell_mode_stocks: u32,
    pub buy_mode_stocks: u32,
    pub neutral_mode_stocks: u32,
    pub fail_counter: u32,
    pub success_counter: u32,
    pub skipped_counter: u32,
    pub total_invested_sek: i64,
    pub total_global_value_sek: i64,
    pub total_employees: i64,
    pub update_version: u64,
    pub failed_to_lookup: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndustryTotal {
    pub industry: String,
    #[serde(rename = "totValueSek")]
    pub total_value_sek: i64,
    pub companies: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub list: Vec<SnapshotRecord>,
    #[serde(flatten)]
    pub summary: CycleSummary,
    /// Only present on the all-holdings view; ascending by total value.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub industries: Option<Vec<IndustryTotal>>,
}

/// The three views produced by one refresh cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapshotSet {
    pub all: Snapshot,
    pub to_buy: Snapshot,
    pub to_sell: Snapshot,
}

impl SnapshotSet {
    pub fn view(&self, view: View) -> &Snapshot {
        match view {
            View::All => &self.all,
            View::ToBuy => &self.to_buy,
            View::ToSell => &self.to_sell,
        }
    }
}
