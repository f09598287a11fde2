use crate::domain::entry::{PortfolioEntry, LOCK_UNLOCKED};
use crate::error::CoreError;
use serde::{Deserialize, Deserializer};

const DEFAULT_CURRENCY: &str = "SEK";

/// Field-level update of one portfolio entry. Absent fields are left untouched;
/// `boughtAt`/`soldAt` distinguish "absent" from an explicit `null`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryUpdate {
    pub ticker: String,
    pub lock_key: Option<i64>,
    #[serde(default, deserialize_with = "present")]
    pub bought_at: Option<Option<f64>>,
    #[serde(default, deserialize_with = "present")]
    pub sold_at: Option<Option<f64>>,
    pub count: Option<i64>,
    pub name: Option<String>,
    pub total_invested_sek: Option<i64>,
    pub currency: Option<String>,
    #[serde(default)]
    pub traded_by_bot: bool,
}

fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Partially populated entry; new tickers start out empty.
#[derive(Debug, Clone)]
pub(crate) struct EntryDraft {
    ticker: String,
    name: Option<String>,
    currency: Option<String>,
    count: Option<i64>,
    total_invested_sek: Option<i64>,
    bought_at: Option<Option<f64>>,
    sold_at: Option<Option<f64>>,
    switched_at: Option<f64>,
    lock_key: Option<i64>,
    lock_counter: i64,
    manual_override_price_sek: Option<f64>,
}

impl EntryDraft {
    pub(crate) fn empty(ticker: &str) -> Self {
        Self {
            ticker: ticker.to_string(),
            name: None,
            currency: None,
            count: None,
            total_invested_sek: None,
            bought_at: None,
            sold_at: None,
            switched_at: None,
            lock_key: None,
            lock_counter: 0,
            manual_override_price_sek: None,
        }
    }
}

impl From<PortfolioEntry> for EntryDraft {
    fn from(e: PortfolioEntry) -> Self {
        Self {
            ticker: e.ticker,
            name: Some(e.name),
            currency: Some(e.currency),
            count: Some(e.count),
            total_invested_sek: Some(e.total_invested_sek),
            bought_at: Some(e.bought_at),
            sold_at: Some(e.sold_at),
            switched_at: e.switched_at,
            lock_key: Some(e.lock_key),
            lock_counter: e.lock_counter,
            manual_override_price_sek: e.manual_override_price_sek,
        }
    }
}

impl EntryUpdate {
    /// Applies the update to `draft`, ending any edit lease, and returns the
    /// resulting entry once every required field is populated and valid.
    pub(crate) fn apply(&self, mut draft: EntryDraft) -> Result<PortfolioEntry, CoreError> {
        if let Some(new) = self.bought_at {
            check_threshold("boughtAt", new)?;
            if let Some(old) = draft.bought_at {
                draft.switched_at = switched_at(old, new, draft.switched_at);
            }
            draft.bought_at = Some(new);
        }

        if let Some(new) = self.sold_at {
            check_threshold("soldAt", new)?;
            if let Some(old) = draft.sold_at {
                draft.switched_at = switched_at(old, new, draft.switched_at);
            }
            draft.sold_at = Some(new);
        }

        if let Some(count) = self.count {
            draft.count = Some(count);
        }
        if let Some(name) = &self.name {
            draft.name = Some(name.trim().to_string());
        }
        if let Some(total) = self.total_invested_sek {
            draft.total_invested_sek = Some(total);
        }
        if let Some(currency) = &self.currency {
            draft.currency = Some(currency.trim().to_ascii_uppercase());
        }

        draft.lock_key = Some(LOCK_UNLOCKED);
        draft.lock_counter = 0;

        draft.finish()
    }
}

impl EntryDraft {
    fn finish(self) -> Result<PortfolioEntry, CoreError> {
        let bought_at = self.bought_at.ok_or_else(|| missing("boughtAt"))?;
        let count = self.count.ok_or_else(|| missing("count"))?;
        let lock_key = self.lock_key.ok_or_else(|| missing("lockKey"))?;
        let name = self.name.ok_or_else(|| missing("name"))?;
        let sold_at = self.sold_at.ok_or_else(|| missing("soldAt"))?;
        let total_invested_sek = self
            .total_invested_sek
            .ok_or_else(|| missing("totalInvestedSek"))?;

        if name.is_empty() {
            return Err(CoreError::validation("name must be non-empty"));
        }
        if count < 0 {
            return Err(CoreError::validation(format!(
                "count must be >= 0 (got {count})"
            )));
        }
        if total_invested_sek < 0 {
            return Err(CoreError::validation(format!(
                "totalInvestedSek must be >= 0 (got {total_invested_sek})"
            )));
        }
        if bought_at.is_some() && sold_at.is_some() {
            return Err(CoreError::validation(
                "at least one of soldAt or boughtAt must be null",
            ));
        }

        let currency = self
            .currency
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| DEFAULT_CURRENCY.to_string());

        Ok(PortfolioEntry {
            ticker: self.ticker,
            name,
            currency,
            count,
            total_invested_sek,
            bought_at,
            sold_at,
            switched_at: self.switched_at,
            lock_key,
            lock_counter: self.lock_counter,
            manual_override_price_sek: self.manual_override_price_sek,
        })
    }
}

// A threshold going from null to a value marks a mode switch at that value.
fn switched_at(old: Option<f64>, new: Option<f64>, current: Option<f64>) -> Option<f64> {
    match (old, new) {
        (None, Some(v)) => Some(v),
        _ => current,
    }
}

fn check_threshold(field: &str, value: Option<f64>) -> Result<(), CoreError> {
    match value {
        Some(v) if !v.is_finite() => Err(CoreError::validation(format!(
            "{field} must be a finite number or null"
        ))),
        _ => Ok(()),
    }
}

fn missing(field: &str) -> CoreError {
    CoreError::validation(format!("no value provided for {field}"))
}
