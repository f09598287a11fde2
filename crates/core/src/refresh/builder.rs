use crate::analysis::Analyzer;
use crate::domain::entry::{PortfolioEntry, TradingMode};
use crate::domain::snapshot::{
    CycleSummary, IndustryTotal, RefreshedEntry, Snapshot, SnapshotRecord, SnapshotSet,
};
use crate::pricing::{PriceInfo, PriceProvider};
use crate::refresh::industry::IndustryTable;
use crate::storage::lock::LockManager;
use crate::storage::Portfolio;
use crate::time::MarketSessionTracker;
use chrono::{DateTime, Utc};
use rand::Rng;
use std::collections::BTreeMap;
use std::fmt::Display;
use std::sync::Arc;

const UPDATE_VERSION_RANGE: std::ops::Range<u64> = 1_000_000..1_000_000_000;

/// Result of refreshing one entry.
#[derive(Debug)]
enum EntryOutcome {
    /// Position held on an exchange that is closed right now.
    Skipped,
    Priced(Box<PricedEntry>),
    Failed {
        name: String,
        override_value_sek: Option<i64>,
    },
}

#[derive(Debug)]
struct PricedEntry {
    view: RefreshedEntry,
    price: PriceInfo,
    value_sek: i64,
    mode: TradingMode,
    number_to_sell: i64,
    number_to_buy: i64,
    buy_indication: f64,
}

/// One pass over the portfolio producing the three views.
pub struct SnapshotBuilder {
    sessions: Arc<MarketSessionTracker>,
    locks: LockManager,
    prices: Arc<dyn PriceProvider>,
    analyzer: Arc<dyn Analyzer>,
    industries: IndustryTable,
}

impl SnapshotBuilder {
    pub fn new(
        sessions: Arc<MarketSessionTracker>,
        locks: LockManager,
        prices: Arc<dyn PriceProvider>,
        analyzer: Arc<dyn Analyzer>,
        industries: IndustryTable,
    ) -> Self {
        Self {
            sessions,
            locks,
            prices,
            analyzer,
            industries,
        }
    }

    /// Prices every entry in turn. A failing entry is recorded and the pass
    /// moves on; this never fails as a whole.
    pub async fn build(&self, entries: &Portfolio, quick: bool, now: DateTime<Utc>) -> SnapshotSet {
        let started = std::time::Instant::now();
        tracing::info!(entries = entries.len(), quick, "updating all stocks");

        let mut acc = CycleAccumulator::default();
        for entry in entries.values() {
            let outcome = self.evaluate(entry, quick, now).await;
            acc.absorb(entry, outcome, &self.industries);
        }

        let set = acc.finish(now);
        tracing::info!(
            success = set.all.summary.success_counter,
            failed = set.all.summary.fail_counter,
            skipped = set.all.summary.skipped_counter,
            update_version = set.all.summary.update_version,
            elapsed_ms = started.elapsed().as_millis(),
            "done updating all stocks"
        );
        set
    }

    async fn evaluate(&self, entry: &PortfolioEntry, quick: bool, now: DateTime<Utc>) -> EntryOutcome {
        if entry.holds_position() && !self.sessions.is_market_open_at(&entry.ticker, now) {
            return EntryOutcome::Skipped;
        }

        let mut view = entry.clone();
        let locked = self.locks.mark_refreshing(&mut view);
        // Only locked entries and quick cycles may reuse a recent quote.
        let use_cache = locked || quick;

        let price = match self
            .prices
            .fetch(&entry.ticker, &entry.currency, use_cache, true)
            .await
        {
            Ok(p) if p.price_in_sek.is_finite() && p.price_in_sek >= 0.0 => p,
            Ok(p) => return failed(entry, format!("unusable SEK price {}", p.price_in_sek)),
            Err(err) => return failed(entry, err),
        };

        if entry.manual_override_price_sek.is_some() {
            tracing::warn!(
                ticker = %entry.ticker,
                name = %entry.name,
                "manual override price set for a stock that is available online"
            );
        }

        let value_sek = (price.price_in_sek * entry.count as f64) as i64;
        let number_to_sell =
            self.analyzer
                .sell_quantity(value_sek, price.price_in_sek, price.price, entry.bought_at);
        let number_to_buy = self.analyzer.buy_quantity(
            price.price_in_sek,
            entry.count,
            entry.total_invested_sek,
            price.price,
            entry.sold_at,
        );
        let buy_indication = if number_to_buy > 0 {
            self.analyzer
                .buy_indication(value_sek, entry.total_invested_sek)
        } else {
            0.0
        };

        EntryOutcome::Priced(Box::new(PricedEntry {
            view: RefreshedEntry {
                entry: view,
                ticker_is_locked: locked,
            },
            price,
            value_sek,
            mode: entry.trading_mode(),
            number_to_sell,
            number_to_buy,
            buy_indication,
        }))
    }
}

fn failed(entry: &PortfolioEntry, reason: impl Display) -> EntryOutcome {
    let override_value_sek = entry.manual_override_price_sek.map(|p| {
        tracing::info!(
            ticker = %entry.ticker,
            name = %entry.name,
            error = %reason,
            "using manual override price"
        );
        (p * entry.count as f64) as i64
    });
    if override_value_sek.is_none() {
        tracing::warn!(
            ticker = %entry.ticker,
            name = %entry.name,
            error = %reason,
            "could not get stock data"
        );
    }

    EntryOutcome::Failed {
        name: entry.name.clone(),
        override_value_sek,
    }
}

#[derive(Debug, Default)]
struct IndustryBucket {
    total_value_sek: i64,
    companies: Vec<String>,
}

#[derive(Debug, Default)]
struct CycleAccumulator {
    all: Vec<SnapshotRecord>,
    to_buy: Vec<SnapshotRecord>,
    to_sell: Vec<SnapshotRecord>,
    industries: BTreeMap<String, IndustryBucket>,
    failed_to_lookup: Vec<String>,
    success: u32,
    skipped: u32,
    sell_mode: u32,
    buy_mode: u32,
    neutral_mode: u32,
    total_invested_sek: i64,
    total_global_value_sek: i64,
    total_employees: i64,
}

impl CycleAccumulator {
    fn absorb(&mut self, entry: &PortfolioEntry, outcome: EntryOutcome, industries: &IndustryTable) {
        match outcome {
            EntryOutcome::Skipped => self.skipped += 1,
            EntryOutcome::Failed {
                name,
                override_value_sek,
            } => {
                if let Some(v) = override_value_sek {
                    self.total_global_value_sek += v;
                }
                self.failed_to_lookup.push(name);
            }
            EntryOutcome::Priced(priced) => self.absorb_priced(entry, *priced, industries),
        }
    }

    fn absorb_priced(&mut self, entry: &PortfolioEntry, p: PricedEntry, industries: &IndustryTable) {
        let held = entry.holds_position();
        if held {
            match p.mode {
                TradingMode::Sell => self.sell_mode += 1,
                TradingMode::Buy => self.buy_mode += 1,
                TradingMode::Neutral => self.neutral_mode += 1,
            }
        }

        let base = SnapshotRecord {
            ticker_name: entry.ticker.clone(),
            current_stock: p.view,
            single_stock_price_sek: p.price.price_in_sek,
            price_orig_currency: p.price.price,
            currency: entry.currency.clone(),
            number_to_sell: None,
            number_to_buy: None,
            buy_indication: None,
            statistics: None,
        };

        if held && p.number_to_sell > 0 {
            self.to_sell.push(SnapshotRecord {
                number_to_sell: Some(p.number_to_sell),
                ..base.clone()
            });
        }
        if held && p.number_to_buy > 0 {
            self.to_buy.push(SnapshotRecord {
                number_to_buy: Some(p.number_to_buy),
                buy_indication: Some(p.buy_indication),
                ..base.clone()
            });
        }

        self.total_employees += p.price.employees;

        let bucket = self
            .industries
            .entry(industries.canonicalize(&p.price.industry))
            .or_default();
        bucket.total_value_sek += p.value_sek;
        bucket.companies.push(entry.name.clone());

        self.total_global_value_sek += p.value_sek;
        self.total_invested_sek += entry.total_invested_sek;

        self.all.push(SnapshotRecord {
            statistics: p.price.statistics,
            ..base
        });
        self.success += 1;
    }

    fn finish(mut self, now: DateTime<Utc>) -> SnapshotSet {
        let summary = CycleSummary {
            updated_utc: Some(now),
            sell_mode_stocks: self.sell_mode,
            buy_mode_stocks: self.buy_mode,
            neutral_mode_stocks: self.neutral_mode,
            fail_counter: self.failed_to_lookup.len() as u32,
            success_counter: self.success,
            skipped_counter: self.skipped,
            total_invested_sek: self.total_invested_sek,
            total_global_value_sek: self.total_global_value_sek,
            total_employees: self.total_employees,
            update_version: rand::thread_rng().gen_range(UPDATE_VERSION_RANGE),
            failed_to_lookup: self.failed_to_lookup,
        };

        self.to_buy.sort_by(|a, b| {
            b.buy_indication
                .partial_cmp(&a.buy_indication)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut industries: Vec<IndustryTotal> = self
            .industries
            .into_iter()
            .map(|(industry, bucket)| IndustryTotal {
                industry,
                total_value_sek: bucket.total_value_sek,
                companies: bucket.companies,
            })
            .collect();
        industries.sort_by_key(|i| i.total_value_sek);

        SnapshotSet {
            all: Snapshot {
                list: self.all,
                summary: summary.clone(),
                industries: Some(industries),
            },
            to_buy: Snapshot {
                list: self.to_buy,
                summary: summary.clone(),
                industries: None,
            },
            to_sell: Snapshot {
                list: self.to_sell,
                summary,
                industries: None,
            },
        }
    }
}
