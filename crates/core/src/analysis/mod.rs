use crate::config::env_or;

/// Buy/sell decision arithmetic consumed by the refresh cycle.
pub trait Analyzer: Send + Sync {
    /// Number of shares to sell for a position valued at `value_sek`.
    fn sell_quantity(&self, value_sek: i64, price_sek: f64, price: f64, bought_at: Option<f64>)
        -> i64;

    /// Number of shares to buy.
    fn buy_quantity(
        &self,
        price_sek: f64,
        count: i64,
        invested_sek: i64,
        price: f64,
        sold_at: Option<f64>,
    ) -> i64;

    /// Higher means a stronger buy case; used to order the buy list.
    fn buy_indication(&self, value_sek: i64, invested_sek: i64) -> f64;
}

/// Threshold rules: sell after a gain over `boughtAt`, buy after a drop under `soldAt`.
#[derive(Debug, Clone)]
pub struct ThresholdAnalyzer {
    /// Fractional gain over `boughtAt` that triggers a sell, e.g. 0.10.
    pub sell_gain: f64,
    /// Share of the position value to sell once triggered.
    pub sell_fraction: f64,
    /// Fractional drop under `soldAt` that triggers a buy.
    pub buy_drop: f64,
    /// SEK amount to buy for once triggered.
    pub buy_amount_sek: i64,
}

impl Default for ThresholdAnalyzer {
    fn default() -> Self {
        Self {
            sell_gain: 0.10,
            sell_fraction: 0.5,
            buy_drop: 0.10,
            buy_amount_sek: 5_000,
        }
    }
}

impl ThresholdAnalyzer {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            sell_gain: env_or("ANALYZER_SELL_GAIN", d.sell_gain),
            sell_fraction: env_or("ANALYZER_SELL_FRACTION", d.sell_fraction),
            buy_drop: env_or("ANALYZER_BUY_DROP", d.buy_drop),
            buy_amount_sek: env_or("ANALYZER_BUY_AMOUNT_SEK", d.buy_amount_sek),
        }
    }
}

impl Analyzer for ThresholdAnalyzer {
    fn sell_quantity(
        &self,
        value_sek: i64,
        price_sek: f64,
        price: f64,
        bought_at: Option<f64>,
    ) -> i64 {
        let Some(bought_at) = bought_at.filter(|b| *b > 0.0) else {
            return 0;
        };
        if price_sek <= 0.0 || price < bought_at * (1.0 + self.sell_gain) {
            return 0;
        }
        ((value_sek as f64 * self.sell_fraction) / price_sek).floor() as i64
    }

    fn buy_quantity(
        &self,
        price_sek: f64,
        _count: i64,
        _invested_sek: i64,
        price: f64,
        sold_at: Option<f64>,
    ) -> i64 {
        let Some(sold_at) = sold_at.filter(|s| *s > 0.0) else {
            return 0;
        };
        if price_sek <= 0.0 || price > sold_at * (1.0 - self.buy_drop) {
            return 0;
        }
        ((self.buy_amount_sek as f64 / price_sek).floor() as i64).max(1)
    }

    fn buy_indication(&self, value_sek: i64, invested_sek: i64) -> f64 {
        if invested_sek <= 0 {
            return 0.0;
        }
        (invested_sek - value_sek) as f64 / invested_sek as f64 * 100.0
    }
}
