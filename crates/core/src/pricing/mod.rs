pub mod http;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use http::HttpPriceProvider;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyStatistics {
    #[serde(rename = "trailingPE")]
    pub trailing_pe: Option<f64>,
    pub price_to_sales_trailing12_months: Option<f64>,
    pub trailing_annual_dividend_yield: Option<f64>,
    pub enterprise_value: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceInfo {
    /// Price in the instrument's own currency.
    pub price: f64,
    pub price_in_sek: f64,
    pub convert_to_sek_ratio: f64,
    pub industry: String,
    pub employees: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statistics: Option<KeyStatistics>,
}

#[derive(Debug, Error)]
pub enum PriceError {
    #[error("ticker not found: {0}")]
    NotFound(String),

    #[error("price lookup for {ticker} failed: {detail}")]
    Upstream { ticker: String, detail: String },
}

impl PriceError {
    pub(crate) fn upstream(ticker: &str, err: impl std::fmt::Display) -> Self {
        PriceError::Upstream {
            ticker: ticker.to_string(),
            detail: err.to_string(),
        }
    }
}

#[async_trait::async_trait]
pub trait PriceProvider: Send + Sync {
    fn provider_name(&self) -> &'static str;

    /// Live price for `ticker`, converted from `currency` to SEK.
    ///
    /// `use_cache` allows serving a recent cached quote instead of a live one;
    /// `include_static` asks for key statistics as well.
    async fn fetch(
        &self,
        ticker: &str,
        currency: &str,
        use_cache: bool,
        include_static: bool,
    ) -> Result<PriceInfo, PriceError>;
}
