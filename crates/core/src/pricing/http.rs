use crate::config::{env_or, Settings};
use crate::pricing::{KeyStatistics, PriceError, PriceInfo, PriceProvider};
use anyhow::Context;
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

const DEFAULT_BASE_URL: &str = "https://query2.finance.yahoo.com";
const DEFAULT_TIMEOUT_SECS: u64 = 15;
const DEFAULT_RETRIES: u32 = 2;
const QUOTE_MODULES: &str = "financialData,summaryProfile,summaryDetail,defaultKeyStatistics";
const FX_MODULES: &str = "price";
const BASE_CURRENCY: &str = "SEK";

const STATISTICS_MODULES: &str = "summaryDetail,defaultKeyStatistics";

#[derive(Debug, Clone, Copy)]
struct CacheTtls {
    /// Upper bound on how stale a quote served to `use_cache` callers may be.
    dynamic: Duration,
    fx: Duration,
    statistics: Duration,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            dynamic: Duration::from_secs(5 * 60),
            fx: Duration::from_secs(4 * 60 * 60),
            statistics: Duration::from_secs(24 * 60 * 60),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct DynamicQuote {
    pub price: f64,
    pub industry: String,
    pub employees: i64,
}

#[derive(Debug, Default)]
struct QuoteCaches {
    dynamic: HashMap<String, (DynamicQuote, Instant)>,
    statistics: HashMap<String, (KeyStatistics, Instant)>,
    fx: HashMap<String, (f64, Instant)>,
}

/// Quote-summary JSON client with per-ticker and per-currency caches.
#[derive(Debug)]
pub struct HttpPriceProvider {
    http: reqwest::Client,
    base_url: String,
    retries: u32,
    ttls: CacheTtls,
    caches: Mutex<QuoteCaches>,
}

impl HttpPriceProvider {
    pub fn new(base_url: impl Into<String>, timeout: Duration, retries: u32) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("tradingpal/0.1")
            .build()
            .context("failed to build price provider http client")?;

        Ok(Self {
            http,
            base_url: base_url.into(),
            retries: retries.max(1),
            ttls: CacheTtls::default(),
            caches: Mutex::new(QuoteCaches::default()),
        })
    }

    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let base_url = settings
            .price_provider_base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let timeout_secs = env_or("PRICE_PROVIDER_TIMEOUT_SECS", DEFAULT_TIMEOUT_SECS);
        let retries = env_or("PRICE_PROVIDER_RETRIES", DEFAULT_RETRIES);

        Self::new(base_url, Duration::from_secs(timeout_secs), retries)
    }

    fn url(&self, symbol: &str) -> String {
        format!(
            "{}/v10/finance/quoteSummary/{}",
            self.base_url.trim_end_matches('/'),
            symbol
        )
    }

    async fn fetch_once(&self, symbol: &str, modules: &str) -> Result<Value, PriceError> {
        let res = self
            .http
            .get(self.url(symbol))
            .query(&[("modules", modules), ("formatted", "true")])
            .send()
            .await
            .map_err(|e| PriceError::upstream(symbol, format!("request failed: {e}")))?;

        let status = res.status();
        let text = res
            .text()
            .await
            .map_err(|e| PriceError::upstream(symbol, format!("failed to read response: {e}")))?;
        let raw: Value = serde_json::from_str(&text).map_err(|_| {
            PriceError::upstream(symbol, format!("HTTP {status}: response is not valid JSON"))
        })?;

        // The service reports unknown symbols as an error object, usually with a 404.
        if raw
            .pointer("/quoteSummary/error")
            .is_some_and(|e| !e.is_null())
        {
            return Err(PriceError::NotFound(symbol.to_string()));
        }
        if !status.is_success() {
            return Err(PriceError::upstream(symbol, format!("HTTP {status}: {raw}")));
        }

        Ok(raw)
    }

    async fn fetch_summary(&self, symbol: &str, modules: &str) -> Result<Value, PriceError> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.fetch_once(symbol, modules).await {
                Ok(raw) => return Ok(raw),
                Err(err @ PriceError::NotFound(_)) => return Err(err),
                Err(err) => {
                    if attempt >= self.retries {
                        return Err(err);
                    }
                    let backoff = Duration::from_secs(1 << (attempt - 1));
                    tracing::warn!(%symbol, attempt, ?backoff, error = %err, "quote fetch failed; retrying");
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    async fn sek_ratio(&self, currency: &str) -> Result<f64, PriceError> {
        if currency == BASE_CURRENCY {
            return Ok(1.0);
        }

        if let Some((rate, at)) = self.caches.lock().await.fx.get(currency) {
            if at.elapsed() < self.ttls.fx {
                return Ok(*rate);
            }
        }

        let pair = format!("{currency}{BASE_CURRENCY}=X");
        tracing::info!(%pair, "fetching currency conversion ratio");
        let raw = self.fetch_summary(&pair, FX_MODULES).await?;
        let rate = parse_fx_rate(&pair, &raw)?;

        self.caches
            .lock()
            .await
            .fx
            .insert(currency.to_string(), (rate, Instant::now()));
        Ok(rate)
    }

    /// Live quote unless `use_cache` is set and a quote younger than the
    /// dynamic TTL exists. Every live fetch also refreshes the statistics.
    async fn quote(&self, ticker: &str, use_cache: bool) -> Result<DynamicQuote, PriceError> {
        if use_cache {
            if let Some((q, at)) = self.caches.lock().await.dynamic.get(ticker) {
                if at.elapsed() < self.ttls.dynamic {
                    return Ok(q.clone());
                }
            }
        }

        let raw = self.fetch_summary(ticker, QUOTE_MODULES).await?;
        let quote = parse_dynamic_quote(ticker, &raw)?;
        let statistics = parse_statistics(&raw);

        let now = Instant::now();
        let mut caches = self.caches.lock().await;
        caches
            .dynamic
            .insert(ticker.to_string(), (quote.clone(), now));
        caches
            .statistics
            .insert(ticker.to_string(), (statistics, now));
        Ok(quote)
    }

    /// Cached key statistics, fetched on their own once missing or expired.
    /// A failed lookup only drops the statistics, never the price.
    async fn statistics(&self, ticker: &str) -> Option<KeyStatistics> {
        if let Some((s, at)) = self.caches.lock().await.statistics.get(ticker) {
            if at.elapsed() < self.ttls.statistics {
                return Some(s.clone());
            }
        }

        match self.fetch_summary(ticker, STATISTICS_MODULES).await {
            Ok(raw) => {
                let statistics = parse_statistics(&raw);
                self.caches
                    .lock()
                    .await
                    .statistics
                    .insert(ticker.to_string(), (statistics.clone(), Instant::now()));
                Some(statistics)
            }
            Err(err) => {
                tracing::warn!(%ticker, error = %err, "could not refresh key statistics");
                None
            }
        }
    }
}

#[async_trait::async_trait]
impl PriceProvider for HttpPriceProvider {
    fn provider_name(&self) -> &'static str {
        "quote_summary_http"
    }

    async fn fetch(
        &self,
        ticker: &str,
        currency: &str,
        use_cache: bool,
        include_static: bool,
    ) -> Result<PriceInfo, PriceError> {
        let currency = currency.trim().to_ascii_uppercase();
        let ratio = self.sek_ratio(&currency).await?;
        let quote = self.quote(ticker, use_cache).await?;
        let statistics = if include_static {
            self.statistics(ticker).await
        } else {
            None
        };

        Ok(PriceInfo {
            price: quote.price,
            price_in_sek: quote.price * ratio,
            convert_to_sek_ratio: ratio,
            industry: quote.industry,
            employees: quote.employees,
            statistics,
        })
    }
}

fn raw_f64(summary: &Value, path: &str) -> Option<f64> {
    summary
        .pointer(&format!("/quoteSummary/result/0/{path}"))
        .and_then(|v| v.get("raw").unwrap_or(v).as_f64())
}

pub(crate) fn parse_dynamic_quote(ticker: &str, raw: &Value) -> Result<DynamicQuote, PriceError> {
    let price = raw_f64(raw, "financialData/currentPrice")
        .ok_or_else(|| PriceError::NotFound(ticker.to_string()))?;

    let profile = raw.pointer("/quoteSummary/result/0/summaryProfile");
    let industry = profile
        .and_then(|p| p.get("industry"))
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .unwrap_or("unknown")
        .to_string();
    let employees = profile
        .and_then(|p| p.get("fullTimeEmployees"))
        .and_then(Value::as_i64)
        .unwrap_or(0);

    Ok(DynamicQuote {
        price,
        industry,
        employees,
    })
}

pub(crate) fn parse_statistics(raw: &Value) -> KeyStatistics {
    KeyStatistics {
        trailing_pe: raw_f64(raw, "summaryDetail/trailingPE"),
        price_to_sales_trailing12_months: raw_f64(
            raw,
            "summaryDetail/priceToSalesTrailing12Months",
        ),
        trailing_annual_dividend_yield: raw_f64(raw, "summaryDetail/trailingAnnualDividendYield"),
        enterprise_value: raw_f64(raw, "defaultKeyStatistics/enterpriseValue"),
    }
}

pub(crate) fn parse_fx_rate(pair: &str, raw: &Value) -> Result<f64, PriceError> {
    raw_f64(raw, "price/regularMarketPrice")
        .filter(|r| r.is_finite() && *r > 0.0)
        .ok_or_else(|| PriceError::upstream(pair, "missing regularMarketPrice"))
}
