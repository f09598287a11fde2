use crate::error::CoreError;
use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Utc, Weekday};
use chrono_tz::Tz;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, PoisonError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickerMatch {
    /// Ticker ends with an exchange suffix such as `.ST`.
    Suffix(String),
    /// Ticker has no `.` at all (US listings).
    NoSuffix,
}

impl TickerMatch {
    fn matches(&self, ticker: &str) -> bool {
        match self {
            TickerMatch::Suffix(suffix) => ticker
                .to_ascii_uppercase()
                .ends_with(&suffix.to_ascii_uppercase()),
            TickerMatch::NoSuffix => !ticker.contains('.'),
        }
    }
}

/// Trading session of one exchange, in exchange-local wall-clock time.
#[derive(Debug, Clone)]
pub struct ExchangeRule {
    pub exchange: String,
    pub matcher: TickerMatch,
    pub open: NaiveTime,
    pub close: NaiveTime,
    pub timezone: Tz,
}

impl ExchangeRule {
    /// Rejects times outside 00:00-23:59 and empty windows.
    pub fn new(
        exchange: &str,
        matcher: TickerMatch,
        open: (u32, u32),
        close: (u32, u32),
        timezone: Tz,
    ) -> Result<Self, CoreError> {
        let (Some(open_at), Some(close_at)) = (hm(open), hm(close)) else {
            return Err(CoreError::validation(format!(
                "exchange {exchange}: invalid session time {open:?}-{close:?}"
            )));
        };
        if open_at >= close_at {
            return Err(CoreError::validation(format!(
                "exchange {exchange}: session opens at {open_at} but closes at {close_at}"
            )));
        }

        Ok(Self {
            exchange: exchange.to_string(),
            matcher,
            open: open_at,
            close: close_at,
            timezone,
        })
    }

    fn is_open_at(&self, now_utc: DateTime<Utc>, holidays: &HashSet<NaiveDate>) -> bool {
        let local = now_utc.with_timezone(&self.timezone);
        if is_weekend(local.weekday()) || holidays.contains(&local.date_naive()) {
            return false;
        }

        // Bounds sit on whole minutes, so this is the half-open minute window [open, close).
        let time = local.time();
        self.open <= time && time < self.close
    }
}

fn hm((hour, minute): (u32, u32)) -> Option<NaiveTime> {
    NaiveTime::from_hms_opt(hour, minute, 0)
}

fn is_weekend(day: Weekday) -> bool {
    matches!(day, Weekday::Sat | Weekday::Sun)
}

/// Default exchange table. First matching rule wins.
pub fn default_rules() -> Vec<ExchangeRule> {
    let stockholm = chrono_tz::Europe::Stockholm;
    let eastern = chrono_tz::US::Eastern;
    let suffix = |s: &str| TickerMatch::Suffix(s.to_string());

    [
        ("oslo", suffix(".OL"), (9, 17), (16, 22), stockholm),
        ("stockholm", suffix(".ST"), (9, 2), (17, 27), stockholm),
        ("xetra", suffix(".DE"), (9, 17), (17, 27), stockholm),
        ("helsinki", suffix(".HE"), (9, 2), (17, 27), stockholm),
        ("copenhagen", suffix(".CO"), (9, 2), (16, 57), stockholm),
        ("toronto", suffix(".TO"), (9, 45), (15, 57), eastern),
        ("us", TickerMatch::NoSuffix, (9, 45), (15, 57), eastern),
    ]
    .into_iter()
    .filter_map(|(exchange, matcher, open, close, tz)| {
        ExchangeRule::new(exchange, matcher, open, close, tz)
            .map_err(|err| tracing::warn!(error = %err, "dropping exchange rule"))
            .ok()
    })
    .collect()
}

/// Answers "is this ticker's exchange open?" and detects session edges.
#[derive(Debug)]
pub struct MarketSessionTracker {
    rules: Vec<ExchangeRule>,
    holidays: HashSet<NaiveDate>,
    last_hash: Mutex<Option<u64>>,
}

impl Default for MarketSessionTracker {
    fn default() -> Self {
        Self::new(default_rules(), configured_holidays())
    }
}

impl MarketSessionTracker {
    pub fn new(rules: Vec<ExchangeRule>, holidays: HashSet<NaiveDate>) -> Self {
        Self {
            rules,
            holidays,
            last_hash: Mutex::new(None),
        }
    }

    pub fn rule_for(&self, ticker: &str) -> Option<&ExchangeRule> {
        self.rules.iter().find(|r| r.matcher.matches(ticker))
    }

    pub fn is_market_open(&self, ticker: &str) -> bool {
        self.is_market_open_at(ticker, Utc::now())
    }

    pub fn is_market_open_at(&self, ticker: &str, now_utc: DateTime<Utc>) -> bool {
        match self.rule_for(ticker) {
            Some(rule) => rule.is_open_at(now_utc, &self.holidays),
            None => {
                tracing::warn!(%ticker, "open hours for ticker not found; treating market as open");
                true
            }
        }
    }

    /// Open/closed flag per rule, in table order.
    pub fn session_states_at(&self, now_utc: DateTime<Utc>) -> Vec<(&str, bool)> {
        self.rules
            .iter()
            .map(|r| (r.exchange.as_str(), r.is_open_at(now_utc, &self.holidays)))
            .collect()
    }

    pub fn sessions_changed(&self) -> bool {
        self.sessions_changed_at(Utc::now())
    }

    /// Edge detector: true exactly once each time any exchange opens or closes.
    /// The very first observation counts as an edge.
    pub fn sessions_changed_at(&self, now_utc: DateTime<Utc>) -> bool {
        let states = self.session_states_at(now_utc);
        let mut hasher = DefaultHasher::new();
        for (_, open) in &states {
            open.hash(&mut hasher);
        }
        let hash = hasher.finish();

        let mut last = self.last_hash.lock().unwrap_or_else(PoisonError::into_inner);
        if *last == Some(hash) {
            return false;
        }
        *last = Some(hash);

        let open: Vec<&str> = states
            .iter()
            .filter(|(_, open)| *open)
            .map(|(name, _)| *name)
            .collect();
        tracing::info!(?open, "market open hours changed");
        true
    }
}

// Extend via MARKET_HOLIDAYS="YYYY-MM-DD,YYYY-MM-DD". Applies to every exchange.
fn configured_holidays() -> HashSet<NaiveDate> {
    let mut out = HashSet::new();

    if let Ok(s) = std::env::var("MARKET_HOLIDAYS") {
        for part in s.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            match NaiveDate::parse_from_str(part, "%Y-%m-%d") {
                Ok(d) => {
                    out.insert(d);
                }
                Err(err) => tracing::warn!(value = part, error = %err, "ignoring bad MARKET_HOLIDAYS entry"),
            }
        }
    }

    out
}
