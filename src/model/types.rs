use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{MarketError, MarketResult};
use crate::model::parse::{lenient_timestamp, parse_price};

/// Ticker identifier. Always trimmed and uppercased, so it can key every
/// per-symbol structure directly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Symbol(String);

impl Symbol {
    pub fn new(raw: &str) -> Self {
        Symbol(raw.trim().to_uppercase())
    }

    /// Like `new`, but refuses tickers that are empty after trimming.
    pub fn parse(raw: &str) -> Option<Self> {
        let symbol = Self::new(raw);
        if symbol.0.is_empty() {
            None
        } else {
            Some(symbol)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for Symbol {
    fn from(raw: String) -> Self {
        Symbol::new(&raw)
    }
}

impl From<&str> for Symbol {
    fn from(raw: &str) -> Self {
        Symbol::new(raw)
    }
}

impl From<Symbol> for String {
    fn from(symbol: Symbol) -> Self {
        symbol.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// A point only exists when both halves are valid, hence the private fields.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PricePoint {
    timestamp: DateTime<Utc>,
    price: f64,
}

impl PricePoint {
    pub fn new(timestamp: DateTime<Utc>, price: f64) -> Option<Self> {
        if price.is_finite() {
            Some(PricePoint { timestamp, price })
        } else {
            None
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn price(&self) -> f64 {
        self.price
    }
}

/// Current price as reported by the price feed. Non-numeric values are kept
/// for display but never enter a history series.
#[derive(Debug, Clone, PartialEq)]
pub enum PriceValue {
    Numeric(f64),
    Opaque(String),
}

impl PriceValue {
    pub fn as_numeric(&self) -> Option<f64> {
        match self {
            PriceValue::Numeric(price) => Some(*price),
            PriceValue::Opaque(_) => None,
        }
    }
}

impl fmt::Display for PriceValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PriceValue::Numeric(price) => f.write_str(&format_price(*price)),
            PriceValue::Opaque(raw) => f.write_str(raw),
        }
    }
}

/// `$1,234.500` style: three decimals, thousands grouping.
pub fn format_price(value: f64) -> String {
    let formatted = format!("{:.3}", value.abs());
    let (int_part, frac_part) = formatted
        .split_once('.')
        .unwrap_or((formatted.as_str(), "000"));

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    let sign = if value < 0.0 { "-" } else { "" };
    format!("{sign}${grouped}.{frac_part}")
}

/// One poll of the price feed: symbol -> current price.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapshotBatch {
    pub prices: BTreeMap<Symbol, PriceValue>,
}

impl SnapshotBatch {
    pub fn get(&self, symbol: &Symbol) -> Option<&PriceValue> {
        self.prices.get(symbol)
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }
}

/// One poll of the intraday feed: symbol -> time-ascending points.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IntradayBatch {
    pub series: BTreeMap<Symbol, Vec<PricePoint>>,
}

impl IntradayBatch {
    pub fn get(&self, symbol: &Symbol) -> Option<&[PricePoint]> {
        self.series.get(symbol).map(Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Above,
    Below,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Above => f.write_str("above"),
            Direction::Below => f.write_str("below"),
        }
    }
}

impl FromStr for Direction {
    type Err = MarketError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "above" => Ok(Direction::Above),
            "below" => Ok(Direction::Below),
            other => Err(MarketError::Validation(format!(
                "direction must be 'above' or 'below', got '{other}'"
            ))),
        }
    }
}

// Alert rule as stored by the service
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Rule {
    pub id: i64,
    pub ticker: Symbol,
    pub direction: Direction,
    pub price: f64,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
}

/// Validated input for `POST /rules`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewRule {
    pub ticker: Symbol,
    pub direction: Direction,
    pub price: f64,
}

impl NewRule {
    /// Checks user input before anything goes over the wire.
    pub fn parse(ticker: &str, direction: Direction, price: &str) -> MarketResult<Self> {
        let ticker = Symbol::parse(ticker).ok_or_else(|| {
            MarketError::Validation("enter a ticker symbol before saving".to_string())
        })?;
        let price = parse_price(price.trim())
            .ok_or_else(|| MarketError::Validation("enter a numeric price target".to_string()))?;
        Ok(NewRule { ticker, direction, price })
    }
}

// Triggered rule, append-only on the service side
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Event {
    #[serde(default)]
    pub id: Option<i64>,
    pub rule_id: i64,
    pub ticker: Symbol,
    pub direction: Direction,
    pub price: f64,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub triggered_at: Option<DateTime<Utc>>,
}
