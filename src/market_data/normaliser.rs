// Convert raw service payloads into typed batches.
// Bad entries are dropped quietly; the rest of the batch always survives.

use ahash::AHashSet;
use serde_json::Value;
use tracing::{debug, trace};

pub use crate::model::parse::{parse_price, parse_timestamp};
use crate::model::{IntradayBatch, PricePoint, PriceValue, SnapshotBatch, Symbol};

/// `GET /prices` payload -> snapshot. Numeric strings count as numbers,
/// anything else is kept verbatim as an opaque display value.
pub fn normalise_prices(raw: &Value) -> SnapshotBatch {
    let mut batch = SnapshotBatch::default();
    let Some(entries) = raw.as_object() else {
        debug!(kind = value_kind(raw), "price payload is not an object, ignoring");
        return batch;
    };

    for (key, value) in entries {
        let Some(symbol) = Symbol::parse(key) else {
            trace!("skipping price entry with empty symbol");
            continue;
        };
        let price = match price_from_value(value) {
            Some(price) => PriceValue::Numeric(price),
            None => PriceValue::Opaque(match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            }),
        };
        batch.prices.insert(symbol, price);
    }
    batch
}

/// `GET /intraday` payload -> per-symbol series, sorted by time. An entry
/// with a bad timestamp or a non-finite price is dropped whole.
pub fn normalise_intraday(raw: &Value) -> IntradayBatch {
    let mut batch = IntradayBatch::default();
    let Some(entries) = raw.as_object() else {
        debug!(kind = value_kind(raw), "intraday payload is not an object, ignoring");
        return batch;
    };

    for (key, value) in entries {
        let Some(symbol) = Symbol::parse(key) else {
            continue;
        };
        let Some(raw_points) = value.as_array() else {
            debug!(%symbol, kind = value_kind(value), "intraday series is not a list, skipping");
            continue;
        };

        let mut points: Vec<PricePoint> = raw_points.iter().filter_map(point_from_entry).collect();
        let dropped = raw_points.len() - points.len();
        if dropped > 0 {
            trace!(%symbol, dropped, kept = points.len(), "dropped malformed intraday entries");
        }
        points.sort_by_key(|p| p.timestamp());
        batch.series.insert(symbol, points);
    }
    batch
}

/// `GET /watchlist` payload -> ordered, de-duplicated symbols.
pub fn normalise_watchlist(raw: &Value) -> Vec<Symbol> {
    let Some(items) = raw.as_array() else {
        debug!(kind = value_kind(raw), "watchlist payload is not a list, ignoring");
        return Vec::new();
    };

    let mut seen = AHashSet::with_capacity(items.len());
    items
        .iter()
        .filter_map(|item| match item {
            Value::String(s) => Symbol::parse(s),
            Value::Number(n) => Symbol::parse(&n.to_string()),
            _ => None,
        })
        .filter(|symbol| seen.insert(symbol.clone()))
        .collect()
}

fn point_from_entry(entry: &Value) -> Option<PricePoint> {
    let fields = entry.as_object()?;
    let timestamp = parse_timestamp(fields.get("time")?)?;
    let price = price_from_value(fields.get("price")?)?;
    PricePoint::new(timestamp, price)
}

fn price_from_value(raw: &Value) -> Option<f64> {
    match raw {
        Value::Number(n) => n.as_f64().filter(|p| p.is_finite()),
        Value::String(s) => parse_price(s),
        _ => None,
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
