// Reply shapes of the market service that are not plain data feeds.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::error::{MarketError, MarketResult};

/// `POST /rules` success body. The service sends either `{ok, id}` or the
/// full rule; both carry the id.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RuleCreated {
    #[serde(default)]
    pub id: Option<i64>,
}

/// Mutation replies may be `{ok: false, error}` even on a 200. Anything
/// else counts as accepted.
pub fn check_ack(body: &Value, fallback: &str) -> MarketResult<()> {
    let Some(fields) = body.as_object() else {
        return Ok(());
    };
    let rejected = fields.get("ok").and_then(Value::as_bool) == Some(false);
    if !rejected {
        return Ok(());
    }
    let reason = fields
        .get("error")
        .and_then(Value::as_str)
        .filter(|msg| !msg.trim().is_empty())
        .unwrap_or(fallback);
    Err(MarketError::Rejected(reason.to_string()))
}

/// Lenient list decoding: a non-list body is an empty list, entries that do
/// not deserialize are skipped.
pub fn decode_list<T: DeserializeOwned>(body: Value) -> Vec<T> {
    let Value::Array(items) = body else {
        debug!("expected a list payload, treating as empty");
        return Vec::new();
    };
    let total = items.len();
    let decoded: Vec<T> = items
        .into_iter()
        .filter_map(|item| serde_json::from_value(item).ok())
        .collect();
    if decoded.len() < total {
        debug!(dropped = total - decoded.len(), "skipped malformed list entries");
    }
    decoded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Rule;
    use serde_json::json;

    #[test]
    fn test_check_ack() {
        assert!(check_ack(&json!({"ok": true, "id": 4}), "x").is_ok());
        assert!(check_ack(&json!(["AAPL"]), "x").is_ok());

        match check_ack(&json!({"ok": false, "error": "Unsupported ticker 'ZZZ'"}), "x") {
            Err(MarketError::Rejected(msg)) => assert_eq!(msg, "Unsupported ticker 'ZZZ'"),
            other => panic!("expected rejection, got {other:?}"),
        }
        match check_ack(&json!({"ok": false}), "Unable to create rule") {
            Err(MarketError::Rejected(msg)) => assert_eq!(msg, "Unable to create rule"),
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_list_skips_bad_entries() {
        let rules: Vec<Rule> = decode_list(json!([
            {"id": 1, "ticker": "aapl", "direction": "above", "price": 180.0},
            {"id": "two"},
            {"id": 3, "ticker": "TSLA", "direction": "below", "price": 200}
        ]));
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[1].id, 3);

        let none: Vec<Rule> = decode_list(json!({"detail": "Not Found"}));
        assert!(none.is_empty());
    }
}
