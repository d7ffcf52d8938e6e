// The market service as seen from this crate: the read/write calls the views
// and the rule desk make, nothing more.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::MarketResult;
use crate::model::{Event, NewRule, Rule, Symbol};

pub use wire::RuleCreated;

#[async_trait]
pub trait MarketService: Send + Sync + 'static {
    /// `GET /prices`, raw. The normaliser makes sense of it.
    async fn fetch_prices(&self) -> MarketResult<Value>;
    /// `GET /intraday`, raw.
    async fn fetch_intraday(&self) -> MarketResult<Value>;
    /// `GET /watchlist`, raw.
    async fn fetch_watchlist(&self) -> MarketResult<Value>;

    async fn add_to_watchlist(&self, symbol: &Symbol) -> MarketResult<()>;
    async fn remove_from_watchlist(&self, symbol: &Symbol) -> MarketResult<()>;

    async fn list_rules(&self) -> MarketResult<Vec<Rule>>;
    async fn create_rule(&self, rule: &NewRule) -> MarketResult<RuleCreated>;
    /// Returns the rules that remain after the delete.
    async fn delete_rule(&self, id: i64) -> MarketResult<Vec<Rule>>;

    /// Service-defined order, not re-sorted here.
    async fn list_events(&self) -> MarketResult<Vec<Event>>;
}

pub mod http;
pub mod wire;

#[cfg(test)]
pub mod scripted;
