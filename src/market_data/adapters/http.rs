// HTTP/JSON client for the market service

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Url};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use super::wire::{check_ack, decode_list, RuleCreated};
use super::MarketService;
use crate::error::{MarketError, MarketResult};
use crate::model::{Event, NewRule, Rule, Symbol};

#[derive(Debug, Clone)]
pub struct HttpMarketService {
    client: Client,
    base_url: Url, // e.g. "http://127.0.0.1:8000"
}

impl HttpMarketService {
    pub fn new(base_url: &str, timeout: Duration) -> MarketResult<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| MarketError::network(base_url, format!("invalid base url: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(MarketError::network(base_url.as_str(), "base url cannot carry a path"));
        }
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    // Segments are percent-encoded, so tickers like "BTC/USD" stay one segment.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn send(&self, request: RequestBuilder, endpoint: &str) -> MarketResult<Value> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            warn!(endpoint, %status, "market service returned non-success status");
            return Err(MarketError::network(endpoint, format!("status {status}")));
        }
        response
            .json::<Value>()
            .await
            .map_err(|e| MarketError::network(endpoint, format!("unreadable body: {e}")))
    }

    async fn get(&self, segments: &[&str]) -> MarketResult<Value> {
        let url = self.endpoint(segments);
        let endpoint = url.path().to_string();
        self.send(self.client.get(url), &endpoint).await
    }
}

#[async_trait]
impl MarketService for HttpMarketService {
    #[instrument(level = "debug", skip(self))]
    async fn fetch_prices(&self) -> MarketResult<Value> {
        self.get(&["prices"]).await
    }

    #[instrument(level = "debug", skip(self))]
    async fn fetch_intraday(&self) -> MarketResult<Value> {
        self.get(&["intraday"]).await
    }

    #[instrument(level = "debug", skip(self))]
    async fn fetch_watchlist(&self) -> MarketResult<Value> {
        self.get(&["watchlist"]).await
    }

    #[instrument(skip_all, fields(%symbol))]
    async fn add_to_watchlist(&self, symbol: &Symbol) -> MarketResult<()> {
        let url = self.endpoint(&["watchlist"]);
        let endpoint = url.path().to_string();
        let body = serde_json::json!({ "ticker": symbol });
        let reply = self.send(self.client.post(url).json(&body), &endpoint).await?;
        check_ack(&reply, &format!("Failed to add {symbol}"))?;
        debug!(%symbol, "added to watchlist");
        Ok(())
    }

    #[instrument(skip_all, fields(%symbol))]
    async fn remove_from_watchlist(&self, symbol: &Symbol) -> MarketResult<()> {
        let url = self.endpoint(&["watchlist", symbol.as_str()]);
        let endpoint = url.path().to_string();
        let reply = self.send(self.client.delete(url), &endpoint).await?;
        check_ack(&reply, &format!("Failed to remove {symbol}"))?;
        debug!(%symbol, "removed from watchlist");
        Ok(())
    }

    #[instrument(level = "debug", skip(self))]
    async fn list_rules(&self) -> MarketResult<Vec<Rule>> {
        Ok(decode_list(self.get(&["rules"]).await?))
    }

    #[instrument(skip_all, fields(ticker = %rule.ticker, direction = %rule.direction))]
    async fn create_rule(&self, rule: &NewRule) -> MarketResult<RuleCreated> {
        let url = self.endpoint(&["rules"]);
        let endpoint = url.path().to_string();
        let reply = self.send(self.client.post(url).json(rule), &endpoint).await?;
        check_ack(&reply, &format!("Unable to create rule for {}", rule.ticker))?;
        Ok(serde_json::from_value(reply).unwrap_or(RuleCreated { id: None }))
    }

    #[instrument(skip(self))]
    async fn delete_rule(&self, id: i64) -> MarketResult<Vec<Rule>> {
        let id_segment = id.to_string();
        let url = self.endpoint(&["rules", &id_segment]);
        let endpoint = url.path().to_string();
        let reply = self.send(self.client.delete(url), &endpoint).await?;
        check_ack(&reply, &format!("Failed to delete rule #{id}"))?;
        Ok(decode_list(reply))
    }

    #[instrument(level = "debug", skip(self))]
    async fn list_events(&self) -> MarketResult<Vec<Event>> {
        Ok(decode_list(self.get(&["events"]).await?))
    }
}
