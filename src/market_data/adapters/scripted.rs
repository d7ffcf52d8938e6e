// In-memory market service for tests. Price fetches can be held open on a
// oneshot and released in any order, which is how completion order is
// controlled without real timers.

use std::collections::VecDeque;

use ahash::{AHashMap, AHashSet};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::oneshot;

use super::{MarketService, RuleCreated};
use crate::error::{MarketError, MarketResult};
use crate::model::{Direction, Event, NewRule, Rule, Symbol};

#[derive(Default)]
struct Script {
    watchlist: Vec<Symbol>,
    prices: Value,
    intraday: Value,
    rules: Vec<Rule>,
    events: Vec<Event>,
    next_rule_id: i64,
    rejected: AHashSet<Symbol>,
    failing: AHashSet<&'static str>,
}

#[derive(Default)]
pub struct ScriptedService {
    script: Mutex<Script>,
    held_prices: Mutex<VecDeque<oneshot::Receiver<MarketResult<Value>>>>,
    calls: Mutex<AHashMap<&'static str, usize>>,
}

impl ScriptedService {
    pub fn new() -> Self {
        let service = Self::default();
        {
            let mut script = service.script.lock();
            script.prices = json!({});
            script.intraday = json!({});
            script.next_rule_id = 1;
        }
        service
    }

    pub fn set_prices(&self, prices: Value) {
        self.script.lock().prices = prices;
    }

    pub fn set_intraday(&self, intraday: Value) {
        self.script.lock().intraday = intraday;
    }

    pub fn set_watchlist(&self, symbols: &[&str]) {
        self.script.lock().watchlist = symbols.iter().map(|s| Symbol::new(s)).collect();
    }

    pub fn push_rule(&self, ticker: &str, direction: Direction, price: f64) -> i64 {
        let mut script = self.script.lock();
        let id = script.next_rule_id;
        script.next_rule_id += 1;
        script.rules.push(Rule { id, ticker: Symbol::new(ticker), direction, price, created_at: None });
        id
    }

    pub fn push_event(&self, event: Event) {
        self.script.lock().events.push(event);
    }

    /// Next `fetch_prices` call waits for whatever is sent on the returned
    /// sender. Holds are consumed in call order.
    pub fn hold_prices(&self) -> oneshot::Sender<MarketResult<Value>> {
        let (tx, rx) = oneshot::channel();
        self.held_prices.lock().push_back(rx);
        tx
    }

    /// Calls to `endpoint` fail with a network error until `recover`.
    pub fn fail(&self, endpoint: &'static str) {
        self.script.lock().failing.insert(endpoint);
    }

    pub fn recover(&self, endpoint: &'static str) {
        self.script.lock().failing.remove(endpoint);
    }

    /// Mutations naming `ticker` answer `ok: false`.
    pub fn reject(&self, ticker: &str) {
        self.script.lock().rejected.insert(Symbol::new(ticker));
    }

    pub fn calls(&self, endpoint: &'static str) -> usize {
        self.calls.lock().get(endpoint).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().values().sum()
    }

    fn enter(&self, endpoint: &'static str) -> MarketResult<()> {
        *self.calls.lock().entry(endpoint).or_insert(0) += 1;
        if self.script.lock().failing.contains(endpoint) {
            return Err(MarketError::network(format!("/{endpoint}"), "connection refused"));
        }
        Ok(())
    }

    fn check_rejected(&self, ticker: &Symbol) -> MarketResult<()> {
        if self.script.lock().rejected.contains(ticker) {
            return Err(MarketError::Rejected(format!("Unsupported ticker '{ticker}'")));
        }
        Ok(())
    }
}

#[async_trait]
impl MarketService for ScriptedService {
    async fn fetch_prices(&self) -> MarketResult<Value> {
        self.enter("prices")?;
        let held = self.held_prices.lock().pop_front();
        match held {
            Some(rx) => rx
                .await
                .unwrap_or_else(|_| Err(MarketError::network("/prices", "request dropped"))),
            None => Ok(self.script.lock().prices.clone()),
        }
    }

    async fn fetch_intraday(&self) -> MarketResult<Value> {
        self.enter("intraday")?;
        Ok(self.script.lock().intraday.clone())
    }

    async fn fetch_watchlist(&self) -> MarketResult<Value> {
        self.enter("watchlist")?;
        let members: Vec<String> = self.script.lock().watchlist.iter().map(|s| s.to_string()).collect();
        Ok(json!(members))
    }

    async fn add_to_watchlist(&self, symbol: &Symbol) -> MarketResult<()> {
        self.enter("watchlist")?;
        self.check_rejected(symbol)?;
        let mut script = self.script.lock();
        if !script.watchlist.contains(symbol) {
            script.watchlist.push(symbol.clone());
        }
        Ok(())
    }

    async fn remove_from_watchlist(&self, symbol: &Symbol) -> MarketResult<()> {
        self.enter("watchlist")?;
        self.script.lock().watchlist.retain(|s| s != symbol);
        Ok(())
    }

    async fn list_rules(&self) -> MarketResult<Vec<Rule>> {
        self.enter("rules")?;
        Ok(self.script.lock().rules.clone())
    }

    async fn create_rule(&self, rule: &NewRule) -> MarketResult<RuleCreated> {
        self.enter("rules")?;
        self.check_rejected(&rule.ticker)?;
        let id = self.push_rule(rule.ticker.as_str(), rule.direction, rule.price);
        Ok(RuleCreated { id: Some(id) })
    }

    async fn delete_rule(&self, id: i64) -> MarketResult<Vec<Rule>> {
        self.enter("rules")?;
        let mut script = self.script.lock();
        script.rules.retain(|rule| rule.id != id);
        Ok(script.rules.clone())
    }

    async fn list_events(&self) -> MarketResult<Vec<Event>> {
        self.enter("events")?;
        Ok(self.script.lock().events.clone())
    }
}
