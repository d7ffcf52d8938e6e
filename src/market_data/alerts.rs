// Alert rules and the triggered-event log. Plain request/response glue on
// top of the market service: no local patching, the service is re-read
// after every change.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::error::{MarketError, MarketResult};
use crate::market_data::adapters::MarketService;
use crate::market_data::scheduler::{record_outcome, CycleOutcome, CycleTicket, EpochGate, PollTarget};
use crate::market_data::view::ViewStatus;
use crate::model::{Direction, Event, NewRule, Rule};

#[derive(Default)]
struct RuleState {
    rules: Vec<Rule>,
    status: ViewStatus,
}

pub struct RuleDesk<S> {
    service: Arc<S>,
    state: Mutex<RuleState>,
}

impl<S: MarketService> RuleDesk<S> {
    pub fn new(service: Arc<S>) -> Self {
        Self { service, state: Mutex::new(RuleState::default()) }
    }

    pub fn rules(&self) -> Vec<Rule> {
        self.state.lock().rules.clone()
    }

    pub fn status(&self) -> ViewStatus {
        self.state.lock().status.clone()
    }

    /// Re-reads the rule list. On failure the previous list stays.
    pub async fn load(&self) -> MarketResult<()> {
        match self.service.list_rules().await {
            Ok(rules) => {
                debug!(count = rules.len(), "rules loaded");
                let mut state = self.state.lock();
                state.rules = rules;
                state.status.succeeded(Utc::now());
                Ok(())
            }
            Err(err) => Err(self.note(err)),
        }
    }

    /// Validates before sending; returns the id the service assigned, if it
    /// told us.
    #[instrument(skip(self))]
    pub async fn create(&self, ticker: &str, direction: Direction, price: &str) -> MarketResult<Option<i64>> {
        let rule = NewRule::parse(ticker, direction, price)?;
        let created = self.service.create_rule(&rule).await.map_err(|err| self.note(err))?;
        info!(ticker = %rule.ticker, %direction, price = rule.price, id = ?created.id, "rule created");
        if let Err(err) = self.load().await {
            warn!(error = %err, "rule list refresh after create failed");
        }
        Ok(created.id)
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, id: i64) -> MarketResult<()> {
        let remaining = self.service.delete_rule(id).await.map_err(|err| self.note(err))?;
        info!(id, remaining = remaining.len(), "rule deleted");
        let mut state = self.state.lock();
        state.rules = remaining;
        state.status.succeeded(Utc::now());
        Ok(())
    }

    fn note(&self, err: MarketError) -> MarketError {
        warn!(error = %err, "rule request failed");
        self.state.lock().status.failed(&err);
        err
    }
}

#[derive(Default)]
struct EventState {
    gate: EpochGate,
    events: Vec<Event>,
    status: ViewStatus,
}

/// Triggered events, polled on their own cadence and kept in service order.
pub struct EventLog<S> {
    service: Arc<S>,
    state: Mutex<EventState>,
}

impl<S: MarketService> EventLog<S> {
    pub fn new(service: Arc<S>) -> Self {
        Self { service, state: Mutex::new(EventState::default()) }
    }

    pub fn events(&self) -> Vec<Event> {
        self.state.lock().events.clone()
    }

    pub fn status(&self) -> ViewStatus {
        self.state.lock().status.clone()
    }
}

#[async_trait]
impl<S: MarketService> PollTarget for EventLog<S> {
    fn name(&self) -> &'static str {
        "events"
    }

    fn activate(&self) {
        let mut state = self.state.lock();
        state.gate.activate();
        state.status.loading = true;
    }

    fn deactivate(&self) {
        self.state.lock().gate.deactivate();
    }

    fn begin_cycle(&self) -> CycleTicket {
        self.state.lock().gate.ticket()
    }

    #[instrument(level = "debug", skip_all, fields(view = "events", seq = ticket.seq()))]
    async fn run_cycle(&self, ticket: CycleTicket) -> CycleOutcome {
        let fetched = self.service.list_events().await;

        let outcome = {
            let mut state = self.state.lock();
            if !state.gate.admits(&ticket) {
                CycleOutcome::Discarded
            } else {
                match fetched {
                    Ok(events) => {
                        state.events = events;
                        state.status.succeeded(Utc::now());
                        CycleOutcome::Applied
                    }
                    Err(err) => {
                        warn!(error = %err, "event poll failed, keeping previous list");
                        state.status.failed(&err);
                        CycleOutcome::Failed
                    }
                }
            }
        };

        record_outcome(self.name(), outcome);
        outcome
    }
}
