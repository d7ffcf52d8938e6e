//! View contexts. Each view owns its own cache (quotes, rolling history and
//! status) behind one lock, together with the epoch gate that decides whether
//! a finished cycle may still touch it. Fetching and normalising happen
//! outside the lock; applying a result happens entirely inside it, so a
//! reader sees either the whole update or none of it.

use std::collections::BTreeMap;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use ahash::AHashSet;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::error::{MarketError, MarketResult};
use crate::market_data::adapters::MarketService;
use crate::market_data::history::{latest_points, HistoryStore, MergeMode};
use crate::market_data::normaliser::{normalise_intraday, normalise_prices, normalise_watchlist};
use crate::market_data::projector::{
    project_category, project_expansion, project_membership, Category, CategoryProjection,
    ExpansionProjection, MembershipProjection,
};
use crate::market_data::scheduler::{record_outcome, CycleOutcome, CycleTicket, EpochGate, PollTarget, Scheduler};
use crate::model::{IntradayBatch, PriceValue, SnapshotBatch, Symbol};

/// What a view shows besides its data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewStatus {
    /// Only before the first cycle of an activation has finished
    pub loading: bool,
    /// Message of the last failure; cleared by the next success
    pub error: Option<String>,
    pub last_updated: Option<DateTime<Utc>>,
}

impl Default for ViewStatus {
    fn default() -> Self {
        Self { loading: true, error: None, last_updated: None }
    }
}

impl ViewStatus {
    pub(crate) fn succeeded(&mut self, at: DateTime<Utc>) {
        self.loading = false;
        self.error = None;
        self.last_updated = Some(at);
    }

    pub(crate) fn failed(&mut self, err: &MarketError) {
        self.loading = false;
        self.error = Some(err.to_string());
    }
}

// Normalised result of one fetch, ready to apply.
struct Fetched {
    members: Option<Vec<Symbol>>,
    prices: SnapshotBatch,
    intraday: Option<IntradayBatch>,
}

struct CacheState {
    gate: EpochGate,
    quotes: BTreeMap<Symbol, PriceValue>,
    history: HistoryStore,
    status: ViewStatus,
}

impl CacheState {
    fn new(capacity: usize, mode: MergeMode) -> Self {
        Self {
            gate: EpochGate::default(),
            quotes: BTreeMap::new(),
            history: HistoryStore::new(capacity, mode),
            status: ViewStatus::default(),
        }
    }

    fn activate(&mut self) {
        self.gate.activate();
        self.status.loading = true;
    }

    /// Fold one fetch into the cache. Anything outside `tracked` is dropped,
    /// including whatever was cached for symbols that are no longer tracked.
    fn absorb(&mut self, tracked: &AHashSet<Symbol>, prices: SnapshotBatch, intraday: Option<IntradayBatch>) {
        // Stamped under the lock so append-mode points follow completion order.
        let now = Utc::now();
        let (mut incoming, windowed) = match intraday {
            Some(window) => (window, true),
            None => (latest_points(&prices, now), false),
        };
        incoming.series.retain(|symbol, _| tracked.contains(symbol));

        for (symbol, price) in prices.prices {
            if tracked.contains(&symbol) {
                self.quotes.insert(symbol, price);
            }
        }
        self.quotes.retain(|symbol, _| tracked.contains(symbol));

        self.history.merge(&incoming);
        // A fetched window is complete: a symbol it leaves out has no history.
        self.history.retain(|symbol| {
            tracked.contains(symbol) && (!windowed || incoming.series.contains_key(symbol))
        });
        self.status.succeeded(now);
    }

    /// Stale and failed results are settled here; an admitted success comes
    /// back for the caller to apply while it still holds the lock.
    fn admit(&mut self, view: &'static str, ticket: &CycleTicket, fetched: MarketResult<Fetched>) -> Result<Fetched, CycleOutcome> {
        if !self.gate.admits(ticket) {
            debug!(view, seq = ticket.seq(), "discarding stale cycle result");
            return Err(CycleOutcome::Discarded);
        }
        fetched.map_err(|err| {
            warn!(view, seq = ticket.seq(), error = %err, "poll cycle failed, keeping cached data");
            self.status.failed(&err);
            CycleOutcome::Failed
        })
    }

    fn note_error(&mut self, err: &MarketError) {
        if self.gate.is_active() {
            self.status.failed(err);
        }
    }
}

async fn fetch_intraday_if<S: MarketService>(service: &S, mode: MergeMode) -> MarketResult<Option<IntradayBatch>> {
    match mode {
        MergeMode::Append => Ok(None),
        MergeMode::Replace => Ok(Some(normalise_intraday(&service.fetch_intraday().await?))),
    }
}

struct DashboardState {
    cache: CacheState,
    active: usize,
}

/// Fixed categories of symbols, one of them shown at a time.
pub struct DashboardView<S> {
    service: Arc<S>,
    categories: Vec<Category>,
    tracked: AHashSet<Symbol>,
    mode: MergeMode,
    state: Mutex<DashboardState>,
}

impl<S: MarketService> DashboardView<S> {
    /// Quotes are kept for every category, so switching is instant.
    pub fn new(service: Arc<S>, categories: Vec<Category>, capacity: usize, mode: MergeMode) -> Self {
        let tracked = categories.iter().flat_map(|c| c.symbols.iter().cloned()).collect();
        Self {
            service,
            categories,
            tracked,
            mode,
            state: Mutex::new(DashboardState { cache: CacheState::new(capacity, mode), active: 0 }),
        }
    }

    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    pub fn active_category(&self) -> Option<&Category> {
        self.categories.get(self.state.lock().active)
    }

    pub fn select_category(&self, name: &str) -> MarketResult<()> {
        let index = self
            .categories
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name.trim()))
            .ok_or_else(|| MarketError::Validation(format!("unknown category '{}'", name.trim())))?;
        self.state.lock().active = index;
        Ok(())
    }

    pub fn projection(&self) -> Option<CategoryProjection> {
        let state = self.state.lock();
        let category = self.categories.get(state.active)?;
        Some(project_category(category, &state.cache.quotes, &state.cache.history))
    }

    pub fn status(&self) -> ViewStatus {
        self.state.lock().cache.status.clone()
    }

    /// One cycle outside the schedule, without the loading indicator.
    pub async fn refresh(&self) -> CycleOutcome {
        let ticket = self.begin_cycle();
        self.run_cycle(ticket).await
    }

    async fn fetch(&self) -> MarketResult<Fetched> {
        let (raw_prices, intraday) =
            tokio::try_join!(self.service.fetch_prices(), fetch_intraday_if(self.service.as_ref(), self.mode))?;
        Ok(Fetched { members: None, prices: normalise_prices(&raw_prices), intraday })
    }
}

#[async_trait]
impl<S: MarketService> PollTarget for DashboardView<S> {
    fn name(&self) -> &'static str {
        "dashboard"
    }

    fn activate(&self) {
        self.state.lock().cache.activate();
    }

    fn deactivate(&self) {
        self.state.lock().cache.gate.deactivate();
    }

    fn begin_cycle(&self) -> CycleTicket {
        self.state.lock().cache.gate.ticket()
    }

    #[instrument(level = "debug", skip_all, fields(view = "dashboard", seq = ticket.seq()))]
    async fn run_cycle(&self, ticket: CycleTicket) -> CycleOutcome {
        let fetched = self.fetch().await;

        let outcome = {
            let mut state = self.state.lock();
            match state.cache.admit(self.name(), &ticket, fetched) {
                Ok(fetched) => {
                    state.cache.absorb(&self.tracked, fetched.prices, fetched.intraday);
                    CycleOutcome::Applied
                }
                Err(outcome) => outcome,
            }
        };

        record_outcome(self.name(), outcome);
        outcome
    }
}

struct WatchlistState {
    cache: CacheState,
    members: Vec<Symbol>,
    focus: Option<Symbol>,
}

/// User-managed membership plus an optional single-symbol expansion.
pub struct WatchlistView<S> {
    service: Arc<S>,
    mode: MergeMode,
    preview_points: usize,
    state: Mutex<WatchlistState>,
}

impl<S: MarketService> WatchlistView<S> {
    pub fn new(service: Arc<S>, capacity: usize, preview_points: usize, mode: MergeMode) -> Self {
        Self {
            service,
            mode,
            preview_points,
            state: Mutex::new(WatchlistState {
                cache: CacheState::new(capacity, mode),
                members: Vec::new(),
                focus: None,
            }),
        }
    }

    pub fn members(&self) -> Vec<Symbol> {
        self.state.lock().members.clone()
    }

    pub fn focus(&self) -> Option<Symbol> {
        self.state.lock().focus.clone()
    }

    pub fn status(&self) -> ViewStatus {
        self.state.lock().cache.status.clone()
    }

    pub fn membership_projection(&self) -> MembershipProjection {
        let state = self.state.lock();
        project_membership(&state.members, &state.cache.quotes, &state.cache.history, self.preview_points)
    }

    /// `None` when nothing is focused.
    pub fn expansion_projection(&self) -> Option<ExpansionProjection> {
        let state = self.state.lock();
        let focus = state.focus.as_ref()?;
        Some(project_expansion(focus, &state.cache.quotes, &state.cache.history))
    }

    /// Focus one member. The focus is released on `close_expansion` or when
    /// the symbol leaves the membership.
    pub fn expand(&self, ticker: &str) -> MarketResult<()> {
        let symbol = parse_ticker(ticker)?;
        let mut state = self.state.lock();
        if !state.members.contains(&symbol) {
            return Err(MarketError::Validation(format!("{symbol} is not on the watchlist")));
        }
        debug!(%symbol, "expanding");
        state.focus = Some(symbol);
        Ok(())
    }

    pub fn close_expansion(&self) {
        self.state.lock().focus = None;
    }

    /// One cycle outside the schedule, without the loading indicator.
    pub async fn refresh(&self) -> CycleOutcome {
        let ticket = self.begin_cycle();
        self.run_cycle(ticket).await
    }

    #[instrument(skip(self))]
    pub async fn add_symbol(&self, ticker: &str) -> MarketResult<()> {
        let symbol = parse_ticker(ticker)?;
        if let Err(err) = self.service.add_to_watchlist(&symbol).await {
            self.state.lock().cache.note_error(&err);
            return Err(err);
        }
        // Older cycles predate the insert.
        self.state.lock().cache.gate.invalidate();
        info!(%symbol, "added to watchlist");
        self.refresh().await;
        Ok(())
    }

    /// On success the symbol's cached history is dropped right away, so a
    /// later re-add starts from an empty series.
    #[instrument(skip(self))]
    pub async fn remove_symbol(&self, ticker: &str) -> MarketResult<()> {
        let symbol = parse_ticker(ticker)?;
        if let Err(err) = self.service.remove_from_watchlist(&symbol).await {
            self.state.lock().cache.note_error(&err);
            return Err(err);
        }
        {
            let mut state = self.state.lock();
            if state.cache.gate.is_active() {
                // Cycles fetched before the delete still list the symbol.
                state.cache.gate.invalidate();
                state.members.retain(|member| member != &symbol);
                state.cache.quotes.remove(&symbol);
                state.cache.history.forget(&symbol);
                if state.focus.as_ref() == Some(&symbol) {
                    state.focus = None;
                }
            }
        }
        info!(%symbol, "removed from watchlist");
        self.refresh().await;
        Ok(())
    }

    // All three requests must succeed or nothing is applied.
    async fn fetch(&self) -> MarketResult<Fetched> {
        let (raw_members, raw_prices, intraday) = tokio::try_join!(
            self.service.fetch_watchlist(),
            self.service.fetch_prices(),
            fetch_intraday_if(self.service.as_ref(), self.mode),
        )?;
        Ok(Fetched {
            members: Some(normalise_watchlist(&raw_members)),
            prices: normalise_prices(&raw_prices),
            intraday,
        })
    }
}

fn parse_ticker(raw: &str) -> MarketResult<Symbol> {
    Symbol::parse(raw).ok_or_else(|| MarketError::Validation("enter a ticker symbol".to_string()))
}

#[async_trait]
impl<S: MarketService> PollTarget for WatchlistView<S> {
    fn name(&self) -> &'static str {
        "watchlist"
    }

    fn activate(&self) {
        self.state.lock().cache.activate();
    }

    fn deactivate(&self) {
        self.state.lock().cache.gate.deactivate();
    }

    fn begin_cycle(&self) -> CycleTicket {
        self.state.lock().cache.gate.ticket()
    }

    #[instrument(level = "debug", skip_all, fields(view = "watchlist", seq = ticket.seq()))]
    async fn run_cycle(&self, ticket: CycleTicket) -> CycleOutcome {
        let fetched = self.fetch().await;

        let outcome = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            match state.cache.admit(self.name(), &ticket, fetched) {
                Ok(fetched) => {
                    let members = fetched.members.unwrap_or_default();
                    let tracked: AHashSet<Symbol> = members.iter().cloned().collect();
                    state.cache.absorb(&tracked, fetched.prices, fetched.intraday);
                    if state.focus.as_ref().is_some_and(|focus| !tracked.contains(focus)) {
                        let focus = state.focus.take();
                        debug!(?focus, "focused symbol left the watchlist, closing expansion");
                    }
                    state.members = members;
                    CycleOutcome::Applied
                }
                Err(outcome) => outcome,
            }
        };

        record_outcome(self.name(), outcome);
        outcome
    }
}

/// A view with its scheduler running. Dropping it (or `stop`) deactivates
/// the view.
pub struct ActiveView<V: PollTarget> {
    view: Arc<V>,
    scheduler: Scheduler,
}

impl<V: PollTarget> ActiveView<V> {
    pub fn start(view: Arc<V>, period: Duration) -> Self {
        let scheduler = Scheduler::start(view.clone(), period);
        Self { view, scheduler }
    }

    pub fn view(&self) -> &Arc<V> {
        &self.view
    }

    /// Stops polling and hands the (now inactive) view back.
    pub fn stop(mut self) -> Arc<V> {
        self.scheduler.stop();
        self.view
    }
}

impl<V: PollTarget> Deref for ActiveView<V> {
    type Target = V;

    fn deref(&self) -> &V {
        &self.view
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::adapters::scripted::ScriptedService;
    use crate::market_data::history::SeriesStatus;
    use serde_json::json;

    fn stocks() -> Vec<Category> {
        vec![Category::new("Stocks", &["AAPL", "MSFT", "TSLA"]), Category::new("Crypto", &["BTC", "ETH"])]
    }

    fn dashboard(service: &Arc<ScriptedService>) -> Arc<DashboardView<ScriptedService>> {
        let view = Arc::new(DashboardView::new(service.clone(), stocks(), 60, MergeMode::Append));
        view.activate();
        view
    }

    fn watchlist(service: &Arc<ScriptedService>, mode: MergeMode) -> Arc<WatchlistView<ScriptedService>> {
        let view = Arc::new(WatchlistView::new(service.clone(), 180, 60, mode));
        view.activate();
        view
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    fn price_of(projection: &CategoryProjection, symbol: &str) -> Option<f64> {
        projection
            .ready
            .iter()
            .find(|row| row.symbol.as_str() == symbol)
            .and_then(|row| row.price.as_ref())
            .and_then(PriceValue::as_numeric)
    }

    #[tokio::test]
    async fn test_later_completion_wins() {
        let service = Arc::new(ScriptedService::new());
        let view = dashboard(&service);
        let release_a = service.hold_prices();
        let release_b = service.hold_prices();

        let ticket_a = view.begin_cycle();
        let cycle_a = tokio::spawn({
            let view = view.clone();
            async move { view.run_cycle(ticket_a).await }
        });
        settle().await;
        let ticket_b = view.begin_cycle();
        let cycle_b = tokio::spawn({
            let view = view.clone();
            async move { view.run_cycle(ticket_b).await }
        });
        settle().await;

        release_b.send(Ok(json!({"AAPL": 101.0}))).unwrap();
        assert_eq!(cycle_b.await.unwrap(), CycleOutcome::Applied);
        assert_eq!(price_of(&view.projection().unwrap(), "AAPL"), Some(101.0));

        release_a.send(Ok(json!({"AAPL": 100.0}))).unwrap();
        assert_eq!(cycle_a.await.unwrap(), CycleOutcome::Applied);

        let projection = view.projection().unwrap();
        assert_eq!(price_of(&projection, "AAPL"), Some(100.0));
        let history: Vec<f64> = projection.ready[0].history.points.iter().map(|p| p.price()).collect();
        assert_eq!(history, vec![101.0, 100.0]);
    }

    #[tokio::test]
    async fn test_result_after_deactivate_is_discarded() {
        let service = Arc::new(ScriptedService::new());
        let view = dashboard(&service);
        service.set_prices(json!({"AAPL": 189.5}));
        assert_eq!(view.refresh().await, CycleOutcome::Applied);
        let before = view.projection().unwrap();

        let release = service.hold_prices();
        let ticket = view.begin_cycle();
        let cycle = tokio::spawn({
            let view = view.clone();
            async move { view.run_cycle(ticket).await }
        });
        settle().await;
        view.deactivate();

        release.send(Ok(json!({"MSFT": 50.0}))).unwrap();
        assert_eq!(cycle.await.unwrap(), CycleOutcome::Discarded);
        assert_eq!(view.projection().unwrap(), before);
        assert!(price_of(&view.projection().unwrap(), "MSFT").is_none());
    }

    #[tokio::test]
    async fn test_reactivation_does_not_revive_old_cycles() {
        let service = Arc::new(ScriptedService::new());
        let view = dashboard(&service);
        let release = service.hold_prices();
        let ticket = view.begin_cycle();
        let cycle = tokio::spawn({
            let view = view.clone();
            async move { view.run_cycle(ticket).await }
        });
        settle().await;

        view.deactivate();
        view.activate();
        release.send(Ok(json!({"TSLA": 240.0}))).unwrap();
        assert_eq!(cycle.await.unwrap(), CycleOutcome::Discarded);
        assert!(view.status().loading);
    }

    #[tokio::test]
    async fn test_dashboard_splits_active_category() {
        let service = Arc::new(ScriptedService::new());
        let view = dashboard(&service);
        service.set_prices(json!({"tsla": "240.10", "aapl": 189.5, "btc": "n/a", "DOGE": 0.1}));
        view.refresh().await;

        let projection = view.projection().unwrap();
        assert_eq!(projection.category, "Stocks");
        assert_eq!(projection.ready.iter().map(|r| r.symbol.as_str()).collect::<Vec<_>>(), vec!["AAPL", "TSLA"]);
        assert_eq!(projection.pending, vec![Symbol::new("MSFT")]);

        assert_eq!(view.categories().len(), 2);
        view.select_category("crypto").unwrap();
        assert_eq!(view.active_category().map(|c| c.name.as_str()), Some("Crypto"));
        let crypto = view.projection().unwrap();
        assert_eq!(crypto.ready[0].price_label(), "n/a");
        assert_eq!(crypto.ready[0].history.status, SeriesStatus::Collecting);
        assert!(crypto.ready[0].history.points.is_empty());
        assert!(matches!(view.select_category("Bonds"), Err(MarketError::Validation(_))));
    }

    #[tokio::test]
    async fn test_failure_keeps_data_and_flags_error() {
        let service = Arc::new(ScriptedService::new());
        let view = dashboard(&service);
        service.set_prices(json!({"AAPL": 100.0}));
        view.refresh().await;
        assert!(!view.status().loading);

        service.fail("prices");
        assert_eq!(view.refresh().await, CycleOutcome::Failed);
        let status = view.status();
        assert!(status.error.unwrap().contains("connection refused"));
        assert_eq!(price_of(&view.projection().unwrap(), "AAPL"), Some(100.0));

        service.recover("prices");
        assert_eq!(view.refresh().await, CycleOutcome::Applied);
        assert_eq!(view.status().error, None);
    }

    #[tokio::test]
    async fn test_remove_then_readd_resets_history() {
        let service = Arc::new(ScriptedService::new());
        let view = watchlist(&service, MergeMode::Append);
        service.set_prices(json!({"NVDA": 880.0}));

        view.add_symbol("nvda").await.unwrap();
        view.refresh().await;
        view.refresh().await;
        let nvda = Symbol::new("NVDA");
        assert_eq!(view.membership_projection().row(&nvda).unwrap().history.points.len(), 3);

        view.remove_symbol("NVDA").await.unwrap();
        assert!(view.membership_projection().is_empty());

        view.add_symbol("NVDA").await.unwrap();
        assert_eq!(view.membership_projection().row(&nvda).unwrap().history.points.len(), 1);
    }

    #[tokio::test]
    async fn test_focus_released_when_symbol_leaves() {
        let service = Arc::new(ScriptedService::new());
        let view = watchlist(&service, MergeMode::Append);
        service.set_watchlist(&["AAPL", "ETH"]);
        service.set_prices(json!({"AAPL": 190.0, "ETH": 3000.0}));
        view.refresh().await;

        view.expand("eth").unwrap();
        assert_eq!(view.expansion_projection().unwrap().symbol, Symbol::new("ETH"));
        assert!(view.expand("TSLA").is_err());

        // Removed elsewhere; the next poll notices.
        service.set_watchlist(&["AAPL"]);
        view.refresh().await;
        assert_eq!(view.focus(), None);
        assert!(view.expansion_projection().is_none());
        assert_eq!(view.members(), vec![Symbol::new("AAPL")]);
    }

    #[tokio::test]
    async fn test_expansion_shows_full_window() {
        let service = Arc::new(ScriptedService::new());
        let view = Arc::new(WatchlistView::new(service.clone(), 180, 2, MergeMode::Replace));
        view.activate();
        service.set_watchlist(&["BTC"]);
        service.set_prices(json!({"BTC": 64000.0}));
        service.set_intraday(json!({"BTC": [
            {"time": "2024-05-01T09:30:00", "price": 63900.0},
            {"time": "2024-05-01T09:31:00", "price": "63950.5"},
            {"time": "not a time", "price": 1.0},
            {"time": "2024-05-01T09:32:00", "price": 64000.0}
        ]}));
        view.refresh().await;

        let btc = Symbol::new("BTC");
        assert_eq!(view.membership_projection().row(&btc).unwrap().history.points.len(), 2);
        view.expand("BTC").unwrap();
        let expansion = view.expansion_projection().unwrap();
        assert_eq!(expansion.history.points.len(), 3);
        assert!(expansion.history.is_ready());

        view.close_expansion();
        assert!(view.expansion_projection().is_none());
    }

    #[tokio::test]
    async fn test_replace_drops_series_missing_from_window() {
        let service = Arc::new(ScriptedService::new());
        let view = watchlist(&service, MergeMode::Replace);
        service.set_watchlist(&["BTC"]);
        service.set_prices(json!({"BTC": 64000.0}));
        service.set_intraday(json!({"BTC": [
            {"time": "2024-05-01T09:30:00", "price": 63900.0},
            {"time": "2024-05-01T09:31:00", "price": 63950.5},
            {"time": "2024-05-01T09:32:00", "price": 64000.0}
        ]}));
        view.refresh().await;
        let btc = Symbol::new("BTC");
        assert_eq!(view.membership_projection().row(&btc).unwrap().history.points.len(), 3);

        service.set_intraday(json!({}));
        assert_eq!(view.refresh().await, CycleOutcome::Applied);
        let projection = view.membership_projection();
        let row = projection.row(&btc).unwrap();
        assert!(row.history.points.is_empty());
        assert_eq!(row.history.status, SeriesStatus::Collecting);
        assert_eq!(row.price.as_ref().and_then(PriceValue::as_numeric), Some(64000.0));
    }

    #[tokio::test]
    async fn test_cycle_started_before_remove_is_discarded() {
        let service = Arc::new(ScriptedService::new());
        let view = watchlist(&service, MergeMode::Append);
        service.set_prices(json!({"NVDA": 880.0}));
        view.add_symbol("NVDA").await.unwrap();

        let release = service.hold_prices();
        let ticket = view.begin_cycle();
        let cycle = tokio::spawn({
            let view = view.clone();
            async move { view.run_cycle(ticket).await }
        });
        settle().await;

        view.remove_symbol("NVDA").await.unwrap();
        assert!(view.membership_projection().is_empty());

        release.send(Ok(json!({"NVDA": 881.0}))).unwrap();
        assert_eq!(cycle.await.unwrap(), CycleOutcome::Discarded);
        assert!(view.membership_projection().is_empty());
        assert!(view.members().is_empty());
    }

    #[tokio::test]
    async fn test_watchlist_cycle_is_all_or_nothing() {
        let service = Arc::new(ScriptedService::new());
        let view = watchlist(&service, MergeMode::Replace);
        service.set_watchlist(&["AAPL"]);
        service.set_prices(json!({"AAPL": 190.0}));
        view.refresh().await;

        service.set_watchlist(&["AAPL", "MSFT"]);
        service.fail("intraday");
        assert_eq!(view.refresh().await, CycleOutcome::Failed);
        assert_eq!(view.members(), vec![Symbol::new("AAPL")]);
        assert!(view.status().error.is_some());
    }

    #[tokio::test]
    async fn test_failed_mutations_leave_state_alone() {
        let service = Arc::new(ScriptedService::new());
        let view = watchlist(&service, MergeMode::Append);
        service.set_watchlist(&["AAPL"]);
        service.set_prices(json!({"AAPL": 190.0, "ZZZ": 1.0}));
        view.refresh().await;
        let before = view.membership_projection();
        let calls = service.total_calls();

        assert!(matches!(view.add_symbol("   ").await, Err(MarketError::Validation(_))));
        assert_eq!(service.total_calls(), calls);
        assert_eq!(view.status().error, None);

        service.reject("ZZZ");
        match view.add_symbol("zzz").await {
            Err(MarketError::Rejected(msg)) => assert_eq!(msg, "Unsupported ticker 'ZZZ'"),
            other => panic!("expected rejection, got {other:?}"),
        }
        assert_eq!(view.membership_projection(), before);
        assert_eq!(view.status().error.as_deref(), Some("Unsupported ticker 'ZZZ'"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_drives_first_cycle() {
        let service = Arc::new(ScriptedService::new());
        service.set_prices(json!({"MSFT": 415.2}));
        let view = Arc::new(DashboardView::new(service.clone(), stocks(), 60, MergeMode::Append));
        assert!(view.status().loading);

        let active = ActiveView::start(view, Duration::from_secs(5));
        settle().await;
        assert!(!active.status().loading);
        assert_eq!(price_of(&active.projection().unwrap(), "MSFT"), Some(415.2));

        let view = active.stop();
        service.set_prices(json!({"MSFT": 1.0}));
        tokio::time::advance(Duration::from_secs(10)).await;
        settle().await;
        assert_eq!(price_of(&view.projection().unwrap(), "MSFT"), Some(415.2));
        assert_eq!(service.calls("prices"), 1);
    }
}
