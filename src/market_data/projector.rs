//! Read-only shapes derived from a view's cache. Nothing here mutates the
//! cache; every projection is an owned copy the caller can hold on to while
//! polling carries on.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::market_data::history::{HistorySeries, HistoryStore, SeriesStatus};
use crate::model::{PricePoint, PriceValue, Symbol};

/// Named, fixed, ordered group of symbols on the dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub name: String,
    pub symbols: Vec<Symbol>,
}

impl Category {
    pub fn new(name: &str, symbols: &[&str]) -> Self {
        Self { name: name.to_string(), symbols: symbols.iter().map(|s| Symbol::new(s)).collect() }
    }
}

/// A series as handed to a chart.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesView {
    pub status: SeriesStatus,
    pub points: Vec<PricePoint>,
}

impl SeriesView {
    fn from_series(series: Option<&HistorySeries>, limit: Option<usize>) -> Self {
        let points = match (series, limit) {
            (Some(series), Some(n)) => series.tail(n),
            (Some(series), None) => series.to_vec(),
            (None, _) => Vec::new(),
        };
        // Status follows what is handed out, not what is stored.
        let status = if points.len() >= 2 { SeriesStatus::Ready } else { SeriesStatus::Collecting };
        Self { status, points }
    }

    pub fn is_ready(&self) -> bool {
        self.status == SeriesStatus::Ready
    }

    /// Ordered (time, price) pairs for rendering.
    pub fn chart_points(&self) -> Vec<(DateTime<Utc>, f64)> {
        self.points.iter().map(|p| (p.timestamp(), p.price())).collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuoteRow {
    pub symbol: Symbol,
    pub price: Option<PriceValue>,
    pub history: SeriesView,
}

impl QuoteRow {
    /// Display text for the price column.
    pub fn price_label(&self) -> String {
        match &self.price {
            Some(price) => price.to_string(),
            None => "Price unavailable".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CategoryProjection {
    pub category: String,
    /// Price known, in declared order
    pub ready: Vec<QuoteRow>,
    /// No price yet, in declared order
    pub pending: Vec<Symbol>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MembershipProjection {
    pub rows: Vec<QuoteRow>,
}

impl MembershipProjection {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row(&self, symbol: &Symbol) -> Option<&QuoteRow> {
        self.rows.iter().find(|row| &row.symbol == symbol)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExpansionProjection {
    pub symbol: Symbol,
    pub price: Option<PriceValue>,
    /// Full cached series, not trimmed for display
    pub history: SeriesView,
}

pub fn project_category(
    category: &Category,
    quotes: &BTreeMap<Symbol, PriceValue>,
    history: &HistoryStore,
) -> CategoryProjection {
    let mut ready = Vec::new();
    let mut pending = Vec::new();
    for symbol in &category.symbols {
        match quotes.get(symbol) {
            Some(price) => ready.push(QuoteRow {
                symbol: symbol.clone(),
                price: Some(price.clone()),
                history: SeriesView::from_series(history.get(symbol), None),
            }),
            None => pending.push(symbol.clone()),
        }
    }
    CategoryProjection { category: category.name.clone(), ready, pending }
}

/// One row per member, in membership order. `preview_points` bounds the
/// history each row carries.
pub fn project_membership(
    members: &[Symbol],
    quotes: &BTreeMap<Symbol, PriceValue>,
    history: &HistoryStore,
    preview_points: usize,
) -> MembershipProjection {
    let rows = members
        .iter()
        .map(|symbol| QuoteRow {
            symbol: symbol.clone(),
            price: quotes.get(symbol).cloned(),
            history: SeriesView::from_series(history.get(symbol), Some(preview_points)),
        })
        .collect();
    MembershipProjection { rows }
}

pub fn project_expansion(
    focus: &Symbol,
    quotes: &BTreeMap<Symbol, PriceValue>,
    history: &HistoryStore,
) -> ExpansionProjection {
    ExpansionProjection {
        symbol: focus.clone(),
        price: quotes.get(focus).cloned(),
        history: SeriesView::from_series(history.get(focus), None),
    }
}
