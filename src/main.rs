use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use tickwatch::config::Settings;
use tickwatch::market_data::alerts::{EventLog, RuleDesk};
use tickwatch::market_data::projector::QuoteRow;
use tickwatch::model::Direction;
use tickwatch::{telemetry, ActiveView, DashboardView, HttpMarketService, PollTarget, ViewStatus, WatchlistView};

#[derive(Parser)]
#[command(name = "tickwatch", version, about = "Live, bounded price views over a polled market service")]
struct Cli {
    /// TOML settings file (defaults to config/tickwatch.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Prometheus exporter port, used with the metrics-exporter feature
    #[arg(long, global = true, default_value_t = 9000)]
    metrics_port: u16,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Poll the category dashboard
    Dashboard {
        #[arg(long)]
        category: Option<String>,
    },
    /// Poll the watchlist
    Watchlist,
    Add { ticker: String },
    Remove { ticker: String },
    /// Poll the watchlist with one symbol expanded
    Expand { ticker: String },
    Rules,
    RuleAdd { ticker: String, direction: Direction, price: String },
    RuleDelete { id: i64 },
    /// Poll the triggered-event log
    Events,
}

fn log_row(row: &QuoteRow) {
    info!(
        symbol = %row.symbol,
        price = %row.price_label(),
        points = row.history.points.len(),
        status = ?row.history.status,
        "quote"
    );
}

fn log_status(view: &str, status: &ViewStatus) {
    if let Some(error) = &status.error {
        warn!(view, %error, "showing cached data");
    }
    if status.loading {
        info!(view, "loading");
    }
}

// Calls `report` every `period` until Ctrl-C.
async fn report_until_ctrl_c<F: FnMut()>(period: Duration, mut report: F) -> anyhow::Result<()> {
    let mut ticker = tokio::time::interval(period);
    loop {
        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                res.context("listening for ctrl-c")?;
                info!("ctrl-c received, stopping");
                return Ok(());
            }
            _ = ticker.tick() => report(),
        }
    }
}

fn report_watchlist(view: &WatchlistView<HttpMarketService>) {
    log_status("watchlist", &view.status());
    let projection = view.membership_projection();
    if projection.is_empty() {
        info!("watchlist is empty");
    }
    projection.rows.iter().for_each(log_row);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok(); // load .env
    telemetry::init_tracing("info,tickwatch=debug");

    let cli = Cli::parse();
    telemetry::init_metrics(cli.metrics_port)?;

    let settings = Settings::load(cli.config.as_deref()).context("loading settings")?;
    let service = Arc::new(HttpMarketService::new(
        &settings.service.base_url,
        settings.service.request_timeout(),
    )?);
    info!(base_url = %service.base_url(), "market service");

    let watchlist = || {
        Arc::new(WatchlistView::new(
            service.clone(),
            settings.watchlist.capacity,
            settings.watchlist.preview_points,
            settings.watchlist.merge_mode,
        ))
    };

    match cli.command {
        Command::Dashboard { category } => {
            let dashboard = &settings.dashboard;
            let view = Arc::new(DashboardView::new(
                service.clone(),
                dashboard.categories.clone(),
                dashboard.capacity,
                dashboard.merge_mode,
            ));
            if let Some(name) = category.or(dashboard.active_category.clone()) {
                view.select_category(&name)?;
            }
            let available: Vec<&str> = view.categories().iter().map(|c| c.name.as_str()).collect();
            if let Some(active) = view.active_category() {
                info!(category = %active.name, ?available, "dashboard category");
            }
            let active = ActiveView::start(view, dashboard.poll_interval());
            report_until_ctrl_c(dashboard.poll_interval(), || {
                log_status("dashboard", &active.status());
                if let Some(projection) = active.projection() {
                    info!(category = %projection.category, ready = projection.ready.len(), "dashboard");
                    projection.ready.iter().for_each(log_row);
                    if !projection.pending.is_empty() {
                        info!(pending = ?projection.pending, "waiting for prices");
                    }
                }
            })
            .await?;
            active.stop();
        }
        Command::Watchlist => {
            let active = ActiveView::start(watchlist(), settings.watchlist.poll_interval());
            report_until_ctrl_c(settings.watchlist.poll_interval(), || report_watchlist(&active)).await?;
            active.stop();
        }
        Command::Add { ticker } => {
            let active = ActiveView::start(watchlist(), settings.watchlist.poll_interval());
            active.add_symbol(&ticker).await?;
            report_watchlist(&active);
            active.stop();
        }
        Command::Remove { ticker } => {
            let active = ActiveView::start(watchlist(), settings.watchlist.poll_interval());
            active.remove_symbol(&ticker).await?;
            report_watchlist(&active);
            active.stop();
        }
        Command::Expand { ticker } => {
            let active = ActiveView::start(watchlist(), settings.watchlist.poll_interval());
            active.refresh().await;
            active.expand(&ticker)?;
            report_until_ctrl_c(settings.watchlist.poll_interval(), || match active.expansion_projection() {
                Some(expansion) => info!(
                    symbol = %expansion.symbol,
                    price = ?expansion.price.as_ref().map(ToString::to_string),
                    points = expansion.history.points.len(),
                    status = ?expansion.history.status,
                    "expanded"
                ),
                None => report_watchlist(&active),
            })
            .await?;
            active.stop();
        }
        Command::Rules => {
            let desk = RuleDesk::new(service.clone());
            desk.load().await?;
            for rule in desk.rules() {
                info!(id = rule.id, ticker = %rule.ticker, direction = %rule.direction, price = rule.price, "rule");
            }
        }
        Command::RuleAdd { ticker, direction, price } => {
            let desk = RuleDesk::new(service.clone());
            let id = desk.create(&ticker, direction, &price).await?;
            info!(id = ?id, total = desk.rules().len(), "rule saved");
        }
        Command::RuleDelete { id } => {
            let desk = RuleDesk::new(service.clone());
            desk.delete(id).await?;
            info!(remaining = desk.rules().len(), "rule removed");
        }
        Command::Events => {
            let log = Arc::new(EventLog::new(service.clone()));
            let active = ActiveView::start(log, settings.events.poll_interval());
            report_until_ctrl_c(settings.events.poll_interval(), || {
                log_status(active.name(), &active.status());
                for event in active.events() {
                    info!(
                        rule = event.rule_id,
                        ticker = %event.ticker,
                        direction = %event.direction,
                        price = event.price,
                        at = ?event.triggered_at,
                        "event"
                    );
                }
            })
            .await?;
            active.stop();
        }
    }

    Ok(())
}
