pub mod config;
pub mod error;
pub mod market_data;
pub mod model;
pub mod telemetry;

pub use error::{MarketError, MarketResult};
pub use market_data::adapters::{http::HttpMarketService, MarketService};
pub use market_data::history::{HistorySeries, HistoryStore, MergeMode, SeriesStatus};
pub use market_data::scheduler::{PollTarget, Scheduler};
pub use market_data::view::{ActiveView, DashboardView, ViewStatus, WatchlistView};
