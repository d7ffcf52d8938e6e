// Market data module entrypoint
pub mod adapters;   // the market service: trait, HTTP client, reply shapes
pub mod alerts;     // rule desk and event log
pub mod history;    // bounded per-symbol series, append/replace merge
pub mod normaliser; // raw payloads -> typed batches
pub mod projector;  // read-only category/membership/expansion shapes
pub mod scheduler;  // periodic poll loop with stale-result gating
pub mod view;       // dashboard and watchlist view contexts
