// Linkeval ingestion server
// Decision: HTTP ingestion feeds clicks into the scheduler host; the host's
// timer loop runs in the same process

pub mod api;
pub mod config;
pub mod telemetry;

pub use api::{router, AppState};
pub use config::ServerConfig;
