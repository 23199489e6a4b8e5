//! `rag-query-server` exposes a [`rag_query::QueryPipeline`] over HTTP.
//! Questions are posted as JSON to `/query`; `/health` answers liveness checks.

pub mod api;
pub mod server;

pub use server::{AppState, ServerConfig, app_router, run_server};
