//! HTTP API: upload, gallery listing, cleanup, diagnostics and public objects.

mod api;
mod handlers;

pub use api::{ApiServer, ApiServerBuilder, ServerState};
