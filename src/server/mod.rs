//! Axum-based HTTP server exposing the server-side proxy endpoint.
//!
//! Browser clients in constrained deployments cannot call the API directly;
//! they call `/api/github?action=...` on this server instead, which answers
//! through its own [`ContentService`](crate::service::ContentService).
//!
//! # Components
//!
//! - `handlers`: The proxy endpoint, health and metrics handlers.
//! - `middleware`: Request ID and CORS layers.
//! - `routes`: The router configuration that ties everything together.
//!
//! Author: kelexine (<https://github.com/kelexine>)

mod handlers;
mod middleware;
mod routes;

pub use handlers::{ApiQuery, HealthResponse, HealthStatus, PublicConfig};
pub use routes::{create_router, AppState};
