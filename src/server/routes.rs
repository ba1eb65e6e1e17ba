// HTTP routes configuration
// Author: kelexine (https://github.com/kelexine)

use super::handlers::{api_handler, health_handler, metrics_handler};
use super::middleware::{cors_layer, request_id_layers};
use crate::config::AppConfig;
use crate::error::Result;
use crate::search::SearchIndexResolver;
use crate::service::ContentService;
use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub service: ContentService,
    pub search: SearchIndexResolver,
}

pub fn create_router(config: AppConfig, service: ContentService) -> Result<Router> {
    let search = SearchIndexResolver::new(
        service.client().clone(),
        &config.repository,
        config.search_index.clone(),
    );
    let state = AppState {
        config: Arc::new(config),
        service,
        search,
    };

    let (set_request_id, propagate_request_id) = request_id_layers();

    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/api/github", get(api_handler))
        .layer(cors_layer())
        .layer(TraceLayer::new_for_http())
        .layer(propagate_request_id)
        .layer(set_request_id)
        .with_state(state);

    Ok(app)
}
