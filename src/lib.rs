pub mod config;
pub mod database;
pub mod dto;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod utils;

use crate::services::{
    aggregator_service::AggregatorService,
    extractor_service::{ExtractorService, HttpNlpCapability, NlpCapability},
    history_service::ChatStore,
    refresh_service::RefreshService,
    scoring_service::{ScoringService, DEFAULT_WEIGHTS},
    search_service::SearchService,
    session_service::SessionManager,
    source_service::SourceRegistry,
};
use axum::{
    routing::{get, post},
    Router,
};
use reqwest::Client;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ChatStore>,
    pub search: SearchService,
    pub sessions: Arc<SessionManager>,
    pub refresh: RefreshService,
}

impl AppState {
    pub fn new(store: Arc<dyn ChatStore>) -> Self {
        let config = crate::config::get_config();
        let http_client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .unwrap();

        let nlp = config.nlp_endpoint.clone().map(|endpoint| {
            Arc::new(HttpNlpCapability::new(http_client.clone(), endpoint))
                as Arc<dyn NlpCapability>
        });
        let extractor = ExtractorService::new(nlp, config.nlp_timeout, config.fallback_confidence);

        let registry = SourceRegistry::from_config(config, http_client);
        let aggregator = AggregatorService::new(
            registry,
            Arc::new(Semaphore::new(config.max_source_concurrency)),
            config.source_timeout,
            config.request_deadline,
        );
        let scoring =
            ScoringService::new(DEFAULT_WEIGHTS, config.score_threshold, config.max_results);
        let search = SearchService::new(extractor, aggregator.clone(), scoring);

        let sessions = Arc::new(SessionManager::new(
            search.clone(),
            Arc::clone(&store),
            config.session_grace,
            config.idle_timeout,
        ));
        let refresh = RefreshService::new(aggregator, Arc::clone(&store));

        Self {
            store,
            search,
            sessions,
            refresh,
        }
    }
}

/// Full application router. Shared between `main` and the test suite.
pub fn app(state: AppState) -> Router {
    let config = crate::config::get_config();

    let public_api = Router::new()
        .route("/search_jobs", post(routes::search::search_jobs))
        .route(
            "/api/chat_history/:user_id",
            get(routes::history::get_chat_history).delete(routes::history::clear_chat_history),
        )
        .layer(axum::middleware::from_fn_with_state(
            middleware::rate_limit::PublicRateLimiter::new(config.public_rps),
            middleware::rate_limit::public_rate_limit,
        ));

    Router::new()
        .route("/health", get(routes::health::health))
        .route("/ws/:user_id", get(routes::ws::ws_handler))
        .merge(public_api)
        .with_state(state)
        .layer(middleware::cors::permissive_cors())
        .layer(TraceLayer::new_for_http())
}
