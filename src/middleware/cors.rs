use tower_http::cors::{Any, CorsLayer};

/// The chat widget is embedded on arbitrary origins.
pub fn permissive_cors() -> CorsLayer {
    CorsLayer::new()
        .allow_methods(Any)
        .allow_headers(Any)
        .allow_origin(Any)
}
