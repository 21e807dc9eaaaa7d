mod handlers;
pub mod middleware;
pub mod types;

use std::any::Any;

use axum::{
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{Any as AnyOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::db::Database;
use crate::scheduler::AutoModeScheduler;

pub use handlers::ApiError;
use middleware::{require_api_key, throttle_auto_mode_control};
pub use middleware::SecurityConfig;
use types::ErrorResponse;

/// Shared state handed to every route.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub scheduler: AutoModeScheduler,
}

/// Router without authentication, for local use and tests.
pub fn create_router(state: AppState) -> Router {
    create_router_with_security(state, SecurityConfig::disabled())
}

pub fn create_router_with_security(state: AppState, security: SecurityConfig) -> Router {
    let mut control = Router::new()
        .route("/auto-mode/start", post(handlers::start_auto_mode))
        .route("/auto-mode/stop", post(handlers::stop_auto_mode));
    if let Some(limiter) = security.control_limiter.clone() {
        control = control.layer(axum::middleware::from_fn_with_state(
            limiter,
            throttle_auto_mode_control,
        ));
    }

    let mut api = Router::new()
        // Auto-mode
        .merge(control)
        .route("/auto-mode/status", post(handlers::auto_mode_status))
        // Features
        .route(
            "/features",
            get(handlers::list_features).post(handlers::create_feature),
        )
        .route("/features/cycles", get(handlers::feature_cycles))
        .route(
            "/features/{id}",
            get(handlers::get_feature)
                .put(handlers::update_feature)
                .delete(handlers::delete_feature),
        )
        // Projects
        .route("/projects", get(handlers::list_projects));

    if security.api_key.is_some() {
        api = api.layer(axum::middleware::from_fn_with_state(
            security.clone(),
            require_api_key,
        ));
    }

    // Health stays reachable without credentials.
    let api = api.route("/health", get(handlers::health));

    Router::new()
        .nest("/api/v1", api)
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&security))
        .with_state(state)
}

fn cors_layer(security: &SecurityConfig) -> CorsLayer {
    match &security.cors_origins {
        Some(origins) => {
            let origins: Vec<HeaderValue> = origins
                .iter()
                .filter_map(|o| match o.parse() {
                    Ok(value) => Some(value),
                    Err(_) => {
                        tracing::warn!("Ignoring invalid CORS origin: {}", o);
                        None
                    }
                })
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(AnyOrigin)
                .allow_headers(AnyOrigin)
        }
        None => CorsLayer::permissive(),
    }
}

/// A panicking handler still answers with the JSON error envelope.
fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };
    tracing::error!("Handler panicked: {}", detail);

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            success: false,
            error: "Internal server error".to_string(),
        }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn panics_render_the_error_envelope() {
        let response = handle_panic(Box::new("index out of bounds"));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(
            body,
            serde_json::json!({ "success": false, "error": "Internal server error" })
        );
    }
}
