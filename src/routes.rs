// src/routes.rs

use axum::{
    Router, http::Method,
    routing::{get, post},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{handlers::exam, state::AppState};

/// Assembles the main application router.
///
/// * Wires the exam endpoints: paper fetch, attempt lifecycle, result.
/// * Applies global middleware (Trace, CORS).
/// * Injects global state (Database Pool + Config).
pub fn create_router(state: AppState) -> Router {
    let origins = [
        "http://localhost:3000".parse().unwrap(),
        "http://127.0.0.1:3000".parse().unwrap(),
    ];

    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
        ]);

    let exam_routes = Router::new()
        .route("/tests/{test_id}/questions", get(exam::get_paper))
        .route("/attempts", post(exam::start_attempt))
        .route("/attempts/{id}/answers", post(exam::sync_answer))
        .route("/attempts/{id}/submit", post(exam::submit_attempt))
        .route("/attempts/{id}/result", get(exam::get_result));

    Router::new()
        .nest("/api/exam", exam_routes)
        // Global Middleware (applied from outside in)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
