//! Prometheus metrics registry and instruments.
//!
//! This module is framework-agnostic and can be used from any layer.

use axum::{
    Router,
    extract::Request,
    middleware::Next,
    response::{IntoResponse, Response},
    routing::get,
};
use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::Once;

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("blazing_http_requests_total", "Total number of HTTP requests"),
        &["method", "status"]
    ).expect("metric can be created");

    // Authentication
    pub static ref LOGINS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("blazing_logins_total", "Completed OAuth logins by outcome"),
        &["outcome"]
    ).expect("metric can be created");
    pub static ref SESSION_REJECTIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("blazing_session_rejections_total", "Session cookies rejected by reason"),
        &["reason"]
    ).expect("metric can be created");

    // Schema
    pub static ref MIGRATIONS_APPLIED_TOTAL: IntCounter = IntCounter::new(
        "blazing_migrations_applied_total",
        "Migration scripts applied by this process"
    ).expect("metric can be created");

    pub static ref ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("blazing_errors_total", "Total number of errors"),
        &["error_type"]
    ).expect("metric can be created");
}

static INIT: Once = Once::new();

/// Initialize metrics registry.
///
/// Safe to call more than once; only the first call registers.
pub fn init_metrics() {
    INIT.call_once(register_metrics);
}

fn register_metrics() {
    REGISTRY
        .register(Box::new(HTTP_REQUESTS_TOTAL.clone()))
        .expect("HTTP_REQUESTS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(LOGINS_TOTAL.clone()))
        .expect("LOGINS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(SESSION_REJECTIONS_TOTAL.clone()))
        .expect("SESSION_REJECTIONS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(MIGRATIONS_APPLIED_TOTAL.clone()))
        .expect("MIGRATIONS_APPLIED_TOTAL can be registered");
    REGISTRY
        .register(Box::new(ERRORS_TOTAL.clone()))
        .expect("ERRORS_TOTAL can be registered");

    tracing::info!("Metrics registry initialized");
}

/// Count every request by method and final status
pub async fn track_requests(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let response = next.run(request).await;
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method.as_str(), response.status().as_str()])
        .inc();
    response
}

/// Returns all metrics in Prometheus text format.
async fn metrics_handler() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    match encoder.encode_to_string(&metric_families) {
        Ok(metrics_text) => (
            axum::http::StatusCode::OK,
            [(axum::http::header::CONTENT_TYPE, encoder.format_type())],
            metrics_text,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (
                axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to encode metrics",
            )
                .into_response()
        }
    }
}

/// Exposes the `/metrics` endpoint.
pub fn metrics_router<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new().route("/metrics", get(metrics_handler))
}
