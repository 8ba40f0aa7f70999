//! API layer
//!
//! Page and JSON endpoints around the authentication core:
//! - `GET /` - sign-in link or the signed-in user
//! - `GET /me` - current principal as JSON (requires a session)
//! - `GET /account` - profile page (browsers without a session go to `/`)
//! - `GET /health` - liveness
//!
//! Unmatched paths answer with the JSON 404 of [`AppError::NotFound`].

use axum::{
    Json, Router,
    middleware,
    response::{Html, IntoResponse},
    routing::get,
};

use crate::AppState;
use crate::auth::{CurrentUser, MaybeUser, Principal, require_auth, require_auth_redirect};
use crate::error::AppError;

/// Create the page/API router
pub fn app_router(state: AppState) -> Router<AppState> {
    let api = Router::new()
        .route("/me", get(me))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    let pages = Router::new()
        .route("/account", get(account))
        .route_layer(middleware::from_fn_with_state(state, require_auth_redirect));

    Router::new()
        .route("/", get(home))
        .route("/health", get(health_check))
        .merge(api)
        .merge(pages)
        .fallback(not_found)
}

/// GET /
async fn home(MaybeUser(principal): MaybeUser) -> impl IntoResponse {
    let body = match principal {
        Some(principal) => signed_in(&principal),
        None => r#"<p><a href="/auth/github">Sign in with GitHub</a></p>"#.to_string(),
    };

    page(&body)
}

/// GET /account
async fn account(CurrentUser(principal): CurrentUser) -> impl IntoResponse {
    let body = format!(
        r#"{}
    <dl>
        <dt>GitHub id</dt><dd>{}</dd>
        <dt>Account id</dt><dd>{}</dd>
    </dl>"#,
        signed_in(&principal),
        principal.github_uid,
        principal.id,
    );

    page(&body)
}

fn signed_in(principal: &Principal) -> String {
    format!(
        r#"<p><img src="{}" alt="" width="32" height="32"> Signed in as <strong>{}</strong></p>
    <form method="post" action="/logout"><button type="submit">Sign out</button></form>"#,
        html_escape::encode_double_quoted_attribute(&principal.avatar_url),
        html_escape::encode_text(&principal.login),
    )
}

fn page(body: &str) -> Html<String> {
    Html(format!(
        r#"<!DOCTYPE html>
<html>
<head><title>Blazing</title></head>
<body>
    <h1>Blazing</h1>
    {body}
</body>
</html>"#
    ))
}

/// GET /me
async fn me(CurrentUser(principal): CurrentUser) -> impl IntoResponse {
    Json(principal)
}

async fn not_found() -> AppError {
    AppError::NotFound
}

async fn health_check() -> &'static str {
    "OK"
}
