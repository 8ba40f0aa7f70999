//! Authentication middleware
//!
//! Protects routes that require authentication. The resolved
//! [`Principal`] travels to handlers as a typed request extension.

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts, Request, State},
    http::{HeaderMap, request::Parts},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::CookieJar;

use super::session::{Principal, SessionError};
use crate::AppState;
use crate::error::AppError;

fn authenticate(headers: &HeaderMap, state: &AppState) -> Result<Principal, SessionError> {
    let jar = CookieJar::from_headers(headers);
    state.sessions.resolve(&jar)
}

/// Middleware to require authentication
///
/// Rejects with 401 when the session is missing or invalid; both cases
/// look the same to the client.
///
/// # Usage
/// ```ignore
/// let protected_routes = Router::new()
///     .route("/me", ...)
///     .route_layer(middleware::from_fn_with_state(state, require_auth));
/// ```
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let principal = authenticate(request.headers(), &state)?;
    request.extensions_mut().insert(principal);
    Ok(next.run(request).await)
}

/// Like [`require_auth`], but sends unauthenticated browsers to `/`
pub async fn require_auth_redirect(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    match authenticate(request.headers(), &state) {
        Ok(principal) => {
            request.extensions_mut().insert(principal);
            next.run(request).await
        }
        Err(error) => {
            tracing::debug!(%error, path = %request.uri().path(), "Redirecting unauthenticated request");
            Redirect::temporary("/").into_response()
        }
    }
}

/// Extractor for current authenticated user
///
/// # Usage
/// ```ignore
/// async fn handler(
///     CurrentUser(principal): CurrentUser,
/// ) -> impl IntoResponse {
///     format!("Hello, {}", principal.login)
/// }
/// ```
#[derive(Debug, Clone)]
pub struct CurrentUser(pub Principal);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if let Some(principal) = parts.extensions.get::<Principal>().cloned() {
            return Ok(CurrentUser(principal));
        }

        let state = AppState::from_ref(state);
        let principal = authenticate(&parts.headers, &state)?;
        parts.extensions.insert(principal.clone());

        Ok(CurrentUser(principal))
    }
}

/// Optional current user extractor
///
/// Returns None if not authenticated, instead of error.
#[derive(Debug, Clone)]
pub struct MaybeUser(pub Option<Principal>);

#[async_trait]
impl<S> FromRequestParts<S> for MaybeUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if let Some(principal) = parts.extensions.get::<Principal>().cloned() {
            return Ok(MaybeUser(Some(principal)));
        }

        let app_state = AppState::from_ref(state);
        let principal = authenticate(&parts.headers, &app_state).ok();

        if let Some(principal) = &principal {
            parts.extensions.insert(principal.clone());
        }

        Ok(MaybeUser(principal))
    }
}
