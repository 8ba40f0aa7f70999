//! GitHub OAuth flow
//!
//! Implements the OAuth 2.0 authorization code flow with GitHub:
//! unauthenticated -> pending (state cookie set, redirected to GitHub)
//! -> authenticated (session cookie set). Any failure goes back to
//! unauthenticated.

use axum::{
    Router,
    extract::{Query, State},
    response::{IntoResponse, Redirect, Response},
    routing::get,
};
use axum_extra::extract::CookieJar;
use axum_extra::extract::cookie::{Cookie, SameSite};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::Deserialize;
use sha2::Sha256;
use std::sync::Arc;
use std::time::Duration;

use super::github::{GitHubUser, IdentityProvider};
use super::session::{Principal, SessionManager};
use crate::AppState;
use crate::data::{NewUser, User, UserProfileUpdate, UserRepository, is_unique_violation};
use crate::error::AppError;
use crate::metrics::LOGINS_TOTAL;

/// Cookie holding the CSRF state between redirect and callback
pub const OAUTH_STATE_COOKIE_NAME: &str = "oauth_state";

const OAUTH_STATE_MAX_AGE_SECONDS: i64 = 600;

const CSRF_STATE_MAC_KEY: &[u8] = b"blazing-oauth-state";

type HmacSha256 = Hmac<Sha256>;

/// Query parameters from GitHub callback
#[derive(Debug, Default, Deserialize)]
pub struct CallbackQuery {
    /// Authorization code
    pub code: Option<String>,
    /// CSRF state token
    pub state: Option<String>,
}

/// Where to send the browser to start a login
#[derive(Debug)]
pub struct LoginRedirect {
    pub location: String,
    pub state_cookie: Cookie<'static>,
}

/// A finished login: the canonical local principal and its cookie
#[derive(Debug)]
pub struct CompletedLogin {
    pub principal: Principal,
    pub session_cookie: Cookie<'static>,
}

/// Drives the three-step authorization-code login
///
/// Holds no per-login state; the CSRF token lives in the browser's
/// state cookie.
pub struct LoginFlow {
    provider: Arc<dyn IdentityProvider>,
    sessions: Arc<SessionManager>,
    persistence_timeout: Duration,
}

impl LoginFlow {
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        sessions: Arc<SessionManager>,
        persistence_timeout: Duration,
    ) -> Self {
        Self {
            provider,
            sessions,
            persistence_timeout,
        }
    }

    /// Generate a CSRF state and the provider URL that embeds it
    ///
    /// # Errors
    /// Returns `AppError::Config` when client credentials are missing
    pub fn begin_login(&self) -> Result<LoginRedirect, AppError> {
        if !self.provider.is_configured() {
            return Err(AppError::Config("GitHub OAuth not configured".to_string()));
        }

        let state = generate_csrf_state();
        let location = self.provider.authorization_url(&state)?;

        let state_cookie = Cookie::build((OAUTH_STATE_COOKIE_NAME, state))
            .path("/")
            .http_only(true)
            .secure(self.sessions.secure_cookies())
            .same_site(SameSite::Lax)
            .max_age(time::Duration::seconds(OAUTH_STATE_MAX_AGE_SECONDS))
            .build();

        Ok(LoginRedirect {
            location,
            state_cookie,
        })
    }

    /// Removal directive for the state cookie
    pub fn clear_state_cookie(&self) -> Cookie<'static> {
        let mut cookie = Cookie::build((OAUTH_STATE_COOKIE_NAME, ""))
            .path("/")
            .http_only(true)
            .secure(self.sessions.secure_cookies())
            .same_site(SameSite::Lax)
            .build();
        cookie.make_removal();
        cookie
    }

    /// Finish a login from the provider callback
    ///
    /// # Steps
    /// 1. Verify CSRF state against the state cookie
    /// 2. Require an authorization code
    /// 3. Exchange code for access token and fetch the GitHub user
    /// 4. Create or refresh the local user (bounded by the persistence timeout)
    /// 5. Issue the session cookie
    ///
    /// The caller clears the state cookie whatever the outcome.
    pub async fn complete_login(
        &self,
        state_cookie: Option<&str>,
        query: &CallbackQuery,
        users: &dyn UserRepository,
    ) -> Result<CompletedLogin, AppError> {
        verify_csrf_state(state_cookie, query.state.as_deref())?;

        let code = query
            .code
            .as_deref()
            .filter(|code| !code.is_empty())
            .ok_or(AppError::MissingAuthorizationCode)?;

        let access_token = self.provider.exchange_code(code).await?;
        let github_user = self.provider.fetch_user(&access_token).await?;

        let user = tokio::time::timeout(self.persistence_timeout, upsert_user(users, &github_user))
            .await
            .map_err(|_| {
                tracing::error!(github_uid = github_user.id, "User upsert timed out");
                AppError::PersistenceTimeout
            })??;

        let principal = user.principal();
        let session_cookie = self.sessions.session_cookie(&principal)?;

        Ok(CompletedLogin {
            principal,
            session_cookie,
        })
    }

    /// Session removal directive; touches neither GitHub nor the database
    pub fn logout(&self) -> Cookie<'static> {
        self.sessions.revoke()
    }
}

// =============================================================================
// Routes
// =============================================================================

/// Create authentication router
///
/// Routes:
/// - GET /auth/github - Redirect to GitHub
/// - GET /auth/github/callback - OAuth callback
/// - GET|POST /logout - Logout
pub fn auth_router() -> Router<AppState> {
    Router::new()
        .route("/auth/github", get(github_redirect))
        .route("/auth/github/callback", get(github_callback))
        .route("/logout", get(logout).post(logout))
}

/// GET /auth/github
async fn github_redirect(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<impl IntoResponse, AppError> {
    let redirect = state.login.begin_login()?;
    Ok((
        jar.add(redirect.state_cookie),
        Redirect::temporary(&redirect.location),
    ))
}

/// GET /auth/github/callback
async fn github_callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
    jar: CookieJar,
) -> Response {
    let state_cookie = jar
        .get(OAUTH_STATE_COOKIE_NAME)
        .map(|cookie| cookie.value().to_owned());
    let jar = jar.add(state.login.clear_state_cookie());

    match state
        .login
        .complete_login(state_cookie.as_deref(), &query, &*state.db)
        .await
    {
        Ok(completed) => {
            LOGINS_TOTAL.with_label_values(&["success"]).inc();
            tracing::info!(
                user_id = completed.principal.id,
                github_uid = completed.principal.github_uid,
                "User signed in"
            );
            (jar.add(completed.session_cookie), Redirect::temporary("/")).into_response()
        }
        Err(error) => {
            LOGINS_TOTAL.with_label_values(&[error.kind()]).inc();
            (jar, error).into_response()
        }
    }
}

/// GET|POST /logout
async fn logout(State(state): State<AppState>, jar: CookieJar) -> impl IntoResponse {
    (jar.add(state.login.logout()), Redirect::to("/"))
}

// =============================================================================
// Helpers
// =============================================================================

/// Generate a random CSRF state token
fn generate_csrf_state() -> String {
    let mut bytes = [0_u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Verify CSRF state from cookie matches callback state
pub fn verify_csrf_state(cookie_state: Option<&str>, query_state: Option<&str>) -> Result<(), AppError> {
    match (cookie_state, query_state) {
        (Some(expected), Some(actual)) if !expected.is_empty() && states_match(expected, actual) => {
            Ok(())
        }
        _ => Err(AppError::CsrfMismatch),
    }
}

/// Constant-time equality: both values are MACed under a fixed key and the
/// fixed-length tags are compared with `verify_slice`.
fn states_match(expected: &str, actual: &str) -> bool {
    let tag = |value: &str| {
        HmacSha256::new_from_slice(CSRF_STATE_MAC_KEY).map(|mut mac| {
            mac.update(value.as_bytes());
            mac
        })
    };

    match (tag(expected), tag(actual)) {
        (Ok(expected), Ok(actual)) => actual.verify_slice(&expected.finalize().into_bytes()).is_ok(),
        _ => false,
    }
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

/// Find the local user for a GitHub account, creating or refreshing it
async fn upsert_user(users: &dyn UserRepository, github_user: &GitHubUser) -> Result<User, AppError> {
    let existing = users
        .get_user_by_github_uid(github_user.id)
        .await
        .inspect_err(|error| {
            tracing::error!(%error, github_uid = github_user.id, "Failed to look up user");
        })?;

    let Some(existing) = existing else {
        let new_user = NewUser {
            github_uid: github_user.id,
            login: github_user.login.clone(),
            avatar_url: non_empty(&github_user.avatar_url),
        };

        return match users.create_user(&new_user).await {
            Ok(user) => {
                tracing::info!(user_id = user.id, github_uid = user.github_uid, "Created user");
                Ok(user)
            }
            // A concurrent login for the same account created it first.
            Err(error) if is_unique_violation(&error) => {
                let winner = users
                    .get_user_by_github_uid(github_user.id)
                    .await?
                    .ok_or(error)?;
                refresh_profile(users, winner, github_user).await
            }
            Err(error) => {
                tracing::error!(%error, github_uid = github_user.id, "Failed to create new user");
                Err(error)
            }
        };
    };

    refresh_profile(users, existing, github_user).await
}

async fn refresh_profile(
    users: &dyn UserRepository,
    user: User,
    github_user: &GitHubUser,
) -> Result<User, AppError> {
    let current_avatar = user.avatar_url.as_deref().unwrap_or_default();
    if user.login == github_user.login && current_avatar == github_user.avatar_url {
        return Ok(user);
    }

    users
        .update_user(&UserProfileUpdate {
            id: user.id,
            login: github_user.login.clone(),
            avatar_url: non_empty(&github_user.avatar_url),
        })
        .await
        .inspect_err(|error| {
            tracing::error!(%error, user_id = user.id, "Failed to update user");
        })
}
