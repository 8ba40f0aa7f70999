//! Common test utilities for E2E tests

use std::collections::HashMap;
use std::path::PathBuf;

use axum::{
    Form, Json, Router,
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use blazing::{AppState, config};
use serde_json::json;
use tempfile::TempDir;
use tokio::net::TcpListener;

/// GitHub account id served by the fake provider
pub const GITHUB_UID: i64 = 12345;

/// Test server instance
pub struct TestServer {
    pub addr: String,
    pub state: AppState,
    pub _temp_dir: TempDir,
    pub client: reqwest::Client,
}

impl TestServer {
    /// Create a new test server instance backed by a fake GitHub
    pub async fn new() -> Self {
        let github_addr = spawn(fake_github_router()).await;

        // Create temporary directory for test database
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        // Create test configuration
        let config = config::AppConfig {
            server: config::ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0, // Let OS assign port
                domain: "localhost".to_string(),
                protocol: "http".to_string(),
            },
            database: config::DatabaseConfig {
                path: db_path,
                migrations_dir: PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("migrations"),
            },
            auth: config::AuthConfig {
                session_secret: "test-secret-key-that-is-long-enough".to_string(),
                session_max_age: 604_800,
                oauth_request_timeout_seconds: 5,
                login_persistence_timeout_seconds: 5,
                github: config::GitHubOAuthConfig {
                    client_id: "test-client-id".to_string(),
                    client_secret: "test-client-secret".to_string(),
                    redirect_url: "http://localhost/auth/github/callback".to_string(),
                    authorize_url: format!("{github_addr}/login/oauth/authorize"),
                    token_url: format!("{github_addr}/login/oauth/access_token"),
                    api_base_url: github_addr.clone(),
                    scopes: vec!["user:email".to_string()],
                },
            },
            logging: config::LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        };
        config.validate().unwrap();

        blazing::metrics::init_metrics();

        // Initialize app state (runs migrations)
        let state = AppState::new(config).await.unwrap();

        // Create HTTP client
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap();

        let addr = spawn(blazing::build_router(state.clone())).await;

        Self {
            addr,
            state,
            _temp_dir: temp_dir,
            client,
        }
    }

    /// Get base URL for API requests
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.addr, path)
    }

    /// Run the whole GitHub login and return the issued session cookie value
    ///
    /// The fake provider reports `login` as the account handle, so the
    /// same GitHub user can sign in again under a new name.
    pub async fn login_as(&self, login: &str) -> String {
        let client = no_redirect_client();

        let response = client.get(self.url("/auth/github")).send().await.unwrap();
        assert!(response.status().is_redirection());
        let oauth_state = cookie_value(&response, "oauth_state").expect("oauth_state cookie");

        let response = client
            .get(self.url("/auth/github/callback"))
            .query(&[("code", login), ("state", oauth_state.as_str())])
            .header("Cookie", format!("oauth_state={oauth_state}"))
            .send()
            .await
            .unwrap();
        assert!(response.status().is_redirection());

        cookie_value(&response, "blazing_session").expect("blazing_session cookie")
    }
}

/// Client that surfaces redirects instead of following them
pub fn no_redirect_client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .timeout(std::time::Duration::from_secs(10))
        .build()
        .expect("failed to build no-redirect client")
}

/// All `Set-Cookie` header values of a response
pub fn set_cookies(response: &reqwest::Response) -> Vec<String> {
    response
        .headers()
        .get_all("set-cookie")
        .iter()
        .filter_map(|v| v.to_str().ok().map(ToString::to_string))
        .collect()
}

/// Value of the named cookie set by a response, if non-empty
pub fn cookie_value(response: &reqwest::Response, name: &str) -> Option<String> {
    let prefix = format!("{name}=");
    set_cookies(response).into_iter().find_map(|header| {
        let value = header.strip_prefix(&prefix)?.split(';').next()?.to_string();
        (!value.is_empty()).then_some(value)
    })
}

/// Location header of a redirect
pub fn location(response: &reqwest::Response) -> String {
    response
        .headers()
        .get("location")
        .and_then(|v| v.to_str().ok())
        .expect("location header")
        .to_string()
}

async fn spawn(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{}", addr)
}

/// Minimal stand-in for github.com and api.github.com
///
/// The authorization code doubles as the user's handle; the code "denied"
/// yields a token error the way GitHub reports a bad verification code.
fn fake_github_router() -> Router {
    Router::new()
        .route("/login/oauth/access_token", post(fake_token))
        .route("/user", get(fake_user))
}

async fn fake_token(Form(form): Form<HashMap<String, String>>) -> Response {
    let code = form.get("code").map(String::as_str).unwrap_or_default();
    if code == "denied" || form.get("client_secret").map(String::as_str) != Some("test-client-secret")
    {
        return Json(json!({
            "error": "bad_verification_code",
            "error_description": "The code passed is incorrect or expired."
        }))
        .into_response();
    }

    Json(json!({
        "access_token": format!("token-{code}"),
        "token_type": "bearer",
        "scope": "user:email"
    }))
    .into_response()
}

async fn fake_user(headers: HeaderMap) -> Response {
    let login = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer token-"));

    match login {
        Some(login) => Json(json!({
            "id": GITHUB_UID,
            "login": login,
            "avatar_url": format!("https://avatars.example.com/{login}.png")
        }))
        .into_response(),
        None => (StatusCode::UNAUTHORIZED, "Bad credentials").into_response(),
    }
}
