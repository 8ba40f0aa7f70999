//! GitHub identity provider
//!
//! Authorization-code grant against GitHub: builds the authorize URL,
//! exchanges the callback code for an access token and fetches `/user`.

use axum::async_trait;
use reqwest::header::ACCEPT;
use serde::Deserialize;
use std::time::Duration;
use url::Url;

use crate::config::GitHubOAuthConfig;
use crate::error::AppError;

/// GitHub user info
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GitHubUser {
    pub id: i64,
    pub login: String,
    #[serde(default)]
    pub avatar_url: String,
}

/// The external identity provider used by the login flow
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Client credentials are present
    fn is_configured(&self) -> bool;

    /// Where to send the browser, with `state` embedded
    fn authorization_url(&self, state: &str) -> Result<String, AppError>;

    /// Trade an authorization code for an access token
    async fn exchange_code(&self, code: &str) -> Result<String, AppError>;

    /// Identity of the account that granted `access_token`
    async fn fetch_user(&self, access_token: &str) -> Result<GitHubUser, AppError>;
}

/// GitHub token response
///
/// GitHub answers a bad code with `200 OK` and an `error` field.
#[derive(Debug, Deserialize)]
struct GitHubTokenResponse {
    access_token: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// [`IdentityProvider`] backed by the GitHub OAuth app API
pub struct GitHubProvider {
    config: GitHubOAuthConfig,
    client: reqwest::Client,
}

impl GitHubProvider {
    /// # Errors
    /// Returns error if the HTTP client cannot be built
    pub fn new(config: GitHubOAuthConfig, request_timeout: Duration) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("Blazing/", env!("CARGO_PKG_VERSION")))
            .timeout(request_timeout)
            .build()
            .map_err(|e| AppError::Internal(e.into()))?;

        Ok(Self { config, client })
    }

    fn user_url(&self) -> String {
        format!("{}/user", self.config.api_base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl IdentityProvider for GitHubProvider {
    fn is_configured(&self) -> bool {
        self.config.is_configured()
    }

    fn authorization_url(&self, state: &str) -> Result<String, AppError> {
        let scope = self.config.scopes.join(" ");
        let url = Url::parse_with_params(
            &self.config.authorize_url,
            &[
                ("client_id", self.config.client_id.as_str()),
                ("redirect_uri", self.config.redirect_url.as_str()),
                ("scope", scope.as_str()),
                ("state", state),
            ],
        )
        .map_err(|e| AppError::Config(format!("invalid auth.github.authorize_url: {e}")))?;

        Ok(url.into())
    }

    async fn exchange_code(&self, code: &str) -> Result<String, AppError> {
        let response = self
            .client
            .post(&self.config.token_url)
            .header(ACCEPT, "application/json")
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("code", code),
                ("redirect_uri", self.config.redirect_url.as_str()),
            ])
            .send()
            .await?
            .error_for_status()?;

        let token: GitHubTokenResponse = response
            .json()
            .await
            .map_err(|e| AppError::Provider(format!("failed to parse token response: {e}")))?;

        match token.access_token.filter(|t| !t.is_empty()) {
            Some(access_token) => Ok(access_token),
            None => Err(AppError::Provider(format!(
                "failed to exchange code: {}",
                token
                    .error_description
                    .or(token.error)
                    .unwrap_or_else(|| "no access token in response".to_string())
            ))),
        }
    }

    async fn fetch_user(&self, access_token: &str) -> Result<GitHubUser, AppError> {
        let response = self
            .client
            .get(self.user_url())
            .bearer_auth(access_token)
            .header(ACCEPT, "application/vnd.github+json")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AppError::Provider(format!(
                "GitHub API returned status {}",
                response.status()
            )));
        }

        response
            .json::<GitHubUser>()
            .await
            .map_err(|e| AppError::Provider(format!("failed to parse user data: {e}")))
    }
}
