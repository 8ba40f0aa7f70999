//! Configuration management
//!
//! Loads configuration from:
//! 1. Default values
//! 2. Configuration files (config/default.toml, config/local.toml)
//! 3. Environment variables (override)
//!
//! The resulting `AppConfig` is immutable and handed to components at
//! construction time; nothing reads the environment per request.

use serde::Deserialize;
use std::{net::IpAddr, path::PathBuf, time::Duration};

use crate::error::AppError;

const MIN_SESSION_SECRET_BYTES: usize = 32;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Port number (e.g., 8080)
    pub port: u16,
    /// Public domain (e.g., "chat.example.com")
    pub domain: String,
    /// Protocol ("http" or "https")
    pub protocol: String,
}

impl ServerConfig {
    /// Full URL like "https://chat.example.com"
    pub fn base_url(&self) -> String {
        format!("{}://{}", self.protocol, self.domain)
    }
}

/// Database configuration (SQLite only)
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file
    pub path: PathBuf,
    /// Directory holding `*.sql` migration scripts
    pub migrations_dir: PathBuf,
}

/// Authentication configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Session signing secret (32+ bytes)
    pub session_secret: String,
    /// Session cookie max age in seconds (default: 604800 = 7 days)
    pub session_max_age: i64,
    /// Timeout for each outbound call to the identity provider
    pub oauth_request_timeout_seconds: u64,
    /// Budget for the user lookup/upsert during login completion
    pub login_persistence_timeout_seconds: u64,
    pub github: GitHubOAuthConfig,
}

impl AuthConfig {
    pub fn oauth_request_timeout(&self) -> Duration {
        Duration::from_secs(self.oauth_request_timeout_seconds)
    }

    pub fn login_persistence_timeout(&self) -> Duration {
        Duration::from_secs(self.login_persistence_timeout_seconds)
    }
}

/// GitHub OAuth configuration
#[derive(Debug, Clone, Deserialize)]
pub struct GitHubOAuthConfig {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    /// Callback registered with the GitHub OAuth app
    pub redirect_url: String,
    pub authorize_url: String,
    pub token_url: String,
    /// Base of the REST API; the user endpoint is `{api_base_url}/user`
    pub api_base_url: String,
    pub scopes: Vec<String>,
}

impl GitHubOAuthConfig {
    /// Both client credentials are present
    pub fn is_configured(&self) -> bool {
        !self.client_id.trim().is_empty() && !self.client_secret.trim().is_empty()
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
    /// Log format: "pretty" or "json"
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl LoggingConfig {
    /// Filter used when `RUST_LOG` is not set
    pub fn filter_directive(&self) -> String {
        format!("blazing={},tower_http=debug", self.level.trim())
    }

    pub fn is_json(&self) -> bool {
        self.format.trim().eq_ignore_ascii_case("json")
    }
}

impl AppConfig {
    /// Load configuration from file and environment
    ///
    /// # Loading Order
    /// 1. Default values
    /// 2. config/default.toml (if exists)
    /// 3. config/local.toml (if exists)
    /// 4. Environment variables (BLAZING__*)
    /// 5. Flat deployment variables (SESSION_SECRET, GITHUB_CLIENT_ID, ...)
    ///
    /// # Errors
    /// Returns `AppError::Config` if configuration is missing or invalid
    pub fn load() -> Result<Self, AppError> {
        use config::{Config, Environment, File};

        let env = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());

        let config = Config::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("server.domain", "localhost")?
            .set_default("server.protocol", "http")?
            .set_default("database.path", "data/chat.db")?
            .set_default("database.migrations_dir", "migrations")?
            .set_default("auth.session_secret", "")?
            .set_default("auth.session_max_age", 604800)?
            .set_default("auth.oauth_request_timeout_seconds", 10)?
            .set_default("auth.login_persistence_timeout_seconds", 5)?
            .set_default(
                "auth.github.redirect_url",
                "http://localhost:8080/auth/github/callback",
            )?
            .set_default(
                "auth.github.authorize_url",
                "https://github.com/login/oauth/authorize",
            )?
            .set_default(
                "auth.github.token_url",
                "https://github.com/login/oauth/access_token",
            )?
            .set_default("auth.github.api_base_url", "https://api.github.com")?
            .set_default("auth.github.scopes", vec!["user:email"])?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(
                Environment::with_prefix("BLAZING")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override_option("auth.session_secret", env("SESSION_SECRET"))?
            .set_override_option("auth.github.client_id", env("GITHUB_CLIENT_ID"))?
            .set_override_option("auth.github.client_secret", env("GITHUB_CLIENT_SECRET"))?
            .set_override_option("auth.github.redirect_url", env("GITHUB_REDIRECT_URL"))?
            .set_override_option("database.path", env("DB_PATH"))?
            .set_override_option("server.port", env("PORT"))?
            .build()?;

        let app_config: Self = config.try_deserialize()?;
        app_config.validate()?;
        Ok(app_config)
    }

    pub fn should_use_secure_cookies(&self) -> bool {
        self.server.protocol.eq_ignore_ascii_case("https")
            || !is_local_server_domain(&self.server.domain)
    }

    /// Reject configurations the process must not serve traffic with
    pub fn validate(&self) -> Result<(), AppError> {
        if self.auth.session_secret.is_empty() {
            return Err(AppError::Config(
                "auth.session_secret (SESSION_SECRET) is required".to_string(),
            ));
        }

        if self.auth.session_secret.len() < MIN_SESSION_SECRET_BYTES {
            return Err(AppError::Config(format!(
                "auth.session_secret must be at least {} bytes",
                MIN_SESSION_SECRET_BYTES
            )));
        }

        if self.auth.session_max_age <= 0 {
            return Err(AppError::Config(
                "auth.session_max_age must be greater than 0".to_string(),
            ));
        }

        if !self.auth.github.is_configured() {
            return Err(AppError::Config(
                "auth.github.client_id and auth.github.client_secret are required".to_string(),
            ));
        }

        if self.auth.login_persistence_timeout_seconds == 0 {
            return Err(AppError::Config(
                "auth.login_persistence_timeout_seconds must be greater than 0".to_string(),
            ));
        }

        if !self.should_use_secure_cookies() {
            let host = normalized_server_host(&self.server.domain);
            tracing::warn!(
                host = %host,
                protocol = %self.server.protocol,
                "Using insecure session cookies for local development"
            );
        } else if !self.server.protocol.eq_ignore_ascii_case("https") {
            return Err(AppError::Config(
                "server.protocol must be https for non-local server domains".to_string(),
            ));
        }

        Ok(())
    }
}

fn normalized_server_host(domain: &str) -> String {
    let trimmed = domain.trim();
    let parsed_host = url::Url::parse(&format!("http://{trimmed}"))
        .ok()
        .and_then(|url| url.host_str().map(|host| host.to_string()));
    let host = parsed_host.unwrap_or_else(|| trimmed.to_string());
    host.trim_end_matches('.').to_ascii_lowercase()
}

fn is_local_server_domain(domain: &str) -> bool {
    let host = normalized_server_host(domain);
    if host == "localhost" || host.ends_with(".localhost") {
        return true;
    }

    if let Ok(ip) = host.parse::<IpAddr>() {
        return ip.is_loopback() || ip.is_unspecified();
    }

    false
}
