//! Session management
//!
//! Uses HMAC-signed tokens stored in cookies.
//! No server-side session storage needed.
//!
//! Token format: `base64url(json(principal)).base64url(hmac_sha256(key, base64url(json(principal))))`

use axum_extra::extract::CookieJar;
use axum_extra::extract::cookie::{Cookie, SameSite};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

use crate::config::AppConfig;
use crate::error::AppError;
use crate::metrics::SESSION_REJECTIONS_TOTAL;

type HmacSha256 = Hmac<Sha256>;

/// Name of the session cookie
pub const SESSION_COOKIE_NAME: &str = "blazing_session";

/// Default cookie lifetime: 7 days
pub const DEFAULT_SESSION_MAX_AGE_SECONDS: i64 = 7 * 24 * 60 * 60;

const MIN_SECRET_BYTES: usize = 32;

/// The authenticated user carried inside a session cookie
///
/// Issued fresh on every login and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Local user id
    pub id: i64,
    /// GitHub user id
    pub github_uid: i64,
    /// GitHub login
    pub login: String,
    /// Avatar URL from GitHub (empty when the account has none)
    pub avatar_url: String,
}

/// Why a request carries no usable session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("no session found")]
    NoSession,
    #[error("invalid session")]
    InvalidSession,
}

/// Issues and verifies signed session cookies
///
/// Holds nothing but the signing key and cookie attributes, so one
/// instance is shared by every request.
#[derive(Clone)]
pub struct SessionManager {
    mac: HmacSha256,
    secure: bool,
    max_age_seconds: i64,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("secure", &self.secure)
            .field("max_age_seconds", &self.max_age_seconds)
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    /// Create a manager from a signing secret
    ///
    /// # Errors
    /// Returns `AppError::Config` if the secret is empty or shorter than 32 bytes
    pub fn new(secret: impl AsRef<[u8]>) -> Result<Self, AppError> {
        let secret = secret.as_ref();
        if secret.is_empty() {
            return Err(AppError::Config("session secret is required".to_string()));
        }
        if secret.len() < MIN_SECRET_BYTES {
            return Err(AppError::Config(format!(
                "session secret must be at least {} bytes",
                MIN_SECRET_BYTES
            )));
        }

        let mac = HmacSha256::new_from_slice(secret)
            .map_err(|e| AppError::Config(format!("invalid session secret: {e}")))?;

        Ok(Self {
            mac,
            secure: false,
            max_age_seconds: DEFAULT_SESSION_MAX_AGE_SECONDS,
        })
    }

    /// Build the manager described by the application configuration
    pub fn from_config(config: &AppConfig) -> Result<Self, AppError> {
        Ok(Self::new(&config.auth.session_secret)?
            .with_secure_cookies(config.should_use_secure_cookies())
            .with_max_age(config.auth.session_max_age))
    }

    /// Set the `Secure` attribute on emitted cookies
    pub fn with_secure_cookies(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    pub fn with_max_age(mut self, seconds: i64) -> Self {
        self.max_age_seconds = seconds;
        self
    }

    pub fn secure_cookies(&self) -> bool {
        self.secure
    }

    fn sign(&self, payload_b64: &str) -> HmacSha256 {
        let mut mac = self.mac.clone();
        mac.update(payload_b64.as_bytes());
        mac
    }

    /// Serialize and sign a principal into a cookie value
    pub fn issue(&self, principal: &Principal) -> Result<String, AppError> {
        let payload = serde_json::to_vec(principal).map_err(|e| AppError::Internal(e.into()))?;
        let payload_b64 = URL_SAFE_NO_PAD.encode(payload);

        let signature = self.sign(&payload_b64).finalize().into_bytes();
        let signature_b64 = URL_SAFE_NO_PAD.encode(signature);

        Ok(format!("{}.{}", payload_b64, signature_b64))
    }

    /// Verify a token and decode the principal inside it
    ///
    /// The signature is checked (in constant time) before the payload is
    /// decoded, so unsigned input never reaches the JSON parser.
    pub fn decode(&self, token: &str) -> Result<Principal, SessionError> {
        let (payload_b64, signature_b64) = token
            .split_once('.')
            .ok_or(SessionError::InvalidSession)?;

        let signature = URL_SAFE_NO_PAD
            .decode(signature_b64)
            .map_err(|_| SessionError::InvalidSession)?;

        self.sign(payload_b64)
            .verify_slice(&signature)
            .map_err(|_| SessionError::InvalidSession)?;

        let payload = URL_SAFE_NO_PAD
            .decode(payload_b64)
            .map_err(|_| SessionError::InvalidSession)?;

        serde_json::from_slice(&payload).map_err(|error| {
            tracing::error!(%error, "Signed session payload failed to parse");
            SessionError::InvalidSession
        })
    }

    /// Resolve the principal for a request from its cookies
    ///
    /// No database access happens here.
    pub fn resolve(&self, jar: &CookieJar) -> Result<Principal, SessionError> {
        let cookie = jar.get(SESSION_COOKIE_NAME).ok_or(SessionError::NoSession)?;

        self.decode(cookie.value()).inspect_err(|_| {
            SESSION_REJECTIONS_TOTAL
                .with_label_values(&["invalid"])
                .inc();
            tracing::debug!("Rejected invalid session cookie");
        })
    }

    /// Cookie carrying a freshly issued session for `principal`
    pub fn session_cookie(&self, principal: &Principal) -> Result<Cookie<'static>, AppError> {
        let value = self.issue(principal)?;

        Ok(Cookie::build((SESSION_COOKIE_NAME, value))
            .path("/")
            .http_only(true)
            .secure(self.secure)
            .same_site(SameSite::Lax)
            .max_age(time::Duration::seconds(self.max_age_seconds))
            .build())
    }

    /// Cookie directive that clears the session in the browser
    pub fn revoke(&self) -> Cookie<'static> {
        let mut cookie = Cookie::build((SESSION_COOKIE_NAME, ""))
            .path("/")
            .http_only(true)
            .secure(self.secure)
            .same_site(SameSite::Lax)
            .build();
        cookie.make_removal();
        cookie
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret-key-that-is-long-enough";

    fn alice() -> Principal {
        Principal {
            id: 1,
            github_uid: 12345,
            login: "alice".to_string(),
            avatar_url: "https://x/a.png".to_string(),
        }
    }

    fn manager() -> SessionManager {
        SessionManager::new(SECRET).expect("secret is long enough")
    }

    fn jar_with(value: &str) -> CookieJar {
        CookieJar::new().add(Cookie::new(SESSION_COOKIE_NAME, value.to_string()))
    }

    /// Replace the character at `index` with a different base64url character
    fn flip_char(token: &str, index: usize) -> String {
        let mut chars: Vec<char> = token.chars().collect();
        chars[index] = if chars[index] == 'A' { 'B' } else { 'A' };
        chars.into_iter().collect()
    }

    #[test]
    fn issue_produces_two_part_token() {
        let token = manager().issue(&alice()).unwrap();
        let parts: Vec<&str> = token.split('.').collect();
        assert_eq!(parts.len(), 2);
        assert!(parts.iter().all(|part| !part.is_empty()));
    }

    #[test]
    fn resolve_round_trips_principal() {
        let manager = manager();
        let token = manager.issue(&alice()).unwrap();

        let principal = manager.resolve(&jar_with(&token)).unwrap();
        assert_eq!(principal, alice());
    }

    #[test]
    fn flipped_payload_character_is_invalid() {
        let manager = manager();
        let token = manager.issue(&alice()).unwrap();

        let tampered = flip_char(&token, 0);
        assert_eq!(
            manager.resolve(&jar_with(&tampered)),
            Err(SessionError::InvalidSession)
        );
    }

    #[test]
    fn flipped_signature_character_is_invalid() {
        let manager = manager();
        let token = manager.issue(&alice()).unwrap();
        let signature_start = token.find('.').unwrap() + 1;

        for index in [signature_start, token.len() - 1] {
            let tampered = flip_char(&token, index);
            assert_eq!(
                manager.resolve(&jar_with(&tampered)),
                Err(SessionError::InvalidSession),
                "tampering at {index} must be rejected"
            );
        }
    }

    #[test]
    fn token_from_other_key_is_invalid() {
        let token = manager().issue(&alice()).unwrap();
        let other = SessionManager::new("another-secret-key-that-is-long-enough").unwrap();

        assert_eq!(
            other.resolve(&jar_with(&token)),
            Err(SessionError::InvalidSession)
        );
    }

    #[test]
    fn missing_cookie_is_no_session() {
        assert_eq!(
            manager().resolve(&CookieJar::new()),
            Err(SessionError::NoSession)
        );
    }

    #[test]
    fn malformed_tokens_are_invalid() {
        let manager = manager();
        let forged_payload = URL_SAFE_NO_PAD.encode(br#"{"test":"tampered"}"#);
        let unsigned = format!("{forged_payload}.{forged_payload}");

        for value in [
            "",
            "no-separator",
            "eyJ0ZXN0IjoidGFtcGVyZWQifQ==.invalidsignature",
            unsigned.as_str(),
            "!!!.???",
        ] {
            assert_eq!(
                manager.resolve(&jar_with(value)),
                Err(SessionError::InvalidSession),
                "{value:?} must be rejected"
            );
        }
    }

    #[test]
    fn signed_but_unparseable_payload_is_invalid() {
        let manager = manager();
        let payload_b64 = URL_SAFE_NO_PAD.encode(b"not json");
        let signature = manager.sign(&payload_b64).finalize().into_bytes();
        let token = format!("{}.{}", payload_b64, URL_SAFE_NO_PAD.encode(signature));

        assert_eq!(manager.decode(&token), Err(SessionError::InvalidSession));
    }

    #[test]
    fn short_or_missing_secret_is_rejected() {
        assert!(matches!(
            SessionManager::new(""),
            Err(AppError::Config(message)) if message.contains("required")
        ));
        assert!(matches!(
            SessionManager::new("too-short"),
            Err(AppError::Config(message)) if message.contains("at least 32")
        ));
    }

    #[test]
    fn session_cookie_attributes() {
        let cookie = manager()
            .with_secure_cookies(true)
            .session_cookie(&alice())
            .unwrap();

        assert_eq!(cookie.name(), SESSION_COOKIE_NAME);
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(
            cookie.max_age(),
            Some(time::Duration::seconds(DEFAULT_SESSION_MAX_AGE_SECONDS))
        );
    }

    #[test]
    fn revoke_clears_cookie() {
        let cookie = manager().revoke();

        assert_eq!(cookie.name(), SESSION_COOKIE_NAME);
        assert_eq!(cookie.value(), "");
        assert!(cookie.max_age().is_some_and(|age| age <= time::Duration::ZERO));
    }

    #[test]
    fn debug_output_hides_key() {
        let rendered = format!("{:?}", manager());
        assert!(!rendered.contains(SECRET));
    }
}
