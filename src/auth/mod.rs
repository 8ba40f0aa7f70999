//! GitHub OAuth authentication
//!
//! Handles:
//! - GitHub OAuth flow
//! - Session management
//! - Authentication middleware

pub mod github;
mod middleware;
pub mod oauth;
pub mod session;

pub use github::{GitHubProvider, GitHubUser, IdentityProvider};
pub use middleware::{CurrentUser, MaybeUser, require_auth, require_auth_redirect};
pub use oauth::{CallbackQuery, CompletedLogin, LoginFlow, LoginRedirect, auth_router};
pub use session::{Principal, SESSION_COOKIE_NAME, SessionError, SessionManager};
