//! Project-wide constants.

use std::path::PathBuf;
use std::time::Duration;

pub const AUTHOR: &str = env!("CARGO_PKG_AUTHORS");
pub const HOMEPAGE: &str = env!("CARGO_PKG_HOMEPAGE");
pub const REPO: &str = env!("CARGO_PKG_REPOSITORY");

/// Persisted storage keys for the credential bundle.
pub const ACCESS_TOKEN_KEY: &str = "access_token";
pub const ID_TOKEN_KEY: &str = "id_token";
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";

/// Landing route for administrators after a successful login.
pub const ADMIN_LANDING_ROUTE: &str = "/admin";
/// Landing route for everyone else.
pub const GENERAL_LANDING_ROUTE: &str = "/";
/// Login route with the failure indicator appended.
pub const LOGIN_FAILURE_ROUTE: &str = "/login?error=oauth_failed";

/// Pause between token persistence and identity resolution, letting
/// dependent caches pick up the freshly written bundle.
pub const SETTLE_DELAY: Duration = Duration::from_millis(100);
/// How long the error panel stays up before redirecting to login.
pub const ERROR_REDIRECT_DELAY: Duration = Duration::from_secs(4);

/// Identity provider defaults. Every one of these can be overridden via
/// the environment — see [`IdentityConfig`](crate::config::IdentityConfig).
pub const DEFAULT_CLIENT_ID: &str = "5k2m3f8q1p7r9t4v6w8x0y2z4b";
pub const DEFAULT_AUTHORIZE_URL: &str = "https://auth.trove.eco/oauth2/authorize";
pub const DEFAULT_TOKEN_URL: &str = "https://auth.trove.eco/oauth2/token";
pub const DEFAULT_POOL_URL: &str = "https://cognito-idp.eu-west-1.amazonaws.com/";
pub const DEFAULT_SCOPES: &str = "openid email profile";

/// Hostname marker that identifies the production deployment.
pub const PRODUCTION_HOST: &str = "trove.eco";
/// The two redirect URIs registered with the identity provider.
pub const PRODUCTION_REDIRECT_URI: &str = "https://www.trove.eco/auth/callback";
pub const LOCAL_REDIRECT_URI: &str = "http://localhost:5173/auth/callback";

/// Default database path: `~/.trove/trove.db`.
/// Use `:memory:` for ephemeral runs.
pub fn default_db_path() -> PathBuf {
    dirs::home_dir()
        .expect("cannot determine home directory")
        .join(".trove")
        .join("trove.db")
}
