//! Identity provider configuration.
//!
//! The application is registered with the provider under exactly two
//! redirect URIs (production and local development). Which one applies
//! is decided by matching the current origin against the production
//! hostname marker — see [`IdentityConfig::redirect_uri_for`]. All
//! fields default to the values in [`crate::consts`] and can be
//! overridden through `TROVE_*` environment variables.

use crate::consts;

/// Everything the auth subsystem needs to know about the provider.
#[derive(Debug, Clone)]
pub struct IdentityConfig {
    /// OAuth2 client identifier.
    pub client_id: String,
    /// Hosted-login authorization endpoint.
    pub authorize_url: String,
    /// Token endpoint (code exchange and refresh grants).
    pub token_url: String,
    /// Identity pool API endpoint (direct username/password sign-in).
    pub pool_url: String,
    /// Scopes requested during the hosted login.
    pub scopes: String,
    /// Hostname substring identifying the production deployment.
    pub production_host: String,
    /// Redirect URI registered for production.
    pub production_redirect_uri: String,
    /// Redirect URI registered for local development.
    pub local_redirect_uri: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            client_id: consts::DEFAULT_CLIENT_ID.to_string(),
            authorize_url: consts::DEFAULT_AUTHORIZE_URL.to_string(),
            token_url: consts::DEFAULT_TOKEN_URL.to_string(),
            pool_url: consts::DEFAULT_POOL_URL.to_string(),
            scopes: consts::DEFAULT_SCOPES.to_string(),
            production_host: consts::PRODUCTION_HOST.to_string(),
            production_redirect_uri: consts::PRODUCTION_REDIRECT_URI.to_string(),
            local_redirect_uri: consts::LOCAL_REDIRECT_URI.to_string(),
        }
    }
}

impl IdentityConfig {
    /// Defaults overlaid with any `TROVE_*` environment overrides.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        override_from_env(&mut config.client_id, "TROVE_CLIENT_ID");
        override_from_env(&mut config.authorize_url, "TROVE_AUTHORIZE_URL");
        override_from_env(&mut config.token_url, "TROVE_TOKEN_URL");
        override_from_env(&mut config.pool_url, "TROVE_POOL_URL");
        override_from_env(&mut config.scopes, "TROVE_SCOPES");
        override_from_env(&mut config.production_host, "TROVE_PRODUCTION_HOST");
        override_from_env(
            &mut config.production_redirect_uri,
            "TROVE_REDIRECT_URI_PROD",
        );
        override_from_env(&mut config.local_redirect_uri, "TROVE_REDIRECT_URI_LOCAL");
        config
    }

    /// Pick the registered redirect URI for the given page origin.
    ///
    /// The exchange fails unless this exactly matches the URI used when
    /// the authorization request was initiated, so the same selection
    /// must be applied on both legs of the flow.
    pub fn redirect_uri_for(&self, origin: &str) -> &str {
        if origin.contains(&self.production_host) {
            &self.production_redirect_uri
        } else {
            &self.local_redirect_uri
        }
    }
}

fn override_from_env(field: &mut String, var: &str) {
    if let Ok(value) = std::env::var(var)
        && !value.is_empty()
    {
        *field = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_consts() {
        let config = IdentityConfig::default();
        assert_eq!(config.client_id, consts::DEFAULT_CLIENT_ID);
        assert_eq!(config.token_url, consts::DEFAULT_TOKEN_URL);
    }

    #[test]
    fn production_origin_selects_production_uri() {
        let config = IdentityConfig::default();
        assert_eq!(
            config.redirect_uri_for("https://www.trove.eco"),
            consts::PRODUCTION_REDIRECT_URI
        );
    }

    #[test]
    fn unknown_origin_falls_back_to_local_uri() {
        let config = IdentityConfig::default();
        assert_eq!(
            config.redirect_uri_for("http://localhost:5173"),
            consts::LOCAL_REDIRECT_URI
        );
        assert_eq!(
            config.redirect_uri_for("https://staging.example.com"),
            consts::LOCAL_REDIRECT_URI
        );
    }

    #[test]
    fn env_override_replaces_field() {
        unsafe { std::env::set_var("TROVE_CLIENT_ID", "override-client") };
        let config = IdentityConfig::from_env();
        assert_eq!(config.client_id, "override-client");
        unsafe { std::env::remove_var("TROVE_CLIENT_ID") };
    }

    #[test]
    fn empty_env_override_is_ignored() {
        unsafe { std::env::set_var("TROVE_TOKEN_URL", "") };
        let config = IdentityConfig::from_env();
        assert_eq!(config.token_url, consts::DEFAULT_TOKEN_URL);
        unsafe { std::env::remove_var("TROVE_TOKEN_URL") };
    }
}
