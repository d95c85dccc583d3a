//! OAuth callback reconciliation.
//!
//! When the application lands on the redirect URI it runs
//! [`CallbackReconciler::reconcile`] exactly as written here:
//! parse the query once, dedupe against the processed-code marker,
//! exchange the code, persist the tokens, resolve the identity, and
//! decide where to navigate. The entry point is safely re-entrant for
//! identical inputs — render frameworks are known to invoke their
//! effect bodies twice, and authorization codes are single-use.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::auth::oauth::{self, ExchangeError};
use crate::auth::session::{NormalizedUser, SessionError};
use crate::auth::store::{CredentialStore, TokenBundle};
use crate::config::IdentityConfig;
use crate::consts::{
    ADMIN_LANDING_ROUTE, ERROR_REDIRECT_DELAY, GENERAL_LANDING_ROUTE, LOGIN_FAILURE_ROUTE,
    SETTLE_DELAY,
};

/// Query parameters of one redirect-URI visit, parsed once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackContext {
    pub code: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl CallbackContext {
    /// Parse the standard OAuth2 authorization-response parameters out
    /// of a full redirect URL.
    pub fn from_url(url: &str) -> Self {
        let without_fragment = url.split('#').next().unwrap_or(url);
        match without_fragment.split_once('?') {
            Some((_, query)) => Self::from_query(query),
            None => Self::default(),
        }
    }

    /// Parse a bare query string (`code=...&state=...`).
    pub fn from_query(query: &str) -> Self {
        let mut ctx = Self::default();
        for pair in query.split('&') {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            if value.is_empty() {
                continue;
            }
            let value = percent_decode(value);
            match key {
                "code" => ctx.code = Some(value),
                "error" => ctx.error = Some(value),
                "error_description" => ctx.error_description = Some(value),
                _ => {}
            }
        }
        ctx
    }
}

/// Decode `%XX` escapes and `+` in a query-string value.
fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
                match hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                    Some(byte) => {
                        out.push(byte);
                        i += 3;
                    }
                    None => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            other => {
                out.push(other);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Terminal failures of the reconciliation flow.
///
/// None of these are retried automatically: the authorization code is
/// single-use, so the only recovery is the user re-initiating login.
#[derive(Debug, thiserror::Error)]
pub enum CallbackError {
    /// The provider redirected back with `error`/`error_description`.
    #[error("provider returned {error}")]
    Provider {
        error: String,
        description: Option<String>,
    },
    /// Neither `code` nor `error` in the redirect — malformed.
    #[error("no authorization code in the redirect")]
    MissingCode,
    /// Network failure or provider rejection during the exchange.
    #[error("token exchange failed")]
    ExchangeFailed(#[source] ExchangeError),
    /// Exchange succeeded but the response carried no ID token.
    #[error("token response carried no ID token")]
    MissingIdToken,
    /// Tokens came back fine but could not be written locally.
    #[error("failed to persist tokens")]
    PersistFailed(#[source] anyhow::Error),
}

impl CallbackError {
    /// Human-readable reason for the error panel. Prefers the
    /// provider's `error_description` over the raw error code.
    pub fn user_message(&self) -> String {
        match self {
            CallbackError::Provider { error, description } => {
                description.clone().unwrap_or_else(|| error.clone())
            }
            other => other.to_string(),
        }
    }
}

/// Where the flow ends up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Navigation {
    AdminLanding,
    GeneralLanding,
    LoginWithError,
}

impl Navigation {
    pub fn route(self) -> &'static str {
        match self {
            Navigation::AdminLanding => ADMIN_LANDING_ROUTE,
            Navigation::GeneralLanding => GENERAL_LANDING_ROUTE,
            Navigation::LoginWithError => LOGIN_FAILURE_ROUTE,
        }
    }

    fn for_user(user: Option<&NormalizedUser>) -> Self {
        match user {
            Some(user) if user.is_admin() => Navigation::AdminLanding,
            _ => Navigation::GeneralLanding,
        }
    }
}

/// The result of one reconciliation run.
#[derive(Debug)]
pub enum CallbackOutcome {
    /// Flow completed; navigate to the landing route.
    Navigated(Navigation),
    /// Terminal failure; show the reason, then redirect to login after
    /// the delay.
    Failed {
        error: CallbackError,
        redirect: Navigation,
        redirect_after: Duration,
    },
}

impl CallbackOutcome {
    pub fn navigation(&self) -> Navigation {
        match self {
            CallbackOutcome::Navigated(nav) => *nav,
            CallbackOutcome::Failed { redirect, .. } => *redirect,
        }
    }
}

/// The code→token exchange, injectable so tests can count invocations.
#[async_trait]
pub trait CodeExchanger: Send + Sync {
    async fn exchange(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenBundle, ExchangeError>;
}

/// Production exchanger hitting the provider token endpoint.
pub struct TokenEndpointExchanger {
    config: IdentityConfig,
}

impl TokenEndpointExchanger {
    pub fn new(config: IdentityConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl CodeExchanger for TokenEndpointExchanger {
    async fn exchange(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenBundle, ExchangeError> {
        oauth::exchange_code(&self.config, code, redirect_uri).await
    }
}

/// The application-level login collaborator: re-resolves the current
/// user after tokens were persisted. Production implementation is
/// [`SessionResolver`](crate::auth::session::SessionResolver).
#[async_trait]
pub trait LoginCallback: Send + Sync {
    async fn login(&self) -> Result<Option<NormalizedUser>, SessionError>;
}

/// Orchestrates one callback-page visit.
pub struct CallbackReconciler {
    exchanger: Arc<dyn CodeExchanger>,
    store: Arc<dyn CredentialStore>,
    login: Arc<dyn LoginCallback>,
    config: IdentityConfig,
    /// Most recently exchanged code. Checked and set with no await in
    /// between, which is what makes duplicate invocation safe.
    processed_code: Mutex<Option<String>>,
    settle_delay: Duration,
}

impl CallbackReconciler {
    pub fn new(
        exchanger: Arc<dyn CodeExchanger>,
        store: Arc<dyn CredentialStore>,
        login: Arc<dyn LoginCallback>,
        config: IdentityConfig,
    ) -> Self {
        Self {
            exchanger,
            store,
            login,
            config,
            processed_code: Mutex::new(None),
            settle_delay: SETTLE_DELAY,
        }
    }

    /// Override the settle delay (tests use zero).
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Drive the whole flow for one redirect-URI visit.
    ///
    /// `origin` is the page origin the redirect landed on; it selects
    /// which registered redirect URI to present at the exchange.
    pub async fn reconcile(&self, ctx: &CallbackContext, origin: &str) -> CallbackOutcome {
        if let Some(error) = &ctx.error {
            return self.fail(CallbackError::Provider {
                error: error.clone(),
                description: ctx.error_description.clone(),
            });
        }
        let Some(code) = &ctx.code else {
            return self.fail(CallbackError::MissingCode);
        };

        // Duplicate-invocation guard. Synchronous: nothing may await
        // between the comparison and the marker write.
        {
            let mut marker = self.processed_code.lock().unwrap();
            if marker.as_deref() == Some(code.as_str()) {
                debug!("authorization code already being processed, skipping exchange");
                return CallbackOutcome::Navigated(Navigation::GeneralLanding);
            }
            *marker = Some(code.clone());
        }

        let redirect_uri = self.config.redirect_uri_for(origin);
        let bundle = match self.exchanger.exchange(code, redirect_uri).await {
            Ok(bundle) => bundle,
            Err(e) => return self.fail(CallbackError::ExchangeFailed(e)),
        };
        if !bundle.has_id_token() {
            return self.fail(CallbackError::MissingIdToken);
        }

        if let Err(e) = self.store.set(&bundle) {
            return self.fail(CallbackError::PersistFailed(e));
        }
        // The code has done its job; clearing keeps the marker from
        // blocking a legitimately fresh code later.
        self.processed_code.lock().unwrap().take();
        info!("tokens persisted after code exchange");

        // Let token persistence propagate to dependent caches.
        if !self.settle_delay.is_zero() {
            tokio::time::sleep(self.settle_delay).await;
        }

        // Tokens are already valid and persisted, so a failed identity
        // lookup does not fail the flow — it only costs role-aware
        // navigation.
        let user = match self.login.login().await {
            Ok(user) => user,
            Err(e) => {
                warn!("identity resolution failed after token persistence: {e}");
                None
            }
        };

        CallbackOutcome::Navigated(Navigation::for_user(user.as_ref()))
    }

    fn fail(&self, error: CallbackError) -> CallbackOutcome {
        // Drop the marker so a retry from scratch is possible.
        self.processed_code.lock().unwrap().take();
        warn!("callback reconciliation failed: {error}");
        CallbackOutcome::Failed {
            error,
            redirect: Navigation::LoginWithError,
            redirect_after: ERROR_REDIRECT_DELAY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_code_from_url() {
        let ctx = CallbackContext::from_url("https://www.trove.eco/auth/callback?code=abc123");
        assert_eq!(ctx.code.as_deref(), Some("abc123"));
        assert!(ctx.error.is_none());
    }

    #[test]
    fn parses_error_pair() {
        let ctx = CallbackContext::from_query(
            "error=access_denied&error_description=User+cancelled",
        );
        assert!(ctx.code.is_none());
        assert_eq!(ctx.error.as_deref(), Some("access_denied"));
        assert_eq!(ctx.error_description.as_deref(), Some("User cancelled"));
    }

    #[test]
    fn percent_escapes_are_decoded() {
        let ctx = CallbackContext::from_query("error_description=Too%20many%20attempts%21");
        assert_eq!(
            ctx.error_description.as_deref(),
            Some("Too many attempts!")
        );
    }

    #[test]
    fn empty_values_count_as_absent() {
        let ctx = CallbackContext::from_query("code=&error=");
        assert!(ctx.code.is_none());
        assert!(ctx.error.is_none());
    }

    #[test]
    fn unknown_params_are_ignored() {
        let ctx = CallbackContext::from_query("code=x&state=y&session_state=z");
        assert_eq!(ctx.code.as_deref(), Some("x"));
    }

    #[test]
    fn url_without_query_is_empty_context() {
        assert_eq!(
            CallbackContext::from_url("https://www.trove.eco/auth/callback"),
            CallbackContext::default()
        );
    }

    #[test]
    fn fragment_is_not_parsed() {
        let ctx = CallbackContext::from_url("https://x/cb?code=real#code=fake");
        assert_eq!(ctx.code.as_deref(), Some("real"));
    }

    #[test]
    fn truncated_escape_is_kept_literally() {
        assert_eq!(percent_decode("abc%2"), "abc%2");
        assert_eq!(percent_decode("abc%"), "abc%");
        assert_eq!(percent_decode("%zz"), "%zz");
    }

    #[test]
    fn navigation_routes() {
        assert_eq!(Navigation::AdminLanding.route(), ADMIN_LANDING_ROUTE);
        assert_eq!(Navigation::GeneralLanding.route(), GENERAL_LANDING_ROUTE);
        assert_eq!(Navigation::LoginWithError.route(), LOGIN_FAILURE_ROUTE);
    }

    #[test]
    fn user_message_prefers_description() {
        let err = CallbackError::Provider {
            error: "access_denied".to_string(),
            description: Some("User cancelled".to_string()),
        };
        assert_eq!(err.user_message(), "User cancelled");

        let err = CallbackError::Provider {
            error: "access_denied".to_string(),
            description: None,
        };
        assert_eq!(err.user_message(), "access_denied");
    }
}
