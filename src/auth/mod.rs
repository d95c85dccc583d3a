//! Identity and credential handling.
//!
//! The pieces compose like this: [`callback::CallbackReconciler`] runs
//! the redirect flow, [`oauth`] talks to the provider,
//! [`store::CredentialStore`] persists the bundle, and
//! [`session::SessionResolver`] answers "who is the current user".
//! The functions here wire the production stack together for the CLI.

pub mod callback;
pub mod oauth;
pub mod session;
pub mod store;

pub use store::{CredentialStore, SqliteCredentialStore, TokenBundle};

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::config::IdentityConfig;
use callback::{CallbackContext, CallbackOutcome, CallbackReconciler, TokenEndpointExchanger};
use session::{DirectSession, NormalizedUser, SessionResolver};

fn open_store(db_path: &str) -> Result<Arc<dyn CredentialStore>> {
    let store =
        SqliteCredentialStore::open(db_path).context("failed to open credential store")?;
    Ok(Arc::new(store))
}

fn resolver(
    store: Arc<dyn CredentialStore>,
    config: &IdentityConfig,
    direct: Arc<DirectSession>,
) -> Arc<SessionResolver> {
    Arc::new(SessionResolver::standard(store, config.clone(), direct))
}

/// The `scheme://host[:port]` part of a URL.
fn origin_of(url: &str) -> &str {
    match url.find("://") {
        Some(scheme_end) => {
            let rest = &url[scheme_end + 3..];
            match rest.find('/') {
                Some(path) => &url[..scheme_end + 3 + path],
                None => url,
            }
        }
        None => url,
    }
}

/// Complete a hosted login from the redirect URL the user landed on:
/// run the callback reconciler against the production stack.
///
/// This is the shared logic behind `trove login` and `trove callback`.
pub async fn login(
    db_path: &str,
    config: &IdentityConfig,
    redirect_url: &str,
) -> Result<CallbackOutcome> {
    let store = open_store(db_path)?;
    let exchanger = Arc::new(TokenEndpointExchanger::new(config.clone()));
    let login = resolver(store.clone(), config, Arc::new(DirectSession::new()));
    let reconciler = CallbackReconciler::new(exchanger, store, login, config.clone());

    let ctx = CallbackContext::from_url(redirect_url);
    Ok(reconciler.reconcile(&ctx, origin_of(redirect_url)).await)
}

/// Direct username/password login against the same identity pool.
/// Persists the bundle and resolves the signed-in user.
pub async fn login_direct(
    db_path: &str,
    config: &IdentityConfig,
    username: &str,
    password: &str,
) -> Result<Option<NormalizedUser>> {
    let bundle = oauth::sign_in(config, username, password)
        .await
        .context("direct sign-in failed")?;

    let store = open_store(db_path)?;
    store.set(&bundle).context("failed to save credentials")?;

    let direct = Arc::new(DirectSession::from_bundle(bundle));
    let resolver = resolver(store, config, direct);
    Ok(resolver.resolve().await?)
}

/// Remove all stored credentials.
pub fn logout(db_path: &str) -> Result<()> {
    let store = open_store(db_path)?;
    store.clear().context("failed to remove credentials")
}

/// Resolve the current user from whatever session is live.
pub async fn whoami(db_path: &str, config: &IdentityConfig) -> Result<Option<NormalizedUser>> {
    let store = open_store(db_path)?;
    let resolver = resolver(store, config, Arc::new(DirectSession::new()));
    Ok(resolver.resolve().await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_of_strips_path() {
        assert_eq!(
            origin_of("https://www.trove.eco/auth/callback?code=x"),
            "https://www.trove.eco"
        );
        assert_eq!(
            origin_of("http://localhost:5173/auth/callback"),
            "http://localhost:5173"
        );
        assert_eq!(origin_of("https://www.trove.eco"), "https://www.trove.eco");
    }
}
