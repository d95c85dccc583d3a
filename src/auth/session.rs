//! Session readers: who is the current user?
//!
//! Two credential sources answer that question — the federated session
//! left behind by the hosted-login flow, and a direct username/password
//! session. Both implement [`SessionSource`] and are consulted in
//! priority order by [`SessionResolver`]: provider first, direct
//! second, first non-absent answer wins. A federated login always
//! supersedes a stale direct-login artifact because the callback flow
//! that just ran is federated.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::auth::callback::LoginCallback;
use crate::auth::oauth::{self, ExchangeError};
use crate::auth::store::{CredentialStore, TokenBundle};
use crate::config::IdentityConfig;
use crate::consts::{ID_TOKEN_KEY, REFRESH_TOKEN_KEY};

/// Platform role carried in the identity pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Admin,
}

/// User attributes normalized across both session sources.
///
/// Derived on demand, never persisted. `subject` is always present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedUser {
    /// Stable provider-issued identifier (`sub`).
    pub subject: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub email_verified: Option<bool>,
    pub role: Option<Role>,
}

impl NormalizedUser {
    pub fn is_admin(&self) -> bool {
        self.role == Some(Role::Admin)
    }
}

/// A reader failed for real — not "simply not logged in", which is
/// reported as `Ok(None)` instead.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session backend unavailable: {0}")]
    Unavailable(String),
}

/// One source of identity. Closed set: provider and direct.
#[async_trait]
pub trait SessionSource: Send + Sync {
    async fn resolve_current_user(&self) -> Result<Option<NormalizedUser>, SessionError>;
}

#[derive(Deserialize)]
struct IdTokenClaims {
    sub: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    email_verified: Option<bool>,
    #[serde(default, rename = "cognito:groups")]
    groups: Vec<String>,
}

/// Decode the payload of an ID token into a [`NormalizedUser`].
///
/// No signature or expiry check happens here: a stored ID token is
/// assumed valid until the next write, and the provider re-validates at
/// request time. Returns `None` for anything that does not parse.
pub fn decode_id_token(token: &str) -> Option<NormalizedUser> {
    let mut parts = token.split('.');
    let (Some(_header), Some(payload), Some(_sig), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return None;
    };

    let json = URL_SAFE_NO_PAD.decode(payload).ok()?;
    let claims: IdTokenClaims = serde_json::from_slice(&json).ok()?;

    let role = if claims.groups.iter().any(|g| g == "ADMIN") {
        Some(Role::Admin)
    } else if claims.groups.iter().any(|g| g == "USER") {
        Some(Role::User)
    } else {
        None
    };

    Some(NormalizedUser {
        subject: claims.sub,
        email: claims.email,
        display_name: claims.name,
        email_verified: claims.email_verified,
        role,
    })
}

/// Federated session reader, backed by the credential store.
///
/// If only a refresh token remains (ID token cleared or never written),
/// it performs a silent refresh and writes the fresh bundle back, so
/// the store stays consistent with the live provider session.
pub struct ProviderSession {
    store: Arc<dyn CredentialStore>,
    config: IdentityConfig,
}

impl ProviderSession {
    pub fn new(store: Arc<dyn CredentialStore>, config: IdentityConfig) -> Self {
        Self { store, config }
    }

    async fn silent_refresh(&self, refresh: String) -> Result<Option<NormalizedUser>, SessionError> {
        let mut bundle = match oauth::refresh_tokens(&self.config, &refresh).await {
            Ok(bundle) => bundle,
            Err(ExchangeError::Rejected(msg)) => {
                // Revoked or expired refresh token: no live session.
                debug!("silent refresh rejected: {msg}");
                return Ok(None);
            }
            Err(ExchangeError::Transport(e)) => {
                return Err(SessionError::Unavailable(e.to_string()));
            }
        };
        if !bundle.has_id_token() {
            return Ok(None);
        }
        // The refresh grant does not rotate the refresh token.
        if bundle.refresh_token.is_none() {
            bundle.refresh_token = Some(refresh);
        }
        self.store
            .set(&bundle)
            .map_err(|e| SessionError::Unavailable(e.to_string()))?;
        Ok(bundle.id_token.as_deref().and_then(decode_id_token))
    }
}

#[async_trait]
impl SessionSource for ProviderSession {
    async fn resolve_current_user(&self) -> Result<Option<NormalizedUser>, SessionError> {
        let id_token = self
            .store
            .get(ID_TOKEN_KEY)
            .map_err(|e| SessionError::Unavailable(e.to_string()))?;

        if let Some(token) = id_token {
            match decode_id_token(&token) {
                Some(user) => return Ok(Some(user)),
                None => {
                    warn!("stored ID token is not decodable, ignoring it");
                    return Ok(None);
                }
            }
        }

        let refresh = self
            .store
            .get(REFRESH_TOKEN_KEY)
            .map_err(|e| SessionError::Unavailable(e.to_string()))?;
        match refresh {
            Some(refresh) => self.silent_refresh(refresh).await,
            None => Ok(None),
        }
    }
}

/// Direct username/password session, held in memory for the lifetime
/// of the process. Consulted only when the provider session is absent.
#[derive(Default)]
pub struct DirectSession {
    tokens: Mutex<Option<TokenBundle>>,
}

impl DirectSession {
    /// An empty session: resolves to no user until [`install`](Self::install).
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bundle(bundle: TokenBundle) -> Self {
        Self {
            tokens: Mutex::new(Some(bundle)),
        }
    }

    /// Adopt the bundle of a successful direct sign-in.
    pub fn install(&self, bundle: TokenBundle) {
        *self.tokens.lock().unwrap() = Some(bundle);
    }
}

#[async_trait]
impl SessionSource for DirectSession {
    async fn resolve_current_user(&self) -> Result<Option<NormalizedUser>, SessionError> {
        let tokens = self.tokens.lock().unwrap();
        let Some(bundle) = tokens.as_ref() else {
            return Ok(None);
        };
        Ok(bundle.id_token.as_deref().and_then(decode_id_token))
    }
}

/// Priority-ordered resolution over the session sources.
pub struct SessionResolver {
    sources: Vec<Arc<dyn SessionSource>>,
}

impl SessionResolver {
    /// Sources in resolution order; the first non-absent result wins.
    pub fn new(sources: Vec<Arc<dyn SessionSource>>) -> Self {
        Self { sources }
    }

    /// Provider → direct, the standard ordering.
    pub fn standard(
        store: Arc<dyn CredentialStore>,
        config: IdentityConfig,
        direct: Arc<DirectSession>,
    ) -> Self {
        Self::new(vec![
            Arc::new(ProviderSession::new(store, config)),
            direct,
        ])
    }

    pub async fn resolve(&self) -> Result<Option<NormalizedUser>, SessionError> {
        for source in &self.sources {
            if let Some(user) = source.resolve_current_user().await? {
                return Ok(Some(user));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl LoginCallback for SessionResolver {
    async fn login(&self) -> Result<Option<NormalizedUser>, SessionError> {
        self.resolve().await
    }
}
