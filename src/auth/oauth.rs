//! Token acquisition against the identity provider.
//!
//! Three grants live here: the authorization-code exchange driven by the
//! callback reconciler, the silent refresh used by the provider session
//! reader, and the direct username/password sign-in against the same
//! identity pool. None of them touch the credential store — persisting
//! the returned bundle is the caller's job.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngExt;
use serde::Deserialize;

use crate::auth::store::TokenBundle;
use crate::config::IdentityConfig;

/// Why a token request failed.
#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    /// The provider refused the grant (code already used, expired,
    /// redirect mismatch, bad credentials).
    #[error("provider rejected the request: {0}")]
    Rejected(String),
    /// The request never got a usable answer.
    #[error("transport failure during token request")]
    Transport(#[from] reqwest::Error),
}

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    id_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
}

impl From<TokenResponse> for TokenBundle {
    fn from(resp: TokenResponse) -> Self {
        TokenBundle {
            access_token: resp.access_token,
            id_token: resp.id_token,
            refresh_token: resp.refresh_token,
        }
    }
}

/// Build the hosted-login authorization URL for the user to visit.
///
/// `redirect_uri` must be one of the two registered URIs, and the same
/// one must be passed to [`exchange_code`] afterwards. The `state`
/// parameter is a fresh random nonce on every call.
pub fn build_authorize_url(config: &IdentityConfig, redirect_uri: &str) -> String {
    let mut rng = rand::rng();
    let bytes: [u8; 32] = rng.random();
    let state = URL_SAFE_NO_PAD.encode(bytes);

    let params = [
        ("client_id", config.client_id.as_str()),
        ("response_type", "code"),
        ("redirect_uri", redirect_uri),
        ("scope", config.scopes.as_str()),
        ("state", &state),
    ];

    let query = params
        .iter()
        .map(|(k, v)| format!("{}={}", k, urlencoded(v)))
        .collect::<Vec<_>>()
        .join("&");

    format!("{}?{}", config.authorize_url, query)
}

/// Exchange a one-time authorization code for tokens.
///
/// Codes are single-use: a second attempt with the same code is
/// guaranteed to be rejected, so callers must deduplicate before
/// calling this.
pub async fn exchange_code(
    config: &IdentityConfig,
    code: &str,
    redirect_uri: &str,
) -> Result<TokenBundle, ExchangeError> {
    let params = [
        ("grant_type", "authorization_code"),
        ("client_id", config.client_id.as_str()),
        ("code", code),
        ("redirect_uri", redirect_uri),
    ];
    token_request(&config.token_url, &params).await
}

/// Mint fresh tokens from a refresh token.
///
/// The provider does not rotate the refresh token on this grant, so the
/// returned bundle usually has `refresh_token: None` — callers keep the
/// one they already hold.
pub async fn refresh_tokens(
    config: &IdentityConfig,
    refresh_token: &str,
) -> Result<TokenBundle, ExchangeError> {
    let params = [
        ("grant_type", "refresh_token"),
        ("client_id", config.client_id.as_str()),
        ("refresh_token", refresh_token),
    ];
    token_request(&config.token_url, &params).await
}

async fn token_request(
    url: &str,
    params: &[(&str, &str)],
) -> Result<TokenBundle, ExchangeError> {
    let client = reqwest::Client::new();
    let resp = client.post(url).form(params).send().await?;

    if !resp.status().is_success() {
        let text = resp.text().await.unwrap_or_default();
        return Err(ExchangeError::Rejected(text));
    }

    let data: TokenResponse = resp.json().await?;
    Ok(data.into())
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InitiateAuthResponse {
    #[serde(default)]
    authentication_result: Option<AuthenticationResult>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AuthenticationResult {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    id_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// Direct username/password sign-in against the identity pool.
///
/// Same pool as the hosted flow, no redirect involved. Additional auth
/// challenges (MFA, forced password reset) are not supported here and
/// surface as a rejection.
pub async fn sign_in(
    config: &IdentityConfig,
    username: &str,
    password: &str,
) -> Result<TokenBundle, ExchangeError> {
    let body = serde_json::json!({
        "AuthFlow": "USER_PASSWORD_AUTH",
        "ClientId": config.client_id,
        "AuthParameters": {
            "USERNAME": username,
            "PASSWORD": password,
        },
    });

    let client = reqwest::Client::new();
    let resp = client
        .post(&config.pool_url)
        .header("Content-Type", "application/x-amz-json-1.1")
        .header("X-Amz-Target", "AWSCognitoIdentityProviderService.InitiateAuth")
        .json(&body)
        .send()
        .await?;

    if !resp.status().is_success() {
        let text = resp.text().await.unwrap_or_default();
        return Err(ExchangeError::Rejected(text));
    }

    let data: InitiateAuthResponse = resp.json().await?;
    let Some(result) = data.authentication_result else {
        return Err(ExchangeError::Rejected(
            "sign-in answered with a challenge instead of tokens".to_string(),
        ));
    };

    Ok(TokenBundle {
        access_token: result.access_token,
        id_token: result.id_token,
        refresh_token: result.refresh_token,
    })
}

/// Minimal URL encoding for query parameters.
fn urlencoded(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char);
            }
            _ => {
                out.push_str(&format!("%{:02X}", b));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authorize_url_carries_required_params() {
        let config = IdentityConfig::default();
        let url = build_authorize_url(&config, &config.local_redirect_uri);

        assert!(url.starts_with(&config.authorize_url));
        assert!(url.contains("response_type=code"));
        assert!(url.contains(&format!("client_id={}", config.client_id)));
        assert!(url.contains("scope=openid%20email%20profile"));
        assert!(url.contains("state="));
    }

    #[test]
    fn authorize_url_is_unique_per_call() {
        let config = IdentityConfig::default();
        let url1 = build_authorize_url(&config, &config.local_redirect_uri);
        let url2 = build_authorize_url(&config, &config.local_redirect_uri);
        assert_ne!(url1, url2);
    }

    #[test]
    fn urlencoded_passes_safe_chars() {
        assert_eq!(urlencoded("abc-XYZ_0.9~"), "abc-XYZ_0.9~");
    }

    #[test]
    fn urlencoded_escapes_the_rest() {
        assert_eq!(urlencoded("a b"), "a%20b");
        assert_eq!(urlencoded("a/b?c=d"), "a%2Fb%3Fc%3Dd");
    }

    #[test]
    fn token_response_maps_to_bundle() {
        let resp: TokenResponse = serde_json::from_str(
            r#"{"access_token":"A","id_token":"I","refresh_token":"R","expires_in":3600}"#,
        )
        .unwrap();
        let bundle = TokenBundle::from(resp);
        assert_eq!(bundle.access_token.as_deref(), Some("A"));
        assert_eq!(bundle.id_token.as_deref(), Some("I"));
        assert_eq!(bundle.refresh_token.as_deref(), Some("R"));
    }

    #[test]
    fn token_response_tolerates_missing_fields() {
        let resp: TokenResponse = serde_json::from_str(r#"{"access_token":"A"}"#).unwrap();
        let bundle = TokenBundle::from(resp);
        assert!(!bundle.has_id_token());
        assert!(bundle.refresh_token.is_none());
    }
}
