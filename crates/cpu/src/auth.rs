//! Service-account OAuth2 token minting for the stable-cloud provider.
//!
//! The provider authenticates the way a GCP service account does outside
//! of a metadata-server environment: sign a short-lived JWT with the
//! account's RSA private key, then exchange it at the token endpoint for
//! a bearer access token (RFC 7523, the `urn:ietf:params:oauth:grant-type:jwt-bearer`
//! grant). Tokens are cached and refreshed a minute before expiry so a
//! burst of calls doesn't re-mint on every request.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::providers::traits::CpuProviderError;

const COMPUTE_SCOPE: &str = "https://www.googleapis.com/auth/compute";
const TOKEN_TTL_SECS: i64 = 3600;
/// Refresh this many seconds before the cached token actually expires.
const REFRESH_SKEW_SECS: i64 = 60;

/// A GCP service-account key file, as downloaded from the IAM console.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub project_id: String,
    pub private_key: String,
    pub client_email: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

impl ServiceAccountKey {
    /// Load and parse a service-account JSON key file.
    ///
    /// # Errors
    /// Returns [`CpuProviderError::Config`] if the file cannot be read or
    /// does not parse as a service-account key.
    pub fn load_from_path(path: &Path) -> Result<Self, CpuProviderError> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            CpuProviderError::Config(format!(
                "could not read service account key at {}: {e}",
                path.display()
            ))
        })?;
        serde_json::from_str(&contents).map_err(|e| {
            CpuProviderError::Config(format!("invalid service account key JSON: {e}"))
        })
    }
}

#[derive(Debug, Serialize)]
struct Claims {
    iss: String,
    scope: String,
    aud: String,
    iat: i64,
    exp: i64,
}

struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    TOKEN_TTL_SECS
}

/// Mints and caches OAuth2 access tokens for a single service account.
pub struct TokenProvider {
    key: ServiceAccountKey,
    http: reqwest::Client,
    cached: RwLock<Option<CachedToken>>,
}

impl TokenProvider {
    #[must_use]
    pub fn new(key: ServiceAccountKey) -> Self {
        Self {
            key,
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(15))
                .build()
                .expect("reqwest client builds with default TLS config"),
            cached: RwLock::new(None),
        }
    }

    #[must_use]
    pub fn project_id(&self) -> &str {
        &self.key.project_id
    }

    /// Return a valid bearer access token, minting a fresh one if the
    /// cache is empty or within [`REFRESH_SKEW_SECS`] of expiry.
    ///
    /// # Errors
    /// Returns [`CpuProviderError::Credential`] if the JWT cannot be
    /// signed, or the token exchange request fails.
    pub async fn access_token(&self) -> Result<String, CpuProviderError> {
        {
            let guard = self.cached.read().await;
            if let Some(cached) = guard.as_ref() {
                if cached.expires_at - chrono::Duration::seconds(REFRESH_SKEW_SECS) > Utc::now() {
                    return Ok(cached.access_token.clone());
                }
            }
        }

        let token = self.mint_token().await?;
        let access_token = token.access_token.clone();
        *self.cached.write().await = Some(token);
        Ok(access_token)
    }

    async fn mint_token(&self) -> Result<CachedToken, CpuProviderError> {
        let jwt = self.sign_assertion()?;

        let response = self
            .http
            .post(&self.key.token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", jwt.as_str()),
            ])
            .send()
            .await
            .map_err(|e| CpuProviderError::Credential(format!("token exchange failed: {e}")))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| CpuProviderError::Credential(format!("token exchange failed: {e}")))?;

        if !status.is_success() {
            return Err(CpuProviderError::Credential(format!(
                "token endpoint returned {status}: {text}"
            )));
        }

        let parsed: TokenResponse = serde_json::from_str(&text)
            .map_err(|e| CpuProviderError::Credential(format!("invalid token response: {e}")))?;

        Ok(CachedToken {
            access_token: parsed.access_token,
            expires_at: Utc::now() + chrono::Duration::seconds(parsed.expires_in),
        })
    }

    fn sign_assertion(&self) -> Result<String, CpuProviderError> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            iss: self.key.client_email.clone(),
            scope: COMPUTE_SCOPE.to_string(),
            aud: self.key.token_uri.clone(),
            iat: now,
            exp: now + TOKEN_TTL_SECS,
        };

        let encoding_key = EncodingKey::from_rsa_pem(self.key.private_key.as_bytes())
            .map_err(|e| CpuProviderError::Credential(format!("invalid private key: {e}")))?;

        encode(&Header::new(Algorithm::RS256), &claims, &encoding_key)
            .map_err(|e| CpuProviderError::Credential(format!("failed to sign JWT: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_from_path_rejects_missing_file() {
        let err = ServiceAccountKey::load_from_path(Path::new("/nonexistent/key.json"))
            .unwrap_err();
        assert!(matches!(err, CpuProviderError::Config(_)));
    }

    #[test]
    fn load_from_path_rejects_invalid_json() {
        let dir = std::env::temp_dir();
        let path = dir.join("fleet-cpu-auth-test-invalid.json");
        std::fs::write(&path, "not json").unwrap();
        let err = ServiceAccountKey::load_from_path(&path).unwrap_err();
        assert!(matches!(err, CpuProviderError::Config(_)));
        let _ = std::fs::remove_file(&path);
    }
}
