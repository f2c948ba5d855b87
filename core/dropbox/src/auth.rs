//! Short lived access tokens for the Dropbox API.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::RwLock;
use tracing::info;
use zeroize::{Zeroize, ZeroizeOnDrop};

use cloudstorage_common::{Error, Result};
use cloudstorage_storage::handle_response_errors;

/// Access token with expiration tracking.
#[derive(Clone, Serialize, Deserialize)]
pub struct Tokens {
    /// Bearer token for API requests.
    pub access_token: String,
    /// When the access token expires.
    pub expires_at: DateTime<Utc>,
}

impl Tokens {
    /// A token that is never refreshed.
    pub fn permanent(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            expires_at: DateTime::<Utc>::MAX_UTC,
        }
    }

    /// Check if the access token is expired or about to expire.
    pub fn is_expired(&self) -> bool {
        // Less than 5 minutes remaining counts as expired
        self.expires_at < Utc::now() + Duration::minutes(5)
    }
}

impl fmt::Debug for Tokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tokens")
            .field("access_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// App key and refresh token of a Dropbox account. PKCE apps have no secret.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct DropboxCredentials {
    pub client_id: String,
    pub refresh_token: Option<String>,
}

impl fmt::Debug for DropboxCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DropboxCredentials")
            .field("client_id", &self.client_id)
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

/// Hands out valid access tokens, refreshing them when they run out.
pub struct TokenManager {
    http: reqwest::Client,
    token_url: String,
    credentials: DropboxCredentials,
    tokens: RwLock<Option<Tokens>>,
}

impl TokenManager {
    /// Create a token manager. `tokens` seeds the cache, e.g. with a
    /// permanent token when no refresh token is configured.
    pub fn new(
        http: reqwest::Client,
        token_url: impl Into<String>,
        credentials: DropboxCredentials,
        tokens: Option<Tokens>,
    ) -> Self {
        Self {
            http,
            token_url: token_url.into(),
            credentials,
            tokens: RwLock::new(tokens),
        }
    }

    /// Get a valid access token, refreshing if necessary.
    ///
    /// # Errors
    /// - `Unauthorized` if no refresh token is configured or the token
    ///   endpoint rejects it
    /// - `Network` if the token endpoint cannot be reached
    pub async fn access_token(&self) -> Result<String> {
        if let Some(tokens) = self.tokens.read().await.as_ref() {
            if !tokens.is_expired() {
                return Ok(tokens.access_token.clone());
            }
        }

        let mut tokens = self.tokens.write().await;

        // Another request may have refreshed while we waited for the lock
        if let Some(current) = tokens.as_ref() {
            if !current.is_expired() {
                return Ok(current.access_token.clone());
            }
        }

        info!("Refreshing Dropbox access token");
        let fresh = self.refresh().await?;
        let access_token = fresh.access_token.clone();
        *tokens = Some(fresh);

        Ok(access_token)
    }

    /// Drop the cached token after the API rejected it. Permanent tokens
    /// are kept since there is nothing to refresh them from.
    pub async fn invalidate(&self) {
        if self.credentials.refresh_token.is_some() {
            *self.tokens.write().await = None;
        }
    }

    async fn refresh(&self) -> Result<Tokens> {
        let refresh_token = self
            .credentials
            .refresh_token
            .as_deref()
            .ok_or_else(|| Error::Unauthorized("No refresh token configured".to_string()))?;

        let response = self
            .http
            .post(&self.token_url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", self.credentials.client_id.as_str()),
            ])
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to refresh token: {}", e)))?;

        let status = response.status();
        if status == reqwest::StatusCode::BAD_REQUEST || status == reqwest::StatusCode::UNAUTHORIZED
        {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Unauthorized(format!("Token refresh rejected: {}", body)));
        }

        let token: TokenResponse = handle_response_errors(response)
            .await?
            .json()
            .await
            .map_err(|e| Error::InvalidResponse(format!("Invalid token response: {}", e)))?;

        Ok(Tokens {
            access_token: token.access_token,
            expires_at: Utc::now() + Duration::seconds(token.expires_in),
        })
    }
}
