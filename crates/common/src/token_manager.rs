//! Background bearer token for the storage API.
//!
//! The catalog talks to object storage as a service principal. A spawned
//! task runs the OAuth 2.0 client credentials grant against the identity
//! provider, publishes each token on a `watch` channel, and sleeps until
//! the token is close to expiry. Failed acquisitions back off from one
//! second up to thirty and retry forever.
//!
//! Startup does not wait for the first token: [`TokenReceiver::token`]
//! yields `None` until one arrives, and storage calls made before then
//! fail fast instead of blocking.
//!
//! ```rust,ignore
//! use common::secret::SecretString;
//! use common::token_manager::{spawn_token_manager, TokenManagerConfig};
//!
//! let (task, token_rx) = spawn_token_manager(TokenManagerConfig::new(
//!     "https://login.microsoftonline.com/<tenant>/oauth2/v2.0/token".to_string(),
//!     "catalog-storage".to_string(),
//!     SecretString::from("..."),
//!     "https://storage.azure.com/.default".to_string(),
//! ))?;
//!
//! let bearer = token_rx.token();
//! task.abort();
//! ```

use crate::secret::{ExposeSecret, SecretString};
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, trace, warn};

/// Refresh this long before the token's `expires_in` runs out.
pub const DEFAULT_REFRESH_THRESHOLD: Duration = Duration::from_secs(5 * 60);

/// Connect timeout for calls to the token endpoint.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Extra lead on top of the threshold for clock drift with the provider.
const CLOCK_DRIFT_MARGIN: Duration = Duration::from_secs(30);

const MIN_RETRY_DELAY: Duration = Duration::from_secs(1);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Failure acquiring a storage token.
#[derive(Error, Debug, Clone)]
pub enum TokenError {
    #[error("HTTP client error: {0}")]
    HttpError(String),

    /// The provider refused the client credentials (400 or 401).
    #[error("Authentication rejected: {0}")]
    AuthenticationRejected(String),

    #[error("Invalid token response: {0}")]
    InvalidResponse(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Token channel closed")]
    ChannelClosed,
}

/// Where and as whom to request storage tokens.
#[derive(Clone)]
pub struct TokenManagerConfig {
    pub token_url: String,
    pub client_id: String,
    pub client_secret: SecretString,
    /// For storage this is `https://storage.azure.com/.default`.
    pub scope: String,
    pub refresh_threshold: Duration,
}

impl TokenManagerConfig {
    #[must_use]
    pub fn new(
        token_url: String,
        client_id: String,
        client_secret: SecretString,
        scope: String,
    ) -> Self {
        Self {
            token_url,
            client_id,
            client_secret,
            scope,
            refresh_threshold: DEFAULT_REFRESH_THRESHOLD,
        }
    }

    #[must_use]
    pub fn with_refresh_threshold(mut self, threshold: Duration) -> Self {
        self.refresh_threshold = threshold;
        self
    }

    /// Time to wait before refreshing a token valid for `lifetime`.
    ///
    /// At least [`MIN_RETRY_DELAY`], so a token issued already expired
    /// cannot spin the loop.
    fn refresh_after(&self, lifetime: Duration) -> Duration {
        lifetime
            .saturating_sub(self.refresh_threshold)
            .saturating_sub(CLOCK_DRIFT_MARGIN)
            .max(MIN_RETRY_DELAY)
    }
}

impl std::fmt::Debug for TokenManagerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManagerConfig")
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret)
            .field("scope", &self.scope)
            .field("refresh_threshold", &self.refresh_threshold)
            .finish()
    }
}

/// Read side of the token channel.
///
/// Cloning is cheap; every storage client holds its own.
#[derive(Clone)]
pub struct TokenReceiver(watch::Receiver<SecretString>);

impl TokenReceiver {
    /// The latest token, or `None` before the first acquisition.
    #[must_use]
    pub fn token(&self) -> Option<SecretString> {
        let current = self.0.borrow();
        (!current.expose_secret().is_empty()).then(|| current.clone())
    }

    /// Resolve when a new token is published.
    ///
    /// # Errors
    ///
    /// `TokenError::ChannelClosed` once the refresh task has exited.
    pub async fn changed(&mut self) -> Result<(), TokenError> {
        self.0
            .changed()
            .await
            .map_err(|_| TokenError::ChannelClosed)
    }

    /// Wrap a channel the test controls. An empty string reads as no token.
    #[cfg(any(test, feature = "test-utils"))]
    #[must_use]
    pub fn from_test_channel(rx: watch::Receiver<SecretString>) -> Self {
        Self(rx)
    }
}

impl std::fmt::Debug for TokenReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenReceiver")
            .field("has_token", &self.token().is_some())
            .finish()
    }
}

/// Start refreshing storage tokens in the background.
///
/// # Errors
///
/// `TokenError::Configuration` if the HTTP client cannot be built.
#[instrument(skip_all, fields(client_id = %config.client_id))]
pub fn spawn_token_manager(
    config: TokenManagerConfig,
) -> Result<(JoinHandle<()>, TokenReceiver), TokenError> {
    let endpoint = TokenEndpoint::new(config)?;
    let (publish, receiver) = watch::channel(SecretString::from(""));

    let task = tokio::spawn(refresh_loop(endpoint, publish));

    Ok((task, TokenReceiver(receiver)))
}

async fn refresh_loop(endpoint: TokenEndpoint, publish: watch::Sender<SecretString>) {
    let client_id = endpoint.config.client_id.clone();
    let mut backoff = Backoff::default();
    let mut first = true;

    loop {
        let issued = match endpoint.request().await {
            Ok(issued) => issued,
            Err(e) => {
                let delay = backoff.next_delay();
                warn!(
                    target: "common.token_manager",
                    client_id = %client_id,
                    error = %e,
                    retry_in_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "Storage token request failed"
                );
                tokio::time::sleep(delay).await;
                continue;
            }
        };

        backoff.reset();
        let wait = endpoint.config.refresh_after(issued.lifetime);

        if publish.send(issued.token).is_err() {
            debug!(
                target: "common.token_manager",
                client_id = %client_id,
                "No token receivers left, stopping"
            );
            return;
        }

        if first {
            info!(target: "common.token_manager", client_id = %client_id, "Storage token acquired");
            first = false;
        } else {
            debug!(target: "common.token_manager", client_id = %client_id, "Storage token refreshed");
        }

        tokio::time::sleep(wait).await;
    }
}

/// Doubling retry delay, capped.
#[derive(Debug)]
struct Backoff {
    current: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            current: MIN_RETRY_DELAY,
        }
    }
}

impl Backoff {
    fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(MAX_RETRY_DELAY);
        delay
    }

    fn reset(&mut self) {
        self.current = MIN_RETRY_DELAY;
    }
}

struct IssuedToken {
    token: SecretString,
    lifetime: Duration,
}

#[derive(Deserialize)]
struct TokenEndpointResponse {
    access_token: SecretString,
    expires_in: u64,
}

struct TokenEndpoint {
    config: TokenManagerConfig,
    http: reqwest::Client,
}

impl TokenEndpoint {
    fn new(config: TokenManagerConfig) -> Result<Self, TokenError> {
        let http = reqwest::Client::builder()
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .build()
            .map_err(|e| TokenError::Configuration(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { config, http })
    }

    async fn request(&self) -> Result<IssuedToken, TokenError> {
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.expose_secret()),
            ("scope", self.config.scope.as_str()),
        ];

        let response = self
            .http
            .post(&self.config.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| TokenError::HttpError(e.to_string()))?;

        match response.status() {
            status if status.is_success() => {
                let body: TokenEndpointResponse = response
                    .json()
                    .await
                    .map_err(|e| TokenError::InvalidResponse(e.to_string()))?;
                debug!(
                    target: "common.token_manager",
                    expires_in_secs = body.expires_in,
                    "Token endpoint issued a token"
                );
                Ok(IssuedToken {
                    token: body.access_token,
                    lifetime: Duration::from_secs(body.expires_in),
                })
            }
            status @ (StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED) => {
                // The provider's error body can echo the request
                if let Ok(body) = response.text().await {
                    trace!(target: "common.token_manager", body = %body, "Token endpoint rejection");
                }
                Err(TokenError::AuthenticationRejected(format!("Status {status}")))
            }
            status => Err(TokenError::HttpError(format!("Unexpected status: {status}"))),
        }
    }
}
