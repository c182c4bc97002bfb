//! Catalog Service configuration.
//!
//! Configuration is loaded from environment variables. All sensitive
//! fields are redacted in Debug output.

use common::jwt::{DEFAULT_CLOCK_SKEW, MAX_CLOCK_SKEW};
use common::secret::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use thiserror::Error;

/// Default server bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8000";

/// Default identity provider authority.
pub const DEFAULT_IDENTITY_AUTHORITY: &str = "https://login.microsoftonline.com";

/// Default browser origins allowed by the CORS policy.
pub const DEFAULT_CORS_ALLOWED_ORIGINS: &str = "http://localhost:3000,http://localhost:3001";

/// Default blob container for asset images.
pub const DEFAULT_BLOB_CONTAINER_NAME: &str = "asset-images";

/// Default requested lifetime of an access grant, in days.
pub const DEFAULT_GRANT_LIFETIME_DAYS: i64 = 365;

/// Upper bound on the requested grant lifetime, in days.
pub const MAX_GRANT_LIFETIME_DAYS: i64 = 365;

/// Identity provider settings used to verify bearer tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityConfig {
    /// Directory tenant id.
    pub tenant_id: String,

    /// Application (client) id; the expected `aud` claim.
    pub client_id: String,

    /// Expected `iss` claim: `{authority}/{tenant}/v2.0`.
    pub issuer: String,

    /// Key-set discovery endpoint.
    pub jwks_url: String,
}

/// Object storage settings. Absent when `BLOB_ACCOUNT_URL` is unset.
#[derive(Clone)]
pub struct StorageConfig {
    /// Blob service endpoint, without a trailing slash.
    pub account_url: String,

    /// Storage account name used in the grant's canonical resource.
    pub account_name: String,

    /// Container holding asset images.
    pub container_name: String,

    /// Service principal client id for storage bearer tokens.
    pub client_id: String,

    /// Service principal secret.
    pub client_secret: SecretString,

    /// OAuth 2.0 token endpoint.
    pub token_url: String,
}

impl fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageConfig")
            .field("account_url", &self.account_url)
            .field("account_name", &self.account_name)
            .field("container_name", &self.container_name)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("token_url", &self.token_url)
            .finish()
    }
}

/// Catalog Service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address (default: "0.0.0.0:8000").
    pub bind_address: String,

    /// Global auth enforcement flag. `false` is for local development only.
    pub auth_enabled: bool,

    /// Identity provider settings; always present when auth is enabled.
    pub identity: Option<IdentityConfig>,

    /// JWT clock skew tolerance in seconds applied to `exp`.
    pub jwt_clock_skew_seconds: i64,

    /// Origins allowed by the CORS policy.
    pub cors_allowed_origins: Vec<String>,

    /// Object storage; `None` forces permanent inline fallback.
    pub storage: Option<StorageConfig>,

    /// Requested access grant lifetime in days.
    pub grant_lifetime_days: i64,

    /// Cap grant expiry at the expiry of the delegation key that signs it.
    pub grant_cap_to_key_lifetime: bool,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid JWT clock skew configuration: {0}")]
    InvalidJwtClockSkew(String),

    #[error("Invalid grant lifetime configuration: {0}")]
    InvalidGrantLifetime(String),

    #[error("Invalid boolean for {0}: '{1}'")]
    InvalidBool(String, String),

    #[error("Invalid storage account URL: {0}")]
    InvalidAccountUrl(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind_address = vars
            .get("BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let auth_enabled = parse_bool(vars, "AUTH_ENABLED", true)?;

        let authority = vars
            .get("IDENTITY_AUTHORITY")
            .map(|s| s.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_IDENTITY_AUTHORITY.to_string());

        let tenant_id = non_empty(vars, "AZURE_TENANT_ID");
        let client_id = non_empty(vars, "AZURE_CLIENT_ID");

        let identity = match (tenant_id.clone(), client_id) {
            (Some(tenant_id), Some(client_id)) => {
                let jwks_url = vars.get("JWKS_URL").cloned().unwrap_or_else(|| {
                    format!("{authority}/{tenant_id}/discovery/v2.0/keys")
                });
                Some(IdentityConfig {
                    issuer: format!("{authority}/{tenant_id}/v2.0"),
                    tenant_id,
                    client_id,
                    jwks_url,
                })
            }
            (None, _) if auth_enabled => {
                return Err(ConfigError::MissingEnvVar("AZURE_TENANT_ID".to_string()));
            }
            (_, None) if auth_enabled => {
                return Err(ConfigError::MissingEnvVar("AZURE_CLIENT_ID".to_string()));
            }
            _ => None,
        };

        // Parse JWT clock skew tolerance with validation
        let jwt_clock_skew_seconds = if let Some(value_str) = vars.get("JWT_CLOCK_SKEW_SECONDS") {
            let value: i64 = value_str.parse().map_err(|e| {
                ConfigError::InvalidJwtClockSkew(format!(
                    "JWT_CLOCK_SKEW_SECONDS must be a valid integer, got '{}': {}",
                    value_str, e
                ))
            })?;

            if value < 0 {
                return Err(ConfigError::InvalidJwtClockSkew(format!(
                    "JWT_CLOCK_SKEW_SECONDS must not be negative, got {}",
                    value
                )));
            }

            let max = i64::try_from(MAX_CLOCK_SKEW.as_secs()).unwrap_or(i64::MAX);
            if value > max {
                return Err(ConfigError::InvalidJwtClockSkew(format!(
                    "JWT_CLOCK_SKEW_SECONDS must not exceed {} seconds, got {}",
                    max, value
                )));
            }

            value
        } else {
            i64::try_from(DEFAULT_CLOCK_SKEW.as_secs()).unwrap_or(60)
        };

        let cors_allowed_origins = vars
            .get("CORS_ALLOWED_ORIGINS")
            .map(String::as_str)
            .unwrap_or(DEFAULT_CORS_ALLOWED_ORIGINS)
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
            .collect();

        let storage = match non_empty(vars, "BLOB_ACCOUNT_URL") {
            Some(account_url) => Some(storage_config(
                vars,
                account_url,
                &authority,
                tenant_id.as_deref(),
            )?),
            None => None,
        };

        let grant_lifetime_days = if let Some(value_str) = vars.get("GRANT_LIFETIME_DAYS") {
            let value: i64 = value_str.parse().map_err(|e| {
                ConfigError::InvalidGrantLifetime(format!(
                    "GRANT_LIFETIME_DAYS must be a valid integer, got '{}': {}",
                    value_str, e
                ))
            })?;

            if !(1..=MAX_GRANT_LIFETIME_DAYS).contains(&value) {
                return Err(ConfigError::InvalidGrantLifetime(format!(
                    "GRANT_LIFETIME_DAYS must be between 1 and {}, got {}",
                    MAX_GRANT_LIFETIME_DAYS, value
                )));
            }

            value
        } else {
            DEFAULT_GRANT_LIFETIME_DAYS
        };

        let grant_cap_to_key_lifetime = parse_bool(vars, "GRANT_CAP_TO_KEY_LIFETIME", false)?;

        Ok(Config {
            bind_address,
            auth_enabled,
            identity,
            jwt_clock_skew_seconds,
            cors_allowed_origins,
            storage,
            grant_lifetime_days,
            grant_cap_to_key_lifetime,
        })
    }
}

fn storage_config(
    vars: &HashMap<String, String>,
    account_url: String,
    authority: &str,
    tenant_id: Option<&str>,
) -> Result<StorageConfig, ConfigError> {
    let account_url = account_url.trim_end_matches('/').to_string();

    let account_name = match non_empty(vars, "BLOB_ACCOUNT_NAME") {
        Some(name) => name,
        None => {
            let parsed = reqwest::Url::parse(&account_url)
                .map_err(|e| ConfigError::InvalidAccountUrl(format!("{account_url}: {e}")))?;
            parsed
                .host_str()
                .and_then(|host| host.split('.').next())
                .filter(|label| !label.is_empty())
                .map(ToString::to_string)
                .ok_or_else(|| {
                    ConfigError::InvalidAccountUrl(format!("{account_url}: no host"))
                })?
        }
    };

    let container_name = vars
        .get("BLOB_CONTAINER_NAME")
        .cloned()
        .unwrap_or_else(|| DEFAULT_BLOB_CONTAINER_NAME.to_string());

    let client_id = non_empty(vars, "STORAGE_CLIENT_ID")
        .ok_or_else(|| ConfigError::MissingEnvVar("STORAGE_CLIENT_ID".to_string()))?;

    let client_secret = non_empty(vars, "STORAGE_CLIENT_SECRET")
        .map(SecretString::from)
        .ok_or_else(|| ConfigError::MissingEnvVar("STORAGE_CLIENT_SECRET".to_string()))?;

    let token_url = match non_empty(vars, "STORAGE_TOKEN_URL") {
        Some(url) => url,
        None => {
            let tenant_id = tenant_id
                .ok_or_else(|| ConfigError::MissingEnvVar("AZURE_TENANT_ID".to_string()))?;
            format!("{authority}/{tenant_id}/oauth2/v2.0/token")
        }
    };

    Ok(StorageConfig {
        account_url,
        account_name,
        container_name,
        client_id,
        client_secret,
        token_url,
    })
}

fn non_empty(vars: &HashMap<String, String>, key: &str) -> Option<String> {
    vars.get(key)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn parse_bool(
    vars: &HashMap<String, String>,
    key: &str,
    default: bool,
) -> Result<bool, ConfigError> {
    let Some(raw) = vars.get(key) else {
        return Ok(default);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidBool(key.to_string(), raw.clone())),
    }
}
