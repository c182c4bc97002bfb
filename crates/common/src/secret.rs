//! Redacting wrappers for credentials.
//!
//! Everything the catalog must never log goes through [`SecretString`]:
//! the storage service principal's client secret, bearer tokens acquired
//! for the storage API, and delegation key values. Its `Debug` output is
//! `[REDACTED]`, so deriving `Debug` on a config or response struct that
//! holds one stays safe. The value is zeroized on drop.
//!
//! Reading the value takes an explicit [`ExposeSecret::expose_secret`]
//! call, which keeps every use site greppable.
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//! use serde::Deserialize;
//!
//! #[derive(Debug, Deserialize)]
//! struct TokenResponse {
//!     token_type: String,
//!     access_token: SecretString,
//! }
//!
//! let resp: TokenResponse =
//!     serde_json::from_str(r#"{"token_type":"Bearer","access_token":"eyJ0eXAi"}"#).unwrap();
//!
//! assert!(!format!("{resp:?}").contains("eyJ0eXAi"));
//! assert_eq!(resp.access_token.expose_secret(), "eyJ0eXAi");
//! ```

pub use secrecy::{ExposeSecret, SecretString};
