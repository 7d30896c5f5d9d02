//! # beacon-auth
//!
//! Bearer token verification for the Beacon broker.
//!
//! Tokens are RSA-signed JWTs from an external identity provider. The
//! provider's key set is fetched once at startup and refreshed on a long
//! interval; individual requests never leave the process.
//!
//! - [`TokenValidator`] - validation entry point and refresh task
//! - [`KeyStore`] - atomically replaced key set plus derived-key cache
//! - [`verify`] - pure header/signature/claims checks
//! - [`jwk`] - key set documents and RSA key derivation

pub mod claims;
pub mod error;
pub mod jwk;
pub mod source;
pub mod store;
pub mod validator;
pub mod verify;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use claims::Claims;
pub use error::{AuthError, KeyMaterialError, KeyRefreshError};
pub use jwk::{derive_public_key, Jwk, JwkSet, KeySet, RsaPublicKey};
pub use source::{jwks_url, HttpKeySource, KeySource};
pub use store::KeyStore;
pub use validator::{TokenValidator, ValidatorConfig, DEFAULT_REFRESH_INTERVAL};
