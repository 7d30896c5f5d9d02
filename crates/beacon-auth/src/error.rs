//! Error types for token verification and key refresh.

use thiserror::Error;

/// Reasons a bearer token is rejected.
///
/// Every variant rejects the handshake of the affected client only.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// Nothing left after stripping the bearer prefix.
    #[error("Empty token")]
    EmptyToken,

    /// Token is not a structurally valid JWT.
    #[error("Malformed token: {0}")]
    MalformedToken(String),

    /// Token is not signed with an RSA-family algorithm.
    #[error("Unsupported signing algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Token header carries no `kid`.
    #[error("Token header has no key id")]
    MissingKeyId,

    /// No key in the current key set matches the token's `kid`.
    #[error("Unknown key id: {0}")]
    UnknownKey(String),

    /// Key material could not be turned into a public key.
    #[error("Malformed key {kid}: {reason}")]
    MalformedKey { kid: String, reason: String },

    /// Signature does not verify.
    #[error("Invalid signature")]
    InvalidSignature,

    /// Issuer claim differs from the configured issuer.
    #[error("Issuer mismatch: expected {expected}, got {actual}")]
    IssuerMismatch { expected: String, actual: String },

    /// Audience claim does not include the configured audience.
    #[error("Audience mismatch")]
    AudienceMismatch,

    /// Expiry is not strictly in the future.
    #[error("Token expired")]
    TokenExpired,

    /// Claims are missing or have the wrong shape.
    #[error("Invalid claims: {0}")]
    InvalidClaims(String),
}

impl AuthError {
    /// Short label used as a metrics dimension.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            AuthError::EmptyToken => "empty_token",
            AuthError::MalformedToken(_) => "malformed_token",
            AuthError::UnsupportedAlgorithm(_) => "unsupported_algorithm",
            AuthError::MissingKeyId => "missing_key_id",
            AuthError::UnknownKey(_) => "unknown_key",
            AuthError::MalformedKey { .. } => "malformed_key",
            AuthError::InvalidSignature => "invalid_signature",
            AuthError::IssuerMismatch { .. } => "issuer_mismatch",
            AuthError::AudienceMismatch => "audience_mismatch",
            AuthError::TokenExpired => "token_expired",
            AuthError::InvalidClaims(_) => "invalid_claims",
        }
    }
}

/// Why RSA key material is unusable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyMaterialError {
    /// A component is not valid base64url.
    #[error("{component} is not base64url: {reason}")]
    Encoding {
        component: &'static str,
        reason: String,
    },

    /// The modulus has no significant bytes.
    #[error("empty modulus")]
    EmptyModulus,

    /// The exponent has no significant bytes.
    #[error("empty exponent")]
    EmptyExponent,

    /// The exponent does not fit in four bytes.
    #[error("exponent is {0} bytes")]
    OversizedExponent(usize),

    /// The exponent is even or below three.
    #[error("invalid exponent {0}")]
    InvalidExponent(u32),
}

/// Failures while fetching the key set.
///
/// Only the first fetch at startup is fatal; later failures leave the
/// previous key set in place.
#[derive(Debug, Error)]
pub enum KeyRefreshError {
    /// Network or client failure.
    #[error("Key fetch failed: {0}")]
    Fetch(#[from] reqwest::Error),

    /// Endpoint answered with a non-success status.
    #[error("Key endpoint returned status {0}")]
    Status(u16),

    /// Body is not a usable key set.
    #[error("Key set could not be decoded: {0}")]
    Decode(String),
}
