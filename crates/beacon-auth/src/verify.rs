//! Pure token verification.
//!
//! Nothing here touches the network or the key store: callers pass in the
//! key and the current time.

use jsonwebtoken::errors::{Error as JwtError, ErrorKind};
use jsonwebtoken::{Algorithm, DecodingKey, Header, Validation};

use crate::claims::Claims;
use crate::error::AuthError;

/// Accepted signature algorithms.
pub const RSA_ALGORITHMS: [Algorithm; 6] = [
    Algorithm::RS256,
    Algorithm::RS384,
    Algorithm::RS512,
    Algorithm::PS256,
    Algorithm::PS384,
    Algorithm::PS512,
];

const BEARER: &str = "bearer";

/// What a token must satisfy besides a valid signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expectations<'a> {
    pub issuer: &'a str,
    pub audience: Option<&'a str>,
}

/// Strip an optional `Bearer` scheme and surrounding whitespace.
///
/// The scheme is matched case-insensitively and must be followed by
/// whitespace or nothing, so a bare `Bearer` yields an empty token.
#[must_use]
pub fn strip_bearer(token: &str) -> &str {
    let token = token.trim();
    match token.get(..BEARER.len()) {
        Some(scheme) if scheme.eq_ignore_ascii_case(BEARER) => {
            let rest = &token[BEARER.len()..];
            if rest.is_empty() || rest.starts_with(char::is_whitespace) {
                rest.trim_start()
            } else {
                token
            }
        }
        _ => token,
    }
}

/// Parse the token header without verifying anything.
///
/// # Errors
///
/// Returns [`AuthError::MalformedToken`] if the header does not decode.
pub fn decode_header(token: &str) -> Result<Header, AuthError> {
    jsonwebtoken::decode_header(token)
        .map_err(|e| AuthError::MalformedToken(e.to_string()))
}

/// Require an RSA-family algorithm.
///
/// # Errors
///
/// Returns [`AuthError::UnsupportedAlgorithm`] for anything else.
pub fn require_rsa(header: &Header) -> Result<Algorithm, AuthError> {
    if RSA_ALGORITHMS.contains(&header.alg) {
        Ok(header.alg)
    } else {
        Err(AuthError::UnsupportedAlgorithm(format!("{:?}", header.alg)))
    }
}

/// Verify signature and claims of `token` with `key`.
///
/// The expiry must be strictly after `now` (unix seconds) and the issuer
/// must equal the expected issuer exactly.
///
/// # Errors
///
/// Returns the first check that failed.
pub fn verify_token(
    token: &str,
    algorithm: Algorithm,
    key: &DecodingKey,
    expect: &Expectations<'_>,
    now: u64,
) -> Result<Claims, AuthError> {
    let mut validation = Validation::new(algorithm);
    validation.leeway = 0;
    validation.set_required_spec_claims(&["exp", "iss", "sub"]);
    match expect.audience {
        Some(audience) => validation.set_audience(&[audience]),
        None => validation.validate_aud = false,
    }

    let claims = jsonwebtoken::decode::<Claims>(token, key, &validation)
        .map_err(map_jwt_error)?
        .claims;

    if claims.iss != expect.issuer {
        return Err(AuthError::IssuerMismatch {
            expected: expect.issuer.to_string(),
            actual: claims.iss,
        });
    }
    if claims.exp <= now {
        return Err(AuthError::TokenExpired);
    }
    Ok(claims)
}

/// Map a verification failure onto [`AuthError`].
#[must_use]
pub fn map_jwt_error(err: JwtError) -> AuthError {
    match err.kind() {
        ErrorKind::InvalidSignature => AuthError::InvalidSignature,
        ErrorKind::ExpiredSignature => AuthError::TokenExpired,
        ErrorKind::InvalidAudience => AuthError::AudienceMismatch,
        ErrorKind::InvalidAlgorithm | ErrorKind::InvalidAlgorithmName => {
            AuthError::UnsupportedAlgorithm(err.to_string())
        }
        ErrorKind::InvalidRsaKey(reason) => AuthError::MalformedKey {
            kid: String::new(),
            reason: reason.clone(),
        },
        ErrorKind::InvalidKeyFormat => AuthError::MalformedKey {
            kid: String::new(),
            reason: err.to_string(),
        },
        ErrorKind::MissingRequiredClaim(_)
        | ErrorKind::Json(_)
        | ErrorKind::ImmatureSignature
        | ErrorKind::InvalidSubject
        | ErrorKind::InvalidIssuer => AuthError::InvalidClaims(err.to_string()),
        _ => AuthError::MalformedToken(err.to_string()),
    }
}
