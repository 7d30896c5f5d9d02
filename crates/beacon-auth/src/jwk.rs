//! JSON Web Keys and RSA public-key derivation.
//!
//! Derivation is a pure function of the key material so it can be tested
//! without any identity provider.

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use jsonwebtoken::DecodingKey;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{AuthError, KeyMaterialError};

/// base64url, tolerant of padding.
const BASE64_URL: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Largest accepted public exponent, in bytes.
const MAX_EXPONENT_BYTES: usize = 4;

/// One entry of a JWKS document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    #[serde(default)]
    pub kid: String,
    #[serde(default)]
    pub kty: String,
    #[serde(rename = "use", default, skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,
    /// base64url modulus.
    #[serde(default)]
    pub n: String,
    /// base64url exponent.
    #[serde(default)]
    pub e: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
}

/// A JWKS document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwkSet {
    pub keys: Vec<Jwk>,
}

/// Immutable snapshot of the keys published by the issuer.
///
/// Replaced as a whole on every successful refresh.
#[derive(Debug, Default)]
pub struct KeySet {
    keys: HashMap<String, Jwk>,
    generation: u64,
}

impl KeySet {
    /// Index a document by key id. Entries without a `kid` are skipped.
    #[must_use]
    pub fn new(document: JwkSet, generation: u64) -> Self {
        let keys = document
            .keys
            .into_iter()
            .filter(|jwk| !jwk.kid.is_empty())
            .map(|jwk| (jwk.kid.clone(), jwk))
            .collect();
        Self { keys, generation }
    }

    /// Key for `kid`.
    #[must_use]
    pub fn get(&self, kid: &str) -> Option<&Jwk> {
        self.keys.get(kid)
    }

    /// Number of keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the set holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Monotonic counter identifying this snapshot.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Key ids in the set.
    pub fn kids(&self) -> impl Iterator<Item = &str> {
        self.keys.keys().map(String::as_str)
    }
}

/// RSA public key as big-endian modulus and exponent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RsaPublicKey {
    modulus: Vec<u8>,
    exponent: Vec<u8>,
}

impl RsaPublicKey {
    /// Decode base64url modulus and exponent.
    ///
    /// # Errors
    ///
    /// Returns the reason the material is unusable.
    pub fn from_components(n: &str, e: &str) -> Result<Self, KeyMaterialError> {
        let modulus = decode_component("modulus", n)?;
        let exponent = decode_component("exponent", e)?;
        Self::from_raw(&modulus, &exponent)
    }

    /// Build from big-endian bytes.
    ///
    /// Leading zero bytes are ignored. The exponent must fit in four bytes,
    /// be odd and be greater than one.
    ///
    /// # Errors
    ///
    /// Returns the reason the material is unusable.
    pub fn from_raw(modulus: &[u8], exponent: &[u8]) -> Result<Self, KeyMaterialError> {
        let modulus = strip_leading_zeros(modulus);
        let exponent = strip_leading_zeros(exponent);

        if modulus.is_empty() {
            return Err(KeyMaterialError::EmptyModulus);
        }
        if exponent.is_empty() {
            return Err(KeyMaterialError::EmptyExponent);
        }
        if exponent.len() > MAX_EXPONENT_BYTES {
            return Err(KeyMaterialError::OversizedExponent(exponent.len()));
        }

        let key = Self {
            modulus: modulus.to_vec(),
            exponent: exponent.to_vec(),
        };
        let e = key.exponent();
        if e < 3 || e % 2 == 0 {
            return Err(KeyMaterialError::InvalidExponent(e));
        }
        Ok(key)
    }

    /// Public exponent.
    #[must_use]
    pub fn exponent(&self) -> u32 {
        self.exponent
            .iter()
            .fold(0u32, |acc, byte| (acc << 8) | u32::from(*byte))
    }

    /// Modulus size in bits.
    #[must_use]
    pub fn bits(&self) -> usize {
        let leading = self
            .modulus
            .first()
            .map_or(0, |b| b.leading_zeros() as usize);
        self.modulus.len() * 8 - leading
    }

    /// Key usable for signature verification.
    #[must_use]
    pub fn decoding_key(&self) -> DecodingKey {
        DecodingKey::from_rsa_raw_components(&self.modulus, &self.exponent)
    }
}

fn decode_component(component: &'static str, value: &str) -> Result<Vec<u8>, KeyMaterialError> {
    BASE64_URL
        .decode(value)
        .map_err(|err| KeyMaterialError::Encoding {
            component,
            reason: err.to_string(),
        })
}

fn strip_leading_zeros(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    &bytes[start..]
}

/// Derive the RSA public key described by `jwk`.
///
/// # Errors
///
/// Returns [`AuthError::MalformedKey`] if the entry is not an RSA key or its
/// material does not decode.
pub fn derive_public_key(jwk: &Jwk) -> Result<RsaPublicKey, AuthError> {
    let malformed = |reason: String| AuthError::MalformedKey {
        kid: jwk.kid.clone(),
        reason,
    };

    if jwk.kty != "RSA" {
        return Err(malformed(format!("key type {:?} is not RSA", jwk.kty)));
    }
    RsaPublicKey::from_components(&jwk.n, &jwk.e)
        .map_err(|err| malformed(err.to_string()))
}
