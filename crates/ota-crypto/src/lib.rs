// SPDX-License-Identifier: MIT OR Apache-2.0
//! Base64URL and RSA signature-verification primitives.
//!
//! Everything in the trust chain reduces to two operations: URL-safe base64
//! transcoding and RSASSA-PKCS1-v1_5 verification over a SHA-2 digest. Both
//! live here so the root-key and envelope layers stay free of raw crypto.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rsa::{BigUint, Pkcs1v15Sign, RsaPublicKey};
use sha2::{Digest, Sha256, Sha384, Sha512};
use thiserror::Error;

/// Errors produced by the crypto primitives.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    /// Input was not valid base64url.
    #[error("invalid base64url input: {0}")]
    Base64(String),
    /// A buffer that must be non-empty was empty.
    #[error("{0} must not be empty")]
    EmptyInput(&'static str),
    /// The signing algorithm name is not one of RS256/RS384/RS512.
    #[error("unsupported signing algorithm `{0}`")]
    UnsupportedAlgorithm(String),
    /// The RSA key could not be constructed from the given material.
    #[error("invalid RSA key material: {0}")]
    InvalidKey(String),
}

// ---------------------------------------------------------------------------
// Base64URL
// ---------------------------------------------------------------------------

/// Encodes bytes with the URL-safe alphabet, padding stripped.
#[must_use]
pub fn base64url_encode(data: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(data)
}

/// Decodes a base64url string. Trailing `=` padding is tolerated.
pub fn base64url_decode(input: &str) -> Result<Vec<u8>, CryptoError> {
    let trimmed = input.trim_end_matches('=');
    URL_SAFE_NO_PAD
        .decode(trimmed)
        .map_err(|e| CryptoError::Base64(e.to_string()))
}

/// Decodes a base64url string into UTF-8 text.
pub fn base64url_decode_to_string(input: &str) -> Result<String, CryptoError> {
    let bytes = base64url_decode(input)?;
    String::from_utf8(bytes).map_err(|e| CryptoError::Base64(e.to_string()))
}

/// Decodes base64 in either the standard or URL-safe alphabet, padded or not.
///
/// Signed digests arrive standard-encoded while JOSE material is URL-safe;
/// hash comparisons accept both.
pub fn base64_decode_any(input: &str) -> Result<Vec<u8>, CryptoError> {
    let url_safe: String = input
        .trim_end_matches('=')
        .chars()
        .map(|c| match c {
            '+' => '-',
            '/' => '_',
            c => c,
        })
        .collect();
    URL_SAFE_NO_PAD
        .decode(url_safe)
        .map_err(|e| CryptoError::Base64(e.to_string()))
}

// ---------------------------------------------------------------------------
// Signing algorithms
// ---------------------------------------------------------------------------

/// RSASSA-PKCS1-v1_5 signing algorithms accepted by the agent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SigningAlg {
    /// PKCS#1 v1.5 over SHA-256.
    Rs256,
    /// PKCS#1 v1.5 over SHA-384.
    Rs384,
    /// PKCS#1 v1.5 over SHA-512.
    Rs512,
}

impl SigningAlg {
    /// Parses a JOSE algorithm name. Matching is case-sensitive.
    pub fn from_name(name: &str) -> Result<Self, CryptoError> {
        match name {
            "RS256" => Ok(Self::Rs256),
            "RS384" => Ok(Self::Rs384),
            "RS512" => Ok(Self::Rs512),
            other => Err(CryptoError::UnsupportedAlgorithm(other.to_string())),
        }
    }

    /// The JOSE name for this algorithm.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Rs256 => "RS256",
            Self::Rs384 => "RS384",
            Self::Rs512 => "RS512",
        }
    }
}

impl std::fmt::Display for SigningAlg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Verification keys
// ---------------------------------------------------------------------------

/// An RSA public key used only for signature verification.
#[derive(Clone, Debug, PartialEq)]
pub struct VerificationKey {
    key: RsaPublicKey,
}

impl VerificationKey {
    /// Builds a key from a big-endian modulus and an integer exponent.
    pub fn from_modulus_exponent(modulus: &[u8], exponent: u32) -> Result<Self, CryptoError> {
        if modulus.is_empty() {
            return Err(CryptoError::EmptyInput("modulus"));
        }
        let n = BigUint::from_bytes_be(modulus);
        let e = BigUint::from(exponent);
        let key = RsaPublicKey::new(n, e).map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        Ok(Self { key })
    }

    /// Builds a key from base64url-encoded modulus and exponent strings, the
    /// form used by JWKs and the root-key package.
    pub fn from_base64url_parts(n: &str, e: &str) -> Result<Self, CryptoError> {
        let modulus = base64url_decode(n)?;
        if modulus.is_empty() {
            return Err(CryptoError::EmptyInput("modulus"));
        }
        let exponent = base64url_decode(e)?;
        if exponent.is_empty() {
            return Err(CryptoError::EmptyInput("exponent"));
        }
        let n = BigUint::from_bytes_be(&modulus);
        let e = BigUint::from_bytes_be(&exponent);
        let key = RsaPublicKey::new(n, e).map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        Ok(Self { key })
    }
}

/// Verifies `signature` over `payload` under `key`.
///
/// Returns `Ok(false)` for a well-formed but non-matching signature; `Err`
/// only for unusable input (empty buffers).
pub fn verify(
    alg: SigningAlg,
    signature: &[u8],
    payload: &[u8],
    key: &VerificationKey,
) -> Result<bool, CryptoError> {
    if signature.is_empty() {
        return Err(CryptoError::EmptyInput("signature"));
    }
    if payload.is_empty() {
        return Err(CryptoError::EmptyInput("payload"));
    }

    let outcome = match alg {
        SigningAlg::Rs256 => {
            let digest = Sha256::digest(payload);
            key.key
                .verify(Pkcs1v15Sign::new::<Sha256>(), &digest, signature)
        }
        SigningAlg::Rs384 => {
            let digest = Sha384::digest(payload);
            key.key
                .verify(Pkcs1v15Sign::new::<Sha384>(), &digest, signature)
        }
        SigningAlg::Rs512 => {
            let digest = Sha512::digest(payload);
            key.key
                .verify(Pkcs1v15Sign::new::<Sha512>(), &digest, signature)
        }
    };

    Ok(outcome.is_ok())
}

/// SHA-256 digest helper used by manifest-hash and signing-key-hash checks.
#[must_use]
pub fn sha256(data: &[u8]) -> Vec<u8> {
    Sha256::digest(data).to_vec()
}
