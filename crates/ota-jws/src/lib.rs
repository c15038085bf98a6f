// SPDX-License-Identifier: MIT OR Apache-2.0
//! JWS envelope validation for update manifests.
//!
//! A manifest envelope is an ordinary three-segment JWS whose header carries
//! `sjwk`: another JWS whose payload is the JWK that signed the outer
//! envelope. Trust therefore chains root key → embedded JWK → manifest:
//!
//! 1. split the outer JWS and read `sjwk` from its header;
//! 2. validate the inner JWS under the root key named by its `kid`;
//! 3. parse the inner payload as an RSA JWK;
//! 4. validate the outer JWS under that JWK.
//!
//! The decoded outer payload is the update-manifest digest document the
//! coordinator consumes.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use ota_result::codes;
use ota_rootkey::{RootKeyError, RootKeySet, ShaAlg};
use ota_crypto::{SigningAlg, VerificationKey};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

/// Errors raised while validating a JWS envelope. Each failure mode the
/// orchestrator can act on maps to a distinct extended result code.
#[derive(Debug, Error)]
pub enum JwsError {
    /// Wrong segment count, empty segment, or a missing header field.
    #[error("malformed JWS: {0}")]
    BadStructure(&'static str),
    /// The header names an algorithm outside RS256/RS384/RS512.
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),
    /// The inner header references an unknown root key.
    #[error("unknown root key id `{0}`")]
    UnknownKeyId(String),
    /// The inner header references a disabled root key.
    #[error("disabled root key id `{0}`")]
    DisabledKeyId(String),
    /// The embedded signing key has been disabled by the overlay package.
    #[error("embedded signing key is disabled")]
    DisabledSigningKey,
    /// A signature did not verify.
    #[error("signature verification failed on the {0} envelope")]
    InvalidSignature(&'static str),
    /// Header or payload JSON failed to parse.
    #[error("JWS JSON parse failure: {0}")]
    Json(String),
    /// Key construction or digesting failed.
    #[error(transparent)]
    Crypto(#[from] ota_crypto::CryptoError),
}

impl JwsError {
    /// The extended result code reported for this error.
    #[must_use]
    pub fn erc(&self) -> i32 {
        match self {
            Self::BadStructure(_) | Self::Json(_) => codes::TRUST_BAD_STRUCTURE,
            Self::UnsupportedAlgorithm(_) => codes::TRUST_UNSUPPORTED_ALG,
            Self::UnknownKeyId(_) => codes::TRUST_UNKNOWN_KEY_ID,
            Self::DisabledKeyId(_) => codes::TRUST_DISABLED_KEY_ID,
            Self::DisabledSigningKey => codes::TRUST_DISABLED_SIGNING_KEY,
            Self::InvalidSignature(_) => codes::TRUST_SIGNATURE_INVALID,
            Self::Crypto(_) => codes::TRUST_BAD_STRUCTURE,
        }
    }
}

impl From<RootKeyError> for JwsError {
    fn from(err: RootKeyError) -> Self {
        match err {
            RootKeyError::UnknownKeyId(kid) => Self::UnknownKeyId(kid),
            RootKeyError::DisabledKeyId(kid) => Self::DisabledKeyId(kid),
            RootKeyError::Crypto(e) => Self::Crypto(e),
            other => Self::Json(other.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// The three base64url segments of a JWS.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JwsSections<'a> {
    /// Base64url-encoded header.
    pub header: &'a str,
    /// Base64url-encoded payload.
    pub payload: &'a str,
    /// Base64url-encoded signature.
    pub signature: &'a str,
}

impl<'a> JwsSections<'a> {
    /// Splits `jws` into its three segments; every segment must be
    /// non-empty.
    pub fn split(jws: &'a str) -> Result<Self, JwsError> {
        let mut parts = jws.split('.');
        let (Some(header), Some(payload), Some(signature), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(JwsError::BadStructure("expected three dot-separated segments"));
        };
        if header.is_empty() || payload.is_empty() || signature.is_empty() {
            return Err(JwsError::BadStructure("empty segment"));
        }
        Ok(Self {
            header,
            payload,
            signature,
        })
    }

    /// The signed material: `header "." payload`.
    #[must_use]
    pub fn signing_input(&self) -> String {
        format!("{}.{}", self.header, self.payload)
    }
}

#[derive(Deserialize)]
struct JoseHeader {
    alg: Option<String>,
    kid: Option<String>,
    sjwk: Option<String>,
}

#[derive(Deserialize)]
struct RsaJwk {
    kty: String,
    n: String,
    e: String,
}

fn parse_header(encoded: &str) -> Result<JoseHeader, JwsError> {
    let bytes = ota_crypto::base64url_decode(encoded)?;
    serde_json::from_slice(&bytes).map_err(|e| JwsError::Json(e.to_string()))
}

/// Verifies a JWS under an already-constructed key.
///
/// `layer` names the envelope in error messages (`"inner"`/`"outer"`).
pub fn verify_with_key(
    sections: &JwsSections<'_>,
    key: &VerificationKey,
    layer: &'static str,
) -> Result<(), JwsError> {
    let header = parse_header(sections.header)?;
    let alg_name = header
        .alg
        .ok_or(JwsError::BadStructure("header missing `alg`"))?;
    let alg = SigningAlg::from_name(&alg_name)
        .map_err(|_| JwsError::UnsupportedAlgorithm(alg_name.clone()))?;

    let signature = ota_crypto::base64url_decode(sections.signature)?;
    let signing_input = sections.signing_input();

    let ok = ota_crypto::verify(alg, &signature, signing_input.as_bytes(), key)?;
    if ok {
        Ok(())
    } else {
        Err(JwsError::InvalidSignature(layer))
    }
}

// ---------------------------------------------------------------------------
// Envelope validator
// ---------------------------------------------------------------------------

/// Validates manifest envelopes against a [`RootKeySet`].
pub struct EnvelopeValidator<'a> {
    keys: &'a RootKeySet,
}

impl<'a> EnvelopeValidator<'a> {
    /// Creates a validator over the given trust anchors.
    #[must_use]
    pub fn new(keys: &'a RootKeySet) -> Self {
        Self { keys }
    }

    /// Validates a signed JWK and returns the key it carries.
    ///
    /// The `sjwk` is a JWS whose `kid` names a trust anchor and whose
    /// payload is an RSA JWK.
    pub fn verify_signed_jwk(&self, sjwk: &str) -> Result<VerificationKey, JwsError> {
        let sections = JwsSections::split(sjwk)?;

        let header = parse_header(sections.header)?;
        let kid = header
            .kid
            .ok_or(JwsError::BadStructure("signed JWK missing `kid`"))?;
        debug!(kid, "validating signed JWK");

        let root = self.keys.key_by_id(&kid)?;
        verify_with_key(&sections, &root, "inner")?;

        let payload = ota_crypto::base64url_decode(sections.payload)?;
        if self
            .keys
            .is_signing_key_disabled(ShaAlg::Sha256, &ota_crypto::sha256(&payload))
        {
            return Err(JwsError::DisabledSigningKey);
        }

        let jwk: RsaJwk = serde_json::from_slice(&payload).map_err(|e| JwsError::Json(e.to_string()))?;
        if jwk.kty != "RSA" {
            return Err(JwsError::BadStructure("signed JWK is not an RSA key"));
        }
        Ok(VerificationKey::from_base64url_parts(&jwk.n, &jwk.e)?)
    }

    /// Validates a full manifest envelope and returns the decoded outer
    /// payload.
    pub fn validate(&self, jws: &str) -> Result<Vec<u8>, JwsError> {
        let sections = JwsSections::split(jws)?;

        let header = parse_header(sections.header)?;
        let sjwk = match header.sjwk.as_deref() {
            Some(s) if !s.is_empty() => s,
            _ => return Err(JwsError::BadStructure("header missing `sjwk`")),
        };

        let signing_key = self.verify_signed_jwk(sjwk)?;
        verify_with_key(&sections, &signing_key, "outer")?;

        Ok(ota_crypto::base64url_decode(sections.payload)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ota_rootkey::hardcoded_root_keys;

    fn b64(data: &[u8]) -> String {
        ota_crypto::base64url_encode(data)
    }

    fn jws(header: &serde_json::Value, payload: &[u8], sig: &[u8]) -> String {
        format!(
            "{}.{}.{}",
            b64(header.to_string().as_bytes()),
            b64(payload),
            b64(sig)
        )
    }

    #[test]
    fn split_requires_three_nonempty_segments() {
        assert!(JwsSections::split("a.b.c").is_ok());
        for bad in ["", "a", "a.b", "a.b.c.d", ".b.c", "a..c", "a.b."] {
            assert!(
                matches!(JwsSections::split(bad), Err(JwsError::BadStructure(_))),
                "{bad:?} should fail"
            );
        }
    }

    #[test]
    fn signing_input_joins_header_and_payload() {
        let s = JwsSections::split("aaa.bbb.ccc").unwrap();
        assert_eq!(s.signing_input(), "aaa.bbb");
    }

    #[test]
    fn outer_header_without_sjwk_is_bad_structure() {
        let keys = RootKeySet::builtin();
        let validator = EnvelopeValidator::new(&keys);
        let envelope = jws(&serde_json::json!({ "alg": "RS256" }), b"{}", b"sig");
        assert!(matches!(
            validator.validate(&envelope),
            Err(JwsError::BadStructure(_))
        ));
    }

    #[test]
    fn unknown_root_kid_is_distinct() {
        let keys = RootKeySet::builtin();
        let validator = EnvelopeValidator::new(&keys);
        let sjwk = jws(
            &serde_json::json!({ "alg": "RS256", "kid": "OTA.NOPE" }),
            br#"{"kty":"RSA","n":"3q2-7w","e":"AQAB"}"#,
            b"sig",
        );
        assert!(matches!(
            validator.verify_signed_jwk(&sjwk),
            Err(JwsError::UnknownKeyId(_))
        ));
    }

    #[test]
    fn disabled_root_kid_is_distinct() {
        let kid = hardcoded_root_keys()[0].kid;
        let overlay = ota_rootkey::RootKeyPackage::parse(
            &serde_json::json!({
                "protected": {
                    "version": 1, "published": 1,
                    "disabledRootKeys": [ kid ]
                },
                "signatures": []
            })
            .to_string(),
        )
        .unwrap();
        let keys = RootKeySet::with_overlay(overlay);
        let validator = EnvelopeValidator::new(&keys);
        let sjwk = jws(
            &serde_json::json!({ "alg": "RS256", "kid": kid }),
            br#"{"kty":"RSA","n":"3q2-7w","e":"AQAB"}"#,
            b"sig",
        );
        assert!(matches!(
            validator.verify_signed_jwk(&sjwk),
            Err(JwsError::DisabledKeyId(_))
        ));
    }

    #[test]
    fn forged_inner_signature_fails_as_invalid() {
        let kid = hardcoded_root_keys()[0].kid;
        let keys = RootKeySet::builtin();
        let validator = EnvelopeValidator::new(&keys);
        let sjwk = jws(
            &serde_json::json!({ "alg": "RS256", "kid": kid }),
            br#"{"kty":"RSA","n":"3q2-7w","e":"AQAB"}"#,
            &[0u8; 256],
        );
        assert!(matches!(
            validator.verify_signed_jwk(&sjwk),
            Err(JwsError::InvalidSignature("inner"))
        ));
    }

    #[test]
    fn unsupported_algorithm_is_distinct() {
        let kid = hardcoded_root_keys()[0].kid;
        let keys = RootKeySet::builtin();
        let validator = EnvelopeValidator::new(&keys);
        let sjwk = jws(
            &serde_json::json!({ "alg": "ES256", "kid": kid }),
            br#"{"kty":"RSA","n":"3q2-7w","e":"AQAB"}"#,
            b"sig",
        );
        assert!(matches!(
            validator.verify_signed_jwk(&sjwk),
            Err(JwsError::UnsupportedAlgorithm(_))
        ));
    }
}
