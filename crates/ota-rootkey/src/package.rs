// SPDX-License-Identifier: MIT OR Apache-2.0
//! The signed root-key package document.
//!
//! The document has two members: `protected` (the payload every signature
//! covers) and `signatures`. The *exact* JSON text of the `protected` object,
//! as it appears in the source document, is the signed material; it is
//! captured verbatim at parse time and never re-serialized for verification.

use crate::error::RootKeyError;
use ota_crypto::SigningAlg;
use serde::Deserialize;
use serde_json::value::RawValue;
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// Hash algorithms
// ---------------------------------------------------------------------------

/// Digest algorithms accepted in `disabledSigningKeys` entries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaAlg {
    /// SHA-256.
    Sha256,
    /// SHA-384.
    Sha384,
    /// SHA-512.
    Sha512,
}

impl ShaAlg {
    /// Parses the package spelling (`SHA256`, `SHA384`, `SHA512`).
    pub fn from_name(name: &str) -> Result<Self, RootKeyError> {
        match name {
            "SHA256" => Ok(Self::Sha256),
            "SHA384" => Ok(Self::Sha384),
            "SHA512" => Ok(Self::Sha512),
            other => Err(RootKeyError::PackageParse(format!(
                "unsupported hash algorithm `{other}`"
            ))),
        }
    }
}

impl fmt::Display for ShaAlg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Sha256 => "SHA256",
            Self::Sha384 => "SHA384",
            Self::Sha512 => "SHA512",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Protected payload
// ---------------------------------------------------------------------------

/// A disabled signing key: the digest of a public key that must no longer
/// countersign update manifests.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SigningKeyHash {
    /// Digest algorithm.
    pub alg: ShaAlg,
    /// Decoded digest bytes.
    pub hash: Vec<u8>,
}

/// One root key definition inside the package.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RootKeyDefinition {
    /// Big-endian RSA modulus.
    pub modulus: Vec<u8>,
    /// Public exponent.
    pub exponent: u32,
}

/// The `protected` member of a root-key package.
#[derive(Clone, Debug, PartialEq)]
pub struct ProtectedProperties {
    /// Monotonically increasing package version.
    pub version: u64,
    /// Publication time, seconds since the Unix epoch.
    pub published: i64,
    /// Root-key ids masked from lookup.
    pub disabled_root_keys: Vec<String>,
    /// Signing-key digests that must no longer be honored.
    pub disabled_signing_keys: Vec<SigningKeyHash>,
    /// Active root keys keyed by id.
    pub root_keys: BTreeMap<String, RootKeyDefinition>,
    /// `true` for packages signed with the test anchors.
    pub is_test: bool,
}

impl ProtectedProperties {
    /// Publication time as a UTC timestamp, when representable.
    #[must_use]
    pub fn published_time(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        chrono::DateTime::from_timestamp(self.published, 0)
    }
}

/// One countersignature over the verbatim `protected` text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PackageSignature {
    /// Signing algorithm.
    pub alg: SigningAlg,
    /// Decoded signature bytes.
    pub signature: Vec<u8>,
}

// ---------------------------------------------------------------------------
// Wire shapes
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct PackageWire<'a> {
    #[serde(borrow)]
    protected: &'a RawValue,
    signatures: Vec<SignatureWire>,
}

#[derive(Deserialize)]
struct SignatureWire {
    alg: String,
    sig: String,
}

#[derive(Deserialize)]
struct ProtectedWire {
    version: u64,
    published: i64,
    #[serde(rename = "disabledRootKeys", default)]
    disabled_root_keys: Vec<String>,
    #[serde(rename = "disabledSigningKeys", default)]
    disabled_signing_keys: Vec<SigningKeyHashWire>,
    #[serde(rename = "rootKeys", default)]
    root_keys: BTreeMap<String, RootKeyDefinitionWire>,
    #[serde(rename = "isTest", default)]
    is_test: bool,
}

#[derive(Deserialize)]
struct SigningKeyHashWire {
    alg: String,
    hash: String,
}

#[derive(Deserialize)]
struct RootKeyDefinitionWire {
    #[serde(rename = "keyType")]
    key_type: String,
    n: String,
    e: i64,
}

// ---------------------------------------------------------------------------
// RootKeyPackage
// ---------------------------------------------------------------------------

/// A parsed root-key package.
///
/// Equality compares the verbatim `protected` text and the signature array
/// element-wise; the decoded convenience fields follow from those.
#[derive(Clone, Debug)]
pub struct RootKeyPackage {
    /// Decoded `protected` payload.
    pub protected: ProtectedProperties,
    /// The exact `protected` JSON text lifted from the source document.
    pub protected_raw: String,
    /// Countersignatures in document order.
    pub signatures: Vec<PackageSignature>,
}

impl PartialEq for RootKeyPackage {
    fn eq(&self, other: &Self) -> bool {
        self.protected_raw == other.protected_raw && self.signatures == other.signatures
    }
}

impl RootKeyPackage {
    /// Parses a root-key package document, preserving the verbatim
    /// `protected` text for signature verification.
    pub fn parse(json: &str) -> Result<Self, RootKeyError> {
        let wire: PackageWire<'_> =
            serde_json::from_str(json).map_err(|e| RootKeyError::PackageParse(e.to_string()))?;

        let protected_raw = wire.protected.get().to_string();
        let protected_wire: ProtectedWire = serde_json::from_str(&protected_raw)
            .map_err(|e| RootKeyError::PackageParse(e.to_string()))?;

        let mut root_keys = BTreeMap::new();
        for (kid, def) in protected_wire.root_keys {
            if def.key_type != "RSA" {
                return Err(RootKeyError::PackageParse(format!(
                    "root key `{kid}` has unsupported key type `{}`",
                    def.key_type
                )));
            }
            if def.e <= 0 || def.e > i64::from(u32::MAX) {
                return Err(RootKeyError::PackageParse(format!(
                    "root key `{kid}` exponent must be a positive integer"
                )));
            }
            let modulus = ota_crypto::base64url_decode(&def.n)?;
            if modulus.is_empty() {
                return Err(RootKeyError::PackageParse(format!(
                    "root key `{kid}` modulus is empty"
                )));
            }
            root_keys.insert(
                kid,
                RootKeyDefinition {
                    modulus,
                    exponent: def.e as u32,
                },
            );
        }

        let mut disabled_signing_keys = Vec::with_capacity(protected_wire.disabled_signing_keys.len());
        for entry in protected_wire.disabled_signing_keys {
            disabled_signing_keys.push(SigningKeyHash {
                alg: ShaAlg::from_name(&entry.alg)?,
                hash: ota_crypto::base64url_decode(&entry.hash)?,
            });
        }

        let mut signatures = Vec::with_capacity(wire.signatures.len());
        for entry in &wire.signatures {
            let alg = SigningAlg::from_name(&entry.alg)
                .map_err(|e| RootKeyError::PackageParse(e.to_string()))?;
            signatures.push(PackageSignature {
                alg,
                signature: ota_crypto::base64url_decode(&entry.sig)?,
            });
        }

        Ok(Self {
            protected: ProtectedProperties {
                version: protected_wire.version,
                published: protected_wire.published,
                disabled_root_keys: protected_wire.disabled_root_keys,
                disabled_signing_keys,
                root_keys,
                is_test: protected_wire.is_test,
            },
            protected_raw,
            signatures,
        })
    }

    /// Verifies every required countersignature against the hardcoded
    /// anchors, by position in the canonical set.
    pub fn validate(&self) -> Result<(), RootKeyError> {
        if self.protected.is_test && !cfg!(feature = "test-keys") {
            return Err(RootKeyError::TestPackageRejected);
        }

        for (index, anchor) in crate::list::hardcoded_root_keys().iter().enumerate() {
            let signature = self
                .signatures
                .get(index)
                .ok_or_else(|| RootKeyError::MissingSignature(anchor.kid.to_string()))?;

            let modulus = ota_crypto::base64url_decode(anchor.modulus)?;
            let key = ota_crypto::VerificationKey::from_modulus_exponent(&modulus, anchor.exponent)?;

            let ok = ota_crypto::verify(
                signature.alg,
                &signature.signature,
                self.protected_raw.as_bytes(),
                &key,
            )?;
            if !ok {
                return Err(RootKeyError::SignatureInvalid(anchor.kid.to_string()));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn package_json() -> String {
        serde_json::json!({
            "protected": {
                "version": 2,
                "published": 1_696_118_400,
                "disabledRootKeys": [ "OTA.202301.R" ],
                "disabledSigningKeys": [ { "alg": "SHA256", "hash": "aGFzaA" } ],
                "rootKeys": {
                    "OTA.202310.X": { "keyType": "RSA", "n": "3q2-7w", "e": 65537 }
                },
                "isTest": false
            },
            "signatures": [
                { "alg": "RS256", "sig": "c2lnMQ" },
                { "alg": "RS256", "sig": "c2lnMg" },
                { "alg": "RS256", "sig": "c2lnMw" }
            ]
        })
        .to_string()
    }

    #[test]
    fn parses_package() {
        let pkg = RootKeyPackage::parse(&package_json()).unwrap();
        assert_eq!(pkg.protected.version, 2);
        assert_eq!(pkg.protected.disabled_root_keys, vec!["OTA.202301.R"]);
        assert_eq!(pkg.protected.disabled_signing_keys.len(), 1);
        assert_eq!(pkg.protected.disabled_signing_keys[0].alg, ShaAlg::Sha256);
        assert_eq!(pkg.protected.root_keys["OTA.202310.X"].exponent, 65537);
        assert_eq!(pkg.signatures.len(), 3);
        assert!(!pkg.protected.is_test);
        assert!(pkg.protected.published_time().is_some());
    }

    #[test]
    fn protected_text_is_verbatim() {
        // Field order and whitespace inside `protected` must survive exactly.
        let json = r#"{ "protected": {"published": 10,  "version": 1}, "signatures": [] }"#;
        let pkg = RootKeyPackage::parse(json).unwrap();
        assert_eq!(pkg.protected_raw, r#"{"published": 10,  "version": 1}"#);
    }

    #[test]
    fn rejects_non_positive_exponent() {
        for e in [0, -3] {
            let json = serde_json::json!({
                "protected": {
                    "version": 1, "published": 1,
                    "rootKeys": { "k": { "keyType": "RSA", "n": "3q2-7w", "e": e } }
                },
                "signatures": []
            })
            .to_string();
            assert!(matches!(
                RootKeyPackage::parse(&json),
                Err(RootKeyError::PackageParse(_))
            ));
        }
    }

    #[test]
    fn rejects_empty_modulus_and_bad_key_type() {
        let empty_n = serde_json::json!({
            "protected": {
                "version": 1, "published": 1,
                "rootKeys": { "k": { "keyType": "RSA", "n": "", "e": 3 } }
            },
            "signatures": []
        })
        .to_string();
        assert!(RootKeyPackage::parse(&empty_n).is_err());

        let ec = serde_json::json!({
            "protected": {
                "version": 1, "published": 1,
                "rootKeys": { "k": { "keyType": "EC", "n": "3q2-7w", "e": 3 } }
            },
            "signatures": []
        })
        .to_string();
        assert!(RootKeyPackage::parse(&ec).is_err());
    }

    #[test]
    fn rejects_unknown_algorithms() {
        let bad_sig_alg = serde_json::json!({
            "protected": { "version": 1, "published": 1 },
            "signatures": [ { "alg": "HS256", "sig": "c2ln" } ]
        })
        .to_string();
        assert!(RootKeyPackage::parse(&bad_sig_alg).is_err());

        let bad_hash_alg = serde_json::json!({
            "protected": {
                "version": 1, "published": 1,
                "disabledSigningKeys": [ { "alg": "MD5", "hash": "aGFzaA" } ]
            },
            "signatures": []
        })
        .to_string();
        assert!(RootKeyPackage::parse(&bad_hash_alg).is_err());
    }

    #[test]
    fn equality_tracks_protected_text_and_signatures() {
        let a = RootKeyPackage::parse(&package_json()).unwrap();
        let b = RootKeyPackage::parse(&package_json()).unwrap();
        assert_eq!(a, b);

        // Same decoded content, different serialization: not equal.
        let reordered = r#"{ "protected": {"published": 1696118400, "version": 2}, "signatures": [] }"#;
        let c = RootKeyPackage::parse(reordered).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn validation_requires_one_signature_per_anchor() {
        let json = serde_json::json!({
            "protected": { "version": 1, "published": 1 },
            "signatures": [ { "alg": "RS256", "sig": "c2ln" } ]
        })
        .to_string();
        let pkg = RootKeyPackage::parse(&json).unwrap();
        assert!(matches!(
            pkg.validate(),
            Err(RootKeyError::MissingSignature(_))
        ));
    }

    #[test]
    fn validation_rejects_forged_signatures() {
        // Structurally complete but the bytes cannot verify.
        let pkg = RootKeyPackage::parse(&package_json()).unwrap();
        assert!(matches!(
            pkg.validate(),
            Err(RootKeyError::SignatureInvalid(_)) | Err(RootKeyError::Crypto(_))
        ));
    }
}
