// SPDX-License-Identifier: MIT OR Apache-2.0
//! Root-key layer errors.

use ota_result::codes;
use thiserror::Error;

/// Errors raised by root-key lookup, package parsing, and validation.
#[derive(Debug, Error)]
pub enum RootKeyError {
    /// No key matches the requested key id.
    #[error("unknown root key id `{0}`")]
    UnknownKeyId(String),
    /// The key exists but has been disabled by the overlay package.
    #[error("root key `{0}` is disabled")]
    DisabledKeyId(String),
    /// The package JSON failed to parse or violates a structural rule.
    #[error("root-key package parse failure: {0}")]
    PackageParse(String),
    /// A signature slot required for a hardcoded anchor is missing.
    #[error("missing signature for root key `{0}`")]
    MissingSignature(String),
    /// A package signature failed cryptographic verification.
    #[error("signature verification failed for root key `{0}`")]
    SignatureInvalid(String),
    /// The package is flagged `isTest` but this build trusts only
    /// production anchors.
    #[error("test root-key package rejected by production build")]
    TestPackageRejected,
    /// Key material in the package could not be used.
    #[error(transparent)]
    Crypto(#[from] ota_crypto::CryptoError),
    /// Reading or writing the persisted package failed.
    #[error("root-key store i/o: {0}")]
    Io(#[from] std::io::Error),
}

impl RootKeyError {
    /// The extended result code reported for this error.
    #[must_use]
    pub fn erc(&self) -> i32 {
        match self {
            Self::UnknownKeyId(_) => codes::TRUST_UNKNOWN_KEY_ID,
            Self::DisabledKeyId(_) => codes::TRUST_DISABLED_KEY_ID,
            Self::PackageParse(_) => codes::TRUST_PACKAGE_PARSE,
            Self::MissingSignature(_) => codes::TRUST_MISSING_SIGNATURE,
            Self::SignatureInvalid(_) => codes::TRUST_SIGNATURE_INVALID,
            Self::TestPackageRejected => codes::TRUST_PACKAGE_PARSE,
            Self::Crypto(_) => codes::TRUST_BAD_STRUCTURE,
            Self::Io(_) => codes::TRUST_PACKAGE_PARSE,
        }
    }
}
