// SPDX-License-Identifier: MIT OR Apache-2.0
//! Trust-anchor resolution across the hardcoded set and the overlay package.

use crate::error::RootKeyError;
use crate::list::hardcoded_root_keys;
use crate::package::{RootKeyPackage, ShaAlg};
use ota_crypto::VerificationKey;
use tracing::debug;

/// The effective set of trust anchors.
///
/// Lookup order: hardcoded keys first, then the overlay package's
/// `rootKeys`. The overlay's `disabledRootKeys` mask both sources; a
/// disabled key fails lookup with a distinct error so callers can report it
/// apart from an unknown id.
#[derive(Debug, Default)]
pub struct RootKeySet {
    overlay: Option<RootKeyPackage>,
}

impl RootKeySet {
    /// A set backed only by the hardcoded anchors.
    #[must_use]
    pub fn builtin() -> Self {
        Self { overlay: None }
    }

    /// A set augmented by a validated overlay package.
    ///
    /// The caller is responsible for having run
    /// [`RootKeyPackage::validate`] first.
    #[must_use]
    pub fn with_overlay(overlay: RootKeyPackage) -> Self {
        Self {
            overlay: Some(overlay),
        }
    }

    /// Returns `true` when the overlay disables the given key id.
    #[must_use]
    pub fn is_disabled(&self, kid: &str) -> bool {
        self.overlay
            .as_ref()
            .is_some_and(|o| o.protected.disabled_root_keys.iter().any(|k| k == kid))
    }

    /// Returns `true` when the overlay disables a signing key by digest.
    #[must_use]
    pub fn is_signing_key_disabled(&self, alg: ShaAlg, hash: &[u8]) -> bool {
        self.overlay.as_ref().is_some_and(|o| {
            o.protected
                .disabled_signing_keys
                .iter()
                .any(|k| k.alg == alg && k.hash == hash)
        })
    }

    /// Resolves a verification key by id.
    pub fn key_by_id(&self, kid: &str) -> Result<VerificationKey, RootKeyError> {
        if self.is_disabled(kid) {
            debug!(kid, "root key lookup hit a disabled id");
            return Err(RootKeyError::DisabledKeyId(kid.to_string()));
        }

        if let Some(anchor) = hardcoded_root_keys().iter().find(|k| k.kid == kid) {
            let modulus = ota_crypto::base64url_decode(anchor.modulus)?;
            return Ok(VerificationKey::from_modulus_exponent(
                &modulus,
                anchor.exponent,
            )?);
        }

        if let Some(def) = self
            .overlay
            .as_ref()
            .and_then(|o| o.protected.root_keys.get(kid))
        {
            return Ok(VerificationKey::from_modulus_exponent(
                &def.modulus,
                def.exponent,
            )?);
        }

        Err(RootKeyError::UnknownKeyId(kid.to_string()))
    }

    /// The overlay package, when one is loaded.
    #[must_use]
    pub fn overlay(&self) -> Option<&RootKeyPackage> {
        self.overlay.as_ref()
    }
}
