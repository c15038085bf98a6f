// SPDX-License-Identifier: MIT OR Apache-2.0
//! Root-key trust anchors and the signed root-key package.
//!
//! The agent ships a hardcoded set of RSA trust anchors. A persisted,
//! countersigned *root-key package* can augment that set (new `rootKeys`)
//! and mask entries (`disabledRootKeys`, `disabledSigningKeys`). The package
//! itself is validated against the hardcoded anchors before any of its
//! content is honored, and is persisted atomically after validation.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod list;
mod package;
mod set;
mod store;

pub use error::RootKeyError;
pub use list::{HardcodedRootKey, hardcoded_root_keys};
pub use package::{
    PackageSignature, ProtectedProperties, RootKeyDefinition, RootKeyPackage, ShaAlg,
    SigningKeyHash,
};
pub use set::RootKeySet;
pub use store::RootKeyStore;
