// SPDX-License-Identifier: MIT OR Apache-2.0
//! The hardcoded trust anchors compiled into the agent.
//!
//! The production set ships in every binary. The test set exists only when
//! the `test-keys` feature is enabled, and test-signed root-key packages are
//! rejected without it.

/// One embedded RSA trust anchor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HardcodedRootKey {
    /// Key identifier, matched against JOSE `kid` headers.
    pub kid: &'static str,
    /// Base64url big-endian modulus.
    pub modulus: &'static str,
    /// Public exponent.
    pub exponent: u32,
}

#[cfg(not(feature = "test-keys"))]
const ROOT_KEYS: &[HardcodedRootKey] = &[
    HardcodedRootKey {
        kid: "OTA.202310.R",
        modulus: "izu7xCH7T1laJ-_FmY6h1lykLZAp-qUMFI-laFEjB0KXMjz_myVFZV1zpJxpoP_VqkABob7sKL-TR0E51nHnlOOBygRr37XF2VjjTEjQDNeUUnaNMy2cdbS-fD7D5WiBjd6E5wjzNHHgCfHhDXR8oOAB9eRes4azUgH5x8UlEkGDpUJKXg8yMNkliGt-dUNHD37R9BtMMCzpU6rlLhSWoodoafVerXF4pFAen2hpBWa4pRiDtuq4ir0KcqEpRsTb9J6lNJFREX_Yy4vNdubBsKsMXF0VV2Bj9j69he839OPTOQmesJGoSWNwV_FlSivnBlVkgMQbOlKQNuEIoWylkw",
        exponent: 65537,
    },
    HardcodedRootKey {
        kid: "OTA.202310.E",
        modulus: "i5iS1KlS-YPMYx1NGINB1BbyJykkuOB51-Ga4UCPkb_GJG3BgfZAk_gycoDMNJ8GN7CYWf98hRHcEB8Rqn5N-Pti6yMc91kmDsnLArWdvHRvjdbyUlJjixl6IEbVfN9BBkgJYb5IMXVviVKeZWTqhsPFvZBRyzoiEA5hMJzavVgvW0M7HO34tbVm38ApgECVLS2khm3QpwKJwu5Daj_fhGuelS4lhEQ1z0aVC0fNe_b2mztZdOom0QjSO46tbAPAllSk-PDYXpt3cYXbUB5pvDYwDBCoHoeD86cd--wmyN8XsSdyhJNqF6UefGBzoK0BsVfkdgLiEuOchQMHM-QlNw",
        exponent: 65537,
    },
    HardcodedRootKey {
        kid: "OTA.202310.C",
        modulus: "k0REnqPNT490-qdy6holYlDEL6dStK4xHT4GPyZgb8TSaJoPITJfp4d6JFzUJCcyp8f4Q8qWT0CwVPAm5yPuAqHHSAg7_p5eXHUreaVcGimgM28UNYMenz1CptFvId3TWl_QeC0afGBpYcECyIY97pONRbJ7st5P0XkLhTEgVW2eFeRNLqpWwefWDzpsfZ4q5DGXobYGQWe6V4n_ujqKNmL6_ifV_n6JPPAcpkFgM1rXhhTjit5hePYBdB1NRynwKmiSKu3nxG58GHy7BhJMfsBi0tAm47mXcgql9RaMI3b3yGJuBNIQvpi5FQSWsNee0bNb9BU2Y1kLVyNiWblERQ",
        exponent: 65537,
    },
];

#[cfg(feature = "test-keys")]
const ROOT_KEYS: &[HardcodedRootKey] = &[
    HardcodedRootKey {
        kid: "OTA.TEST.R",
        modulus: "t_aHjeDxVeoFPljqX0xgNbFPkrFhwxaEM9IBK7F2mox_pBmCw5COnYKM0CAPPHt4R3zaSaAIhSWe1qr12Mve6sMBVweLWRy5gh-7QnseoKgsaBGZn9gERYBtdJ-QvCjbFXZ_k5IaTWxjFEWqpH6NFJupD6GUJDgdEIe0TdmtpmImt4qHclN1AQPjC-a3u9uBv_tbI0SgVv4UpKSnd9DspEJuiZvEHSNuzL1m-gsLk0qw8I_TfgIuHYKX8ZQsWVWCHJCAAJ0fkI5EbQYYMbS73LnOKpmoneq8Z3xhQJsPXMp0yK4KiN_xHnNRdDVdknTgMaIpcfoFqEzzYE2YIgNiEQ",
        exponent: 65537,
    },
    HardcodedRootKey {
        kid: "OTA.TEST.E",
        modulus: "jtjYc3wx1rxElTyp4N2JIBvVHsOzv1UUFBV_os57YwtyqUVTfcd_LpZbM57C-3Ggf68pZ_3m8pvxoNzO5uyJnmh7mhNIR-_MdPBAL1Dcz8NMRIfVNub_7EPBXSP13eZTRAu4N1_twhyUbCcD4oa-EmpuOqMo3y9-i-2HqIVo1DFKJtA9tCzCNLMq7OKuQqD9WRH5ZSscAKf95_7aJf_HHm2EU1f09kaM-LuLaINPT2gclSTNZwTDOeoCCchyMOkyxSYASLmx7ouPxAHqyo8yOmNruouFrwtYujgC-aIASQEtPlEHYvHK41SFAgIeBHzIHRyQOSxMKYNkQl0mBobGww",
        exponent: 65537,
    },
];

/// The canonical hardcoded anchor set for this build.
///
/// Package signatures are matched against this slice *by position*.
#[must_use]
pub fn hardcoded_root_keys() -> &'static [HardcodedRootKey] {
    ROOT_KEYS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anchors_have_distinct_kids() {
        let keys = hardcoded_root_keys();
        assert!(!keys.is_empty());
        for (i, a) in keys.iter().enumerate() {
            for b in &keys[i + 1..] {
                assert_ne!(a.kid, b.kid);
            }
        }
    }

    #[test]
    fn anchor_material_builds_keys() {
        for anchor in hardcoded_root_keys() {
            let modulus = ota_crypto::base64url_decode(anchor.modulus).unwrap();
            ota_crypto::VerificationKey::from_modulus_exponent(&modulus, anchor.exponent).unwrap();
        }
    }
}
