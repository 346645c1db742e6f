// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

use openssl::hash::{Hasher, MessageDigest};
use serde::{Deserialize, Serialize};
use std::fmt;

const TPM_ALG_SHA1: u16 = 0x0004;
const TPM_ALG_SHA256: u16 = 0x000B;
const TPM_ALG_SHA384: u16 = 0x000C;
const TPM_ALG_SHA512: u16 = 0x000D;

/// A digest algorithm, numbered as in the TPM_ALG_ID registry.  Identifiers
/// this crate does not know are kept as-is so that attester input never fails
/// to decode, it only fails policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "u16", into = "u16")]
pub enum HashAlg {
    Sha1,
    Sha256,
    Sha384,
    Sha512,
    Unknown(u16),
}

/// The hash algorithms we accept, in their preferred order of use.
pub const SUPPORTED_HASH_ALGS: [HashAlg; 3] = [HashAlg::Sha512, HashAlg::Sha384, HashAlg::Sha256];

/// Whether the algorithm is in the verifier's policy list
pub fn is_supported(alg: HashAlg) -> bool {
    SUPPORTED_HASH_ALGS.contains(&alg)
}

impl From<u16> for HashAlg {
    fn from(id: u16) -> Self {
        match id {
            TPM_ALG_SHA1 => HashAlg::Sha1,
            TPM_ALG_SHA256 => HashAlg::Sha256,
            TPM_ALG_SHA384 => HashAlg::Sha384,
            TPM_ALG_SHA512 => HashAlg::Sha512,
            other => HashAlg::Unknown(other),
        }
    }
}

impl From<HashAlg> for u16 {
    fn from(alg: HashAlg) -> Self {
        alg.id()
    }
}

impl HashAlg {
    pub fn id(self) -> u16 {
        match self {
            HashAlg::Sha1 => TPM_ALG_SHA1,
            HashAlg::Sha256 => TPM_ALG_SHA256,
            HashAlg::Sha384 => TPM_ALG_SHA384,
            HashAlg::Sha512 => TPM_ALG_SHA512,
            HashAlg::Unknown(id) => id,
        }
    }

    pub fn digest_size(self) -> Option<usize> {
        match self {
            HashAlg::Sha1 => Some(20),
            HashAlg::Sha256 => Some(32),
            HashAlg::Sha384 => Some(48),
            HashAlg::Sha512 => Some(64),
            HashAlg::Unknown(_) => None,
        }
    }

    pub fn message_digest(self) -> Option<MessageDigest> {
        match self {
            HashAlg::Sha1 => Some(MessageDigest::sha1()),
            HashAlg::Sha256 => Some(MessageDigest::sha256()),
            HashAlg::Sha384 => Some(MessageDigest::sha384()),
            HashAlg::Sha512 => Some(MessageDigest::sha512()),
            HashAlg::Unknown(_) => None,
        }
    }

    /// Hash the concatenation of `parts`
    pub fn digest(self, parts: &[&[u8]]) -> Result<Vec<u8>, String> {
        let md = self
            .message_digest()
            .ok_or_else(|| format!("no digest implementation for {self}"))?;

        let mut hasher = Hasher::new(md).map_err(|e| format!("{e:?}"))?;

        for p in parts {
            hasher.update(p).map_err(|e| format!("{e:?}"))?;
        }

        let sum = hasher.finish().map_err(|e| format!("{e:?}"))?;

        Ok(sum.to_vec())
    }
}

impl fmt::Display for HashAlg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HashAlg::Sha1 => write!(f, "SHA1"),
            HashAlg::Sha256 => write!(f, "SHA256"),
            HashAlg::Sha384 => write!(f, "SHA384"),
            HashAlg::Sha512 => write!(f, "SHA512"),
            HashAlg::Unknown(id) => write!(f, "0x{id:04x}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;
    use rstest::rstest;

    #[rstest]
    #[case(0x0004, HashAlg::Sha1, false)]
    #[case(0x000B, HashAlg::Sha256, true)]
    #[case(0x000C, HashAlg::Sha384, true)]
    #[case(0x000D, HashAlg::Sha512, true)]
    #[case(0x0012, HashAlg::Unknown(0x0012), false)]
    fn registry_and_policy(#[case] id: u16, #[case] alg: HashAlg, #[case] supported: bool) {
        assert_eq!(HashAlg::from(id), alg);
        assert_eq!(u16::from(alg), id);
        assert_eq!(is_supported(alg), supported);
    }

    #[test]
    fn preference_order() {
        assert_eq!(
            SUPPORTED_HASH_ALGS,
            [HashAlg::Sha512, HashAlg::Sha384, HashAlg::Sha256]
        );
    }

    #[test]
    fn digest_concatenates_parts() {
        let whole = HashAlg::Sha256.digest(&[&b"abc"[..]]).unwrap();
        let split = HashAlg::Sha256.digest(&[&b"a"[..], &b""[..], &b"bc"[..]]).unwrap();

        assert_eq!(whole, split);
        assert_eq!(
            whole,
            hex!("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad")
        );
    }

    #[test]
    fn digest_rejects_unknown() {
        assert!(HashAlg::Unknown(0x0012).digest(&[&b"abc"[..]]).is_err());
    }

    #[test]
    fn serde_uses_registry_number() {
        assert_eq!(serde_json::to_string(&HashAlg::Sha384).unwrap(), "12");
        let alg: HashAlg = serde_json::from_str("11").unwrap();
        assert_eq!(alg, HashAlg::Sha256);
    }
}
