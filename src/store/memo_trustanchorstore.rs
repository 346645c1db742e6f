// Copyright 2023-2025 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

use super::errors::Error;
use super::pubkey::PublicKey;
use super::trustanchor::TrustAnchor;
use super::ITrustAnchorStore;
use std::collections::BTreeMap;

/// The store where the trusted AKs are stashed.  AKs are indexed by name.
#[derive(Debug, Default)]
pub struct MemoTrustAnchorStore {
    p: BTreeMap<String, TrustAnchor>,
}

impl MemoTrustAnchorStore {
    /// Returns a new empty TrustAnchorStore
    pub fn new() -> Self {
        Self {
            p: Default::default(),
        }
    }

    /// Add to an existing (and possibly empty) TrustAnchorStore the trust
    /// anchors loaded from the given JSON file.  Nothing is added if any of
    /// the entries is invalid.
    pub fn load_json(&mut self, j: &str) -> Result<(), Error> {
        let mut tas: Vec<TrustAnchor> =
            serde_json::from_str(j).map_err(|e| Error::Syntax(e.to_string()))?;

        for ta in tas.iter_mut() {
            ta.parse_pkey()?;
        }

        for ta in tas {
            if self.p.contains_key(&ta.name) {
                log::warn!("replacing trust anchor {}", ta.name);
            }
            self.p.insert(ta.name.clone(), ta);
        }

        Ok(())
    }

    pub fn len(&self) -> usize {
        self.p.len()
    }

    pub fn is_empty(&self) -> bool {
        self.p.is_empty()
    }
}

impl ITrustAnchorStore for MemoTrustAnchorStore {
    /// Lookup a trust anchor from the store given its name
    fn lookup(&self, name: &str) -> Option<TrustAnchor> {
        self.p.get(name).cloned()
    }

    fn trusted_keys(&self) -> Vec<PublicKey> {
        self.p.values().filter_map(|ta| ta.pkey.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{EccCurve, KeyEq};

    const TEST_JSON_TA_OK_0: &str = r#"[
        {
            "name": "host-a",
            "pkey": { "kty": "RSA", "n": "wQI", "e": "AQAB" }
        },
        {
            "name": "host-b",
            "pkey": {
                "kty": "EC",
                "crv": "P-256",
                "x": "MKBCTNIcKUSDii11ySs3526iDZ8AiTo7Tu6KPAqv7D4",
                "y": "4Etl6SRW2YiLUrN5vfvVHuhp7x8PxltmWWlbbM4IFyM"
            }
        }
    ]"#;

    const TEST_JSON_TA_BAD_KEY: &str = r#"[
        { "name": "host-c", "pkey": { "kty": "RSA", "n": "wQI", "e": "AQAB" } },
        { "name": "host-d", "pkey": { "kty": "RSA", "n": "!!!", "e": "AQAB" } }
    ]"#;

    #[test]
    fn load_json_and_lookup_ok() {
        let mut s: MemoTrustAnchorStore = Default::default();

        // load store from JSON
        s.load_json(TEST_JSON_TA_OK_0).unwrap();
        assert_eq!(s.len(), 2);

        // lookup a known trust anchor
        let ta = s.lookup("host-b");
        assert!(ta.is_some());

        match ta.unwrap().pkey {
            Some(PublicKey::Ecc(k)) => assert_eq!(k.curve, EccCurve::NistP256),
            other => panic!("unexpected key {other:?}"),
        }

        assert!(s.lookup("host-z").is_none());
    }

    #[test]
    fn trusted_keys_are_all_parsed_keys() {
        let mut s = MemoTrustAnchorStore::new();
        s.load_json(TEST_JSON_TA_OK_0).unwrap();

        let keys = s.trusted_keys();
        assert_eq!(keys.len(), 2);

        let rsa = s.lookup("host-a").unwrap().pkey.unwrap();
        assert!(keys.iter().any(|k| k.key_eq(&rsa)));
    }

    #[test]
    fn bad_entry_leaves_store_untouched() {
        let mut s = MemoTrustAnchorStore::new();

        let r = s.load_json(TEST_JSON_TA_BAD_KEY);

        assert!(matches!(r, Err(Error::Syntax(_))));
        assert!(s.is_empty());
    }

    #[test]
    fn not_json() {
        let mut s = MemoTrustAnchorStore::new();

        assert!(s.load_json("{").is_err());
    }
}
