// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

use super::pubkey::PublicKey;
use super::trustanchor::TrustAnchor;

/// Interface to the store where the trusted AKs are stashed.
pub trait ITrustAnchorStore {
    /// Lookup a trust anchor from the store given its name
    fn lookup(&self, name: &str) -> Option<TrustAnchor>;

    /// All the trusted AK public keys in the store
    fn trusted_keys(&self) -> Vec<PublicKey>;
}
