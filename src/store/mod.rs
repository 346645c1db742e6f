// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

//! Trusted attestation keys: the key shapes an AK can take, how two keys are
//! compared, and an in-memory store loaded from JSON.

pub use self::errors::Error;
pub use self::itrustanchorstore::ITrustAnchorStore;
pub use self::memo_trustanchorstore::MemoTrustAnchorStore;
pub use self::pubkey::{EccCurve, EccPublicKey, KeyEq, PublicKey, RsaPublicKey};
pub use self::trustanchor::TrustAnchor;

mod errors;
mod itrustanchorstore;
mod memo_trustanchorstore;
mod pubkey;
mod trustanchor;
