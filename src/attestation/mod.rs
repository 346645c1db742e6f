// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

//! The attestation module verifies a TPM 2.0 [`Attestation`]: it authenticates
//! the attestation key, picks a quote over a PCR bank the verifier accepts,
//! checks it against the caller's nonce and replays the measured-boot event
//! log against the quoted PCRs.  Only when all of that succeeds is the
//! resulting [`MachineState`] handed back.
//!
//! # Example
//!
//! The following example assumes that `att` holds the JSON attestation sent
//! by the attester, `nonce` the challenge it was sent, and `jta` the trusted
//! AKs.
//!
//! ```no_run
//! use tpmquote::attestation::{Attestation, VerifyOpts};
//! use tpmquote::store::MemoTrustAnchorStore;
//!
//! # let (att, nonce, jta) = ("", b"", "");
//! let mut tas = MemoTrustAnchorStore::new();
//! tas.load_json(jta).expect("loading trust anchors");
//!
//! let a = Attestation::from_json(att).expect("decoding attestation");
//!
//! let opts = VerifyOpts::from_store(nonce, &tas);
//!
//! let state = a.verify(&opts).expect("verifying attestation");
//!
//! for e in state.events() {
//!     println!("PCR{} {}", e.pcr_index, e.event_type);
//! }
//! ```

pub use self::akpub::{AkPublic, SigScheme, MAX_AK_PUBLIC_SIZE};
pub use self::errors::{Error, QuoteError, ReplayError};
pub use self::eventlog::{
    Event, EventType, MachineState, MAX_EVENTS, MAX_EVENT_DATA_SIZE, MAX_EVENT_LOG_SIZE,
};
pub use self::evidence::{
    check_ak_trusted, supported_quotes, verify_attestation, verify_attestation_with_policy,
    Attestation, DefaultHashPolicy, HashPolicy, VerifyOpts, MAX_QUOTES,
};
pub use self::hashalg::{is_supported, HashAlg, SUPPORTED_HASH_ALGS};
pub use self::quote::{ClockInfo, PcrBank, PcrSelection, Quote, QuoteInfo, MAX_PCRS};

mod akpub;
mod errors;
mod eventlog;
mod evidence;
mod hashalg;
mod quote;

#[cfg(test)]
mod testutil;
