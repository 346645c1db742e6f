// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

use super::akpub::AkPublic;
use super::errors::Error;
use super::eventlog::{parse_and_replay_event_log, MachineState};
use super::hashalg::{self, HashAlg, SUPPORTED_HASH_ALGS};
use super::quote::Quote;
use crate::store::{ITrustAnchorStore, KeyEq, PublicKey};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_with::base64::Base64;
use serde_with::serde_as;

/// Upper bound on the number of quotes an attestation may carry.  A TPM has
/// one quote to offer per PCR bank, and no TPM has this many banks.
pub const MAX_QUOTES: usize = 16;

/// Everything an attester sends to be verified: the AK public area, one quote
/// per PCR bank it is willing to report, and the measured-boot event log.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attestation {
    /// Marshalled TPMT_PUBLIC (or TPM2B_PUBLIC) of the attestation key
    #[serde_as(as = "Base64")]
    pub ak_pub: Vec<u8>,

    pub quotes: Vec<Quote>,

    /// TCG PC Client event log, either legacy or crypto-agile
    #[serde_as(as = "Base64")]
    pub event_log: Vec<u8>,
}

/// What the verifier brings to the table
#[derive(Clone, Debug, Default)]
pub struct VerifyOpts {
    /// The nonce the attester was challenged with
    pub nonce: Vec<u8>,

    /// The AKs provisioned out-of-band
    pub trusted_aks: Vec<PublicKey>,
}

impl VerifyOpts {
    /// Trust every AK in the store
    pub fn from_store(nonce: &[u8], tas: &impl ITrustAnchorStore) -> Self {
        Self {
            nonce: nonce.to_vec(),
            trusted_aks: tas.trusted_keys(),
        }
    }
}

/// The digest algorithms a verifier accepts for AK signatures and PCR banks
pub trait HashPolicy {
    /// Accepted algorithms, most preferred first
    fn preferred(&self) -> &[HashAlg];

    fn is_supported(&self, alg: HashAlg) -> bool {
        self.preferred().contains(&alg)
    }
}

/// SHA-512, then SHA-384, then SHA-256
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultHashPolicy;

impl HashPolicy for DefaultHashPolicy {
    fn preferred(&self) -> &[HashAlg] {
        &SUPPORTED_HASH_ALGS
    }

    fn is_supported(&self, alg: HashAlg) -> bool {
        hashalg::is_supported(alg)
    }
}

impl Attestation {
    /// Decode a JSON-serialised attestation
    pub fn from_json(j: &str) -> Result<Self, Error> {
        serde_json::from_str(j).map_err(|e| Error::Decode(e.to_string()))
    }

    /// See [verify_attestation]
    pub fn verify(&self, opts: &VerifyOpts) -> Result<MachineState, Error> {
        verify_attestation(self, opts)
    }
}

/// Check that `ak` is one of the `trusted` keys.  An empty trust set trusts
/// nothing.
pub fn check_ak_trusted(ak: &PublicKey, trusted: &[PublicKey]) -> Result<(), Error> {
    if trusted.is_empty() {
        return Err(Error::UntrustedKey(
            "no mechanism for AK verification provided".to_string(),
        ));
    }

    if trusted.iter().any(|k| k.key_eq(ak)) {
        Ok(())
    } else {
        Err(Error::UntrustedKey(
            "AK public key is not trusted".to_string(),
        ))
    }
}

/// Pick at most one quote per accepted algorithm, in the policy's order of
/// preference.  When an attester sends two quotes over the same bank the
/// first one wins.  Quotes over banks outside the policy are left out.
pub fn supported_quotes<'a>(quotes: &'a [Quote], policy: &impl HashPolicy) -> Vec<&'a Quote> {
    policy
        .preferred()
        .iter()
        .filter_map(|alg| quotes.iter().find(|q| q.pcrs.hash == *alg))
        .collect()
}

/// Verify an attestation against the default hash policy.  See
/// [verify_attestation_with_policy].
pub fn verify_attestation(att: &Attestation, opts: &VerifyOpts) -> Result<MachineState, Error> {
    verify_attestation_with_policy(att, opts, &DefaultHashPolicy)
}

/// Verify an attestation and, if all is well, return the events that were
/// measured into the quoted PCRs.
///
/// The AK must decode, be trusted and sign with an accepted hash, otherwise
/// verification fails straight away.  Quotes are then tried one at a time in
/// order of preference.  A quote that does not verify, or whose PCRs the
/// event log does not reproduce, is skipped in favour of the next one, and
/// if they all fail the last failure is returned.  A quote that verifies
/// over a bank the policy does not accept ends verification with
/// [Error::UnsupportedPcrAlgorithm].
pub fn verify_attestation_with_policy(
    att: &Attestation,
    opts: &VerifyOpts,
    policy: &impl HashPolicy,
) -> Result<MachineState, Error> {
    let ak = AkPublic::decode(&att.ak_pub)?;
    debug!(
        "AK decoded: {:?} signing with {}",
        ak.scheme(),
        ak.sign_hash()
    );

    check_ak_trusted(ak.key(), &opts.trusted_aks)?;
    debug!("AK trusted");

    if !policy.is_supported(ak.sign_hash()) {
        return Err(Error::UnsupportedSigningAlgorithm(ak.sign_hash()));
    }

    if att.quotes.len() > MAX_QUOTES {
        return Err(Error::Decode(format!(
            "{} quotes, at most {MAX_QUOTES} accepted",
            att.quotes.len()
        )));
    }

    let candidates = supported_quotes(&att.quotes, policy);
    debug!(
        "{} of {} quotes are candidates",
        candidates.len(),
        att.quotes.len()
    );

    let mut last_err = None;

    for quote in candidates {
        let alg = quote.pcrs.hash;

        if let Err(e) = quote.verify(&ak, &opts.nonce) {
            warn!("{alg} quote rejected: {e}");
            last_err = Some(Error::from(e));
            continue;
        }
        debug!("{alg} quote verified");

        let state = match parse_and_replay_event_log(&att.event_log, &quote.pcrs) {
            Ok(state) => state,
            Err(e) => {
                warn!("{alg} event log replay failed: {e}");
                last_err = Some(Error::from(e));
                continue;
            }
        };
        debug!("{alg} event log replayed");

        if !policy.is_supported(alg) {
            return Err(Error::UnsupportedPcrAlgorithm(alg));
        }

        info!(
            "attestation verified over {alg} PCRs {:?}, {} events",
            quote.pcrs.indices(),
            state.events().len()
        );

        return Ok(state);
    }

    Err(last_err.unwrap_or(Error::NoAcceptableQuote))
}
