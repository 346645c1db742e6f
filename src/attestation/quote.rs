// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

use super::akpub::{AkPublic, SigScheme};
use super::errors::QuoteError;
use super::hashalg::HashAlg;
use crate::store::PublicKey;
use openssl::bn::BigNum;
use openssl::ecdsa::EcdsaSig;
use openssl::error::ErrorStack;
use openssl::rsa::Padding;
use openssl::sign::{RsaPssSaltlen, Verifier};
use serde::{Deserialize, Serialize};
use serde_with::base64::Base64;
use serde_with::hex::Hex;
use serde_with::serde_as;
use std::collections::{BTreeMap, BTreeSet};
use tss_esapi::interface_types::algorithm::HashingAlgorithm;
use tss_esapi::structures::{Attest, AttestInfo, Signature};
use tss_esapi::traits::UnMarshall;

/// TPM_GENERATED_VALUE: every structure the TPM signs starts with it
pub(crate) const TPM_GENERATED_VALUE: u32 = 0xff54_4347;

/// Largest PCR index + 1 a bank may carry
pub const MAX_PCRS: u32 = 32;

/// RSA_PSS_SALTLEN_AUTO: let openssl recover the salt length on verify
const PSS_SALTLEN_AUTO: i32 = -2;

/// The PCR values of one bank, indexed by PCR number
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PcrBank {
    pub hash: HashAlg,
    #[serde_as(as = "BTreeMap<_, Base64>")]
    pub pcrs: BTreeMap<u32, Vec<u8>>,
}

impl PcrBank {
    /// Check that the bank is bounded and every digest has the size of the
    /// bank's algorithm
    pub fn validate(&self) -> Result<(), String> {
        let size = self
            .hash
            .digest_size()
            .ok_or_else(|| format!("unknown PCR bank algorithm {}", self.hash))?;

        if self.pcrs.is_empty() {
            return Err("empty PCR bank".to_string());
        }

        for (idx, v) in self.pcrs.iter() {
            if *idx >= MAX_PCRS {
                return Err(format!("PCR index {idx} out of range"));
            }
            if v.len() != size {
                return Err(format!(
                    "PCR {idx} is {} bytes, {} digests are {size}",
                    v.len(),
                    self.hash
                ));
            }
        }

        Ok(())
    }

    pub fn indices(&self) -> BTreeSet<u32> {
        self.pcrs.keys().copied().collect()
    }

    /// The digest the TPM puts in a quote over this bank: all the PCR values
    /// in ascending index order, hashed with `hash`
    pub fn composite_digest(&self, hash: HashAlg) -> Result<Vec<u8>, String> {
        let parts: Vec<&[u8]> = self.pcrs.values().map(|v| v.as_slice()).collect();
        hash.digest(&parts)
    }
}

/// A TPM2_Quote over one PCR bank
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    /// Marshalled TPMT_SIGNATURE
    #[serde_as(as = "Base64")]
    pub raw_sig: Vec<u8>,
    /// Marshalled TPMS_ATTEST, the signed bytes
    #[serde_as(as = "Base64")]
    pub quote: Vec<u8>,
    /// The PCR values the quote claims to cover
    pub pcrs: PcrBank,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ClockInfo {
    pub clock: u64,
    pub reset_count: u32,
    pub restart_count: u32,
    pub safe: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PcrSelection {
    pub hash: HashAlg,
    pub pcrs: BTreeSet<u32>,
}

/// A decoded TPMS_ATTEST of type TPM_ST_ATTEST_QUOTE
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct QuoteInfo {
    #[serde_as(as = "Hex")]
    pub qualified_signer: Vec<u8>,
    #[serde_as(as = "Hex")]
    pub extra_data: Vec<u8>,
    pub clock_info: ClockInfo,
    pub firmware_version: u64,
    pub pcr_select: Vec<PcrSelection>,
    #[serde_as(as = "Hex")]
    pub pcr_digest: Vec<u8>,
}

fn malformed(e: tss_esapi::Error) -> QuoteError {
    QuoteError::Malformed(e.to_string())
}

fn pcr_selection(sel: &tss_esapi::structures::PcrSelection) -> PcrSelection {
    PcrSelection {
        hash: HashAlg::from(u16::from(sel.hashing_algorithm())),
        pcrs: sel
            .selected()
            .into_iter()
            .map(|slot| (slot as u32).trailing_zeros())
            .collect(),
    }
}

impl QuoteInfo {
    /// Decode a marshalled TPMS_ATTEST, which must be a quote
    pub fn decode(buf: &[u8]) -> Result<QuoteInfo, QuoteError> {
        if !buf.starts_with(&TPM_GENERATED_VALUE.to_be_bytes()) {
            return Err(QuoteError::Malformed(
                "quote data does not start with TPM_GENERATED_VALUE".to_string(),
            ));
        }

        let attest = Attest::unmarshall(buf).map_err(malformed)?;

        let AttestInfo::Quote { info } = attest.attested() else {
            return Err(QuoteError::Malformed(format!(
                "attestation type is {:?}, expecting quote",
                attest.attestation_type()
            )));
        };

        let clock = attest.clock_info();

        Ok(QuoteInfo {
            qualified_signer: attest.qualified_signer().value().to_vec(),
            extra_data: attest.extra_data().value().to_vec(),
            clock_info: ClockInfo {
                clock: clock.clock(),
                reset_count: clock.reset_count(),
                restart_count: clock.restart_count(),
                safe: clock.safe(),
            },
            firmware_version: attest.firmware_version(),
            pcr_select: info
                .pcr_selection()
                .get_selections()
                .iter()
                .map(pcr_selection)
                .collect(),
            pcr_digest: info.pcr_digest().value().to_vec(),
        })
    }
}

/// A decoded TPMT_SIGNATURE
#[derive(Debug)]
enum TpmSignature {
    Rsa {
        scheme: SigScheme,
        hash: HashAlg,
        sig: Vec<u8>,
    },
    Ecdsa {
        hash: HashAlg,
        r: Vec<u8>,
        s: Vec<u8>,
    },
}

fn ossl(e: ErrorStack) -> QuoteError {
    QuoteError::Signature(format!("{e}"))
}

fn hash_of(alg: HashingAlgorithm) -> HashAlg {
    HashAlg::from(u16::from(alg))
}

impl TpmSignature {
    fn decode(buf: &[u8]) -> Result<TpmSignature, QuoteError> {
        let sig = Signature::unmarshall(buf)
            .map_err(|e| QuoteError::Signature(format!("TPMT_SIGNATURE: {e}")))?;

        match sig {
            Signature::RsaSsa(s) => Ok(TpmSignature::Rsa {
                scheme: SigScheme::RsaSsa,
                hash: hash_of(s.hashing_algorithm()),
                sig: s.signature().value().to_vec(),
            }),
            Signature::RsaPss(s) => Ok(TpmSignature::Rsa {
                scheme: SigScheme::RsaPss,
                hash: hash_of(s.hashing_algorithm()),
                sig: s.signature().value().to_vec(),
            }),
            Signature::EcDsa(s) => Ok(TpmSignature::Ecdsa {
                hash: hash_of(s.hashing_algorithm()),
                r: s.signature_r().value().to_vec(),
                s: s.signature_s().value().to_vec(),
            }),
            Signature::Null => Err(QuoteError::Signature("NULL signature".to_string())),
            other => Err(QuoteError::Signature(format!(
                "unsupported signature scheme {:?}",
                other.algorithm()
            ))),
        }
    }

    fn scheme(&self) -> SigScheme {
        match self {
            TpmSignature::Rsa { scheme, .. } => *scheme,
            TpmSignature::Ecdsa { .. } => SigScheme::Ecdsa,
        }
    }

    fn hash(&self) -> HashAlg {
        match self {
            TpmSignature::Rsa { hash, .. } | TpmSignature::Ecdsa { hash, .. } => *hash,
        }
    }

    /// Check the signature over `message` with the AK
    fn verify(&self, ak: &AkPublic, message: &[u8]) -> Result<(), QuoteError> {
        if self.scheme() != ak.scheme() {
            return Err(QuoteError::Signature(format!(
                "signed with {:?}, AK scheme is {:?}",
                self.scheme(),
                ak.scheme()
            )));
        }

        if self.hash() != ak.sign_hash() {
            return Err(QuoteError::Signature(format!(
                "signed with {}, AK signs with {}",
                self.hash(),
                ak.sign_hash()
            )));
        }

        let md = self.hash().message_digest().ok_or_else(|| {
            QuoteError::Signature(format!("no digest implementation for {}", self.hash()))
        })?;

        let pkey = ak.key().to_pkey().map_err(ossl)?;
        let mut verifier = Verifier::new(md, &pkey).map_err(ossl)?;

        let der;
        let sig = match (self, ak.key()) {
            (TpmSignature::Rsa { scheme, sig, .. }, PublicKey::Rsa(_)) => {
                if *scheme == SigScheme::RsaPss {
                    verifier
                        .set_rsa_padding(Padding::PKCS1_PSS)
                        .map_err(ossl)?;
                    verifier
                        .set_rsa_pss_saltlen(RsaPssSaltlen::custom(PSS_SALTLEN_AUTO))
                        .map_err(ossl)?;
                } else {
                    verifier.set_rsa_padding(Padding::PKCS1).map_err(ossl)?;
                }
                sig.as_slice()
            }
            (TpmSignature::Ecdsa { r, s, .. }, PublicKey::Ecc(_)) => {
                let ecdsa = EcdsaSig::from_private_components(
                    BigNum::from_slice(r).map_err(ossl)?,
                    BigNum::from_slice(s).map_err(ossl)?,
                )
                .map_err(ossl)?;
                der = ecdsa.to_der().map_err(ossl)?;
                der.as_slice()
            }
            _ => {
                return Err(QuoteError::Signature(
                    "signature and AK are of different key families".to_string(),
                ))
            }
        };

        verifier.update(message).map_err(ossl)?;

        // openssl reports some malformed signatures as errors rather than
        // as a failed verification
        match verifier.verify(sig) {
            Ok(true) => Ok(()),
            Ok(false) => Err(QuoteError::Signature(
                "signature does not verify".to_string(),
            )),
            Err(e) => Err(ossl(e)),
        }
    }
}

impl Quote {
    /// Verify this quote:
    ///
    /// * the signature is produced by `ak` over the quote data
    /// * the quote data starts with TPM_GENERATED_VALUE
    /// * the quote data is a valid TPMS_ATTEST of type quote
    /// * the quote was taken over exactly this quote's PCRs, and its digest
    ///   matches their values
    /// * the quote's extra data is `nonce`
    pub fn verify(&self, ak: &AkPublic, nonce: &[u8]) -> Result<(), QuoteError> {
        TpmSignature::decode(&self.raw_sig)?.verify(ak, &self.quote)?;

        if !self.quote.starts_with(&TPM_GENERATED_VALUE.to_be_bytes()) {
            return Err(QuoteError::Malformed(
                "quote data does not start with TPM_GENERATED_VALUE".to_string(),
            ));
        }

        let info = QuoteInfo::decode(&self.quote)?;

        self.check_pcrs(&info, ak.sign_hash())?;

        if info.extra_data.len() != nonce.len()
            || !openssl::memcmp::eq(&info.extra_data, nonce)
        {
            return Err(QuoteError::Freshness(format!(
                "quote extra data is {} bytes and does not match the {}-byte nonce",
                info.extra_data.len(),
                nonce.len()
            )));
        }

        Ok(())
    }

    fn check_pcrs(&self, info: &QuoteInfo, hash: HashAlg) -> Result<(), QuoteError> {
        let bank = &self.pcrs;

        bank.validate().map_err(QuoteError::IntegrityMismatch)?;

        match info.pcr_select.as_slice() {
            [sel] if sel.hash == bank.hash && sel.pcrs == bank.indices() => {}
            [sel] => {
                return Err(QuoteError::IntegrityMismatch(format!(
                    "quote selects {} PCRs {:?}, bank has {} PCRs {:?}",
                    sel.hash,
                    sel.pcrs,
                    bank.hash,
                    bank.indices()
                )))
            }
            s => {
                return Err(QuoteError::IntegrityMismatch(format!(
                    "quote selects {} banks, expecting one",
                    s.len()
                )))
            }
        }

        let digest = bank
            .composite_digest(hash)
            .map_err(QuoteError::IntegrityMismatch)?;

        if digest != info.pcr_digest {
            return Err(QuoteError::IntegrityMismatch(format!(
                "quote digest {} does not match PCR digest {}",
                hex::encode(&info.pcr_digest),
                hex::encode(&digest)
            )));
        }

        Ok(())
    }
}
