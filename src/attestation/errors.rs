// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

use super::hashalg::HashAlg;

/// Why a single quote could not be verified.  The attestation verifier treats
/// all of these the same way: it moves on to the next quote.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum QuoteError {
    #[error("bad signature: {0}")]
    Signature(String),
    #[error("malformed quote: {0}")]
    Malformed(String),
    #[error("quote does not match the PCRs: {0}")]
    IntegrityMismatch(String),
    #[error("nonce mismatch: {0}")]
    Freshness(String),
}

/// Why the event log could not be replayed against a PCR bank
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ReplayError {
    #[error("malformed event log: {0}")]
    Malformed(String),
    #[error("replayed PCR does not match: {0}")]
    Mismatch(String),
}

#[derive(thiserror::Error, PartialEq, Eq)]
pub enum Error {
    #[error("decoding failed: {0}")]
    Decode(String),
    #[error("AK public key is not trusted: {0}")]
    UntrustedKey(String),
    #[error("in AK public area: unsupported hash algorithm: {0}")]
    UnsupportedSigningAlgorithm(HashAlg),
    #[error("failed to verify quote: {0}")]
    QuoteVerificationFailed(#[from] QuoteError),
    #[error("failed to validate the event log: {0}")]
    ReplayFailed(#[from] ReplayError),
    #[error("when verifying PCRs: unsupported hash algorithm: {0}")]
    UnsupportedPcrAlgorithm(HashAlg),
    #[error("attestation does not contain a supported quote")]
    NoAcceptableQuote,
}

impl Error {
    /// Fatal errors end verification on the spot.  The others are specific to
    /// one quote, and another quote may still verify.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Error::QuoteVerificationFailed(_) | Error::ReplayFailed(_)
        )
    }
}

impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Decode(e) | Error::UntrustedKey(e) => write!(f, "{}", e),
            Error::UnsupportedSigningAlgorithm(a) | Error::UnsupportedPcrAlgorithm(a) => {
                write!(f, "{}", a)
            }
            Error::QuoteVerificationFailed(e) => write!(f, "{:?}", e),
            Error::ReplayFailed(e) => write!(f, "{:?}", e),
            Error::NoAcceptableQuote => write!(f, "{}", self),
        }
    }
}
