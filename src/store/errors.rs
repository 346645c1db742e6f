// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

/// Errors loading trusted AKs
#[derive(thiserror::Error, PartialEq, Eq)]
pub enum Error {
    /// The store JSON, a JWK member or a PEM document does not parse
    #[error("malformed trust anchor: {0}")]
    Syntax(String),
    /// The key parses but is not one an AK can be (RSA, NIST P-256/384/521)
    #[error("unsupported AK key: {0}")]
    UnsupportedKey(String),
}

impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Syntax(e) | Error::UnsupportedKey(e) => write!(f, "{e}"),
        }
    }
}
