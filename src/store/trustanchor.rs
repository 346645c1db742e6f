// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

use super::errors::Error;
use super::pubkey::PublicKey;
use jsonwebtoken::jwk::Jwk;
use serde::Deserialize;
use serde_json::value::RawValue;

/// A trusted attestation key and associated metadata
#[derive(Clone, Deserialize, Debug)]
pub struct TrustAnchor {
    /// The AK public key, serialised as a JWK (RSA or NIST EC)
    #[serde(rename(deserialize = "pkey"))]
    raw_pkey: Box<RawValue>,

    #[serde(skip)]
    pub pkey: Option<PublicKey>,

    /// A name the operator uses to tell AKs apart, e.g., the host name of
    /// the machine the AK was provisioned on.  Names are unique within a
    /// store.
    pub name: String,
}

impl TrustAnchor {
    pub fn parse_pkey(&mut self) -> Result<(), Error> {
        let jwk = serde_json::from_str::<Jwk>(self.raw_pkey.get())
            .map_err(|e| Error::Syntax(format!("{}: {e}", self.name)))?;

        self.pkey = Some(PublicKey::from_jwk(&jwk)?);

        Ok(())
    }
}
