// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

use super::errors::Error;
use super::hashalg::HashAlg;
use crate::store::{EccCurve, EccPublicKey, PublicKey, RsaPublicKey};
use tss_esapi::interface_types::algorithm::HashingAlgorithm;
use tss_esapi::structures::{EccScheme, Public, RsaScheme};
use tss_esapi::traits::UnMarshall;

const RSA_DEFAULT_EXPONENT: u32 = 65537;

pub const MAX_AK_PUBLIC_SIZE: usize = 4096;

/// The signing schemes an AK can be created with
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SigScheme {
    RsaSsa,
    RsaPss,
    Ecdsa,
}

/// A decoded attestation key: the public key and the hash algorithm its
/// signing scheme uses
#[derive(Clone, Debug)]
pub struct AkPublic {
    key: PublicKey,
    scheme: SigScheme,
    sign_hash: HashAlg,
}

fn hash_of(alg: HashingAlgorithm) -> HashAlg {
    HashAlg::from(u16::from(alg))
}

impl AkPublic {
    /// Decode a marshalled TPMT_PUBLIC.  A TPM2B_PUBLIC (the same structure
    /// behind a size prefix) is accepted too.
    pub fn decode(buf: &[u8]) -> Result<AkPublic, Error> {
        if buf.len() > MAX_AK_PUBLIC_SIZE {
            return Err(Error::Decode(format!(
                "public area is {} bytes, limit is {MAX_AK_PUBLIC_SIZE}",
                buf.len()
            )));
        }

        let buf = match buf {
            [hi, lo, rest @ ..] if u16::from_be_bytes([*hi, *lo]) as usize == rest.len() => rest,
            _ => buf,
        };

        let public =
            Public::unmarshall(buf).map_err(|e| Error::Decode(format!("TPMT_PUBLIC: {e}")))?;

        match public {
            Public::Rsa {
                object_attributes,
                parameters,
                unique,
                ..
            } => {
                if !object_attributes.sign_encrypt() {
                    return Err(Error::Decode("non-signing key used with PCR quote".to_string()));
                }

                let (scheme, sign_hash) = match parameters.rsa_scheme() {
                    RsaScheme::RsaSsa(h) => (SigScheme::RsaSsa, hash_of(h.hashing_algorithm())),
                    RsaScheme::RsaPss(h) => (SigScheme::RsaPss, hash_of(h.hashing_algorithm())),
                    RsaScheme::Null => return Err(no_scheme()),
                    s => return Err(Error::Decode(format!("unsupported signing scheme {s:?}"))),
                };

                let key_bits = u16::from(parameters.key_bits());
                let modulus = unique.value();

                if modulus.len() * 8 != key_bits as usize {
                    return Err(Error::Decode(format!(
                        "modulus is {} bytes for a {key_bits}-bit key",
                        modulus.len()
                    )));
                }

                let exponent = match parameters.exponent().value() {
                    0 => RSA_DEFAULT_EXPONENT,
                    e => e,
                };

                Ok(AkPublic {
                    key: PublicKey::Rsa(RsaPublicKey {
                        modulus: modulus.to_vec(),
                        exponent: exponent.to_be_bytes().to_vec(),
                    }),
                    scheme,
                    sign_hash,
                })
            }

            Public::Ecc {
                object_attributes,
                parameters,
                unique,
                ..
            } => {
                if !object_attributes.sign_encrypt() {
                    return Err(Error::Decode("non-signing key used with PCR quote".to_string()));
                }

                let sign_hash = match parameters.ecc_scheme() {
                    EccScheme::EcDsa(h) => hash_of(h.hashing_algorithm()),
                    EccScheme::Null => return Err(no_scheme()),
                    s => return Err(Error::Decode(format!("unsupported signing scheme {s:?}"))),
                };

                let curve_id = u16::from(parameters.ecc_curve());
                let curve = EccCurve::from_tpm(curve_id)
                    .ok_or_else(|| Error::Decode(format!("unsupported curve 0x{curve_id:04x}")))?;

                Ok(AkPublic {
                    key: PublicKey::Ecc(EccPublicKey {
                        curve,
                        x: unique.x().value().to_vec(),
                        y: unique.y().value().to_vec(),
                    }),
                    scheme: SigScheme::Ecdsa,
                    sign_hash,
                })
            }

            _ => Err(Error::Decode("unsupported key type".to_string())),
        }
    }

    pub fn key(&self) -> &PublicKey {
        &self.key
    }

    pub fn scheme(&self) -> SigScheme {
        self.scheme
    }

    /// The hash algorithm the AK signs with
    pub fn sign_hash(&self) -> HashAlg {
        self.sign_hash
    }
}

fn no_scheme() -> Error {
    Error::Decode("AK has no signing scheme".to_string())
}
