// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

use super::errors::Error;
use base64::{engine::general_purpose, Engine as _};
use jsonwebtoken::jwk;
use openssl::bn::{BigNum, BigNumContext};
use openssl::ec::{EcGroup, EcKey};
use openssl::error::ErrorStack;
use openssl::nid::Nid;
use openssl::pkey::{Id, PKey, Public};
use openssl::rsa::Rsa;
use serde::Serialize;

const TPM_ECC_NIST_P256: u16 = 0x0003;
const TPM_ECC_NIST_P384: u16 = 0x0004;
const TPM_ECC_NIST_P521: u16 = 0x0005;

/// Key comparison within one key family.  A key never equals a key of a
/// different family.
pub trait KeyEq {
    fn key_eq(&self, other: &PublicKey) -> bool;
}

/// Big-endian unsigned integers compare by value, not by encoding
fn strip(v: &[u8]) -> &[u8] {
    let first = v.iter().position(|b| *b != 0).unwrap_or(v.len());
    &v[first..]
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum EccCurve {
    NistP256,
    NistP384,
    NistP521,
}

impl EccCurve {
    pub fn from_tpm(id: u16) -> Option<Self> {
        match id {
            TPM_ECC_NIST_P256 => Some(EccCurve::NistP256),
            TPM_ECC_NIST_P384 => Some(EccCurve::NistP384),
            TPM_ECC_NIST_P521 => Some(EccCurve::NistP521),
            _ => None,
        }
    }

    pub fn tpm_id(self) -> u16 {
        match self {
            EccCurve::NistP256 => TPM_ECC_NIST_P256,
            EccCurve::NistP384 => TPM_ECC_NIST_P384,
            EccCurve::NistP521 => TPM_ECC_NIST_P521,
        }
    }

    pub fn nid(self) -> Nid {
        match self {
            EccCurve::NistP256 => Nid::X9_62_PRIME256V1,
            EccCurve::NistP384 => Nid::SECP384R1,
            EccCurve::NistP521 => Nid::SECP521R1,
        }
    }

    fn from_nid(nid: Nid) -> Option<Self> {
        match nid {
            Nid::X9_62_PRIME256V1 => Some(EccCurve::NistP256),
            Nid::SECP384R1 => Some(EccCurve::NistP384),
            Nid::SECP521R1 => Some(EccCurve::NistP521),
            _ => None,
        }
    }
}

#[serde_with::serde_as]
#[derive(Clone, Debug, Serialize)]
pub struct RsaPublicKey {
    #[serde_as(as = "serde_with::hex::Hex")]
    pub modulus: Vec<u8>,
    #[serde_as(as = "serde_with::hex::Hex")]
    pub exponent: Vec<u8>,
}

impl KeyEq for RsaPublicKey {
    fn key_eq(&self, other: &PublicKey) -> bool {
        match other {
            PublicKey::Rsa(o) => {
                strip(&self.modulus) == strip(&o.modulus)
                    && strip(&self.exponent) == strip(&o.exponent)
            }
            _ => false,
        }
    }
}

#[serde_with::serde_as]
#[derive(Clone, Debug, Serialize)]
pub struct EccPublicKey {
    pub curve: EccCurve,
    #[serde_as(as = "serde_with::hex::Hex")]
    pub x: Vec<u8>,
    #[serde_as(as = "serde_with::hex::Hex")]
    pub y: Vec<u8>,
}

impl KeyEq for EccPublicKey {
    fn key_eq(&self, other: &PublicKey) -> bool {
        match other {
            PublicKey::Ecc(o) => {
                self.curve == o.curve
                    && strip(&self.x) == strip(&o.x)
                    && strip(&self.y) == strip(&o.y)
            }
            _ => false,
        }
    }
}

/// The public key shapes an attestation key can take
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "kty")]
pub enum PublicKey {
    Rsa(RsaPublicKey),
    Ecc(EccPublicKey),
}

impl KeyEq for PublicKey {
    fn key_eq(&self, other: &PublicKey) -> bool {
        match self {
            PublicKey::Rsa(k) => k.key_eq(other),
            PublicKey::Ecc(k) => k.key_eq(other),
        }
    }
}

fn b64url(v: &str, what: &str) -> Result<Vec<u8>, Error> {
    general_purpose::URL_SAFE_NO_PAD
        .decode(v)
        .map_err(|e| Error::Syntax(format!("JWK member {what}: {e}")))
}

impl PublicKey {
    /// Convert a JWK (RSA or NIST EC) into a public key
    pub fn from_jwk(k: &jwk::Jwk) -> Result<Self, Error> {
        match &k.algorithm {
            jwk::AlgorithmParameters::RSA(p) => Ok(PublicKey::Rsa(RsaPublicKey {
                modulus: b64url(&p.n, "n")?,
                exponent: b64url(&p.e, "e")?,
            })),
            jwk::AlgorithmParameters::EllipticCurve(p) => {
                let curve = match p.curve {
                    jwk::EllipticCurve::P256 => EccCurve::NistP256,
                    jwk::EllipticCurve::P384 => EccCurve::NistP384,
                    jwk::EllipticCurve::P521 => EccCurve::NistP521,
                    ref c => return Err(Error::UnsupportedKey(format!("unsupported EC curve {c:?}"))),
                };

                Ok(PublicKey::Ecc(EccPublicKey {
                    curve,
                    x: b64url(&p.x, "x")?,
                    y: b64url(&p.y, "y")?,
                }))
            }
            a => Err(Error::UnsupportedKey(format!("unsupported key parameters {a:?}"))),
        }
    }

    /// Convert a PEM-encoded SubjectPublicKeyInfo into a public key
    pub fn from_pem(pem: &[u8]) -> Result<Self, Error> {
        let pkey = PKey::public_key_from_pem(pem).map_err(|e| Error::Syntax(format!("{e}")))?;

        Self::from_pkey(&pkey)
    }

    fn from_pkey(pkey: &PKey<Public>) -> Result<Self, Error> {
        let ossl = |e: ErrorStack| Error::Syntax(format!("{e}"));

        match pkey.id() {
            Id::RSA => {
                let rsa = pkey.rsa().map_err(ossl)?;

                Ok(PublicKey::Rsa(RsaPublicKey {
                    modulus: rsa.n().to_vec(),
                    exponent: rsa.e().to_vec(),
                }))
            }
            Id::EC => {
                let ec = pkey.ec_key().map_err(ossl)?;
                let group = ec.group();
                let curve = group
                    .curve_name()
                    .and_then(EccCurve::from_nid)
                    .ok_or_else(|| Error::UnsupportedKey("unsupported EC curve".to_string()))?;

                let mut ctx = BigNumContext::new().map_err(ossl)?;
                let mut x = BigNum::new().map_err(ossl)?;
                let mut y = BigNum::new().map_err(ossl)?;
                ec.public_key()
                    .affine_coordinates(group, &mut x, &mut y, &mut ctx)
                    .map_err(ossl)?;

                Ok(PublicKey::Ecc(EccPublicKey {
                    curve,
                    x: x.to_vec(),
                    y: y.to_vec(),
                }))
            }
            id => Err(Error::UnsupportedKey(format!("unsupported key type {id:?}"))),
        }
    }

    /// Instantiate the key for use with openssl's verifier
    pub fn to_pkey(&self) -> Result<PKey<Public>, ErrorStack> {
        match self {
            PublicKey::Rsa(k) => {
                let rsa = Rsa::from_public_components(
                    BigNum::from_slice(&k.modulus)?,
                    BigNum::from_slice(&k.exponent)?,
                )?;
                PKey::from_rsa(rsa)
            }
            PublicKey::Ecc(k) => {
                let group = EcGroup::from_curve_name(k.curve.nid())?;
                let x = BigNum::from_slice(&k.x)?;
                let y = BigNum::from_slice(&k.y)?;
                let ec = EcKey::from_public_key_affine_coordinates(&group, &x, &y)?;
                PKey::from_ec_key(ec)
            }
        }
    }
}
