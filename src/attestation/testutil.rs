// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

//! Fixtures for the unit tests: an in-process stand-in for a TPM that marshals
//! public areas, quotes and signatures, and a measured-boot log builder.

use super::akpub::SigScheme;
use super::eventlog::EV_NO_ACTION;
use super::hashalg::HashAlg;
use super::quote::{PcrBank, Quote, TPM_GENERATED_VALUE};
use crate::store::{EccCurve, PublicKey};
use openssl::bn::{BigNum, BigNumContext};
use openssl::ec::{EcGroup, EcKey};
use openssl::ecdsa::EcdsaSig;
use openssl::pkey::{PKey, Private};
use openssl::rsa::{Padding, Rsa};
use openssl::sign::{RsaPssSaltlen, Signer};
use std::collections::BTreeMap;

pub(crate) const TPM_ALG_RSA: u16 = 0x0001;
pub(crate) const TPM_ALG_NULL: u16 = 0x0010;
pub(crate) const TPM_ALG_RSASSA: u16 = 0x0014;
pub(crate) const TPM_ALG_RSAPSS: u16 = 0x0016;
pub(crate) const TPM_ALG_ECDSA: u16 = 0x0018;
pub(crate) const TPM_ALG_ECC: u16 = 0x0023;

/// TPMA_OBJECT sign / encrypt
pub(crate) const TPMA_OBJECT_SIGN: u32 = 0x0004_0000;

pub(crate) const TPM_ST_ATTEST_QUOTE: u16 = 0x8018;

/// fixedTPM | fixedParent | sensitiveDataOrigin | userWithAuth | restricted
const AK_ATTRIBUTES: u32 = 0x0000_0002 | 0x0000_0010 | 0x0000_0020 | 0x0000_0040 | 0x0001_0000;

#[derive(Default)]
pub(crate) struct Writer(Vec<u8>);

impl Writer {
    pub fn u8(&mut self, v: u8) -> &mut Self {
        self.0.push(v);
        self
    }

    pub fn u16(&mut self, v: u16) -> &mut Self {
        self.bytes(&v.to_be_bytes())
    }

    pub fn u32(&mut self, v: u32) -> &mut Self {
        self.bytes(&v.to_be_bytes())
    }

    pub fn u64(&mut self, v: u64) -> &mut Self {
        self.bytes(&v.to_be_bytes())
    }

    pub fn u16_le(&mut self, v: u16) -> &mut Self {
        self.bytes(&v.to_le_bytes())
    }

    pub fn u32_le(&mut self, v: u32) -> &mut Self {
        self.bytes(&v.to_le_bytes())
    }

    pub fn bytes(&mut self, v: &[u8]) -> &mut Self {
        self.0.extend_from_slice(v);
        self
    }

    pub fn tpm2b(&mut self, v: &[u8]) -> &mut Self {
        self.u16(v.len() as u16).bytes(v)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.0
    }
}

fn scheme_id(scheme: SigScheme) -> u16 {
    match scheme {
        SigScheme::RsaSsa => TPM_ALG_RSASSA,
        SigScheme::RsaPss => TPM_ALG_RSAPSS,
        SigScheme::Ecdsa => TPM_ALG_ECDSA,
    }
}

/// A bank where PCR `idx` holds `fill` repeated to the digest size
pub(crate) fn bank(hash: HashAlg, pcrs: &[(u32, u8)]) -> PcrBank {
    let size = hash.digest_size().unwrap();

    PcrBank {
        hash,
        pcrs: pcrs.iter().map(|(i, f)| (*i, vec![*f; size])).collect(),
    }
}

/// An attestation key with its private half, so that tests can sign quotes
pub(crate) struct TestAk {
    pkey: PKey<Private>,
    curve: Option<EccCurve>,
    scheme: SigScheme,
    hash: HashAlg,
}

impl std::fmt::Debug for TestAk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TestAk({:?}, {})", self.scheme, self.hash)
    }
}

impl TestAk {
    pub fn rsa(hash: HashAlg, scheme: SigScheme) -> TestAk {
        let rsa = Rsa::generate(2048).unwrap();

        TestAk {
            pkey: PKey::from_rsa(rsa).unwrap(),
            curve: None,
            scheme,
            hash,
        }
    }

    pub fn ecc(curve: EccCurve, hash: HashAlg) -> TestAk {
        let group = EcGroup::from_curve_name(curve.nid()).unwrap();
        let ec = EcKey::generate(&group).unwrap();

        TestAk {
            pkey: PKey::from_ec_key(ec).unwrap(),
            curve: Some(curve),
            scheme: SigScheme::Ecdsa,
            hash,
        }
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey::from_pem(&self.pkey.public_key_to_pem().unwrap()).unwrap()
    }

    /// The marshalled TPMT_PUBLIC of this key
    pub fn public_area(&self) -> Vec<u8> {
        let mut w = Writer::default();

        match self.curve {
            None => {
                let rsa = self.pkey.rsa().unwrap();
                let e = rsa.e().to_vec();
                let exponent = if e == [0x01, 0x00, 0x01] {
                    0
                } else {
                    u32::from_be_bytes(<[u8; 4]>::try_from(&e[..]).unwrap())
                };
                let n = rsa.n().to_vec();

                w.u16(TPM_ALG_RSA)
                    .u16(HashAlg::Sha256.id())
                    .u32(AK_ATTRIBUTES | TPMA_OBJECT_SIGN)
                    .tpm2b(&[])
                    .u16(TPM_ALG_NULL)
                    .u16(scheme_id(self.scheme))
                    .u16(self.hash.id())
                    .u16((n.len() * 8) as u16)
                    .u32(exponent)
                    .tpm2b(&n);
            }
            Some(curve) => {
                let ec = self.pkey.ec_key().unwrap();
                let group = ec.group();
                let size = (group.degree() as i32 + 7) / 8;

                let mut ctx = BigNumContext::new().unwrap();
                let mut x = BigNum::new().unwrap();
                let mut y = BigNum::new().unwrap();
                ec.public_key()
                    .affine_coordinates(group, &mut x, &mut y, &mut ctx)
                    .unwrap();

                w.u16(TPM_ALG_ECC)
                    .u16(HashAlg::Sha256.id())
                    .u32(AK_ATTRIBUTES | TPMA_OBJECT_SIGN)
                    .tpm2b(&[])
                    .u16(TPM_ALG_NULL)
                    .u16(scheme_id(self.scheme))
                    .u16(self.hash.id())
                    .u16(curve.tpm_id())
                    .u16(TPM_ALG_NULL)
                    .tpm2b(&x.to_vec_padded(size).unwrap())
                    .tpm2b(&y.to_vec_padded(size).unwrap());
            }
        }

        w.into_inner()
    }

    /// The marshalled TPMS_ATTEST a TPM would produce quoting `bank` with
    /// `nonce` as extra data
    pub fn quote_info(&self, bank: &PcrBank, nonce: &[u8]) -> Vec<u8> {
        let digest = bank.composite_digest(self.hash).unwrap();

        let mut bitmap = [0u8; 3];
        for idx in bank.pcrs.keys() {
            bitmap[(*idx / 8) as usize] |= 1u8 << (idx % 8);
        }

        let mut w = Writer::default();
        w.u32(TPM_GENERATED_VALUE)
            .u16(TPM_ST_ATTEST_QUOTE)
            .tpm2b(&[0x00, 0x0b, 0xaa, 0xbb])
            .tpm2b(nonce)
            .u64(123_456)
            .u32(3)
            .u32(1)
            .u8(1)
            .u64(0x2000_0001_0000_0000)
            .u32(1)
            .u16(bank.hash.id())
            .u8(bitmap.len() as u8)
            .bytes(&bitmap)
            .tpm2b(&digest);

        w.into_inner()
    }

    /// Sign arbitrary quote data with the AK's own hash
    pub fn sign_quote_info(&self, info: Vec<u8>, bank: PcrBank) -> Quote {
        self.sign_with(info, bank, self.hash)
    }

    pub fn quote(&self, bank: &PcrBank, nonce: &[u8]) -> Quote {
        self.sign_quote_info(self.quote_info(bank, nonce), bank.clone())
    }

    /// A quote whose signature uses `hash` instead of the AK's hash
    pub fn quote_with_hash(&self, bank: &PcrBank, nonce: &[u8], hash: HashAlg) -> Quote {
        self.sign_with(self.quote_info(bank, nonce), bank.clone(), hash)
    }

    fn sign_with(&self, info: Vec<u8>, bank: PcrBank, hash: HashAlg) -> Quote {
        let md = hash.message_digest().unwrap();
        let mut w = Writer::default();

        match self.scheme {
            SigScheme::RsaSsa | SigScheme::RsaPss => {
                let mut signer = Signer::new(md, &self.pkey).unwrap();
                if self.scheme == SigScheme::RsaPss {
                    signer.set_rsa_padding(Padding::PKCS1_PSS).unwrap();
                    signer
                        .set_rsa_pss_saltlen(RsaPssSaltlen::DIGEST_LENGTH)
                        .unwrap();
                } else {
                    signer.set_rsa_padding(Padding::PKCS1).unwrap();
                }
                signer.update(&info).unwrap();
                let sig = signer.sign_to_vec().unwrap();

                w.u16(scheme_id(self.scheme)).u16(hash.id()).tpm2b(&sig);
            }
            SigScheme::Ecdsa => {
                let digest = hash.digest(&[info.as_slice()]).unwrap();
                let ec = self.pkey.ec_key().unwrap();
                let sig = EcdsaSig::sign(&digest, &ec).unwrap();

                w.u16(scheme_id(self.scheme))
                    .u16(hash.id())
                    .tpm2b(&sig.r().to_vec())
                    .tpm2b(&sig.s().to_vec());
            }
        }

        Quote {
            raw_sig: w.into_inner(),
            quote: info,
            pcrs: bank,
        }
    }
}

/// Builds a crypto-agile event log and keeps track of the PCR values a TPM
/// would hold after measuring it
pub(crate) struct EventLogBuilder {
    algs: Vec<HashAlg>,
    header: Vec<u8>,
    body: Writer,
    pcrs: BTreeMap<(HashAlg, u32), Vec<u8>>,
    digest_offsets: Vec<(HashAlg, usize)>,
}

impl EventLogBuilder {
    pub fn new(algs: &[HashAlg]) -> Self {
        let mut spec_id = Writer::default();
        spec_id
            .bytes(b"Spec ID Event03\0")
            .u32_le(0)
            .u8(0)
            .u8(2)
            .u8(0)
            .u8(2)
            .u32_le(algs.len() as u32);
        for alg in algs {
            spec_id
                .u16_le(alg.id())
                .u16_le(alg.digest_size().unwrap() as u16);
        }
        spec_id.u8(0);
        let spec_id = spec_id.into_inner();

        let mut header = Writer::default();
        header
            .u32_le(0)
            .u32_le(EV_NO_ACTION)
            .bytes(&[0; 20])
            .u32_le(spec_id.len() as u32)
            .bytes(&spec_id);

        Self {
            algs: algs.to_vec(),
            header: header.into_inner(),
            body: Writer::default(),
            pcrs: BTreeMap::new(),
            digest_offsets: Vec::new(),
        }
    }

    fn push(&mut self, pcr: u32, event_type: u32, data: &[u8], measured: Option<&[u8]>) {
        let base = self.header.len();

        self.body
            .u32_le(pcr)
            .u32_le(event_type)
            .u32_le(self.algs.len() as u32);

        for alg in self.algs.clone() {
            let size = alg.digest_size().unwrap();
            let digest = match measured {
                Some(m) => alg.digest(&[m]).unwrap(),
                None => vec![0; size],
            };

            self.body.u16_le(alg.id());
            if measured.is_some() {
                self.digest_offsets.push((alg, base + self.body.len()));

                let reg = self
                    .pcrs
                    .entry((alg, pcr))
                    .or_insert_with(|| vec![0; size]);
                *reg = alg.digest(&[reg.as_slice(), digest.as_slice()]).unwrap();
            }
            self.body.bytes(&digest);
        }

        self.body.u32_le(data.len() as u32).bytes(data);
    }

    /// Measure `data` into `pcr`
    pub fn event(&mut self, pcr: u32, event_type: u32, data: &[u8]) -> &mut Self {
        self.push(pcr, event_type, data, Some(data));
        self
    }

    /// Measure `image` into `pcr`, logging `data` as its description
    pub fn image(&mut self, pcr: u32, event_type: u32, data: &[u8], image: &[u8]) -> &mut Self {
        self.push(pcr, event_type, data, Some(image));
        self
    }

    pub fn no_action(&mut self, data: &[u8]) -> &mut Self {
        self.push(0, EV_NO_ACTION, data, None);
        self
    }

    pub fn header_len(&self) -> usize {
        self.header.len()
    }

    /// Offsets in the log of every extended digest in `alg`
    pub fn digest_offsets(&self, alg: HashAlg) -> Vec<usize> {
        self.digest_offsets
            .iter()
            .filter(|(a, _)| *a == alg)
            .map(|(_, off)| *off)
            .collect()
    }

    pub fn bytes(&self) -> Vec<u8> {
        let mut log = self.header.clone();
        log.extend_from_slice(&self.body.0);
        log
    }

    /// The bank a TPM would report for `pcrs` after measuring this log
    pub fn bank(&self, hash: HashAlg, pcrs: &[u32]) -> PcrBank {
        let size = hash.digest_size().unwrap();

        PcrBank {
            hash,
            pcrs: pcrs
                .iter()
                .map(|i| {
                    let v = self
                        .pcrs
                        .get(&(hash, *i))
                        .cloned()
                        .unwrap_or_else(|| vec![0; size]);
                    (*i, v)
                })
                .collect(),
        }
    }
}
