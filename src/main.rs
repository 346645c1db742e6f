// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

use clap::Parser;
use std::error::Error;
use std::fs;
use tpmquote::attestation::{AkPublic, Attestation, MachineState, QuoteInfo, VerifyOpts};
use tpmquote::store::MemoTrustAnchorStore;

#[derive(Parser)]
enum TpmQuoteCli {
    Verify(VerifyArgs),
    InspectQuote(InspectQuoteArgs),
    InspectAk(InspectAkArgs),
}

#[derive(Debug, clap::Args)]
#[command(author, version, long_about = None,
    about = "Verify the supplied TPM attestation using the AKs in the trust \
    anchor store and print the verified machine state")]
struct VerifyArgs {
    #[arg(short, long, default_value = "attestation.json")]
    attestation: String,

    #[arg(short, long, default_value = "tastore.json")]
    tastore: String,

    /// The nonce the attester was challenged with, hex encoded
    #[arg(short, long)]
    nonce: String,
}

#[derive(Debug, clap::Args)]
#[command(author, version, long_about = None,
    about = "Decode a marshalled TPMS_ATTEST quote structure (no verification)")]
struct InspectQuoteArgs {
    #[arg(short, long, default_value = "quote.bin")]
    quote: String,
}

#[derive(Debug, clap::Args)]
#[command(author, version, long_about = None,
    about = "Decode a marshalled TPMT_PUBLIC attestation key (no verification)")]
struct InspectAkArgs {
    #[arg(short, long, default_value = "ak.pub")]
    ak: String,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match TpmQuoteCli::parse() {
        TpmQuoteCli::Verify(args) => match verify(&args) {
            Ok(state) => match serde_json::to_string_pretty(&state) {
                Ok(j) => println!("{j}"),
                Err(e) => eprintln!("serialising machine state failed: {e}"),
            },
            Err(e) => eprintln!("verification failed: {e}"),
        },

        TpmQuoteCli::InspectQuote(args) => match inspect_quote(&args) {
            Ok(j) => println!("{j}"),
            Err(e) => eprintln!("quote decoding failed: {e}"),
        },

        TpmQuoteCli::InspectAk(args) => match inspect_ak(&args) {
            Ok(ak) => {
                println!("scheme: {:?}", ak.scheme());
                println!("signing hash: {}", ak.sign_hash());
                match serde_json::to_string_pretty(ak.key()) {
                    Ok(j) => println!("key: {j}"),
                    Err(e) => eprintln!("serialising key failed: {e}"),
                }
            }
            Err(e) => eprintln!("AK decoding failed: {e}"),
        },
    }
}

fn verify(args: &VerifyArgs) -> Result<MachineState, Box<dyn Error>> {
    let j = fs::read_to_string(&args.tastore)?;

    let mut tas = MemoTrustAnchorStore::new();
    tas.load_json(&j)?;

    let nonce = hex::decode(&args.nonce)?;

    let a = Attestation::from_json(&fs::read_to_string(&args.attestation)?)?;

    let state = a.verify(&VerifyOpts::from_store(&nonce, &tas))?;

    Ok(state)
}

fn inspect_quote(args: &InspectQuoteArgs) -> Result<String, Box<dyn Error>> {
    let c: Vec<u8> = fs::read(&args.quote)?;

    let q = QuoteInfo::decode(&c)?;

    Ok(serde_json::to_string_pretty(&q)?)
}

fn inspect_ak(args: &InspectAkArgs) -> Result<AkPublic, Box<dyn Error>> {
    let c: Vec<u8> = fs::read(&args.ak)?;

    Ok(AkPublic::decode(&c)?)
}
