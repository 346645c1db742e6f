// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

//! TPM 2.0 remote attestation verification.
//!
//! This crate provides an API to verify the evidence a TPM-equipped machine
//! produces to prove its boot state: a set of PCR quotes signed by an
//! attestation key (AK), and the TCG PC Client measured-boot event log that
//! explains the quoted PCR values.  For detailed information about the
//! formats, see Part 2 of the TPM 2.0 Library [TPM2] specification and the
//! PC Client Platform Firmware Profile [PFP].
//!
//! The API allows:
//! * Loading the trusted AKs from a JSON trust anchor store
//! * Decoding a TPM AK public area, PCR quotes and an event log
//! * Verifying that a quote was signed by a trusted AK over the expected
//!   nonce, and that the event log replays to the quoted PCR values
//!
//! [TPM2]: https://trustedcomputinggroup.org/resource/tpm-library-specification/
//! [PFP]: https://trustedcomputinggroup.org/resource/pc-client-specific-platform-firmware-profile-specification/

pub mod attestation;
pub mod store;
