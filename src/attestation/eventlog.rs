// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

//! Parsing and replay of the TCG PC Client measured-boot event log.
//!
//! Two layouts are understood.  A crypto-agile log starts with a legacy
//! (SHA-1 shaped) `EV_NO_ACTION` event whose data is a "Spec ID Event03"
//! structure announcing the digest algorithms and their sizes; every event
//! after it is a TCG_PCR_EVENT2 carrying one digest per algorithm.  A log
//! without that header is a legacy log of TCG_PCClientPCREvent records, each
//! with a single SHA-1 digest.  All integers in the log are little-endian.

use super::errors::ReplayError;
use super::hashalg::HashAlg;
use super::quote::PcrBank;
use scroll::{Pread, LE};
use serde::{Serialize, Serializer};
use serde_with::hex::Hex;
use serde_with::serde_as;
use std::collections::BTreeMap;
use std::fmt;

pub const MAX_EVENT_LOG_SIZE: usize = 16 << 20;
pub const MAX_EVENTS: usize = 65536;
pub const MAX_EVENT_DATA_SIZE: usize = 1 << 20;
const MAX_DIGEST_ALGS: u32 = 8;

const SPEC_ID_SIGNATURE: &[u8; 16] = b"Spec ID Event03\0";
const SHA1_DIGEST_SIZE: usize = 20;

pub const EV_PREBOOT_CERT: u32 = 0x0000_0000;
pub const EV_POST_CODE: u32 = 0x0000_0001;
pub const EV_NO_ACTION: u32 = 0x0000_0003;
pub const EV_SEPARATOR: u32 = 0x0000_0004;
pub const EV_ACTION: u32 = 0x0000_0005;
pub const EV_EVENT_TAG: u32 = 0x0000_0006;
pub const EV_S_CRTM_CONTENTS: u32 = 0x0000_0007;
pub const EV_S_CRTM_VERSION: u32 = 0x0000_0008;
pub const EV_CPU_MICROCODE: u32 = 0x0000_0009;
pub const EV_PLATFORM_CONFIG_FLAGS: u32 = 0x0000_000A;
pub const EV_TABLE_OF_DEVICES: u32 = 0x0000_000B;
pub const EV_COMPACT_HASH: u32 = 0x0000_000C;
pub const EV_IPL: u32 = 0x0000_000D;
pub const EV_IPL_PARTITION_DATA: u32 = 0x0000_000E;
pub const EV_NONHOST_CODE: u32 = 0x0000_000F;
pub const EV_NONHOST_CONFIG: u32 = 0x0000_0010;
pub const EV_NONHOST_INFO: u32 = 0x0000_0011;
pub const EV_OMIT_BOOT_DEVICE_EVENTS: u32 = 0x0000_0012;
pub const EV_EFI_VARIABLE_DRIVER_CONFIG: u32 = 0x8000_0001;
pub const EV_EFI_VARIABLE_BOOT: u32 = 0x8000_0002;
pub const EV_EFI_BOOT_SERVICES_APPLICATION: u32 = 0x8000_0003;
pub const EV_EFI_BOOT_SERVICES_DRIVER: u32 = 0x8000_0004;
pub const EV_EFI_RUNTIME_SERVICES_DRIVER: u32 = 0x8000_0005;
pub const EV_EFI_GPT_EVENT: u32 = 0x8000_0006;
pub const EV_EFI_ACTION: u32 = 0x8000_0007;
pub const EV_EFI_PLATFORM_FIRMWARE_BLOB: u32 = 0x8000_0008;
pub const EV_EFI_HANDOFF_TABLES: u32 = 0x8000_0009;
pub const EV_EFI_HCRTM_EVENT: u32 = 0x8000_0010;
pub const EV_EFI_VARIABLE_AUTHORITY: u32 = 0x8000_00E0;

/// Events whose digest the PC Client firmware profile defines as the digest
/// of the event data itself.  For these a digest that does not cover the data
/// fails replay.
const DATA_DIGEST_EVENTS: [u32; 9] = [
    EV_SEPARATOR,
    EV_ACTION,
    EV_S_CRTM_VERSION,
    EV_PLATFORM_CONFIG_FLAGS,
    EV_EFI_VARIABLE_DRIVER_CONFIG,
    EV_EFI_VARIABLE_BOOT,
    EV_EFI_VARIABLE_AUTHORITY,
    EV_EFI_GPT_EVENT,
    EV_EFI_ACTION,
];

/// The type of a measurement event
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EventType(pub u32);

impl EventType {
    pub fn name(self) -> Option<&'static str> {
        let n = match self.0 {
            EV_PREBOOT_CERT => "EV_PREBOOT_CERT",
            EV_POST_CODE => "EV_POST_CODE",
            EV_NO_ACTION => "EV_NO_ACTION",
            EV_SEPARATOR => "EV_SEPARATOR",
            EV_ACTION => "EV_ACTION",
            EV_EVENT_TAG => "EV_EVENT_TAG",
            EV_S_CRTM_CONTENTS => "EV_S_CRTM_CONTENTS",
            EV_S_CRTM_VERSION => "EV_S_CRTM_VERSION",
            EV_CPU_MICROCODE => "EV_CPU_MICROCODE",
            EV_PLATFORM_CONFIG_FLAGS => "EV_PLATFORM_CONFIG_FLAGS",
            EV_TABLE_OF_DEVICES => "EV_TABLE_OF_DEVICES",
            EV_COMPACT_HASH => "EV_COMPACT_HASH",
            EV_IPL => "EV_IPL",
            EV_IPL_PARTITION_DATA => "EV_IPL_PARTITION_DATA",
            EV_NONHOST_CODE => "EV_NONHOST_CODE",
            EV_NONHOST_CONFIG => "EV_NONHOST_CONFIG",
            EV_NONHOST_INFO => "EV_NONHOST_INFO",
            EV_OMIT_BOOT_DEVICE_EVENTS => "EV_OMIT_BOOT_DEVICE_EVENTS",
            EV_EFI_VARIABLE_DRIVER_CONFIG => "EV_EFI_VARIABLE_DRIVER_CONFIG",
            EV_EFI_VARIABLE_BOOT => "EV_EFI_VARIABLE_BOOT",
            EV_EFI_BOOT_SERVICES_APPLICATION => "EV_EFI_BOOT_SERVICES_APPLICATION",
            EV_EFI_BOOT_SERVICES_DRIVER => "EV_EFI_BOOT_SERVICES_DRIVER",
            EV_EFI_RUNTIME_SERVICES_DRIVER => "EV_EFI_RUNTIME_SERVICES_DRIVER",
            EV_EFI_GPT_EVENT => "EV_EFI_GPT_EVENT",
            EV_EFI_ACTION => "EV_EFI_ACTION",
            EV_EFI_PLATFORM_FIRMWARE_BLOB => "EV_EFI_PLATFORM_FIRMWARE_BLOB",
            EV_EFI_HANDOFF_TABLES => "EV_EFI_HANDOFF_TABLES",
            EV_EFI_HCRTM_EVENT => "EV_EFI_HCRTM_EVENT",
            EV_EFI_VARIABLE_AUTHORITY => "EV_EFI_VARIABLE_AUTHORITY",
            _ => return None,
        };
        Some(n)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(n) => write!(f, "{n}"),
            None => write!(f, "0x{:08x}", self.0),
        }
    }
}

impl Serialize for EventType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

/// One measurement event, replayed and found consistent with a quoted PCR
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Event {
    pub pcr_index: u32,
    pub event_type: EventType,
    /// The digest extended into the PCR, in the bank's algorithm
    #[serde_as(as = "Hex")]
    pub digest: Vec<u8>,
    #[serde_as(as = "Hex")]
    pub data: Vec<u8>,
    /// Whether `digest` is the digest of `data`.  When it is not, the data
    /// describes something measured elsewhere (an EFI image, a blob) and is
    /// not itself backed by the quote.
    pub digest_verified: bool,
}

/// The verified state of the attested machine.  It can only be obtained from
/// a successful [`super::verify_attestation`], so holding one means its events
/// are backed by a TPM quote.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MachineState {
    hash: HashAlg,
    events: Vec<Event>,
}

impl MachineState {
    pub(crate) fn new(hash: HashAlg, events: Vec<Event>) -> Self {
        Self { hash, events }
    }

    /// The PCR bank algorithm the events were replayed with
    pub fn hash(&self) -> HashAlg {
        self.hash
    }

    /// All the events, in log order
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn pcr_events(&self, pcr_index: u32) -> impl Iterator<Item = &Event> {
        self.events
            .iter()
            .filter(move |e| e.pcr_index == pcr_index)
    }
}

/// An event as found in the log, before replay
struct RawEvent {
    pcr_index: u32,
    event_type: EventType,
    digests: Vec<(HashAlg, Vec<u8>)>,
    data: Vec<u8>,
}

impl RawEvent {
    fn digest(&self, alg: HashAlg) -> Option<&[u8]> {
        self.digests
            .iter()
            .find(|(a, _)| *a == alg)
            .map(|(_, d)| d.as_slice())
    }
}

/// pcrIndex and eventType, shared by both record layouts
#[derive(Pread)]
struct EventHeader {
    pcr_index: u32,
    event_type: u32,
}

fn malformed(what: &'static str) -> impl Fn(scroll::Error) -> ReplayError {
    move |e| ReplayError::Malformed(format!("{what}: {e}"))
}

fn read_event_data(buf: &[u8], off: &mut usize) -> Result<Vec<u8>, ReplayError> {
    let size = buf.gread_with::<u32>(off, LE).map_err(malformed("eventSize"))? as usize;
    if size > MAX_EVENT_DATA_SIZE {
        return Err(ReplayError::Malformed(format!(
            "event at offset {off} has {size} bytes of data"
        )));
    }
    let data: &[u8] = buf.gread_with(off, size).map_err(malformed("event"))?;
    Ok(data.to_vec())
}

fn read_legacy_event(buf: &[u8], off: &mut usize) -> Result<RawEvent, ReplayError> {
    let h: EventHeader = buf.gread_with(off, LE).map_err(malformed("event header"))?;
    let digest: &[u8] = buf
        .gread_with(off, SHA1_DIGEST_SIZE)
        .map_err(malformed("digest"))?;
    let digest = digest.to_vec();
    let data = read_event_data(buf, off)?;

    Ok(RawEvent {
        pcr_index: h.pcr_index,
        event_type: EventType(h.event_type),
        digests: vec![(HashAlg::Sha1, digest)],
        data,
    })
}

fn read_agile_event(
    buf: &[u8],
    off: &mut usize,
    sizes: &BTreeMap<u16, usize>,
) -> Result<RawEvent, ReplayError> {
    let h: EventHeader = buf.gread_with(off, LE).map_err(malformed("event header"))?;

    let count = buf
        .gread_with::<u32>(off, LE)
        .map_err(malformed("digests.count"))?;
    if count > MAX_DIGEST_ALGS {
        return Err(ReplayError::Malformed(format!("event carries {count} digests")));
    }

    let mut digests = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let id = buf
            .gread_with::<u16>(off, LE)
            .map_err(malformed("digests.hashAlg"))?;
        let size = sizes.get(&id).ok_or_else(|| {
            ReplayError::Malformed(format!(
                "digest algorithm 0x{id:04x} not announced in the Spec ID event"
            ))
        })?;
        let digest: &[u8] = buf
            .gread_with(off, *size)
            .map_err(malformed("digests.digest"))?;
        digests.push((HashAlg::from(id), digest.to_vec()));
    }

    let data = read_event_data(buf, off)?;

    Ok(RawEvent {
        pcr_index: h.pcr_index,
        event_type: EventType(h.event_type),
        digests,
        data,
    })
}

/// Returns the digest sizes announced by a Spec ID event, or `None` if the
/// event is not one
fn parse_spec_id(ev: &RawEvent) -> Result<Option<BTreeMap<u16, usize>>, ReplayError> {
    if ev.event_type.0 != EV_NO_ACTION || !ev.data.starts_with(SPEC_ID_SIGNATURE) {
        return Ok(None);
    }

    let buf = &ev.data[..];
    // platformClass (4), specVersion (3), uintnSize (1)
    let mut off = SPEC_ID_SIGNATURE.len() + 8;

    let count = buf
        .gread_with::<u32>(&mut off, LE)
        .map_err(malformed("numberOfAlgorithms"))?;
    if count == 0 || count > MAX_DIGEST_ALGS {
        return Err(ReplayError::Malformed(format!(
            "Spec ID event announces {count} algorithms"
        )));
    }

    let mut sizes = BTreeMap::new();
    for _ in 0..count {
        let id = buf
            .gread_with::<u16>(&mut off, LE)
            .map_err(malformed("algorithmId"))?;
        let size = buf
            .gread_with::<u16>(&mut off, LE)
            .map_err(malformed("digestSize"))? as usize;

        if let Some(known) = HashAlg::from(id).digest_size() {
            if known != size {
                return Err(ReplayError::Malformed(format!(
                    "Spec ID event gives {} a {size}-byte digest",
                    HashAlg::from(id)
                )));
            }
        }

        sizes.insert(id, size);
    }

    let vendor_size = buf
        .gread::<u8>(&mut off)
        .map_err(malformed("vendorInfoSize"))?;
    let _vendor: &[u8] = buf
        .gread_with(&mut off, vendor_size as usize)
        .map_err(malformed("vendorInfo"))?;

    Ok(Some(sizes))
}

fn parse_event_log(raw: &[u8]) -> Result<Vec<RawEvent>, ReplayError> {
    if raw.len() > MAX_EVENT_LOG_SIZE {
        return Err(ReplayError::Malformed(format!(
            "event log is {} bytes, limit is {MAX_EVENT_LOG_SIZE}",
            raw.len()
        )));
    }

    let mut off = 0;
    let first = read_legacy_event(raw, &mut off)?;
    let sizes = parse_spec_id(&first)?;

    let mut events = vec![first];

    while off < raw.len() {
        if events.len() >= MAX_EVENTS {
            return Err(ReplayError::Malformed(format!(
                "event log has more than {MAX_EVENTS} events"
            )));
        }

        let ev = match &sizes {
            Some(sizes) => read_agile_event(raw, &mut off, sizes)?,
            None => read_legacy_event(raw, &mut off)?,
        };
        events.push(ev);
    }

    log::debug!(
        "parsed {} {} event log events",
        events.len(),
        if sizes.is_some() { "crypto-agile" } else { "legacy" }
    );

    Ok(events)
}

/// Parse the event log and replay the events against the PCR bank.  Every PCR
/// in the bank must be reproduced exactly by the log.  Only events that were
/// extended into one of the bank's PCRs make it into the machine state.
pub(crate) fn parse_and_replay_event_log(
    raw: &[u8],
    bank: &PcrBank,
) -> Result<MachineState, ReplayError> {
    bank.validate()
        .map_err(|e| ReplayError::Malformed(format!("PCR bank: {e}")))?;

    let alg = bank.hash;
    let events = parse_event_log(raw)?;

    let mut replayed: BTreeMap<u32, Vec<u8>> = bank
        .pcrs
        .iter()
        .map(|(idx, v)| (*idx, vec![0u8; v.len()]))
        .collect();

    let mut verified = Vec::new();

    for (n, ev) in events.into_iter().enumerate() {
        if ev.event_type.0 == EV_NO_ACTION {
            continue;
        }

        let Some(pcr) = replayed.get_mut(&ev.pcr_index) else {
            continue;
        };

        let Some(digest) = ev.digest(alg) else {
            continue;
        };

        let digest_verified =
            alg.digest(&[ev.data.as_slice()]).map_err(ReplayError::Malformed)? == digest;

        if !digest_verified && DATA_DIGEST_EVENTS.contains(&ev.event_type.0) {
            return Err(ReplayError::Mismatch(format!(
                "event {n} ({}) digest does not cover its data",
                ev.event_type
            )));
        }

        *pcr = alg
            .digest(&[pcr.as_slice(), digest])
            .map_err(ReplayError::Malformed)?;

        verified.push(Event {
            pcr_index: ev.pcr_index,
            event_type: ev.event_type,
            digest: digest.to_vec(),
            data: ev.data,
            digest_verified,
        });
    }

    for (idx, claimed) in bank.pcrs.iter() {
        let got = &replayed[idx];
        if got != claimed {
            return Err(ReplayError::Mismatch(format!(
                "{alg} PCR {idx}: log replays to {}, quoted {}",
                hex::encode(got),
                hex::encode(claimed)
            )));
        }
    }

    Ok(MachineState::new(alg, verified))
}
