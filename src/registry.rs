//! Expected publishers, looked up per frame by APPID.
//!
//! A registry is filled once at startup and never grows while frames are
//! processed. Lookups go through a direct-mapped table with one slot per
//! APPID, followed by a full comparison of the frame's passport against the
//! stored identity.

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::decode_goose::{GoosePassport, GooseState};
use crate::decode_smv::{SvPassport, SvState};
use crate::sequence::{GooseSequence, SvSequence};
use crate::types::{MacAddr, UtcTime};
use crate::worker::worker_index;

const SLOT_COUNT: usize = 1 << 16;
const EMPTY_SLOT: u32 = u32::MAX;

/// Destination MAC of the synthetic GOOSE publishers
pub const GOOSE_MULTICAST: MacAddr = MacAddr::new([0x01, 0x0c, 0xcd, 0x04, 0x00, 0x00]);
/// Destination MAC of the synthetic SV streams
pub const SV_MULTICAST: MacAddr = MacAddr::new([0x01, 0x0c, 0xcd, 0x01, 0x00, 0x01]);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("APPID {appid:#06x} is already registered")]
    DuplicateAppId { appid: u16 },
    #[error("{count} sources do not fit into the APPID space")]
    TooManySources { count: usize },
}

/// Anything that is bucketed by its APPID.
pub trait AppIdKeyed {
    fn appid(&self) -> u16;
}

/// A tracked source that can decide whether a passport belongs to it.
pub trait Identifies<P> {
    fn identifies(&self, passport: &P) -> bool;
}

impl AppIdKeyed for GoosePassport<'_> {
    fn appid(&self) -> u16 {
        self.appid
    }
}

impl AppIdKeyed for SvPassport<'_> {
    fn appid(&self) -> u16 {
        self.appid
    }
}

/// A configured GOOSE publisher and its sequencing state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GooseSource {
    pub dst_mac: MacAddr,
    pub appid: u16,
    pub num_entries: u32,
    pub conf_rev: u32,
    pub gocb_ref: String,
    pub dataset: String,
    pub go_id: String,
    pub sequence: GooseSequence,
    pub last_timestamp: Option<UtcTime>,
}

impl GooseSource {
    /// Publisher number `index` (0-based) of the synthetic test setup.
    pub fn synthetic(index: u16) -> Self {
        let number = index as u32 + 1;
        GooseSource {
            dst_mac: GOOSE_MULTICAST,
            appid: index.wrapping_add(1),
            num_entries: 16,
            conf_rev: 1,
            gocb_ref: format!("IED{:08}LDName/LLN0$GO$GOCB", number),
            dataset: format!("IED{:08}LDName/LLN0$DataSet", number),
            go_id: format!("GOID{:08}", number),
            sequence: GooseSequence::default(),
            last_timestamp: None,
        }
    }

    /// Feeds one frame into the sequence tracker. Returns true on an anomaly.
    pub fn update(&mut self, state: &GooseState) -> bool {
        if state.timestamp.is_some() {
            self.last_timestamp = state.timestamp;
        }
        self.sequence.update(state)
    }
}

impl AppIdKeyed for GooseSource {
    fn appid(&self) -> u16 {
        self.appid
    }
}

impl Identifies<GoosePassport<'_>> for GooseSource {
    fn identifies(&self, passport: &GoosePassport<'_>) -> bool {
        self.appid == passport.appid
            && self.dst_mac == passport.dst_mac
            && self.num_entries == passport.num_entries
            && self.conf_rev == passport.conf_rev
            && self.gocb_ref.as_bytes() == passport.gocb_ref
            && self.dataset.as_bytes() == passport.dataset
            && self.go_id.as_bytes() == passport.go_id
    }
}

/// A configured SV stream and its sequencing state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SvSource {
    pub dst_mac: MacAddr,
    pub appid: u16,
    pub num_asdu: u16,
    pub conf_rev: u32,
    pub sv_id: String,
    pub sequence: SvSequence,
}

impl SvSource {
    /// Stream number `index` (0-based) of the synthetic test setup.
    pub fn synthetic(index: u16, num_asdu: u16) -> Self {
        SvSource {
            dst_mac: SV_MULTICAST,
            appid: index.wrapping_add(1),
            num_asdu,
            conf_rev: 1,
            sv_id: format!("SVID{:04}", index as u32 + 1),
            sequence: SvSequence::default(),
        }
    }

    pub fn update(&mut self, state: &SvState) -> bool {
        self.sequence.update(state)
    }
}

impl AppIdKeyed for SvSource {
    fn appid(&self) -> u16 {
        self.appid
    }
}

impl Identifies<SvPassport<'_>> for SvSource {
    fn identifies(&self, passport: &SvPassport<'_>) -> bool {
        self.appid == passport.appid
            && self.dst_mac == passport.dst_mac
            && self.num_asdu == passport.num_asdu
            && self.conf_rev == passport.conf_rev
            && self.sv_id.as_bytes() == passport.sv_id
    }
}

/// Direct-mapped source table keyed by APPID.
pub struct SourceRegistry<S> {
    index: Box<[u32]>,
    sources: Vec<S>,
}

impl<S: AppIdKeyed> SourceRegistry<S> {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        SourceRegistry {
            index: vec![EMPTY_SLOT; SLOT_COUNT].into_boxed_slice(),
            sources: Vec::with_capacity(capacity),
        }
    }

    /// Adds a source. Only one source per APPID is supported.
    pub fn insert(&mut self, source: S) -> Result<(), RegistryError> {
        let slot = source.appid() as usize;
        if self.index[slot] != EMPTY_SLOT {
            return Err(RegistryError::DuplicateAppId {
                appid: source.appid(),
            });
        }
        self.index[slot] = self.sources.len() as u32;
        self.sources.push(source);
        Ok(())
    }

    /// Finds the source a passport belongs to.
    ///
    /// Returns `None` when the APPID is unknown or when the stored source
    /// differs in any identity field.
    #[inline]
    pub fn lookup<P>(&mut self, passport: &P) -> Option<&mut S>
    where
        P: AppIdKeyed,
        S: Identifies<P>,
    {
        let slot = self.index[passport.appid() as usize];
        if slot == EMPTY_SLOT {
            return None;
        }
        let source = self.sources.get_mut(slot as usize)?;
        if source.identifies(passport) {
            Some(source)
        } else {
            None
        }
    }

    pub fn get(&self, appid: u16) -> Option<&S> {
        match self.index[appid as usize] {
            EMPTY_SLOT => None,
            slot => self.sources.get(slot as usize),
        }
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &S> {
        self.sources.iter()
    }

    pub fn into_sources(self) -> Vec<S> {
        self.sources
    }

    /// Splits the registry into one shard per worker.
    ///
    /// A source lands in the shard of the worker that receives its APPID,
    /// so each worker owns every source it will ever update.
    pub fn partition(self, workers: usize) -> Vec<SourceRegistry<S>> {
        let mut shards: Vec<SourceRegistry<S>> = (0..workers.max(1)).map(|_| Self::new()).collect();
        let count = shards.len();
        for source in self.sources {
            let shard = &mut shards[worker_index(source.appid(), count)];
            // APPIDs were unique in the source registry
            let slot = source.appid() as usize;
            shard.index[slot] = shard.sources.len() as u32;
            shard.sources.push(source);
        }
        shards
    }
}

impl<S: AppIdKeyed> Default for SourceRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

fn check_count(count: usize) -> Result<u16, RegistryError> {
    u16::try_from(count)
        .ok()
        .filter(|c| *c < u16::MAX)
        .ok_or(RegistryError::TooManySources { count })
}

/// Builds the GOOSE registry of the synthetic test setup.
pub fn goose_registry(count: usize) -> Result<SourceRegistry<GooseSource>, RegistryError> {
    let count = check_count(count)?;
    let mut registry = SourceRegistry::with_capacity(count as usize);
    for index in 0..count {
        let source = GooseSource::synthetic(index);
        debug!(appid = source.appid, go_id = %source.go_id, "registered GOOSE source");
        registry.insert(source)?;
    }
    Ok(registry)
}

/// Builds the SV registry of the synthetic test setup.
///
/// The 8-ASDU streams are numbered after the single-ASDU ones, so their
/// APPIDs and stream IDs continue where the first block ends.
pub fn sv_registry(sv80: usize, sv256: usize) -> Result<SourceRegistry<SvSource>, RegistryError> {
    let total = check_count(sv80 + sv256)?;
    let mut registry = SourceRegistry::with_capacity(total as usize);
    for index in 0..total {
        let num_asdu = if (index as usize) < sv80 { 1 } else { 8 };
        let source = SvSource::synthetic(index, num_asdu);
        debug!(appid = source.appid, sv_id = %source.sv_id, num_asdu, "registered SV source");
        registry.insert(source)?;
    }
    Ok(registry)
}
