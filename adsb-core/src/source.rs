//! The closed set of protocol decoders behind one interface.

use crate::beast::BeastDecoder;
use crate::config::ProtocolKind;
use crate::dump1090;
use crate::sbs::SbsDecoder;
use crate::types::*;

/// Construction parameters shared by every decoder.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecoderOptions {
    /// Local-CPR fallback reference (Beast only).
    pub receiver: Option<Coordinate>,
    /// Staleness window for decoder-local caches.
    pub stale_after: f64,
}

impl Default for DecoderOptions {
    fn default() -> Self {
        DecoderOptions {
            receiver: None,
            stale_after: crate::store::STALE_TIMEOUT,
        }
    }
}

/// One decoder per wire format.
#[derive(Debug)]
pub enum ProtocolDecoder {
    /// Stateless; the last snapshot size is kept for status reporting.
    Dump1090 { last_count: usize, snapshots: u64 },
    Sbs(SbsDecoder),
    Beast(BeastDecoder),
}

impl ProtocolDecoder {
    pub fn new(kind: ProtocolKind, opts: DecoderOptions) -> Self {
        match kind {
            ProtocolKind::Dump1090 => ProtocolDecoder::Dump1090 {
                last_count: 0,
                snapshots: 0,
            },
            ProtocolKind::Sbs => ProtocolDecoder::Sbs(SbsDecoder::new(opts.stale_after)),
            ProtocolKind::Beast => {
                ProtocolDecoder::Beast(BeastDecoder::new(opts.receiver, opts.stale_after))
            }
        }
    }

    pub fn kind(&self) -> ProtocolKind {
        match self {
            ProtocolDecoder::Dump1090 { .. } => ProtocolKind::Dump1090,
            ProtocolDecoder::Sbs(_) => ProtocolKind::Sbs,
            ProtocolDecoder::Beast(_) => ProtocolKind::Beast,
        }
    }

    /// Decode one unit of input: a full HTTP body for dump1090, an arbitrary
    /// stream chunk for SBS and Beast.
    ///
    /// Only dump1090 can fail, since its document is atomic. Streaming
    /// formats skip bad lines or frames internally.
    pub fn feed(&mut self, data: &[u8], now: f64) -> Result<Vec<AircraftUpdate>> {
        match self {
            ProtocolDecoder::Dump1090 { last_count, snapshots } => {
                let update = dump1090::decode(data, now)?;
                if let AircraftUpdate::Snapshot(records) = &update {
                    *last_count = records.len();
                }
                *snapshots += 1;
                Ok(vec![update])
            }
            ProtocolDecoder::Sbs(dec) => Ok(dec.feed(data, now)),
            ProtocolDecoder::Beast(dec) => Ok(dec.feed(data, now)),
        }
    }

    /// Aircraft currently known to this decoder.
    pub fn aircraft_count(&self) -> usize {
        match self {
            ProtocolDecoder::Dump1090 { last_count, .. } => *last_count,
            ProtocolDecoder::Sbs(dec) => dec.aircraft_count(),
            ProtocolDecoder::Beast(dec) => dec.aircraft_count(),
        }
    }

    /// Well-formed units decoded so far: documents, lines or frames.
    pub fn units_accepted(&self) -> u64 {
        match self {
            ProtocolDecoder::Dump1090 { snapshots, .. } => *snapshots,
            ProtocolDecoder::Sbs(dec) => dec.lines_accepted,
            ProtocolDecoder::Beast(dec) => dec.frames_accepted,
        }
    }

    /// Drop every buffer and cache.
    pub fn reset(&mut self) {
        match self {
            ProtocolDecoder::Dump1090 {
                last_count,
                snapshots,
            } => {
                *last_count = 0;
                *snapshots = 0;
            }
            ProtocolDecoder::Sbs(dec) => dec.reset(),
            ProtocolDecoder::Beast(dec) => dec.reset(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
