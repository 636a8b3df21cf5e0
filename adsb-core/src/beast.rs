//! Beast binary stream decoder.
//!
//! Frames come out of [`FrameReader`], extended squitters are decoded by
//! [`crate::decode`], and airborne positions are resolved through a
//! per-aircraft [`CprState`]. The decoder keeps its own accumulated record
//! per ICAO so every emitted `Updated` carries the full known state.

use std::collections::HashMap;

use tracing::debug;

use crate::cpr::CprState;
use crate::decode::{self, DecodedMsg};
use crate::frame::{FrameKind, FrameReader};
use crate::types::*;

#[derive(Debug)]
pub struct BeastDecoder {
    reader: FrameReader,
    aircraft: HashMap<String, AircraftRecord>,
    cpr: HashMap<String, CprState>,
    receiver: Option<Coordinate>,
    stale_after: f64,
    /// Well-formed frames of any kind read so far.
    pub frames_accepted: u64,
}

impl BeastDecoder {
    /// `receiver` is the fallback reference for local CPR decode.
    pub fn new(receiver: Option<Coordinate>, stale_after: f64) -> Self {
        BeastDecoder {
            reader: FrameReader::new(),
            aircraft: HashMap::new(),
            cpr: HashMap::new(),
            receiver,
            stale_after,
            frames_accepted: 0,
        }
    }

    /// Feed raw stream bytes. Returns one `Updated` per decoded message.
    pub fn feed(&mut self, chunk: &[u8], now: f64) -> Vec<AircraftUpdate> {
        self.reader.extend(chunk);

        let mut updates = Vec::new();
        while let Some(frame) = self.reader.next_frame() {
            self.frames_accepted += 1;
            if frame.kind != FrameKind::ModeSLong {
                continue;
            }
            let Some(msg) = decode::decode(&frame.payload) else {
                continue;
            };
            updates.push(AircraftUpdate::Updated(self.apply(msg, now)));
        }

        self.prune(now);
        updates
    }

    fn apply(&mut self, msg: DecodedMsg, now: f64) -> AircraftRecord {
        let icao = icao_to_string(msg.icao());
        let rec = self
            .aircraft
            .entry(icao.clone())
            .or_insert_with(|| AircraftRecord::new(icao.clone(), now));
        rec.last_seen = rec.last_seen.max(now);

        match msg {
            DecodedMsg::Identification(id) => {
                if id.callsign.is_some() {
                    rec.callsign = id.callsign;
                }
            }
            DecodedMsg::Position(pos) => {
                if pos.altitude_ft.is_some() {
                    rec.altitude_ft = pos.altitude_ft;
                }
                let frame = pos.cpr_frame(now);
                let state = self.cpr.entry(icao.clone()).or_default();
                state.expire(now);
                state.push(frame);
                match state.resolve(&frame, self.receiver) {
                    Some(fix) => rec.position = Some(fix),
                    None => debug!(icao = %icao, odd = frame.odd, "cpr position unresolved"),
                }
            }
            DecodedMsg::Velocity(vel) => {
                if vel.speed_kts.is_some() {
                    rec.speed_kts = vel.speed_kts;
                }
                if vel.heading_deg.is_some() {
                    rec.heading_deg = vel.heading_deg;
                }
                if vel.vertical_rate_fpm.is_some() {
                    rec.vertical_rate_fpm = vel.vertical_rate_fpm;
                }
            }
        }
        rec.clone()
    }

    /// Evict stale aircraft together with their CPR state, and drop CPR
    /// state whose frames have both aged out.
    pub fn prune(&mut self, now: f64) {
        let stale_after = self.stale_after;
        self.aircraft.retain(|_, rec| rec.age(now) <= stale_after);

        let aircraft = &self.aircraft;
        self.cpr.retain(|icao, state| {
            state.expire(now);
            aircraft.contains_key(icao) && !state.is_expired()
        });
    }

    pub fn aircraft_count(&self) -> usize {
        self.aircraft.len()
    }

    pub fn cpr_state(&self, icao: &str) -> Option<&CprState> {
        self.cpr.get(icao)
    }

    pub fn resyncs(&self) -> u64 {
        self.reader.resyncs
    }

    /// Forget buffered bytes, cached aircraft and CPR state.
    pub fn reset(&mut self) {
        self.reader.clear();
        self.aircraft.clear();
        self.cpr.clear();
        self.frames_accepted = 0;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
