//! Decode ADS-B extended squitter payloads into typed messages.
//!
//! Only DF17/DF18 112-bit frames are decoded:
//! - TC 1-4:   Aircraft identification (callsign)
//! - TC 9-18:  Airborne position (barometric alt + CPR-encoded lat/lon)
//! - TC 19:    Airborne velocity (ground speed + track, vertical rate)

use serde::Serialize;

use crate::cpr::CprFrame;
use crate::types::*;

/// Length of an extended squitter payload in bytes.
pub const SQUITTER_LEN: usize = 14;

// ---------------------------------------------------------------------------
// Decoded message types
// ---------------------------------------------------------------------------

/// TC 1-4: Aircraft identification (callsign).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IdentificationMsg {
    pub icao: Icao,
    pub callsign: Option<String>,
}

/// TC 9-18: CPR-encoded airborne position.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionMsg {
    pub icao: Icao,
    pub altitude_ft: Option<i32>,
    pub cpr_lat: u32,
    pub cpr_lon: u32,
    pub cpr_odd: bool,
}

impl PositionMsg {
    pub fn cpr_frame(&self, timestamp: f64) -> CprFrame {
        CprFrame {
            odd: self.cpr_odd,
            lat_cpr: self.cpr_lat,
            lon_cpr: self.cpr_lon,
            altitude_ft: self.altitude_ft,
            timestamp,
        }
    }
}

/// TC 19: Airborne velocity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VelocityMsg {
    pub icao: Icao,
    pub speed_kts: Option<f64>,
    pub heading_deg: Option<f64>,
    pub vertical_rate_fpm: Option<i32>,
}

/// Union type for all decoded messages.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum DecodedMsg {
    Identification(IdentificationMsg),
    Position(PositionMsg),
    Velocity(VelocityMsg),
}

impl DecodedMsg {
    /// Get the ICAO address from any message type.
    pub fn icao(&self) -> &Icao {
        match self {
            DecodedMsg::Identification(m) => &m.icao,
            DecodedMsg::Position(m) => &m.icao,
            DecodedMsg::Velocity(m) => &m.icao,
        }
    }
}

// ---------------------------------------------------------------------------
// Altitude decoding
// ---------------------------------------------------------------------------

/// Decode 12-bit altitude code from an airborne position.
///
/// The Q-bit (bit 4) selects the encoding mode:
/// - Q=1: 25-ft resolution
/// - Q=0: 100-ft Gillham gray code
pub fn decode_altitude(alt_code: u32) -> Option<i32> {
    if alt_code == 0 {
        return None;
    }

    let q_bit = (alt_code >> 4) & 1;

    if q_bit == 1 {
        // Drop the Q-bit to get the 11-bit count
        let n = ((alt_code >> 5) << 4) | (alt_code & 0x0F);
        Some(n as i32 * 25 - 1000)
    } else {
        decode_gillham_altitude(alt_code)
    }
}

/// Decode 100-ft Gillham gray code altitude.
///
/// The 12-bit field is C1 A1 C2 A2 C4 A4 B1 Q B2 D2 B4 D4, with the
/// Q position (bit 4) always zero in this mode.
fn decode_gillham_altitude(alt_code: u32) -> Option<i32> {
    let bit = |n: u32| (alt_code >> n) & 1;
    let (c1, a1, c2, a2, c4, a4) = (bit(11), bit(10), bit(9), bit(8), bit(7), bit(6));
    let (b1, b2, d2, b4, d4) = (bit(5), bit(3), bit(2), bit(1), bit(0));

    // 100-ft component: Gray code over C1 C2 C4, valid values 1..=4 and 7 (as 5)
    let mut c_bin = c1 << 2 | c2 << 1 | c4;
    c_bin ^= c_bin >> 1;
    c_bin ^= c_bin >> 2;
    let mut c_bin = match c_bin {
        1..=4 => c_bin,
        7 => 5,
        _ => return None,
    };

    // 500-ft component: Gray code over D2 D4 A1 A2 A4 B1 B2 B4
    let mut gray = d2 << 7 | d4 << 6 | a1 << 5 | a2 << 4 | a4 << 3 | b1 << 2 | b2 << 1 | b4;
    let mut n500 = 0;
    while gray != 0 {
        n500 ^= gray;
        gray >>= 1;
    }

    // Odd 500-ft bands count the 100-ft digit downward
    if n500 % 2 == 1 {
        c_bin = 6 - c_bin;
    }

    Some(n500 as i32 * 500 + c_bin as i32 * 100 - 1300)
}

// ---------------------------------------------------------------------------
// Field helpers
// ---------------------------------------------------------------------------

/// The 56-bit ME field as a right-aligned integer.
fn me_bits(payload: &[u8]) -> u64 {
    payload[4..11]
        .iter()
        .fold(0u64, |acc, &b| (acc << 8) | b as u64)
}

/// ICAO address from bytes 1-3.
pub fn icao(payload: &[u8]) -> Icao {
    [payload[1], payload[2], payload[3]]
}

/// Type code from the first 5 bits of byte 4.
pub fn type_code(payload: &[u8]) -> u8 {
    payload[4] >> 3
}

// ---------------------------------------------------------------------------
// Main decode functions
// ---------------------------------------------------------------------------

/// Decode TC 1-4: Aircraft identification (callsign).
pub fn decode_identification(payload: &[u8]) -> Option<IdentificationMsg> {
    if !(1..=4).contains(&type_code(payload)) {
        return None;
    }

    let bits = me_bits(payload);

    // 8 characters, 6 bits each, in the low 48 bits of ME
    let mut callsign = String::with_capacity(8);
    for i in 0..8 {
        let idx = ((bits >> (42 - i * 6)) & 0x3F) as usize;
        match CALLSIGN_CHARSET[idx] {
            b'#' => {}
            c => callsign.push(c as char),
        }
    }

    Some(IdentificationMsg {
        icao: icao(payload),
        callsign: clean_callsign(&callsign),
    })
}

/// Decode TC 9-18: Airborne position with barometric altitude.
pub fn decode_position(payload: &[u8]) -> Option<PositionMsg> {
    if !(9..=18).contains(&type_code(payload)) {
        return None;
    }

    let bits = me_bits(payload);
    let alt_code = ((bits >> 36) & 0x0FFF) as u32;

    Some(PositionMsg {
        icao: icao(payload),
        altitude_ft: decode_altitude(alt_code),
        cpr_odd: ((bits >> 34) & 1) == 1,
        cpr_lat: ((bits >> 17) & 0x1FFFF) as u32,
        cpr_lon: (bits & 0x1FFFF) as u32,
    })
}

/// Decode TC 19: Airborne velocity.
///
/// Ground speed subtypes (1 normal, 2 supersonic) yield speed and track.
/// Airspeed subtypes (3, 4) only contribute the vertical rate.
pub fn decode_velocity(payload: &[u8]) -> Option<VelocityMsg> {
    if type_code(payload) != 19 {
        return None;
    }

    let bits = me_bits(payload);
    let subtype = ((bits >> 48) & 0x07) as u8;
    if !(1..=4).contains(&subtype) {
        return None;
    }

    let (speed_kts, heading_deg) = if subtype <= 2 {
        decode_ground_vector(bits, if subtype == 2 { 4 } else { 1 })
    } else {
        (None, None)
    };

    Some(VelocityMsg {
        icao: icao(payload),
        speed_kts,
        heading_deg,
        vertical_rate_fpm: decode_vertical_rate(bits),
    })
}

fn decode_ground_vector(bits: u64, scale: i32) -> (Option<f64>, Option<f64>) {
    let ew_dir = (bits >> 42) & 1; // 0=East, 1=West
    let ew_vel = ((bits >> 32) & 0x3FF) as i32 - 1;
    let ns_dir = (bits >> 31) & 1; // 0=North, 1=South
    let ns_vel = ((bits >> 21) & 0x3FF) as i32 - 1;

    if ew_vel < 0 || ns_vel < 0 {
        return (None, None);
    }

    let vx = (if ew_dir == 1 { -ew_vel } else { ew_vel } * scale) as f64;
    let vy = (if ns_dir == 1 { -ns_vel } else { ns_vel } * scale) as f64;
    let speed = (vx * vx + vy * vy).sqrt();
    let heading = vx.atan2(vy).to_degrees().rem_euclid(360.0);
    (Some(round2(speed)), Some(round2(heading)))
}

/// 9-bit vertical rate in 64 fpm steps, sign bit 0=up 1=down.
fn decode_vertical_rate(bits: u64) -> Option<i32> {
    let vr_sign = (bits >> 19) & 1;
    let vr_val = ((bits >> 10) & 0x1FF) as i32 - 1;
    if vr_val < 0 {
        return None;
    }
    let rate = vr_val * 64;
    Some(if vr_sign == 1 { -rate } else { rate })
}

/// Decode a 14-byte extended squitter payload.
///
/// Routes DF17/18 frames to the decoder for their type code; anything else
/// (short frames, other DFs, unhandled type codes) yields `None`.
pub fn decode(payload: &[u8]) -> Option<DecodedMsg> {
    if payload.len() != SQUITTER_LEN {
        return None;
    }
    let df = payload[0] >> 3;
    if df != 17 && df != 18 {
        return None;
    }

    match type_code(payload) {
        1..=4 => decode_identification(payload).map(DecodedMsg::Identification),
        9..=18 => decode_position(payload).map(DecodedMsg::Position),
        19 => decode_velocity(payload).map(DecodedMsg::Velocity),
        _ => None,
    }
}

/// Round to 2 decimal places.
fn round2(val: f64) -> f64 {
    (val * 100.0).round() / 100.0
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
