//! Compact Position Reporting (CPR) decode for ADS-B positions.
//!
//! Two decode modes:
//! - Global: requires an even+odd frame pair less than 10 seconds apart.
//! - Local: single frame + reference position (last fix or receiver site).
//!
//! Key constants:
//! - NZ = 15 (latitude zones per hemisphere for even frames)
//! - Nb = 17 (bits per coordinate)
//! - Dlat_even = 360 / (4 * NZ) = 6.0 degrees
//! - Dlat_odd = 360 / (4 * NZ - 1) ≈ 6.1017 degrees

use serde::Serialize;

use crate::geo::distance_nm;
use crate::types::Coordinate;

/// Number of latitude zones per hemisphere.
const NZ: f64 = 15.0;

/// Bits per CPR coordinate.
const NB: u32 = 17;

/// Maximum CPR value (2^17 = 131072).
const CPR_MAX: f64 = (1u32 << NB) as f64;

/// Even and odd frames must be closer than this (seconds) for global decode.
pub const MAX_PAIR_AGE: f64 = 10.0;

/// Stored frames older than this (seconds) are discarded.
pub const MAX_FRAME_AGE: f64 = 60.0;

/// Local decode results further than this from the reference are rejected.
pub const MAX_LOCAL_RANGE_NM: f64 = 500.0;

/// Latitudes at which the number of longitude zones drops by one.
///
/// `NL_THRESHOLDS[i]` is the upper bound (exclusive) of the band where
/// NL = 59 - i. At or above 87° NL is 1.
const NL_THRESHOLDS: [f64; 59] = [
    10.470_471_30,
    14.828_174_37,
    18.186_263_57,
    21.029_394_93,
    23.545_044_87,
    25.829_247_07,
    27.938_987_10,
    29.911_356_86,
    31.772_097_08,
    33.539_934_36,
    35.228_995_98,
    36.850_251_08,
    38.412_418_92,
    39.922_566_84,
    41.386_518_32,
    42.809_140_12,
    44.194_549_51,
    45.546_267_23,
    46.867_332_52,
    48.160_391_28,
    49.427_764_39,
    50.671_501_66,
    51.893_424_69,
    53.095_161_53,
    54.278_174_72,
    55.443_784_44,
    56.593_187_56,
    57.727_473_54,
    58.847_637_76,
    59.954_592_77,
    61.049_177_74,
    62.132_166_59,
    63.204_274_79,
    64.266_165_23,
    65.318_453_10,
    66.361_710_08,
    67.396_467_74,
    68.423_220_22,
    69.442_426_31,
    70.454_510_75,
    71.459_864_73,
    72.458_845_45,
    73.451_774_42,
    74.438_934_16,
    75.420_562_57,
    76.396_843_91,
    77.367_894_61,
    78.333_740_83,
    79.294_282_25,
    80.249_232_13,
    81.198_013_49,
    82.139_569_81,
    83.071_994_45,
    83.991_735_63,
    84.891_661_91,
    85.755_416_21,
    86.535_369_98,
    87.0,
    90.0,
];

/// One CPR-encoded airborne position message.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CprFrame {
    pub odd: bool,
    /// 17-bit encoded latitude (0..131071).
    pub lat_cpr: u32,
    /// 17-bit encoded longitude (0..131071).
    pub lon_cpr: u32,
    pub altitude_ft: Option<i32>,
    /// Unix timestamp (seconds) the frame was received.
    pub timestamp: f64,
}

/// Per-aircraft pairing state for global decode.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CprState {
    pub even: Option<CprFrame>,
    pub odd: Option<CprFrame>,
    pub last_position: Option<Coordinate>,
}

impl CprState {
    /// Store a frame in its even/odd slot, replacing the previous one.
    pub fn push(&mut self, frame: CprFrame) {
        if frame.odd {
            self.odd = Some(frame);
        } else {
            self.even = Some(frame);
        }
    }

    /// Drop frames older than [`MAX_FRAME_AGE`].
    pub fn expire(&mut self, now: f64) {
        if self.even.is_some_and(|f| now - f.timestamp > MAX_FRAME_AGE) {
            self.even = None;
        }
        if self.odd.is_some_and(|f| now - f.timestamp > MAX_FRAME_AGE) {
            self.odd = None;
        }
    }

    /// True once both slots are empty.
    pub fn is_expired(&self) -> bool {
        self.even.is_none() && self.odd.is_none()
    }

    /// Resolve a position for the newest frame.
    ///
    /// Global decode of the stored pair is tried first; otherwise the newest
    /// frame is decoded locally against the last good fix or `fallback`.
    pub fn resolve(&mut self, latest: &CprFrame, fallback: Option<Coordinate>) -> Option<Coordinate> {
        let global = match (&self.even, &self.odd) {
            (Some(even), Some(odd)) => global_decode(even, odd),
            _ => None,
        };

        let position = global.or_else(|| {
            let reference = self.last_position.or(fallback)?;
            local_decode(latest, reference)
        })?;

        self.last_position = Some(position);
        Some(position)
    }
}

/// Number of longitude zones at a given latitude (NL function).
///
/// Ranges from 59 at the equator down to 1 at the poles, symmetric about
/// the equator.
pub fn nl(lat: f64) -> u32 {
    let lat = lat.abs();
    for (i, &threshold) in NL_THRESHOLDS.iter().enumerate() {
        if lat < threshold {
            return 59 - i as u32;
        }
    }
    1
}

/// Modulo that always returns a non-negative result.
fn modulo(x: f64, y: f64) -> f64 {
    x - y * (x / y).floor()
}

/// Global CPR decode from an even/odd frame pair.
///
/// The longitude is taken from whichever frame is newer. Returns `None` when
/// the frames are too far apart in time, when the two candidate latitudes
/// fall in different NL zones, or when the result is out of range.
pub fn global_decode(even: &CprFrame, odd: &CprFrame) -> Option<Coordinate> {
    if (even.timestamp - odd.timestamp).abs() >= MAX_PAIR_AGE {
        return None;
    }

    let dlat_even = 360.0 / (4.0 * NZ);
    let dlat_odd = 360.0 / (4.0 * NZ - 1.0);

    let lat_even_cpr = even.lat_cpr as f64 / CPR_MAX;
    let lon_even_cpr = even.lon_cpr as f64 / CPR_MAX;
    let lat_odd_cpr = odd.lat_cpr as f64 / CPR_MAX;
    let lon_odd_cpr = odd.lon_cpr as f64 / CPR_MAX;

    // Latitude zone index
    let j = (59.0 * lat_even_cpr - 60.0 * lat_odd_cpr + 0.5).floor();

    let mut lat_e = dlat_even * (modulo(j, 60.0) + lat_even_cpr);
    let mut lat_o = dlat_odd * (modulo(j, 59.0) + lat_odd_cpr);

    if lat_e >= 270.0 {
        lat_e -= 360.0;
    }
    if lat_o >= 270.0 {
        lat_o -= 360.0;
    }

    if !(-90.0..=90.0).contains(&lat_e) || !(-90.0..=90.0).contains(&lat_o) {
        return None;
    }

    let nl_val = nl(lat_e);
    if nl_val != nl(lat_o) {
        return None; // zone boundary crossing
    }
    let nl_f = nl_val as f64;

    let m = (lon_even_cpr * (nl_f - 1.0) - lon_odd_cpr * nl_f + 0.5).floor();

    let (lat, lon) = if even.timestamp >= odd.timestamp {
        let ni = nl_f.max(1.0);
        (lat_e, (360.0 / ni) * (modulo(m, ni) + lon_even_cpr))
    } else {
        let ni = (nl_f - 1.0).max(1.0);
        (lat_o, (360.0 / ni) * (modulo(m, ni) + lon_odd_cpr))
    };

    let lon = if lon >= 180.0 { lon - 360.0 } else { lon };

    let pos = Coordinate::new(round6(lat), round6(lon));
    pos.is_valid().then_some(pos)
}

/// Local CPR decode using a reference position.
///
/// Valid when the aircraft is within a few hundred nm of the reference;
/// results further than [`MAX_LOCAL_RANGE_NM`] are rejected.
pub fn local_decode(frame: &CprFrame, reference: Coordinate) -> Option<Coordinate> {
    let i = if frame.odd { 1.0 } else { 0.0 };
    let dlat = 360.0 / (4.0 * NZ - i);

    let cpr_lat = frame.lat_cpr as f64 / CPR_MAX;
    let cpr_lon = frame.lon_cpr as f64 / CPR_MAX;

    let j = (reference.lat / dlat).floor()
        + (modulo(reference.lat, dlat) / dlat - cpr_lat + 0.5).floor();
    let lat = dlat * (j + cpr_lat);
    if !(-90.0..=90.0).contains(&lat) {
        return None;
    }

    let ni = (nl(lat) as f64 - i).max(1.0);
    let dlon = 360.0 / ni;

    let m = (reference.lon / dlon).floor()
        + (modulo(reference.lon, dlon) / dlon - cpr_lon + 0.5).floor();
    let mut lon = dlon * (m + cpr_lon);
    if lon >= 180.0 {
        lon -= 360.0;
    } else if lon < -180.0 {
        lon += 360.0;
    }

    let pos = Coordinate::new(round6(lat), round6(lon));
    if !pos.is_valid() || distance_nm(pos, reference) > MAX_LOCAL_RANGE_NM {
        return None;
    }
    Some(pos)
}

/// Round to 6 decimal places.
fn round6(val: f64) -> f64 {
    (val * 1_000_000.0).round() / 1_000_000.0
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
