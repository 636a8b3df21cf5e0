//! Dump1090 `aircraft.json` snapshot decoder.
//!
//! The document is atomic: invalid JSON rejects the whole response, while a
//! single malformed entry inside a valid document is skipped.

use serde::Deserialize;
use tracing::debug;

use crate::types::*;

/// Barometric altitude as reported by dump1090: feet, or the literal
/// string `"ground"`.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(from = "RawAltitude")]
pub enum BaroAltitude {
    Feet(i32),
    Ground,
    /// Any other string value.
    Unknown,
}

impl BaroAltitude {
    pub fn feet(self) -> Option<i32> {
        match self {
            BaroAltitude::Feet(ft) => Some(ft),
            BaroAltitude::Ground | BaroAltitude::Unknown => None,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawAltitude {
    Number(f64),
    Text(String),
}

impl From<RawAltitude> for BaroAltitude {
    fn from(raw: RawAltitude) -> Self {
        match raw {
            RawAltitude::Number(ft) if ft.is_finite() => BaroAltitude::Feet(ft.round() as i32),
            RawAltitude::Text(s) if s.eq_ignore_ascii_case("ground") => BaroAltitude::Ground,
            _ => BaroAltitude::Unknown,
        }
    }
}

/// One entry of the `aircraft` array. Unknown keys are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct Dump1090Aircraft {
    pub hex: String,
    pub flight: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub alt_baro: Option<BaroAltitude>,
    pub alt_geom: Option<f64>,
    pub gs: Option<f64>,
    pub track: Option<f64>,
    pub baro_rate: Option<f64>,
    pub squawk: Option<String>,
    /// Registration, when the feed carries a database lookup.
    pub r: Option<String>,
    /// ICAO type designator, same source as `r`.
    pub t: Option<String>,
}

impl Dump1090Aircraft {
    /// Altitude: numeric `alt_baro`, else `alt_geom`.
    pub fn altitude_ft(&self) -> Option<i32> {
        self.alt_baro.and_then(BaroAltitude::feet).or_else(|| {
            self.alt_geom
                .filter(|v| v.is_finite())
                .map(|v| v.round() as i32)
        })
    }

    pub fn to_record(&self, now: f64) -> Option<AircraftRecord> {
        let hex = self.hex.trim();
        if hex.is_empty() {
            return None;
        }

        let mut rec = AircraftRecord::new(hex.to_uppercase(), now);
        rec.callsign = self.flight.as_deref().and_then(clean_callsign);
        rec.altitude_ft = self.altitude_ft();
        rec.speed_kts = self.gs;
        rec.heading_deg = self.track;
        rec.vertical_rate_fpm = self.baro_rate.filter(|v| v.is_finite()).map(|v| v.round() as i32);
        rec.squawk = self.squawk.as_deref().and_then(non_blank);
        rec.registration = self.r.as_deref().and_then(non_blank);
        rec.aircraft_type = self.t.as_deref().and_then(non_blank);

        if let (Some(lat), Some(lon)) = (self.lat, self.lon) {
            let pos = Coordinate::new(lat, lon);
            if pos.is_valid() {
                rec.position = Some(pos);
            }
        }
        Some(rec)
    }
}

#[derive(Deserialize)]
struct Document {
    aircraft: Vec<serde_json::Value>,
}

/// Decode one `aircraft.json` body into a `Snapshot`.
pub fn decode(body: &[u8], now: f64) -> Result<AircraftUpdate> {
    let doc: Document = serde_json::from_slice(body)?;

    let mut records = Vec::with_capacity(doc.aircraft.len());
    for entry in doc.aircraft {
        match serde_json::from_value::<Dump1090Aircraft>(entry) {
            Ok(ac) => records.extend(ac.to_record(now)),
            Err(e) => debug!(error = %e, "dump1090 entry skipped"),
        }
    }
    Ok(AircraftUpdate::Snapshot(records))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
