//! Shared types, error enum, and the canonical aircraft model for adsb-core.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// All errors produced by adsb-core.
#[derive(Debug, Error)]
pub enum AdsbError {
    #[error("malformed JSON document: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid settings file: {0}")]
    Settings(#[from] toml::de::Error),
    #[error("cannot serialize settings: {0}")]
    SettingsWrite(#[from] toml::ser::Error),
    #[error("invalid setting {field}: {reason}")]
    InvalidSetting { field: &'static str, reason: String },
    #[error("invalid source '{id}': {reason}")]
    InvalidSource { id: String, reason: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AdsbError>;

// ---------------------------------------------------------------------------
// ICAO address helpers
// ---------------------------------------------------------------------------

/// 3-byte ICAO address as carried on the wire.
pub type Icao = [u8; 3];

/// Format ICAO address as 6-char uppercase hex string.
pub fn icao_to_string(icao: &Icao) -> String {
    format!("{:02X}{:02X}{:02X}", icao[0], icao[1], icao[2])
}

/// Decode a hex string into bytes. Case-insensitive, must be even length.
pub fn hex_decode(hex: &str) -> Option<Vec<u8>> {
    let hex = hex.trim();
    if hex.len() % 2 != 0 {
        return None;
    }
    let mut bytes = Vec::with_capacity(hex.len() / 2);
    for chunk in hex.as_bytes().chunks(2) {
        let high = hex_digit(chunk[0])?;
        let low = hex_digit(chunk[1])?;
        bytes.push((high << 4) | low);
    }
    Some(bytes)
}

fn hex_digit(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

/// ADS-B character set for callsign encoding (6 bits per character).
pub const CALLSIGN_CHARSET: &[u8; 64] =
    b"#ABCDEFGHIJKLMNOPQRSTUVWXYZ##### ###############0123456789######";

/// Trim a text field and map blank values to `None`.
pub fn non_blank(raw: &str) -> Option<String> {
    let s = raw.trim();
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

/// Trim a callsign and map blank values to `None`.
pub fn clean_callsign(raw: &str) -> Option<String> {
    non_blank(raw)
}

// ---------------------------------------------------------------------------
// Coordinates
// ---------------------------------------------------------------------------

/// A WGS84 latitude/longitude pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lon: f64) -> Self {
        Coordinate { lat, lon }
    }

    /// True when both components are finite and inside the usual ranges.
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }
}

// ---------------------------------------------------------------------------
// Aircraft record
// ---------------------------------------------------------------------------

/// Canonical state of one aircraft, keyed by its ICAO address.
///
/// Every attribute except `icao` and `last_seen` is optional because feeds
/// report aircraft piecemeal. Merging only ever fills or overwrites fields,
/// it never clears them.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct AircraftRecord {
    /// 24-bit transponder address as uppercase hex.
    pub icao: String,
    pub callsign: Option<String>,
    pub position: Option<Coordinate>,
    pub altitude_ft: Option<i32>,
    pub heading_deg: Option<f64>,
    pub speed_kts: Option<f64>,
    pub vertical_rate_fpm: Option<i32>,
    pub squawk: Option<String>,
    /// Unix timestamp (seconds) of the last contributing message.
    pub last_seen: f64,

    // Enrichment, passed through untouched
    pub registration: Option<String>,
    pub aircraft_type: Option<String>,
    pub operator: Option<String>,
}

impl AircraftRecord {
    pub fn new(icao: impl Into<String>, timestamp: f64) -> Self {
        AircraftRecord {
            icao: icao.into(),
            last_seen: timestamp,
            ..Default::default()
        }
    }

    pub fn has_position(&self) -> bool {
        self.position.is_some()
    }

    pub fn age(&self, now: f64) -> f64 {
        now - self.last_seen
    }

    /// Label used in alert text: callsign when known, ICAO otherwise.
    pub fn label(&self) -> &str {
        self.callsign.as_deref().unwrap_or(&self.icao)
    }

    /// Copy every field present in `other` onto `self` and refresh `last_seen`.
    pub fn merge(&mut self, other: &AircraftRecord) {
        fn take<T: Clone>(dst: &mut Option<T>, src: &Option<T>) {
            if let Some(v) = src {
                *dst = Some(v.clone());
            }
        }
        take(&mut self.callsign, &other.callsign);
        take(&mut self.position, &other.position);
        take(&mut self.altitude_ft, &other.altitude_ft);
        take(&mut self.heading_deg, &other.heading_deg);
        take(&mut self.speed_kts, &other.speed_kts);
        take(&mut self.vertical_rate_fpm, &other.vertical_rate_fpm);
        take(&mut self.squawk, &other.squawk);
        take(&mut self.registration, &other.registration);
        take(&mut self.aircraft_type, &other.aircraft_type);
        take(&mut self.operator, &other.operator);
        self.last_seen = self.last_seen.max(other.last_seen);
    }
}

/// A change published by a source.
#[derive(Debug, Clone, PartialEq)]
pub enum AircraftUpdate {
    /// Incremental merge into one record.
    Updated(AircraftRecord),
    /// Explicit eviction of one record.
    Removed(String),
    /// Authoritative full replacement (poll-based sources).
    Snapshot(Vec<AircraftRecord>),
}

// ---------------------------------------------------------------------------
// Source status
// ---------------------------------------------------------------------------

/// Connectivity state of one source, or of all sources combined.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum SourceStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected {
        aircraft: usize,
    },
    Reconnecting {
        attempt: u32,
        max_attempts: u32,
    },
    Error(String),
}

impl fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceStatus::Disconnected => write!(f, "disconnected"),
            SourceStatus::Connecting => write!(f, "connecting"),
            SourceStatus::Connected { aircraft } => write!(f, "connected ({aircraft} aircraft)"),
            SourceStatus::Reconnecting {
                attempt,
                max_attempts,
            } => write!(f, "reconnecting ({attempt}/{max_attempts})"),
            SourceStatus::Error(msg) => write!(f, "error: {msg}"),
        }
    }
}

/// Fold per-source states into one.
///
/// Connected wins (aircraft counts summed), then Reconnecting, Connecting,
/// Error, and finally Disconnected.
pub fn combine_status<'a, I>(statuses: I) -> SourceStatus
where
    I: IntoIterator<Item = &'a SourceStatus>,
{
    let mut connected: Option<usize> = None;
    let mut reconnecting: Option<SourceStatus> = None;
    let mut connecting = false;
    let mut error: Option<String> = None;

    for status in statuses {
        match status {
            SourceStatus::Connected { aircraft } => {
                connected = Some(connected.unwrap_or(0) + aircraft);
            }
            SourceStatus::Reconnecting { .. } => {
                reconnecting.get_or_insert_with(|| status.clone());
            }
            SourceStatus::Connecting => connecting = true,
            SourceStatus::Error(msg) => {
                error.get_or_insert_with(|| msg.clone());
            }
            SourceStatus::Disconnected => {}
        }
    }

    if let Some(aircraft) = connected {
        SourceStatus::Connected { aircraft }
    } else if let Some(r) = reconnecting {
        r
    } else if connecting {
        SourceStatus::Connecting
    } else if let Some(msg) = error {
        SourceStatus::Error(msg)
    } else {
        SourceStatus::Disconnected
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
