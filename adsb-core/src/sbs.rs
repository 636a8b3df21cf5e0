//! SBS ("BaseStation") CSV decoder.
//!
//! One message per line, comma-separated. Only `MSG` lines are used, with
//! the attribute mapping (0-indexed):
//!
//! | field | attribute       |
//! |-------|-----------------|
//! | 4     | ICAO hex        |
//! | 10    | callsign        |
//! | 11    | altitude (ft)   |
//! | 12    | ground speed    |
//! | 13    | track           |
//! | 14/15 | latitude/longitude |
//! | 16    | vertical rate   |
//! | 17    | squawk          |

use std::collections::HashMap;

use tracing::debug;

use crate::types::*;

/// Minimum number of comma-separated fields for a usable line.
const MIN_FIELDS: usize = 11;

/// Parse one SBS line into a partial record. `None` for unusable lines.
pub fn parse_line(line: &str, now: f64) -> Option<AircraftRecord> {
    let fields: Vec<&str> = line.split(',').collect();
    if fields.len() < MIN_FIELDS || fields[0].trim() != "MSG" {
        return None;
    }

    let icao = fields[4].trim();
    if icao.is_empty() {
        return None;
    }

    let field = |i: usize| fields.get(i).map(|f| f.trim()).filter(|f| !f.is_empty());

    let mut rec = AircraftRecord::new(icao.to_uppercase(), now);
    rec.callsign = field(10).map(str::to_string);
    rec.altitude_ft = field(11).and_then(parse_int);
    rec.speed_kts = field(12).and_then(parse_float);
    rec.heading_deg = field(13).and_then(parse_float);

    let lat = field(14).and_then(parse_float);
    let lon = field(15).and_then(parse_float);
    if let (Some(lat), Some(lon)) = (lat, lon) {
        let pos = Coordinate::new(lat, lon);
        if pos.is_valid() {
            rec.position = Some(pos);
        }
    }

    rec.vertical_rate_fpm = field(16).and_then(parse_int);
    rec.squawk = field(17).map(str::to_string);
    Some(rec)
}

fn parse_float(s: &str) -> Option<f64> {
    s.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Integers sometimes arrive as "35000.0"; accept both.
fn parse_int(s: &str) -> Option<i32> {
    s.parse::<i32>()
        .ok()
        .or_else(|| parse_float(s).map(|v| v.round() as i32))
}

/// Longest unterminated line kept between chunks.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Streaming SBS decoder with line buffering and a per-ICAO accumulator.
#[derive(Debug)]
pub struct SbsDecoder {
    buffer: Vec<u8>,
    cache: HashMap<String, AircraftRecord>,
    stale_after: f64,
    /// Lines that parsed into a record.
    pub lines_accepted: u64,
}

impl SbsDecoder {
    pub fn new(stale_after: f64) -> Self {
        SbsDecoder {
            buffer: Vec::new(),
            cache: HashMap::new(),
            stale_after,
            lines_accepted: 0,
        }
    }

    /// Feed a chunk of raw bytes. Returns one `Updated` per valid line.
    ///
    /// The trailing fragment after the last `\n` is kept for the next call,
    /// up to [`MAX_LINE_BYTES`].
    pub fn feed(&mut self, chunk: &[u8], now: f64) -> Vec<AircraftUpdate> {
        // The buffer never holds a newline between calls, so only the new
        // chunk needs scanning
        let start = self.buffer.len();
        self.buffer.extend_from_slice(chunk);

        let Some(offset) = chunk.iter().rposition(|&b| b == b'\n') else {
            self.limit_fragment();
            return Vec::new();
        };
        let complete: Vec<u8> = self.buffer.drain(..=start + offset).collect();
        self.limit_fragment();

        let mut updates = Vec::new();
        for raw in complete.split(|&b| b == b'\n') {
            let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
            if raw.is_empty() {
                continue;
            }
            let line = String::from_utf8_lossy(raw);
            match parse_line(&line, now) {
                Some(partial) => {
                    self.lines_accepted += 1;
                    updates.push(AircraftUpdate::Updated(self.accumulate(partial)));
                }
                None => debug!(line = %line, "sbs line dropped"),
            }
        }

        self.prune(now);
        updates
    }

    fn limit_fragment(&mut self) {
        if self.buffer.len() > MAX_LINE_BYTES {
            debug!(bytes = self.buffer.len(), "sbs fragment without newline discarded");
            self.buffer.clear();
        }
    }

    fn accumulate(&mut self, partial: AircraftRecord) -> AircraftRecord {
        let entry = self
            .cache
            .entry(partial.icao.clone())
            .or_insert_with(|| AircraftRecord::new(partial.icao.clone(), partial.last_seen));
        entry.merge(&partial);
        entry.clone()
    }

    /// Drop cached aircraft not seen within the staleness window.
    pub fn prune(&mut self, now: f64) {
        let stale_after = self.stale_after;
        self.cache.retain(|_, rec| rec.age(now) <= stale_after);
    }

    pub fn aircraft_count(&self) -> usize {
        self.cache.len()
    }

    /// Forget buffered bytes and cached aircraft.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.cache.clear();
        self.lines_accepted = 0;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str =
        "MSG,3,1,1,A12345,1,2024/01/01,12:00:00.000,2024/01/01,12:00:00.000,UAL123 ,35000,450,180,37.7749,-122.4194,-640,7700,0,0,0,0";

    #[test]
    fn test_full_line_populates_every_field() {
        let rec = parse_line(FULL, 100.0).unwrap();
        assert_eq!(rec.icao, "A12345");
        assert_eq!(rec.callsign.as_deref(), Some("UAL123"));
        assert_eq!(rec.altitude_ft, Some(35000));
        assert_eq!(rec.speed_kts, Some(450.0));
        assert_eq!(rec.heading_deg, Some(180.0));
        assert_eq!(rec.position, Some(Coordinate::new(37.7749, -122.4194)));
        assert_eq!(rec.vertical_rate_fpm, Some(-640));
        assert_eq!(rec.squawk.as_deref(), Some("7700"));
        assert_eq!(rec.last_seen, 100.0);
    }

    #[test]
    fn test_rejects_short_non_msg_and_empty_icao() {
        assert!(parse_line("MSG,3,1,1,A12345,1,a,b,c,d", 0.0).is_none());
        assert!(parse_line("STA,,1,1,A12345,1,a,b,c,d,e,f", 0.0).is_none());
        assert!(parse_line("MSG,3,1,1,,1,a,b,c,d,UAL1,35000", 0.0).is_none());
        assert!(parse_line("", 0.0).is_none());
    }

    #[test]
    fn test_lone_latitude_is_discarded() {
        let line = "MSG,3,1,1,ABCDEF,1,,,,,,12000,,,37.5,,,";
        let rec = parse_line(line, 0.0).unwrap();
        assert_eq!(rec.altitude_ft, Some(12000));
        assert!(rec.position.is_none());
    }

    #[test]
    fn test_blank_fields_stay_unset() {
        let rec = parse_line("MSG,1,1,1,abc123,1,,,,,   ", 0.0).unwrap();
        assert_eq!(rec.icao, "ABC123");
        assert!(rec.callsign.is_none());
        assert!(rec.altitude_ft.is_none());
        assert!(rec.squawk.is_none());
    }

    #[test]
    fn test_float_altitude_accepted() {
        let rec = parse_line("MSG,3,1,1,ABCDEF,1,,,,,,35000.0", 0.0).unwrap();
        assert_eq!(rec.altitude_ft, Some(35000));
    }

    #[test]
    fn test_end_to_end_a12345() {
        let mut dec = SbsDecoder::new(60.0);
        let data = "MSG,3,1,1,A12345,1,,,,,,35000,450,180,37.7749,-122.4194,,,,,,\n";
        let updates = dec.feed(data.as_bytes(), 1_700_000_000.0);
        assert_eq!(updates.len(), 1);

        let AircraftUpdate::Updated(rec) = &updates[0] else {
            panic!("expected Updated, got {:?}", updates[0]);
        };
        let mut expected = AircraftRecord::new("A12345", 1_700_000_000.0);
        expected.altitude_ft = Some(35000);
        expected.speed_kts = Some(450.0);
        expected.heading_deg = Some(180.0);
        expected.position = Some(Coordinate::new(37.7749, -122.4194));
        assert_eq!(rec, &expected);
    }

    #[test]
    fn test_fragment_retained_across_chunks() {
        let mut dec = SbsDecoder::new(60.0);
        let line = format!("{FULL}\n");
        let (a, b) = line.split_at(30);

        assert!(dec.feed(a.as_bytes(), 1.0).is_empty());
        let updates = dec.feed(b.as_bytes(), 2.0);
        assert_eq!(updates.len(), 1);
    }

    #[test]
    fn test_crlf_and_lf_lines() {
        let mut dec = SbsDecoder::new(60.0);
        let data = "MSG,1,1,1,AAAAAA,1,,,,,KLM1 \r\nMSG,1,1,1,BBBBBB,1,,,,,DLH2\n";
        let updates = dec.feed(data.as_bytes(), 1.0);
        let callsigns: Vec<_> = updates
            .iter()
            .filter_map(|u| match u {
                AircraftUpdate::Updated(r) => r.callsign.clone(),
                _ => None,
            })
            .collect();
        assert_eq!(callsigns, vec!["KLM1", "DLH2"]);
    }

    #[test]
    fn test_accumulates_fields_per_icao() {
        let mut dec = SbsDecoder::new(60.0);
        dec.feed(b"MSG,1,1,1,A12345,1,,,,,UAL9\n", 1.0);
        let updates = dec.feed(b"MSG,3,1,1,A12345,1,,,,,,12000\n", 2.0);

        let AircraftUpdate::Updated(rec) = &updates[0] else {
            panic!("expected Updated");
        };
        assert_eq!(rec.callsign.as_deref(), Some("UAL9"));
        assert_eq!(rec.altitude_ft, Some(12000));
        assert_eq!(rec.last_seen, 2.0);
        assert_eq!(dec.aircraft_count(), 1);
    }

    #[test]
    fn test_prune_and_reset() {
        let mut dec = SbsDecoder::new(60.0);
        dec.feed(b"MSG,1,1,1,A12345,1,,,,,UAL9\nMSG,1,1,1,B", 1.0);
        assert_eq!(dec.aircraft_count(), 1);

        dec.prune(100.0);
        assert_eq!(dec.aircraft_count(), 0);

        dec.reset();
        // The retained "MSG,1,1,1,B" fragment is gone after reset
        let updates = dec.feed(b"MSG,1,1,1,C12345,1,,,,,X\n", 101.0);
        assert_eq!(updates.len(), 1);
        assert_eq!(dec.lines_accepted, 1);
    }

    #[test]
    fn test_non_finite_speed_and_heading_discarded() {
        let rec = parse_line("MSG,4,1,1,A12345,1,,,,,,,NaN,inf,,,-64", 1.0).unwrap();
        assert_eq!(rec.speed_kts, None);
        assert_eq!(rec.heading_deg, None);
        assert_eq!(rec.vertical_rate_fpm, Some(-64));
    }

    #[test]
    fn test_overlong_fragment_discarded() {
        let mut dec = SbsDecoder::new(60.0);
        let junk = vec![b'x'; 16 * 1024];
        for _ in 0..8 {
            assert!(dec.feed(&junk, 1.0).is_empty());
            assert!(dec.buffer.len() <= MAX_LINE_BYTES);
        }

        // Junk is followed by a newline then a good line
        dec.feed(b"xxx\n", 1.0);
        let updates = dec.feed(b"MSG,1,1,1,A12345,1,,,,,UAL9\n", 2.0);
        assert_eq!(updates.len(), 1);
        assert!(dec.buffer.is_empty());
        assert_eq!(dec.lines_accepted, 1);
    }
}
