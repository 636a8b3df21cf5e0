//! Beast binary framing.
//!
//! Wire layout, every frame introduced by the escape byte `0x1A`:
//!
//! ```text
//! 0x1A | type | 6-byte MLAT timestamp | 1-byte signal | payload
//! ```
//!
//! - `0x31` ('1'): Mode-AC, 2-byte payload
//! - `0x32` ('2'): Mode-S short, 7-byte payload
//! - `0x33` ('3'): Mode-S long / extended squitter, 14-byte payload
//!
//! A literal `0x1A` inside a frame is doubled on the wire. An unknown type
//! byte, or a lone `0x1A` in the middle of a frame, drops just the leading
//! escape byte and rescans, so one corrupt frame never costs the frames
//! behind it.

use tracing::debug;

/// Frame escape / start marker.
pub const ESCAPE: u8 = 0x1A;

/// Bytes between the type byte and the payload (timestamp + signal).
const HEADER_LEN: usize = 7;

/// Beast frame types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    ModeAc,
    ModeSShort,
    ModeSLong,
}

impl FrameKind {
    pub fn from_type_byte(b: u8) -> Option<FrameKind> {
        match b {
            0x31 => Some(FrameKind::ModeAc),
            0x32 => Some(FrameKind::ModeSShort),
            0x33 => Some(FrameKind::ModeSLong),
            _ => None,
        }
    }

    /// Payload length in bytes.
    pub fn payload_len(self) -> usize {
        match self {
            FrameKind::ModeAc => 2,
            FrameKind::ModeSShort => 7,
            FrameKind::ModeSLong => 14,
        }
    }
}

/// A parsed Beast frame.
#[derive(Debug, Clone, PartialEq)]
pub struct BeastFrame {
    pub kind: FrameKind,
    /// 48-bit 12 MHz receiver counter.
    pub mlat_timestamp: u64,
    pub signal: u8,
    pub payload: Vec<u8>,
}

impl BeastFrame {
    /// Downlink Format (first 5 bits). None for Mode-AC frames.
    pub fn df(&self) -> Option<u8> {
        match self.kind {
            FrameKind::ModeAc => None,
            _ => self.payload.first().map(|b| b >> 3),
        }
    }
}

/// Incremental Beast frame reader.
///
/// Feed arbitrary byte chunks with [`FrameReader::extend`] and drain
/// complete frames with [`FrameReader::next_frame`]. Bytes belonging to an
/// incomplete trailing frame are kept for the next chunk.
#[derive(Debug, Default)]
pub struct FrameReader {
    buffer: Vec<u8>,
    /// Count of single-byte resyncs (corrupt or unknown frames).
    pub resyncs: u64,
}

/// Outcome of one parse attempt at the head of the buffer.
enum Parse {
    Frame(BeastFrame, usize),
    Incomplete,
    Resync,
}

impl FrameReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
        self.resyncs = 0;
    }

    /// Pop the next complete frame, or `None` if more bytes are needed.
    pub fn next_frame(&mut self) -> Option<BeastFrame> {
        loop {
            // Skip garbage up to the next escape byte
            match self.buffer.iter().position(|&b| b == ESCAPE) {
                Some(0) => {}
                Some(start) => {
                    self.buffer.drain(..start);
                }
                None => {
                    self.buffer.clear();
                    return None;
                }
            }

            match parse_head(&self.buffer) {
                Parse::Frame(frame, consumed) => {
                    self.buffer.drain(..consumed);
                    return Some(frame);
                }
                Parse::Incomplete => return None,
                Parse::Resync => {
                    debug!(
                        byte = self.buffer.get(1).copied().unwrap_or_default(),
                        "beast resync"
                    );
                    self.resyncs += 1;
                    self.buffer.drain(..1);
                }
            }
        }
    }
}

/// Try to parse one frame starting at `buf[0] == ESCAPE`.
fn parse_head(buf: &[u8]) -> Parse {
    let Some(&type_byte) = buf.get(1) else {
        return Parse::Incomplete;
    };
    let Some(kind) = FrameKind::from_type_byte(type_byte) else {
        return Parse::Resync;
    };

    let body_len = HEADER_LEN + kind.payload_len();
    let mut body = Vec::with_capacity(body_len);
    let mut i = 2;

    while body.len() < body_len {
        let Some(&b) = buf.get(i) else {
            return Parse::Incomplete;
        };
        if b == ESCAPE {
            match buf.get(i + 1) {
                Some(&ESCAPE) => {
                    body.push(ESCAPE);
                    i += 2;
                }
                // A frame start inside this frame: it was truncated
                Some(_) => return Parse::Resync,
                None => return Parse::Incomplete,
            }
        } else {
            body.push(b);
            i += 1;
        }
    }

    let mlat_timestamp = body[..6]
        .iter()
        .fold(0u64, |acc, &b| (acc << 8) | b as u64);

    Parse::Frame(
        BeastFrame {
            kind,
            mlat_timestamp,
            signal: body[6],
            payload: body[HEADER_LEN..].to_vec(),
        },
        i,
    )
}

/// Wrap a payload into an escaped Beast frame. Used by tests and tooling.
pub fn encode_frame(kind: FrameKind, mlat_timestamp: u64, signal: u8, payload: &[u8]) -> Vec<u8> {
    let type_byte = match kind {
        FrameKind::ModeAc => 0x31,
        FrameKind::ModeSShort => 0x32,
        FrameKind::ModeSLong => 0x33,
    };
    let mut out = vec![ESCAPE, type_byte];
    let ts = mlat_timestamp.to_be_bytes();
    for &b in ts[2..].iter().chain(std::iter::once(&signal)).chain(payload) {
        out.push(b);
        if b == ESCAPE {
            out.push(ESCAPE);
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
