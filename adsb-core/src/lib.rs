//! adsb-core: Pure decode + aggregation library for ADS-B feeds.
//!
//! No async, no sockets. Decoders for dump1090 JSON, SBS text and Beast
//! binary streams (with CPR position resolution), the aircraft state store,
//! the alert rule engine and the settings model. `adsb-receiver` drives it
//! from live network connections.

pub mod alert;
pub mod beast;
pub mod config;
pub mod cpr;
pub mod decode;
pub mod dump1090;
pub mod frame;
pub mod geo;
pub mod sbs;
pub mod source;
pub mod store;
pub mod types;

// Re-export commonly used types at crate root
pub use alert::{AlertEngine, AlertEvent, AlertRuleConfig};
pub use config::{ProtocolKind, Settings, SourceConfig};
pub use source::{DecoderOptions, ProtocolDecoder};
pub use store::{AircraftStore, ViewOptions};
pub use types::*;
