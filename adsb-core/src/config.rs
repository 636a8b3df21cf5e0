//! Settings file management for adsb-receiver.
//!
//! Reads/writes `~/.adsb-receiver/config.toml` with the configured feed
//! sources, observer location, display limits, retry policy and alert rules.
//! Every field has a default, so a partial (or missing) file is valid.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::alert::AlertRuleConfig;
use crate::types::{AdsbError, Coordinate, Result};

/// Default HTTP path of the dump1090 aircraft snapshot.
pub const DEFAULT_DUMP1090_PATH: &str = "/data/aircraft.json";

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

/// Wire format spoken by a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolKind {
    Dump1090,
    Sbs,
    Beast,
}

impl ProtocolKind {
    /// Conventional port for each feed type.
    pub fn default_port(self) -> u16 {
        match self {
            ProtocolKind::Dump1090 => 8080,
            ProtocolKind::Sbs => 30003,
            ProtocolKind::Beast => 30005,
        }
    }
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProtocolKind::Dump1090 => "dump1090",
            ProtocolKind::Sbs => "sbs",
            ProtocolKind::Beast => "beast",
        })
    }
}

impl FromStr for ProtocolKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dump1090" | "json" => Ok(ProtocolKind::Dump1090),
            "sbs" | "basestation" => Ok(ProtocolKind::Sbs),
            "beast" => Ok(ProtocolKind::Beast),
            other => Err(format!("unknown protocol '{other}'")),
        }
    }
}

/// One configured feed. Immutable once a provider is built from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub id: String,
    pub protocol: ProtocolKind,
    pub host: String,
    pub port: u16,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Ordering hint only; every enabled source contributes equally.
    #[serde(default)]
    pub priority: i32,
    /// HTTP path for dump1090 sources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

fn default_true() -> bool {
    true
}

impl SourceConfig {
    pub fn new(id: impl Into<String>, protocol: ProtocolKind, host: impl Into<String>, port: u16) -> Self {
        SourceConfig {
            id: id.into(),
            protocol,
            host: host.into(),
            port,
            enabled: true,
            priority: 0,
            path: None,
        }
    }

    /// Parse `kind://host[:port]`, e.g. `beast://10.0.0.5:30005`.
    pub fn parse_uri(id: impl Into<String>, uri: &str) -> Result<Self> {
        let id = id.into();
        let invalid = |reason: String| AdsbError::InvalidSource {
            id: id.clone(),
            reason,
        };

        let (kind, rest) = uri
            .split_once("://")
            .ok_or_else(|| invalid(format!("expected kind://host:port, got '{uri}'")))?;
        let protocol: ProtocolKind = kind.parse().map_err(invalid)?;

        let (authority, path) = match rest.find('/') {
            Some(i) => (&rest[..i], Some(rest[i..].to_string())),
            None => (rest, None),
        };
        let (host, port) = match authority.rsplit_once(':') {
            Some((h, p)) => {
                let port = p
                    .parse::<u16>()
                    .map_err(|_| invalid(format!("invalid port '{p}'")))?;
                (h, port)
            }
            None => (authority, protocol.default_port()),
        };

        let mut config = SourceConfig::new(id.clone(), protocol, host, port);
        config.path = path;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that cannot possibly connect.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| {
            Err(AdsbError::InvalidSource {
                id: self.id.clone(),
                reason: reason.to_string(),
            })
        };
        if self.host.trim().is_empty() {
            return invalid("host is empty");
        }
        if self.host.chars().any(|c| c.is_whitespace() || c == '/') {
            return invalid("host contains invalid characters");
        }
        if self.port == 0 {
            return invalid("port must be non-zero");
        }
        Ok(())
    }

    /// `host:port` for TCP sources.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Poll URL for dump1090 sources.
    pub fn url(&self) -> String {
        let path = self.path.as_deref().unwrap_or(DEFAULT_DUMP1090_PATH);
        let sep = if path.starts_with('/') { "" } else { "/" };
        format!("http://{}:{}{}{}", self.host, self.port, sep, path)
    }
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Upper bound for every interval setting, in seconds.
pub const MAX_INTERVAL_SECS: f64 = 86_400.0;

/// Reconnect policy shared by every connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
}

impl Default for RetrySettings {
    fn default() -> Self {
        RetrySettings {
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            max_attempts: 10,
        }
    }
}

/// Read-only snapshot of everything the receiver needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub refresh_interval_secs: f64,
    pub stale_after_secs: f64,
    pub sweep_interval_secs: f64,
    pub max_display: usize,
    pub require_position: bool,
    pub alert_cooldown_secs: f64,
    /// Observer location: distance reference and local-CPR fallback.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<Coordinate>,
    pub retry: RetrySettings,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<SourceConfig>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<AlertRuleConfig>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            refresh_interval_secs: 1.0,
            stale_after_secs: 60.0,
            sweep_interval_secs: 10.0,
            max_display: 100,
            require_position: false,
            alert_cooldown_secs: 300.0,
            reference: None,
            retry: RetrySettings::default(),
            sources: Vec::new(),
            rules: Vec::new(),
        }
    }
}

impl Settings {
    /// Parse and validate a settings document.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let settings: Settings = toml::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Intervals must be positive, finite and at most [`MAX_INTERVAL_SECS`];
    /// the alert cooldown may be zero.
    pub fn validate(&self) -> Result<()> {
        let intervals = [
            ("refresh_interval_secs", self.refresh_interval_secs, false),
            ("stale_after_secs", self.stale_after_secs, false),
            ("sweep_interval_secs", self.sweep_interval_secs, false),
            ("alert_cooldown_secs", self.alert_cooldown_secs, true),
        ];
        for (field, secs, zero_ok) in intervals {
            let low_ok = if zero_ok { secs >= 0.0 } else { secs > 0.0 };
            // NaN fails both comparisons
            if !(low_ok && secs <= MAX_INTERVAL_SECS) {
                return Err(AdsbError::InvalidSetting {
                    field,
                    reason: format!("{secs} is outside 0..={MAX_INTERVAL_SECS}"),
                });
            }
        }
        Ok(())
    }

    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn enabled_sources(&self) -> impl Iterator<Item = &SourceConfig> {
        self.sources.iter().filter(|s| s.enabled)
    }
}

/// Get the config directory path (`~/.adsb-receiver/`).
pub fn config_dir() -> PathBuf {
    dirs_home().join(".adsb-receiver")
}

/// Get the default settings file path.
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}

fn dirs_home() -> PathBuf {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// Load settings from `path`.
///
/// Returns defaults if the file doesn't exist.
pub fn load_settings(path: &Path) -> Result<Settings> {
    if !path.exists() {
        return Ok(Settings::default());
    }
    let text = std::fs::read_to_string(path)?;
    Settings::from_toml_str(&text)
}

/// Save settings to `path`, creating the parent directory if needed.
pub fn save_settings(settings: &Settings, path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::write(path, settings.to_toml_string()?)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::AlertCondition;

    #[test]
    fn test_default_settings() {
        let s = Settings::default();
        assert_eq!(s.refresh_interval_secs, 1.0);
        assert_eq!(s.stale_after_secs, 60.0);
        assert_eq!(s.sweep_interval_secs, 10.0);
        assert_eq!(s.max_display, 100);
        assert_eq!(s.alert_cooldown_secs, 300.0);
        assert_eq!(s.retry.max_attempts, 10);
        assert!(s.sources.is_empty());
    }

    #[test]
    fn test_parse_settings() {
        let text = r#"
            max_display = 25
            require_position = true

            [reference]
            lat = 35.18
            lon = -83.38

            [retry]
            max_attempts = 3

            [[sources]]
            id = "local"
            protocol = "beast"
            host = "127.0.0.1"
            port = 30005

            [[sources]]
            id = "web"
            protocol = "dump1090"
            host = "piaware.local"
            port = 8080
            enabled = false
            path = "/skyaware/data/aircraft.json"

            [[rules]]
            id = "close"
            name = "Close traffic"
            kind = "proximity"
            max_distance_nm = 5.0
            max_altitude_ft = 10000
            highlight_color = "red"

            [[rules]]
            id = "mayday"
            name = "Emergency"
            kind = "squawk"
            codes = ["7500", "7600", "7700"]
        "#;
        let s = Settings::from_toml_str(text).unwrap();
        assert_eq!(s.max_display, 25);
        assert!(s.require_position);
        assert_eq!(s.reference, Some(Coordinate::new(35.18, -83.38)));
        assert_eq!(s.retry.max_attempts, 3);
        assert_eq!(s.retry.base_delay_ms, 1000);
        assert_eq!(s.stale_after_secs, 60.0);

        assert_eq!(s.sources.len(), 2);
        assert_eq!(s.sources[0].protocol, ProtocolKind::Beast);
        assert!(s.sources[0].enabled);
        assert_eq!(s.enabled_sources().count(), 1);
        assert_eq!(
            s.sources[1].url(),
            "http://piaware.local:8080/skyaware/data/aircraft.json"
        );

        assert_eq!(s.rules.len(), 2);
        assert!(s.rules[0].enabled);
        assert!(matches!(
            s.rules[0].condition,
            AlertCondition::Proximity {
                max_distance_nm: Some(d),
                ..
            } if d == 5.0
        ));
        assert_eq!(s.rules[0].highlight_color.as_deref(), Some("red"));
    }

    #[test]
    fn test_invalid_toml_is_error() {
        assert!(Settings::from_toml_str("max_display = \"lots\"").is_err());
        assert!(Settings::from_toml_str("[[sources]]\nid = 1").is_err());
    }

    #[test]
    fn test_out_of_range_intervals_rejected() {
        for text in [
            "sweep_interval_secs = inf",
            "refresh_interval_secs = nan",
            "stale_after_secs = 0.0",
            "alert_cooldown_secs = -1.0",
            "sweep_interval_secs = 1e12",
        ] {
            match Settings::from_toml_str(text) {
                Err(AdsbError::InvalidSetting { .. }) => {}
                other => panic!("{text}: expected InvalidSetting, got {other:?}"),
            }
        }
        let s = Settings::from_toml_str("alert_cooldown_secs = 0.0\nsweep_interval_secs = 0.5").unwrap();
        assert_eq!(s.sweep_interval_secs, 0.5);
    }

    #[test]
    fn test_load_rejects_infinite_sweep_interval() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "sweep_interval_secs = inf\n").unwrap();
        let err = load_settings(&path).unwrap_err();
        assert!(err.to_string().contains("sweep_interval_secs"), "{err}");
    }

    #[test]
    fn test_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut s = Settings::default();
        s.reference = Some(Coordinate::new(51.47, -0.45));
        s.sources.push(SourceConfig::new("sbs", ProtocolKind::Sbs, "10.0.0.2", 30003));
        save_settings(&s, &path).unwrap();

        let loaded = load_settings(&path).unwrap();
        assert_eq!(loaded, s);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = load_settings(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(loaded, Settings::default());
    }

    #[test]
    fn test_validate_source() {
        assert!(SourceConfig::new("a", ProtocolKind::Sbs, "host", 30003).validate().is_ok());
        assert!(SourceConfig::new("a", ProtocolKind::Sbs, "", 30003).validate().is_err());
        assert!(SourceConfig::new("a", ProtocolKind::Sbs, "  ", 30003).validate().is_err());
        assert!(SourceConfig::new("a", ProtocolKind::Sbs, "host", 0).validate().is_err());
        assert!(SourceConfig::new("a", ProtocolKind::Sbs, "bad host", 1).validate().is_err());
    }

    #[test]
    fn test_parse_uri() {
        let s = SourceConfig::parse_uri("x", "beast://10.0.0.5:30105").unwrap();
        assert_eq!(s.protocol, ProtocolKind::Beast);
        assert_eq!(s.host, "10.0.0.5");
        assert_eq!(s.port, 30105);

        let s = SourceConfig::parse_uri("y", "sbs://radar").unwrap();
        assert_eq!(s.port, 30003);

        let s = SourceConfig::parse_uri("z", "dump1090://pi:8080/tar1090/data/aircraft.json").unwrap();
        assert_eq!(s.url(), "http://pi:8080/tar1090/data/aircraft.json");

        assert!(SourceConfig::parse_uri("w", "radar:30003").is_err());
        assert!(SourceConfig::parse_uri("w", "mlat://radar:30003").is_err());
        assert!(SourceConfig::parse_uri("w", "sbs://radar:notaport").is_err());
        assert!(SourceConfig::parse_uri("w", "sbs://:30003").is_err());
    }

    #[test]
    fn test_default_url() {
        let s = SourceConfig::new("d", ProtocolKind::Dump1090, "localhost", 8080);
        assert_eq!(s.url(), "http://localhost:8080/data/aircraft.json");
    }
}
