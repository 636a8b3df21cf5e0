//! adsb-receiver: headless multi-source ADS-B receiver.
//!
//! Connects to the configured dump1090 / SBS / Beast sources, merges their
//! aircraft into one view and prints a periodic summary plus live alerts.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use comfy_table::{Cell, Table};
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use adsb_core::config::{self, SourceConfig};
use adsb_core::geo::distance_nm;
use adsb_core::{AdsbError, AircraftRecord, AlertEvent, Coordinate, Settings};
use adsb_receiver::coordinator::DEFAULT_DEBOUNCE;
use adsb_receiver::watcher::{SettingsWatcher, DEFAULT_POLL_INTERVAL};
use adsb_receiver::{unix_now, Coordinator};

#[derive(Parser)]
#[command(
    name = "adsb-receiver",
    version,
    about = "Multi-source ADS-B receiver with merged aircraft view and alerts"
)]
struct Cli {
    /// Settings file (TOML). Defaults to ~/.adsb-receiver/config.toml
    #[arg(long, env = "ADSB_RECEIVER_CONFIG")]
    config: Option<PathBuf>,

    /// Extra source as kind://host[:port][/path], e.g. beast://localhost:30005
    #[arg(long = "source", value_name = "URI")]
    sources: Vec<String>,

    /// Reference latitude (overrides the settings file)
    #[arg(long, allow_negative_numbers = true, requires = "lon")]
    lat: Option<f64>,

    /// Reference longitude (overrides the settings file)
    #[arg(long, allow_negative_numbers = true, requires = "lat")]
    lon: Option<f64>,

    /// Seconds between aircraft summaries
    #[arg(long, default_value = "10")]
    summary_secs: u64,

    /// Print JSON lines instead of tables
    #[arg(long)]
    json: bool,

    /// Write the effective settings to the config file and exit
    #[arg(long)]
    write_config: bool,
}

/// Command-line additions layered over every settings reload.
#[derive(Debug, Clone, Default)]
struct Overrides {
    sources: Vec<SourceConfig>,
    reference: Option<Coordinate>,
}

impl Overrides {
    fn from_cli(cli: &Cli) -> Result<Self, AdsbError> {
        let sources = cli
            .sources
            .iter()
            .enumerate()
            .map(|(i, uri)| SourceConfig::parse_uri(format!("cli-{}", i + 1), uri))
            .collect::<Result<Vec<_>, _>>()?;
        let reference = match (cli.lat, cli.lon) {
            (Some(lat), Some(lon)) => Some(Coordinate::new(lat, lon)),
            _ => None,
        };
        Ok(Overrides { sources, reference })
    }

    fn apply(&self, settings: &mut Settings) {
        for source in &self.sources {
            if !settings.sources.iter().any(|s| s.id == source.id) {
                settings.sources.push(source.clone());
            }
        }
        if self.reference.is_some() {
            settings.reference = self.reference;
        }
    }
}

#[derive(Serialize)]
struct SummaryLine<'a> {
    timestamp: f64,
    status: String,
    messages_per_second: f64,
    sources: Vec<SourceLine>,
    aircraft: &'a [AircraftRecord],
}

#[derive(Serialize)]
struct SourceLine {
    id: String,
    status: String,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    init_logging();
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        error!(error = %e, "fatal");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), AdsbError> {
    let path = cli.config.clone().unwrap_or_else(config::config_file);
    let overrides = Overrides::from_cli(&cli)?;

    let mut settings = config::load_settings(&path)?;
    overrides.apply(&mut settings);

    if cli.write_config {
        config::save_settings(&settings, &path)?;
        println!("Wrote {}", path.display());
        return Ok(());
    }

    if settings.enabled_sources().next().is_none() {
        warn!(path = %path.display(), "no enabled sources configured");
    }
    info!(
        path = %path.display(),
        sources = settings.enabled_sources().count(),
        rules = settings.rules.len(),
        "starting"
    );

    let coordinator = Coordinator::start(settings.clone()).await;
    let cancel = CancellationToken::new();

    let (settings_tx, settings_rx) = watch::channel(settings);
    let watcher = {
        let overrides = overrides.clone();
        tokio::spawn(SettingsWatcher::new(&path, DEFAULT_POLL_INTERVAL).run(
            settings_tx,
            cancel.clone(),
            move |s| overrides.apply(s),
        ))
    };
    let follower = coordinator.follow_settings(settings_rx, DEFAULT_DEBOUNCE);

    let mut ticker = tokio::time::interval(Duration::from_secs(cli.summary_secs.max(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut alerts = coordinator.subscribe_alerts();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("interrupted, shutting down");
                break;
            }
            _ = ticker.tick() => print_summary(&coordinator, cli.json).await,
            event = alerts.recv() => match event {
                Ok(event) => print_alert(&event, cli.json),
                Err(broadcast::error::RecvError::Lagged(n)) => warn!(skipped = n, "alert output lagging"),
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    cancel.cancel();
    let _ = watcher.await;
    coordinator.shutdown().await;
    let _ = follower.await;
    Ok(())
}

fn print_alert(event: &AlertEvent, json: bool) {
    if json {
        match serde_json::to_string(event) {
            Ok(line) => println!("{line}"),
            Err(e) => warn!(error = %e, "cannot encode alert"),
        }
    } else {
        println!("ALERT [{:?}] {}: {}", event.priority, event.title, event.body);
    }
}

async fn print_summary(coordinator: &Coordinator, json: bool) {
    let status = coordinator.status();
    let sources = coordinator.provider_statuses().await;
    let aircraft = coordinator.aircraft();

    if json {
        let line = SummaryLine {
            timestamp: unix_now(),
            status: status.status.to_string(),
            messages_per_second: status.messages_per_second,
            sources: sources
                .into_iter()
                .map(|(id, s)| SourceLine {
                    id,
                    status: s.to_string(),
                })
                .collect(),
            aircraft: &aircraft,
        };
        match serde_json::to_string(&line) {
            Ok(line) => println!("{line}"),
            Err(e) => warn!(error = %e, "cannot encode summary"),
        }
        return;
    }

    println!();
    println!(
        "Status: {} ({:.1} msg/s), {} aircraft shown",
        status.status,
        status.messages_per_second,
        aircraft.len()
    );
    for (id, s) in &sources {
        println!("  {id}: {s}");
    }

    if aircraft.is_empty() {
        return;
    }

    let reference = coordinator.settings().reference;
    let highlights = coordinator.active_alerts();
    let now = unix_now();

    let mut table = Table::new();
    table.set_header(vec![
        "ICAO", "Callsign", "Squawk", "Alt (ft)", "Speed (kts)", "Hdg", "VRate", "Lat", "Lon",
        "Dist (nm)", "Age", "Alert",
    ]);

    let dash = || "-".to_string();
    for ac in &aircraft {
        let dist = match (reference, ac.position) {
            (Some(r), Some(p)) => format!("{:.1}", distance_nm(r, p)),
            _ => dash(),
        };
        table.add_row(vec![
            Cell::new(&ac.icao),
            Cell::new(ac.callsign.as_deref().unwrap_or("-")),
            Cell::new(ac.squawk.as_deref().unwrap_or("-")),
            Cell::new(ac.altitude_ft.map(|a| a.to_string()).unwrap_or_else(dash)),
            Cell::new(ac.speed_kts.map(|s| format!("{s:.0}")).unwrap_or_else(dash)),
            Cell::new(ac.heading_deg.map(|h| format!("{h:.1}")).unwrap_or_else(dash)),
            Cell::new(ac.vertical_rate_fpm.map(|v| format!("{v:+}")).unwrap_or_else(dash)),
            Cell::new(ac.position.map(|p| format!("{:.4}", p.lat)).unwrap_or_else(dash)),
            Cell::new(ac.position.map(|p| format!("{:.4}", p.lon)).unwrap_or_else(dash)),
            Cell::new(dist),
            Cell::new(format!("{:.0}s", ac.age(now).max(0.0))),
            Cell::new(highlights.get(&ac.icao).map(String::as_str).unwrap_or("")),
        ]);
    }

    println!("{table}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_overrides_from_cli() {
        let cli = Cli::parse_from([
            "adsb-receiver",
            "--source",
            "beast://localhost:30005",
            "--source",
            "sbs://10.0.0.2",
            "--lat",
            "-33.9",
            "--lon",
            "151.2",
        ]);
        let o = Overrides::from_cli(&cli).unwrap();
        assert_eq!(o.sources.len(), 2);
        assert_eq!(o.sources[0].id, "cli-1");
        assert_eq!(o.sources[1].port, 30003);
        assert_eq!(o.reference, Some(Coordinate::new(-33.9, 151.2)));

        let mut s = Settings::default();
        o.apply(&mut s);
        o.apply(&mut s);
        assert_eq!(s.sources.len(), 2);
        assert_eq!(s.reference, o.reference);
    }

    #[test]
    fn test_bad_source_uri_rejected() {
        let cli = Cli::parse_from(["adsb-receiver", "--source", "carrier-pigeon://loft"]);
        assert!(Overrides::from_cli(&cli).is_err());
    }

    #[test]
    fn test_lat_requires_lon() {
        assert!(Cli::try_parse_from(["adsb-receiver", "--lat", "50.0"]).is_err());
    }
}
