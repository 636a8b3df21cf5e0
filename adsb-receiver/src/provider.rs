//! Provider: one configured source = decoder + transport + status.
//!
//! `connect()` spawns the I/O loop and a once-per-second rate gauge.
//! `disconnect()` cancels both, waits for the I/O loop to finish and bumps
//! the connection generation, so nothing from the old session can be
//! mistaken for new data. Each session builds a fresh decoder, which is how
//! buffers, aircraft caches and CPR state get reset.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use adsb_core::config::{ProtocolKind, Settings, SourceConfig};
use adsb_core::{AdsbError, AircraftUpdate, DecoderOptions, ProtocolDecoder, SourceStatus};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backoff::RetryPolicy;
use crate::connection::{HttpPoller, LinkHandler, TcpStreamClient};
use crate::{interval_from_secs, unix_now};

/// Rate gauge period.
const GAUGE_PERIOD: Duration = Duration::from_secs(1);

/// One decoded update, tagged with its origin.
#[derive(Debug, Clone)]
pub struct ProviderMessage {
    pub source_id: String,
    pub generation: u64,
    pub update: AircraftUpdate,
}

/// Everything besides the `SourceConfig` that shapes a provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderOptions {
    pub decoder: DecoderOptions,
    pub retry: RetryPolicy,
    pub refresh_interval: Duration,
}

impl ProviderOptions {
    pub fn from_settings(s: &Settings) -> Self {
        ProviderOptions {
            decoder: DecoderOptions {
                receiver: s.reference,
                stale_after: s.stale_after_secs,
            },
            retry: RetryPolicy::from_settings(&s.retry),
            refresh_interval: interval_from_secs(s.refresh_interval_secs, 0.05, 1.0),
        }
    }
}

impl Default for ProviderOptions {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

/// Counters shared between the I/O loop, the gauge and readers.
#[derive(Debug, Default)]
struct Meters {
    messages: AtomicU64,
    rate_bits: AtomicU64,
    aircraft: AtomicUsize,
}

impl Meters {
    fn rate(&self) -> f64 {
        f64::from_bits(self.rate_bits.load(Ordering::Relaxed))
    }

    fn set_rate(&self, rate: f64) {
        self.rate_bits.store(rate.to_bits(), Ordering::Relaxed);
    }
}

struct Session {
    cancel: CancellationToken,
    io: JoinHandle<()>,
    gauge: JoinHandle<()>,
}

pub struct Provider {
    config: SourceConfig,
    options: ProviderOptions,
    updates: mpsc::UnboundedSender<ProviderMessage>,
    status: Arc<watch::Sender<SourceStatus>>,
    meters: Arc<Meters>,
    generation: Arc<AtomicU64>,
    session: Option<Session>,
}

impl Provider {
    pub fn new(
        config: SourceConfig,
        options: ProviderOptions,
        updates: mpsc::UnboundedSender<ProviderMessage>,
    ) -> Self {
        let (status, _) = watch::channel(SourceStatus::Disconnected);
        Provider {
            config,
            options,
            updates,
            status: Arc::new(status),
            meters: Arc::new(Meters::default()),
            generation: Arc::new(AtomicU64::new(0)),
            session: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn config(&self) -> &SourceConfig {
        &self.config
    }

    pub fn options(&self) -> &ProviderOptions {
        &self.options
    }

    pub fn status(&self) -> SourceStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SourceStatus> {
        self.status.subscribe()
    }

    pub fn messages_per_second(&self) -> f64 {
        self.meters.rate()
    }

    /// Current session generation. Messages carrying another value are stale.
    pub fn generation(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.generation)
    }

    /// True while an I/O loop is alive.
    pub fn is_running(&self) -> bool {
        self.session.as_ref().is_some_and(|s| !s.io.is_finished())
    }

    /// Start the I/O loop. No-op while already running.
    pub fn connect(&mut self) {
        if self.is_running() {
            return;
        }
        // A loop that ended on its own (terminal error) leaves a stale session
        if let Some(old) = self.session.take() {
            old.cancel.cancel();
            old.gauge.abort();
        }

        if let Err(e) = self.config.validate() {
            warn!(source = %self.config.id, error = %e, "invalid source");
            self.status.send_replace(SourceStatus::Error(e.to_string()));
            return;
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = CancellationToken::new();
        info!(
            source = %self.config.id,
            protocol = %self.config.protocol,
            generation,
            "connecting"
        );

        let mut handler = FeedHandler {
            source_id: self.config.id.clone(),
            generation,
            decoder: ProtocolDecoder::new(self.config.protocol, self.options.decoder),
            updates: self.updates.clone(),
            status: Arc::clone(&self.status),
            meters: Arc::clone(&self.meters),
        };

        let io = {
            let cancel = cancel.clone();
            let config = self.config.clone();
            let options = self.options.clone();
            tokio::spawn(async move {
                match config.protocol {
                    ProtocolKind::Dump1090 => {
                        HttpPoller::new(config.url(), options.refresh_interval, options.retry)
                            .run(&mut handler, &cancel)
                            .await
                    }
                    ProtocolKind::Sbs | ProtocolKind::Beast => {
                        TcpStreamClient::new(config.address(), options.retry)
                            .run(&mut handler, &cancel)
                            .await
                    }
                }
                debug!(source = %config.id, "io loop finished");
            })
        };

        let gauge = tokio::spawn(run_gauge(
            Arc::clone(&self.meters),
            Arc::clone(&self.status),
            cancel.clone(),
        ));

        self.session = Some(Session { cancel, io, gauge });
    }

    /// Stop the I/O loop and reset. Safe in any state.
    ///
    /// Returns only after the I/O loop has exited, so no handler call can
    /// happen afterwards.
    pub async fn disconnect(&mut self) {
        if let Some(session) = self.session.take() {
            session.cancel.cancel();
            if let Err(e) = session.io.await {
                warn!(source = %self.config.id, error = %e, "io task failed");
            }
            session.gauge.abort();
            let _ = session.gauge.await;
            info!(source = %self.config.id, "disconnected");
        }
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.meters.messages.store(0, Ordering::Relaxed);
        self.meters.aircraft.store(0, Ordering::Relaxed);
        self.meters.set_rate(0.0);
        self.status.send_replace(SourceStatus::Disconnected);
    }
}

/// Recompute the message rate once per second from a counter reset each
/// tick, and keep the `Connected` aircraft count current.
async fn run_gauge(meters: Arc<Meters>, status: Arc<watch::Sender<SourceStatus>>, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(GAUGE_PERIOD);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut last = Instant::now();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }
        let elapsed = last.elapsed().as_secs_f64();
        last = Instant::now();
        let count = meters.messages.swap(0, Ordering::Relaxed);
        meters.set_rate(if elapsed > 0.0 { count as f64 / elapsed } else { 0.0 });

        let aircraft = meters.aircraft.load(Ordering::Relaxed);
        status.send_if_modified(|s| match s {
            SourceStatus::Connected { aircraft: n } if *n != aircraft => {
                *n = aircraft;
                true
            }
            _ => false,
        });
    }
}

/// Bridges transport callbacks into the decoder and the update channel.
struct FeedHandler {
    source_id: String,
    generation: u64,
    decoder: ProtocolDecoder,
    updates: mpsc::UnboundedSender<ProviderMessage>,
    status: Arc<watch::Sender<SourceStatus>>,
    meters: Arc<Meters>,
}

impl LinkHandler for FeedHandler {
    fn on_data(&mut self, data: &[u8]) -> Result<Option<usize>, AdsbError> {
        let before = self.decoder.units_accepted();
        let updates = self.decoder.feed(data, unix_now())?;

        let mut messages = 0u64;
        for update in updates {
            messages += match &update {
                AircraftUpdate::Snapshot(records) => records.len() as u64,
                _ => 1,
            };
            // Receiver gone means the coordinator is shutting down
            let _ = self.updates.send(ProviderMessage {
                source_id: self.source_id.clone(),
                generation: self.generation,
                update,
            });
        }
        self.meters.messages.fetch_add(messages, Ordering::Relaxed);

        let aircraft = self.decoder.aircraft_count();
        self.meters.aircraft.store(aircraft, Ordering::Relaxed);
        Ok((self.decoder.units_accepted() > before).then_some(aircraft))
    }

    fn on_status(&mut self, status: SourceStatus) {
        debug!(source = %self.source_id, status = %status, "status");
        self.status.send_replace(status);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
