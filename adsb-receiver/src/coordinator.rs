//! Provider Coordinator: owns the live providers, the aircraft store and the
//! alert engine.
//!
//! Providers push `ProviderMessage`s into one unbounded channel. A single
//! merge task drains it in batches, applies every update to the store in
//! arrival order, then recomputes the view and alert state once per batch.
//! Outputs are published on watch channels (view, combined status, active
//! alert colors) and a broadcast channel (alert events).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use adsb_core::config::SourceConfig;
use adsb_core::{
    combine_status, AircraftRecord, AircraftStore, AlertEngine, AlertEvent, Settings,
    SourceStatus, ViewOptions,
};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::provider::{Provider, ProviderMessage, ProviderOptions};
use crate::{interval_from_secs, unix_now};

/// Default settle time before a settings change is applied.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

const STATUS_PERIOD: Duration = Duration::from_secs(1);
const ALERT_CHANNEL_CAPACITY: usize = 256;

/// Aggregate connectivity across every provider.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CombinedStatus {
    pub status: SourceStatus,
    pub messages_per_second: f64,
}

/// Store + alert engine, mutated together under one lock so readers never
/// see a half-applied batch.
struct State {
    store: AircraftStore,
    alerts: AlertEngine,
    view: ViewOptions,
}

struct Inner {
    settings: RwLock<Settings>,
    providers: tokio::sync::Mutex<HashMap<String, Provider>>,
    generations: Mutex<HashMap<String, Arc<AtomicU64>>>,
    state: Mutex<State>,
    updates: mpsc::UnboundedSender<ProviderMessage>,
    view_tx: watch::Sender<Vec<AircraftRecord>>,
    status_tx: watch::Sender<CombinedStatus>,
    colors_tx: watch::Sender<HashMap<String, String>>,
    alerts_tx: broadcast::Sender<AlertEvent>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

impl Coordinator {
    /// Spawn the merge, sweep and status tasks, then bring up the
    /// configured sources.
    pub async fn start(settings: Settings) -> Self {
        let (updates, rx) = mpsc::unbounded_channel();
        let (view_tx, _) = watch::channel(Vec::new());
        let (status_tx, _) = watch::channel(CombinedStatus::default());
        let (colors_tx, _) = watch::channel(HashMap::new());
        let (alerts_tx, _) = broadcast::channel(ALERT_CHANNEL_CAPACITY);

        let state = State {
            store: AircraftStore::new(settings.stale_after_secs),
            alerts: AlertEngine::new(Vec::new(), None),
            view: ViewOptions::default(),
        };

        let inner = Arc::new(Inner {
            settings: RwLock::new(settings.clone()),
            providers: tokio::sync::Mutex::new(HashMap::new()),
            generations: Mutex::new(HashMap::new()),
            state: Mutex::new(state),
            updates,
            view_tx,
            status_tx,
            colors_tx,
            alerts_tx,
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        });

        let tasks = vec![
            tokio::spawn(run_merge(Arc::clone(&inner), rx)),
            tokio::spawn(run_sweep(Arc::clone(&inner))),
            tokio::spawn(run_status(Arc::clone(&inner))),
        ];
        *lock(&inner.tasks) = tasks;

        let coordinator = Coordinator { inner };
        coordinator.apply_settings(settings).await;
        coordinator
    }

    /// Re-sync providers, rules and view parameters with `settings`.
    ///
    /// Providers whose config or options are unchanged keep running. The rest
    /// are disconnected and rebuilt.
    pub async fn apply_settings(&self, settings: Settings) {
        let inner = &self.inner;
        let options = ProviderOptions::from_settings(&settings);

        {
            let mut state = lock(&inner.state);
            state.store.stale_after = settings.stale_after_secs;
            state.view = ViewOptions {
                reference: settings.reference,
                require_position: settings.require_position,
                max_count: settings.max_display,
            };
            state.alerts.set_rules(settings.rules.clone());
            state.alerts.set_reference(settings.reference);
            state.alerts.set_cooldown(settings.alert_cooldown_secs);
        }

        let desired: HashMap<String, SourceConfig> = settings
            .enabled_sources()
            .map(|c| (c.id.clone(), c.clone()))
            .collect();
        *inner.settings.write().unwrap_or_else(PoisonError::into_inner) = settings;

        let mut providers = inner.providers.lock().await;

        let outdated: Vec<String> = providers
            .iter()
            .filter(|(id, p)| {
                desired
                    .get(*id)
                    .map_or(true, |c| c != p.config() || p.options() != &options)
            })
            .map(|(id, _)| id.clone())
            .collect();
        for id in outdated {
            if let Some(mut provider) = providers.remove(&id) {
                lock(&inner.generations).remove(&id);
                provider.disconnect().await;
                info!(source = %id, "source removed");
            }
        }

        for (id, config) in desired {
            if providers.contains_key(&id) {
                continue;
            }
            let mut provider = Provider::new(config, options.clone(), inner.updates.clone());
            lock(&inner.generations).insert(id.clone(), provider.generation());
            provider.connect();
            info!(source = %id, "source added");
            providers.insert(id, provider);
        }

        inner.publish_status(&providers);
        drop(providers);

        let mut state = lock(&inner.state);
        inner.publish(&mut state, unix_now());
    }

    /// Apply settings pushed on `rx`, waiting for `debounce` of quiet first.
    pub fn follow_settings(&self, mut rx: watch::Receiver<Settings>, debounce: Duration) -> JoinHandle<()> {
        let coordinator = self.clone();
        let cancel = self.inner.cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    changed = rx.changed() => if changed.is_err() { return },
                }
                // Restart the quiet period on every further change
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(debounce) => break,
                        changed = rx.changed() => if changed.is_err() { break },
                    }
                }
                let settings = rx.borrow_and_update().clone();
                debug!("applying changed settings");
                coordinator.apply_settings(settings).await;
            }
        })
    }

    /// Clear alert cooldowns and first-sighting memory.
    pub fn reset_alerts(&self) {
        lock(&self.inner.state).alerts.reset();
        info!("alert state reset");
    }

    /// Stop every task and provider. The coordinator is inert afterwards.
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        inner.cancel.cancel();

        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *lock(&inner.tasks));
        for task in tasks {
            let _ = task.await;
        }

        let mut providers = inner.providers.lock().await;
        lock(&inner.generations).clear();
        for (_, mut provider) in providers.drain() {
            provider.disconnect().await;
        }
        inner.status_tx.send_replace(CombinedStatus::default());
        info!("coordinator stopped");
    }

    pub fn settings(&self) -> Settings {
        self.inner
            .settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Current sorted, filtered, capped view.
    pub fn aircraft(&self) -> Vec<AircraftRecord> {
        self.inner.view_tx.borrow().clone()
    }

    pub fn status(&self) -> CombinedStatus {
        self.inner.status_tx.borrow().clone()
    }

    /// `icao -> highlight color` for aircraft currently matching a rule.
    pub fn active_alerts(&self) -> HashMap<String, String> {
        self.inner.colors_tx.borrow().clone()
    }

    pub fn subscribe_aircraft(&self) -> watch::Receiver<Vec<AircraftRecord>> {
        self.inner.view_tx.subscribe()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<CombinedStatus> {
        self.inner.status_tx.subscribe()
    }

    pub fn subscribe_active_alerts(&self) -> watch::Receiver<HashMap<String, String>> {
        self.inner.colors_tx.subscribe()
    }

    pub fn subscribe_alerts(&self) -> broadcast::Receiver<AlertEvent> {
        self.inner.alerts_tx.subscribe()
    }

    /// Per-source status, sorted by id.
    pub async fn provider_statuses(&self) -> Vec<(String, SourceStatus)> {
        let providers = self.inner.providers.lock().await;
        let mut out: Vec<(String, SourceStatus)> = providers
            .iter()
            .map(|(id, p)| (id.clone(), p.status()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }
}

impl Inner {
    /// Apply a batch of updates, dropping any from superseded sessions.
    fn apply_batch(&self, batch: Vec<ProviderMessage>, now: f64) {
        let mut state = lock(&self.state);
        let mut applied = 0usize;
        {
            let generations = lock(&self.generations);
            for msg in batch {
                let current = generations
                    .get(&msg.source_id)
                    .map(|g| g.load(Ordering::SeqCst));
                if current != Some(msg.generation) {
                    debug!(
                        source = %msg.source_id,
                        generation = msg.generation,
                        "dropping update from stale session"
                    );
                    continue;
                }
                state.store.apply(msg.update);
                applied += 1;
            }
        }
        if applied > 0 {
            self.publish(&mut state, now);
        }
    }

    /// Recompute view and alert state from the store and publish them.
    fn publish(&self, state: &mut State, now: f64) {
        let records = state.store.records();
        let events = state.alerts.evaluate(&records, now);
        let colors = state.alerts.update_active_alerts(&records).clone();
        let view = state.store.view(&state.view);

        self.view_tx.send_replace(view);
        self.colors_tx.send_if_modified(|current| {
            if *current == colors {
                return false;
            }
            *current = colors;
            true
        });
        for event in events {
            warn!(icao = %event.icao, rule = %event.rule_id, "{}: {}", event.title, event.body);
            // No subscribers is fine
            let _ = self.alerts_tx.send(event);
        }
    }

    fn publish_status(&self, providers: &HashMap<String, Provider>) {
        let statuses: Vec<SourceStatus> = providers.values().map(Provider::status).collect();
        let combined = CombinedStatus {
            status: combine_status(&statuses),
            messages_per_second: providers.values().map(Provider::messages_per_second).sum(),
        };
        self.status_tx.send_if_modified(|current| {
            if *current == combined {
                return false;
            }
            *current = combined;
            true
        });
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn run_merge(inner: Arc<Inner>, mut rx: mpsc::UnboundedReceiver<ProviderMessage>) {
    loop {
        let first = tokio::select! {
            _ = inner.cancel.cancelled() => return,
            msg = rx.recv() => match msg {
                Some(msg) => msg,
                None => return,
            },
        };
        let mut batch = vec![first];
        while let Ok(msg) = rx.try_recv() {
            batch.push(msg);
        }
        inner.apply_batch(batch, unix_now());
    }
}

async fn run_sweep(inner: Arc<Inner>) {
    loop {
        let interval = {
            let settings = inner.settings.read().unwrap_or_else(PoisonError::into_inner);
            interval_from_secs(settings.sweep_interval_secs, 0.01, 10.0)
        };
        tokio::select! {
            _ = inner.cancel.cancelled() => return,
            _ = tokio::time::sleep(interval) => {}
        }

        let now = unix_now();
        let mut state = lock(&inner.state);
        let removed = state.store.sweep(now);
        if removed > 0 {
            debug!(removed, remaining = state.store.len(), "swept stale aircraft");
            inner.publish(&mut state, now);
        }
    }
}

async fn run_status(inner: Arc<Inner>) {
    let mut ticker = tokio::time::interval(STATUS_PERIOD);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = inner.cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }
        let providers = inner.providers.lock().await;
        inner.publish_status(&providers);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
