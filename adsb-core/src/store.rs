//! Aircraft state store: the single merge point for every source.
//!
//! Pure logic, no locking. The receiver wraps it in a lock so a reader never
//! observes a half-applied batch.

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::geo::distance_nm;
use crate::types::*;

/// Aircraft considered stale after this many seconds of silence.
pub const STALE_TIMEOUT: f64 = 60.0;

/// Parameters of the display view.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewOptions {
    /// Sort origin. Without one, most recently seen comes first.
    pub reference: Option<Coordinate>,
    /// Drop records without a position.
    pub require_position: bool,
    pub max_count: usize,
}

impl Default for ViewOptions {
    fn default() -> Self {
        ViewOptions {
            reference: None,
            require_position: false,
            max_count: 100,
        }
    }
}

/// Authoritative `icao -> AircraftRecord` map.
#[derive(Debug)]
pub struct AircraftStore {
    aircraft: HashMap<String, AircraftRecord>,
    pub stale_after: f64,
}

impl AircraftStore {
    pub fn new(stale_after: f64) -> Self {
        AircraftStore {
            aircraft: HashMap::new(),
            stale_after,
        }
    }

    /// Apply one update.
    ///
    /// A `Snapshot` replaces the whole map, including records contributed by
    /// other sources since the last poll.
    pub fn apply(&mut self, update: AircraftUpdate) {
        match update {
            AircraftUpdate::Updated(rec) => match self.aircraft.get_mut(&rec.icao) {
                Some(existing) => existing.merge(&rec),
                None => {
                    self.aircraft.insert(rec.icao.clone(), rec);
                }
            },
            AircraftUpdate::Removed(icao) => {
                self.aircraft.remove(&icao);
            }
            AircraftUpdate::Snapshot(records) => {
                self.aircraft = records
                    .into_iter()
                    .map(|rec| (rec.icao.clone(), rec))
                    .collect();
            }
        }
    }

    /// Remove stale aircraft. Returns count removed.
    pub fn sweep(&mut self, now: f64) -> usize {
        let before = self.aircraft.len();
        let stale_after = self.stale_after;
        self.aircraft.retain(|_, rec| rec.age(now) <= stale_after);
        before - self.aircraft.len()
    }

    pub fn get(&self, icao: &str) -> Option<&AircraftRecord> {
        self.aircraft.get(icao)
    }

    pub fn len(&self) -> usize {
        self.aircraft.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aircraft.is_empty()
    }

    pub fn clear(&mut self) {
        self.aircraft.clear();
    }

    /// Every record, unordered.
    pub fn records(&self) -> Vec<AircraftRecord> {
        self.aircraft.values().cloned().collect()
    }

    /// Filtered, distance-sorted, capped copy for display.
    ///
    /// Positionless records sort after every positioned one.
    pub fn view(&self, opts: &ViewOptions) -> Vec<AircraftRecord> {
        let mut rows: Vec<(Option<f64>, &AircraftRecord)> = self
            .aircraft
            .values()
            .filter(|rec| !opts.require_position || rec.has_position())
            .map(|rec| {
                let dist = match (opts.reference, rec.position) {
                    (Some(r), Some(p)) => Some(distance_nm(r, p)),
                    _ => None,
                };
                (dist, rec)
            })
            .collect();

        rows.sort_by(|(da, a), (db, b)| {
            let by_distance = match (da, db) {
                (Some(x), Some(y)) => x.total_cmp(y),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => b.last_seen.total_cmp(&a.last_seen),
            };
            by_distance.then_with(|| a.icao.cmp(&b.icao))
        });

        rows.into_iter()
            .take(opts.max_count)
            .map(|(_, rec)| rec.clone())
            .collect()
    }
}

impl Default for AircraftStore {
    fn default() -> Self {
        Self::new(STALE_TIMEOUT)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
