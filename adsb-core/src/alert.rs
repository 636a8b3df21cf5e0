//! Alert rules: proximity, watchlist, emergency squawk, aircraft type.
//!
//! Two passes over the same rule set:
//! - [`AlertEngine::evaluate`] is edge-triggered. The first matching rule
//!   per aircraft emits one `AlertEvent` and starts a per-aircraft cooldown.
//! - [`AlertEngine::update_active_alerts`] is level-triggered. It recomputes
//!   which aircraft currently match a rule carrying a highlight color.
//!
//! A rule missing a required parameter simply never matches.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::geo::distance_nm;
use crate::types::{AircraftRecord, Coordinate};

/// Default per-aircraft cooldown between edge alerts (seconds).
pub const DEFAULT_COOLDOWN_SECS: f64 = 300.0;

// ---------------------------------------------------------------------------
// Rule configuration
// ---------------------------------------------------------------------------

/// Kind-specific match parameters, tagged by `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AlertCondition {
    /// Within `max_distance_nm` of the reference, optionally inside an
    /// altitude band.
    Proximity {
        #[serde(default)]
        max_distance_nm: Option<f64>,
        #[serde(default)]
        min_altitude_ft: Option<i32>,
        #[serde(default)]
        max_altitude_ft: Option<i32>,
    },
    /// Callsign substring, registration or ICAO exact, case-insensitive.
    Watchlist {
        #[serde(default)]
        callsigns: Vec<String>,
        #[serde(default)]
        registrations: Vec<String>,
        #[serde(default)]
        icaos: Vec<String>,
    },
    Squawk {
        #[serde(default)]
        codes: Vec<String>,
    },
    /// Substring match against the ICAO type designator.
    #[serde(alias = "aircraftType")]
    AircraftType {
        #[serde(default)]
        type_codes: Vec<String>,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertPriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRuleConfig {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(flatten)]
    pub condition: AlertCondition,
    // Delivery hints, opaque here
    #[serde(default)]
    pub priority: AlertPriority,
    #[serde(default = "default_true")]
    pub sound: bool,
    #[serde(default = "default_true")]
    pub notify: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub highlight_color: Option<String>,
}

impl AlertRuleConfig {
    pub fn new(id: impl Into<String>, condition: AlertCondition) -> Self {
        let id = id.into();
        AlertRuleConfig {
            name: id.clone(),
            id,
            enabled: true,
            condition,
            priority: AlertPriority::Normal,
            sound: true,
            notify: true,
            highlight_color: None,
        }
    }

    pub fn with_color(mut self, color: &str) -> Self {
        self.highlight_color = Some(color.to_string());
        self
    }
}

/// Emergency squawk lookup.
pub fn emergency_squawk(squawk: &str) -> Option<&'static str> {
    match squawk {
        "7500" => Some("Hijack"),
        "7600" => Some("Radio failure"),
        "7700" => Some("Emergency"),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// One edge alert, handed to the notification layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertEvent {
    pub icao: String,
    pub aircraft: AircraftRecord,
    pub rule_id: String,
    pub rule_name: String,
    pub title: String,
    pub body: String,
    pub priority: AlertPriority,
    pub sound: bool,
    pub notify: bool,
    pub timestamp: f64,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct AlertEngine {
    rules: Vec<AlertRuleConfig>,
    reference: Option<Coordinate>,
    cooldown: f64,
    last_alerted: HashMap<String, f64>,
    previous: HashMap<String, AircraftRecord>,
    active: HashMap<String, String>,
}

impl AlertEngine {
    pub fn new(rules: Vec<AlertRuleConfig>, reference: Option<Coordinate>) -> Self {
        AlertEngine {
            rules,
            reference,
            cooldown: DEFAULT_COOLDOWN_SECS,
            last_alerted: HashMap::new(),
            previous: HashMap::new(),
            active: HashMap::new(),
        }
    }

    pub fn with_cooldown(mut self, secs: f64) -> Self {
        self.cooldown = secs;
        self
    }

    pub fn set_rules(&mut self, rules: Vec<AlertRuleConfig>) {
        self.rules = rules;
    }

    pub fn set_reference(&mut self, reference: Option<Coordinate>) {
        self.reference = reference;
    }

    pub fn set_cooldown(&mut self, secs: f64) {
        self.cooldown = secs;
    }

    /// Edge-triggered pass. Returns at most one event per aircraft.
    pub fn evaluate(&mut self, aircraft: &[AircraftRecord], now: f64) -> Vec<AlertEvent> {
        let cooldown = self.cooldown;
        self.last_alerted.retain(|_, at| now - *at < cooldown);

        let mut events = Vec::new();
        for ac in aircraft {
            if self.last_alerted.contains_key(&ac.icao) {
                continue;
            }
            let prev = self.previous.get(&ac.icao);

            let hit = self
                .rules
                .iter()
                .filter(|r| r.enabled)
                .find(|r| self.edge_matches(&r.condition, ac, prev));

            if let Some(rule) = hit {
                events.push(self.build_event(rule, ac, now));
                self.last_alerted.insert(ac.icao.clone(), now);
            }
        }

        self.previous = aircraft
            .iter()
            .map(|ac| (ac.icao.clone(), ac.clone()))
            .collect();
        events
    }

    /// Level pass: ICAO -> highlight color of the last matching rule.
    pub fn update_active_alerts(&mut self, aircraft: &[AircraftRecord]) -> &HashMap<String, String> {
        let mut active = HashMap::new();
        for ac in aircraft {
            for rule in self.rules.iter().filter(|r| r.enabled) {
                let Some(color) = &rule.highlight_color else {
                    continue;
                };
                if self.matches(&rule.condition, ac) {
                    active.insert(ac.icao.clone(), color.clone());
                }
            }
        }
        self.active = active;
        &self.active
    }

    pub fn active_alerts(&self) -> &HashMap<String, String> {
        &self.active
    }

    pub fn in_cooldown(&self, icao: &str, now: f64) -> bool {
        self.last_alerted
            .get(icao)
            .is_some_and(|at| now - at < self.cooldown)
    }

    /// Clear cooldowns and the previous snapshot together.
    pub fn reset(&mut self) {
        self.last_alerted.clear();
        self.previous.clear();
    }

    /// Condition true right now, no edge gating.
    fn matches(&self, condition: &AlertCondition, ac: &AircraftRecord) -> bool {
        match condition {
            AlertCondition::Proximity {
                max_distance_nm,
                min_altitude_ft,
                max_altitude_ft,
            } => {
                let (Some(max_nm), Some(reference), Some(pos)) =
                    (max_distance_nm, self.reference, ac.position)
                else {
                    return false;
                };
                if distance_nm(reference, pos) > *max_nm {
                    return false;
                }
                if min_altitude_ft.is_some() || max_altitude_ft.is_some() {
                    let Some(alt) = ac.altitude_ft else {
                        return false;
                    };
                    if min_altitude_ft.is_some_and(|min| alt < min)
                        || max_altitude_ft.is_some_and(|max| alt > max)
                    {
                        return false;
                    }
                }
                true
            }
            AlertCondition::Watchlist {
                callsigns,
                registrations,
                icaos,
            } => {
                let callsign_hit = ac.callsign.as_deref().is_some_and(|cs| {
                    let cs = cs.to_uppercase();
                    callsigns
                        .iter()
                        .filter(|p| !p.trim().is_empty())
                        .any(|p| cs.contains(&p.trim().to_uppercase()))
                });
                let reg_hit = ac
                    .registration
                    .as_deref()
                    .is_some_and(|reg| registrations.iter().any(|r| r.trim().eq_ignore_ascii_case(reg)));
                let icao_hit = icaos.iter().any(|i| i.trim().eq_ignore_ascii_case(&ac.icao));
                callsign_hit || reg_hit || icao_hit
            }
            AlertCondition::Squawk { codes } => ac
                .squawk
                .as_deref()
                .is_some_and(|sq| codes.iter().any(|c| c.trim() == sq)),
            AlertCondition::AircraftType { type_codes } => {
                ac.aircraft_type.as_deref().is_some_and(|t| {
                    let t = t.to_uppercase();
                    type_codes
                        .iter()
                        .filter(|c| !c.trim().is_empty())
                        .any(|c| t.contains(&c.trim().to_uppercase()))
                })
            }
        }
    }

    /// Condition plus its transition gate against the previous cycle.
    fn edge_matches(
        &self,
        condition: &AlertCondition,
        ac: &AircraftRecord,
        prev: Option<&AircraftRecord>,
    ) -> bool {
        if !self.matches(condition, ac) {
            return false;
        }
        match condition {
            // First entry only
            AlertCondition::Proximity { .. } => !prev.is_some_and(|p| self.matches(condition, p)),
            // First sighting only
            AlertCondition::Watchlist { .. } | AlertCondition::AircraftType { .. } => prev.is_none(),
            // Changed into a listed code
            AlertCondition::Squawk { .. } => prev.and_then(|p| p.squawk.as_deref()) != ac.squawk.as_deref(),
        }
    }

    fn build_event(&self, rule: &AlertRuleConfig, ac: &AircraftRecord, now: f64) -> AlertEvent {
        let label = ac.label();
        let (title, body) = match &rule.condition {
            AlertCondition::Proximity { .. } => {
                let dist = match (self.reference, ac.position) {
                    (Some(r), Some(p)) => distance_nm(r, p),
                    _ => 0.0,
                };
                let alt = ac
                    .altitude_ft
                    .map(|a| format!(" at {a} ft"))
                    .unwrap_or_default();
                (
                    format!("{label} nearby"),
                    format!("{label} is {dist:.1} nm away{alt}"),
                )
            }
            AlertCondition::Watchlist { .. } => (
                format!("Watchlist: {label}"),
                format!("{label} ({}) is in range", ac.icao),
            ),
            AlertCondition::Squawk { .. } => {
                let code = ac.squawk.as_deref().unwrap_or("????");
                let meaning = emergency_squawk(code).unwrap_or("Special code");
                (
                    format!("Squawk {code}: {meaning}"),
                    format!("{label} is squawking {code}"),
                )
            }
            AlertCondition::AircraftType { .. } => {
                let t = ac.aircraft_type.as_deref().unwrap_or("?");
                (
                    format!("{t} spotted"),
                    format!("{label} ({t}) is in range"),
                )
            }
        };

        AlertEvent {
            icao: ac.icao.clone(),
            aircraft: ac.clone(),
            rule_id: rule.id.clone(),
            rule_name: rule.name.clone(),
            title: if rule.name.is_empty() {
                title
            } else {
                format!("{}: {title}", rule.name)
            },
            body,
            priority: rule.priority,
            sound: rule.sound,
            notify: rule.notify,
            timestamp: now,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const HOME: Coordinate = Coordinate {
        lat: 37.6189,
        lon: -122.3750,
    };

    fn proximity(max_nm: f64) -> AlertRuleConfig {
        AlertRuleConfig::new(
            "near",
            AlertCondition::Proximity {
                max_distance_nm: Some(max_nm),
                min_altitude_ft: None,
                max_altitude_ft: None,
            },
        )
    }

    fn squawk_rule() -> AlertRuleConfig {
        AlertRuleConfig::new(
            "emerg",
            AlertCondition::Squawk {
                codes: vec!["7500".into(), "7600".into(), "7700".into()],
            },
        )
    }

    fn watch(callsigns: &[&str]) -> AlertRuleConfig {
        AlertRuleConfig::new(
            "watch",
            AlertCondition::Watchlist {
                callsigns: callsigns.iter().map(|s| s.to_string()).collect(),
                registrations: vec![],
                icaos: vec![],
            },
        )
    }

    fn aircraft(icao: &str) -> AircraftRecord {
        AircraftRecord::new(icao, 0.0)
    }

    fn near(icao: &str) -> AircraftRecord {
        let mut ac = aircraft(icao);
        ac.position = Some(Coordinate::new(37.65, -122.40));
        ac.altitude_ft = Some(3000);
        ac
    }

    fn far(icao: &str) -> AircraftRecord {
        let mut ac = aircraft(icao);
        ac.position = Some(Coordinate::new(38.5, -121.5));
        ac
    }

    fn squawking(icao: &str, code: &str) -> AircraftRecord {
        let mut ac = aircraft(icao);
        ac.squawk = Some(code.into());
        ac
    }

    #[test]
    fn test_cooldown_blocks_repeat_alert() {
        let mut engine = AlertEngine::new(vec![watch(&["UAL"])], None);
        let mut ac = aircraft("A1");
        ac.callsign = Some("UAL123".into());

        assert_eq!(engine.evaluate(&[ac.clone()], 0.0).len(), 1);
        assert!(engine.in_cooldown("A1", 1.0));
        assert!(engine.evaluate(&[ac.clone()], 1.0).is_empty());

        engine.reset();
        assert_eq!(engine.evaluate(&[ac], 2.0).len(), 1, "reset re-arms the alert");
    }

    #[test]
    fn test_cooldown_covers_all_rules() {
        let mut engine = AlertEngine::new(vec![proximity(10.0), squawk_rule()], Some(HOME));
        let mut ac = near("A1");
        assert_eq!(engine.evaluate(&[ac.clone()], 0.0).len(), 1);

        // Squawk change during cooldown stays quiet
        ac.squawk = Some("7700".into());
        assert!(engine.evaluate(&[ac.clone()], 10.0).is_empty());

        // After cooldown the aircraft is eligible again
        ac.squawk = Some("7600".into());
        let events = engine.evaluate(&[ac], 400.0);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].rule_id, "emerg");
    }

    #[test]
    fn test_proximity_first_entry_only() {
        let mut engine = AlertEngine::new(vec![proximity(10.0)], Some(HOME)).with_cooldown(0.0);

        assert_eq!(engine.evaluate(&[near("A1")], 0.0).len(), 1);
        assert!(
            engine.evaluate(&[near("A1")], 1.0).is_empty(),
            "continuously inside must not re-alert"
        );

        // Leave and re-enter
        assert!(engine.evaluate(&[far("A1")], 2.0).is_empty());
        assert_eq!(engine.evaluate(&[near("A1")], 3.0).len(), 1);
    }

    #[test]
    fn test_proximity_altitude_band() {
        let rule = AlertRuleConfig::new(
            "low",
            AlertCondition::Proximity {
                max_distance_nm: Some(10.0),
                min_altitude_ft: Some(1000),
                max_altitude_ft: Some(2000),
            },
        );
        let mut engine = AlertEngine::new(vec![rule], Some(HOME));
        assert!(engine.evaluate(&[near("A1")], 0.0).is_empty(), "3000 ft is above band");

        let mut ac = near("A2");
        ac.altitude_ft = Some(1500);
        assert_eq!(engine.evaluate(&[ac], 0.0).len(), 1);

        let mut ac = near("A3");
        ac.altitude_ft = None;
        assert!(engine.evaluate(&[ac], 0.0).is_empty());
    }

    #[test]
    fn test_proximity_without_reference_never_matches() {
        let mut engine = AlertEngine::new(vec![proximity(10.0)], None);
        assert!(engine.evaluate(&[near("A1")], 0.0).is_empty());
    }

    #[test]
    fn test_squawk_change_alerts() {
        let mut engine = AlertEngine::new(vec![squawk_rule()], None).with_cooldown(0.0);
        assert!(engine.evaluate(&[squawking("A1", "1200")], 0.0).is_empty());

        let events = engine.evaluate(&[squawking("A1", "7700")], 1.0);
        assert_eq!(events.len(), 1);
        assert!(events[0].title.contains("Emergency"), "title: {}", events[0].title);
    }

    #[test]
    fn test_sustained_squawk_alerts_once() {
        let mut engine = AlertEngine::new(vec![squawk_rule()], None).with_cooldown(0.0);
        assert_eq!(engine.evaluate(&[squawking("A1", "7700")], 0.0).len(), 1);
        assert!(engine.evaluate(&[squawking("A1", "7700")], 1.0).is_empty());
        // Switching between listed codes is a change
        assert_eq!(engine.evaluate(&[squawking("A1", "7600")], 2.0).len(), 1);
    }

    #[test]
    fn test_watchlist_first_sighting() {
        let mut engine = AlertEngine::new(vec![watch(&["dal"])], None).with_cooldown(0.0);
        let mut ac = aircraft("A1");
        assert!(engine.evaluate(&[ac.clone()], 0.0).is_empty());

        // Callsign arrives later, but the aircraft was already present
        ac.callsign = Some("DAL88".into());
        assert!(engine.evaluate(&[ac.clone()], 1.0).is_empty());

        // Gone for one cycle, then sighted again
        engine.evaluate(&[], 2.0);
        assert_eq!(engine.evaluate(&[ac], 3.0).len(), 1);
    }

    #[test]
    fn test_watchlist_registration_and_icao_exact() {
        let rule = AlertRuleConfig::new(
            "w",
            AlertCondition::Watchlist {
                callsigns: vec![],
                registrations: vec!["n12345".into()],
                icaos: vec!["abc123".into()],
            },
        );
        let mut engine = AlertEngine::new(vec![rule], None);

        let mut reg = aircraft("FFFFFF");
        reg.registration = Some("N12345".into());
        let mut partial = aircraft("EEEEEE");
        partial.registration = Some("N123456".into());
        let hits = engine.evaluate(&[reg, partial, aircraft("ABC123")], 0.0);

        let icaos: Vec<_> = hits.iter().map(|e| e.icao.as_str()).collect();
        assert_eq!(icaos, vec!["FFFFFF", "ABC123"]);
    }

    #[test]
    fn test_aircraft_type_substring() {
        let rule = AlertRuleConfig::new(
            "heavy",
            AlertCondition::AircraftType {
                type_codes: vec!["A38".into(), "B74".into()],
            },
        );
        let mut engine = AlertEngine::new(vec![rule], None);
        let mut a380 = aircraft("A1");
        a380.aircraft_type = Some("A388".into());
        let mut a320 = aircraft("A2");
        a320.aircraft_type = Some("A320".into());
        let events = engine.evaluate(&[a380, a320], 0.0);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].icao, "A1");
    }

    #[test]
    fn test_first_matching_rule_wins() {
        let mut engine = AlertEngine::new(vec![squawk_rule(), watch(&["UAL"])], None);
        let mut ac = squawking("A1", "7700");
        ac.callsign = Some("UAL1".into());
        let events = engine.evaluate(&[ac], 0.0);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].rule_id, "emerg");
    }

    #[test]
    fn test_disabled_rules_ignored() {
        let mut rule = squawk_rule().with_color("red");
        rule.enabled = false;
        let mut engine = AlertEngine::new(vec![rule], None);
        let ac = squawking("A1", "7700");
        assert!(engine.evaluate(&[ac.clone()], 0.0).is_empty());
        assert!(engine.update_active_alerts(&[ac]).is_empty());
    }

    #[test]
    fn test_level_map_last_rule_wins() {
        let rules = vec![
            squawk_rule().with_color("red"),
            watch(&["UAL"]).with_color("blue"),
            proximity(10.0),
        ];
        let mut engine = AlertEngine::new(rules, Some(HOME));

        let mut both = squawking("A1", "7700");
        both.callsign = Some("UAL1".into());
        let only_squawk = squawking("A2", "7600");
        let uncolored = near("A3");

        let active = engine.update_active_alerts(&[both, only_squawk, uncolored]);
        assert_eq!(active.get("A1").map(String::as_str), Some("blue"));
        assert_eq!(active.get("A2").map(String::as_str), Some("red"));
        assert!(!active.contains_key("A3"));
    }

    #[test]
    fn test_level_map_recomputed_each_call() {
        let mut engine = AlertEngine::new(vec![squawk_rule().with_color("red")], None);
        engine.update_active_alerts(&[squawking("A1", "7700")]);
        assert_eq!(engine.active_alerts().len(), 1);

        // Level state ignores edge gating entirely
        engine.evaluate(&[squawking("A1", "7700")], 0.0);
        assert_eq!(engine.update_active_alerts(&[squawking("A1", "7700")]).len(), 1);

        engine.update_active_alerts(&[squawking("A1", "1200")]);
        assert!(engine.active_alerts().is_empty());
    }

    #[test]
    fn test_rule_deserialize_aliases() {
        let rule: AlertRuleConfig = serde_json::from_str(
            r#"{"id": "t", "kind": "aircraftType", "type_codes": ["C17"], "priority": "high"}"#,
        )
        .unwrap();
        assert!(matches!(rule.condition, AlertCondition::AircraftType { .. }));
        assert_eq!(rule.priority, AlertPriority::High);
        assert!(rule.enabled && rule.sound && rule.notify);
    }

    #[test]
    fn test_missing_parameter_never_matches() {
        let rule: AlertRuleConfig = serde_json::from_str(r#"{"id": "p", "kind": "proximity"}"#).unwrap();
        let mut engine = AlertEngine::new(vec![rule], Some(HOME));
        assert!(engine.evaluate(&[near("A1")], 0.0).is_empty());
    }

    #[test]
    fn test_emergency_squawk() {
        assert_eq!(emergency_squawk("7500"), Some("Hijack"));
        assert_eq!(emergency_squawk("7600"), Some("Radio failure"));
        assert_eq!(emergency_squawk("7700"), Some("Emergency"));
        assert_eq!(emergency_squawk("1200"), None);
    }
}
