//! C1 Data Manager (spec.md §4.1): the sole owner of the sensor cache. Every
//! other component reads through `get`/`is_sensor_valid`/`is_system_valid`;
//! nobody else touches `SensorBus` directly.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::clock::Clock;
use crate::hardware::{RawValue, SensorBus};
use crate::utils::EwmaInterval;

/// Named entities the Data Manager tracks (spec.md §6 "Sensor bus (read)").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorKey {
    PhaseL1,
    PhaseL2,
    PhaseL3,
    BatterySoc,
    BatteryPower,
    SolarInput,
    ChargingRateLimit,
    DischargingRateLimit,
    ForcedChargeStatus,
    Mode,
    Source,
    PowerLimit,
    HeatingSwitch,
    BoilerSwitch,
    PhaseTarget,
    RangeLow,
    RangeHigh,
    ActionsEnabled,
    LoggingEnabled,
}

/// spec.md §4.1: "a fixed set of critical entities (three phase-powers,
/// total grid, battery SOC, battery power, phase target)" — total grid flow
/// is derived from the three phases, not a sensor of its own, so the
/// critical set has exactly six members (SPEC_FULL.md §F).
pub const CRITICAL_SENSORS: [SensorKey; 6] = [
    SensorKey::PhaseL1,
    SensorKey::PhaseL2,
    SensorKey::PhaseL3,
    SensorKey::BatterySoc,
    SensorKey::BatteryPower,
    SensorKey::PhaseTarget,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorKind {
    Numeric,
    Text,
    Boolean,
}

#[derive(Debug, Clone)]
pub struct SensorSpec {
    pub entity_id: String,
    pub kind: SensorKind,
    pub max_age_seconds: i64,
    pub invalid_age_seconds: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CoercedValue {
    Numeric(f64),
    Text(String),
    Bool(bool),
}

impl CoercedValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CoercedValue::Numeric(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            CoercedValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            CoercedValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: CoercedValue,
    timestamp: i64,
    last_refresh_attempt: Option<i64>,
    refresh_count: u64,
    error_count: u64,
    interval: EwmaInterval,
}

pub struct DataManager {
    bus: Arc<dyn SensorBus>,
    clock: Arc<dyn Clock>,
    specs: HashMap<SensorKey, SensorSpec>,
    cache: Mutex<HashMap<SensorKey, CacheEntry>>,
}

/// spec.md §4.1 refresh throttle: at most one refetch attempt per 5 s while
/// a value is stale.
const REFRESH_THROTTLE_SECONDS: i64 = 5;

impl DataManager {
    pub fn new(bus: Arc<dyn SensorBus>, clock: Arc<dyn Clock>, specs: HashMap<SensorKey, SensorSpec>) -> Self {
        Self { bus, clock, specs, cache: Mutex::new(HashMap::new()) }
    }

    fn coerce(kind: SensorKind, raw: &RawValue) -> CoercedValue {
        match (kind, raw) {
            (SensorKind::Numeric, RawValue::Numeric(n)) => CoercedValue::Numeric(*n),
            (SensorKind::Numeric, RawValue::Text(s)) => match s.trim().parse::<f64>() {
                Ok(n) => CoercedValue::Numeric(n),
                Err(_) => CoercedValue::Text(s.clone()),
            },
            (SensorKind::Numeric, RawValue::Bool(b)) => CoercedValue::Numeric(if *b { 1.0 } else { 0.0 }),
            (SensorKind::Boolean, RawValue::Bool(b)) => CoercedValue::Bool(*b),
            (SensorKind::Boolean, RawValue::Text(s)) => CoercedValue::Bool(s.eq_ignore_ascii_case("on") || s == "1"),
            (SensorKind::Boolean, RawValue::Numeric(n)) => CoercedValue::Bool(*n != 0.0),
            (SensorKind::Text, RawValue::Text(s)) => CoercedValue::Text(s.clone()),
            (SensorKind::Text, RawValue::Numeric(n)) => CoercedValue::Text(n.to_string()),
            (SensorKind::Text, RawValue::Bool(b)) => CoercedValue::Text(b.to_string()),
        }
    }

    /// spec.md §4.1 `update(entity, value)`: store, stamp `now`, fold the
    /// observed interval into the rolling average.
    pub fn ingest(&self, key: SensorKey, raw: RawValue) {
        let Some(spec) = self.specs.get(&key) else {
            warn!(?key, "ingest for unregistered sensor key");
            return;
        };
        let now = self.clock.now();
        let coerced = Self::coerce(spec.kind, &raw);
        let mut cache = self.cache.lock();
        let interval = match cache.get(&key) {
            Some(prev) => {
                let mut i = prev.interval;
                i.observe((now - prev.timestamp).max(0) as f64);
                i
            }
            None => EwmaInterval::default(),
        };
        cache.insert(
            key,
            CacheEntry { value: coerced, timestamp: now, last_refresh_attempt: Some(now), refresh_count: 0, error_count: 0, interval },
        );
    }

    async fn refetch(&self, key: SensorKey) -> bool {
        let Some(spec) = self.specs.get(&key) else { return false };
        match self.bus.read(&spec.entity_id).await {
            Ok(raw) => {
                self.ingest(key, raw);
                true
            }
            Err(e) => {
                warn!(?key, entity = %spec.entity_id, error = %e, "sensor refresh failed");
                let mut cache = self.cache.lock();
                if let Some(entry) = cache.get_mut(&key) {
                    entry.error_count += 1;
                    entry.last_refresh_attempt = Some(self.clock.now());
                }
                false
            }
        }
    }

    /// spec.md §4.1 `get`. Returns `None` only if the entity has never been
    /// successfully read.
    pub async fn get(&self, key: SensorKey, override_max_age: Option<i64>) -> Option<CoercedValue> {
        let now = self.clock.now();
        let needs_fetch = { self.cache.lock().get(&key).is_none() };
        if needs_fetch {
            self.refetch(key).await;
        }

        let max_age = override_max_age.unwrap_or_else(|| self.specs.get(&key).map(|s| s.max_age_seconds).unwrap_or(30));

        let (stale, throttled) = {
            let cache = self.cache.lock();
            match cache.get(&key) {
                Some(entry) => {
                    let stale = now - entry.timestamp > max_age;
                    let throttled = entry
                        .last_refresh_attempt
                        .map(|t| now - t < REFRESH_THROTTLE_SECONDS)
                        .unwrap_or(false);
                    (stale, throttled)
                }
                None => (true, false),
            }
        };

        if stale && !throttled {
            self.refetch(key).await;
        }

        self.cache.lock().get(&key).map(|e| e.value.clone())
    }

    /// Convenience for numeric fields with a fallback-policy default
    /// (spec.md §4.1 "Fallback policy").
    pub async fn get_numeric_or(&self, key: SensorKey, default: f64) -> f64 {
        if self.is_sensor_valid(key) {
            if let Some(v) = self.get(key, None).await.and_then(|v| v.as_f64()) {
                return v;
            }
        }
        default
    }

    /// spec.md §4.1 `is_sensor_valid`.
    pub fn is_sensor_valid(&self, key: SensorKey) -> bool {
        let Some(spec) = self.specs.get(&key) else { return false };
        let now = self.clock.now();
        match self.cache.lock().get(&key) {
            Some(entry) => now - entry.timestamp <= spec.invalid_age_seconds,
            None => false,
        }
    }

    /// spec.md §4.1 `is_system_valid`.
    pub fn is_system_valid(&self) -> bool {
        CRITICAL_SENSORS.iter().all(|&k| self.is_sensor_valid(k))
    }

    pub fn refresh_stats(&self, key: SensorKey) -> Option<(u64, u64)> {
        self.cache.lock().get(&key).map(|e| (e.refresh_count, e.error_count))
    }
}

/// spec.md §4.1 "Forced-power parsing". On parse failure, returns 0 and logs.
pub fn parse_forced_power(status: &str) -> f64 {
    let s = status.trim();
    if s.eq_ignore_ascii_case("stopped") {
        return 0.0;
    }
    if let Some(rest) = s.strip_prefix("Charging at ").and_then(|r| r.strip_suffix('W')) {
        if let Ok(n) = rest.trim().parse::<f64>() {
            return n;
        }
    }
    if let Some(rest) = s.strip_prefix("Discharging at ").and_then(|r| r.strip_suffix('W')) {
        if let Ok(n) = rest.trim().parse::<f64>() {
            return -n;
        }
    }
    warn!(status, "could not parse forced-charge status string");
    0.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use crate::hardware::simulated::SimulatedHardware;
    use rstest::rstest;

    #[rstest]
    #[case("Stopped", 0.0)]
    #[case("Charging at 1800W", 1800.0)]
    #[case("Discharging at 950W", -950.0)]
    #[case("garbage", 0.0)]
    fn forced_power_parsing(#[case] input: &str, #[case] expected: f64) {
        assert_eq!(parse_forced_power(input), expected);
    }

    fn specs() -> HashMap<SensorKey, SensorSpec> {
        let mut m = HashMap::new();
        m.insert(
            SensorKey::BatterySoc,
            SensorSpec { entity_id: "sensor.battery_soc".into(), kind: SensorKind::Numeric, max_age_seconds: 30, invalid_age_seconds: 120 },
        );
        m
    }

    #[tokio::test]
    async fn get_fetches_on_first_access_then_caches() {
        let hw = Arc::new(SimulatedHardware::new());
        hw.set_sensor("sensor.battery_soc", RawValue::Numeric(55.0));
        let clock = FakeClock::new(1000);
        let dm = DataManager::new(hw.clone(), clock.clone(), specs());

        let v = dm.get(SensorKey::BatterySoc, None).await.unwrap();
        assert_eq!(v.as_f64(), Some(55.0));
        assert!(dm.is_sensor_valid(SensorKey::BatterySoc));
    }

    #[tokio::test]
    async fn stale_past_invalid_age_fails_validity() {
        let hw = Arc::new(SimulatedHardware::new());
        hw.set_sensor("sensor.battery_soc", RawValue::Numeric(55.0));
        let clock = FakeClock::new(1000);
        let dm = DataManager::new(hw.clone(), clock.clone(), specs());
        dm.get(SensorKey::BatterySoc, None).await;

        clock.advance(200);
        assert!(!dm.is_sensor_valid(SensorKey::BatterySoc));
    }

    #[tokio::test]
    async fn is_system_valid_false_when_any_critical_sensor_missing() {
        let hw = Arc::new(SimulatedHardware::new());
        let clock = FakeClock::new(1000);
        let dm = DataManager::new(hw, clock, HashMap::new());
        assert!(!dm.is_system_valid());
    }
}
