//! Deterministic fake hardware backend (SPEC_FULL.md §E testing seams):
//! no randomness, no network I/O, values only change in response to calls
//! made on it, so integration tests can assert exact before/after state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{InverterClient, InverterError, RawValue, SensorBus, SensorBusError, SwitchClient, SwitchError};

/// The entity the simulated inverter updates whenever a forced charge/
/// discharge/stop call lands, mirroring the real inverter's status-string
/// sensor (spec.md §4.1 "forced-power parsing").
pub const FORCED_STATUS_ENTITY: &str = "sim.inverter.forced_status";

#[derive(Debug, Clone)]
struct ScheduleRecord {
    endpoint: String,
    timespec: String,
    switch_id: u32,
    on: bool,
}

/// Shared-state simulated hardware: one instance backs the sensor bus, the
/// inverter client, and the switch client simultaneously, the way a real
/// deployment's single inverter backs all three roles.
pub struct SimulatedHardware {
    sensors: Mutex<HashMap<String, RawValue>>,
    feed_grid_limit: Mutex<Option<f64>>,
    numbers: Mutex<HashMap<String, f64>>,
    switches: Mutex<HashMap<String, bool>>,
    schedules: Mutex<HashMap<u64, ScheduleRecord>>,
    next_schedule_id: AtomicU64,
}

impl SimulatedHardware {
    pub fn new() -> Self {
        let mut sensors = HashMap::new();
        sensors.insert(FORCED_STATUS_ENTITY.to_string(), RawValue::Text("Stopped".to_string()));
        Self {
            sensors: Mutex::new(sensors),
            feed_grid_limit: Mutex::new(None),
            numbers: Mutex::new(HashMap::new()),
            switches: Mutex::new(HashMap::new()),
            schedules: Mutex::new(HashMap::new()),
            next_schedule_id: AtomicU64::new(1),
        }
    }

    /// Test/seed hook: sets or overwrites a sensor reading.
    pub fn set_sensor(&self, entity: &str, value: RawValue) {
        self.sensors.lock().insert(entity.to_string(), value);
    }

    pub fn feed_grid_limit(&self) -> Option<f64> {
        *self.feed_grid_limit.lock()
    }

    pub fn number(&self, entity: &str) -> Option<f64> {
        self.numbers.lock().get(entity).copied()
    }

    pub fn switch_state(&self, endpoint: &str, id: u32) -> Option<bool> {
        self.switches.lock().get(&format!("{endpoint}#{id}")).copied()
    }

    pub fn schedule_count(&self) -> usize {
        self.schedules.lock().len()
    }
}

impl Default for SimulatedHardware {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SensorBus for SimulatedHardware {
    async fn read(&self, entity: &str) -> Result<RawValue, SensorBusError> {
        self.sensors
            .lock()
            .get(entity)
            .cloned()
            .ok_or_else(|| SensorBusError::UnknownEntity(entity.to_string()))
    }
}

#[async_trait]
impl InverterClient for SimulatedHardware {
    async fn forcible_charge_soc(&self, _target_soc_pct: f64, power_w: f64, _device_id: &str) -> Result<(), InverterError> {
        self.set_sensor(FORCED_STATUS_ENTITY, RawValue::Text(format!("Charging at {}W", power_w.round() as i64)));
        Ok(())
    }

    async fn forcible_discharge_soc(&self, _target_soc_pct: f64, power_w: f64, _device_id: &str) -> Result<(), InverterError> {
        self.set_sensor(FORCED_STATUS_ENTITY, RawValue::Text(format!("Discharging at {}W", power_w.round() as i64)));
        Ok(())
    }

    async fn stop_forcible_charge(&self, _device_id: &str) -> Result<(), InverterError> {
        self.set_sensor(FORCED_STATUS_ENTITY, RawValue::Text("Stopped".to_string()));
        Ok(())
    }

    async fn set_maximum_feed_grid_power(&self, power_w: f64, _device_id: &str) -> Result<(), InverterError> {
        *self.feed_grid_limit.lock() = Some(power_w);
        Ok(())
    }

    async fn reset_maximum_feed_grid_power(&self, _device_id: &str) -> Result<(), InverterError> {
        *self.feed_grid_limit.lock() = None;
        Ok(())
    }

    async fn set_number(&self, entity: &str, value_w: f64) -> Result<(), InverterError> {
        self.numbers.lock().insert(entity.to_string(), value_w);
        Ok(())
    }
}

#[async_trait]
impl SwitchClient for SimulatedHardware {
    async fn set_config(&self, _endpoint: &str, _id: u32, _auto_off: bool, _delay_seconds: u64) -> Result<(), SwitchError> {
        Ok(())
    }

    async fn create_schedule(&self, endpoint: &str, timespec: &str, switch_id: u32, on: bool) -> Result<u64, SwitchError> {
        let id = self.next_schedule_id.fetch_add(1, Ordering::SeqCst);
        self.schedules.lock().insert(
            id,
            ScheduleRecord { endpoint: endpoint.to_string(), timespec: timespec.to_string(), switch_id, on },
        );
        Ok(id)
    }

    async fn delete_schedule(&self, _endpoint: &str, schedule_id: u64) -> Result<(), SwitchError> {
        self.schedules.lock().remove(&schedule_id);
        Ok(())
    }

    async fn set_switch(&self, endpoint: &str, id: u32, on: bool) -> Result<(), SwitchError> {
        self.switches.lock().insert(format!("{endpoint}#{id}"), on);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn forced_charge_updates_status_sensor() {
        let hw = SimulatedHardware::new();
        hw.forcible_charge_soc(80.0, 1800.0, "inv1").await.unwrap();
        let raw = hw.read(FORCED_STATUS_ENTITY).await.unwrap();
        match raw {
            RawValue::Text(s) => assert_eq!(s, "Charging at 1800W"),
            _ => panic!("expected text"),
        }
    }

    #[tokio::test]
    async fn schedule_create_then_delete_empties_count() {
        let hw = SimulatedHardware::new();
        let id = hw.create_schedule("http://sw.local", "0 0 7 * * *", 0, true).await.unwrap();
        assert_eq!(hw.schedule_count(), 1);
        hw.delete_schedule("http://sw.local", id).await.unwrap();
        assert_eq!(hw.schedule_count(), 0);
    }

    #[tokio::test]
    async fn unknown_entity_errors() {
        let hw = SimulatedHardware::new();
        assert!(hw.read("missing.entity").await.is_err());
    }
}
