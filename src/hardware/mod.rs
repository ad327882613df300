//! External interfaces (spec.md §6): the sensor bus, inverter RPC surface,
//! and smart-switch HTTP surface the rest of the controller talks to
//! through trait objects, so tests can substitute deterministic fakes
//! (SPEC_FULL.md §E).

pub mod error;
pub mod simulated;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use error::{InverterError, SensorBusError, SwitchError};

/// A sensor reading as it comes off the bus, before `data_manager` coerces
/// it to the typed value the rest of the system wants (spec.md §4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RawValue {
    Numeric(f64),
    Text(String),
    Bool(bool),
}

/// Read side of the external sensor bus (spec.md §6 "Sensor bus (read)").
/// One blocking-free call per named entity; `data_manager` is the only
/// caller and owns caching/staleness on top of this.
#[async_trait]
pub trait SensorBus: Send + Sync {
    async fn read(&self, entity: &str) -> Result<RawValue, SensorBusError>;
}

/// Write side of the inverter RPC surface (spec.md §6 "Inverter services").
#[async_trait]
pub trait InverterClient: Send + Sync {
    async fn forcible_charge_soc(&self, target_soc_pct: f64, power_w: f64, device_id: &str) -> Result<(), InverterError>;
    async fn forcible_discharge_soc(&self, target_soc_pct: f64, power_w: f64, device_id: &str) -> Result<(), InverterError>;
    async fn stop_forcible_charge(&self, device_id: &str) -> Result<(), InverterError>;
    async fn set_maximum_feed_grid_power(&self, power_w: f64, device_id: &str) -> Result<(), InverterError>;
    async fn reset_maximum_feed_grid_power(&self, device_id: &str) -> Result<(), InverterError>;
    async fn set_number(&self, entity: &str, value_w: f64) -> Result<(), InverterError>;
}

/// One Shelly gen-2 style RPC surface per configured switch (spec.md §6
/// "Smart-switch HTTP").
#[async_trait]
pub trait SwitchClient: Send + Sync {
    async fn set_config(&self, endpoint: &str, id: u32, auto_off: bool, delay_seconds: u64) -> Result<(), SwitchError>;
    async fn create_schedule(&self, endpoint: &str, timespec: &str, switch_id: u32, on: bool) -> Result<u64, SwitchError>;
    async fn delete_schedule(&self, endpoint: &str, schedule_id: u64) -> Result<(), SwitchError>;
    async fn set_switch(&self, endpoint: &str, id: u32, on: bool) -> Result<(), SwitchError>;
}

/// Fire-and-forget dispatch timeouts (spec.md §5 "Cancellation & timeouts").
pub const SWITCH_TIMEOUT: Duration = Duration::from_secs(5);
pub const INVERTER_TIMEOUT: Duration = Duration::from_secs(10);
pub const DAY_AHEAD_TIMEOUT: Duration = Duration::from_secs(15);

/// Which hardware backend to wire up. The `real` variant is intentionally
/// absent: this crate only ships the simulated backend plus the trait seam
/// other deployments implement against (see SPEC_FULL.md §E).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareMode {
    Simulated,
}

impl Default for HardwareMode {
    fn default() -> Self {
        HardwareMode::Simulated
    }
}
