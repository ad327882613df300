#![allow(dead_code)]
//! Configuration schema (SPEC_FULL.md §A), loaded with `figment` and
//! validated at startup with `validator`. A validation failure here is the
//! `ConfigInvalid` error class from spec.md §7: the process refuses to
//! start rather than run half-configured.

use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use validator::{Validate, ValidationError};

use crate::domain::device::{LoadDevice, ScheduleMode};
use crate::domain::price::{NetworkPackage, SLOTS_PER_DAY};

/// Top-level application configuration (spec.md §A).
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct AppConfig {
    #[validate(nested)]
    pub server: ServerConfig,
    #[validate(nested)]
    pub auth: AuthConfig,
    #[validate(nested)]
    pub controller: ControllerConfig,
    #[validate(nested)]
    pub sensors: SensorsConfig,
    #[validate(nested)]
    pub devices: Vec<LoadDeviceConfig>,
    #[validate(nested)]
    pub prices: PricesConfig,
    #[validate(nested)]
    pub weather: WeatherConfig,
    #[validate(nested)]
    pub scheduler: SchedulerConfig,
    #[validate(nested)]
    pub persistence: PersistenceConfig,
    #[validate(nested)]
    pub telemetry: TelemetryConfig,
}

/// Dashboard HTTP server (SPEC_FULL.md §D).
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct ServerConfig {
    #[validate(length(min = 1))]
    pub host: String,
    #[validate(range(min = 1, max = 65535))]
    pub port: u16,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub enable_cors: bool,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port).parse().context("failed to parse socket address")
    }
}

/// Dashboard API bearer token (mirrors the teacher's `auth::AuthConfig`).
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct AuthConfig {
    #[validate(length(min = 16))]
    pub token: String,
}

/// PBC loop constants (spec.md §4.6, §4.9, §4.10).
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct ControllerConfig {
    #[serde(default = "default_tick_seconds")]
    #[validate(range(min = 1, max = 3600))]
    pub tick_seconds: u64,

    #[serde(default = "default_fast_trigger_interval")]
    pub fast_trigger_minimum_interval_seconds: i64,
    #[serde(default = "default_fast_trigger_threshold")]
    pub fast_trigger_threshold_watts: f64,

    #[serde(default = "default_forced_cooldown")]
    pub forced_charge_discharge_cooldown_seconds: i64,
    #[serde(default = "default_limit_cooldown")]
    pub charging_adjustment_export_cooldown_seconds: i64,

    #[serde(default = "default_min_charging_change")]
    pub minimum_charging_change_watts: f64,
    #[serde(default = "default_min_export_change")]
    pub minimum_export_change_watts: f64,
    #[serde(default = "default_min_discharge_change")]
    pub minimum_discharge_change_watts: f64,

    #[serde(default = "default_max_battery_power")]
    pub max_battery_power: f64,
    #[serde(default = "default_max_feed_grid_power")]
    pub max_feed_grid_power: f64,
    #[serde(default = "default_soc_min_discharge")]
    pub battery_soc_minimum_for_discharging: f64,
    #[serde(default = "default_soc_max_charge")]
    pub battery_soc_maximum_for_charging: f64,

    /// Fixed power target for `buy`/`sell` mode entry (spec.md §4.7, §4.8).
    pub qw_powerlimit: f64,

    /// spec.md §4.9 step 12: log proposed actions instead of executing them.
    #[serde(default)]
    pub debug: bool,
}

fn default_tick_seconds() -> u64 {
    10
}
fn default_fast_trigger_interval() -> i64 {
    10
}
fn default_fast_trigger_threshold() -> f64 {
    -300.0
}
fn default_forced_cooldown() -> i64 {
    5
}
fn default_limit_cooldown() -> i64 {
    3
}
fn default_min_charging_change() -> f64 {
    10.0
}
fn default_min_export_change() -> f64 {
    200.0
}
fn default_min_discharge_change() -> f64 {
    10.0
}
fn default_max_battery_power() -> f64 {
    5000.0
}
fn default_max_feed_grid_power() -> f64 {
    8800.0
}
fn default_soc_min_discharge() -> f64 {
    6.0
}
fn default_soc_max_charge() -> f64 {
    100.0
}

/// One entry per entity spec.md §6 "Sensor bus (read)" names. `max_age`/
/// `invalid_age` mirror spec.md §4.1; all default to a sane reading cadence
/// but are overridable per deployment.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct SensorEntry {
    #[validate(length(min = 1))]
    pub entity_id: String,
    #[serde(default = "default_max_age")]
    pub max_age_seconds: i64,
    #[serde(default = "default_invalid_age")]
    pub invalid_age_seconds: i64,
}

fn default_max_age() -> i64 {
    30
}
fn default_invalid_age() -> i64 {
    120
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct SensorsConfig {
    #[validate(nested)]
    pub phase_l1: SensorEntry,
    #[validate(nested)]
    pub phase_l2: SensorEntry,
    #[validate(nested)]
    pub phase_l3: SensorEntry,
    #[validate(nested)]
    pub battery_soc: SensorEntry,
    #[validate(nested)]
    pub battery_power: SensorEntry,
    #[validate(nested)]
    pub solar_input: SensorEntry,
    #[validate(nested)]
    pub charging_rate_limit: SensorEntry,
    #[validate(nested)]
    pub discharging_rate_limit: SensorEntry,
    #[validate(nested)]
    pub forced_charge_status: SensorEntry,
    #[validate(nested)]
    pub mode: SensorEntry,
    #[validate(nested)]
    pub source: SensorEntry,
    #[validate(nested)]
    pub powerlimit: SensorEntry,
    #[validate(nested)]
    pub heating_switch: SensorEntry,
    #[validate(nested)]
    pub boiler_switch: SensorEntry,
    #[validate(nested)]
    pub phase_target: SensorEntry,
    #[validate(nested)]
    pub range_low: SensorEntry,
    #[validate(nested)]
    pub range_high: SensorEntry,
    #[validate(nested)]
    pub actions_enabled: SensorEntry,
    #[validate(nested)]
    pub logging_enabled: SensorEntry,
}

/// spec.md §3 `LoadDevice`, as loaded from configuration. Validated against
/// the invariants spec.md §7 calls out as `ConfigInvalid`.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[validate(schema(function = "validate_load_device"))]
pub struct LoadDeviceConfig {
    #[validate(length(min = 1))]
    pub name: String,
    #[validate(length(min = 1))]
    pub entity_id: String,
    #[validate(url)]
    pub switch_endpoint: String,
    #[validate(range(min = 0.0))]
    pub estimated_power_watts: f64,
    #[serde(default = "default_true")]
    pub scheduling_enabled: bool,
    pub schedule_mode: ScheduleMode,

    pub desired_on_hours: Option<f64>,
    pub period_hours: Option<f64>,

    pub min_price_rank: Option<f64>,
    pub max_price_rank: Option<f64>,

    #[serde(default)]
    pub weather_adjustment: bool,
    pub heating_curve: Option<f64>,
    #[serde(default = "default_power_factor")]
    pub power_factor: f64,

    #[serde(default)]
    pub inverted_logic: bool,

    #[serde(default)]
    pub always_on_hours: Vec<u8>,
    #[serde(default)]
    pub always_off_hours: Vec<u8>,
    pub always_on_price: Option<f64>,

    #[serde(default = "default_recovery_window")]
    pub recovery_window_hours: f64,
    pub max_recovery_price: Option<f64>,
    #[serde(default = "default_max_energy_debt")]
    pub max_energy_debt: f64,
}

fn default_true() -> bool {
    true
}
fn default_power_factor() -> f64 {
    0.5
}
fn default_recovery_window() -> f64 {
    4.0
}
fn default_max_energy_debt() -> f64 {
    120.0
}

/// spec.md §3/§7: `period_hours` must divide 24, `desired_on_hours ≤
/// period_hours`, THRESHOLD requires `max_price_rank`, weather adjustment
/// requires PERIOD + `heating_curve`.
fn validate_load_device(device: &LoadDeviceConfig) -> Result<(), ValidationError> {
    match device.schedule_mode {
        ScheduleMode::Period => {
            let period = device.period_hours.ok_or_else(|| ValidationError::new("period_hours_required"))?;
            if period <= 0.0 || period > 24.0 || (24.0 / period).fract() != 0.0 {
                return Err(ValidationError::new("period_hours_must_divide_24"));
            }
            if let Some(on_hours) = device.desired_on_hours {
                if on_hours > period {
                    return Err(ValidationError::new("desired_on_hours_exceeds_period_hours"));
                }
            }
            if device.weather_adjustment && device.heating_curve.is_none() {
                return Err(ValidationError::new("weather_adjustment_requires_heating_curve"));
            }
        }
        ScheduleMode::Threshold => {
            if device.max_price_rank.is_none() {
                return Err(ValidationError::new("threshold_requires_max_price_rank"));
            }
            if device.weather_adjustment {
                return Err(ValidationError::new("weather_adjustment_requires_period_mode"));
            }
        }
    }
    Ok(())
}

/// spec.md §4.2 day-ahead price API and tariff selection.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct PricesConfig {
    #[validate(url)]
    pub base_url: String,
    #[validate(length(min = 1))]
    pub area: String,
    #[serde(default = "default_price_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "default_price_retries")]
    #[validate(range(min = 1, max = 10))]
    pub retries: u32,
    pub network_package: NetworkPackage,
    /// IANA-style fixed UTC offset in seconds for the local scheduling zone.
    #[serde(default)]
    pub tz_offset_seconds: i32,
}

fn default_price_timeout() -> u64 {
    15
}
fn default_price_retries() -> u32 {
    3
}

/// spec.md §4.3 weather forecast API.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct WeatherConfig {
    #[validate(url)]
    pub base_url: String,
    #[validate(range(min = -90.0, max = 90.0))]
    pub latitude: f64,
    #[validate(range(min = -180.0, max = 180.0))]
    pub longitude: f64,
    #[serde(default = "default_weather_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "default_cache_ttl_seconds")]
    pub cache_ttl_seconds: u64,
    #[serde(default = "default_max_temp")]
    pub max_temp: f64,
}

fn default_weather_timeout() -> u64 {
    10
}
fn default_cache_ttl_seconds() -> u64 {
    3600
}
fn default_max_temp() -> f64 {
    16.0
}

/// spec.md §4.4 scheduler run cadence and smart-switch materialization.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct SchedulerConfig {
    /// Wall-clock "HH:MM" the daily run fires at.
    #[validate(length(min = 1))]
    pub daily_run_time: String,
    #[serde(default)]
    pub run_once_at_startup: bool,
    #[serde(default = "default_switch_timeout")]
    pub switch_timeout_seconds: u64,
    #[serde(default = "default_inter_op_delay")]
    pub inter_operation_delay_ms: u64,
    /// spec.md §4.4 / §9 REDESIGN note: intentionally longer than one slot.
    #[serde(default = "default_auto_off_delay")]
    pub auto_off_delay_seconds: u64,
}

fn default_switch_timeout() -> u64 {
    5
}
fn default_inter_op_delay() -> u64 {
    250
}
fn default_auto_off_delay() -> u64 {
    910
}

/// spec.md §6 persistence: one JSON snapshot/debt file.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct PersistenceConfig {
    pub path: PathBuf,
}

/// Observability, modeled one-for-one on the teacher's `TelemetryConfig`.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct TelemetryConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_json: bool,
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl LoadDeviceConfig {
    /// Turns the validated config entry into the runtime `LoadDevice` the
    /// Scheduler and Energy-Debt Tracker mutate (spec.md §3 "persists across
    /// process lifetime"). The schedule itself starts empty; the Scheduler's
    /// daily run fills it in.
    pub fn to_load_device(&self) -> LoadDevice {
        LoadDevice {
            name: self.name.clone(),
            entity_id: self.entity_id.clone(),
            switch_endpoint: self.switch_endpoint.clone(),
            estimated_power_watts: self.estimated_power_watts,
            scheduling_enabled: self.scheduling_enabled,
            schedule_mode: self.schedule_mode,
            desired_on_hours: self.desired_on_hours,
            period_hours: self.period_hours,
            min_price_rank: self.min_price_rank,
            max_price_rank: self.max_price_rank,
            weather_adjustment: self.weather_adjustment,
            heating_curve: self.heating_curve,
            power_factor: self.power_factor,
            inverted_logic: self.inverted_logic,
            always_on_hours: self.always_on_hours.clone(),
            always_off_hours: self.always_off_hours.clone(),
            always_on_price: self.always_on_price,
            energy_debt: 0.0,
            recovery_window_hours: self.recovery_window_hours,
            max_recovery_price: self.max_recovery_price,
            max_energy_debt: self.max_energy_debt,
            scheduled_slots: [false; SLOTS_PER_DAY],
            schedule_ids: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Load configuration in the teacher's two-phase pattern: base TOML,
    /// optional environment-specific TOML, then `PBC__`-prefixed env vars,
    /// finally validate (spec.md §7 `ConfigInvalid`).
    pub fn load() -> Result<Self> {
        Self::load_with_env(None)
    }

    pub fn load_with_env(environment: Option<&str>) -> Result<Self> {
        let mut figment = Figment::new().merge(Toml::file("config/default.toml"));

        if let Some(env) = environment {
            figment = figment.merge(Toml::file(format!("config/{env}.toml")));
        } else {
            figment = figment.merge(Toml::file("config/development.toml").nested());
        }

        figment = figment.merge(Env::prefixed("PBC__").split("__"));

        let config: AppConfig = figment.extract().context("failed to parse configuration")?;
        config.validate().context("configuration validation failed")?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_device() -> LoadDeviceConfig {
        LoadDeviceConfig {
            name: "boiler".into(),
            entity_id: "switch.boiler".into(),
            switch_endpoint: "http://10.0.0.5/rpc".into(),
            estimated_power_watts: 2000.0,
            scheduling_enabled: true,
            schedule_mode: ScheduleMode::Period,
            desired_on_hours: Some(4.0),
            period_hours: Some(24.0),
            min_price_rank: None,
            max_price_rank: None,
            weather_adjustment: false,
            heating_curve: None,
            power_factor: 0.5,
            inverted_logic: false,
            always_on_hours: vec![],
            always_off_hours: vec![],
            always_on_price: None,
            recovery_window_hours: 4.0,
            max_recovery_price: None,
            max_energy_debt: 120.0,
        }
    }

    #[test]
    fn period_hours_must_divide_24() {
        let mut d = base_device();
        d.period_hours = Some(5.0);
        assert!(d.validate().is_err());
    }

    #[test]
    fn desired_on_hours_cannot_exceed_period_hours() {
        let mut d = base_device();
        d.desired_on_hours = Some(30.0);
        assert!(d.validate().is_err());
    }

    #[test]
    fn threshold_requires_max_price_rank() {
        let mut d = base_device();
        d.schedule_mode = ScheduleMode::Threshold;
        d.max_price_rank = None;
        assert!(d.validate().is_err());
        d.max_price_rank = Some(30.0);
        assert!(d.validate().is_ok());
    }

    #[test]
    fn weather_adjustment_requires_heating_curve() {
        let mut d = base_device();
        d.weather_adjustment = true;
        d.heating_curve = None;
        assert!(d.validate().is_err());
        d.heating_curve = Some(2.0);
        assert!(d.validate().is_ok());
    }

    #[test]
    fn valid_period_device_passes() {
        assert!(base_device().validate().is_ok());
    }

    #[test]
    fn to_load_device_starts_with_empty_schedule_and_zero_debt() {
        let device = base_device().to_load_device();
        assert_eq!(device.count_on_slots(), 0);
        assert_eq!(device.energy_debt, 0.0);
        assert_eq!(device.max_energy_debt, 120.0);
    }
}
