mod api;
mod auth;
mod clock;
mod config;
mod controller;
mod data_manager;
mod domain;
mod error;
mod forecast;
mod hardware;
mod repo;
mod telemetry;
mod utils;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use chrono::FixedOffset;
use tracing::{info, warn};

use config::AppConfig;
use controller::AppState;
use data_manager::{DataManager, SensorKind, SensorKey, SensorSpec};
use hardware::simulated::SimulatedHardware;
use hardware::RawValue;

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = AppConfig::load()?;
    let _telemetry_guard = telemetry::init_tracing(&cfg.telemetry);
    let cfg = Arc::new(cfg);

    let clock = controller::system_clock();
    let hardware = Arc::new(SimulatedHardware::new());
    seed_simulated_sensors(&hardware, &cfg);

    let specs = sensor_specs(&cfg.sensors);
    let data_manager = Arc::new(DataManager::new(hardware.clone(), clock.clone(), specs));

    let tz = FixedOffset::east_opt(cfg.prices.tz_offset_seconds).unwrap_or_else(|| FixedOffset::east_opt(0).unwrap());
    let price_manager = Arc::new(forecast::PriceManager::new(forecast::PriceManagerConfig::new(
        cfg.prices.base_url.clone(),
        cfg.prices.area.clone(),
        tz,
        cfg.prices.network_package,
    ))?);
    let weather_manager = Arc::new(forecast::WeatherManager::new(forecast::WeatherManagerConfig::new(
        cfg.weather.base_url.clone(),
        cfg.weather.latitude,
        cfg.weather.longitude,
    ))?);

    let persistence = repo::PersistenceStore::new(cfg.persistence.path.clone());
    let devices: Vec<_> = cfg.devices.iter().map(|d| d.to_load_device()).collect();

    let app_state = AppState::new(
        cfg.clone(),
        clock,
        data_manager,
        hardware.clone() as Arc<dyn hardware::SensorBus>,
        hardware.clone() as Arc<dyn hardware::InverterClient>,
        hardware as Arc<dyn hardware::SwitchClient>,
        price_manager,
        weather_manager,
        persistence,
        devices,
    );

    let mut app: Router = api::router(app_state.clone(), &cfg);
    #[cfg(feature = "swagger")]
    {
        app = api::with_swagger(app);
    }

    let addr = cfg.server.socket_addr()?;
    info!(%addr, "starting residential load scheduler");

    controller::spawn_background_tasks(app_state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).with_graceful_shutdown(telemetry::shutdown_signal()).await?;

    warn!("shutdown complete");
    Ok(())
}

/// Maps `AppConfig`'s 19 named `SensorEntry`s onto `SensorKey`/`SensorSpec`
/// pairs, with each entity's coercion kind fixed by what it represents
/// (spec.md §4.1).
fn sensor_specs(sensors: &config::SensorsConfig) -> HashMap<SensorKey, SensorSpec> {
    let mut map = HashMap::new();
    let mut add = |key: SensorKey, entry: &config::SensorEntry, kind: SensorKind| {
        map.insert(
            key,
            SensorSpec { entity_id: entry.entity_id.clone(), kind, max_age_seconds: entry.max_age_seconds, invalid_age_seconds: entry.invalid_age_seconds },
        );
    };

    add(SensorKey::PhaseL1, &sensors.phase_l1, SensorKind::Numeric);
    add(SensorKey::PhaseL2, &sensors.phase_l2, SensorKind::Numeric);
    add(SensorKey::PhaseL3, &sensors.phase_l3, SensorKind::Numeric);
    add(SensorKey::BatterySoc, &sensors.battery_soc, SensorKind::Numeric);
    add(SensorKey::BatteryPower, &sensors.battery_power, SensorKind::Numeric);
    add(SensorKey::SolarInput, &sensors.solar_input, SensorKind::Numeric);
    add(SensorKey::ChargingRateLimit, &sensors.charging_rate_limit, SensorKind::Numeric);
    add(SensorKey::DischargingRateLimit, &sensors.discharging_rate_limit, SensorKind::Numeric);
    add(SensorKey::ForcedChargeStatus, &sensors.forced_charge_status, SensorKind::Text);
    add(SensorKey::Mode, &sensors.mode, SensorKind::Text);
    add(SensorKey::Source, &sensors.source, SensorKind::Text);
    add(SensorKey::PowerLimit, &sensors.powerlimit, SensorKind::Numeric);
    add(SensorKey::HeatingSwitch, &sensors.heating_switch, SensorKind::Boolean);
    add(SensorKey::BoilerSwitch, &sensors.boiler_switch, SensorKind::Boolean);
    add(SensorKey::PhaseTarget, &sensors.phase_target, SensorKind::Numeric);
    add(SensorKey::RangeLow, &sensors.range_low, SensorKind::Numeric);
    add(SensorKey::RangeHigh, &sensors.range_high, SensorKind::Numeric);
    add(SensorKey::ActionsEnabled, &sensors.actions_enabled, SensorKind::Boolean);
    add(SensorKey::LoggingEnabled, &sensors.logging_enabled, SensorKind::Boolean);

    map
}

/// SPEC_FULL.md §E: since this crate only ships the simulated hardware
/// backend, seed it with a plausible starting snapshot so the PBC loop has
/// valid critical sensors from the first tick instead of sitting invalid
/// until something external writes to it.
fn seed_simulated_sensors(hardware: &SimulatedHardware, cfg: &AppConfig) {
    hardware.set_sensor(&cfg.sensors.phase_l1.entity_id, RawValue::Numeric(0.0));
    hardware.set_sensor(&cfg.sensors.phase_l2.entity_id, RawValue::Numeric(0.0));
    hardware.set_sensor(&cfg.sensors.phase_l3.entity_id, RawValue::Numeric(0.0));
    hardware.set_sensor(&cfg.sensors.battery_soc.entity_id, RawValue::Numeric(50.0));
    hardware.set_sensor(&cfg.sensors.battery_power.entity_id, RawValue::Numeric(0.0));
    hardware.set_sensor(&cfg.sensors.solar_input.entity_id, RawValue::Numeric(0.0));
    hardware.set_sensor(&cfg.sensors.charging_rate_limit.entity_id, RawValue::Numeric(cfg.controller.max_battery_power));
    hardware.set_sensor(&cfg.sensors.discharging_rate_limit.entity_id, RawValue::Numeric(cfg.controller.max_battery_power));
    hardware.set_sensor(&cfg.sensors.forced_charge_status.entity_id, RawValue::Text("Stopped".to_string()));
    hardware.set_sensor(&cfg.sensors.mode.entity_id, RawValue::Text("normal".to_string()));
    hardware.set_sensor(&cfg.sensors.source.entity_id, RawValue::Text("timer".to_string()));
    hardware.set_sensor(&cfg.sensors.powerlimit.entity_id, RawValue::Numeric(cfg.controller.qw_powerlimit));
    hardware.set_sensor(&cfg.sensors.heating_switch.entity_id, RawValue::Bool(false));
    hardware.set_sensor(&cfg.sensors.boiler_switch.entity_id, RawValue::Bool(false));
    hardware.set_sensor(&cfg.sensors.phase_target.entity_id, RawValue::Numeric(0.0));
    hardware.set_sensor(&cfg.sensors.range_low.entity_id, RawValue::Numeric(-200.0));
    hardware.set_sensor(&cfg.sensors.range_high.entity_id, RawValue::Numeric(200.0));
    hardware.set_sensor(&cfg.sensors.actions_enabled.entity_id, RawValue::Bool(true));
    hardware.set_sensor(&cfg.sensors.logging_enabled.entity_id, RawValue::Bool(true));
}
