//! C9 PBC Orchestrator (spec.md §4.9) plus the shared `AppState` the
//! dashboard API and the background tasks hang off of.
//!
//! The orchestrator itself (`Orchestrator`) is owned exclusively by the
//! single background task that runs it (spec.md §5 "single-threaded
//! cooperative" scheduling model) -- it is never wrapped in a lock. State
//! genuinely shared with the Scheduler, the Energy-Debt Tracker, and the
//! dashboard API (the device list, the persisted/in-memory snapshot) lives
//! in `AppState` behind `tokio::sync::Mutex`.

pub mod actuators;
pub mod debt_tracker;
pub mod fast_trigger;
pub mod mode_manager;
pub mod scheduler;
pub mod state_engine;

use std::str::FromStr;
use std::sync::Arc;

use chrono::{FixedOffset, TimeZone, Timelike};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::AppConfig;
use crate::data_manager::{parse_forced_power, CoercedValue, DataManager, SensorKey};
use crate::domain::device::LoadDevice;
use crate::domain::types::{Mode, Source, SystemState, ToolAction};
use crate::forecast::{PriceManager, WeatherManager};
use crate::hardware::{InverterClient, SensorBus, SwitchClient};
use crate::repo::{PersistedDevice, PersistedSnapshot, PersistenceStore};

use actuators::{
    enforce_heating_interlock, log_actions_disabled_once, ChargingAdjustmentTool, DischargeLimitationTool, ExportLimitationTool,
    ForcedChargingTool, ForcedDischargingTool, LoadSwitchingTool,
};
use debt_tracker::DebtTracker;
use fast_trigger::FastPhaseTrigger;
use mode_manager::{ForcedInitial, LimitAction, ModeManager, ToolKind};
use scheduler::Scheduler;

/// Device identifier handed to the inverter RPC calls; the simulated
/// backend ignores it, a real one would use it to address a specific unit.
const INVERTER_DEVICE_ID: &str = "inverter";

/// State shared across the PBC orchestrator task, the scheduler task, the
/// debt-tracker task, and the dashboard API.
#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<AppConfig>,
    pub clock: Arc<dyn Clock>,
    pub data_manager: Arc<DataManager>,
    pub inverter: Arc<dyn InverterClient>,
    pub switches: Arc<dyn SwitchClient>,
    pub price_manager: Arc<PriceManager>,
    pub weather_manager: Arc<WeatherManager>,
    pub scheduler: Arc<Scheduler>,
    pub debt_tracker: Arc<DebtTracker>,
    /// Raw sensor bus, kept alongside `data_manager` so the orchestrator's
    /// load-switching tool can query a device's live on/off state directly
    /// (spec.md §4.6), rather than through `data_manager`'s fixed sensor-key
    /// cache.
    pub sensors: Arc<dyn SensorBus>,
    pub persistence: PersistenceStore,
    pub devices: Arc<Mutex<Vec<LoadDevice>>>,
    /// Today's materialized snapshot, refreshed by the scheduler; the
    /// dashboard `GET` falls back to the persisted file when this is still
    /// empty (spec.md §6).
    pub snapshot: Arc<Mutex<Option<PersistedSnapshot>>>,
}

impl AppState {
    /// Wires the shared hardware bus (used by the debt tracker's per-device
    /// switch-state reads), the HTTP clients, and the configured device
    /// list into the state every task and API handler shares.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cfg: Arc<AppConfig>,
        clock: Arc<dyn Clock>,
        data_manager: Arc<DataManager>,
        sensors: Arc<dyn SensorBus>,
        inverter: Arc<dyn InverterClient>,
        switches: Arc<dyn SwitchClient>,
        price_manager: Arc<PriceManager>,
        weather_manager: Arc<WeatherManager>,
        persistence: PersistenceStore,
        devices: Vec<LoadDevice>,
    ) -> Self {
        let scheduler = Arc::new(Scheduler::new(switches.clone(), weather_manager.clone()));
        let debt_tracker = Arc::new(DebtTracker::new(sensors.clone(), switches.clone(), persistence.clone()));
        Self {
            cfg,
            clock,
            data_manager,
            inverter,
            switches,
            price_manager,
            weather_manager,
            scheduler,
            debt_tracker,
            sensors,
            persistence,
            devices: Arc::new(Mutex::new(devices)),
            snapshot: Arc::new(Mutex::new(None)),
        }
    }
}

/// C9: the 10 s / event-triggered control loop (spec.md §4.9). Owned by a
/// single background task; every field is a private mirror of the last
/// commanded value or of cooldown state belonging to one of the actuator
/// tools.
pub struct Orchestrator {
    cfg: Arc<AppConfig>,
    clock: Arc<dyn Clock>,
    data_manager: Arc<DataManager>,
    inverter: Arc<dyn InverterClient>,
    sensors: Arc<dyn SensorBus>,
    devices: Arc<Mutex<Vec<LoadDevice>>>,

    mode_manager: ModeManager,
    fast_trigger: FastPhaseTrigger,

    forced_charging: ForcedChargingTool,
    forced_discharging: ForcedDischargingTool,
    charging_adjustment: ChargingAdjustmentTool,
    export_limitation: ExportLimitationTool,
    discharge_limitation: DischargeLimitationTool,

    charging_rate_limit: f64,
    discharging_rate_limit: f64,
    export_limit: f64,

    heating_was_active: bool,
    actions_were_enabled: bool,
}

impl Orchestrator {
    pub fn new(
        cfg: Arc<AppConfig>,
        clock: Arc<dyn Clock>,
        data_manager: Arc<DataManager>,
        inverter: Arc<dyn InverterClient>,
        sensors: Arc<dyn SensorBus>,
        devices: Arc<Mutex<Vec<LoadDevice>>>,
    ) -> Self {
        let charging_entity = cfg.sensors.charging_rate_limit.entity_id.clone();
        let discharging_entity = cfg.sensors.discharging_rate_limit.entity_id.clone();
        Self {
            forced_charging: ForcedChargingTool::new(inverter.clone(), INVERTER_DEVICE_ID),
            forced_discharging: ForcedDischargingTool::new(inverter.clone(), INVERTER_DEVICE_ID),
            charging_adjustment: ChargingAdjustmentTool::new(inverter.clone(), charging_entity),
            export_limitation: ExportLimitationTool::new(inverter.clone(), INVERTER_DEVICE_ID),
            discharge_limitation: DischargeLimitationTool::new(inverter.clone(), discharging_entity),
            cfg,
            clock,
            data_manager,
            inverter,
            sensors,
            devices,
            mode_manager: ModeManager::new(),
            fast_trigger: FastPhaseTrigger::new(),
            charging_rate_limit: 0.0,
            discharging_rate_limit: 0.0,
            export_limit: 0.0,
            heating_was_active: false,
            actions_were_enabled: true,
        }
    }

    fn local_hour(&self, timestamp: i64) -> u8 {
        let tz = FixedOffset::east_opt(self.cfg.prices.tz_offset_seconds).unwrap_or_else(|| FixedOffset::east_opt(0).unwrap());
        let utc = chrono::Utc.timestamp_opt(timestamp, 0).single().unwrap_or_else(chrono::Utc::now);
        utc.with_timezone(&tz).hour() as u8
    }

    async fn numeric(&self, key: SensorKey) -> Option<f64> {
        self.data_manager.get(key, None).await.and_then(|v| v.as_f64())
    }

    async fn boolean(&self, key: SensorKey) -> bool {
        self.data_manager.get(key, None).await.and_then(|v| v.as_bool()).unwrap_or(false)
    }

    /// spec.md §4.9 steps 1-12, run once. Returns the list of actions taken
    /// (or, in debug mode, that would have been taken) for logging.
    pub async fn run_cycle(&mut self) -> Vec<ToolAction> {
        let mut executed = Vec::new();

        // Step 1: global actions-enabled gate.
        let actions_enabled = self.boolean(SensorKey::ActionsEnabled).await;
        if !actions_enabled {
            log_actions_disabled_once(self.actions_were_enabled);
            self.actions_were_enabled = false;
            return executed;
        }
        self.actions_were_enabled = true;

        let logging_enabled = self.boolean(SensorKey::LoggingEnabled).await;

        // Step 2: synchronous sensor refresh.
        for key in [
            SensorKey::PhaseL1,
            SensorKey::PhaseL2,
            SensorKey::PhaseL3,
            SensorKey::BatterySoc,
            SensorKey::BatteryPower,
            SensorKey::SolarInput,
            SensorKey::ChargingRateLimit,
            SensorKey::DischargingRateLimit,
            SensorKey::ForcedChargeStatus,
            SensorKey::Mode,
            SensorKey::Source,
            SensorKey::PowerLimit,
            SensorKey::HeatingSwitch,
            SensorKey::BoilerSwitch,
            SensorKey::PhaseTarget,
            SensorKey::RangeLow,
            SensorKey::RangeHigh,
        ] {
            self.data_manager.get(key, None).await;
        }

        // Step 3: build SystemState; skip if any critical sensor is stale.
        if !self.data_manager.is_system_valid() {
            warn!("critical sensor invalid, skipping PBC cycle");
            return executed;
        }

        let timestamp = self.clock.now();
        let forced_power_flow = if self.data_manager.is_sensor_valid(SensorKey::ForcedChargeStatus) {
            match self.data_manager.get(SensorKey::ForcedChargeStatus, None).await {
                Some(CoercedValue::Text(s)) => parse_forced_power(&s),
                _ => 0.0,
            }
        } else {
            0.0
        };

        let state = SystemState {
            phases: [
                self.numeric(SensorKey::PhaseL1).await.unwrap_or(0.0),
                self.numeric(SensorKey::PhaseL2).await.unwrap_or(0.0),
                self.numeric(SensorKey::PhaseL3).await.unwrap_or(0.0),
            ],
            battery_soc: self.numeric(SensorKey::BatterySoc).await.unwrap_or(0.0),
            battery_power: self.numeric(SensorKey::BatteryPower).await.unwrap_or(0.0),
            solar_input: self.numeric(SensorKey::SolarInput).await.unwrap_or(0.0),
            charging_rate_limit: self.numeric(SensorKey::ChargingRateLimit).await.unwrap_or(self.charging_rate_limit),
            discharging_rate_limit: self.numeric(SensorKey::DischargingRateLimit).await.unwrap_or(self.discharging_rate_limit),
            forced_power_flow,
            heating_active: self.boolean(SensorKey::HeatingSwitch).await,
            boiler_active: self.boolean(SensorKey::BoilerSwitch).await,
            timestamp,
        };
        self.charging_rate_limit = state.charging_rate_limit;
        self.discharging_rate_limit = state.discharging_rate_limit;

        // Step 4: mode/source/powerlimit, with the powerlimit sensor acting
        // as a live override of the configured `qw_powerlimit` (test seam).
        let mode_text = match self.data_manager.get(SensorKey::Mode, None).await {
            Some(CoercedValue::Text(s)) => s,
            _ => {
                warn!("mode sensor unavailable, skipping PBC cycle");
                return executed;
            }
        };
        let source_text = match self.data_manager.get(SensorKey::Source, None).await {
            Some(CoercedValue::Text(s)) => s,
            _ => {
                warn!("source sensor unavailable, skipping PBC cycle");
                return executed;
            }
        };
        let Ok(mode) = Mode::from_str(&mode_text) else {
            warn!(mode = %mode_text, "unknown mode, skipping PBC cycle");
            return executed;
        };
        let Ok(source) = Source::from_str(&source_text) else {
            warn!(source = %source_text, "unknown source, skipping PBC cycle");
            return executed;
        };
        if self.mode_manager.validate_source(mode, source).is_err() {
            return executed;
        }

        let mut controller_cfg = self.cfg.controller.clone();
        controller_cfg.qw_powerlimit = self.numeric(SensorKey::PowerLimit).await.unwrap_or(controller_cfg.qw_powerlimit);

        // Step 5: fast-trigger subscription.
        self.fast_trigger.update_subscription(state.battery_soc, controller_cfg.battery_soc_minimum_for_discharging);

        // Step 6: heating state transition.
        if self.heating_was_active && !state.heating_active {
            let restored = mode_manager::initial_state(mode, &controller_cfg).discharge_limit;
            self.discharging_rate_limit = restored;
            if !controller_cfg.debug {
                self.inverter.set_number(&self.cfg.sensors.discharging_rate_limit.entity_id, restored).await.ok();
            }
            info!(restored, "heating ended, discharging_rate_limit restored");
        }
        self.heating_was_active = state.heating_active;

        // Step 7: heating protection interlock. The source's two mode lists
        // overlap; the observable behavior (per spec.md §9) is: the
        // interlock always forces discharge=0 while heating is on, balancing
        // continues only for buy/frrdown, and is skipped for every other
        // mode this cycle.
        if state.heating_active {
            if !controller_cfg.debug {
                enforce_heating_interlock(self.inverter.as_ref(), INVERTER_DEVICE_ID, &mut self.discharging_rate_limit).await;
            } else {
                self.discharging_rate_limit = 0.0;
            }
            if !matches!(mode, Mode::Buy | Mode::Frrdown) {
                return executed;
            }
        }

        // Step 8: mode-manager dispatch.
        let transition = self.mode_manager.handle_mode_change(mode, source, &controller_cfg);
        if transition.transitioned {
            self.apply_mode_transition(&state, mode, &transition, &controller_cfg, logging_enabled, &mut executed).await;
        }

        // Step 9: desired state.
        let local_hour = self.local_hour(timestamp);
        let phase_target = self.numeric(SensorKey::PhaseTarget).await;
        let range_low = self.numeric(SensorKey::RangeLow).await;
        let range_high = self.numeric(SensorKey::RangeHigh).await;
        let Some(desired) = state_engine::compute_desired_state(&state, mode, &controller_cfg, phase_target, range_low, range_high, local_hour) else {
            debug!("no phase target available, skipping PBC cycle");
            return executed;
        };

        if logging_enabled {
            info!(?mode, reasoning = %desired.reasoning, flow = desired.energy_flow.battery_flow_change, "PBC cycle desired state");
        }

        // Step 10: surplus orientation and tool sequence.
        let surplus = match mode {
            Mode::Frrdown => desired.energy_flow.battery_flow_change < 0.0,
            _ => desired.energy_flow.battery_flow_change > 0.0,
        };
        let sequence = mode_manager::ordered_sequence(mode, surplus);

        // Step 11: walk the sequence. For `frrdown`, `remaining` is kept in
        // the mode's own sign convention between iterations but negated
        // just before each tool call, so every tool always sees
        // "positive = surplus" (spec.md §4.9 step 11).
        let mut remaining = desired.energy_flow.battery_flow_change;
        for tool in sequence {
            if remaining.abs() < 1.0 {
                break;
            }
            let dispatch_remaining = if mode == Mode::Frrdown { -remaining } else { remaining };
            let (action, next_dispatch_remaining) = self.apply_tool(tool, &state, mode, &controller_cfg, dispatch_remaining).await;
            remaining = if mode == Mode::Frrdown { -next_dispatch_remaining } else { next_dispatch_remaining };
            if let Some(action) = action {
                executed.push(action);
            }
        }

        // Step 12: each tool call above already executed through C6 (or was
        // a no-op in debug mode via the tool's own cooldown path); this just
        // summarizes the cycle for the logs.
        if controller_cfg.debug && !executed.is_empty() {
            for action in &executed {
                info!(?action, "debug mode: action computed but not executed");
            }
        } else if logging_enabled && !executed.is_empty() {
            info!(count = executed.len(), "PBC cycle executed actions");
        }

        self.fast_trigger.record_control_loop_execution(self.clock.as_ref());
        executed
    }

    async fn apply_mode_transition(
        &mut self,
        state: &SystemState,
        mode: Mode,
        transition: &mode_manager::ModeTransition,
        cfg: &crate::config::ControllerConfig,
        logging_enabled: bool,
        executed: &mut Vec<ToolAction>,
    ) {
        let Some(initial) = transition.initial_state else { return };
        if logging_enabled {
            info!(?mode, "mode transition, applying initial state");
        }

        match initial.export_limit {
            LimitAction::Keep => {}
            LimitAction::SetTo(v) => {
                self.export_limit = v;
                if !cfg.debug {
                    if v >= cfg.max_feed_grid_power {
                        self.inverter.reset_maximum_feed_grid_power(INVERTER_DEVICE_ID).await.ok();
                    } else {
                        self.inverter.set_maximum_feed_grid_power(v, INVERTER_DEVICE_ID).await.ok();
                    }
                }
            }
        }

        self.charging_rate_limit = initial.charging_limit;
        self.discharging_rate_limit = initial.discharge_limit;
        if !cfg.debug {
            self.inverter.set_number(&self.cfg.sensors.charging_rate_limit.entity_id, initial.charging_limit).await.ok();
            self.inverter.set_number(&self.cfg.sensors.discharging_rate_limit.entity_id, initial.discharge_limit).await.ok();
        }

        match initial.forced {
            ForcedInitial::Stop => {
                if !cfg.debug {
                    self.inverter.stop_forcible_charge(INVERTER_DEVICE_ID).await.ok();
                }
            }
            ForcedInitial::StopThenForceCharge(_) | ForcedInitial::StopThenForceDischarge(_) => {
                if let Some(action) = &transition.immediate_action {
                    if !cfg.debug {
                        match action {
                            ToolAction::ForcedCharge { target_watts, reason, .. } => {
                                if let Ok(Some(a)) = self
                                    .forced_charging
                                    .execute(state, *target_watts, &mut self.charging_rate_limit, cfg, self.clock.as_ref(), true, reason)
                                    .await
                                {
                                    executed.push(a);
                                }
                            }
                            ToolAction::ForcedDischarge { target_watts, reason, .. } => {
                                if let Ok(Some(a)) = self
                                    .forced_discharging
                                    .execute(state, *target_watts, &mut self.discharging_rate_limit, cfg, self.clock.as_ref(), true, false, reason)
                                    .await
                                {
                                    executed.push(a);
                                }
                            }
                            _ => {}
                        }
                    } else {
                        executed.push(action.clone());
                    }
                }
            }
        }
    }

    /// spec.md §4.9's tool walk. `remaining` is signed positive=surplus
    /// (absorb by charging more / discharging less), negative=deficit
    /// (increase discharge / reduce import). Each tool either fully resolves
    /// `remaining` (treated as converged once the realization gate and
    /// cooldown accept a command) or leaves it untouched for the next tool
    /// in the sequence.
    async fn apply_tool(&mut self, tool: ToolKind, state: &SystemState, mode: Mode, cfg: &crate::config::ControllerConfig, remaining: f64) -> (Option<ToolAction>, f64) {
        let reason = format!("{mode} cycle balancing");
        match tool {
            ToolKind::ChargingAdjustment => {
                if remaining > 0.0 && state.battery_power < 0.0 {
                    return (None, remaining);
                }
                if remaining < 0.0 && mode == Mode::Frrdown {
                    return (None, remaining);
                }
                let target = (self.charging_rate_limit + remaining).clamp(0.0, cfg.max_battery_power);
                match self.charging_adjustment.execute(self.charging_rate_limit, target, cfg, self.clock.as_ref(), &reason).await {
                    Ok(action) => {
                        self.charging_rate_limit = target;
                        (action, 0.0)
                    }
                    Err(e) => {
                        debug!(error = %e, "charging_adjustment deferred");
                        (None, remaining)
                    }
                }
            }
            ToolKind::ForcedDischarging => {
                let target = remaining.abs();
                match self
                    .forced_discharging
                    .execute(state, target, &mut self.discharging_rate_limit, cfg, self.clock.as_ref(), false, false, &reason)
                    .await
                {
                    Ok(action) => (action, 0.0),
                    Err(e) => {
                        debug!(error = %e, "forced_discharging deferred");
                        (None, remaining)
                    }
                }
            }
            ToolKind::ForcedCharging => {
                let target = remaining.abs();
                match self.forced_charging.execute(state, target, &mut self.charging_rate_limit, cfg, self.clock.as_ref(), false, &reason).await {
                    Ok(action) => (action, 0.0),
                    Err(e) => {
                        debug!(error = %e, "forced_charging deferred");
                        (None, remaining)
                    }
                }
            }
            ToolKind::ExportLimitation => {
                let target = (cfg.max_feed_grid_power - remaining.max(0.0)).clamp(0.0, cfg.max_feed_grid_power);
                match self.export_limitation.execute(Some(self.export_limit), target, cfg, self.clock.as_ref(), &reason).await {
                    Ok(action) => {
                        self.export_limit = target;
                        (action, 0.0)
                    }
                    Err(e) => {
                        debug!(error = %e, "export_limitation deferred");
                        (None, remaining)
                    }
                }
            }
            ToolKind::DischargeLimitation => {
                let target = (self.discharging_rate_limit + remaining).clamp(0.0, cfg.max_battery_power);
                match self.discharge_limitation.execute(self.discharging_rate_limit, target, cfg, self.clock.as_ref(), &reason).await {
                    Ok(action) => {
                        self.discharging_rate_limit = target;
                        (action, 0.0)
                    }
                    Err(e) => {
                        debug!(error = %e, "discharge_limitation deferred");
                        (None, remaining)
                    }
                }
            }
            ToolKind::LoadSwitching => {
                let devices = self.devices.lock().await;
                match LoadSwitchingTool::select(mode, remaining, &devices, self.sensors.as_ref()).await {
                    Some(action) => (Some(action), 0.0),
                    None => (None, remaining),
                }
            }
        }
    }
}

/// Spawns the three background tasks spec.md §4.9/§4.4/§4.5 describe: the
/// 10 s PBC tick, the per-minute debt-tracker tick, and the daily scheduler
/// run (plus an optional run-once-at-startup per `SchedulerConfig`). The
/// fast-trigger's early-wakeup path (§4.10) is folded into the 10 s tick: it
/// is evaluated against the same phase readings the tick just refreshed,
/// since the HTTP/simulated sensor bus has no independent push channel to
/// interrupt a sleeping loop.
pub fn spawn_background_tasks(state: AppState) {
    let pbc_state = state.clone();
    tokio::spawn(async move { run_pbc_loop(pbc_state).await });

    let debt_state = state.clone();
    tokio::spawn(async move { run_debt_loop(debt_state).await });

    let scheduler_state = state;
    tokio::spawn(async move { run_scheduler_loop(scheduler_state).await });
}

async fn run_pbc_loop(state: AppState) {
    let mut orchestrator = Orchestrator::new(
        state.cfg.clone(),
        state.clock.clone(),
        state.data_manager.clone(),
        state.inverter.clone(),
        state.sensors.clone(),
        state.devices.clone(),
    );
    let tick = std::time::Duration::from_secs(state.cfg.controller.tick_seconds);
    loop {
        orchestrator.run_cycle().await;
        tokio::time::sleep(tick).await;
    }
}

/// spec.md §4.2/§4.5: the day-ahead window is anchored at the local 22:00
/// boundary preceding `now`.
fn window_start_for(now: chrono::DateTime<FixedOffset>) -> chrono::DateTime<FixedOffset> {
    let today_22 = now.date_naive().and_hms_opt(22, 0, 0).unwrap().and_local_timezone(*now.offset()).unwrap();
    if now >= today_22 {
        today_22
    } else {
        today_22 - chrono::Duration::days(1)
    }
}

async fn run_debt_loop(state: AppState) {
    let tz = FixedOffset::east_opt(state.cfg.prices.tz_offset_seconds).unwrap_or_else(|| FixedOffset::east_opt(0).unwrap());
    loop {
        tokio::time::sleep(std::time::Duration::from_secs(60)).await;
        let now = chrono::Utc::now().with_timezone(&tz);
        let window_start = window_start_for(now);
        let mode = current_mode_best_effort(&state).await;
        let mut devices = state.devices.lock().await;
        let prices: Vec<_> = state.snapshot.lock().await.as_ref().map(|s| s.prices.clone()).unwrap_or_default();
        if prices.is_empty() {
            continue;
        }
        state.debt_tracker.tick(&mut devices, &prices, mode, now, window_start).await;
    }
}

async fn current_mode_best_effort(state: &AppState) -> Mode {
    match state.data_manager.get(SensorKey::Mode, None).await {
        Some(CoercedValue::Text(s)) => Mode::from_str(&s).unwrap_or(Mode::Normal),
        _ => Mode::Normal,
    }
}

async fn run_scheduler_loop(state: AppState) {
    if state.cfg.scheduler.run_once_at_startup {
        run_scheduler_once(&state).await;
    }
    loop {
        if let Some(sleep_for) = seconds_until(&state.cfg.scheduler.daily_run_time, &state) {
            tokio::time::sleep(std::time::Duration::from_secs(sleep_for)).await;
            run_scheduler_once(&state).await;
        } else {
            tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        }
    }
}

fn seconds_until(hhmm: &str, state: &AppState) -> Option<u64> {
    let (h, m) = hhmm.split_once(':')?;
    let target_h: u32 = h.parse().ok()?;
    let target_m: u32 = m.parse().ok()?;
    let tz = FixedOffset::east_opt(state.cfg.prices.tz_offset_seconds).unwrap_or_else(|| FixedOffset::east_opt(0).unwrap());
    let now = chrono::Utc.timestamp_opt(state.clock.now(), 0).single()?.with_timezone(&tz);
    let mut target = now.date_naive().and_hms_opt(target_h, target_m, 0)?.and_local_timezone(tz).single()?;
    if target <= now {
        target += chrono::Duration::days(1);
    }
    Some((target - now).num_seconds().max(1) as u64)
}

async fn run_scheduler_once(state: &AppState) {
    let today = chrono::Utc::now().date_naive();
    let prices = state.price_manager.fetch_prices_for_date(today).await;
    let mut devices = state.devices.lock().await;
    state.scheduler.run_daily(&mut devices, &prices, &state.cfg.scheduler).await;

    let persisted_devices: Vec<PersistedDevice> = devices
        .iter()
        .map(|d| PersistedDevice {
            name: d.name.clone(),
            slots: d.scheduled_slots.to_vec(),
            energy_debt: d.energy_debt,
            weather: None,
            package: Some(state.cfg.prices.network_package),
            recent_recoveries: Vec::new(),
            status_text: Some(format!("{} on-slots scheduled", d.count_on_slots())),
        })
        .collect();
    let snapshot = PersistedSnapshot { calculated_at: chrono::Utc::now(), prices, devices: persisted_devices };

    if let Err(e) = state.persistence.save_snapshot(&snapshot).await {
        warn!(error = %e, "failed to persist daily snapshot");
    }
    *state.snapshot.lock().await = Some(snapshot);
}

pub fn system_clock() -> Arc<dyn Clock> {
    Arc::new(SystemClock)
}
