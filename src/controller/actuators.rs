//! C6 Actuator Tools (spec.md §4.6): the six mutating tools the orchestrator
//! walks in sequence each cycle. Each tool owns its own cooldown timestamp
//! (spec.md §9 "Ownership") and applies the shared contract from §4.6:
//! integer-watt rounding, `[0, max]` clamping, idempotence skip, a minimum
//! change threshold, and fire-and-forget dispatch.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::ControllerConfig;
use crate::domain::types::{Mode, SystemState, ToolAction};
use crate::domain::LoadDevice;
use crate::error::ControllerError;
use crate::hardware::{InverterClient, RawValue, SensorBus};

/// spec.md §4.6 "Realization gate": how far the observed `battery_power` may
/// diverge from the last commanded `forced_power_flow` before a new forced
/// command is allowed to proceed.
fn realization_tolerance(commanded: f64) -> f64 {
    200.0_f64.max(0.15 * commanded.abs())
}

fn is_realized(state: &SystemState, commanded: f64) -> bool {
    (state.battery_power - commanded).abs() <= realization_tolerance(commanded)
}

/// Shared cooldown bookkeeping every tool embeds (spec.md §9 "Ownership":
/// "Tools encapsulate their own cooldown timestamps").
#[derive(Debug, Clone, Copy, Default)]
struct Cooldown {
    last_command_at: Option<i64>,
    last_value: Option<f64>,
    last_skip_log_at: Option<i64>,
}

impl Cooldown {
    fn elapsed(&self, clock: &dyn Clock, cooldown_seconds: i64) -> Result<(), i64> {
        match self.last_command_at {
            Some(t) => {
                let remaining = cooldown_seconds - (clock.now() - t);
                if remaining > 0 {
                    Err(remaining)
                } else {
                    Ok(())
                }
            }
            None => Ok(()),
        }
    }

    /// spec.md §4.6 idempotence: log at most once per 5 minutes for a given
    /// repeated no-op target.
    fn note_skip(&mut self, clock: &dyn Clock, tool: &'static str, target: f64) {
        let now = clock.now();
        let throttled = self.last_skip_log_at.map(|t| now - t < 300).unwrap_or(false);
        if !throttled {
            debug!(tool, target, "command is a no-op, skipping");
            self.last_skip_log_at = Some(now);
        }
    }

    fn record(&mut self, clock: &dyn Clock, value: f64) {
        self.last_command_at = Some(clock.now());
        self.last_value = Some(value);
    }
}

/// **Forced-charging** (spec.md §4.6, §4.9 `forced_charging`): absolute
/// target in `buy` mode; incremental elsewhere. `target > 0` is a genuine
/// forced-charge command, `target == 0` degenerates to a stop.
pub struct ForcedChargingTool {
    inverter: Arc<dyn InverterClient>,
    device_id: String,
    cooldown: Cooldown,
}

impl ForcedChargingTool {
    pub fn new(inverter: Arc<dyn InverterClient>, device_id: impl Into<String>) -> Self {
        Self { inverter, device_id: device_id.into(), cooldown: Cooldown::default() }
    }

    /// `mode_transition` bypasses cooldown and the realization gate (spec.md
    /// §4.7 "bypassing realization gate and cooldown").
    pub async fn execute(
        &mut self,
        state: &SystemState,
        target_watts: f64,
        charging_rate_limit: &mut f64,
        cfg: &ControllerConfig,
        clock: &dyn Clock,
        mode_transition: bool,
        reason: &str,
    ) -> Result<Option<ToolAction>, ControllerError> {
        let target = target_watts.round().clamp(0.0, cfg.max_battery_power);

        if !mode_transition {
            if let Err(remaining_seconds) = self.cooldown.elapsed(clock, cfg.forced_charge_discharge_cooldown_seconds) {
                return Err(ControllerError::Cooldown { tool: "forced_charging", remaining_seconds });
            }
            if !is_realized(state, state.forced_power_flow.max(0.0)) {
                return Err(ControllerError::NotRealized { tool: "forced_charging" });
            }
        }

        if self.cooldown.last_value == Some(target) && state.forced_power_flow == target {
            self.cooldown.note_skip(clock, "forced_charging", target);
            return Ok(None);
        }

        // spec.md §4.6 "Limit-raising side-effects".
        if target > *charging_rate_limit {
            *charging_rate_limit = target.max(cfg.max_battery_power);
        }

        let action = if target <= 0.0 {
            self.inverter.stop_forcible_charge(&self.device_id).await.ok();
            ToolAction::ForcedCharge { target_watts: 0.0, mode_transition, reason: reason.to_string() }
        } else {
            self.inverter.forcible_charge_soc(cfg.battery_soc_maximum_for_charging, target, &self.device_id).await.ok();
            ToolAction::ForcedCharge { target_watts: target, mode_transition, reason: reason.to_string() }
        };

        self.cooldown.record(clock, target);
        Ok(Some(action))
    }
}

/// **Forced-discharging** (spec.md §4.6, §4.9): mirrors `ForcedChargingTool`,
/// plus the 3-consecutive-suppressed-attempt override (spec.md §4.6, §8.6).
pub struct ForcedDischargingTool {
    inverter: Arc<dyn InverterClient>,
    device_id: String,
    cooldown: Cooldown,
    suppressed_attempts: u32,
}

impl ForcedDischargingTool {
    pub fn new(inverter: Arc<dyn InverterClient>, device_id: impl Into<String>) -> Self {
        Self { inverter, device_id: device_id.into(), cooldown: Cooldown::default(), suppressed_attempts: 0 }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn execute(
        &mut self,
        state: &SystemState,
        target_watts: f64,
        discharging_rate_limit: &mut f64,
        cfg: &ControllerConfig,
        clock: &dyn Clock,
        mode_transition: bool,
        emergency: bool,
        reason: &str,
    ) -> Result<Option<ToolAction>, ControllerError> {
        let target = target_watts.round().clamp(0.0, cfg.max_battery_power);

        if !mode_transition && !emergency {
            if let Err(remaining_seconds) = self.cooldown.elapsed(clock, cfg.forced_charge_discharge_cooldown_seconds) {
                return Err(ControllerError::Cooldown { tool: "forced_discharging", remaining_seconds });
            }
            if !is_realized(state, -state.forced_power_flow.min(0.0).abs()) {
                // spec.md §4.6: after 3 consecutive suppressed attempts, override.
                if self.suppressed_attempts >= 3 {
                    self.suppressed_attempts = 0;
                } else {
                    self.suppressed_attempts += 1;
                    return Err(ControllerError::NotRealized { tool: "forced_discharging" });
                }
            }
        }

        if self.cooldown.last_value == Some(target) && state.forced_power_flow == -target {
            self.cooldown.note_skip(clock, "forced_discharging", target);
            return Ok(None);
        }

        if target > *discharging_rate_limit {
            *discharging_rate_limit = target.max(cfg.max_battery_power);
        }

        let action = if target <= 0.0 {
            self.inverter.stop_forcible_charge(&self.device_id).await.ok();
            ToolAction::ForcedDischarge { target_watts: 0.0, emergency, mode_transition, reason: reason.to_string() }
        } else {
            self.inverter
                .forcible_discharge_soc(cfg.battery_soc_minimum_for_discharging, target, &self.device_id)
                .await
                .ok();
            ToolAction::ForcedDischarge { target_watts: target, emergency, mode_transition, reason: reason.to_string() }
        };

        self.cooldown.record(clock, target);
        self.suppressed_attempts = 0;
        Ok(Some(action))
    }

    /// spec.md §4.6: "reset [the counter] on realization or emergency".
    pub fn reset_suppressed_attempts(&mut self) {
        self.suppressed_attempts = 0;
    }
}

/// **Charging-rate adjustment** (spec.md §4.9 `charging_adjustment`): the
/// non-forced limit tool, cooldown 3 s, min change 10 W.
pub struct ChargingAdjustmentTool {
    inverter: Arc<dyn InverterClient>,
    entity: String,
    cooldown: Cooldown,
}

impl ChargingAdjustmentTool {
    pub fn new(inverter: Arc<dyn InverterClient>, entity: impl Into<String>) -> Self {
        Self { inverter, entity: entity.into(), cooldown: Cooldown::default() }
    }

    pub async fn execute(
        &mut self,
        current_value: f64,
        target_watts: f64,
        cfg: &ControllerConfig,
        clock: &dyn Clock,
        reason: &str,
    ) -> Result<Option<ToolAction>, ControllerError> {
        let target = target_watts.round().clamp(0.0, cfg.max_battery_power);

        if let Err(remaining_seconds) = self.cooldown.elapsed(clock, cfg.charging_adjustment_export_cooldown_seconds) {
            return Err(ControllerError::Cooldown { tool: "charging_adjustment", remaining_seconds });
        }

        if (target - current_value).abs() < cfg.minimum_charging_change_watts {
            self.cooldown.note_skip(clock, "charging_adjustment", target);
            return Ok(None);
        }

        self.inverter.set_number(&self.entity, target).await.ok();
        self.cooldown.record(clock, target);
        Ok(Some(ToolAction::ChargingAdjust { target_watts: target, reason: reason.to_string() }))
    }
}

/// **Export limitation** (spec.md §4.6 "Export limitation tool"): surplus-
/// only, applies in `limitexport`/`pvsell`.
pub struct ExportLimitationTool {
    inverter: Arc<dyn InverterClient>,
    device_id: String,
    cooldown: Cooldown,
}

impl ExportLimitationTool {
    pub fn new(inverter: Arc<dyn InverterClient>, device_id: impl Into<String>) -> Self {
        Self { inverter, device_id: device_id.into(), cooldown: Cooldown::default() }
    }

    pub async fn execute(
        &mut self,
        current_limit: Option<f64>,
        target_watts: f64,
        cfg: &ControllerConfig,
        clock: &dyn Clock,
        reason: &str,
    ) -> Result<Option<ToolAction>, ControllerError> {
        let target = target_watts.round().clamp(0.0, cfg.max_feed_grid_power);

        if let Err(remaining_seconds) = self.cooldown.elapsed(clock, cfg.charging_adjustment_export_cooldown_seconds) {
            return Err(ControllerError::Cooldown { tool: "export_limitation", remaining_seconds });
        }

        if let Some(current) = current_limit {
            if (target - current).abs() < cfg.minimum_export_change_watts {
                self.cooldown.note_skip(clock, "export_limitation", target);
                return Ok(None);
            }
        }

        if target >= cfg.max_feed_grid_power {
            self.inverter.reset_maximum_feed_grid_power(&self.device_id).await.ok();
        } else {
            self.inverter.set_maximum_feed_grid_power(target, &self.device_id).await.ok();
        }

        self.cooldown.record(clock, target);
        Ok(Some(ToolAction::ExportLimit { target_watts: target, reason: reason.to_string() }))
    }
}

/// **Discharge limitation** (spec.md §4.9 `discharge_limitation`):
/// bidirectional cap on `discharging_rate_limit`.
pub struct DischargeLimitationTool {
    inverter: Arc<dyn InverterClient>,
    entity: String,
    cooldown: Cooldown,
}

impl DischargeLimitationTool {
    pub fn new(inverter: Arc<dyn InverterClient>, entity: impl Into<String>) -> Self {
        Self { inverter, entity: entity.into(), cooldown: Cooldown::default() }
    }

    pub async fn execute(
        &mut self,
        current_value: f64,
        target_watts: f64,
        cfg: &ControllerConfig,
        clock: &dyn Clock,
        reason: &str,
    ) -> Result<Option<ToolAction>, ControllerError> {
        let target = target_watts.round().clamp(0.0, cfg.max_battery_power);

        if let Err(remaining_seconds) = self.cooldown.elapsed(clock, cfg.charging_adjustment_export_cooldown_seconds) {
            return Err(ControllerError::Cooldown { tool: "discharge_limitation", remaining_seconds });
        }

        if (target - current_value).abs() < cfg.minimum_discharge_change_watts {
            self.cooldown.note_skip(clock, "discharge_limitation", target);
            return Ok(None);
        }

        self.inverter.set_number(&self.entity, target).await.ok();
        self.cooldown.record(clock, target);
        Ok(Some(ToolAction::DischargeLimit { target_watts: target, reason: reason.to_string() }))
    }
}

/// **Load switching** (spec.md §4.6 "Load-switching tool (mFRR)"): picks a
/// subset of devices to flip so the chosen wattage fits within the
/// remaining need, favoring undershoot.
pub struct LoadSwitchingTool;

impl LoadSwitchingTool {
    /// `delta_watts` is signed per spec.md §4.9's surplus-positive
    /// convention after the `frrdown` negation: `frrup` calls this with a
    /// negative delta (need more export), `frrdown` with positive (need
    /// more import). `bus` resolves each candidate's live on/off state so
    /// `frrup` never proposes switching off a device that is already off,
    /// and `frrdown` never proposes switching on one that is already on.
    pub async fn select(mode: Mode, delta_watts: f64, devices: &[LoadDevice], bus: &dyn SensorBus) -> Option<ToolAction> {
        match mode {
            Mode::Frrup if delta_watts < 0.0 => Self::select_off(devices, -delta_watts, bus).await,
            Mode::Frrdown if delta_watts > 0.0 => Self::select_on(devices, delta_watts, bus).await,
            _ => None,
        }
    }

    /// `frrup`: collect eligible currently-ON devices, greedily turn some
    /// OFF to uncover `need_watts` of export headroom without overshooting.
    async fn select_off(devices: &[LoadDevice], need_watts: f64, bus: &dyn SensorBus) -> Option<ToolAction> {
        let mut candidates = Vec::new();
        for d in devices.iter().filter(|d| d.scheduling_enabled).filter(|d| !Self::weather_commitment_unmet(d)) {
            if Self::is_on(bus, &d.entity_id).await {
                candidates.push(d);
            }
        }
        candidates.sort_by(|a, b| b.estimated_power_watts.partial_cmp(&a.estimated_power_watts).unwrap());

        let picked = Self::greedy_undershoot(&candidates, need_watts);
        if picked.is_empty() {
            return None;
        }
        Some(ToolAction::LoadSwitch {
            devices: picked.iter().map(|d| d.name.clone()).collect(),
            turn_on: false,
            reason: format!("frrup: freeing {need_watts:.0}W of export headroom"),
        })
    }

    /// `frrdown`: symmetric, selects currently-OFF devices to turn ON.
    async fn select_on(devices: &[LoadDevice], need_watts: f64, bus: &dyn SensorBus) -> Option<ToolAction> {
        let mut candidates = Vec::new();
        for d in devices.iter().filter(|d| d.scheduling_enabled) {
            if !Self::is_on(bus, &d.entity_id).await {
                candidates.push(d);
            }
        }
        candidates.sort_by(|a, b| b.estimated_power_watts.partial_cmp(&a.estimated_power_watts).unwrap());

        let picked = Self::greedy_undershoot(&candidates, need_watts);
        if picked.is_empty() {
            return None;
        }
        Some(ToolAction::LoadSwitch {
            devices: picked.iter().map(|d| d.name.clone()).collect(),
            turn_on: true,
            reason: format!("frrdown: absorbing {need_watts:.0}W of import need"),
        })
    }

    /// A device with no readable current state is treated as off, so
    /// `frrup` skips it (nothing to switch off) and `frrdown` still
    /// considers it a candidate to switch on.
    async fn is_on(bus: &dyn SensorBus, entity_id: &str) -> bool {
        match bus.read(entity_id).await {
            Ok(RawValue::Bool(b)) => b,
            Ok(RawValue::Numeric(n)) => n != 0.0,
            Ok(RawValue::Text(s)) => s.eq_ignore_ascii_case("on") || s == "1",
            Err(_) => false,
        }
    }

    /// spec.md §4.6 "commitment honored: weather-adjusted devices require
    /// their minimum slots already delivered" — approximated here as "has
    /// already delivered at least as many ON slots as a non-weather device
    /// in PERIOD mode would owe", so the fast-trigger/mFRR path never undoes
    /// a heating commitment mid-day.
    fn weather_commitment_unmet(device: &LoadDevice) -> bool {
        if !device.weather_adjustment {
            return false;
        }
        let owed = device.desired_on_hours.unwrap_or(0.0) * 4.0;
        (device.count_on_slots() as f64) < owed
    }

    fn greedy_undershoot<'a>(candidates: &[&'a LoadDevice], need_watts: f64) -> Vec<&'a LoadDevice> {
        let mut remaining = need_watts;
        let mut picked = Vec::new();
        for &d in candidates {
            if remaining <= 0.0 {
                break;
            }
            if d.estimated_power_watts <= remaining || picked.is_empty() {
                picked.push(d);
                remaining -= d.estimated_power_watts;
            }
        }
        picked
    }
}

/// spec.md §4.9 "Heating state transition" + "Heating protection interlock":
/// forces the discharge limit to zero and cancels any active forced-
/// discharge immediately, bypassing cooldown (this is a safety interlock,
/// not ordinary balancing).
pub async fn enforce_heating_interlock(
    inverter: &dyn InverterClient,
    device_id: &str,
    discharging_rate_limit: &mut f64,
) {
    if *discharging_rate_limit != 0.0 {
        warn!("heating active: forcing discharging_rate_limit to 0 and stopping any forced-discharge");
        *discharging_rate_limit = 0.0;
        inverter.set_number("discharging_rate_limit", 0.0).await.ok();
        inverter.stop_forcible_charge(device_id).await.ok();
    }
}

/// Logged once per `actions enabled -> disabled` transition (spec.md §4.9
/// step 1) rather than every skipped cycle.
pub fn log_actions_disabled_once(was_enabled: bool) {
    if was_enabled {
        info!("actions disabled, PBC will skip cycles until re-enabled");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use crate::hardware::simulated::SimulatedHardware;

    fn cfg() -> ControllerConfig {
        ControllerConfig {
            tick_seconds: 10,
            fast_trigger_minimum_interval_seconds: 10,
            fast_trigger_threshold_watts: -300.0,
            forced_charge_discharge_cooldown_seconds: 5,
            charging_adjustment_export_cooldown_seconds: 3,
            minimum_charging_change_watts: 10.0,
            minimum_export_change_watts: 200.0,
            minimum_discharge_change_watts: 10.0,
            max_battery_power: 5000.0,
            max_feed_grid_power: 8800.0,
            battery_soc_minimum_for_discharging: 6.0,
            battery_soc_maximum_for_charging: 100.0,
            qw_powerlimit: 2600.0,
            debug: false,
        }
    }

    fn state(forced_power_flow: f64, battery_power: f64) -> SystemState {
        SystemState {
            phases: [0.0, 0.0, 0.0],
            battery_soc: 50.0,
            battery_power,
            solar_input: 0.0,
            charging_rate_limit: 5000.0,
            discharging_rate_limit: 5000.0,
            forced_power_flow,
            heating_active: false,
            boiler_active: false,
            timestamp: 0,
        }
    }

    #[tokio::test]
    async fn forced_discharge_emits_action_when_realized() {
        let hw = Arc::new(SimulatedHardware::new());
        let clock = FakeClock::new(1000);
        let mut tool = ForcedDischargingTool::new(hw.clone(), "inv1");
        let mut limit = 5000.0;
        let s = state(0.0, 0.0);
        let action = tool.execute(&s, 1800.0, &mut limit, &cfg(), clock.as_ref(), false, false, "test").await.unwrap();
        assert!(matches!(action, Some(ToolAction::ForcedDischarge { target_watts, .. }) if target_watts == 1800.0));
    }

    #[tokio::test]
    async fn forced_discharge_suppressed_when_not_realized_then_overridden_on_fourth_attempt() {
        let hw = Arc::new(SimulatedHardware::new());
        let clock = FakeClock::new(1000);
        let mut tool = ForcedDischargingTool::new(hw.clone(), "inv1");
        let mut limit = 5000.0;

        // Prior command of 1800W far from observed battery_power: not realized.
        let mismatched = state(1800.0, 0.0);
        for i in 0..3 {
            clock.advance(10);
            let res = tool.execute(&mismatched, 1900.0, &mut limit, &cfg(), clock.as_ref(), false, false, "test").await;
            assert!(res.is_err(), "attempt {i} should be suppressed");
        }
        clock.advance(10);
        let res = tool.execute(&mismatched, 1900.0, &mut limit, &cfg(), clock.as_ref(), false, false, "test").await;
        assert!(res.is_ok(), "4th attempt should override");
    }

    #[tokio::test]
    async fn cooldown_blocks_repeat_command_within_window() {
        let hw = Arc::new(SimulatedHardware::new());
        let clock = FakeClock::new(1000);
        let mut tool = ChargingAdjustmentTool::new(hw.clone(), "number.charging_rate_limit");
        tool.execute(0.0, 500.0, &cfg(), clock.as_ref(), "r").await.unwrap();
        clock.advance(1);
        let res = tool.execute(500.0, 1000.0, &cfg(), clock.as_ref(), "r").await;
        assert!(matches!(res, Err(ControllerError::Cooldown { .. })));
    }

    #[tokio::test]
    async fn charging_adjustment_skips_below_min_change() {
        let hw = Arc::new(SimulatedHardware::new());
        let clock = FakeClock::new(1000);
        let mut tool = ChargingAdjustmentTool::new(hw.clone(), "number.charging_rate_limit");
        let action = tool.execute(100.0, 105.0, &cfg(), clock.as_ref(), "r").await.unwrap();
        assert!(action.is_none());
    }

    #[tokio::test]
    async fn export_limitation_resets_at_or_above_max() {
        let hw = Arc::new(SimulatedHardware::new());
        let clock = FakeClock::new(1000);
        let mut tool = ExportLimitationTool::new(hw.clone(), "inv1");
        tool.execute(None, 8800.0, &cfg(), clock.as_ref(), "r").await.unwrap();
        assert_eq!(hw.feed_grid_limit(), None);
    }

    fn device(name: &str, watts: f64) -> LoadDevice {
        LoadDevice {
            name: name.into(),
            entity_id: format!("switch.{name}"),
            switch_endpoint: "http://sw.local".into(),
            estimated_power_watts: watts,
            scheduling_enabled: true,
            schedule_mode: crate::domain::device::ScheduleMode::Threshold,
            desired_on_hours: None,
            period_hours: None,
            min_price_rank: None,
            max_price_rank: Some(50.0),
            weather_adjustment: false,
            heating_curve: None,
            power_factor: 0.5,
            inverted_logic: false,
            always_on_hours: vec![],
            always_off_hours: vec![],
            always_on_price: None,
            energy_debt: 0.0,
            recovery_window_hours: 4.0,
            max_recovery_price: None,
            max_energy_debt: 120.0,
            scheduled_slots: [false; crate::domain::price::SLOTS_PER_DAY],
            schedule_ids: vec![],
        }
    }

    #[tokio::test]
    async fn load_switching_selects_devices_undershooting_need() {
        let hw = SimulatedHardware::new();
        hw.set_sensor("switch.boiler", RawValue::Bool(true));
        hw.set_sensor("switch.heater", RawValue::Bool(true));
        hw.set_sensor("switch.fan", RawValue::Bool(true));
        let devices = vec![device("boiler", 2000.0), device("heater", 1500.0), device("fan", 300.0)];
        let action = LoadSwitchingTool::select(Mode::Frrup, -2200.0, &devices, &hw).await.unwrap();
        match action {
            ToolAction::LoadSwitch { devices, turn_on, .. } => {
                assert!(!turn_on);
                assert!(devices.contains(&"boiler".to_string()) || devices.contains(&"heater".to_string()));
            }
            _ => panic!("expected LoadSwitch"),
        }
    }

    #[tokio::test]
    async fn load_switching_returns_none_for_wrong_direction() {
        let hw = SimulatedHardware::new();
        let devices = vec![device("boiler", 2000.0)];
        assert!(LoadSwitchingTool::select(Mode::Frrup, 500.0, &devices, &hw).await.is_none());
    }

    #[tokio::test]
    async fn load_switching_skips_already_off_device_for_frrup() {
        let hw = SimulatedHardware::new();
        hw.set_sensor("switch.boiler", RawValue::Bool(false));
        let devices = vec![device("boiler", 2000.0)];
        assert!(LoadSwitchingTool::select(Mode::Frrup, -2200.0, &devices, &hw).await.is_none());
    }

    #[tokio::test]
    async fn load_switching_skips_already_on_device_for_frrdown() {
        let hw = SimulatedHardware::new();
        hw.set_sensor("switch.boiler", RawValue::Bool(true));
        let devices = vec![device("boiler", 2000.0)];
        assert!(LoadSwitchingTool::select(Mode::Frrdown, 2200.0, &devices, &hw).await.is_none());
    }
}
