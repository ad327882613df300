//! C7 Mode Manager (spec.md §4.7): maps the external mode/source pair to
//! per-mode initial state, and owns the tool-sequence table consulted by
//! the orchestrator (§4.9 step 10-11).

use tracing::warn;

use crate::config::ControllerConfig;
use crate::domain::types::{Mode, Source, ToolAction};
use crate::error::ControllerError;

/// Whether to change a limit or leave it as-is (spec.md §4.7 "keep").
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LimitAction {
    Keep,
    SetTo(f64),
}

/// What a mode's initial state does to the forced-charge/discharge path.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ForcedInitial {
    Stop,
    StopThenForceCharge(f64),
    StopThenForceDischarge(f64),
}

/// spec.md §4.7's per-mode initial-state table, applied once per transition.
#[derive(Debug, Clone, Copy)]
pub struct ModeInitialState {
    pub export_limit: LimitAction,
    pub charging_limit: f64,
    pub discharge_limit: f64,
    pub forced: ForcedInitial,
}

/// §4.7's initial-state table. `max` means `max_battery_power` for battery
/// limits, `max_feed_grid_power` for export.
pub fn initial_state(mode: Mode, cfg: &ControllerConfig) -> ModeInitialState {
    let max_batt = cfg.max_battery_power;
    let max_export = cfg.max_feed_grid_power;
    use ForcedInitial::*;
    use LimitAction::*;
    match mode {
        Mode::Normal => ModeInitialState { export_limit: SetTo(max_export), charging_limit: max_batt, discharge_limit: max_batt, forced: Stop },
        Mode::Limitexport => ModeInitialState { export_limit: Keep, charging_limit: max_batt, discharge_limit: max_batt, forced: Stop },
        Mode::Pvsell => ModeInitialState { export_limit: SetTo(max_export), charging_limit: 0.0, discharge_limit: max_batt, forced: Stop },
        Mode::Nobattery => ModeInitialState { export_limit: SetTo(max_export), charging_limit: max_batt, discharge_limit: 0.0, forced: Stop },
        Mode::Savebattery => ModeInitialState { export_limit: SetTo(max_export), charging_limit: max_batt, discharge_limit: 0.0, forced: Stop },
        Mode::Buy => ModeInitialState { export_limit: SetTo(max_export), charging_limit: max_batt, discharge_limit: max_batt, forced: StopThenForceCharge(cfg.qw_powerlimit) },
        Mode::Sell => ModeInitialState { export_limit: SetTo(max_export), charging_limit: max_batt, discharge_limit: max_batt, forced: StopThenForceDischarge(cfg.qw_powerlimit) },
        Mode::Frrup => ModeInitialState { export_limit: SetTo(max_export), charging_limit: max_batt, discharge_limit: max_batt, forced: Stop },
        Mode::Frrdown => ModeInitialState { export_limit: SetTo(max_export), charging_limit: max_batt, discharge_limit: max_batt, forced: Stop },
    }
}

/// A single actuator tool, named independently of `ToolAction` so the
/// sequence table can be consulted before any watt values are known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    ChargingAdjustment,
    ForcedDischarging,
    ForcedCharging,
    ExportLimitation,
    DischargeLimitation,
    LoadSwitching,
}

/// §4.7's tool-sequence table, in deficit order. Surplus sequences are the
/// reverse, applied by `ordered_sequence`.
fn tool_sequence(mode: Mode) -> &'static [ToolKind] {
    use ToolKind::*;
    match mode {
        Mode::Normal => &[ChargingAdjustment, ForcedDischarging],
        Mode::Limitexport => &[ChargingAdjustment, ExportLimitation, ForcedDischarging],
        Mode::Pvsell => &[ChargingAdjustment, ForcedDischarging],
        Mode::Nobattery => &[ForcedDischarging, ChargingAdjustment],
        Mode::Savebattery => &[ChargingAdjustment, ForcedDischarging],
        Mode::Buy => &[ForcedCharging],
        Mode::Sell => &[ForcedDischarging],
        Mode::Frrup => &[LoadSwitching, ChargingAdjustment, ForcedDischarging],
        Mode::Frrdown => &[LoadSwitching, DischargeLimitation, ChargingAdjustment, ForcedCharging],
    }
}

/// spec.md §4.9 step 10-11: deficit order as tabulated, surplus reversed.
pub fn ordered_sequence(mode: Mode, surplus: bool) -> Vec<ToolKind> {
    let seq = tool_sequence(mode);
    if surplus {
        seq.iter().rev().copied().collect()
    } else {
        seq.to_vec()
    }
}

/// Result of `handle_mode_change`: whether this cycle is a fresh transition,
/// and what to apply/execute immediately if so.
#[derive(Debug, Clone)]
pub struct ModeTransition {
    pub transitioned: bool,
    pub initial_state: Option<ModeInitialState>,
    /// spec.md §4.7 "for buy/sell immediately invokes the primary tool at
    /// qw_powerlimit (bypassing realization gate and cooldown)".
    pub immediate_action: Option<ToolAction>,
}

/// C7: tracks the current `(mode, source)` pair and de-duplicates
/// `ModeUnknownOrSourceMismatch` logging per distinct pair (SPEC_FULL.md §F),
/// rather than once per cycle.
pub struct ModeManager {
    current: Option<(Mode, Source)>,
    last_rejected: Option<(Mode, Source)>,
}

impl ModeManager {
    pub fn new() -> Self {
        Self { current: None, last_rejected: None }
    }

    /// spec.md §3 + §7 `ModeUnknownOrSourceMismatch`: logs once per distinct
    /// `(mode, source)` pair, not once per cycle.
    pub fn validate_source(&mut self, mode: Mode, source: Source) -> Result<(), ControllerError> {
        if source.is_valid_for(mode) {
            Ok(())
        } else {
            let pair = (mode, source);
            if self.last_rejected != Some(pair) {
                warn!(?mode, ?source, "mode/source combination invalid, skipping cycle");
                self.last_rejected = Some(pair);
            }
            Err(ControllerError::ModeSourceMismatch { mode, source })
        }
    }

    pub fn current_mode(&self) -> Option<Mode> {
        self.current.map(|(m, _)| m)
    }

    /// spec.md §4.7 `handle_mode_change`: detects a change vs the current
    /// pair, and if changed, returns the initial state to apply plus any
    /// immediate buy/sell action.
    pub fn handle_mode_change(&mut self, mode: Mode, source: Source, cfg: &ControllerConfig) -> ModeTransition {
        let pair = (mode, source);
        let changed = self.current != Some(pair);
        self.current = Some(pair);

        if !changed {
            return ModeTransition { transitioned: false, initial_state: None, immediate_action: None };
        }

        let initial = initial_state(mode, cfg);
        let immediate_action = match initial.forced {
            ForcedInitial::StopThenForceCharge(target) => {
                Some(ToolAction::ForcedCharge { target_watts: target.abs(), mode_transition: true, reason: "buy mode entry".into() })
            }
            ForcedInitial::StopThenForceDischarge(target) => {
                Some(ToolAction::ForcedDischarge { target_watts: target.abs(), emergency: false, mode_transition: true, reason: "sell mode entry".into() })
            }
            ForcedInitial::Stop => None,
        };

        ModeTransition { transitioned: true, initial_state: Some(initial), immediate_action }
    }
}

impl Default for ModeManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

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

    #[rstest]
    #[case(Mode::Normal, 5000.0, 5000.0)]
    #[case(Mode::Pvsell, 0.0, 5000.0)]
    #[case(Mode::Nobattery, 5000.0, 0.0)]
    #[case(Mode::Savebattery, 5000.0, 0.0)]
    fn initial_state_matches_table(#[case] mode: Mode, #[case] charge: f64, #[case] discharge: f64) {
        let state = initial_state(mode, &cfg());
        assert_eq!(state.charging_limit, charge);
        assert_eq!(state.discharge_limit, discharge);
    }

    #[test]
    fn limitexport_keeps_export_limit() {
        let state = initial_state(Mode::Limitexport, &cfg());
        assert_eq!(state.export_limit, LimitAction::Keep);
    }

    #[test]
    fn buy_mode_entry_issues_immediate_forced_charge() {
        let mut mm = ModeManager::new();
        let t = mm.handle_mode_change(Mode::Buy, Source::Timer, &cfg());
        assert!(t.transitioned);
        match t.immediate_action {
            Some(ToolAction::ForcedCharge { target_watts, mode_transition, .. }) => {
                assert_eq!(target_watts, 2600.0);
                assert!(mode_transition);
            }
            other => panic!("expected ForcedCharge, got {other:?}"),
        }
    }

    #[test]
    fn repeated_mode_source_pair_is_not_a_transition() {
        let mut mm = ModeManager::new();
        assert!(mm.handle_mode_change(Mode::Normal, Source::Timer, &cfg()).transitioned);
        assert!(!mm.handle_mode_change(Mode::Normal, Source::Timer, &cfg()).transitioned);
    }

    #[test]
    fn surplus_sequence_is_reverse_of_deficit() {
        let deficit = ordered_sequence(Mode::Limitexport, false);
        let surplus = ordered_sequence(Mode::Limitexport, true);
        assert_eq!(deficit, vec![ToolKind::ChargingAdjustment, ToolKind::ExportLimitation, ToolKind::ForcedDischarging]);
        assert_eq!(surplus, vec![ToolKind::ForcedDischarging, ToolKind::ExportLimitation, ToolKind::ChargingAdjustment]);
    }

    #[test]
    fn invalid_source_rejected_and_deduped() {
        let mut mm = ModeManager::new();
        assert!(mm.validate_source(Mode::Frrup, Source::Optimizer).is_err());
        // Second identical rejection should not re-log (behavior verified via coverage, not output capture).
        assert!(mm.validate_source(Mode::Frrup, Source::Optimizer).is_err());
        assert!(mm.validate_source(Mode::Frrup, Source::Kratt).is_ok());
    }
}
