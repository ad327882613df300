//! C8 State Engine (spec.md §4.8): turns a `SystemState` snapshot plus the
//! active mode into a `DesiredState` the orchestrator tries to realize.

use crate::config::ControllerConfig;
use crate::domain::types::{Constraint, DesiredState, EnergyFlow, Mode, SystemState};

/// spec.md §4.8's deadband for the mFRR flow formulas.
const FRR_DEADBAND_WATTS: f64 = 15.0;

/// spec.md §4.8, steps 1-6. Returns `None` if `phase_target` is unavailable
/// (the orchestrator then skips the cycle, per §4.9 step 4).
#[allow(clippy::too_many_arguments)]
pub fn compute_desired_state(
    state: &SystemState,
    mode: Mode,
    cfg: &ControllerConfig,
    phase_target: Option<f64>,
    range_low: Option<f64>,
    range_high: Option<f64>,
    local_hour: u8,
) -> Option<DesiredState> {
    let target_phase = phase_target?;
    let most_negative = state.most_negative();

    // Step 2: within the configured dead range, no adjustment needed.
    if let (Some(lo), Some(hi)) = (range_low, range_high) {
        if most_negative >= lo && most_negative <= hi {
            return Some(DesiredState {
                target_phase,
                energy_flow: EnergyFlow::default(),
                range_low,
                range_high,
                constraints: Default::default(),
                reasoning: "most negative phase within configured range".into(),
            });
        }
    }

    // Step 3.
    let power_balance = most_negative - target_phase;
    let total_power_adjustment = 3.0 * power_balance;

    // Step 4: constraint flags.
    let mut constraints = std::collections::HashSet::new();
    if state.battery_soc < cfg.battery_soc_minimum_for_discharging {
        constraints.insert(Constraint::BatterySocTooLow);
    }
    if state.heating_active {
        constraints.insert(Constraint::HeatingActive);
    }
    if state.boiler_active {
        if (7..22).contains(&local_hour) {
            constraints.insert(Constraint::BoilerDaytime);
        } else {
            constraints.insert(Constraint::BoilerOutsideHours);
        }
    }

    // Step 5: mode-specific flow.
    let mut battery_flow_change = match mode {
        Mode::Buy => -cfg.qw_powerlimit.abs(),
        Mode::Sell => cfg.qw_powerlimit.abs(),
        Mode::Frrup => frr_flow(state, cfg.qw_powerlimit.abs()),
        Mode::Frrdown => frr_flow(state, -cfg.qw_powerlimit.abs()),
        Mode::Nobattery | Mode::Savebattery => 0.0,
        Mode::Pvsell => -(-total_power_adjustment).max(0.0),
        Mode::Limitexport | Mode::Normal => total_power_adjustment,
    };

    let mut export_limit = None;

    // Step 6: constraint application, skipped for mFRR modes (spec.md §4.8:
    // grid-operator-commanded flows are never throttled locally). Both
    // remaining constraints block the discharge direction (negative flow)
    // and leave the charge direction (positive flow) untouched, matching
    // each rule's "...but charging/allowed" qualifier; see DESIGN.md for why
    // this reading was chosen over the literal sign text.
    if !mode.is_mfrr() {
        if constraints.contains(&Constraint::BatterySocTooLow) && battery_flow_change < 0.0 {
            battery_flow_change = 0.0;
        }
        if (constraints.contains(&Constraint::HeatingActive) || constraints.contains(&Constraint::BoilerOutsideHours))
            && battery_flow_change < 0.0
        {
            battery_flow_change = 0.0;
        }
    }

    if matches!(mode, Mode::Pvsell | Mode::Limitexport) {
        export_limit = Some(cfg.max_feed_grid_power);
    }

    Some(DesiredState {
        target_phase,
        energy_flow: EnergyFlow { battery_flow_change, export_limit },
        range_low,
        range_high,
        constraints,
        reasoning: format!("mode={mode:?} power_balance={power_balance:.1}W"),
    })
}

/// spec.md §4.8's frrup/frrdown formula: drive `total_grid_flow` toward
/// `target`, deadbanded at ±15W, expressed in the chosen surplus-positive
/// `battery_flow_change` sign.
fn frr_flow(state: &SystemState, target: f64) -> f64 {
    let adjustment = target - state.total_grid_flow();
    if adjustment.abs() <= FRR_DEADBAND_WATTS {
        0.0
    } else {
        -adjustment
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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

    fn state(phases: [f64; 3], soc: f64) -> SystemState {
        SystemState {
            phases,
            battery_soc: soc,
            battery_power: 0.0,
            solar_input: 0.0,
            charging_rate_limit: 5000.0,
            discharging_rate_limit: 5000.0,
            forced_power_flow: 0.0,
            heating_active: false,
            boiler_active: false,
            timestamp: 0,
        }
    }

    #[test]
    fn within_range_yields_zero_flow() {
        let s = state([100.0, 200.0, 300.0], 50.0);
        let ds = compute_desired_state(&s, Mode::Normal, &cfg(), Some(0.0), Some(-50.0), Some(150.0), 12).unwrap();
        assert_eq!(ds.energy_flow.battery_flow_change, 0.0);
    }

    #[test]
    fn missing_phase_target_returns_none() {
        let s = state([100.0, 200.0, 300.0], 50.0);
        assert!(compute_desired_state(&s, Mode::Normal, &cfg(), None, None, None, 12).is_none());
    }

    #[test]
    fn normal_mode_flow_is_three_times_power_balance() {
        let s = state([-100.0, 200.0, 300.0], 50.0);
        let ds = compute_desired_state(&s, Mode::Normal, &cfg(), Some(0.0), None, None, 12).unwrap();
        assert_eq!(ds.energy_flow.battery_flow_change, -300.0);
    }

    #[test]
    fn battery_soc_too_low_blocks_discharge_direction_only() {
        let s = state([-500.0, 200.0, 300.0], 3.0);
        let ds = compute_desired_state(&s, Mode::Normal, &cfg(), Some(0.0), None, None, 12).unwrap();
        assert!(ds.constraints.contains(&Constraint::BatterySocTooLow));
        assert_eq!(ds.energy_flow.battery_flow_change, 0.0);
    }

    #[test]
    fn mfrr_modes_ignore_constraints() {
        let mut s = state([0.0, 0.0, 0.0], 3.0);
        s.heating_active = true;
        let ds = compute_desired_state(&s, Mode::Frrup, &cfg(), Some(0.0), None, None, 12).unwrap();
        assert_ne!(ds.energy_flow.battery_flow_change, 0.0);
    }

    #[test]
    fn frr_within_deadband_yields_zero() {
        let s = state([cfg().qw_powerlimit / 3.0, cfg().qw_powerlimit / 3.0, cfg().qw_powerlimit / 3.0], 50.0);
        let ds = compute_desired_state(&s, Mode::Frrup, &cfg(), Some(0.0), None, None, 12).unwrap();
        assert_eq!(ds.energy_flow.battery_flow_change, 0.0);
    }

    #[test]
    fn buy_and_sell_use_qw_powerlimit() {
        let s = state([0.0, 0.0, 0.0], 50.0);
        let buy = compute_desired_state(&s, Mode::Buy, &cfg(), Some(0.0), None, None, 12).unwrap();
        let sell = compute_desired_state(&s, Mode::Sell, &cfg(), Some(0.0), None, None, 12).unwrap();
        assert_eq!(buy.energy_flow.battery_flow_change, -2600.0);
        assert_eq!(sell.energy_flow.battery_flow_change, 2600.0);
    }

    #[test]
    fn boiler_outside_hours_flagged_by_local_hour() {
        let mut s = state([0.0, 0.0, 0.0], 50.0);
        s.boiler_active = true;
        let night = compute_desired_state(&s, Mode::Normal, &cfg(), Some(0.0), None, None, 23).unwrap();
        let day = compute_desired_state(&s, Mode::Normal, &cfg(), Some(0.0), None, None, 10).unwrap();
        assert!(night.constraints.contains(&Constraint::BoilerOutsideHours));
        assert!(day.constraints.contains(&Constraint::BoilerDaytime));
    }
}
