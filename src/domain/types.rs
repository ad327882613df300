#![allow(dead_code)]
//! Core value types shared by the phase-balancing control loop: operating
//! mode, mode source, the per-cycle system snapshot, the controller's desired
//! output, and the actuator action sum type.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// Operating mode, set externally (market signal / manual override / optimizer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Mode {
    Normal,
    Limitexport,
    Pvsell,
    Nobattery,
    Savebattery,
    Buy,
    Sell,
    Frrup,
    Frrdown,
}

impl Mode {
    /// `mFRR` modes are only reachable from the grid operator's own source tag.
    pub fn is_mfrr(self) -> bool {
        matches!(self, Mode::Frrup | Mode::Frrdown)
    }
}

/// Who requested the current mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Source {
    Timer,
    Notimer,
    Optimizer,
    Manual,
    Kratt,
}

impl Source {
    /// §3: `kratt` is the only valid source for the two mFRR modes, and is
    /// invalid for every other mode.
    pub fn is_valid_for(self, mode: Mode) -> bool {
        match self {
            Source::Kratt => mode.is_mfrr(),
            _ => !mode.is_mfrr(),
        }
    }
}

/// A snapshot of the inverter/house read at the start of a PBC cycle (§3).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SystemState {
    pub phases: [f64; 3],
    pub battery_soc: f64,
    pub battery_power: f64,
    pub solar_input: f64,
    pub charging_rate_limit: f64,
    pub discharging_rate_limit: f64,
    pub forced_power_flow: f64,
    pub heating_active: bool,
    pub boiler_active: bool,
    /// Monotonic seconds, used only for cooldown/interval arithmetic.
    pub timestamp: i64,
}

impl SystemState {
    pub fn most_negative(&self) -> f64 {
        self.phases.iter().cloned().fold(f64::INFINITY, f64::min)
    }

    pub fn total_grid_flow(&self) -> f64 {
        self.phases.iter().sum()
    }
}

/// A constraint flagged while computing a `DesiredState` (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Constraint {
    BatterySocTooLow,
    HeatingActive,
    BoilerOutsideHours,
    BoilerDaytime,
}

/// The battery/export adjustment the State Engine wants applied this cycle (§3).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct EnergyFlow {
    /// Watts, signed; positive = increase charging / reduce discharging (surplus).
    pub battery_flow_change: f64,
    pub export_limit: Option<f64>,
}

/// Output of the State Engine (§4.8): what the PBC orchestrator should try to
/// realize this cycle, and why.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DesiredState {
    pub target_phase: f64,
    pub energy_flow: EnergyFlow,
    pub range_low: Option<f64>,
    pub range_high: Option<f64>,
    pub constraints: HashSet<Constraint>,
    pub reasoning: String,
}

/// A closed sum type for the six actuator tools (§9 "Tagged variant for
/// actions"), so the executor pattern-matches instead of dispatching on
/// strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ToolAction {
    ChargingAdjust { target_watts: f64, reason: String },
    ForcedCharge { target_watts: f64, mode_transition: bool, reason: String },
    ForcedDischarge { target_watts: f64, emergency: bool, mode_transition: bool, reason: String },
    ExportLimit { target_watts: f64, reason: String },
    DischargeLimit { target_watts: f64, reason: String },
    LoadSwitch { devices: Vec<String>, turn_on: bool, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn mode_parses_case_insensitively_lowercase() {
        assert_eq!(Mode::from_str("frrup").unwrap(), Mode::Frrup);
        assert_eq!(Mode::from_str("normal").unwrap(), Mode::Normal);
    }

    #[test]
    fn kratt_only_valid_for_mfrr_modes() {
        assert!(Source::Kratt.is_valid_for(Mode::Frrup));
        assert!(Source::Kratt.is_valid_for(Mode::Frrdown));
        assert!(!Source::Kratt.is_valid_for(Mode::Normal));
        assert!(!Source::Optimizer.is_valid_for(Mode::Frrup));
        assert!(Source::Optimizer.is_valid_for(Mode::Normal));
    }

    #[test]
    fn most_negative_picks_minimum_phase() {
        let s = SystemState {
            phases: [200.0, -400.0, 50.0],
            battery_soc: 50.0,
            battery_power: 0.0,
            solar_input: 0.0,
            charging_rate_limit: 5000.0,
            discharging_rate_limit: 5000.0,
            forced_power_flow: 0.0,
            heating_active: false,
            boiler_active: false,
            timestamp: 0,
        };
        assert_eq!(s.most_negative(), -400.0);
        assert_eq!(s.total_grid_flow(), -150.0);
    }
}
