#![allow(dead_code)]
//! `LoadDevice` and its scheduling-mode variants (spec.md §3).

use serde::{Deserialize, Serialize};

use super::price::SLOTS_PER_DAY;

/// How a device's on/off slots are decided (spec.md §3, §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleMode {
    /// Cheapest `desired_on_hours` out of every `period_hours` window.
    Period,
    /// Any slot whose price rank is at or below `max_price_rank`.
    Threshold,
}

/// A deferrable AC load the Load-Scheduling Engine schedules against
/// day-ahead prices and, optionally, a weather-driven heating curve
/// (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadDevice {
    pub name: String,
    pub entity_id: String,
    pub switch_endpoint: String,
    pub estimated_power_watts: f64,
    pub scheduling_enabled: bool,
    pub schedule_mode: ScheduleMode,

    /// PERIOD mode only: hours to keep on out of `period_hours`.
    pub desired_on_hours: Option<f64>,
    /// PERIOD mode only: repeat window length, must divide 24.
    pub period_hours: Option<f64>,

    /// THRESHOLD mode only (and an additional PERIOD filter when set):
    /// percentile rank bounds applied via `get_cheapest_slots`'s
    /// `min_rank`/`max_rank` (`<` / `>` respectively — spec.md §9).
    pub min_price_rank: Option<f64>,
    pub max_price_rank: Option<f64>,

    /// PERIOD mode only: scale `desired_on_hours` by forecast heating demand.
    /// Valid only alongside `ScheduleMode::Period` (spec.md §3).
    pub weather_adjustment: bool,
    /// Scalar bias into `weather::required_slots`, range −4.0..+8.0 (spec.md §3).
    pub heating_curve: Option<f64>,

    /// Weight applied to the heating-hours formula before converting to
    /// slots (spec.md §3, §4.3); defaults to 0.5.
    pub power_factor: f64,
    /// When true, the physical switch is active-low: `turn_on` sends the
    /// "off" command and vice versa.
    pub inverted_logic: bool,

    /// Hours forced on regardless of price (`always_on` dominates the
    /// schedule unless also in `always_off_hours`).
    pub always_on_hours: Vec<u8>,
    /// Hours forced off regardless of price; always wins over `always_on`.
    pub always_off_hours: Vec<u8>,
    /// THRESHOLD mode escape hatch: force on below this absolute price
    /// regardless of rank.
    pub always_on_price: Option<f64>,

    /// Accumulated owed run-minutes from slots the device should have run
    /// but didn't (heating interlock, manual override, switch failure).
    #[serde(default)]
    pub energy_debt: f64,
    /// How many hours of future slots the tracker may use to recover debt.
    pub recovery_window_hours: f64,
    /// Debt recovery only uses slots priced at/under this rank.
    pub max_recovery_price: Option<f64>,
    /// Upper clamp for `energy_debt` (spec.md §4.5).
    #[serde(default = "default_max_energy_debt")]
    pub max_energy_debt: f64,

    /// The materialized on/off schedule for the current day, one bool per
    /// 15-minute slot.
    #[serde(default = "default_schedule", with = "schedule_serde")]
    pub scheduled_slots: [bool; SLOTS_PER_DAY],
    /// Opaque scheduler-assigned ids for the slots currently scheduled on,
    /// used to detect when a re-run actually changed anything.
    #[serde(default)]
    pub schedule_ids: Vec<String>,
}

fn default_schedule() -> [bool; SLOTS_PER_DAY] {
    [false; SLOTS_PER_DAY]
}

fn default_max_energy_debt() -> f64 {
    120.0
}

/// `[bool; 96]` has no native serde impl; encode as a `Vec<bool>` on the wire.
mod schedule_serde {
    use super::SLOTS_PER_DAY;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(slots: &[bool; SLOTS_PER_DAY], s: S) -> Result<S::Ok, S::Error> {
        slots.to_vec().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[bool; SLOTS_PER_DAY], D::Error> {
        let v: Vec<bool> = Vec::deserialize(d)?;
        let mut out = [false; SLOTS_PER_DAY];
        for (i, b) in v.into_iter().take(SLOTS_PER_DAY).enumerate() {
            out[i] = b;
        }
        Ok(out)
    }
}

impl LoadDevice {
    pub fn count_on_slots(&self) -> usize {
        self.scheduled_slots.iter().filter(|&&s| s).count()
    }

    /// §3 invariant: devices in THRESHOLD mode never carry a PERIOD-only
    /// `desired_on_hours`/`period_hours` pair.
    pub fn is_period_mode(&self) -> bool {
        self.schedule_mode == ScheduleMode::Period
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_device() -> LoadDevice {
        LoadDevice {
            name: "water_heater".into(),
            entity_id: "switch.water_heater".into(),
            switch_endpoint: "http://switch.local/water_heater".into(),
            estimated_power_watts: 2000.0,
            scheduling_enabled: true,
            schedule_mode: ScheduleMode::Period,
            desired_on_hours: Some(4.0),
            period_hours: Some(24.0),
            min_price_rank: None,
            max_price_rank: None,
            weather_adjustment: false,
            heating_curve: None,
            power_factor: 1.0,
            inverted_logic: false,
            always_on_hours: vec![],
            always_off_hours: vec![],
            always_on_price: None,
            energy_debt: 0.0,
            recovery_window_hours: 6.0,
            max_recovery_price: None,
            max_energy_debt: 120.0,
            scheduled_slots: [false; SLOTS_PER_DAY],
            schedule_ids: vec![],
        }
    }

    #[test]
    fn count_on_slots_counts_true_entries() {
        let mut d = base_device();
        d.scheduled_slots[0] = true;
        d.scheduled_slots[50] = true;
        assert_eq!(d.count_on_slots(), 2);
    }

    #[test]
    fn schedule_round_trips_through_json() {
        let mut d = base_device();
        d.scheduled_slots[3] = true;
        let json = serde_json::to_string(&d).unwrap();
        let back: LoadDevice = serde_json::from_str(&json).unwrap();
        assert!(back.scheduled_slots[3]);
        assert!(!back.scheduled_slots[4]);
    }
}
