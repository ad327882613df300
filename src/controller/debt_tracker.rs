//! C5 Energy-Debt Tracker (spec.md §4.5): runs once per minute, accrues or
//! pays back `energy_debt` against the day's materialized schedule, and
//! opportunistically recovers debt in later cheap unscheduled slots.

use chrono::{DateTime, FixedOffset};
use tracing::{info, warn};

use crate::domain::device::LoadDevice;
use crate::domain::price::PriceSlot;
use crate::domain::types::Mode;
use crate::hardware::{RawValue, SensorBus, SwitchClient};
use crate::repo::{PersistenceStore, RecoveryEntry};

/// One device's outcome this minute, surfaced for logging/tests.
#[derive(Debug, Clone, PartialEq)]
pub enum DebtOutcome {
    Accrued { device: String, new_debt: f64 },
    PaidBack { device: String, new_debt: f64 },
    Recovered { device: String, slot_index: u8, price: f64 },
}

fn raw_to_bool(raw: &RawValue) -> bool {
    match raw {
        RawValue::Bool(b) => *b,
        RawValue::Numeric(n) => *n != 0.0,
        RawValue::Text(s) => s.eq_ignore_ascii_case("on") || s == "1",
    }
}

/// spec.md §4.5: `current_slot_idx = floor((now - window_start_22_00)/15min)`.
/// Returns `None` when outside `[0, 96)` ("do nothing").
pub fn current_slot_idx(now: DateTime<FixedOffset>, window_start: DateTime<FixedOffset>) -> Option<usize> {
    let minutes = (now - window_start).num_minutes();
    if minutes < 0 {
        return None;
    }
    let idx = (minutes / 15) as usize;
    if idx < crate::domain::price::SLOTS_PER_DAY {
        Some(idx)
    } else {
        None
    }
}

pub struct DebtTracker {
    bus: std::sync::Arc<dyn SensorBus>,
    switches: std::sync::Arc<dyn SwitchClient>,
    persistence: PersistenceStore,
}

impl DebtTracker {
    pub fn new(bus: std::sync::Arc<dyn SensorBus>, switches: std::sync::Arc<dyn SwitchClient>, persistence: PersistenceStore) -> Self {
        Self { bus, switches, persistence }
    }

    /// spec.md §4.5 full per-minute procedure, run across every enabled
    /// device. `mode` gates recovery only (frrup/frrdown skip recovery
    /// silently, per spec.md §4.5 and the mFRR exemption pattern elsewhere).
    pub async fn tick(
        &self,
        devices: &mut [LoadDevice],
        prices: &[PriceSlot],
        mode: Mode,
        now: DateTime<FixedOffset>,
        window_start: DateTime<FixedOffset>,
    ) -> Vec<DebtOutcome> {
        let Some(slot_idx) = current_slot_idx(now, window_start) else {
            return Vec::new();
        };

        let mut outcomes = Vec::new();
        for device in devices.iter_mut().filter(|d| d.scheduling_enabled) {
            let scheduled_on = device.scheduled_slots[slot_idx];
            let actual_on = match self.bus.read(&device.entity_id).await {
                Ok(raw) => raw_to_bool(&raw),
                Err(e) => {
                    warn!(device = %device.name, error = %e, "could not read device state for debt tracking");
                    continue;
                }
            };

            if scheduled_on && !actual_on {
                device.energy_debt = (device.energy_debt + 1.0).min(device.max_energy_debt);
                self.persistence.patch_debt(&device.name, device.energy_debt).await.ok();
                outcomes.push(DebtOutcome::Accrued { device: device.name.clone(), new_debt: device.energy_debt });
            } else if !scheduled_on && actual_on {
                device.energy_debt = (device.energy_debt - 1.0).max(0.0);
                self.persistence.patch_debt(&device.name, device.energy_debt).await.ok();
                outcomes.push(DebtOutcome::PaidBack { device: device.name.clone(), new_debt: device.energy_debt });
            }

            if scheduled_on || actual_on || device.energy_debt <= 0.0 {
                continue;
            }
            if mode.is_mfrr() {
                continue;
            }

            if let Some(outcome) = self.attempt_recovery(device, prices, slot_idx).await {
                outcomes.push(outcome);
            }
        }
        outcomes
    }

    /// spec.md §4.5 "Recovery": only called when scheduled OFF ∧ actual OFF
    /// ∧ `energy_debt > 0`.
    async fn attempt_recovery(&self, device: &mut LoadDevice, prices: &[PriceSlot], slot_idx: usize) -> Option<DebtOutcome> {
        let lookahead_slots = (device.recovery_window_hours * 4.0).round() as usize;
        let max_price = device.max_recovery_price?;

        let mut candidates: Vec<&PriceSlot> = (slot_idx..(slot_idx + lookahead_slots))
            .filter_map(|i| prices.get(i))
            .filter(|s| !device.scheduled_slots[s.slot_index as usize])
            .filter(|s| s.total_price * 100.0 <= max_price)
            .collect();
        candidates.sort_by(|a, b| a.total_price.partial_cmp(&b.total_price).unwrap());

        let take_n = (device.energy_debt / 15.0).ceil() as usize;
        let selected: Vec<&PriceSlot> = candidates.into_iter().take(take_n.max(1)).collect();

        let current = selected.iter().find(|s| s.slot_index as usize == slot_idx)?;
        let price = current.total_price;
        let slot_index = current.slot_index;

        self.switches.set_switch(&device.switch_endpoint, 0, !device.inverted_logic).await.ok();

        let entry = RecoveryEntry {
            device: device.name.clone(),
            slot_index,
            price,
            minutes_recovered: 1.0,
            timestamp: chrono::Utc::now(),
        };
        self.persistence.push_recovery(&device.name, entry).await.ok();
        info!(device = %device.name, slot_index, price, "opportunistic debt recovery this minute");

        Some(DebtOutcome::Recovered { device: device.name.clone(), slot_index, price })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::device::ScheduleMode;
    use crate::domain::price::SLOTS_PER_DAY;
    use crate::hardware::simulated::SimulatedHardware;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn tz() -> FixedOffset {
        FixedOffset::east_opt(2 * 3600).unwrap()
    }

    fn window_start() -> DateTime<FixedOffset> {
        tz().with_ymd_and_hms(2026, 7, 28, 22, 0, 0).unwrap()
    }

    fn prices() -> Vec<PriceSlot> {
        (0..SLOTS_PER_DAY)
            .map(|i| PriceSlot::new(window_start() + chrono::Duration::minutes(15 * i as i64), 0.05 + i as f64 * 0.001, 0.02, i as u8))
            .collect()
    }

    fn device() -> LoadDevice {
        LoadDevice {
            name: "boiler".into(),
            entity_id: "switch.boiler".into(),
            switch_endpoint: "http://sw.local/boiler".into(),
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
            energy_debt: 0.0,
            recovery_window_hours: 4.0,
            max_recovery_price: Some(50.0),
            max_energy_debt: 120.0,
            scheduled_slots: [false; SLOTS_PER_DAY],
            schedule_ids: vec![],
        }
    }

    fn tracker() -> (DebtTracker, Arc<SimulatedHardware>) {
        let hw = Arc::new(SimulatedHardware::new());
        let dir = std::env::temp_dir().join(format!("pbc-debt-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let store = PersistenceStore::new(dir.join("state.json"));
        (DebtTracker::new(hw.clone(), hw.clone(), store), hw)
    }

    #[tokio::test]
    async fn scheduled_on_but_actual_off_accrues_debt() {
        let (tracker, hw) = tracker();
        hw.set_sensor("switch.boiler", RawValue::Bool(false));
        let mut d = device();
        d.scheduled_slots[0] = true;
        let mut devices = vec![d];

        let outcomes = tracker.tick(&mut devices, &prices(), Mode::Normal, window_start(), window_start()).await;
        assert_eq!(devices[0].energy_debt, 1.0);
        assert!(matches!(outcomes[0], DebtOutcome::Accrued { .. }));
    }

    #[tokio::test]
    async fn scheduled_off_but_actual_on_pays_back_debt() {
        let (tracker, hw) = tracker();
        hw.set_sensor("switch.boiler", RawValue::Bool(true));
        let mut d = device();
        d.energy_debt = 5.0;
        let mut devices = vec![d];

        tracker.tick(&mut devices, &prices(), Mode::Normal, window_start(), window_start()).await;
        assert_eq!(devices[0].energy_debt, 4.0);
    }

    #[tokio::test]
    async fn recovery_skipped_during_mfrr_modes() {
        let (tracker, hw) = tracker();
        hw.set_sensor("switch.boiler", RawValue::Bool(false));
        let mut d = device();
        d.energy_debt = 30.0;
        let mut devices = vec![d];

        let outcomes = tracker.tick(&mut devices, &prices(), Mode::Frrup, window_start(), window_start()).await;
        assert!(!outcomes.iter().any(|o| matches!(o, DebtOutcome::Recovered { .. })));
    }

    #[tokio::test]
    async fn recovery_turns_device_on_in_cheapest_selected_slot() {
        let (tracker, hw) = tracker();
        hw.set_sensor("switch.boiler", RawValue::Bool(false));
        let mut d = device();
        d.energy_debt = 30.0; // ceil(30/15) = 2 slots to recover
        let mut devices = vec![d];

        // Slot 0 has the lowest price of the lookahead window (0.05 + 0*0.001).
        let outcomes = tracker.tick(&mut devices, &prices(), Mode::Normal, window_start(), window_start()).await;
        assert!(outcomes.iter().any(|o| matches!(o, DebtOutcome::Recovered { slot_index: 0, .. })));
        assert_eq!(hw.switch_state("http://sw.local/boiler", 0), Some(true));
    }

    #[test]
    fn current_slot_idx_anchors_at_window_start() {
        assert_eq!(current_slot_idx(window_start(), window_start()), Some(0));
        assert_eq!(current_slot_idx(window_start() + chrono::Duration::minutes(20), window_start()), Some(1));
        assert_eq!(current_slot_idx(window_start() - chrono::Duration::minutes(1), window_start()), None);
        assert_eq!(current_slot_idx(window_start() + chrono::Duration::hours(24), window_start()), None);
    }
}
