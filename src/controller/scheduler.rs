//! C4 Load-Scheduling Engine (spec.md §4.4): builds each device's day-ahead
//! on/off schedule from the 96 `PriceSlot`s and an optional weather forecast,
//! then materializes it onto the device's smart switch.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::SchedulerConfig;
use crate::domain::device::{LoadDevice, ScheduleMode};
use crate::domain::price::{get_cheapest_slots, PriceSlot, SLOTS_PER_DAY};
use crate::forecast::weather::WeatherManager;
use crate::hardware::SwitchClient;

/// spec.md §4.4: auto-off handles turning a device back off, so the
/// scheduler only ever creates "turn on" schedules, one per distinct
/// minute-of-hour among the day's ON slots.
pub struct Scheduler {
    switches: Arc<dyn SwitchClient>,
    weather: Arc<WeatherManager>,
}

impl Scheduler {
    pub fn new(switches: Arc<dyn SwitchClient>, weather: Arc<WeatherManager>) -> Self {
        Self { switches, weather }
    }

    /// spec.md §4.4 full daily procedure, run once per device. Schedules
    /// unchanged since the last run are left alone (testable property #4,
    /// "schedule idempotence").
    pub async fn run_daily(&self, devices: &mut [LoadDevice], prices: &[PriceSlot], cfg: &SchedulerConfig) {
        for device in devices.iter_mut().filter(|d| d.scheduling_enabled) {
            let slots = self.compute_schedule(device, prices).await;
            if slots == device.scheduled_slots {
                info!(device = %device.name, "schedule unchanged, skipping switch materialization");
                continue;
            }
            device.scheduled_slots = slots;
            self.materialize(device, cfg).await;
        }
    }

    /// spec.md §4.4 steps 1-4: apply always-on/off hours and the
    /// `always_on_price` escape hatch (step 2's price constraint, run before
    /// mode dispatch for every device), then select slots per the device's
    /// `ScheduleMode`.
    async fn compute_schedule(&self, device: &LoadDevice, prices: &[PriceSlot]) -> [bool; SLOTS_PER_DAY] {
        let mut local: Vec<PriceSlot> = prices.to_vec();
        for slot in local.iter_mut() {
            if device.always_off_hours.contains(&slot.hour) {
                slot.mark_always_off();
            } else if device.always_on_hours.contains(&slot.hour) {
                slot.mark_always_on();
            }
        }
        if let Some(price_cents) = device.always_on_price {
            for slot in local.iter_mut() {
                if slot.total_price * 100.0 < price_cents {
                    slot.mark_always_on();
                }
            }
        }

        match device.schedule_mode {
            ScheduleMode::Threshold => self.select_threshold(device, &local),
            ScheduleMode::Period => self.select_period(device, &local).await,
        }
    }

    /// spec.md §4.4 "THRESHOLD mode": any slot at or below `max_price_rank`
    /// (and at/above `min_price_rank` when set) is on, minus whatever
    /// `always_off_hours` excludes outright. `always_on`/`always_on_price`
    /// slots are already marked by `compute_schedule`; the rank is computed
    /// over the whole day's non-`always_off` slots, including those, so
    /// ranking matches the source's `available_prices` denominator.
    fn select_threshold(&self, device: &LoadDevice, local: &[PriceSlot]) -> [bool; SLOTS_PER_DAY] {
        let mut chosen = [false; SLOTS_PER_DAY];

        for (i, slot) in local.iter().enumerate() {
            if slot.always_on {
                chosen[i] = true;
            }
        }

        let eligible_idx: Vec<usize> = (0..local.len()).filter(|&i| !local[i].always_off).collect();
        let eligible_slots: Vec<PriceSlot> = eligible_idx.iter().map(|&i| local[i].clone()).collect();
        let picked = get_cheapest_slots(&eligible_slots, eligible_slots.len(), device.min_price_rank, device.max_price_rank);
        for p in picked {
            chosen[eligible_idx[p]] = true;
        }

        chosen
    }

    /// spec.md §4.4 "PERIOD mode": the day is split into `24 / period_hours`
    /// equal windows; each window gets its own cheapest-slot selection sized
    /// to `desired_on_hours`, scaled up by the weather forecast when
    /// `weather_adjustment` is set.
    async fn select_period(&self, device: &LoadDevice, local: &[PriceSlot]) -> [bool; SLOTS_PER_DAY] {
        let mut chosen = [false; SLOTS_PER_DAY];
        let period_hours = device.period_hours.unwrap_or(24.0).max(1.0);
        let periods = (24.0 / period_hours).round().max(1.0) as usize;
        let slots_per_period = SLOTS_PER_DAY / periods;
        let desired_on_hours = device.desired_on_hours.unwrap_or(0.0);
        let min_slots = desired_on_hours * 4.0;

        let forecast = if device.weather_adjustment {
            self.weather.fetch_forecast(period_hours.round() as usize).await
        } else {
            None
        };

        for period_idx in 0..periods {
            let start = period_idx * slots_per_period;
            let end = (start + slots_per_period).min(SLOTS_PER_DAY);
            if start >= end {
                continue;
            }
            let window = &local[start..end];

            let required = match (forecast, device.heating_curve) {
                (Some(f), Some(curve)) => {
                    self.weather.required_slots(f.window_avg, curve, device.power_factor, period_hours, min_slots)
                }
                _ => min_slots,
            };

            let already_on: Vec<usize> = (0..window.len()).filter(|&i| window[i].always_on).collect();
            for &i in &already_on {
                chosen[start + i] = true;
            }
            let remaining_needed = (required.round() as usize).saturating_sub(already_on.len());
            if remaining_needed == 0 {
                continue;
            }

            let eligible_idx: Vec<usize> = (0..window.len()).filter(|&i| !window[i].always_off && !window[i].always_on).collect();
            let eligible_slots: Vec<PriceSlot> = eligible_idx.iter().map(|&i| window[i].clone()).collect();
            let picked = get_cheapest_slots(&eligible_slots, remaining_needed, device.min_price_rank, device.max_price_rank);
            for p in picked {
                chosen[start + eligible_idx[p]] = true;
            }
        }

        chosen
    }

    /// spec.md §4.4 "Materialization": delete the previous day's schedules,
    /// (re)configure auto-off, then create one "turn on" schedule per
    /// distinct minute-of-hour among the day's ON slots, each covering every
    /// hour that minute fires at.
    async fn materialize(&self, device: &mut LoadDevice, cfg: &SchedulerConfig) {
        for id in device.schedule_ids.drain(..) {
            if let Ok(id) = id.parse::<u64>() {
                if let Err(e) = self.switches.delete_schedule(&device.switch_endpoint, id).await {
                    warn!(device = %device.name, error = %e, "failed to delete stale schedule");
                }
                tokio::time::sleep(Duration::from_millis(cfg.inter_operation_delay_ms)).await;
            }
        }

        // spec.md §4.4: auto-off normally, auto-on if the device's switch logic is inverted.
        if let Err(e) = self
            .switches
            .set_config(&device.switch_endpoint, 0, !device.inverted_logic, cfg.auto_off_delay_seconds)
            .await
        {
            warn!(device = %device.name, error = %e, "failed to configure auto-off");
        }
        tokio::time::sleep(Duration::from_millis(cfg.inter_operation_delay_ms)).await;

        // Group ON slots by minute-of-hour, collecting the hours each group fires at.
        let mut by_minute: [Vec<u8>; 4] = Default::default();
        for (i, &on) in device.scheduled_slots.iter().enumerate() {
            if !on {
                continue;
            }
            let hour = local_hour_for_slot(i);
            let bucket = &mut by_minute[i % 4];
            if !bucket.contains(&hour) {
                bucket.push(hour);
            }
        }

        for (slot_in_hour, hours) in by_minute.iter().enumerate() {
            if hours.is_empty() {
                continue;
            }
            let minute = slot_in_hour * 15;
            let hour_list = hours.iter().map(|h| h.to_string()).collect::<Vec<_>>().join(",");
            let timespec = format!("0 {minute} {hour_list} * * *");

            match self.switches.create_schedule(&device.switch_endpoint, &timespec, 0, !device.inverted_logic).await {
                Ok(id) => device.schedule_ids.push(id.to_string()),
                Err(e) => warn!(device = %device.name, error = %e, "failed to create schedule"),
            }
            tokio::time::sleep(Duration::from_millis(cfg.inter_operation_delay_ms)).await;
        }

        info!(device = %device.name, on_slots = device.count_on_slots(), "schedule materialized");
    }
}

/// Wall-clock hour a 22:00-anchored slot index falls on.
fn local_hour_for_slot(slot_index: usize) -> u8 {
    (((slot_index / 4) as i32 + 22) % 24) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::simulated::SimulatedHardware;
    use chrono::{FixedOffset, TimeZone, Timelike};

    fn tz() -> FixedOffset {
        FixedOffset::east_opt(2 * 3600).unwrap()
    }

    fn window_start() -> chrono::DateTime<FixedOffset> {
        tz().with_ymd_and_hms(2026, 7, 28, 22, 0, 0).unwrap()
    }

    fn prices(cheap_at: usize) -> Vec<PriceSlot> {
        (0..SLOTS_PER_DAY)
            .map(|i| {
                let price = if i == cheap_at { 0.01 } else { 0.20 };
                PriceSlot::new(window_start() + chrono::Duration::minutes(15 * i as i64), price, 0.0, i as u8)
            })
            .collect()
    }

    fn scheduler_cfg() -> SchedulerConfig {
        SchedulerConfig {
            daily_run_time: "21:45".into(),
            run_once_at_startup: true,
            switch_timeout_seconds: 5,
            inter_operation_delay_ms: 0,
            auto_off_delay_seconds: 910,
        }
    }

    fn threshold_device() -> LoadDevice {
        LoadDevice {
            name: "pool_pump".into(),
            entity_id: "switch.pool_pump".into(),
            switch_endpoint: "http://sw.local/pool".into(),
            estimated_power_watts: 1200.0,
            scheduling_enabled: true,
            schedule_mode: ScheduleMode::Threshold,
            desired_on_hours: None,
            period_hours: None,
            min_price_rank: None,
            max_price_rank: Some(20.0),
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
            scheduled_slots: [false; SLOTS_PER_DAY],
            schedule_ids: vec![],
        }
    }

    fn period_device() -> LoadDevice {
        LoadDevice {
            name: "water_heater".into(),
            entity_id: "switch.water_heater".into(),
            switch_endpoint: "http://sw.local/heater".into(),
            estimated_power_watts: 2000.0,
            scheduling_enabled: true,
            schedule_mode: ScheduleMode::Period,
            desired_on_hours: Some(1.0),
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
            max_recovery_price: None,
            max_energy_debt: 120.0,
            scheduled_slots: [false; SLOTS_PER_DAY],
            schedule_ids: vec![],
        }
    }

    fn scheduler() -> (Scheduler, Arc<SimulatedHardware>) {
        let hw = Arc::new(SimulatedHardware::new());
        let weather = Arc::new(
            WeatherManager::new(crate::forecast::weather::WeatherManagerConfig::new("http://weather.invalid", 59.4, 24.7)).unwrap(),
        );
        (Scheduler::new(hw.clone(), weather), hw)
    }

    #[tokio::test]
    async fn threshold_mode_picks_cheapest_ranked_slots() {
        let (s, _hw) = scheduler();
        let mut d = threshold_device();
        let p = prices(10);
        let slots = s.compute_schedule(&d, &p).await;
        assert!(slots[10]);
        d.scheduled_slots = slots;
    }

    #[tokio::test]
    async fn period_mode_selects_desired_on_hours_worth_of_slots() {
        let (s, _hw) = scheduler();
        let d = period_device();
        let p = prices(0);
        let slots = s.compute_schedule(&d, &p).await;
        assert_eq!(slots.iter().filter(|&&b| b).count(), 4); // 1 hour = 4 slots
        assert!(slots[0]);
    }

    #[tokio::test]
    async fn always_off_hour_excludes_slot_even_if_cheapest() {
        let (s, _hw) = scheduler();
        let mut d = threshold_device();
        d.always_off_hours = vec![tz().with_ymd_and_hms(2026, 7, 28, 22, 0, 0).unwrap().hour() as u8];
        let p = prices(0);
        let slots = s.compute_schedule(&d, &p).await;
        assert!(!slots[0]);
    }

    #[tokio::test]
    async fn unchanged_schedule_skips_materialization() {
        let (s, hw) = scheduler();
        let mut devices = vec![period_device()];
        let p = prices(0);
        s.run_daily(&mut devices, &p, &scheduler_cfg()).await;
        assert!(hw.schedule_count() > 0);
        let created_ids = devices[0].schedule_ids.clone();

        s.run_daily(&mut devices, &p, &scheduler_cfg()).await;
        assert_eq!(devices[0].schedule_ids, created_ids);
    }
}
