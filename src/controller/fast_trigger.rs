//! C10 Fast Phase Trigger (spec.md §4.10): a length-2 per-phase history that
//! fires the PBC early when a phase drops hard twice in a row, subject to a
//! minimum interval and an SOC-gated subscription.

use crate::clock::Clock;
use crate::domain::types::Mode;
use crate::utils::FixedHistory;

/// spec.md §4.10: "Maintains a length-2 history per phase."
const HISTORY_CAPACITY: usize = 2;

/// C10. Owns per-phase history buffers and the subscription flag; the
/// orchestrator re-evaluates the subscription every cycle (spec.md §4.10
/// "Re-evaluated each PBC cycle").
#[derive(Debug)]
pub struct FastPhaseTrigger {
    histories: [FixedHistory<f64>; 3],
    subscribed: bool,
    last_trigger_at: Option<i64>,
}

impl FastPhaseTrigger {
    pub fn new() -> Self {
        Self {
            histories: [FixedHistory::new(HISTORY_CAPACITY), FixedHistory::new(HISTORY_CAPACITY), FixedHistory::new(HISTORY_CAPACITY)],
            subscribed: false,
            last_trigger_at: None,
        }
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscribed
    }

    /// spec.md §4.10 "SOC gating of the subscription": subscribe only while
    /// `SOC > battery_soc_minimum_for_discharging`.
    pub fn update_subscription(&mut self, battery_soc: f64, battery_soc_minimum_for_discharging: f64) {
        let should_subscribe = battery_soc > battery_soc_minimum_for_discharging;
        if should_subscribe != self.subscribed {
            self.subscribed = should_subscribe;
            if !should_subscribe {
                for h in &mut self.histories {
                    *h = FixedHistory::new(HISTORY_CAPACITY);
                }
            }
        }
    }

    /// spec.md §4.10: push a new phase reading and decide whether to
    /// trigger an early PBC cycle. Returns `true` exactly once per
    /// qualifying pair of readings (the history is consumed by the push, so
    /// a third reading needs its own second low sample to re-trigger).
    #[allow(clippy::too_many_arguments)]
    pub fn observe(
        &mut self,
        phase_index: usize,
        value: f64,
        mode: Mode,
        heating_active: bool,
        now: i64,
        fast_trigger_threshold_watts: f64,
        fast_trigger_minimum_interval_seconds: i64,
    ) -> bool {
        if !self.subscribed || phase_index >= self.histories.len() {
            return false;
        }

        self.histories[phase_index].push(value);

        if heating_active {
            // spec.md §4.10(e): heating active swallows the event silently.
            return false;
        }

        let history = &self.histories[phase_index];
        if history.len() < HISTORY_CAPACITY {
            return false;
        }
        let both_below = history.iter().all(|&v| v <= fast_trigger_threshold_watts);
        if !both_below {
            return false;
        }

        if !matches!(mode, Mode::Normal | Mode::Limitexport | Mode::Pvsell) {
            return false;
        }

        let interval_ok = self.last_trigger_at.map(|t| now - t >= fast_trigger_minimum_interval_seconds).unwrap_or(true);
        if !interval_ok {
            return false;
        }

        self.last_trigger_at = Some(now);
        true
    }

    pub fn record_control_loop_execution(&mut self, clock: &dyn Clock) {
        self.last_trigger_at = Some(clock.now());
    }
}

impl Default for FastPhaseTrigger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn triggers_after_two_consecutive_low_readings() {
        let mut t = FastPhaseTrigger::new();
        t.update_subscription(50.0, 6.0);
        assert!(!t.observe(0, -400.0, Mode::Normal, false, 0, -300.0, 10));
        assert!(t.observe(0, -350.0, Mode::Normal, false, 100, -300.0, 10));
    }

    #[test]
    fn single_low_reading_does_not_trigger() {
        let mut t = FastPhaseTrigger::new();
        t.update_subscription(50.0, 6.0);
        assert!(!t.observe(0, -400.0, Mode::Normal, false, 0, -300.0, 10));
    }

    #[test]
    fn heating_active_swallows_event() {
        let mut t = FastPhaseTrigger::new();
        t.update_subscription(50.0, 6.0);
        t.observe(0, -400.0, Mode::Normal, false, 0, -300.0, 10);
        assert!(!t.observe(0, -400.0, Mode::Normal, true, 100, -300.0, 10));
    }

    #[test]
    fn wrong_mode_does_not_trigger() {
        let mut t = FastPhaseTrigger::new();
        t.update_subscription(50.0, 6.0);
        t.observe(0, -400.0, Mode::Buy, false, 0, -300.0, 10);
        assert!(!t.observe(0, -400.0, Mode::Buy, false, 100, -300.0, 10));
    }

    #[test]
    fn respects_minimum_interval() {
        let mut t = FastPhaseTrigger::new();
        t.update_subscription(50.0, 6.0);
        t.observe(0, -400.0, Mode::Normal, false, 0, -300.0, 10);
        assert!(t.observe(0, -400.0, Mode::Normal, false, 100, -300.0, 10));
        // Immediately re-triggering another pair within the interval is suppressed.
        t.observe(0, -400.0, Mode::Normal, false, 105, -300.0, 10);
        assert!(!t.observe(0, -400.0, Mode::Normal, false, 106, -300.0, 10));
    }

    #[test]
    fn soc_gating_unsubscribes_and_clears_history() {
        let mut t = FastPhaseTrigger::new();
        t.update_subscription(50.0, 6.0);
        t.observe(0, -400.0, Mode::Normal, false, 0, -300.0, 10);
        t.update_subscription(3.0, 6.0);
        assert!(!t.is_subscribed());
        t.update_subscription(50.0, 6.0);
        // History was cleared on unsubscribe, so a single reading can't trigger.
        assert!(!t.observe(0, -400.0, Mode::Normal, false, 200, -300.0, 10));
    }
}
