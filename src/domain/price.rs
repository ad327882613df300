#![allow(dead_code)]
//! `PriceSlot` and the day-ahead tariff constants (spec.md §3, §4.2).

use chrono::{DateTime, FixedOffset, Timelike};
use serde::{Deserialize, Serialize};

/// Number of 15-minute slots in a scheduling day.
pub const SLOTS_PER_DAY: usize = 96;

/// One 15-minute tariff interval, anchored to a 22:00→22:00 local window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceSlot {
    pub timestamp: DateTime<FixedOffset>,
    /// EUR/kWh, post-VAT, including the five fixed per-kWh components.
    pub spot_price: f64,
    /// EUR/kWh, post-VAT network tariff.
    pub network_fee: f64,
    /// `spot_price + network_fee`.
    pub total_price: f64,
    /// 0..95, position in the 22:00-anchored day.
    pub slot_index: u8,
    /// 0..23, wall-clock hour of `timestamp`.
    pub hour: u8,
    pub always_on: bool,
    pub always_off: bool,
}

impl PriceSlot {
    pub fn new(timestamp: DateTime<FixedOffset>, spot_price: f64, network_fee: f64, slot_index: u8) -> Self {
        Self {
            timestamp,
            spot_price,
            network_fee,
            total_price: spot_price + network_fee,
            slot_index,
            hour: timestamp.hour() as u8,
            always_on: false,
            always_off: false,
        }
    }

    /// §3 invariant: off dominates on. Marking a slot `always_off` always
    /// clears `always_on`.
    pub fn mark_always_off(&mut self) {
        self.always_off = true;
        self.always_on = false;
    }

    /// Marking `always_on` is a no-op if the slot is already `always_off`.
    pub fn mark_always_on(&mut self) {
        if !self.always_off {
            self.always_on = true;
        }
    }
}

/// §4.2: hour-to-slot offset within the 22:00-anchored day.
pub fn hour_to_slot_offset(hour: u8) -> usize {
    (((hour as i32) - 22).rem_euclid(24) * 4) as usize
}

/// §4.2 network tariff table. Rates are EUR/MWh pre-VAT; callers divide by
/// 1000 and apply VAT to get EUR/kWh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkPackage {
    ElektrileviVork1,
    ElektrileviVork2,
    ElektrileviVork4,
    ElektrileviVork5,
    ImatraPartn24,
    ImatraPartn24pl,
    ImatraPartn12,
    ImatraPartn12pl,
    LatviaPamata1,
    LatviaSpecial1,
}

/// Inputs needed to evaluate a tariff rule: local hour, ISO weekday (1=Mon),
/// month (1-12), and whether the date is a public holiday (only vork5's
/// "holiday peak" rule needs this; all other rules ignore it).
#[derive(Debug, Clone, Copy)]
pub struct TariffContext {
    pub hour: u8,
    pub weekday: chrono::Weekday,
    pub month: u8,
    pub is_holiday: bool,
}

impl TariffContext {
    pub fn is_weekend_or_holiday(&self) -> bool {
        use chrono::Weekday::*;
        self.is_holiday || matches!(self.weekday, Sat | Sun)
    }

    pub fn is_workday(&self) -> bool {
        !self.is_weekend_or_holiday()
    }

    fn is_winter(&self) -> bool {
        matches!(self.month, 11 | 12 | 1 | 2 | 3)
    }

    fn is_summer(&self) -> bool {
        matches!(self.month, 4..=9)
    }
}

/// §4.2 network fee table, EUR/MWh pre-VAT. Returns the matching rate for the
/// given package and time context.
pub fn network_fee_eur_per_mwh(package: NetworkPackage, ctx: TariffContext) -> f64 {
    use NetworkPackage::*;
    match package {
        ElektrileviVork1 => 77.2,
        ElektrileviVork2 => {
            if ctx.hour < 7 || ctx.hour >= 22 || ctx.is_weekend_or_holiday() {
                35.1
            } else {
                60.7
            }
        }
        ElektrileviVork4 => {
            if ctx.hour < 7 || ctx.hour >= 22 || ctx.is_weekend_or_holiday() {
                21.0
            } else {
                36.9
            }
        }
        ElektrileviVork5 => {
            if ctx.is_winter() && ctx.is_weekend_or_holiday() && (16..20).contains(&ctx.hour) {
                47.4
            } else if ctx.is_winter()
                && ctx.is_workday()
                && ((9..12).contains(&ctx.hour) || (16..20).contains(&ctx.hour))
            {
                81.8
            } else if ctx.hour < 7 || ctx.hour >= 22 || ctx.is_weekend_or_holiday() {
                30.3
            } else {
                52.9
            }
        }
        ImatraPartn24 => 60.7,
        ImatraPartn24pl => 38.6,
        ImatraPartn12 => {
            let night = if ctx.is_summer() {
                ctx.hour < 8 || ctx.is_weekend_or_holiday()
            } else {
                ctx.hour < 7 || ctx.hour >= 23 || ctx.is_weekend_or_holiday()
            };
            if night {
                42.0
            } else {
                72.4
            }
        }
        ImatraPartn12pl => {
            let night = if ctx.is_summer() {
                ctx.hour < 8 || ctx.is_weekend_or_holiday()
            } else {
                ctx.hour < 7 || ctx.hour >= 23 || ctx.is_weekend_or_holiday()
            };
            if night {
                27.1
            } else {
                46.4
            }
        }
        LatviaPamata1 => 39.62,
        LatviaSpecial1 => 158.48,
    }
}

/// §4.2 fixed per-kWh components (pre-VAT, EUR/kWh), folded into `spot_price`.
pub mod fixed_fees {
    pub const RENEWABLE: f64 = 0.0084;
    pub const EXCISE: f64 = 0.0021;
    pub const BALANCING: f64 = 0.00373;
    pub const SECURITY: f64 = 0.00758;
    pub const SELLER_MARGIN: f64 = 0.00413 / 1.24;
    pub const VAT_FACTOR: f64 = 1.24;

    pub fn sum() -> f64 {
        RENEWABLE + EXCISE + BALANCING + SECURITY + SELLER_MARGIN
    }
}

/// §4.2 `get_cheapest_slots`. Stable-sorts by `total_price` ascending,
/// computes each slot's percentile rank on its position in the *input* order,
/// filters by `[min_rank, max_rank)` using the source's asymmetric
/// comparison (`<` for `min_rank`, `>` for `max_rank` — see spec.md §9), and
/// returns up to `n` input-relative indices.
pub fn get_cheapest_slots(
    slots: &[PriceSlot],
    n: usize,
    min_rank: Option<f64>,
    max_rank: Option<f64>,
) -> Vec<usize> {
    let len = slots.len();
    if len == 0 || n == 0 {
        return Vec::new();
    }

    let mut order: Vec<usize> = (0..len).collect();
    order.sort_by(|&a, &b| {
        slots[a]
            .total_price
            .partial_cmp(&slots[b].total_price)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.cmp(&b))
    });

    order
        .into_iter()
        .enumerate()
        .filter(|(rank_pos, _)| {
            let rank = 100.0 * (*rank_pos as f64) / (len as f64);
            if let Some(min) = min_rank {
                if rank < min {
                    return false;
                }
            }
            if let Some(max) = max_rank {
                if rank > max {
                    return false;
                }
            }
            true
        })
        .take(n)
        .map(|(_, idx)| idx)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;

    fn slot(price: f64) -> PriceSlot {
        let tz = FixedOffset::east_opt(3 * 3600).unwrap();
        PriceSlot::new(tz.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap().into(), price, 0.0, 0)
    }

    #[test]
    fn hour_to_slot_offset_anchors_at_22_00() {
        assert_eq!(hour_to_slot_offset(22), 0);
        assert_eq!(hour_to_slot_offset(23), 4);
        assert_eq!(hour_to_slot_offset(0), 8);
        assert_eq!(hour_to_slot_offset(21), 92);
    }

    #[test]
    fn mark_always_off_clears_always_on() {
        let mut s = slot(1.0);
        s.mark_always_on();
        assert!(s.always_on);
        s.mark_always_off();
        assert!(s.always_off);
        assert!(!s.always_on);

        // Marking on after off is a no-op.
        s.mark_always_on();
        assert!(!s.always_on);
    }

    #[test]
    fn cheapest_slots_picks_n_lowest_by_price() {
        let slots: Vec<PriceSlot> = vec![5.0, 1.0, 3.0, 2.0, 4.0].into_iter().map(slot).collect();
        let idx = get_cheapest_slots(&slots, 2, None, None);
        assert_eq!(idx, vec![1, 3]); // prices 1.0 and 2.0
    }

    #[test]
    fn cheapest_slots_respects_min_rank_strict_less_than() {
        // 10 slots, ranks are 0,10,20,...,90. min_rank=10 excludes rank 0 and keeps rank 10.
        let slots: Vec<PriceSlot> = (0..10).map(|i| slot(i as f64)).collect();
        let idx = get_cheapest_slots(&slots, 10, Some(10.0), None);
        assert!(!idx.contains(&0));
        assert!(idx.contains(&1));
    }

    #[test]
    fn network_fee_table_matches_spec_literals() {
        let winter_workday_peak = TariffContext {
            hour: 9,
            weekday: chrono::Weekday::Wed,
            month: 1,
            is_holiday: false,
        };
        assert_eq!(
            network_fee_eur_per_mwh(NetworkPackage::ElektrileviVork5, winter_workday_peak),
            81.8
        );

        let night = TariffContext { hour: 3, weekday: chrono::Weekday::Wed, month: 1, is_holiday: false };
        assert_eq!(network_fee_eur_per_mwh(NetworkPackage::ElektrileviVork2, night), 35.1);
    }
}
