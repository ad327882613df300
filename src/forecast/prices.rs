//! C2 Price Manager (spec.md §4.2): builds the day's 96 `PriceSlot`s from
//! the day-ahead market API and the configured network tariff, falling
//! back to a synthetic pattern on persistent failure.

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, TimeZone, Timelike, Utc};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::Deserialize;
use std::time::Duration;

use crate::domain::price::{
    fixed_fees, get_cheapest_slots as domain_get_cheapest_slots, hour_to_slot_offset, network_fee_eur_per_mwh,
    NetworkPackage, PriceSlot, TariffContext, SLOTS_PER_DAY,
};
use crate::error::PriceApiError;

/// Re-exported so callers needn't reach into `domain::price` directly.
pub use crate::domain::price::get_cheapest_slots;
const _: fn(&[PriceSlot], usize, Option<f64>, Option<f64>) -> Vec<usize> = domain_get_cheapest_slots;

#[derive(Debug, Deserialize)]
struct RawPriceRow {
    time: DateTime<Utc>,
    #[serde(rename = "price")]
    price_eur_per_mwh: f64,
}

#[derive(Debug, Clone)]
pub struct PriceManagerConfig {
    pub base_url: String,
    pub area: String,
    pub timeout: Duration,
    pub retries: u32,
    pub package: NetworkPackage,
    pub tz: FixedOffset,
    pub is_holiday: fn(NaiveDate) -> bool,
}

fn no_holidays(_: NaiveDate) -> bool {
    false
}

impl PriceManagerConfig {
    pub fn new(base_url: impl Into<String>, area: impl Into<String>, tz: FixedOffset, package: NetworkPackage) -> Self {
        Self {
            base_url: base_url.into(),
            area: area.into(),
            timeout: Duration::from_secs(15),
            retries: 3,
            package,
            tz,
            is_holiday: no_holidays,
        }
    }
}

pub struct PriceManager {
    client: ClientWithMiddleware,
    cfg: PriceManagerConfig,
}

impl PriceManager {
    pub fn new(cfg: PriceManagerConfig) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("phase-balancer/0.3"));
        let inner = reqwest::Client::builder().timeout(cfg.timeout).default_headers(headers).build()?;

        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(cfg.retries);
        let client = ClientBuilder::new(inner).with(RetryTransientMiddleware::new_with_policy(retry_policy)).build();

        Ok(Self { client, cfg })
    }

    fn url_for_date(&self, date: NaiveDate) -> String {
        format!(
            "{}/prices/{:04}-{:02}-{:02}?area={}",
            self.cfg.base_url.trim_end_matches('/'),
            date.year(),
            date.month(),
            date.day(),
            self.cfg.area,
        )
    }

    async fn fetch_day(&self, date: NaiveDate) -> Result<Vec<RawPriceRow>, PriceApiError> {
        let url = self.url_for_date(date);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| PriceApiError::RequestFailed { attempts: self.cfg.retries, source: e.into() })?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| PriceApiError::RequestFailed { attempts: self.cfg.retries, source: e })?;
        if !status.is_success() {
            return Err(PriceApiError::Parse(format!("HTTP {status}: {body}")));
        }
        serde_json::from_str(&body).map_err(|e| PriceApiError::Parse(e.to_string()))
    }

    /// spec.md §4.2 full procedure: query, convert, stack fees, window, and
    /// reindex; falls back to the synthetic pattern on any failure.
    pub async fn fetch_prices_for_date(&self, target: NaiveDate) -> Vec<PriceSlot> {
        let prev = target.pred_opt().unwrap_or(target);

        let rows = match (self.fetch_day(prev).await, self.fetch_day(target).await) {
            (Ok(mut a), Ok(b)) => {
                a.extend(b);
                a
            }
            _ => {
                tracing::warn!(%target, "day-ahead price fetch failed, using synthetic fallback");
                return self.synthetic_fallback(target);
            }
        };

        let mut slots: Vec<PriceSlot> = rows.into_iter().map(|r| self.row_to_slot(r)).collect();
        slots.sort_by_key(|s| s.timestamp);

        let window_start = self.window_start(target);
        let window_end = window_start + chrono::Duration::hours(24);
        let mut windowed: Vec<PriceSlot> = slots
            .drain(..)
            .filter(|s| s.timestamp >= window_start && s.timestamp < window_end)
            .collect();

        if windowed.len() != SLOTS_PER_DAY {
            tracing::warn!(got = windowed.len(), %target, "day-ahead slot count mismatch, using synthetic fallback");
            return self.synthetic_fallback(target);
        }

        windowed.sort_by_key(|s| s.timestamp);
        for (i, slot) in windowed.iter_mut().enumerate() {
            slot.slot_index = i as u8;
        }
        windowed
    }

    fn window_start(&self, target: NaiveDate) -> DateTime<FixedOffset> {
        let prev = target.pred_opt().unwrap_or(target);
        self.cfg.tz.from_local_datetime(&prev.and_hms_opt(22, 0, 0).unwrap()).single().unwrap()
    }

    fn row_to_slot(&self, row: RawPriceRow) -> PriceSlot {
        let local = row.time.with_timezone(&self.cfg.tz);
        let spot_pre_vat = row.price_eur_per_mwh / 1000.0 + fixed_fees::sum();
        let spot_price = spot_pre_vat * fixed_fees::VAT_FACTOR;

        let ctx = TariffContext {
            hour: local.hour() as u8,
            weekday: local.weekday(),
            month: local.month() as u8,
            is_holiday: (self.cfg.is_holiday)(local.date_naive()),
        };
        let network_fee = (network_fee_eur_per_mwh(self.cfg.package, ctx) / 1000.0) * fixed_fees::VAT_FACTOR;

        PriceSlot::new(local, spot_price, network_fee, 0)
    }

    /// spec.md §4.2 step 5: synthetic fallback, still 96 slots.
    pub fn synthetic_fallback(&self, target: NaiveDate) -> Vec<PriceSlot> {
        let window_start = self.window_start(target);
        (0..SLOTS_PER_DAY)
            .map(|i| {
                let ts = window_start + chrono::Duration::minutes(15 * i as i64);
                let hour = ts.hour();
                let base_eur_mwh = if (7..21).contains(&hour) { 50.0 * 1.3 } else { 50.0 * 0.7 };
                let spot_price = (base_eur_mwh / 1000.0 + fixed_fees::sum()) * fixed_fees::VAT_FACTOR;

                let ctx = TariffContext {
                    hour: hour as u8,
                    weekday: ts.weekday(),
                    month: ts.month() as u8,
                    is_holiday: (self.cfg.is_holiday)(ts.date_naive()),
                };
                let network_fee = (network_fee_eur_per_mwh(self.cfg.package, ctx) / 1000.0) * fixed_fees::VAT_FACTOR;

                PriceSlot::new(ts, spot_price, network_fee, i as u8)
            })
            .collect()
    }
}

/// §4.2 hour-to-slot helper re-export, kept alongside the manager that uses
/// it for readability at call sites.
pub fn slot_offset_for_hour(hour: u8) -> usize {
    hour_to_slot_offset(hour)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::price::NetworkPackage;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn cfg(base_url: String) -> PriceManagerConfig {
        PriceManagerConfig::new(base_url, "ee", FixedOffset::east_opt(2 * 3600).unwrap(), NetworkPackage::ElektrileviVork2)
    }

    #[tokio::test]
    async fn synthetic_fallback_always_yields_96_slots() {
        let mgr = PriceManager::new(cfg("http://example.invalid".into())).unwrap();
        let target = NaiveDate::from_ymd_opt(2026, 7, 28).unwrap();
        let slots = mgr.synthetic_fallback(target);
        assert_eq!(slots.len(), SLOTS_PER_DAY);
        for (i, s) in slots.iter().enumerate() {
            assert_eq!(s.slot_index, i as u8);
        }
    }

    #[tokio::test]
    async fn fetch_falls_back_when_api_unreachable() {
        let server = MockServer::start().await;
        Mock::given(method("GET")).respond_with(ResponseTemplate::new(500)).mount(&server).await;

        let mgr = PriceManager::new(cfg(server.uri())).unwrap();
        let target = NaiveDate::from_ymd_opt(2026, 7, 28).unwrap();
        let slots = mgr.fetch_prices_for_date(target).await;
        assert_eq!(slots.len(), SLOTS_PER_DAY);
    }

    #[test]
    fn slot_offset_matches_price_module() {
        assert_eq!(slot_offset_for_hour(22), 0);
        assert_eq!(slot_offset_for_hour(21), 92);
    }
}
