//! C3 Weather Manager (spec.md §4.3): hourly apparent-temperature forecast,
//! cached for an hour, and the weather-to-heating-slots conversion used by
//! weather-adjusted `LoadDevice`s.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// First-hour temperature, the window average, and how many hours the
/// window covered (spec.md §4.3 `fetch_forecast`).
#[derive(Debug, Clone, Copy)]
pub struct Forecast {
    pub first_hour_temp: f64,
    pub window_avg: f64,
    pub period_hours: usize,
}

#[derive(Debug, Clone)]
pub struct WeatherManagerConfig {
    pub base_url: String,
    pub latitude: f64,
    pub longitude: f64,
    pub timeout: Duration,
    pub cache_ttl: Duration,
    pub max_temp: f64,
}

impl WeatherManagerConfig {
    pub fn new(base_url: impl Into<String>, latitude: f64, longitude: f64) -> Self {
        Self {
            base_url: base_url.into(),
            latitude,
            longitude,
            timeout: Duration::from_secs(10),
            cache_ttl: Duration::from_secs(3600),
            max_temp: 16.0,
        }
    }
}

pub struct WeatherManager {
    client: Client,
    cfg: WeatherManagerConfig,
    cache: Arc<RwLock<Option<(DateTime<Utc>, usize, Forecast)>>>,
}

impl WeatherManager {
    pub fn new(cfg: WeatherManagerConfig) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(cfg.timeout).build()?;
        Ok(Self { client, cfg, cache: Arc::new(RwLock::new(None)) })
    }

    fn url(&self, hours: usize) -> String {
        format!(
            "{}/forecast?lat={:.6}&lon={:.6}&hours={}",
            self.cfg.base_url.trim_end_matches('/'),
            self.cfg.latitude,
            self.cfg.longitude,
            hours,
        )
    }

    /// spec.md §4.3 `fetch_forecast`. Returns `None` on any failure, never
    /// an error — the caller (scheduler) degrades to `min_slots`.
    pub async fn fetch_forecast(&self, hours: usize) -> Option<Forecast> {
        {
            let cache = self.cache.read().await;
            if let Some((ts, cached_hours, forecast)) = &*cache {
                if *cached_hours == hours && (Utc::now() - *ts).num_seconds() < self.cfg.cache_ttl.as_secs() as i64 {
                    return Some(*forecast);
                }
            }
        }

        let forecast = match self.fetch_remote(hours).await {
            Ok(f) => f,
            Err(e) => {
                warn!(error = %e, "weather forecast fetch failed");
                return None;
            }
        };

        let mut cache = self.cache.write().await;
        *cache = Some((Utc::now(), hours, forecast));
        Some(forecast)
    }

    async fn fetch_remote(&self, hours: usize) -> anyhow::Result<Forecast> {
        let url = self.url(hours);
        debug!(%url, "fetching weather forecast");
        let resp = self.client.get(&url).send().await?;
        if !resp.status().is_success() {
            anyhow::bail!("weather API returned HTTP {}", resp.status());
        }
        let parsed: ApparentTempResponse = resp.json().await?;
        if parsed.apparent_temperature_c.is_empty() {
            anyhow::bail!("weather API returned no data points");
        }

        let window = &parsed.apparent_temperature_c[..parsed.apparent_temperature_c.len().min(hours)];
        let first_hour_temp = window[0];
        let window_avg = window.iter().sum::<f64>() / window.len() as f64;

        Ok(Forecast { first_hour_temp, window_avg, period_hours: window.len() })
    }

    /// spec.md §4.3 `required_slots`.
    pub fn required_slots(&self, forecast_avg: f64, heating_curve: f64, power_factor: f64, period_hours: f64, min_slots: f64) -> f64 {
        required_slots(forecast_avg, heating_curve, power_factor, period_hours, min_slots, self.cfg.max_temp)
    }
}

#[derive(Debug, Deserialize)]
struct ApparentTempResponse {
    apparent_temperature_c: Vec<f64>,
}

/// spec.md §4.3 `required_slots`, as a free function so it can be unit
/// tested without a live `WeatherManager`.
pub fn required_slots(forecast_avg: f64, heating_curve: f64, power_factor: f64, period_hours: f64, min_slots: f64, max_temp: f64) -> f64 {
    if forecast_avg >= max_temp {
        return min_slots;
    }

    let delta = max_temp - forecast_avg;
    let mut heating_hours = delta * (power_factor - 1.0) + delta + 2.0 * heating_curve - 2.0;
    heating_hours = heating_hours.max(0.0);

    if period_hours < 24.0 {
        heating_hours /= 24.0 / period_hours;
    }

    let mut slots = heating_hours * 4.0;
    slots = slots.min(period_hours * 4.0);
    min_slots.max(slots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(20.0, 0.0, 0.5, 24.0, 0.0, 16.0, 0.0)] // above max_temp -> min_slots
    fn required_slots_returns_min_when_warm(
        #[case] forecast_avg: f64,
        #[case] heating_curve: f64,
        #[case] power_factor: f64,
        #[case] period_hours: f64,
        #[case] min_slots: f64,
        #[case] max_temp: f64,
        #[case] expected: f64,
    ) {
        assert_eq!(required_slots(forecast_avg, heating_curve, power_factor, period_hours, min_slots, max_temp), expected);
    }

    #[test]
    fn required_slots_never_exceeds_period_capacity() {
        let result = required_slots(-20.0, 8.0, 0.5, 6.0, 0.0, 16.0);
        assert!(result <= 6.0 * 4.0);
    }

    #[test]
    fn required_slots_clamps_negative_to_zero_floor_via_min_slots() {
        // Very warm relative to curve should never go below min_slots even
        // if the raw formula would be negative.
        let result = required_slots(15.9, -4.0, 0.5, 24.0, 2.0, 16.0);
        assert!(result >= 2.0);
    }
}
