use std::env;

use chrono::Duration as ChronoDuration;
use tokio::time::Duration;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub event_buffer_size: usize,
    pub dispatch: DispatchConfig,
}

/// Tunables for matching, offers and the timeout sweep.
///
/// Passed explicitly into [`crate::state::AppState`]; nothing in the engine
/// reads these from the environment directly.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub offer_window: Duration,
    pub sweep_interval: Duration,
    pub initial_radius_km: f64,
    pub radius_step_km: f64,
    pub max_search_radius_km: f64,
    pub destination_match_radius_km: f64,
    pub radius_wait: Duration,
    pub location_freshness: Duration,
    pub exhausted_retry_after: Duration,
    pub average_speed_kmh: f64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            offer_window: Duration::from_secs(25),
            sweep_interval: Duration::from_secs(5),
            initial_radius_km: 5.0,
            radius_step_km: 5.0,
            max_search_radius_km: 20.0,
            destination_match_radius_km: 3.0,
            radius_wait: Duration::from_secs(10),
            location_freshness: Duration::from_secs(120),
            exhausted_retry_after: Duration::from_secs(30),
            average_speed_kmh: 30.0,
        }
    }
}

impl DispatchConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let defaults = Self::default();

        let config = Self {
            offer_window: secs_or_default("OFFER_WINDOW_SECS", defaults.offer_window)?,
            sweep_interval: secs_or_default("SWEEP_INTERVAL_SECS", defaults.sweep_interval)?,
            initial_radius_km: parse_or_default("INITIAL_RADIUS_KM", defaults.initial_radius_km)?,
            radius_step_km: parse_or_default("RADIUS_STEP_KM", defaults.radius_step_km)?,
            max_search_radius_km: parse_or_default(
                "MAX_SEARCH_RADIUS_KM",
                defaults.max_search_radius_km,
            )?,
            destination_match_radius_km: parse_or_default(
                "DESTINATION_MATCH_RADIUS_KM",
                defaults.destination_match_radius_km,
            )?,
            radius_wait: secs_or_default("RADIUS_WAIT_SECS", defaults.radius_wait)?,
            location_freshness: secs_or_default(
                "LOCATION_FRESHNESS_SECS",
                defaults.location_freshness,
            )?,
            exhausted_retry_after: secs_or_default(
                "EXHAUSTED_RETRY_SECS",
                defaults.exhausted_retry_after,
            )?,
            average_speed_kmh: parse_or_default("AVERAGE_SPEED_KMH", defaults.average_speed_kmh)?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        let positive = [
            ("INITIAL_RADIUS_KM", self.initial_radius_km),
            ("RADIUS_STEP_KM", self.radius_step_km),
            ("MAX_SEARCH_RADIUS_KM", self.max_search_radius_km),
            ("DESTINATION_MATCH_RADIUS_KM", self.destination_match_radius_km),
            ("AVERAGE_SPEED_KMH", self.average_speed_kmh),
        ];
        for (key, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(AppError::Internal(format!("{key} must be > 0, got {value}")));
            }
        }

        if self.max_search_radius_km < self.initial_radius_km {
            return Err(AppError::Internal(format!(
                "MAX_SEARCH_RADIUS_KM ({}) is below INITIAL_RADIUS_KM ({})",
                self.max_search_radius_km, self.initial_radius_km
            )));
        }

        if self.sweep_interval.is_zero() {
            return Err(AppError::Internal("SWEEP_INTERVAL_SECS must be > 0".to_string()));
        }

        Ok(())
    }

    /// Search radii in the order they are tried, ending at the configured maximum.
    pub fn radius_tiers(&self) -> Vec<f64> {
        let mut tiers = Vec::new();
        let mut radius = self.initial_radius_km;
        while radius < self.max_search_radius_km && self.radius_step_km > 0.0 {
            tiers.push(radius);
            radius += self.radius_step_km;
        }
        tiers.push(self.max_search_radius_km);
        tiers
    }

    pub fn offer_window_chrono(&self) -> ChronoDuration {
        to_chrono(self.offer_window)
    }

    pub fn location_freshness_chrono(&self) -> ChronoDuration {
        to_chrono(self.location_freshness)
    }

    pub fn exhausted_retry_chrono(&self) -> ChronoDuration {
        to_chrono(self.exhausted_retry_after)
    }
}

fn to_chrono(duration: Duration) -> ChronoDuration {
    ChronoDuration::from_std(duration).unwrap_or(ChronoDuration::MAX)
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();

        let log_format = match env::var("LOG_FORMAT").as_deref() {
            Ok("json") => LogFormat::Json,
            Ok("compact") | Err(_) => LogFormat::Compact,
            Ok(other) => {
                return Err(AppError::Internal(format!(
                    "invalid LOG_FORMAT: {other}, expected compact or json"
                )));
            }
        };

        Ok(Self {
            http_port: parse_or_default("HTTP_PORT", 3000)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            log_format,
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", 1024)?,
            dispatch: DispatchConfig::from_env()?,
        })
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}

fn secs_or_default(key: &str, default: Duration) -> Result<Duration, AppError> {
    parse_or_default(key, default.as_secs()).map(Duration::from_secs)
}
