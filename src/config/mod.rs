// src/config/mod.rs
//! Process-level settings from the environment (and `.env` via dotenvy).
//! CLI flags override individual fields after loading.

pub mod synthesis;

use std::path::PathBuf;
use std::str::FromStr;

pub const ENV_DATA_DIR: &str = "SIGNAL_RADAR_DATA_DIR";
pub const ENV_SYNTHESIS_PATH: &str = "SIGNAL_RADAR_SYNTHESIS_PATH";
pub const ENV_OUT_DIR: &str = "SIGNAL_RADAR_OUT_DIR";
pub const ENV_WINDOW_HOURS: &str = "VELOCITY_WINDOW_HOURS";
pub const ENV_PAGE_SIZE: &str = "QUERY_PAGE_SIZE";

/// Ten years. Longer windows are clamped.
pub const MAX_WINDOW_HOURS: u32 = 24 * 366 * 10;
pub const MAX_LOOKBACK_DAYS: u32 = 366 * 10;

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub data_dir: PathBuf,
    pub synthesis_path: PathBuf,
    pub out_dir: PathBuf,
    pub window_hours: u32,
    pub page_size: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            synthesis_path: PathBuf::from(synthesis::DEFAULT_SYNTHESIS_PATH),
            out_dir: PathBuf::from("public"),
            window_hours: 24,
            page_size: crate::store::DEFAULT_PAGE_SIZE,
        }
    }
}

impl Settings {
    /// Read overrides from the environment. Invalid numbers fall back to the
    /// default with a warning.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            data_dir: env_path(ENV_DATA_DIR).unwrap_or(d.data_dir),
            synthesis_path: env_path(ENV_SYNTHESIS_PATH).unwrap_or(d.synthesis_path),
            out_dir: env_path(ENV_OUT_DIR).unwrap_or(d.out_dir),
            window_hours: clamp_window_hours(env_parse(ENV_WINDOW_HOURS, d.window_hours)),
            page_size: env_parse(ENV_PAGE_SIZE, d.page_size).max(1),
        }
    }

    pub fn window(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.window_hours))
    }
}

pub fn clamp_window_hours(hours: u32) -> u32 {
    hours.clamp(1, MAX_WINDOW_HOURS)
}

pub fn clamp_lookback_days(days: u32) -> u32 {
    days.clamp(1, MAX_LOOKBACK_DAYS)
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

fn env_parse<T: FromStr + Copy>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.trim().parse::<T>() {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!(key, value = %raw, "invalid number in environment, using default");
                default
            }
        },
        Err(_) => default,
    }
}
