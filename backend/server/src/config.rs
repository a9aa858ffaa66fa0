use std::{env, fmt::Display, str::FromStr, time::Duration};

use axum::http::HeaderName;
use bank::DEFAULT_OWNER_HEADER;
use tracing::{info, warn};

pub struct Config {
    pub port: u16,
    pub redis_url: Option<String>,
    pub menu_path: String,
    pub menu_url: Option<String>,
    pub menu_refresh: Option<Duration>,
    pub owner_header: HeaderName,
}

impl Config {
    pub fn load() -> Self {
        let refresh_secs: u64 = try_load("MENU_REFRESH_SECS", "0");

        Self {
            port: try_load("RUST_PORT", "1111"),
            redis_url: optional("REDIS_URL"),
            menu_path: try_load("MENU_PATH", "menu.bin"),
            menu_url: optional("MENU_URL"),
            menu_refresh: (refresh_secs > 0).then(|| Duration::from_secs(refresh_secs)),
            owner_header: try_load("OWNER_HEADER", DEFAULT_OWNER_HEADER),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 1111,
            redis_url: None,
            menu_path: "menu.bin".to_string(),
            menu_url: None,
            menu_refresh: None,
            owner_header: HeaderName::from_static(DEFAULT_OWNER_HEADER),
        }
    }
}

fn var(key: &str) -> Result<String, ()> {
    env::var(key).map_err(|_| {
        warn!("Environment variable {key} not found, using default");
    })
}

fn optional(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .or_else(|| {
            info!("{key} not set, leaving unset");
            None
        })
}

fn try_load<T: FromStr>(key: &str, default: &str) -> T
where
    T::Err: Display,
{
    var(key)
        .unwrap_or_else(|_| {
            info!("{key} not set, using default: {default}");
            default.to_string()
        })
        .parse()
        .map_err(|e| {
            warn!("Invalid {key} value: {e}");
        })
        .expect("Environment misconfigured!")
}
