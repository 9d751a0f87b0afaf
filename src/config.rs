use std::{path::PathBuf, str::FromStr, time::Duration};

use url::Url;

use crate::runtime::TransportKind;

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:5000";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
    #[error("Invalid URL for {key}: {reason}")]
    InvalidUrl { key: String, reason: String },
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub realtime: RealtimeConfig,
    pub payment: PaymentConfig,
    pub storage: StorageConfig,
}

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub base_url: Url,
    pub request_timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct RealtimeConfig {
    pub path: String,
    /// Tried in order on every (re)connect.
    pub transports: Vec<TransportKind>,
    pub upgrade: bool,
    pub reconnect_attempts: u32,
    pub reconnect_delay_ms: u64,
    pub connect_timeout_ms: u64,
    /// Emits held while disconnected; further emits are refused.
    pub emit_buffer: usize,
}

impl RealtimeConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            path: "/socket.io/".to_string(),
            transports: vec![TransportKind::Polling, TransportKind::WebSocket],
            upgrade: true,
            reconnect_attempts: 5,
            reconnect_delay_ms: 1_000,
            connect_timeout_ms: 20_000,
            emit_buffer: 256,
        }
    }
}

#[derive(Clone, Debug)]
pub struct PaymentConfig {
    pub mpesa_poll_interval_secs: u64,
    pub mpesa_max_attempts: u32,
    pub card_max_attempts: u32,
    pub success_dwell_ms: u64,
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            mpesa_poll_interval_secs: 5,
            mpesa_max_attempts: 10,
            card_max_attempts: 1,
            success_dwell_ms: 2_000,
        }
    }
}

#[derive(Clone, Debug)]
pub struct StorageConfig {
    pub credentials_path: PathBuf,
}

impl AppConfig {
    /// Reads `.env` if present, then the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Err(e) = dotenvy::dotenv() {
            debug!("No .env file loaded: {}", e);
        }
        build_config(|key| std::env::var(key).ok())
    }
}

pub fn build_config<F>(get: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    info!("Building AppConfig...");

    let base_url = match get("API_BASE_URL").filter(|v| !v.trim().is_empty()) {
        Some(raw) => parse_url("API_BASE_URL", raw.trim())?,
        None => {
            warn!("API_BASE_URL is not set, falling back to {}", DEFAULT_API_BASE_URL);
            parse_url("API_BASE_URL", DEFAULT_API_BASE_URL)?
        }
    };

    let realtime_defaults = RealtimeConfig::default();
    let payment_defaults = PaymentConfig::default();

    let transports = match get("REALTIME_TRANSPORTS") {
        Some(raw) => parse_transports(&raw)?,
        None => realtime_defaults.transports.clone(),
    };

    let config = AppConfig {
        api: ApiConfig {
            base_url,
            request_timeout_secs: parse_or(&get, "API_REQUEST_TIMEOUT_SECS", 30)?,
        },
        realtime: RealtimeConfig {
            path: get("REALTIME_PATH").unwrap_or(realtime_defaults.path),
            transports,
            upgrade: parse_or(&get, "REALTIME_UPGRADE", realtime_defaults.upgrade)?,
            reconnect_attempts: parse_or(&get, "REALTIME_RECONNECT_ATTEMPTS", realtime_defaults.reconnect_attempts)?,
            reconnect_delay_ms: parse_or(&get, "REALTIME_RECONNECT_DELAY_MS", realtime_defaults.reconnect_delay_ms)?,
            connect_timeout_ms: parse_or(&get, "REALTIME_CONNECT_TIMEOUT_MS", realtime_defaults.connect_timeout_ms)?,
            emit_buffer: parse_or(&get, "REALTIME_EMIT_BUFFER", realtime_defaults.emit_buffer)?,
        },
        payment: PaymentConfig {
            mpesa_poll_interval_secs: parse_or(
                &get,
                "MPESA_POLL_INTERVAL_SECS",
                payment_defaults.mpesa_poll_interval_secs,
            )?,
            mpesa_max_attempts: parse_or(&get, "MPESA_MAX_ATTEMPTS", payment_defaults.mpesa_max_attempts)?,
            card_max_attempts: parse_or(&get, "CARD_MAX_ATTEMPTS", payment_defaults.card_max_attempts)?,
            success_dwell_ms: parse_or(&get, "PAYMENT_SUCCESS_DWELL_MS", payment_defaults.success_dwell_ms)?,
        },
        storage: StorageConfig {
            credentials_path: get("CREDENTIALS_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".tradewizard/credentials.json")),
        },
    };

    info!("AppConfig built");

    Ok(config)
}

fn parse_url(key: &str, raw: &str) -> Result<Url, ConfigError> {
    Url::parse(raw).map_err(|e| ConfigError::InvalidUrl {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

fn parse_or<F, T>(get: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match get(key) {
        Some(raw) => raw.trim().parse::<T>().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw,
        }),
        None => Ok(default),
    }
}

fn parse_transports(raw: &str) -> Result<Vec<TransportKind>, ConfigError> {
    let transports = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<TransportKind>().map_err(|_| ConfigError::InvalidValue {
                key: "REALTIME_TRANSPORTS".to_string(),
                value: raw.to_string(),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    if transports.is_empty() {
        return Err(ConfigError::InvalidValue {
            key: "REALTIME_TRANSPORTS".to_string(),
            value: raw.to_string(),
        });
    }

    Ok(transports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        build_config(|key| map.get(key).cloned())
    }

    #[test]
    fn test_missing_base_url_falls_back_to_localhost() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.api.base_url.as_str(), "http://localhost:5000/");
        assert_eq!(config.payment.mpesa_poll_interval_secs, 5);
        assert_eq!(config.payment.mpesa_max_attempts, 10);
        assert_eq!(
            config.realtime.transports,
            vec![TransportKind::Polling, TransportKind::WebSocket]
        );
    }

    #[test]
    fn test_overrides_are_parsed() {
        let config = config_from(&[
            ("API_BASE_URL", "https://api.tradewizard.example"),
            ("REALTIME_TRANSPORTS", "websocket"),
            ("REALTIME_RECONNECT_ATTEMPTS", "2"),
            ("MPESA_MAX_ATTEMPTS", "3"),
            ("REALTIME_EMIT_BUFFER", "16"),
        ])
        .unwrap();

        assert_eq!(config.api.base_url.host_str(), Some("api.tradewizard.example"));
        assert_eq!(config.realtime.transports, vec![TransportKind::WebSocket]);
        assert_eq!(config.realtime.reconnect_attempts, 2);
        assert_eq!(config.payment.mpesa_max_attempts, 3);
        assert_eq!(config.realtime.emit_buffer, 16);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(matches!(
            config_from(&[("MPESA_MAX_ATTEMPTS", "ten")]),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            config_from(&[("API_BASE_URL", "not a url")]),
            Err(ConfigError::InvalidUrl { .. })
        ));
        assert!(matches!(
            config_from(&[("REALTIME_TRANSPORTS", "carrier-pigeon")]),
            Err(ConfigError::InvalidValue { .. })
        ));
    }
}
