//! config/monitor_config.rs
//! Parametros del nucleo de monitoreo, con valores por defecto.

use std::env;
use std::time::Duration;

pub const MIN_POLL_INTERVAL_MINUTES: i64 = 1;
pub const MAX_POLL_INTERVAL_MINUTES: i64 = 60;

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub default_poll_interval_minutes: i64,
    pub fetch_timeout: Duration,
    pub fetch_retries: u32,
    pub fetch_retry_delay: Duration,
    /// El juez semantico esta en el camino rapido del filtro: timeout corto.
    pub judge_timeout: Duration,
    pub alert_subject: String,
    pub user_agent: String,
    pub bind_host: String,
    pub bind_port: u16,
    pub database_path: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        MonitorConfig {
            default_poll_interval_minutes: 3,
            fetch_timeout: Duration::from_secs(60),
            fetch_retries: 3,
            fetch_retry_delay: Duration::from_secs(5),
            judge_timeout: Duration::from_secs(5),
            alert_subject: "WEB ALERT: PAGE UPDATE".to_string(),
            user_agent: "WebAlertBot/0.1".to_string(),
            bind_host: "0.0.0.0".to_string(),
            bind_port: 5022,
            database_path: "data/monitor.db".to_string(),
        }
    }
}

impl MonitorConfig {
    /// Lee la config del entorno; cualquier valor ausente o invalido usa el default.
    pub fn from_env() -> Self {
        let defaults = MonitorConfig::default();

        MonitorConfig {
            default_poll_interval_minutes: clamp_poll_interval(env_parse(
                "DEFAULT_POLL_INTERVAL",
                defaults.default_poll_interval_minutes,
            )),
            fetch_timeout: Duration::from_secs(env_parse(
                "FETCH_TIMEOUT_SECS",
                defaults.fetch_timeout.as_secs(),
            )),
            fetch_retries: env_parse("FETCH_RETRIES", defaults.fetch_retries).max(1),
            fetch_retry_delay: Duration::from_secs(env_parse(
                "FETCH_RETRY_DELAY_SECS",
                defaults.fetch_retry_delay.as_secs(),
            )),
            judge_timeout: Duration::from_secs(env_parse(
                "JUDGE_TIMEOUT_SECS",
                defaults.judge_timeout.as_secs(),
            )),
            alert_subject: env::var("ALERT_SUBJECT").unwrap_or(defaults.alert_subject),
            user_agent: env::var("FETCH_USER_AGENT").unwrap_or(defaults.user_agent),
            bind_host: env::var("BIND_HOST").unwrap_or(defaults.bind_host),
            bind_port: env_parse("PORT", defaults.bind_port),
            database_path: env::var("DATABASE_PATH").unwrap_or(defaults.database_path),
        }
    }

    pub fn poll_interval_or_default(&self, requested: Option<i64>) -> i64 {
        clamp_poll_interval(requested.unwrap_or(self.default_poll_interval_minutes))
    }
}

/// Intervalo de consulta acotado a 1-60 minutos.
pub fn clamp_poll_interval(minutes: i64) -> i64 {
    minutes.clamp(MIN_POLL_INTERVAL_MINUTES, MAX_POLL_INTERVAL_MINUTES)
}

pub(crate) fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
