//! config/channel_config.rs
//! Credenciales de canales externos (SMTP, gateway de SMS, juez semantico).
//!
//! Cada `from_env` devuelve `None` si faltan credenciales: ese canal queda
//! deshabilitado durante toda la vida del proceso.

use std::env;

use super::monitor_config::env_parse;

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub pass: String,
    pub from_name: String,
}

impl SmtpConfig {
    pub fn from_env() -> Option<Self> {
        let user = non_empty_var("SMTP_USER")?;
        let pass = non_empty_var("SMTP_PASS")?;

        Some(SmtpConfig {
            host: non_empty_var("SMTP_HOST").unwrap_or_else(|| "smtp.gmail.com".to_string()),
            port: env_parse("SMTP_PORT", 587),
            user,
            pass,
            from_name: non_empty_var("SMTP_FROM_NAME").unwrap_or_else(|| "Web Alert".to_string()),
        })
    }
}

#[derive(Debug, Clone)]
pub struct SmsGatewayConfig {
    pub base_url: String,
    pub session_id: String,
}

impl SmsGatewayConfig {
    pub fn from_env() -> Option<Self> {
        Some(SmsGatewayConfig {
            base_url: non_empty_var("SMS_API_URL")?
                .trim_end_matches('/')
                .to_string(),
            session_id: non_empty_var("SMS_API_SESSION_ID")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct JudgeConfig {
    pub api_key: String,
    pub model: String,
    pub endpoint: String,
}

impl JudgeConfig {
    pub fn from_env() -> Option<Self> {
        Some(JudgeConfig {
            api_key: non_empty_var("OPENAI_API_KEY")?,
            model: non_empty_var("OPENAI_MODEL").unwrap_or_else(|| "gpt-4o-mini".to_string()),
            endpoint: non_empty_var("OPENAI_API_URL")
                .unwrap_or_else(|| "https://api.openai.com/v1/chat/completions".to_string()),
        })
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}
