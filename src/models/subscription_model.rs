//! models/subscription_model.rs

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Canales de contacto de un suscriptor. El email es obligatorio.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactChannels {
    pub email: String,
    pub phone: Option<String>,
}

impl ContactChannels {
    pub fn new(email: impl Into<String>, phone: Option<String>) -> Self {
        Self {
            email: email.into().trim().to_string(),
            phone: phone
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty()),
        }
    }

    /// Clave de deduplicacion del email (sin distinguir mayusculas).
    pub fn email_key(&self) -> String {
        self.email.trim().to_lowercase()
    }

    pub fn phone_key(&self) -> Option<String> {
        self.phone
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub target_id: String,
    pub channels: ContactChannels,
    pub polling_duration_minutes: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Subscription {
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.created_at + Duration::minutes(self.polling_duration_minutes)
    }

    /// Viva sii esta activa y `now < created_at + duracion`.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.is_active && now < self.expires_at()
    }

    pub fn minutes_left(&self, now: DateTime<Utc>) -> i64 {
        if !self.is_live(now) {
            return 0;
        }
        let secs = (self.expires_at() - now).num_seconds();
        (secs as f64 / 60.0).round() as i64
    }
}

/// Suscripcion junto con la URL que vigila (consulta puntual).
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionDetails {
    #[serde(flatten)]
    pub subscription: Subscription,
    pub url: String,
}
