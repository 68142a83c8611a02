//! models/change_event_model.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Cambio sustancial detectado en un objetivo. Inmutable salvo los flags de entrega.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub id: String,
    pub target_id: String,
    pub detected_at: DateTime<Utc>,
    pub content_before: String,
    pub content_after: String,
    pub email_sent: bool,
    pub sms_sent: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryChannel {
    Email,
    ShortMessage,
}

impl DeliveryChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryChannel::Email => "email",
            DeliveryChannel::ShortMessage => "sms",
        }
    }
}
