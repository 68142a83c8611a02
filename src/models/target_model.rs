//! models/target_model.rs
//! Objetivo monitoreado (una URL) y su resumen de estado.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Una URL bajo monitoreo.
///
/// `last_snapshot` es el markup crudo de la ultima consulta exitosa; el baseline
/// lo establece pero nunca se compara ni cuenta en `check_count`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoredTarget {
    pub id: String,
    pub url: String,
    pub last_check: Option<DateTime<Utc>>,
    #[serde(skip_serializing)]
    pub last_snapshot: Option<String>,
    pub last_diagnostics: Option<String>,
    pub check_count: i64,
    pub is_active: bool,
    pub poll_interval_minutes: i64,
    /// Momento en que el objetivo entro por ultima vez en `Polling`.
    pub session_started_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Resumen por objetivo que devuelve `get_status`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetStatus {
    pub target_id: String,
    pub url: String,
    pub is_active: bool,
    pub check_count: i64,
    pub last_check: Option<DateTime<Utc>>,
    pub active_subscriber_count: i64,
    pub changes_count: i64,
    pub emails_sent_count: i64,
    pub minutes_left: i64,
}
