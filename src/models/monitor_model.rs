//! models/monitor_model.rs
//! Requests/responses de la API HTTP.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartMonitoringRequest {
    pub website_url: String,
    pub email: String,
    pub phone: Option<String>,
    /// Minutos de vida de la suscripcion.
    pub duration: i64,
    /// Minutos entre consultas (1-60). Si falta se usa el default de config.
    pub polling_interval: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartMonitoringResponse {
    pub success: bool,
    pub subscription_id: String,
    pub target_id: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonitorResponse {
    pub success: bool,
    pub message: String,
}
