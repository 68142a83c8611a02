//! handlers/monitor_handler.rs
use actix_web::{web, HttpResponse};

use crate::errors::MonitorError;
use crate::models::monitor_model::{
    MonitorResponse, StartMonitoringRequest, StartMonitoringResponse,
};
use crate::services::monitor_service::MonitorService;

/// Traduce un `MonitorError` al status HTTP correspondiente.
fn error_response(e: MonitorError) -> HttpResponse {
    let body = serde_json::json!({
        "success": false,
        "error": e.to_string(),
    });
    match e {
        MonitorError::InvalidRequest(_) => HttpResponse::BadRequest().json(body),
        MonitorError::SubscriptionNotFound(_) | MonitorError::TargetNotFound(_) => {
            HttpResponse::NotFound().json(body)
        }
        MonitorError::Internal(inner) => {
            log::error!("(monitor_handler) Error interno: {:?}", inner);
            HttpResponse::InternalServerError().json(serde_json::json!({
                "success": false,
                "error": "Internal server error",
                "details": format!("{:?}", inner)
            }))
        }
    }
}

/// POST /api/monitor
pub async fn start_monitoring_endpoint(
    monitor: web::Data<MonitorService>,
    body: web::Json<StartMonitoringRequest>,
) -> HttpResponse {
    match monitor.start_monitoring(body.into_inner()).await {
        Ok(registration) => HttpResponse::Ok().json(StartMonitoringResponse {
            success: true,
            subscription_id: registration.subscription_id,
            target_id: registration.target_id,
            message: "Monitoring started successfully".to_string(),
        }),
        Err(e) => error_response(e),
    }
}

/// POST /api/stop/{subscription_id}
pub async fn stop_subscription_endpoint(
    monitor: web::Data<MonitorService>,
    path: web::Path<String>,
) -> HttpResponse {
    let subscription_id = path.into_inner();

    match monitor.stop_subscription(&subscription_id).await {
        Ok(target_stopped) => HttpResponse::Ok().json(MonitorResponse {
            success: true,
            message: if target_stopped {
                "Subscription stopped; monitoring for this URL has ended".to_string()
            } else {
                "Subscription stopped".to_string()
            },
        }),
        Err(e) => error_response(e),
    }
}

/// GET /api/subscriber/{id}
pub async fn get_subscription_endpoint(
    monitor: web::Data<MonitorService>,
    path: web::Path<String>,
) -> HttpResponse {
    match monitor.get_subscription(&path.into_inner()).await {
        Ok(details) => HttpResponse::Ok().json(details),
        Err(e) => error_response(e),
    }
}

/// GET /api/status
pub async fn status_endpoint(monitor: web::Data<MonitorService>) -> HttpResponse {
    match monitor.get_status().await {
        Ok(statuses) => HttpResponse::Ok().json(statuses),
        Err(e) => error_response(e),
    }
}

/// GET /api/changes/{target_id}
pub async fn change_history_endpoint(
    monitor: web::Data<MonitorService>,
    path: web::Path<String>,
) -> HttpResponse {
    match monitor.get_change_history(&path.into_inner()).await {
        Ok(events) => HttpResponse::Ok().json(events),
        Err(e) => error_response(e),
    }
}

/// POST /api/stop-all
pub async fn stop_all_endpoint(monitor: web::Data<MonitorService>) -> HttpResponse {
    match monitor.stop_all().await {
        Ok(stopped) => HttpResponse::Ok().json(MonitorResponse {
            success: true,
            message: format!("Stopped {} monitoring task(s)", stopped),
        }),
        Err(e) => error_response(e),
    }
}

/// GET /health
pub async fn health_endpoint(monitor: web::Data<MonitorService>) -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "activeTasks": monitor.scheduler().registry().polling_count(),
    }))
}
