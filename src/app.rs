//! app.rs
use crate::handlers::monitor_handler;
use actix_web::web;

pub fn init_app(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(monitor_handler::health_endpoint))
        .service(
            web::scope("/api")
                .route(
                    "/monitor",
                    web::post().to(monitor_handler::start_monitoring_endpoint),
                )
                .route(
                    "/stop-all",
                    web::post().to(monitor_handler::stop_all_endpoint),
                )
                .route(
                    "/stop/{subscription_id}",
                    web::post().to(monitor_handler::stop_subscription_endpoint),
                )
                .route(
                    "/subscriber/{id}",
                    web::get().to(monitor_handler::get_subscription_endpoint),
                )
                .route("/status", web::get().to(monitor_handler::status_endpoint))
                .route(
                    "/changes/{target_id}",
                    web::get().to(monitor_handler::change_history_endpoint),
                ),
        );
}
