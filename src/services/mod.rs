//! services/mod.rs
//! Módulo que agrupa distintos "servicios" o "capas de negocio" de la app.

pub mod classifier_service;
pub mod clock_service;
pub mod email_service;
pub mod fetcher_service;
pub mod judge_service;
pub mod lifecycle_service;
pub mod monitor_service;
pub mod normalizer_service;
pub mod notification_service;
pub mod scheduler_service;
pub mod sms_service;
pub mod store_service;
pub mod template_service;
