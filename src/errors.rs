//! errors.rs
//! Errores de la frontera del servicio (lo que ve quien llama a `MonitorService`).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("Solicitud invalida: {0}")]
    InvalidRequest(String),

    #[error("Suscripcion {0} no encontrada")]
    SubscriptionNotFound(String),

    #[error("Objetivo {0} no encontrado")]
    TargetNotFound(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type MonitorResult<T> = std::result::Result<T, MonitorError>;
