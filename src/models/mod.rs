//! models/mod.rs
//! Módulo raíz para modelos/estructuras compartidas.

pub mod change_event_model;
pub mod monitor_model;
pub mod subscription_model;
pub mod target_model;
