//! handlers/mod.rs
//! Handlers HTTP: solo traducen request/response hacia `MonitorService`.

pub mod monitor_handler;
