//! config/mod.rs
//! Configuracion leida del entorno (.env via dotenv).

pub mod channel_config;
pub mod monitor_config;
