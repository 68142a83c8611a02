use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use dotenv::dotenv;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};

use crate::config::channel_config::{JudgeConfig, SmsGatewayConfig, SmtpConfig};
use crate::config::monitor_config::MonitorConfig;
use crate::logger::init_logger;
use crate::services::classifier_service::SignificanceClassifier;
use crate::services::clock_service::{Clock, SystemClock};
use crate::services::email_service::{EmailChannel, SmtpEmailChannel};
use crate::services::fetcher_service::HttpFetcher;
use crate::services::judge_service::{OpenAiJudge, SemanticJudge};
use crate::services::lifecycle_service::LifecycleManager;
use crate::services::monitor_service::MonitorService;
use crate::services::notification_service::NotificationDispatcher;
use crate::services::scheduler_service::TargetScheduler;
use crate::services::sms_service::{HttpSmsChannel, ShortMessageChannel};
use crate::services::store_service::{RecordStore, SqliteRecordStore};

mod app;
mod config;
mod errors;
mod handlers;
mod logger;
mod models;
mod services;

#[cfg(test)]
mod tests;

async fn setup_database(db_path: &str) -> Result<Pool<Sqlite>> {
    // 1) Crear la carpeta de la base si no existe
    if let Some(dir) = Path::new(db_path).parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("No se pudo crear directorio '{}'", dir.display()))?;
        }
    }

    let db_url = format!("sqlite:{}", db_path);
    log::info!("Conectando a SQLite en {}", db_url);

    // 2) Conectarnos con SQLx (WAL + busy_timeout: varias tareas escriben a la vez)
    let options = SqliteConnectOptions::from_str(&db_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));

    let db_pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .context("No se pudo conectar a la base de datos SQLite.")?;

    Ok(db_pool)
}

/// Canales y juez opcionales: sin credenciales quedan deshabilitados.
fn build_email_channel() -> Option<Arc<dyn EmailChannel>> {
    let config = SmtpConfig::from_env()?;
    match SmtpEmailChannel::new(&config) {
        Ok(channel) => Some(Arc::new(channel)),
        Err(e) => {
            log::error!("(main) No se pudo inicializar SMTP, email deshabilitado: {:?}", e);
            None
        }
    }
}

fn build_sms_channel() -> Option<Arc<dyn ShortMessageChannel>> {
    SmsGatewayConfig::from_env()
        .map(|config| Arc::new(HttpSmsChannel::new(config)) as Arc<dyn ShortMessageChannel>)
}

fn build_judge() -> Option<Arc<dyn SemanticJudge>> {
    match JudgeConfig::from_env() {
        Some(config) => Some(Arc::new(OpenAiJudge::new(config))),
        None => {
            log::warn!("(main) OPENAI_API_KEY no definido: clasificacion solo heuristica");
            None
        }
    }
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok(); // Cargar .env al inicio
    init_logger();

    let config = MonitorConfig::from_env();

    // Conectarnos a la DB
    let db_pool = setup_database(&config.database_path)
        .await
        .expect("No se pudo preparar la base de datos");

    let sqlite_store = SqliteRecordStore::new(db_pool.clone());
    if let Err(e) = sqlite_store.run_migrations().await {
        panic!("Fallo en migraciones del monitor: {:?}", e);
    }
    let store: Arc<dyn RecordStore> = Arc::new(sqlite_store);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let fetcher = Arc::new(HttpFetcher::new(&config).expect("No se pudo crear el fetcher HTTP"));
    let classifier = SignificanceClassifier::new(build_judge(), config.judge_timeout);

    let dispatcher = NotificationDispatcher::new(
        build_email_channel(),
        build_sms_channel(),
        store.clone(),
        config.alert_subject.clone(),
    );
    let lifecycle = LifecycleManager::new(store.clone(), clock.clone(), dispatcher.clone());
    let scheduler = TargetScheduler::new(
        store.clone(),
        fetcher,
        classifier,
        dispatcher,
        lifecycle.clone(),
        clock.clone(),
    );

    let monitor_service = MonitorService::new(store, lifecycle, scheduler, clock, config.clone());

    // Retomar lo que quedo activo antes del reinicio
    if let Err(e) = monitor_service.resume_active_targets().await {
        log::error!("(main) No se pudieron reanudar objetivos: {:?}", e);
    }

    // Levantar servidor
    log::info!(
        "Levantando servidor en {}:{}",
        config.bind_host,
        config.bind_port
    );
    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(monitor_service.clone()))
            .configure(app::init_app)
    })
    .workers(1)
    .bind((config.bind_host.as_str(), config.bind_port))?
    .run()
    .await
}
