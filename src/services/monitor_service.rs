//! services/monitor_service.rs
//! Fachada del nucleo: lo que consume la capa HTTP. Valida en la frontera y
//! delega en el ciclo de vida y el scheduler.

use std::sync::Arc;

use reqwest::Url;

use crate::{
    config::monitor_config::MonitorConfig,
    errors::{MonitorError, MonitorResult},
    models::{
        change_event_model::ChangeEvent,
        monitor_model::StartMonitoringRequest,
        subscription_model::{ContactChannels, SubscriptionDetails},
        target_model::TargetStatus,
    },
    services::{
        clock_service::Clock,
        lifecycle_service::{LifecycleManager, Registration, UnsubscribeOutcome},
        scheduler_service::{StartMode, TargetScheduler},
        store_service::RecordStore,
    },
};

#[derive(Clone)]
pub struct MonitorService {
    store: Arc<dyn RecordStore>,
    lifecycle: LifecycleManager,
    scheduler: TargetScheduler,
    clock: Arc<dyn Clock>,
    config: MonitorConfig,
}

impl MonitorService {
    pub fn new(
        store: Arc<dyn RecordStore>,
        lifecycle: LifecycleManager,
        scheduler: TargetScheduler,
        clock: Arc<dyn Clock>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            store,
            lifecycle,
            scheduler,
            clock,
            config,
        }
    }

    pub fn scheduler(&self) -> &TargetScheduler {
        &self.scheduler
    }

    /// Registra una suscripcion y arranca el monitoreo de la URL si hace falta.
    pub async fn start_monitoring(&self, req: StartMonitoringRequest) -> MonitorResult<Registration> {
        let url = validate_url(&req.website_url)?;

        let email = req.email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err(MonitorError::InvalidRequest(format!(
                "email invalido: '{}'",
                req.email
            )));
        }
        if req.duration <= 0 {
            return Err(MonitorError::InvalidRequest(format!(
                "la duracion debe ser positiva (recibido {})",
                req.duration
            )));
        }

        let interval = self.config.poll_interval_or_default(req.polling_interval);
        let channels = ContactChannels::new(email, req.phone);

        log::info!(
            "(start_monitoring) url={} email={} intervalo={} duracion={}",
            url,
            channels.email,
            interval,
            req.duration
        );

        let registration = self
            .lifecycle
            .register_subscription(&self.scheduler, &url, channels, interval, req.duration)
            .await?;
        Ok(registration)
    }

    pub async fn stop_subscription(&self, subscription_id: &str) -> MonitorResult<bool> {
        match self
            .lifecycle
            .unsubscribe(&self.scheduler, subscription_id)
            .await?
        {
            UnsubscribeOutcome::NotFound => Err(MonitorError::SubscriptionNotFound(
                subscription_id.to_string(),
            )),
            UnsubscribeOutcome::Deactivated { target_stopped } => Ok(target_stopped),
        }
    }

    pub async fn get_subscription(&self, subscription_id: &str) -> MonitorResult<SubscriptionDetails> {
        let subscription = self
            .store
            .get_subscription(subscription_id)
            .await?
            .ok_or_else(|| MonitorError::SubscriptionNotFound(subscription_id.to_string()))?;

        let target = self
            .store
            .get_target(&subscription.target_id)
            .await?
            .ok_or_else(|| MonitorError::TargetNotFound(subscription.target_id.clone()))?;

        Ok(SubscriptionDetails {
            subscription,
            url: target.url,
        })
    }

    /// Resumen por objetivo.
    pub async fn get_status(&self) -> MonitorResult<Vec<TargetStatus>> {
        let now = self.clock.now();
        let mut statuses = Vec::new();

        for target in self.store.list_targets().await? {
            let live = self.store.live_subscriptions(&target.id, now).await?;
            let changes_count = self.store.count_change_events(&target.id, None).await?;
            let emails_sent_count = self.store.count_emails_sent(&target.id).await?;
            let minutes_left = live.iter().map(|s| s.minutes_left(now)).max().unwrap_or(0);

            statuses.push(TargetStatus {
                target_id: target.id,
                url: target.url,
                is_active: target.is_active,
                check_count: target.check_count,
                last_check: target.last_check,
                active_subscriber_count: live.len() as i64,
                changes_count,
                emails_sent_count,
                minutes_left,
            });
        }
        Ok(statuses)
    }

    /// Historial de cambios de un objetivo, mas recientes primero.
    pub async fn get_change_history(&self, target_id: &str) -> MonitorResult<Vec<ChangeEvent>> {
        if self.store.get_target(target_id).await?.is_none() {
            return Err(MonitorError::TargetNotFound(target_id.to_string()));
        }
        Ok(self.store.list_change_events(target_id).await?)
    }

    /// Re-agenda al arrancar los objetivos que quedaron activos. Los que ya no tienen
    /// suscripciones vivas se cierran (con resumen).
    pub async fn resume_active_targets(&self) -> MonitorResult<usize> {
        let mut resumed = 0;
        for target in self.store.list_active_targets().await? {
            if self.lifecycle.is_target_live(&target.id).await? {
                if self.scheduler.start(&target, StartMode::Resume).await? {
                    resumed += 1;
                }
            } else {
                log::info!(
                    "(resume_active_targets) {} sin suscripciones vivas, cerrando",
                    target.url
                );
                self.scheduler.stop(&target.id).await;
            }
        }
        log::info!("(resume_active_targets) {} objetivos reanudados", resumed);
        Ok(resumed)
    }

    /// Corta todo el monitoreo (sin resumenes).
    pub async fn stop_all(&self) -> MonitorResult<usize> {
        let stopped = self.scheduler.stop_all();
        self.store.deactivate_all().await?;
        log::info!("(stop_all) {} tareas detenidas", stopped);
        Ok(stopped)
    }
}

fn validate_url(raw: &str) -> MonitorResult<String> {
    let url = Url::parse(raw.trim())
        .map_err(|e| MonitorError::InvalidRequest(format!("URL invalida '{}': {}", raw, e)))?;
    match url.scheme() {
        "http" | "https" if url.host_str().is_some() => Ok(url.to_string()),
        _ => Err(MonitorError::InvalidRequest(format!(
            "URL invalida '{}': se espera http(s)",
            raw
        ))),
    }
}
