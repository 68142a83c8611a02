//! services/lifecycle_service.rs
//! Ciclo de vida de suscriptores: quien sigue vivo, cuando se detiene un objetivo
//! y a quien se le manda bienvenida / resumen (una vez por direccion unica).

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use futures_util::future::join_all;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::{
    models::subscription_model::{ContactChannels, Subscription},
    services::{
        clock_service::Clock,
        notification_service::{DeliveryPlan, DeliveryReport, NotificationDispatcher},
        scheduler_service::{SchedulerState, StartMode, TargetScheduler},
        store_service::RecordStore,
    },
};

/// Resultado de registrar una suscripcion.
#[derive(Debug)]
pub struct Registration {
    pub subscription_id: String,
    pub target_id: String,
    /// Envio de bienvenida en curso (no bloquea el registro).
    pub welcome_delivery: Option<JoinHandle<DeliveryReport>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnsubscribeOutcome {
    NotFound,
    Deactivated { target_stopped: bool },
}

/// Colapsa suscripciones que comparten email o telefono en un solo envio por direccion.
/// Las claves ya presentes en `seen_emails` / `seen_phones` se omiten.
pub fn plan_deliveries(
    subscriptions: &[Subscription],
    mut seen_emails: HashSet<String>,
    mut seen_phones: HashSet<String>,
) -> Vec<DeliveryPlan> {
    subscriptions
        .iter()
        .filter_map(|sub| {
            let email = seen_emails.insert(sub.channels.email_key());
            let sms = sub
                .channels
                .phone_key()
                .map(|phone| seen_phones.insert(phone))
                .unwrap_or(false);
            (email || sms).then(|| DeliveryPlan {
                subscription: sub.clone(),
                email,
                sms,
            })
        })
        .collect()
}

pub fn unique_deliveries(subscriptions: &[Subscription]) -> Vec<DeliveryPlan> {
    plan_deliveries(subscriptions, HashSet::new(), HashSet::new())
}

#[derive(Clone)]
pub struct LifecycleManager {
    store: Arc<dyn RecordStore>,
    clock: Arc<dyn Clock>,
    dispatcher: NotificationDispatcher,
}

impl LifecycleManager {
    pub fn new(
        store: Arc<dyn RecordStore>,
        clock: Arc<dyn Clock>,
        dispatcher: NotificationDispatcher,
    ) -> Self {
        Self {
            store,
            clock,
            dispatcher,
        }
    }

    pub async fn live_subscriptions(&self, target_id: &str) -> Result<Vec<Subscription>> {
        self.store
            .live_subscriptions(target_id, self.clock.now())
            .await
    }

    pub async fn is_target_live(&self, target_id: &str) -> Result<bool> {
        let count = self
            .store
            .count_live_subscriptions(target_id, self.clock.now())
            .await?;
        Ok(count > 0)
    }

    /// Destinatarios de una alerta: suscripciones vivas, una vez por direccion.
    pub async fn alert_plans(&self, target_id: &str) -> Result<Vec<DeliveryPlan>> {
        let live = self.live_subscriptions(target_id).await?;
        Ok(unique_deliveries(&live))
    }

    /// Crea o reactiva el objetivo, guarda la suscripcion y arranca el scheduler
    /// si el objetivo no esta en `Polling`. Corre con el turno del objetivo tomado:
    /// un `stop` concurrente espera y despues ve la suscripcion nueva.
    pub async fn register_subscription(
        &self,
        scheduler: &TargetScheduler,
        url: &str,
        channels: ContactChannels,
        poll_interval_minutes: i64,
        duration_minutes: i64,
    ) -> Result<Registration> {
        let target = self
            .store
            .upsert_target(url, poll_interval_minutes, self.clock.now())
            .await?;
        let _turn = scheduler.lock_target(&target.id).await;

        // Direcciones que ya reciben avisos de este objetivo: no se repite la bienvenida.
        let already_live = self
            .store
            .live_subscriptions(&target.id, self.clock.now())
            .await?;

        if scheduler.state(&target.id) != SchedulerState::Polling {
            scheduler.start(&target, StartMode::NewSession).await?;
        }

        let subscription = Subscription {
            id: Uuid::new_v4().to_string(),
            target_id: target.id.clone(),
            channels,
            polling_duration_minutes: duration_minutes,
            is_active: true,
            created_at: self.clock.now(),
        };
        self.store.insert_subscription(&subscription).await?;
        log::info!(
            "(register_subscription) Suscripcion {} creada para {} ({} min, cada {} min)",
            subscription.id,
            target.url,
            duration_minutes,
            poll_interval_minutes
        );

        let seen_emails = already_live.iter().map(|s| s.channels.email_key()).collect();
        let seen_phones = already_live
            .iter()
            .filter_map(|s| s.channels.phone_key())
            .collect();
        let welcome_delivery = plan_deliveries(
            std::slice::from_ref(&subscription),
            seen_emails,
            seen_phones,
        )
        .pop()
        .map(|plan| {
            let dispatcher = self.dispatcher.clone();
            let target = target.clone();
            tokio::spawn(async move { dispatcher.send_welcome(&plan, &target).await })
        });

        Ok(Registration {
            subscription_id: subscription.id,
            target_id: target.id,
            welcome_delivery,
        })
    }

    /// Desactiva la suscripcion; si era la ultima viva, detiene el objetivo
    /// (el scheduler dispara los resumenes).
    pub async fn unsubscribe(
        &self,
        scheduler: &TargetScheduler,
        subscription_id: &str,
    ) -> Result<UnsubscribeOutcome> {
        let Some(subscription) = self.store.get_subscription(subscription_id).await? else {
            return Ok(UnsubscribeOutcome::NotFound);
        };

        if self.store.deactivate_subscription(subscription_id).await? {
            log::info!("(unsubscribe) Suscripcion {} desactivada", subscription_id);
        }

        let target_stopped = if self.is_target_live(&subscription.target_id).await? {
            false
        } else {
            scheduler.stop(&subscription.target_id).await
        };

        Ok(UnsubscribeOutcome::Deactivated { target_stopped })
    }

    /// Marca el objetivo inactivo y manda el resumen de la sesion a cada direccion unica.
    pub async fn conclude_target(&self, target_id: &str) -> Result<Vec<DeliveryReport>> {
        self.store.set_target_active(target_id, false).await?;

        let target = self
            .store
            .get_target(target_id)
            .await?
            .ok_or_else(|| anyhow!("Objetivo {} no existe", target_id))?;

        let change_count = self
            .store
            .count_change_events(target_id, target.session_started_at)
            .await?;

        // Suscripciones creadas durante la sesion actual.
        let session_subs: Vec<Subscription> = self
            .store
            .list_subscriptions(target_id)
            .await?
            .into_iter()
            .filter(|s| {
                target
                    .session_started_at
                    .map_or(true, |started| s.created_at >= started)
            })
            .collect();

        let plans = unique_deliveries(&session_subs);
        log::info!(
            "(conclude_target) Objetivo {} detenido: {} consultas, {} cambios, {} resumenes",
            target.url,
            target.check_count,
            change_count,
            plans.len()
        );

        let reports = join_all(plans.iter().map(|plan| {
            self.dispatcher
                .send_summary(plan, &target, target.check_count, change_count)
        }))
        .await;
        Ok(reports)
    }
}
