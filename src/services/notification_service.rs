//! services/notification_service.rs
//! Despachador de notificaciones: alerta, bienvenida y resumen por email / SMS.
//!
//! Cada canal es independiente: el fallo de uno no bloquea al otro. Los flags de
//! entrega de un `ChangeEvent` solo se marcan despues de un envio confirmado.

use std::sync::Arc;

use futures_util::future::{join, join_all};

use crate::{
    models::{
        change_event_model::{ChangeEvent, DeliveryChannel},
        subscription_model::Subscription,
        target_model::MonitoredTarget,
    },
    services::{
        classifier_service::visible_diff,
        email_service::EmailChannel,
        sms_service::ShortMessageChannel,
        store_service::RecordStore,
        template_service::{
            render_alert, render_summary, render_welcome, RenderedMessage, SummaryFacts,
            ALERT_TOKEN_LIMIT,
        },
    },
};

/// A que canales de una suscripcion hay que enviar (tras deduplicar direcciones).
#[derive(Debug, Clone)]
pub struct DeliveryPlan {
    pub subscription: Subscription,
    pub email: bool,
    pub sms: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelOutcome {
    Sent,
    Failed,
    /// Canal sin credenciales para este proceso.
    Disabled,
    NotRequested,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub subscription_id: String,
    pub email: ChannelOutcome,
    pub sms: ChannelOutcome,
}

#[derive(Clone)]
pub struct NotificationDispatcher {
    email: Option<Arc<dyn EmailChannel>>,
    sms: Option<Arc<dyn ShortMessageChannel>>,
    store: Arc<dyn RecordStore>,
    alert_subject: String,
}

impl NotificationDispatcher {
    pub fn new(
        email: Option<Arc<dyn EmailChannel>>,
        sms: Option<Arc<dyn ShortMessageChannel>>,
        store: Arc<dyn RecordStore>,
        alert_subject: String,
    ) -> Self {
        if email.is_none() {
            log::warn!("(NotificationDispatcher) Canal de email deshabilitado (sin credenciales SMTP)");
        }
        if sms.is_none() {
            log::warn!("(NotificationDispatcher) Canal SMS deshabilitado (sin gateway configurado)");
        }
        Self {
            email,
            sms,
            store,
            alert_subject,
        }
    }

    /// Envia la alerta de un cambio y registra los flags de entrega en el evento.
    pub async fn send_alert(
        &self,
        plan: &DeliveryPlan,
        target: &MonitoredTarget,
        event: &ChangeEvent,
    ) -> DeliveryReport {
        let diff = visible_diff(&event.content_before, &event.content_after, ALERT_TOKEN_LIMIT + 1);
        let message = render_alert(&self.alert_subject, &target.url, event.detected_at, &diff);
        let report = self.deliver(plan, &message, "alert").await;

        if report.email == ChannelOutcome::Sent {
            self.record_delivery(&event.id, DeliveryChannel::Email).await;
        }
        if report.sms == ChannelOutcome::Sent {
            self.record_delivery(&event.id, DeliveryChannel::ShortMessage).await;
        }
        report
    }

    /// Fan-out de una alerta a varias suscripciones, todas en paralelo.
    pub async fn send_alerts(
        &self,
        plans: &[DeliveryPlan],
        target: &MonitoredTarget,
        event: &ChangeEvent,
    ) -> Vec<DeliveryReport> {
        join_all(plans.iter().map(|plan| self.send_alert(plan, target, event))).await
    }

    pub async fn send_welcome(&self, plan: &DeliveryPlan, target: &MonitoredTarget) -> DeliveryReport {
        let sub = &plan.subscription;
        let message = render_welcome(
            &target.url,
            target.poll_interval_minutes,
            sub.polling_duration_minutes,
            sub.created_at,
        );
        self.deliver(plan, &message, "welcome").await
    }

    pub async fn send_summary(
        &self,
        plan: &DeliveryPlan,
        target: &MonitoredTarget,
        check_count: i64,
        change_count: i64,
    ) -> DeliveryReport {
        let facts = SummaryFacts {
            duration_minutes: plan.subscription.polling_duration_minutes,
            check_count,
            change_count,
            last_check: target.last_check,
        };
        let message = render_summary(&target.url, &facts);
        self.deliver(plan, &message, "summary").await
    }

    async fn deliver(&self, plan: &DeliveryPlan, message: &RenderedMessage, kind: &str) -> DeliveryReport {
        let channels = &plan.subscription.channels;

        let email_fut = async {
            if !plan.email {
                return ChannelOutcome::NotRequested;
            }
            let Some(channel) = &self.email else {
                return ChannelOutcome::Disabled;
            };
            match channel.send_email(&channels.email, &message.email).await {
                Ok(()) => ChannelOutcome::Sent,
                Err(e) => {
                    log::error!(
                        "(deliver) Fallo email {} a {}: {:?}",
                        kind,
                        channels.email,
                        e
                    );
                    ChannelOutcome::Failed
                }
            }
        };

        let sms_fut = async {
            let phone = match channels.phone_key() {
                Some(phone) if plan.sms => phone,
                _ => return ChannelOutcome::NotRequested,
            };
            let Some(channel) = &self.sms else {
                return ChannelOutcome::Disabled;
            };
            match channel.send_short_message(&phone, &message.short_message).await {
                Ok(()) => ChannelOutcome::Sent,
                Err(e) => {
                    log::error!("(deliver) Fallo SMS {} a {}: {:?}", kind, phone, e);
                    ChannelOutcome::Failed
                }
            }
        };

        let (email, sms) = join(email_fut, sms_fut).await;
        log::info!(
            "(deliver) {} para suscripcion {}: email={:?} sms={:?}",
            kind,
            plan.subscription.id,
            email,
            sms
        );

        DeliveryReport {
            subscription_id: plan.subscription.id.clone(),
            email,
            sms,
        }
    }

    async fn record_delivery(&self, event_id: &str, channel: DeliveryChannel) {
        if let Err(e) = self.store.mark_delivered(event_id, channel).await {
            log::error!(
                "(record_delivery) No se pudo marcar {} en evento {}: {:?}",
                channel.as_str(),
                event_id,
                e
            );
        }
    }
}
