//! tests/lifecycle_tests.rs

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Duration as ChronoDuration;

use crate::models::change_event_model::ChangeEvent;
use crate::models::subscription_model::{ContactChannels, Subscription};
use crate::services::clock_service::Clock;
use crate::services::lifecycle_service::{plan_deliveries, unique_deliveries, UnsubscribeOutcome};
use crate::services::notification_service::ChannelOutcome;
use crate::services::scheduler_service::SchedulerState;
use crate::services::store_service::RecordStore;
use crate::tests::support::{base_time, settle, Harness, ManualClock, PAGE_URL};

const PAGE: &str = "<html><body><p>Price: $10</p></body></html>";

fn sub(id: &str, email: &str, phone: Option<&str>) -> Subscription {
    Subscription {
        id: id.to_string(),
        target_id: "t-1".to_string(),
        channels: ContactChannels::new(email, phone.map(str::to_string)),
        polling_duration_minutes: 10,
        is_active: true,
        created_at: base_time(),
    }
}

fn manual_harness() -> (Harness, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(base_time()));
    (Harness::new(clock.clone(), PAGE), clock)
}

fn channels(email: &str, phone: Option<&str>) -> ContactChannels {
    ContactChannels::new(email, phone.map(str::to_string))
}

#[test]
fn test_subscription_liveness_window() {
    let s = sub("s-1", "ana@example.com", None);
    assert!(s.is_live(base_time()));
    assert!(s.is_live(base_time() + ChronoDuration::minutes(9)));
    assert!(!s.is_live(base_time() + ChronoDuration::minutes(10)));
    assert_eq!(s.minutes_left(base_time() + ChronoDuration::minutes(4)), 6);

    let mut inactive = s.clone();
    inactive.is_active = false;
    assert!(!inactive.is_live(base_time()));
    assert_eq!(inactive.minutes_left(base_time()), 0);
}

#[test]
fn test_unique_deliveries_collapses_shared_addresses() {
    let subs = vec![
        sub("s-1", "ana@example.com", Some("+541111")),
        sub("s-2", "ANA@Example.com", None),
        sub("s-3", "bob@example.com", Some("+541111")),
        sub("s-4", "ana@example.com", Some("+541111")),
    ];
    let plans = unique_deliveries(&subs);

    assert_eq!(plans.len(), 2);
    assert_eq!(plans[0].subscription.id, "s-1");
    assert!(plans[0].email && plans[0].sms);
    assert_eq!(plans[1].subscription.id, "s-3");
    assert!(plans[1].email, "bob tiene email propio");
    assert!(!plans[1].sms, "el telefono ya lo cubre s-1");
}

#[test]
fn test_plan_deliveries_skips_already_notified_addresses() {
    let subs = vec![sub("s-9", "ana@example.com", Some("+541111"))];

    let seen_emails: HashSet<String> = ["ana@example.com".to_string()].into_iter().collect();
    let plans = plan_deliveries(&subs, seen_emails, HashSet::new());
    assert_eq!(plans.len(), 1);
    assert!(!plans[0].email);
    assert!(plans[0].sms);

    let seen_emails: HashSet<String> = ["ana@example.com".to_string()].into_iter().collect();
    let seen_phones: HashSet<String> = ["+541111".to_string()].into_iter().collect();
    assert!(plan_deliveries(&subs, seen_emails, seen_phones).is_empty());
}

#[actix_rt::test]
async fn test_register_sends_welcome_and_starts_polling() {
    let (h, _clock) = manual_harness();

    let reg = h
        .lifecycle
        .register_subscription(&h.scheduler, PAGE_URL, channels("ana@example.com", Some("+541111")), 2, 30)
        .await
        .unwrap();

    assert_eq!(h.scheduler.state(&reg.target_id), SchedulerState::Polling);
    let report = reg
        .welcome_delivery
        .expect("deberia haber bienvenida")
        .await
        .unwrap();
    assert_eq!(report.email, ChannelOutcome::Sent);
    assert_eq!(report.sms, ChannelOutcome::Sent);
    assert_eq!(h.email.recipients_of("STARTED"), vec!["ana@example.com".to_string()]);

    let target = h.target();
    assert!(target.is_active);
    assert_eq!(target.poll_interval_minutes, 2);
    assert_eq!(target.session_started_at, Some(base_time()));

    h.scheduler.stop_all();
}

#[actix_rt::test]
async fn test_second_subscription_reuses_target_and_skips_repeat_welcome() {
    let (h, clock) = manual_harness();

    let first = h
        .lifecycle
        .register_subscription(&h.scheduler, PAGE_URL, channels("ana@example.com", None), 1, 30)
        .await
        .unwrap();
    clock.advance(ChronoDuration::minutes(1));
    let second = h
        .lifecycle
        .register_subscription(&h.scheduler, PAGE_URL, channels("Ana@Example.com", None), 1, 30)
        .await
        .unwrap();

    assert_eq!(first.target_id, second.target_id);
    assert_ne!(first.subscription_id, second.subscription_id);
    assert!(second.welcome_delivery.is_none());
    assert_eq!(h.scheduler.registry().polling_count(), 1);
    // El segundo registro no reinicia la sesion.
    assert_eq!(h.target().session_started_at, Some(base_time()));

    h.scheduler.stop_all();
}

#[actix_rt::test]
async fn test_unsubscribe_stops_target_only_with_last_live_subscription() {
    let (h, _clock) = manual_harness();

    let a = h
        .lifecycle
        .register_subscription(&h.scheduler, PAGE_URL, channels("ana@example.com", None), 1, 30)
        .await
        .unwrap();
    let b = h
        .lifecycle
        .register_subscription(&h.scheduler, PAGE_URL, channels("bob@example.com", None), 1, 30)
        .await
        .unwrap();
    settle().await;

    let outcome = h.lifecycle.unsubscribe(&h.scheduler, &a.subscription_id).await.unwrap();
    assert_eq!(outcome, UnsubscribeOutcome::Deactivated { target_stopped: false });
    assert_eq!(h.scheduler.state(&a.target_id), SchedulerState::Polling);
    assert!(h.email.recipients_of("ENDED").is_empty());

    let outcome = h.lifecycle.unsubscribe(&h.scheduler, &b.subscription_id).await.unwrap();
    assert_eq!(outcome, UnsubscribeOutcome::Deactivated { target_stopped: true });
    assert_eq!(h.scheduler.state(&b.target_id), SchedulerState::Stopped);
    assert!(!h.target().is_active);

    let mut ended = h.email.recipients_of("ENDED");
    ended.sort();
    assert_eq!(ended, vec!["ana@example.com".to_string(), "bob@example.com".to_string()]);

    // Repetir la baja no vuelve a mandar resumenes.
    let outcome = h.lifecycle.unsubscribe(&h.scheduler, &b.subscription_id).await.unwrap();
    assert_eq!(outcome, UnsubscribeOutcome::Deactivated { target_stopped: false });
    assert_eq!(h.email.recipients_of("ENDED").len(), 2);
}

#[actix_rt::test]
async fn test_unsubscribe_unknown_id_is_not_found() {
    let (h, _clock) = manual_harness();
    let outcome = h.lifecycle.unsubscribe(&h.scheduler, "no-such-id").await.unwrap();
    assert_eq!(outcome, UnsubscribeOutcome::NotFound);
}

#[actix_rt::test]
async fn test_summary_only_reaches_current_session_subscribers() {
    let (h, clock) = manual_harness();

    let old = h
        .lifecycle
        .register_subscription(&h.scheduler, PAGE_URL, channels("old@example.com", None), 1, 5)
        .await
        .unwrap();
    settle().await;
    h.lifecycle.unsubscribe(&h.scheduler, &old.subscription_id).await.unwrap();
    assert_eq!(h.email.recipients_of("ENDED"), vec!["old@example.com".to_string()]);

    clock.advance(ChronoDuration::minutes(20));
    let new = h
        .lifecycle
        .register_subscription(&h.scheduler, PAGE_URL, channels("new@example.com", None), 1, 5)
        .await
        .unwrap();
    assert_eq!(new.target_id, old.target_id);
    assert_eq!(h.scheduler.state(&new.target_id), SchedulerState::Polling);
    assert_eq!(h.target().check_count, 0, "nueva sesion desde cero");
    settle().await;

    h.lifecycle.unsubscribe(&h.scheduler, &new.subscription_id).await.unwrap();
    assert_eq!(
        h.email.recipients_of("ENDED"),
        vec!["old@example.com".to_string(), "new@example.com".to_string()]
    );
}

#[actix_rt::test]
async fn test_conclude_counts_only_changes_from_current_session() {
    let (h, clock) = manual_harness();

    let target = h.store.upsert_target(PAGE_URL, 1, clock.now()).await.unwrap();
    let stale = ChangeEvent {
        id: "e-old".to_string(),
        target_id: target.id.clone(),
        detected_at: clock.now(),
        content_before: "a".to_string(),
        content_after: "b".to_string(),
        email_sent: true,
        sms_sent: false,
    };
    h.store.insert_change_event(&stale).await.unwrap();

    clock.advance(ChronoDuration::minutes(10));
    h.store.begin_session(&target.id, clock.now()).await.unwrap();
    h.store
        .insert_subscription(&Subscription {
            id: "s-1".to_string(),
            target_id: target.id.clone(),
            channels: channels("ana@example.com", Some("+541111")),
            polling_duration_minutes: 5,
            is_active: true,
            created_at: clock.now(),
        })
        .await
        .unwrap();
    h.store
        .insert_change_event(&ChangeEvent {
            id: "e-new".to_string(),
            detected_at: clock.now() + ChronoDuration::minutes(1),
            ..stale.clone()
        })
        .await
        .unwrap();

    let reports = h.lifecycle.conclude_target(&target.id).await.unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].email, ChannelOutcome::Sent);
    assert_eq!(reports[0].sms, ChannelOutcome::Sent);

    let summaries = h.email.sent();
    assert_eq!(summaries.len(), 1);
    assert!(summaries[0].1.html.contains("<strong>Changes detected:</strong> 1"));
    assert!(h.sms.sent()[0].1.contains("1 change(s)"));
    assert!(!h.target().is_active);
}

#[actix_rt::test]
async fn test_is_target_live_follows_expiry() {
    let (h, clock) = manual_harness();
    let reg = h
        .lifecycle
        .register_subscription(&h.scheduler, PAGE_URL, channels("ana@example.com", None), 1, 3)
        .await
        .unwrap();

    assert!(h.lifecycle.is_target_live(&reg.target_id).await.unwrap());
    clock.advance(ChronoDuration::minutes(3));
    assert!(!h.lifecycle.is_target_live(&reg.target_id).await.unwrap());
    assert!(h.lifecycle.alert_plans(&reg.target_id).await.unwrap().is_empty());

    h.scheduler.stop_all();
}

#[actix_rt::test]
async fn test_late_registration_keeps_expiring_target_alive() {
    let (h, clock) = manual_harness();
    let first = h
        .lifecycle
        .register_subscription(&h.scheduler, PAGE_URL, channels("ana@example.com", None), 1, 5)
        .await
        .unwrap();
    settle().await;

    clock.advance(ChronoDuration::minutes(6));
    assert!(!h.lifecycle.is_target_live(&first.target_id).await.unwrap());

    // Entra un registro mientras el objetivo sigue en Polling; despues llega el stop
    // que el tick ya habia decidido.
    let late = h
        .lifecycle
        .register_subscription(&h.scheduler, PAGE_URL, channels("bob@example.com", None), 1, 30)
        .await
        .unwrap();
    assert_eq!(late.target_id, first.target_id);
    assert!(!h.scheduler.stop(&first.target_id).await);

    assert_eq!(h.scheduler.state(&late.target_id), SchedulerState::Polling);
    assert!(h.lifecycle.is_target_live(&late.target_id).await.unwrap());
    assert!(h.target().is_active);
    assert!(h.email.recipients_of("ENDED").is_empty());

    let outcome = h.lifecycle.unsubscribe(&h.scheduler, &late.subscription_id).await.unwrap();
    assert_eq!(outcome, UnsubscribeOutcome::Deactivated { target_stopped: true });
    assert_eq!(h.scheduler.state(&late.target_id), SchedulerState::Stopped);
}

#[actix_rt::test]
async fn test_shared_email_gets_one_summary_when_target_stops() {
    let (h, _clock) = manual_harness();
    let a = h
        .lifecycle
        .register_subscription(&h.scheduler, PAGE_URL, channels("ana@example.com", None), 1, 30)
        .await
        .unwrap();
    let b = h
        .lifecycle
        .register_subscription(&h.scheduler, PAGE_URL, channels("Ana@Example.com", None), 1, 30)
        .await
        .unwrap();
    settle().await;

    h.lifecycle.unsubscribe(&h.scheduler, &a.subscription_id).await.unwrap();
    let outcome = h.lifecycle.unsubscribe(&h.scheduler, &b.subscription_id).await.unwrap();
    assert_eq!(outcome, UnsubscribeOutcome::Deactivated { target_stopped: true });

    assert_eq!(h.email.recipients_of("ENDED").len(), 1);
}
