//! tests/support.rs
//! Dobles de prueba: store en memoria con fallos inyectables, fetcher con guion,
//! canales que graban lo enviado, juez con guion y relojes controlables.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use crate::config::monitor_config::MonitorConfig;
use crate::models::change_event_model::{ChangeEvent, DeliveryChannel};
use crate::models::monitor_model::StartMonitoringRequest;
use crate::models::subscription_model::Subscription;
use crate::models::target_model::MonitoredTarget;
use crate::services::classifier_service::{SignificanceClassifier, TokenDiff};
use crate::services::clock_service::Clock;
use crate::services::email_service::EmailChannel;
use crate::services::fetcher_service::{FetchDiagnostics, FetchOutcome, Fetcher};
use crate::services::judge_service::{JudgeVerdict, SemanticJudge};
use crate::services::lifecycle_service::LifecycleManager;
use crate::services::monitor_service::MonitorService;
use crate::services::notification_service::{DeliveryPlan, NotificationDispatcher};
use crate::services::scheduler_service::TargetScheduler;
use crate::services::sms_service::ShortMessageChannel;
use crate::services::store_service::RecordStore;
use crate::services::template_service::EmailContent;

pub const PAGE_URL: &str = "https://example.com/offers";

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 10, 12, 0, 0).unwrap()
}

// --------------------------------------------------------------------------------
// Relojes
// --------------------------------------------------------------------------------

/// Reloj que solo avanza cuando el test lo pide.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap();
        *now = *now + by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// Reloj que sigue al tiempo de tokio (pausable con `start_paused`).
pub struct TokioClock {
    base: DateTime<Utc>,
    origin: tokio::time::Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self {
            base: base_time(),
            origin: tokio::time::Instant::now(),
        }
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        self.base + chrono::Duration::from_std(self.origin.elapsed()).unwrap()
    }
}

// --------------------------------------------------------------------------------
// Store en memoria
// --------------------------------------------------------------------------------

#[derive(Default)]
struct MemoryState {
    targets: Vec<MonitoredTarget>,
    subscriptions: Vec<Subscription>,
    events: Vec<ChangeEvent>,
}

#[derive(Default)]
pub struct MemoryRecordStore {
    state: Mutex<MemoryState>,
    failing: AtomicBool,
    failing_events: AtomicBool,
}

impl MemoryRecordStore {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Solo fallan las escrituras de `ChangeEvent`; el resto del store responde.
    pub fn set_failing_events(&self, failing: bool) {
        self.failing_events.store(failing, Ordering::SeqCst);
    }

    fn check_events(&self) -> Result<()> {
        self.check()?;
        if self.failing_events.load(Ordering::SeqCst) {
            return Err(anyhow!("tabla de eventos bloqueada"));
        }
        Ok(())
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(anyhow!("store no disponible"));
        }
        Ok(())
    }

    pub fn target_by_url(&self, url: &str) -> Option<MonitoredTarget> {
        let state = self.state.lock().unwrap();
        state.targets.iter().find(|t| t.url == url).cloned()
    }

    pub fn events(&self) -> Vec<ChangeEvent> {
        self.state.lock().unwrap().events.clone()
    }

    fn with_target<T>(&self, target_id: &str, f: impl FnOnce(&mut MonitoredTarget) -> T) -> Result<T> {
        self.check()?;
        let mut state = self.state.lock().unwrap();
        let target = state
            .targets
            .iter_mut()
            .find(|t| t.id == target_id)
            .ok_or_else(|| anyhow!("Objetivo {} no existe", target_id))?;
        Ok(f(target))
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn find_target_by_url(&self, url: &str) -> Result<Option<MonitoredTarget>> {
        self.check()?;
        Ok(self.target_by_url(url))
    }

    async fn get_target(&self, target_id: &str) -> Result<Option<MonitoredTarget>> {
        self.check()?;
        let state = self.state.lock().unwrap();
        Ok(state.targets.iter().find(|t| t.id == target_id).cloned())
    }

    async fn upsert_target(
        &self,
        url: &str,
        poll_interval_minutes: i64,
        now: DateTime<Utc>,
    ) -> Result<MonitoredTarget> {
        self.check()?;
        let mut state = self.state.lock().unwrap();
        if let Some(target) = state.targets.iter_mut().find(|t| t.url == url) {
            target.is_active = true;
            target.poll_interval_minutes = poll_interval_minutes;
            return Ok(target.clone());
        }
        let target = MonitoredTarget {
            id: uuid::Uuid::new_v4().to_string(),
            url: url.to_string(),
            last_check: None,
            last_snapshot: None,
            last_diagnostics: None,
            check_count: 0,
            is_active: true,
            poll_interval_minutes,
            session_started_at: None,
            created_at: now,
        };
        state.targets.push(target.clone());
        Ok(target)
    }

    async fn list_targets(&self) -> Result<Vec<MonitoredTarget>> {
        self.check()?;
        Ok(self.state.lock().unwrap().targets.clone())
    }

    async fn list_active_targets(&self) -> Result<Vec<MonitoredTarget>> {
        self.check()?;
        let state = self.state.lock().unwrap();
        Ok(state.targets.iter().filter(|t| t.is_active).cloned().collect())
    }

    async fn begin_session(&self, target_id: &str, now: DateTime<Utc>) -> Result<()> {
        self.with_target(target_id, |t| {
            t.is_active = true;
            t.check_count = 0;
            t.last_snapshot = None;
            t.last_diagnostics = None;
            t.session_started_at = Some(now);
        })
    }

    async fn record_baseline(
        &self,
        target_id: &str,
        snapshot: &str,
        diagnostics: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.with_target(target_id, |t| {
            t.last_snapshot = Some(snapshot.to_string());
            t.last_diagnostics = Some(diagnostics.to_string());
            t.last_check = Some(now);
        })
    }

    async fn latest_snapshot(&self, target_id: &str) -> Result<Option<String>> {
        self.with_target(target_id, |t| t.last_snapshot.clone())
    }

    async fn record_check(
        &self,
        target_id: &str,
        snapshot: &str,
        diagnostics: &str,
        now: DateTime<Utc>,
    ) -> Result<i64> {
        self.with_target(target_id, |t| {
            t.check_count += 1;
            t.last_snapshot = Some(snapshot.to_string());
            t.last_diagnostics = Some(diagnostics.to_string());
            t.last_check = Some(now);
            t.check_count
        })
    }

    async fn record_change(&self, event: &ChangeEvent, diagnostics: &str) -> Result<i64> {
        self.check_events()?;
        let mut state = self.state.lock().unwrap();
        let target = state
            .targets
            .iter_mut()
            .find(|t| t.id == event.target_id)
            .ok_or_else(|| anyhow!("Objetivo {} no existe", event.target_id))?;
        target.check_count += 1;
        target.last_snapshot = Some(event.content_after.clone());
        target.last_diagnostics = Some(diagnostics.to_string());
        target.last_check = Some(event.detected_at);
        let count = target.check_count;
        state.events.push(event.clone());
        Ok(count)
    }

    async fn set_target_active(&self, target_id: &str, active: bool) -> Result<()> {
        self.with_target(target_id, |t| t.is_active = active)
    }

    async fn insert_subscription(&self, subscription: &Subscription) -> Result<()> {
        self.check()?;
        self.state
            .lock()
            .unwrap()
            .subscriptions
            .push(subscription.clone());
        Ok(())
    }

    async fn get_subscription(&self, subscription_id: &str) -> Result<Option<Subscription>> {
        self.check()?;
        let state = self.state.lock().unwrap();
        Ok(state
            .subscriptions
            .iter()
            .find(|s| s.id == subscription_id)
            .cloned())
    }

    async fn deactivate_subscription(&self, subscription_id: &str) -> Result<bool> {
        self.check()?;
        let mut state = self.state.lock().unwrap();
        match state
            .subscriptions
            .iter_mut()
            .find(|s| s.id == subscription_id && s.is_active)
        {
            Some(sub) => {
                sub.is_active = false;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_subscriptions(&self, target_id: &str) -> Result<Vec<Subscription>> {
        self.check()?;
        let state = self.state.lock().unwrap();
        Ok(state
            .subscriptions
            .iter()
            .filter(|s| s.target_id == target_id)
            .cloned()
            .collect())
    }

    async fn live_subscriptions(
        &self,
        target_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<Subscription>> {
        Ok(self
            .list_subscriptions(target_id)
            .await?
            .into_iter()
            .filter(|s| s.is_live(now))
            .collect())
    }

    async fn count_live_subscriptions(&self, target_id: &str, now: DateTime<Utc>) -> Result<i64> {
        Ok(self.live_subscriptions(target_id, now).await?.len() as i64)
    }

    async fn insert_change_event(&self, event: &ChangeEvent) -> Result<()> {
        self.check_events()?;
        self.state.lock().unwrap().events.push(event.clone());
        Ok(())
    }

    async fn mark_delivered(&self, event_id: &str, channel: DeliveryChannel) -> Result<()> {
        self.check()?;
        let mut state = self.state.lock().unwrap();
        let event = state
            .events
            .iter_mut()
            .find(|e| e.id == event_id)
            .ok_or_else(|| anyhow!("Evento {} no existe", event_id))?;
        match channel {
            DeliveryChannel::Email => event.email_sent = true,
            DeliveryChannel::ShortMessage => event.sms_sent = true,
        }
        Ok(())
    }

    async fn list_change_events(&self, target_id: &str) -> Result<Vec<ChangeEvent>> {
        self.check()?;
        let state = self.state.lock().unwrap();
        let mut events: Vec<ChangeEvent> = state
            .events
            .iter()
            .filter(|e| e.target_id == target_id)
            .cloned()
            .collect();
        events.sort_by(|a, b| b.detected_at.cmp(&a.detected_at));
        Ok(events)
    }

    async fn count_change_events(
        &self,
        target_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<i64> {
        Ok(self
            .list_change_events(target_id)
            .await?
            .iter()
            .filter(|e| since.map_or(true, |s| e.detected_at >= s))
            .count() as i64)
    }

    async fn count_emails_sent(&self, target_id: &str) -> Result<i64> {
        Ok(self
            .list_change_events(target_id)
            .await?
            .iter()
            .filter(|e| e.email_sent)
            .count() as i64)
    }

    async fn deactivate_all(&self) -> Result<()> {
        self.check()?;
        let mut state = self.state.lock().unwrap();
        state.targets.iter_mut().for_each(|t| t.is_active = false);
        state.subscriptions.iter_mut().for_each(|s| s.is_active = false);
        Ok(())
    }
}

// --------------------------------------------------------------------------------
// Fetcher con guion
// --------------------------------------------------------------------------------

/// Devuelve primero las respuestas encoladas y despues `fallback`.
pub struct ScriptedFetcher {
    queue: Mutex<VecDeque<Result<String, String>>>,
    fallback: Mutex<String>,
    calls: AtomicUsize,
}

impl ScriptedFetcher {
    pub fn new(fallback: &str) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(fallback.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn push_ok(&self, markup: &str) {
        self.queue.lock().unwrap().push_back(Ok(markup.to_string()));
    }

    pub fn push_err(&self, message: &str) {
        self.queue
            .lock()
            .unwrap()
            .push_back(Err(message.to_string()));
    }

    pub fn set_fallback(&self, markup: &str) {
        *self.fallback.lock().unwrap() = markup.to_string();
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchOutcome> {
        let attempt = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let next = self.queue.lock().unwrap().pop_front();
        let markup = match next {
            Some(Ok(markup)) => markup,
            Some(Err(message)) => return Err(anyhow!(message)),
            None => self.fallback.lock().unwrap().clone(),
        };
        Ok(FetchOutcome {
            diagnostics: FetchDiagnostics {
                timestamp: base_time(),
                url: url.to_string(),
                status_code: 200,
                content_length: markup.len(),
                attempts: 1,
                elapsed_ms: attempt as u64,
            },
            markup,
        })
    }
}

// --------------------------------------------------------------------------------
// Canales que graban
// --------------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingEmail {
    sent: Mutex<Vec<(String, EmailContent)>>,
    failing: AtomicBool,
}

impl RecordingEmail {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<(String, EmailContent)> {
        self.sent.lock().unwrap().clone()
    }

    /// Destinatarios de los emails cuyo asunto contiene `needle`.
    pub fn recipients_of(&self, needle: &str) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter(|(_, c)| c.subject.contains(needle))
            .map(|(to, _)| to)
            .collect()
    }
}

#[async_trait]
impl EmailChannel for RecordingEmail {
    async fn send_email(&self, address: &str, content: &EmailContent) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(anyhow!("smtp caido"));
        }
        self.sent
            .lock()
            .unwrap()
            .push((address.to_string(), content.clone()));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingSms {
    sent: Mutex<Vec<(String, String)>>,
    failing: AtomicBool,
}

impl RecordingSms {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl ShortMessageChannel for RecordingSms {
    async fn send_short_message(&self, address: &str, body: &str) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(anyhow!("gateway caido"));
        }
        self.sent
            .lock()
            .unwrap()
            .push((address.to_string(), body.to_string()));
        Ok(())
    }
}

// --------------------------------------------------------------------------------
// Juez con guion
// --------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub enum JudgeBehavior {
    Reply(JudgeVerdict),
    Fail,
    /// Nunca responde (para probar el timeout).
    Hang,
}

pub struct ScriptedJudge {
    behavior: JudgeBehavior,
    seen: Mutex<Vec<TokenDiff>>,
}

impl ScriptedJudge {
    pub fn new(behavior: JudgeBehavior) -> Self {
        Self {
            behavior,
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn seen(&self) -> Vec<TokenDiff> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl SemanticJudge for ScriptedJudge {
    async fn classify(&self, diff: &TokenDiff) -> Result<JudgeVerdict> {
        self.seen.lock().unwrap().push(diff.clone());
        match self.behavior {
            JudgeBehavior::Reply(verdict) => Ok(verdict),
            JudgeBehavior::Fail => Err(anyhow!("quota exceeded")),
            JudgeBehavior::Hang => {
                std::future::pending::<()>().await;
                unreachable!()
            }
        }
    }
}

// --------------------------------------------------------------------------------
// Arnes completo
// --------------------------------------------------------------------------------

pub struct Harness {
    pub store: Arc<MemoryRecordStore>,
    pub fetcher: Arc<ScriptedFetcher>,
    pub email: Arc<RecordingEmail>,
    pub sms: Arc<RecordingSms>,
    pub dispatcher: NotificationDispatcher,
    pub lifecycle: LifecycleManager,
    pub scheduler: TargetScheduler,
    pub service: MonitorService,
}

impl Harness {
    /// Arnes con juez ausente (clasificacion solo heuristica) y canales habilitados.
    pub fn new(clock: Arc<dyn Clock>, page: &str) -> Self {
        Self::build(clock, page, true, SignificanceClassifier::heuristic_only())
    }

    /// Igual que `new` pero sin canal SMS configurado.
    pub fn without_sms(clock: Arc<dyn Clock>, page: &str) -> Self {
        Self::build(clock, page, false, SignificanceClassifier::heuristic_only())
    }

    pub fn with_classifier(
        clock: Arc<dyn Clock>,
        page: &str,
        classifier: SignificanceClassifier,
    ) -> Self {
        Self::build(clock, page, true, classifier)
    }

    fn build(
        clock: Arc<dyn Clock>,
        page: &str,
        sms_enabled: bool,
        classifier: SignificanceClassifier,
    ) -> Self {
        let store = Arc::new(MemoryRecordStore::default());
        let fetcher = Arc::new(ScriptedFetcher::new(page));
        let email = Arc::new(RecordingEmail::default());
        let sms = Arc::new(RecordingSms::default());

        let dyn_store: Arc<dyn RecordStore> = store.clone();
        let sms_channel: Option<Arc<dyn ShortMessageChannel>> = if sms_enabled {
            Some(sms.clone())
        } else {
            None
        };
        let dispatcher = NotificationDispatcher::new(
            Some(email.clone()),
            sms_channel,
            dyn_store.clone(),
            "WEB ALERT: PAGE UPDATE".to_string(),
        );
        let lifecycle = LifecycleManager::new(dyn_store.clone(), clock.clone(), dispatcher.clone());
        let scheduler = TargetScheduler::new(
            dyn_store.clone(),
            fetcher.clone(),
            classifier,
            dispatcher.clone(),
            lifecycle.clone(),
            clock.clone(),
        );
        let service = MonitorService::new(
            dyn_store,
            lifecycle.clone(),
            scheduler.clone(),
            clock,
            MonitorConfig::default(),
        );

        Self {
            store,
            fetcher,
            email,
            sms,
            dispatcher,
            lifecycle,
            scheduler,
            service,
        }
    }

    pub fn target(&self) -> MonitoredTarget {
        self.store
            .target_by_url(PAGE_URL)
            .expect("el objetivo deberia existir")
    }
}

pub fn request(email: &str, phone: Option<&str>, interval: i64, duration: i64) -> StartMonitoringRequest {
    StartMonitoringRequest {
        website_url: PAGE_URL.to_string(),
        email: email.to_string(),
        phone: phone.map(str::to_string),
        duration,
        polling_interval: Some(interval),
    }
}

/// Plan que usa todos los canales configurados de la suscripcion.
pub fn full_plan(subscription: Subscription) -> DeliveryPlan {
    let sms = subscription.channels.phone_key().is_some();
    DeliveryPlan {
        subscription,
        email: true,
        sms,
    }
}

/// Deja correr las tareas pendientes (con tiempo pausado avanza 1 ms).
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

pub fn minutes(n: u64) -> Duration {
    Duration::from_secs(n * 60)
}
