//! services/scheduler_service.rs
//! Scheduler de objetivos: una tarea tokio independiente y cancelable por objetivo.
//!
//! Estados por objetivo: `Unscheduled -> Polling -> Stopped`. Los ticks de un mismo
//! objetivo corren dentro de su propia tarea, uno detras de otro; objetivos distintos
//! corren en paralelo sin estado compartido salvo el `RecordStore`.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{watch, Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use uuid::Uuid;

use crate::{
    models::{change_event_model::ChangeEvent, target_model::MonitoredTarget},
    services::{
        classifier_service::SignificanceClassifier,
        clock_service::Clock,
        fetcher_service::{FetchOutcome, Fetcher},
        lifecycle_service::LifecycleManager,
        notification_service::{DeliveryReport, NotificationDispatcher},
        store_service::RecordStore,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Unscheduled,
    Polling,
    Stopped,
}

/// Como entra un objetivo en `Polling`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartMode {
    /// Nueva sesion: contador a 0 y snapshot borrado.
    NewSession,
    /// Reanudacion tras reinicio del proceso: conserva contador y sesion.
    Resume,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Fetch,
    Store,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Snapshot inicial guardado; no cuenta como consulta.
    Baseline,
    Unchanged { check_count: i64 },
    ChangeDetected { check_count: i64, event_id: String },
    Skipped(SkipReason),
    Stopped,
}

/// Resultado interno de intentar detener un objetivo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopOutcome {
    Stopped,
    AlreadyStopped,
    /// Aparecio una suscripcion viva mientras se esperaba el turno del objetivo.
    StillLive,
    StoreError,
}

#[derive(Debug)]
pub struct TickReport {
    pub outcome: TickOutcome,
    /// Fan-out de la alerta, desacoplado del tick.
    pub alert_delivery: Option<JoinHandle<Vec<DeliveryReport>>>,
}

impl TickReport {
    fn outcome(outcome: TickOutcome) -> Self {
        TickReport {
            outcome,
            alert_delivery: None,
        }
    }
}

struct TaskHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

#[derive(Default)]
struct RegistryInner {
    tasks: HashMap<String, TaskHandle>,
    stopped: HashSet<String>,
    gates: HashMap<String, Arc<AsyncMutex<()>>>,
}

/// Arena de tareas por objetivo. Quien retira la entrada de un objetivo es quien
/// ejecuta el cierre; las demas llamadas a `stop` son no-ops.
///
/// Cada objetivo tiene ademas un turno asincrono (`gate`): registro de suscripciones
/// y detencion lo toman, asi que nunca se intercalan sobre el mismo objetivo.
#[derive(Default)]
pub struct TaskRegistry {
    inner: Mutex<RegistryInner>,
}

impl TaskRegistry {
    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        // Un panic con el lock tomado no deja el mapa inconsistente: se sigue usando.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self, target_id: &str) -> SchedulerState {
        let inner = self.lock();
        if inner.tasks.contains_key(target_id) {
            SchedulerState::Polling
        } else if inner.stopped.contains(target_id) {
            SchedulerState::Stopped
        } else {
            SchedulerState::Unscheduled
        }
    }

    pub fn polling_count(&self) -> usize {
        self.lock().tasks.len()
    }

    /// Espera el turno exclusivo del objetivo. Se libera al soltar el guard.
    pub async fn gate(&self, target_id: &str) -> OwnedMutexGuard<()> {
        let gate = self
            .lock()
            .gates
            .entry(target_id.to_string())
            .or_default()
            .clone();
        gate.lock_owned().await
    }

    /// Registra la tarea que devuelve `spawn` salvo que el objetivo ya este en `Polling`.
    fn register_with<F>(&self, target_id: &str, spawn: F) -> bool
    where
        F: FnOnce(watch::Receiver<bool>) -> JoinHandle<()>,
    {
        let mut inner = self.lock();
        if inner.tasks.contains_key(target_id) {
            return false;
        }
        let (shutdown, rx) = watch::channel(false);
        let join = spawn(rx);
        inner.stopped.remove(target_id);
        inner
            .tasks
            .insert(target_id.to_string(), TaskHandle { shutdown, join });
        true
    }

    /// `None` si el objetivo ya estaba `Stopped`; si no, lo pasa a `Stopped` y
    /// devuelve la tarea (si la habia).
    fn retire(&self, target_id: &str) -> Option<Option<TaskHandle>> {
        let mut inner = self.lock();
        let handle = inner.tasks.remove(target_id);
        let newly_stopped = inner.stopped.insert(target_id.to_string());
        if handle.is_none() && !newly_stopped {
            return None;
        }
        Some(handle)
    }

    fn retire_all(&self) -> Vec<(String, TaskHandle)> {
        let mut inner = self.lock();
        let drained: Vec<(String, TaskHandle)> = inner.tasks.drain().collect();
        for (target_id, _) in &drained {
            inner.stopped.insert(target_id.clone());
        }
        drained
    }
}

#[derive(Clone)]
pub struct TargetScheduler {
    registry: Arc<TaskRegistry>,
    store: Arc<dyn RecordStore>,
    fetcher: Arc<dyn Fetcher>,
    classifier: SignificanceClassifier,
    dispatcher: NotificationDispatcher,
    lifecycle: LifecycleManager,
    clock: Arc<dyn Clock>,
}

impl TargetScheduler {
    pub fn new(
        store: Arc<dyn RecordStore>,
        fetcher: Arc<dyn Fetcher>,
        classifier: SignificanceClassifier,
        dispatcher: NotificationDispatcher,
        lifecycle: LifecycleManager,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registry: Arc::new(TaskRegistry::default()),
            store,
            fetcher,
            classifier,
            dispatcher,
            lifecycle,
            clock,
        }
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub fn state(&self, target_id: &str) -> SchedulerState {
        self.registry.state(target_id)
    }

    /// Pasa el objetivo a `Polling`. Devuelve `false` si ya lo estaba.
    /// El baseline se hace dentro de la tarea; si falla, lo reintenta el siguiente tick.
    pub async fn start(&self, target: &MonitoredTarget, mode: StartMode) -> Result<bool> {
        if self.state(&target.id) == SchedulerState::Polling {
            return Ok(false);
        }

        match mode {
            StartMode::NewSession => self.store.begin_session(&target.id, self.clock.now()).await?,
            StartMode::Resume => self.store.set_target_active(&target.id, true).await?,
        }

        let period = Duration::from_secs(target.poll_interval_minutes.max(1) as u64 * 60);
        let scheduler = self.clone();
        let task_target = target.clone();
        let started = self.registry.register_with(&target.id, move |shutdown| {
            tokio::spawn(scheduler.run_loop(task_target, period, shutdown))
        });

        if started {
            log::info!(
                "(start) Monitoreando {} cada {} min ({:?})",
                target.url,
                target.poll_interval_minutes,
                mode
            );
        }
        Ok(started)
    }

    /// Turno exclusivo del objetivo, compartido con `stop`.
    pub async fn lock_target(&self, target_id: &str) -> OwnedMutexGuard<()> {
        self.registry.gate(target_id).await
    }

    /// Detiene el objetivo si ya no tiene suscripciones vivas y dispara los resumenes
    /// de fin de vida. Devuelve `false` si ya estaba detenido o si sigue vivo.
    /// Se puede llamar desde el propio tick del objetivo.
    pub async fn stop(&self, target_id: &str) -> bool {
        self.stop_if_idle(target_id).await == StopOutcome::Stopped
    }

    async fn stop_if_idle(&self, target_id: &str) -> StopOutcome {
        let _turn = self.registry.gate(target_id).await;

        // Un registro pudo entrar entre la consulta del llamador y este turno.
        match self.lifecycle.is_target_live(target_id).await {
            Ok(false) => {}
            Ok(true) => {
                log::info!("(stop) Objetivo {} tiene suscripciones vivas, sigue activo", target_id);
                return StopOutcome::StillLive;
            }
            Err(e) => {
                log::error!("(stop) Error consultando suscripciones de {}: {:?}", target_id, e);
                return StopOutcome::StoreError;
            }
        }

        let Some(handle) = self.registry.retire(target_id) else {
            log::debug!("(stop) Objetivo {} ya estaba detenido", target_id);
            return StopOutcome::AlreadyStopped;
        };
        if let Some(handle) = handle {
            let _ = handle.shutdown.send(true);
        }

        log::info!("(stop) Objetivo {} detenido", target_id);
        if let Err(e) = self.lifecycle.conclude_target(target_id).await {
            log::error!("(stop) Error cerrando objetivo {}: {:?}", target_id, e);
        }
        StopOutcome::Stopped
    }

    /// Corta todas las tareas sin mandar resumenes. Devuelve cuantas habia.
    pub fn stop_all(&self) -> usize {
        let drained = self.registry.retire_all();
        for (target_id, handle) in &drained {
            let _ = handle.shutdown.send(true);
            handle.join.abort();
            log::info!("(stop_all) Tarea de {} cancelada", target_id);
        }
        drained.len()
    }

    async fn run_loop(
        self,
        target: MonitoredTarget,
        period: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.baseline(&target, &shutdown).await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }
            if *shutdown.borrow() {
                break;
            }

            let report = self.tick(&target.id, Some(&shutdown)).await;
            if report.outcome == TickOutcome::Stopped {
                break;
            }
        }
        log::debug!("(run_loop) Tarea de {} finalizada", target.url);
    }

    /// Baseline al entrar en `Polling`: no cuenta ni se compara.
    async fn baseline(&self, target: &MonitoredTarget, shutdown: &watch::Receiver<bool>) {
        let fetched = match self.fetcher.fetch(&target.url).await {
            Ok(fetched) => fetched,
            Err(e) => {
                log::warn!(
                    "(baseline) Fallo el baseline de {}, se reintenta en el siguiente tick: {:?}",
                    target.url,
                    e
                );
                return;
            }
        };
        if *shutdown.borrow() {
            return;
        }
        if let Err(e) = self.store_baseline(&target.id, &fetched).await {
            log::error!("(baseline) No se pudo guardar baseline de {}: {:?}", target.url, e);
        } else {
            log::info!("(baseline) Baseline guardado para {}", target.url);
        }
    }

    async fn store_baseline(&self, target_id: &str, fetched: &FetchOutcome) -> Result<()> {
        self.store
            .record_baseline(
                target_id,
                &fetched.markup,
                &diagnostics_json(fetched),
                self.clock.now(),
            )
            .await
    }

    /// Un tick completo fuera del loop (sin senal de cancelacion).
    pub async fn run_tick(&self, target_id: &str) -> TickReport {
        self.tick(target_id, None).await
    }

    pub(crate) async fn tick(
        &self,
        target_id: &str,
        shutdown: Option<&watch::Receiver<bool>>,
    ) -> TickReport {
        // 1) Sin suscripciones vivas el objetivo se detiene aqui mismo.
        match self.lifecycle.is_target_live(target_id).await {
            Ok(true) => {}
            Ok(false) => {
                log::info!("(run_tick) {} sin suscripciones vivas, deteniendo", target_id);
                match self.stop_if_idle(target_id).await {
                    StopOutcome::Stopped | StopOutcome::AlreadyStopped => {
                        return TickReport::outcome(TickOutcome::Stopped);
                    }
                    StopOutcome::StillLive => {}
                    StopOutcome::StoreError => {
                        return TickReport::outcome(TickOutcome::Skipped(SkipReason::Store));
                    }
                }
            }
            Err(e) => {
                log::error!("(run_tick) Error consultando suscripciones de {}: {:?}", target_id, e);
                return TickReport::outcome(TickOutcome::Skipped(SkipReason::Store));
            }
        }

        let target = match self.store.get_target(target_id).await {
            Ok(Some(target)) => target,
            Ok(None) => {
                log::error!("(run_tick) Objetivo {} no existe en el store", target_id);
                return TickReport::outcome(TickOutcome::Skipped(SkipReason::Store));
            }
            Err(e) => {
                log::error!("(run_tick) Error leyendo objetivo {}: {:?}", target_id, e);
                return TickReport::outcome(TickOutcome::Skipped(SkipReason::Store));
            }
        };

        // 2) Fetch: cualquier error salta el tick sin tocar snapshot ni contador.
        let fetched = match self.fetcher.fetch(&target.url).await {
            Ok(fetched) => fetched,
            Err(e) => {
                log::warn!("(run_tick) Fetch fallido para {}, se salta el tick: {:?}", target.url, e);
                return TickReport::outcome(TickOutcome::Skipped(SkipReason::Fetch));
            }
        };

        if is_cancelled(shutdown) {
            return TickReport::outcome(TickOutcome::Skipped(SkipReason::Cancelled));
        }

        // 3) Sin snapshot previo (baseline fallido): este fetch es el baseline.
        let previous = match self.store.latest_snapshot(target_id).await {
            Ok(Some(previous)) => previous,
            Ok(None) => {
                return match self.store_baseline(target_id, &fetched).await {
                    Ok(()) => {
                        log::info!("(run_tick) Baseline tardio guardado para {}", target.url);
                        TickReport::outcome(TickOutcome::Baseline)
                    }
                    Err(e) => {
                        log::error!("(run_tick) Error guardando baseline: {:?}", e);
                        TickReport::outcome(TickOutcome::Skipped(SkipReason::Store))
                    }
                };
            }
            Err(e) => {
                log::error!("(run_tick) Error leyendo snapshot de {}: {:?}", target.url, e);
                return TickReport::outcome(TickOutcome::Skipped(SkipReason::Store));
            }
        };

        // 4) Clasificacion contra el snapshot anterior, antes de escribir nada.
        let verdict = self.classifier.classify(&previous, &fetched.markup).await;

        // La clasificacion puede tardar (juez externo): un stop en el medio gana.
        if is_cancelled(shutdown) {
            return TickReport::outcome(TickOutcome::Skipped(SkipReason::Cancelled));
        }

        // 5) Consulta contada + snapshot reemplazado (+ evento si hubo cambio) en una
        //    sola escritura: si falla, el snapshot anterior sigue siendo la referencia.
        let now = self.clock.now();
        let diagnostics = diagnostics_json(&fetched);
        if !verdict.is_significant() {
            return match self
                .store
                .record_check(target_id, &fetched.markup, &diagnostics, now)
                .await
            {
                Ok(check_count) => {
                    log::debug!(
                        "(run_tick) {} consulta #{} sin cambios ({:?})",
                        target.url,
                        check_count,
                        verdict
                    );
                    TickReport::outcome(TickOutcome::Unchanged { check_count })
                }
                Err(e) => {
                    log::error!("(run_tick) Error registrando consulta de {}: {:?}", target.url, e);
                    TickReport::outcome(TickOutcome::Skipped(SkipReason::Store))
                }
            };
        }

        let event = ChangeEvent {
            id: Uuid::new_v4().to_string(),
            target_id: target_id.to_string(),
            detected_at: now,
            content_before: previous,
            content_after: fetched.markup,
            email_sent: false,
            sms_sent: false,
        };
        let check_count = match self.store.record_change(&event, &diagnostics).await {
            Ok(count) => count,
            Err(e) => {
                log::error!(
                    "(run_tick) No se pudo guardar el cambio de {}, se reintenta: {:?}",
                    target.url,
                    e
                );
                return TickReport::outcome(TickOutcome::Skipped(SkipReason::Store));
            }
        };
        log::info!(
            "(run_tick) Cambio detectado en {} (consulta #{}, {:?})",
            target.url,
            check_count,
            verdict
        );

        let plans = match self.lifecycle.alert_plans(target_id).await {
            Ok(plans) => plans,
            Err(e) => {
                log::error!("(run_tick) No se pudieron leer destinatarios de {}: {:?}", target.url, e);
                Vec::new()
            }
        };
        let event_id = event.id.clone();
        let dispatcher = self.dispatcher.clone();
        let alert_delivery = tokio::spawn(async move {
            dispatcher.send_alerts(&plans, &target, &event).await
        });

        TickReport {
            outcome: TickOutcome::ChangeDetected {
                check_count,
                event_id,
            },
            alert_delivery: Some(alert_delivery),
        }
    }
}

fn is_cancelled(shutdown: Option<&watch::Receiver<bool>>) -> bool {
    shutdown.map_or(false, |rx| *rx.borrow())
}

fn diagnostics_json(fetched: &FetchOutcome) -> String {
    serde_json::to_string(&fetched.diagnostics).unwrap_or_else(|_| "{}".to_string())
}
