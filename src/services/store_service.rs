//! services/store_service.rs
//! Persistencia durable de objetivos, suscripciones e historial de cambios.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{FromRow, Pool, Sqlite, Transaction};
use uuid::Uuid;

use crate::models::{
    change_event_model::{ChangeEvent, DeliveryChannel},
    subscription_model::{ContactChannels, Subscription},
    target_model::MonitoredTarget,
};

/// Unico recurso mutable compartido entre objetivos. Las escrituras sobre una misma
/// fila de objetivo deben quedar serializadas por la implementacion.
#[async_trait]
pub trait RecordStore: Send + Sync {
    // ---- objetivos ----
    async fn find_target_by_url(&self, url: &str) -> Result<Option<MonitoredTarget>>;
    async fn get_target(&self, target_id: &str) -> Result<Option<MonitoredTarget>>;
    /// Crea el objetivo o, si la URL ya existe, lo reactiva con el nuevo intervalo.
    async fn upsert_target(
        &self,
        url: &str,
        poll_interval_minutes: i64,
        now: DateTime<Utc>,
    ) -> Result<MonitoredTarget>;
    async fn list_targets(&self) -> Result<Vec<MonitoredTarget>>;
    async fn list_active_targets(&self) -> Result<Vec<MonitoredTarget>>;
    /// Nueva sesion de monitoreo: activo, contador en 0, sin snapshot.
    async fn begin_session(&self, target_id: &str, now: DateTime<Utc>) -> Result<()>;
    /// Guarda el snapshot de baseline sin tocar `check_count`.
    async fn record_baseline(
        &self,
        target_id: &str,
        snapshot: &str,
        diagnostics: &str,
        now: DateTime<Utc>,
    ) -> Result<()>;
    async fn latest_snapshot(&self, target_id: &str) -> Result<Option<String>>;
    /// Incrementa `check_count` y reemplaza el snapshot en una sola escritura.
    /// Devuelve el contador resultante.
    async fn record_check(
        &self,
        target_id: &str,
        snapshot: &str,
        diagnostics: &str,
        now: DateTime<Utc>,
    ) -> Result<i64>;
    /// Como `record_check`, pero ademas guarda el `ChangeEvent` en la misma transaccion.
    /// El snapshot nuevo es `event.content_after`; si algo falla no se aplica nada.
    async fn record_change(&self, event: &ChangeEvent, diagnostics: &str) -> Result<i64>;
    async fn set_target_active(&self, target_id: &str, active: bool) -> Result<()>;

    // ---- suscripciones ----
    async fn insert_subscription(&self, subscription: &Subscription) -> Result<()>;
    async fn get_subscription(&self, subscription_id: &str) -> Result<Option<Subscription>>;
    /// `true` si la suscripcion estaba activa y quedo inactiva.
    async fn deactivate_subscription(&self, subscription_id: &str) -> Result<bool>;
    async fn list_subscriptions(&self, target_id: &str) -> Result<Vec<Subscription>>;
    async fn live_subscriptions(
        &self,
        target_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<Subscription>>;
    async fn count_live_subscriptions(&self, target_id: &str, now: DateTime<Utc>)
        -> Result<i64>;

    // ---- historial ----
    async fn insert_change_event(&self, event: &ChangeEvent) -> Result<()>;
    /// Idempotente: marcar dos veces deja el mismo estado.
    async fn mark_delivered(&self, event_id: &str, channel: DeliveryChannel) -> Result<()>;
    /// Mas recientes primero.
    async fn list_change_events(&self, target_id: &str) -> Result<Vec<ChangeEvent>>;
    /// Con `since = None` cuenta todo el historial del objetivo.
    async fn count_change_events(
        &self,
        target_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<i64>;
    async fn count_emails_sent(&self, target_id: &str) -> Result<i64>;

    /// Marca todos los objetivos y suscripciones como inactivos.
    async fn deactivate_all(&self) -> Result<()>;
}

/// Texto RFC 3339 de ancho fijo: el orden lexicografico coincide con el cronologico.
pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("Timestamp invalido en DB: '{}'", raw))?
        .with_timezone(&Utc))
}

fn parse_opt_ts(raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    raw.as_deref().map(parse_ts).transpose()
}

#[derive(Debug, FromRow)]
struct TargetRow {
    id: String,
    url: String,
    last_check: Option<String>,
    last_snapshot: Option<String>,
    last_diagnostics: Option<String>,
    check_count: i64,
    is_active: bool,
    poll_interval_minutes: i64,
    session_started_at: Option<String>,
    created_at: String,
}

impl TryFrom<TargetRow> for MonitoredTarget {
    type Error = anyhow::Error;

    fn try_from(row: TargetRow) -> Result<Self> {
        Ok(MonitoredTarget {
            id: row.id,
            url: row.url,
            last_check: parse_opt_ts(row.last_check)?,
            last_snapshot: row.last_snapshot,
            last_diagnostics: row.last_diagnostics,
            check_count: row.check_count,
            is_active: row.is_active,
            poll_interval_minutes: row.poll_interval_minutes,
            session_started_at: parse_opt_ts(row.session_started_at)?,
            created_at: parse_ts(&row.created_at)?,
        })
    }
}

#[derive(Debug, FromRow)]
struct SubscriptionRow {
    id: String,
    target_id: String,
    email: String,
    phone: Option<String>,
    polling_duration_minutes: i64,
    is_active: bool,
    created_at: String,
}

impl TryFrom<SubscriptionRow> for Subscription {
    type Error = anyhow::Error;

    fn try_from(row: SubscriptionRow) -> Result<Self> {
        Ok(Subscription {
            id: row.id,
            target_id: row.target_id,
            channels: ContactChannels::new(row.email, row.phone),
            polling_duration_minutes: row.polling_duration_minutes,
            is_active: row.is_active,
            created_at: parse_ts(&row.created_at)?,
        })
    }
}

#[derive(Debug, FromRow)]
struct ChangeEventRow {
    id: String,
    target_id: String,
    detected_at: String,
    content_before: String,
    content_after: String,
    email_sent: bool,
    sms_sent: bool,
}

impl TryFrom<ChangeEventRow> for ChangeEvent {
    type Error = anyhow::Error;

    fn try_from(row: ChangeEventRow) -> Result<Self> {
        Ok(ChangeEvent {
            id: row.id,
            target_id: row.target_id,
            detected_at: parse_ts(&row.detected_at)?,
            content_before: row.content_before,
            content_after: row.content_after,
            email_sent: row.email_sent,
            sms_sent: row.sms_sent,
        })
    }
}

fn convert_all<R, T>(rows: Vec<R>) -> Result<Vec<T>>
where
    T: TryFrom<R, Error = anyhow::Error>,
{
    rows.into_iter().map(T::try_from).collect()
}

const TARGET_COLUMNS: &str = "id, url, last_check, last_snapshot, last_diagnostics, check_count, \
     is_active, poll_interval_minutes, session_started_at, created_at";

const SUBSCRIPTION_COLUMNS: &str =
    "id, target_id, email, phone, polling_duration_minutes, is_active, created_at";

const CHANGE_EVENT_COLUMNS: &str =
    "id, target_id, detected_at, content_before, content_after, email_sent, sms_sent";

const INSERT_CHANGE_EVENT: &str = r#"
    INSERT INTO change_events (
        id, target_id, detected_at, content_before, content_after, email_sent, sms_sent
    )
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
"#;

/// Incrementa el contador y reemplaza el snapshot dentro de `tx`.
async fn count_check(
    tx: &mut Transaction<'_, Sqlite>,
    target_id: &str,
    snapshot: &str,
    diagnostics: &str,
    now: DateTime<Utc>,
) -> Result<i64> {
    let result = sqlx::query(
        r#"
        UPDATE monitored_targets
        SET check_count = check_count + 1,
            last_snapshot = ?2,
            last_diagnostics = ?3,
            last_check = ?4
        WHERE id = ?1
        "#,
    )
    .bind(target_id)
    .bind(snapshot)
    .bind(diagnostics)
    .bind(format_ts(now))
    .execute(&mut **tx)
    .await
    .context("Fallo al registrar consulta")?;

    if result.rows_affected() == 0 {
        return Err(anyhow!("Objetivo {} no existe", target_id));
    }

    let (count,): (i64,) = sqlx::query_as("SELECT check_count FROM monitored_targets WHERE id = ?1")
        .bind(target_id)
        .fetch_one(&mut **tx)
        .await
        .context("Fallo al leer check_count")?;
    Ok(count)
}

#[derive(Clone, Debug)]
pub struct SqliteRecordStore {
    db_pool: Pool<Sqlite>,
}

impl SqliteRecordStore {
    pub fn new(db_pool: Pool<Sqlite>) -> Self {
        SqliteRecordStore { db_pool }
    }

    /// Corre migraciones con sqlx
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.db_pool)
            .await
            .context("Fallo al correr migraciones del monitor")?;
        Ok(())
    }

    async fn fetch_target(&self, column: &str, value: &str) -> Result<Option<MonitoredTarget>> {
        let sql = format!(
            "SELECT {} FROM monitored_targets WHERE {} = ?1",
            TARGET_COLUMNS, column
        );
        let row = sqlx::query_as::<_, TargetRow>(&sql)
            .bind(value)
            .fetch_optional(&self.db_pool)
            .await
            .with_context(|| format!("Fallo al buscar objetivo por {}", column))?;
        row.map(MonitoredTarget::try_from).transpose()
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn find_target_by_url(&self, url: &str) -> Result<Option<MonitoredTarget>> {
        self.fetch_target("url", url).await
    }

    async fn get_target(&self, target_id: &str) -> Result<Option<MonitoredTarget>> {
        self.fetch_target("id", target_id).await
    }

    async fn upsert_target(
        &self,
        url: &str,
        poll_interval_minutes: i64,
        now: DateTime<Utc>,
    ) -> Result<MonitoredTarget> {
        sqlx::query(
            r#"
            INSERT INTO monitored_targets (id, url, check_count, is_active, poll_interval_minutes, created_at)
            VALUES (?1, ?2, 0, 1, ?3, ?4)
            ON CONFLICT(url) DO UPDATE SET
                is_active = 1,
                poll_interval_minutes = excluded.poll_interval_minutes
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(url)
        .bind(poll_interval_minutes)
        .bind(format_ts(now))
        .execute(&self.db_pool)
        .await
        .context("Fallo al insertar/reactivar objetivo")?;

        self.find_target_by_url(url)
            .await?
            .ok_or_else(|| anyhow!("Objetivo {} no encontrado tras upsert", url))
    }

    async fn list_targets(&self) -> Result<Vec<MonitoredTarget>> {
        let sql = format!(
            "SELECT {} FROM monitored_targets ORDER BY created_at",
            TARGET_COLUMNS
        );
        let rows = sqlx::query_as::<_, TargetRow>(&sql)
            .fetch_all(&self.db_pool)
            .await
            .context("Fallo al listar objetivos")?;
        convert_all(rows)
    }

    async fn list_active_targets(&self) -> Result<Vec<MonitoredTarget>> {
        let sql = format!(
            "SELECT {} FROM monitored_targets WHERE is_active = 1 ORDER BY created_at",
            TARGET_COLUMNS
        );
        let rows = sqlx::query_as::<_, TargetRow>(&sql)
            .fetch_all(&self.db_pool)
            .await
            .context("Fallo al listar objetivos activos")?;
        convert_all(rows)
    }

    async fn begin_session(&self, target_id: &str, now: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE monitored_targets
            SET is_active = 1,
                check_count = 0,
                last_snapshot = NULL,
                last_diagnostics = NULL,
                session_started_at = ?2
            WHERE id = ?1
            "#,
        )
        .bind(target_id)
        .bind(format_ts(now))
        .execute(&self.db_pool)
        .await
        .context("Fallo al iniciar sesion de monitoreo")?;

        if result.rows_affected() == 0 {
            return Err(anyhow!("Objetivo {} no existe", target_id));
        }
        Ok(())
    }

    async fn record_baseline(
        &self,
        target_id: &str,
        snapshot: &str,
        diagnostics: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE monitored_targets
            SET last_snapshot = ?2,
                last_diagnostics = ?3,
                last_check = ?4
            WHERE id = ?1
            "#,
        )
        .bind(target_id)
        .bind(snapshot)
        .bind(diagnostics)
        .bind(format_ts(now))
        .execute(&self.db_pool)
        .await
        .context("Fallo al guardar baseline")?;
        Ok(())
    }

    async fn latest_snapshot(&self, target_id: &str) -> Result<Option<String>> {
        let row: Option<(Option<String>,)> =
            sqlx::query_as("SELECT last_snapshot FROM monitored_targets WHERE id = ?1")
                .bind(target_id)
                .fetch_optional(&self.db_pool)
                .await
                .context("Fallo al leer ultimo snapshot")?;

        match row {
            Some((snapshot,)) => Ok(snapshot),
            None => Err(anyhow!("Objetivo {} no existe", target_id)),
        }
    }

    async fn record_check(
        &self,
        target_id: &str,
        snapshot: &str,
        diagnostics: &str,
        now: DateTime<Utc>,
    ) -> Result<i64> {
        let mut tx = self
            .db_pool
            .begin()
            .await
            .context("No se pudo abrir transaccion")?;
        let count = count_check(&mut tx, target_id, snapshot, diagnostics, now).await?;
        tx.commit().await.context("Fallo al confirmar transaccion")?;
        Ok(count)
    }

    async fn record_change(&self, event: &ChangeEvent, diagnostics: &str) -> Result<i64> {
        let mut tx = self
            .db_pool
            .begin()
            .await
            .context("No se pudo abrir transaccion")?;
        let count = count_check(
            &mut tx,
            &event.target_id,
            &event.content_after,
            diagnostics,
            event.detected_at,
        )
        .await?;

        sqlx::query(INSERT_CHANGE_EVENT)
            .bind(&event.id)
            .bind(&event.target_id)
            .bind(format_ts(event.detected_at))
            .bind(&event.content_before)
            .bind(&event.content_after)
            .bind(event.email_sent)
            .bind(event.sms_sent)
            .execute(&mut *tx)
            .await
            .context("Fallo al insertar change_event")?;

        tx.commit().await.context("Fallo al confirmar transaccion")?;
        Ok(count)
    }

    async fn set_target_active(&self, target_id: &str, active: bool) -> Result<()> {
        sqlx::query("UPDATE monitored_targets SET is_active = ?2 WHERE id = ?1")
            .bind(target_id)
            .bind(active)
            .execute(&self.db_pool)
            .await
            .context("Fallo al actualizar is_active del objetivo")?;
        Ok(())
    }

    async fn insert_subscription(&self, subscription: &Subscription) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO subscriptions (
                id, target_id, email, phone, polling_duration_minutes,
                is_active, created_at, expires_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&subscription.id)
        .bind(&subscription.target_id)
        .bind(&subscription.channels.email)
        .bind(&subscription.channels.phone)
        .bind(subscription.polling_duration_minutes)
        .bind(subscription.is_active)
        .bind(format_ts(subscription.created_at))
        .bind(format_ts(subscription.expires_at()))
        .execute(&self.db_pool)
        .await
        .context("Fallo al insertar suscripcion")?;
        Ok(())
    }

    async fn get_subscription(&self, subscription_id: &str) -> Result<Option<Subscription>> {
        let sql = format!(
            "SELECT {} FROM subscriptions WHERE id = ?1",
            SUBSCRIPTION_COLUMNS
        );
        let row = sqlx::query_as::<_, SubscriptionRow>(&sql)
            .bind(subscription_id)
            .fetch_optional(&self.db_pool)
            .await
            .context("Fallo al buscar suscripcion")?;
        row.map(Subscription::try_from).transpose()
    }

    async fn deactivate_subscription(&self, subscription_id: &str) -> Result<bool> {
        let result =
            sqlx::query("UPDATE subscriptions SET is_active = 0 WHERE id = ?1 AND is_active = 1")
                .bind(subscription_id)
                .execute(&self.db_pool)
                .await
                .context("Fallo al desactivar suscripcion")?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_subscriptions(&self, target_id: &str) -> Result<Vec<Subscription>> {
        let sql = format!(
            "SELECT {} FROM subscriptions WHERE target_id = ?1 ORDER BY created_at",
            SUBSCRIPTION_COLUMNS
        );
        let rows = sqlx::query_as::<_, SubscriptionRow>(&sql)
            .bind(target_id)
            .fetch_all(&self.db_pool)
            .await
            .context("Fallo al listar suscripciones")?;
        convert_all(rows)
    }

    async fn live_subscriptions(
        &self,
        target_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<Subscription>> {
        let sql = format!(
            "SELECT {} FROM subscriptions \
             WHERE target_id = ?1 AND is_active = 1 AND expires_at > ?2 \
             ORDER BY created_at",
            SUBSCRIPTION_COLUMNS
        );
        let rows = sqlx::query_as::<_, SubscriptionRow>(&sql)
            .bind(target_id)
            .bind(format_ts(now))
            .fetch_all(&self.db_pool)
            .await
            .context("Fallo al listar suscripciones vivas")?;
        convert_all(rows)
    }

    async fn count_live_subscriptions(
        &self,
        target_id: &str,
        now: DateTime<Utc>,
    ) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM subscriptions \
             WHERE target_id = ?1 AND is_active = 1 AND expires_at > ?2",
        )
        .bind(target_id)
        .bind(format_ts(now))
        .fetch_one(&self.db_pool)
        .await
        .context("Fallo al contar suscripciones vivas")?;
        Ok(count)
    }

    async fn insert_change_event(&self, event: &ChangeEvent) -> Result<()> {
        sqlx::query(INSERT_CHANGE_EVENT)
            .bind(&event.id)
            .bind(&event.target_id)
            .bind(format_ts(event.detected_at))
            .bind(&event.content_before)
            .bind(&event.content_after)
            .bind(event.email_sent)
            .bind(event.sms_sent)
            .execute(&self.db_pool)
            .await
            .context("Fallo al insertar change_event")?;
        Ok(())
    }

    async fn mark_delivered(&self, event_id: &str, channel: DeliveryChannel) -> Result<()> {
        let sql = match channel {
            DeliveryChannel::Email => "UPDATE change_events SET email_sent = 1 WHERE id = ?1",
            DeliveryChannel::ShortMessage => "UPDATE change_events SET sms_sent = 1 WHERE id = ?1",
        };
        sqlx::query(sql)
            .bind(event_id)
            .execute(&self.db_pool)
            .await
            .with_context(|| format!("Fallo al marcar entrega {}", channel.as_str()))?;
        Ok(())
    }

    async fn list_change_events(&self, target_id: &str) -> Result<Vec<ChangeEvent>> {
        let sql = format!(
            "SELECT {} FROM change_events WHERE target_id = ?1 ORDER BY detected_at DESC",
            CHANGE_EVENT_COLUMNS
        );
        let rows = sqlx::query_as::<_, ChangeEventRow>(&sql)
            .bind(target_id)
            .fetch_all(&self.db_pool)
            .await
            .context("Fallo al listar change_events")?;
        convert_all(rows)
    }

    async fn count_change_events(
        &self,
        target_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<i64> {
        // Sin `since` se compara contra la cadena vacia: cualquier timestamp es mayor.
        let since = since.map(format_ts).unwrap_or_default();
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM change_events WHERE target_id = ?1 AND detected_at >= ?2",
        )
        .bind(target_id)
        .bind(since)
        .fetch_one(&self.db_pool)
        .await
        .context("Fallo al contar change_events")?;
        Ok(count)
    }

    async fn count_emails_sent(&self, target_id: &str) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM change_events WHERE target_id = ?1 AND email_sent = 1",
        )
        .bind(target_id)
        .fetch_one(&self.db_pool)
        .await
        .context("Fallo al contar emails enviados")?;
        Ok(count)
    }

    async fn deactivate_all(&self) -> Result<()> {
        let mut tx = self
            .db_pool
            .begin()
            .await
            .context("No se pudo abrir transaccion")?;
        sqlx::query("UPDATE subscriptions SET is_active = 0")
            .execute(&mut *tx)
            .await
            .context("Fallo al desactivar suscripciones")?;
        sqlx::query("UPDATE monitored_targets SET is_active = 0")
            .execute(&mut *tx)
            .await
            .context("Fallo al desactivar objetivos")?;
        tx.commit().await.context("Fallo al confirmar transaccion")?;
        Ok(())
    }
}
