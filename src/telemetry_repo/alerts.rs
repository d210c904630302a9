// Alerts table. At most one open alert per (device, kind): partial unique index on unresolved rows.

use super::TelemetryRepo;
use crate::error::PersistenceError;
use crate::models::{Alert, AlertDraft, AlertKind, now_ms};
use sqlx::Row;
use sqlx::SqlitePool;
use sqlx::sqlite::SqliteRow;
use tracing::instrument;

pub(super) async fn init_alerts_table(pool: &SqlitePool) -> Result<(), PersistenceError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS alerts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            device_id INTEGER REFERENCES devices(id),
            kind TEXT NOT NULL,
            severity TEXT NOT NULL,
            message TEXT NOT NULL,
            value REAL,
            threshold REAL,
            raised_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            resolved INTEGER NOT NULL DEFAULT 0,
            resolved_at INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    // System-level alerts have no device; COALESCE makes them collide with each other too.
    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_alerts_open
         ON alerts(COALESCE(device_id, -1), kind) WHERE resolved = 0",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_alerts_raised_at ON alerts(raised_at)")
        .execute(pool)
        .await?;
    Ok(())
}

/// Result of raising an alert.
#[derive(Debug, Clone, PartialEq)]
pub enum RaiseOutcome {
    Inserted(Alert),
    /// An open alert for the same (device, kind) existed and was updated in place.
    Deduplicated(Alert),
}

impl RaiseOutcome {
    pub fn alert(&self) -> &Alert {
        match self {
            RaiseOutcome::Inserted(a) | RaiseOutcome::Deduplicated(a) => a,
        }
    }
}

impl TelemetryRepo {
    /// Insert a new open alert, or update the open one for the same (device, kind).
    /// Severity only ever escalates while the alert stays open.
    #[instrument(skip(self, draft), fields(repo = "telemetry", operation = "raise_alert", kind = %draft.kind))]
    pub async fn raise_alert(&self, draft: &AlertDraft) -> Result<RaiseOutcome, PersistenceError> {
        let now = now_ms();
        let mut tx = self.pool.begin().await?;
        let existing = sqlx::query(
            "SELECT * FROM alerts WHERE COALESCE(device_id, -1) = COALESCE($1, -1) AND kind = $2 AND resolved = 0",
        )
        .bind(draft.device_id)
        .bind(draft.kind.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let outcome = match existing {
            Some(row) => {
                let mut alert = parse_alert_row(&row)?;
                alert.severity = alert.severity.max(draft.severity);
                alert.message = draft.message.clone();
                alert.value = draft.value;
                alert.threshold = draft.threshold;
                alert.updated_at = now;
                sqlx::query(
                    "UPDATE alerts SET severity = $1, message = $2, value = $3, threshold = $4, updated_at = $5
                     WHERE id = $6",
                )
                .bind(alert.severity.as_str())
                .bind(&alert.message)
                .bind(alert.value)
                .bind(alert.threshold)
                .bind(now)
                .bind(alert.id)
                .execute(&mut *tx)
                .await?;
                RaiseOutcome::Deduplicated(alert)
            }
            None => {
                let id = insert(&mut tx, draft, now, false).await?;
                RaiseOutcome::Inserted(draft_to_alert(id, draft, now, false))
            }
        };
        tx.commit().await?;
        Ok(outcome)
    }

    /// Close the open alert for (device, kind). Returns false when none was open.
    #[instrument(skip(self), fields(repo = "telemetry", operation = "resolve_alert"))]
    pub async fn resolve_alert(&self, device_id: Option<i64>, kind: AlertKind) -> Result<bool, PersistenceError> {
        let now = now_ms();
        let r = sqlx::query(
            "UPDATE alerts SET resolved = 1, resolved_at = $1, updated_at = $1
             WHERE COALESCE(device_id, -1) = COALESCE($2, -1) AND kind = $3 AND resolved = 0",
        )
        .bind(now)
        .bind(device_id)
        .bind(kind.as_str())
        .execute(&self.pool)
        .await?;
        Ok(r.rows_affected() > 0)
    }

    /// Store an informational event that needs no follow-up (inserted already resolved).
    #[instrument(skip(self, draft), fields(repo = "telemetry", operation = "record_alert_event", kind = %draft.kind))]
    pub async fn record_alert_event(&self, draft: &AlertDraft) -> Result<Alert, PersistenceError> {
        let now = now_ms();
        let mut tx = self.pool.begin().await?;
        let id = insert(&mut tx, draft, now, true).await?;
        tx.commit().await?;
        Ok(draft_to_alert(id, draft, now, true))
    }

    /// Open alerts, most severe first, then newest first.
    pub async fn open_alerts(&self) -> Result<Vec<Alert>, PersistenceError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM alerts WHERE resolved = 0
            ORDER BY CASE severity WHEN 'critical' THEN 0 WHEN 'warning' THEN 1 ELSE 2 END, raised_at DESC, id DESC
            "#,
        )
        .fetch_all(&self.read_pool)
        .await?;
        rows.iter().map(parse_alert_row).collect()
    }

    /// Every alert of a device raised at or after `since_ts`, newest first.
    pub async fn device_alerts(&self, device_id: i64, since_ts: i64) -> Result<Vec<Alert>, PersistenceError> {
        let rows = sqlx::query(
            "SELECT * FROM alerts WHERE device_id = $1 AND raised_at >= $2 ORDER BY raised_at DESC, id DESC",
        )
        .bind(device_id)
        .bind(since_ts)
        .fetch_all(&self.read_pool)
        .await?;
        rows.iter().map(parse_alert_row).collect()
    }

    /// Drop resolved alerts closed before `cutoff_ts`.
    #[instrument(skip(self), fields(repo = "telemetry", operation = "purge_resolved_alerts"))]
    pub async fn purge_resolved_alerts(&self, cutoff_ts: i64) -> Result<u64, PersistenceError> {
        let r = sqlx::query("DELETE FROM alerts WHERE resolved = 1 AND resolved_at < $1")
            .bind(cutoff_ts)
            .execute(&self.pool)
            .await?;
        Ok(r.rows_affected())
    }
}

async fn insert(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    draft: &AlertDraft,
    now: i64,
    resolved: bool,
) -> Result<i64, PersistenceError> {
    let r = sqlx::query(
        r#"
        INSERT INTO alerts (device_id, kind, severity, message, value, threshold, raised_at, updated_at, resolved, resolved_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $7, $8, $9)
        "#,
    )
    .bind(draft.device_id)
    .bind(draft.kind.as_str())
    .bind(draft.severity.as_str())
    .bind(&draft.message)
    .bind(draft.value)
    .bind(draft.threshold)
    .bind(now)
    .bind(resolved)
    .bind(resolved.then_some(now))
    .execute(&mut **tx)
    .await?;
    Ok(r.last_insert_rowid())
}

fn draft_to_alert(id: i64, draft: &AlertDraft, now: i64, resolved: bool) -> Alert {
    Alert {
        id,
        device_id: draft.device_id,
        kind: draft.kind,
        severity: draft.severity,
        message: draft.message.clone(),
        value: draft.value,
        threshold: draft.threshold,
        raised_at: now,
        updated_at: now,
        resolved,
        resolved_at: resolved.then_some(now),
    }
}

fn parse_alert_row(row: &SqliteRow) -> Result<Alert, PersistenceError> {
    let kind: String = row.try_get("kind")?;
    let severity: String = row.try_get("severity")?;
    Ok(Alert {
        id: row.try_get("id")?,
        device_id: row.try_get("device_id")?,
        kind: kind.parse().map_err(PersistenceError::Corruption)?,
        severity: severity.parse().map_err(PersistenceError::Corruption)?,
        message: row.try_get("message")?,
        value: row.try_get("value")?,
        threshold: row.try_get("threshold")?,
        raised_at: row.try_get("raised_at")?,
        updated_at: row.try_get("updated_at")?,
        resolved: row.try_get("resolved")?,
        resolved_at: row.try_get("resolved_at")?,
    })
}
