// Alert manager: raise / dedupe / resolve / reconcile. Producers send commands over a channel;
// one task applies them to the store in order.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::PersistenceError;
use crate::models::{Alert, AlertDraft, AlertKind, Severity};
use crate::telemetry_repo::{RaiseOutcome, TelemetryRepo};

/// Channel capacity for alert commands.
pub const ALERT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub enum AlertCommand {
    Raise(AlertDraft),
    Resolve {
        device_id: Option<i64>,
        kind: AlertKind,
    },
    /// Resolve open alerts of `managed` kinds that are not in `active`.
    Reconcile {
        device_id: Option<i64>,
        managed: Vec<AlertKind>,
        active: Vec<AlertKind>,
    },
    /// Informational event stored already resolved.
    RecordEvent(AlertDraft),
}

pub type AlertSender = mpsc::Sender<AlertCommand>;

/// Send without blocking the producer. A full channel drops the command with a warning.
pub fn send_alert(tx: &AlertSender, cmd: AlertCommand) {
    if let Err(e) = tx.try_send(cmd) {
        tracing::warn!(error = %e, "alert channel unavailable, command dropped");
    }
}

#[derive(Clone)]
pub struct AlertManager {
    repo: Arc<TelemetryRepo>,
}

impl AlertManager {
    pub fn new(repo: Arc<TelemetryRepo>) -> Self {
        Self { repo }
    }

    pub async fn raise(&self, draft: &AlertDraft) -> Result<RaiseOutcome, PersistenceError> {
        let outcome = self.repo.raise_alert(draft).await?;
        match &outcome {
            RaiseOutcome::Inserted(a) => log_raised(a),
            RaiseOutcome::Deduplicated(a) => tracing::debug!(
                alert_id = a.id,
                kind = %a.kind,
                device_id = ?a.device_id,
                severity = %a.severity,
                "alert still open, updated"
            ),
        }
        Ok(outcome)
    }

    pub async fn resolve(&self, device_id: Option<i64>, kind: AlertKind) -> Result<bool, PersistenceError> {
        let resolved = self.repo.resolve_alert(device_id, kind).await?;
        if resolved {
            tracing::info!(kind = %kind, device_id = ?device_id, "alert resolved");
        }
        Ok(resolved)
    }

    /// Resolves every managed kind that is no longer active. Returns how many were closed.
    pub async fn reconcile(
        &self,
        device_id: Option<i64>,
        managed: &[AlertKind],
        active: &[AlertKind],
    ) -> Result<usize, PersistenceError> {
        let mut closed = 0;
        for kind in managed.iter().filter(|k| !active.contains(k)) {
            if self.resolve(device_id, *kind).await? {
                closed += 1;
            }
        }
        Ok(closed)
    }

    pub async fn record_event(&self, draft: &AlertDraft) -> Result<Alert, PersistenceError> {
        let alert = self.repo.record_alert_event(draft).await?;
        tracing::info!(kind = %alert.kind, device_id = ?alert.device_id, message = %alert.message, "event recorded");
        Ok(alert)
    }

    pub async fn open_alerts(&self) -> Result<Vec<Alert>, PersistenceError> {
        self.repo.open_alerts().await
    }

    pub async fn apply(&self, cmd: AlertCommand) -> Result<(), PersistenceError> {
        match cmd {
            AlertCommand::Raise(draft) => {
                self.raise(&draft).await?;
            }
            AlertCommand::Resolve { device_id, kind } => {
                self.resolve(device_id, kind).await?;
            }
            AlertCommand::Reconcile {
                device_id,
                managed,
                active,
            } => {
                self.reconcile(device_id, &managed, &active).await?;
            }
            AlertCommand::RecordEvent(draft) => {
                self.record_event(&draft).await?;
            }
        }
        Ok(())
    }
}

fn log_raised(a: &Alert) {
    match a.severity {
        Severity::Critical | Severity::Warning => tracing::warn!(
            alert_id = a.id,
            kind = %a.kind,
            device_id = ?a.device_id,
            severity = %a.severity,
            message = %a.message,
            "alert raised"
        ),
        Severity::Info => tracing::info!(
            alert_id = a.id,
            kind = %a.kind,
            device_id = ?a.device_id,
            message = %a.message,
            "alert raised"
        ),
    }
}

/// Applies commands until every sender is dropped.
pub fn spawn_alert_task(
    mut rx: mpsc::Receiver<AlertCommand>,
    manager: AlertManager,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(cmd) = rx.recv().await {
            if let Err(e) = manager.apply(cmd).await {
                tracing::warn!(error = %e, operation = "apply_alert", "alert command failed");
            }
        }
        tracing::debug!("Alert task shutting down");
    })
}
