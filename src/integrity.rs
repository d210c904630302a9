// Full integrity pass over both stores at startup. Findings are logged and returned; a damaged
// journal is repaired, nothing here stops the service.

use std::collections::HashSet;

use serde::Serialize;

use crate::error::PersistenceError;
use crate::journal::{IntegrityReport, JournalHandle, RepairOutcome};
use crate::telemetry_repo::{StoreIntegrity, TelemetryRepo};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartupIntegrity {
    /// Journal state before any repair.
    pub journal: IntegrityReport,
    /// Set when the full scan found damage and a repair ran.
    pub journal_repair: Option<RepairOutcome>,
    pub store: StoreIntegrity,
}

impl StartupIntegrity {
    pub fn is_ok(&self) -> bool {
        self.journal.is_clean() && self.journal.orphaned == 0 && self.journal.out_of_order == 0 && self.store.is_ok()
    }
}

/// Scan every journal row against the known devices, then run SQLite's page check.
pub async fn verify_stores(
    repo: &TelemetryRepo,
    journal: &JournalHandle,
) -> Result<StartupIntegrity, PersistenceError> {
    let known: HashSet<i64> = repo.list_devices(false).await?.into_iter().map(|d| d.id).collect();
    let report = journal.check(Some(known)).await?;
    let mut journal_repair = None;
    if !report.is_clean() {
        tracing::warn!(
            header_ok = report.header_ok,
            rows = report.rows,
            malformed = report.malformed.len(),
            first_malformed_line = report.malformed.first().map(|m| m.line),
            "journal integrity check failed"
        );
        let outcome = journal.repair().await?;
        tracing::warn!(?outcome, "journal repaired after integrity check");
        journal_repair = Some(outcome);
    }
    if report.orphaned > 0 || report.out_of_order > 0 {
        tracing::warn!(
            orphaned = report.orphaned,
            out_of_order = report.out_of_order,
            "journal rows disagree with the store"
        );
    }

    let store = repo.integrity_check().await?;
    if !store.is_ok() {
        tracing::warn!(
            integrity = ?store.integrity,
            orphaned_samples = store.orphaned_samples,
            orphaned_hourly = store.orphaned_hourly,
            orphaned_daily = store.orphaned_daily,
            "store integrity check failed"
        );
    }

    let result = StartupIntegrity {
        journal: report,
        journal_repair,
        store,
    };
    if result.is_ok() {
        tracing::info!(journal_rows = result.journal.rows, "integrity check passed");
    }
    Ok(result)
}
