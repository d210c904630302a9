// Sample writer task: the single owner of writes to the journal and the raw_samples table.
// The scheduler hands over one batch per cycle; batches stay buffered until both sinks took them.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tokio::time::{Duration, interval};

use crate::alerts::{AlertCommand, AlertSender, send_alert};
use crate::error::PersistenceError;
use crate::journal::JournalHandle;
use crate::models::{AlertDraft, AlertKind, Sample, Severity};
use crate::retry::{RetryPolicy, run_with_retry};
use crate::telemetry_repo::TelemetryRepo;

/// Channel capacity for sample batches (backpressure if the writer falls behind).
pub fn writer_channel_capacity(flush_rate: u64) -> usize {
    (flush_rate as usize * 2).max(32)
}

/// Batching for the writer task.
#[derive(Debug, Clone)]
pub struct SampleWriterConfig {
    pub flush_rate: u64,
    pub flush_interval_secs: u64,
    pub max_pending_batches: usize,
    /// Retries for journal commits (store writes carry their own lock retry).
    pub journal_retry: RetryPolicy,
}

#[derive(Debug, Default)]
pub struct WriterCounters {
    pub samples_saved_total: AtomicU64,
    pub flush_failures_total: AtomicU64,
    pub batches_dropped_total: AtomicU64,
}

struct PendingBatch {
    samples: Vec<Sample>,
    journaled: bool,
    stored: bool,
}

/// Spawns the writer. Flushes when `flush_rate` batches are buffered, every `flush_interval_secs`,
/// and when the channel closes (all senders dropped), then exits.
pub fn spawn_sample_writer(
    mut write_rx: mpsc::Receiver<Vec<Sample>>,
    journal: JournalHandle,
    repo: Arc<TelemetryRepo>,
    alert_tx: AlertSender,
    config: SampleWriterConfig,
    counters: Arc<WriterCounters>,
) -> tokio::task::JoinHandle<()> {
    let flush_interval = Duration::from_secs(config.flush_interval_secs);
    tokio::spawn(async move {
        let mut writer = Writer {
            pending: VecDeque::new(),
            journal,
            repo,
            alert_tx,
            config,
            counters,
            failing: false,
        };
        let mut flush_tick = interval(flush_interval);
        flush_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                result = write_rx.recv() => {
                    match result {
                        Some(batch) => {
                            writer.push(batch);
                            if writer.unflushed() >= writer.config.flush_rate as usize {
                                writer.flush().await;
                            }
                        }
                        None => break,
                    }
                }
                _ = flush_tick.tick() => {
                    writer.flush().await;
                }
            }
        }
        writer.flush().await;
        if !writer.pending.is_empty() {
            let lost: usize = writer.pending.iter().map(|b| b.samples.len()).sum();
            tracing::error!(samples_count = lost, "sample writer: final flush failed, samples not persisted");
        }
        tracing::debug!("Sample writer shutting down");
    })
}

struct Writer {
    pending: VecDeque<PendingBatch>,
    journal: JournalHandle,
    repo: Arc<TelemetryRepo>,
    alert_tx: AlertSender,
    config: SampleWriterConfig,
    counters: Arc<WriterCounters>,
    /// Last flush failed; the next success resolves the alert.
    failing: bool,
}

impl Writer {
    fn push(&mut self, samples: Vec<Sample>) {
        if samples.is_empty() {
            return;
        }
        self.pending.push_back(PendingBatch {
            samples,
            journaled: false,
            stored: false,
        });
        while self.pending.len() > self.config.max_pending_batches.max(1) {
            if let Some(dropped) = self.pending.pop_front() {
                self.counters.batches_dropped_total.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    samples_count = dropped.samples.len(),
                    max_pending_batches = self.config.max_pending_batches,
                    "sample writer backlog full, dropping oldest batch"
                );
            }
        }
    }

    fn unflushed(&self) -> usize {
        self.pending.len()
    }

    async fn flush(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        match self.flush_pending().await {
            Ok(n) => {
                tracing::debug!(operation = "save_samples", samples_count = n, "Samples saved");
                if self.failing {
                    self.failing = false;
                    send_alert(
                        &self.alert_tx,
                        AlertCommand::Resolve {
                            device_id: None,
                            kind: AlertKind::PersistenceFailure,
                        },
                    );
                }
            }
            Err(e) => {
                self.failing = true;
                self.counters.flush_failures_total.fetch_add(1, Ordering::Relaxed);
                let buffered: usize = self.pending.iter().map(|b| b.samples.len()).sum();
                tracing::warn!(error = %e, samples_buffered = buffered, "sample writer: flush failed, will retry");
                send_alert(
                    &self.alert_tx,
                    AlertCommand::Raise(AlertDraft::new(
                        None,
                        AlertKind::PersistenceFailure,
                        Severity::Critical,
                        format!("sample write failed ({} samples buffered): {}", buffered, e),
                    )),
                );
            }
        }
    }

    /// Journal, then store, every buffered batch. Each sink takes all outstanding batches in
    /// one commit; a sink that already took a batch is skipped on retry.
    async fn flush_pending(&mut self) -> Result<usize, PersistenceError> {
        let to_journal: Vec<Sample> = self
            .pending
            .iter()
            .filter(|b| !b.journaled)
            .flat_map(|b| b.samples.iter().cloned())
            .collect();
        if !to_journal.is_empty() {
            let journal = &self.journal;
            run_with_retry("journal_append", &self.config.journal_retry, || {
                journal.append(to_journal.clone())
            })
            .await?;
            self.pending.iter_mut().for_each(|b| b.journaled = true);
        }

        let to_store: Vec<Sample> = self
            .pending
            .iter()
            .filter(|b| !b.stored)
            .flat_map(|b| b.samples.iter().cloned())
            .collect();
        if !to_store.is_empty() {
            self.repo.save_samples(&to_store).await?;
            self.pending.iter_mut().for_each(|b| b.stored = true);
        }

        let n: usize = self.pending.drain(..).map(|b| b.samples.len()).sum();
        self.counters.samples_saved_total.fetch_add(n as u64, Ordering::Relaxed);
        Ok(n)
    }
}
