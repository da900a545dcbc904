//! Hooks a caller can attach to a [`Synchronizer`](crate::sync::Synchronizer).
//!
//! Observers only watch: synchronization behaves the same with or without
//! one attached.

use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info, warn};

use crate::error::RecordWriteError;
use crate::parser::SectionRecord;
use crate::sync::{SyncReport, WriteOutcome};

pub trait SyncObserver {
    fn batch_started(&self, _table: &str, _records: usize) {}
    fn table_ready(&self, _table: &str, _created: bool) {}
    fn record_written(&self, _record: &SectionRecord, _outcome: WriteOutcome) {}
    fn record_failed(&self, _record: &SectionRecord, _error: &RecordWriteError) {}
    fn batch_finished(&self, _report: &SyncReport) {}
}

pub struct NoopObserver;

impl SyncObserver for NoopObserver {}

/// Emits `tracing` events.
pub struct TracingObserver;

impl SyncObserver for TracingObserver {
    fn batch_started(&self, table: &str, records: usize) {
        info!(table, records, "Synchronizing sections");
    }

    fn table_ready(&self, table: &str, created: bool) {
        if created {
            info!(table, "Created table");
        }
    }

    fn record_written(&self, record: &SectionRecord, outcome: WriteOutcome) {
        debug!(
            title = %record.section_title,
            source = %record.source_name,
            ?outcome,
            "Upserted section"
        );
    }

    fn record_failed(&self, _record: &SectionRecord, error: &RecordWriteError) {
        warn!("{}", error);
    }

    fn batch_finished(&self, report: &SyncReport) {
        info!(
            table = %report.table,
            attempted = report.attempted,
            inserted = report.inserted,
            updated = report.updated,
            failed = report.failed,
            "Synchronized"
        );
    }
}

/// Progress bar over the records of each batch.
pub struct ProgressObserver {
    bar: ProgressBar,
}

impl ProgressObserver {
    pub fn new() -> Self {
        let bar = ProgressBar::hidden();
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} {msg} [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})")
        {
            bar.set_style(style.progress_chars("#>-"));
        }
        Self { bar }
    }
}

impl Default for ProgressObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncObserver for ProgressObserver {
    fn batch_started(&self, table: &str, records: usize) {
        self.bar.set_draw_target(indicatif::ProgressDrawTarget::stderr());
        self.bar.reset();
        self.bar.set_length(records as u64);
        self.bar.set_message(table.to_string());
    }

    fn record_written(&self, _record: &SectionRecord, _outcome: WriteOutcome) {
        self.bar.inc(1);
    }

    fn record_failed(&self, _record: &SectionRecord, _error: &RecordWriteError) {
        self.bar.inc(1);
    }

    fn batch_finished(&self, _report: &SyncReport) {
        self.bar.finish_and_clear();
    }
}

impl<A: SyncObserver, B: SyncObserver> SyncObserver for (A, B) {
    fn batch_started(&self, table: &str, records: usize) {
        self.0.batch_started(table, records);
        self.1.batch_started(table, records);
    }

    fn table_ready(&self, table: &str, created: bool) {
        self.0.table_ready(table, created);
        self.1.table_ready(table, created);
    }

    fn record_written(&self, record: &SectionRecord, outcome: WriteOutcome) {
        self.0.record_written(record, outcome);
        self.1.record_written(record, outcome);
    }

    fn record_failed(&self, record: &SectionRecord, error: &RecordWriteError) {
        self.0.record_failed(record, error);
        self.1.record_failed(record, error);
    }

    fn batch_finished(&self, report: &SyncReport) {
        self.0.batch_finished(report);
        self.1.batch_finished(report);
    }
}
