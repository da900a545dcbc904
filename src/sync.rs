use std::fmt;

use chrono::{SecondsFormat, Utc};
use rusqlite::{params, Connection, Transaction, TransactionBehavior};

use crate::config::StoreConfig;
use crate::db::{self, TableLayout};
use crate::error::{ConnectionError, RecordWriteError, SyncError};
use crate::observer::{NoopObserver, SyncObserver};
use crate::parser::SectionRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Inserted,
    Updated,
}

/// Counts for one `synchronize` call.
#[derive(Debug, Default)]
pub struct SyncReport {
    pub table: String,
    pub attempted: usize,
    pub inserted: usize,
    pub updated: usize,
    pub failed: usize,
    pub failures: Vec<RecordWriteError>,
}

impl SyncReport {
    fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            ..Self::default()
        }
    }

    pub fn success(&self) -> bool {
        self.failed == 0
    }

    pub fn written(&self) -> usize {
        self.inserted + self.updated
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} attempted, {} inserted, {} updated, {} failed",
            self.table, self.attempted, self.inserted, self.updated, self.failed
        )
    }
}

/// Upserts section records into tables of one store.
///
/// Rows are keyed on `(title, source)`; nothing is ever deleted, so sections
/// removed from a note stay in the table.
pub struct Synchronizer {
    conn: Connection,
    store: StoreConfig,
    observer: Box<dyn SyncObserver>,
}

impl Synchronizer {
    pub fn connect(store: StoreConfig) -> Result<Self, ConnectionError> {
        let conn = db::connect(&store)?;
        Ok(Self::from_parts(conn, store))
    }

    /// Wrap an already open connection (e.g. in-memory).
    pub fn with_connection(conn: Connection, store: StoreConfig) -> Result<Self, ConnectionError> {
        db::prepare(&conn, &store)?;
        Ok(Self::from_parts(conn, store))
    }

    fn from_parts(conn: Connection, store: StoreConfig) -> Self {
        Self {
            conn,
            store,
            observer: Box::new(NoopObserver),
        }
    }

    pub fn with_observer(mut self, observer: impl SyncObserver + 'static) -> Self {
        self.observer = Box::new(observer);
        self
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn store(&self) -> &StoreConfig {
        &self.store
    }

    /// Ensure `table` exists, then upsert `records` in order.
    ///
    /// A record that fails is reported and skipped; connection loss or an
    /// incompatible table aborts the call. The batch runs in one immediate
    /// transaction, each record as its own statement.
    pub fn synchronize(
        &self,
        table: &str,
        records: &[SectionRecord],
    ) -> Result<SyncReport, SyncError> {
        let layout = TableLayout::new(&self.store, table);
        self.observer.batch_started(table, records.len());

        let created = db::ensure_table(&self.conn, &layout)?;
        self.observer.table_ready(table, created);

        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)
            .map_err(|e| layout.connection_error(e))?;

        // Rows are never deleted, so any rowid above this mark is a fresh insert.
        let mut high_water: i64 = tx
            .query_row(&layout.max_rowid_sql(), [], |r| r.get(0))
            .map_err(|e| layout.failure(e))?;

        let mut report = SyncReport::new(table);
        {
            let mut stmt = tx
                .prepare(&layout.upsert_sql())
                .map_err(|e| layout.failure(e))?;

            for record in records {
                report.attempted += 1;
                let written = if self.store.timestamp_column {
                    let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
                    stmt.query_row(
                        params![record.section_title, record.content, record.source_name, now],
                        |r| r.get::<_, i64>(0),
                    )
                } else {
                    stmt.query_row(
                        params![record.section_title, record.content, record.source_name],
                        |r| r.get::<_, i64>(0),
                    )
                };

                match written {
                    Ok(rowid) => {
                        let outcome = if rowid > high_water {
                            high_water = rowid;
                            report.inserted += 1;
                            WriteOutcome::Inserted
                        } else {
                            report.updated += 1;
                            WriteOutcome::Updated
                        };
                        self.observer.record_written(record, outcome);
                    }
                    Err(err) if db::is_connection_failure(&err) || tx.is_autocommit() => {
                        return Err(layout.connection_error(err).into());
                    }
                    Err(err) => {
                        let failure = RecordWriteError {
                            section_title: record.section_title.clone(),
                            source_name: record.source_name.clone(),
                            source: err,
                        };
                        self.observer.record_failed(record, &failure);
                        report.failed += 1;
                        report.failures.push(failure);
                    }
                }
            }
        }

        tx.commit().map_err(|e| layout.connection_error(e))?;
        self.observer.batch_finished(&report);
        Ok(report)
    }
}

// ── Tests ──
