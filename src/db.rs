use std::collections::HashSet;
use std::time::Duration;

use rusqlite::{params, Connection, ErrorCode, OptionalExtension};

use crate::config::StoreConfig;
use crate::error::{ConnectionError, SchemaError, SyncError};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub fn connect(store: &StoreConfig) -> Result<Connection, ConnectionError> {
    let conn = Connection::open(&store.path).map_err(|source| ConnectionError {
        target: store.path.display().to_string(),
        source,
    })?;
    prepare(&conn, store)?;
    Ok(conn)
}

/// Pragmas and `ATTACH` for a freshly opened connection.
pub fn prepare(conn: &Connection, store: &StoreConfig) -> Result<(), ConnectionError> {
    let fail = |source| ConnectionError {
        target: store.path.display().to_string(),
        source,
    };
    conn.busy_timeout(BUSY_TIMEOUT).map_err(fail)?;
    conn.execute_batch("PRAGMA journal_mode=WAL;").map_err(fail)?;
    for (name, path) in &store.attach {
        conn.execute(
            "ATTACH DATABASE ?1 AS ?2",
            params![path.to_string_lossy(), name],
        )
        .map_err(|source| ConnectionError {
            target: path.display().to_string(),
            source,
        })?;
    }
    Ok(())
}

/// Errors that mean the store itself is gone or unusable, as opposed to one
/// statement being rejected.
pub fn is_connection_failure(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => matches!(
            e.code,
            ErrorCode::CannotOpen
                | ErrorCode::NotADatabase
                | ErrorCode::DatabaseCorrupt
                | ErrorCode::SystemIoFailure
                | ErrorCode::DatabaseBusy
                | ErrorCode::DatabaseLocked
                | ErrorCode::DiskFull
                | ErrorCode::PermissionDenied
                | ErrorCode::OutOfMemory
                | ErrorCode::FileLockingProtocolFailed
                | ErrorCode::NoLargeFileSupport
                | ErrorCode::ReadOnly
        ),
        _ => false,
    }
}

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

// ── Section tables ──

/// Names and SQL for one destination table under a store configuration.
pub struct TableLayout<'a> {
    pub store: &'a StoreConfig,
    pub table: &'a str,
}

impl<'a> TableLayout<'a> {
    pub fn new(store: &'a StoreConfig, table: &'a str) -> Self {
        Self { store, table }
    }

    pub fn qualified(&self) -> String {
        format!(
            "{}.{}",
            quote_ident(&self.store.schema),
            quote_ident(self.table)
        )
    }

    fn target(&self) -> String {
        self.store.path.display().to_string()
    }

    pub fn create_sql(&self) -> String {
        let c = &self.store.columns;
        let updated = if self.store.timestamp_column {
            format!(",\n            {} TEXT", quote_ident(&c.updated))
        } else {
            String::new()
        };
        format!(
            "CREATE TABLE IF NOT EXISTS {table} (
            {title} TEXT NOT NULL,
            {content} TEXT,
            {source} TEXT NOT NULL{updated},
            UNIQUE ({title}, {source})
        );",
            table = self.qualified(),
            title = quote_ident(&c.title),
            content = quote_ident(&c.content),
            source = quote_ident(&c.source),
        )
    }

    /// Single-statement upsert; returns the written row's rowid.
    pub fn upsert_sql(&self) -> String {
        let c = &self.store.columns;
        let (title, content, source) = (
            quote_ident(&c.title),
            quote_ident(&c.content),
            quote_ident(&c.source),
        );
        if self.store.timestamp_column {
            let updated = quote_ident(&c.updated);
            format!(
                "INSERT INTO {table} ({title}, {content}, {source}, {updated})
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT ({title}, {source})
             DO UPDATE SET {content} = excluded.{content}, {updated} = excluded.{updated}
             RETURNING rowid",
                table = self.qualified(),
            )
        } else {
            format!(
                "INSERT INTO {table} ({title}, {content}, {source})
             VALUES (?1, ?2, ?3)
             ON CONFLICT ({title}, {source})
             DO UPDATE SET {content} = excluded.{content}
             RETURNING rowid",
                table = self.qualified(),
            )
        }
    }

    pub fn max_rowid_sql(&self) -> String {
        format!("SELECT COALESCE(MAX(rowid), 0) FROM {}", self.qualified())
    }

    fn required_columns(&self) -> Vec<&str> {
        let c = &self.store.columns;
        let mut cols = vec![c.title.as_str(), c.content.as_str(), c.source.as_str()];
        if self.store.timestamp_column {
            cols.push(c.updated.as_str());
        }
        cols
    }

    /// Map a store error hit while preparing this table.
    pub fn failure(&self, err: rusqlite::Error) -> SyncError {
        if is_connection_failure(&err) {
            SyncError::Connection(ConnectionError {
                target: self.target(),
                source: err,
            })
        } else {
            self.schema_error(err.to_string())
        }
    }

    pub fn connection_error(&self, err: rusqlite::Error) -> ConnectionError {
        ConnectionError {
            target: self.target(),
            source: err,
        }
    }

    fn schema_error(&self, reason: impl Into<String>) -> SyncError {
        SyncError::Schema(SchemaError {
            table: format!("{}.{}", self.store.schema, self.table),
            reason: reason.into(),
        })
    }
}

pub fn table_exists(conn: &Connection, layout: &TableLayout) -> rusqlite::Result<bool> {
    let sql = format!(
        "SELECT COUNT(*) FROM {}.sqlite_master WHERE type = 'table' AND name = ?1 COLLATE NOCASE",
        quote_ident(&layout.store.schema)
    );
    let n: i64 = conn.query_row(&sql, params![layout.table], |r| r.get(0))?;
    Ok(n > 0)
}

/// Create the table if absent and check the existing one can take upserts.
/// Returns whether the table was created by this call.
pub fn ensure_table(conn: &Connection, layout: &TableLayout) -> Result<bool, SyncError> {
    let existed = table_exists(conn, layout).map_err(|e| layout.failure(e))?;
    conn.execute_batch(&layout.create_sql())
        .map_err(|e| layout.failure(e))?;
    check_schema(conn, layout)?;
    Ok(!existed)
}

fn check_schema(conn: &Connection, layout: &TableLayout) -> Result<(), SyncError> {
    let schema = layout.store.schema.as_str();
    let err = |e| layout.failure(e);

    let kind: Option<(String, bool)> = conn
        .query_row(
            "SELECT type, wr FROM pragma_table_list WHERE schema = ?1 AND name = ?2 COLLATE NOCASE",
            params![schema, layout.table],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(err)?;
    match kind {
        None => return Err(layout.schema_error("table not found after create")),
        Some((kind, _)) if kind != "table" => {
            return Err(layout.schema_error(format!("name is taken by a {kind}")))
        }
        Some((_, true)) => return Err(layout.schema_error("WITHOUT ROWID tables are not supported")),
        Some(_) => {}
    }

    let columns: HashSet<String> = {
        let mut stmt = conn
            .prepare("SELECT name FROM pragma_table_info(?1, ?2)")
            .map_err(err)?;
        let rows = stmt
            .query_map(params![layout.table, schema], |r| r.get::<_, String>(0))
            .map_err(err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(err)?;
        rows.into_iter().map(|c| c.to_lowercase()).collect()
    };
    for col in layout.required_columns() {
        if !columns.contains(&col.to_lowercase()) {
            return Err(layout.schema_error(format!("missing column {col}")));
        }
    }

    let key: HashSet<String> = [&layout.store.columns.title, &layout.store.columns.source]
        .iter()
        .map(|c| c.to_lowercase())
        .collect();
    let indexes: Vec<String> = {
        let mut stmt = conn
            .prepare(
                "SELECT name FROM pragma_index_list(?1, ?2) WHERE \"unique\" = 1 AND partial = 0",
            )
            .map_err(err)?;
        let names = stmt
            .query_map(params![layout.table, schema], |r| r.get::<_, String>(0))
            .map_err(err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(err)?;
        names
    };
    let mut info = conn
        .prepare("SELECT name FROM pragma_index_info(?1, ?2)")
        .map_err(err)?;
    for index in indexes {
        let cols: Vec<Option<String>> = info
            .query_map(params![index, schema], |r| r.get(0))
            .map_err(err)?
            .collect::<Result<_, _>>()
            .map_err(err)?;
        // Expression columns have no name and cannot serve as the conflict target.
        let Some(cols) = cols.into_iter().collect::<Option<Vec<String>>>() else {
            continue;
        };
        let cols: HashSet<String> = cols.iter().map(|c| c.to_lowercase()).collect();
        if cols == key {
            return Ok(());
        }
    }
    Err(layout.schema_error(format!(
        "no unique constraint on ({}, {})",
        layout.store.columns.title, layout.store.columns.source
    )))
}

// ── Stats ──

pub struct TableStats {
    pub rows: usize,
    pub sources: usize,
    pub last_updated: Option<String>,
}

/// Row counts for a section table, `None` when it does not exist yet.
pub fn table_stats(conn: &Connection, layout: &TableLayout) -> rusqlite::Result<Option<TableStats>> {
    if !table_exists(conn, layout)? {
        return Ok(None);
    }
    let c = &layout.store.columns;
    let latest = if layout.store.timestamp_column {
        format!("MAX({})", quote_ident(&c.updated))
    } else {
        "NULL".to_string()
    };
    let sql = format!(
        "SELECT COUNT(*), COUNT(DISTINCT {}), {} FROM {}",
        quote_ident(&c.source),
        latest,
        layout.qualified()
    );
    conn.query_row(&sql, [], |r| {
        Ok(Some(TableStats {
            rows: r.get(0)?,
            sources: r.get(1)?,
            last_updated: r.get(2)?,
        }))
    })
}
