use std::path::PathBuf;

use thiserror::Error;

/// Document bytes that are not valid UTF-8. Only that document is skipped.
#[derive(Debug, Error)]
#[error("{name}: not valid UTF-8 ({source})")]
pub struct ParseError {
    pub name: String,
    #[source]
    pub source: std::str::Utf8Error,
}

/// The store cannot be opened or the connection was lost mid-batch.
#[derive(Debug, Error)]
#[error("cannot reach store {target}: {source}")]
pub struct ConnectionError {
    pub target: String,
    #[source]
    pub source: rusqlite::Error,
}

/// The destination table exists but cannot hold section rows.
#[derive(Debug, Error)]
#[error("table {table} has an incompatible schema: {reason}")]
pub struct SchemaError {
    pub table: String,
    pub reason: String,
}

/// A single record's upsert failed; the rest of the batch still runs.
#[derive(Debug, Error)]
#[error("writing ({section_title:?}, {source_name:?}) failed: {source}")]
pub struct RecordWriteError {
    pub section_title: String,
    pub source_name: String,
    #[source]
    pub source: rusqlite::Error,
}

/// Fatal outcome of one `synchronize` call.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Schema(#[from] SchemaError),
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("walking {}: {source}", .path.display())]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
    #[error("{}: invalid export file: {source}", .path.display())]
    Export {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url}: server answered {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },
    #[error("{origin}: {reason}")]
    Malformed { origin: String, reason: String },
    #[error("environment variable {0} is not set")]
    MissingSecret(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] config::ConfigError),
    #[error("invalid table name {0:?}: expected [A-Za-z_][A-Za-z0-9_]*")]
    TableName(String),
    #[error("invalid schema name {0:?}: expected [A-Za-z_][A-Za-z0-9_]*")]
    SchemaName(String),
    #[error("schema {0:?} is neither main, temp, nor listed under store.attach")]
    UnattachedSchema(String),
    #[error("invalid heading convention: {0}")]
    Convention(String),
    #[error("no flow targets table {0:?}")]
    UnknownFlow(String),
}

/// Why a whole flow produced no sync report.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Sync(#[from] SyncError),
}
