use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::{info, warn};

use super::{Document, Listing};
use crate::error::SourceError;

/// A single JSON file shaped `{"<name>": "<markdown>", ...}`, as written by
/// note-app exporters.
pub struct ExportSource {
    path: PathBuf,
}

impl ExportSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn list(&self) -> Result<Listing, SourceError> {
        let raw = fs::read(&self.path).map_err(|source| SourceError::Io {
            path: self.path.clone(),
            source,
        })?;
        let entries: Map<String, Value> =
            serde_json::from_slice(&raw).map_err(|source| SourceError::Export {
                path: self.path.clone(),
                source,
            })?;
        info!("Loaded {} entries from {}", entries.len(), self.path.display());

        let mut listing = Listing::default();
        for (name, value) in entries {
            match value {
                Value::String(text) => listing.documents.push(Document::new(name, text)),
                other => {
                    warn!("{}: entry {:?} is not a string", self.path.display(), name);
                    listing.failures.push((
                        name.clone(),
                        SourceError::Malformed {
                            origin: format!("{}#{}", self.path.display(), name),
                            reason: format!("expected a string, found {}", kind(&other)),
                        },
                    ));
                }
            }
        }
        Ok(listing)
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
