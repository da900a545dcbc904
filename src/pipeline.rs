//! Flows: list a source, split every note into sections, sync the table.

use std::fmt;

use rayon::prelude::*;
use tracing::{info, warn};

use crate::config::{self, FlowConfig, Settings};
use crate::error::{ConfigError, FlowError};
use crate::observer::{ProgressObserver, TracingObserver};
use crate::parser::{Extractor, SectionRecord};
use crate::source::{Document, Source};
use crate::sync::{SyncReport, Synchronizer};

/// What happened to one flow. Never an `Err` on its own: a failed flow is
/// reported and the next one still runs.
#[derive(Debug)]
pub struct FlowReport {
    pub table: String,
    pub source: String,
    pub documents: usize,
    pub sections: usize,
    /// Documents that could not be read or decoded.
    pub skipped: Vec<String>,
    pub outcome: Result<SyncReport, FlowError>,
}

impl FlowReport {
    fn failed(flow: &FlowConfig, source: String, err: impl Into<FlowError>) -> Self {
        Self {
            table: flow.table.clone(),
            source,
            documents: 0,
            sections: 0,
            skipped: Vec::new(),
            outcome: Err(err.into()),
        }
    }

    /// The flow synced and every record was written.
    pub fn success(&self) -> bool {
        matches!(&self.outcome, Ok(report) if report.success())
    }
}

impl fmt::Display for FlowReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            Ok(report) => write!(
                f,
                "{} <- {}: {} documents, {} sections ({} skipped); {} inserted, {} updated, {} failed",
                self.table,
                self.source,
                self.documents,
                self.sections,
                self.skipped.len(),
                report.inserted,
                report.updated,
                report.failed
            ),
            Err(err) => write!(f, "{} <- {}: FAILED: {}", self.table, self.source, err),
        }
    }
}

#[derive(Debug, Default)]
pub struct RunReport {
    pub flows: Vec<FlowReport>,
}

impl RunReport {
    pub fn success(&self) -> bool {
        self.flows.iter().all(FlowReport::success)
    }

    pub fn written(&self) -> usize {
        self.flows
            .iter()
            .filter_map(|f| f.outcome.as_ref().ok())
            .map(SyncReport::written)
            .sum()
    }
}

/// Split each document into records, keeping document order. Documents that
/// are not UTF-8 are returned by name instead.
pub fn extract_documents(
    extractor: &Extractor,
    documents: &[Document],
) -> (Vec<SectionRecord>, Vec<String>) {
    let per_doc: Vec<_> = documents
        .par_iter()
        .map(|doc| doc.text().map(|text| extractor.extract(text, &doc.name)))
        .collect();

    let mut records = Vec::new();
    let mut skipped = Vec::new();
    for (doc, result) in documents.iter().zip(per_doc) {
        match result {
            Ok(sections) => records.extend(sections),
            Err(err) => {
                warn!("{}", err);
                skipped.push(doc.name.clone());
            }
        }
    }
    (records, skipped)
}

pub async fn run_flow(settings: &Settings, flow: &FlowConfig, progress: bool) -> FlowReport {
    let source = match Source::from_config(&flow.source) {
        Ok(source) => source,
        Err(err) => return FlowReport::failed(flow, format!("{:?}", flow.source), err),
    };
    let described = source.describe();

    if let Err(err) = config::validate_table_name(&flow.table) {
        return FlowReport::failed(flow, described, err);
    }
    let extractor = match Extractor::new(settings.convention_for(flow).clone()) {
        Ok(extractor) => extractor,
        Err(err) => return FlowReport::failed(flow, described, err),
    };

    info!(table = %flow.table, source = %described, "Listing documents");
    let listing = match source.list().await {
        Ok(listing) => listing,
        Err(err) => return FlowReport::failed(flow, described, err),
    };

    let (records, mut skipped) = extract_documents(&extractor, &listing.documents);
    skipped.extend(listing.failures.into_iter().map(|(name, _)| name));
    info!(
        table = %flow.table,
        convention = extractor.convention().name(),
        documents = listing.documents.len(),
        sections = records.len(),
        "Extracted sections"
    );

    let outcome = Synchronizer::connect(settings.store.clone())
        .map_err(FlowError::from)
        .and_then(|sync| {
            let sync = if progress {
                sync.with_observer((TracingObserver, ProgressObserver::new()))
            } else {
                sync.with_observer(TracingObserver)
            };
            sync.synchronize(&flow.table, &records).map_err(FlowError::from)
        });

    FlowReport {
        table: flow.table.clone(),
        source: described,
        documents: listing.documents.len(),
        sections: records.len(),
        skipped,
        outcome,
    }
}

/// Run the flows targeting `tables` (all of them when empty), one after the
/// other.
pub async fn run(
    settings: &Settings,
    tables: &[String],
    progress: bool,
) -> Result<RunReport, ConfigError> {
    let flows = settings.select_flows(tables)?;
    let mut report = RunReport::default();
    for flow in flows {
        let flow_report = run_flow(settings, flow, progress).await;
        if let Err(err) = &flow_report.outcome {
            warn!(table = %flow_report.table, "Flow failed: {}", err);
        }
        report.flows.push(flow_report);
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::config::{SourceConfig, StoreConfig};
    use crate::parser::HeadingConvention;

    fn settings(dir: &std::path::Path, flows: Vec<FlowConfig>) -> Settings {
        Settings {
            store: StoreConfig::at(dir.join("vault.sqlite")),
            convention: HeadingConvention::numbered(),
            flows,
        }
    }

    fn flow(table: &str, path: std::path::PathBuf) -> FlowConfig {
        FlowConfig {
            table: table.into(),
            source: SourceConfig::directory(path),
            convention: None,
        }
    }

    #[test]
    fn extraction_keeps_document_order() {
        let extractor = Extractor::new(HeadingConvention::numbered()).unwrap();
        let docs: Vec<Document> = (0..20)
            .map(|i| Document::new(format!("n{:02}.md", i), format!("1. Titre\nnote {}", i)))
            .chain([Document::new("bad.md", vec![0xffu8, 0xfe])])
            .collect();
        let (records, skipped) = extract_documents(&extractor, &docs);
        assert_eq!(records.len(), 20);
        assert_eq!(records[0].source_name, "n00.md");
        assert_eq!(records[19].content, "note 19");
        assert_eq!(skipped, vec!["bad.md".to_string()]);
    }

    #[tokio::test]
    async fn flows_run_independently_and_resync_updates() {
        let dir = tempfile::tempdir().unwrap();
        let vault = dir.path().join("races");
        fs::create_dir_all(&vault).unwrap();
        fs::write(vault.join("Orcs.md"), "1. Économie\nCuir.\n2. Magie\nPeu.").unwrap();
        fs::write(vault.join("Nains.md"), "1. Économie\nMines.").unwrap();

        let settings = settings(
            dir.path(),
            vec![
                flow("missing", dir.path().join("nope")),
                flow("races", vault.clone()),
            ],
        );

        let first = run(&settings, &[], false).await.unwrap();
        assert_eq!(first.flows.len(), 2);
        assert!(matches!(first.flows[0].outcome, Err(FlowError::Source(_))));
        assert!(!first.success());
        let races = first.flows[1].outcome.as_ref().unwrap();
        assert_eq!(races.inserted, 3);
        assert_eq!(first.flows[1].documents, 2);

        let second = run(&settings, &["races".to_string()], false).await.unwrap();
        assert_eq!(second.flows.len(), 1);
        assert!(second.success());
        let races = second.flows[0].outcome.as_ref().unwrap();
        assert_eq!((races.inserted, races.updated), (0, 3));
        assert_eq!(second.written(), 3);
    }

    #[tokio::test]
    async fn undecodable_note_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let vault = dir.path().join("notes");
        fs::create_dir_all(&vault).unwrap();
        fs::write(vault.join("ok.md"), "1. Un\nA").unwrap();
        fs::write(vault.join("bad.md"), [b'1', b'.', b' ', 0xff]).unwrap();

        let settings = settings(dir.path(), vec![flow("notes", vault)]);
        let report = run_flow(&settings, &settings.flows[0], false).await;
        assert!(report.success());
        assert_eq!(report.skipped, vec!["bad.md".to_string()]);
        assert_eq!(report.sections, 1);
    }

    #[tokio::test]
    async fn unopenable_store_is_connection_error() {
        let dir = tempfile::tempdir().unwrap();
        let vault = dir.path().join("notes");
        fs::create_dir_all(&vault).unwrap();
        fs::write(vault.join("ok.md"), "1. Un\nA").unwrap();

        let mut settings = settings(dir.path(), vec![flow("notes", vault)]);
        settings.store.path = dir.path().join("no_such_dir").join("vault.sqlite");
        let report = run_flow(&settings, &settings.flows[0], false).await;
        assert_eq!(report.sections, 1);
        assert!(matches!(report.outcome, Err(FlowError::Connection(_))));
        assert!(!report.success());
    }

    #[tokio::test]
    async fn unknown_flow_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path(), Vec::new());
        assert!(matches!(
            run(&settings, &["ghost".to_string()], false).await,
            Err(ConfigError::UnknownFlow(_))
        ));
    }
}
