use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

use super::{Document, Listing};
use crate::error::SourceError;

/// Recursive walk of a local vault folder.
pub struct DirectorySource {
    root: PathBuf,
    extension: String,
    qualified_names: bool,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>, extension: &str, qualified_names: bool) -> Self {
        Self {
            root: root.into(),
            extension: extension.trim_start_matches('.').to_string(),
            qualified_names,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn list(&self) -> Result<Listing, SourceError> {
        let meta = fs::metadata(&self.root).map_err(|source| SourceError::Io {
            path: self.root.clone(),
            source,
        })?;
        if !meta.is_dir() {
            return Err(SourceError::Io {
                path: self.root.clone(),
                source: std::io::Error::new(std::io::ErrorKind::Other, "not a directory"),
            });
        }

        let mut listing = Listing::default();
        for entry in WalkDir::new(&self.root).sort_by_file_name() {
            let entry = match entry {
                Ok(e) => e,
                Err(err) => {
                    let path = err.path().unwrap_or(&self.root).to_path_buf();
                    warn!("Skipping {}: {}", path.display(), err);
                    listing.failures.push((
                        path.display().to_string(),
                        SourceError::Walk { path, source: err },
                    ));
                    continue;
                }
            };
            if !entry.file_type().is_file() || !self.matches(entry.path()) {
                continue;
            }

            let name = self.document_name(entry.path());
            match fs::read(entry.path()) {
                Ok(bytes) => {
                    debug!("Found {}", entry.path().display());
                    listing.documents.push(Document { name, bytes });
                }
                Err(source) => {
                    warn!("Cannot read {}: {}", entry.path().display(), source);
                    listing.failures.push((
                        name,
                        SourceError::Io {
                            path: entry.path().to_path_buf(),
                            source,
                        },
                    ));
                }
            }
        }
        Ok(listing)
    }

    fn matches(&self, path: &Path) -> bool {
        path.extension().and_then(|e| e.to_str()) == Some(self.extension.as_str())
    }

    fn document_name(&self, path: &Path) -> String {
        if self.qualified_names {
            if let Ok(rel) = path.strip_prefix(&self.root) {
                return rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
            }
        }
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vault() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("Les Races/Anciennes")).unwrap();
        fs::write(root.join("Les Races/Orcs.md"), "1. Économie\nCuir.").unwrap();
        fs::write(root.join("Les Races/Anciennes/Elfes.md"), "1. Magie\nOui.").unwrap();
        fs::write(root.join("Les Races/notes.txt"), "ignored").unwrap();
        fs::write(root.join("Les Races/Upper.MD"), "ignored").unwrap();
        dir
    }

    #[test]
    fn walks_recursively_and_filters_suffix() {
        let dir = vault();
        let source = DirectorySource::new(dir.path(), "md", false);
        let listing = source.list().unwrap();
        let names: Vec<&str> = listing.documents.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["Elfes.md", "Orcs.md"]);
        assert!(listing.failures.is_empty());
        assert_eq!(listing.documents[1].bytes, "1. Économie\nCuir.".as_bytes());
    }

    #[test]
    fn qualified_names_are_relative_paths() {
        let dir = vault();
        let source = DirectorySource::new(dir.path(), ".md", true);
        let listing = source.list().unwrap();
        let names: Vec<&str> = listing.documents.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["Les Races/Anciennes/Elfes.md", "Les Races/Orcs.md"]);
    }

    #[test]
    fn missing_root_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let source = DirectorySource::new(dir.path().join("nope"), "md", false);
        assert!(matches!(source.list(), Err(SourceError::Io { .. })));
    }

    #[test]
    fn empty_folder_lists_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let listing = DirectorySource::new(dir.path(), "md", false).list().unwrap();
        assert!(listing.documents.is_empty());
    }
}
