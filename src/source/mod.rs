//! Where notes come from. Every source yields `(name, bytes)` pairs; one
//! unreadable document is recorded and the listing carries on.

pub mod directory;
pub mod export;
pub mod webdav;

use crate::config::SourceConfig;
use crate::error::{ParseError, SourceError};

pub use directory::DirectorySource;
pub use export::ExportSource;
pub use webdav::WebDavSource;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl Document {
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }

    pub fn text(&self) -> Result<&str, ParseError> {
        std::str::from_utf8(&self.bytes).map_err(|source| ParseError {
            name: self.name.clone(),
            source,
        })
    }
}

#[derive(Debug, Default)]
pub struct Listing {
    pub documents: Vec<Document>,
    /// Documents that were found but could not be read.
    pub failures: Vec<(String, SourceError)>,
}

pub enum Source {
    Directory(DirectorySource),
    Export(ExportSource),
    WebDav(WebDavSource),
}

impl Source {
    pub fn from_config(config: &SourceConfig) -> Result<Self, SourceError> {
        Ok(match config {
            SourceConfig::Directory {
                path,
                extension,
                qualified_names,
            } => Self::Directory(DirectorySource::new(path, extension, *qualified_names)),
            SourceConfig::Export { path } => Self::Export(ExportSource::new(path)),
            SourceConfig::Webdav {
                url,
                extension,
                username,
                password_env,
            } => {
                let password = match password_env {
                    Some(var) => Some(
                        std::env::var(var).map_err(|_| SourceError::MissingSecret(var.clone()))?,
                    ),
                    None => None,
                };
                let credentials = username.clone().map(|user| (user, password));
                Self::WebDav(WebDavSource::new(url, extension, credentials)?)
            }
        })
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Directory(s) => format!("directory {}", s.root().display()),
            Self::Export(s) => format!("export {}", s.path().display()),
            Self::WebDav(s) => format!("webdav {}", s.root()),
        }
    }

    /// Fails only when the source as a whole is unreachable.
    pub async fn list(&self) -> Result<Listing, SourceError> {
        match self {
            Self::Directory(s) => s.list(),
            Self::Export(s) => s.list(),
            Self::WebDav(s) => s.list().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_utf8_is_parse_error() {
        let doc = Document::new("broken.md", vec![b'1', b'.', b' ', 0xff, 0xfe]);
        let err = doc.text().unwrap_err();
        assert_eq!(err.name, "broken.md");
    }

    #[test]
    fn missing_password_variable() {
        let config = SourceConfig::Webdav {
            url: "https://dav.example.net/vault/".into(),
            extension: "md".into(),
            username: Some("me".into()),
            password_env: Some("VAULT_SYNC_TEST_UNSET_PASSWORD".into()),
        };
        assert!(matches!(
            Source::from_config(&config),
            Err(SourceError::MissingSecret(_))
        ));
    }
}
