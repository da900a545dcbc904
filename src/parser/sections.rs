use regex::Regex;
use serde::Serialize;

use super::convention::HeadingConvention;
use crate::error::ConfigError;

/// One heading-delimited section of a note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SectionRecord {
    pub section_title: String,
    pub content: String,
    pub source_name: String,
}

impl SectionRecord {
    pub fn new(
        section_title: impl Into<String>,
        content: impl Into<String>,
        source_name: impl Into<String>,
    ) -> Self {
        Self {
            section_title: section_title.into(),
            content: content.into(),
            source_name: source_name.into(),
        }
    }
}

/// Byte offsets of one heading inside the scanned text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct HeadingSpan {
    /// Start of the heading line.
    pub line_start: usize,
    /// First byte after the heading marker; the body starts here.
    pub body_start: usize,
    /// Start of the next heading line, or end of text.
    pub body_end: usize,
    pub title_start: usize,
    pub title_end: usize,
}

/// Splits note text into sections with a fixed [`HeadingConvention`].
#[derive(Debug, Clone)]
pub struct Extractor {
    convention: HeadingConvention,
    heading_re: Regex,
}

impl Extractor {
    pub fn new(convention: HeadingConvention) -> Result<Self, ConfigError> {
        let heading_re = convention.compile()?;
        Ok(Self {
            convention,
            heading_re,
        })
    }

    pub fn convention(&self) -> &HeadingConvention {
        &self.convention
    }

    /// Split `text` into sections in document order.
    ///
    /// Text before the first heading is dropped. Duplicate titles are all
    /// returned; the synchronizer keeps the last one.
    pub fn extract(&self, text: &str, source_name: &str) -> Vec<SectionRecord> {
        self.locate(text)
            .into_iter()
            .map(|span| SectionRecord {
                section_title: text[span.title_start..span.title_end].trim().to_string(),
                content: text[span.body_start..span.body_end].trim().to_string(),
                source_name: source_name.to_string(),
            })
            .collect()
    }

    pub(crate) fn locate(&self, text: &str) -> Vec<HeadingSpan> {
        let mut spans: Vec<HeadingSpan> = self
            .heading_re
            .captures_iter(text)
            .filter_map(|caps| {
                let whole = caps.get(0)?;
                let title = caps.name("title")?;
                if title.as_str().trim().is_empty() {
                    return None;
                }
                Some(HeadingSpan {
                    line_start: whole.start(),
                    body_start: whole.end(),
                    body_end: text.len(),
                    title_start: title.start(),
                    title_end: title.end(),
                })
            })
            .collect();

        for i in 1..spans.len() {
            spans[i - 1].body_end = spans[i].line_start;
        }
        spans
    }
}

// ── Tests ──
