//! Markdown vault to SQLite section sync.
//!
//! Notes are split into heading-delimited sections by [`parser::Extractor`] and
//! upserted into per-flow tables by [`sync::Synchronizer`], keyed on
//! `(section_title, source_name)`.

pub mod config;
pub mod db;
pub mod error;
pub mod observer;
pub mod parser;
pub mod pipeline;
pub mod source;
pub mod sync;

pub use parser::{Extractor, HeadingConvention, SectionRecord};
pub use sync::{SyncReport, Synchronizer};
