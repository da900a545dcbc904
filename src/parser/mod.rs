pub mod convention;
pub mod sections;

pub use convention::HeadingConvention;
pub use sections::{Extractor, SectionRecord};
