use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const DEFAULT_BLOCK_START: &str = "###";
pub const DEFAULT_DECORATION: &str = "**";

/// How a heading line is recognised. One convention per extractor.
///
/// Title characters are Unicode word characters (letters including accented
/// ones, combining marks, digits, underscore) plus spaces and tabs; the
/// decorated form also allows `.` so numbered titles like `1.2 Histoire`
/// survive. Any other character ends the title.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HeadingConvention {
    /// `### **Title**`: block-start token, then the title wrapped in a
    /// decoration token.
    Decorated {
        #[serde(default = "default_block_start")]
        block_start: String,
        #[serde(default = "default_decoration")]
        decoration: String,
    },
    /// `3. Title`: integer, period, space.
    Numbered,
}

fn default_block_start() -> String {
    DEFAULT_BLOCK_START.to_string()
}

fn default_decoration() -> String {
    DEFAULT_DECORATION.to_string()
}

impl Default for HeadingConvention {
    fn default() -> Self {
        Self::decorated()
    }
}

impl HeadingConvention {
    pub fn decorated() -> Self {
        Self::Decorated {
            block_start: default_block_start(),
            decoration: default_decoration(),
        }
    }

    pub fn numbered() -> Self {
        Self::Numbered
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Decorated { .. } => "decorated",
            Self::Numbered => "numbered",
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Self::Decorated {
            block_start,
            decoration,
        } = self
        {
            if block_start.trim().is_empty() {
                return Err(ConfigError::Convention("empty block_start".into()));
            }
            if decoration.trim().is_empty() {
                return Err(ConfigError::Convention("empty decoration".into()));
            }
            if decoration.contains('\n') || block_start.contains('\n') {
                return Err(ConfigError::Convention(
                    "heading tokens must fit on one line".into(),
                ));
            }
        }
        Ok(())
    }

    /// Regex matching the heading marker at a line start. The `title` group
    /// holds the raw title; the match end is where the section body begins.
    pub fn pattern(&self) -> String {
        match self {
            Self::Decorated {
                block_start,
                decoration,
            } => format!(
                r"(?m)^{}[ \t]+{}(?P<title>[\w \t.]+){}",
                regex::escape(block_start),
                regex::escape(decoration),
                regex::escape(decoration),
            ),
            Self::Numbered => r"(?m)^(?P<number>\d+)\. (?P<title>[\w \t]+)".to_string(),
        }
    }

    pub fn compile(&self) -> Result<Regex, ConfigError> {
        self.validate()?;
        Regex::new(&self.pattern()).map_err(|e| ConfigError::Convention(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decorated_tokens_are_escaped() {
        let re = HeadingConvention::decorated().compile().unwrap();
        assert!(re.is_match("### **Histoire**"));
        assert!(!re.is_match("### Histoire"));
        assert!(!re.is_match("x ### **Histoire**"));
    }

    #[test]
    fn custom_decoration() {
        let conv = HeadingConvention::Decorated {
            block_start: "##".into(),
            decoration: "__".into(),
        };
        let re = conv.compile().unwrap();
        let caps = re.captures("## __Geographie__").unwrap();
        assert_eq!(caps["title"].trim(), "Geographie");
    }

    #[test]
    fn empty_tokens_rejected() {
        let conv = HeadingConvention::Decorated {
            block_start: " ".into(),
            decoration: "**".into(),
        };
        assert!(matches!(conv.compile(), Err(ConfigError::Convention(_))));
    }

    #[test]
    fn deserializes_from_tagged_json() {
        let conv: HeadingConvention = serde_json::from_str(r#"{"kind":"numbered"}"#).unwrap();
        assert_eq!(conv, HeadingConvention::Numbered);
        assert_eq!(conv.name(), "numbered");
        let conv: HeadingConvention = serde_json::from_str(r#"{"kind":"decorated"}"#).unwrap();
        assert_eq!(conv, HeadingConvention::decorated());
        assert_eq!(conv.name(), "decorated");
    }
}
