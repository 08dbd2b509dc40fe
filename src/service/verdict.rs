//! Model text → threat verdict.
//!
//! A plain case-insensitive substring test for "dangerous" would flag answers
//! such as "Not dangerous." as threats. Matching here is deliberately stricter:
//! the word must stand alone and must not be directly preceded by "not".

use serde::Serialize;
use std::sync::OnceLock;

/// Wire body returned by `POST /detect-threat/`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "alert")]
pub enum ThreatVerdict {
    #[serde(rename = "dangerous")]
    Dangerous { description: String },
    #[serde(rename = "not dangerous")]
    NotDangerous,
}

impl ThreatVerdict {
    /// Dangerous when the text says "dangerous" at least once without a
    /// leading "not". "This is not dangerous" is not a threat.
    pub fn from_model_text(text: &str) -> Self {
        static DANGEROUS_RE: OnceLock<regex::Regex> = OnceLock::new();
        let re = DANGEROUS_RE
            .get_or_init(|| regex::Regex::new(r"(?i)\b(not\s+)?dangerous\b").unwrap());
        let flagged = re
            .captures_iter(text)
            .any(|caps| caps.get(1).is_none());
        if flagged {
            ThreatVerdict::Dangerous {
                description: text.trim().to_string(),
            }
        } else {
            ThreatVerdict::NotDangerous
        }
    }

    pub fn is_dangerous(&self) -> bool {
        matches!(self, ThreatVerdict::Dangerous { .. })
    }
}
