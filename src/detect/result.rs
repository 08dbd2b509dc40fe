use serde::Deserialize;

use crate::error::PipelineError;

/// Label text the detection service uses for a threat.
pub const DANGEROUS_LABEL: &str = "dangerous";

/// Classification label. Anything that is not `dangerous` is kept verbatim.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ThreatLabel {
    Dangerous,
    Other(String),
}

impl ThreatLabel {
    pub fn from_wire(value: &str) -> Self {
        if value == DANGEROUS_LABEL {
            ThreatLabel::Dangerous
        } else {
            ThreatLabel::Other(value.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ThreatLabel::Dangerous => DANGEROUS_LABEL,
            ThreatLabel::Other(label) => label,
        }
    }

    pub fn is_dangerous(&self) -> bool {
        matches!(self, ThreatLabel::Dangerous)
    }
}

/// One result from the detection service.
#[derive(Clone, Debug, PartialEq)]
pub struct Classification {
    pub label: ThreatLabel,
    pub description: Option<String>,
    pub confidence: Option<f32>,
}

impl Classification {
    pub fn dangerous(description: impl Into<String>) -> Self {
        Self {
            label: ThreatLabel::Dangerous,
            description: Some(description.into()),
            confidence: None,
        }
    }

    pub fn other(label: impl Into<String>) -> Self {
        Self {
            label: ThreatLabel::from_wire(&label.into()),
            description: None,
            confidence: None,
        }
    }

    /// Parse a service response body: `{ "alert": "...", "description"?: "..." }`.
    ///
    /// A body without a string `alert` (including the service's own
    /// `{ "error": ... }` replies) is a failed detection.
    pub fn from_json(body: &[u8]) -> Result<Self, PipelineError> {
        let wire: WireResponse = serde_json::from_slice(body)
            .map_err(|err| PipelineError::DetectionFailed(format!("malformed response: {}", err)))?;
        let Some(alert) = wire.alert else {
            let reason = wire
                .error
                .unwrap_or_else(|| "response has no alert field".to_string());
            return Err(PipelineError::DetectionFailed(reason));
        };
        Ok(Self {
            label: ThreatLabel::from_wire(&alert),
            description: wire.description,
            confidence: wire.confidence,
        })
    }
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    alert: Option<String>,
    description: Option<String>,
    confidence: Option<f32>,
    error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_dangerous_with_description() {
        let c = Classification::from_json(br#"{"alert":"dangerous","description":"fire"}"#).unwrap();
        assert!(c.label.is_dangerous());
        assert_eq!(c.description.as_deref(), Some("fire"));
        assert_eq!(c.confidence, None);
    }

    #[test]
    fn other_labels_are_kept_verbatim() {
        let c = Classification::from_json(br#"{"alert":"not dangerous"}"#).unwrap();
        assert_eq!(c.label, ThreatLabel::Other("not dangerous".to_string()));
        assert_eq!(c.label.as_str(), "not dangerous");
    }

    #[test]
    fn error_body_is_detection_failure() {
        let err = Classification::from_json(br#"{"error":"No valid response from model."}"#)
            .unwrap_err();
        assert_eq!(
            err,
            PipelineError::DetectionFailed("No valid response from model.".to_string())
        );
    }

    #[test]
    fn non_json_is_detection_failure() {
        assert!(matches!(
            Classification::from_json(b"<html>502</html>"),
            Err(PipelineError::DetectionFailed(_))
        ));
    }
}
