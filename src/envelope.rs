use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ServiceError;

/// Where a job's artifact ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output {
    Url(String),
    /// Base64-encoded payload, used when no object store accepted the bytes.
    Inline(String),
}

/// What a handler hands back on its success path.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessingResult {
    pub output: Output,
    pub metadata: Map<String, Value>,
}

impl ProcessingResult {
    pub fn new(output: Output) -> Self {
        Self {
            output,
            metadata: Map::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Uniform response for every job, successful or not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_inline: Option<String>,
    pub processing_time_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Envelope {
    pub fn success(result: ProcessingResult, processing_time_ms: u64) -> Self {
        let (output_url, output_inline) = match result.output {
            Output::Url(url) => (Some(url), None),
            Output::Inline(payload) => (None, Some(payload)),
        };
        Self {
            success: true,
            output_url,
            output_inline,
            processing_time_ms,
            metadata: Some(result.metadata),
            error: None,
        }
    }

    /// Status-style success for operations that produce no artifact.
    pub fn report(metadata: Map<String, Value>, processing_time_ms: u64) -> Self {
        Self {
            success: true,
            output_url: None,
            output_inline: None,
            processing_time_ms,
            metadata: Some(metadata),
            error: None,
        }
    }

    pub fn failure(err: &ServiceError, processing_time_ms: u64) -> Self {
        Self {
            success: false,
            output_url: None,
            output_inline: None,
            processing_time_ms,
            metadata: Some(err.diagnostics()),
            error: Some(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidationError;

    #[test]
    fn success_envelope_survives_json() {
        let result = ProcessingResult::new(Output::Url("https://cdn.test/a.png".into()))
            .with_metadata("model", "genfocus")
            .with_metadata("strength", 0.35);
        let envelope = Envelope::success(result, 42);

        let text = serde_json::to_string(&envelope).unwrap();
        let parsed: Envelope = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, envelope);
        assert!(!text.contains("\"error\""));
    }

    #[test]
    fn failure_envelope_survives_json() {
        let err = ServiceError::from(ValidationError::new("fps", "must be at least 1"));
        let envelope = Envelope::failure(&err, 3);

        let parsed: Envelope =
            serde_json::from_value(serde_json::to_value(&envelope).unwrap()).unwrap();
        assert_eq!(parsed, envelope);
        assert!(!parsed.success);
        assert_eq!(parsed.processing_time_ms, 3);
    }

    #[test]
    fn inline_output_uses_inline_field() {
        let envelope = Envelope::success(ProcessingResult::new(Output::Inline("aGk=".into())), 0);
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["outputInline"], "aGk=");
        assert!(json.get("outputUrl").is_none());
        assert_eq!(json["processingTimeMs"], 0);
    }
}
