//! Transformation request types and the compute-pipeline seam.
//!
//! The actual compute path (content fetch, cleaning, prompt construction, and
//! the external model call) lives outside this crate. The core sees it only
//! as a [`TransformPipeline`] implementation: given a request, produce an
//! artifact, reporting stage progress through the supplied handle. Everything
//! around the pipeline (admission, dedup, locking, caching) is this crate's
//! job; nothing inside it is.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::toneshift::server::job_manager::JobProgress;

/// What the caller wants transformed: a page behind a URL, or raw text
/// supplied inline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "value")]
pub enum SourceInput {
    Url(String),
    Text(String),
}

impl SourceInput {
    pub fn kind(&self) -> &str {
        match self {
            SourceInput::Url(_) => "url",
            SourceInput::Text(_) => "text",
        }
    }

    pub fn value(&self) -> &str {
        match self {
            SourceInput::Url(v) => v,
            SourceInput::Text(v) => v,
        }
    }
}

/// Optional knobs influencing the transformation.
///
/// `params` is a `BTreeMap` so the serialized form is stable regardless of
/// insertion order; the job fingerprint depends on that stability.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformOptions {
    /// Named variant of the persona (e.g. "brief", "extended").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,

    /// Free-form parameters forwarded to the pipeline.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, String>,
}

impl TransformOptions {
    pub fn with_variant(mut self, variant: impl Into<String>) -> Self {
        self.variant = Some(variant.into());
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

/// One transformation request: a source, a persona selector, and options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformRequest {
    pub source: SourceInput,
    pub persona: String,
    #[serde(default)]
    pub options: TransformOptions,
}

impl TransformRequest {
    pub fn new(source: SourceInput, persona: impl Into<String>, options: TransformOptions) -> Self {
        Self {
            source,
            persona: persona.into(),
            options,
        }
    }
}

/// A finished transformation, as stored in the job record and the result
/// cache. Immutable once written: a re-run overwrites wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformArtifact {
    /// Persona the text was styled as.
    pub persona: String,

    /// The styled output text.
    pub styled_text: String,

    /// Title extracted from the source, when one exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Label of the model that produced the text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Word count of the styled output.
    pub word_count: usize,

    /// When the artifact was produced.
    pub generated_at: DateTime<Utc>,
}

impl TransformArtifact {
    pub fn new(persona: impl Into<String>, styled_text: impl Into<String>) -> Self {
        let styled_text = styled_text.into();
        let word_count = styled_text.split_whitespace().count();
        Self {
            persona: persona.into(),
            styled_text,
            title: None,
            model: None,
            word_count,
            generated_at: Utc::now(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

/// Failure of the compute pipeline, scoped to the stage that raised it.
///
/// The job manager normalizes these to a string on the job record; the
/// variants exist so pipeline implementations report precisely and logs stay
/// actionable.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("failed to fetch '{url}': {reason}")]
    Fetch { url: String, reason: String },

    #[error("content cleaning failed: {reason}")]
    Clean { reason: String },

    #[error("model call failed for persona '{persona}': {reason}")]
    ModelCall { persona: String, reason: String },

    #[error("failed to persist result: {reason}")]
    Persist { reason: String },
}

/// The opaque compute path the core wraps.
///
/// Implementations run only while the caller holds the job lock. `progress`
/// is bound to the job being computed; report coarse `(stage, percent)`
/// updates through it so pollers watching the job record see movement.
/// Updates are best-effort; a down store drops them silently.
#[async_trait]
pub trait TransformPipeline: Send + Sync {
    async fn run(
        &self,
        request: &TransformRequest,
        progress: &JobProgress,
    ) -> Result<TransformArtifact, PipelineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_input_kind_and_value() {
        let url = SourceInput::Url("https://example.com".to_string());
        assert_eq!(url.kind(), "url");
        assert_eq!(url.value(), "https://example.com");

        let text = SourceInput::Text("raw body".to_string());
        assert_eq!(text.kind(), "text");
        assert_eq!(text.value(), "raw body");
    }

    #[test]
    fn test_options_serialization_is_stable() {
        let a = TransformOptions::default()
            .with_param("tone", "dry")
            .with_param("length", "short");
        let b = TransformOptions::default()
            .with_param("length", "short")
            .with_param("tone", "dry");
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[test]
    fn test_artifact_counts_words() {
        let artifact = TransformArtifact::new("pirate", "arr matey avast");
        assert_eq!(artifact.word_count, 3);
        assert_eq!(artifact.persona, "pirate");
    }

    #[test]
    fn test_artifact_round_trips_through_json() {
        let artifact = TransformArtifact::new("noir", "the night was wet")
            .with_title("Rain")
            .with_model("gpt-4o-mini");
        let json = serde_json::to_string(&artifact).unwrap();
        let back: TransformArtifact = serde_json::from_str(&json).unwrap();
        assert_eq!(back, artifact);
    }

    #[test]
    fn test_pipeline_error_messages() {
        let err = PipelineError::Fetch {
            url: "https://example.com".to_string(),
            reason: "timeout".to_string(),
        };
        assert!(err.to_string().contains("https://example.com"));
        assert!(err.to_string().contains("timeout"));
    }
}
