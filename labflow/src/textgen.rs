//! Generative-text service seam.
//!
//! Prompt and response CONTENT is out of scope; this module pins down the
//! typed boundary. A request names the shape it expects back, drawn from a
//! small closed set — shapes are produced by factories keyed on their
//! parameters, never synthesized at runtime. `None` from the service is a
//! valid "no usable answer"; callers decide whether that is fatal
//! ([`crate::errors::NoResponseError`]) or degrades the stage.

use crate::errors::LabflowError;
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The closed set of result shapes the service can be asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ResponseShape {
    /// An experiment design.
    Design,
    /// A code patch.
    CodePatch,
    /// An analysis over a known number of runs.
    Analysis {
        /// How many run outcomes the analysis covers.
        run_count: usize,
    },
    /// A manuscript draft.
    Manuscript,
}

impl ResponseShape {
    /// Factory for the analysis shape, keyed on the run count.
    #[must_use]
    pub fn analysis_for_runs(run_count: usize) -> Self {
        Self::Analysis { run_count }
    }
}

/// One request to the text service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextRequest {
    /// The prompt text.
    pub prompt: String,
    /// The expected result shape.
    pub shape: ResponseShape,
}

impl TextRequest {
    /// Creates a new request.
    #[must_use]
    pub fn new(prompt: impl Into<String>, shape: ResponseShape) -> Self {
        Self {
            prompt: prompt.into(),
            shape,
        }
    }
}

/// A raw typed response from the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextResponse {
    /// The response payload; its layout follows the requested shape.
    pub content: serde_json::Value,
}

impl TextResponse {
    /// Wraps a payload.
    #[must_use]
    pub fn new(content: serde_json::Value) -> Self {
        Self { content }
    }

    /// Decodes the payload into a typed value.
    #[must_use]
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Option<T> {
        serde_json::from_value(self.content.clone()).ok()
    }

    /// Decodes a design document.
    #[must_use]
    pub fn as_design(&self) -> Option<DesignDoc> {
        self.decode()
    }

    /// Decodes a code patch. Accepts either the structured layout or a
    /// plain string carrying a fenced code block.
    #[must_use]
    pub fn as_code_patch(&self) -> Option<CodePatch> {
        if let Some(patch) = self.decode::<CodePatch>() {
            return Some(patch);
        }
        let text = self.content.as_str()?;
        let source = extract_code_fence(text)?;
        Some(CodePatch {
            source,
            language: None,
        })
    }

    /// Decodes an analysis report.
    #[must_use]
    pub fn as_analysis(&self) -> Option<AnalysisReport> {
        self.decode()
    }

    /// Decodes a manuscript.
    #[must_use]
    pub fn as_manuscript(&self) -> Option<Manuscript> {
        self.decode()
    }
}

/// An experiment design.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesignDoc {
    /// Short design title.
    pub title: String,
    /// The experiment plan.
    pub plan: String,
}

/// A generated code patch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodePatch {
    /// The code itself.
    pub source: String,
    /// The language tag, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

/// An analysis over the runs of one iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    /// Prose summary.
    pub summary: String,
    /// Named numeric metrics extracted from the runs.
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
    /// Whether the analysis asks for another code revision.
    #[serde(default)]
    pub needs_revision: bool,
}

/// A manuscript draft.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manuscript {
    /// Manuscript title.
    pub title: String,
    /// Manuscript body.
    pub body: String,
}

/// Client interface to the generative-text service.
#[async_trait]
pub trait TextService: Send + Sync {
    /// Invokes the service. `Ok(None)` means the service produced no
    /// usable answer for the requested shape.
    async fn invoke(&self, request: &TextRequest) -> Result<Option<TextResponse>, LabflowError>;
}

/// Extracts the first fenced code block from a text.
#[must_use]
pub fn extract_code_fence(text: &str) -> Option<String> {
    let pattern = Regex::new(r"(?s)```[a-zA-Z0-9_+-]*\n(.*?)```").ok()?;
    pattern
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim_end().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_factory_is_keyed_on_run_count() {
        assert_eq!(
            ResponseShape::analysis_for_runs(3),
            ResponseShape::Analysis { run_count: 3 }
        );
        assert_ne!(
            ResponseShape::analysis_for_runs(3),
            ResponseShape::analysis_for_runs(4)
        );
    }

    #[test]
    fn test_decode_design() {
        let response = TextResponse::new(serde_json::json!({
            "title": "cache ablation",
            "plan": "disable the cache and rerun the benchmark",
        }));
        let design = response.as_design().expect("design");
        assert_eq!(design.title, "cache ablation");
    }

    #[test]
    fn test_decode_structured_code_patch() {
        let response = TextResponse::new(serde_json::json!({
            "source": "fn main() {}",
            "language": "rust",
        }));
        let patch = response.as_code_patch().expect("patch");
        assert_eq!(patch.source, "fn main() {}");
        assert_eq!(patch.language.as_deref(), Some("rust"));
    }

    #[test]
    fn test_decode_fenced_code_patch() {
        let response = TextResponse::new(serde_json::json!(
            "Here you go:\n```python\nprint('hi')\n```\nDone."
        ));
        let patch = response.as_code_patch().expect("patch");
        assert_eq!(patch.source, "print('hi')");
    }

    #[test]
    fn test_code_patch_requires_a_fence_in_plain_text() {
        let response = TextResponse::new(serde_json::json!("no code here"));
        assert!(response.as_code_patch().is_none());
    }

    #[test]
    fn test_decode_analysis_defaults() {
        let response = TextResponse::new(serde_json::json!({
            "summary": "runs look stable",
        }));
        let analysis = response.as_analysis().expect("analysis");
        assert!(analysis.metrics.is_empty());
        assert!(!analysis.needs_revision);
    }

    #[test]
    fn test_extract_code_fence_picks_first_block() {
        let text = "```rust\nlet a = 1;\n```\n```rust\nlet b = 2;\n```";
        assert_eq!(extract_code_fence(text).as_deref(), Some("let a = 1;"));
    }

    #[test]
    fn test_shape_wire_format() {
        let text = serde_json::to_string(&ResponseShape::analysis_for_runs(2)).expect("serialize");
        assert_eq!(text, r#"{"kind":"analysis","run_count":2}"#);
    }
}
