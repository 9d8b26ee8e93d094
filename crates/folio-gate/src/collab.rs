//! External collaborators: reference text, content generation, visual
//! judgment and unit assembly.
//!
//! The orchestrator holds each as `Arc<dyn …>` and wraps generation and
//! judgment calls in a timeout; implementations need not enforce their own.

use async_trait::async_trait;
use folio_kernel::feedback::Feedback;
use folio_kernel::markup::inner_of_class;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollaboratorError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("collaborator failed: {0}")]
    Failed(String),

    #[error("invalid collaborator output: {0}")]
    InvalidOutput(String),
}

/// Score in `[0, 100]` with the judge's explanation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Judgment {
    pub score: f64,
    #[serde(default)]
    pub rationale: String,
}

#[async_trait]
pub trait ReferenceProvider: Send + Sync {
    /// Reference text for one page. `NotFound` when the page has none.
    async fn page_text(&self, unit_id: &str, page: u32) -> Result<String, CollaboratorError>;
}

#[async_trait]
pub trait GenerationService: Send + Sync {
    /// Produce page content. `feedback` is `None` for the initial content
    /// and describes the previous failure on every regeneration.
    async fn generate(
        &self,
        unit_id: &str,
        page: u32,
        feedback: Option<&Feedback>,
    ) -> Result<String, CollaboratorError>;
}

#[async_trait]
pub trait VisualJudgmentService: Send + Sync {
    async fn score(&self, unit_id: &str, artifact: &str) -> Result<Judgment, CollaboratorError>;
}

#[async_trait]
pub trait Assembler: Send + Sync {
    /// Merge finalized pages, given in page order, into one artifact.
    async fn consolidate(
        &self,
        unit_id: &str,
        pages: &[(u32, String)],
    ) -> Result<String, CollaboratorError>;
}

/// Concatenates each page's content element inside one root container.
#[derive(Debug, Clone)]
pub struct WrapAssembler {
    container_class: String,
    content_class: String,
}

impl WrapAssembler {
    pub fn new(container_class: impl Into<String>, content_class: impl Into<String>) -> Self {
        Self {
            container_class: container_class.into(),
            content_class: content_class.into(),
        }
    }

    pub fn assemble(&self, unit_id: &str, pages: &[(u32, String)]) -> String {
        let mut out = String::new();
        out.push_str("<!DOCTYPE html>\n<html>\n<body>\n");
        out.push_str(&format!(
            "<div class=\"{}\" data-unit=\"{}\">\n<main class=\"{}\">\n",
            self.container_class, unit_id, self.content_class
        ));
        for (page, artifact) in pages {
            let body = inner_of_class(artifact, &self.content_class).unwrap_or(artifact);
            out.push_str(&format!("<!-- page {page} -->\n"));
            out.push_str(body.trim());
            out.push('\n');
        }
        out.push_str("</main>\n</div>\n</body>\n</html>\n");
        out
    }
}

impl Default for WrapAssembler {
    fn default() -> Self {
        Self::new("page-container", "page-content")
    }
}

#[async_trait]
impl Assembler for WrapAssembler {
    async fn consolidate(
        &self,
        unit_id: &str,
        pages: &[(u32, String)],
    ) -> Result<String, CollaboratorError> {
        if pages.is_empty() {
            return Err(CollaboratorError::InvalidOutput(format!(
                "unit {unit_id} has no pages to consolidate"
            )));
        }
        Ok(self.assemble(unit_id, pages))
    }
}
