//! VEX domain: what the tools ask a backend to do, independent of how it is done.

pub mod openvex;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    /// The request or an input document is not acceptable VEX. Reported to
    /// the caller as a tool-level failure.
    #[error("{0}")]
    Rejected(String),
    #[error("backend I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The backend ran but produced something unusable.
    #[error("unexpected backend output: {0}")]
    Output(String),
}

impl BackendError {
    pub fn is_domain(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateStatementOptions {
    pub vulnerability: String,
    pub products: Vec<String>,
    pub status: String,
    #[serde(default)]
    pub justification: Option<String>,
    #[serde(default)]
    pub impact_statement: Option<String>,
    #[serde(default)]
    pub action_statement: Option<String>,
    #[serde(default)]
    pub status_notes: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub author_role: Option<String>,
    #[serde(default)]
    pub subcomponents: Vec<String>,
    #[serde(default)]
    pub document_id: Option<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergeOptions {
    pub documents: Vec<serde_json::Value>,
    #[serde(default)]
    pub products: Vec<String>,
    #[serde(default)]
    pub vulnerabilities: Vec<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub author_role: Option<String>,
    #[serde(default)]
    pub document_id: Option<String>,
}

/// Produces and checks OpenVEX documents. Documents cross this seam as JSON
/// so backends that shell out never need our typed model.
#[async_trait::async_trait]
pub trait VexBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn create_statement(&self, opts: CreateStatementOptions) -> Result<serde_json::Value, BackendError>;

    async fn merge_documents(&self, opts: MergeOptions) -> Result<serde_json::Value, BackendError>;

    async fn validate_document(&self, document: &serde_json::Value) -> Result<(), BackendError>;
}
