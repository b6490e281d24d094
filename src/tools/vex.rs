//! The VEX tools. Each is a thin adapter: arguments in, backend call under the
//! call context, document out as pretty JSON text.

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Value as J};

use crate::core::content::ToolResult;
use crate::core::tool::{CallContext, Tool, ToolError, ToolSpec};
use crate::domain::openvex::{Justification, Status};
use crate::domain::{BackendError, CreateStatementOptions, MergeOptions, VexBackend};

fn status_names() -> Vec<&'static str> {
    Status::ALL.iter().map(|s| s.as_str()).collect()
}

fn justification_names() -> Vec<&'static str> {
    Justification::ALL.iter().map(|j| j.as_str()).collect()
}

fn parse_args<T: DeserializeOwned>(arguments: J) -> Result<T, ToolResult> {
    serde_json::from_value(arguments).map_err(|e| ToolResult::error(format!("invalid arguments: {e}")))
}

/// Domain rejections are tool results; anything else is a fault.
fn settle(outcome: Result<J, BackendError>) -> Result<ToolResult, ToolError> {
    match outcome {
        Ok(doc) => Ok(ToolResult::json(&doc)),
        Err(e) if e.is_domain() => Ok(ToolResult::error(e.to_string())),
        Err(e) => Err(e.into()),
    }
}

pub struct CreateVexStatement {
    backend: Arc<dyn VexBackend>,
}

impl CreateVexStatement {
    pub fn new(backend: Arc<dyn VexBackend>) -> Self {
        Self { backend }
    }
}

impl ToolSpec for CreateVexStatement {
    fn name(&self) -> &str {
        "create_vex_statement"
    }

    fn description(&self) -> &str {
        "Create an OpenVEX document with a single statement about a vulnerability's impact on products"
    }

    fn input_schema(&self) -> J {
        let text = json!({ "type": "string", "minLength": 1 });
        let list = json!({ "type": "array", "items": { "type": "string", "minLength": 1 } });
        json!({
            "type": "object",
            "properties": {
                "vulnerability": { "type": "string", "minLength": 1, "description": "Vulnerability name, e.g. CVE-2024-1234" },
                "products": { "type": "array", "minItems": 1, "items": { "type": "string", "minLength": 1 }, "description": "Product identifiers (purls)" },
                "status": { "type": "string", "enum": status_names() },
                "justification": { "type": "string", "enum": justification_names() },
                "impact_statement": text,
                "action_statement": text,
                "status_notes": text,
                "author": text,
                "author_role": text,
                "document_id": text,
                "subcomponents": list,
                "aliases": list,
            },
            "required": ["vulnerability", "products", "status"],
            "additionalProperties": false
        })
    }
}

#[async_trait]
impl Tool for CreateVexStatement {
    async fn execute(&self, ctx: CallContext, arguments: J) -> Result<ToolResult, ToolError> {
        let opts: CreateStatementOptions = match parse_args(arguments) {
            Ok(o) => o,
            Err(result) => return Ok(result),
        };
        tracing::debug!(vulnerability = %opts.vulnerability, status = %opts.status, backend = self.backend.name(), "create_vex_statement");
        settle(ctx.run(self.backend.create_statement(opts)).await?)
    }
}

pub struct MergeVexDocuments {
    backend: Arc<dyn VexBackend>,
}

impl MergeVexDocuments {
    pub fn new(backend: Arc<dyn VexBackend>) -> Self {
        Self { backend }
    }
}

impl ToolSpec for MergeVexDocuments {
    fn name(&self) -> &str {
        "merge_vex_documents"
    }

    fn description(&self) -> &str {
        "Merge statements from several OpenVEX documents, optionally filtered by product or vulnerability"
    }

    fn input_schema(&self) -> J {
        let text = json!({ "type": "string", "minLength": 1 });
        let list = json!({ "type": "array", "items": { "type": "string", "minLength": 1 } });
        json!({
            "type": "object",
            "properties": {
                "documents": { "type": "array", "minItems": 1, "items": { "type": "object" } },
                "products": list,
                "vulnerabilities": list,
                "author": text,
                "author_role": text,
                "document_id": text,
            },
            "required": ["documents"],
            "additionalProperties": false
        })
    }
}

#[async_trait]
impl Tool for MergeVexDocuments {
    async fn execute(&self, ctx: CallContext, arguments: J) -> Result<ToolResult, ToolError> {
        let opts: MergeOptions = match parse_args(arguments) {
            Ok(o) => o,
            Err(result) => return Ok(result),
        };
        tracing::debug!(documents = opts.documents.len(), backend = self.backend.name(), "merge_vex_documents");
        settle(ctx.run(self.backend.merge_documents(opts)).await?)
    }
}

pub struct ValidateVexDocument {
    backend: Arc<dyn VexBackend>,
}

impl ValidateVexDocument {
    pub fn new(backend: Arc<dyn VexBackend>) -> Self {
        Self { backend }
    }
}

impl ToolSpec for ValidateVexDocument {
    fn name(&self) -> &str {
        "validate_vex_document"
    }

    fn description(&self) -> &str {
        "Check an OpenVEX document against the v0.2.0 rules"
    }

    fn input_schema(&self) -> J {
        json!({
            "type": "object",
            "properties": { "document": { "type": "object" } },
            "required": ["document"]
        })
    }
}

#[async_trait]
impl Tool for ValidateVexDocument {
    async fn execute(&self, ctx: CallContext, arguments: J) -> Result<ToolResult, ToolError> {
        let document = arguments.get("document").cloned().unwrap_or(J::Null);
        match ctx.run(self.backend.validate_document(&document)).await? {
            Ok(()) => {
                let statements = document.get("statements").and_then(J::as_array).map_or(0, Vec::len);
                Ok(ToolResult::text(format!("valid OpenVEX document ({statements} statements)")))
            }
            Err(e) if e.is_domain() => Ok(ToolResult::error(format!("invalid OpenVEX document: {e}"))),
            Err(e) => Err(e.into()),
        }
    }
}
