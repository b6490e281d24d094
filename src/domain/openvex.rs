//! OpenVEX v0.2.0 document model and the in-process backend.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as J;

use super::{BackendError, CreateStatementOptions, MergeOptions, VexBackend};
use crate::core::mcp::SERVER_NAME;

pub const CONTEXT: &str = "https://openvex.dev/ns/v0.2.0";
const CONTEXT_PREFIX: &str = "https://openvex.dev/ns";
const ID_PREFIX: &str = "https://openvex.dev/docs/public/vex-";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct VexDocument {
    #[serde(rename = "@context", default)]
    pub context: String,
    #[serde(rename = "@id", default)]
    pub id: String,
    #[serde(default)]
    pub author: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default = "first_version")]
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tooling: Option<String>,
    #[serde(default)]
    pub statements: Vec<Statement>,
}

fn first_version() -> u32 {
    1
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Statement {
    #[serde(rename = "@id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub vulnerability: Vulnerability,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub products: Vec<Product>,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub justification: Option<Justification>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub impact_statement: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_statement: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_notes: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Vulnerability {
    #[serde(rename = "@id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Product {
    #[serde(rename = "@id", default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subcomponents: Vec<Subcomponent>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Subcomponent {
    #[serde(rename = "@id")]
    pub id: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    NotAffected,
    Affected,
    Fixed,
    UnderInvestigation,
}

impl Status {
    pub const ALL: [Status; 4] = [Self::NotAffected, Self::Affected, Self::Fixed, Self::UnderInvestigation];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotAffected => "not_affected",
            Self::Affected => "affected",
            Self::Fixed => "fixed",
            Self::UnderInvestigation => "under_investigation",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Justification {
    ComponentNotPresent,
    VulnerableCodeNotPresent,
    VulnerableCodeNotInExecutePath,
    VulnerableCodeCannotBeControlledByAdversary,
    InlineMitigationsAlreadyExist,
}

impl Justification {
    pub const ALL: [Justification; 5] = [
        Self::ComponentNotPresent,
        Self::VulnerableCodeNotPresent,
        Self::VulnerableCodeNotInExecutePath,
        Self::VulnerableCodeCannotBeControlledByAdversary,
        Self::InlineMitigationsAlreadyExist,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ComponentNotPresent => "component_not_present",
            Self::VulnerableCodeNotPresent => "vulnerable_code_not_present",
            Self::VulnerableCodeNotInExecutePath => "vulnerable_code_not_in_execute_path",
            Self::VulnerableCodeCannotBeControlledByAdversary => {
                "vulnerable_code_cannot_be_controlled_by_adversary"
            }
            Self::InlineMitigationsAlreadyExist => "inline_mitigations_already_exist",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Justification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = BackendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|v| v.as_str() == s)
            .ok_or_else(|| BackendError::Rejected(format!("unknown status '{s}'")))
    }
}

impl FromStr for Justification {
    type Err = BackendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|v| v.as_str() == s)
            .ok_or_else(|| BackendError::Rejected(format!("unknown justification '{s}'")))
    }
}

pub fn new_document_id() -> String {
    format!("{ID_PREFIX}{}", uuid::Uuid::new_v4())
}

fn tooling() -> String {
    format!("{SERVER_NAME}/{}", env!("CARGO_PKG_VERSION"))
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

impl VexDocument {
    fn new(author: String, role: Option<String>, id: Option<String>, now: DateTime<Utc>) -> Self {
        Self {
            context: CONTEXT.to_string(),
            id: non_empty(id).unwrap_or_else(new_document_id),
            author,
            role: non_empty(role),
            timestamp: Some(now),
            last_updated: None,
            version: 1,
            tooling: Some(tooling()),
            statements: Vec::new(),
        }
    }

    pub fn from_json(value: &J) -> Result<Self, BackendError> {
        if !value.is_object() {
            return Err(BackendError::Rejected("document must be a JSON object".into()));
        }
        serde_json::from_value(value.clone())
            .map_err(|e| BackendError::Rejected(format!("not an OpenVEX document: {e}")))
    }

    pub fn to_json(&self) -> Result<J, BackendError> {
        serde_json::to_value(self).map_err(|e| BackendError::Output(e.to_string()))
    }

    /// First rule the document breaks, as a `Rejected` error.
    pub fn validate(&self) -> Result<(), BackendError> {
        let reject = |msg: String| -> Result<(), BackendError> { Err(BackendError::Rejected(msg)) };
        if !self.context.starts_with(CONTEXT_PREFIX) {
            return reject(format!("@context must start with {CONTEXT_PREFIX}"));
        }
        if self.id.trim().is_empty() {
            return reject("@id must not be empty".into());
        }
        if self.author.trim().is_empty() {
            return reject("author must not be empty".into());
        }
        if self.statements.is_empty() {
            return reject("document has no statements".into());
        }
        for (i, s) in self.statements.iter().enumerate() {
            s.validate().map_err(|e| BackendError::Rejected(format!("statement {}: {e}", i + 1)))?;
        }
        Ok(())
    }
}

impl Statement {
    fn validate(&self) -> Result<(), String> {
        if self.vulnerability.name.trim().is_empty() {
            return Err("vulnerability name is required".into());
        }
        if self.products.is_empty() {
            return Err("at least one product is required".into());
        }
        if self.products.iter().any(|p| p.id.trim().is_empty()) {
            return Err("product @id must not be empty".into());
        }
        let has = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
        match self.status {
            Status::NotAffected if self.justification.is_none() && !has(&self.impact_statement) => {
                Err("not_affected requires a justification or an impact_statement".into())
            }
            Status::Affected if !has(&self.action_statement) => {
                Err("affected requires an action_statement".into())
            }
            s if s != Status::NotAffected && self.justification.is_some() => {
                Err(format!("justification is only allowed with not_affected, status is {s}"))
            }
            _ => Ok(()),
        }
    }

    fn matches_vulnerability(&self, wanted: &[String]) -> bool {
        let v = &self.vulnerability;
        wanted.is_empty()
            || wanted.iter().any(|w| {
                v.name == *w || v.id.as_deref() == Some(w.as_str()) || v.aliases.iter().any(|a| a == w)
            })
    }

    fn matches_product(&self, wanted: &[String]) -> bool {
        wanted.is_empty()
            || self.products.iter().any(|p| {
                wanted.iter().any(|w| p.id == *w || p.subcomponents.iter().any(|s| s.id == *w))
            })
    }
}

/// Build a single-statement document.
pub fn create_document(
    opts: CreateStatementOptions,
    default_author: &str,
    now: DateTime<Utc>,
) -> Result<VexDocument, BackendError> {
    let status: Status = opts.status.trim().parse()?;
    let justification = non_empty(opts.justification).map(|j| j.parse::<Justification>()).transpose()?;
    let subcomponents: Vec<Subcomponent> = opts
        .subcomponents
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .map(|id| Subcomponent { id })
        .collect();
    let products = opts
        .products
        .into_iter()
        .map(|id| Product { id: id.trim().to_string(), subcomponents: subcomponents.clone() })
        .collect();

    let author = non_empty(opts.author).unwrap_or_else(|| default_author.to_string());
    let mut doc = VexDocument::new(author, opts.author_role, opts.document_id, now);
    doc.statements.push(Statement {
        id: None,
        vulnerability: Vulnerability {
            id: None,
            name: opts.vulnerability.trim().to_string(),
            description: None,
            aliases: opts.aliases,
        },
        timestamp: Some(now),
        products,
        status,
        justification,
        impact_statement: non_empty(opts.impact_statement),
        action_statement: non_empty(opts.action_statement),
        status_notes: non_empty(opts.status_notes),
    });
    doc.validate()?;
    Ok(doc)
}

/// Merge statements of several documents into a new one, oldest first.
pub fn merge_documents(
    opts: MergeOptions,
    default_author: &str,
    now: DateTime<Utc>,
) -> Result<VexDocument, BackendError> {
    if opts.documents.is_empty() {
        return Err(BackendError::Rejected("at least one document is required".into()));
    }
    let mut statements = Vec::new();
    for (i, raw) in opts.documents.iter().enumerate() {
        let doc = VexDocument::from_json(raw)
            .and_then(|d| d.validate().map(|_| d))
            .map_err(|e| match e {
                BackendError::Rejected(m) => BackendError::Rejected(format!("document {}: {m}", i + 1)),
                other => other,
            })?;
        let inherited = doc.timestamp;
        for mut s in doc.statements {
            if s.timestamp.is_none() {
                s.timestamp = inherited;
            }
            if s.matches_product(&opts.products) && s.matches_vulnerability(&opts.vulnerabilities) {
                statements.push(s);
            }
        }
    }
    if statements.is_empty() {
        return Err(BackendError::Rejected("no statements matched the merge filters".into()));
    }
    statements.sort_by_key(|s| s.timestamp);

    let author = non_empty(opts.author).unwrap_or_else(|| default_author.to_string());
    let mut merged = VexDocument::new(author, opts.author_role, opts.document_id, now);
    merged.statements = statements;
    Ok(merged)
}

/// Builds documents in-process.
#[derive(Debug, Clone)]
pub struct NativeBackend {
    default_author: String,
}

impl NativeBackend {
    pub fn new(default_author: impl Into<String>) -> Self {
        Self { default_author: default_author.into() }
    }
}

fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(0)
}

#[async_trait::async_trait]
impl VexBackend for NativeBackend {
    fn name(&self) -> &'static str {
        "native"
    }

    async fn create_statement(&self, opts: CreateStatementOptions) -> Result<J, BackendError> {
        create_document(opts, &self.default_author, now())?.to_json()
    }

    async fn merge_documents(&self, opts: MergeOptions) -> Result<J, BackendError> {
        merge_documents(opts, &self.default_author, now())?.to_json()
    }

    async fn validate_document(&self, document: &J) -> Result<(), BackendError> {
        VexDocument::from_json(document)?.validate()
    }
}
