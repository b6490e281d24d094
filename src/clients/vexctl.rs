//! `vexctl` command-line backend.

use std::ffi::OsString;
use std::io::Write;
use std::process::Stdio;

use serde_json::Value as J;
use tokio::process::Command;

use crate::domain::openvex::VexDocument;
use crate::domain::{BackendError, CreateStatementOptions, MergeOptions, VexBackend};

#[derive(Debug, Clone)]
pub struct VexctlBackend {
    path: String,
    default_author: String,
}

impl VexctlBackend {
    pub fn new(path: impl Into<String>, default_author: impl Into<String>) -> Self {
        Self { path: path.into(), default_author: default_author.into() }
    }

    async fn run(&self, args: Vec<OsString>) -> Result<J, BackendError> {
        tracing::debug!(bin = %self.path, ?args, "vexctl");
        // Dropping the future (cancelled or timed-out call) kills the child.
        let output = Command::new(&self.path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            tracing::debug!(status = %output.status, %stderr, "vexctl rejected request");
            return Err(BackendError::Rejected(if stderr.is_empty() {
                format!("vexctl exited with {}", output.status)
            } else {
                stderr
            }));
        }
        serde_json::from_slice(&output.stdout)
            .map_err(|e| BackendError::Output(format!("vexctl printed invalid JSON: {e}")))
    }
}

fn flag(args: &mut Vec<OsString>, name: &str, value: &str) {
    args.push(format!("--{name}={value}").into());
}

fn flag_opt(args: &mut Vec<OsString>, name: &str, value: Option<&str>) {
    if let Some(v) = value.map(str::trim).filter(|v| !v.is_empty()) {
        flag(args, name, v);
    }
}

pub fn create_args(opts: &CreateStatementOptions, default_author: &str) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["create".into()];
    for p in &opts.products {
        flag(&mut args, "product", p);
    }
    flag(&mut args, "vuln", &opts.vulnerability);
    flag(&mut args, "status", &opts.status);
    flag_opt(&mut args, "justification", opts.justification.as_deref());
    flag_opt(&mut args, "impact-statement", opts.impact_statement.as_deref());
    flag_opt(&mut args, "action-statement", opts.action_statement.as_deref());
    flag_opt(&mut args, "status-note", opts.status_notes.as_deref());
    flag(&mut args, "author", opts.author.as_deref().unwrap_or(default_author));
    flag_opt(&mut args, "author-role", opts.author_role.as_deref());
    flag_opt(&mut args, "id", opts.document_id.as_deref());
    for s in &opts.subcomponents {
        flag(&mut args, "subcomponents", s);
    }
    for a in &opts.aliases {
        flag(&mut args, "aliases", a);
    }
    args
}

pub fn merge_args(opts: &MergeOptions, default_author: &str) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["merge".into()];
    for p in &opts.products {
        flag(&mut args, "product", p);
    }
    for v in &opts.vulnerabilities {
        flag(&mut args, "vuln", v);
    }
    flag(&mut args, "author", opts.author.as_deref().unwrap_or(default_author));
    flag_opt(&mut args, "author-role", opts.author_role.as_deref());
    flag_opt(&mut args, "id", opts.document_id.as_deref());
    args
}

#[async_trait::async_trait]
impl VexBackend for VexctlBackend {
    fn name(&self) -> &'static str {
        "vexctl"
    }

    async fn create_statement(&self, opts: CreateStatementOptions) -> Result<J, BackendError> {
        self.run(create_args(&opts, &self.default_author)).await
    }

    async fn merge_documents(&self, opts: MergeOptions) -> Result<J, BackendError> {
        if opts.documents.is_empty() {
            return Err(BackendError::Rejected("at least one document is required".into()));
        }
        let mut args = merge_args(&opts, &self.default_author);
        // Files live until this call returns; vexctl reads them by path.
        let mut inputs = Vec::with_capacity(opts.documents.len());
        for doc in &opts.documents {
            let mut file = tempfile::Builder::new().prefix("vex-").suffix(".json").tempfile()?;
            serde_json::to_writer(&mut file, doc).map_err(|e| BackendError::Output(e.to_string()))?;
            file.flush()?;
            args.push(file.path().as_os_str().to_owned());
            inputs.push(file);
        }
        let merged = self.run(args).await;
        drop(inputs);
        merged
    }

    /// `vexctl` has no validation command; the document rules are checked in-process.
    async fn validate_document(&self, document: &J) -> Result<(), BackendError> {
        VexDocument::from_json(document)?.validate()
    }
}
