//! Tool outcome model: what a tool hands back, independent of the protocol envelope.

use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolContent {
    Text { text: String },
}

/// Result of a tool run. `is_error` marks a domain failure, which is still a
/// successful protocol exchange.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    pub content: Vec<ToolContent>,
    #[serde(default)]
    pub is_error: bool,
}

impl ToolResult {
    pub fn text(text: impl Into<String>) -> Self {
        Self { content: vec![ToolContent::Text { text: text.into() }], is_error: false }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self { content: vec![ToolContent::Text { text: message.into() }], is_error: true }
    }

    /// Pretty JSON as a single text item.
    pub fn json(value: &serde_json::Value) -> Self {
        let text = serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
        Self::text(text)
    }

    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.content.iter().map(|c| match c {
            ToolContent::Text { text } => text.as_str(),
        })
    }
}
