//! Core types & traits: protocol envelopes, tool contracts and argument checks.

pub mod content;
pub mod error;
pub mod mcp;
pub mod schema;
pub mod tool;

pub use content::{ToolContent, ToolResult};
pub use error::{ErrorCode, RpcError, ServerError};
pub use mcp::{Incoming, RequestId, RpcResponse};
pub use tool::{CallContext, Tool, ToolDescriptor, ToolError, ToolSpec};
