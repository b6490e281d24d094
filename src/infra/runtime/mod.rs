pub mod http_transport;
pub mod limits;
pub mod mcp_transport;
