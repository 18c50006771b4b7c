//! MCP adapter: the stdio JSON-RPC surface and the tool router behind it.

pub mod requests;
pub mod router;
pub mod stdio_server;

pub use router::ToolRouter;
pub use stdio_server::StdioServer;
