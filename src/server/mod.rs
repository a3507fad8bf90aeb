/// 对外服务：MCP（stdio）与 HTTP
pub mod http;
pub mod mcp;
