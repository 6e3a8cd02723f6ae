//! Tool server: capability-gated access to shared backends for specialized
//! agents.

pub mod adapter;
pub mod server;

pub use adapter::{ParamKind, ParamSpec, ToolAdapter, ToolSchema};
pub use server::{ToolResult, ToolServer, ToolStatus};
