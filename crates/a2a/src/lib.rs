//! Outbound agent-to-agent client: invoke a specialized agent with retry,
//! deadline, and cooperative cancellation.

pub mod backoff;
pub mod client;

pub use backoff::RetryBackoff;
pub use client::{
    AgentInvoker, HttpAgentClient, InvocationRequest, InvocationResult, InvocationStatus,
};
