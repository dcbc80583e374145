//! External coding-agent server integration: typed HTTP client plus the
//! normalized event-stream bridge. "Agent" always means the external server,
//! never an in-process actor.

pub mod bridge;
pub mod client;

pub use bridge::{BridgeEvent, EventBridge};
pub use client::{
    AgentClient, AgentError, AgentHealth, PermissionRequest, PromptRequest, SessionState,
    SessionStateKind,
};
