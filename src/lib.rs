//! Client-side conversation engine for OpenAI-style chat completion APIs.
//!
//! The crate covers the request/response plumbing a chat host needs and
//! nothing it renders: building requests from an ordered history, consuming
//! buffered and streamed responses, reconstructing tool-call payloads that
//! arrive fragmented across stream chunks, recovering from context-window
//! overflow by truncating history, honoring rate-limit backoff, and gating
//! model-requested tool execution behind human approval with cancellation.
//!
//! Concrete tools are supplied by the host through [`tools::ToolRegistry`];
//! approval decisions arrive through [`approval::ApprovalGate`]; everything
//! the host should display is pushed over the gate's notification channel.

pub mod api;
pub mod approval;
pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod models;
pub mod tools;

pub use approval::{ApprovalGate, HostNotification, PendingApproval};
pub use config::ApiConfig;
pub use engine::{ChatSession, StreamedTurn};
pub use error::{ChatLoopError, Result};
pub use models::{ChatParameters, Message, ToolCallRequest, ToolOutput};
pub use tools::{ApprovalKind, RiskLevel, ToolDefinition, ToolRegistry};
