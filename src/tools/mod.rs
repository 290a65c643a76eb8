mod registry;

pub use registry::{
    handler_fn, ApprovalKind, RiskLevel, ToolDefinition, ToolHandler, ToolRegistry, ToolReply,
};
