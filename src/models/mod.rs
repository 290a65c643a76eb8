mod message;
mod parameters;
mod tool;

pub use message::{ContentPart, ImageUrl, Message, MessageContent};
pub use parameters::ChatParameters;
pub use tool::{ApprovalState, FunctionCall, ToolCall, ToolCallRequest, ToolOutput};
