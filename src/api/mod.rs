pub mod client;
pub mod models;
pub mod response;
pub mod sse;

pub use client::ApiClient;
pub use models::{ChatResponse, RequestBody, StreamChunk};
pub use sse::{SseDecoder, SseEvent};
