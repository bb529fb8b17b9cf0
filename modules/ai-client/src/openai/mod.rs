mod client;
mod types;

pub use client::OpenAiModel;
pub use types::{ChatMessage, ChatRequest, ChatResponse};
