//! Typed model API on top of a connection session.

pub mod client;
pub mod parse;
pub mod types;

pub use client::LemonadeClient;
pub use parse::sanitize_model_name;
pub use types::{
    ChatCompletionRequest, ChatCompletionResponse, ChatMessage, Choice, EmbeddingsRequest,
    GenerationParams, ModelInfo, ResponseMessage, Role, Usage,
};
