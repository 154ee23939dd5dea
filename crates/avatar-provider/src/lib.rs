use anyhow::Result;
use async_trait::async_trait;

mod openai;
mod types;

pub use openai::OpenAiProvider;
pub use types::*;

/// A chat-completion backend. One call is one model round.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn chat(&self, request: LlmRequest) -> Result<LlmResponse>;
}
