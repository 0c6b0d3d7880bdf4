//! Remote text generation

mod gemini;

use async_trait::async_trait;

pub use gemini::GeminiClient;

use crate::Result;

/// A transcript to answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReasoningRequest {
    pub transcript: String,
    pub system_instructions: String,
}

/// The generated answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReasoningResponse {
    pub generated_text: String,
}

/// Request/response client for a text-generation API
#[async_trait]
pub trait ReasoningClient: Send + Sync {
    /// Generate a reply to the transcript
    async fn generate(&self, request: ReasoningRequest) -> Result<ReasoningResponse>;
}
