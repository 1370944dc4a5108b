//! Streaming completion boundary
//!
//! The chat controller talks to a language model through
//! [`CompletionService`]. Partial text is delivered through a callback as
//! it arrives; the returned string is the full reply.

use crate::error::Result;
use crate::sessions::ChatMessage;
use async_trait::async_trait;

pub mod openai;
pub mod scripted;

pub use openai::OpenAiCompletion;
pub use scripted::ScriptedCompletion;

/// Everything the model sees for one turn
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompletionRequest {
    /// Book-scoped instructions
    pub system_prompt: String,
    /// Prior messages of the conversation, oldest first
    pub history: Vec<ChatMessage>,
    /// The new user message
    pub prompt: String,
}

/// A streaming language model
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Streams a reply to `request`
    ///
    /// `on_chunk` is called with each piece of text in arrival order. The
    /// returned string is the concatenation of all chunks.
    ///
    /// # Errors
    ///
    /// Returns `LampstandError::CompletionFailed` when the service rejects
    /// the request, reports an error mid-stream, or ends without a reply.
    async fn complete(
        &self,
        request: &CompletionRequest,
        on_chunk: &mut (dyn for<'c> FnMut(&'c str) + Send),
    ) -> Result<String>;
}
