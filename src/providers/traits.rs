//! The single provider contract every wire adapter implements.
//!
//! The teacher's capability-specific traits (`EmbeddingProvider`,
//! `NliProvider`, `ClassifyProvider`, `StanceProvider`, `ChatProvider`,
//! `GenerateProvider`) narrow to one contract here: every upstream this
//! crate dispatches to speaks streaming chat completion, so there is only
//! one shape to implement.

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;

use crate::content::IContent;
use crate::error::RuntimeError;
use crate::runtime_context::NormalizedGenerateChatOptions;
use crate::types::ProviderCapabilities;

/// A lazy sequence of normalized content: the one observable output shape
/// every provider family's streaming state machine converges on.
pub type ChatCompletionStream = Pin<Box<dyn Stream<Item = Result<IContent, RuntimeError>> + Send>>;

/// Provider contract for streaming chat completion dispatch.
///
/// Implementations own one upstream wire protocol (Anthropic-messages,
/// Chat-Completions, Responses, or Gemini) and convert between it and the
/// canonical [`IContent`] model; retry, auth, caching, and the
/// active-provider state machine are all generic over this trait.
#[async_trait]
pub trait ChatCompletionProvider: Send + Sync {
    /// Provider name for logging, metrics, and active-provider bookkeeping.
    fn name(&self) -> &str;

    /// Capabilities captured at registration time.
    fn capabilities(&self) -> ProviderCapabilities;

    /// Streams a chat completion for the given normalized options.
    async fn generate_chat_completion(
        &self,
        options: NormalizedGenerateChatOptions,
    ) -> Result<ChatCompletionStream, RuntimeError>;

    /// Lists models this provider can serve.
    async fn get_models(&self) -> Result<Vec<String>, RuntimeError>;

    /// Invoked when this provider stops being the active one. Default is a
    /// no-op; providers holding server-side thread state (the Responses
    /// family's `previous_response_id`) override this to drop it, since that
    /// state must never survive a switch away and back.
    fn clear_state(&self) {}
}
