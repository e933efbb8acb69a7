//! llxprt-runtime - multi-provider LLM client runtime
//!
//! One streaming `generate_chat_completion` contract dispatched over
//! Anthropic-messages, OpenAI-style Chat Completions, OpenAI Responses, and
//! Gemini upstreams. Every call is stateless: a fresh [`RuntimeContext`] and
//! [`NormalizedGenerateChatOptions`] bundle carries everything a provider
//! adapter needs, so two concurrent calls never observe each other's state.
//!
//! # Example
//!
//! ```rust,no_run
//! use llxprt_runtime::{ProviderManager, IContent, RuntimeContext, SettingsSnapshot};
//! use llxprt_runtime::runtime_context::NormalizedGenerateChatOptions;
//! use futures_util::StreamExt;
//!
//! # async fn run(manager: ProviderManager) -> Result<(), llxprt_runtime::RuntimeError> {
//! let provider = manager.get_active_provider()?;
//! let options = NormalizedGenerateChatOptions::new(
//!     vec![IContent::human("What is the capital of France?")],
//!     manager.snapshot_runtime_context("example")?,
//!     SettingsSnapshot::default(),
//! );
//!
//! let mut stream = provider.generate_chat_completion(options).await?;
//! while let Some(item) = stream.next().await {
//!     let item = item?;
//!     println!("{item:?}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod content;
pub mod error;
pub mod http_cache;
pub mod manager;
pub mod profile;
pub mod prompt;
pub mod providers;
pub mod retry;
pub mod runtime_context;
pub mod settings;
pub mod telemetry;
pub mod tool_format;
pub mod types;
pub mod version;

pub use content::{ContentBlock, ContentMetadata, IContent, Speaker, ToolId};
pub use error::RuntimeError;
pub use manager::ProviderManager;
pub use profile::{Profile, ProfileModelParams};
pub use providers::{
    AnthropicProvider, ChatCompletionProvider, ChatCompletionStream, ChatCompletionsProvider,
    GeminiProvider, ResponsesProvider,
};
pub use runtime_context::{
    NormalizedGenerateChatOptions, ResolvedCallParams, RuntimeContext, SettingsSnapshot,
};
pub use settings::{Config, ProviderSettings, SettingsService};
pub use tool_format::ToolFormat;
pub use types::{
    ChatOptions, FinishReason, ParameterAvailability, ParameterName, ParameterRange,
    ProviderCapabilities, ReasoningConfig, ReasoningEffort, ResponseFormat, ToolChoice,
    ToolDefinition, Usage,
};

/// Convenience alias for the crate's fallible results.
pub type Result<T> = std::result::Result<T, RuntimeError>;
