//! Wire adapters: one module per upstream provider family, plus the shared
//! infrastructure (SSE parsing, retry-wrapped streaming, common request
//! helpers) every adapter builds on.

pub mod anthropic;
pub mod chat_completions;
pub mod common;
pub mod gemini;
pub mod responses;
pub mod retry_stream;
pub mod sse;
pub mod traits;

pub use anthropic::AnthropicProvider;
pub use chat_completions::ChatCompletionsProvider;
pub use gemini::GeminiProvider;
pub use responses::ResponsesProvider;
pub use traits::{ChatCompletionProvider, ChatCompletionStream};
