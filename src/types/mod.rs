//! Shared value types used by the provider wire formats and public API.

pub mod capabilities;
pub mod options;
pub mod parameter;
pub mod response;
pub mod tool;

pub use capabilities::ProviderCapabilities;
pub use options::{ChatOptions, ReasoningConfig, ReasoningEffort, ResponseFormat};
pub use parameter::{ParameterAvailability, ParameterName, ParameterRange};
pub use response::{FinishReason, Usage};
pub use tool::{ToolChoice, ToolDefinition};
