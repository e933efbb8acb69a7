//! Runtime error taxonomy and transient-failure classification.

/// Errors surfaced by the runtime to callers.
///
/// Each variant maps to one of the nine kinds callers are expected to branch
/// on; see [`RuntimeError::exit_code`] for the subset that carries a process
/// exit code.
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum RuntimeError {
    #[error("authentication failed for provider '{provider_name}': {hint}")]
    Auth { provider_name: String, hint: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid input: {0}")]
    Input(String),

    #[error("turn limit exceeded: {0} turns")]
    TurnLimit(usize),

    #[error("tool '{0}' is disabled")]
    ToolDisabled(String),

    #[error("API error ({status}): {message}")]
    Api {
        status: u16,
        message: String,
        /// Raw `Retry-After` header value (integer seconds or an HTTP date),
        /// carried as a structured field rather than smuggled into
        /// `message` so [`crate::retry::retry_after_hint`] can recover it
        /// without reparsing free text.
        retry_after: Option<String>,
    },

    #[error("stream interrupted ({code}){}", details.as_deref().map(|d| format!(": {d}")).unwrap_or_default())]
    StreamInterruption {
        code: String,
        details: Option<String>,
        #[source]
        cause: Option<Box<RuntimeError>>,
    },

    #[error(
        "provider runtime '{provider_key}' is missing fields {missing_fields:?} at stage '{stage}'"
    )]
    MissingProviderRuntime {
        provider_key: String,
        missing_fields: Vec<String>,
        stage: String,
        metadata: serde_json::Value,
    },

    #[error("unhandled error: {0}")]
    Unhandled(String),
}

/// Fixed code carried by every [`RuntimeError::StreamInterruption`].
pub const STREAM_INTERRUPTED_CODE: &str = "LLXPRT_STREAM_INTERRUPTED";

impl RuntimeError {
    /// Construct a stream-interruption error with the canonical code.
    pub fn stream_interruption(details: impl Into<String>, cause: Option<RuntimeError>) -> Self {
        RuntimeError::StreamInterruption {
            code: STREAM_INTERRUPTED_CODE.to_string(),
            details: Some(details.into()),
            cause: cause.map(Box::new),
        }
    }

    /// Process exit code for the kinds that carry one; `None` otherwise.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Auth { .. } => Some(41),
            Self::Input(_) => Some(42),
            Self::Config(_) => Some(52),
            Self::TurnLimit(_) => Some(53),
            _ => None,
        }
    }

    /// Whether this error is transient and the call may succeed on retry.
    ///
    /// Rate limits and server errors are always transient; `Api` checks the
    /// status/message per the default `shouldRetry` rule (429, 5xx, or a
    /// message containing "429" / matching a 5xx pattern);
    /// `StreamInterruption` is always transient; everything else falls
    /// through to a transient-phrase scan of the message, mirroring the
    /// recursive cause-chain walk [`classify_transient`] does for foreign
    /// error types.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Api { status, message, .. } => {
                *status == 429
                    || (500..600).contains(status)
                    || message.contains("429")
                    || looks_like_5xx(message)
            }
            Self::StreamInterruption { .. } => true,
            Self::Auth { .. }
            | Self::Config(_)
            | Self::Input(_)
            | Self::TurnLimit(_)
            | Self::ToolDisabled(_)
            | Self::MissingProviderRuntime { .. } => false,
            Self::Unhandled(msg) => classify_message_transient(msg),
        }
    }
}

/// Cheap stand-in for the spec's `/5\d{2}/` message regex without pulling in
/// the `regex` crate for a single three-digit scan.
fn looks_like_5xx(message: &str) -> bool {
    let bytes = message.as_bytes();
    bytes
        .windows(3)
        .any(|w| w[0] == b'5' && w[1].is_ascii_digit() && w[2].is_ascii_digit())
}

/// Lowercased phrases that mark a message as transient-network in origin.
const TRANSIENT_PHRASES: &[&str] = &[
    "econnreset",
    "econnrefused",
    "econnaborted",
    "enetunreach",
    "ehostunreach",
    "etimedout",
    "epipe",
    "eai_again",
    "stream_interrupted",
    "tcp connection",
    "socket hang up",
    "network error",
    "connection reset",
    "connection refused",
    "connection",
    "socket",
    "stream",
    "timeout",
    "fetch failed",
    "request aborted",
];

/// Upper-cased transient error codes, matching spec's `UND_ERR_*`/POSIX set.
const TRANSIENT_CODES: &[&str] = &[
    "ECONNRESET",
    "ECONNREFUSED",
    "ECONNABORTED",
    "ENETUNREACH",
    "EHOSTUNREACH",
    "ETIMEDOUT",
    "EPIPE",
    "EAI_AGAIN",
    "UND_ERR_SOCKET",
    "UND_ERR_CONNECT",
    "UND_ERR_HEADERS_TIMEOUT",
    "UND_ERR_BODY_TIMEOUT",
    "STREAM_INTERRUPTED",
];

fn classify_message_transient(message: &str) -> bool {
    let lower = message.to_lowercase();
    let upper = message.to_uppercase();
    TRANSIENT_PHRASES.iter().any(|p| lower.contains(p))
        || TRANSIENT_CODES.iter().any(|c| upper.contains(c))
}

/// Recursively classifies an arbitrary error chain as transient-network,
/// walking `source()` the way the spec walks `cause`/`originalError`/`error`
/// across a dynamically-typed error object.
///
/// Guards against runaway chains with a depth cap rather than a visited-set:
/// `std::error::Error::source()` is a statically borrow-checked chain and
/// cannot self-reference the way a hand-built JS error graph can, so the cap
/// is defensive rather than load-bearing.
pub fn classify_transient(err: &(dyn std::error::Error + 'static)) -> bool {
    const MAX_DEPTH: usize = 16;
    let mut current: Option<&(dyn std::error::Error + 'static)> = Some(err);
    let mut depth = 0;
    while let Some(e) = current {
        if depth >= MAX_DEPTH {
            break;
        }
        if classify_message_transient(&e.to_string()) {
            return true;
        }
        current = e.source();
        depth += 1;
    }
    false
}

/// Result alias used throughout the runtime.
pub type Result<T> = std::result::Result<T, RuntimeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_match_spec() {
        assert_eq!(
            RuntimeError::Auth {
                provider_name: "openai".into(),
                hint: "missing key".into()
            }
            .exit_code(),
            Some(41)
        );
        assert_eq!(RuntimeError::Input("bad".into()).exit_code(), Some(42));
        assert_eq!(RuntimeError::Config("bad".into()).exit_code(), Some(52));
        assert_eq!(RuntimeError::TurnLimit(10).exit_code(), Some(53));
        assert_eq!(RuntimeError::ToolDisabled("x".into()).exit_code(), None);
    }

    #[test]
    fn api_error_5xx_is_transient() {
        let err = RuntimeError::Api {
            status: 503,
            message: "service unavailable".into(),
            retry_after: None,
        };
        assert!(err.is_transient());
    }

    #[test]
    fn api_error_4xx_non_429_is_not_transient() {
        let err = RuntimeError::Api {
            status: 404,
            message: "not found".into(),
            retry_after: None,
        };
        assert!(!err.is_transient());
    }

    #[test]
    fn api_error_429_is_transient() {
        let err = RuntimeError::Api {
            status: 429,
            message: "too many requests".into(),
            retry_after: None,
        };
        assert!(err.is_transient());
    }

    #[test]
    fn stream_interruption_is_always_transient() {
        let err = RuntimeError::stream_interruption("socket closed", None);
        assert!(err.is_transient());
        assert_eq!(err.exit_code(), None);
    }

    #[test]
    fn auth_error_is_never_transient() {
        let err = RuntimeError::Auth {
            provider_name: "anthropic".into(),
            hint: "set ANTHROPIC_API_KEY".into(),
        };
        assert!(!err.is_transient());
    }

    #[derive(Debug)]
    struct Wrapped(Box<dyn std::error::Error + 'static>);
    impl std::fmt::Display for Wrapped {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "wrapped")
        }
    }
    impl std::error::Error for Wrapped {
        fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
            Some(self.0.as_ref())
        }
    }

    #[derive(Debug)]
    struct Leaf(String);
    impl std::fmt::Display for Leaf {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{}", self.0)
        }
    }
    impl std::error::Error for Leaf {}

    #[test]
    fn classify_transient_walks_cause_chain() {
        let leaf = Leaf("ECONNRESET while reading body".into());
        let wrapped = Wrapped(Box::new(leaf));
        assert!(classify_transient(&wrapped));
    }

    #[test]
    fn classify_transient_false_for_unrelated_chain() {
        let leaf = Leaf("invalid JSON payload".into());
        let wrapped = Wrapped(Box::new(leaf));
        assert!(!classify_transient(&wrapped));
    }
}
