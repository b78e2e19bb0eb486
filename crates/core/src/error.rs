/// Result alias that carries the custom [`RouterError`] type.
pub type Result<T> = std::result::Result<T, RouterError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    /// Free-form message for failures that have no dedicated variant.
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Configuration or snapshot documents that failed to parse.
    #[error("{0}")]
    Json(#[from] serde_json::Error),
    /// Input data rejected before it reached any processing step.
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    /// A modifier key with no registered transform.
    #[error("unknown modifier kind `{0}`")]
    UnknownModifierKind(String),
    /// A registered transform rejected its arguments.
    #[error("modifier `{key}` failed: {reason}")]
    ModifierFailed { key: String, reason: String },
    /// A node id that is not present in the node table.
    #[error("node `{0}` does not exist")]
    NodeNotFound(String),
    /// A link whose target cannot be driven by its input.
    #[error("invalid link from `{input_id}` to `{node_id}`: {reason}")]
    InvalidLink {
        input_id: String,
        node_id: String,
        reason: String,
    },
    /// Aggregate of every node that failed while handling one input event.
    #[error(
        "routing `{input_id}` failed for {} node(s): {}",
        .failures.len(),
        .failures.join("; ")
    )]
    Fanout {
        input_id: String,
        failures: Vec<String>,
    },
    /// Spectral analysis failure reported by the FFT backend.
    #[error("{0}")]
    Fft(#[from] realfft::FftError),
    /// The engine command queue has no receiver left.
    #[error("engine command queue is closed")]
    QueueClosed,
}

impl RouterError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    pub(crate) fn modifier(key: &str, reason: impl Into<String>) -> Self {
        Self::ModifierFailed {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<&str> for RouterError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for RouterError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
