use std::fmt::Display;
use std::time::Duration;

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Error returned by tmuxscope APIs.
///
/// Every variant carries a human-readable cause. Callers placing a pane process are expected to
/// log it and carry on without scope isolation; nothing is retried internally.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The user session bus is unreachable or misconfigured.
    #[error("failed to connect to session bus: {detail}")]
    Connection { detail: String },

    /// A local failure while constructing the `StartTransientUnit` request.
    #[error("failed to {step}: {detail}")]
    Build { step: &'static str, detail: String },

    /// systemd rejected the request, or the call itself failed on the bus.
    #[error("StartTransientUnit call failed: {message}")]
    Call { message: String },

    /// A method reply or signal payload did not have the expected shape.
    #[error("failed to parse {context}: {detail}")]
    Decode {
        context: &'static str,
        detail: String,
    },

    /// The deadline elapsed before systemd reported the scope job as finished.
    #[error("timeout waiting for cgroup allocation after {timeout:?}")]
    Timeout { timeout: Duration },

    /// Any other bus-level failure (match installation, dispatch, blocking wait).
    #[error("{context}")]
    Bus { context: String },

    /// Socket activation handed over something unusable.
    #[error("systemd socket error ({detail})")]
    Socket { detail: String },

    /// Invalid options or arguments.
    #[error("invalid input: {context}")]
    InvalidInput { context: String },
}

impl Error {
    pub(crate) fn invalid_input(context: impl Into<String>) -> Self {
        Self::InvalidInput {
            context: context.into(),
        }
    }

    pub(crate) fn build(step: &'static str, detail: impl Display) -> Self {
        Self::Build {
            step,
            detail: detail.to_string(),
        }
    }

    pub(crate) fn decode(context: &'static str, detail: impl Display) -> Self {
        Self::Decode {
            context,
            detail: detail.to_string(),
        }
    }

    pub(crate) fn socket(detail: impl Display) -> Self {
        Self::Socket {
            detail: detail.to_string(),
        }
    }

    /// Build a `Call` error, preferring the message systemd sent back over the generic cause.
    pub(crate) fn call_failed(remote: Option<&str>, fallback: impl Display) -> Self {
        let message = match remote {
            Some(m) if !m.trim().is_empty() => m.to_string(),
            _ => fallback.to_string(),
        };
        Self::Call { message }
    }

    pub(crate) fn waiting(detail: impl Display) -> Self {
        Self::Bus {
            context: format!("failed waiting for cgroup allocation: {detail}"),
        }
    }
}
