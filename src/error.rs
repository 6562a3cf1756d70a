use std::fmt;

/// Errors produced anywhere in the setup node.
///
/// The five outward-facing kinds mirror the failure surface a caller of
/// the public API actually needs to branch on; `Json`/`Io` only exist so
/// `?` composes across `serde_json`/`std::io` and get folded into one of
/// the five via [`Error::context`] before they escape a module boundary.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("remote error: {0}")]
    Remote(String),

    #[error("policy error: {0}")]
    Policy(String),

    #[error("cancelled")]
    Cancelled,

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn transport(msg: impl fmt::Display) -> Self {
        Error::Transport(msg.to_string())
    }

    pub fn protocol(msg: impl fmt::Display) -> Self {
        Error::Protocol(msg.to_string())
    }

    pub fn remote(msg: impl fmt::Display) -> Self {
        Error::Remote(msg.to_string())
    }

    pub fn policy(msg: impl fmt::Display) -> Self {
        Error::Policy(msg.to_string())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// Prefixes the error with additional context, preserving its kind
    /// where that's meaningful (cancellation stays cancellation).
    pub fn context(self, msg: &str) -> Self {
        match self {
            Error::Cancelled => Error::Cancelled,
            Error::Transport(e) => Error::Transport(format!("{msg}: {e}")),
            Error::Protocol(e) => Error::Protocol(format!("{msg}: {e}")),
            Error::Remote(e) => Error::Remote(format!("{msg}: {e}")),
            Error::Policy(e) => Error::Policy(format!("{msg}: {e}")),
            Error::Json(e) => Error::Protocol(format!("{msg}: {e}")),
            Error::Io(e) => Error::Transport(format!("{msg}: {e}")),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
