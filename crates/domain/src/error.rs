use crate::session::Phase;

/// Shared error type used across all Baton crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("graph store: {0}")]
    Graph(String),

    /// The caller completed a phase the session is not in. The session is
    /// left untouched when this is returned.
    #[error("session is at {current}, caller completed {reported}")]
    PhaseMismatch { current: Phase, reported: Phase },

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("config: {0}")]
    Config(String),

    #[error("auth: {0}")]
    Auth(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
