//! Runtime-level errors.

use thiserror::Error;

/// Errors surfaced when constructing or mutating an actor system.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("actor name '{0}' is already registered")]
    DuplicateName(String),
    #[error("message '{0}' is already installed by actor '{1}'")]
    DuplicateInstall(String, String),
    #[error("no actor named '{0}'")]
    UnknownActor(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
