use thiserror::Error;

use crate::config::ConfigError;
use crate::control::ControlError;
use crate::diagnostic::DiagnosticError;
use crate::event::EventError;
use crate::provider::ProviderError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Event error: {0}")]
    Event(#[from] EventError),

    #[error("Diagnostic error: {0}")]
    Diagnostic(#[from] DiagnosticError),

    #[error("Control error: {0}")]
    Control(#[from] ControlError),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type InternalResult<T> = Result<T, Error>;

impl Error {
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Error::Internal(message.into())
    }
}
