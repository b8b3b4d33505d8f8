use thiserror::Error;

use crate::admission::AdmissionError;
use crate::capability::ConfigurationError;

#[derive(Error, Debug)]
pub enum DarkLaunchError {
    // registration
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
    #[error("Admission error: {0}")]
    Admission(#[from] AdmissionError),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type DarkResult<T> = Result<T, DarkLaunchError>;

impl DarkLaunchError {
    pub fn internal<S: Into<String>>(message: S) -> Self {
        DarkLaunchError::Internal(message.into())
    }
}
