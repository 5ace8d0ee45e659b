use crate::setup::SetupError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum InitSetupError {
    #[error(transparent)]
    Setup(#[from] SetupError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Server error: {0}")]
    Server(String),
}

pub type Result<T> = std::result::Result<T, InitSetupError>;
