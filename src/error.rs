use thiserror::Error;

use crate::connection::ConnError;
use crate::hooks::HookError;
use crate::manifest::ManifestError;
use crate::reader::ReadError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Connection error: {0}")]
    Connection(#[from] ConnError),
    #[error("Hook error: {0}")]
    Hook(#[from] HookError),
    #[error("Reader error: {0}")]
    Reader(#[from] ReadError),
    #[error("Manifest error: {0}")]
    Manifest(#[from] ManifestError),
    #[error("Config error: {0}")]
    Config(#[from] serde_json::Error),
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type CoreResult<T> = Result<T, Error>;

impl Error {
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Error::Internal(message.into())
    }
}
