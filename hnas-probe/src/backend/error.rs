use thiserror::Error;

use crate::config::ConfigError;
use crate::remote::RemoteError;
use crate::ssc::TableError;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("failed to parse ssc output: {0}")]
    Table(#[from] TableError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("could not find evs with ip {0}")]
    EvsNotFound(String),

    #[error("volume '{0}' not found on the array")]
    VolumeNotFound(String),

    #[error("found two volumes with the same id: {first} and {second}")]
    DuplicateVolume { first: String, second: String },

    #[error("service index {0} is not configured for this backend")]
    NoSuchService(usize),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("unexpected command output: {0}")]
    InvalidOutput(String),
}

pub type Result<T> = std::result::Result<T, BackendError>;
