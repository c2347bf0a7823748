use thiserror::Error;

use crate::backend::BackendError;

#[derive(Error, Debug)]
pub enum LimitError {
    #[error("failed to read log file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("log watcher stopped without reporting a result")]
    WatcherGone,
}

pub type Result<T> = std::result::Result<T, LimitError>;
