//! Watching a growing log file for a line containing a marker.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use super::error::{LimitError, Result};
use crate::metrics;

pub const DEFAULT_WATCH_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct LogWatchOptions {
    /// Byte offset to start reading from; end of file when unset
    pub start: Option<u64>,
    pub timeout: Duration,
    /// Delay before reading again after hitting end of file
    pub poll_interval: Duration,
}

impl Default for LogWatchOptions {
    fn default() -> Self {
        Self {
            start: None,
            timeout: DEFAULT_WATCH_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// A background task tailing a log file.
///
/// The result is delivered once: the matching line, or `None` when the
/// timeout elapsed first.
#[derive(Debug)]
pub struct LogWatcher {
    path: PathBuf,
    rx: oneshot::Receiver<Result<Option<String>>>,
    task: JoinHandle<()>,
}

impl LogWatcher {
    /// Open `path` and start watching it for `marker`.
    ///
    /// The file is opened and positioned before this returns, so lines
    /// written afterwards are never missed.
    pub async fn spawn(
        path: impl AsRef<Path>,
        marker: impl Into<String>,
        options: LogWatchOptions,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let marker = marker.into();
        let io_err = |source| LimitError::Io {
            path: path.display().to_string(),
            source,
        };

        let mut reader = BufReader::new(File::open(&path).await.map_err(io_err)?);
        let pos = match options.start {
            Some(offset) => reader.seek(SeekFrom::Start(offset)).await,
            None => reader.seek(SeekFrom::End(0)).await,
        }
        .map_err(io_err)?;

        debug!(path = %path.display(), marker = %marker, pos, "Watching log file");

        let (tx, rx) = oneshot::channel();
        let task_path = path.display().to_string();
        let task = tokio::spawn(async move {
            let result = tail(reader, pos, &marker, &options)
                .await
                .map_err(|source| LimitError::Io {
                    path: task_path,
                    source,
                });
            let label = match &result {
                Ok(Some(_)) => "found",
                Ok(None) => "timeout",
                Err(_) => "error",
            };
            metrics::record_log_watch(label);
            // Nobody may be waiting any more
            let _ = tx.send(result);
        });

        Ok(Self { path, rx, task })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the watch to end.
    pub async fn wait(self) -> Result<Option<String>> {
        self.rx.await.map_err(|_| LimitError::WatcherGone)?
    }

    /// The result, if the watch already ended.
    pub fn try_result(&mut self) -> Option<Result<Option<String>>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(LimitError::WatcherGone)),
        }
    }
}

async fn tail(
    mut reader: BufReader<File>,
    mut pos: u64,
    marker: &str,
    options: &LogWatchOptions,
) -> std::io::Result<Option<String>> {
    let deadline = Instant::now() + options.timeout;
    let mut buf = Vec::new();

    loop {
        buf.clear();
        let read = reader.read_until(b'\n', &mut buf).await?;
        if buf.ends_with(b"\n") {
            pos += read as u64;
            let line = String::from_utf8_lossy(&buf);
            if line.contains(marker) {
                let line = line.trim_end().to_string();
                info!(line = %line, "Found marker in log");
                return Ok(Some(line));
            }
        } else {
            // Unterminated tail: read it again once the writer finishes it
            if read > 0 {
                reader.seek(SeekFrom::Start(pos)).await?;
            }
            tokio::time::sleep(options.poll_interval).await;
        }

        if Instant::now() >= deadline {
            debug!(marker, "Log watch timed out");
            return Ok(None);
        }
    }
}
