//! Holding SSC sessions open to hit the array's connection limit.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use super::error::Result;
use super::log_watch::{LogWatchOptions, LogWatcher};
use crate::backend::{BackendError, HnasClient, SSC_USER};

/// SSC command each held connection runs
pub const SSC_HOLD_COMMAND: &str = "sleep 60";
/// Driver log message emitted once the array refuses SSC sessions
pub const SSC_CONNECTION_ERROR: &str = "Failed to establish SSC connection";
pub const DEFAULT_CONNECTIONS: usize = 5;

const SIGTERM: i32 = 15;

#[derive(Debug, Clone)]
pub struct LimitTestTiming {
    /// Time a new connection gets before it is checked
    pub settle: Duration,
    pub retry_wait: Duration,
    /// Failed opens tolerated before giving up
    pub num_retries: u32,
}

impl Default for LimitTestTiming {
    fn default() -> Self {
        Self {
            settle: Duration::from_secs(1),
            retry_wait: Duration::from_secs(1),
            num_retries: 10,
        }
    }
}

/// Opens SSC connections and closes them again once the limit was hit.
///
/// Connection tasks still running when the tester is dropped are aborted;
/// the remote `ssc` processes only go away through
/// [`close_connections`](Self::close_connections).
pub struct SscLimitTester {
    client: Arc<HnasClient>,
    connections: usize,
    timing: LimitTestTiming,
    tasks: Vec<JoinHandle<()>>,
    pids: Vec<String>,
}

impl SscLimitTester {
    pub fn new(client: Arc<HnasClient>, connections: usize) -> Self {
        Self::with_timing(client, connections, LimitTestTiming::default())
    }

    pub fn with_timing(client: Arc<HnasClient>, connections: usize, timing: LimitTestTiming) -> Self {
        Self {
            client,
            connections,
            timing,
            tasks: Vec::new(),
            pids: Vec::new(),
        }
    }

    /// Pids of the `ssc` processes found after opening connections.
    pub fn pids(&self) -> &[String] {
        &self.pids
    }

    /// Number of connections currently held.
    pub fn open_count(&self) -> usize {
        self.tasks.iter().filter(|t| !t.is_finished()).count()
    }

    /// Open connections one at a time, then record the remote pids.
    ///
    /// A connection that already ended when checked counts as a failed open.
    /// Returns the number of connections held.
    #[instrument(skip(self), fields(connections = self.connections))]
    pub async fn open_connections(&mut self) -> Result<usize> {
        let mut retries_left = self.timing.num_retries;

        while self.tasks.len() < self.connections {
            let name = format!("ssc-conn-{}", self.tasks.len());
            let client = Arc::clone(&self.client);
            let handle = tokio::spawn(async move {
                match client.ssc(SSC_HOLD_COMMAND).await {
                    Ok(output) => debug!(connection = %name, output = %output.trim(), "SSC session ended"),
                    Err(e) => debug!(connection = %name, error = %e, "SSC session failed"),
                }
            });

            tokio::time::sleep(self.timing.settle).await;
            if !handle.is_finished() {
                self.tasks.push(handle);
            } else {
                retries_left = retries_left.saturating_sub(1);
                warn!(
                    wait_secs = self.timing.retry_wait.as_secs_f64(),
                    retries_left, "Failed to open SSC connection, retrying"
                );
                tokio::time::sleep(self.timing.retry_wait).await;
            }

            if retries_left == 0 {
                warn!(opened = self.tasks.len(), "Giving up opening SSC connections");
                break;
            }
        }

        let pattern = format!("'ssc -u {} localhost \"{}\"'", SSC_USER, SSC_HOLD_COMMAND);
        self.pids = self.client.pids(&pattern).await?;
        info!(opened = self.tasks.len(), pids = ?self.pids, "SSC connections open");
        Ok(self.tasks.len())
    }

    /// Terminate every recorded `ssc` process.
    pub async fn close_connections(&self) -> Result<()> {
        close_pids(&self.client, &self.pids).await
    }

    /// Watch `log_path` for the connection error and close every
    /// connection when it shows up.
    ///
    /// The returned task resolves to whether the error was seen.
    pub async fn close_connections_on_error(
        &self,
        log_path: &Path,
        options: LogWatchOptions,
    ) -> Result<JoinHandle<Result<bool>>> {
        let watcher = LogWatcher::spawn(log_path, SSC_CONNECTION_ERROR, options).await?;
        let client = Arc::clone(&self.client);
        let pids = self.pids.clone();

        Ok(tokio::spawn(async move {
            match watcher.wait().await? {
                Some(line) => {
                    info!(line = %line, "SSC connection limit reached, closing connections");
                    close_pids(&client, &pids).await?;
                    Ok(true)
                }
                None => Ok(false),
            }
        }))
    }
}

impl Drop for SscLimitTester {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn close_pids(client: &HnasClient, pids: &[String]) -> Result<()> {
    debug!(count = pids.len(), "Closing SSC connections");
    for pid in pids.iter().filter(|pid| !pid.is_empty()) {
        match client.send_signal(pid, SIGTERM).await {
            Ok(()) => {}
            Err(BackendError::Remote(e)) if e.is_no_such_process() => {
                debug!(pid = %pid, "Connection already closed");
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}
