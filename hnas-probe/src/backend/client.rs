//! Shell client for the HNAS management host.

use std::sync::Arc;

use tracing::{debug, info, instrument};

use super::error::{BackendError, Result};
use crate::metrics;
use crate::remote::{CommandRunner, RemoteError};
use crate::ssc::{EvsRecord, parse_evs_list};

/// User the SSC shell runs as
pub const SSC_USER: &str = "supervisor";

/// Build the shell line that runs `command` inside SSC.
pub fn ssc_command_line(command: &str) -> String {
    format!(
        "su {user} -c 'ssc -u {user} localhost \"{command}\"'",
        user = SSC_USER
    )
}

/// Shell access to the array's management host, with SSC helpers.
pub struct HnasClient {
    runner: Arc<dyn CommandRunner>,
    password: Option<String>,
}

impl HnasClient {
    /// `password` is the login password, reused for `sudo`.
    pub fn new(runner: Arc<dyn CommandRunner>, password: Option<String>) -> Self {
        Self { runner, password }
    }

    /// Run a shell command, optionally through `sudo`.
    pub async fn exec_command(&self, command: &str, sudo: bool) -> Result<String> {
        self.run(command, sudo, "shell").await
    }

    async fn run(&self, command: &str, sudo: bool, kind: &str) -> Result<String> {
        let full = if sudo {
            match &self.password {
                Some(password) => format!("sudo -k && echo '{}' | sudo -S {}", password, command),
                None => format!("sudo -n {}", command),
            }
        } else {
            command.to_string()
        };

        debug!(command = %command, sudo, kind, "Running command on array");
        let result = self.runner.execute(&full).await;
        metrics::record_command(kind, if result.is_ok() { "ok" } else { "error" });

        result.map_err(|e| match &self.password {
            Some(password) => BackendError::Remote(e.redact(password)),
            None => BackendError::Remote(e),
        })
    }

    /// `find` that tolerates a failing exit status as long as something
    /// was printed (unreadable directories under `/mnt/lb` are common).
    pub async fn permissive_find(&self, path: &str, pattern: &str) -> Result<String> {
        let command = format!("find {} -name '{}'", path, pattern);
        match self.exec_command(&command, false).await {
            Ok(stdout) => Ok(stdout),
            Err(BackendError::Remote(RemoteError::CommandFailed { stdout, .. }))
                if !stdout.trim().is_empty() =>
            {
                debug!(path, pattern, "find exited non-zero but produced output");
                Ok(stdout)
            }
            Err(e) => Err(e),
        }
    }

    /// Run a command inside the SSC shell.
    pub async fn ssc(&self, command: &str) -> Result<String> {
        self.run(&ssc_command_line(command), true, "ssc").await
    }

    pub async fn evs_list(&self) -> Result<Vec<EvsRecord>> {
        let output = self.ssc("evs list").await?;
        Ok(parse_evs_list(&output)?)
    }

    /// The EVS serving each of `ips`, in the order requested.
    #[instrument(skip(self))]
    pub async fn evs_by_ip(&self, ips: &[String]) -> Result<Vec<EvsRecord>> {
        let all = self.evs_list().await?;
        ips.iter()
            .map(|ip| {
                all.iter()
                    .find(|evs| evs.has_ip(ip))
                    .cloned()
                    .ok_or_else(|| BackendError::EvsNotFound(ip.clone()))
            })
            .collect()
    }

    /// Pids of processes whose `ps -ef` line matches `pattern`.
    pub async fn pids(&self, pattern: &str) -> Result<Vec<String>> {
        let command = format!(
            "ps -ef | grep {} | grep -v 'grep' | awk {{'print $2'}}",
            pattern
        );
        let output = self.exec_command(&command, false).await?;
        Ok(output
            .lines()
            .map(str::trim)
            .filter(|pid| !pid.is_empty())
            .map(str::to_string)
            .collect())
    }

    pub async fn send_signal(&self, pid: &str, signum: i32) -> Result<()> {
        if pid.is_empty() || !pid.chars().all(|c| c.is_ascii_digit()) {
            return Err(BackendError::InvalidArgument(format!("invalid pid '{}'", pid)));
        }
        info!(pid, signum, "Sending signal");
        self.exec_command(&format!("kill -{} {}", signum, pid), true)
            .await?;
        Ok(())
    }
}
