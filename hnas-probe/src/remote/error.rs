use thiserror::Error;

#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("remote command '{command}' failed (exit code {exit_code:?}): {stderr}")]
    CommandFailed {
        command: String,
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

impl RemoteError {
    /// True when the remote side reported that a process no longer exists.
    pub fn is_no_such_process(&self) -> bool {
        match self {
            RemoteError::CommandFailed { stdout, stderr, .. } => {
                stderr.contains("No such process") || stdout.contains("No such process")
            }
            _ => false,
        }
    }

    /// Replace every occurrence of `secret` in the error text.
    pub fn redact(self, secret: &str) -> Self {
        if secret.is_empty() {
            return self;
        }
        match self {
            RemoteError::CommandFailed {
                command,
                exit_code,
                stdout,
                stderr,
            } => RemoteError::CommandFailed {
                command: command.replace(secret, "***"),
                exit_code,
                stdout: stdout.replace(secret, "***"),
                stderr: stderr.replace(secret, "***"),
            },
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, RemoteError>;
