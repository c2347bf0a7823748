//! Remote command execution.
//!
//! Everything the probe does on the array or on a guest VM goes through a
//! [`CommandRunner`]: a shell command in, its stdout out.

pub mod error;
pub mod ssh;

use std::sync::Arc;

use async_trait::async_trait;

pub use error::{RemoteError, Result};
pub use ssh::{SshRunner, SshTarget};

/// A channel able to run shell commands somewhere.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `command`, returning its stdout.
    ///
    /// A non-zero exit status is reported as [`RemoteError::CommandFailed`]
    /// carrying both output streams.
    async fn execute(&self, command: &str) -> Result<String>;
}

#[async_trait]
impl<R: CommandRunner + ?Sized> CommandRunner for Arc<R> {
    async fn execute(&self, command: &str) -> Result<String> {
        (**self).execute(command).await
    }
}
