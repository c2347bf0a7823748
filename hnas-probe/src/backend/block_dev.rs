//! Block device checks run inside a guest VM.
//!
//! Used to write data through an attached volume and read it back on the
//! array, proving the guest and the array see the same bytes.

use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use super::error::{BackendError, Result};
use crate::remote::CommandRunner;

const SECTOR_SIZE: u64 = 512;
const MIB: u64 = 1024 * 1024;

/// `prefix` followed by a random suffix, for data that must be recognisable.
pub fn random_marker(prefix: &str) -> String {
    format!("{}-{}", prefix.trim_end_matches('-'), Uuid::new_v4().simple())
}

fn check_data(data: &str) -> Result<()> {
    if data.contains('\'') || data.contains('\n') {
        return Err(BackendError::InvalidArgument(
            "data written to a device cannot contain quotes or newlines".to_string(),
        ));
    }
    Ok(())
}

/// A block device of a guest VM, reached through a shell on the guest.
pub struct InstanceBlockDevTester {
    runner: Arc<dyn CommandRunner>,
    dev_name: String,
    dev_path: String,
}

impl InstanceBlockDevTester {
    /// `dev_name` is the kernel name, e.g. `vdb`.
    pub fn new(runner: Arc<dyn CommandRunner>, dev_name: &str) -> Self {
        Self {
            runner,
            dev_name: dev_name.to_string(),
            dev_path: format!("/dev/{}", dev_name),
        }
    }

    pub fn dev_path(&self) -> &str {
        &self.dev_path
    }

    pub async fn number_of_sectors(&self) -> Result<u64> {
        let output = self
            .runner
            .execute(&format!("cat /sys/block/{}/size", self.dev_name))
            .await?;
        output
            .trim()
            .parse::<u64>()
            .map_err(|_| BackendError::InvalidOutput(format!("invalid sector count: {}", output.trim())))
    }

    pub async fn size_mib(&self) -> Result<u64> {
        Ok(self.number_of_sectors().await? * SECTOR_SIZE / MIB)
    }

    /// Write `data` at offset zero and flush.
    pub async fn write_to_top(&self, data: &str) -> Result<String> {
        check_data(data)?;
        let commands = [
            format!("echo '{}' | sudo dd of={}", data, self.dev_path),
            "sync".to_string(),
        ];
        debug!(device = %self.dev_path, bytes = data.len(), "Writing to top of device");
        Ok(self.runner.execute(&commands.join(" && ")).await?)
    }

    /// Fill the first `size_mib` MiB with random data, then write `marker`
    /// right after it.
    pub async fn fill_with_random_data(&self, size_mib: u64, marker: &str) -> Result<String> {
        check_data(marker)?;
        let commands = [
            format!(
                "sudo dd if=/dev/urandom of={} bs=1M count={}",
                self.dev_path, size_mib
            ),
            format!(
                "echo '{}' |sudo dd of={} bs=1M seek={}",
                marker, self.dev_path, size_mib
            ),
            "sync".to_string(),
        ];
        debug!(device = %self.dev_path, size_mib, "Filling device with random data");
        Ok(self.runner.execute(&commands.join(" && ")).await?)
    }

    pub async fn bytes_at_offset(&self, offset_mib: u64, num_bytes: usize) -> Result<String> {
        let command = format!(
            "sudo dd if={} bs=1 skip={} count={}",
            self.dev_path,
            offset_mib * MIB,
            num_bytes
        );
        Ok(self.runner.execute(&command).await?)
    }
}
