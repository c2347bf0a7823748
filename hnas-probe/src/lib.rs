//! HNAS Backend Probe Library
//!
//! Helpers for checking what a Hitachi NAS array actually holds while the
//! cinder HNAS driver is being exercised: running commands on the array's
//! management host, parsing SSC listings, locating volume files and
//! polling until the backend catches up with the cloud API.
//!
//! The library is split into several modules:
//! - `ssc`: parsing of SSC fixed-width tables and EVS listings
//! - `retry`: polling a probe until it reports the expected state
//! - `remote`: command execution over SSH
//! - `backend`: HNAS backends, volume file references and guest block devices
//! - `limit`: SSC connection limit tester and log watcher
//! - `config`: probe configuration
//! - `metrics`: Prometheus metrics collection

pub mod backend;
pub mod config;
pub mod limit;
pub mod metrics;
pub mod remote;
pub mod retry;
pub mod ssc;

pub use backend::{BackendError, HnasBackend, HnasClient, VolumeReference};
pub use config::HnasConfig;
pub use limit::{LogWatcher, SscLimitTester};
pub use remote::{CommandRunner, SshRunner, SshTarget};
pub use retry::{RetryOutcome, RetryPolicy, retry};
pub use ssc::{TableRow, parse_table};
