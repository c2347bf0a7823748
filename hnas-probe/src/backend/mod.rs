//! HNAS backend access: the management host shell, cinder services and
//! the volume files behind them.

pub mod block_dev;
pub mod client;
pub mod error;
pub mod hnas_backend;
pub mod volume;

pub use block_dev::{InstanceBlockDevTester, random_marker};
pub use client::{HnasClient, SSC_USER, ssc_command_line};
pub use error::{BackendError, Result};
pub use hnas_backend::{HnasBackend, LocatedVolume, Service};
pub use volume::{VolumeLocation, VolumeReference, find_volume_location};
