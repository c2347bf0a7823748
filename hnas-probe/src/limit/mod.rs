//! Exercising the array's SSC connection limit.
//!
//! The tester holds SSC sessions open until the driver starts failing to
//! connect, which is detected by watching the cinder volume log.

pub mod error;
pub mod log_watch;
pub mod tester;

pub use error::{LimitError, Result};
pub use log_watch::{LogWatchOptions, LogWatcher};
pub use tester::{LimitTestTiming, SSC_CONNECTION_ERROR, SSC_HOLD_COMMAND, SscLimitTester};
