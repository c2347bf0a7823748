//! Parsing of SSC output.
//!
//! SSC is the HNAS administrative shell, reached over SSH. It has no
//! structured output mode, so listings come back as fixed-width text tables.

pub mod error;
pub mod evs;
pub mod table;

pub use error::{Result, TableError};
pub use evs::{EVS_ID_COLUMN, EvsRecord, IP_ADDRESS_COLUMN, parse_evs_list};
pub use table::{Cell, Column, ColumnSpec, TableRow, parse_table};
