//! EVS records from `evs list`.

use serde::Serialize;

use super::error::{Result, TableError};
use super::table::{TableRow, parse_table};

/// Column holding the numeric EVS identifier
pub const EVS_ID_COLUMN: &str = "EVS ID";
/// Column holding the EVS addresses, one per physical line
pub const IP_ADDRESS_COLUMN: &str = "IP Address";

/// An EVS (virtual server on the array) as listed by SSC.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvsRecord {
    /// EVS id, used with `vn <id>` to switch context in SSC
    pub id: String,
    /// Every address assigned to the EVS
    pub ip_addresses: Vec<String>,
    /// The full row, for columns not modelled here
    pub row: TableRow,
}

impl EvsRecord {
    pub fn from_row(row: &TableRow) -> Result<Self> {
        let id = row
            .text(EVS_ID_COLUMN)
            .ok_or_else(|| TableError::MissingColumn(EVS_ID_COLUMN.to_string()))?
            .to_string();
        let ip_addresses = row
            .get(IP_ADDRESS_COLUMN)
            .ok_or_else(|| TableError::MissingColumn(IP_ADDRESS_COLUMN.to_string()))?
            .iter()
            .filter(|ip| !ip.is_empty())
            .map(str::to_string)
            .collect();

        Ok(Self {
            id,
            ip_addresses,
            row: row.clone(),
        })
    }

    pub fn has_ip(&self, ip: &str) -> bool {
        self.ip_addresses.iter().any(|candidate| candidate == ip)
    }
}

/// Parse `evs list` output.
pub fn parse_evs_list(text: &str) -> Result<Vec<EvsRecord>> {
    parse_table(text)?.iter().map(EvsRecord::from_row).collect()
}
