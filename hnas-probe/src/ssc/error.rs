use thiserror::Error;

/// Failure to turn SSC table output into rows.
///
/// Parsing is all-or-nothing: any of these aborts the whole table.
#[derive(Error, Debug)]
pub enum TableError {
    #[error("no dash separator line found in table output")]
    MissingSeparator,

    #[error("separator line has no header line above it")]
    MissingHeader,

    #[error("line {line} does not fit the column layout: '{text}'")]
    Malformed { line: usize, text: String },

    #[error("continuation on line {line} has no row to continue")]
    OrphanContinuation { line: usize },

    #[error("table row has no '{0}' column")]
    MissingColumn(String),

    #[error("invalid column pattern: {0}")]
    Pattern(#[from] regex::Error),
}

pub type Result<T> = std::result::Result<T, TableError>;
