//! Fixed-width table parser for SSC listings.
//!
//! Commands such as `evs list` print tables shaped like this:
//!
//! ```text
//! Node  EVS ID  Label     IP Address
//! ----  ------  --------  ------------
//! 1     1       evs-nfs   172.24.49.21
//!                         172.24.49.22
//! ```
//!
//! The dash line fixes the column layout: every run of dashes is one column
//! of exactly that width, whatever sits between runs must appear verbatim on
//! every line, and the last column runs to end of line. A line whose first
//! column is blank continues the row above it.

use regex::Regex;
use serde::Serialize;
use serde::ser::{SerializeMap, Serializer};

use super::error::{Result, TableError};

/// Value of one column within a logical row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Cell {
    /// Value from a single physical line
    Single(String),
    /// Values accumulated from continuation lines, in source order
    Multi(Vec<String>),
}

impl Cell {
    pub fn is_empty(&self) -> bool {
        match self {
            Cell::Single(value) => value.is_empty(),
            Cell::Multi(values) => values.is_empty(),
        }
    }

    /// First value of the cell (the only one for `Single`).
    pub fn first(&self) -> &str {
        match self {
            Cell::Single(value) => value,
            Cell::Multi(values) => values.first().map(String::as_str).unwrap_or(""),
        }
    }

    /// All values of the cell in source order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        let values = match self {
            Cell::Single(value) => std::slice::from_ref(value),
            Cell::Multi(values) => values.as_slice(),
        };
        values.iter().map(String::as_str)
    }

    /// Add a value from a continuation line, promoting to `Multi` as needed.
    fn push(&mut self, value: String) {
        if self.is_empty() {
            *self = Cell::Single(value);
            return;
        }
        match self {
            Cell::Single(existing) => {
                let existing = std::mem::take(existing);
                *self = Cell::Multi(vec![existing, value]);
            }
            Cell::Multi(values) => values.push(value),
        }
    }
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Cell::Single(value.to_string())
    }
}

/// One logical table row: column names mapped to cells, in column order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRow {
    cells: Vec<(String, Cell)>,
}

impl TableRow {
    fn new(names: &[String], values: Vec<String>) -> Self {
        let cells = names
            .iter()
            .cloned()
            .zip(values.into_iter().map(Cell::Single))
            .collect();
        Self { cells }
    }

    /// Merge a continuation line into this row.
    fn continue_with(&mut self, values: Vec<String>) {
        for ((_, cell), value) in self.cells.iter_mut().zip(values) {
            if !value.is_empty() {
                cell.push(value);
            }
        }
    }

    pub fn get(&self, column: &str) -> Option<&Cell> {
        self.cells
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, cell)| cell)
    }

    /// First value in `column`, if the column exists.
    pub fn text(&self, column: &str) -> Option<&str> {
        self.get(column).map(Cell::first)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.cells.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Cell)> {
        self.cells.iter().map(|(name, cell)| (name.as_str(), cell))
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

impl Serialize for TableRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.cells.len()))?;
        for (name, cell) in &self.cells {
            map.serialize_entry(name, cell)?;
        }
        map.end()
    }
}

/// A column derived from the separator line.
///
/// Offsets count characters, not bytes. `end` is `None` for the last column,
/// which extends to end of line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub start: usize,
    pub end: Option<usize>,
}

/// Column layout of one table plus the line pattern built from it.
#[derive(Debug, Clone)]
pub struct ColumnSpec {
    columns: Vec<Column>,
    names: Vec<String>,
    pattern: Regex,
}

impl ColumnSpec {
    /// Derive the layout from a header line and the dash line below it.
    pub fn derive(header: &str, separator: &str) -> Result<Self> {
        Self::derive_at(header, separator, 1)
    }

    /// `header_line` is the 1-based line number reported when the header
    /// does not fit.
    fn derive_at(header: &str, separator: &str, header_line: usize) -> Result<Self> {
        let separator = separator.trim_end();
        let mut pattern = String::from("^");
        let mut spans: Vec<(usize, Option<usize>)> = Vec::new();
        let mut run_start: Option<usize> = None;

        for (idx, c) in separator.chars().enumerate() {
            if c == '-' {
                if run_start.is_none() {
                    run_start = Some(idx);
                }
                continue;
            }
            if let Some(start) = run_start.take() {
                pattern.push_str(&format!("(.{{{}}})", idx - start));
                spans.push((start, Some(idx)));
            }
            pattern.push_str(&regex::escape(c.encode_utf8(&mut [0; 4])));
        }
        if let Some(start) = run_start {
            pattern.push_str("(.*)");
            spans.push((start, None));
        }
        if spans.is_empty() {
            return Err(TableError::MissingSeparator);
        }

        let pattern = Regex::new(&pattern)?;
        let names = split_with(&pattern, header)
            .ok_or_else(|| TableError::Malformed {
                line: header_line,
                text: header.to_string(),
            })?;
        let columns = names
            .iter()
            .zip(spans)
            .map(|(name, (start, end))| Column {
                name: name.clone(),
                start,
                end,
            })
            .collect();

        Ok(Self {
            columns,
            names,
            pattern,
        })
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Trimmed column values of `line`, or `None` if it does not fit.
    pub fn split(&self, line: &str) -> Option<Vec<String>> {
        split_with(&self.pattern, line)
    }
}

fn split_with(pattern: &Regex, line: &str) -> Option<Vec<String>> {
    let caps = pattern.captures(line)?;
    Some(
        caps.iter()
            .skip(1)
            .map(|m| m.map_or("", |m| m.as_str()).trim().to_string())
            .collect(),
    )
}

/// A separator is made only of dashes and spaces, and is not blank.
fn is_separator(line: &str) -> bool {
    !line.trim().is_empty() && line.chars().all(|c| c == '-' || c == ' ')
}

/// Parse SSC table output into rows, in source order.
pub fn parse_table(text: &str) -> Result<Vec<TableRow>> {
    let lines: Vec<&str> = text.lines().collect();
    let separator_idx = lines
        .iter()
        .position(|line| is_separator(line))
        .ok_or(TableError::MissingSeparator)?;
    if separator_idx == 0 {
        return Err(TableError::MissingHeader);
    }

    let spec = ColumnSpec::derive_at(lines[separator_idx - 1], lines[separator_idx], separator_idx)?;
    let mut rows: Vec<TableRow> = Vec::new();

    for (idx, line) in lines.iter().enumerate().skip(separator_idx + 1) {
        if line.trim().is_empty() {
            continue;
        }
        let values = spec.split(line).ok_or_else(|| TableError::Malformed {
            line: idx + 1,
            text: line.to_string(),
        })?;

        if values.first().is_some_and(|first| first.is_empty()) {
            rows.last_mut()
                .ok_or(TableError::OrphanContinuation { line: idx + 1 })?
                .continue_with(values);
        } else {
            rows.push(TableRow::new(spec.names(), values));
        }
    }

    Ok(rows)
}
