//! Minimal CSV table used for chunk inputs and query results.
//!
//! Chunk and result files are small, flat, comma-separated tables with a
//! header row. Double-quoted fields (with `""` escapes) are supported; embedded
//! newlines are not.

use std::fmt::Write as _;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CsvTable {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl CsvTable {
    /// Parse CSV text. Blank lines are skipped; rows shorter than the header
    /// are padded with empty fields.
    pub fn parse(text: &str) -> Result<Self> {
        let mut lines = text
            .lines()
            .map(|l| l.trim_end_matches('\r'))
            .filter(|l| !l.trim().is_empty());

        let header: Vec<String> = match lines.next() {
            Some(line) => split_line(line)
                .into_iter()
                .map(|h| h.trim().to_string())
                .collect(),
            None => return Ok(Self::default()),
        };

        let mut rows = Vec::new();
        for (idx, line) in lines.enumerate() {
            let mut fields = split_line(line);
            if fields.len() > header.len() {
                return Err(Error::InvalidInput(format!(
                    "line {}: {} fields, header has {}",
                    idx + 2,
                    fields.len(),
                    header.len()
                )));
            }
            fields.resize(header.len(), String::new());
            rows.push(fields);
        }

        Ok(Self { header, rows })
    }

    /// Index of a column, matched case-insensitively.
    pub fn column(&self, name: &str) -> Option<usize> {
        self.header.iter().position(|h| h.eq_ignore_ascii_case(name))
    }

    pub fn require_column(&self, name: &str) -> Result<usize> {
        self.column(name)
            .ok_or_else(|| Error::InvalidInput(format!("missing column {name:?}")))
    }

    /// Numeric value of a cell; empty or non-numeric cells are `None`.
    pub fn number(&self, row: usize, col: usize) -> Option<f64> {
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .and_then(|v| v.trim().parse::<f64>().ok())
            .filter(|v| !v.is_nan())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Render back to CSV text with a trailing newline.
    pub fn to_csv(&self) -> String {
        let mut out = String::new();
        write_line(&mut out, &self.header);
        for row in &self.rows {
            write_line(&mut out, row);
        }
        out
    }
}

fn split_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                field.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => fields.push(std::mem::take(&mut field)),
            _ => field.push(c),
        }
    }
    fields.push(field);
    fields
}

fn write_line(out: &mut String, fields: &[String]) {
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        if field.contains([',', '"', '\n']) {
            let _ = write!(out, "\"{}\"", field.replace('"', "\"\""));
        } else {
            out.push_str(field);
        }
    }
    out.push('\n');
}
