//! Raw result → finalized result transforms.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, instrument};

use vasco_core::{defaults, CsvTable, Error, Postprocessor, Result};

/// Keeps the closest match per `row_id` and records its separation in a
/// `sep_arcsec` column.
///
/// Separation is taken from `sep_arcsec`, else `sep_deg × 3600`, else the
/// great-circle distance between `in_ra/in_dec` and `ra/dec`. Rows with no
/// usable separation get a sentinel so they still group but never win
/// against a measured match.
#[derive(Debug, Default, Clone, Copy)]
pub struct ClosestPerRow;

impl ClosestPerRow {
    pub fn transform(&self, raw: &str) -> Result<String> {
        let table = CsvTable::parse(raw)?;
        let id_col = table.require_column("row_id")?;
        let source = SeparationSource::detect(&table);

        let mut best: HashMap<&str, (usize, f64)> = HashMap::new();
        for (idx, row) in table.rows.iter().enumerate() {
            let sep = source
                .arcsec(&table, idx)
                .unwrap_or(defaults::SEPARATION_SENTINEL_ARCSEC);
            best.entry(row[id_col].as_str())
                .and_modify(|(best_idx, best_sep)| {
                    if sep < *best_sep {
                        *best_idx = idx;
                        *best_sep = sep;
                    }
                })
                .or_insert((idx, sep));
        }

        let mut winners: Vec<(&str, usize, f64)> = best
            .into_iter()
            .map(|(id, (idx, sep))| (id, idx, sep))
            .collect();
        winners.sort_by(|a, b| a.0.cmp(b.0).then(a.1.cmp(&b.1)));

        let mut header = table.header.clone();
        let sep_col = match table.column("sep_arcsec") {
            Some(col) => col,
            None => {
                header.push("sep_arcsec".to_string());
                header.len() - 1
            }
        };

        let rows = winners
            .into_iter()
            .map(|(_, idx, sep)| {
                let mut row = table.rows[idx].clone();
                row.resize(header.len(), String::new());
                row[sep_col] = format!("{sep:.6}");
                row
            })
            .collect();

        Ok(CsvTable { header, rows }.to_csv())
    }
}

#[async_trait]
impl Postprocessor for ClosestPerRow {
    fn name(&self) -> &str {
        "closest-per-row"
    }

    async fn process(&self, raw: &Path, out: &Path) -> Result<()> {
        let content = tokio::fs::read_to_string(raw).await?;
        let csv = self
            .transform(&content)
            .map_err(|e| Error::Postprocess(format!("{}: {e}", raw.display())))?;
        tokio::fs::write(out, csv).await?;
        Ok(())
    }
}

enum SeparationSource {
    Arcsec(usize),
    Degrees(usize),
    Positions {
        in_ra: usize,
        in_dec: usize,
        ra: usize,
        dec: usize,
    },
    Missing,
}

impl SeparationSource {
    fn detect(table: &CsvTable) -> Self {
        if let Some(col) = table.column("sep_arcsec") {
            return Self::Arcsec(col);
        }
        if let Some(col) = table.column("sep_deg") {
            return Self::Degrees(col);
        }
        match (
            table.column("in_ra"),
            table.column("in_dec"),
            table.column("ra"),
            table.column("dec"),
        ) {
            (Some(in_ra), Some(in_dec), Some(ra), Some(dec)) => Self::Positions {
                in_ra,
                in_dec,
                ra,
                dec,
            },
            _ => Self::Missing,
        }
    }

    fn arcsec(&self, table: &CsvTable, row: usize) -> Option<f64> {
        match *self {
            Self::Arcsec(col) => table.number(row, col),
            Self::Degrees(col) => table.number(row, col).map(|d| d * 3600.0),
            Self::Positions {
                in_ra,
                in_dec,
                ra,
                dec,
            } => Some(separation_arcsec(
                table.number(row, in_ra)?,
                table.number(row, in_dec)?,
                table.number(row, ra)?,
                table.number(row, dec)?,
            )),
            Self::Missing => None,
        }
    }
}

/// Great-circle separation in arcseconds between two positions in degrees.
pub fn separation_arcsec(ra1: f64, dec1: f64, ra2: f64, dec2: f64) -> f64 {
    let (ra1, dec1, ra2, dec2) = (
        ra1.to_radians(),
        dec1.to_radians(),
        ra2.to_radians(),
        dec2.to_radians(),
    );
    let cos = dec1.sin() * dec2.sin() + dec1.cos() * dec2.cos() * (ra1 - ra2).cos();
    cos.clamp(-1.0, 1.0).acos().to_degrees() * 3600.0
}

/// Runs an external program as `<program> [args..] <raw> <out>`.
#[derive(Debug, Clone)]
pub struct CommandPostprocessor {
    program: String,
    args: Vec<String>,
    label: String,
}

impl CommandPostprocessor {
    /// Parse a whitespace-separated command line.
    pub fn from_command_line(command: &str) -> Result<Self> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| Error::Config("postprocess command is empty".into()))?;
        Ok(Self {
            program,
            args: parts.collect(),
            label: command.trim().to_string(),
        })
    }
}

#[async_trait]
impl Postprocessor for CommandPostprocessor {
    fn name(&self) -> &str {
        &self.label
    }

    #[instrument(skip_all, fields(command = %self.label))]
    async fn process(&self, raw: &Path, out: &Path) -> Result<()> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(raw)
            .arg(out)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::Postprocess(format!("cannot run {}: {e}", self.program)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Postprocess(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }
        if !out.exists() {
            return Err(Error::Postprocess(format!(
                "{} succeeded but wrote no output",
                self.program
            )));
        }
        debug!("External postprocess finished");
        Ok(())
    }
}
