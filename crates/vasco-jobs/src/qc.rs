//! Diagnostic summary of a finalized chunk result.

use std::fmt;
use std::path::Path;

use vasco_core::{defaults, CsvTable, Result, ResultSummarizer};

use crate::postprocess::separation_arcsec;

/// Computed QC figures for one finalized result.
#[derive(Debug, Clone, PartialEq)]
pub struct QcReport {
    pub file: String,
    pub total_rows: usize,
    pub matches: usize,
    pub median_sep_arcsec: Option<f64>,
    pub p95_sep_arcsec: Option<f64>,
    pub w1_snr_ok: usize,
    pub w2_snr_ok: usize,
    pub any_snr_ok: usize,
    pub qual_frame_ok: usize,
    pub qi_fact_ok: usize,
    pub saa_sep_ok: usize,
    pub moon_unmasked: usize,
}

impl QcReport {
    pub fn from_table(file: impl Into<String>, table: &CsvTable) -> Self {
        let seps = separations(table);
        let mut matched: Vec<f64> = seps
            .iter()
            .flatten()
            .copied()
            .filter(|s| *s <= defaults::MATCH_RADIUS_ARCSEC)
            .collect();
        matched.sort_by(f64::total_cmp);

        let w1 = column_values(table, "w1snr");
        let w2 = column_values(table, "w2snr");
        let snr_ok = |v: Option<f64>| v.is_some_and(|x| x >= defaults::QC_MIN_SNR);

        Self {
            file: file.into(),
            total_rows: table.len(),
            matches: matched.len(),
            median_sep_arcsec: quantile(&matched, 0.5),
            p95_sep_arcsec: quantile(&matched, 0.95),
            w1_snr_ok: w1.iter().filter(|v| snr_ok(**v)).count(),
            w2_snr_ok: w2.iter().filter(|v| snr_ok(**v)).count(),
            any_snr_ok: w1
                .iter()
                .zip(&w2)
                .filter(|(a, b)| snr_ok(**a) || snr_ok(**b))
                .count(),
            qual_frame_ok: count_positive(table, "qual_frame"),
            qi_fact_ok: count_positive(table, "qi_fact"),
            saa_sep_ok: count_positive(table, "saa_sep"),
            moon_unmasked: table
                .column("moon_masked")
                .map(|col| table.rows.iter().filter(|r| r[col].trim() == "00").count())
                .unwrap_or(0),
        }
    }

    pub fn match_rate(&self) -> f64 {
        if self.total_rows == 0 {
            0.0
        } else {
            self.matches as f64 / self.total_rows as f64
        }
    }
}

impl fmt::Display for QcReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sep = |v: Option<f64>| v.map_or_else(|| "nan".to_string(), |x| format!("{x:.3}"));
        writeln!(f, "[QC] file={}", self.file)?;
        writeln!(
            f,
            "[QC] total_rows={} matches_<={}arcsec={} match_rate={:.3}",
            self.total_rows,
            defaults::MATCH_RADIUS_ARCSEC,
            self.matches,
            self.match_rate()
        )?;
        writeln!(
            f,
            "[QC] sep_arcsec median={} p95={}",
            sep(self.median_sep_arcsec),
            sep(self.p95_sep_arcsec)
        )?;
        writeln!(
            f,
            "[QC] SNR: W1>=5={} W2>=5={} any>=5={}",
            self.w1_snr_ok, self.w2_snr_ok, self.any_snr_ok
        )?;
        writeln!(
            f,
            "[QC] flags: qual_frame>0={} qi_fact>0={} saa_sep>0={} moon_masked='00'={}",
            self.qual_frame_ok, self.qi_fact_ok, self.saa_sep_ok, self.moon_unmasked
        )
    }
}

/// [`ResultSummarizer`] producing a [`QcReport`].
#[derive(Debug, Default, Clone, Copy)]
pub struct QcSummary;

impl ResultSummarizer for QcSummary {
    fn summarize(&self, finalized: &Path) -> Result<String> {
        let content = std::fs::read_to_string(finalized)?;
        let table = CsvTable::parse(&content)?;
        Ok(QcReport::from_table(finalized.display().to_string(), &table).to_string())
    }
}

fn separations(table: &CsvTable) -> Vec<Option<f64>> {
    // An all-blank sep_arcsec column falls through to the other sources.
    let arcsec = table
        .column("sep_arcsec")
        .filter(|&col| (0..table.len()).any(|r| table.number(r, col).is_some()));
    if let Some(col) = arcsec {
        return (0..table.len()).map(|r| table.number(r, col)).collect();
    }
    if let Some(col) = table.column("sep_deg") {
        return (0..table.len())
            .map(|r| table.number(r, col).map(|d| d * 3600.0))
            .collect();
    }
    match (
        table.column("in_ra"),
        table.column("in_dec"),
        table.column("ra"),
        table.column("dec"),
    ) {
        (Some(a), Some(b), Some(c), Some(d)) => (0..table.len())
            .map(|r| {
                Some(separation_arcsec(
                    table.number(r, a)?,
                    table.number(r, b)?,
                    table.number(r, c)?,
                    table.number(r, d)?,
                ))
            })
            .collect(),
        _ => vec![None; table.len()],
    }
}

fn column_values(table: &CsvTable, name: &str) -> Vec<Option<f64>> {
    match table.column(name) {
        Some(col) => (0..table.len()).map(|r| table.number(r, col)).collect(),
        None => vec![None; table.len()],
    }
}

fn count_positive(table: &CsvTable, name: &str) -> usize {
    column_values(table, name)
        .into_iter()
        .filter(|v| v.is_some_and(|x| x > 0.0))
        .count()
}

/// Linearly interpolated quantile of sorted values.
fn quantile(sorted: &[f64], q: f64) -> Option<f64> {
    match sorted.len() {
        0 => None,
        1 => Some(sorted[0]),
        n => {
            let pos = q.clamp(0.0, 1.0) * (n - 1) as f64;
            let lo = pos.floor() as usize;
            let hi = pos.ceil() as usize;
            Some(sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64))
        }
    }
}
