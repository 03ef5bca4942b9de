//! Command-line arguments.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "vasco-tap")]
#[command(author, version, about = "Chunked asynchronous TAP job orchestration")]
#[command(propagate_version = true)]
pub struct Cli {
    /// TOML file with [orchestrator] and [tap] tables (default: VASCO_* env)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run one chunk to a finalized result
    SubmitOne {
        /// Input positions chunk (CSV)
        chunk: PathBuf,

        /// Ignore persisted job metadata and submit a new job
        #[arg(long)]
        fresh: bool,
    },

    /// Run every chunk matching a glob with bounded parallelism
    SubmitBatch {
        /// Glob for input chunks, e.g. 'chunks/positions_chunk_*.csv'
        glob: String,

        /// Chunks processed concurrently (default: from configuration)
        #[arg(short, long)]
        parallelism: Option<usize>,
    },

    /// Classify chunks from local files only
    Status {
        /// Glob for input chunks
        glob: String,
    },

    /// Classify chunks, querying the remote phase of recorded jobs
    Healthcheck {
        /// Glob for input chunks
        glob: String,

        /// Print suggested commands for chunks needing action
        #[arg(long)]
        emit_remediation: bool,

        /// Write a per-chunk CSV report
        #[arg(long)]
        out_csv: Option<PathBuf>,

        /// Write a Markdown summary
        #[arg(long)]
        out_md: Option<PathBuf>,
    },

    /// Build the finalized result from an existing raw result
    Finalize {
        /// Input positions chunk (CSV)
        chunk: PathBuf,
    },

    /// Merge finalized results into one CSV
    Collect {
        /// Glob for input chunks
        glob: String,

        /// Output CSV path
        #[arg(short, long)]
        output: PathBuf,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_submit_one() {
        let cli = Cli::try_parse_from(["vasco-tap", "submit-one", "c.csv", "--fresh"]).unwrap();
        match cli.command {
            Command::SubmitOne { chunk, fresh } => {
                assert_eq!(chunk, PathBuf::from("c.csv"));
                assert!(fresh);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_global_config_after_subcommand() {
        let cli = Cli::try_parse_from([
            "vasco-tap",
            "submit-batch",
            "chunks/*.csv",
            "--parallelism",
            "3",
            "--config",
            "run.toml",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("run.toml")));
        assert!(matches!(
            cli.command,
            Command::SubmitBatch { parallelism: Some(3), .. }
        ));
    }

    #[test]
    fn test_healthcheck_flags() {
        let cli = Cli::try_parse_from([
            "vasco-tap",
            "healthcheck",
            "chunks/*.csv",
            "--emit-remediation",
            "--out-csv",
            "h.csv",
        ])
        .unwrap();
        match cli.command {
            Command::Healthcheck {
                emit_remediation,
                out_csv,
                out_md,
                ..
            } => {
                assert!(emit_remediation);
                assert_eq!(out_csv, Some(PathBuf::from("h.csv")));
                assert!(out_md.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_collect_requires_output() {
        assert!(Cli::try_parse_from(["vasco-tap", "collect", "chunks/*.csv"]).is_err());
    }
}
