//! # vasco-cli
//!
//! Command-line driver for chunked TAP orchestration. The `vasco-tap`
//! binary parses [`args::Cli`], loads [`settings::Settings`] once and hands
//! the subcommand to [`commands::execute`].
//!
//! Exit codes: `0` success, `1` a chunk failed, `2` invalid usage or no
//! matching chunks, `130` stopped by the operator.

pub mod args;
pub mod commands;
pub mod settings;

pub use args::{Cli, Command};
pub use commands::{execute, exit_code_for, EXIT_FAILURE, EXIT_SUCCESS};
pub use settings::Settings;
