//! Configuration loading, done once per invocation.

use std::path::Path;

use anyhow::Context;
use tracing::debug;

use vasco_core::OrchestratorConfig;
use vasco_tap::TapConfig;

/// Everything the commands are configured with.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub orchestrator: OrchestratorConfig,
    pub tap: TapConfig,
}

impl Settings {
    /// Read the TOML file at `path`, or fall back to `VASCO_*` variables.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let settings = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config file {}", path.display()))?;
                let base_dir = path.parent().unwrap_or(Path::new("."));
                debug!(path = %path.display(), "Loading configuration file");
                Self {
                    orchestrator: OrchestratorConfig::from_toml_str(&content)
                        .with_context(|| format!("invalid [orchestrator] in {}", path.display()))?,
                    tap: TapConfig::from_toml_str(&content, base_dir)
                        .with_context(|| format!("invalid [tap] in {}", path.display()))?,
                }
            }
            None => {
                let orchestrator = OrchestratorConfig::from_env();
                orchestrator
                    .validate()
                    .context("invalid VASCO_* orchestrator settings")?;
                Self {
                    orchestrator,
                    tap: TapConfig::from_env().context("invalid VASCO_TAP_* settings")?,
                }
            }
        };
        Ok(settings)
    }

    /// Apply a command-line parallelism override.
    pub fn with_parallelism(mut self, parallelism: Option<usize>) -> Self {
        if let Some(n) = parallelism {
            self.orchestrator = self.orchestrator.with_parallelism(n.max(1));
        }
        self
    }
}
