//! TAP endpoint configuration.
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `VASCO_TAP_URL` | IRSA TAP | Service base URL (`/async`, `/sync` appended) |
//! | `VASCO_TAP_QUERY` | NEOWISE-SE cone match | ADQL text |
//! | `VASCO_TAP_QUERY_FILE` | unset | File holding the ADQL text (wins over `VASCO_TAP_QUERY`) |
//! | `VASCO_TAP_UPLOAD_TABLE` | `my_positions` | Name bound by `TAP_UPLOAD.<table>` |
//! | `VASCO_TAP_HTTP_TIMEOUT_SECS` | `60` | Per-request timeout on the async endpoint |
//! | `VASCO_TAP_SYNC_TIMEOUT_SECS` | `1800` | Timeout of the synchronous fallback |

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use vasco_core::{defaults, Error, Result};

/// Default ADQL: every NEOWISE-SE detection within 5" of an uploaded position.
pub const DEFAULT_QUERY: &str = "SELECT u.row_id, u.ra AS in_ra, u.dec AS in_dec, \
n.ra, n.dec, n.cntr, n.mjd, n.w1snr, n.w2snr, n.qual_frame, n.qi_fact, n.saa_sep, n.moon_masked, \
DISTANCE(POINT('ICRS', u.ra, u.dec), POINT('ICRS', n.ra, n.dec)) AS sep_deg \
FROM neowiser_p1bs_psd AS n, TAP_UPLOAD.my_positions AS u \
WHERE CONTAINS(POINT('ICRS', n.ra, n.dec), CIRCLE('ICRS', u.ra, u.dec, 5.0/3600.0)) = 1";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TapConfig {
    /// Service base URL, without the `/async` or `/sync` suffix.
    pub base_url: String,
    /// ADQL query text.
    pub query: String,
    /// Optional file the query is read from; takes precedence over `query`.
    pub query_file: Option<PathBuf>,
    /// Upload table name referenced as `TAP_UPLOAD.<upload_table>`.
    pub upload_table: String,
    pub http_timeout_secs: u64,
    pub sync_timeout_secs: u64,
}

impl Default for TapConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::TAP_URL.to_string(),
            query: DEFAULT_QUERY.to_string(),
            query_file: None,
            upload_table: defaults::UPLOAD_TABLE.to_string(),
            http_timeout_secs: defaults::HTTP_TIMEOUT_SECS,
            sync_timeout_secs: defaults::SYNC_TIMEOUT_SECS,
        }
    }
}

impl TapConfig {
    /// Create config from environment variables (with defaults).
    pub fn from_env() -> Result<Self> {
        let d = Self::default();
        let parse_secs = |key: &str, default: u64| {
            std::env::var(key)
                .ok()
                .and_then(|v| v.trim().parse::<u64>().ok())
                .unwrap_or(default)
        };

        let config = Self {
            base_url: std::env::var("VASCO_TAP_URL").unwrap_or(d.base_url),
            query: std::env::var("VASCO_TAP_QUERY").unwrap_or(d.query),
            query_file: std::env::var("VASCO_TAP_QUERY_FILE").ok().map(PathBuf::from),
            upload_table: std::env::var("VASCO_TAP_UPLOAD_TABLE").unwrap_or(d.upload_table),
            http_timeout_secs: parse_secs("VASCO_TAP_HTTP_TIMEOUT_SECS", d.http_timeout_secs),
            sync_timeout_secs: parse_secs("VASCO_TAP_SYNC_TIMEOUT_SECS", d.sync_timeout_secs),
        };
        config.resolved()
    }

    /// Parse the `[tap]` table of a TOML document. Relative `query_file`
    /// paths are resolved against `base_dir`.
    pub fn from_toml_str(content: &str, base_dir: &Path) -> Result<Self> {
        #[derive(Deserialize)]
        struct Root {
            #[serde(default)]
            tap: TapConfig,
        }

        let mut root: Root = toml::from_str(content)?;
        if let Some(file) = root.tap.query_file.take() {
            root.tap.query_file = Some(if file.is_relative() {
                base_dir.join(file)
            } else {
                file
            });
        }
        root.tap.resolved()
    }

    /// Load `query_file` into `query` and validate.
    fn resolved(mut self) -> Result<Self> {
        if let Some(ref file) = self.query_file {
            debug!(path = %file.display(), "Loading ADQL query from file");
            self.query = std::fs::read_to_string(file).map_err(|e| {
                Error::Config(format!("cannot read query file {}: {e}", file.display()))
            })?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(Error::Config(format!(
                "TAP base_url must start with http:// or https://, got: {}",
                self.base_url
            )));
        }
        if self.query.trim().is_empty() {
            return Err(Error::Config("TAP query cannot be empty".into()));
        }
        if self.upload_table.is_empty()
            || !self
                .upload_table
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(Error::Config(format!(
                "upload_table must be a plain identifier, got: {:?}",
                self.upload_table
            )));
        }
        if self.http_timeout_secs == 0 || self.sync_timeout_secs == 0 {
            return Err(Error::Config("TAP timeouts must be positive".into()));
        }
        Ok(())
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = query.into();
        self
    }

    pub fn with_http_timeout(mut self, secs: u64) -> Self {
        self.http_timeout_secs = secs;
        self
    }

    pub(crate) fn async_url(&self) -> String {
        format!("{}/async", self.base_url.trim_end_matches('/'))
    }

    pub(crate) fn sync_url(&self) -> String {
        format!("{}/sync", self.base_url.trim_end_matches('/'))
    }
}
