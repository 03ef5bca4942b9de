//! TAP/UWS implementation of the remote job service.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response, StatusCode};
use tracing::{debug, info, instrument, warn};

use vasco_core::error::is_transient_status;
use vasco_core::{ChunkUnit, Error, JobHandle, JobPhase, JobService, Result};

use crate::config::TapConfig;
use crate::votable::positions_to_votable;

/// Longest error document kept for diagnostics.
const MAX_ERROR_DETAIL: usize = 2000;

/// Client for an IVOA TAP service using UWS async jobs.
pub struct TapClient {
    client: Client,
    sync_client: Client,
    config: TapConfig,
}

impl TapClient {
    pub fn new(config: TapConfig) -> Result<Self> {
        config.validate()?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {e}")))?;
        let sync_client = Client::builder()
            .timeout(Duration::from_secs(config.sync_timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {e}")))?;

        info!(
            base_url = %config.base_url,
            upload_table = %config.upload_table,
            "Initializing TAP client"
        );

        Ok(Self {
            client,
            sync_client,
            config,
        })
    }

    pub fn config(&self) -> &TapConfig {
        &self.config
    }

    /// Query parameters shared by the async and sync endpoints.
    async fn query_form(&self, chunk: &ChunkUnit) -> Result<Form> {
        let csv = tokio::fs::read_to_string(chunk.input()).await?;
        let votable = positions_to_votable(&csv, &self.config.upload_table)?;
        let table = &self.config.upload_table;

        let part = Part::bytes(votable.into_bytes())
            .file_name(format!("{}.vot", chunk.chunk_id()))
            .mime_str("application/x-votable+xml")
            .map_err(|e| Error::Request(e.to_string()))?;

        Ok(Form::new()
            .text("REQUEST", "doQuery")
            .text("LANG", "ADQL")
            .text("RESPONSEFORMAT", "csv")
            .text("QUERY", self.config.query.clone())
            .text("UPLOAD", format!("{table},param:{table}"))
            .part(table.clone(), part))
    }

    async fn set_phase(&self, handle: &JobHandle, phase: &str) -> Result<()> {
        let url = format!("{}/phase", handle.as_str());
        let resp = self
            .client
            .post(&url)
            .form(&[("PHASE", phase)])
            .send()
            .await?;
        check_status(resp, &url).await?;
        Ok(())
    }
}

/// Map a non-success response to the error taxonomy.
async fn check_status(resp: Response, url: &str) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    if status == StatusCode::NOT_FOUND {
        return Err(Error::JobNotFound(url.to_string()));
    }
    if is_transient_status(status) {
        return Err(Error::TransientNetwork(format!("{status} from {url}")));
    }
    let body = resp.text().await.unwrap_or_default();
    Err(Error::Request(format!(
        "{status} from {url}: {}",
        truncate(body.trim(), 200)
    )))
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[async_trait]
impl JobService for TapClient {
    #[instrument(skip(self, chunk), fields(chunk_id = %chunk.chunk_id()))]
    async fn submit(&self, chunk: &ChunkUnit) -> Result<JobHandle> {
        let async_url = self.config.async_url();
        let form = self.query_form(chunk).await?;

        // The service answers 303 → job URL; reqwest follows it, so the final
        // response URL is the job.
        let resp = self.client.post(&async_url).multipart(form).send().await?;
        let resp = check_status(resp, &async_url).await?;
        let job_url = resp.url().as_str().trim_end_matches('/').to_string();
        if job_url == async_url.trim_end_matches('/') {
            return Err(Error::Request(format!(
                "{async_url} did not redirect to a job URL"
            )));
        }

        let handle = JobHandle::new(job_url);
        self.set_phase(&handle, "RUN").await?;
        debug!(job_url = %handle, "Job created and started");
        Ok(handle)
    }

    async fn phase(&self, handle: &JobHandle) -> Result<JobPhase> {
        let url = format!("{}/phase", handle.as_str());
        let resp = self.client.get(&url).send().await?;
        let text = check_status(resp, &url).await?.text().await?;
        Ok(JobPhase::parse(&text))
    }

    #[instrument(skip(self), fields(job_url = %handle))]
    async fn fetch_result(&self, handle: &JobHandle) -> Result<Vec<u8>> {
        let url = format!("{}/results/result", handle.as_str());
        let resp = self.client.get(&url).send().await?;
        let bytes = check_status(resp, &url).await?.bytes().await?;
        debug!(bytes = bytes.len(), "Downloaded job result");
        Ok(bytes.to_vec())
    }

    async fn error_detail(&self, handle: &JobHandle) -> Result<String> {
        let url = format!("{}/error", handle.as_str());
        let resp = self.client.get(&url).send().await?;
        let text = check_status(resp, &url).await?.text().await?;
        Ok(truncate(text.trim(), MAX_ERROR_DETAIL).to_string())
    }

    async fn cancel(&self, handle: &JobHandle) -> Result<()> {
        self.set_phase(handle, "ABORT").await
    }

    async fn delete(&self, handle: &JobHandle) -> Result<()> {
        let url = handle.as_str().to_string();
        let resp = self.client.delete(&url).send().await?;
        match check_status(resp, &url).await {
            Ok(_) | Err(Error::JobNotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self, chunk), fields(chunk_id = %chunk.chunk_id()))]
    async fn query_sync(&self, chunk: &ChunkUnit) -> Result<Vec<u8>> {
        let sync_url = self.config.sync_url();
        let form = self.query_form(chunk).await?;
        warn!("Running chunk query on synchronous endpoint");

        let resp = self.sync_client.post(&sync_url).multipart(form).send().await?;
        let bytes = check_status(resp, &sync_url).await?.bytes().await?;
        Ok(bytes.to_vec())
    }
}
