//! HTTP client for seeding and polling actors.
//!
//! Wraps the coordination endpoint for the worker side of the protocol.
//! Transient connection failures are retried with exponential backoff and
//! jitter up to a configured attempt budget; once the budget is exhausted
//! the error surfaces and the caller is expected to abort the run.

use std::time::Duration;

use anyhow::Result;
use reqwest::StatusCode;

use crate::queue::Example;
use crate::server::protocol::{
    ENDPOINT_COMPLETE_AND_POP, ENDPOINT_HEARTBEAT, ENDPOINT_POP, ENDPOINT_SEED, ENDPOINT_SHUTDOWN,
    ENDPOINT_STATS, RUN_ID_HEADER, SeedRequest, StatsResponse, WORKER_ID_HEADER,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// What a poll call told the worker to do next.
#[derive(Debug, Clone)]
pub enum PopResult {
    /// Run these examples, then report back with `complete_and_pop`.
    Examples(Vec<Example>),
    /// Nothing seeded yet; poll again shortly.
    Waiting,
    /// The run is fully drained; stop polling and exit.
    Drained,
    /// Work is out with other workers; poll again.
    NoWork,
}

pub struct Client {
    http: reqwest::Client,
    base_url: String,
    run_id: String,
    worker_id: String,
    attempts: usize,
}

impl Client {
    pub fn new(base_url: &str, run_id: &str, worker_id: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            run_id: run_id.to_string(),
            worker_id: worker_id.to_string(),
            attempts: 3,
        }
    }

    pub fn with_attempts(mut self, attempts: usize) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    pub async fn seed(
        &self,
        examples: Vec<Example>,
        max_retries: u32,
        run_time_bucket_maximum: Option<f64>,
    ) -> Result<()> {
        let payload = SeedRequest {
            examples,
            max_retries: Some(max_retries),
            run_time_bucket_maximum,
        };

        let response = self.post_with_retry(ENDPOINT_SEED, &payload).await?;
        if !response.status().is_success() {
            anyhow::bail!("seed failed: {}", response.status());
        }

        Ok(())
    }

    pub async fn heartbeat(&self) -> Result<()> {
        let response = self.post_with_retry(ENDPOINT_HEARTBEAT, &()).await?;
        if !response.status().is_success() {
            anyhow::bail!("heartbeat failed: {}", response.status());
        }

        Ok(())
    }

    pub async fn pop(&self) -> Result<PopResult> {
        let response = self
            .post_with_retry(ENDPOINT_POP, &serde_json::json!([]))
            .await?;
        Self::pop_result(response).await
    }

    pub async fn complete_and_pop(&self, results: Vec<Example>) -> Result<PopResult> {
        let response = self.post_with_retry(ENDPOINT_COMPLETE_AND_POP, &results).await?;
        Self::pop_result(response).await
    }

    pub async fn stats(&self) -> Result<Option<StatsResponse>> {
        let url = format!("{}{}", self.base_url, ENDPOINT_STATS);
        let response = self.get_with_retry(&url).await?;

        match response.status() {
            StatusCode::OK => Ok(Some(response.json().await?)),
            StatusCode::NOT_FOUND => Ok(None),
            status => anyhow::bail!("stats failed: {status}"),
        }
    }

    pub async fn shutdown(&self) -> Result<()> {
        let response = self.post_with_retry(ENDPOINT_SHUTDOWN, &()).await?;
        if !response.status().is_success() {
            anyhow::bail!("shutdown failed: {}", response.status());
        }

        Ok(())
    }

    async fn pop_result(response: reqwest::Response) -> Result<PopResult> {
        match response.status() {
            StatusCode::OK => Ok(PopResult::Examples(response.json().await?)),
            StatusCode::NO_CONTENT => Ok(PopResult::Waiting),
            StatusCode::GONE => Ok(PopResult::Drained),
            StatusCode::NOT_FOUND => Ok(PopResult::NoWork),
            status => anyhow::bail!("unexpected poll response: {status}"),
        }
    }

    async fn post_with_retry<T: serde::Serialize>(
        &self,
        endpoint: &str,
        payload: &T,
    ) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.base_url, endpoint);
        let mut delay_ms = 150u64;

        for attempt in 0..self.attempts {
            let response = self
                .http
                .post(&url)
                .header(RUN_ID_HEADER, &self.run_id)
                .header(WORKER_ID_HEADER, &self.worker_id)
                .json(payload)
                .timeout(REQUEST_TIMEOUT)
                .send()
                .await;

            match response {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    if attempt + 1 == self.attempts {
                        return Err(anyhow::anyhow!(e));
                    }
                    // Jitter keeps a restarted worker pool from stampeding.
                    let jitter = rand::random::<u64>() % 50;
                    tokio::time::sleep(Duration::from_millis(delay_ms + jitter)).await;
                    delay_ms = (delay_ms * 2).min(1200);
                }
            }
        }

        Err(anyhow::anyhow!("retry attempts exhausted"))
    }

    async fn get_with_retry(&self, url: &str) -> Result<reqwest::Response> {
        let mut delay_ms = 150u64;

        for attempt in 0..self.attempts {
            let response = self
                .http
                .get(url)
                .header(RUN_ID_HEADER, &self.run_id)
                .header(WORKER_ID_HEADER, &self.worker_id)
                .timeout(REQUEST_TIMEOUT)
                .send()
                .await;

            match response {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    if attempt + 1 == self.attempts {
                        return Err(anyhow::anyhow!(e));
                    }
                    let jitter = rand::random::<u64>() % 50;
                    tokio::time::sleep(Duration::from_millis(delay_ms + jitter)).await;
                    delay_ms = (delay_ms * 2).min(1200);
                }
            }
        }

        Err(anyhow::anyhow!("retry attempts exhausted"))
    }
}
