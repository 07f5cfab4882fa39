// ABOUTME: Health checking for worker processes running inside sandboxes
// ABOUTME: Single best-effort probes and exponential-backoff waits against the /health endpoint

use crate::error::{OrchestratorError, Result};
use crate::providers::PreviewLink;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info};

pub const HEALTH_PATH: &str = "/health";

/// Upper bound on a single probe request
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Retry schedule for waiting on a freshly launched worker
#[derive(Debug, Clone, PartialEq)]
pub struct HealthPolicy {
    /// Total number of polls, including the first
    pub max_attempts: u32,
    /// Wait after the first failed poll; doubles after each further failure
    pub base_delay: Duration,
    /// Cap on any single wait
    pub max_delay: Duration,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 20,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60 * 60),
        }
    }
}

impl HealthPolicy {
    fn schedule(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.base_delay)
            .with_multiplier(2.0)
            .with_randomization_factor(0.0)
            .with_max_interval(self.max_delay)
            .with_max_elapsed_time(None)
            .build()
    }

    /// Waits between consecutive polls when every poll fails
    pub fn delays(&self) -> Vec<Duration> {
        use backoff::backoff::Backoff;

        let mut schedule = self.schedule();
        (1..self.max_attempts.max(1))
            .filter_map(|_| schedule.next_backoff())
            .collect()
    }
}

/// Polls the worker's health endpoint through its preview link
#[derive(Clone)]
pub struct HealthChecker {
    client: Client,
}

impl HealthChecker {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn check(client: &Client, url: &str) -> std::result::Result<(), String> {
        let response = client
            .get(url)
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
            .map_err(|e| format!("Health fetch error: {}", e))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(format!("Health check {}", response.status().as_u16()))
        }
    }

    /// Single attempt; any failure reads as unhealthy
    pub async fn probe(&self, link: &PreviewLink) -> bool {
        match Self::check(&self.client, &link.url_for(HEALTH_PATH)).await {
            Ok(()) => true,
            Err(reason) => {
                debug!("Health probe failed: {}", reason);
                false
            }
        }
    }

    /// Poll until the first 2xx or until `policy.max_attempts` polls have failed
    pub async fn wait_until_healthy(&self, link: &PreviewLink, policy: &HealthPolicy) -> Result<()> {
        let url = link.url_for(HEALTH_PATH);
        let client = &self.client;
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 0u32;

        let outcome = backoff::future::retry(policy.schedule(), || {
            attempt += 1;
            let current = attempt;
            let url = url.clone();
            async move {
                match Self::check(client, &url).await {
                    Ok(()) => Ok(current),
                    Err(reason) if current >= max_attempts => {
                        Err(backoff::Error::permanent(reason))
                    }
                    Err(reason) => {
                        debug!("Health attempt {}/{} failed: {}", current, max_attempts, reason);
                        Err(backoff::Error::transient(reason))
                    }
                }
            }
        })
        .await;

        match outcome {
            Ok(attempts) => {
                info!("Worker healthy after {} attempt(s)", attempts);
                Ok(())
            }
            Err(last_error) => Err(OrchestratorError::HealthCheckTimeout {
                attempts: max_attempts,
                last_error,
            }),
        }
    }
}
