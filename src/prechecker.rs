use std::{sync::Arc, time::Duration};

use anyhow::Context;
use reqwest::{Client, Method, StatusCode};
use tokio::time::sleep;

use crate::{
    rate_limiter::AdaptiveRateLimiter,
    types::SnapshotError,
    utils::{domain_of, random_delay},
};

#[derive(Debug, Clone)]
pub struct PrecheckOptions {
    /// Per-request timeout of a probe
    pub timeout: Duration,
    /// Jitter applied before every probe
    pub min_jitter: Duration,
    pub max_jitter: Duration,
    /// Longest a probe waits on the rate limiter before giving up
    pub max_rate_wait: Duration,
}

impl Default for PrecheckOptions {
    fn default() -> Self {
        PrecheckOptions {
            timeout: Duration::from_secs(10),
            min_jitter: Duration::from_millis(500),
            max_jitter: Duration::from_secs(3),
            max_rate_wait: Duration::from_secs(60),
        }
    }
}

/// Cheap existence check gating whether a URL is worth a browser session.
pub struct AccessibilityChecker {
    client: Client,
    limiter: Arc<AdaptiveRateLimiter>,
    options: PrecheckOptions,
}

impl AccessibilityChecker {
    pub fn new(limiter: Arc<AdaptiveRateLimiter>, options: PrecheckOptions) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(options.timeout)
            .build()
            .context("could not build http client for accessibility probes")?;
        Ok(AccessibilityChecker {
            client,
            limiter,
            options,
        })
    }

    pub async fn is_accessible(&self, url: &str) -> bool {
        match self.check(url).await {
            Ok(status) => {
                debug!("{} is accessible ({})", url, status);
                true
            }
            Err(e) => {
                warn!("{}", e);
                false
            }
        }
    }

    /// HEAD first; servers refusing HEAD get one GET before we decide.
    pub async fn check(&self, url: &str) -> Result<StatusCode, SnapshotError> {
        let domain = domain_of(url).ok_or_else(|| SnapshotError::AccessibilityCheckFailed {
            url: url.into(),
            reason: "url has no host".into(),
        })?;

        let status = self.probe(Method::HEAD, url, &domain).await?;
        let status = match status {
            StatusCode::FORBIDDEN | StatusCode::METHOD_NOT_ALLOWED => {
                debug!("HEAD {} answered {}, retrying with GET", url, status);
                self.probe(Method::GET, url, &domain).await?
            }
            s => s,
        };

        if status.is_success() {
            Ok(status)
        } else {
            Err(SnapshotError::AccessibilityCheckFailed {
                url: url.into(),
                reason: format!("server answered {}", status),
            })
        }
    }

    async fn probe(
        &self,
        method: Method,
        url: &str,
        domain: &str,
    ) -> Result<StatusCode, SnapshotError> {
        let delay = random_delay(self.options.min_jitter, self.options.max_jitter);
        if !delay.is_zero() {
            sleep(delay).await;
        }

        let _permit = self
            .limiter
            .acquire_within(domain, self.options.max_rate_wait)
            .await?;

        match self.client.request(method.clone(), url).send().await {
            Ok(res) => {
                let status = res.status();
                // throttling and server errors count against the host budget
                let healthy =
                    !(status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error());
                self.limiter.record(domain, healthy);
                debug!("{} {} -> {}", method, url, status);
                Ok(status)
            }
            Err(e) => {
                self.limiter.record(domain, false);
                Err(SnapshotError::AccessibilityCheckFailed {
                    url: url.into(),
                    reason: e.to_string(),
                })
            }
        }
    }
}
