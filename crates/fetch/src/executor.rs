//! Runs source requests under rate limiting, pooling, retry and failover.

use crate::error::{FetchError, Result};
use crate::http;
use crate::pool::{host_of, ConnectionPool};
use crate::rate_limiter::RateLimiterRegistry;
use crate::retry::RetryPolicy;
use crate::rotator::EndpointRotator;
use portfolio_core::{FetchConfig, SourceId};
use reqwest::Client;
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

/// Shared request machinery for one run.
#[derive(Clone)]
pub struct RequestExecutor {
    limiter: Arc<RateLimiterRegistry>,
    pool: Arc<ConnectionPool>,
    rotator: Arc<EndpointRotator>,
    retry: RetryPolicy,
}

impl RequestExecutor {
    #[must_use]
    pub fn new(
        limiter: Arc<RateLimiterRegistry>,
        pool: Arc<ConnectionPool>,
        rotator: Arc<EndpointRotator>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            limiter,
            pool,
            rotator,
            retry,
        }
    }

    /// Fresh limiter, pool and rotator built from configuration.
    #[must_use]
    pub fn from_config(config: &FetchConfig) -> Self {
        Self::new(
            Arc::new(RateLimiterRegistry::new(config.default_rate_limit)),
            Arc::new(ConnectionPool::new(config.pool.clone())),
            Arc::new(EndpointRotator::new(config.endpoint_cooldown())),
            RetryPolicy::from(&config.retry),
        )
    }

    #[must_use]
    pub fn limiter(&self) -> &Arc<RateLimiterRegistry> {
        &self.limiter
    }

    #[must_use]
    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    #[must_use]
    pub fn rotator(&self) -> &Arc<EndpointRotator> {
        &self.rotator
    }

    #[must_use]
    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Physical calls made for `source` so far.
    #[must_use]
    pub fn physical_calls(&self, source: &SourceId) -> u32 {
        self.limiter.total_requests(source)
    }

    /// Runs `op` against the host of `url`; each attempt waits for the source's
    /// rate limiter and leases a pooled connection.
    ///
    /// # Errors
    ///
    /// Returns the last error once retries are exhausted or a permanent error occurs.
    pub async fn execute<T, F, Fut>(&self, source: &SourceId, url: &str, op: F) -> Result<T>
    where
        F: Fn(Client) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let host = host_of(url)?;
        let host = host.as_str();
        let op = &op;

        self.retry
            .run(source, |attempt| async move {
                self.limiter.acquire(source).await;
                let conn = self.pool.acquire(source, host).await?;
                debug!(source = %source, host, attempt, "Sending request");
                op(conn.client().clone()).await
            })
            .await
    }

    /// Runs `op` against the source's registered endpoints, rotating away from
    /// endpoints that fail transiently. The attempt budget covers every endpoint
    /// at least once.
    ///
    /// # Errors
    ///
    /// `Configuration` when no endpoint is registered; `Unavailable` when every
    /// attempt failed transiently; otherwise the permanent error.
    pub async fn execute_rotating<T, F, Fut>(&self, source: &SourceId, op: F) -> Result<T>
    where
        F: Fn(Client, String) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if self.rotator.endpoints(source).is_empty() {
            return Err(FetchError::Configuration(format!(
                "no endpoints registered for {source}"
            )));
        }
        let policy = self.rotating_policy(source);
        let op = &op;

        policy
            .run(source, |_| async move {
                self.limiter.acquire(source).await;
                self.attempt_rotating(source, op).await
            })
            .await
            .map_err(|e| e.exhausted(&format!("all endpoints failed for {source}")))
    }

    /// Retry policy whose budget covers every registered endpoint of `source`.
    #[must_use]
    pub fn rotating_policy(&self, source: &SourceId) -> RetryPolicy {
        let endpoints = u32::try_from(self.rotator.endpoints(source).len()).unwrap_or(u32::MAX);
        self.retry
            .clone()
            .with_max_attempts(self.retry.max_attempts.max(endpoints))
    }

    /// One physical call against the current preferred endpoint, reporting the
    /// result to the rotator. Neither rate limited nor retried.
    ///
    /// # Errors
    ///
    /// `Configuration` when no endpoint is registered, otherwise the call's error.
    pub async fn attempt_rotating<T, F, Fut>(&self, source: &SourceId, op: F) -> Result<T>
    where
        F: Fn(Client, String) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let endpoint = self.rotator.next_endpoint(source).ok_or_else(|| {
            FetchError::Configuration(format!("no endpoints registered for {source}"))
        })?;
        let host = host_of(&endpoint)?;
        let conn = self.pool.acquire(source, &host).await?;
        debug!(source = %source, endpoint = %endpoint, "Sending request");

        match op(conn.client().clone(), endpoint.clone()).await {
            Ok(value) => {
                self.rotator.report_success(source, &endpoint);
                Ok(value)
            }
            Err(e) => {
                if e.is_transient() {
                    self.rotator.report_failure(source, &endpoint);
                }
                Err(e)
            }
        }
    }

    /// Runs `op` under the source's rate limiter and retry policy, without a
    /// pooled connection (for collaborators that manage their own transport).
    ///
    /// # Errors
    ///
    /// Returns the last error once retries are exhausted or a permanent error occurs.
    pub async fn execute_limited<T, F, Fut>(&self, source: &SourceId, op: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let op = &op;
        self.retry
            .run(source, |_| async move {
                self.limiter.acquire(source).await;
                op().await
            })
            .await
    }

    /// `GET url` decoding a JSON body.
    ///
    /// # Errors
    ///
    /// See [`RequestExecutor::execute`].
    pub async fn get_json<T: DeserializeOwned>(&self, source: &SourceId, url: &str) -> Result<T> {
        self.execute(source, url, |client| http::send_json(client.get(url)))
            .await
    }

    /// `POST url` with a JSON body, decoding a JSON response.
    ///
    /// # Errors
    ///
    /// See [`RequestExecutor::execute`].
    pub async fn post_json<B, T>(&self, source: &SourceId, url: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.execute(source, url, |client| {
            http::send_json(client.post(url).json(body))
        })
        .await
    }
}

impl Default for RequestExecutor {
    fn default() -> Self {
        Self::from_config(&FetchConfig::default())
    }
}
