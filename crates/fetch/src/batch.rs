//! Groups compatible requests of one source into fewer physical calls.
//!
//! Callers [`BatchScheduler::submit`] individual requests and await their own
//! response. A background task collects requests for a short window (or until
//! a batch is full) and issues each batch under the source's rate limiter and
//! retry policy.

use crate::error::FetchError;
use crate::rate_limiter::RateLimiterRegistry;
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use portfolio_core::SourceId;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

/// A wire protocol able to carry several requests in one call.
#[async_trait]
pub trait BatchProtocol: Send + Sync + 'static {
    type Request: Clone + Send + Sync + 'static;
    type Response: Send + 'static;

    /// Largest number of requests per physical call; 1 disables batching.
    fn max_batch_size(&self) -> usize;

    /// Issues one physical call. Response `i` must answer request `i`.
    async fn execute_batch(
        &self,
        requests: Vec<Self::Request>,
    ) -> Result<Vec<Self::Response>, FetchError>;
}

struct Pending<P: BatchProtocol> {
    request: P::Request,
    reply: oneshot::Sender<Result<P::Response, FetchError>>,
}

/// Shared pieces every batch call runs under.
#[derive(Clone)]
pub struct BatchLimits {
    pub limiter: Arc<RateLimiterRegistry>,
    pub retry: RetryPolicy,
    pub window: Duration,
}

pub struct BatchScheduler<P: BatchProtocol> {
    tx: mpsc::UnboundedSender<Pending<P>>,
    task: JoinHandle<()>,
}

impl<P: BatchProtocol> BatchScheduler<P> {
    /// Starts the collecting task for `source`.
    pub fn spawn(source: SourceId, protocol: P, limits: BatchLimits) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_batches(source, Arc::new(protocol), limits, rx));
        Self { tx, task }
    }

    /// Enqueues a request and waits for its response.
    ///
    /// # Errors
    ///
    /// Returns the batch's error if its physical call failed, or `Unavailable`
    /// if the scheduler stopped.
    pub async fn submit(&self, request: P::Request) -> Result<P::Response, FetchError> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(Pending { request, reply })
            .map_err(|_| FetchError::unavailable("batch scheduler stopped"))?;
        response
            .await
            .map_err(|_| FetchError::unavailable("batch scheduler dropped request"))?
    }
}

impl<P: BatchProtocol> Drop for BatchScheduler<P> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run_batches<P: BatchProtocol>(
    source: SourceId,
    protocol: Arc<P>,
    limits: BatchLimits,
    mut rx: mpsc::UnboundedReceiver<Pending<P>>,
) {
    let max_size = protocol.max_batch_size().max(1);

    while let Some(first) = rx.recv().await {
        let mut batch = vec![first];
        let deadline = Instant::now() + limits.window;
        while batch.len() < max_size {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some(pending)) => batch.push(pending),
                Ok(None) | Err(_) => break,
            }
        }
        dispatch(&source, protocol.as_ref(), &limits, batch).await;
    }
}

async fn dispatch<P: BatchProtocol>(
    source: &SourceId,
    protocol: &P,
    limits: &BatchLimits,
    batch: Vec<Pending<P>>,
) {
    let requests: Vec<P::Request> = batch.iter().map(|p| p.request.clone()).collect();
    debug!(source = %source, batch_size = requests.len(), "Dispatching batch");

    let result = limits
        .retry
        .run(source, |_| {
            let requests = requests.clone();
            async move {
                limits.limiter.acquire(source).await;
                protocol.execute_batch(requests).await
            }
        })
        .await;

    match result {
        Ok(responses) if responses.len() == batch.len() => {
            for (pending, response) in batch.into_iter().zip(responses) {
                let _ = pending.reply.send(Ok(response));
            }
        }
        Ok(responses) => {
            let err = FetchError::parse(format!(
                "batch returned {} responses for {} requests",
                responses.len(),
                batch.len()
            ));
            for pending in batch {
                let _ = pending.reply.send(Err(err.clone()));
            }
        }
        Err(err) => {
            for pending in batch {
                let _ = pending.reply.send(Err(err.clone()));
            }
        }
    }
}
