//! Health-tracked failover across equivalent endpoints of one source.

use parking_lot::Mutex;
use portfolio_core::SourceId;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
struct EndpointState {
    url: String,
    cooldown_until: Option<Instant>,
    last_failure: Option<Instant>,
}

impl EndpointState {
    fn is_available(&self, now: Instant) -> bool {
        self.cooldown_until.map_or(true, |until| until <= now)
    }
}

/// Rotates away from failing endpoints for a cooldown period.
pub struct EndpointRotator {
    cooldown: Duration,
    endpoints: Mutex<HashMap<SourceId, Vec<EndpointState>>>,
}

impl EndpointRotator {
    #[must_use]
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            endpoints: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a source's endpoints in priority order, replacing any previous list.
    pub fn register<I, S>(&self, source: &SourceId, endpoints: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let states = endpoints
            .into_iter()
            .map(|url| EndpointState {
                url: url.into(),
                cooldown_until: None,
                last_failure: None,
            })
            .collect();
        self.endpoints.lock().insert(source.clone(), states);
    }

    /// Registered endpoints in priority order.
    #[must_use]
    pub fn endpoints(&self, source: &SourceId) -> Vec<String> {
        self.endpoints
            .lock()
            .get(source)
            .map(|states| states.iter().map(|s| s.url.clone()).collect())
            .unwrap_or_default()
    }

    /// First healthy endpoint; if every endpoint is cooling down, the one that
    /// failed longest ago.
    #[must_use]
    pub fn next_endpoint(&self, source: &SourceId) -> Option<String> {
        let endpoints = self.endpoints.lock();
        let states = endpoints.get(source)?;
        let now = Instant::now();

        if let Some(state) = states.iter().find(|s| s.is_available(now)) {
            return Some(state.url.clone());
        }
        states
            .iter()
            .min_by_key(|s| s.last_failure)
            .map(|s| s.url.clone())
    }

    pub fn report_failure(&self, source: &SourceId, endpoint: &str) {
        let mut endpoints = self.endpoints.lock();
        if let Some(state) = endpoints
            .get_mut(source)
            .and_then(|states| states.iter_mut().find(|s| s.url == endpoint))
        {
            let now = Instant::now();
            state.last_failure = Some(now);
            state.cooldown_until = Some(now + self.cooldown);
            warn!(
                source = %source,
                endpoint,
                cooldown_secs = self.cooldown.as_secs(),
                "Endpoint failed, rotating"
            );
        }
    }

    pub fn report_success(&self, source: &SourceId, endpoint: &str) {
        let mut endpoints = self.endpoints.lock();
        if let Some(state) = endpoints
            .get_mut(source)
            .and_then(|states| states.iter_mut().find(|s| s.url == endpoint))
        {
            if state.cooldown_until.take().is_some() {
                debug!(source = %source, endpoint, "Endpoint recovered");
            }
        }
    }
}

impl Default for EndpointRotator {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rotator() -> (EndpointRotator, SourceId) {
        let rotator = EndpointRotator::new(Duration::from_secs(30));
        let source = SourceId::new("solana");
        rotator.register(&source, ["https://a", "https://b", "https://c"]);
        (rotator, source)
    }

    #[test]
    fn test_unregistered_source_has_no_endpoint() {
        let rotator = EndpointRotator::default();
        assert_eq!(rotator.next_endpoint(&SourceId::new("none")), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_priority_order_when_healthy() {
        let (rotator, source) = rotator();
        assert_eq!(rotator.next_endpoint(&source).as_deref(), Some("https://a"));
        assert_eq!(rotator.endpoints(&source).len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_endpoints_are_skipped_within_cooldown() {
        let (rotator, source) = rotator();
        rotator.report_failure(&source, "https://a");
        rotator.report_failure(&source, "https://b");

        assert_eq!(rotator.next_endpoint(&source).as_deref(), Some("https://c"));
        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(rotator.next_endpoint(&source).as_deref(), Some("https://c"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_expiry_restores_priority() {
        let (rotator, source) = rotator();
        rotator.report_failure(&source, "https://a");
        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(rotator.next_endpoint(&source).as_deref(), Some("https://a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_cooling_down_fails_open_to_oldest_failure() {
        let (rotator, source) = rotator();
        rotator.report_failure(&source, "https://b");
        tokio::time::advance(Duration::from_secs(1)).await;
        rotator.report_failure(&source, "https://a");
        tokio::time::advance(Duration::from_secs(1)).await;
        rotator.report_failure(&source, "https://c");

        assert_eq!(rotator.next_endpoint(&source).as_deref(), Some("https://b"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_clears_cooldown() {
        let (rotator, source) = rotator();
        rotator.report_failure(&source, "https://a");
        rotator.report_success(&source, "https://a");
        assert_eq!(rotator.next_endpoint(&source).as_deref(), Some("https://a"));
    }
}
