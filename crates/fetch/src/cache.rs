//! Short-lived per-run cache keyed by `(source, key)`.

use parking_lot::Mutex;
use portfolio_core::SourceId;
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

struct Entry {
    stored_at: Instant,
    value: Arc<dyn Any + Send + Sync>,
}

type Slot = Arc<tokio::sync::Mutex<Option<Entry>>>;

/// Type-erased TTL cache. Concurrent lookups of one key share a single fetch.
#[derive(Default)]
pub struct TtlCache {
    slots: Mutex<HashMap<(SourceId, String), Slot>>,
}

impl TtlCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, source: &SourceId, key: &str) -> Slot {
        Arc::clone(
            self.slots
                .lock()
                .entry((source.clone(), key.to_string()))
                .or_default(),
        )
    }

    /// Returns the value stored within `ttl`, otherwise runs `fetch` and stores
    /// its `Ok` value. Errors are returned but never cached. A stored value of a
    /// different type counts as a miss.
    pub async fn get_or_fetch<T, E, F, Fut>(
        &self,
        source: &SourceId,
        key: &str,
        ttl: Duration,
        fetch: F,
    ) -> Result<T, E>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let slot = self.slot(source, key);
        let mut entry = slot.lock().await;

        if let Some(cached) = entry.as_ref() {
            if cached.stored_at.elapsed() < ttl {
                if let Some(value) = cached.value.downcast_ref::<T>() {
                    trace!(source = %source, key, "Cache hit");
                    return Ok(value.clone());
                }
            }
        }

        let value = fetch().await?;
        *entry = Some(Entry {
            stored_at: Instant::now(),
            value: Arc::new(value.clone()),
        });
        Ok(value)
    }

    /// Number of keys ever looked up.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }
}
