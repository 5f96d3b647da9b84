//! Resilient request machinery shared by all portfolio sources.
//!
//! Every physical call goes through the per-source [`RateLimiterRegistry`],
//! leases a slot from the [`ConnectionPool`] and is retried by the
//! [`RetryPolicy`]. Sources with several equivalent endpoints fail over via the
//! [`EndpointRotator`]; batchable protocols use the [`BatchScheduler`].

pub mod batch;
pub mod cache;
pub mod error;
pub mod executor;
pub mod http;
pub mod pool;
pub mod rate_limiter;
pub mod retry;
pub mod rotator;

pub use batch::{BatchLimits, BatchProtocol, BatchScheduler};
pub use cache::TtlCache;
pub use error::{FetchError, Result};
pub use executor::RequestExecutor;
pub use pool::{host_of, ConnectionPool, PooledConnection};
pub use rate_limiter::RateLimiterRegistry;
pub use retry::RetryPolicy;
pub use rotator::EndpointRotator;
