//! Token-bucket bandwidth limiter for transfer throughput (§4.H).

use std::num::NonZeroU32;
use std::sync::Arc;

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use nonzero_ext::nonzero;

type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Wraps a byte-per-second quota; `acquire` blocks the caller until enough
/// tokens accumulate to admit the requested chunk.
#[derive(Clone)]
pub struct BandwidthThrottle {
    limiter: Option<Arc<Limiter>>,
}

impl BandwidthThrottle {
    /// `None` disables throttling entirely (the common case).
    pub fn new(bytes_per_sec: Option<u64>) -> Self {
        let limiter = bytes_per_sec.and_then(|rate| {
            let cells = u32::try_from(rate).ok().and_then(NonZeroU32::new)?;
            Some(Arc::new(RateLimiter::direct(Quota::per_second(cells))))
        });
        Self { limiter }
    }

    pub fn unlimited() -> Self {
        Self { limiter: None }
    }

    /// Wait until `bytes` worth of quota is available, chunked so a single
    /// large transfer doesn't starve under the bucket's burst size.
    pub async fn acquire(&self, bytes: usize) {
        let Some(limiter) = &self.limiter else { return };
        if bytes == 0 {
            return;
        }

        let mut remaining = bytes;
        while remaining > 0 {
            let chunk = remaining.min(u32::MAX as usize) as u32;
            let cells = NonZeroU32::new(chunk).unwrap_or(nonzero!(1u32));
            limiter.until_n_ready(cells).await.ok();
            remaining = remaining.saturating_sub(chunk as usize);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn unlimited_throttle_never_blocks() {
        let throttle = BandwidthThrottle::unlimited();
        let start = Instant::now();
        throttle.acquire(10_000_000).await;
        assert!(start.elapsed().as_millis() < 50);
    }

    #[tokio::test]
    async fn limited_throttle_admits_burst_immediately() {
        let throttle = BandwidthThrottle::new(Some(1_000_000));
        let start = Instant::now();
        throttle.acquire(1_000).await;
        assert!(start.elapsed().as_millis() < 50);
    }
}
