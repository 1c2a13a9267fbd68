// Inverse Request Registry
//
// INTENTION:
// Hold requests a server wants delivered to a connectivity-constrained node.
// The constrained node cannot be pushed to; it polls, and `drain` hands it
// the entire batch queued for it in one atomic take. Entries carry the same
// expiry-based eviction as the executor's pending map so work is not stranded
// forever if the poller dies mid-drain.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use hausnet_common::logging::{Component, Logger};
use hausnet_common::types::HostId;

use crate::error::Result;
use crate::messages::Request;

struct QueuedRequest {
    request: Request,
    expires_at: Instant,
}

pub struct InverseRequestRegistry {
    buckets: Mutex<HashMap<HostId, Vec<QueuedRequest>>>,
    queued: Notify,
    default_timeout: Duration,
    logger: Logger,
}

impl InverseRequestRegistry {
    pub fn new(default_timeout: Duration, logger: &Logger) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            queued: Notify::new(),
            default_timeout,
            logger: logger.with_component(Component::Inverse),
        }
    }

    /// Append a request under its target host's bucket. Coordinates must
    /// already be populated by the submitting executor.
    pub async fn enqueue(&self, request: Request) -> Result<()> {
        let coordinates = request.coordinates()?;
        let expires_at = Instant::now() + request.effective_timeout(self.default_timeout);
        self.logger.debug(format!(
            "queueing request {coordinates} for inverse delivery"
        ));

        let mut buckets = self.buckets.lock().await;
        buckets
            .entry(coordinates.server_host.clone())
            .or_default()
            .push(QueuedRequest {
                request,
                expires_at,
            });
        drop(buckets);

        self.queued.notify_waiters();
        Ok(())
    }

    /// Block until at least one request is queued for `host` or the timeout
    /// elapses, then atomically remove and return the whole current batch.
    /// A drain returns everything queued for the host or nothing.
    pub async fn drain(&self, host: &HostId, timeout: Duration) -> Vec<Request> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.queued.notified();

            let batch = self.take_batch(host).await;
            if !batch.is_empty() {
                self.logger.debug(format!(
                    "drained {} request(s) for host '{host}'",
                    batch.len()
                ));
                return batch;
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Vec::new();
            }
            if tokio::time::timeout(remaining, notified).await.is_err() {
                return self.take_batch(host).await;
            }
        }
    }

    async fn take_batch(&self, host: &HostId) -> Vec<Request> {
        let mut buckets = self.buckets.lock().await;
        match buckets.remove(host) {
            Some(entries) => {
                let now = Instant::now();
                entries
                    .into_iter()
                    .filter(|entry| entry.expires_at > now)
                    .map(|entry| entry.request)
                    .collect()
            }
            None => Vec::new(),
        }
    }

    /// Periodic sweep removing expired entries nobody drained.
    pub async fn evict(&self) {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().await;
        let mut removed = 0usize;
        buckets.retain(|_, entries| {
            let before = entries.len();
            entries.retain(|entry| entry.expires_at > now);
            removed += before - entries.len();
            !entries.is_empty()
        });
        drop(buckets);
        if removed > 0 {
            self.logger
                .debug(format!("evicted {removed} expired inverse request(s)"));
        }
    }
}
