// Service Executor
//
// INTENTION:
// Per-node engine that accepts a request, decides local vs remote vs inverse
// dispatch, correlates asynchronous responses by request id, and evicts stale
// work. Safe for concurrent submission from many callers and concurrent
// completion callbacks from many in-flight handlers.
//
// State machine per request id:
//   SUBMITTED -> (LOCAL_PROCESSING | FORWARDED | QUEUED_INVERSE)
//             -> COMPLETED -> EVICTABLE
//
// The correlation maps are guarded by their own mutexes with short critical
// sections only; no I/O or cryptography happens while holding them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use uuid::Uuid;

use hausnet_common::logging::{Component, Logger};

use crate::config::NodeConfig;
use crate::error::{Result, RpcError};
use crate::messages::{Coordinates, ErrorInfo, Request, RequestId, Response};
use crate::services::inverse_registry::InverseRequestRegistry;
use crate::services::service_registry::ServiceRegistry;
use crate::services::{HandlerContext, HandlerOutcome};

/// Seam through which the executor forwards requests to remote hosts. The
/// RPC client implements it; tests may substitute their own.
#[async_trait]
pub trait RemoteInvoker: Send + Sync {
    /// Transmit the request and return the final (non-deferring) response.
    async fn exchange(&self, request: Request) -> Result<Response>;
}

struct PendingRequest {
    request: Request,
    expires_at: Instant,
}

struct PendingResponse {
    response: Response,
    expires_at: Instant,
}

struct ExecutorInner {
    config: Arc<NodeConfig>,
    registry: Arc<ServiceRegistry>,
    inverse: Arc<InverseRequestRegistry>,
    remote: Option<Arc<dyn RemoteInvoker>>,
    pending_requests: Mutex<HashMap<RequestId, PendingRequest>>,
    pending_responses: Mutex<HashMap<RequestId, PendingResponse>>,
    response_ready: Notify,
    logger: Logger,
}

#[derive(Clone)]
pub struct ServiceExecutor {
    inner: Arc<ExecutorInner>,
}

impl ServiceExecutor {
    pub fn new(
        config: Arc<NodeConfig>,
        registry: Arc<ServiceRegistry>,
        inverse: Arc<InverseRequestRegistry>,
        remote: Option<Arc<dyn RemoteInvoker>>,
        logger: &Logger,
    ) -> Self {
        Self {
            inner: Arc::new(ExecutorInner {
                config,
                registry,
                inverse,
                remote,
                pending_requests: Mutex::new(HashMap::new()),
                pending_responses: Mutex::new(HashMap::new()),
                response_ready: Notify::new(),
                logger: logger.with_component(Component::Executor),
            }),
        }
    }

    /// Fill unset coordinates: generate the id, default the client host to
    /// local, stamp creation time, and resolve the server alias to a
    /// concrete host before anything cryptographic can see it.
    pub fn populate(&self, request: &mut Request) {
        if request.request_id.is_none() {
            request.request_id = Some(Uuid::new_v4());
        }
        if request.client_host.is_none() {
            request.client_host = Some(self.inner.config.local_host.clone());
        }
        if request.created.is_none() {
            request.created = Some(Utc::now());
        }
        request.server_host = self.inner.config.resolve_host(&request.server_host);
    }

    /// Register the request and dispatch it. Local targets run through the
    /// service registry; remote targets are forwarded via the remote invoker;
    /// targets reachable only by polling are queued for inverse delivery and
    /// no local work is started.
    pub async fn submit(&self, mut request: Request) -> Result<Coordinates> {
        self.populate(&mut request);
        let coordinates = request.coordinates()?;
        let expires_at =
            Instant::now() + request.effective_timeout(self.inner.config.default_timeout);

        {
            let mut pending = self.inner.pending_requests.lock().await;
            pending.insert(
                coordinates.request_id,
                PendingRequest {
                    request: request.clone(),
                    expires_at,
                },
            );
        }

        if self.inner.config.is_local(&coordinates.server_host) {
            let executor = self.clone();
            let local_request = request;
            tokio::spawn(async move {
                executor.dispatch_local(local_request).await;
            });
        } else if self.inner.config.is_inverse_host(&coordinates.server_host) {
            self.inner.logger.debug(format!(
                "routing request {coordinates} to the inverse queue"
            ));
            self.inner.inverse.enqueue(request).await?;
        } else {
            let executor = self.clone();
            let remote_request = request;
            tokio::spawn(async move {
                executor.dispatch_remote(remote_request).await;
            });
        }

        Ok(coordinates)
    }

    async fn dispatch_local(&self, request: Request) {
        let coordinates = match request.coordinates() {
            Ok(coordinates) => coordinates,
            Err(e) => {
                self.inner
                    .logger
                    .error(format!("dropping request without coordinates: {e}"));
                return;
            }
        };

        let response = match self.run_handler(&request).await {
            Ok(HandlerOutcome::Payload(Some(payload))) => {
                Response::value(coordinates.clone(), payload)
            }
            Ok(HandlerOutcome::Payload(None)) => Response::null(coordinates.clone()),
            Ok(HandlerOutcome::Response(response)) => {
                if response.coordinates() != &coordinates {
                    Response::error(
                        coordinates.clone(),
                        RpcError::Protocol(format!(
                            "handler produced response for foreign coordinates {}",
                            response.coordinates()
                        ))
                        .to_error_info(),
                    )
                } else {
                    response
                }
            }
            Err(e) => Response::error(coordinates.clone(), e),
        };

        if let Err(e) = self.store_response(response).await {
            self.inner
                .logger
                .error(format!("failed to store response for {coordinates}: {e}"));
        }
    }

    async fn run_handler(&self, request: &Request) -> std::result::Result<HandlerOutcome, ErrorInfo> {
        let mut handler = self
            .inner
            .registry
            .resolve(&request.kind)
            .await
            .map_err(|e| e.to_error_info())?;
        let context = HandlerContext {
            local_host: self.inner.config.local_host.clone(),
            logger: self.inner.logger.with_request_path(request.kind.clone()),
        };
        handler
            .handle(request, &context)
            .await
            .map_err(|e| ErrorInfo::from_handler_error(&e))
    }

    async fn dispatch_remote(&self, request: Request) {
        let coordinates = match request.coordinates() {
            Ok(coordinates) => coordinates,
            Err(e) => {
                self.inner
                    .logger
                    .error(format!("dropping request without coordinates: {e}"));
                return;
            }
        };

        let response = match &self.inner.remote {
            Some(remote) => match remote.exchange(request).await {
                Ok(response) => response,
                Err(e) => Response::error(coordinates.clone(), e.to_error_info()),
            },
            None => Response::error(
                coordinates.clone(),
                RpcError::Configuration(format!(
                    "no remote invoker configured; cannot reach host '{}'",
                    coordinates.server_host
                ))
                .to_error_info(),
            ),
        };

        if let Err(e) = self.store_response(response).await {
            self.inner
                .logger
                .error(format!("failed to store response for {coordinates}: {e}"));
        }
    }

    /// Store a completed response and wake any waiter.
    ///
    /// Storing for an unknown or already-answered request id indicates
    /// duplicate delivery and is reported, never silently dropped.
    pub async fn store_response(&self, response: Response) -> Result<()> {
        let request_id = response.coordinates().request_id;

        let expires_at = {
            let mut pending = self.inner.pending_requests.lock().await;
            match pending.remove(&request_id) {
                Some(entry) => entry.expires_at,
                None => {
                    self.inner.logger.error(format!(
                        "response for unknown or already-answered request {request_id}"
                    ));
                    return Err(RpcError::DuplicateResponse(request_id));
                }
            }
        };

        {
            let mut responses = self.inner.pending_responses.lock().await;
            responses.insert(
                request_id,
                PendingResponse {
                    response,
                    expires_at,
                },
            );
        }

        self.inner.response_ready.notify_waiters();
        Ok(())
    }

    /// Block until a response is stored for the id or the timeout elapses.
    /// Returns `None` on timeout; the caller decides whether that is fatal.
    /// A delivered response is consumed by exactly one waiter.
    pub async fn await_response(&self, request_id: RequestId, timeout: Duration) -> Option<Response> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.inner.response_ready.notified();

            if let Some(response) = self.take_response(request_id).await {
                return Some(response);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            if tokio::time::timeout(remaining, notified).await.is_err() {
                return self.take_response(request_id).await;
            }
        }
    }

    /// Non-blocking lookup used by the deferred-poll plumbing.
    pub async fn take_response(&self, request_id: RequestId) -> Option<Response> {
        let mut responses = self.inner.pending_responses.lock().await;
        let now = Instant::now();
        match responses.get(&request_id) {
            Some(entry) if entry.expires_at > now => {
                responses.remove(&request_id).map(|entry| entry.response)
            }
            _ => None,
        }
    }

    /// Periodic sweep removing any pending request or response whose expiry
    /// has passed, whether or not it was ever collected. The safety net
    /// against leaks from abandoned calls.
    pub async fn evict(&self) {
        let now = Instant::now();
        let mut removed = 0usize;
        {
            let mut pending = self.inner.pending_requests.lock().await;
            pending.retain(|id, entry| {
                if entry.expires_at > now {
                    return true;
                }
                self.inner.logger.warn(format!(
                    "evicting abandoned request {id} (kind '{}')",
                    entry.request.kind
                ));
                removed += 1;
                false
            });
        }
        {
            let mut responses = self.inner.pending_responses.lock().await;
            let before = responses.len();
            responses.retain(|_, entry| entry.expires_at > now);
            removed += before - responses.len();
        }
        if removed > 0 {
            self.inner
                .logger
                .debug(format!("evicted {removed} stale pending entr(ies)"));
        }
        self.inner.inverse.evict().await;
    }

    /// Spawn the eviction sweep on its fixed period. Runs independently of
    /// any single request's timeout.
    pub fn start_sweeper(&self) -> tokio::task::JoinHandle<()> {
        let executor = self.clone();
        let period = self.inner.config.pending_sweep_period;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                executor.evict().await;
            }
        })
    }
}
