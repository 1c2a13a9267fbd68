// RPC Client
//
// INTENTION:
// Synchronous-from-the-caller's-view remote invocation. Fills unset
// coordinates, then runs two nested loops: the inner deferred-response loop
// re-polls with a shrinking budget for as long as the server answers
// "deferring"; the outer retry loop retransmits on failure, but only when the
// request is idempotent or the failure is explicitly tagged retriable.
// Session-not-found purges the local session first so the retry re-handshakes
// over the asymmetric path.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::time::Instant;
use uuid::Uuid;

use hausnet_common::logging::{Component, Logger};
use hausnet_common::types::HostIdPair;

use crate::config::NodeConfig;
use crate::error::{Result, RpcError};
use crate::messages::{Request, Response, RpcEnvelope};
use crate::network::security::SecurityWrapper;
use crate::network::transport::{ClientTransport, WireFrame};
use crate::services::executor::RemoteInvoker;

pub struct RpcClient {
    transport: Arc<dyn ClientTransport>,
    security: Arc<SecurityWrapper>,
    config: Arc<NodeConfig>,
    logger: Logger,
}

impl RpcClient {
    pub fn new(
        transport: Arc<dyn ClientTransport>,
        security: Arc<SecurityWrapper>,
        config: Arc<NodeConfig>,
        logger: &Logger,
    ) -> Self {
        Self {
            transport,
            security,
            config,
            logger: logger.with_component(Component::Transporter),
        }
    }

    fn populate(&self, request: &mut Request) {
        if request.request_id.is_none() {
            request.request_id = Some(Uuid::new_v4());
        }
        if request.client_host.is_none() {
            request.client_host = Some(self.config.local_host.clone());
        }
        if request.created.is_none() {
            request.created = Some(Utc::now());
        }
        request.server_host = self.config.resolve_host(&request.server_host);
    }

    /// Invoke a remote service and unwrap its result: a value payload, the
    /// absent value for a null response, or the reconstructed remote failure.
    pub async fn invoke(&self, request: Request) -> Result<Option<Vec<u8>>> {
        match self.exchange_populated(request).await? {
            Response::Value { payload, .. } => Ok(Some(payload)),
            Response::Null { .. } => Ok(None),
            Response::Error { error, .. } => Err(error.reconstruct()),
            Response::Deferring { coordinates } => Err(RpcError::Protocol(format!(
                "exchange returned an unresolved deferring response for {coordinates}"
            ))),
        }
    }

    async fn exchange_populated(&self, mut request: Request) -> Result<Response> {
        self.populate(&mut request);
        let coordinates = request.coordinates()?;

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.send_with_deferral(&request).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    if matches!(e, RpcError::SessionNotFound(_)) {
                        // Purge our side so the retry re-handshakes.
                        let pair = HostIdPair::new(
                            coordinates.client_host.clone(),
                            coordinates.server_host.clone(),
                        );
                        self.security.sessions().purge_pair(&pair).await;
                    }
                    let may_retry = request.idempotent || e.is_retriable();
                    if !may_retry || attempt >= self.config.retry_attempts {
                        return Err(e);
                    }
                    self.logger.warn(format!(
                        "attempt {attempt} for {coordinates} failed ({e}); retrying"
                    ));
                    tokio::time::sleep(self.config.retry_backoff).await;
                }
            }
        }
    }

    /// One transmit/receive cycle including the deferred-response loop.
    async fn send_with_deferral(&self, request: &Request) -> Result<Response> {
        let coordinates = request.coordinates()?;
        let budget = request.effective_timeout(self.config.default_timeout);
        let deadline = Instant::now() + budget;
        let mut current = request.clone();

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(RpcError::Timeout(format!(
                    "budget of {budget:?} exhausted for {coordinates}"
                )));
            }

            let body = self
                .security
                .encrypt_outbound(
                    &RpcEnvelope::Request(current.clone()),
                    &coordinates.client_host,
                    &coordinates.server_host,
                )
                .await?;
            let frame = WireFrame {
                from: coordinates.client_host.clone(),
                to: coordinates.server_host.clone(),
                body,
            }
            .to_bytes()?;

            let reply_bytes = tokio::time::timeout(
                remaining,
                self.transport.exchange(&coordinates.server_host, frame),
            )
            .await
            .map_err(|_| {
                RpcError::Timeout(format!("no reply within {budget:?} for {coordinates}"))
            })??;

            let reply_frame = WireFrame::from_bytes(&reply_bytes)?;
            let envelope = self
                .security
                .decrypt_inbound(&reply_frame.body, &reply_frame.from, &reply_frame.to)
                .await?;
            let response = match envelope {
                RpcEnvelope::Response(response) => response,
                RpcEnvelope::Request(_) => {
                    return Err(RpcError::Protocol(
                        "expected a response envelope on the reply path".to_string(),
                    ))
                }
            };

            // A retriable error response (session loss on the far side) is
            // surfaced as a failure so the outer loop can rehandshake.
            if let Some(error) = response.error_info() {
                let reconstructed = error.reconstruct();
                if reconstructed.is_retriable() {
                    return Err(reconstructed);
                }
            }

            if response.coordinates() != &coordinates {
                let relay_allowed = response
                    .error_info()
                    .map(|error| error.is_relay_allowed())
                    .unwrap_or(false);
                if !relay_allowed {
                    return Err(RpcError::Protocol(format!(
                        "response coordinates {} do not match request {coordinates}",
                        response.coordinates()
                    )));
                }
            }

            match response {
                Response::Deferring { .. } => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(RpcError::Timeout(format!(
                            "budget of {budget:?} exhausted while deferred for {coordinates}"
                        )));
                    }
                    self.logger.debug(format!(
                        "{coordinates} deferred; polling again with {remaining:?} left"
                    ));
                    current = Request::deferred_poll(&coordinates, remaining);
                }
                other => return Ok(other),
            }
        }
    }
}

#[async_trait]
impl RemoteInvoker for RpcClient {
    async fn exchange(&self, request: Request) -> Result<Response> {
        self.exchange_populated(request).await
    }
}
