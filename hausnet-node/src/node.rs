// Node
//
// INTENTION:
// The assembled runtime: configuration, service registry, executor, inverse
// queue, session table, security wrapper, RPC client, and an optional server
// transport, wired together and started as one unit. A node is both a caller
// (requests submitted through it reach local handlers, remote hosts, or the
// inverse queue) and a callee (inbound frames are decrypted, dispatched, and
// answered). A client-only node runs the inverse polling loop instead of a
// server transport.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

use hausnet_common::logging::{Component, Logger};
use hausnet_keys::store::IdentityCrypto;

use crate::config::NodeConfig;
use crate::error::{classes, Result, RpcError};
use crate::messages::{kinds, BincodeCodec, Coordinates, ErrorInfo, Request, Response, RpcEnvelope};
use crate::network::rpc_client::RpcClient;
use crate::network::security::SecurityWrapper;
use crate::network::sessions::SessionManager;
use crate::network::transport::{ClientTransport, ServerTransport, WireFrame};
use crate::services::builtin::{DeferredPollHandler, InversePollHandler, InverseResponseHandler};
use crate::services::executor::ServiceExecutor;
use crate::services::inverse_registry::InverseRequestRegistry;
use crate::services::service_registry::ServiceRegistry;
use crate::services::{HandlerContext, HandlerOutcome, ServiceHandler};

pub struct Node {
    config: Arc<NodeConfig>,
    registry: Arc<ServiceRegistry>,
    inverse: Arc<InverseRequestRegistry>,
    executor: ServiceExecutor,
    sessions: Arc<SessionManager>,
    security: Arc<SecurityWrapper>,
    rpc_client: Arc<RpcClient>,
    server: Option<Arc<dyn ServerTransport>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    logger: Logger,
}

impl Node {
    pub fn new(
        config: NodeConfig,
        identity: Arc<dyn IdentityCrypto>,
        client_transport: Arc<dyn ClientTransport>,
        server_transport: Option<Arc<dyn ServerTransport>>,
    ) -> Self {
        let config = Arc::new(config);
        let logger = Logger::new_root(Component::Node, config.local_host.as_str());

        let sessions = Arc::new(SessionManager::new(config.session_max_age, &logger));
        let security = Arc::new(SecurityWrapper::new(
            identity,
            sessions.clone(),
            Arc::new(BincodeCodec),
            &logger,
        ));
        let rpc_client = Arc::new(RpcClient::new(
            client_transport,
            security.clone(),
            config.clone(),
            &logger,
        ));
        let registry = Arc::new(ServiceRegistry::new(&logger));
        let inverse = Arc::new(InverseRequestRegistry::new(config.default_timeout, &logger));
        let executor = ServiceExecutor::new(
            config.clone(),
            registry.clone(),
            inverse.clone(),
            Some(rpc_client.clone()),
            &logger,
        );

        Self {
            config,
            registry,
            inverse,
            executor,
            sessions,
            security,
            rpc_client,
            server: server_transport,
            tasks: Mutex::new(Vec::new()),
            logger,
        }
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn executor(&self) -> &ServiceExecutor {
        &self.executor
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub async fn register_handler(&self, handler: Box<dyn ServiceHandler>) {
        self.registry.register(handler).await;
    }

    /// Declare `kind` a specialization of `parent` so requests fall back to
    /// the parent's handlers when no handler claims the kind itself.
    pub async fn register_parent_kind(
        &self,
        kind: impl Into<String>,
        parent: impl Into<String>,
    ) {
        self.registry.register_parent(kind, parent).await;
    }

    /// Start the node: logging, plumbing handlers, the server transport (when
    /// present), the background sweeps, and the inverse polling loop on
    /// client-only nodes.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        self.config.logging.apply();
        self.logger.info(format!(
            "starting node '{}' (server host '{}', client_only={})",
            self.config.local_host, self.config.server_host, self.config.client_only
        ));

        self.registry
            .register(Box::new(DeferredPollHandler::new(
                self.executor.clone(),
                self.config.low_level_wait,
            )))
            .await;
        self.registry
            .register(Box::new(InversePollHandler::new(
                self.inverse.clone(),
                self.config.inverse_poll_wait,
            )))
            .await;
        self.registry
            .register(Box::new(InverseResponseHandler::new(self.executor.clone())))
            .await;

        let mut tasks = self.tasks.lock().await;
        tasks.push(self.executor.start_sweeper());
        tasks.push(
            self.sessions
                .start_sweeper(self.config.session_sweep_period, self.config.session_grace),
        );

        if let Some(server) = &self.server {
            let node = self.clone();
            let handler: crate::network::transport::InboundHandler =
                Arc::new(move |bytes: Vec<u8>| {
                    let node = node.clone();
                    Box::pin(async move { node.handle_frame(bytes).await })
                });
            server.clone().start(handler).await?;
            self.logger
                .info(format!("listening on {}", server.local_address()));
        }

        if self.config.client_only {
            tasks.push(self.spawn_inverse_poll_loop());
        }

        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            task.abort();
        }
        if let Some(server) = &self.server {
            server.stop().await?;
        }
        self.logger
            .info(format!("node '{}' stopped", self.config.local_host));
        Ok(())
    }

    /// Submit a request through this node and wait for its result. Works
    /// uniformly for local, remote, and inverse-routed targets.
    pub async fn request(&self, request: Request) -> Result<Option<Vec<u8>>> {
        let timeout = request.effective_timeout(self.config.default_timeout);
        let coordinates = self.executor.submit(request).await?;
        match self
            .executor
            .await_response(coordinates.request_id, timeout)
            .await
        {
            Some(Response::Value { payload, .. }) => Ok(Some(payload)),
            Some(Response::Null { .. }) => Ok(None),
            Some(Response::Error { error, .. }) => Err(error.reconstruct()),
            Some(Response::Deferring { .. }) => Err(RpcError::Protocol(format!(
                "unresolved deferring response surfaced for {coordinates}"
            ))),
            None => Err(RpcError::Timeout(format!(
                "no response within {timeout:?} for {coordinates}"
            ))),
        }
    }

    /// Full inbound path for one wire frame: decode the outer envelope,
    /// decrypt, dispatch, and return the encrypted reply frame.
    async fn handle_frame(&self, bytes: Vec<u8>) -> Result<Vec<u8>> {
        let frame = WireFrame::from_bytes(&bytes)?;
        let outer_from = frame.from.clone();
        let outer_to = frame.to.clone();

        if !self.config.is_local(&outer_to) {
            return Err(RpcError::Protocol(format!(
                "frame addressed to '{outer_to}' arrived at '{}'",
                self.config.local_host
            )));
        }

        let response = match self
            .security
            .decrypt_inbound(&frame.body, &outer_from, &outer_to)
            .await
        {
            Ok(RpcEnvelope::Request(request)) => self.handle_inbound(request).await,
            Ok(RpcEnvelope::Response(_)) => {
                return Err(RpcError::Protocol(
                    "unsolicited response envelope on the inbound path".to_string(),
                ))
            }
            // Session loss is answered in-band so the caller can purge its
            // side and rehandshake; the error response cannot carry the
            // caller's coordinates because the frame never decrypted.
            Err(RpcError::SessionNotFound(message)) => Response::error(
                Coordinates {
                    request_id: Uuid::nil(),
                    client_host: outer_from.clone(),
                    server_host: outer_to.clone(),
                },
                ErrorInfo::new(classes::SESSION_NOT_FOUND, message),
            ),
            Err(e) => return Err(e),
        };

        let body = self
            .security
            .encrypt_outbound(
                &RpcEnvelope::Response(response),
                &self.config.local_host,
                &outer_from,
            )
            .await?;
        WireFrame {
            from: self.config.local_host.clone(),
            to: outer_from,
            body,
        }
        .to_bytes()
    }

    /// Dispatch a decrypted inbound request and produce its response.
    ///
    /// Plumbing kinds (deferred poll, inverse poll, inverse response) run
    /// directly against the registry: a deferred poll reuses its original
    /// request's coordinates, so registering it as pending work would collide
    /// with the entry it is polling for.
    async fn handle_inbound(&self, request: Request) -> Response {
        let coordinates = match request.coordinates() {
            Ok(coordinates) => coordinates,
            Err(e) => {
                return Response::error(
                    Coordinates {
                        request_id: Uuid::nil(),
                        client_host: self.config.local_host.clone(),
                        server_host: self.config.local_host.clone(),
                    },
                    e.to_error_info(),
                )
            }
        };

        if self.is_plumbing_kind(&request.kind) {
            return self.run_plumbing(&request, coordinates).await;
        }

        let wait = request
            .effective_timeout(self.config.default_timeout)
            .min(self.config.low_level_wait);

        let submitted = self.executor.submit(request).await;
        if let Err(e) = submitted {
            return Response::error(coordinates, e.to_error_info());
        }

        match self
            .executor
            .await_response(coordinates.request_id, wait)
            .await
        {
            Some(response) => response,
            None => {
                self.logger.debug(format!(
                    "{coordinates} still running after {wait:?}; deferring"
                ));
                Response::deferring(coordinates)
            }
        }
    }

    fn is_plumbing_kind(&self, kind: &str) -> bool {
        kind == kinds::DEFERRED_POLL
            || kind == kinds::INVERSE_POLL
            || kind == kinds::INVERSE_RESPONSE
    }

    async fn run_plumbing(&self, request: &Request, coordinates: Coordinates) -> Response {
        let mut handler = match self.registry.resolve(&request.kind).await {
            Ok(handler) => handler,
            Err(e) => return Response::error(coordinates, e.to_error_info()),
        };
        let context = HandlerContext {
            local_host: self.config.local_host.clone(),
            logger: self.logger.with_request_path(request.kind.clone()),
        };
        match handler.handle(request, &context).await {
            Ok(HandlerOutcome::Payload(Some(payload))) => Response::value(coordinates, payload),
            Ok(HandlerOutcome::Payload(None)) => Response::null(coordinates),
            Ok(HandlerOutcome::Response(response)) => response,
            Err(e) => Response::error(coordinates, ErrorInfo::from_handler_error(&e)),
        }
    }

    /// Client-only nodes pull their work: long-poll the server's inverse
    /// queue, run each delivered request locally, and push the completed
    /// response back as an inverse response submission.
    fn spawn_inverse_poll_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let node = self.clone();
        let logger = self.logger.with_component(Component::Inverse);
        tokio::spawn(async move {
            loop {
                match node.poll_inverse_once().await {
                    Ok(count) if count > 0 => {
                        logger.debug(format!("picked up {count} inverse request(s)"));
                    }
                    Ok(_) => {}
                    Err(e) => {
                        logger.warn(format!("inverse poll failed: {e}"));
                        tokio::time::sleep(node.config.retry_backoff).await;
                    }
                }
            }
        })
    }

    async fn poll_inverse_once(self: &Arc<Self>) -> Result<usize> {
        // Budget leaves headroom over the server-side long-poll wait so the
        // poll itself does not time out while the server is still holding it.
        let budget = self.config.inverse_poll_wait + Duration::from_secs(5);
        let poll = Request::new(kinds::INVERSE_POLL, self.config.server_host.clone())
            .with_timeout(budget)
            .idempotent();

        let batch = match self.rpc_client.invoke(poll).await? {
            Some(bytes) => bincode::deserialize::<Vec<Request>>(&bytes)
                .map_err(|e| RpcError::Protocol(format!("malformed inverse batch: {e}")))?,
            None => return Ok(0),
        };

        let count = batch.len();
        for request in batch {
            let node = self.clone();
            tokio::spawn(async move {
                node.run_inverse_request(request).await;
            });
        }
        Ok(count)
    }

    async fn run_inverse_request(self: Arc<Self>, request: Request) {
        let coordinates = match request.coordinates() {
            Ok(coordinates) => coordinates,
            Err(e) => {
                self.logger
                    .error(format!("inverse request without coordinates: {e}"));
                return;
            }
        };
        let timeout = request.effective_timeout(self.config.default_timeout);

        let response = match self.executor.submit(request).await {
            Ok(_) => match self
                .executor
                .await_response(coordinates.request_id, timeout)
                .await
            {
                Some(response) => response,
                None => Response::error(
                    coordinates.clone(),
                    RpcError::Timeout(format!(
                        "inverse request {coordinates} produced no response within {timeout:?}"
                    ))
                    .to_error_info(),
                ),
            },
            Err(e) => Response::error(coordinates.clone(), e.to_error_info()),
        };

        let bytes = match bincode::serialize(&response) {
            Ok(bytes) => bytes,
            Err(e) => {
                self.logger
                    .error(format!("failed to serialize inverse response: {e}"));
                return;
            }
        };
        let submission = Request::new(kinds::INVERSE_RESPONSE, self.config.server_host.clone())
            .with_payload(bytes)
            .idempotent();
        if let Err(e) = self.rpc_client.invoke(submission).await {
            self.logger.error(format!(
                "failed to deliver inverse response for {coordinates}: {e}"
            ));
        }
    }
}
