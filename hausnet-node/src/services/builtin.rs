// Built-in RPC plumbing handlers.
//
// INTENTION:
// The deferred-response poll, the inverse-queue poll, and the inverse
// response submission are ordinary registered request kinds resolved through
// the service registry, exactly like application handlers. They hold handles
// to the executor and inverse registry instead of application state.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;

use crate::messages::{kinds, Request, Response};
use crate::services::executor::ServiceExecutor;
use crate::services::inverse_registry::InverseRequestRegistry;
use crate::services::{HandlerContext, HandlerOutcome, ServiceHandler};

/// Answers a deferred-response poll with the stored response for the poll's
/// coordinates, or another deferring response when it is still not ready.
#[derive(Clone)]
pub struct DeferredPollHandler {
    executor: ServiceExecutor,
    wait: Duration,
}

impl DeferredPollHandler {
    pub fn new(executor: ServiceExecutor, wait: Duration) -> Self {
        Self { executor, wait }
    }
}

#[async_trait]
impl ServiceHandler for DeferredPollHandler {
    fn request_kind(&self) -> &str {
        kinds::DEFERRED_POLL
    }

    fn handler_name(&self) -> &str {
        "DeferredPollHandler"
    }

    fn clone_handler(&self) -> Box<dyn ServiceHandler> {
        Box::new(self.clone())
    }

    async fn handle(
        &mut self,
        request: &Request,
        _context: &HandlerContext,
    ) -> anyhow::Result<HandlerOutcome> {
        let coordinates = request.coordinates()?;
        let wait = request.effective_timeout(self.wait).min(self.wait);
        let response = match self
            .executor
            .await_response(coordinates.request_id, wait)
            .await
        {
            Some(response) => response,
            None => Response::deferring(coordinates),
        };
        Ok(HandlerOutcome::Response(response))
    }
}

/// Long-polls the inverse queue on behalf of the calling host and returns the
/// drained batch, serialized, or a null response when nothing arrived.
#[derive(Clone)]
pub struct InversePollHandler {
    inverse: Arc<InverseRequestRegistry>,
    wait: Duration,
}

impl InversePollHandler {
    pub fn new(inverse: Arc<InverseRequestRegistry>, wait: Duration) -> Self {
        Self { inverse, wait }
    }
}

#[async_trait]
impl ServiceHandler for InversePollHandler {
    fn request_kind(&self) -> &str {
        kinds::INVERSE_POLL
    }

    fn handler_name(&self) -> &str {
        "InversePollHandler"
    }

    fn clone_handler(&self) -> Box<dyn ServiceHandler> {
        Box::new(self.clone())
    }

    async fn handle(
        &mut self,
        request: &Request,
        context: &HandlerContext,
    ) -> anyhow::Result<HandlerOutcome> {
        let coordinates = request.coordinates()?;
        let batch = self.inverse.drain(&coordinates.client_host, self.wait).await;
        if batch.is_empty() {
            return Ok(HandlerOutcome::empty());
        }
        context.logger.debug(format!(
            "delivering {} inverse request(s) to host '{}'",
            batch.len(),
            coordinates.client_host
        ));
        let bytes = bincode::serialize(&batch).context("serializing inverse batch")?;
        Ok(HandlerOutcome::payload(bytes))
    }
}

/// Accepts a completed response for an inverse-routed request and stores it,
/// waking the waiter that originally submitted the request.
#[derive(Clone)]
pub struct InverseResponseHandler {
    executor: ServiceExecutor,
}

impl InverseResponseHandler {
    pub fn new(executor: ServiceExecutor) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl ServiceHandler for InverseResponseHandler {
    fn request_kind(&self) -> &str {
        kinds::INVERSE_RESPONSE
    }

    fn handler_name(&self) -> &str {
        "InverseResponseHandler"
    }

    fn clone_handler(&self) -> Box<dyn ServiceHandler> {
        Box::new(self.clone())
    }

    async fn handle(
        &mut self,
        request: &Request,
        _context: &HandlerContext,
    ) -> anyhow::Result<HandlerOutcome> {
        let payload = request
            .payload
            .as_deref()
            .context("inverse response submission without payload")?;
        let response: Response =
            bincode::deserialize(payload).context("deserializing inverse response")?;
        self.executor.store_response(response).await?;
        Ok(HandlerOutcome::empty())
    }
}
