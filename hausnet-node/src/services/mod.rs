// Services Module
//
// INTENTION:
// This module defines the service-side contracts of the RPC substrate: the
// pluggable handler trait, the context handed to a handler invocation, and
// the registry/executor/inverse components built on top of them.
//
// ARCHITECTURAL PRINCIPLES:
// 1. Explicit registration - handlers declare their request kind; there is
//    no runtime type introspection anywhere in the dispatch path.
// 2. Per-invocation isolation - handlers are stateful per call and never
//    shared; the registry hands out a fresh clone for every invocation.
// 3. Request-response pattern - every interaction is a request with exactly
//    one response, correlated by request id.

pub mod builtin;
pub mod executor;
pub mod inverse_registry;
pub mod service_registry;

use async_trait::async_trait;
use hausnet_common::logging::Logger;
use hausnet_common::types::HostId;

use crate::messages::{Request, Response};

pub use executor::ServiceExecutor;
pub use inverse_registry::InverseRequestRegistry;
pub use service_registry::ServiceRegistry;

/// Context handed to a handler invocation.
pub struct HandlerContext {
    /// The host this node runs as.
    pub local_host: HostId,
    /// Logger scoped to the invocation.
    pub logger: Logger,
}

/// What a handler produced.
pub enum HandlerOutcome {
    /// Ordinary application result; `Some` becomes a value response, `None`
    /// a null response.
    Payload(Option<Vec<u8>>),
    /// A fully-formed response passed through unchanged. Used by the RPC
    /// plumbing handlers that relay stored responses verbatim.
    Response(Response),
}

impl HandlerOutcome {
    pub fn payload(bytes: Vec<u8>) -> Self {
        HandlerOutcome::Payload(Some(bytes))
    }

    pub fn empty() -> Self {
        HandlerOutcome::Payload(None)
    }
}

/// A pluggable service handler.
///
/// Handlers are registered as prototypes; the registry clones one per
/// invocation, so `handle` may freely mutate internal state without any
/// cross-call synchronization.
#[async_trait]
pub trait ServiceHandler: Send + Sync {
    /// The request kind this handler resolves.
    fn request_kind(&self) -> &str;

    /// Implementation name; used as the deterministic tie-break when several
    /// handlers share a kind and priority.
    fn handler_name(&self) -> &str;

    /// Higher wins when several handlers are registered for one kind.
    fn priority(&self) -> i32 {
        0
    }

    /// Produce the per-invocation clone.
    fn clone_handler(&self) -> Box<dyn ServiceHandler>;

    /// Resolve the request. Errors are captured into an error response and
    /// shipped back to the caller.
    async fn handle(
        &mut self,
        request: &Request,
        context: &HandlerContext,
    ) -> anyhow::Result<HandlerOutcome>;
}
