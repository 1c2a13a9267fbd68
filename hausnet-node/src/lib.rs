// Hausnet Node
//
// Secured bidirectional RPC substrate for a network of cooperating hosts.
// A node registers service handlers, invokes services on other hosts by
// request kind, and keeps long-running work alive through deferred-response
// polling. Hosts that cannot accept inbound connections receive their work
// through the inverse queue instead.

pub mod config;
pub mod error;
pub mod messages;
pub mod network;
pub mod node;
pub mod services;

pub use config::NodeConfig;
pub use error::{classes, Result, RpcError};
pub use messages::{
    kinds, Coordinates, ErrorInfo, Request, RequestId, Response, RpcEnvelope, TIMEOUT_UNDEFINED,
};
pub use node::Node;
pub use services::{HandlerContext, HandlerOutcome, ServiceHandler};
