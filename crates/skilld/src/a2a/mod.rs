//! Agent-to-agent delegation: outbound routing, HTTP transport, and the
//! inbound task endpoint.

pub mod client;
pub mod router;
pub mod server;

pub use client::HttpTransport;
pub use router::{DelegationError, DelegationRouter, DelegationTransport, TransportError};
pub use server::{start_server, AppState, DelegationHandler};
