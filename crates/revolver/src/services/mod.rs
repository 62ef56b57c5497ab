//! Service layer: the components between the HTTP surface and the upstream
//! wire.
//!
//! - [`bulkhead`] - per-API isolation compartments with circuit breaking
//! - [`client`] - pooled upstream HTTP clients
//! - [`dispatcher`] - callback delivery for completed async requests
//! - [`engine`] - the invoke pipeline
//! - [`resolver`] - endpoint resolution (static round-robin or cluster feed)

pub mod bulkhead;
pub mod client;
pub mod dispatcher;
pub mod engine;
pub mod resolver;
