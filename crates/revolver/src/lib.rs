//! # revolver
//!
//! Core library of the Revolver API gateway: a resilient HTTP front for a
//! fleet of upstream services.
//!
//! Clients call a logical `(service, path)`; the gateway resolves an
//! endpoint, pushes the call through a per-API isolation compartment
//! (concurrency cap, time budget, circuit breaker, optional fallback) and
//! serves the result in one of three modes over a single wire contract:
//!
//! - **sync** - the upstream response is returned inline
//! - **polling** - the request is persisted and acknowledged with `202`;
//!   the caller fetches the response later by request id
//! - **callback** - as polling, but the completed response is POSTed to a
//!   caller-supplied URL with bounded retries
//!
//! # Architecture
//!
//! ```text
//! ingress -> router -> toggles -> mode -> mailbox -> resolver -> bulkhead -> upstream
//!                                            |                                 |
//!                            polling GET <---+---- callback dispatcher <-------+
//! ```
//!
//! The [`gateway::Gateway`] value owns every shared component; there are no
//! process-wide singletons. See the module docs for the individual pieces.

pub mod config;
pub mod gateway;
pub mod logs;
pub mod models;
pub mod routes;
pub mod services;
pub mod storage;
pub mod utils;
