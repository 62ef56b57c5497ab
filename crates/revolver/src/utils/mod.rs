//! Supporting utilities for the request path.
//!
//! - [`path`] - upstream URL construction
//! - [`route_matcher`] - compiled per-service routing tables

pub mod path;
pub mod route_matcher;
