//! HTTP surface of the gateway.
//!
//! Route registrations follow the actix-web `configure` convention so the
//! binary can compose them onto one `App`:
//!
//! - [`ingress`] - `/apis/{service}/{path}` invoke catch-all
//! - [`mailbox`] - polling, mailbox listing and callback receipts under `/v1`
//! - [`admin`] - per-API enable/disable and status under `/v1/manage`
//! - [`metadata`] - service summary under `/v1/metadata`
//! - [`health`] - liveness/readiness probes

pub mod admin;
pub mod health;
pub mod ingress;
pub mod mailbox;
pub mod metadata;
