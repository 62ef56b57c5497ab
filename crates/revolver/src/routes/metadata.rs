//! Service metadata: `GET /v1/metadata/status`.
//!
//! Summary-level only: service identity, instance count and per-status
//! counts as seen by the resolver.

use crate::gateway::Gateway;
use actix_web::{web, HttpResponse};
use serde_json::json;

pub fn configure_metadata(cfg: &mut web::ServiceConfig) {
    cfg.route("/v1/metadata/status", web::get().to(status));
}

async fn status(gateway: web::Data<Gateway>) -> HttpResponse {
    HttpResponse::Ok().json(json!({ "services": gateway.metadata_status() }))
}
