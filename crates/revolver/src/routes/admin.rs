//! Admin surface: per-API enable/disable flags under `/v1/manage`.
//!
//! Toggles are consulted on every ingress request, so a disable takes effect
//! immediately. Unknown `(service, api)` pairs are caller errors (400).

use crate::gateway::Gateway;
use crate::models::error::GatewayError;
use actix_web::{web, HttpResponse};
use serde_json::json;

pub fn configure_admin(cfg: &mut web::ServiceConfig) {
    cfg.route("/v1/manage/api/status", web::get().to(list_status))
        .route(
            "/v1/manage/api/status/{service}/{api}",
            web::get().to(get_status),
        )
        .route(
            "/v1/manage/api/status/{service}/{api}/enable",
            web::post().to(enable_api),
        )
        .route(
            "/v1/manage/api/status/{service}/{api}/disable",
            web::post().to(disable_api),
        );
}

async fn list_status(gateway: web::Data<Gateway>) -> HttpResponse {
    HttpResponse::Ok().json(json!({ "apis": gateway.api_status() }))
}

async fn get_status(
    path: web::Path<(String, String)>,
    gateway: web::Data<Gateway>,
) -> Result<HttpResponse, GatewayError> {
    let (service, api) = path.into_inner();
    let status = gateway
        .api_status()
        .into_iter()
        .find(|row| row.service == service && row.api == api)
        .ok_or_else(|| GatewayError::BadRequest {
            message: format!("unknown api {}.{}", service, api),
        })?;
    Ok(HttpResponse::Ok().json(status))
}

async fn enable_api(
    path: web::Path<(String, String)>,
    gateway: web::Data<Gateway>,
) -> Result<HttpResponse, GatewayError> {
    set_api(path.into_inner(), gateway, true)
}

async fn disable_api(
    path: web::Path<(String, String)>,
    gateway: web::Data<Gateway>,
) -> Result<HttpResponse, GatewayError> {
    set_api(path.into_inner(), gateway, false)
}

fn set_api(
    (service, api): (String, String),
    gateway: web::Data<Gateway>,
    enabled: bool,
) -> Result<HttpResponse, GatewayError> {
    gateway.toggles().set(&service, &api, enabled)?;
    Ok(HttpResponse::Ok().json(json!({
        "service": service,
        "api": api,
        "enabled": enabled,
    })))
}
