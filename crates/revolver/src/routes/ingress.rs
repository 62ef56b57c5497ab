//! The invoke surface: `ANY /apis/{service}/{path}`.
//!
//! A single catch-all resource feeds every ingress request into the gateway.
//! The handler only shapes data: it builds an [`IngressRequest`] from the
//! actix request, hands it to the engine and maps the engine response back
//! onto the wire. All policy lives below this layer.

use crate::gateway::Gateway;
use crate::models::error::GatewayError;
use crate::services::engine::{EngineResponse, IngressRequest};
use actix_web::http::StatusCode;
use actix_web::{web, HttpRequest, HttpResponse};
use serde_json::json;

/// Maximum accepted request body. Larger payloads are rejected by actix
/// before the handler runs.
const MAX_PAYLOAD_BYTES: usize = 1024 * 1024;

/// Registers the invoke catch-all.
pub fn configure_ingress(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::PayloadConfig::new(MAX_PAYLOAD_BYTES))
        .service(web::resource("/apis/{service}/{tail:.*}").to(invoke));
}

async fn invoke(
    req: HttpRequest,
    body: web::Bytes,
    gateway: web::Data<Gateway>,
) -> Result<HttpResponse, GatewayError> {
    let service = req
        .match_info()
        .get("service")
        .unwrap_or_default()
        .to_string();
    let tail = req.match_info().get("tail").unwrap_or_default();
    let path = format!("/{}", tail);
    let peer_addr = req
        .connection_info()
        .realip_remote_addr()
        .map(|s| s.to_string());

    let ingress = IngressRequest {
        service,
        path,
        method: req.method().clone(),
        headers: req.headers().clone(),
        body,
        peer_addr,
    };

    match gateway.invoke(ingress).await? {
        EngineResponse::Inline {
            request_id,
            status,
            headers,
            body,
        } => {
            let status =
                StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
            let mut builder = HttpResponse::build(status);
            for (name, value) in &headers {
                builder.insert_header((name.as_str(), value.as_str()));
            }
            builder.insert_header(("X-Request-Id", request_id.as_str()));
            Ok(builder.body(body))
        }
        EngineResponse::Accepted { request_id } => Ok(HttpResponse::Accepted()
            .insert_header(("X-Request-Id", request_id.as_str()))
            .json(json!({
                "requestId": request_id,
                "state": "RECEIVED",
            }))),
    }
}
