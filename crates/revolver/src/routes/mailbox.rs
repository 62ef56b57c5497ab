//! Polling and callback-receipt surface under `/v1`.
//!
//! - `GET /v1/request/{request_id}` - fetch one persisted record. While the
//!   request is still in flight this returns a JSON status envelope; once a
//!   response has been captured the stored response is replayed verbatim.
//! - `GET /v1/mailbox/{mailbox_id}` - list record summaries for a mailbox.
//! - `POST /v1/callback/{request_id}` - accept an upstream-originated
//!   callback: the posted body becomes the record's response and the record
//!   completes (and is queued for delivery in callback mode).

use crate::gateway::Gateway;
use crate::models::record::{RequestMode, RequestState, StoredResponse};
use crate::storage::{MailboxStore, RecordPatch, StorageError};
use actix_web::http::StatusCode;
use actix_web::{web, HttpRequest, HttpResponse, Result};
use log::debug;
use serde_json::json;

pub fn configure_mailbox(cfg: &mut web::ServiceConfig) {
    cfg.route("/v1/request/{request_id}", web::get().to(get_request))
        .route("/v1/mailbox/{mailbox_id}", web::get().to(list_mailbox))
        .route("/v1/callback/{request_id}", web::post().to(callback_receipt));
}

async fn get_request(
    path: web::Path<String>,
    gateway: web::Data<Gateway>,
) -> Result<HttpResponse> {
    let request_id = path.into_inner();
    let record = match gateway.store().get(&request_id).await {
        Ok(Some(record)) => record,
        Ok(None) => return Ok(not_found(&request_id)),
        Err(e) => return Ok(storage_unavailable(e)),
    };

    // Replay the stored response once one exists; otherwise report progress.
    if let Some(response) = &record.response {
        let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::OK);
        let mut builder = HttpResponse::build(status);
        for (name, value) in &response.headers {
            builder.insert_header((name.as_str(), value.as_str()));
        }
        builder.insert_header(("X-Request-Id", record.request_id.as_str()));
        return Ok(builder.body(response.body.clone()));
    }

    Ok(HttpResponse::Ok().json(record.summary()))
}

async fn list_mailbox(
    path: web::Path<String>,
    gateway: web::Data<Gateway>,
) -> Result<HttpResponse> {
    let mailbox_id = path.into_inner();
    match gateway.store().list_mailbox(&mailbox_id).await {
        Ok(records) => {
            let summaries: Vec<_> = records.iter().map(|r| r.summary()).collect();
            Ok(HttpResponse::Ok().json(json!({
                "mailboxId": mailbox_id,
                "requests": summaries,
            })))
        }
        Err(e) => Ok(storage_unavailable(e)),
    }
}

async fn callback_receipt(
    req: HttpRequest,
    path: web::Path<String>,
    body: web::Bytes,
    gateway: web::Data<Gateway>,
) -> Result<HttpResponse> {
    let request_id = path.into_inner();
    let record = match gateway.store().get(&request_id).await {
        Ok(Some(record)) => record,
        Ok(None) => return Ok(not_found(&request_id)),
        Err(e) => return Ok(storage_unavailable(e)),
    };

    let content_type = req
        .headers()
        .get(actix_web::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();
    let response = StoredResponse {
        status: 200,
        headers: vec![("content-type".to_string(), content_type)],
        body: body.to_vec(),
    };

    match gateway
        .store()
        .update_state(
            &request_id,
            RequestState::Completed,
            RecordPatch::with_response(response),
        )
        .await
    {
        Ok(updated) => {
            debug!("callback receipt completed request {}", request_id);
            if updated.mode == RequestMode::Callback {
                if let Ok(pending) = gateway
                    .store()
                    .update_state(&request_id, RequestState::CallbackPending, RecordPatch::none())
                    .await
                {
                    gateway.dispatcher().enqueue(&pending.request_id);
                }
            }
            Ok(HttpResponse::Ok().json(json!({
                "requestId": request_id,
                "acknowledged": true,
            })))
        }
        Err(StorageError::IllegalTransition { from, .. }) => {
            Ok(HttpResponse::Conflict().json(json!({
                "error": format!("request {} already in state {:?}", request_id, from),
                "kind": "conflict",
            })))
        }
        Err(e) => Ok(storage_unavailable(e)),
    }
}

fn not_found(request_id: &str) -> HttpResponse {
    HttpResponse::NotFound().json(json!({
        "error": format!("no record for request id {}", request_id),
        "kind": "not_found",
    }))
}

fn storage_unavailable(err: StorageError) -> HttpResponse {
    HttpResponse::ServiceUnavailable().json(json!({
        "error": err.to_string(),
        "kind": "storage",
    }))
}
