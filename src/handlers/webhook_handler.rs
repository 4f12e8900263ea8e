//! handlers/webhook_handler.rs
//! Receives provider event batches.

use actix_web::{http::header, web, HttpRequest, HttpResponse};
use serde_json::{json, Value};

use crate::services::ingest_service::IngestService;

/// Basic-auth password the webhook requires; `None` leaves it open.
#[derive(Debug, Clone)]
pub struct WebhookAuth(pub Option<String>);

/// Extracts the password from a `Basic` authorization header. The user name is ignored.
fn basic_auth_password(req: &HttpRequest) -> Option<String> {
    let value = req.headers().get(header::AUTHORIZATION)?.to_str().ok()?;
    let encoded = value.strip_prefix("Basic ")?;
    let decoded = base64::decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (_, password) = decoded.split_once(':')?;
    Some(password.to_string())
}

/// POST /webhook/events
pub async fn webhook_endpoint(
    req: HttpRequest,
    auth: web::Data<WebhookAuth>,
    ingest: web::Data<IngestService>,
    body: web::Bytes,
) -> HttpResponse {
    let peer = req
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_default();
    log::debug!("Webhook request from {}", peer);

    if let Some(expected) = &auth.0 {
        if basic_auth_password(&req).as_deref() != Some(expected.as_str()) {
            log::warn!("Webhook authorization failed from {}", peer);
            return HttpResponse::Unauthorized().json(json!({
                "success": false,
                "error": "Unauthorized"
            }));
        }
    }

    // Only the outer array is checked here; events are decoded one by one.
    let events: Vec<Value> = match serde_json::from_slice(&body) {
        Ok(events) => events,
        Err(e) => {
            log::warn!("Webhook failed to parse body from {}: {}", peer, e);
            return HttpResponse::BadRequest().json(json!({
                "success": false,
                "error": "Invalid POST Body"
            }));
        }
    };
    if events.is_empty() {
        log::warn!("Webhook received an empty batch from {}", peer);
        return HttpResponse::BadRequest().json(json!({
            "success": false,
            "error": "Invalid POST Body"
        }));
    }

    let report = ingest.ingest(events).await;
    HttpResponse::Ok().json(report)
}
