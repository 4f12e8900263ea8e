//! handlers/email_handler.rs
use actix_web::{web, HttpResponse};
use serde_json::json;

use crate::{
    models::mail_model::Mail,
    services::send_service::{SendError, SendOutcome, SendService},
};

/// POST /api/email/enqueue
pub async fn enqueue_email_endpoint(
    send_service: web::Data<SendService>,
    body: web::Json<Mail>,
) -> HttpResponse {
    let mail = body.into_inner();
    let to = mail.to.clone();

    match send_service.enqueue(mail).await {
        // A blocked mail is still a success: the recipient's choice was honoured.
        Ok(outcome) => HttpResponse::Ok().json(json!({
            "success": true,
            "sent": outcome == SendOutcome::Accepted,
        })),
        Err(SendError::Invalid(e)) => HttpResponse::BadRequest().json(json!({
            "success": false,
            "error": e.to_string()
        })),
        Err(e) => {
            log::error!("Enqueue error for {}: {}", to, e);
            HttpResponse::InternalServerError().json(json!({
                "success": false,
                "error": e.to_string()
            }))
        }
    }
}
