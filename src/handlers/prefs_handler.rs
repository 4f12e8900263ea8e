//! handlers/prefs_handler.rs
use actix_web::{web, HttpResponse};
use serde_json::json;

use crate::{
    error::PreferenceError,
    models::preference_model::{MovePrefsRequest, PrefsResponse, UpdatePrefsRequest},
    services::preference_service::PreferenceService,
};

fn store_error(e: PreferenceError) -> HttpResponse {
    log::error!("Preference store error: {}", e);
    let body = json!({ "success": false, "error": e.to_string() });
    match e {
        PreferenceError::StoreUnavailable => HttpResponse::ServiceUnavailable().json(body),
        _ => HttpResponse::InternalServerError().json(body),
    }
}

fn bad_request(msg: String) -> HttpResponse {
    HttpResponse::BadRequest().json(json!({ "success": false, "error": msg }))
}

/// GET /api/prefs/{email}
pub async fn get_prefs_endpoint(
    prefs: web::Data<PreferenceService>,
    path: web::Path<String>,
) -> HttpResponse {
    let email = path.into_inner();
    match prefs.get_flags(&email).await {
        Ok(flags) => HttpResponse::Ok().json(PrefsResponse { email, flags }),
        Err(e) => store_error(e),
    }
}

/// GET /api/prefs/{email}/record
pub async fn get_prefs_record_endpoint(
    prefs: web::Data<PreferenceService>,
    path: web::Path<String>,
) -> HttpResponse {
    let email = path.into_inner();
    match prefs.get_record(&email).await {
        Ok(Some(record)) => HttpResponse::Ok().json(record),
        Ok(None) => HttpResponse::NotFound().json(json!({
            "success": false,
            "error": format!("no preferences stored for {email}")
        })),
        Err(e) => store_error(e),
    }
}

/// PUT /api/prefs
pub async fn update_prefs_endpoint(
    prefs: web::Data<PreferenceService>,
    body: web::Json<UpdatePrefsRequest>,
) -> HttpResponse {
    let req = body.into_inner();
    if let Err(e) = req.validate() {
        return bad_request(e.to_string());
    }
    match prefs.set_flags(&req.email, req.flags).await {
        Ok(()) => HttpResponse::Ok().json(json!({ "success": true })),
        Err(e) => store_error(e),
    }
}

/// POST /api/prefs/move
pub async fn move_prefs_endpoint(
    prefs: web::Data<PreferenceService>,
    body: web::Json<MovePrefsRequest>,
) -> HttpResponse {
    let req = body.into_inner();
    if let Err(e) = req.validate() {
        return bad_request(e.to_string());
    }
    match prefs.move_record(&req.from, &req.to).await {
        Ok(()) => HttpResponse::Ok().json(json!({ "success": true })),
        Err(e) => store_error(e),
    }
}
