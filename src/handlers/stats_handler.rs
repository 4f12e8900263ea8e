//! handlers/stats_handler.rs
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;

use crate::{
    error::TrackerError, models::mail_model::max_len,
    services::tracking_service::TrackingService,
};

#[derive(Deserialize)]
pub struct LastEmailQuery {
    to: String,
    #[serde(rename = "uniqueID")]
    unique_id: String,
}

fn tracker_error(e: TrackerError) -> HttpResponse {
    let body = json!({ "success": false, "error": e.to_string() });
    match e {
        TrackerError::InvalidId(_) => HttpResponse::BadRequest().json(body),
        TrackerError::NotFound(_) => HttpResponse::NotFound().json(body),
        TrackerError::StoreUnavailable => HttpResponse::ServiceUnavailable().json(body),
        TrackerError::Database(_) => {
            log::error!("Tracking store error: {}", body["error"]);
            HttpResponse::InternalServerError().json(body)
        }
    }
}

/// GET /api/stats/{id}
pub async fn get_stats_endpoint(
    tracking: web::Data<TrackingService>,
    path: web::Path<String>,
) -> HttpResponse {
    let id = path.into_inner();
    match tracking.get(&id).await {
        Ok(Some(record)) => HttpResponse::Ok().json(record),
        Ok(None) => tracker_error(TrackerError::NotFound(id)),
        Err(e) => tracker_error(e),
    }
}

/// GET /api/stats/last?to=..&uniqueID=..
/// `{"stat": null}` when nothing matches.
pub async fn last_email_endpoint(
    tracking: web::Data<TrackingService>,
    query: web::Query<LastEmailQuery>,
) -> HttpResponse {
    let q = query.into_inner();
    if q.to.is_empty() || q.unique_id.is_empty() {
        return HttpResponse::BadRequest().json(json!({
            "success": false,
            "error": "to and uniqueID are required"
        }));
    }
    if let Err(e) = max_len("uniqueID", &q.unique_id, 256) {
        return HttpResponse::BadRequest().json(json!({ "success": false, "error": e.to_string() }));
    }

    match tracking.get_latest_by_correlation(&q.to, &q.unique_id).await {
        Ok(stat) => HttpResponse::Ok().json(json!({ "stat": stat })),
        Err(e) => tracker_error(e),
    }
}
