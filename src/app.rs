//! app.rs
use crate::handlers::{email_handler, prefs_handler, stats_handler, webhook_handler};
use crate::models::mail_model::MAX_REQUEST_BYTES;
use actix_web::web;

/// Provider webhook batches can hold thousands of events.
const MAX_WEBHOOK_BYTES: usize = 16 * 1024 * 1024;

pub fn init_app(cfg: &mut web::ServiceConfig) {
    // Aumentar límites: un Mail válido puede llevar html y text de 2 MiB cada uno
    cfg.app_data(web::JsonConfig::default().limit(MAX_REQUEST_BYTES))
        .app_data(web::PayloadConfig::default().limit(MAX_WEBHOOK_BYTES));

    cfg.service(
        web::scope("/api")
            .service(
                web::scope("/email")
                    .route("/enqueue", web::post().to(email_handler::enqueue_email_endpoint)),
            )
            .service(
                web::scope("/prefs")
                    .route("", web::put().to(prefs_handler::update_prefs_endpoint))
                    .route("/move", web::post().to(prefs_handler::move_prefs_endpoint))
                    .route("/{email}", web::get().to(prefs_handler::get_prefs_endpoint))
                    .route(
                        "/{email}/record",
                        web::get().to(prefs_handler::get_prefs_record_endpoint),
                    ),
            )
            .service(
                web::scope("/stats")
                    .route("/last", web::get().to(stats_handler::last_email_endpoint))
                    .route("/{id}", web::get().to(stats_handler::get_stats_endpoint)),
            ),
    )
    .service(
        web::scope("/webhook")
            .route("/events", web::post().to(webhook_handler::webhook_endpoint)),
    );
}
