use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use dotenv::dotenv;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};

use crate::config::app_config::AppConfig;
use crate::handlers::webhook_handler::WebhookAuth;
use crate::logger::init_logger;
use crate::models::relay_model::QueueName;
use crate::services::consumer_service::ConsumerSupervisor;
use crate::services::ingest_service::{IngestService, StatsJobHandler};
use crate::services::mailer_service::{mailer_from_config, Mailer};
use crate::services::preference_service::PreferenceService;
use crate::services::queue_transport::{QueueTransport, RedisQueue};
use crate::services::relay_service::{HandlerMap, QueueRelay};
use crate::services::send_service::{SendJobHandler, SendService};
use crate::services::tracking_service::TrackingService;

mod app;
mod config;
mod error;
mod handlers;
mod logger;
mod models;
mod services;
#[cfg(test)]
mod tests;

/// Local path of a file-backed SQLite URL, `None` for in-memory databases.
fn sqlite_file_path(db_url: &str) -> Option<&Path> {
    let rest = db_url
        .strip_prefix("sqlite://")
        .or_else(|| db_url.strip_prefix("sqlite:"))?;
    let path = rest.split('?').next().unwrap_or_default();
    if path.is_empty() || path == ":memory:" {
        return None;
    }
    Some(Path::new(path))
}

async fn setup_database(db_url: &str) -> Result<Pool<Sqlite>> {
    // 1) Crear la carpeta del archivo si hace falta
    if let Some(dir) = sqlite_file_path(db_url).and_then(Path::parent) {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("No se pudo crear directorio {}", dir.display()))?;
        }
    }

    // 2) Opciones de conexión (crea la base si no existe)
    let options = SqliteConnectOptions::from_str(db_url)
        .with_context(|| format!("Invalid DATABASE_URL {db_url}"))?
        .create_if_missing(true);

    log::info!("Conectando a SQLite en {}", db_url);

    // 3) Conectarnos con SQLx
    SqlitePoolOptions::new()
        .connect_with(options)
        .await
        .context("No se pudo conectar a la base de datos SQLite")
}

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv().ok(); // Cargar .env al inicio
    let config = AppConfig::from_env()?;
    init_logger(&config.log_level);
    log::info!(
        "Starting postmaster (environment={}, queued={})",
        config.environment,
        config.queue_configured()
    );

    // Conectarnos a la DB. Sin DATABASE_URL se sigue sin store; si está configurada y falla, abortamos.
    let db_pool = match &config.database_url {
        Some(url) => Some(setup_database(url).await?),
        None => {
            log::warn!("No DATABASE_URL; consent checks allow all mail and sends are untracked");
            None
        }
    };

    // TrackingService + migraciones
    let tracking_service = TrackingService::new(db_pool.clone());
    tracking_service.run_migrations().await?;
    let preference_service = PreferenceService::new(db_pool.clone());

    // Proveedor de correo
    let mailer: Arc<dyn Mailer> = Arc::from(mailer_from_config(&config.provider)?);

    // Handlers por cola
    let mut handlers: HandlerMap = HashMap::new();
    handlers.insert(
        QueueName::Send,
        Arc::new(SendJobHandler::new(
            tracking_service.clone(),
            mailer,
            config.environment.clone(),
        )),
    );
    handlers.insert(
        QueueName::Stats,
        Arc::new(StatsJobHandler::new(
            tracking_service.clone(),
            preference_service.clone(),
        )),
    );

    // Relay: con Redis encolamos y arrancan los consumers; sin Redis, modo directo
    let relay = match &config.redis_url {
        Some(url) => {
            let queue = RedisQueue::connect(url)
                .await
                .context("Could not connect to the redis queue")?;
            for name in QueueName::ALL {
                queue.restore_in_flight(name).await?;
            }
            let transport: Arc<dyn QueueTransport> = Arc::new(queue);

            ConsumerSupervisor::new(transport.clone(), config.consumer_backoff)
                .spawn_all(&handlers);
            QueueRelay::queued(transport, handlers)
        }
        None => QueueRelay::direct(handlers),
    };
    let relay = Arc::new(relay);

    let send_service = SendService::new(preference_service.clone(), relay.clone());
    let ingest_service = IngestService::new(relay);
    let webhook_auth = WebhookAuth(config.webhook_password.clone());

    // Levantar servidor
    log::info!("Levantando servidor en {}", config.listen_addr);
    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(send_service.clone()))
            .app_data(web::Data::new(ingest_service.clone()))
            .app_data(web::Data::new(tracking_service.clone()))
            .app_data(web::Data::new(preference_service.clone()))
            .app_data(web::Data::new(webhook_auth.clone()))
            .configure(app::init_app)
    })
    .bind(config.listen_addr.as_str())?
    .run()
    .await?;

    Ok(())
}
