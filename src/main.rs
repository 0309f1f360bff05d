use std::sync::Arc;

use actix_web::{web, App, HttpServer};
use anyhow::Context;
use dotenv::dotenv;

use crate::config::app_config::AppConfig;
use crate::logger::init_logger;
use crate::services::dispatch_service::{DispatchService, DispatchSettings};
use crate::services::email_service::SmtpMailTransport;
use crate::services::scheduler_service::spawn_dispatch_scheduler;
use crate::services::tracking_service::TrackingService;

mod app;
mod config;
mod db;
mod handlers;
mod logger;
mod models;
mod services;
#[cfg(test)]
mod tests;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok(); // Cargar .env al inicio
    init_logger();

    let config = AppConfig::from_env().context("Configuración inválida")?;

    // Conectarnos a la DB y migrar
    let db_pool = db::setup_database(&config.database_url).await?;
    db::run_migrations(&db_pool).await?;

    // Scheduler de envíos
    let scheduler = if config.dispatch_enabled {
        config.require_environment()?;
        if config.tracking_service_url.is_none() {
            log::warn!("TRACKING_SERVICE_URL no está definido; los ticks se rechazarán");
        }
        let transport = Arc::new(SmtpMailTransport::new(config.smtp_timeout));
        let dispatch =
            DispatchService::new(db_pool.clone(), DispatchSettings::from(&config), transport);
        Some(spawn_dispatch_scheduler(dispatch, config.dispatch_interval))
    } else {
        log::info!("Dispatcher deshabilitado (DISPATCH_ENABLED=false)");
        None
    };

    if !config.tracker_enabled {
        log::info!("Tracker deshabilitado; solo corre el scheduler");
        if let Some(handle) = scheduler {
            handle.await.context("El scheduler terminó inesperadamente")?;
        }
        return Ok(());
    }

    let tracking_service = TrackingService::new(db_pool.clone(), &config.extra_scanner_user_agents);

    // Levantar servidor
    log::info!(
        "Levantando tracker en {}:{}",
        config.tracker_host,
        config.tracker_port
    );
    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(tracking_service.clone()))
            .configure(app::init_app)
    })
    .bind((config.tracker_host.as_str(), config.tracker_port))?
    .run()
    .await?;

    Ok(())
}
