//! services/scheduler_service.rs
//! Dispara el tick de dispatch a intervalo fijo.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::services::dispatch_service::{DispatchService, TickError};

/// Lanza el loop en background. Cada tick se espera completo antes del
/// siguiente, así un proceso nunca solapa sus propios ticks.
pub fn spawn_dispatch_scheduler(dispatch: DispatchService, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        log::info!("Scheduler de campañas activo, intervalo {:?}", every);
        loop {
            ticker.tick().await;
            run_scheduled_tick(&dispatch).await;
        }
    })
}

async fn run_scheduled_tick(dispatch: &DispatchService) {
    log::info!("Ejecutando tick de envío de campañas...");
    match dispatch.run_tick().await {
        Ok(report) => log::info!(
            "Tick finalizado: {} envíos en {} campañas",
            report.total_sent(),
            report.campaigns.len()
        ),
        Err(TickError::Locked(e)) => log::warn!("Tick omitido: {}", e),
        Err(e) => log::error!("Error en el tick de envío: {:?}", e),
    }
}
