//! services/lock_service.rs
//! Lock de despliegue: un único tick de dispatch por entorno.

use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use sqlx::{Pool, Sqlite};
use thiserror::Error;
use uuid::Uuid;

use crate::db::db_timestamp;

/// Un lock más viejo que esto se considera abandonado
pub const LOCK_STALE_AFTER_MINUTES: i64 = 30;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("Lock already acquired by environment: {environment} (locked at {locked_at})")]
    AlreadyLocked {
        environment: String,
        locked_at: String,
    },
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken {
    pub environment: String,
    pub token: String,
}

#[derive(Clone, Debug)]
pub struct LockService {
    db_pool: Pool<Sqlite>,
}

impl LockService {
    pub fn new(db_pool: Pool<Sqlite>) -> Self {
        LockService { db_pool }
    }

    pub async fn acquire(&self, environment: &str) -> Result<LockGuard, LockError> {
        self.acquire_at(environment, Utc::now()).await
    }

    /// Inserta el lock o reclama uno vencido en una sola sentencia.
    /// Si hay un lock vigente falla de inmediato, sin esperar.
    pub async fn acquire_at(
        &self,
        environment: &str,
        now: DateTime<Utc>,
    ) -> Result<LockGuard, LockError> {
        let token = Uuid::new_v4().to_string();
        let locked_at = db_timestamp(now);
        let stale_cutoff = db_timestamp(now - Duration::minutes(LOCK_STALE_AFTER_MINUTES));

        // fetch_all corre la sentencia hasta el final: el upsert queda
        // confirmado antes de devolver el guard
        let acquired: Vec<(String,)> = sqlx::query_as(
            r#"
            INSERT INTO deployment_locks (environment, token, locked_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(environment) DO UPDATE
                SET token = excluded.token,
                    locked_at = excluded.locked_at
                WHERE deployment_locks.locked_at < ?4
            RETURNING token
            "#,
        )
        .bind(environment)
        .bind(&token)
        .bind(&locked_at)
        .bind(&stale_cutoff)
        .fetch_all(&self.db_pool)
        .await
        .context("Fallo al insertar deployment lock")?;

        if !acquired.is_empty() {
            log::info!("Lock adquirido para entorno '{}'", environment);
            return Ok(LockGuard {
                service: self.clone(),
                token: LockToken {
                    environment: environment.to_string(),
                    token,
                },
                released: false,
            });
        }

        let holder: Option<(String,)> =
            sqlx::query_as("SELECT locked_at FROM deployment_locks WHERE environment = ?1")
                .bind(environment)
                .fetch_optional(&self.db_pool)
                .await
                .context("Fallo al leer deployment lock")?;

        Err(LockError::AlreadyLocked {
            environment: environment.to_string(),
            locked_at: holder.map(|(at,)| at).unwrap_or_default(),
        })
    }

    /// Borra el lock solo si sigue siendo nuestro.
    pub async fn release(&self, token: &LockToken) -> anyhow::Result<()> {
        let result =
            sqlx::query("DELETE FROM deployment_locks WHERE environment = ?1 AND token = ?2")
                .bind(&token.environment)
                .bind(&token.token)
                .execute(&self.db_pool)
                .await
                .context("Fallo al liberar deployment lock")?;

        if result.rows_affected() == 0 {
            log::warn!(
                "El lock de '{}' ya no nos pertenecía al liberarlo",
                token.environment
            );
        } else {
            log::info!("Lock liberado para entorno '{}'", token.environment);
        }
        Ok(())
    }
}

/// Lock adquirido. `release` lo libera explícitamente; si el guard se
/// descarta sin liberar (error o panic), el Drop agenda la liberación.
pub struct LockGuard {
    service: LockService,
    token: LockToken,
    released: bool,
}

impl LockGuard {
    pub fn token(&self) -> &LockToken {
        &self.token
    }

    pub async fn release(mut self) -> anyhow::Result<()> {
        self.released = true;
        self.service.release(&self.token).await
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        let service = self.service.clone();
        let token = self.token.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = service.release(&token).await {
                        log::error!("No se pudo liberar el lock en Drop: {:?}", e);
                    }
                });
            }
            Err(_) => log::error!(
                "Lock de '{}' descartado fuera de un runtime; expirará en {} minutos",
                token.environment,
                LOCK_STALE_AFTER_MINUTES
            ),
        }
    }
}
