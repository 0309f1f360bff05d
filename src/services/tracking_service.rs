//! services/tracking_service.rs
//! Aperturas (pixel) y clicks (redirect) sobre registros creados al enviar.

use anyhow::Context;
use chrono::Utc;
use sqlx::{Pool, Sqlite};
use thiserror::Error;
use url::Url;

use crate::db::db_timestamp;

/// User-agents de escáneres de links (gateways de seguridad, safe browsing).
/// Sus visitas no cuentan como clicks.
pub const DEFAULT_SCANNER_USER_AGENTS: [&str; 4] = [
    "BarracudaCentral.org/LinkProtection",
    "Symantec URL Content Check",
    "GoogleSafeBrowsing/4.0",
    "Microsoft Office Protocol Discovery",
];

/// Parámetro que recibe la landing con la dirección del destinatario
pub const EMAIL_QUERY_PARAM: &str = "email_address";

#[derive(Debug, Error)]
pub enum TrackingError {
    #[error("tracking record not found")]
    NotFound,
    #[error("invalid destination url '{0}'")]
    InvalidDestination(String),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

#[derive(Clone, Debug)]
pub struct TrackingService {
    db_pool: Pool<Sqlite>,
    scanner_user_agents: Vec<String>,
}

impl TrackingService {
    pub fn new(db_pool: Pool<Sqlite>, extra_scanner_user_agents: &[String]) -> Self {
        let scanner_user_agents = DEFAULT_SCANNER_USER_AGENTS
            .iter()
            .map(|ua| ua.to_string())
            .chain(extra_scanner_user_agents.iter().cloned())
            .map(|ua| ua.to_lowercase())
            .collect();

        Self {
            db_pool,
            scanner_user_agents,
        }
    }

    /// Coincidencia exacta, sin distinguir mayúsculas.
    pub fn is_scanner(&self, user_agent: Option<&str>) -> bool {
        match user_agent {
            Some(ua) => {
                let ua = ua.to_lowercase();
                self.scanner_user_agents.iter().any(|known| *known == ua)
            }
            None => false,
        }
    }

    /// Suma una apertura. Devuelve cuántas filas se tocaron (0 si el id no existe).
    pub async fn record_open(&self, send_record_id: &str) -> anyhow::Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE sent_emails
            SET read_count = read_count + 1,
                read_at = ?1
            WHERE id = ?2
            "#,
        )
        .bind(db_timestamp(Utc::now()))
        .bind(send_record_id)
        .execute(&self.db_pool)
        .await
        .context("Error updating email open status")?;

        Ok(result.rows_affected())
    }

    /// URL final para el redirect de `link_click_id`.
    pub async fn resolve_link(
        &self,
        link_click_id: &str,
        user_agent: Option<&str>,
    ) -> Result<String, TrackingError> {
        let row: Option<(String, String)> = if self.is_scanner(user_agent) {
            log::debug!("Click de escáner ignorado para link {}", link_click_id);
            sqlx::query_as("SELECT url, recipient_email_id FROM link_clicks WHERE id = ?1")
                .bind(link_click_id)
                .fetch_optional(&self.db_pool)
                .await
                .context("Error reading link click")?
        } else {
            sqlx::query_as(
                r#"
                UPDATE link_clicks
                SET user_agent = ?2,
                    click_count = click_count + 1
                WHERE id = ?1
                RETURNING url, recipient_email_id
                "#,
            )
            .bind(link_click_id)
            .bind(user_agent)
            .fetch_all(&self.db_pool)
            .await
            .context("Error recording link click")?
            .into_iter()
            .next()
        };

        let (url, recipient_id) = row.ok_or(TrackingError::NotFound)?;

        let email: Option<(String,)> =
            sqlx::query_as("SELECT email_address FROM recipient_emails WHERE id = ?1")
                .bind(&recipient_id)
                .fetch_optional(&self.db_pool)
                .await
                .context("Error reading link recipient")?;
        let (email_address,) = email.ok_or(TrackingError::NotFound)?;

        let destination = with_email_param(&normalize_destination(&url), &email_address)?;
        log::debug!("Redirigiendo link {} a {}", link_click_id, destination);
        Ok(destination)
    }
}

/// Antepone `https://` salvo que ya tenga esquema http(s) o sea `mailto:`.
pub fn normalize_destination(url: &str) -> String {
    let url = url.trim();
    let lower = url.to_ascii_lowercase();
    if lower.starts_with("https://") || lower.starts_with("http://") || lower.starts_with("mailto:")
    {
        url.to_string()
    } else {
        format!("https://{}", url)
    }
}

pub fn with_email_param(destination: &str, email_address: &str) -> Result<String, TrackingError> {
    let mut url = Url::parse(destination)
        .map_err(|_| TrackingError::InvalidDestination(destination.to_string()))?;
    url.query_pairs_mut()
        .append_pair(EMAIL_QUERY_PARAM, email_address);
    Ok(url.to_string())
}
