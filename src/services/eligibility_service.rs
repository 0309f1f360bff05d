//! services/eligibility_service.rs
//! Selección de campañas activas y destinatarios pendientes.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use sqlx::{Pool, Sqlite};

use crate::db::db_date;
use crate::models::campaign_model::{Campaign, SendingAccount};
use crate::models::recipient_model::Recipient;

#[derive(Clone, Debug)]
pub struct EligibilityService {
    db_pool: Pool<Sqlite>,
}

impl EligibilityService {
    pub fn new(db_pool: Pool<Sqlite>) -> Self {
        EligibilityService { db_pool }
    }

    /// Campañas activas y no archivadas, en orden de creación.
    pub async fn list_active_campaigns(&self) -> Result<Vec<Campaign>> {
        sqlx::query_as::<_, Campaign>(
            r#"
            SELECT id, name, status, archive, daily_limit, emails_sent_today,
                   reply_to_email_address, error
            FROM campaigns
            WHERE status = 'active' AND archive = 0
            ORDER BY created_at, id
            "#,
        )
        .fetch_all(&self.db_pool)
        .await
        .context("Failed to list active campaigns")
    }

    /// Destinatarios con pasos pendientes y fecha vencida, hasta `limit`.
    /// Un `limit` <= 0 devuelve una lista vacía.
    pub async fn list_due_recipients(
        &self,
        campaign_id: &str,
        limit: i64,
        today: NaiveDate,
    ) -> Result<Vec<Recipient>> {
        if limit <= 0 {
            return Ok(Vec::new());
        }

        sqlx::query_as::<_, Recipient>(
            r#"
            SELECT id, campaign_id, email_address, total_to_send, sent_count,
                   next_send_date, sent, sender_email_account_id
            FROM recipient_emails
            WHERE campaign_id = ?1
              AND sent_count < total_to_send
              AND next_send_date <= ?2
            ORDER BY created_at, id
            LIMIT ?3
            "#,
        )
        .bind(campaign_id)
        .bind(db_date(today))
        .bind(limit)
        .fetch_all(&self.db_pool)
        .await
        .with_context(|| format!("Failed to list due recipients for campaign {}", campaign_id))
    }

    /// Cuentas de envío de la campaña en el orden de rotación.
    pub async fn list_sending_accounts(&self, campaign_id: &str) -> Result<Vec<SendingAccount>> {
        sqlx::query_as::<_, SendingAccount>(
            r#"
            SELECT ea.id, ea.email_address, ea.display_name, ea.smtp_host,
                   ea.smtp_port, ea.username, ea.password
            FROM campaign_email_accounts AS cea
            INNER JOIN email_accounts AS ea ON ea.id = cea.email_account_id
            WHERE cea.campaign_id = ?1
            ORDER BY cea.position, ea.id
            "#,
        )
        .bind(campaign_id)
        .fetch_all(&self.db_pool)
        .await
        .with_context(|| format!("Failed to list sending accounts for campaign {}", campaign_id))
    }

    /// Destinatarios que todavía tienen un paso de secuencia por recibir.
    pub async fn count_pending_recipients(&self, campaign_id: &str) -> Result<i64> {
        let (pending,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*)
            FROM recipient_emails AS r
            WHERE r.campaign_id = ?1
              AND r.sent_count < r.total_to_send
              AND EXISTS (
                  SELECT 1 FROM campaign_sequence AS cs
                  WHERE cs.campaign_id = r.campaign_id
                    AND cs.sequence_order = r.sent_count
              )
            "#,
        )
        .bind(campaign_id)
        .fetch_one(&self.db_pool)
        .await
        .context("Failed to count pending recipients")?;

        Ok(pending)
    }
}
