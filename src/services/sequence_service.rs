//! services/sequence_service.rs
//! Decide qué paso de la secuencia toca a cada destinatario.

use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate};
use sqlx::{Pool, Sqlite};

use crate::models::campaign_model::Campaign;
use crate::models::recipient_model::Recipient;
use crate::models::sequence_model::{MessageTemplate, SequenceDecision, SequenceStep};

#[derive(Clone, Debug)]
pub struct SequenceService {
    db_pool: Pool<Sqlite>,
}

impl SequenceService {
    pub fn new(db_pool: Pool<Sqlite>) -> Self {
        SequenceService { db_pool }
    }

    /// Resuelve el siguiente paso para `recipient`.
    ///
    /// Los envíos previos se cuentan sobre registros completados, así que el
    /// placeholder del intento actual (y cualquier intento abortado) no cuenta.
    /// Con la secuencia agotada persiste `sent_count` y devuelve `SequenceComplete`.
    pub async fn resolve(
        &self,
        recipient: &Recipient,
        campaign: &Campaign,
        today: NaiveDate,
    ) -> Result<SequenceDecision> {
        let prior_sends = self.count_delivered(&recipient.id).await?;

        let Some(step) = self.find_step(&campaign.id, prior_sends).await? else {
            sqlx::query("UPDATE recipient_emails SET sent_count = ?1 WHERE id = ?2")
                .bind(prior_sends)
                .bind(&recipient.id)
                .execute(&self.db_pool)
                .await
                .context("Failed to persist exhausted sequence sent_count")?;

            log::info!(
                "(resolve) Secuencia completa para {} tras {} envíos",
                recipient.email_address,
                prior_sends
            );
            return Ok(SequenceDecision::SequenceComplete);
        };

        if prior_sends > 0 && today < recipient.next_send_date {
            return Ok(SequenceDecision::Skip);
        }

        // La fecha del próximo envío depende del retraso del paso siguiente
        let next_send_date = match self.find_step(&campaign.id, prior_sends + 1).await? {
            Some(following) => today + Duration::days(following.days_delay),
            None => today,
        };

        Ok(SequenceDecision::Send {
            template_id: step.email_template_id,
            next_send_date,
        })
    }

    pub async fn count_delivered(&self, recipient_id: &str) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM sent_emails
            WHERE recipient_id = ?1 AND email_template_id IS NOT NULL
            "#,
        )
        .bind(recipient_id)
        .fetch_one(&self.db_pool)
        .await
        .context("Failed to count delivered emails")?;

        Ok(count)
    }

    pub async fn find_step(&self, campaign_id: &str, order: i64) -> Result<Option<SequenceStep>> {
        sqlx::query_as::<_, SequenceStep>(
            r#"
            SELECT id, campaign_id, email_template_id, sequence_order, days_delay
            FROM campaign_sequence
            WHERE campaign_id = ?1 AND sequence_order = ?2
            "#,
        )
        .bind(campaign_id)
        .bind(order)
        .fetch_optional(&self.db_pool)
        .await
        .context("Failed to look up sequence step")
    }

    pub async fn load_template(&self, template_id: &str) -> Result<MessageTemplate> {
        sqlx::query_as::<_, MessageTemplate>(
            "SELECT id, subject, html_content, text_content FROM email_templates WHERE id = ?1",
        )
        .bind(template_id)
        .fetch_one(&self.db_pool)
        .await
        .with_context(|| format!("Email template {} not found", template_id))
    }
}
