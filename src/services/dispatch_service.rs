//! services/dispatch_service.rs
//! Tick de envío: lock, campañas activas, destinatarios y rotación de cuentas.

use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rand::Rng;
use regex::Regex;
use sqlx::{Pool, Sqlite};
use thiserror::Error;
use uuid::Uuid;

use crate::config::app_config::AppConfig;
use crate::db::{db_date, db_timestamp};
use crate::models::campaign_model::{Campaign, CampaignStatus, SendingAccount};
use crate::models::recipient_model::Recipient;
use crate::models::sequence_model::SequenceDecision;
use crate::services::composer_service::ComposerService;
use crate::services::eligibility_service::EligibilityService;
use crate::services::email_service::MailTransport;
use crate::services::lock_service::{LockError, LockService};
use crate::services::sequence_service::SequenceService;

#[derive(Debug, Error)]
pub enum TickError {
    #[error("TRACKING_SERVICE_URL must be set to run the dispatch tick")]
    MissingTrackingUrl,
    #[error("ENVIRONMENT must be set to run the dispatch tick")]
    MissingEnvironment,
    #[error(transparent)]
    Locked(LockError),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecipientOutcome {
    Sent { account_id: String },
    Skipped,
    SequenceComplete,
    InvalidAddress,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CampaignSummary {
    pub sent: usize,
    pub skipped: usize,
    pub completed_sequences: usize,
    pub invalid_addresses: usize,
    /// La campaña quedó en 'completed' al final del lote
    pub campaign_completed: bool,
    /// Esperas aplicadas entre envíos, en orden
    pub throttle_waits: Vec<Duration>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CampaignOutcome {
    Processed(CampaignSummary),
    QuotaReached,
    Faulted(String),
}

#[derive(Debug, Default)]
pub struct TickReport {
    pub campaigns: Vec<(String, CampaignOutcome)>,
}

impl TickReport {
    pub fn total_sent(&self) -> usize {
        self.campaigns
            .iter()
            .map(|(_, outcome)| match outcome {
                CampaignOutcome::Processed(summary) => summary.sent,
                _ => 0,
            })
            .sum()
    }

    pub fn faulted(&self) -> usize {
        self.campaigns
            .iter()
            .filter(|(_, outcome)| matches!(outcome, CampaignOutcome::Faulted(_)))
            .count()
    }
}

/// Parámetros del dispatcher derivados de `AppConfig`.
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub environment: Option<String>,
    pub tracking_service_url: Option<String>,
    pub max_sends_per_tick: usize,
    pub throttle_min: Duration,
    pub throttle_max: Duration,
}

impl From<&AppConfig> for DispatchSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            environment: config.environment.clone(),
            tracking_service_url: config.tracking_service_url.clone(),
            max_sends_per_tick: config.max_sends_per_tick,
            throttle_min: Duration::from_secs(config.throttle_min_secs),
            throttle_max: Duration::from_secs(config.throttle_max_secs),
        }
    }
}

fn email_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,7}$").expect("email regex")
    })
}

pub fn is_valid_email(address: &str) -> bool {
    email_regex().is_match(address)
}

/// Espera uniforme en `[min, max]`; `None` con el throttle desactivado.
pub fn throttle_delay(min: Duration, max: Duration) -> Option<Duration> {
    let max = max.max(min);
    if max.is_zero() {
        return None;
    }
    Some(rand::thread_rng().gen_range(min..=max))
}

/// Rotación de cuentas: `attempt_index mod cantidad`.
pub fn pick_account(accounts: &[SendingAccount], attempt_index: usize) -> Option<&SendingAccount> {
    if accounts.is_empty() {
        return None;
    }
    accounts.get(attempt_index % accounts.len())
}

#[derive(Clone)]
pub struct DispatchService {
    db_pool: Pool<Sqlite>,
    settings: DispatchSettings,
    lock_service: LockService,
    eligibility: EligibilityService,
    sequence: SequenceService,
    composer: Option<ComposerService>,
    transport: Arc<dyn MailTransport>,
}

impl DispatchService {
    pub fn new(
        db_pool: Pool<Sqlite>,
        settings: DispatchSettings,
        transport: Arc<dyn MailTransport>,
    ) -> Self {
        let composer = settings
            .tracking_service_url
            .clone()
            .map(|url| ComposerService::new(db_pool.clone(), url));

        Self {
            lock_service: LockService::new(db_pool.clone()),
            eligibility: EligibilityService::new(db_pool.clone()),
            sequence: SequenceService::new(db_pool.clone()),
            composer,
            db_pool,
            settings,
            transport,
        }
    }

    pub async fn run_tick(&self) -> Result<TickReport, TickError> {
        self.run_tick_at(Utc::now()).await
    }

    /// Un tick completo. El lock se libera siempre, falle lo que falle dentro.
    pub async fn run_tick_at(&self, now: DateTime<Utc>) -> Result<TickReport, TickError> {
        let composer = self.composer.as_ref().ok_or(TickError::MissingTrackingUrl)?;
        let environment = self
            .settings
            .environment
            .as_deref()
            .ok_or(TickError::MissingEnvironment)?;

        let guard = self
            .lock_service
            .acquire_at(environment, now)
            .await
            .map_err(TickError::Locked)?;

        let result = self.process_campaigns(composer, now).await;

        if let Err(e) = guard.release().await {
            log::error!("(run_tick) Fallo al liberar el lock: {:?}", e);
        }

        result.map_err(TickError::Storage)
    }

    async fn process_campaigns(
        &self,
        composer: &ComposerService,
        now: DateTime<Utc>,
    ) -> Result<TickReport> {
        let campaigns = self.eligibility.list_active_campaigns().await?;
        let mut report = TickReport::default();

        for campaign in campaigns {
            log::info!("(run_tick) Iniciando campaña {} ({})", campaign.id, campaign.name);

            let outcome = match self.process_campaign(composer, &campaign, now).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    let reason = format!("{:#}", e);
                    log::error!(
                        "(run_tick) Error en campaña {}: {}. Pausando.",
                        campaign.id,
                        reason
                    );
                    if let Err(pause_err) = self.pause_campaign(&campaign.id, &reason).await {
                        log::error!(
                            "(run_tick) No se pudo pausar la campaña {}: {:?}",
                            campaign.id,
                            pause_err
                        );
                    }
                    CampaignOutcome::Faulted(reason)
                }
            };

            report.campaigns.push((campaign.id.clone(), outcome));
        }

        log::info!(
            "(run_tick) Tick terminado: {} campañas, {} envíos, {} con error",
            report.campaigns.len(),
            report.total_sent(),
            report.faulted()
        );
        Ok(report)
    }

    /// Procesa el lote de una campaña; cualquier error aborta solo esta campaña.
    pub async fn process_campaign(
        &self,
        composer: &ComposerService,
        campaign: &Campaign,
        now: DateTime<Utc>,
    ) -> Result<CampaignOutcome> {
        let limit = campaign.remaining_quota();
        if limit <= 0 {
            log::warn!(
                "(process_campaign) Campaña {} alcanzó su límite diario",
                campaign.id
            );
            return Ok(CampaignOutcome::QuotaReached);
        }

        let today = now.date_naive();
        let recipients = self
            .eligibility
            .list_due_recipients(&campaign.id, limit, today)
            .await?;
        let accounts = self.eligibility.list_sending_accounts(&campaign.id).await?;

        let mut summary = CampaignSummary::default();
        let batch: Vec<&Recipient> = recipients
            .iter()
            .take(self.settings.max_sends_per_tick)
            .collect();

        for (attempt_index, recipient) in batch.iter().enumerate() {
            let outcome = self
                .process_recipient(composer, campaign, recipient, &accounts, attempt_index, now)
                .await?;

            match outcome {
                RecipientOutcome::Sent { .. } => {
                    summary.sent += 1;
                    let is_last = attempt_index + 1 == batch.len();
                    if !is_last {
                        if let Some(waited) = self.throttle().await {
                            summary.throttle_waits.push(waited);
                        }
                    }
                }
                RecipientOutcome::Skipped => summary.skipped += 1,
                RecipientOutcome::SequenceComplete => summary.completed_sequences += 1,
                RecipientOutcome::InvalidAddress => summary.invalid_addresses += 1,
            }
        }

        if self.eligibility.count_pending_recipients(&campaign.id).await? == 0 {
            self.mark_campaign_completed(&campaign.id).await?;
            summary.campaign_completed = true;
            log::info!("(process_campaign) Campaña {} completada", campaign.id);
        }

        Ok(CampaignOutcome::Processed(summary))
    }

    /// Un destinatario. El placeholder en `sent_emails` nunca sobrevive a esta
    /// función salvo que el envío se haya completado.
    pub async fn process_recipient(
        &self,
        composer: &ComposerService,
        campaign: &Campaign,
        recipient: &Recipient,
        accounts: &[SendingAccount],
        attempt_index: usize,
        now: DateTime<Utc>,
    ) -> Result<RecipientOutcome> {
        if !is_valid_email(&recipient.email_address) {
            log::warn!(
                "(process_recipient) Dirección inválida: {}",
                recipient.email_address
            );
            return Ok(RecipientOutcome::InvalidAddress);
        }

        let account = pick_account(accounts, attempt_index)
            .ok_or_else(|| anyhow!("Campaign {} has no sending accounts", campaign.id))?;

        let placeholder_id = self.insert_placeholder(recipient, campaign, now).await?;

        match self
            .send_with_placeholder(composer, campaign, recipient, account, &placeholder_id, now)
            .await
        {
            Ok(sent @ RecipientOutcome::Sent { .. }) => Ok(sent),
            Ok(other) => {
                self.delete_placeholder(&placeholder_id).await?;
                Ok(other)
            }
            Err(e) => {
                if let Err(cleanup) = self.delete_placeholder(&placeholder_id).await {
                    log::error!(
                        "(process_recipient) No se pudo borrar placeholder {}: {:?}",
                        placeholder_id,
                        cleanup
                    );
                }
                Err(e)
            }
        }
    }

    async fn send_with_placeholder(
        &self,
        composer: &ComposerService,
        campaign: &Campaign,
        recipient: &Recipient,
        account: &SendingAccount,
        placeholder_id: &str,
        now: DateTime<Utc>,
    ) -> Result<RecipientOutcome> {
        let today = now.date_naive();
        let (template_id, next_send_date) =
            match self.sequence.resolve(recipient, campaign, today).await? {
                SequenceDecision::Send {
                    template_id,
                    next_send_date,
                } => (template_id, next_send_date),
                SequenceDecision::Skip => return Ok(RecipientOutcome::Skipped),
                SequenceDecision::SequenceComplete => {
                    return Ok(RecipientOutcome::SequenceComplete)
                }
            };

        let template = self.sequence.load_template(&template_id).await?;
        let message = composer
            .compose(&template, recipient, campaign, account, placeholder_id)
            .await?;

        log::info!(
            "Campaña {} / enviando a {} / desde {}",
            campaign.id,
            recipient.email_address,
            account.email_address
        );
        if let Err(e) = self.transport.send(account, &message).await {
            if let Err(cleanup) = composer.discard_link_clicks(&message.link_click_ids).await {
                log::error!(
                    "(send_with_placeholder) No se pudieron borrar los links de {}: {:?}",
                    placeholder_id,
                    cleanup
                );
            }
            return Err(e);
        }

        self.record_delivery(
            campaign,
            recipient,
            account,
            placeholder_id,
            &template_id,
            next_send_date,
            now,
        )
        .await?;

        Ok(RecipientOutcome::Sent {
            account_id: account.id.clone(),
        })
    }

    async fn insert_placeholder(
        &self,
        recipient: &Recipient,
        campaign: &Campaign,
        now: DateTime<Utc>,
    ) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            r#"
            INSERT INTO sent_emails (id, recipient_id, campaign_id, read_count, created_at)
            VALUES (?1, ?2, ?3, 0, ?4)
            "#,
        )
        .bind(&id)
        .bind(&recipient.id)
        .bind(&campaign.id)
        .bind(db_timestamp(now))
        .execute(&self.db_pool)
        .await
        .context("Failed to insert sent_emails placeholder")?;
        Ok(id)
    }

    async fn delete_placeholder(&self, placeholder_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM sent_emails WHERE id = ?1 AND email_template_id IS NULL")
            .bind(placeholder_id)
            .execute(&self.db_pool)
            .await
            .context("Failed to delete sent_emails placeholder")?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn record_delivery(
        &self,
        campaign: &Campaign,
        recipient: &Recipient,
        account: &SendingAccount,
        placeholder_id: &str,
        template_id: &str,
        next_send_date: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let sent_at = db_timestamp(now);

        sqlx::query("UPDATE sent_emails SET email_template_id = ?1, sent_at = ?2 WHERE id = ?3")
            .bind(template_id)
            .bind(&sent_at)
            .bind(placeholder_id)
            .execute(&self.db_pool)
            .await
            .context("Failed to complete sent_emails record")?;

        let updated = sqlx::query(
            r#"
            UPDATE recipient_emails
            SET next_send_date = ?1,
                sent_count = sent_count + 1,
                sent = 1,
                sent_at = ?2,
                sender_email_account_id = ?3
            WHERE id = ?4
            "#,
        )
        .bind(db_date(next_send_date))
        .bind(&sent_at)
        .bind(&account.id)
        .bind(&recipient.id)
        .execute(&self.db_pool)
        .await
        .context("Failed to update recipient after send")?;
        if updated.rows_affected() == 0 {
            return Err(anyhow!(
                "Failed to update sent state for recipient: {}",
                recipient.email_address
            ));
        }

        let incremented = sqlx::query(
            r#"
            UPDATE campaigns
            SET emails_sent_today = emails_sent_today + 1,
                updated_at = ?1
            WHERE id = ?2
            "#,
        )
        .bind(&sent_at)
        .bind(&campaign.id)
        .execute(&self.db_pool)
        .await
        .context("Failed to increment emails_sent_today")?;
        if incremented.rows_affected() == 0 {
            return Err(anyhow!(
                "Failed to increment emails_sent_today for campaign: {}",
                campaign.id
            ));
        }

        Ok(())
    }

    async fn mark_campaign_completed(&self, campaign_id: &str) -> Result<()> {
        self.set_campaign_status(campaign_id, CampaignStatus::Completed, None)
            .await
    }

    /// Pausa con el texto del error; nunca se reactiva desde aquí.
    async fn pause_campaign(&self, campaign_id: &str, reason: &str) -> Result<()> {
        self.set_campaign_status(campaign_id, CampaignStatus::Paused, Some(reason))
            .await
    }

    async fn set_campaign_status(
        &self,
        campaign_id: &str,
        status: CampaignStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let now = db_timestamp(Utc::now());
        let result = sqlx::query(
            r#"
            UPDATE campaigns
            SET status = ?1,
                error = COALESCE(?2, error),
                updated_at = ?3
            WHERE id = ?4
            "#,
        )
        .bind(status.as_str())
        .bind(error)
        .bind(now)
        .bind(campaign_id)
        .execute(&self.db_pool)
        .await
        .with_context(|| format!("Failed to set campaign {} to '{}'", campaign_id, status))?;

        if result.rows_affected() == 0 {
            return Err(anyhow!(
                "Failed to update status to '{}' for campaign: {}",
                status,
                campaign_id
            ));
        }
        Ok(())
    }

    async fn throttle(&self) -> Option<Duration> {
        let delay = throttle_delay(self.settings.throttle_min, self.settings.throttle_max)?;
        log::debug!("(throttle) Esperando {:?} antes del próximo envío", delay);
        tokio::time::sleep(delay).await;
        Some(delay)
    }

    pub fn composer(&self) -> Option<&ComposerService> {
        self.composer.as_ref()
    }
}
