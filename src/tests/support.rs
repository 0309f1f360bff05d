//! tests/support.rs
//! Base de datos temporal, datos semilla y un transporte que graba envíos.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use sqlx::{Pool, Sqlite};
use tempfile::TempDir;
use uuid::Uuid;

use crate::db::{db_date, db_timestamp, run_migrations, setup_database};
use crate::models::campaign_model::{Campaign, SendingAccount};
use crate::models::recipient_model::Recipient;
use crate::models::tracking_model::{LinkClickRecord, RenderedMessage, SendRecord};
use crate::services::dispatch_service::{DispatchService, DispatchSettings};
use crate::services::email_service::MailTransport;

pub const TRACKING_BASE: &str = "https://track.example.com";

pub struct TestDb {
    pub pool: Pool<Sqlite>,
    pub url: String,
    // Mantiene vivo el directorio mientras dure el test
    _dir: TempDir,
}

pub async fn test_db() -> TestDb {
    let dir = TempDir::new().expect("temp dir");
    let url = format!("sqlite:{}", dir.path().join("test.db").display());
    let pool = setup_database(&url).await.expect("pool");
    run_migrations(&pool).await.expect("migrations");
    TestDb {
        pool,
        url,
        _dir: dir,
    }
}

pub fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

pub struct CampaignSeed {
    pub status: &'static str,
    pub archived: bool,
    pub daily_limit: i64,
    pub emails_sent_today: i64,
}

impl Default for CampaignSeed {
    fn default() -> Self {
        Self {
            status: "active",
            archived: false,
            daily_limit: 50,
            emails_sent_today: 0,
        }
    }
}

pub async fn insert_campaign(pool: &Pool<Sqlite>, seed: CampaignSeed) -> String {
    let id = Uuid::new_v4().to_string();
    let now = db_timestamp(Utc::now());
    sqlx::query(
        r#"
        INSERT INTO campaigns (
            id, name, status, archive, daily_limit, emails_sent_today,
            reply_to_email_address, created_at, updated_at
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'respuestas@example.com', ?7, ?7)
        "#,
    )
    .bind(&id)
    .bind(format!("Campaña {}", &id[..8]))
    .bind(seed.status)
    .bind(seed.archived)
    .bind(seed.daily_limit)
    .bind(seed.emails_sent_today)
    .bind(now)
    .execute(pool)
    .await
    .expect("insert campaign");
    id
}

pub async fn insert_account(pool: &Pool<Sqlite>, campaign_id: &str, position: i64) -> String {
    let id = Uuid::new_v4().to_string();
    sqlx::query(
        r#"
        INSERT INTO email_accounts (
            id, email_address, display_name, smtp_host, smtp_port, username, password
        )
        VALUES (?1, ?2, ?3, 'smtp.example.com', 587, ?2, 'secreto')
        "#,
    )
    .bind(&id)
    .bind(format!("envios{}@example.com", position))
    .bind(format!("Equipo {}", position))
    .execute(pool)
    .await
    .expect("insert account");

    sqlx::query(
        "INSERT INTO campaign_email_accounts (campaign_id, email_account_id, position) VALUES (?1, ?2, ?3)",
    )
    .bind(campaign_id)
    .bind(&id)
    .bind(position)
    .execute(pool)
    .await
    .expect("link account");
    id
}

pub async fn insert_template(pool: &Pool<Sqlite>, html: &str, text: Option<&str>) -> String {
    let id = Uuid::new_v4().to_string();
    sqlx::query(
        "INSERT INTO email_templates (id, subject, html_content, text_content) VALUES (?1, ?2, ?3, ?4)",
    )
    .bind(&id)
    .bind(format!("Asunto {}", &id[..8]))
    .bind(html)
    .bind(text)
    .execute(pool)
    .await
    .expect("insert template");
    id
}

pub async fn insert_step(
    pool: &Pool<Sqlite>,
    campaign_id: &str,
    template_id: &str,
    order: i64,
    days_delay: i64,
) {
    sqlx::query(
        r#"
        INSERT INTO campaign_sequence (id, campaign_id, email_template_id, sequence_order, days_delay)
        VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(campaign_id)
    .bind(template_id)
    .bind(order)
    .bind(days_delay)
    .execute(pool)
    .await
    .expect("insert step");
}

/// Campaña con una secuencia de pasos (un template por retraso).
pub async fn insert_sequence(pool: &Pool<Sqlite>, campaign_id: &str, delays: &[i64]) -> Vec<String> {
    let mut templates = Vec::new();
    for (order, delay) in delays.iter().enumerate() {
        let template_id = insert_template(
            pool,
            &format!(r#"<html><body><p>Paso {}</p><a href="https://example.com/{}">ver</a></body></html>"#, order, order),
            None,
        )
        .await;
        insert_step(pool, campaign_id, &template_id, order as i64, *delay).await;
        templates.push(template_id);
    }
    templates
}

pub async fn insert_recipient(
    pool: &Pool<Sqlite>,
    campaign_id: &str,
    email: &str,
    total_to_send: i64,
    next_send_date: NaiveDate,
) -> String {
    let id = Uuid::new_v4().to_string();
    // created_at crece con cada insert para que el orden sea estable
    let created_at = db_timestamp(Utc::now());
    sqlx::query(
        r#"
        INSERT INTO recipient_emails (
            id, campaign_id, email_address, total_to_send, sent_count,
            next_send_date, sent, created_at
        )
        VALUES (?1, ?2, ?3, ?4, 0, ?5, 0, ?6)
        "#,
    )
    .bind(&id)
    .bind(campaign_id)
    .bind(email)
    .bind(total_to_send)
    .bind(db_date(next_send_date))
    .bind(created_at)
    .execute(pool)
    .await
    .expect("insert recipient");
    tokio::time::sleep(Duration::from_millis(2)).await;
    id
}

pub async fn set_sent_count(pool: &Pool<Sqlite>, recipient_id: &str, sent_count: i64) {
    sqlx::query("UPDATE recipient_emails SET sent_count = ?1 WHERE id = ?2")
        .bind(sent_count)
        .bind(recipient_id)
        .execute(pool)
        .await
        .expect("update sent_count");
}

pub async fn fetch_campaign(pool: &Pool<Sqlite>, id: &str) -> Campaign {
    sqlx::query_as::<_, Campaign>(
        r#"
        SELECT id, name, status, archive, daily_limit, emails_sent_today,
               reply_to_email_address, error
        FROM campaigns WHERE id = ?1
        "#,
    )
    .bind(id)
    .fetch_one(pool)
    .await
    .expect("campaign")
}

pub async fn fetch_recipient(pool: &Pool<Sqlite>, id: &str) -> Recipient {
    sqlx::query_as::<_, Recipient>(
        r#"
        SELECT id, campaign_id, email_address, total_to_send, sent_count,
               next_send_date, sent, sender_email_account_id
        FROM recipient_emails WHERE id = ?1
        "#,
    )
    .bind(id)
    .fetch_one(pool)
    .await
    .expect("recipient")
}

pub async fn fetch_accounts(pool: &Pool<Sqlite>, campaign_id: &str) -> Vec<SendingAccount> {
    crate::services::eligibility_service::EligibilityService::new(pool.clone())
        .list_sending_accounts(campaign_id)
        .await
        .expect("accounts")
}

pub async fn send_records(pool: &Pool<Sqlite>, recipient_id: &str) -> Vec<SendRecord> {
    sqlx::query_as::<_, SendRecord>(
        r#"
        SELECT id, recipient_id, campaign_id, email_template_id, sent_at, read_count, read_at
        FROM sent_emails WHERE recipient_id = ?1
        ORDER BY created_at
        "#,
    )
    .bind(recipient_id)
    .fetch_all(pool)
    .await
    .expect("send records")
}

pub async fn link_clicks(pool: &Pool<Sqlite>, recipient_id: &str) -> Vec<LinkClickRecord> {
    sqlx::query_as::<_, LinkClickRecord>(
        r#"
        SELECT id, url, recipient_email_id, email_template_id, click_count, user_agent
        FROM link_clicks WHERE recipient_email_id = ?1
        ORDER BY created_at
        "#,
    )
    .bind(recipient_id)
    .fetch_all(pool)
    .await
    .expect("link clicks")
}

pub async fn count_placeholders(pool: &Pool<Sqlite>) -> i64 {
    let (count,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM sent_emails WHERE email_template_id IS NULL")
            .fetch_one(pool)
            .await
            .expect("count placeholders");
    count
}

/// Graba los mensajes en memoria; puede fallar a pedido.
#[derive(Default)]
pub struct RecordingTransport {
    pub sent: Mutex<Vec<(String, RenderedMessage)>>,
    pub fail_with: Mutex<Option<String>>,
}

impl RecordingTransport {
    pub fn failing(reason: &str) -> Self {
        let transport = Self::default();
        *transport.fail_with.lock().unwrap() = Some(reason.to_string());
        transport
    }

    pub fn sent_accounts(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(account, _)| account.clone())
            .collect()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl MailTransport for RecordingTransport {
    async fn send(&self, account: &SendingAccount, message: &RenderedMessage) -> Result<()> {
        if let Some(reason) = self.fail_with.lock().unwrap().clone() {
            return Err(anyhow!(reason));
        }
        self.sent
            .lock()
            .unwrap()
            .push((account.id.clone(), message.clone()));
        Ok(())
    }
}

pub fn test_settings() -> DispatchSettings {
    DispatchSettings {
        environment: Some("test".to_string()),
        tracking_service_url: Some(TRACKING_BASE.to_string()),
        max_sends_per_tick: 5,
        throttle_min: Duration::ZERO,
        throttle_max: Duration::ZERO,
    }
}

pub fn dispatcher(pool: &Pool<Sqlite>, transport: Arc<RecordingTransport>) -> DispatchService {
    DispatchService::new(pool.clone(), test_settings(), transport)
}
