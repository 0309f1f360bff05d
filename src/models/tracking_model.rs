use lettre::message::Mailbox;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Un intento de envío. Sin `email_template_id` es un placeholder en curso
/// o abortado y nunca cuenta como entregado.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SendRecord {
    pub id: String,
    pub recipient_id: String,
    pub campaign_id: String,
    pub email_template_id: Option<String>,
    pub sent_at: Option<String>,
    pub read_count: i64,
    pub read_at: Option<String>,
}

impl SendRecord {
    pub fn is_delivered(&self) -> bool {
        self.email_template_id.is_some() && self.sent_at.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LinkClickRecord {
    pub id: String,
    pub url: String,
    pub recipient_email_id: String,
    pub email_template_id: String,
    pub click_count: i64,
    pub user_agent: Option<String>,
}

/// Mensaje listo para el transporte
#[derive(Debug, Clone)]
pub struct RenderedMessage {
    pub from: Mailbox,
    pub to: String,
    pub reply_to: String,
    pub subject: String,
    pub html: String,
    pub text: Option<String>,
    /// link_clicks creados al componer; se descartan si el envío falla
    pub link_click_ids: Vec<String>,
}
