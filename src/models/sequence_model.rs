//! models/sequence_model.rs
//! Plantillas y pasos de la secuencia de una campaña.

use chrono::NaiveDate;
use serde::Serialize;
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct MessageTemplate {
    pub id: String,
    pub subject: String,
    pub html_content: String,
    pub text_content: Option<String>,
}

/// Paso de la secuencia; `sequence_order` empieza en 0.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct SequenceStep {
    pub id: String,
    pub campaign_id: String,
    pub email_template_id: String,
    pub sequence_order: i64,
    pub days_delay: i64,
}

/// Decisión del resolver para un destinatario en este tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SequenceDecision {
    Send {
        template_id: String,
        next_send_date: NaiveDate,
    },
    /// Todavía no toca (next_send_date en el futuro)
    Skip,
    /// No quedan pasos para este destinatario
    SequenceComplete,
}
