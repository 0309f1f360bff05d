use chrono::NaiveDate;
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row};

use crate::db::parse_db_date;

#[derive(Debug, Clone, Serialize)]
pub struct Recipient {
    pub id: String,
    pub campaign_id: String,
    pub email_address: String,
    pub total_to_send: i64,
    pub sent_count: i64,
    pub next_send_date: NaiveDate,
    pub sent: bool,
    pub sender_email_account_id: Option<String>,
}

impl<'r> FromRow<'r, SqliteRow> for Recipient {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let raw_date: String = row.try_get("next_send_date")?;
        let next_send_date = parse_db_date(&raw_date).map_err(|e| sqlx::Error::ColumnDecode {
            index: "next_send_date".to_string(),
            source: e.into(),
        })?;

        Ok(Recipient {
            id: row.try_get("id")?,
            campaign_id: row.try_get("campaign_id")?,
            email_address: row.try_get("email_address")?,
            total_to_send: row.try_get("total_to_send")?,
            sent_count: row.try_get("sent_count")?,
            next_send_date,
            sent: row.try_get("sent")?,
            sender_email_account_id: row.try_get("sender_email_account_id")?,
        })
    }
}
