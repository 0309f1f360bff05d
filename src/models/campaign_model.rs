use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Context};
use lettre::message::Mailbox;
use lettre::Address;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CampaignStatus {
    Active,
    Paused,
    Completed,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Active => "active",
            CampaignStatus::Paused => "paused",
            CampaignStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CampaignStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(CampaignStatus::Active),
            "paused" => Ok(CampaignStatus::Paused),
            "completed" => Ok(CampaignStatus::Completed),
            other => Err(anyhow!("Estado de campaña desconocido: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Campaign {
    pub id: String,
    pub name: String,
    pub status: CampaignStatus,
    pub archived: bool,
    pub daily_limit: i64,
    pub emails_sent_today: i64,
    pub reply_to_email_address: String,
    /// Último error que pausó la campaña
    pub error: Option<String>,
}

impl Campaign {
    /// Envíos que aún caben en la cuota diaria (puede ser <= 0).
    pub fn remaining_quota(&self) -> i64 {
        self.daily_limit - self.emails_sent_today
    }
}

impl<'r> FromRow<'r, SqliteRow> for Campaign {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let raw_status: String = row.try_get("status")?;
        let status = raw_status.parse().map_err(|e: anyhow::Error| {
            sqlx::Error::ColumnDecode {
                index: "status".to_string(),
                source: e.into(),
            }
        })?;

        Ok(Campaign {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            status,
            archived: row.try_get("archive")?,
            daily_limit: row.try_get("daily_limit")?,
            emails_sent_today: row.try_get("emails_sent_today")?,
            reply_to_email_address: row.try_get("reply_to_email_address")?,
            error: row.try_get("error")?,
        })
    }
}

/// Cuenta SMTP con la que se envía (solo lectura para el motor).
#[derive(Debug, Clone, FromRow)]
pub struct SendingAccount {
    pub id: String,
    pub email_address: String,
    pub display_name: String,
    pub smtp_host: String,
    pub smtp_port: i64,
    pub username: String,
    pub password: String,
}

impl SendingAccount {
    /// Remitente para el header From. Nombre y dirección se arman por
    /// separado; un nombre como "Acme, Inc." no pasa por el parser.
    pub fn mailbox(&self) -> anyhow::Result<Mailbox> {
        let address: Address = self
            .email_address
            .parse()
            .with_context(|| format!("Invalid sender address {}", self.email_address))?;
        let name = Some(self.display_name.trim())
            .filter(|name| !name.is_empty())
            .map(str::to_string);
        Ok(Mailbox::new(name, address))
    }
}
