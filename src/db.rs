//! db.rs
//! Conexión a SQLite, migraciones y formato de fechas persistidas.

use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};

/// Formato de fecha de calendario (`next_send_date`).
const DATE_FORMAT: &str = "%Y-%m-%d";
/// Ancho fijo y siempre UTC: el orden lexicográfico coincide con el cronológico.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

pub async fn setup_database(database_url: &str) -> Result<Pool<Sqlite>> {
    let options = SqliteConnectOptions::from_str(database_url)
        .with_context(|| format!("DATABASE_URL inválida: {}", database_url))?
        .create_if_missing(true)
        .foreign_keys(true);

    // Crear la carpeta contenedora si la base es un archivo local
    let filename = options.clone().get_filename();
    if let Some(parent) = filename.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("No se pudo crear directorio {:?}", parent))?;
        }
    }

    log::info!("Conectando a SQLite en {}", database_url);

    let db_pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .context("No se pudo conectar a la base de datos SQLite")?;

    Ok(db_pool)
}

/// Corre migraciones con sqlx
pub async fn run_migrations(db_pool: &Pool<Sqlite>) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(db_pool)
        .await
        .context("Failed to run campaign engine migrations")?;
    Ok(())
}

pub fn db_timestamp(at: DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

pub fn db_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

pub fn parse_db_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT)
        .with_context(|| format!("Fecha inválida en DB: {}", raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn timestamps_sort_chronologically() {
        let early = Utc.with_ymd_and_hms(2024, 9, 1, 8, 5, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2024, 10, 1, 7, 0, 0).unwrap();
        assert!(db_timestamp(early) < db_timestamp(late));
        assert_eq!(db_timestamp(early), "2024-09-01T08:05:00.000Z");
    }

    #[actix_rt::test]
    async fn creates_missing_parent_directory() {
        let dir = tempfile::TempDir::new().unwrap();
        let db_path = dir.path().join("anidado").join("campaigns.db");
        let url = format!("sqlite:{}", db_path.display());

        let pool = setup_database(&url).await.unwrap();
        run_migrations(&pool).await.unwrap();

        assert!(db_path.exists());
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM campaigns")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn dates_use_iso_calendar_format() {
        let day = NaiveDate::from_ymd_opt(2024, 3, 7).unwrap();
        assert_eq!(db_date(day), "2024-03-07");
        assert_eq!(parse_db_date("2024-03-07").unwrap(), day);
        assert!(parse_db_date("07/03/2024").is_err());
    }
}
