//! config/app_config.rs
//! Valores de arranque del proceso: base de datos, tracker y scheduler.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

/// Máximo de envíos por campaña en cada tick
pub const DEFAULT_MAX_SENDS_PER_TICK: usize = 5;
const DEFAULT_DATABASE_URL: &str = "sqlite:./data/campaigns.db";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    /// Nombre del entorno; identifica el lock de despliegue
    pub environment: Option<String>,
    /// Base de las URLs de tracking, sin `/` final
    pub tracking_service_url: Option<String>,
    pub tracker_host: String,
    pub tracker_port: u16,
    pub tracker_enabled: bool,
    pub dispatch_enabled: bool,
    pub dispatch_interval: Duration,
    pub throttle_min_secs: u64,
    pub throttle_max_secs: u64,
    pub max_sends_per_tick: usize,
    pub extra_scanner_user_agents: Vec<String>,
    pub smtp_timeout: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            environment: None,
            tracking_service_url: None,
            tracker_host: "0.0.0.0".to_string(),
            tracker_port: 8301,
            tracker_enabled: true,
            dispatch_enabled: true,
            dispatch_interval: Duration::from_secs(60),
            throttle_min_secs: 30,
            throttle_max_secs: 120,
            max_sends_per_tick: DEFAULT_MAX_SENDS_PER_TICK,
            extra_scanner_user_agents: Vec::new(),
            smtp_timeout: Duration::from_secs(30),
        }
    }
}

impl AppConfig {
    /// Lee la configuración de las variables de entorno del proceso.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(std::env::vars().collect())
    }

    /// Igual que `from_env` pero sobre un mapa explícito (tests).
    pub fn from_vars(vars: HashMap<String, String>) -> Result<Self> {
        let defaults = AppConfig::default();
        let get = |key: &str| {
            vars.get(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let environment = get("ENVIRONMENT");

        // prod: cada 15 minutos; resto de entornos: cada minuto
        let default_interval_secs = match environment.as_deref() {
            Some("prod") => 15 * 60,
            _ => 60,
        };
        let interval_secs: u64 = parse_or(
            get("DISPATCH_INTERVAL_SECS"),
            "DISPATCH_INTERVAL_SECS",
            default_interval_secs,
        )?;
        if interval_secs == 0 {
            return Err(anyhow!("DISPATCH_INTERVAL_SECS debe ser mayor que 0"));
        }

        let throttle_min_secs = parse_or(
            get("THROTTLE_MIN_SECS"),
            "THROTTLE_MIN_SECS",
            defaults.throttle_min_secs,
        )?;
        let throttle_max_secs: u64 = parse_or(
            get("THROTTLE_MAX_SECS"),
            "THROTTLE_MAX_SECS",
            defaults.throttle_max_secs,
        )?;

        let extra_scanner_user_agents = get("SCANNER_USER_AGENTS")
            .map(|raw| {
                raw.split(',')
                    .map(|ua| ua.trim().to_string())
                    .filter(|ua| !ua.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Ok(AppConfig {
            database_url: get("DATABASE_URL").unwrap_or(defaults.database_url),
            environment,
            tracking_service_url: get("TRACKING_SERVICE_URL")
                .map(|url| url.trim_end_matches('/').to_string()),
            tracker_host: get("TRACKER_HOST").unwrap_or(defaults.tracker_host),
            tracker_port: parse_or(get("TRACKER_PORT"), "TRACKER_PORT", defaults.tracker_port)?,
            tracker_enabled: parse_bool_or(get("TRACKER_ENABLED"), "TRACKER_ENABLED", true)?,
            dispatch_enabled: parse_bool_or(get("DISPATCH_ENABLED"), "DISPATCH_ENABLED", true)?,
            dispatch_interval: Duration::from_secs(interval_secs),
            throttle_min_secs,
            throttle_max_secs: throttle_max_secs.max(throttle_min_secs),
            max_sends_per_tick: parse_or(
                get("MAX_SENDS_PER_TICK"),
                "MAX_SENDS_PER_TICK",
                defaults.max_sends_per_tick,
            )?,
            extra_scanner_user_agents,
            smtp_timeout: Duration::from_secs(parse_or(
                get("SMTP_TIMEOUT_SECS"),
                "SMTP_TIMEOUT_SECS",
                defaults.smtp_timeout.as_secs(),
            )?),
        })
    }

    /// El dispatcher necesita el nombre del entorno para el lock.
    pub fn require_environment(&self) -> Result<&str> {
        self.environment
            .as_deref()
            .ok_or_else(|| anyhow!("ENVIRONMENT no está definido"))
    }
}

fn parse_or<T>(raw: Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match raw {
        Some(value) => value
            .parse::<T>()
            .with_context(|| format!("Valor inválido para {}: {}", key, value)),
        None => Ok(default),
    }
}

fn parse_bool_or(raw: Option<String>, key: &str, default: bool) -> Result<bool> {
    match raw.as_deref().map(str::to_lowercase).as_deref() {
        None => Ok(default),
        Some("1") | Some("true") | Some("yes") | Some("on") => Ok(true),
        Some("0") | Some("false") | Some("no") | Some("off") => Ok(false),
        Some(other) => Err(anyhow!("Valor inválido para {}: {}", key, other)),
    }
}
