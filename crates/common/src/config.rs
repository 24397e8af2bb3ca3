use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::types::{MAX_RECIPIENTS, MAX_RETRIES_LIMIT};

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// PostgreSQL connection string
    pub database_url: String,

    /// Maximum number of PostgreSQL connections in the pool (default: 10)
    pub db_max_connections: u32,

    /// Seconds between two poller ticks (default: 60)
    pub poll_interval_seconds: u64,

    /// Maximum number of due reminders picked up per tick (default: 50)
    pub poll_batch_size: i64,

    /// Retry cap applied to new reminders that don't set their own (default: 3)
    pub default_max_retries: i32,

    /// Pause between two sends of the same reminder, in milliseconds (default: 1000)
    pub send_delay_ms: u64,

    /// Upper bound for a single provider call (default: 30)
    pub send_timeout_seconds: u64,

    /// Age after which a claim is considered orphaned by a dead process (default: 1800).
    /// Must exceed the longest possible processing pass.
    pub stale_claim_seconds: u64,

    /// Resend API key for email delivery
    pub resend_api_key: Option<String>,

    /// Email sender address
    pub email_from: Option<String>,

    /// Subject line for reminder emails
    pub email_subject: String,

    /// WhatsApp Cloud API access token
    pub whatsapp_access_token: Option<String>,

    /// WhatsApp Cloud API phone number id
    pub whatsapp_phone_number_id: Option<String>,

    /// Port the API server listens on (default: 3000)
    pub api_port: u16,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let default_max_retries: i32 = parse_or(&lookup, "DEFAULT_MAX_RETRIES", 3)?;
        if !(0..=MAX_RETRIES_LIMIT).contains(&default_max_retries) {
            anyhow::bail!("DEFAULT_MAX_RETRIES must be between 0 and {MAX_RETRIES_LIMIT}");
        }

        let poll_interval_seconds: u64 = parse_or(&lookup, "POLL_INTERVAL_SECONDS", 60)?;
        if poll_interval_seconds == 0 {
            anyhow::bail!("POLL_INTERVAL_SECONDS must be greater than zero");
        }

        let poll_batch_size: i64 = parse_or(&lookup, "POLL_BATCH_SIZE", 50)?;
        if poll_batch_size <= 0 {
            anyhow::bail!("POLL_BATCH_SIZE must be greater than zero");
        }

        let send_delay_ms: u64 = parse_or(&lookup, "SEND_DELAY_MS", 1000)?;
        let send_timeout_seconds: u64 = parse_or(&lookup, "SEND_TIMEOUT_SECONDS", 30)?;
        let stale_claim_seconds: u64 = parse_or(&lookup, "STALE_CLAIM_SECONDS", 1800)?;
        let longest_pass_ms = longest_pass_ms(send_timeout_seconds, send_delay_ms);
        if stale_claim_seconds.saturating_mul(1000) <= longest_pass_ms {
            anyhow::bail!(
                "STALE_CLAIM_SECONDS must exceed the longest processing pass ({}s for \
                 {MAX_RECIPIENTS} recipients)",
                longest_pass_ms.div_ceil(1000)
            );
        }

        Ok(Self {
            database_url: lookup("DATABASE_URL")
                .ok_or_else(|| anyhow::anyhow!("DATABASE_URL environment variable is required"))?,
            db_max_connections: parse_or(&lookup, "DB_MAX_CONNECTIONS", 10)?,
            poll_interval_seconds,
            poll_batch_size,
            default_max_retries,
            send_delay_ms,
            send_timeout_seconds,
            stale_claim_seconds,
            resend_api_key: lookup("RESEND_API_KEY"),
            email_from: lookup("EMAIL_FROM"),
            email_subject: lookup("EMAIL_SUBJECT").unwrap_or_else(|| "New Reminder".to_string()),
            whatsapp_access_token: lookup("WHATSAPP_ACCESS_TOKEN"),
            whatsapp_phone_number_id: lookup("WHATSAPP_PHONE_NUMBER_ID"),
            api_port: parse_or(&lookup, "API_PORT", 3000)?,
        })
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    pub fn send_delay(&self) -> Duration {
        Duration::from_millis(self.send_delay_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_seconds)
    }

    pub fn stale_claim_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.stale_claim_seconds as i64)
    }
}

/// Worst case for one pass: every recipient costs a status check and a send,
/// each bounded by the send timeout, plus the pause before it.
fn longest_pass_ms(send_timeout_seconds: u64, send_delay_ms: u64) -> u64 {
    let per_recipient = send_timeout_seconds
        .saturating_mul(2000)
        .saturating_add(send_delay_ms);
    per_recipient.saturating_mul(MAX_RECIPIENTS as u64)
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> anyhow::Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|_| {
            anyhow::anyhow!("{key} must be a valid {}", std::any::type_name::<T>())
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> anyhow::Result<AppConfig> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[("DATABASE_URL", "postgres://localhost/courier")]).unwrap();
        assert_eq!(config.poll_interval(), Duration::from_secs(60));
        assert_eq!(config.poll_batch_size, 50);
        assert_eq!(config.default_max_retries, 3);
        assert_eq!(config.send_delay(), Duration::from_secs(1));
        assert_eq!(config.send_timeout(), Duration::from_secs(30));
        assert_eq!(config.email_subject, "New Reminder");
        assert_eq!(config.api_port, 3000);
        assert_eq!(config.stale_claim_after(), chrono::Duration::minutes(30));
        assert!(config.resend_api_key.is_none());
    }

    #[test]
    fn test_database_url_required() {
        assert!(config_from(&[]).is_err());
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("DATABASE_URL", "postgres://localhost/courier"),
            ("POLL_INTERVAL_SECONDS", "5"),
            ("SEND_DELAY_MS", "250"),
            ("DEFAULT_MAX_RETRIES", "0"),
        ])
        .unwrap();
        assert_eq!(config.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.send_delay(), Duration::from_millis(250));
        assert_eq!(config.default_max_retries, 0);
    }

    #[test]
    fn test_rejects_out_of_range_max_retries() {
        let result = config_from(&[
            ("DATABASE_URL", "postgres://localhost/courier"),
            ("DEFAULT_MAX_RETRIES", "11"),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_stale_claim_must_outlast_longest_pass() {
        // 20 recipients * (2 * 30s + 1s) = 1220s
        let result = config_from(&[
            ("DATABASE_URL", "postgres://localhost/courier"),
            ("STALE_CLAIM_SECONDS", "600"),
        ]);
        assert!(result.is_err());

        let result = config_from(&[
            ("DATABASE_URL", "postgres://localhost/courier"),
            ("STALE_CLAIM_SECONDS", "1220"),
        ]);
        assert!(result.is_err());

        let config = config_from(&[
            ("DATABASE_URL", "postgres://localhost/courier"),
            ("STALE_CLAIM_SECONDS", "300"),
            ("SEND_TIMEOUT_SECONDS", "5"),
            ("SEND_DELAY_MS", "0"),
        ])
        .unwrap();
        assert_eq!(config.stale_claim_seconds, 300);
    }

    #[test]
    fn test_rejects_garbage() {
        let result = config_from(&[
            ("DATABASE_URL", "postgres://localhost/courier"),
            ("SEND_TIMEOUT_SECONDS", "soon"),
        ]);
        assert!(result.is_err());
    }
}
