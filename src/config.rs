//! Configuration types.
//!
//! Everything is read once at startup from `NONCER_*` environment variables
//! and never changes afterwards.

use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Discord rejects messages over 2000 characters; leave room for the
/// bold subject header.
pub const DEFAULT_MAX_SEGMENT_LEN: usize = 1990;

const DEFAULT_IMAP_HOST: &str = "imap.transip.email";
const DEFAULT_IMAP_PORT: u16 = 993;
const DEFAULT_FOLDER: &str = "INBOX";
const DEFAULT_PERIOD_SECS: u64 = 60;

/// IMAP connection settings.
#[derive(Debug, Clone)]
pub struct ImapConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
}

/// Process configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub imap: ImapConfig,
    /// Folder watched for announcements.
    pub folder: String,
    /// Time between two mailbox cycles.
    pub period: Duration,
    /// Size ceiling for one outbound message, in bytes.
    pub max_segment_len: usize,
    /// Sender domain suffixes allowed to produce announcements.
    pub allowed_domains: Vec<String>,
    /// Webhook receiving the announcements.
    pub webhook_url: String,
}

impl Config {
    /// Build config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let webhook_url = lookup("NONCER_WEBHOOK_URL")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ConfigError::MissingRequired {
                key: "NONCER_WEBHOOK_URL".into(),
                hint: "Set it to the webhook that receives announcements.".into(),
            })?;

        let host = lookup("NONCER_IMAP_HOST").unwrap_or_else(|| DEFAULT_IMAP_HOST.to_string());
        let port = parse_or(&lookup, "NONCER_IMAP_PORT", DEFAULT_IMAP_PORT)?;
        let username = lookup("NONCER_IMAP_USER").unwrap_or_default();
        let password = SecretString::from(lookup("NONCER_IMAP_PASS").unwrap_or_default());

        let folder = lookup("NONCER_FOLDER").unwrap_or_else(|| DEFAULT_FOLDER.to_string());

        let period_secs: u64 = parse_or(&lookup, "NONCER_PERIOD_SECS", DEFAULT_PERIOD_SECS)?;
        if period_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "NONCER_PERIOD_SECS".into(),
                message: "must be greater than zero".into(),
            });
        }

        let max_segment_len: usize =
            parse_or(&lookup, "NONCER_MAX_SEGMENT_LEN", DEFAULT_MAX_SEGMENT_LEN)?;
        if max_segment_len == 0 {
            return Err(ConfigError::InvalidValue {
                key: "NONCER_MAX_SEGMENT_LEN".into(),
                message: "must be greater than zero".into(),
            });
        }

        let allowed_domains: Vec<String> = lookup("NONCER_ALLOWED_DOMAINS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            imap: ImapConfig {
                host,
                port,
                username,
                password,
            },
            folder,
            period: Duration::from_secs(period_secs),
            max_segment_len,
            allowed_domains,
            webhook_url,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{raw:?}: {e}"),
        }),
    }
}
