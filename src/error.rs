//! Error types for noncer.

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Mailbox client errors.
#[derive(Debug, thiserror::Error)]
pub enum MailboxError {
    #[error("Failed to connect to {host}:{port}: {reason}")]
    Connect {
        host: String,
        port: u16,
        reason: String,
    },

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection closed by server")]
    Closed,

    #[error("Command {command} failed: {response}")]
    Command { command: String, response: String },

    #[error("Malformed server response: {0}")]
    Protocol(String),

    #[error("Mailbox task failed: {0}")]
    Task(String),
}

impl MailboxError {
    /// The connection is gone; a fresh session may succeed where this one failed.
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Closed | Self::Connect { .. })
    }
}

/// Body conversion errors.
#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    #[error("HTML to markdown conversion failed: {0}")]
    Markdown(String),
}

/// Webhook delivery errors.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("Webhook request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Unexpected status code {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
}

/// Errors that end the polling loop.
#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    #[error("Could not select folder {folder}: {source}")]
    SelectFolder {
        folder: String,
        #[source]
        source: MailboxError,
    },

    #[error("Announcement receiver closed")]
    SinkClosed,
}
