//! Mailbox abstraction. The polling loop only talks to this trait.

pub mod imap;
pub mod memory;

use async_trait::async_trait;

use crate::error::MailboxError;

pub use imap::ImapMailbox;
pub use memory::InMemoryMailbox;

/// A message as listed from the watched folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailMessage {
    /// Mailbox-assigned UID, valid for the current session.
    pub uid: u32,
    /// Sender addresses from the From header.
    pub from: Vec<String>,
    pub subject: String,
    /// HTML body, or the plain text body when there is no HTML part.
    pub html: String,
}

/// Operations the polling loop needs from a mail server.
#[async_trait]
pub trait Mailbox: Send + Sync {
    /// Select the folder later calls operate on.
    async fn select_folder(&self, folder: &str) -> Result<(), MailboxError>;

    /// List every message in the selected folder, ordered by UID.
    async fn list_messages(&self) -> Result<Vec<MailMessage>, MailboxError>;

    /// Flag messages as deleted, one UID at a time in the given order.
    async fn mark_deleted(&self, uids: &[u32]) -> Result<(), MailboxError>;

    /// Permanently remove flagged messages.
    async fn expunge(&self) -> Result<(), MailboxError>;
}
