//! In-memory mailbox for tests, with switchable failures.

use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{MailMessage, Mailbox};
use crate::error::MailboxError;

/// Operations failing on purpose.
#[derive(Debug, Default, Clone, Copy)]
pub struct Failures {
    pub select: bool,
    pub list: bool,
    pub mark_deleted: bool,
    pub expunge: bool,
}

#[derive(Debug, Default)]
struct State {
    folders: BTreeMap<String, BTreeMap<u32, MailMessage>>,
    selected: Option<String>,
    flagged: HashSet<u32>,
    failures: Failures,
    next_uid: u32,
    /// UIDs passed to `mark_deleted`, in call order.
    deleted_log: Vec<u32>,
    expunge_calls: usize,
}

/// Mailbox kept entirely in memory.
#[derive(Debug, Default)]
pub struct InMemoryMailbox {
    state: Mutex<State>,
}

impl InMemoryMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver a message to `folder`, returning its UID.
    pub fn deliver(&self, folder: &str, from: &[&str], subject: &str, html: &str) -> u32 {
        let mut state = self.state.lock().unwrap();
        state.next_uid += 1;
        let uid = state.next_uid;
        let message = MailMessage {
            uid,
            from: from.iter().map(|s| s.to_string()).collect(),
            subject: subject.to_string(),
            html: html.to_string(),
        };
        state
            .folders
            .entry(folder.to_string())
            .or_default()
            .insert(uid, message);
        uid
    }

    pub fn set_failures(&self, failures: Failures) {
        self.state.lock().unwrap().failures = failures;
    }

    /// UIDs currently stored in `folder`.
    pub fn uids(&self, folder: &str) -> Vec<u32> {
        let state = self.state.lock().unwrap();
        state
            .folders
            .get(folder)
            .map(|f| f.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Every UID ever passed to `mark_deleted`.
    pub fn deleted_log(&self) -> Vec<u32> {
        self.state.lock().unwrap().deleted_log.clone()
    }

    pub fn expunge_calls(&self) -> usize {
        self.state.lock().unwrap().expunge_calls
    }

    fn injected(op: &str) -> MailboxError {
        MailboxError::Command {
            command: op.to_string(),
            response: "NO injected failure".to_string(),
        }
    }

    fn selected(state: &State) -> Result<String, MailboxError> {
        state
            .selected
            .clone()
            .ok_or_else(|| MailboxError::Protocol("no folder selected".into()))
    }
}

#[async_trait]
impl Mailbox for InMemoryMailbox {
    async fn select_folder(&self, folder: &str) -> Result<(), MailboxError> {
        let mut state = self.state.lock().unwrap();
        if state.failures.select {
            return Err(Self::injected("SELECT"));
        }
        state.folders.entry(folder.to_string()).or_default();
        state.selected = Some(folder.to_string());
        Ok(())
    }

    async fn list_messages(&self) -> Result<Vec<MailMessage>, MailboxError> {
        let state = self.state.lock().unwrap();
        if state.failures.list {
            return Err(Self::injected("UID SEARCH"));
        }
        let folder = Self::selected(&state)?;
        Ok(state
            .folders
            .get(&folder)
            .map(|f| f.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn mark_deleted(&self, uids: &[u32]) -> Result<(), MailboxError> {
        let mut state = self.state.lock().unwrap();
        if state.failures.mark_deleted {
            return Err(Self::injected("UID STORE"));
        }
        Self::selected(&state)?;
        for uid in uids {
            state.flagged.insert(*uid);
            state.deleted_log.push(*uid);
        }
        Ok(())
    }

    async fn expunge(&self) -> Result<(), MailboxError> {
        let mut state = self.state.lock().unwrap();
        state.expunge_calls += 1;
        if state.failures.expunge {
            return Err(Self::injected("EXPUNGE"));
        }
        let folder = Self::selected(&state)?;
        let flagged = std::mem::take(&mut state.flagged);
        if let Some(messages) = state.folders.get_mut(&folder) {
            messages.retain(|uid, _| !flagged.contains(uid));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn list_requires_selected_folder() {
        let mailbox = InMemoryMailbox::new();
        assert!(mailbox.list_messages().await.is_err());
    }

    #[tokio::test]
    async fn expunge_removes_only_flagged() {
        let mailbox = InMemoryMailbox::new();
        let a = mailbox.deliver("INBOX", &["a@example.com"], "A", "<p>a</p>");
        let b = mailbox.deliver("INBOX", &["b@example.com"], "B", "<p>b</p>");

        mailbox.select_folder("INBOX").await.unwrap();
        assert_eq!(mailbox.list_messages().await.unwrap().len(), 2);

        mailbox.mark_deleted(&[a]).await.unwrap();
        mailbox.expunge().await.unwrap();

        assert_eq!(mailbox.uids("INBOX"), vec![b]);
    }

    #[tokio::test]
    async fn flags_without_expunge_keep_messages() {
        let mailbox = InMemoryMailbox::new();
        let a = mailbox.deliver("INBOX", &["a@example.com"], "A", "a");
        mailbox.select_folder("INBOX").await.unwrap();
        mailbox.mark_deleted(&[a]).await.unwrap();
        assert_eq!(mailbox.uids("INBOX"), vec![a]);
    }

    #[tokio::test]
    async fn folders_are_separate() {
        let mailbox = InMemoryMailbox::new();
        mailbox.deliver("INBOX", &["a@example.com"], "A", "a");
        mailbox.deliver("Archive", &["b@example.com"], "B", "b");

        mailbox.select_folder("Archive").await.unwrap();
        let listed = mailbox.list_messages().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].subject, "B");
    }

    #[tokio::test]
    async fn injected_failures() {
        let mailbox = InMemoryMailbox::new();
        mailbox.set_failures(Failures {
            select: true,
            ..Default::default()
        });
        assert!(mailbox.select_folder("INBOX").await.is_err());
    }
}
