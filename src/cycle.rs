//! Mailbox polling loop.
//!
//! Each tick runs one cycle:
//! 1. Select the watched folder (failure stops the loop)
//! 2. List every message
//! 3. Per message: check the sender, convert the body, build and hand off
//!    the announcement
//! 4. Flag every listed message as deleted and expunge
//!
//! Every listed message is removed, including rejected and unconvertible
//! ones, so a bad message cannot block the mailbox. A failed delete leaves
//! the messages in place and they are announced again next tick.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::announcements::{Announcement, is_sender_allowed};
use crate::convert::BodyConverter;
use crate::error::CycleError;
use crate::handoff::HandoffSender;
use crate::mailbox::Mailbox;

/// Settings the cycle needs from the process configuration.
#[derive(Debug, Clone)]
pub struct CycleSettings {
    pub folder: String,
    pub max_segment_len: usize,
    pub allowed_domains: Vec<String>,
}

/// What happened during one cycle.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    /// Messages listed in the folder.
    pub listed: usize,
    /// Announcements handed to the sink.
    pub emitted: usize,
    /// Messages from senders outside the allow-list.
    pub rejected: usize,
    /// Messages whose body could not be converted.
    pub failed: usize,
    /// Whether the listed messages were deleted and expunged.
    pub removed: bool,
}

/// Runs mailbox cycles and hands announcements to the sink.
pub struct CycleRunner {
    mailbox: Arc<dyn Mailbox>,
    converter: Arc<dyn BodyConverter>,
    settings: CycleSettings,
    announcements: HandoffSender<Announcement>,
}

impl CycleRunner {
    pub fn new(
        mailbox: Arc<dyn Mailbox>,
        converter: Arc<dyn BodyConverter>,
        settings: CycleSettings,
        announcements: HandoffSender<Announcement>,
    ) -> Self {
        Self {
            mailbox,
            converter,
            settings,
            announcements,
        }
    }

    /// Run one cycle.
    ///
    /// Only a folder selection failure or a closed sink is returned as an
    /// error; everything else is logged and reflected in the report.
    pub async fn run_cycle(&self) -> Result<CycleReport, CycleError> {
        let folder = &self.settings.folder;
        self.mailbox
            .select_folder(folder)
            .await
            .map_err(|source| CycleError::SelectFolder {
                folder: folder.clone(),
                source,
            })?;

        let mut report = CycleReport::default();
        let messages = match self.mailbox.list_messages().await {
            Ok(msgs) => msgs,
            Err(e) => {
                error!(folder = %folder, error = %e, "Failed to list messages");
                return Ok(report);
            }
        };

        if messages.is_empty() {
            return Ok(report);
        }

        report.listed = messages.len();
        debug!("Listed {} message(s) in {folder}", messages.len());

        let mut to_remove: Vec<u32> = Vec::with_capacity(messages.len());
        for message in &messages {
            to_remove.push(message.uid);

            if !is_sender_allowed(&self.settings.allowed_domains, &message.from) {
                info!(
                    uid = message.uid,
                    from = ?message.from,
                    subject = %message.subject,
                    "Rejected email from sender outside the allow-list"
                );
                report.rejected += 1;
                continue;
            }

            let body = match self.converter.convert(&message.html) {
                Ok(body) => body,
                Err(e) => {
                    error!(uid = message.uid, subject = %message.subject, error = %e, "Failed to convert email body");
                    report.failed += 1;
                    continue;
                }
            };

            let announcement =
                Announcement::build(&message.subject, &body, self.settings.max_segment_len);
            debug!(
                uid = message.uid,
                segments = announcement.segments.len(),
                "Handing off announcement"
            );
            self.announcements
                .send(announcement)
                .await
                .map_err(|_| CycleError::SinkClosed)?;
            report.emitted += 1;
        }

        report.removed = self.remove(&to_remove).await;
        Ok(report)
    }

    async fn remove(&self, uids: &[u32]) -> bool {
        if let Err(e) = self.mailbox.mark_deleted(uids).await {
            error!(count = uids.len(), error = %e, "Failed to flag emails as deleted");
            return false;
        }
        if let Err(e) = self.mailbox.expunge().await {
            error!(count = uids.len(), error = %e, "Failed to expunge emails");
            return false;
        }
        debug!("Removed {} email(s)", uids.len());
        true
    }
}

/// Run cycles every `period` until cancelled.
///
/// The first cycle starts immediately. A slow cycle delays the next tick;
/// cycles never overlap. Returns `Err` only when the folder cannot be
/// selected. The runner, and with it the announcement sender, is dropped on
/// return, which closes the channel for the sink.
pub async fn listen(
    runner: CycleRunner,
    period: Duration,
    cancel: CancellationToken,
) -> Result<(), CycleError> {
    info!(
        "Listening on {}, polling every {}s",
        runner.settings.folder,
        period.as_secs()
    );

    let mut tick = tokio::time::interval(period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("Listener shutting down");
                return Ok(());
            }
            _ = tick.tick() => {}
        }

        match runner.run_cycle().await {
            Ok(report) => {
                if report.listed > 0 {
                    info!(
                        listed = report.listed,
                        emitted = report.emitted,
                        rejected = report.rejected,
                        failed = report.failed,
                        removed = report.removed,
                        "Cycle finished"
                    );
                }
            }
            Err(CycleError::SinkClosed) => {
                info!("Announcement sink closed, stopping listener");
                return Ok(());
            }
            Err(e) => return Err(e),
        }
    }
}

/// Spawn `listen` on a background task.
pub fn spawn_listener(
    runner: CycleRunner,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<Result<(), CycleError>> {
    tokio::spawn(listen(runner, period, cancel))
}
