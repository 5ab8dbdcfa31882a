//! Sender allow-list check.

/// Check that every sender address ends with an allowed domain suffix.
///
/// - Empty allow-list → deny any message that has a sender
/// - No sender addresses → allowed (nothing to reject)
/// - Suffixes compare ASCII case-insensitively
pub fn is_sender_allowed<S: AsRef<str>>(allowed_domains: &[String], senders: &[S]) -> bool {
    senders.iter().all(|sender| {
        let sender = sender.as_ref().to_ascii_lowercase();
        allowed_domains
            .iter()
            .map(|d| d.trim())
            .filter(|d| !d.is_empty())
            .any(|domain| sender.ends_with(&domain.to_ascii_lowercase()))
    })
}
