//! Announcements built from mailbox messages.

pub mod chunker;
pub mod validator;

pub use chunker::{chunk, clean_body};
pub use validator::is_sender_allowed;

/// One email turned into outbound text segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    pub subject: String,
    /// Ordered body segments, each sized for one outbound message.
    pub segments: Vec<String>,
}

impl Announcement {
    /// Clean `body` and split it so every rendered message fits `max_len`.
    pub fn build(subject: &str, body: &str, max_len: usize) -> Self {
        let body = clean_body(body);
        Self {
            subject: subject.to_string(),
            segments: chunk(subject, &body, max_len),
        }
    }

    /// Render the outbound messages, one per segment.
    ///
    /// The bold subject heads the first message only. An announcement
    /// without a body still sends its subject.
    pub fn render(&self) -> Vec<String> {
        let header = format!("**{}**", self.subject);
        if self.segments.is_empty() {
            return vec![header];
        }
        self.segments
            .iter()
            .enumerate()
            .map(|(i, segment)| {
                if i == 0 {
                    format!("{header}\n\n{segment}")
                } else {
                    segment.clone()
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_short_announcement() {
        let a = Announcement::build("test", "test", 100);
        assert_eq!(
            a,
            Announcement {
                subject: "test".into(),
                segments: vec!["test".into()],
            }
        );
    }

    #[test]
    fn build_cuts_signature_before_chunking() {
        let body = "Full body test.\n\
                    example announcement.\n\
                    It has an end delimiter. \\-\\-\n\
                    and then an email.\n";
        let a = Announcement::build("test", body, 10);
        assert_eq!(
            a.segments,
            vec!["Full body test.", "example announcement.", "It has an end delimiter."]
        );
        assert!(a.segments.iter().all(|s| !s.contains("and then an email")));
    }

    #[test]
    fn build_empty_body() {
        let a = Announcement::build("Holiday", " \n\n ", 100);
        assert!(a.segments.is_empty());
    }

    #[test]
    fn render_puts_subject_on_first_message_only() {
        let a = Announcement {
            subject: "News".into(),
            segments: vec!["one.".into(), "two.".into()],
        };
        assert_eq!(a.render(), vec!["**News**\n\none.", "two."]);
    }

    #[test]
    fn render_without_segments_sends_subject() {
        let a = Announcement {
            subject: "News".into(),
            segments: vec![],
        };
        assert_eq!(a.render(), vec!["**News**"]);
    }
}
