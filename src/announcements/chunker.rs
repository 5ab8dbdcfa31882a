//! Splits a formatted body into segments that fit the outbound size limit.
//!
//! Lengths are byte lengths. Every boundary character is ASCII, so a cut
//! made right after one always lands on a char boundary.

/// Characters a segment may end on.
const BOUNDARIES: &[u8] = b"\n.;!?";

/// Escaped `--` produced by the markdown converter for a signature line.
pub const SIGNATURE_MARKER: &str = "\\-\\-";

/// Prepare a converted body for chunking.
///
/// Drops everything from the first signature marker on, collapses doubled
/// newlines and trims surrounding whitespace.
pub fn clean_body(body: &str) -> String {
    let body = match body.find(SIGNATURE_MARKER) {
        Some(pos) => &body[..pos],
        None => body,
    };
    body.replace("\n\n", "\n").trim().to_string()
}

/// Split `body` into segments of at most `max_len` bytes.
///
/// The first segment also has to carry `subject`, so its budget is reduced
/// by the subject length. Segments end on the last boundary character that
/// fits. When no boundary fits, the segment runs to the next boundary
/// further on instead: a run without any boundary is never cut, even if
/// that makes the segment longer than `max_len`.
///
/// Each segment is whitespace-trimmed; segments that trim to nothing are
/// dropped.
pub fn chunk(subject: &str, body: &str, max_len: usize) -> Vec<String> {
    let mut segments = Vec::new();
    let mut budget = max_len.saturating_sub(subject.len());
    let mut remaining = body;

    while remaining.len() > budget {
        let bytes = remaining.as_bytes();
        let cut = match last_boundary(&bytes[..budget]) {
            Some(i) => i,
            None => match first_boundary(&bytes[budget..]) {
                Some(i) => budget + i,
                // nothing left to split on
                None => break,
            },
        };

        let segment = remaining[..=cut].trim();
        remaining = &remaining[cut + 1..];

        if !segment.is_empty() {
            segments.push(segment.to_string());
            budget = max_len;
        }
    }

    let tail = remaining.trim();
    if !tail.is_empty() {
        segments.push(tail.to_string());
    }
    segments
}

fn last_boundary(window: &[u8]) -> Option<usize> {
    window.iter().rposition(|b| BOUNDARIES.contains(b))
}

fn first_boundary(window: &[u8]) -> Option<usize> {
    window.iter().position(|b| BOUNDARIES.contains(b))
}
