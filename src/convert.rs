//! HTML body conversion.

use htmd::HtmlToMarkdown;
use htmd::options::{HeadingStyle, LinkStyle, Options};

use crate::error::ConvertError;

/// Turns an email's HTML body into the text that gets announced.
pub trait BodyConverter: Send + Sync {
    fn convert(&self, html: &str) -> Result<String, ConvertError>;
}

/// Converts HTML into markdown with setext headings and inline links.
#[derive(Debug, Default, Clone, Copy)]
pub struct MarkdownConverter;

impl MarkdownConverter {
    pub fn new() -> Self {
        Self
    }

    fn converter() -> HtmlToMarkdown {
        let options = Options {
            heading_style: HeadingStyle::Setex,
            link_style: LinkStyle::Inlined,
            ..Default::default()
        };
        HtmlToMarkdown::builder()
            .skip_tags(vec!["head", "script", "style"])
            .options(options)
            .build()
    }
}

impl BodyConverter for MarkdownConverter {
    fn convert(&self, html: &str) -> Result<String, ConvertError> {
        Self::converter()
            .convert(html)
            .map_err(|e| ConvertError::Markdown(e.to_string()))
    }
}
