//! Message format conversion between Mattermost Markdown and Matrix HTML.

use fancy_regex::Regex;

use crate::matrix::events::{MessageContent, MsgType, RelatesTo, RoomEvent};

const HTML_FORMAT: &str = "org.matrix.custom.html";

/// Converts message bodies between the two platforms' formats.
pub trait FormatConverter: Send + Sync {
    /// Render Mattermost text as Matrix message content.
    fn to_matrix(&self, text: &str, msgtype: MsgType) -> MessageContent;

    /// Render Matrix message content as Mattermost text.
    fn to_mattermost(&self, content: &MessageContent) -> String;

    /// Turn `message` into a reply to `original`, with a quoted fallback.
    fn reply(&self, original: &RoomEvent, message: &mut MessageContent);
}

/// Regex-based converter covering the Markdown subset both clients render.
#[derive(Debug, Clone)]
pub struct MarkdownConverter {
    /// Markdown -> HTML rules, applied in order to escaped text.
    to_html: Vec<(Regex, &'static str)>,
    /// HTML -> Markdown rules, applied in order before tags are stripped.
    to_markdown: Vec<(Regex, &'static str)>,
    reply_block: Regex,
    quote_fallback: Regex,
    any_tag: Regex,
}

impl MarkdownConverter {
    pub fn new() -> Result<Self, fancy_regex::Error> {
        Ok(Self {
            to_html: vec![
                (Regex::new(r"`([^`\n]+)`")?, "<code>$1</code>"),
                (Regex::new(r"\*\*(.+?)\*\*")?, "<strong>$1</strong>"),
                (Regex::new(r"(?<![\*\w])\*(?!\s)(.+?)(?<!\s)\*(?![\*\w])")?, "<em>$1</em>"),
                (Regex::new(r"(?<!\w)_(?!\s)(.+?)(?<!\s)_(?!\w)")?, "<em>$1</em>"),
                (Regex::new(r"~~(.+?)~~")?, "<del>$1</del>"),
                (
                    Regex::new(r"\[([^\]\n]+)\]\((https?://[^\)\s]+)\)")?,
                    "<a href=\"$2\">$1</a>",
                ),
                (Regex::new(r"\n")?, "<br>"),
            ],
            to_markdown: vec![
                (Regex::new(r"(?i)<br\s*/?>")?, "\n"),
                (Regex::new(r"(?i)</p>\s*<p>")?, "\n\n"),
                (Regex::new(r"(?is)<(?:strong|b)>(.*?)</(?:strong|b)>")?, "**$1**"),
                (Regex::new(r"(?is)<(?:em|i)>(.*?)</(?:em|i)>")?, "*$1*"),
                (Regex::new(r"(?is)<(?:del|s|strike)>(.*?)</(?:del|s|strike)>")?, "~~$1~~"),
                (Regex::new(r"(?is)<code>(.*?)</code>")?, "`$1`"),
                (Regex::new(r#"(?is)<a href="([^"]*)">(.*?)</a>"#)?, "[$2]($1)"),
            ],
            reply_block: Regex::new(r"(?is)<mx-reply>.*?</mx-reply>")?,
            quote_fallback: Regex::new(r"^(?:>[^\n]*\n)+\n")?,
            any_tag: Regex::new(r"<[^>]+>")?,
        })
    }
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn unescape_html(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}

impl FormatConverter for MarkdownConverter {
    fn to_matrix(&self, text: &str, msgtype: MsgType) -> MessageContent {
        let escaped = escape_html(text);
        let mut html = escaped.clone();
        for (pattern, replacement) in &self.to_html {
            html = pattern.replace_all(&html, *replacement).to_string();
        }

        let mut content = MessageContent::text(msgtype, text);
        if html != escaped || escaped != text {
            content.format = Some(HTML_FORMAT.to_string());
            content.formatted_body = Some(html);
        }
        content
    }

    fn to_mattermost(&self, content: &MessageContent) -> String {
        let html = content
            .formatted_body
            .as_deref()
            .filter(|_| content.format.as_deref() == Some(HTML_FORMAT));

        let Some(html) = html else {
            return self
                .quote_fallback
                .replace(&content.body, "")
                .trim()
                .to_string();
        };

        let mut text = self.reply_block.replace_all(html, "").to_string();
        for (pattern, replacement) in &self.to_markdown {
            text = pattern.replace_all(&text, *replacement).to_string();
        }
        let text = self.any_tag.replace_all(&text, "");
        unescape_html(&text).trim().to_string()
    }

    fn reply(&self, original: &RoomEvent, message: &mut MessageContent) {
        let original_body = self.quote_fallback.replace(&original.content.body, "");
        let mut lines = original_body.lines();
        let mut quoted = format!(
            "> <{}> {}",
            original.sender,
            lines.next().unwrap_or_default()
        );
        for line in lines {
            quoted.push_str("\n> ");
            quoted.push_str(line);
        }

        let original_html = match (&original.content.format, &original.content.formatted_body) {
            (Some(format), Some(html)) if format == HTML_FORMAT => {
                self.reply_block.replace_all(html, "").to_string()
            }
            _ => escape_html(&original_body),
        };
        let message_html = match (&message.format, &message.formatted_body) {
            (Some(format), Some(html)) if format == HTML_FORMAT => html.clone(),
            _ => escape_html(&message.body),
        };

        message.formatted_body = Some(format!(
            "<mx-reply><blockquote><a href=\"https://matrix.to/#/{room}/{event}\">In reply to</a> \
             <a href=\"https://matrix.to/#/{sender}\">{sender}</a><br>{original}</blockquote></mx-reply>{message}",
            room = original.room_id,
            event = original.event_id,
            sender = original.sender,
            original = original_html,
            message = message_html,
        ));
        message.format = Some(HTML_FORMAT.to_string());
        message.body = format!("{}\n\n{}", quoted, message.body);
        message.relates_to = Some(RelatesTo::reply(original.event_id.clone()));
    }
}
