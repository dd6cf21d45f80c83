//! Telegram channel: long polling in, HTML messages out

use async_trait::async_trait;
use kestrel_bus::{InboundMessage, MessageBus, OutboundMessage};
use kestrel_config::TelegramConfig;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{ChatId, InputFile, MessageId, ParseMode};
use tracing::{debug, error, info, warn};

use crate::{Channel, ChannelError, Result};

/// Telegram's limit for one message
pub const MAX_MESSAGE_LEN: usize = 4096;

const GREETING: &str = "Hi! I'm kestrel. Send me a message and I'll get to work.";

/// Telegram bot connected to the message bus
///
/// Cloning shares the underlying bot client, so one clone can poll while
/// another delivers outbound messages.
#[derive(Clone)]
pub struct TelegramChannel {
    config: TelegramConfig,
    bus: MessageBus,
    bot: Bot,
    media_dir: PathBuf,
}

impl TelegramChannel {
    pub fn new(config: TelegramConfig, bus: MessageBus) -> Self {
        let bot = Bot::new(&config.token);
        Self {
            config,
            bus,
            bot,
            media_dir: kestrel_config::paths::media_dir(),
        }
    }

    /// Where downloaded photos and documents go
    pub fn with_media_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.media_dir = dir.into();
        self
    }

    async fn send_chunk(&self, chat_id: ChatId, text: &str, reply_to: Option<MessageId>) -> Result<()> {
        let html = markdown_to_html(text);
        if html.chars().count() <= MAX_MESSAGE_LEN {
            let mut request = self.bot.send_message(chat_id, html).parse_mode(ParseMode::Html);
            if let Some(id) = reply_to {
                request = request.reply_to_message_id(id);
            }
            match request.await {
                Ok(_) => return Ok(()),
                Err(e) => warn!("HTML send to {} failed ({}), retrying as plain text", chat_id, e),
            }
        }

        let mut request = self.bot.send_message(chat_id, text);
        if let Some(id) = reply_to {
            request = request.reply_to_message_id(id);
        }
        request.await?;
        Ok(())
    }
}

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn start(&mut self) -> Result<()> {
        if !self.config.enabled || self.config.token.is_empty() {
            info!("Telegram channel disabled");
            return Ok(());
        }

        info!("Starting Telegram channel");
        let bus = self.bus.clone();
        let allow_from = Arc::new(self.config.allow_from.clone());
        let media_dir = Arc::new(self.media_dir.clone());

        teloxide::repl(self.bot.clone(), move |bot: Bot, msg: Message| {
            let bus = bus.clone();
            let allow_from = Arc::clone(&allow_from);
            let media_dir = Arc::clone(&media_dir);
            async move {
                handle_update(&bot, &msg, &bus, &allow_from, &media_dir).await;
                respond(())
            }
        })
        .await;

        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        info!("Stopping Telegram channel");
        Ok(())
    }

    async fn send(&self, msg: &OutboundMessage) -> Result<()> {
        let chat_id = msg
            .chat_id
            .parse::<i64>()
            .map(ChatId)
            .map_err(|_| ChannelError::InvalidChatId(msg.chat_id.clone()))?;
        let mut reply_to = msg
            .reply_to
            .as_deref()
            .and_then(|id| id.parse::<i32>().ok())
            .map(MessageId);

        if let Some(file) = &msg.file {
            let path = Path::new(file);
            if !path.is_file() {
                return Err(ChannelError::MissingAttachment(file.clone()));
            }
            let mut request = self.bot.send_document(chat_id, InputFile::file(path));
            if let Some(id) = reply_to.take() {
                request = request.reply_to_message_id(id);
            }
            request.await?;
            debug!("sent document {} to {}", file, chat_id);
        }

        for chunk in split_message(&msg.content, MAX_MESSAGE_LEN) {
            if chunk.trim().is_empty() {
                continue;
            }
            self.send_chunk(chat_id, &chunk, reply_to.take()).await?;
        }
        Ok(())
    }

    fn is_allowed(&self, sender_id: &str) -> bool {
        sender_allowed(&self.config.allow_from, sender_id)
    }
}

/// Sender ids look like `<user id>` or `<user id>|<username>`; either part may be listed
fn sender_allowed(allow_from: &[String], sender_id: &str) -> bool {
    if allow_from.is_empty() {
        return true;
    }
    sender_id.split('|').any(|part| {
        allow_from
            .iter()
            .any(|allowed| allowed == part || allowed.strip_prefix('@') == Some(part))
    })
}

async fn handle_update(
    bot: &Bot,
    msg: &Message,
    bus: &MessageBus,
    allow_from: &[String],
    media_dir: &Path,
) {
    let Some(user) = msg.from() else {
        return;
    };
    let sender_id = match &user.username {
        Some(name) => format!("{}|{}", user.id, name),
        None => user.id.to_string(),
    };
    if !sender_allowed(allow_from, &sender_id) {
        debug!("Ignoring message from unauthorized sender {}", sender_id);
        return;
    }

    let text = msg.text().or_else(|| msg.caption()).unwrap_or("").to_string();
    if text.trim() == "/start" {
        if let Err(e) = bot.send_message(msg.chat.id, GREETING).await {
            warn!("failed to greet {}: {}", msg.chat.id, e);
        }
        return;
    }

    let mut media = Vec::new();
    if let Some((file_id, name)) = attachment(msg) {
        match download(bot, &file_id, &format!("{}_{}", msg.id.0, name), media_dir).await {
            Ok(path) => media.push(path),
            Err(e) => warn!("failed to download attachment from {}: {}", sender_id, e),
        }
    }
    if text.is_empty() && media.is_empty() {
        return;
    }

    let mut inbound = InboundMessage::new("telegram", &sender_id, msg.chat.id.to_string(), text)
        .with_metadata("message_id", msg.id.0)
        .with_metadata("first_name", &user.first_name);
    if let Some(username) = &user.username {
        inbound = inbound.with_metadata("username", username);
    }
    for path in media {
        inbound = inbound.with_media(path.to_string_lossy());
    }

    if let Err(e) = bus.publish_inbound(inbound) {
        error!("Failed to publish message from {}: {}", sender_id, e);
    }
}

/// File id and a local file name for the message's photo or document
fn attachment(msg: &Message) -> Option<(String, String)> {
    if let Some(photo) = msg.photo().and_then(|sizes| sizes.last()) {
        return Some((photo.file.id.clone(), format!("{}.jpg", photo.file.unique_id)));
    }
    msg.document().map(|doc| {
        let name = doc
            .file_name
            .clone()
            .unwrap_or_else(|| doc.file.unique_id.clone());
        (doc.file.id.clone(), name)
    })
}

async fn download(bot: &Bot, file_id: &str, name: &str, dir: &Path) -> Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    let file = bot.get_file(file_id.to_string()).await?;
    let path = dir.join(name.replace(['/', '\\'], "_"));
    let mut dst = tokio::fs::File::create(&path).await?;
    bot.download_file(&file.path, &mut dst).await?;
    debug!("downloaded {} to {:?}", file_id, path);
    Ok(path)
}

/// Split `text` into pieces of at most `max_len` characters
///
/// Cuts prefer the last newline, then the last space, inside the window.
pub fn split_message(text: &str, max_len: usize) -> Vec<String> {
    let max_len = max_len.max(1);
    let mut chunks = Vec::new();
    let mut rest = text;

    while rest.chars().count() > max_len {
        let limit = rest
            .char_indices()
            .nth(max_len)
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        let window = &rest[..limit];
        let cut = window
            .rfind('\n')
            .or_else(|| window.rfind(' '))
            .filter(|&i| i > 0)
            .unwrap_or(limit);
        chunks.push(rest[..cut].to_string());
        rest = rest[cut..].trim_start_matches(|c: char| c == '\n' || c == ' ');
    }

    if !rest.is_empty() || chunks.is_empty() {
        chunks.push(rest.to_string());
    }
    chunks
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Convert the Markdown models write into the HTML subset Telegram accepts
///
/// Code is pulled out first so nothing inside it gets formatted.
pub fn markdown_to_html(text: &str) -> String {
    let mut blocks = Vec::new();
    let text = Regex::new(r"(?s)```[\w+-]*\n?(.*?)```")
        .expect("valid regex")
        .replace_all(text, |caps: &regex::Captures| {
            blocks.push(caps[1].to_string());
            format!("\u{0}B{}\u{0}", blocks.len() - 1)
        })
        .into_owned();

    let mut inline = Vec::new();
    let text = Regex::new(r"`([^`\n]+)`")
        .expect("valid regex")
        .replace_all(&text, |caps: &regex::Captures| {
            inline.push(caps[1].to_string());
            format!("\u{0}I{}\u{0}", inline.len() - 1)
        })
        .into_owned();

    let mut html = escape_html(&text);
    let rules: &[(&str, &str)] = &[
        (r"(?m)^#{1,6}\s+(.+)$", "<b>$1</b>"),
        (r"(?m)^&gt;\s?(.*)$", "$1"),
        (r"\[([^\]]+)\]\(([^)\s]+)\)", r#"<a href="$2">$1</a>"#),
        (r"\*\*(.+?)\*\*", "<b>$1</b>"),
        (r"__(.+?)__", "<b>$1</b>"),
        (r"(?m)^[-*]\s+", "• "),
        (r"\*([^*\n]+)\*", "<i>$1</i>"),
        (r"(^|[^\w])_([^_\n]+)_($|[^\w])", "$1<i>$2</i>$3"),
        (r"~~(.+?)~~", "<s>$1</s>"),
    ];
    for (pattern, replacement) in rules {
        html = Regex::new(pattern)
            .expect("valid regex")
            .replace_all(&html, *replacement)
            .into_owned();
    }

    for (i, code) in inline.iter().enumerate() {
        html = html.replace(
            &format!("\u{0}I{}\u{0}", i),
            &format!("<code>{}</code>", escape_html(code)),
        );
    }
    for (i, code) in blocks.iter().enumerate() {
        html = html.replace(
            &format!("\u{0}B{}\u{0}", i),
            &format!("<pre><code>{}</code></pre>", escape_html(code)),
        );
    }
    html
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(enabled: bool, token: &str, allow_from: &[&str]) -> TelegramChannel {
        let (bus, _in_rx, _out_rx) = MessageBus::channels();
        TelegramChannel::new(
            TelegramConfig {
                enabled,
                token: token.to_string(),
                allow_from: allow_from.iter().map(|s| s.to_string()).collect(),
            },
            bus,
        )
    }

    #[test]
    fn test_channel_name() {
        assert_eq!(channel(false, "", &[]).name(), "telegram");
    }

    #[test]
    fn test_empty_allow_list_admits_everyone() {
        let channel = channel(true, "token", &[]);
        assert!(channel.is_allowed("123456"));
        assert!(channel.is_allowed("123456|alice"));
    }

    #[test]
    fn test_allow_list_by_id_or_username() {
        let channel = channel(true, "token", &["123456", "@bob"]);
        assert!(channel.is_allowed("123456"));
        assert!(channel.is_allowed("123456|alice"));
        assert!(channel.is_allowed("777|bob"));
        assert!(!channel.is_allowed("777|carol"));
        assert!(!channel.is_allowed("12345"));
        assert!(!channel.is_allowed("777|Bob"));
    }

    #[test]
    fn test_markdown_inline_styles() {
        assert_eq!(markdown_to_html("This is **bold** text"), "This is <b>bold</b> text");
        assert_eq!(markdown_to_html("This is __bold__ text"), "This is <b>bold</b> text");
        assert_eq!(markdown_to_html("This is *italic* text"), "This is <i>italic</i> text");
        assert_eq!(markdown_to_html("This is _italic_ text"), "This is <i>italic</i> text");
        assert_eq!(markdown_to_html("~~gone~~"), "<s>gone</s>");
        assert_eq!(
            markdown_to_html("**Bold** and *italic* and `code`"),
            "<b>Bold</b> and <i>italic</i> and <code>code</code>"
        );
    }

    #[test]
    fn test_markdown_snake_case_is_not_italic() {
        assert_eq!(markdown_to_html("call max_agent_iterations"), "call max_agent_iterations");
    }

    #[test]
    fn test_markdown_code_is_literal() {
        assert_eq!(
            markdown_to_html("```rust\nlet x = a < b && **c**;\n```"),
            "<pre><code>let x = a &lt; b &amp;&amp; **c**;\n</code></pre>"
        );
        assert_eq!(
            markdown_to_html("`x < y && y > z`"),
            "<code>x &lt; y &amp;&amp; y &gt; z</code>"
        );
    }

    #[test]
    fn test_markdown_escapes_html() {
        assert_eq!(
            markdown_to_html("Use <script>alert('xss')</script> and & more"),
            "Use &lt;script&gt;alert('xss')&lt;/script&gt; and &amp; more"
        );
    }

    #[test]
    fn test_markdown_structure() {
        assert_eq!(markdown_to_html("## Plan"), "<b>Plan</b>");
        assert_eq!(markdown_to_html("- one\n* two"), "• one\n• two");
        assert_eq!(markdown_to_html("> quoted"), "quoted");
        assert_eq!(
            markdown_to_html("see [docs](https://example.com/a)"),
            r#"see <a href="https://example.com/a">docs</a>"#
        );
        assert_eq!(markdown_to_html(""), "");
    }

    #[test]
    fn test_split_short_message_is_single_chunk() {
        assert_eq!(split_message("hello", MAX_MESSAGE_LEN), vec!["hello"]);
        assert_eq!(split_message("", MAX_MESSAGE_LEN), vec![""]);
    }

    #[test]
    fn test_split_prefers_newlines_then_spaces() {
        let chunks = split_message("aaaa\nbbbb cccc", 10);
        assert_eq!(chunks, vec!["aaaa", "bbbb cccc"]);

        let chunks = split_message("aaaa bbbb cccc", 10);
        assert_eq!(chunks, vec!["aaaa bbbb", "cccc"]);
    }

    #[test]
    fn test_split_hard_cuts_and_respects_chars() {
        let text = "é".repeat(25);
        let chunks = split_message(&text, 10);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.chars().count() <= 10));
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn test_split_long_reply_fits_telegram() {
        let text = "word ".repeat(2000);
        let chunks = split_message(&text, MAX_MESSAGE_LEN);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.chars().count() <= MAX_MESSAGE_LEN));
    }

    #[tokio::test]
    async fn test_send_rejects_bad_chat_id() {
        let channel = channel(true, "token", &[]);
        let err = channel
            .send(&OutboundMessage::new("telegram", "not-a-number", "hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, ChannelError::InvalidChatId(id) if id == "not-a-number"));
    }

    #[tokio::test]
    async fn test_send_rejects_missing_attachment() {
        let channel = channel(true, "token", &[]);
        let msg = OutboundMessage::new("telegram", "42", "see file").with_file("/nonexistent/report.pdf");
        let err = channel.send(&msg).await.unwrap_err();
        assert!(matches!(err, ChannelError::MissingAttachment(_)));
    }

    #[tokio::test]
    async fn test_start_returns_when_disabled() {
        assert!(channel(false, "token", &[]).start().await.is_ok());
        assert!(channel(true, "", &[]).start().await.is_ok());
        assert!(channel(true, "token", &[]).stop().await.is_ok());
    }
}
