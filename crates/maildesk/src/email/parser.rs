//! MIME message parsing.
//!
//! Turns a fetched [`RawMessage`] into a [`ParsedEmail`]: dedup identifier,
//! reference chain, addresses, bodies, and attachment parts. Parsing is
//! all-or-nothing; a message that cannot be parsed fails with
//! [`EmailError::ParseError`] and the caller decides how to proceed.

use chrono::{DateTime, Utc};
use log::{debug, warn};
use mail_parser::{Message, MessageParser, MimeHeaders, PartType};
use sha2::{Digest, Sha256};

use super::client::RawMessage;
use super::error::{EmailError, Result};

/// An attachment extracted from a message part.
#[derive(Debug, Clone)]
pub struct AttachmentPart {
    /// The attachment's filename (sanitized).
    pub filename: String,
    /// The attachment's MIME type.
    pub content_type: String,
    /// The decoded attachment content.
    pub content: Vec<u8>,
    /// Content-ID for parts referenced from HTML via `cid:` URLs.
    pub content_id: Option<String>,
    /// True for inline parts (CID images and the like).
    pub inline: bool,
}

/// A parsed inbound email.
#[derive(Debug, Clone)]
pub struct ParsedEmail {
    /// Dedup identifier: the Message-ID header without angle brackets, or
    /// a content hash when the header is absent.
    pub source_id: String,
    /// True when `source_id` is a content hash rather than a Message-ID.
    pub degraded_dedup: bool,
    /// Ancestor message ids, most recent last. References header entries
    /// first, then In-Reply-To if it was not already listed.
    pub references: Vec<String>,
    pub subject: Option<String>,
    pub sender_email: String,
    pub sender_name: Option<String>,
    pub recipient_email: Option<String>,
    pub cc_emails: Vec<String>,
    /// First text/plain part, if any.
    pub body_text: Option<String>,
    /// First text/html part, if any. Never synthesized from the plain body.
    pub body_html: Option<String>,
    pub attachments: Vec<AttachmentPart>,
    /// All original header fields as a JSON object, last occurrence wins.
    pub headers: serde_json::Value,
    /// Date header, falling back to the fetch time when absent.
    pub received_at: DateTime<Utc>,
}

/// Parser for inbound email messages.
pub struct EmailParser {
    max_attachment_size: u64,
}

impl EmailParser {
    /// Creates a parser that skips attachments larger than
    /// `max_attachment_size` bytes.
    pub fn new(max_attachment_size: u64) -> Self {
        Self {
            max_attachment_size,
        }
    }

    /// Parses a raw message into a [`ParsedEmail`].
    pub fn parse(&self, raw: &RawMessage) -> Result<ParsedEmail> {
        let message = MessageParser::default().parse(&raw.bytes).ok_or_else(|| {
            EmailError::ParseError(format!("Failed to parse message UID={}", raw.uid))
        })?;

        let subject = message.subject().map(|s| s.to_string());

        debug!(
            "parsing UID {} ({})",
            raw.uid,
            subject.as_deref().unwrap_or("no subject")
        );

        let (sender_email, sender_name) = match message.from().and_then(|addr| addr.first()) {
            Some(addr) => (
                addr.address().unwrap_or_default().to_string(),
                addr.name().map(|n| n.to_string()),
            ),
            None => (String::new(), None),
        };

        let recipient_email = message
            .to()
            .and_then(|addr| addr.first())
            .and_then(|addr| addr.address())
            .map(|a| a.to_string());

        let cc_emails: Vec<String> = message
            .cc()
            .and_then(|addr| addr.as_list())
            .map(|list| {
                list.iter()
                    .filter_map(|a| a.address())
                    .map(|a| a.to_string())
                    .collect()
            })
            .unwrap_or_default();

        // The Date header is the stable received time; the fetch time is
        // only a display fallback and never feeds the dedup hash.
        let date_header = message
            .date()
            .and_then(|d| DateTime::from_timestamp(d.to_timestamp(), 0));
        let received_at = date_header.unwrap_or(raw.fetched_at);

        let mut references: Vec<String> = message
            .references()
            .as_text_list()
            .map(|refs| {
                refs.iter()
                    .map(|r| normalize_message_id(r))
                    .filter(|r| !r.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        if let Some(in_reply_to) = message.in_reply_to().as_text() {
            let in_reply_to = normalize_message_id(in_reply_to);
            if !in_reply_to.is_empty() && !references.contains(&in_reply_to) {
                references.push(in_reply_to);
            }
        }

        let (body_text, body_html, attachments) = self.extract_parts(&message, raw.uid);

        let (source_id, degraded_dedup) = match message.message_id() {
            Some(id) if !id.trim().is_empty() => (normalize_message_id(id), false),
            _ => {
                let hash = content_hash(
                    &sender_email,
                    subject.as_deref(),
                    date_header,
                    body_text.as_deref().or(body_html.as_deref()),
                );
                warn!(
                    "Email UID={} has no Message-ID, deduplicating on content hash {}",
                    raw.uid, hash
                );
                (hash, true)
            }
        };

        let raw_bytes: &[u8] = message.raw_message.as_ref();
        let mut headers = serde_json::Map::new();
        for header in &message.root_part().headers {
            let value = raw_bytes
                .get(header.offset_start as usize..header.offset_end as usize)
                .map(|bytes| String::from_utf8_lossy(bytes).trim().to_string())
                .unwrap_or_default();
            headers.insert(
                header.name.as_str().to_string(),
                serde_json::Value::String(value),
            );
        }

        Ok(ParsedEmail {
            source_id,
            degraded_dedup,
            references,
            subject,
            sender_email,
            sender_name,
            recipient_email,
            cc_emails,
            body_text,
            body_html,
            attachments,
            headers: serde_json::Value::Object(headers),
            received_at,
        })
    }

    /// Walks the MIME part tree collecting the first plain and HTML bodies
    /// and every attachment part.
    fn extract_parts(
        &self,
        message: &Message,
        uid: u32,
    ) -> (Option<String>, Option<String>, Vec<AttachmentPart>) {
        let mut body_text: Option<String> = None;
        let mut body_html: Option<String> = None;
        let mut attachments = Vec::new();

        for part in message.parts.iter() {
            if is_attachment(part) {
                // Get content
                let content = match &part.body {
                    PartType::Binary(data) | PartType::InlineBinary(data) => data.to_vec(),
                    PartType::Text(text) => text.as_bytes().to_vec(),
                    PartType::Html(html) => html.as_bytes().to_vec(),
                    _ => continue,
                };

                let content_type = part
                    .content_type()
                    .map(|ct| {
                        if let Some(subtype) = ct.subtype() {
                            format!("{}/{}", ct.ctype(), subtype)
                        } else {
                            ct.ctype().to_string()
                        }
                    })
                    .unwrap_or_else(|| "application/octet-stream".to_string());

                let filename = attachment_filename(part, &content_type);

                if content.len() as u64 > self.max_attachment_size {
                    debug!(
                        "Attachment '{}' on UID={} too large: {} > {}",
                        filename,
                        uid,
                        content.len(),
                        self.max_attachment_size
                    );
                    continue;
                }

                let content_id = part
                    .content_id()
                    .map(normalize_message_id)
                    .filter(|id| !id.is_empty());

                let inline = part
                    .content_disposition()
                    .map(|cd| cd.ctype().eq_ignore_ascii_case("inline"))
                    .unwrap_or(content_id.is_some());

                debug!(
                    "Found attachment: {} ({}, {} bytes, inline={})",
                    filename,
                    content_type,
                    content.len(),
                    inline
                );

                attachments.push(AttachmentPart {
                    filename,
                    content_type,
                    content,
                    content_id,
                    inline,
                });
                continue;
            }

            match &part.body {
                PartType::Text(text) => {
                    if body_text.is_none() && is_plain_text(part) {
                        body_text = Some(text.to_string());
                    }
                }
                PartType::Html(html) => {
                    if body_html.is_none() {
                        body_html = Some(html.to_string());
                    }
                }
                _ => {}
            }
        }

        (body_text, body_html, attachments)
    }
}

/// Checks if a message part is an attachment.
fn is_attachment(part: &mail_parser::MessagePart) -> bool {
    // Check Content-Disposition
    if let Some(disposition) = part.content_disposition() {
        if disposition.ctype() == "attachment" {
            return true;
        }
    }

    // Check if it has a filename (inline attachments)
    if part.attachment_name().is_some() {
        return true;
    }

    // Check Content-Type for common attachment types
    if let Some(content_type) = part.content_type() {
        let ctype = content_type.ctype();
        // Exclude text/plain and text/html which are typically body parts
        if ctype != "text" && ctype != "multipart" {
            // Has a subtype and is not a message container
            if content_type.subtype().is_some() && ctype != "message" {
                return true;
            }
        }
    }

    false
}

/// True for parts that decode as the plain-text body. A missing
/// Content-Type defaults to text/plain per RFC 2045.
fn is_plain_text(part: &mail_parser::MessagePart) -> bool {
    match part.content_type() {
        Some(ct) => {
            ct.ctype().eq_ignore_ascii_case("text")
                && ct.subtype().map_or(true, |s| s.eq_ignore_ascii_case("plain"))
        }
        None => true,
    }
}

/// Gets a sanitized filename for an attachment.
fn attachment_filename(part: &mail_parser::MessagePart, content_type: &str) -> String {
    let raw_filename = part
        .attachment_name()
        .or_else(|| part.content_type().and_then(|ct| ct.attribute("name")))
        .map(|s| s.to_string());

    let filename = match raw_filename {
        Some(name) if !name.is_empty() => name,
        _ => {
            // Generate a filename based on MIME type
            let extension = mime_to_extension(content_type);
            format!("attachment.{}", extension)
        }
    };

    sanitize_filename(&filename)
}

/// Strips angle brackets and surrounding whitespace from a message id.
fn normalize_message_id(value: &str) -> String {
    value
        .trim()
        .trim_start_matches('<')
        .trim_end_matches('>')
        .trim()
        .to_string()
}

/// Stable dedup identifier for messages without a Message-ID header. Only
/// header-derived inputs participate so retried fetches hash identically.
fn content_hash(
    sender: &str,
    subject: Option<&str>,
    date: Option<DateTime<Utc>>,
    body: Option<&str>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(sender.as_bytes());
    hasher.update(b"\n");
    hasher.update(subject.unwrap_or_default().as_bytes());
    hasher.update(b"\n");
    hasher.update(date.map(|d| d.to_rfc3339()).unwrap_or_default().as_bytes());
    hasher.update(b"\n");
    hasher.update(body.unwrap_or_default().as_bytes());
    hex::encode(hasher.finalize())
}

/// Sanitizes a filename to remove potentially dangerous characters.
fn sanitize_filename(filename: &str) -> String {
    let filename = filename
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '.' || c == '-' || c == '_' || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect::<String>();

    // Remove leading/trailing dots and spaces
    let filename = filename.trim_matches(|c| c == '.' || c == ' ');

    // Limit length
    if filename.len() > 255 {
        let ext_start = filename.rfind('.').unwrap_or(filename.len());
        let ext = &filename[ext_start..];
        let base = &filename[..255 - ext.len().min(50)];
        format!("{}{}", base, ext)
    } else if filename.is_empty() {
        "attachment".to_string()
    } else {
        filename.to_string()
    }
}

/// Converts a MIME type to a file extension.
fn mime_to_extension(mime_type: &str) -> &'static str {
    match mime_type.to_lowercase().as_str() {
        "application/pdf" => "pdf",
        "application/msword" => "doc",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => "docx",
        "application/vnd.ms-excel" => "xls",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => "xlsx",
        "application/zip" => "zip",
        "application/x-gzip" | "application/gzip" => "gz",
        "application/json" => "json",
        "application/xml" | "text/xml" => "xml",
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "image/svg+xml" => "svg",
        "text/plain" => "txt",
        "text/html" => "html",
        "text/csv" => "csv",
        _ => "bin",
    }
}
