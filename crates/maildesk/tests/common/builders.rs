//! Builder for composing raw RFC 5322 messages in tests.
//!
//! Produces CRLF-terminated wire bytes so fixtures go through the same
//! parsing path as messages fetched from a real mailbox.

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};

use maildesk::email::RawMessage;

/// Builder for raw email messages.
pub struct EmailBuilder {
    message_id: Option<String>,
    in_reply_to: Option<String>,
    references: Vec<String>,
    subject: Option<String>,
    from: String,
    to: Option<String>,
    cc: Vec<String>,
    date: Option<DateTime<Utc>>,
    body_text: Option<String>,
    body_html: Option<String>,
    attachments: Vec<BuiltAttachment>,
}

struct BuiltAttachment {
    filename: String,
    content_type: String,
    content: Vec<u8>,
    content_id: Option<String>,
    inline: bool,
}

impl EmailBuilder {
    /// Creates a builder with a plain-text message from a fixed sender.
    pub fn new() -> Self {
        Self {
            message_id: None,
            in_reply_to: None,
            references: Vec::new(),
            subject: Some("Need help with my order".to_string()),
            from: "Alice Martin <alice@example.com>".to_string(),
            to: Some("support@example.com".to_string()),
            cc: Vec::new(),
            date: Some(Utc.with_ymd_and_hms(2024, 5, 3, 9, 30, 0).unwrap()),
            body_text: Some("Hello, my order never arrived.".to_string()),
            body_html: None,
            attachments: Vec::new(),
        }
    }

    pub fn message_id(mut self, id: &str) -> Self {
        self.message_id = Some(id.to_string());
        self
    }

    /// Drops the Message-ID header entirely, forcing the degraded
    /// dedup fallback.
    pub fn without_message_id(mut self) -> Self {
        self.message_id = None;
        self
    }

    pub fn in_reply_to(mut self, id: &str) -> Self {
        self.in_reply_to = Some(id.to_string());
        self
    }

    /// Appends one id to the References header (oldest first).
    pub fn reference(mut self, id: &str) -> Self {
        self.references.push(id.to_string());
        self
    }

    pub fn subject(mut self, subject: &str) -> Self {
        self.subject = Some(subject.to_string());
        self
    }

    pub fn without_subject(mut self) -> Self {
        self.subject = None;
        self
    }

    /// Sets the raw From header value, e.g. `"Bob <bob@example.com>"`.
    pub fn from(mut self, value: &str) -> Self {
        self.from = value.to_string();
        self
    }

    pub fn to(mut self, value: &str) -> Self {
        self.to = Some(value.to_string());
        self
    }

    pub fn cc(mut self, value: &str) -> Self {
        self.cc.push(value.to_string());
        self
    }

    pub fn date(mut self, date: DateTime<Utc>) -> Self {
        self.date = Some(date);
        self
    }

    pub fn without_date(mut self) -> Self {
        self.date = None;
        self
    }

    pub fn body_text(mut self, body: &str) -> Self {
        self.body_text = Some(body.to_string());
        self
    }

    pub fn without_body(mut self) -> Self {
        self.body_text = None;
        self.body_html = None;
        self
    }

    pub fn body_html(mut self, body: &str) -> Self {
        self.body_html = Some(body.to_string());
        self
    }

    /// Adds a regular attachment. Content must be ASCII-safe since the
    /// builder writes it without a transfer encoding.
    pub fn attachment(mut self, filename: &str, content_type: &str, content: &[u8]) -> Self {
        self.attachments.push(BuiltAttachment {
            filename: filename.to_string(),
            content_type: content_type.to_string(),
            content: content.to_vec(),
            content_id: None,
            inline: false,
        });
        self
    }

    /// Adds an inline part carrying a Content-ID, as HTML mail embeds
    /// images.
    pub fn inline_attachment(
        mut self,
        filename: &str,
        content_type: &str,
        content: &[u8],
        content_id: &str,
    ) -> Self {
        self.attachments.push(BuiltAttachment {
            filename: filename.to_string(),
            content_type: content_type.to_string(),
            content: content.to_vec(),
            content_id: Some(content_id.to_string()),
            inline: true,
        });
        self
    }

    /// Renders the message as CRLF wire bytes.
    pub fn build(&self) -> Vec<u8> {
        let mut lines: Vec<String> = Vec::new();

        if let Some(id) = &self.message_id {
            lines.push(format!("Message-ID: <{}>", id));
        }
        if let Some(id) = &self.in_reply_to {
            lines.push(format!("In-Reply-To: <{}>", id));
        }
        if !self.references.is_empty() {
            let refs: Vec<String> = self
                .references
                .iter()
                .map(|r| format!("<{}>", r))
                .collect();
            lines.push(format!("References: {}", refs.join(" ")));
        }
        lines.push(format!("From: {}", self.from));
        if let Some(to) = &self.to {
            lines.push(format!("To: {}", to));
        }
        if !self.cc.is_empty() {
            lines.push(format!("Cc: {}", self.cc.join(", ")));
        }
        if let Some(subject) = &self.subject {
            lines.push(format!("Subject: {}", subject));
        }
        if let Some(date) = &self.date {
            lines.push(format!("Date: {}", date.to_rfc2822()));
        }
        lines.push("MIME-Version: 1.0".to_string());

        let multipart =
            self.body_html.is_some() || !self.attachments.is_empty();
        let mut out = Vec::new();

        if !multipart {
            lines.push("Content-Type: text/plain; charset=\"utf-8\"".to_string());
            lines.push(String::new());
            lines.push(self.body_text.clone().unwrap_or_default());
            out.extend_from_slice(lines.join("\r\n").as_bytes());
            out.extend_from_slice(b"\r\n");
            return out;
        }

        let boundary = "----=_maildesk_test_boundary";
        lines.push(format!(
            "Content-Type: multipart/mixed; boundary=\"{}\"",
            boundary
        ));
        lines.push(String::new());
        out.extend_from_slice(lines.join("\r\n").as_bytes());
        out.extend_from_slice(b"\r\n");

        if let Some(text) = &self.body_text {
            out.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
            out.extend_from_slice(b"Content-Type: text/plain; charset=\"utf-8\"\r\n\r\n");
            out.extend_from_slice(text.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        if let Some(html) = &self.body_html {
            out.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
            out.extend_from_slice(b"Content-Type: text/html; charset=\"utf-8\"\r\n\r\n");
            out.extend_from_slice(html.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        for part in &self.attachments {
            out.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
            out.extend_from_slice(
                format!(
                    "Content-Type: {}; name=\"{}\"\r\n",
                    part.content_type, part.filename
                )
                .as_bytes(),
            );
            let disposition = if part.inline { "inline" } else { "attachment" };
            out.extend_from_slice(
                format!(
                    "Content-Disposition: {}; filename=\"{}\"\r\n",
                    disposition, part.filename
                )
                .as_bytes(),
            );
            if let Some(content_id) = &part.content_id {
                out.extend_from_slice(format!("Content-ID: <{}>\r\n", content_id).as_bytes());
            }
            out.extend_from_slice(b"\r\n");
            out.extend_from_slice(&part.content);
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(format!("--{}--\r\n", boundary).as_bytes());
        out
    }

    /// Renders the message as it would arrive from a fetch.
    pub fn raw(&self, uid: u32) -> RawMessage {
        RawMessage {
            uid,
            bytes: self.build(),
            fetched_at: Utc.with_ymd_and_hms(2024, 5, 3, 10, 0, 0).unwrap(),
        }
    }
}

impl Default for EmailBuilder {
    fn default() -> Self {
        Self::new()
    }
}
