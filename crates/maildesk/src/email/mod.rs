//! IMAP mailbox access and message parsing.
//!
//! This module connects to a mailbox over IMAP with TLS, lists messages
//! above a UID watermark, and parses fetched messages into structured
//! form for the ingestion pipeline.

pub mod client;
pub mod error;
pub mod parser;

pub use client::{MailboxClient, RawMessage};
pub use error::EmailError;
pub use parser::{AttachmentPart, EmailParser, ParsedEmail};
