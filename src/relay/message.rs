//! Inbound message model and payload decoding.
//!
//! The sidecar forwards messages in the protocol library's JSON shape. Only
//! two payload shapes carry text we answer: a plain `conversation` string and
//! an `extendedTextMessage` (text with link preview, quote, mention...).
//! Everything else is dropped with a reason so the log says why.

use std::fmt;

use serde::Deserialize;
use serde_json::{Map, Value};

/// Addressing part of a message.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageKey {
    /// Chat identifier of the other party (e.g. "919876543210@s.whatsapp.net").
    #[serde(default)]
    pub remote_jid: Option<String>,
    /// True for messages this session sent itself. The library may send null.
    #[serde(default)]
    pub from_me: Option<bool>,
    #[serde(default)]
    pub id: Option<String>,
}

/// A message as delivered by the protocol library.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebMessage {
    #[serde(default)]
    pub key: MessageKey,
    /// Display name the sender chose for themselves.
    #[serde(default)]
    pub push_name: Option<String>,
    /// Payload object; its field names identify the message type.
    #[serde(default)]
    pub message: Option<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
struct ExtendedText {
    #[serde(default)]
    text: Option<String>,
}

/// The text-bearing payload shapes we answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageContent {
    Conversation(String),
    ExtendedText(String),
}

impl MessageContent {
    pub fn text(&self) -> &str {
        match self {
            Self::Conversation(t) | Self::ExtendedText(t) => t,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Conversation(_) => "conversation",
            Self::ExtendedText(_) => "extendedTextMessage",
        }
    }
}

/// Why a message was not processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dropped {
    /// No payload at all (receipts, protocol stubs).
    NoPayload,
    /// Sent by this session (echo).
    FromSelf,
    /// No chat identifier to answer to.
    NoSender,
    /// Payload of a type we don't handle; carries the payload field names.
    UnsupportedKind(Vec<String>),
    /// A known shape whose fields don't have the expected types.
    Malformed(&'static str),
    /// A known shape with no text in it.
    EmptyText,
}

impl Dropped {
    /// Shapes we don't understand, as opposed to routine skips like echoes.
    pub fn is_unexpected(&self) -> bool {
        matches!(self, Self::UnsupportedKind(_) | Self::Malformed(_))
    }
}

impl fmt::Display for Dropped {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoPayload => write!(f, "no payload"),
            Self::FromSelf => write!(f, "sent by this session"),
            Self::NoSender => write!(f, "no sender"),
            Self::UnsupportedKind(kinds) => write!(f, "unsupported shape [{}]", kinds.join(", ")),
            Self::Malformed(kind) => write!(f, "malformed {kind}"),
            Self::EmptyText => write!(f, "empty text"),
        }
    }
}

/// A decoded message we will answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    pub sender: String,
    /// Sender's display name, empty when unknown.
    pub name: String,
    pub content: MessageContent,
}

impl Inbound {
    pub fn text(&self) -> &str {
        self.content.text()
    }
}

impl WebMessage {
    /// Decode into an answerable message, or say why it is dropped.
    pub fn decode(&self) -> Result<Inbound, Dropped> {
        let payload = self.message.as_ref().ok_or(Dropped::NoPayload)?;
        if self.key.from_me.unwrap_or(false) {
            return Err(Dropped::FromSelf);
        }
        let sender = self
            .key
            .remote_jid
            .as_deref()
            .filter(|jid| !jid.is_empty())
            .ok_or(Dropped::NoSender)?;

        let content = decode_content(payload)?;
        if content.text().is_empty() {
            return Err(Dropped::EmptyText);
        }

        Ok(Inbound {
            sender: sender.to_string(),
            name: self.push_name.clone().unwrap_or_default(),
            content,
        })
    }
}

fn present<'a>(payload: &'a Map<String, Value>, field: &str) -> Option<&'a Value> {
    payload.get(field).filter(|v| !v.is_null())
}

fn decode_content(payload: &Map<String, Value>) -> Result<MessageContent, Dropped> {
    if let Some(value) = present(payload, "conversation") {
        let text = value.as_str().ok_or(Dropped::Malformed("conversation"))?;
        return Ok(MessageContent::Conversation(text.to_string()));
    }

    if let Some(value) = present(payload, "extendedTextMessage") {
        let ext: ExtendedText = serde_json::from_value(value.clone())
            .map_err(|_| Dropped::Malformed("extendedTextMessage"))?;
        return Ok(MessageContent::ExtendedText(ext.text.unwrap_or_default()));
    }

    Err(Dropped::UnsupportedKind(payload.keys().cloned().collect()))
}
