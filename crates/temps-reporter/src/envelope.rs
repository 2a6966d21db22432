//! Envelope encoding
//!
//! Envelopes use the line based Sentry protocol:
//! ```text
//! {envelope_header}\n
//! {item_header}\n
//! {item_payload}\n
//! ...
//! ```
//! Payloads are compact JSON, so every header and payload is exactly one line.

use std::fmt;
use std::io::Write;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::event::Event;

#[derive(Error, Debug)]
pub enum EnvelopeError {
    #[error("missing envelope header")]
    MissingHeader,
    #[error("invalid envelope header: {0}")]
    InvalidHeader(#[source] serde_json::Error),
    #[error("invalid item header: {0}")]
    InvalidItemHeader(#[source] serde_json::Error),
    #[error("item header without payload")]
    MissingPayload,
    #[error("invalid item payload: {0}")]
    InvalidPayload(#[source] serde_json::Error),
    #[error("failed to write envelope: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct EnvelopeHeaders {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dsn: Option<String>,
}

/// The type of an envelope item.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemType {
    Event,
    ClientReport,
    /// Any item type this SDK does not produce
    #[serde(other)]
    Unknown,
}

impl ItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Event => "event",
            Self::ClientReport => "client_report",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ItemHeader {
    #[serde(rename = "type")]
    pub ty: ItemType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<usize>,
}

/// Discard counts reported back to the server
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DiscardedEvent {
    pub reason: String,
    pub category: String,
    pub quantity: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ClientReport {
    pub timestamp: DateTime<Utc>,
    pub discarded_events: Vec<DiscardedEvent>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EnvelopeItem {
    Event(Event),
    ClientReport(ClientReport),
}

impl EnvelopeItem {
    pub fn item_type(&self) -> ItemType {
        match self {
            EnvelopeItem::Event(_) => ItemType::Event,
            EnvelopeItem::ClientReport(_) => ItemType::ClientReport,
        }
    }

    fn payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        match self {
            EnvelopeItem::Event(event) => serde_json::to_vec(&wire_event(event)),
            EnvelopeItem::ClientReport(report) => serde_json::to_vec(report),
        }
    }
}

/// A batch of items sent in one request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Envelope {
    headers: EnvelopeHeaders,
    items: Vec<EnvelopeItem>,
}

impl Envelope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_event(event: Event) -> Self {
        let mut envelope = Envelope::new();
        envelope.headers.event_id = Some(event.event_id);
        envelope.items.push(EnvelopeItem::Event(event));
        envelope
    }

    pub fn with_dsn(mut self, dsn: impl Into<String>) -> Self {
        self.headers.dsn = Some(dsn.into());
        self
    }

    pub fn add_item(&mut self, item: EnvelopeItem) {
        if let EnvelopeItem::Event(event) = &item {
            if self.headers.event_id.is_none() {
                self.headers.event_id = Some(event.event_id);
            }
        }
        self.items.push(item);
    }

    pub fn headers(&self) -> &EnvelopeHeaders {
        &self.headers
    }

    pub fn items(&self) -> impl Iterator<Item = &EnvelopeItem> {
        self.items.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// The first event item, if any
    pub fn event(&self) -> Option<&Event> {
        self.items.iter().find_map(|item| match item {
            EnvelopeItem::Event(event) => Some(event),
            EnvelopeItem::ClientReport(_) => None,
        })
    }

    /// Category used when the envelope is dropped: the event type if it
    /// carries an event, otherwise the first item type.
    pub fn category(&self) -> &'static str {
        match self.event() {
            Some(event) => event.ty(),
            None => self
                .items
                .first()
                .map(|item| item.item_type().as_str())
                .unwrap_or("envelope"),
        }
    }

    /// Writes the envelope, stamping `sent_at` with the current time.
    pub fn to_writer<W: Write>(&self, mut writer: W) -> Result<(), EnvelopeError> {
        let mut headers = self.headers.clone();
        headers.sent_at = Some(Utc::now());
        serde_json::to_writer(&mut writer, &headers).map_err(EnvelopeError::InvalidHeader)?;
        writer.write_all(b"\n")?;

        for item in &self.items {
            let payload = item.payload().map_err(EnvelopeError::InvalidPayload)?;
            let header = ItemHeader {
                ty: item.item_type(),
                length: Some(payload.len()),
            };
            serde_json::to_writer(&mut writer, &header).map_err(EnvelopeError::InvalidItemHeader)?;
            writer.write_all(b"\n")?;
            writer.write_all(&payload)?;
            writer.write_all(b"\n")?;
        }
        Ok(())
    }

    pub fn to_vec(&self) -> Result<Vec<u8>, EnvelopeError> {
        let mut buf = Vec::new();
        self.to_writer(&mut buf)?;
        Ok(buf)
    }
}

/// An item read back from encoded bytes, payload left as JSON.
#[derive(Debug, Clone)]
pub struct RawItem {
    pub header: ItemHeader,
    pub payload: Value,
}

/// Reads the header and items of an encoded envelope.
pub fn parse_envelope(data: &[u8]) -> Result<(EnvelopeHeaders, Vec<RawItem>), EnvelopeError> {
    let text = String::from_utf8_lossy(data);
    let mut lines = text.lines().filter(|line| !line.trim().is_empty());

    let header_line = lines.next().ok_or(EnvelopeError::MissingHeader)?;
    let headers: EnvelopeHeaders =
        serde_json::from_str(header_line).map_err(EnvelopeError::InvalidHeader)?;

    let mut items = Vec::new();
    while let Some(line) = lines.next() {
        let header: ItemHeader =
            serde_json::from_str(line).map_err(EnvelopeError::InvalidItemHeader)?;
        let payload_line = lines.next().ok_or(EnvelopeError::MissingPayload)?;
        let payload = serde_json::from_str(payload_line).map_err(EnvelopeError::InvalidPayload)?;
        items.push(RawItem { header, payload });
    }

    Ok((headers, items))
}

/// Protocol shape of an event: exceptions and frames oldest first.
pub fn wire_event(event: &Event) -> Value {
    let mut payload = Map::new();
    payload.insert(
        "event_id".to_string(),
        json!(event.event_id.simple().to_string()),
    );
    payload.insert(
        "timestamp".to_string(),
        json!(event.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)),
    );
    payload.insert("level".to_string(), json!(event.level.as_str()));
    payload.insert("platform".to_string(), json!(event.platform));

    let optional = [
        ("logger", &event.logger),
        ("transaction", &event.transaction),
        ("environment", &event.environment),
        ("release", &event.release),
        ("server_name", &event.server_name),
    ];
    for (key, value) in optional {
        if let Some(value) = value {
            payload.insert(key.to_string(), json!(value));
        }
    }

    if let Some(message) = &event.message {
        payload.insert("message".to_string(), json!({ "formatted": message }));
    }
    if !event.tags.is_empty() {
        payload.insert("tags".to_string(), json!(event.tags));
    }
    if let Some(sdk) = &event.sdk {
        payload.insert("sdk".to_string(), json!(sdk));
    }

    if !event.exceptions.is_empty() {
        let values: Vec<Value> = event
            .exceptions
            .iter()
            .rev()
            .map(|exception| {
                let mut value = json!({
                    "type": exception.ty,
                    "value": exception.value,
                });
                if !exception.frames.is_empty() {
                    let frames: Vec<&crate::event::Frame> = exception.frames.iter().rev().collect();
                    value["stacktrace"] = json!({ "frames": frames });
                }
                value
            })
            .collect();
        payload.insert("exception".to_string(), json!({ "values": values }));
    }

    Value::Object(payload)
}
