use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::can_id::CanId;

/// Destination used for broadcast messages and whenever none is given.
pub const BROADCAST_ADDRESS: u8 = 255;

/// Priority applied to outbound messages that do not specify one.
pub const DEFAULT_PRIORITY: u8 = 6;

/// Capture timestamp in ISO-8601 with millisecond precision.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// A single CAN bus frame as read from a socket or a candump line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    identifier: u32,
    data: Vec<u8>,
}

impl RawFrame {
    pub fn new(identifier: u32, data: Vec<u8>) -> Self {
        Self {
            identifier: identifier & CanId::MASK,
            data,
        }
    }

    pub fn identifier(&self) -> u32 {
        self.identifier
    }

    pub fn can_id(&self) -> CanId {
        CanId(self.identifier)
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Structured message pushed to upward consumers.
///
/// Field names follow the canboat JSON conventions (`prio`, `src`, `dst`) so the
/// output can be fed straight into existing NMEA2000 tooling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PgnEnvelope {
    pub pgn: u32,
    #[serde(rename = "prio")]
    pub priority: u8,
    #[serde(rename = "src")]
    pub source: u8,
    #[serde(rename = "dst")]
    pub destination: u8,
    pub timestamp: String,
    pub length: usize,
    pub data: Vec<u8>,
}

impl PgnEnvelope {
    /// Builds an envelope from a frame observed at `timestamp`.
    pub fn from_frame(frame: &RawFrame, timestamp: String) -> Self {
        Self::from_parts(frame.can_id(), frame.data().to_vec(), timestamp)
    }

    /// Builds an envelope stamped with the current time.
    pub fn from_frame_now(frame: &RawFrame) -> Self {
        Self::from_frame(frame, now_timestamp())
    }

    /// Builds an envelope for an already reassembled payload.
    pub fn from_parts(id: CanId, data: Vec<u8>, timestamp: String) -> Self {
        Self {
            pgn: id.pgn(),
            priority: id.priority(),
            source: id.source(),
            destination: id.destination(),
            timestamp,
            length: data.len(),
            data,
        }
    }
}

impl fmt::Display for PgnEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "PGN {} prio {} {} -> {} [{} bytes]",
            self.pgn, self.priority, self.source, self.destination, self.length
        )
    }
}

/// A message handed to the bridge for transmission.
///
/// Everything is optional because callers build these from loosely typed input
/// (JSON objects or Actisense lines); the bridge validates before sending.
/// Unknown JSON keys are preserved in `fields` so the message can be echoed
/// unchanged in piped mode.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutboundPgn {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pgn: Option<u32>,
    #[serde(default, rename = "prio", alias = "priority", skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,
    #[serde(default, rename = "src", alias = "source", skip_serializing_if = "Option::is_none")]
    pub source: Option<u8>,
    #[serde(default, rename = "dst", alias = "destination", skip_serializing_if = "Option::is_none")]
    pub destination: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data: Vec<u8>,
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl OutboundPgn {
    pub fn new(pgn: u32, source: u8) -> Self {
        Self {
            pgn: Some(pgn),
            source: Some(source),
            ..Self::default()
        }
    }

    pub fn with_destination(mut self, destination: u8) -> Self {
        self.destination = Some(destination);
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_data(mut self, data: Vec<u8>) -> Self {
        self.data = data;
        self
    }

    pub fn destination_or_broadcast(&self) -> u8 {
        self.destination.unwrap_or(BROADCAST_ADDRESS)
    }

    pub fn priority_or_default(&self) -> u8 {
        self.priority.unwrap_or(DEFAULT_PRIORITY)
    }

    /// Identifier for this message, or `None` while `pgn` or `source` is missing.
    pub fn can_id(&self) -> Option<CanId> {
        Some(CanId::encode(
            self.priority_or_default(),
            self.pgn?,
            self.source?,
            self.destination_or_broadcast(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_from_frame() {
        let frame = RawFrame::new(0x09F8027F, vec![0x00, 0xFC, 0xFF, 0xFF, 0x00, 0x00, 0xFF, 0xFF]);
        let envelope = PgnEnvelope::from_frame(&frame, "2024-01-01T00:00:00.000Z".to_string());
        assert_eq!(envelope.pgn, 129026);
        assert_eq!(envelope.priority, 2);
        assert_eq!(envelope.source, 0x7F);
        assert_eq!(envelope.destination, 255);
        assert_eq!(envelope.length, 8);
        assert_eq!(envelope.data, frame.data());
    }

    #[test]
    fn test_raw_frame_masks_identifier() {
        let frame = RawFrame::new(0xFFFF_FFFF, vec![1]);
        assert_eq!(frame.identifier(), CanId::MASK);
        assert_eq!(frame.len(), 1);
    }

    #[test]
    fn test_envelope_serializes_canboat_names() {
        let frame = RawFrame::new(0x18eeff01, vec![1, 2]);
        let envelope = PgnEnvelope::from_frame(&frame, "t".to_string());
        let json = serde_json::to_string(&envelope).unwrap();
        assert!(json.contains("\"prio\":6"));
        assert!(json.contains("\"src\":1"));
        assert!(json.contains("\"dst\":255"));
        assert!(json.contains("\"pgn\":60928"));
    }

    #[test]
    fn test_outbound_accepts_both_field_spellings() {
        let short: OutboundPgn =
            serde_json::from_str(r#"{"pgn":127245,"src":1,"dst":255,"data":[1,2,3]}"#).unwrap();
        assert_eq!(short.pgn, Some(127245));
        assert_eq!(short.source, Some(1));
        assert_eq!(short.destination, Some(255));
        assert_eq!(short.data, vec![1, 2, 3]);

        let long: OutboundPgn =
            serde_json::from_str(r#"{"pgn":127245,"source":4,"priority":2}"#).unwrap();
        assert_eq!(long.source, Some(4));
        assert_eq!(long.priority, Some(2));
        assert_eq!(long.destination, None);
    }

    #[test]
    fn test_outbound_keeps_unknown_fields() {
        let msg: OutboundPgn =
            serde_json::from_str(r#"{"pgn":127245,"src":1,"fields":{"rudder":3}}"#).unwrap();
        assert!(msg.fields.contains_key("fields"));
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("rudder"));
    }

    #[test]
    fn test_outbound_can_id_requires_pgn_and_source() {
        assert!(OutboundPgn::default().can_id().is_none());
        let msg = OutboundPgn::new(127245, 1);
        let id = msg.can_id().unwrap();
        assert_eq!(id.pgn(), 127245);
        assert_eq!(id.source(), 1);
        assert_eq!(id.priority(), DEFAULT_PRIORITY);
    }
}
