//! Actisense-style ASCII serial lines:
//! `timestamp,prio,pgn,src,dst,len,b0,b1,...` with bytes as two-digit hex.

use thiserror::Error;

use crate::envelope::{OutboundPgn, PgnEnvelope, now_timestamp};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ActisenseError {
    #[error("actisense line has too few fields: {0:?}")]
    TooFewFields(String),
    #[error("invalid {field} in actisense line: {text:?}")]
    InvalidField { field: &'static str, text: String },
    #[error("actisense line declares {declared} bytes but carries {actual}: {text:?}")]
    LengthMismatch {
        declared: usize,
        actual: usize,
        text: String,
    },
}

fn hex_bytes(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(",")
}

/// Renders an inbound envelope as an Actisense line.
pub fn frame_to_text(envelope: &PgnEnvelope) -> String {
    format!(
        "{},{},{},{},{},{},{}",
        envelope.timestamp,
        envelope.priority,
        envelope.pgn,
        envelope.source,
        envelope.destination,
        envelope.length,
        hex_bytes(&envelope.data)
    )
}

/// Renders an outbound payload as an Actisense line stamped with the current time.
pub fn render_actisense(priority: u8, pgn: u32, payload: &[u8], destination: u8, source: u8) -> String {
    format!(
        "{},{},{},{},{},{},{}",
        now_timestamp(),
        priority,
        pgn,
        source,
        destination,
        payload.len(),
        hex_bytes(payload)
    )
}

/// Parses an Actisense line into an outbound message.
pub fn parse_actisense(text: &str) -> Result<OutboundPgn, ActisenseError> {
    let line = text.trim();
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if fields.len() < 6 {
        return Err(ActisenseError::TooFewFields(text.to_string()));
    }

    let invalid = |field: &'static str| ActisenseError::InvalidField {
        field,
        text: text.to_string(),
    };

    let priority: u8 = fields[1].parse().map_err(|_| invalid("priority"))?;
    let pgn: u32 = fields[2].parse().map_err(|_| invalid("pgn"))?;
    let source: u8 = fields[3].parse().map_err(|_| invalid("source"))?;
    let destination: u8 = fields[4].parse().map_err(|_| invalid("destination"))?;
    let declared: usize = fields[5].parse().map_err(|_| invalid("length"))?;

    let data = fields[6..]
        .iter()
        .filter(|token| !token.is_empty())
        .map(|token| {
            if token.len() > 2 {
                return Err(invalid("data byte"));
            }
            u8::from_str_radix(token, 16).map_err(|_| invalid("data byte"))
        })
        .collect::<Result<Vec<u8>, _>>()?;

    if data.len() != declared {
        return Err(ActisenseError::LengthMismatch {
            declared,
            actual: data.len(),
            text: text.to_string(),
        });
    }

    let timestamp = (!fields[0].is_empty()).then(|| fields[0].to_string());

    Ok(OutboundPgn {
        pgn: Some(pgn),
        priority: Some(priority),
        source: Some(source),
        destination: Some(destination),
        timestamp,
        data,
        fields: serde_json::Map::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::RawFrame;

    #[test]
    fn test_frame_to_text_pads_bytes() {
        let frame = RawFrame::new(0x09F8027F, vec![0x0a, 0xff, 0x00, 0x1c]);
        let envelope = PgnEnvelope::from_frame(&frame, "2024-05-01T10:00:00.000Z".to_string());
        assert_eq!(
            frame_to_text(&envelope),
            "2024-05-01T10:00:00.000Z,2,129026,127,255,4,0a,ff,00,1c"
        );
    }

    #[test]
    fn test_frame_to_text_empty_payload_keeps_trailing_comma() {
        let frame = RawFrame::new(0x18eeff01, vec![]);
        let envelope = PgnEnvelope::from_frame(&frame, "t".to_string());
        assert_eq!(frame_to_text(&envelope), "t,6,60928,1,255,0,");
    }

    #[test]
    fn test_text_round_trip() {
        let frame = RawFrame::new(0x0DF01005, vec![0x0a, 0x01, 0xb0, 0x00, 0xff, 0x7f, 0x10, 0x02]);
        let envelope = PgnEnvelope::from_frame_now(&frame);
        let parsed = parse_actisense(&frame_to_text(&envelope)).unwrap();
        assert_eq!(parsed.pgn, Some(envelope.pgn));
        assert_eq!(parsed.source, Some(envelope.source));
        assert_eq!(parsed.destination, Some(envelope.destination));
        assert_eq!(parsed.priority, Some(envelope.priority));
        assert_eq!(parsed.data, envelope.data);
    }

    #[test]
    fn test_empty_payload_round_trip() {
        let frame = RawFrame::new(0x18eeff01, vec![]);
        let envelope = PgnEnvelope::from_frame_now(&frame);
        let parsed = parse_actisense(&frame_to_text(&envelope)).unwrap();
        assert!(parsed.data.is_empty());
    }

    #[test]
    fn test_render_actisense() {
        let line = render_actisense(2, 127245, &[0x01, 0xff, 0x0a], 255, 1);
        let fields: Vec<&str> = line.split(',').collect();
        assert_eq!(&fields[1..], &["2", "127245", "1", "255", "3", "01", "ff", "0a"]);
    }

    #[test]
    fn test_parse_errors_carry_text() {
        let err = parse_actisense("garbage").unwrap_err();
        assert_eq!(err, ActisenseError::TooFewFields("garbage".to_string()));
        assert!(err.to_string().contains("garbage"));

        let err = parse_actisense("t,2,notapgn,1,255,0").unwrap_err();
        assert!(err.to_string().contains("notapgn"));

        let err = parse_actisense("t,2,127245,1,255,3,01,02").unwrap_err();
        assert!(matches!(err, ActisenseError::LengthMismatch { declared: 3, actual: 2, .. }));
    }
}
