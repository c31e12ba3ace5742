//! Outbound dispatch: normalize a message, then route it to the active transport.

use nmea2k::{
    BROADCAST_ADDRESS, FastPacketSplitter, OutboundPgn, PgnEncoder, RawFrame, parse_actisense, render_actisense,
};
use std::io::Write;
use tracing::{debug, trace};

use crate::error::BridgeError;
use crate::transport::Transport;

/// Largest payload sent as a single CAN frame.
pub const SINGLE_FRAME_CAPACITY: usize = 8;

/// A message accepted for transmission.
#[derive(Debug, Clone)]
pub enum Outbound {
    /// Actisense serial line.
    Text(String),
    Structured(OutboundPgn),
}

impl Outbound {
    /// Interprets one line of external input: JSON objects are structured
    /// messages, anything else is Actisense text.
    pub fn from_line(line: &str) -> Self {
        let line = line.trim();
        if line.starts_with('{') {
            if let Ok(message) = serde_json::from_str::<OutboundPgn>(line) {
                return Outbound::Structured(message);
            }
        }
        Outbound::Text(line.to_string())
    }
}

/// Turns text or structured input into a message ready to encode.
///
/// The destination is defaulted to broadcast; `pgn` and `src` are required.
pub fn normalize(message: Outbound) -> Result<OutboundPgn, BridgeError> {
    let mut pgn = match message {
        Outbound::Text(text) => parse_actisense(&text)?,
        // Source was set by the caller
        Outbound::Structured(pgn) => pgn,
    };
    pgn.destination.get_or_insert(BROADCAST_ADDRESS);

    if pgn.pgn.is_none() || pgn.source.is_none() {
        let json = serde_json::to_string(&pgn)?;
        return Err(BridgeError::MissingFields(json));
    }
    Ok(pgn)
}

/// Encodes and routes outbound messages.
pub struct Dispatcher {
    encoder: Box<dyn PgnEncoder>,
    splitter: FastPacketSplitter,
    multi_frame_pgns: Vec<u32>,
}

impl Dispatcher {
    pub fn new(encoder: Box<dyn PgnEncoder>, multi_frame_pgns: Vec<u32>) -> Self {
        Self {
            encoder,
            splitter: FastPacketSplitter::new(),
            multi_frame_pgns,
        }
    }

    /// True when a payload must go out as a multi-frame sequence.
    pub fn needs_multi_frame(&self, pgn: u32, payload_len: usize) -> bool {
        payload_len > SINGLE_FRAME_CAPACITY || self.multi_frame_pgns.contains(&pgn)
    }

    /// Sends one message and returns how many frames or lines were written.
    ///
    /// Nothing is written when normalization or encoding fails.
    pub fn dispatch(&mut self, message: Outbound, transport: &mut Transport) -> Result<usize, BridgeError> {
        let message = normalize(message)?;
        let pgn = message.pgn.unwrap_or_default();

        match transport {
            Transport::StdioPipe(out) => {
                let json = serde_json::to_string(&message)?;
                writeln!(out, "{}", json)?;
                out.flush()?;
                Ok(1)
            }
            Transport::RawChannel(channel) => {
                let id = message
                    .can_id()
                    .ok_or_else(|| BridgeError::MissingFields(format!("PGN {}", pgn)))?;
                let payload = self.encoder.encode(&message).ok_or(BridgeError::EncodeFailed(pgn))?;
                debug!(
                    "sending PGN {} src {} dst {} ({} bytes)",
                    pgn,
                    id.source(),
                    message.destination_or_broadcast(),
                    payload.len()
                );

                if self.needs_multi_frame(pgn, payload.len()) {
                    let chunks = self
                        .splitter
                        .split(&payload)
                        .map_err(|source| BridgeError::Split { pgn, source })?;
                    for chunk in &chunks {
                        channel.send(&RawFrame::new(id.raw(), chunk.to_vec()))?;
                    }
                    trace!("PGN {} sent as {} frames", pgn, chunks.len());
                    Ok(chunks.len())
                } else {
                    channel.send(&RawFrame::new(id.raw(), payload))?;
                    Ok(1)
                }
            }
            Transport::ExternalWriter(Some(writer)) => {
                let payload = self.encoder.encode(&message).ok_or(BridgeError::EncodeFailed(pgn))?;
                let line = render_actisense(
                    message.priority_or_default(),
                    pgn,
                    &payload,
                    message.destination_or_broadcast(),
                    message.source.unwrap_or_default(),
                );
                writer.write_line(&line)?;
                Ok(1)
            }
            Transport::ExternalWriter(None) => Err(BridgeError::WriterNotRunning(pgn)),
            Transport::None => Err(BridgeError::NoTransport(pgn)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::{FakeChannel, FakeStdout, FakeWriter, SharedWire};
    use nmea2k::{CanId, RawPayloadEncoder};

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(Box::new(RawPayloadEncoder), vec![126720])
    }

    fn rudder(data: Vec<u8>) -> Outbound {
        Outbound::Structured(OutboundPgn::new(127245, 1).with_destination(255).with_data(data))
    }

    #[test]
    fn test_from_line() {
        assert!(matches!(
            Outbound::from_line(r#"{"pgn":127245,"src":1}"#),
            Outbound::Structured(_)
        ));
        assert!(matches!(
            Outbound::from_line("2024-01-01T00:00:00Z,2,127245,1,255,1,00"),
            Outbound::Text(_)
        ));
        // Broken JSON falls through so the parse failure gets reported
        assert!(matches!(Outbound::from_line("{not json"), Outbound::Text(_)));
    }

    #[test]
    fn test_normalize_defaults_destination() {
        let message = normalize(Outbound::Structured(OutboundPgn::new(127245, 1))).unwrap();
        assert_eq!(message.destination, Some(255));

        let message = normalize(Outbound::Structured(OutboundPgn::new(59904, 1).with_destination(7))).unwrap();
        assert_eq!(message.destination, Some(7));
    }

    #[test]
    fn test_normalize_rejects_missing_fields() {
        let no_pgn = OutboundPgn {
            source: Some(1),
            ..OutboundPgn::default()
        };
        assert!(matches!(
            normalize(Outbound::Structured(no_pgn)),
            Err(BridgeError::MissingFields(_))
        ));

        let no_source = OutboundPgn {
            pgn: Some(127245),
            ..OutboundPgn::default()
        };
        assert!(matches!(
            normalize(Outbound::Structured(no_source)),
            Err(BridgeError::MissingFields(_))
        ));
    }

    #[test]
    fn test_normalize_text() {
        let message = normalize(Outbound::Text("t,2,127245,1,255,2,0a,ff".to_string())).unwrap();
        assert_eq!(message.pgn, Some(127245));
        assert_eq!(message.data, vec![0x0a, 0xff]);

        let err = normalize(Outbound::Text("bogus line".to_string())).unwrap_err();
        assert!(err.to_string().contains("bogus line"));
    }

    #[test]
    fn test_raw_channel_single_frame() {
        let wire = SharedWire::default();
        let mut transport = Transport::RawChannel(Box::new(FakeChannel(wire.clone())));
        let sent = dispatcher().dispatch(rudder(vec![0xff; 8]), &mut transport).unwrap();

        assert_eq!(sent, 1);
        let wire = wire.lock().unwrap();
        assert_eq!(wire.frames.len(), 1);
        let id = wire.frames[0].can_id();
        assert_eq!(id.pgn(), 127245);
        assert_eq!(id.source(), 1);
        assert_eq!(wire.frames[0].data(), &[0xff; 8]);
    }

    #[test]
    fn test_raw_channel_splits_large_payload() {
        let wire = SharedWire::default();
        let mut transport = Transport::RawChannel(Box::new(FakeChannel(wire.clone())));
        let payload: Vec<u8> = (10..30).collect();
        let sent = dispatcher().dispatch(rudder(payload.clone()), &mut transport).unwrap();

        let wire = wire.lock().unwrap();
        assert_eq!(sent, 3);
        assert_eq!(wire.frames.len(), 3);
        let expected_id = wire.frames[0].identifier();
        assert!(wire.frames.iter().all(|f| f.identifier() == expected_id));

        // Frames are in ascending order and concatenate back to the payload
        let mut reassembled = wire.frames[0].data()[2..].to_vec();
        for (index, frame) in wire.frames.iter().enumerate().skip(1) {
            assert_eq!((frame.data()[0] & 0x1F) as usize, index);
            reassembled.extend_from_slice(&frame.data()[1..]);
        }
        reassembled.truncate(wire.frames[0].data()[1] as usize);
        assert_eq!(reassembled, payload);
    }

    #[test]
    fn test_multi_frame_pgn_exception() {
        let wire = SharedWire::default();
        let mut transport = Transport::RawChannel(Box::new(FakeChannel(wire.clone())));
        let message = Outbound::Structured(OutboundPgn::new(126720, 1).with_data(vec![1, 2, 3]));
        let sent = dispatcher().dispatch(message, &mut transport).unwrap();
        assert_eq!(sent, 1);
        // Even a short payload goes out framed as a fast packet
        let wire = wire.lock().unwrap();
        assert_eq!(wire.frames[0].data()[1], 3);
        assert_eq!(CanId(wire.frames[0].identifier()).pgn(), 126720);
    }

    #[test]
    fn test_encode_failure_sends_nothing() {
        let wire = SharedWire::default();
        let mut transport = Transport::RawChannel(Box::new(FakeChannel(wire.clone())));
        let result = dispatcher().dispatch(rudder(vec![]), &mut transport);
        assert!(matches!(result, Err(BridgeError::EncodeFailed(127245))));
        assert!(wire.lock().unwrap().frames.is_empty());
    }

    #[test]
    fn test_external_writer_gets_actisense_line() {
        let wire = SharedWire::default();
        let mut transport = Transport::ExternalWriter(Some(Box::new(FakeWriter(wire.clone()))));
        dispatcher()
            .dispatch(
                Outbound::Structured(OutboundPgn::new(127245, 3).with_priority(2).with_data(vec![0x0a, 0xb0])),
                &mut transport,
            )
            .unwrap();

        let wire = wire.lock().unwrap();
        assert_eq!(wire.lines.len(), 1);
        let fields: Vec<&str> = wire.lines[0].split(',').collect();
        assert_eq!(&fields[1..], &["2", "127245", "3", "255", "2", "0a", "b0"]);
    }

    #[test]
    fn test_stdio_pipe_writes_json_line() {
        let wire = SharedWire::default();
        let mut transport = Transport::StdioPipe(Box::new(FakeStdout(wire.clone())));
        dispatcher()
            .dispatch(Outbound::Structured(OutboundPgn::new(127245, 1)), &mut transport)
            .unwrap();

        let wire = wire.lock().unwrap();
        let text = String::from_utf8(wire.stdout.clone()).unwrap();
        assert!(text.ends_with('\n'));
        let value: serde_json::Value = serde_json::from_str(text.trim()).unwrap();
        assert_eq!(value["pgn"], 127245);
        assert_eq!(value["src"], 1);
        assert_eq!(value["dst"], 255);
    }

    #[test]
    fn test_no_transport_is_an_error() {
        let mut transport = Transport::None;
        assert!(matches!(
            dispatcher().dispatch(rudder(vec![1]), &mut transport),
            Err(BridgeError::NoTransport(127245))
        ));

        let mut transport = Transport::ExternalWriter(None);
        assert!(matches!(
            dispatcher().dispatch(rudder(vec![1]), &mut transport),
            Err(BridgeError::WriterNotRunning(127245))
        ));
    }
}
