use crate::envelope::OutboundPgn;

/// Binary PGN payload encoder.
///
/// Returns `None` when the message cannot be encoded; callers must not transmit
/// anything in that case.
pub trait PgnEncoder: Send + Sync {
    fn encode(&self, message: &OutboundPgn) -> Option<Vec<u8>>;
}

/// Encoder for messages that already carry their binary payload in `data`.
#[derive(Debug, Default, Clone, Copy)]
pub struct RawPayloadEncoder;

impl PgnEncoder for RawPayloadEncoder {
    fn encode(&self, message: &OutboundPgn) -> Option<Vec<u8>> {
        if message.data.is_empty() {
            None
        } else {
            Some(message.data.clone())
        }
    }
}
