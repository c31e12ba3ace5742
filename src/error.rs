use nmea2k::{ActisenseError, SplitError};
use thiserror::Error;

/// Failures inside the bridge. None of them are fatal to the process: they are
/// logged and surfaced through the status reporter.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("failed to parse outbound message: {0}")]
    Parse(#[from] ActisenseError),

    #[error("outbound message is missing 'pgn' or 'src': {0}")]
    MissingFields(String),

    #[error("PGN {0} could not be encoded")]
    EncodeFailed(u32),

    #[error("PGN {pgn} could not be split into frames: {source}")]
    Split { pgn: u32, source: SplitError },

    #[error("no output transport available for PGN {0}")]
    NoTransport(u32),

    #[error("external writer is not running, dropping PGN {0}")]
    WriterNotRunning(u32),

    #[error("unable to open canbus {interface}: {source}")]
    Socket {
        interface: String,
        source: std::io::Error,
    },

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("invalid CAN frame identifier {0:#x}")]
    InvalidFrame(u32),

    #[error("external writer input is closed")]
    WriterClosed,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
