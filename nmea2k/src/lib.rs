//! NMEA2000 Wire Codecs
//!
//! This library provides the I/O-free building blocks used to move NMEA2000 traffic
//! between a CAN bus and higher-level software:
//! - 29-bit CAN identifier encoding and decoding
//! - candump text parsing (the three common output variants)
//! - Actisense-style ASCII serial lines
//! - Fast packet splitting and reassembly
//! - A minimal address-claim collaborator
//!
//! # Example
//!
//! ```no_run
//! use nmea2k::{LineParser, PgnEnvelope};
//!
//! let mut parser = LineParser::new();
//! if let Some(frame) = parser.parse_line("<0x18eeff01> [8] 05 a0 be 1c 00 a0 a0 c0") {
//!     let envelope = PgnEnvelope::from_frame_now(&frame);
//!     println!("PGN: {} from {}", envelope.pgn, envelope.source);
//! }
//! ```

pub mod actisense;
pub mod can_id;
pub mod candump;
pub mod device;
pub mod encoder;
pub mod envelope;
pub mod fast_packet;

// Re-export commonly used types
pub use actisense::{ActisenseError, frame_to_text, parse_actisense, render_actisense};
pub use can_id::CanId;
pub use candump::{CandumpFormat, LineParser};
pub use device::{AddressClaimer, IsoName, StaticAddressClaimer};
pub use encoder::{PgnEncoder, RawPayloadEncoder};
pub use envelope::{BROADCAST_ADDRESS, DEFAULT_PRIORITY, OutboundPgn, PgnEnvelope, RawFrame};
pub use fast_packet::{FastPacketAssembler, FastPacketSplitter, SplitError};
