//! Creation and extraction of the 29-bit CAN identifiers used by NMEA2000
//! (derived from SAE J1939).

use crate::envelope::BROADCAST_ADDRESS;

/// An extended CAN identifier with accessors for priority, PGN, destination and source.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CanId(pub u32);

impl CanId {
    /// Mask of the 29 bits carried by an extended frame.
    pub const MASK: u32 = 0x1FFF_FFFF;

    /// Builds an identifier from message fields.
    ///
    /// PDU1 PGNs (PF < 240) carry the destination in the PS byte; PDU2 PGNs are
    /// broadcast by definition and the destination is ignored.
    pub fn encode(priority: u8, pgn: u32, source: u8, destination: u8) -> Self {
        let pf = (pgn >> 8) & 0xFF;
        let mut id = (source as u32) | (((priority & 0x07) as u32) << 26);
        if pf < 240 {
            id |= (pgn & 0x3FF00) << 8;
            id |= (destination as u32) << 8;
        } else {
            id |= (pgn & 0x3FFFF) << 8;
        }
        CanId(id & Self::MASK)
    }

    pub fn raw(&self) -> u32 {
        self.0
    }

    /// Priority (3 bits).
    pub fn priority(&self) -> u8 {
        ((self.0 >> 26) & 0x07) as u8
    }

    /// 18-bit PGN, with the PS byte dropped for PDU1 messages.
    pub fn pgn(&self) -> u32 {
        let pf = (self.0 >> 16) & 0xFF;
        let dp_r = (self.0 >> 24) & 0x03;
        if pf >= 240 {
            (dp_r << 16) | (pf << 8) | ((self.0 >> 8) & 0xFF)
        } else {
            (dp_r << 16) | (pf << 8)
        }
    }

    /// Destination address; PDU2 messages are reported as broadcast.
    pub fn destination(&self) -> u8 {
        let pf = (self.0 >> 16) & 0xFF;
        if pf >= 240 {
            BROADCAST_ADDRESS
        } else {
            ((self.0 >> 8) & 0xFF) as u8
        }
    }

    pub fn source(&self) -> u8 {
        (self.0 & 0xFF) as u8
    }
}

impl From<u32> for CanId {
    fn from(raw: u32) -> Self {
        CanId(raw & Self::MASK)
    }
}
