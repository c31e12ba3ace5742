//! Local device identity and the address it owns on the bus.

use std::fmt;

use crate::envelope::{BROADCAST_ADDRESS, OutboundPgn};

/// PGN 60928, ISO Address Claim.
pub const ISO_ADDRESS_CLAIM_PGN: u32 = 60928;

/// Highest address a node may claim; 254 is "cannot claim", 255 is broadcast.
pub const MAX_CLAIMABLE_ADDRESS: u8 = 253;

/// 64-bit ISO NAME carried in the address claim payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct IsoName(u64);

impl IsoName {
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(&self) -> u64 {
        self.0
    }

    pub const fn unique_number(&self) -> u32 {
        (self.0 & 0x1F_FFFF) as u32
    }

    pub const fn manufacturer_code(&self) -> u16 {
        ((self.0 >> 21) & 0x7FF) as u16
    }

    pub const fn device_function(&self) -> u8 {
        ((self.0 >> 40) & 0xFF) as u8
    }

    pub const fn device_class(&self) -> u8 {
        ((self.0 >> 49) & 0x7F) as u8
    }

    pub const fn industry_group(&self) -> u8 {
        ((self.0 >> 60) & 0x07) as u8
    }

    pub const fn is_arbitrary_address_capable(&self) -> bool {
        (self.0 >> 63) & 1 == 1
    }

    pub const fn with_unique_number(self, value: u32) -> Self {
        Self((self.0 & !0x1F_FFFF) | (value as u64 & 0x1F_FFFF))
    }

    pub const fn with_manufacturer_code(self, value: u16) -> Self {
        Self((self.0 & !(0x7FF << 21)) | ((value as u64 & 0x7FF) << 21))
    }

    pub const fn with_device_function(self, value: u8) -> Self {
        Self((self.0 & !(0xFF << 40)) | ((value as u64) << 40))
    }

    pub const fn with_device_class(self, value: u8) -> Self {
        Self((self.0 & !(0x7F << 49)) | ((value as u64 & 0x7F) << 49))
    }

    pub const fn with_industry_group(self, value: u8) -> Self {
        Self((self.0 & !(0x07 << 60)) | ((value as u64 & 0x07) << 60))
    }

    pub const fn with_arbitrary_address_capable(self, value: bool) -> Self {
        Self((self.0 & !(1 << 63)) | ((value as u64) << 63))
    }

    /// Payload of PGN 60928 (little endian).
    pub fn to_bytes(&self) -> [u8; 8] {
        self.0.to_le_bytes()
    }
}

impl fmt::Display for IsoName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unique={} manufacturer={} function={} class={} group={}",
            self.unique_number(),
            self.manufacturer_code(),
            self.device_function(),
            self.device_class(),
            self.industry_group()
        )
    }
}

/// The local node's address-claim collaborator.
pub trait AddressClaimer: Send {
    /// Starts claiming and returns the messages to put on the bus.
    fn start(&mut self) -> Vec<OutboundPgn>;

    /// Currently claimed address, `None` while unclaimed.
    fn address(&self) -> Option<u8>;

    /// True when a frame from `source` was sent by this node.
    fn is_from_me(&self, source: u8) -> bool {
        self.address() == Some(source)
    }
}

/// Claims a fixed address without contention handling.
#[derive(Debug)]
pub struct StaticAddressClaimer {
    name: IsoName,
    preferred_address: u8,
    address: Option<u8>,
}

impl StaticAddressClaimer {
    pub fn new(name: IsoName, preferred_address: u8) -> Self {
        Self {
            name,
            preferred_address: preferred_address.min(MAX_CLAIMABLE_ADDRESS),
            address: None,
        }
    }

    pub fn name(&self) -> IsoName {
        self.name
    }
}

impl AddressClaimer for StaticAddressClaimer {
    fn start(&mut self) -> Vec<OutboundPgn> {
        self.address = Some(self.preferred_address);
        tracing::info!(
            "Claiming address {} for device {}",
            self.preferred_address,
            self.name
        );
        vec![
            OutboundPgn::new(ISO_ADDRESS_CLAIM_PGN, self.preferred_address)
                .with_destination(BROADCAST_ADDRESS)
                .with_data(self.name.to_bytes().to_vec()),
        ]
    }

    fn address(&self) -> Option<u8> {
        self.address
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iso_name_fields() {
        // Simrad AC12 autopilot identity
        let name = IsoName::default()
            .with_unique_number(1751521)
            .with_manufacturer_code(1857)
            .with_device_function(150)
            .with_device_class(40)
            .with_industry_group(4)
            .with_arbitrary_address_capable(true);
        assert_eq!(name.unique_number(), 1751521);
        assert_eq!(name.manufacturer_code(), 1857);
        assert_eq!(name.device_function(), 150);
        assert_eq!(name.device_class(), 40);
        assert_eq!(name.industry_group(), 4);
        assert!(name.is_arbitrary_address_capable());
        assert_eq!(IsoName::from_raw(u64::from_le_bytes(name.to_bytes())), name);
    }

    #[test]
    fn test_static_claimer_claims_on_start() {
        let mut claimer = StaticAddressClaimer::new(IsoName::default(), 3);
        assert_eq!(claimer.address(), None);
        assert!(!claimer.is_from_me(3));

        let messages = claimer.start();
        assert_eq!(claimer.address(), Some(3));
        assert!(claimer.is_from_me(3));
        assert!(!claimer.is_from_me(4));

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].pgn, Some(ISO_ADDRESS_CLAIM_PGN));
        assert_eq!(messages[0].source, Some(3));
        assert_eq!(messages[0].data.len(), 8);
    }

    #[test]
    fn test_preferred_address_is_clamped() {
        let mut claimer = StaticAddressClaimer::new(IsoName::default(), 255);
        claimer.start();
        assert_eq!(claimer.address(), Some(MAX_CLAIMABLE_ADDRESS));
    }
}
