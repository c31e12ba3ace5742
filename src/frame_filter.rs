use nmea2k::{AddressClaimer, CanId};

/// Detects echoes of frames this node transmitted itself.
///
/// # Arguments
/// * `id` - The decoded identifier of the received frame
/// * `device` - The local address-claim collaborator, if one is running
///
/// # Returns
/// true if the frame's source is the locally claimed address and it should be
/// dropped. Nothing is filtered while no address is claimed.
pub fn is_self_originated(id: CanId, device: Option<&dyn AddressClaimer>) -> bool {
    device.is_some_and(|device| device.is_from_me(id.source()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use nmea2k::{IsoName, StaticAddressClaimer};

    #[test]
    fn test_no_device_no_filtering() {
        assert!(!is_self_originated(CanId(0x09F8027F), None));
    }

    #[test]
    fn test_unclaimed_address_no_filtering() {
        let device = StaticAddressClaimer::new(IsoName::default(), 0x7F);
        assert!(!is_self_originated(CanId(0x09F8027F), Some(&device)));
    }

    #[test]
    fn test_filters_own_source_only() {
        let mut device = StaticAddressClaimer::new(IsoName::default(), 0x7F);
        device.start();
        assert!(is_self_originated(CanId(0x09F8027F), Some(&device)));
        assert!(!is_self_originated(CanId(0x09F80280), Some(&device)));
    }
}
