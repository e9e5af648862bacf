//! Transport boundary used by the descriptor and state probes.
//!
//! The probes never talk to an OS USB stack directly: they issue control
//! requests through this trait, and any failure or short read is treated
//! as "no data" for the one field being probed.

use std::time::Duration;

use anyhow::Error;

use crate::usb::{Direction, InterfaceNum, Recipient, RequestType, StandardRequest};

/// A control request addressed by (bmRequestType, bRequest, wValue, wIndex).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ControlRequest {
    pub request_type: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
}

impl ControlRequest {
    /// A standard device-to-host request.
    pub fn standard_in(recipient: Recipient,
                       request: StandardRequest,
                       value: u16,
                       index: u16)
        -> Self
    {
        let request_type =
            (Direction::In as u8) << 7 |
            (RequestType::Standard as u8) << 5 |
            recipient as u8;
        ControlRequest {
            request_type,
            request: request as u8,
            value,
            index,
        }
    }
}

/// An open device handle capable of blocking control transfers.
///
/// Closing is implicit: dropping the handle releases it, along with any
/// interfaces still claimed through it.
pub trait DeviceHandle {
    /// Issue an IN control transfer, filling `buf` and returning the
    /// number of bytes read.
    fn control_in(&self,
                  request: ControlRequest,
                  buf: &mut [u8],
                  timeout: Duration)
        -> Result<usize, Error>;

    /// The concatenated descriptor set for the device, if available.
    fn raw_descriptors(&self) -> Option<Vec<u8>>;

    /// Claim an interface ahead of class-specific transfers. Returns
    /// whether the interface is now held.
    fn claim_interface(&self, number: InterfaceNum, force: bool) -> bool;

    /// Release a previously claimed interface.
    fn release_interface(&self, number: InterfaceNum) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usb::DescriptorType;

    #[test]
    fn test_standard_device_request() {
        let request = ControlRequest::standard_in(
            Recipient::Device,
            StandardRequest::GetConfiguration,
            0, 0);
        assert_eq!(request.request_type, 0x80);
        assert_eq!(request.request, 0x08);
    }

    #[test]
    fn test_standard_interface_request() {
        let request = ControlRequest::standard_in(
            Recipient::Interface,
            StandardRequest::GetDescriptor,
            (DescriptorType::HidReport as u16) << 8,
            2);
        assert_eq!(request.request_type, 0x81);
        assert_eq!(request.request, 0x06);
        assert_eq!(request.value, 0x2200);
        assert_eq!(request.index, 2);
    }
}
