//! Device transport built on nusb.

use std::cell::RefCell;
use std::collections::HashMap;
use std::mem::size_of;
use std::time::Duration;

use anyhow::{bail, Context as ErrorContext, Error};
use nusb::{
    transfer::{ControlIn, ControlType, Recipient as TransferRecipient},
    Device,
    DeviceInfo,
    MaybeFuture,
};

use crate::transport::{ControlRequest, DeviceHandle};
use crate::usb::{
    ConfigDescriptor,
    DescriptorType,
    DeviceDescriptor,
    Direction,
    InterfaceNum,
    Recipient,
    RequestType,
    RequestTypeFields,
    StandardRequest,
};

const DESCRIPTOR_TIMEOUT: Duration = Duration::from_millis(1200);

/// An open nusb device, tracking the interfaces claimed through it.
/// Dropping the handle releases everything.
pub struct NusbHandle {
    device: Device,
    claimed: RefCell<HashMap<u8, nusb::Interface>>,
}

impl NusbHandle {
    pub fn open(device_info: &DeviceInfo) -> Result<NusbHandle, Error> {
        let device = device_info.open()
            .wait()
            .context("Failed to open device")?;
        Ok(NusbHandle {
            device,
            claimed: RefCell::new(HashMap::new()),
        })
    }

    fn get_descriptor(&self,
                      descriptor_type: DescriptorType,
                      index: u8,
                      length: usize)
        -> Option<Vec<u8>>
    {
        let mut buf = vec![0u8; length];
        let request = ControlRequest::standard_in(
            Recipient::Device,
            StandardRequest::GetDescriptor,
            (descriptor_type as u16) << 8 | index as u16,
            0);
        let count = self
            .control_in(request, &mut buf, DESCRIPTOR_TIMEOUT)
            .ok()?;
        if count < 2 {
            return None;
        }
        buf.truncate(count);
        Some(buf)
    }
}

impl DeviceHandle for NusbHandle {
    fn control_in(&self,
                  request: ControlRequest,
                  buf: &mut [u8],
                  timeout: Duration)
        -> Result<usize, Error>
    {
        let fields = RequestTypeFields(request.request_type);
        if fields.direction() != Direction::In {
            bail!("Expected an IN request, got bmRequestType {:#04x}",
                  request.request_type);
        }
        let control = ControlIn {
            control_type: match fields.request_type() {
                RequestType::Standard => ControlType::Standard,
                RequestType::Class => ControlType::Class,
                _ => ControlType::Vendor,
            },
            recipient: match fields.recipient() {
                Recipient::Device => TransferRecipient::Device,
                Recipient::Interface => TransferRecipient::Interface,
                Recipient::Endpoint => TransferRecipient::Endpoint,
                _ => TransferRecipient::Other,
            },
            request: request.request,
            value: request.value,
            index: request.index,
            length: buf.len() as u16,
        };
        let data = self.device
            .control_in(control, timeout)
            .wait()
            .context("Control transfer failed")?;
        let count = data.len();
        buf[..count].copy_from_slice(&data);
        Ok(count)
    }

    /// Reconstruct the concatenated descriptor set the way the device
    /// reports it: the device descriptor, then the first configuration's
    /// full descriptor set, read twice to learn its total length.
    fn raw_descriptors(&self) -> Option<Vec<u8>> {
        let mut raw = self.get_descriptor(
            DescriptorType::Device, 0, size_of::<DeviceDescriptor>())?;
        let Some(header) = self.get_descriptor(
            DescriptorType::Configuration, 0, size_of::<ConfigDescriptor>())
        else {
            return Some(raw);
        };
        if header.len() < size_of::<ConfigDescriptor>()
            || header[1] != DescriptorType::Configuration as u8
        {
            return Some(raw);
        }
        let total_length =
            u16::from_le_bytes([header[2], header[3]]) as usize;
        if total_length < size_of::<ConfigDescriptor>() {
            return Some(raw);
        }
        match self.get_descriptor(
            DescriptorType::Configuration, 0, total_length)
        {
            Some(bytes) => raw.extend_from_slice(&bytes),
            None => raw.extend_from_slice(&header),
        }
        Some(raw)
    }

    fn claim_interface(&self, number: InterfaceNum, force: bool) -> bool {
        let mut claimed = self.claimed.borrow_mut();
        if claimed.contains_key(&number.0) {
            return true;
        }
        let result = if force {
            self.device.detach_and_claim_interface(number.0).wait()
        } else {
            self.device.claim_interface(number.0).wait()
        };
        match result {
            Ok(interface) => {
                claimed.insert(number.0, interface);
                true
            }
            Err(_) => false,
        }
    }

    fn release_interface(&self, number: InterfaceNum) -> bool {
        self.claimed.borrow_mut().remove(&number.0).is_some()
    }
}
