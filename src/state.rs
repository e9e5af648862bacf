//! Live device state probes: active configuration, device status bits,
//! and per-interface alternate settings.
//!
//! The three probes are independent. Each tolerates failure by yielding
//! an absent value; none aborts its siblings.

use std::time::Duration;

use serde::Serialize;

use crate::transport::{ControlRequest, DeviceHandle};
use crate::tree::DescriptorTree;
use crate::usb::{InterfaceNum, Recipient, StandardRequest};

const TIMEOUT: Duration = Duration::from_millis(1200);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DeviceStatus {
    pub raw: u16,
    pub self_powered: bool,
    pub remote_wakeup: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub struct InterfaceAltSetting {
    pub interface_number: InterfaceNum,
    pub alternate_setting: Option<u8>,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct DeviceState {
    pub active_configuration: Option<u8>,
    pub device_status: Option<DeviceStatus>,
    pub interface_alt_settings: Vec<InterfaceAltSetting>,
}

pub fn active_configuration(handle: &impl DeviceHandle) -> Option<u8> {
    let mut buf = [0u8; 1];
    let request = ControlRequest::standard_in(
        Recipient::Device,
        StandardRequest::GetConfiguration,
        0, 0);
    match handle.control_in(request, &mut buf, TIMEOUT) {
        Ok(1) => Some(buf[0]),
        _ => None,
    }
}

pub fn device_status(handle: &impl DeviceHandle) -> Option<DeviceStatus> {
    let mut buf = [0u8; 2];
    let request = ControlRequest::standard_in(
        Recipient::Device,
        StandardRequest::GetStatus,
        0, 0);
    match handle.control_in(request, &mut buf, TIMEOUT) {
        Ok(2) => {
            let raw = u16::from_le_bytes(buf);
            Some(DeviceStatus {
                raw,
                self_powered: raw & 0x0001 != 0,
                remote_wakeup: raw & 0x0002 != 0,
            })
        }
        _ => None,
    }
}

pub fn alternate_setting(handle: &impl DeviceHandle, number: InterfaceNum)
    -> Option<u8>
{
    let mut buf = [0u8; 1];
    let request = ControlRequest::standard_in(
        Recipient::Interface,
        StandardRequest::GetInterface,
        0,
        number.0 as u16);
    match handle.control_in(request, &mut buf, TIMEOUT) {
        Ok(1) => Some(buf[0]),
        _ => None,
    }
}

/// Run the full state battery.
///
/// Interface numbers come from the parsed tree when available, falling
/// back to a flat 0..count enumeration otherwise. A failing per-interface
/// query still yields an entry for that interface, with the setting absent.
pub fn read_device_state(handle: &impl DeviceHandle,
                         tree: Option<&DescriptorTree>,
                         fallback_interface_count: u8)
    -> DeviceState
{
    let mut numbers = tree
        .map(|tree| tree.interface_numbers())
        .unwrap_or_default();
    if numbers.is_empty() {
        numbers = (0..fallback_interface_count)
            .map(InterfaceNum)
            .collect();
    }
    DeviceState {
        active_configuration: active_configuration(handle),
        device_status: device_status(handle),
        interface_alt_settings: numbers.into_iter()
            .map(|number| InterfaceAltSetting {
                interface_number: number,
                alternate_setting: alternate_setting(handle, number),
            })
            .collect(),
    }
}
