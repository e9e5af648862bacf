//! String descriptor negotiation and decoding.
//!
//! String descriptors are indexed and language-tagged. The language table
//! is itself string descriptor zero; an index of zero anywhere else means
//! "no string" and must not generate a transfer.

use std::time::Duration;

use serde::Serialize;

use crate::transport::{ControlRequest, DeviceHandle};
use crate::tree::DescriptorTree;
use crate::usb::{
    language_name,
    DescriptorType,
    InterfaceNum,
    LanguageId,
    Recipient,
    StandardRequest,
    StringId,
    UTF16Bytes,
    LANG_EN_US,
};

const TIMEOUT: Duration = Duration::from_millis(1200);

/// String descriptors carry their length in one byte.
const MAX_STRING_DESCRIPTOR: usize = 255;

fn string_request(index: u8, language: LanguageId) -> ControlRequest {
    ControlRequest::standard_in(
        Recipient::Device,
        StandardRequest::GetDescriptor,
        (DescriptorType::String as u16) << 8 | index as u16,
        language.0)
}

/// Read the supported language IDs from string descriptor zero.
///
/// Any response of two bytes or fewer, or with the wrong descriptor type
/// marker, yields an empty list.
pub fn read_language_ids(handle: &impl DeviceHandle) -> Vec<LanguageId> {
    let mut buf = [0u8; MAX_STRING_DESCRIPTOR];
    let request = string_request(0, LanguageId(0));
    let count = match handle.control_in(request, &mut buf, TIMEOUT) {
        Ok(count) => count,
        Err(_) => return Vec::new(),
    };
    if count <= 2 || buf[1] != DescriptorType::String as u8 {
        return Vec::new();
    }
    buf[2..count]
        .chunks_exact(2)
        .map(|pair| LanguageId(u16::from_le_bytes([pair[0], pair[1]])))
        .collect()
}

/// US English if reported, else the first reported ID, else US English
/// as a last-resort default.
pub fn preferred_language(language_ids: &[LanguageId]) -> LanguageId {
    if language_ids.contains(&LANG_EN_US) {
        LANG_EN_US
    } else {
        language_ids.first().copied().unwrap_or(LANG_EN_US)
    }
}

/// Read and decode one string descriptor.
///
/// Index zero short-circuits to absent without a transfer. Responses of
/// two bytes or fewer, with the wrong type marker, or whose declared
/// length leaves no payload after truncation, are absent. The payload is
/// UTF-16LE, trimmed of surrounding whitespace.
pub fn read_string(handle: &impl DeviceHandle,
                   index: StringId,
                   language: LanguageId)
    -> Option<String>
{
    if !index.is_present() {
        return None;
    }
    let mut buf = [0u8; MAX_STRING_DESCRIPTOR];
    let request = string_request(index.0, language);
    let count = handle.control_in(request, &mut buf, TIMEOUT).ok()?;
    if count <= 2 || buf[1] != DescriptorType::String as u8 {
        return None;
    }
    let length = (buf[0] as usize).min(count);
    if length <= 2 {
        return None;
    }
    let chars = UTF16Bytes(&buf[2..length]).chars();
    let text = String::from_utf16(&chars)
        .unwrap_or_else(|_| String::from_utf16_lossy(&chars));
    Some(text.trim().to_string())
}

#[derive(Clone, Debug, Serialize)]
pub struct DeviceStrings {
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial: Option<String>,
    pub manufacturer_str: StringId,
    pub product_str: StringId,
    pub serial_str: StringId,
}

#[derive(Clone, Debug, Serialize)]
pub struct InterfaceStrings {
    pub interface_number: InterfaceNum,
    pub alternate_setting: u8,
    pub interface_str: StringId,
    pub value: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct StringsBlock {
    pub language_ids: Vec<LanguageId>,
    pub preferred_language: LanguageId,
    pub preferred_language_name: Option<String>,
    pub device: Option<DeviceStrings>,
    pub interfaces: Vec<InterfaceStrings>,
}

/// Read every string the descriptor tree references: the three
/// device-level strings, plus one per interface naming itself.
pub fn read_strings(handle: &impl DeviceHandle,
                    tree: Option<&DescriptorTree>)
    -> StringsBlock
{
    let language_ids = read_language_ids(handle);
    let preferred = preferred_language(&language_ids);
    let device = tree
        .and_then(|tree| tree.device_fields())
        .map(|fields| DeviceStrings {
            manufacturer: read_string(handle, fields.manufacturer_str, preferred),
            product: read_string(handle, fields.product_str, preferred),
            serial: read_string(handle, fields.serial_str, preferred),
            manufacturer_str: fields.manufacturer_str,
            product_str: fields.product_str,
            serial_str: fields.serial_str,
        });
    let interfaces = tree
        .map(|tree| tree.interfaces()
            .filter(|fields| fields.interface_str.is_present())
            .map(|fields| InterfaceStrings {
                interface_number: fields.interface_number,
                alternate_setting: fields.alternate_setting,
                interface_str: fields.interface_str,
                value: read_string(handle, fields.interface_str, preferred),
            })
            .collect())
        .unwrap_or_default();
    StringsBlock {
        preferred_language: preferred,
        preferred_language_name: language_name(preferred.0),
        language_ids,
        device,
        interfaces,
    }
}
