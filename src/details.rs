//! Best-effort assembly of one device-details record.
//!
//! Each sub-probe runs independently; a failure in one leaves its field
//! absent and never aborts the others. Nothing is cached: every call
//! recomputes the record from the device.

use serde::Serialize;

use crate::hid::{read_hid_reports, HidReport};
use crate::state::{read_device_state, DeviceState};
use crate::strings::{read_strings, StringsBlock};
use crate::transport::DeviceHandle;
use crate::tree::{ConfigurationView, DescriptorTree};

#[derive(Clone, Debug, Default, Serialize)]
pub struct DeviceSummary {
    pub vendor_id: Option<u16>,
    pub vendor_name: Option<String>,
    pub product_id: Option<u16>,
    pub product_name: Option<String>,
    pub device_class: Option<u8>,
    pub class_name: Option<String>,
    pub usb_version: Option<String>,
    pub num_configurations: Option<u8>,
    pub max_power_ma: Option<u16>,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct DeviceDetails {
    pub summary: DeviceSummary,
    pub descriptor_tree: Option<DescriptorTree>,
    pub configurations: Vec<ConfigurationView>,
    pub strings: Option<StringsBlock>,
    pub hid_reports: Vec<HidReport>,
    pub device_state: Option<DeviceState>,
}

impl DeviceDetails {
    /// Run the whole detail-assembly sequence against an open handle.
    pub fn collect(handle: &impl DeviceHandle) -> DeviceDetails {
        let tree = handle.raw_descriptors()
            .map(|raw| DescriptorTree::parse(&raw));
        let configurations = tree.as_ref()
            .map(|tree| tree.configurations())
            .unwrap_or_default();
        let strings = read_strings(handle, tree.as_ref());
        let fallback_count = configurations.first()
            .map(|config| config.fields.num_interfaces)
            .unwrap_or(0);
        let device_state =
            read_device_state(handle, tree.as_ref(), fallback_count);
        let hid_reports = tree.as_ref()
            .map(|tree| read_hid_reports(handle, tree))
            .unwrap_or_default();
        let summary = build_summary(tree.as_ref(), &strings, &configurations);
        DeviceDetails {
            summary,
            descriptor_tree: tree,
            configurations,
            strings: Some(strings),
            hid_reports,
            device_state: Some(device_state),
        }
    }
}

fn build_summary(tree: Option<&DescriptorTree>,
                 strings: &StringsBlock,
                 configurations: &[ConfigurationView])
    -> DeviceSummary
{
    let mut summary = DeviceSummary::default();
    if let Some(fields) = tree.and_then(|tree| tree.device_fields()) {
        summary.vendor_id = Some(fields.vendor_id);
        summary.vendor_name = fields.vendor_name.clone();
        summary.product_id = Some(fields.product_id);
        summary.product_name = fields.product_name.clone();
        summary.device_class = Some(fields.device_class);
        summary.class_name = fields.class_name.clone();
        summary.usb_version = Some(fields.usb_version.to_string());
        summary.num_configurations = Some(fields.num_configurations);
    }
    summary.max_power_ma = configurations.first()
        .map(|config| config.fields.max_power_ma);
    if let Some(device) = &strings.device {
        summary.manufacturer = device.manufacturer.clone();
        summary.product = device.product.clone();
        summary.serial = device.serial.clone();
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedHandle;
    use crate::transport::ControlRequest;
    use crate::usb::{DescriptorType, Recipient, StandardRequest};

    fn full_descriptor_set() -> Vec<u8> {
        let mut raw = Vec::new();
        raw.extend_from_slice(&[
            18, 0x01, 0x00, 0x02, 0x00, 0x00, 0x00, 0x40,
            0x50, 0x1d, 0x5b, 0x61, 0x11, 0x01, 0x01, 0x00,
            0x00, 0x01,
        ]);
        raw.extend_from_slice(
            &[0x09, 0x02, 0x22, 0x00, 0x01, 0x01, 0x00, 0xA0, 0x32]);
        raw.extend_from_slice(
            &[0x09, 0x04, 0x00, 0x00, 0x01, 0x03, 0x01, 0x01, 0x00]);
        raw.extend_from_slice(
            &[0x09, 0x21, 0x11, 0x01, 0x00, 0x01, 0x22, 0x04, 0x00]);
        raw.extend_from_slice(
            &[0x07, 0x05, 0x81, 0x03, 0x08, 0x00, 0x0A]);
        raw
    }

    fn string_request(index: u16, language: u16) -> ControlRequest {
        ControlRequest::standard_in(
            Recipient::Device,
            StandardRequest::GetDescriptor,
            (DescriptorType::String as u16) << 8 | index,
            language)
    }

    #[test]
    fn test_collect_full_record() {
        let handle = ScriptedHandle::new()
            .with_raw_descriptors(&full_descriptor_set())
            .respond(string_request(0, 0), &[0x04, 0x03, 0x09, 0x04])
            .respond(string_request(1, 0x0409),
                     &[0x06, 0x03, 0x41, 0x00, 0x42, 0x00])
            .respond(ControlRequest::standard_in(
                Recipient::Device,
                StandardRequest::GetConfiguration, 0, 0), &[0x01])
            .respond(ControlRequest::standard_in(
                Recipient::Device,
                StandardRequest::GetStatus, 0, 0), &[0x01, 0x00])
            .respond(ControlRequest::standard_in(
                Recipient::Interface,
                StandardRequest::GetInterface, 0, 0), &[0x00])
            .respond(ControlRequest::standard_in(
                Recipient::Interface,
                StandardRequest::GetDescriptor,
                (DescriptorType::HidReport as u16) << 8, 0),
                &[0x05, 0x01, 0x09, 0x06]);
        let details = DeviceDetails::collect(&handle);
        assert_eq!(details.summary.vendor_id, Some(0x1d50));
        assert_eq!(details.summary.usb_version.as_deref(), Some("2.00"));
        assert_eq!(details.summary.max_power_ma, Some(100));
        assert_eq!(details.summary.manufacturer.as_deref(), Some("AB"));
        assert_eq!(details.configurations.len(), 1);
        assert_eq!(details.hid_reports.len(), 1);
        let state = details.device_state.expect("state expected");
        assert_eq!(state.active_configuration, Some(1));
        let tree = details.descriptor_tree.expect("tree expected");
        assert_eq!(tree.nodes.len(), 5);
    }

    #[test]
    fn test_collect_without_raw_descriptors() {
        let handle = ScriptedHandle::new();
        let details = DeviceDetails::collect(&handle);
        assert!(details.descriptor_tree.is_none());
        assert!(details.configurations.is_empty());
        assert!(details.hid_reports.is_empty());
        assert_eq!(details.summary.vendor_id, None);
        // Probes still ran, best effort, and came back empty.
        let strings = details.strings.expect("strings block expected");
        assert!(strings.language_ids.is_empty());
        assert!(strings.device.is_none());
        let state = details.device_state.expect("state block expected");
        assert_eq!(state.active_configuration, None);
        assert!(state.interface_alt_settings.is_empty());
    }

    #[test]
    fn test_collect_serializes() {
        let handle = ScriptedHandle::new()
            .with_raw_descriptors(&full_descriptor_set());
        let details = DeviceDetails::collect(&handle);
        let json = serde_json::to_value(&details)
            .expect("details should serialize");
        let nodes = json["descriptor_tree"].as_array()
            .expect("tree should serialize as a node list");
        assert_eq!(nodes.len(), 5);
        assert_eq!(nodes[4]["raw_hex"], "0705810308000a");
    }
}
