//! Descriptor set walking and per-type field decoding.
//!
//! A descriptor set is a flat, self-describing byte stream: each record
//! starts with its own length and type byte. The walker slices it into
//! ordered nodes and hands each known type to a field decoder. Containment
//! of endpoints and HID descriptors under their interface is positional in
//! the node sequence, so the helpers here re-derive it by forward scan.

use std::mem::size_of;

use itertools::Itertools;
use serde::{Serialize, Serializer};
use usb_ids::FromId;

use crate::usb::{
    BCDVersion,
    ConfigDescriptor,
    DescriptorType,
    DeviceDescriptor,
    Direction,
    EndpointAddr,
    EndpointAttr,
    EndpointDescriptor,
    EndpointNum,
    EndpointType,
    InterfaceDescriptor,
    InterfaceNum,
    StringId,
};
use crate::util;

/// Cap on the hex rendering of one node's raw payload.
pub const MAX_NODE_HEX_BYTES: usize = 2048;

#[derive(Clone, Debug, Serialize)]
pub struct DescriptorNode {
    pub offset: u32,
    pub length: u8,
    pub descriptor_type: u8,
    pub type_name: &'static str,
    #[serde(rename = "raw_hex", serialize_with = "serialize_node_hex")]
    pub bytes: Vec<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<DescriptorFields>,
}

fn serialize_node_hex<S>(bytes: &[u8], serializer: S)
    -> Result<S::Ok, S::Error>
    where S: Serializer
{
    util::serialize_hex(bytes, MAX_NODE_HEX_BYTES, serializer)
}

#[derive(Clone, Debug, Serialize)]
#[serde(untagged)]
pub enum DescriptorFields {
    Device(DeviceFields),
    Configuration(ConfigFields),
    Interface(InterfaceFields),
    Endpoint(EndpointFields),
    Hid(HidFields),
    Bos(BosFields),
    DeviceCapability(DeviceCapabilityFields),
    SsEndpointCompanion(SsCompanionFields),
    ClassSpecificInterface(CsInterfaceFields),
    ClassSpecificEndpoint(CsEndpointFields),
}

#[derive(Clone, Debug, Serialize)]
pub struct DeviceFields {
    pub usb_version: BCDVersion,
    pub device_class: u8,
    pub class_name: Option<String>,
    pub device_subclass: u8,
    pub device_protocol: u8,
    pub max_packet_size_0: u8,
    pub vendor_id: u16,
    pub vendor_name: Option<String>,
    pub product_id: u16,
    pub product_name: Option<String>,
    pub device_version: BCDVersion,
    pub manufacturer_str: StringId,
    pub product_str: StringId,
    pub serial_str: StringId,
    pub num_configurations: u8,
}

impl DeviceFields {
    fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < size_of::<DeviceDescriptor>() {
            return None;
        }
        let desc = DeviceDescriptor::from_bytes(
            &bytes[..size_of::<DeviceDescriptor>()]);
        Some(DeviceFields {
            usb_version: desc.usb_version,
            device_class: desc.device_class,
            class_name: usb_ids::Class::from_id(desc.device_class)
                .map(|class| class.name().to_string()),
            device_subclass: desc.device_subclass,
            device_protocol: desc.device_protocol,
            max_packet_size_0: desc.max_packet_size_0,
            vendor_id: desc.vendor_id,
            vendor_name: usb_ids::Vendor::from_id(desc.vendor_id)
                .map(|vendor| vendor.name().to_string()),
            product_id: desc.product_id,
            product_name: usb_ids::Device::from_vid_pid(
                    desc.vendor_id, desc.product_id)
                .map(|device| device.name().to_string()),
            device_version: desc.device_version,
            manufacturer_str: desc.manufacturer_str_id,
            product_str: desc.product_str_id,
            serial_str: desc.serial_str_id,
            num_configurations: desc.num_configurations,
        })
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct ConfigFields {
    pub total_length: u16,
    pub num_interfaces: u8,
    pub config_value: u8,
    pub config_str: StringId,
    pub attributes: u8,
    pub self_powered: bool,
    pub remote_wakeup: bool,
    pub max_power_units: u8,
    pub max_power_ma: u16,
}

impl ConfigFields {
    fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < size_of::<ConfigDescriptor>() {
            return None;
        }
        let desc = ConfigDescriptor::from_bytes(
            &bytes[..size_of::<ConfigDescriptor>()]);
        Some(ConfigFields {
            total_length: desc.total_length,
            num_interfaces: desc.num_interfaces,
            config_value: desc.config_value,
            config_str: desc.config_str_id,
            attributes: desc.attributes,
            self_powered: desc.attributes & 0x40 != 0,
            remote_wakeup: desc.attributes & 0x20 != 0,
            max_power_units: desc.max_power,
            max_power_ma: desc.max_power as u16 * 2,
        })
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct InterfaceFields {
    pub interface_number: InterfaceNum,
    pub alternate_setting: u8,
    pub num_endpoints: u8,
    pub interface_class: u8,
    pub class_name: Option<String>,
    pub interface_subclass: u8,
    pub interface_protocol: u8,
    pub interface_str: StringId,
}

impl InterfaceFields {
    fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < size_of::<InterfaceDescriptor>() {
            return None;
        }
        let desc = InterfaceDescriptor::from_bytes(
            &bytes[..size_of::<InterfaceDescriptor>()]);
        Some(InterfaceFields {
            interface_number: desc.interface_number,
            alternate_setting: desc.alternate_setting,
            num_endpoints: desc.num_endpoints,
            interface_class: desc.interface_class,
            class_name: usb_ids::Class::from_id(desc.interface_class)
                .map(|class| class.name().to_string()),
            interface_subclass: desc.interface_subclass,
            interface_protocol: desc.interface_protocol,
            interface_str: desc.interface_str_id,
        })
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct EndpointFields {
    pub endpoint_address: EndpointAddr,
    pub direction: Direction,
    pub endpoint_number: EndpointNum,
    pub attributes: EndpointAttr,
    pub transfer_type: EndpointType,
    pub max_packet_size: u16,
    pub interval: u8,
}

impl EndpointFields {
    fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < size_of::<EndpointDescriptor>() {
            return None;
        }
        let desc = EndpointDescriptor::from_bytes(
            &bytes[..size_of::<EndpointDescriptor>()]);
        Some(EndpointFields {
            endpoint_address: desc.endpoint_address,
            direction: desc.endpoint_address.direction(),
            endpoint_number: desc.endpoint_address.number(),
            attributes: desc.attributes,
            transfer_type: desc.attributes.endpoint_type(),
            max_packet_size: desc.max_packet_size,
            interval: desc.interval,
        })
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct HidSubDescriptor {
    pub descriptor_type: u8,
    pub type_name: &'static str,
    pub length: u16,
}

#[derive(Clone, Debug, Serialize)]
pub struct HidFields {
    pub hid_version: BCDVersion,
    pub country_code: u8,
    pub num_descriptors: u8,
    pub descriptors: Vec<HidSubDescriptor>,
    pub report_descriptor_length: Option<u16>,
}

impl HidFields {
    fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 9 {
            return None;
        }
        let num_descriptors = bytes[5];
        let mut descriptors = Vec::new();
        let mut offset = 6;
        while descriptors.len() < num_descriptors as usize
            && offset + 3 <= bytes.len()
        {
            let descriptor_type = bytes[offset];
            descriptors.push(HidSubDescriptor {
                descriptor_type,
                type_name: DescriptorType::from(descriptor_type).description(),
                length: u16::from_le_bytes(
                    [bytes[offset + 1], bytes[offset + 2]]),
            });
            offset += 3;
        }
        let report_descriptor_length = descriptors.iter()
            .find(|sub|
                sub.descriptor_type == DescriptorType::HidReport as u8)
            .map(|sub| sub.length);
        Some(HidFields {
            hid_version: BCDVersion::from_le_bytes(bytes[2], bytes[3]),
            country_code: bytes[4],
            num_descriptors,
            descriptors,
            report_descriptor_length,
        })
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct BosFields {
    pub total_length: u16,
    pub num_device_caps: u8,
}

impl BosFields {
    fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 5 {
            return None;
        }
        Some(BosFields {
            total_length: u16::from_le_bytes([bytes[2], bytes[3]]),
            num_device_caps: bytes[4],
        })
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct DeviceCapabilityFields {
    pub capability_type: u8,
}

impl DeviceCapabilityFields {
    fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 3 {
            return None;
        }
        Some(DeviceCapabilityFields { capability_type: bytes[2] })
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct SsCompanionFields {
    pub max_burst: u8,
    pub attributes: u8,
    pub bytes_per_interval: u16,
}

impl SsCompanionFields {
    fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 6 {
            return None;
        }
        Some(SsCompanionFields {
            max_burst: bytes[2],
            attributes: bytes[3],
            bytes_per_interval: u16::from_le_bytes([bytes[4], bytes[5]]),
        })
    }
}

/// Class-specific interface functional descriptor subtypes (CDC).
#[derive(Clone, Debug, Serialize)]
#[serde(untagged)]
pub enum CsInterfaceDetail {
    Header {
        cdc_version: BCDVersion,
    },
    CallManagement {
        capabilities: u8,
    },
    AbstractControl {
        capabilities: u8,
    },
    Union {
        master_interface: u8,
        slave_interfaces: Vec<u8>,
    },
    Ethernet {
        mac_address_str: StringId,
        statistics: u32,
        max_segment_size: u16,
        multicast_filters: u16,
        power_filters: u8,
    },
}

#[derive(Clone, Debug, Serialize)]
pub struct CsInterfaceFields {
    pub subtype: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<CsInterfaceDetail>,
}

impl CsInterfaceFields {
    fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 3 {
            return None;
        }
        let subtype = bytes[2];
        let detail = match subtype {
            0x00 if bytes.len() >= 5 => Some(CsInterfaceDetail::Header {
                cdc_version: BCDVersion::from_le_bytes(bytes[3], bytes[4]),
            }),
            0x01 if bytes.len() >= 5 => Some(CsInterfaceDetail::CallManagement {
                capabilities: bytes[4],
            }),
            0x02 if bytes.len() >= 4 => Some(CsInterfaceDetail::AbstractControl {
                capabilities: bytes[3],
            }),
            0x06 if bytes.len() >= 5 => Some(CsInterfaceDetail::Union {
                master_interface: bytes[3],
                // The slave list runs to the end of the descriptor.
                slave_interfaces: bytes[4..].to_vec(),
            }),
            0x0F if bytes.len() >= 13 => Some(CsInterfaceDetail::Ethernet {
                mac_address_str: StringId(bytes[3]),
                statistics: u32::from_le_bytes(
                    [bytes[4], bytes[5], bytes[6], bytes[7]]),
                max_segment_size: u16::from_le_bytes([bytes[8], bytes[9]]),
                multicast_filters: u16::from_le_bytes([bytes[10], bytes[11]]),
                power_filters: bytes[12],
            }),
            _ => None,
        };
        Some(CsInterfaceFields { subtype, detail })
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct CsEndpointFields {
    pub subtype: u8,
}

impl CsEndpointFields {
    fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 3 {
            return None;
        }
        Some(CsEndpointFields { subtype: bytes[2] })
    }
}

fn decode_fields(descriptor_type: u8, bytes: &[u8])
    -> Option<DescriptorFields>
{
    use DescriptorFields as Fields;
    match DescriptorType::from(descriptor_type) {
        DescriptorType::Device =>
            DeviceFields::from_bytes(bytes).map(Fields::Device),
        DescriptorType::Configuration =>
            ConfigFields::from_bytes(bytes).map(Fields::Configuration),
        DescriptorType::Interface =>
            InterfaceFields::from_bytes(bytes).map(Fields::Interface),
        DescriptorType::Endpoint =>
            EndpointFields::from_bytes(bytes).map(Fields::Endpoint),
        DescriptorType::Hid =>
            HidFields::from_bytes(bytes).map(Fields::Hid),
        DescriptorType::Bos =>
            BosFields::from_bytes(bytes).map(Fields::Bos),
        DescriptorType::DeviceCapability =>
            DeviceCapabilityFields::from_bytes(bytes)
                .map(Fields::DeviceCapability),
        DescriptorType::SsEndpointCompanion =>
            SsCompanionFields::from_bytes(bytes)
                .map(Fields::SsEndpointCompanion),
        DescriptorType::ClassSpecificInterface =>
            CsInterfaceFields::from_bytes(bytes)
                .map(Fields::ClassSpecificInterface),
        DescriptorType::ClassSpecificEndpoint =>
            CsEndpointFields::from_bytes(bytes)
                .map(Fields::ClassSpecificEndpoint),
        _ => None,
    }
}

/// One configuration with its positionally-owned interfaces.
#[derive(Clone, Debug, Serialize)]
pub struct ConfigurationView {
    pub fields: ConfigFields,
    pub interfaces: Vec<InterfaceView>,
}

/// One interface alternate setting with its endpoints.
#[derive(Clone, Debug, Serialize)]
pub struct InterfaceView {
    pub fields: InterfaceFields,
    pub endpoints: Vec<EndpointFields>,
}

#[derive(Clone, Debug, Default, Serialize)]
#[serde(transparent)]
pub struct DescriptorTree {
    pub nodes: Vec<DescriptorNode>,
}

impl DescriptorTree {
    /// Walk a concatenated descriptor set into an ordered node sequence.
    ///
    /// The walk stops, without error, at the first structurally invalid
    /// length: a partial tree is valid output. Unrecognized descriptor
    /// types are retained as raw nodes with no decoded fields.
    pub fn parse(raw: &[u8]) -> Self {
        let mut nodes = Vec::new();
        let mut offset = 0;
        while offset + 2 <= raw.len() {
            let length = raw[offset] as usize;
            if length < 2 || offset + length > raw.len() {
                break;
            }
            let descriptor_type = raw[offset + 1];
            let bytes = raw[offset..offset + length].to_vec();
            let fields = decode_fields(descriptor_type, &bytes);
            nodes.push(DescriptorNode {
                offset: offset as u32,
                length: length as u8,
                descriptor_type,
                type_name: DescriptorType::from(descriptor_type).description(),
                bytes,
                fields,
            });
            offset += length;
        }
        DescriptorTree { nodes }
    }

    pub fn device_fields(&self) -> Option<&DeviceFields> {
        self.nodes.iter().find_map(|node| match &node.fields {
            Some(DescriptorFields::Device(fields)) => Some(fields),
            _ => None,
        })
    }

    /// Every interface alternate setting, in descriptor order.
    pub fn interfaces(&self) -> impl Iterator<Item = &InterfaceFields> {
        self.nodes.iter().filter_map(|node| match &node.fields {
            Some(DescriptorFields::Interface(fields)) => Some(fields),
            _ => None,
        })
    }

    /// Distinct interface numbers, ascending.
    pub fn interface_numbers(&self) -> Vec<InterfaceNum> {
        self.interfaces()
            .map(|fields| fields.interface_number)
            .unique()
            .sorted()
            .collect()
    }

    /// Report descriptor length per interface carrying a HID descriptor,
    /// sorted by interface number. The association is positional: a HID
    /// node belongs to the most recent interface node before it.
    pub fn hid_report_lengths(&self) -> Vec<(InterfaceNum, u16)> {
        let mut by_interface: Vec<(InterfaceNum, u16)> = Vec::new();
        let mut current: Option<InterfaceNum> = None;
        for node in &self.nodes {
            match &node.fields {
                Some(DescriptorFields::Interface(fields)) => {
                    current = Some(fields.interface_number);
                }
                Some(DescriptorFields::Hid(fields)) => {
                    let (Some(number), Some(length)) =
                        (current, fields.report_descriptor_length)
                    else {
                        continue;
                    };
                    if length == 0 {
                        continue;
                    }
                    match by_interface.iter_mut()
                        .find(|(existing, _)| *existing == number)
                    {
                        Some(entry) => entry.1 = length,
                        None => by_interface.push((number, length)),
                    }
                }
                _ => {}
            }
        }
        by_interface.sort_by_key(|(number, _)| *number);
        by_interface
    }

    /// Assemble configurations from the flat sequence: a configuration
    /// node opens a view, interface nodes attach to the open view, and
    /// endpoint nodes attach to the last interface seen.
    pub fn configurations(&self) -> Vec<ConfigurationView> {
        let mut configurations: Vec<ConfigurationView> = Vec::new();
        for node in &self.nodes {
            match &node.fields {
                Some(DescriptorFields::Configuration(fields)) => {
                    configurations.push(ConfigurationView {
                        fields: fields.clone(),
                        interfaces: Vec::new(),
                    });
                }
                Some(DescriptorFields::Interface(fields)) => {
                    if let Some(config) = configurations.last_mut() {
                        config.interfaces.push(InterfaceView {
                            fields: fields.clone(),
                            endpoints: Vec::new(),
                        });
                    }
                }
                Some(DescriptorFields::Endpoint(fields)) => {
                    if let Some(interface) = configurations.last_mut()
                        .and_then(|config| config.interfaces.last_mut())
                    {
                        interface.endpoints.push(fields.clone());
                    }
                }
                _ => {}
            }
        }
        configurations
    }
}
