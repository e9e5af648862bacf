//! HID report descriptor acquisition and summarizing.
//!
//! The report descriptor is a densely packed item stream, separate from
//! the main descriptor set. The summarizer performs one linear walk over
//! the short items, keeping no intermediate tree: just usage pages in
//! first-seen order, report ID and collection counts, and whether the
//! descriptor advertises a keyboard or mouse.

use std::time::Duration;

use indexmap::IndexSet;
use num_enum::FromPrimitive;
use serde::Serialize;

use crate::transport::{ControlRequest, DeviceHandle};
use crate::tree::DescriptorTree;
use crate::usb::{DescriptorType, InterfaceNum, Recipient, StandardRequest};
use crate::util::fmt_hex;

const FETCH_TIMEOUT: Duration = Duration::from_millis(1800);

/// Transfer length bounds for the report descriptor fetch.
const MIN_REPORT_LENGTH: usize = 1;
const MAX_REPORT_LENGTH: usize = 8192;

/// Cap on the hex rendering of one report payload.
pub const MAX_REPORT_HEX_BYTES: usize = 4096;

/// Lead byte marking a long item; its second byte is a data length to
/// skip, bypassing normal decoding.
const LONG_ITEM_PREFIX: u8 = 0xFE;

const USAGE_PAGE_GENERIC_DESKTOP: u32 = 0x01;
const USAGE_MOUSE: u32 = 0x02;
const USAGE_KEYBOARD: u32 = 0x06;

#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
#[repr(u8)]
enum ItemType {
    Main = 0,
    Global = 1,
    Local = 2,
    #[default]
    Reserved = 3,
}

const TAG_GLOBAL_USAGE_PAGE: u8 = 0x0;
const TAG_GLOBAL_REPORT_ID: u8 = 0x8;
const TAG_LOCAL_USAGE: u8 = 0x0;
const TAG_MAIN_COLLECTION: u8 = 0xA;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct HidReportSummary {
    pub usage_pages: Vec<u32>,
    pub report_id_count: u32,
    pub collection_count: u32,
    pub has_keyboard: bool,
    pub has_mouse: bool,
}

/// Summarize a report descriptor in a single linear scan.
///
/// The walk advances by `1 + size` bytes per short item, or by the
/// declared skip for a long item, and terminates at buffer end or on an
/// out-of-bounds item header.
pub fn summarize_report(bytes: &[u8]) -> HidReportSummary {
    let mut usage_pages: IndexSet<u32> = IndexSet::new();
    let mut report_ids: IndexSet<u32> = IndexSet::new();
    let mut collection_count = 0u32;
    let mut current_usage_page = 0u32;
    let mut has_keyboard = false;
    let mut has_mouse = false;

    let mut offset = 0;
    while offset < bytes.len() {
        let header = bytes[offset];
        if header == LONG_ITEM_PREFIX {
            if offset + 2 >= bytes.len() {
                break;
            }
            let data_length = bytes[offset + 1] as usize;
            offset += 3 + data_length;
            continue;
        }
        let size = match header & 0x03 {
            0 => 0,
            1 => 1,
            2 => 2,
            _ => 4,
        };
        let item_type = ItemType::from((header >> 2) & 0x03);
        let tag = (header >> 4) & 0x0F;
        let data_start = offset + 1;
        let data_end = bytes.len().min(data_start + size);
        let value = item_value(&bytes[data_start..data_end]);

        match (item_type, tag) {
            (ItemType::Global, TAG_GLOBAL_USAGE_PAGE) => {
                current_usage_page = value;
                usage_pages.insert(value);
            }
            (ItemType::Global, TAG_GLOBAL_REPORT_ID) => {
                if (1..=255).contains(&value) {
                    report_ids.insert(value);
                }
            }
            (ItemType::Local, TAG_LOCAL_USAGE) => {
                if current_usage_page == USAGE_PAGE_GENERIC_DESKTOP {
                    if value == USAGE_MOUSE {
                        has_mouse = true;
                    }
                    if value == USAGE_KEYBOARD {
                        has_keyboard = true;
                    }
                }
            }
            (ItemType::Main, TAG_MAIN_COLLECTION) => {
                collection_count += 1;
            }
            _ => {}
        }

        offset = data_end;
    }

    HidReportSummary {
        usage_pages: usage_pages.into_iter().collect(),
        report_id_count: report_ids.len() as u32,
        collection_count,
        has_keyboard,
        has_mouse,
    }
}

/// Compose item data bytes, little-endian, into an unsigned value.
fn item_value(data: &[u8]) -> u32 {
    let mut value = 0u32;
    for (i, &byte) in data.iter().enumerate() {
        value |= (byte as u32) << (8 * i);
    }
    value
}

/// Releases the claimed interface when dropped, so every exit path of
/// the fetch gives it back exactly once.
struct InterfaceClaim<'h, H: DeviceHandle + ?Sized> {
    handle: &'h H,
    number: InterfaceNum,
    claimed: bool,
}

impl<'h, H: DeviceHandle + ?Sized> InterfaceClaim<'h, H> {
    fn new(handle: &'h H, number: InterfaceNum) -> Self {
        let claimed = handle.claim_interface(number, true);
        InterfaceClaim { handle, number, claimed }
    }
}

impl<H: DeviceHandle + ?Sized> Drop for InterfaceClaim<'_, H> {
    fn drop(&mut self) {
        if self.claimed {
            self.handle.release_interface(self.number);
        }
    }
}

/// Fetch one interface's report descriptor, claiming the interface for
/// the duration of the transfer.
pub fn fetch_report_descriptor(handle: &impl DeviceHandle,
                               number: InterfaceNum,
                               report_length: u16)
    -> Option<Vec<u8>>
{
    let length = (report_length as usize)
        .clamp(MIN_REPORT_LENGTH, MAX_REPORT_LENGTH);
    let mut buf = vec![0u8; length];
    let request = ControlRequest::standard_in(
        Recipient::Interface,
        StandardRequest::GetDescriptor,
        (DescriptorType::HidReport as u16) << 8,
        number.0 as u16);
    let claim = InterfaceClaim::new(handle, number);
    let count = handle.control_in(request, &mut buf, FETCH_TIMEOUT).ok()?;
    drop(claim);
    if count == 0 {
        return None;
    }
    buf.truncate(count);
    Some(buf)
}

#[derive(Clone, Debug, Serialize)]
pub struct HidReport {
    pub interface_number: InterfaceNum,
    pub report_length: u16,
    pub report_hex: Option<String>,
    pub summary: Option<HidReportSummary>,
}

/// Fetch and summarize the report descriptor of every interface the tree
/// shows carrying one. A failed fetch still yields an entry, with the
/// payload and summary absent.
pub fn read_hid_reports(handle: &impl DeviceHandle, tree: &DescriptorTree)
    -> Vec<HidReport>
{
    tree.hid_report_lengths()
        .into_iter()
        .map(|(number, report_length)| {
            let bytes = fetch_report_descriptor(handle, number, report_length);
            HidReport {
                interface_number: number,
                report_length,
                report_hex: bytes.as_deref()
                    .map(|bytes| fmt_hex(bytes, MAX_REPORT_HEX_BYTES)),
                summary: bytes.as_deref().map(summarize_report),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedHandle;

    fn report_request(interface: u16) -> ControlRequest {
        ControlRequest::standard_in(
            Recipient::Interface,
            StandardRequest::GetDescriptor,
            (DescriptorType::HidReport as u16) << 8,
            interface)
    }

    #[test]
    fn test_keyboard_usage() {
        // Usage Page (Generic Desktop), Usage (Keyboard).
        let summary = summarize_report(&[0x05, 0x01, 0x09, 0x06]);
        assert!(summary.has_keyboard);
        assert!(!summary.has_mouse);
        assert_eq!(summary.usage_pages, vec![0x01]);
    }

    #[test]
    fn test_mouse_usage() {
        let summary = summarize_report(&[0x05, 0x01, 0x09, 0x02]);
        assert!(summary.has_mouse);
        assert!(!summary.has_keyboard);
    }

    #[test]
    fn test_usage_outside_generic_desktop() {
        // Usage Page (Consumer), Usage (0x06): not a keyboard.
        let summary = summarize_report(&[0x05, 0x0C, 0x09, 0x06]);
        assert!(!summary.has_keyboard);
    }

    #[test]
    fn test_usage_pages_first_seen_order() {
        // Generic Desktop, then a two-byte vendor page, then Generic
        // Desktop again.
        let summary = summarize_report(
            &[0x05, 0x01, 0x06, 0x00, 0xFF, 0x05, 0x01]);
        assert_eq!(summary.usage_pages, vec![0x01, 0xFF00]);
    }

    #[test]
    fn test_report_ids_are_uniqued() {
        let summary = summarize_report(
            &[0x85, 0x01, 0x85, 0x02, 0x85, 0x01]);
        assert_eq!(summary.report_id_count, 2);
    }

    #[test]
    fn test_zero_report_id_not_counted() {
        let summary = summarize_report(&[0x85, 0x00]);
        assert_eq!(summary.report_id_count, 0);
    }

    #[test]
    fn test_collections_counted() {
        // Collection (Application) twice, End Collection twice.
        let summary = summarize_report(
            &[0xA1, 0x01, 0xA1, 0x02, 0xC0, 0xC0]);
        assert_eq!(summary.collection_count, 2);
    }

    #[test]
    fn test_long_item_skip() {
        // A long item of declared length 2 skips 3 + 2 bytes, including
        // bytes that would otherwise decode as items.
        let summary = summarize_report(
            &[0xFE, 0x02, 0x00, 0x05, 0x0C, 0x05, 0x01, 0x09, 0x06]);
        assert!(summary.has_keyboard);
        assert_eq!(summary.usage_pages, vec![0x01]);
    }

    #[test]
    fn test_long_item_truncated_header() {
        let summary = summarize_report(&[0x05, 0x01, 0xFE, 0x04]);
        assert_eq!(summary.usage_pages, vec![0x01]);
    }

    #[test]
    fn test_truncated_item_data() {
        // Item declares one data byte but the buffer ends first.
        let summary = summarize_report(&[0x05]);
        assert_eq!(summary.usage_pages, vec![0x00]);
    }

    #[test]
    fn test_fetch_claims_and_releases() {
        let handle = ScriptedHandle::new()
            .respond(report_request(0), &[0x05, 0x01, 0x09, 0x06]);
        let bytes = fetch_report_descriptor(&handle, InterfaceNum(0), 63);
        assert_eq!(bytes, Some(vec![0x05, 0x01, 0x09, 0x06]));
        assert_eq!(handle.claims.borrow().len(), 1);
        assert_eq!(handle.releases.borrow().len(), 1);
    }

    #[test]
    fn test_failed_fetch_releases_exactly_once() {
        let handle = ScriptedHandle::new();
        let bytes = fetch_report_descriptor(&handle, InterfaceNum(2), 63);
        assert_eq!(bytes, None);
        assert_eq!(handle.claims.borrow().as_slice(), &[InterfaceNum(2)]);
        assert_eq!(handle.releases.borrow().as_slice(), &[InterfaceNum(2)]);
    }

    #[test]
    fn test_refused_claim_is_not_released() {
        let handle = ScriptedHandle::new()
            .respond(report_request(0), &[0x05, 0x01])
            .refusing_claims();
        let bytes = fetch_report_descriptor(&handle, InterfaceNum(0), 63);
        // The transfer itself is still attempted.
        assert_eq!(bytes, Some(vec![0x05, 0x01]));
        assert_eq!(handle.claims.borrow().len(), 1);
        assert!(handle.releases.borrow().is_empty());
    }

    #[test]
    fn test_read_hid_reports() {
        let mut raw = Vec::new();
        raw.extend_from_slice(
            &[0x09, 0x02, 0x22, 0x00, 0x01, 0x01, 0x00, 0xA0, 0x32]);
        raw.extend_from_slice(
            &[0x09, 0x04, 0x00, 0x00, 0x01, 0x03, 0x01, 0x01, 0x00]);
        raw.extend_from_slice(
            &[0x09, 0x21, 0x11, 0x01, 0x00, 0x01, 0x22, 0x04, 0x00]);
        let tree = DescriptorTree::parse(&raw);
        let handle = ScriptedHandle::new()
            .respond(report_request(0), &[0x05, 0x01, 0x09, 0x06]);
        let reports = read_hid_reports(&handle, &tree);
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].interface_number, InterfaceNum(0));
        assert_eq!(reports[0].report_length, 4);
        assert_eq!(reports[0].report_hex.as_deref(), Some("05010906"));
        let summary = reports[0].summary.as_ref().expect("summary expected");
        assert!(summary.has_keyboard);
    }

    #[test]
    fn test_read_hid_reports_failure_keeps_entry() {
        let mut raw = Vec::new();
        raw.extend_from_slice(
            &[0x09, 0x04, 0x01, 0x00, 0x01, 0x03, 0x00, 0x00, 0x00]);
        raw.extend_from_slice(
            &[0x09, 0x21, 0x11, 0x01, 0x00, 0x01, 0x22, 0x3F, 0x00]);
        let tree = DescriptorTree::parse(&raw);
        let handle = ScriptedHandle::new();
        let reports = read_hid_reports(&handle, &tree);
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].report_hex, None);
        assert!(reports[0].summary.is_none());
        assert_eq!(handle.claims.borrow().len(), 1);
        assert_eq!(handle.releases.borrow().len(), 1);
    }
}
