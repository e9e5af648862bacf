//! Probe every attached USB device and print its details as JSON.

use anyhow::Error;
use nusb::MaybeFuture;

use usbprobe::backend::NusbHandle;
use usbprobe::details::DeviceDetails;
use usbprobe::util::fmt_size;

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Error> {
    let mut found = false;
    for device_info in nusb::list_devices().wait()? {
        found = true;
        let description = format!(
            "{:04x}:{:04x} {} {}",
            device_info.vendor_id(),
            device_info.product_id(),
            device_info.manufacturer_string().unwrap_or("Unknown"),
            device_info.product_string().unwrap_or("Device"));
        println!("Probing {description}");
        let handle = match NusbHandle::open(&device_info) {
            Ok(handle) => handle,
            Err(e) => {
                eprintln!("Cannot open {description}: {e}");
                continue;
            }
        };
        let details = DeviceDetails::collect(&handle);
        if let Some(tree) = &details.descriptor_tree {
            let total: usize =
                tree.nodes.iter().map(|node| node.bytes.len()).sum();
            println!("Descriptor set: {} in {} descriptors",
                     fmt_size(total as u64), tree.nodes.len());
        }
        println!("{}", serde_json::to_string_pretty(&details)?);
    }
    if !found {
        println!("No devices found");
    }
    Ok(())
}
