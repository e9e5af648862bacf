//! Utility code that doesn't belong anywhere specific.

use humansize::{SizeFormatter, BINARY};
use serde::Serializer;

pub fn fmt_size(size: u64) -> String {
    if size == 1 {
        "1 byte".to_string()
    } else if size < 1024 {
        format!("{size} bytes")
    } else {
        format!("{}", SizeFormatter::new(size, BINARY))
    }
}

/// Render bytes as lowercase hex, up to `max` bytes, with an ellipsis
/// marker when the input was longer than the cap.
pub fn fmt_hex(bytes: &[u8], max: usize) -> String {
    let count = bytes.len().min(max);
    let mut out = String::with_capacity(count * 2 + 3);
    for byte in &bytes[..count] {
        out.push_str(&format!("{byte:02x}"));
    }
    if bytes.len() > max {
        out.push('…');
    }
    out
}

pub fn serialize_hex<S>(bytes: &[u8], max: usize, serializer: S)
    -> Result<S::Ok, S::Error>
    where S: Serializer
{
    serializer.serialize_str(&fmt_hex(bytes, max))
}
