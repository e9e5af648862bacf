#[macro_use]
extern crate bitfield;

pub mod backend;
pub mod details;
pub mod hid;
pub mod state;
pub mod strings;
pub mod transport;
pub mod tree;
pub mod usb;
pub mod util;

#[cfg(test)]
mod testing;
