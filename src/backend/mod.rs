//! Transport implementations backing the probe engine.

pub mod nusb;

pub use self::nusb::NusbHandle;
