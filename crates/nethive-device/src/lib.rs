//! # NetHive device
//!
//! The real Linux TUN backend for `nethive_core::Device`, plus the kernel
//! routing helper the engine lifecycle uses to install routes for configured
//! remote prefixes.

pub mod error;
pub mod tun_device;

pub use error::{DeviceError, DeviceResult};
pub use tun_device::{TunConfig, TunDevice, install_route};
