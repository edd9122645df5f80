//! The real platform TUN device (Linux), implementing `nethive_core::Device`.
//!
//! Built on `tun::Configuration` + `tun::create_as_async` + `tokio::io::split`,
//! with address/route changes shelled out via `ip`. `nethive-core` only ever
//! programs against the `Device` trait, so the concrete backend is swappable.

use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use ipnet::IpNet;
use nethive_core::Device;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{DeviceError, DeviceResult};

/// Construction parameters for [`TunDevice`].
#[derive(Debug, Clone)]
pub struct TunConfig {
    pub name: String,
    pub mtu: usize,
}

/// A Linux TUN interface, read and written concurrently via owned halves
/// behind a mutex each (serializing within a direction, never across).
pub struct TunDevice {
    name: String,
    mtu: usize,
    read_half: Mutex<ReadHalf<tun::AsyncDevice>>,
    write_half: Mutex<WriteHalf<tun::AsyncDevice>>,
    up: AtomicBool,
}

impl TunDevice {
    /// Create and bring up a TUN interface with the given name and MTU.
    /// Addresses are assigned afterward via [`Device::add_address`].
    pub fn create(config: TunConfig) -> DeviceResult<Self> {
        let mut tun_config = tun::Configuration::default();
        tun_config.name(&config.name).mtu(config.mtu as u16).up();

        #[cfg(target_os = "linux")]
        tun_config.platform(|platform| {
            platform.packet_information(false);
        });

        let device = tun::create_as_async(&tun_config).map_err(DeviceError::Create)?;
        let (read_half, write_half) = tokio::io::split(device);

        info!(name = %config.name, mtu = config.mtu, "TUN interface created");

        Ok(Self {
            name: config.name,
            mtu: config.mtu,
            read_half: Mutex::new(read_half),
            write_half: Mutex::new(write_half),
            up: AtomicBool::new(true),
        })
    }
}

#[async_trait]
impl Device for TunDevice {
    async fn recv(&self, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut guard = self.read_half.lock().await;
        guard.read(buf).await
    }

    async fn send(&self, buf: &[u8]) -> std::io::Result<usize> {
        let mut guard = self.write_half.lock().await;
        guard.write(buf).await
    }

    fn close(&self) -> std::io::Result<()> {
        self.up.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn mtu(&self) -> usize {
        self.mtu
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn add_address(&self, prefix: IpNet) -> std::io::Result<()> {
        let IpNet::V4(v4) = prefix else {
            warn!(prefix = %prefix, "IPv6 overlay addresses are not supported by this device backend");
            return Ok(());
        };
        run_ip(&[
            "addr",
            "add",
            &format!("{}/{}", v4.addr(), v4.prefix_len()),
            "dev",
            &self.name,
        ])
    }

    fn flush_addresses(&self) -> std::io::Result<()> {
        run_ip(&["addr", "flush", "dev", &self.name])
    }

    fn up(&self) -> std::io::Result<()> {
        run_ip(&["link", "set", &self.name, "up"])?;
        self.up.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn down(&self) -> std::io::Result<()> {
        run_ip(&["link", "set", &self.name, "down"])?;
        self.up.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn state(&self) -> bool {
        self.up.load(Ordering::SeqCst)
    }
}

/// Install a route for `prefix` via the named interface. Removal on
/// shutdown is not performed.
pub fn install_route(interface: &str, prefix: IpNet) -> DeviceResult<()> {
    let target = prefix.to_string();
    let output = Command::new("ip")
        .args(["route", "replace", &target, "dev", interface])
        .output()?;
    if !output.status.success() {
        return Err(DeviceError::RouteInstall {
            prefix: target,
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }
    debug!(prefix = %target, interface, "kernel route installed");
    Ok(())
}

fn run_ip(args: &[&str]) -> std::io::Result<()> {
    let output = Command::new("ip").args(args).output()?;
    if !output.status.success() {
        return Err(std::io::Error::other(format!(
            "ip {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    Ok(())
}
