//! The virtual network interface contract (§6) the dataplane programs against.
//!
//! Platform selection is resolved at build time; the engine only ever sees
//! this trait. Real implementations live in `nethive-device`; tests use an
//! in-memory loopback pair.

use std::io;

use async_trait::async_trait;
use ipnet::IpNet;

/// Capability set of a virtual layer-3 network interface.
///
/// Reads and writes may be called concurrently with respect to each other,
/// but each is serialized internally by the implementation.
#[async_trait]
pub trait Device: Send + Sync {
    /// Read a single IP datagram into `buf`, returning the number of bytes read.
    async fn recv(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write a single IP datagram.
    async fn send(&self, buf: &[u8]) -> io::Result<usize>;

    /// Tear down the interface.
    fn close(&self) -> io::Result<()>;

    /// Interface MTU.
    fn mtu(&self) -> usize;

    /// Interface name.
    fn name(&self) -> &str;

    /// Assign an address/prefix to the interface.
    fn add_address(&self, prefix: IpNet) -> io::Result<()>;

    /// Remove all addresses from the interface.
    fn flush_addresses(&self) -> io::Result<()>;

    /// Bring the interface up.
    fn up(&self) -> io::Result<()>;

    /// Bring the interface down.
    fn down(&self) -> io::Result<()>;

    /// Whether the interface is currently up.
    fn state(&self) -> bool;
}
