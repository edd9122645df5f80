//! Interface I/O loops (C3, §4.3): the perpetual reader and writer tasks
//! driving the `Device` the engine composes everything else around.

use std::net::IpAddr;
use std::sync::Arc;

use nethive_core::{Device, DropReason, Payload, is_multicast};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// True for addresses the config table describes as "multicast/link-local":
/// ordinary multicast (§4.3's base rule) plus the link-local-scope ranges
/// (IPv4 224.0.0.0/24, IPv6 ff02::/16) that `is_multicast` alone already
/// covers. Kept as its own predicate for the debug-log label, but gated by
/// `EnableBroadcast` exactly like any other multicast destination — §6's
/// `EnableBroadcast` entry ("whether multicast/link-local packets are
/// fanned out") is the single switch for both.
fn is_link_local_multicast(addr: &IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => {
            let o = v4.octets();
            o[0] == 224 && o[1] == 0 && o[2] == 0
        }
        IpAddr::V6(v6) => {
            let s = v6.segments();
            (s[0] & 0xff0f) == 0xff02
        }
    }
}

/// The reader task (ingress): read datagrams off `device`, parse, filter,
/// and hand them to the dispatcher input channel. Returns (fatally) on
/// interface read error.
pub async fn run_reader(
    device: Arc<dyn Device>,
    enable_broadcast: bool,
    dispatcher_input: mpsc::Sender<Payload>,
) -> std::io::Error {
    let mut buf = vec![0u8; device.mtu().max(2048)];
    loop {
        let n = match device.recv(&mut buf).await {
            Ok(n) => n,
            Err(err) => {
                warn!(error = %err, "interface read failed, reader exiting");
                return err;
            }
        };

        let data = buf[..n].to_vec();
        let payload = match Payload::from_datagram(data) {
            Ok(p) => p,
            Err(err) => {
                warn!(error = %err, reason = %DropReason::InvalidPacket, "dropping unparseable packet");
                continue;
            }
        };

        if is_multicast(&payload.dst) && !enable_broadcast {
            debug!(
                dst = %payload.dst,
                link_local = is_link_local_multicast(&payload.dst),
                reason = %DropReason::MulticastDisabled,
                "dropping multicast packet"
            );
            continue;
        }

        if dispatcher_input.try_send(payload).is_err() {
            warn!(reason = %DropReason::Backpressure, "dispatcher input full, dropping packet");
        }
    }
}

/// The writer task (egress): drain the interface-write channel onto
/// `device`. Transient write errors are logged and the loop continues;
/// interface closure is fatal.
pub async fn run_writer(device: Arc<dyn Device>, mut interface_write: mpsc::Receiver<Payload>) {
    while let Some(payload) = interface_write.recv().await {
        if let Err(err) = device.send(&payload.data).await {
            if err.kind() == std::io::ErrorKind::BrokenPipe {
                // This return only ends the writer task; the engine spawns it
                // and drops its `JoinHandle`, so it never observes this exit
                // directly. §4.3's "interface closure is fatal" still holds
                // because the reader (whose handle the engine does await) is
                // reading the same closed interface and will error out too,
                // surfacing `EngineError::InterfaceClosed` from there.
                warn!(error = %err, "interface closed, writer exiting");
                return;
            }
            warn!(error = %err, "transient interface write error");
        }
    }
    debug!("interface-write channel closed, writer exiting");
}
