//! Engine lifecycle (C8, §4.8): composes the interface, route table,
//! dispatcher, dialer, and discovery into one running dataplane, and owns
//! the strict startup order and shutdown signal.

use std::sync::Arc;

use iroh::endpoint::Connection;
use iroh::protocol::Router;
use iroh::{Endpoint, EndpointAddr, RelayMap, RelayMode};
use iroh_gossip::net::{GOSSIP_ALPN, Gossip};
use nethive_core::{Device, PeerId, Payload, RoutePolicy, VPN_ALPN};
use nethive_device::{TunConfig, TunDevice};
use nethive_routing::{Dialer, DispatcherConfig, RouteTable, run_dispatcher};
use nethive_transport::{ArcDialer, BOOTSTRAP_RETRY_INTERVAL, Discovery, InboundForwarder, PeerDialer};
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::loops::{run_reader, run_writer};

/// A fully wired, not-yet-running dataplane engine.
///
/// Built in two steps: [`Engine::bootstrap`] creates the real TUN interface
/// and kernel routes from `config`, then delegates to [`Engine::new`], which
/// wires the route table, transport, and discovery atop whatever `Device`
/// it's handed — a real `TunDevice` in production, an in-memory
/// `LoopbackDevice` pair in tests.
pub struct Engine {
    config: EngineConfig,
    device: Arc<dyn Device>,
    table: Arc<RouteTable>,
    dialer: Arc<ArcDialer>,
    discovery: Arc<Discovery>,
    endpoint: Endpoint,
    router: Router,
    shutdown_tx: broadcast::Sender<()>,
    inbound_connections: mpsc::Receiver<Connection>,
    interface_write_rx: mpsc::Receiver<Payload>,
}

impl Engine {
    /// Create and bring up the real TUN interface for `config`, install
    /// kernel routes for every configured remote prefix, and wire the
    /// dataplane atop it (§4.8 steps 1-2 plus the rest of [`Engine::new`]).
    pub async fn bootstrap(config: EngineConfig) -> EngineResult<Self> {
        let device = TunDevice::create(TunConfig {
            name: config.tun_name.clone(),
            mtu: config.mtu,
        })
        .map_err(EngineError::Device)?;

        let local_prefix = config.local_prefix()?;
        device.add_address(local_prefix).map_err(EngineError::InterfaceClosed)?;
        device.up().map_err(EngineError::InterfaceClosed)?;

        let route_entries = config.route_entries()?;
        for prefixes in route_entries.values() {
            for prefix in prefixes {
                nethive_device::install_route(&config.tun_name, *prefix).map_err(EngineError::Device)?;
            }
        }

        Self::new(config, Arc::new(device)).await
    }

    /// Wire the routing table, iroh endpoint, gossip-backed discovery, and
    /// inbound protocol handler atop an already-configured `device` (§4.8
    /// steps 3-6).
    pub async fn new(config: EngineConfig, device: Arc<dyn Device>) -> EngineResult<Self> {
        let route_entries = config.route_entries()?;
        let policy = RoutePolicy::build(route_entries).map_err(nethive_engine_config_error)?;
        let table = Arc::new(RouteTable::new(policy, config.chan_size));

        let secret_key = config.secret_key()?;
        let local_peer_id = PeerId::new(secret_key.public());

        let mut endpoint_builder = Endpoint::builder()
            .secret_key(secret_key)
            .alpns(vec![VPN_ALPN.to_vec(), GOSSIP_ALPN.to_vec()]);
        if config.enable_mdns {
            // `EnableMDNS` (§6): fold local-network discoveries into iroh's
            // own endpoint discovery rather than hand-rolling an mDNS
            // responder (§4.7) — discovered addresses land in iroh's
            // internal address book and are available the next time this
            // peer is dialed by id, independent of the gossip peerstore.
            endpoint_builder = endpoint_builder.discovery_local_network();
        }
        if !config.relays.is_empty() {
            // `Relays` (§6): explicit relay server URLs replace iroh's
            // default relay set entirely, the same all-or-nothing semantics
            // as `RelayMode::Custom`.
            let nodes = config
                .relays
                .iter()
                .filter_map(|url| match url.parse() {
                    Ok(parsed) => Some(parsed),
                    Err(_) => {
                        warn!(url, "ignoring unparsable relay url in config");
                        None
                    }
                })
                .collect::<Vec<_>>();
            endpoint_builder = endpoint_builder.relay_mode(RelayMode::Custom(RelayMap::from_iter(nodes)));
        }
        let endpoint = endpoint_builder
            .bind()
            .await
            .map_err(|e| EngineError::EndpointBind(e.to_string()))?;

        let gossip = Gossip::builder().spawn(endpoint.clone());
        let discovery = Arc::new(Discovery::new(gossip.clone(), local_peer_id));

        let (interface_write_tx, interface_write_rx) = mpsc::channel(config.chan_size);
        let (inbound_tx, inbound_connections) = mpsc::channel(config.chan_size);

        let peer_dialer = Arc::new(PeerDialer::new(
            endpoint.clone(),
            table.clone(),
            discovery.clone(),
            interface_write_tx,
        ));
        let dialer = Arc::new(ArcDialer::new(peer_dialer));

        let forwarder = InboundForwarder::new(inbound_tx);
        let router = Router::builder(endpoint.clone())
            .accept(VPN_ALPN, forwarder)
            .accept(GOSSIP_ALPN, gossip)
            .spawn();

        info!(peer = %local_peer_id, "engine wired, awaiting run()");

        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            config,
            device,
            table,
            dialer,
            discovery,
            endpoint,
            router,
            shutdown_tx,
            inbound_connections,
            interface_write_rx,
        })
    }

    /// A sender that can be cloned out to trigger shutdown from elsewhere
    /// (e.g. a `ctrl_c` handler in `main`).
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// The registered protocol router, kept alive for the engine's lifetime
    /// so inbound VPN and gossip connections keep being accepted.
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Start every long-lived task (§4.8 steps 6-7) and wait for a fatal
    /// error or the shutdown signal (§4.8 step 8), then tear down.
    pub async fn run(mut self) -> EngineResult<()> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        let (dispatcher_tx, dispatcher_rx) = mpsc::channel::<Payload>(self.config.chan_size);

        let reader_task = tokio::spawn(run_reader(
            self.device.clone(),
            self.config.enable_broadcast,
            dispatcher_tx,
        ));
        tokio::spawn(run_writer(self.device.clone(), self.interface_write_rx));

        let dialer_dyn: Arc<dyn Dialer> = self.dialer.clone();
        tokio::spawn(run_dispatcher(
            dispatcher_rx,
            self.table.clone(),
            dialer_dyn,
            DispatcherConfig {
                enable_broadcast: self.config.enable_broadcast,
            },
        ));

        let accept_loop_dialer = self.dialer.clone();
        tokio::spawn(async move {
            accept_loop_dialer
                .run_inbound_accept_loop(self.inbound_connections)
                .await
        });

        let bootstrap_ids = self.config.bootstrap_ids()?;
        let bootstrap_addrs: Vec<EndpointAddr> =
            bootstrap_ids.into_iter().map(EndpointAddr::new).collect();
        let discovery = self.discovery.clone();
        tokio::spawn(async move {
            if let Err(err) = discovery.bootstrap(bootstrap_addrs).await {
                warn!(error = %err, "discovery bootstrap failed permanently");
            }
        });

        if self.config.enable_auto_relay {
            // `EnableAutoRelay` (§4.7): keep iroh's address book warm with
            // every peer the discovery layer currently knows about, so
            // relayed connections stay viable even between direct dials.
            // iroh consumes `EndpointAddr`s directly; this task's only job
            // is to keep feeding it fresh ones.
            let discovery = self.discovery.clone();
            let endpoint = self.endpoint.clone();
            tokio::spawn(async move {
                loop {
                    for addr in discovery.relay_candidates() {
                        if let Err(err) = endpoint.add_node_addr(addr) {
                            warn!(error = %err, "failed to refresh relay candidate address");
                        }
                    }
                    tokio::time::sleep(BOOTSTRAP_RETRY_INTERVAL).await;
                }
            });
        }

        let result = tokio::select! {
            join_result = reader_task => {
                match join_result {
                    Ok(io_err) => Err(EngineError::InterfaceClosed(io_err)),
                    Err(join_err) => Err(EngineError::InterfaceClosed(std::io::Error::other(join_err))),
                }
            }
            _ = shutdown_rx.recv() => {
                info!("shutdown signal received, tearing down");
                Ok(())
            }
        };

        self.shutdown().await;
        result
    }

    /// Tear down the interface and the host (§4.8 shutdown).
    async fn shutdown(&self) {
        if let Err(err) = self.device.close() {
            warn!(error = %err, "error closing interface during shutdown");
        }
        self.endpoint.close().await;
    }
}

/// Lifts a `PolicyError` (from `RoutePolicy::build`, not the config loader
/// itself) into the engine's `ConfigError` composition.
fn nethive_engine_config_error(err: nethive_core::PolicyError) -> EngineError {
    EngineError::Config(crate::error::ConfigError::Policy(err))
}
