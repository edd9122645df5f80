//! # NetHive routing
//!
//! The concurrent route table (C2) and the route dispatcher (C4): binding
//! overlay destinations and peer identities to live per-peer packet
//! channels, and deciding, per packet, where it goes.

pub mod dialer;
pub mod dispatcher;
pub mod table;

pub use dialer::Dialer;
pub use dispatcher::{DispatcherConfig, run_dispatcher};
pub use table::{ChannelReceiver, ChannelSender, RouteTable};
