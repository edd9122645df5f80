//! # NetHive transport
//!
//! The `iroh`-backed half of the dataplane: identity-bound streams, discovery
//! (C7), the peer dialer and inbound handler (C5), and the per-peer stream
//! session (C6).
//!
//! This crate depends on `nethive-core` and `nethive-routing` but not on
//! `nethive-engine`; it only knows how to turn a `RouteTable` and a `Dialer`
//! contract into live network behavior.

pub mod dialer;
pub mod discovery;
pub mod error;
pub mod framing;
pub mod session;

pub use dialer::{ArcDialer, InboundForwarder, PeerDialer};
pub use discovery::{BOOTSTRAP_RETRY_INTERVAL, Discovery, PeerEvent, PeerInfo};
pub use error::{TransportError, TransportResult};
pub use framing::{FrameResult, FramingError, MAX_MESSAGE_SIZE, frame, try_parse_frame};
