//! # tunmux
//!
//! Relays TCP flows taken from a virtual network interface to an upstream:
//! a direct dial, a SOCKS5 proxy, or a remote peer reached over a single
//! multiplexed transport.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │   Network stack (accepted flows, readiness, byte I/O)   │
//! ├─────────────────────────────────────────────────────────┤
//! │   Flow forwarder (dial + bidirectional splice)          │
//! ├─────────────────────────────────────────────────────────┤
//! │   Dialer: direct │ SOCKS5 │ multiplexer client          │
//! ├─────────────────────────────────────────────────────────┤
//! │   Multiplexer (id + control tag frames, one writer)     │
//! ├─────────────────────────────────────────────────────────┤
//! │   Transport (TCP records or WebSocket binary messages)  │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! On the remote side a [`MuxServer`](mux::MuxServer) terminates the
//! transport and dials the real destinations.

#![deny(unsafe_code)]
#![warn(rust_2018_idioms)]

pub mod config;
pub mod dialer;
pub mod error;
pub mod forward;
pub mod mux;
pub mod transport;

pub use config::{Config, Role, Upstream};
pub use dialer::{BoxedStream, Dialer, DirectDialer, Socks5Dialer};
pub use error::{Error, Result};
pub use forward::{forward, serve_flows, Flow, FlowListener, SpliceStats};
pub use mux::{Endpoint, MuxClient, MuxConfig};

#[cfg(feature = "server")]
pub use mux::MuxServer;
