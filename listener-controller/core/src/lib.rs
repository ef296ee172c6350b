//! Mesh listener controller model.
//!
//! This crate holds the vocabulary shared by the listener synthesis engine and its callers:
//!
//! - The read-only inputs of a computation: a [`proxy::Proxy`] (its addresses, interception
//!   mode, sidecar scope and service instances) and a [`push::PushContext`] snapshot of the mesh
//!   (services, gateways, peer authentication and mesh-wide settings).
//! - The output of a computation: [`listener::Listener`]s, each holding ordered
//!   [`listener::FilterChain`]s selected by a [`FilterChainMatch`].
//! - The capability interfaces the engine calls into: [`plugin::Plugin`] and
//!   [`patch::ListenerPatcher`].
//!
//! Nothing in this crate performs I/O; every type is a plain value that can be shared across
//! threads and (de)serialized with `serde`.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod config;
pub mod duration;
mod filter_chain_match;
pub mod gateway;
pub mod listener;
pub mod patch;
pub mod plugin;
pub mod protocol;
pub mod proxy;
pub mod push;
pub mod service;

pub use self::{
    config::Config,
    filter_chain_match::{FilterChainMatch, SourceType, TransportProtocol},
    protocol::{ListenerProtocol, Protocol, TrafficDirection},
};
pub use ipnet::{IpNet, Ipv4Net, Ipv6Net};

/// ALPN values the HTTP inspector reports for plaintext HTTP traffic.
pub const PLAINTEXT_HTTP_ALPNS: [&str; 3] = ["http/1.0", "http/1.1", "h2c"];

/// ALPN values mesh clients advertise when wrapping HTTP in mutual TLS.
pub const MTLS_HTTP_ALPNS: [&str; 3] = ["istio-http/1.0", "istio-http/1.1", "istio-h2"];

/// ALPN values mesh clients advertise when wrapping opaque TCP in mutual TLS.
pub const MTLS_TCP_ALPNS: [&str; 2] = ["istio-peer-exchange", "istio"];
