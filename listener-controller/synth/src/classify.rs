use mesh_listener_controller_core::{Config, ListenerProtocol, Protocol, TrafficDirection};

/// Maps a port's declared protocol to the protocol its listener is built for.
///
/// Ports with no usable protocol are sniffed at connection time when detection is enabled for
/// the traffic direction and are otherwise proxied as opaque TCP.
pub fn listener_protocol(
    protocol: Protocol,
    direction: TrafficDirection,
    config: &Config,
) -> ListenerProtocol {
    if protocol.is_http() {
        return ListenerProtocol::Http;
    }
    if protocol.is_thrift() {
        return ListenerProtocol::Thrift;
    }
    if protocol.is_tcp() || !config.sniffs(direction) {
        return ListenerProtocol::Tcp;
    }
    ListenerProtocol::Auto
}
