use crate::engine::{DeviceId, NodeId};
use crate::network::ip::Ipv4Cidr;
use std::net::Ipv4Addr;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while parsing link attribute values such as `5Mbps` or `2ms`
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AttributeError {
    #[error("invalid data rate `{0}` (expected a number followed by a unit, e.g. `5Mbps`)")]
    InvalidDataRate(String),
    #[error("data rate must be greater than zero, got `{0}`")]
    ZeroDataRate(String),
    #[error("invalid time `{0}` (expected a number followed by a unit, e.g. `2ms`)")]
    InvalidTime(String),
}

#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("node `{0}` does not exist")]
    UnknownNode(NodeId),
    #[error("device `{0}` does not exist")]
    UnknownDevice(DeviceId),
    #[error("a point-to-point link needs two distinct nodes, but both ends are `{0}`")]
    PointToPointLoop(NodeId),
    #[error("a csma channel needs at least one node")]
    EmptyCsmaChannel,
    #[error("node `{0}` already has an internet stack")]
    StackAlreadyInstalled(NodeId),
    #[error("node `{0}` has no internet stack")]
    MissingStack(NodeId),
    #[error("device `{0}` already has an address")]
    DeviceAlreadyAddressed(DeviceId),
    #[error("address {0} is already assigned to another device")]
    DuplicateAddress(Ipv4Addr),
    #[error("address block {0} has no host addresses left")]
    AddressBlockExhausted(Ipv4Cidr),
    #[error("{0} is not a valid network mask")]
    InvalidNetworkMask(Ipv4Addr),
    #[error("application stop time ({stop:?}) is earlier than its start time ({start:?})")]
    InvalidWindow { start: Duration, stop: Duration },
    #[error("routing tables cannot be computed before addresses are assigned")]
    NoAddressesAssigned,
    #[error("packet capture is already enabled for device `{0}`")]
    PcapAlreadyEnabled(DeviceId),
    #[error("port {port} is already bound on node `{node}`")]
    PortInUse { node: NodeId, port: u16 },
    #[error("payloads of {size} bytes do not fit in a udp datagram (at most {max} bytes)")]
    PayloadTooLarge { size: usize, max: usize },
    #[error("node `{0}` has no ephemeral ports left")]
    EphemeralPortsExhausted(NodeId),
    #[error(transparent)]
    Attribute(#[from] AttributeError),
}
