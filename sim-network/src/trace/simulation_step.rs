use serde::{Deserialize, Serialize};
use serde_with::{DisplayFromStr, DurationNanoSeconds, serde_as};
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[serde_as]
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SimulationStep {
    #[serde_as(as = "DurationNanoSeconds")]
    #[serde(rename = "relative_time_ns")]
    pub relative_time: Duration,
    #[serde(flatten)]
    pub kind: SimulationStepKind,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type", content = "data")]
pub enum SimulationStepKind {
    /// The packet was handed to the network by an application
    PacketSent(GenericPacketEvent),
    /// The packet is being transferred over a link
    PacketInTransit(PacketInTransit),
    /// The packet arrived at one of the network nodes
    PacketInNode(GenericPacketEvent),
    /// The packet was sent onwards by a node that is not its destination
    PacketForwarded(GenericPacketEvent),
    /// The packet was dropped by one of the network nodes
    PacketDropped(PacketDropped),
    /// The packet has been delivered to an application
    PacketDeliveredToApplication(GenericPacketEvent),
}

#[serde_as]
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenericPacketEvent {
    #[serde_as(as = "DisplayFromStr")]
    pub packet_id: Uuid,
    pub packet_number: u64,
    pub packet_size_bytes: usize,
    #[serde(with = "crate::util::serde_arc_str")]
    pub node_id: Arc<str>,
}

#[serde_as]
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PacketDropped {
    #[serde_as(as = "DisplayFromStr")]
    pub packet_id: Uuid,
    pub packet_size_bytes: usize,
    #[serde(with = "crate::util::serde_arc_str")]
    pub node_id: Arc<str>,
    pub reason: DropReason,
}

#[serde_as]
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PacketInTransit {
    #[serde_as(as = "DisplayFromStr")]
    pub packet_id: Uuid,
    #[serde(with = "crate::util::serde_arc_str")]
    pub node_id: Arc<str>,
    #[serde(with = "crate::util::serde_arc_str")]
    pub link_id: Arc<str>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// The transmit queue of the outgoing device was full
    QueueFull,
    /// The csma device gave up after too many backoff attempts
    BackoffExhausted,
    /// The node has no route towards the destination
    NoRoute,
    /// The packet's time to live reached zero
    TtlExpired,
    /// No socket is bound to the destination port
    PortUnreachable,
    /// The packet reached a node without an internet stack
    NoStack,
}

impl Display for DropReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let reason = match self {
            DropReason::QueueFull => "transmit queue full",
            DropReason::BackoffExhausted => "too many backoff attempts",
            DropReason::NoRoute => "no route to destination",
            DropReason::TtlExpired => "ttl expired",
            DropReason::PortUnreachable => "port unreachable",
            DropReason::NoStack => "no internet stack",
        };

        f.write_str(reason)
    }
}
