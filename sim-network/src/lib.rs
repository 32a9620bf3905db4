pub mod application;
pub mod engine;
pub mod error;
pub mod network;
pub mod pcap_exporter;
pub mod sim;
pub mod trace;
pub mod transmit;
mod util;

use crate::transmit::OwnedTransmit;
use std::net::SocketAddrV4;

/// A UDP datagram on its way through the network
#[derive(Clone, Debug)]
pub struct InTransitData {
    pub(crate) id: uuid::Uuid,
    pub(crate) number: u64,
    pub(crate) source: SocketAddrV4,
    pub(crate) ttl: u8,
    pub(crate) transmit: OwnedTransmit,
}

impl InTransitData {
    pub fn id(&self) -> uuid::Uuid {
        self.id
    }

    pub fn source(&self) -> SocketAddrV4 {
        self.source
    }

    pub fn destination(&self) -> SocketAddrV4 {
        self.transmit.destination
    }
}
