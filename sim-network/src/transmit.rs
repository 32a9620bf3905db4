use std::net::SocketAddrV4;

pub const IPV4_HEADER_SIZE: usize = 20;
pub const UDP_HEADER_SIZE: usize = 8;
pub const DEFAULT_TTL: u8 = 64;
/// Largest payload that fits in a single IPv4 datagram
pub const MAX_UDP_PAYLOAD_SIZE: usize = u16::MAX as usize - IPV4_HEADER_SIZE - UDP_HEADER_SIZE;

#[derive(Clone, Debug)]
pub struct OwnedTransmit {
    /// The socket this datagram should be sent to
    pub destination: SocketAddrV4,
    /// Contents of the datagram
    pub contents: Vec<u8>,
}

impl OwnedTransmit {
    /// Size of the resulting IPv4 packet, headers included
    pub fn packet_size(&self) -> usize {
        IPV4_HEADER_SIZE + UDP_HEADER_SIZE + self.contents.len()
    }
}
