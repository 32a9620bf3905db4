use crate::InTransitData;
use crate::network::channel::LinkKind;
use crate::transmit::UDP_HEADER_SIZE;
use pnet_base::MacAddr;
use pnet_packet::MutablePacket;
use pnet_packet::ethernet::{EtherTypes, MutableEthernetPacket};
use pnet_packet::ip::IpNextHeaderProtocols;
use pnet_packet::ipv4::MutableIpv4Packet;
use pnet_packet::udp::MutableUdpPacket;
use pnet_packet::{PacketSize, ipv4, udp};

pub const PPP_HEADER_SIZE: usize = 2;
pub const PPP_PROTOCOL_IPV4: u16 = 0x0021;
pub const ETHERNET_HEADER_SIZE: usize = 14;
pub const ETHERNET_MIN_PAYLOAD_SIZE: usize = 46;
pub const ETHERNET_TRAILER_SIZE: usize = 4;

/// A datagram wrapped for transmission over a specific link
#[derive(Clone, Debug)]
pub struct Frame {
    pub(crate) data: InTransitData,
    pub(crate) source_mac: MacAddr,
    pub(crate) destination_mac: MacAddr,
}

impl Frame {
    /// Number of bytes that occupy the medium while this frame is transmitted
    pub fn wire_size(&self, kind: LinkKind) -> usize {
        let ip_size = self.data.transmit.packet_size();
        match kind {
            LinkKind::PointToPoint => PPP_HEADER_SIZE + ip_size,
            LinkKind::Csma => {
                ETHERNET_HEADER_SIZE
                    + ip_size.max(ETHERNET_MIN_PAYLOAD_SIZE)
                    + ETHERNET_TRAILER_SIZE
            }
        }
    }

    /// Whether a device with the given mac should accept this frame
    pub fn is_addressed_to(&self, mac: MacAddr) -> bool {
        self.destination_mac == mac || self.destination_mac == MacAddr::broadcast()
    }

    /// Serializes the frame as it would be captured on a device of the given kind
    pub fn to_bytes(&self, kind: LinkKind) -> Vec<u8> {
        let ip_packet = ipv4_udp_packet(&self.data);
        match kind {
            LinkKind::PointToPoint => {
                let mut frame = Vec::with_capacity(PPP_HEADER_SIZE + ip_packet.len());
                frame.extend_from_slice(&PPP_PROTOCOL_IPV4.to_be_bytes());
                frame.extend_from_slice(&ip_packet);
                frame
            }
            LinkKind::Csma => {
                let payload_size = ip_packet.len().max(ETHERNET_MIN_PAYLOAD_SIZE);
                let mut buffer = vec![0; ETHERNET_HEADER_SIZE + payload_size];
                let mut ethernet_writer = MutableEthernetPacket::new(&mut buffer)
                    .expect("buffer holds at least an ethernet header");
                ethernet_writer.set_destination(self.destination_mac);
                ethernet_writer.set_source(self.source_mac);
                ethernet_writer.set_ethertype(EtherTypes::Ipv4);
                ethernet_writer.payload_mut()[..ip_packet.len()].copy_from_slice(&ip_packet);
                buffer
            }
        }
    }
}

/// Wraps the datagram's contents in UDP and IPv4 headers
pub fn ipv4_udp_packet(data: &InTransitData) -> Vec<u8> {
    let source = data.source;
    let destination = data.transmit.destination;
    let contents = &data.transmit.contents;

    let udp_packet_length = UDP_HEADER_SIZE + contents.len();
    let mut udp_buffer = vec![0; udp_packet_length];
    let mut udp_writer =
        MutableUdpPacket::new(&mut udp_buffer).expect("buffer holds at least a udp header");
    udp_writer.set_source(source.port());
    udp_writer.set_destination(destination.port());
    udp_writer.set_length(udp_packet_length as u16);
    udp_writer.set_payload(contents);
    let checksum = udp::ipv4_checksum(&udp_writer.to_immutable(), source.ip(), destination.ip());
    udp_writer.set_checksum(checksum);
    drop(udp_writer);

    let ip_packet_length = data.transmit.packet_size();
    let mut ip_buffer = vec![0; ip_packet_length];
    let mut ip_writer =
        MutableIpv4Packet::new(&mut ip_buffer).expect("buffer holds at least an ipv4 header");
    ip_writer.set_version(4);
    ip_writer.set_header_length(5); // No options
    ip_writer.set_dscp(0);
    ip_writer.set_ecn(0);
    ip_writer.set_identification((data.number & 0xffff) as u16);
    ip_writer.set_flags(0);
    ip_writer.set_fragment_offset(0);
    ip_writer.set_ttl(data.ttl);
    ip_writer.set_next_level_protocol(IpNextHeaderProtocols::Udp);
    ip_writer.set_source(*source.ip());
    ip_writer.set_destination(*destination.ip());
    ip_writer.set_total_length(ip_packet_length as u16);
    ip_writer.set_payload(&udp_buffer);
    let checksum = ipv4::checksum(&ip_writer.to_immutable());
    ip_writer.set_checksum(checksum);
    let ip_packet_length = ip_writer.packet_size();
    drop(ip_writer);

    ip_buffer.truncate(ip_packet_length);
    ip_buffer
}

/// Deterministic mac address for the `index`-th device created (starting at 1)
pub fn allocate_mac(index: u64) -> MacAddr {
    let b = index.to_be_bytes();
    MacAddr::new(b[2], b[3], b[4], b[5], b[6], b[7])
}
