use crate::engine::{ChannelId, DeviceId, NodeId};
use crate::network::channel::LinkKind;
use crate::network::ip::Ipv4Cidr;
use crate::network::queue::DropTailQueue;
use crate::pcap_exporter::PcapExporter;
use pnet_base::MacAddr;

/// A node's attachment to a channel
pub struct NetDevice {
    pub(crate) id: DeviceId,
    pub(crate) node: NodeId,
    /// Position of this device among the devices of its node
    pub(crate) index: usize,
    pub(crate) channel: ChannelId,
    pub(crate) kind: LinkKind,
    pub(crate) mac: MacAddr,
    pub(crate) address: Option<Ipv4Cidr>,
    pub(crate) queue: DropTailQueue,
    pub(crate) transmitting: bool,
    /// A retry is scheduled because the medium was busy
    pub(crate) backoff_pending: bool,
    pub(crate) backoff_attempts: u32,
    pub(crate) capture: Option<DeviceCapture>,
}

pub(crate) struct DeviceCapture {
    pub(crate) file_name: String,
    pub(crate) exporter: PcapExporter,
    pub(crate) promiscuous: bool,
}

impl NetDevice {
    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn kind(&self) -> LinkKind {
        self.kind
    }

    pub fn mac(&self) -> MacAddr {
        self.mac
    }

    pub fn address(&self) -> Option<Ipv4Cidr> {
        self.address
    }

    /// Whether a frame sent to `destination` should show up in this device's capture
    pub(crate) fn captures(&self, destination: MacAddr) -> bool {
        match &self.capture {
            None => false,
            Some(capture) => {
                self.kind == LinkKind::PointToPoint
                    || capture.promiscuous
                    || destination == self.mac
                    || destination == MacAddr::broadcast()
            }
        }
    }
}
