use std::collections::HashMap;
use std::sync::Arc;

#[derive(Default)]
pub struct NetworkStats {
    pub stats_by_node: HashMap<Arc<str>, NodeStats>,
}

#[derive(Default)]
pub struct NodeStats {
    /// Packets originated by applications running on this node
    pub sent: PacketStats,
    /// Packets that arrived at this node, whatever happened to them afterwards
    pub received: PacketStats,
    pub forwarded: PacketStats,
    pub delivered: PacketStats,
    pub dropped: PacketStats,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct PacketStats {
    pub packets: u64,
    pub bytes: usize,
}

impl PacketStats {
    pub fn track_one(&mut self, size_bytes: usize) {
        self.packets += 1;
        self.bytes += size_bytes;
    }
}
