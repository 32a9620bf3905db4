use crate::trace::simulation_step::{SimulationStep, SimulationStepKind};
use crate::trace::stats::{NetworkStats, NodeStats};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Replays recorded steps to answer questions about what happened during a simulation
#[derive(Clone, Default)]
pub struct SimulationStepper {
    steps: Vec<SimulationStep>,
}

impl SimulationStepper {
    pub fn new(steps: Vec<SimulationStep>) -> Self {
        Self { steps }
    }

    /// Ids of the packets sent by applications, in sending order
    pub fn sent_packets(&self) -> Vec<(Duration, Uuid)> {
        self.steps
            .iter()
            .filter_map(|s| match &s.kind {
                SimulationStepKind::PacketSent(sent) => Some((s.relative_time, sent.packet_id)),
                _ => None,
            })
            .collect()
    }

    pub fn get_packet_hops(&self, id: Uuid) -> Vec<(Duration, Arc<str>)> {
        let mut hops = Vec::new();
        for step in &self.steps {
            match &step.kind {
                SimulationStepKind::PacketInNode(s) if s.packet_id == id => {
                    hops.push((step.relative_time, s.node_id.clone()));
                }
                _ => {}
            }
        }

        hops
    }

    pub fn get_packet_path(&self, id: Uuid) -> Vec<Arc<str>> {
        self.get_packet_hops(id)
            .into_iter()
            .map(|(_, node_id)| node_id)
            .collect()
    }

    pub fn get_packet_arrived_at(&self, packet_id: Uuid, node_id: &str) -> Option<Duration> {
        self.steps
            .iter()
            .filter_map(|s| match &s.kind {
                SimulationStepKind::PacketInNode(kind)
                    if kind.packet_id == packet_id && kind.node_id.as_ref() == node_id =>
                {
                    Some(s.relative_time)
                }
                _ => None,
            })
            .next()
    }

    pub fn get_packet_delivered_at(&self, packet_id: Uuid) -> Option<(Duration, Arc<str>)> {
        self.steps.iter().find_map(|s| match &s.kind {
            SimulationStepKind::PacketDeliveredToApplication(delivered)
                if delivered.packet_id == packet_id =>
            {
                Some((s.relative_time, delivered.node_id.clone()))
            }
            _ => None,
        })
    }

    /// Aggregates the recorded steps into per-node counters
    pub fn stats(&self, node_ids: &[Arc<str>]) -> NetworkStats {
        let mut stats = NetworkStats::default();
        for node_id in node_ids {
            stats
                .stats_by_node
                .insert(node_id.clone(), NodeStats::default());
        }

        for step in &self.steps {
            let (node_id, size) = match &step.kind {
                SimulationStepKind::PacketSent(e)
                | SimulationStepKind::PacketInNode(e)
                | SimulationStepKind::PacketForwarded(e)
                | SimulationStepKind::PacketDeliveredToApplication(e) => {
                    (&e.node_id, e.packet_size_bytes)
                }
                SimulationStepKind::PacketDropped(e) => (&e.node_id, e.packet_size_bytes),
                SimulationStepKind::PacketInTransit(_) => continue,
            };

            let node_stats = stats.stats_by_node.entry(node_id.clone()).or_default();
            let counter = match &step.kind {
                SimulationStepKind::PacketSent(_) => &mut node_stats.sent,
                SimulationStepKind::PacketInNode(_) => &mut node_stats.received,
                SimulationStepKind::PacketForwarded(_) => &mut node_stats.forwarded,
                SimulationStepKind::PacketDeliveredToApplication(_) => &mut node_stats.delivered,
                SimulationStepKind::PacketDropped(_) => &mut node_stats.dropped,
                SimulationStepKind::PacketInTransit(_) => continue,
            };

            counter.track_one(size);
        }

        stats
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::trace::simulation_step::{DropReason, GenericPacketEvent, PacketDropped};
    use crate::trace::stats::PacketStats;

    fn event(id: u128, node: &str) -> GenericPacketEvent {
        GenericPacketEvent {
            packet_id: Uuid::from_u128(id),
            packet_number: id as u64,
            packet_size_bytes: 100,
            node_id: node.into(),
        }
    }

    fn step(ns: u64, kind: SimulationStepKind) -> SimulationStep {
        SimulationStep {
            relative_time: Duration::from_nanos(ns),
            kind,
        }
    }

    fn stepper() -> SimulationStepper {
        SimulationStepper::new(vec![
            step(0, SimulationStepKind::PacketSent(event(1, "n0"))),
            step(10, SimulationStepKind::PacketInNode(event(1, "n1"))),
            step(10, SimulationStepKind::PacketForwarded(event(1, "n1"))),
            step(20, SimulationStepKind::PacketInNode(event(1, "n2"))),
            step(
                20,
                SimulationStepKind::PacketDeliveredToApplication(event(1, "n2")),
            ),
            step(30, SimulationStepKind::PacketSent(event(2, "n0"))),
            step(
                30,
                SimulationStepKind::PacketDropped(PacketDropped {
                    packet_id: Uuid::from_u128(2),
                    packet_size_bytes: 100,
                    node_id: "n0".into(),
                    reason: DropReason::NoRoute,
                }),
            ),
        ])
    }

    #[test]
    fn test_packet_path() {
        let stepper = stepper();
        let id = Uuid::from_u128(1);
        assert_eq!(
            stepper
                .get_packet_path(id)
                .iter()
                .map(|n| n.as_ref())
                .collect::<Vec<_>>(),
            vec!["n1", "n2"]
        );
        assert_eq!(
            stepper.get_packet_arrived_at(id, "n2"),
            Some(Duration::from_nanos(20))
        );
        assert_eq!(stepper.get_packet_arrived_at(id, "n0"), None);
        assert_eq!(
            stepper.get_packet_delivered_at(id).map(|(t, _)| t),
            Some(Duration::from_nanos(20))
        );
        assert_eq!(stepper.sent_packets().len(), 2);
    }

    #[test]
    fn test_stats_by_node() {
        let node_ids: Vec<Arc<str>> = vec!["n0".into(), "n1".into(), "n2".into(), "n3".into()];
        let stats = stepper().stats(&node_ids);

        let n0 = &stats.stats_by_node["n0"];
        assert_eq!(n0.sent.packets, 2);
        assert_eq!(n0.dropped.packets, 1);
        assert_eq!(n0.dropped.bytes, 100);

        let n1 = &stats.stats_by_node["n1"];
        assert_eq!(n1.received.packets, 1);
        assert_eq!(n1.forwarded.packets, 1);

        let n2 = &stats.stats_by_node["n2"];
        assert_eq!(n2.delivered.packets, 1);

        let n3 = &stats.stats_by_node["n3"];
        assert_eq!(n3.received, PacketStats::default());
    }
}
