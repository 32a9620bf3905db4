use crate::InTransitData;
use crate::sim::SimTime;
use crate::trace::simulation_step::{
    DropReason, GenericPacketEvent, PacketDropped, PacketInTransit, SimulationStep,
    SimulationStepKind,
};
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Default)]
pub struct SimulationStepTracer {
    recorded_steps: Vec<SimulationStep>,
    already_warned_queue_full: HashSet<Arc<str>>,
}

impl SimulationStepTracer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_steps(self) -> Vec<SimulationStep> {
        self.recorded_steps
    }

    fn record(&mut self, now: SimTime, kind: SimulationStepKind) {
        self.recorded_steps.push(SimulationStep {
            relative_time: now.as_duration(),
            kind,
        });
    }

    fn generic_event(node_id: &Arc<str>, packet: &InTransitData) -> GenericPacketEvent {
        GenericPacketEvent {
            packet_id: packet.id,
            packet_number: packet.number,
            packet_size_bytes: packet.transmit.contents.len(),
            node_id: node_id.clone(),
        }
    }

    pub fn track_packet_sent(&mut self, now: SimTime, node_id: &Arc<str>, packet: &InTransitData) {
        let event = Self::generic_event(node_id, packet);
        self.record(now, SimulationStepKind::PacketSent(event));
    }

    pub fn track_packet_in_transit(
        &mut self,
        now: SimTime,
        node_id: &Arc<str>,
        link_id: &Arc<str>,
        packet: &InTransitData,
    ) {
        self.record(
            now,
            SimulationStepKind::PacketInTransit(PacketInTransit {
                packet_id: packet.id,
                node_id: node_id.clone(),
                link_id: link_id.clone(),
            }),
        );
    }

    pub fn track_packet_in_node(
        &mut self,
        now: SimTime,
        node_id: &Arc<str>,
        packet: &InTransitData,
    ) {
        let event = Self::generic_event(node_id, packet);
        self.record(now, SimulationStepKind::PacketInNode(event));
    }

    pub fn track_packet_forwarded(
        &mut self,
        now: SimTime,
        node_id: &Arc<str>,
        packet: &InTransitData,
    ) {
        let event = Self::generic_event(node_id, packet);
        self.record(now, SimulationStepKind::PacketForwarded(event));
    }

    pub fn track_delivered_to_application(
        &mut self,
        now: SimTime,
        node_id: &Arc<str>,
        packet: &InTransitData,
    ) {
        let event = Self::generic_event(node_id, packet);
        self.record(now, SimulationStepKind::PacketDeliveredToApplication(event));
    }

    pub fn track_dropped(
        &mut self,
        now: SimTime,
        node_id: &Arc<str>,
        packet: &InTransitData,
        reason: DropReason,
    ) {
        self.record(
            now,
            SimulationStepKind::PacketDropped(PacketDropped {
                packet_id: packet.id,
                packet_size_bytes: packet.transmit.contents.len(),
                node_id: node_id.clone(),
                reason,
            }),
        );

        match reason {
            DropReason::QueueFull => {
                let first_dropped = self.already_warned_queue_full.insert(node_id.clone());
                if first_dropped {
                    tracing::warn!(
                        "{now} packet #{} dropped by node `{node_id}` because its transmit queue was full (further warnings for this node will be omitted)",
                        packet.number,
                    );
                }
            }
            reason => tracing::debug!(
                "{now} packet #{} dropped by node `{node_id}`: {reason}",
                packet.number,
            ),
        }
    }
}
