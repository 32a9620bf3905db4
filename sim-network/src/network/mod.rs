//! In-memory network implementation
//!
//! Nodes are attached to point-to-point or csma channels through devices. Datagrams travel as
//! frames through each device's drop-tail queue, occupy the medium for their transmission time,
//! and reach the other end after the channel's propagation delay. Everything runs on a single
//! [`Scheduler`], so a simulation is fully deterministic for a given rng seed.

pub mod channel;
pub mod device;
pub mod frame;
pub mod ip;
pub mod node;
pub mod queue;
pub mod route;
pub mod spec;

use crate::InTransitData;
use crate::application::{AppAction, AppContext, Application, ApplicationSpec};
use crate::engine::{
    ActiveWindow, AppId, ApplicationReport, ChannelId, DeviceId, NodeId, SimulationEngine,
    SimulationReport,
};
use crate::error::NetworkError;
use crate::network::channel::{Channel, LinkKind, MAX_BACKOFF_ATTEMPTS, backoff_duration};
use crate::network::device::{DeviceCapture, NetDevice};
use crate::network::frame::{Frame, allocate_mac};
use crate::network::ip::AddressBlock;
use crate::network::node::{InternetStack, Node};
use crate::network::queue::DropTailQueue;
use crate::network::route::{RoutingTable, compute_global_routes};
use crate::network::spec::LinkSpec;
use crate::pcap_exporter::PcapExporterFactory;
use crate::sim::{EventId, Scheduler, SimTime};
use crate::trace::simulation_step::DropReason;
use crate::trace::tracer::SimulationStepTracer;
use crate::transmit::{DEFAULT_TTL, MAX_UDP_PAYLOAD_SIZE, OwnedTransmit};
use anyhow::Context;
use fastrand::Rng;
use pcap_file::DataLink;
use pnet_base::MacAddr;
use std::collections::{HashMap, HashSet};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

type NetworkScheduler = Scheduler<InMemoryNetwork>;

struct InstalledApplication {
    id: AppId,
    node: NodeId,
    window: ActiveWindow,
    app: Box<dyn Application>,
    port: Option<u16>,
    active: bool,
    pending_timers: HashMap<u64, EventId>,
}

pub struct InMemoryNetwork {
    nodes: Vec<Node>,
    devices: Vec<NetDevice>,
    channels: Vec<Channel>,
    applications: Vec<InstalledApplication>,
    assigned_addresses: HashSet<Ipv4Addr>,
    pcap_exporter_factory: Arc<dyn PcapExporterFactory>,
    tracer: SimulationStepTracer,
    rng: Rng,
    next_packet_number: u64,
    next_timer_token: u64,
    fatal_error: Option<anyhow::Error>,
}

impl InMemoryNetwork {
    pub fn new(pcap_exporter_factory: Arc<dyn PcapExporterFactory>, rng: Rng) -> Self {
        Self {
            nodes: Vec::new(),
            devices: Vec::new(),
            channels: Vec::new(),
            applications: Vec::new(),
            assigned_addresses: HashSet::new(),
            pcap_exporter_factory,
            tracer: SimulationStepTracer::new(),
            rng,
            next_packet_number: 0,
            next_timer_token: 0,
            fatal_error: None,
        }
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn devices(&self) -> &[NetDevice] {
        &self.devices
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn node(&self, id: NodeId) -> Result<&Node, NetworkError> {
        self.nodes.get(id.0).ok_or(NetworkError::UnknownNode(id))
    }

    pub fn device(&self, id: DeviceId) -> Result<&NetDevice, NetworkError> {
        self.devices.get(id.0).ok_or(NetworkError::UnknownDevice(id))
    }

    pub fn routing_table(&self, id: NodeId) -> Result<&RoutingTable, NetworkError> {
        let node = self.node(id)?;
        node.stack
            .as_ref()
            .map(|stack| &stack.routes)
            .ok_or(NetworkError::MissingStack(id))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, NetworkError> {
        self.nodes.get_mut(id.0).ok_or(NetworkError::UnknownNode(id))
    }

    fn add_channel(&mut self, kind: LinkKind, spec: &LinkSpec) -> ChannelId {
        let id = ChannelId(self.channels.len());
        self.channels.push(Channel::new(id, kind, spec.clone()));
        id
    }

    fn add_device(&mut self, node: NodeId, channel: ChannelId) -> DeviceId {
        let id = DeviceId(self.devices.len());
        let channel = &mut self.channels[channel.0];
        let node = &mut self.nodes[node.0];

        self.devices.push(NetDevice {
            id,
            node: node.id,
            index: node.devices.len(),
            channel: channel.id,
            kind: channel.kind,
            mac: allocate_mac(id.0 as u64 + 1),
            address: None,
            queue: DropTailQueue::new(channel.spec.queue_size_packets),
            transmitting: false,
            backoff_pending: false,
            backoff_attempts: 0,
            capture: None,
        });
        node.devices.push(id);
        channel.devices.push(id);

        id
    }

    fn owns_address(&self, node: NodeId, ip: Ipv4Addr) -> bool {
        self.nodes[node.0]
            .devices
            .iter()
            .any(|d| self.devices[d.0].address.is_some_and(|a| a.address == ip))
    }

    fn fail(&mut self, sched: &mut NetworkScheduler, error: anyhow::Error) {
        if self.fatal_error.is_none() {
            self.fatal_error = Some(error);
        }

        sched.stop();
    }

    fn next_packet_id(&mut self) -> uuid::Uuid {
        uuid::Builder::from_random_bytes(self.rng.u128(..).to_le_bytes()).into_uuid()
    }

    // Applications

    fn start_application(&mut self, sched: &mut NetworkScheduler, app: AppId) {
        let installed = &mut self.applications[app.0];
        // Empty windows never start
        if sched.now() >= SimTime::from_duration(installed.window.stop()) {
            return;
        }

        installed.active = true;
        self.with_application(sched, app, |app, ctx| app.start(ctx));
    }

    fn stop_application(&mut self, sched: &mut NetworkScheduler, app: AppId) {
        let installed = &mut self.applications[app.0];
        installed.active = false;
        for (_, timer) in installed.pending_timers.drain() {
            sched.cancel(timer);
        }

        self.with_application(sched, app, |app, ctx| app.stop(ctx));
    }

    fn fire_timer(&mut self, sched: &mut NetworkScheduler, app: AppId, token: u64) {
        let installed = &mut self.applications[app.0];
        installed.pending_timers.remove(&token);
        if installed.active {
            self.with_application(sched, app, |app, ctx| app.on_timer(ctx));
        }
    }

    fn with_application(
        &mut self,
        sched: &mut NetworkScheduler,
        app: AppId,
        f: impl FnOnce(&mut dyn Application, &mut AppContext),
    ) {
        let installed = &mut self.applications[app.0];
        let mut ctx = AppContext::new(sched.now(), installed.node);
        f(installed.app.as_mut(), &mut ctx);

        for action in ctx.actions {
            if let Err(e) = self.apply_action(sched, app, action) {
                let node = self.applications[app.0].node;
                let context = format!("application {app} on node {node} failed");
                self.fail(sched, anyhow::Error::new(e).context(context));
                return;
            }

            if self.fatal_error.is_some() {
                return;
            }
        }
    }

    fn apply_action(
        &mut self,
        sched: &mut NetworkScheduler,
        app: AppId,
        action: AppAction,
    ) -> Result<(), NetworkError> {
        let node = self.applications[app.0].node;
        match action {
            AppAction::Bind(port) => {
                self.bind(app, port)?;
            }
            AppAction::Unbind => {
                if let Some(port) = self.applications[app.0].port.take() {
                    self.nodes[node.0].stack_mut()?.unbind(port);
                }
            }
            AppAction::SendTo {
                destination,
                contents,
            } => {
                let port = match self.applications[app.0].port {
                    Some(port) => port,
                    None => self.bind(app, None)?,
                };

                self.udp_send(sched, node, port, OwnedTransmit {
                    destination,
                    contents,
                });
            }
            AppAction::ScheduleTimer(delay) => {
                let token = self.next_timer_token;
                self.next_timer_token += 1;
                let event = sched.schedule(delay, move |net, s| net.fire_timer(s, app, token));
                self.applications[app.0]
                    .pending_timers
                    .insert(token, event);
            }
        }

        Ok(())
    }

    fn bind(&mut self, app: AppId, port: Option<u16>) -> Result<u16, NetworkError> {
        let node = self.applications[app.0].node;
        let port = self.nodes[node.0].stack_mut()?.bind(node, port, app)?;
        self.applications[app.0].port = Some(port);
        Ok(port)
    }

    // Sending

    fn udp_send(
        &mut self,
        sched: &mut NetworkScheduler,
        node: NodeId,
        source_port: u16,
        transmit: OwnedTransmit,
    ) {
        let destination = *transmit.destination.ip();
        let source_ip = self.nodes[node.0]
            .stack
            .as_ref()
            .and_then(|stack| stack.routes.lookup(destination))
            .and_then(|route| self.devices[route.device.0].address)
            .map(|cidr| cidr.address)
            .unwrap_or(Ipv4Addr::UNSPECIFIED);

        let data = InTransitData {
            id: self.next_packet_id(),
            number: self.next_packet_number,
            source: SocketAddrV4::new(source_ip, source_port),
            ttl: DEFAULT_TTL,
            transmit,
        };
        self.next_packet_number += 1;

        let now = sched.now();
        self.tracer
            .track_packet_sent(now, &self.nodes[node.0].name, &data);

        if self.owns_address(node, destination) {
            sched.schedule(Duration::ZERO, move |net, s| {
                net.deliver_locally(s, node, data)
            });
            return;
        }

        self.route_and_send(sched, node, data);
    }

    fn route_and_send(&mut self, sched: &mut NetworkScheduler, node: NodeId, data: InTransitData) {
        let destination = *data.destination().ip();
        let route = self.nodes[node.0]
            .stack
            .as_ref()
            .and_then(|stack| stack.routes.lookup(destination));
        let Some(route) = route else {
            self.drop_packet(sched, node, &data, DropReason::NoRoute);
            return;
        };

        let device_id = route.device;
        let next_hop = route.next_hop_towards_destination(destination);
        let Some(destination_mac) = self.resolve_mac(device_id, next_hop) else {
            self.drop_packet(sched, node, &data, DropReason::NoRoute);
            return;
        };

        let frame = Frame {
            data,
            source_mac: self.devices[device_id.0].mac,
            destination_mac,
        };
        self.device_send(sched, device_id, frame);
    }

    /// Finds the mac of the device owning `next_hop` on the channel of `device`
    fn resolve_mac(&self, device: DeviceId, next_hop: Ipv4Addr) -> Option<MacAddr> {
        let channel = &self.channels[self.devices[device.0].channel.0];
        channel
            .receivers(device)
            .map(|d| &self.devices[d.0])
            .find(|d| d.address.is_some_and(|a| a.address == next_hop))
            .map(|d| d.mac)
    }

    fn device_send(&mut self, sched: &mut NetworkScheduler, device_id: DeviceId, frame: Frame) {
        let device = &mut self.devices[device_id.0];
        if let Err(frame) = device.queue.enqueue(frame) {
            let node = device.node;
            self.drop_packet(sched, node, &frame.data, DropReason::QueueFull);
            return;
        }

        self.try_transmit(sched, device_id);
    }

    /// Puts the next queued frame on the medium, if the device and the medium allow it
    fn try_transmit(&mut self, sched: &mut NetworkScheduler, device_id: DeviceId) {
        let now = sched.now();
        loop {
            let device = &mut self.devices[device_id.0];
            if device.transmitting || device.backoff_pending || device.queue.is_empty() {
                return;
            }

            let channel = &mut self.channels[device.channel.0];
            if channel.is_idle(now) {
                break;
            }

            device.backoff_attempts += 1;
            if device.backoff_attempts > MAX_BACKOFF_ATTEMPTS {
                device.backoff_attempts = 0;
                let node = device.node;
                if let Some(frame) = device.queue.dequeue() {
                    self.drop_packet(sched, node, &frame.data, DropReason::BackoffExhausted);
                }

                continue;
            }

            device.backoff_pending = true;
            let backoff = backoff_duration(&mut self.rng, device.backoff_attempts);
            sched.schedule(backoff, move |net, s| {
                net.devices[device_id.0].backoff_pending = false;
                net.try_transmit(s, device_id);
            });
            return;
        }

        let device = &mut self.devices[device_id.0];
        let Some(frame) = device.queue.dequeue() else {
            return;
        };
        device.backoff_attempts = 0;
        device.transmitting = true;

        let channel = &mut self.channels[device.channel.0];
        let transmission_time = channel.seize(now, frame.wire_size(channel.kind));
        let arrival = transmission_time + channel.spec.delay;
        let receivers: Vec<_> = channel.receivers(device_id).collect();

        let node = device.node;
        self.tracer.track_packet_in_transit(
            now,
            &self.nodes[node.0].name,
            &self.channels[device.channel.0].name,
            &frame.data,
        );
        if !self.capture(sched, device_id, &frame, true) {
            return;
        }

        sched.schedule(transmission_time, move |net, s| {
            net.devices[device_id.0].transmitting = false;
            net.try_transmit(s, device_id);
        });

        for receiver in receivers {
            let frame = frame.clone();
            sched.schedule(arrival, move |net, s| net.device_receive(s, receiver, frame));
        }
    }

    // Receiving

    fn device_receive(&mut self, sched: &mut NetworkScheduler, device_id: DeviceId, frame: Frame) {
        if !self.capture(sched, device_id, &frame, false) {
            return;
        }

        let device = &self.devices[device_id.0];
        if !frame.is_addressed_to(device.mac) {
            return;
        }

        let node = device.node;
        self.ip_receive(sched, node, frame.data);
    }

    fn ip_receive(&mut self, sched: &mut NetworkScheduler, node: NodeId, mut data: InTransitData) {
        let now = sched.now();
        self.tracer
            .track_packet_in_node(now, &self.nodes[node.0].name, &data);

        if self.nodes[node.0].stack.is_none() {
            self.drop_packet(sched, node, &data, DropReason::NoStack);
            return;
        }

        if self.owns_address(node, *data.destination().ip()) {
            self.deliver_locally(sched, node, data);
            return;
        }

        if data.ttl <= 1 {
            self.drop_packet(sched, node, &data, DropReason::TtlExpired);
            return;
        }

        data.ttl -= 1;
        self.tracer
            .track_packet_forwarded(now, &self.nodes[node.0].name, &data);
        self.route_and_send(sched, node, data);
    }

    fn deliver_locally(&mut self, sched: &mut NetworkScheduler, node: NodeId, data: InTransitData) {
        let port = data.destination().port();
        let app = self.nodes[node.0]
            .stack
            .as_ref()
            .and_then(|stack| stack.socket(port))
            .filter(|app| self.applications[app.0].active);
        let Some(app) = app else {
            self.drop_packet(sched, node, &data, DropReason::PortUnreachable);
            return;
        };

        self.tracer
            .track_delivered_to_application(sched.now(), &self.nodes[node.0].name, &data);

        let from = data.source;
        let payload = data.transmit.contents;
        self.with_application(sched, app, |app, ctx| app.on_receive(ctx, from, &payload));
    }

    fn drop_packet(
        &mut self,
        sched: &mut NetworkScheduler,
        node: NodeId,
        data: &InTransitData,
        reason: DropReason,
    ) {
        self.tracer
            .track_dropped(sched.now(), &self.nodes[node.0].name, data, reason);
    }

    /// Records the frame in the device's capture file, if tracing is enabled for the device
    ///
    /// Returns `false` when writing the capture failed, which aborts the simulation.
    fn capture(
        &mut self,
        sched: &mut NetworkScheduler,
        device_id: DeviceId,
        frame: &Frame,
        outgoing: bool,
    ) -> bool {
        let device = &self.devices[device_id.0];
        let Some(capture) = &device.capture else {
            return true;
        };

        if !outgoing && !device.captures(frame.destination_mac) {
            return true;
        }

        let bytes = frame.to_bytes(device.kind);
        if let Err(e) = capture.exporter.track_frame(sched.now(), &bytes) {
            let file_name = capture.file_name.clone();
            self.fail(
                sched,
                e.context(format!("failed to capture frame in {file_name}")),
            );
            return false;
        }

        true
    }
}

impl SimulationEngine for InMemoryNetwork {
    fn create_nodes(&mut self, count: usize) -> Vec<NodeId> {
        (0..count)
            .map(|_| {
                let id = NodeId(self.nodes.len());
                self.nodes.push(Node::new(id));
                id
            })
            .collect()
    }

    fn install_point_to_point(
        &mut self,
        a: NodeId,
        b: NodeId,
        spec: &LinkSpec,
    ) -> Result<[DeviceId; 2], NetworkError> {
        self.node(a)?;
        self.node(b)?;
        if a == b {
            return Err(NetworkError::PointToPointLoop(a));
        }

        let channel = self.add_channel(LinkKind::PointToPoint, spec);
        Ok([self.add_device(a, channel), self.add_device(b, channel)])
    }

    fn install_csma(
        &mut self,
        nodes: &[NodeId],
        spec: &LinkSpec,
    ) -> Result<Vec<DeviceId>, NetworkError> {
        if nodes.is_empty() {
            return Err(NetworkError::EmptyCsmaChannel);
        }

        for &node in nodes {
            self.node(node)?;
        }

        let channel = self.add_channel(LinkKind::Csma, spec);
        Ok(nodes
            .iter()
            .map(|&node| self.add_device(node, channel))
            .collect())
    }

    fn install_internet_stack(&mut self, nodes: &[NodeId]) -> Result<(), NetworkError> {
        for &id in nodes {
            let node = self.node_mut(id)?;
            if node.stack.is_some() {
                return Err(NetworkError::StackAlreadyInstalled(id));
            }

            node.stack = Some(InternetStack::default());
        }

        Ok(())
    }

    fn assign_addresses(
        &mut self,
        block: &mut AddressBlock,
        devices: &[DeviceId],
    ) -> Result<Vec<Ipv4Addr>, NetworkError> {
        // Nothing is committed until every device got a valid address
        let mut pending_block = block.clone();
        let mut assigned = Vec::with_capacity(devices.len());
        for &id in devices {
            let device = self.device(id)?;
            if !self.nodes[device.node.0].has_stack() {
                return Err(NetworkError::MissingStack(device.node));
            }

            if device.address.is_some() || assigned.iter().any(|&(other, _)| other == id) {
                return Err(NetworkError::DeviceAlreadyAddressed(id));
            }

            let address = pending_block.next_address()?;
            if self.assigned_addresses.contains(&address.address) {
                return Err(NetworkError::DuplicateAddress(address.address));
            }

            assigned.push((id, address));
        }

        *block = pending_block;
        for &(id, address) in &assigned {
            self.assigned_addresses.insert(address.address);
            self.devices[id.0].address = Some(address);
        }

        Ok(assigned.into_iter().map(|(_, address)| address.address).collect())
    }

    fn install_application(
        &mut self,
        node: NodeId,
        application: ApplicationSpec,
        window: ActiveWindow,
    ) -> Result<AppId, NetworkError> {
        if !self.node(node)?.has_stack() {
            return Err(NetworkError::MissingStack(node));
        }

        if let ApplicationSpec::UdpEchoClient(client) = &application {
            if client.packet_size > MAX_UDP_PAYLOAD_SIZE {
                return Err(NetworkError::PayloadTooLarge {
                    size: client.packet_size,
                    max: MAX_UDP_PAYLOAD_SIZE,
                });
            }
        }

        let id = AppId(self.applications.len());
        self.applications.push(InstalledApplication {
            id,
            node,
            window,
            app: application.build(),
            port: None,
            active: false,
            pending_timers: HashMap::new(),
        });

        Ok(id)
    }

    fn populate_routing_tables(&mut self) -> Result<(), NetworkError> {
        let tables = compute_global_routes(&self.nodes, &self.devices, &self.channels)?;
        for (node, table) in self.nodes.iter_mut().zip(tables) {
            if let Some(stack) = &mut node.stack {
                stack.routes = table;
            }
        }

        Ok(())
    }

    fn enable_pcap(
        &mut self,
        prefix: &str,
        device: DeviceId,
        promiscuous: bool,
    ) -> anyhow::Result<()> {
        let device = self.devices.get_mut(device.0).ok_or(NetworkError::UnknownDevice(device))?;
        if device.capture.is_some() {
            return Err(NetworkError::PcapAlreadyEnabled(device.id).into());
        }

        let file_name = format!("{prefix}-{}-{}.pcap", device.node.index(), device.index);
        let link_type = match device.kind {
            LinkKind::PointToPoint => DataLink::PPP,
            LinkKind::Csma => DataLink::ETHERNET,
        };
        let exporter = self
            .pcap_exporter_factory
            .create_pcap_exporter(&file_name, link_type)?;

        device.capture = Some(DeviceCapture {
            file_name,
            exporter,
            promiscuous,
        });

        Ok(())
    }

    fn run(mut self) -> anyhow::Result<SimulationReport> {
        let mut scheduler = NetworkScheduler::new();
        for app in &self.applications {
            let id = app.id;
            let start = SimTime::from_duration(app.window.start());
            let stop = SimTime::from_duration(app.window.stop());
            scheduler.schedule_at(start, move |net, s| net.start_application(s, id));
            scheduler.schedule_at(stop, move |net, s| net.stop_application(s, id));
        }

        let end_time = scheduler.run(&mut self);
        if let Some(error) = self.fatal_error.take() {
            return Err(error.context(format!("simulation aborted at {end_time}")));
        }

        let mut pcap_files = Vec::new();
        for device in &self.devices {
            if let Some(capture) = &device.capture {
                capture.exporter.flush().with_context(|| {
                    format!("failed to finish capture file {}", capture.file_name)
                })?;
                pcap_files.push(capture.file_name.clone());
            }
        }

        let applications = self
            .applications
            .iter()
            .map(|app| ApplicationReport {
                id: app.id,
                node: app.node,
                kind: app.app.kind(),
                stats: app.app.stats(),
            })
            .collect();

        Ok(SimulationReport {
            end_time,
            executed_events: scheduler.executed_events(),
            node_ids: self.nodes.iter().map(|n| n.name.clone()).collect(),
            applications,
            pcap_files,
            steps: self.tracer.into_steps(),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::application::{UdpEchoClientSpec, UdpEchoServerSpec};
    use crate::pcap_exporter::{InMemoryPcapExporterFactory, NoOpPcapExporterFactory};
    use crate::trace::simulation_step::{SimulationStep, SimulationStepKind};
    use bon::builder;
    use pcap_file::pcapng::{Block, PcapNgReader};
    use std::io::Write;

    const ECHO_PORT: u16 = 9;

    struct EchoTopology {
        p2p_devices: [DeviceId; 2],
        csma_nodes: Vec<NodeId>,
        csma_devices: Vec<DeviceId>,
        csma_addresses: Vec<Ipv4Addr>,
    }

    fn mask() -> Ipv4Addr {
        Ipv4Addr::new(255, 255, 255, 0)
    }

    fn window(start_secs: u64, stop_secs: u64) -> ActiveWindow {
        ActiveWindow::new(
            Duration::from_secs(start_secs),
            Duration::from_secs(stop_secs),
        )
        .unwrap()
    }

    /// A point-to-point link between n0 and n1, followed by a csma segment with n1 and `n_csma`
    /// additional nodes
    #[builder]
    fn echo_network(
        n_csma: Option<usize>,
        pcap_factory: Option<Arc<dyn PcapExporterFactory>>,
        queue_size_packets: Option<usize>,
        csma_data_rate: Option<&'static str>,
    ) -> (InMemoryNetwork, EchoTopology) {
        let n_csma = n_csma.unwrap_or(3);
        let pcap_factory = pcap_factory.unwrap_or_else(|| Arc::new(NoOpPcapExporterFactory));
        let mut network = InMemoryNetwork::new(pcap_factory, Rng::with_seed(42));

        let p2p_nodes = network.create_nodes(2);
        let mut csma_nodes = vec![p2p_nodes[1]];
        csma_nodes.extend(network.create_nodes(n_csma));

        let mut p2p_spec = LinkSpec::from_attributes("5Mbps", "2ms").unwrap();
        p2p_spec.queue_size_packets = queue_size_packets.unwrap_or(p2p_spec.queue_size_packets);
        let csma_spec =
            LinkSpec::from_attributes(csma_data_rate.unwrap_or("100Mbps"), "6560ns").unwrap();
        let p2p_devices = network
            .install_point_to_point(p2p_nodes[0], p2p_nodes[1], &p2p_spec)
            .unwrap();
        let csma_devices = network.install_csma(&csma_nodes, &csma_spec).unwrap();

        network.install_internet_stack(&[p2p_nodes[0]]).unwrap();
        network.install_internet_stack(&csma_nodes).unwrap();

        let mut block = AddressBlock::new(Ipv4Addr::new(10, 1, 1, 0), mask()).unwrap();
        network.assign_addresses(&mut block, &p2p_devices).unwrap();
        block.set_base(Ipv4Addr::new(10, 1, 2, 0), mask()).unwrap();
        let csma_addresses = network.assign_addresses(&mut block, &csma_devices).unwrap();

        (
            network,
            EchoTopology {
                p2p_devices,
                csma_nodes,
                csma_devices,
                csma_addresses,
            },
        )
    }

    fn echo_server() -> ApplicationSpec {
        ApplicationSpec::UdpEchoServer(UdpEchoServerSpec { port: ECHO_PORT })
    }

    fn echo_client(
        remote: SocketAddrV4,
        max_packets: u32,
        interval: Duration,
    ) -> UdpEchoClientSpec {
        UdpEchoClientSpec {
            remote,
            max_packets,
            interval,
            packet_size: 1024,
        }
    }

    fn dropped(steps: &[SimulationStep]) -> Vec<(DropReason, String)> {
        steps
            .iter()
            .filter_map(|s| match &s.kind {
                SimulationStepKind::PacketDropped(d) => Some((d.reason, d.node_id.to_string())),
                _ => None,
            })
            .collect()
    }

    /// Hands a datagram to the ip layer of `node`, then runs until no events are left
    fn inject(
        mut network: InMemoryNetwork,
        node: NodeId,
        data: InTransitData,
    ) -> Vec<SimulationStep> {
        let mut scheduler = NetworkScheduler::new();
        scheduler.schedule(Duration::ZERO, move |net, s| net.route_and_send(s, node, data));
        scheduler.run(&mut network);
        network.tracer.into_steps()
    }

    fn datagram(source: SocketAddrV4, destination: SocketAddrV4, ttl: u8) -> InTransitData {
        InTransitData {
            id: uuid::Uuid::from_u128(1),
            number: 0,
            source,
            ttl,
            transmit: OwnedTransmit {
                destination,
                contents: vec![0; 64],
            },
        }
    }

    struct FailingWriter;

    impl Write for FailingWriter {
        fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::other("disk full"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct FailingPcapExporterFactory;

    impl PcapExporterFactory for FailingPcapExporterFactory {
        fn create_pcap_exporter(
            &self,
            _: &str,
            link_type: DataLink,
        ) -> anyhow::Result<crate::pcap_exporter::PcapExporter> {
            crate::pcap_exporter::PcapExporter::new(FailingWriter, link_type)
        }
    }

    fn install_echo_pair(
        network: &mut InMemoryNetwork,
        topology: &EchoTopology,
        remote_port: u16,
        max_packets: u32,
        interval: Duration,
    ) {
        let server_node = *topology.csma_nodes.last().unwrap();
        let server_address = *topology.csma_addresses.last().unwrap();
        network
            .install_application(server_node, echo_server(), window(1, 10))
            .unwrap();
        let remote = SocketAddrV4::new(server_address, remote_port);
        network
            .install_application(
                NodeId(0),
                ApplicationSpec::UdpEchoClient(echo_client(remote, max_packets, interval)),
                window(2, 10),
            )
            .unwrap();
        network.populate_routing_tables().unwrap();
    }

    #[test]
    fn test_routes_follow_the_topology() {
        let (mut network, topology) = echo_network().call();
        network.populate_routing_tables().unwrap();

        let n0 = network.routing_table(NodeId(0)).unwrap();
        let to_csma = n0.lookup(Ipv4Addr::new(10, 1, 2, 4)).unwrap();
        assert_eq!(to_csma.next, Some(Ipv4Addr::new(10, 1, 1, 2)));
        assert_eq!(to_csma.device, topology.p2p_devices[0]);

        let n1 = network.routing_table(NodeId(1)).unwrap();
        assert_eq!(n1.routes().len(), 2);
        assert!(n1.routes().iter().all(|r| r.next.is_none()));

        let server = *topology.csma_nodes.last().unwrap();
        let to_p2p = network
            .routing_table(server)
            .unwrap()
            .lookup(Ipv4Addr::new(10, 1, 1, 1))
            .unwrap();
        assert_eq!(to_p2p.next, Some(Ipv4Addr::new(10, 1, 2, 1)));
    }

    #[test]
    fn test_echo_exchange_timing() {
        let (mut network, topology) = echo_network().call();
        install_echo_pair(&mut network, &topology, ECHO_PORT, 1, Duration::from_secs(1));

        let report = network.run().unwrap();
        assert_eq!(report.end_time, SimTime::from_nanos(10_000_000_000));

        let stepper = report.stepper();
        let sent = stepper.sent_packets();
        assert_eq!(sent.len(), 2);
        let (request_sent_at, request) = sent[0];
        let (echo_sent_at, echo) = sent[1];
        assert_eq!(request_sent_at, Duration::from_secs(2));

        // 1054 bytes at 5Mbps plus 2ms of propagation delay
        assert_eq!(
            stepper.get_packet_arrived_at(request, "n1"),
            Some(Duration::from_nanos(2_003_686_400))
        );
        // 1070 bytes at 100Mbps plus 6560ns of propagation delay
        assert_eq!(
            stepper.get_packet_delivered_at(request).unwrap().0,
            Duration::from_nanos(2_003_778_560)
        );
        assert_eq!(echo_sent_at, Duration::from_nanos(2_003_778_560));
        assert_eq!(
            stepper.get_packet_arrived_at(echo, "n1"),
            Some(Duration::from_nanos(2_003_870_720))
        );
        let (delivered_at, client) = stepper.get_packet_delivered_at(echo).unwrap();
        assert_eq!(delivered_at, Duration::from_nanos(2_007_557_120));
        assert_eq!(&*client, "n0");
        assert_eq!(
            stepper
                .get_packet_path(request)
                .iter()
                .map(|n| n.as_ref())
                .collect::<Vec<_>>(),
            vec!["n1", "n4"]
        );

        let server_stats = report.applications[0].stats;
        let client_stats = report.applications[1].stats;
        assert_eq!(report.applications[0].kind, "udp-echo-server");
        assert_eq!(server_stats.received.packets, 1);
        assert_eq!(client_stats.sent.packets, 1);
        assert_eq!(client_stats.received.packets, 1);
        assert_eq!(client_stats.received.bytes, 1024);

        let stats = report.stats();
        assert_eq!(stats.stats_by_node["n1"].forwarded.packets, 2);
        assert_eq!(stats.stats_by_node["n0"].sent.packets, 1);
        assert_eq!(stats.stats_by_node["n4"].delivered.packets, 1);
    }

    #[test]
    fn test_unbound_port_drops_request() {
        let (mut network, topology) = echo_network().call();
        install_echo_pair(&mut network, &topology, 10, 1, Duration::from_secs(1));

        let report = network.run().unwrap();
        let dropped: Vec<_> = report
            .steps
            .iter()
            .filter_map(|s| match &s.kind {
                SimulationStepKind::PacketDropped(d) => Some(d),
                _ => None,
            })
            .collect();
        assert_eq!(dropped.len(), 1);
        assert_eq!(dropped[0].reason, DropReason::PortUnreachable);
        assert_eq!(&*dropped[0].node_id, "n4");
        assert_eq!(report.applications[1].stats.received.packets, 0);
    }

    #[test]
    fn test_full_queue_drops_packets() {
        let (mut network, topology) = echo_network().queue_size_packets(1).call();
        install_echo_pair(&mut network, &topology, ECHO_PORT, 5, Duration::ZERO);

        let report = network.run().unwrap();
        let queue_full_drops = report
            .steps
            .iter()
            .filter(|s| {
                matches!(
                    &s.kind,
                    SimulationStepKind::PacketDropped(d) if d.reason == DropReason::QueueFull
                )
            })
            .count();

        // One frame on the wire and one in the queue, the other three are dropped
        assert_eq!(queue_full_drops, 3);
        assert_eq!(report.applications[0].stats.received.packets, 2);
        assert_eq!(report.stats().stats_by_node["n0"].dropped.packets, 3);
    }

    #[test]
    fn test_pcap_captures() {
        let factory = InMemoryPcapExporterFactory::new();
        let (mut network, topology) = echo_network().pcap_factory(Arc::new(factory.clone())).call();
        install_echo_pair(&mut network, &topology, ECHO_PORT, 1, Duration::from_secs(1));

        for device in topology.p2p_devices {
            network.enable_pcap("second", device, false).unwrap();
        }
        network
            .enable_pcap("second", topology.csma_devices[1], true)
            .unwrap();
        network
            .enable_pcap("second", topology.csma_devices[2], false)
            .unwrap();

        let report = network.run().unwrap();
        assert_eq!(
            report.pcap_files,
            vec![
                "second-0-0.pcap",
                "second-1-0.pcap",
                "second-2-0.pcap",
                "second-3-0.pcap",
            ]
        );

        let frames = |file_name: &str| {
            let capture = factory.capture(file_name).unwrap();
            let mut reader = PcapNgReader::new(capture.as_slice()).unwrap();
            let mut frames = Vec::new();
            while let Some(block) = reader.next_block() {
                if let Block::EnhancedPacket(packet) = block.unwrap() {
                    frames.push(packet.data.to_vec());
                }
            }
            frames
        };

        // Request sent and echo received on both ends of the point-to-point link
        for file_name in ["second-0-0.pcap", "second-1-0.pcap"] {
            let frames = frames(file_name);
            assert_eq!(frames.len(), 2);
            assert!(frames.iter().all(|f| f.len() == 1054 && f[..2] == [0x00, 0x21]));
        }

        // The promiscuous device sees both directions on the segment
        let promiscuous = frames("second-2-0.pcap");
        assert_eq!(promiscuous.len(), 2);
        assert!(promiscuous.iter().all(|f| f.len() == 14 + 1052));

        // Other devices only see what is addressed to them
        assert!(frames("second-3-0.pcap").is_empty());
    }

    #[test]
    fn test_pcap_cannot_be_enabled_twice() {
        let (mut network, topology) = echo_network().call();
        network
            .enable_pcap("second", topology.p2p_devices[0], false)
            .unwrap();
        let error = network
            .enable_pcap("second", topology.p2p_devices[0], false)
            .unwrap_err();
        assert!(matches!(
            error.downcast_ref::<NetworkError>(),
            Some(NetworkError::PcapAlreadyEnabled(_))
        ));
    }

    fn topology_spec() -> LinkSpec {
        LinkSpec::from_attributes("5Mbps", "2ms").unwrap()
    }

    #[test]
    fn test_duplicate_addresses_are_rejected() {
        let (mut network, _) = echo_network().call();
        let extra = network.create_nodes(2);
        network.install_internet_stack(&extra).unwrap();
        let devices = network
            .install_point_to_point(extra[0], extra[1], &topology_spec())
            .unwrap();

        // Same pool as the existing point-to-point link
        let mut block = AddressBlock::new(Ipv4Addr::new(10, 1, 1, 0), mask()).unwrap();
        let error = network.assign_addresses(&mut block, &devices).unwrap_err();
        assert!(matches!(
            error,
            NetworkError::DuplicateAddress(ip) if ip == Ipv4Addr::new(10, 1, 1, 1)
        ));
        assert!(devices.iter().all(|&d| network.device(d).unwrap().address().is_none()));
    }

    #[test]
    fn test_failed_assignment_leaves_devices_and_block_untouched() {
        let (mut network, _) = echo_network().call();
        let extra = network.create_nodes(3);
        network.install_internet_stack(&extra).unwrap();
        let devices = network.install_csma(&extra, &topology_spec()).unwrap();

        // A /30 only holds two hosts
        let mut block =
            AddressBlock::new(Ipv4Addr::new(10, 1, 3, 0), Ipv4Addr::new(255, 255, 255, 252))
                .unwrap();
        let error = network.assign_addresses(&mut block, &devices).unwrap_err();
        assert!(matches!(error, NetworkError::AddressBlockExhausted(_)));
        assert!(devices.iter().all(|&d| network.device(d).unwrap().address().is_none()));

        let assigned = network.assign_addresses(&mut block, &devices[..2]).unwrap();
        assert_eq!(
            assigned,
            vec![Ipv4Addr::new(10, 1, 3, 1), Ipv4Addr::new(10, 1, 3, 2)]
        );
    }

    #[test]
    fn test_empty_window_never_starts() {
        let (mut network, topology) = echo_network().call();
        let server_address = *topology.csma_addresses.last().unwrap();
        let server_node = *topology.csma_nodes.last().unwrap();
        network
            .install_application(server_node, echo_server(), window(1, 10))
            .unwrap();
        let remote = SocketAddrV4::new(server_address, ECHO_PORT);
        network
            .install_application(
                NodeId(0),
                ApplicationSpec::UdpEchoClient(echo_client(remote, 1, Duration::from_secs(1))),
                window(2, 2),
            )
            .unwrap();
        network.populate_routing_tables().unwrap();

        let report = network.run().unwrap();
        assert!(report.stepper().sent_packets().is_empty());
        assert_eq!(report.applications[1].stats.sent.packets, 0);
        assert_eq!(report.applications[0].stats.received.packets, 0);
    }

    #[test]
    fn test_simultaneous_csma_senders_do_not_overlap() {
        let (mut network, topology) = echo_network().call();
        let server_address = *topology.csma_addresses.last().unwrap();
        let server_node = *topology.csma_nodes.last().unwrap();
        network
            .install_application(server_node, echo_server(), window(1, 10))
            .unwrap();

        let remote = SocketAddrV4::new(server_address, ECHO_PORT);
        let client_nodes = &topology.csma_nodes[..3];
        for &node in client_nodes {
            network
                .install_application(
                    node,
                    ApplicationSpec::UdpEchoClient(echo_client(remote, 3, Duration::ZERO)),
                    window(2, 10),
                )
                .unwrap();
        }
        network.populate_routing_tables().unwrap();
        let csma_name = network.channels()[1].name().clone();

        let report = network.run().unwrap();
        assert!(dropped(&report.steps).is_empty());
        assert_eq!(report.applications[0].stats.received.packets, 9);
        for client in &report.applications[1..] {
            assert_eq!(client.stats.sent.packets, 3);
            assert_eq!(client.stats.received.packets, 3);
        }

        let transmissions: Vec<_> = report
            .steps
            .iter()
            .filter(|s| {
                matches!(&s.kind, SimulationStepKind::PacketInTransit(t) if t.link_id == csma_name)
            })
            .map(|s| s.relative_time)
            .collect();
        assert_eq!(transmissions.len(), 18);

        // Every 1070 byte frame keeps the medium busy for 85600ns plus 6560ns of propagation
        let busy = Duration::from_nanos(85_600 + 6_560);
        for pair in transmissions.windows(2) {
            assert!(pair[1] - pair[0] >= busy, "{:?} overlaps {:?}", pair[1], pair[0]);
        }
    }

    #[test]
    fn test_busy_medium_exhausts_backoff() {
        // At 1Kbps a single frame occupies the medium for more than 8 seconds
        let (mut network, topology) = echo_network().csma_data_rate("1Kbps").call();
        let server_address = *topology.csma_addresses.last().unwrap();
        let server_node = *topology.csma_nodes.last().unwrap();
        network
            .install_application(server_node, echo_server(), window(1, 30))
            .unwrap();

        let remote = SocketAddrV4::new(server_address, ECHO_PORT);
        for &node in &topology.csma_nodes[1..3] {
            network
                .install_application(
                    node,
                    ApplicationSpec::UdpEchoClient(echo_client(remote, 1, Duration::from_secs(1))),
                    window(2, 30),
                )
                .unwrap();
        }
        network.populate_routing_tables().unwrap();

        let report = network.run().unwrap();
        assert_eq!(
            dropped(&report.steps),
            vec![(DropReason::BackoffExhausted, "n3".to_string())]
        );
        assert_eq!(report.applications[0].stats.received.packets, 1);
        assert_eq!(report.applications[1].stats.received.packets, 1);
        assert_eq!(report.applications[2].stats.received.packets, 0);
    }

    #[test]
    fn test_ttl_expires_at_forwarding_node() {
        let (mut network, topology) = echo_network().call();
        network.populate_routing_tables().unwrap();
        let server_address = *topology.csma_addresses.last().unwrap();

        let data = datagram(
            SocketAddrV4::new(Ipv4Addr::new(10, 1, 1, 1), 49153),
            SocketAddrV4::new(server_address, ECHO_PORT),
            1,
        );
        let steps = inject(network, NodeId(0), data);
        assert_eq!(dropped(&steps), vec![(DropReason::TtlExpired, "n1".to_string())]);
        assert!(
            !steps
                .iter()
                .any(|s| matches!(s.kind, SimulationStepKind::PacketForwarded(_)))
        );
    }

    #[test]
    fn test_unknown_network_has_no_route() {
        let (mut network, _) = echo_network().call();
        let remote = SocketAddrV4::new(Ipv4Addr::new(192, 168, 1, 1), ECHO_PORT);
        network
            .install_application(
                NodeId(0),
                ApplicationSpec::UdpEchoClient(echo_client(remote, 1, Duration::from_secs(1))),
                window(2, 10),
            )
            .unwrap();
        network.populate_routing_tables().unwrap();

        let report = network.run().unwrap();
        assert_eq!(
            dropped(&report.steps),
            vec![(DropReason::NoRoute, "n0".to_string())]
        );
    }

    #[test]
    fn test_node_without_stack_drops_frames() {
        let mut network = InMemoryNetwork::new(Arc::new(NoOpPcapExporterFactory), Rng::new());
        let nodes = network.create_nodes(2);
        let devices = network
            .install_point_to_point(nodes[0], nodes[1], &topology_spec())
            .unwrap();
        network.install_internet_stack(&nodes[..1]).unwrap();

        let frame = Frame {
            data: datagram(
                SocketAddrV4::new(Ipv4Addr::new(10, 1, 1, 1), 49153),
                SocketAddrV4::new(Ipv4Addr::new(10, 1, 1, 2), ECHO_PORT),
                DEFAULT_TTL,
            ),
            source_mac: network.devices[devices[0].0].mac,
            destination_mac: network.devices[devices[1].0].mac,
        };
        let receiver = devices[1];
        let mut scheduler = NetworkScheduler::new();
        scheduler.schedule(Duration::ZERO, move |net, s| {
            net.device_receive(s, receiver, frame)
        });
        scheduler.run(&mut network);

        assert_eq!(
            dropped(network.tracer.into_steps().as_slice()),
            vec![(DropReason::NoStack, "n1".to_string())]
        );
    }

    #[test]
    fn test_capture_failure_aborts_the_simulation() {
        let (mut network, topology) = echo_network()
            .pcap_factory(Arc::new(FailingPcapExporterFactory))
            .call();
        let server_address = *topology.csma_addresses.last().unwrap();
        let remote = SocketAddrV4::new(server_address, ECHO_PORT);

        // Large enough to bypass the capture buffer and hit the writer right away
        let mut client = echo_client(remote, 1, Duration::from_secs(1));
        client.packet_size = 9000;
        network
            .install_application(NodeId(0), ApplicationSpec::UdpEchoClient(client), window(2, 10))
            .unwrap();
        network.populate_routing_tables().unwrap();
        network
            .enable_pcap("second", topology.p2p_devices[0], false)
            .unwrap();

        let error = network.run().unwrap_err();
        assert_eq!(error.to_string(), "simulation aborted at +2s");
        assert!(format!("{error:#}").contains("failed to capture frame in second-0-0.pcap"));
    }

    #[test]
    fn test_oversized_payloads_are_rejected() {
        let (mut network, topology) = echo_network().call();
        let remote = SocketAddrV4::new(topology.csma_addresses[0], ECHO_PORT);

        let mut client = echo_client(remote, 1, Duration::from_secs(1));
        client.packet_size = MAX_UDP_PAYLOAD_SIZE + 1;
        let error = network
            .install_application(
                NodeId(0),
                ApplicationSpec::UdpEchoClient(client.clone()),
                window(2, 10),
            )
            .unwrap_err();
        assert!(matches!(
            error,
            NetworkError::PayloadTooLarge { size: 65508, max: 65507 }
        ));

        client.packet_size = MAX_UDP_PAYLOAD_SIZE;
        network
            .install_application(NodeId(0), ApplicationSpec::UdpEchoClient(client), window(2, 10))
            .unwrap();
    }

    #[test]
    fn test_setup_errors() {
        let mut network = InMemoryNetwork::new(Arc::new(NoOpPcapExporterFactory), Rng::new());
        let nodes = network.create_nodes(2);
        let spec = topology_spec();

        assert!(matches!(
            network.install_point_to_point(nodes[0], nodes[0], &spec),
            Err(NetworkError::PointToPointLoop(_))
        ));
        assert!(matches!(
            network.install_point_to_point(nodes[0], NodeId(7), &spec),
            Err(NetworkError::UnknownNode(NodeId(7)))
        ));
        assert!(matches!(
            network.install_csma(&[], &spec),
            Err(NetworkError::EmptyCsmaChannel)
        ));

        let devices = network
            .install_point_to_point(nodes[0], nodes[1], &spec)
            .unwrap();
        assert_eq!(network.device(devices[0]).unwrap().mac().to_string(), "00:00:00:00:00:01");
        assert_eq!(network.device(devices[1]).unwrap().mac().to_string(), "00:00:00:00:00:02");

        assert!(matches!(
            network.populate_routing_tables(),
            Err(NetworkError::NoAddressesAssigned)
        ));

        let mut block = AddressBlock::new(Ipv4Addr::new(10, 1, 1, 0), mask()).unwrap();
        assert!(matches!(
            network.assign_addresses(&mut block, &devices),
            Err(NetworkError::MissingStack(_))
        ));

        network.install_internet_stack(&nodes).unwrap();
        assert!(matches!(
            network.install_internet_stack(&nodes[..1]),
            Err(NetworkError::StackAlreadyInstalled(_))
        ));

        network.assign_addresses(&mut block, &devices).unwrap();
        assert!(matches!(
            network.assign_addresses(&mut block, &devices[..1]),
            Err(NetworkError::DeviceAlreadyAddressed(_))
        ));
    }
}
