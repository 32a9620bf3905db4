//! A point-to-point link followed by a csma segment, with a udp echo exchange across both
//!
//! ```text
//!        10.1.1.0
//!  n0 -------------- n1   n2   n3   n4
//!     point-to-point  |    |    |    |
//!                     ================
//!                       LAN 10.1.2.0
//! ```

use crate::config::ScenarioParams;
use fastrand::Rng;
use sim_network::application::{ApplicationSpec, UdpEchoClientSpec, UdpEchoServerSpec};
use sim_network::engine::{ActiveWindow, AppId, DeviceId, NodeId, SimulationEngine, SimulationReport};
use sim_network::network::InMemoryNetwork;
use sim_network::network::ip::AddressBlock;
use sim_network::network::spec::LinkSpec;
use sim_network::pcap_exporter::PcapExporterFactory;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

pub const POINT_TO_POINT_DATA_RATE: &str = "5Mbps";
pub const POINT_TO_POINT_DELAY: &str = "2ms";
pub const CSMA_DATA_RATE: &str = "100Mbps";
pub const CSMA_DELAY: &str = "6560ns";

pub const POINT_TO_POINT_NETWORK: Ipv4Addr = Ipv4Addr::new(10, 1, 1, 0);
pub const CSMA_NETWORK: Ipv4Addr = Ipv4Addr::new(10, 1, 2, 0);
pub const NETWORK_MASK: Ipv4Addr = Ipv4Addr::new(255, 255, 255, 0);

pub const ECHO_PORT: u16 = 9;
pub const SERVER_START: Duration = Duration::from_secs(1);
pub const SERVER_STOP: Duration = Duration::from_secs(10);
pub const CLIENT_START: Duration = Duration::from_secs(2);
pub const CLIENT_STOP: Duration = Duration::from_secs(10);
pub const CLIENT_MAX_PACKETS: u32 = 1;
pub const CLIENT_INTERVAL: Duration = Duration::from_secs(1);
pub const CLIENT_PACKET_SIZE: usize = 1024;

pub const PCAP_PREFIX: &str = "second";
pub const NETWORK_RNG_SEED: u64 = 42;

/// Where everything ended up, as reported by the engine while building the scenario
#[derive(Clone, Debug)]
pub struct ScenarioLayout {
    pub p2p_nodes: [NodeId; 2],
    /// The csma segment, starting with the node shared with the point-to-point link
    pub csma_nodes: Vec<NodeId>,
    pub p2p_devices: [DeviceId; 2],
    pub csma_devices: Vec<DeviceId>,
    pub p2p_addresses: Vec<Ipv4Addr>,
    pub csma_addresses: Vec<Ipv4Addr>,
    pub server: PlacedApplication,
    pub client: PlacedApplication,
    pub client_spec: UdpEchoClientSpec,
    /// Devices with packet capture enabled, and whether the capture is promiscuous
    pub traced_devices: Vec<(DeviceId, bool)>,
}

#[derive(Copy, Clone, Debug)]
pub struct PlacedApplication {
    pub id: AppId,
    pub node: NodeId,
    pub window: ActiveWindow,
}

/// Sets up the whole scenario on `engine`, without running it
pub fn build<E: SimulationEngine>(
    engine: &mut E,
    params: &ScenarioParams,
) -> anyhow::Result<ScenarioLayout> {
    let p2p_nodes = engine.create_nodes(2);
    let p2p_nodes = [p2p_nodes[0], p2p_nodes[1]];

    let mut csma_nodes = vec![p2p_nodes[1]];
    csma_nodes.extend(engine.create_nodes(params.n_csma as usize));

    let p2p_spec = LinkSpec::from_attributes(POINT_TO_POINT_DATA_RATE, POINT_TO_POINT_DELAY)?;
    let p2p_devices = engine.install_point_to_point(p2p_nodes[0], p2p_nodes[1], &p2p_spec)?;

    let csma_spec = LinkSpec::from_attributes(CSMA_DATA_RATE, CSMA_DELAY)?;
    let csma_devices = engine.install_csma(&csma_nodes, &csma_spec)?;

    engine.install_internet_stack(&[p2p_nodes[0]])?;
    engine.install_internet_stack(&csma_nodes)?;

    let mut addresses = AddressBlock::new(POINT_TO_POINT_NETWORK, NETWORK_MASK)?;
    let p2p_addresses = engine.assign_addresses(&mut addresses, &p2p_devices)?;
    addresses.set_base(CSMA_NETWORK, NETWORK_MASK)?;
    let csma_addresses = engine.assign_addresses(&mut addresses, &csma_devices)?;

    let server_index = params.n_csma as usize;
    let server_node = csma_nodes[server_index];
    let server_window = ActiveWindow::new(SERVER_START, SERVER_STOP)?;
    let server_id = engine.install_application(
        server_node,
        ApplicationSpec::UdpEchoServer(UdpEchoServerSpec { port: ECHO_PORT }),
        server_window,
    )?;

    let client_spec = UdpEchoClientSpec {
        remote: SocketAddrV4::new(csma_addresses[server_index], ECHO_PORT),
        max_packets: CLIENT_MAX_PACKETS,
        interval: CLIENT_INTERVAL,
        packet_size: CLIENT_PACKET_SIZE,
    };
    let client_window = ActiveWindow::new(CLIENT_START, CLIENT_STOP)?;
    let client_id = engine.install_application(
        p2p_nodes[0],
        ApplicationSpec::UdpEchoClient(client_spec.clone()),
        client_window,
    )?;

    engine.populate_routing_tables()?;

    let mut traced_devices = Vec::new();
    for device in p2p_devices {
        engine.enable_pcap(PCAP_PREFIX, device, false)?;
        traced_devices.push((device, false));
    }
    engine.enable_pcap(PCAP_PREFIX, csma_devices[1], true)?;
    traced_devices.push((csma_devices[1], true));

    Ok(ScenarioLayout {
        p2p_nodes,
        csma_nodes,
        p2p_devices,
        csma_devices,
        p2p_addresses,
        csma_addresses,
        server: PlacedApplication {
            id: server_id,
            node: server_node,
            window: server_window,
        },
        client: PlacedApplication {
            id: client_id,
            node: p2p_nodes[0],
            window: client_window,
        },
        client_spec,
        traced_devices,
    })
}

/// Builds the scenario on an in-memory network and runs it to completion
pub fn run(
    params: &ScenarioParams,
    pcap_exporter_factory: Arc<dyn PcapExporterFactory>,
) -> anyhow::Result<(ScenarioLayout, SimulationReport)> {
    let mut network = InMemoryNetwork::new(pcap_exporter_factory, Rng::with_seed(NETWORK_RNG_SEED));
    let layout = build(&mut network, params)?;
    let report = network.run()?;
    Ok((layout, report))
}
