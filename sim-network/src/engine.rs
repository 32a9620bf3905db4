//! The capability set a scenario needs from a network simulator
//!
//! Scenarios are written against [`SimulationEngine`] and never observe individual events. The
//! in-memory implementation lives in [`crate::network::InMemoryNetwork`].

use crate::application::{ApplicationSpec, ApplicationStats};
use crate::error::NetworkError;
use crate::network::ip::AddressBlock;
use crate::network::spec::LinkSpec;
use crate::sim::SimTime;
use crate::trace::simulation_step::SimulationStep;
use crate::trace::simulation_stepper::SimulationStepper;
use crate::trace::stats::NetworkStats;
use std::fmt::{Display, Formatter};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Globally unique device id (devices also have a per-node index, used in capture file names)
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceId(pub(crate) usize);

impl DeviceId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl Display for DeviceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "dev{}", self.0)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChannelId(pub(crate) usize);

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AppId(pub(crate) usize);

impl AppId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl Display for AppId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "app{}", self.0)
    }
}

/// The `[start, stop)` interval during which an application is active
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ActiveWindow {
    start: Duration,
    stop: Duration,
}

impl ActiveWindow {
    pub fn new(start: Duration, stop: Duration) -> Result<Self, NetworkError> {
        if stop < start {
            return Err(NetworkError::InvalidWindow { start, stop });
        }

        Ok(Self { start, stop })
    }

    pub fn start(&self) -> Duration {
        self.start
    }

    pub fn stop(&self) -> Duration {
        self.stop
    }
}

pub trait SimulationEngine {
    /// Creates `count` endpoints and returns their ids, in creation order
    fn create_nodes(&mut self, count: usize) -> Vec<NodeId>;

    /// Connects two nodes through a dedicated link, returning the device created on each end
    fn install_point_to_point(
        &mut self,
        a: NodeId,
        b: NodeId,
        spec: &LinkSpec,
    ) -> Result<[DeviceId; 2], NetworkError>;

    /// Connects all the provided nodes to a single shared medium, returning one device per node
    fn install_csma(
        &mut self,
        nodes: &[NodeId],
        spec: &LinkSpec,
    ) -> Result<Vec<DeviceId>, NetworkError>;

    fn install_internet_stack(&mut self, nodes: &[NodeId]) -> Result<(), NetworkError>;

    /// Assigns the next addresses of `block` to `devices`, in order
    fn assign_addresses(
        &mut self,
        block: &mut AddressBlock,
        devices: &[DeviceId],
    ) -> Result<Vec<Ipv4Addr>, NetworkError>;

    fn install_application(
        &mut self,
        node: NodeId,
        application: ApplicationSpec,
        window: ActiveWindow,
    ) -> Result<AppId, NetworkError>;

    /// Computes static routes between all nodes, based on the current topology
    fn populate_routing_tables(&mut self) -> Result<(), NetworkError>;

    fn enable_pcap(&mut self, prefix: &str, device: DeviceId, promiscuous: bool)
    -> anyhow::Result<()>;

    /// Runs the simulation until no events remain, then releases every simulated resource
    fn run(self) -> anyhow::Result<SimulationReport>
    where
        Self: Sized;
}

/// What is left after a simulation ran to completion
#[derive(Debug)]
pub struct SimulationReport {
    pub end_time: SimTime,
    pub executed_events: u64,
    pub steps: Vec<SimulationStep>,
    pub node_ids: Vec<Arc<str>>,
    pub applications: Vec<ApplicationReport>,
    pub pcap_files: Vec<String>,
}

impl SimulationReport {
    pub fn stepper(&self) -> SimulationStepper {
        SimulationStepper::new(self.steps.clone())
    }

    pub fn stats(&self) -> NetworkStats {
        self.stepper().stats(&self.node_ids)
    }
}

#[derive(Debug)]
pub struct ApplicationReport {
    pub id: AppId,
    pub node: NodeId,
    pub kind: &'static str,
    pub stats: ApplicationStats,
}
