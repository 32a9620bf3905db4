use crate::engine::{DeviceId, NodeId};
use crate::error::NetworkError;
use crate::network::channel::Channel;
use crate::network::device::NetDevice;
use crate::network::ip::Ipv4Cidr;
use crate::network::node::Node;
use std::collections::VecDeque;
use std::net::Ipv4Addr;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Route {
    pub destination: Ipv4Cidr,
    /// The gateway to hand packets to, or `None` if the destination is directly connected
    pub next: Option<Ipv4Addr>,
    pub device: DeviceId,
}

impl Route {
    /// The address whose owner should receive a packet heading for `ip`
    pub(crate) fn next_hop_towards_destination(&self, ip: Ipv4Addr) -> Ipv4Addr {
        self.next.unwrap_or(ip)
    }
}

#[derive(Clone, Debug, Default)]
pub struct RoutingTable {
    routes: Vec<Route>,
}

impl RoutingTable {
    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// Longest prefix match, earlier routes win ties
    pub fn lookup(&self, ip: Ipv4Addr) -> Option<&Route> {
        self.routes
            .iter()
            .filter(|r| r.destination.contains(ip))
            .fold(None, |best: Option<&Route>, r| match best {
                Some(b) if b.destination.network_prefix() >= r.destination.network_prefix() => {
                    Some(b)
                }
                _ => Some(r),
            })
    }

    fn has_route_to(&self, network: Ipv4Cidr) -> bool {
        self.routes.iter().any(|r| r.destination == network)
    }
}

/// Computes a routing table for every node, indexed by node id
///
/// Directly connected networks are routed through the attached device. Every other network is
/// reached through the first hop of a shortest path (in hops), exploring devices in creation
/// order. Only nodes with an internet stack take part in routing.
pub(crate) fn compute_global_routes(
    nodes: &[Node],
    devices: &[NetDevice],
    channels: &[Channel],
) -> Result<Vec<RoutingTable>, NetworkError> {
    if devices.iter().all(|d| d.address.is_none()) {
        return Err(NetworkError::NoAddressesAssigned);
    }

    let mut tables = Vec::with_capacity(nodes.len());
    for node in nodes {
        let mut table = RoutingTable::default();
        if node.stack.is_some() {
            add_connected_routes(node, devices, &mut table);
            add_remote_routes(node, nodes, devices, channels, &mut table);
        }

        tables.push(table);
    }

    Ok(tables)
}

fn add_connected_routes(node: &Node, devices: &[NetDevice], table: &mut RoutingTable) {
    for &device_id in &node.devices {
        let device = &devices[device_id.0];
        let Some(address) = device.address else {
            continue;
        };

        let network = address.network();
        if !table.has_route_to(network) {
            table.routes.push(Route {
                destination: network,
                next: None,
                device: device_id,
            });
        }
    }
}

// Breadth-first search from `source`, remembering through which neighbor each node was first
// reached
fn add_remote_routes(
    source: &Node,
    nodes: &[Node],
    devices: &[NetDevice],
    channels: &[Channel],
    table: &mut RoutingTable,
) {
    let mut first_hop: Vec<Option<(DeviceId, Ipv4Addr)>> = vec![None; nodes.len()];
    let mut visited = vec![false; nodes.len()];
    visited[source.id.0] = true;

    let mut queue = VecDeque::from([source.id]);
    while let Some(current) = queue.pop_front() {
        for &out_device in &nodes[current.0].devices {
            if devices[out_device.0].address.is_none() {
                continue;
            }

            for neighbor_device in channels[devices[out_device.0].channel.0].receivers(out_device) {
                let neighbor_device = &devices[neighbor_device.0];
                let neighbor = neighbor_device.node;
                let Some(neighbor_address) = neighbor_device.address else {
                    continue;
                };

                if visited[neighbor.0] || nodes[neighbor.0].stack.is_none() {
                    continue;
                }

                visited[neighbor.0] = true;
                first_hop[neighbor.0] = if current == source.id {
                    Some((out_device, neighbor_address.address))
                } else {
                    first_hop[current.0]
                };
                queue.push_back(neighbor);
                add_routes_to_networks_of(neighbor, nodes, devices, first_hop[neighbor.0], table);
            }
        }
    }
}

fn add_routes_to_networks_of(
    node: NodeId,
    nodes: &[Node],
    devices: &[NetDevice],
    first_hop: Option<(DeviceId, Ipv4Addr)>,
    table: &mut RoutingTable,
) {
    let Some((device, gateway)) = first_hop else {
        return;
    };

    for &device_id in &nodes[node.0].devices {
        let Some(address) = devices[device_id.0].address else {
            continue;
        };

        let network = address.network();
        if !table.has_route_to(network) {
            table.routes.push(Route {
                destination: network,
                next: Some(gateway),
                device,
            });
        }
    }
}
