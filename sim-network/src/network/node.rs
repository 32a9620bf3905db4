use crate::engine::{AppId, DeviceId, NodeId};
use crate::error::NetworkError;
use crate::network::route::RoutingTable;
use std::collections::HashMap;
use std::sync::Arc;

pub const EPHEMERAL_PORT_START: u16 = 49153;

pub struct Node {
    pub(crate) id: NodeId,
    pub(crate) name: Arc<str>,
    pub(crate) devices: Vec<DeviceId>,
    pub(crate) stack: Option<InternetStack>,
}

impl Node {
    pub(crate) fn new(id: NodeId) -> Self {
        Self {
            id,
            name: id.to_string().into(),
            devices: Vec::new(),
            stack: None,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    pub fn devices(&self) -> &[DeviceId] {
        &self.devices
    }

    pub fn has_stack(&self) -> bool {
        self.stack.is_some()
    }

    pub(crate) fn stack_mut(&mut self) -> Result<&mut InternetStack, NetworkError> {
        self.stack.as_mut().ok_or(NetworkError::MissingStack(self.id))
    }
}

/// IPv4 + UDP state of a node
#[derive(Default)]
pub struct InternetStack {
    pub(crate) routes: RoutingTable,
    sockets: HashMap<u16, AppId>,
    next_ephemeral_port: Option<u16>,
}

impl InternetStack {
    /// Binds `port` to `app`, or the next free ephemeral port if `port` is `None`
    pub(crate) fn bind(
        &mut self,
        node: NodeId,
        port: Option<u16>,
        app: AppId,
    ) -> Result<u16, NetworkError> {
        let port = match port {
            Some(port) if self.sockets.contains_key(&port) => {
                return Err(NetworkError::PortInUse { node, port });
            }
            Some(port) => port,
            None => self.allocate_ephemeral_port(node)?,
        };

        self.sockets.insert(port, app);
        Ok(port)
    }

    pub(crate) fn unbind(&mut self, port: u16) {
        self.sockets.remove(&port);
    }

    pub(crate) fn socket(&self, port: u16) -> Option<AppId> {
        self.sockets.get(&port).copied()
    }

    fn allocate_ephemeral_port(&mut self, node: NodeId) -> Result<u16, NetworkError> {
        let range_size = (u16::MAX - EPHEMERAL_PORT_START) as u32 + 1;
        let mut candidate = self.next_ephemeral_port.unwrap_or(EPHEMERAL_PORT_START);
        for _ in 0..range_size {
            let next = candidate.checked_add(1).unwrap_or(EPHEMERAL_PORT_START);
            if !self.sockets.contains_key(&candidate) {
                self.next_ephemeral_port = Some(next);
                return Ok(candidate);
            }

            candidate = next;
        }

        Err(NetworkError::EphemeralPortsExhausted(node))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_ephemeral_ports_start_at_49153() {
        let mut stack = InternetStack::default();
        let node = NodeId(0);
        assert_eq!(stack.bind(node, None, AppId(0)).unwrap(), 49153);
        assert_eq!(stack.bind(node, None, AppId(1)).unwrap(), 49154);
        assert_eq!(stack.socket(49153), Some(AppId(0)));
    }

    #[test]
    fn test_binding_a_used_port_fails() {
        let mut stack = InternetStack::default();
        let node = NodeId(3);
        stack.bind(node, Some(9), AppId(0)).unwrap();
        assert!(matches!(
            stack.bind(node, Some(9), AppId(1)),
            Err(NetworkError::PortInUse { port: 9, .. })
        ));

        stack.unbind(9);
        assert_eq!(stack.bind(node, Some(9), AppId(1)).unwrap(), 9);
        assert_eq!(stack.socket(9), Some(AppId(1)));
    }

    #[test]
    fn test_ephemeral_allocation_skips_bound_ports() {
        let mut stack = InternetStack::default();
        let node = NodeId(0);
        stack.bind(node, Some(49153), AppId(0)).unwrap();
        assert_eq!(stack.bind(node, None, AppId(1)).unwrap(), 49154);
    }
}
