//! Applications running on simulated nodes
//!
//! Applications never touch the network directly. Every callback receives an [`AppContext`]
//! where the application queues the actions it wants the network to carry out once the callback
//! returns.

mod echo_client;
mod echo_server;

pub use echo_client::{UdpEchoClient, UdpEchoClientSpec};
pub use echo_server::{UdpEchoServer, UdpEchoServerSpec};

use crate::engine::NodeId;
use crate::sim::SimTime;
use crate::trace::stats::PacketStats;
use std::net::SocketAddrV4;
use std::time::Duration;

#[derive(Clone, Debug)]
pub enum ApplicationSpec {
    UdpEchoServer(UdpEchoServerSpec),
    UdpEchoClient(UdpEchoClientSpec),
}

impl ApplicationSpec {
    pub(crate) fn build(self) -> Box<dyn Application> {
        match self {
            ApplicationSpec::UdpEchoServer(spec) => Box::new(UdpEchoServer::new(spec)),
            ApplicationSpec::UdpEchoClient(spec) => Box::new(UdpEchoClient::new(spec)),
        }
    }
}

#[derive(Copy, Clone, Debug, Default)]
pub struct ApplicationStats {
    pub sent: PacketStats,
    pub received: PacketStats,
}

pub trait Application {
    /// Short name used in reports
    fn kind(&self) -> &'static str;

    fn start(&mut self, ctx: &mut AppContext);

    fn stop(&mut self, ctx: &mut AppContext);

    /// Called when a timer requested through [`AppContext::schedule_timer`] expires
    fn on_timer(&mut self, ctx: &mut AppContext);

    /// Called for every datagram delivered to the application's socket while it is active
    fn on_receive(&mut self, ctx: &mut AppContext, from: SocketAddrV4, payload: &[u8]);

    fn stats(&self) -> ApplicationStats;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum AppAction {
    /// Bind a udp socket to the given port (or an ephemeral one)
    Bind(Option<u16>),
    Unbind,
    SendTo {
        destination: SocketAddrV4,
        contents: Vec<u8>,
    },
    ScheduleTimer(Duration),
}

pub struct AppContext {
    now: SimTime,
    node: NodeId,
    pub(crate) actions: Vec<AppAction>,
}

impl AppContext {
    pub(crate) fn new(now: SimTime, node: NodeId) -> Self {
        Self {
            now,
            node,
            actions: Vec::new(),
        }
    }

    pub fn now(&self) -> SimTime {
        self.now
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn bind(&mut self, port: Option<u16>) {
        self.actions.push(AppAction::Bind(port));
    }

    pub fn unbind(&mut self) {
        self.actions.push(AppAction::Unbind);
    }

    pub fn send_to(&mut self, destination: SocketAddrV4, contents: Vec<u8>) {
        self.actions.push(AppAction::SendTo {
            destination,
            contents,
        });
    }

    pub fn schedule_timer(&mut self, delay: Duration) {
        self.actions.push(AppAction::ScheduleTimer(delay));
    }
}
