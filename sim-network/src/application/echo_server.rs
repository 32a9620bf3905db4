use crate::application::{AppContext, Application, ApplicationStats};
use std::net::SocketAddrV4;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UdpEchoServerSpec {
    pub port: u16,
}

/// Sends every datagram it receives back to its sender
pub struct UdpEchoServer {
    spec: UdpEchoServerSpec,
    stats: ApplicationStats,
}

impl UdpEchoServer {
    pub fn new(spec: UdpEchoServerSpec) -> Self {
        Self {
            spec,
            stats: ApplicationStats::default(),
        }
    }
}

impl Application for UdpEchoServer {
    fn kind(&self) -> &'static str {
        "udp-echo-server"
    }

    fn start(&mut self, ctx: &mut AppContext) {
        ctx.bind(Some(self.spec.port));
    }

    fn stop(&mut self, ctx: &mut AppContext) {
        ctx.unbind();
    }

    fn on_timer(&mut self, _: &mut AppContext) {}

    fn on_receive(&mut self, ctx: &mut AppContext, from: SocketAddrV4, payload: &[u8]) {
        self.stats.received.track_one(payload.len());
        tracing::info!(
            target: "udp_echo_server",
            "At time {} server received {} bytes from {} port {}",
            ctx.now(),
            payload.len(),
            from.ip(),
            from.port(),
        );

        ctx.send_to(from, payload.to_vec());
        self.stats.sent.track_one(payload.len());
        tracing::info!(
            target: "udp_echo_server",
            "At time {} server sent {} bytes to {} port {}",
            ctx.now(),
            payload.len(),
            from.ip(),
            from.port(),
        );
    }

    fn stats(&self) -> ApplicationStats {
        self.stats
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::application::AppAction;
    use crate::engine::NodeId;
    use crate::sim::SimTime;
    use std::net::Ipv4Addr;

    #[test]
    fn test_server_binds_its_port_and_echoes_payload() {
        let mut server = UdpEchoServer::new(UdpEchoServerSpec { port: 9 });
        let mut ctx = AppContext::new(SimTime::from_nanos(1_000_000_000), NodeId(4));
        server.start(&mut ctx);
        assert_eq!(ctx.actions, vec![AppAction::Bind(Some(9))]);

        let client = SocketAddrV4::new(Ipv4Addr::new(10, 1, 1, 1), 49153);
        let mut ctx = AppContext::new(SimTime::from_nanos(2_003_778_560), NodeId(4));
        server.on_receive(&mut ctx, client, &[7; 32]);
        assert_eq!(
            ctx.actions,
            vec![AppAction::SendTo {
                destination: client,
                contents: vec![7; 32],
            }]
        );

        let stats = server.stats();
        assert_eq!(stats.received.packets, 1);
        assert_eq!(stats.sent.bytes, 32);
    }
}
