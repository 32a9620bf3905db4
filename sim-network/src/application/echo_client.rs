use crate::application::{AppContext, Application, ApplicationStats};
use std::net::SocketAddrV4;
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UdpEchoClientSpec {
    pub remote: SocketAddrV4,
    /// Number of requests to send, `0` meaning no limit
    pub max_packets: u32,
    pub interval: Duration,
    pub packet_size: usize,
}

/// Sends zero-filled requests to a remote echo server at a fixed interval
pub struct UdpEchoClient {
    spec: UdpEchoClientSpec,
    sent_requests: u32,
    stats: ApplicationStats,
}

impl UdpEchoClient {
    pub fn new(spec: UdpEchoClientSpec) -> Self {
        Self {
            spec,
            sent_requests: 0,
            stats: ApplicationStats::default(),
        }
    }

    fn may_send(&self) -> bool {
        self.spec.max_packets == 0 || self.sent_requests < self.spec.max_packets
    }

    fn send(&mut self, ctx: &mut AppContext) {
        let remote = self.spec.remote;
        ctx.send_to(remote, vec![0; self.spec.packet_size]);
        self.sent_requests += 1;
        self.stats.sent.track_one(self.spec.packet_size);
        tracing::info!(
            target: "udp_echo_client",
            "At time {} client sent {} bytes to {} port {}",
            ctx.now(),
            self.spec.packet_size,
            remote.ip(),
            remote.port(),
        );

        if self.may_send() {
            ctx.schedule_timer(self.spec.interval);
        }
    }
}

impl Application for UdpEchoClient {
    fn kind(&self) -> &'static str {
        "udp-echo-client"
    }

    fn start(&mut self, ctx: &mut AppContext) {
        ctx.bind(None);
        if self.may_send() {
            self.send(ctx);
        }
    }

    fn stop(&mut self, ctx: &mut AppContext) {
        ctx.unbind();
    }

    fn on_timer(&mut self, ctx: &mut AppContext) {
        if self.may_send() {
            self.send(ctx);
        }
    }

    fn on_receive(&mut self, ctx: &mut AppContext, from: SocketAddrV4, payload: &[u8]) {
        self.stats.received.track_one(payload.len());
        tracing::info!(
            target: "udp_echo_client",
            "At time {} client received {} bytes from {} port {}",
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

    fn client(max_packets: u32) -> UdpEchoClient {
        UdpEchoClient::new(UdpEchoClientSpec {
            remote: SocketAddrV4::new(Ipv4Addr::new(10, 1, 2, 4), 9),
            max_packets,
            interval: Duration::from_secs(1),
            packet_size: 1024,
        })
    }

    fn ctx() -> AppContext {
        AppContext::new(SimTime::from_nanos(2_000_000_000), NodeId(0))
    }

    #[test]
    fn test_single_request_is_sent_immediately() {
        let mut client = client(1);
        let mut ctx = ctx();
        client.start(&mut ctx);

        assert_eq!(ctx.actions.len(), 2);
        assert_eq!(ctx.actions[0], AppAction::Bind(None));
        let AppAction::SendTo {
            destination,
            contents,
        } = &ctx.actions[1]
        else {
            panic!("expected a send");
        };
        assert_eq!(destination.to_string(), "10.1.2.4:9");
        assert_eq!(contents, &vec![0u8; 1024]);

        // No more requests once the limit is reached
        let mut ctx = self::ctx();
        client.on_timer(&mut ctx);
        assert!(ctx.actions.is_empty());
    }

    #[test]
    fn test_requests_repeat_at_interval_until_limit() {
        let mut client = client(3);
        let mut ctx = ctx();
        client.start(&mut ctx);
        assert_eq!(
            ctx.actions.last(),
            Some(&AppAction::ScheduleTimer(Duration::from_secs(1)))
        );

        let mut ctx = self::ctx();
        client.on_timer(&mut ctx);
        assert_eq!(ctx.actions.len(), 2);

        let mut ctx = self::ctx();
        client.on_timer(&mut ctx);
        assert_eq!(ctx.actions.len(), 1, "the last request schedules no timer");
        assert_eq!(client.stats().sent.packets, 3);
    }

    #[test]
    fn test_zero_max_packets_means_unlimited() {
        let mut client = client(0);
        for _ in 0..10 {
            let mut ctx = ctx();
            client.on_timer(&mut ctx);
            assert!(matches!(ctx.actions[0], AppAction::SendTo { .. }));
        }

        assert_eq!(client.stats().sent.packets, 10);
    }
}
