use crate::engine::{ChannelId, DeviceId};
use crate::network::spec::LinkSpec;
use crate::sim::SimTime;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Duration;

/// Width of a csma backoff slot
pub const BACKOFF_SLOT: Duration = Duration::from_micros(1);
/// Backoff windows stop growing after this many attempts
pub const BACKOFF_CEILING: u32 = 10;
/// A frame is dropped after this many unsuccessful attempts to seize the medium
pub const MAX_BACKOFF_ATTEMPTS: u32 = 1000;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LinkKind {
    PointToPoint,
    Csma,
}

impl Display for LinkKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkKind::PointToPoint => f.write_str("point-to-point"),
            LinkKind::Csma => f.write_str("csma"),
        }
    }
}

pub struct Channel {
    pub(crate) id: ChannelId,
    pub(crate) name: Arc<str>,
    pub(crate) kind: LinkKind,
    pub(crate) spec: LinkSpec,
    pub(crate) devices: Vec<DeviceId>,
    /// The medium is occupied (transmitting or propagating) until this moment
    pub(crate) busy_until: SimTime,
}

impl Channel {
    pub(crate) fn new(id: ChannelId, kind: LinkKind, spec: LinkSpec) -> Self {
        let prefix = match kind {
            LinkKind::PointToPoint => "p2p",
            LinkKind::Csma => "csma",
        };

        Self {
            id,
            name: format!("{prefix}-{}", id.0).into(),
            kind,
            spec,
            devices: Vec::new(),
            busy_until: SimTime::ZERO,
        }
    }

    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    pub fn kind(&self) -> LinkKind {
        self.kind
    }

    pub fn devices(&self) -> &[DeviceId] {
        &self.devices
    }

    /// Devices that receive what `sender` puts on the medium
    pub(crate) fn receivers(&self, sender: DeviceId) -> impl Iterator<Item = DeviceId> + '_ {
        self.devices.iter().copied().filter(move |&d| d != sender)
    }

    /// Whether a csma device may start transmitting right now
    ///
    /// Point-to-point links are full duplex, so each side is only limited by its own device.
    pub(crate) fn is_idle(&self, now: SimTime) -> bool {
        match self.kind {
            LinkKind::PointToPoint => true,
            LinkKind::Csma => self.busy_until <= now,
        }
    }

    /// Occupies the medium for the transmission of `wire_size` bytes and returns the
    /// transmission time
    pub(crate) fn seize(&mut self, now: SimTime, wire_size: usize) -> Duration {
        let transmission_time = self.spec.data_rate.transmission_time(wire_size);
        if self.kind == LinkKind::Csma {
            self.busy_until = now + transmission_time + self.spec.delay;
        }

        transmission_time
    }
}

/// Random backoff for the given attempt, following binary exponential backoff
pub(crate) fn backoff_duration(rng: &mut fastrand::Rng, attempt: u32) -> Duration {
    let exponent = attempt.clamp(1, BACKOFF_CEILING);
    let max_slots = (1u32 << exponent) - 1;
    BACKOFF_SLOT * rng.u32(1..=max_slots)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::network::spec::DataRate;

    fn csma() -> Channel {
        Channel::new(
            ChannelId(0),
            LinkKind::Csma,
            LinkSpec::new(DataRate::from_bps(100_000_000), Duration::from_nanos(6560)),
        )
    }

    #[test]
    fn test_csma_medium_is_busy_while_transmitting_and_propagating() {
        let mut channel = csma();
        let start = SimTime::from_nanos(1_000);
        assert!(channel.is_idle(start));

        let tx = channel.seize(start, 1070);
        assert_eq!(tx, Duration::from_nanos(85_600));
        assert!(!channel.is_idle(start + tx));
        assert!(channel.is_idle(start + tx + Duration::from_nanos(6560)));
    }

    #[test]
    fn test_point_to_point_is_always_idle() {
        let mut channel = Channel::new(
            ChannelId(1),
            LinkKind::PointToPoint,
            LinkSpec::new(DataRate::from_bps(5_000_000), Duration::from_millis(2)),
        );

        channel.seize(SimTime::ZERO, 1054);
        assert!(channel.is_idle(SimTime::ZERO));
        assert_eq!(&*channel.name, "p2p-1");
    }

    #[test]
    fn test_backoff_stays_within_window() {
        let mut rng = fastrand::Rng::with_seed(42);
        for attempt in 1..20 {
            let backoff = backoff_duration(&mut rng, attempt);
            let max_slots = (1u32 << attempt.min(BACKOFF_CEILING)) - 1;
            assert!(backoff >= BACKOFF_SLOT);
            assert!(backoff <= BACKOFF_SLOT * max_slots);
        }
    }
}
