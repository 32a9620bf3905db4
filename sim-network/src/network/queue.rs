use crate::network::frame::Frame;
use std::collections::VecDeque;

/// Transmit queue that drops new frames once it holds `capacity` of them
pub struct DropTailQueue {
    frames: VecDeque<Frame>,
    capacity: usize,
}

impl DropTailQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: VecDeque::new(),
            capacity,
        }
    }

    /// Enqueues the frame, or gives it back if there is no space left
    pub fn enqueue(&mut self, frame: Frame) -> Result<(), Frame> {
        if self.frames.len() >= self.capacity {
            // No space available
            return Err(frame);
        }

        self.frames.push_back(frame);
        Ok(())
    }

    pub fn dequeue(&mut self) -> Option<Frame> {
        self.frames.pop_front()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::InTransitData;
    use crate::network::frame::allocate_mac;
    use crate::transmit::OwnedTransmit;
    use std::net::{Ipv4Addr, SocketAddrV4};

    fn frame(number: u64) -> Frame {
        let addr = SocketAddrV4::new(Ipv4Addr::LOCALHOST, 9);
        Frame {
            data: InTransitData {
                id: uuid::Uuid::nil(),
                number,
                source: addr,
                ttl: 64,
                transmit: OwnedTransmit {
                    destination: addr,
                    contents: Vec::new(),
                },
            },
            source_mac: allocate_mac(1),
            destination_mac: allocate_mac(2),
        }
    }

    #[test]
    fn test_queue_drops_when_full() {
        let mut queue = DropTailQueue::new(2);
        assert!(queue.enqueue(frame(0)).is_ok());
        assert!(queue.enqueue(frame(1)).is_ok());

        let rejected = queue.enqueue(frame(2)).unwrap_err();
        assert_eq!(rejected.data.number, 2);
        assert_eq!(queue.len(), 2);

        // FIFO order
        assert_eq!(queue.dequeue().unwrap().data.number, 0);
        assert!(queue.enqueue(frame(3)).is_ok());
        assert_eq!(queue.dequeue().unwrap().data.number, 1);
        assert_eq!(queue.dequeue().unwrap().data.number, 3);
        assert!(queue.is_empty());
    }
}
