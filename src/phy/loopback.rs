use std::collections::VecDeque;

use crate::phy::{
    ChecksumCapabilities, Device, DeviceCapabilities, EthernetCapabilities, LinkState, Medium,
};
use crate::storage::NetBuffer;

/// A loopback device.
///
/// Every transmitted frame is queued for reception on the same device.
/// The queue is unbounded; the device is meant for tests and for
/// single-board self-communication, not for production forwarding.
#[derive(Debug, Default)]
pub struct Loopback {
    queue: VecDeque<Vec<u8>>,
}

impl Loopback {
    /// Creates a loopback device.
    pub fn new() -> Loopback {
        Loopback {
            queue: VecDeque::new(),
        }
    }

    /// Number of frames waiting to loop back.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }
}

impl Device for Loopback {
    fn capabilities(&self) -> DeviceCapabilities {
        DeviceCapabilities {
            medium: Medium::Loopback,
            max_transmission_unit: 65535,
            checksum: ChecksumCapabilities::default(),
            ethernet: EthernetCapabilities::offloaded(),
        }
    }

    fn link_state(&self) -> LinkState {
        LinkState {
            up: true,
            speed: 0,
            full_duplex: true,
        }
    }

    fn send(&mut self, frame: &NetBuffer) -> crate::Result<()> {
        self.queue.push_back(frame.to_vec());
        Ok(())
    }

    fn receive(&mut self, buffer: &mut [u8]) -> Option<usize> {
        let frame = self.queue.pop_front()?;
        let length = frame.len().min(buffer.len());
        buffer[..length].copy_from_slice(&frame[..length]);
        Some(length)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn frames_loop_back_in_order() {
        let mut device = Loopback::new();
        device.send(&NetBuffer::from(&b"first"[..])).unwrap();
        device.send(&NetBuffer::from(&b"second"[..])).unwrap();
        assert_eq!(device.pending(), 2);

        let mut buffer = [0u8; 64];
        let len = device.receive(&mut buffer).unwrap();
        assert_eq!(&buffer[..len], b"first");
        let len = device.receive(&mut buffer).unwrap();
        assert_eq!(&buffer[..len], b"second");
        assert!(device.receive(&mut buffer).is_none());
    }
}
