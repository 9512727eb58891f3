use heapless::Vec;

use crate::config::{ARP_CACHE_SIZE, ARP_MAX_PENDING_PACKETS};
use crate::phy::TxAncillary;
use crate::storage::NetBuffer;
use crate::time::{Duration, Instant};
use crate::wire::{EthernetAddress, EthernetProtocol, IpAddress};

/// The reachability state of a cached neighbor.
///
/// ARP-learned entries move through the probing lifecycle; `Permanent`
/// entries are installed by the integrator (the only way to reach an
/// IPv6 next hop, since this stack ships no neighbor discovery) and
/// never age.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum State {
    /// A resolution request is on the wire; the hardware address is not
    /// known yet.
    Incomplete,
    /// The mapping was confirmed recently.
    Reachable,
    /// The mapping outlived its confirmation and will be re-probed on
    /// next use.
    Stale,
    /// The mapping is in use; a unicast probe goes out once the delay
    /// elapses.
    Delay,
    /// Unicast probes are on the wire.
    Probe,
    /// Installed statically, never ages.
    Permanent,
}

/// A frame waiting for its destination to resolve: the network-layer
/// payload plus what the link layer needs to finish framing it.
#[derive(Debug)]
pub struct PendingFrame {
    pub buffer: NetBuffer,
    pub ethertype: EthernetProtocol,
    pub ancillary: TxAncillary,
}

/// A cached neighbor.
///
/// A neighbor mapping translates from a protocol address to a hardware
/// address and carries the probing state machine driven by the 200 ms
/// ARP tick.
#[derive(Debug)]
pub struct Neighbor {
    pub protocol_addr: IpAddress,
    pub hardware_addr: EthernetAddress,
    pub state: State,
    /// When the entry last changed state (or was last confirmed).
    pub timestamp: Instant,
    /// How long the current state lasts before the tick acts on it.
    pub timeout: Duration,
    pub retransmit_count: u8,
    pending: std::vec::Vec<PendingFrame>,
}

impl Neighbor {
    fn new(protocol_addr: IpAddress, state: State, now: Instant, timeout: Duration) -> Neighbor {
        Neighbor {
            protocol_addr,
            hardware_addr: EthernetAddress::UNSPECIFIED,
            state,
            timestamp: now,
            timeout,
            retransmit_count: 0,
            pending: std::vec::Vec::new(),
        }
    }

    /// Queue a frame until resolution completes. The queue is bounded;
    /// overflow evicts the oldest frame.
    pub fn enqueue(&mut self, frame: PendingFrame) -> bool {
        let mut evicted = false;
        if self.pending.len() >= ARP_MAX_PENDING_PACKETS {
            self.pending.remove(0);
            evicted = true;
        }
        self.pending.push(frame);
        !evicted
    }

    /// Take every queued frame, leaving the queue empty.
    pub fn take_pending(&mut self) -> std::vec::Vec<PendingFrame> {
        core::mem::take(&mut self.pending)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Whether the tick should act on this entry now.
    pub fn expired(&self, now: Instant) -> bool {
        now >= self.timestamp + self.timeout
    }

    /// Move to `state` and restart its clock.
    pub fn set_state(&mut self, state: State, now: Instant, timeout: Duration) {
        self.state = state;
        self.timestamp = now;
        self.timeout = timeout;
        if !matches!(state, State::Incomplete | State::Probe) {
            self.retransmit_count = 0;
        }
    }
}

/// A bounded neighbor cache.
///
/// When full, allocation evicts the entry that went longest without a
/// state change, dropping whatever frames it held.
#[derive(Debug, Default)]
pub struct Cache {
    entries: Vec<Neighbor, ARP_CACHE_SIZE>,
}

impl Cache {
    pub fn new() -> Cache {
        Cache {
            entries: Vec::new(),
        }
    }

    pub fn lookup(&self, protocol_addr: &IpAddress) -> Option<&Neighbor> {
        self.entries
            .iter()
            .find(|entry| entry.protocol_addr == *protocol_addr)
    }

    pub fn lookup_mut(&mut self, protocol_addr: &IpAddress) -> Option<&mut Neighbor> {
        self.entries
            .iter_mut()
            .find(|entry| entry.protocol_addr == *protocol_addr)
    }

    /// Allocate an entry for `protocol_addr`, evicting the oldest
    /// non-permanent entry if the cache is full. Returns `None` when
    /// every slot is permanent.
    pub fn create(
        &mut self,
        protocol_addr: IpAddress,
        state: State,
        now: Instant,
        timeout: Duration,
    ) -> Option<&mut Neighbor> {
        if let Some(index) = self
            .entries
            .iter()
            .position(|entry| entry.protocol_addr == protocol_addr)
        {
            let entry = &mut self.entries[index];
            entry.set_state(state, now, timeout);
            return Some(entry);
        }

        if self.entries.is_full() {
            let index = self
                .entries
                .iter()
                .enumerate()
                .filter(|(_, entry)| entry.state != State::Permanent)
                .min_by_key(|(_, entry)| entry.timestamp)
                .map(|(index, _)| index)?;
            self.entries.remove(index);
        }

        if self
            .entries
            .push(Neighbor::new(protocol_addr, state, now, timeout))
            .is_err()
        {
            unreachable!("a slot was freed above");
        }
        let index = self.entries.len() - 1;
        Some(&mut self.entries[index])
    }

    /// Install a static mapping that never ages.
    pub fn add_permanent(
        &mut self,
        protocol_addr: IpAddress,
        hardware_addr: EthernetAddress,
        now: Instant,
    ) -> bool {
        match self.create(protocol_addr, State::Permanent, now, Duration::ZERO) {
            Some(entry) => {
                entry.hardware_addr = hardware_addr;
                true
            }
            None => false,
        }
    }

    /// Remove the entry for `protocol_addr`, dropping its queue.
    pub fn remove(&mut self, protocol_addr: &IpAddress) {
        if let Some(index) = self
            .entries
            .iter()
            .position(|entry| entry.protocol_addr == *protocol_addr)
        {
            self.entries.remove(index);
        }
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Neighbor> {
        self.entries.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn flush(&mut self) {
        self.entries.clear()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::wire::Ipv4Address;

    fn addr(last: u8) -> IpAddress {
        IpAddress::Ipv4(Ipv4Address::new(10, 0, 0, last))
    }

    #[test]
    fn create_lookup_remove() {
        let mut cache = Cache::new();
        let now = Instant::ZERO;
        cache
            .create(addr(1), State::Incomplete, now, Duration::from_secs(1))
            .unwrap();
        assert_eq!(cache.lookup(&addr(1)).unwrap().state, State::Incomplete);
        assert!(cache.lookup(&addr(2)).is_none());

        cache.remove(&addr(1));
        assert!(cache.lookup(&addr(1)).is_none());
    }

    #[test]
    fn full_cache_evicts_oldest() {
        let mut cache = Cache::new();
        for i in 0..ARP_CACHE_SIZE {
            let entry = cache
                .create(
                    addr(i as u8),
                    State::Reachable,
                    Instant::from_millis(i as i64),
                    Duration::from_secs(60),
                )
                .unwrap();
            entry.hardware_addr = EthernetAddress([0x02, 0, 0, 0, 0, i as u8]);
        }
        assert_eq!(cache.len(), ARP_CACHE_SIZE);

        // entry 0 carries the oldest timestamp and is the victim
        cache
            .create(
                addr(100),
                State::Incomplete,
                Instant::from_millis(1000),
                Duration::from_secs(1),
            )
            .unwrap();
        assert_eq!(cache.len(), ARP_CACHE_SIZE);
        assert!(cache.lookup(&addr(0)).is_none());
        assert!(cache.lookup(&addr(100)).is_some());
    }

    #[test]
    fn pending_queue_bounded() {
        let mut cache = Cache::new();
        let entry = cache
            .create(
                addr(1),
                State::Incomplete,
                Instant::ZERO,
                Duration::from_secs(1),
            )
            .unwrap();

        for tag in 0..3u8 {
            entry.enqueue(PendingFrame {
                buffer: NetBuffer::from(&[tag][..]),
                ethertype: EthernetProtocol::Ipv4,
                ancillary: TxAncillary::default(),
            });
        }
        // bounded at two; the oldest was evicted
        assert_eq!(entry.pending_len(), ARP_MAX_PENDING_PACKETS);
        let frames = entry.take_pending();
        assert_eq!(frames[0].buffer.to_vec(), vec![1]);
        assert_eq!(frames[1].buffer.to_vec(), vec![2]);
        assert_eq!(entry.pending_len(), 0);
    }

    #[test]
    fn permanent_entries_resist_eviction() {
        let mut cache = Cache::new();
        for i in 0..ARP_CACHE_SIZE {
            cache.add_permanent(
                addr(i as u8),
                EthernetAddress([0x02, 0, 0, 0, 0, i as u8]),
                Instant::ZERO,
            );
        }
        assert!(cache
            .create(
                addr(100),
                State::Incomplete,
                Instant::ZERO,
                Duration::from_secs(1)
            )
            .is_none());
    }
}
