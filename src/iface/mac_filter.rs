use heapless::Vec;

use crate::config::MAC_FILTER_SIZE;
use crate::wire::EthernetAddress;

/// One slot of the destination-address filter. A slot with a zero
/// reference count is free and its address bytes are kept zeroed.
#[derive(Debug, Clone, Copy, Default)]
pub struct Entry {
    pub addr: EthernetAddress,
    pub ref_count: u32,
    /// The slot was claimed but the hardware filter has not absorbed it
    /// yet.
    pub add_pending: bool,
    /// The slot was released but the hardware filter still matches it.
    pub delete_pending: bool,
}

impl Entry {
    const fn is_free(&self) -> bool {
        self.ref_count == 0 && !self.delete_pending
    }
}

/// What [MacFilter::accept] / [MacFilter::drop_addr] did to the table,
/// telling the caller whether the hardware filter must be re-pushed.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum FilterUpdate {
    /// Only a reference count moved; hardware state is unchanged.
    RefCountOnly,
    /// The acceptance set changed; push it to the NIC, then call
    /// [MacFilter::commit].
    HardwareUpdate,
}

/// The reference-counted set of destination addresses an interface
/// accepts, mirrored into the NIC's hardware filter.
///
/// Broadcast is always accepted at the driver level and never occupies a
/// slot.
#[derive(Debug, Default)]
pub struct MacFilter {
    entries: [Entry; MAC_FILTER_SIZE],
}

impl MacFilter {
    pub fn new() -> MacFilter {
        MacFilter::default()
    }

    /// Add a reference to `addr`, claiming a slot on first use.
    /// Returns `None` when the table is full.
    pub fn accept(&mut self, addr: EthernetAddress) -> Option<FilterUpdate> {
        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|entry| entry.ref_count > 0 && entry.addr == addr)
        {
            entry.ref_count += 1;
            return Some(FilterUpdate::RefCountOnly);
        }

        let slot = self.entries.iter_mut().find(|entry| entry.is_free())?;
        slot.addr = addr;
        slot.ref_count = 1;
        slot.add_pending = true;
        Some(FilterUpdate::HardwareUpdate)
    }

    /// Drop a reference to `addr`, freeing the slot when the last one
    /// goes. Returns `None` when the address is not present.
    pub fn drop_addr(&mut self, addr: EthernetAddress) -> Option<FilterUpdate> {
        let entry = self
            .entries
            .iter_mut()
            .find(|entry| entry.ref_count > 0 && entry.addr == addr)?;
        entry.ref_count -= 1;
        if entry.ref_count > 0 {
            return Some(FilterUpdate::RefCountOnly);
        }
        entry.delete_pending = true;
        Some(FilterUpdate::HardwareUpdate)
    }

    /// Clear the pending markers once the hardware filter was pushed,
    /// zeroing released slots.
    pub fn commit(&mut self) {
        for entry in self.entries.iter_mut() {
            entry.add_pending = false;
            if entry.delete_pending {
                *entry = Entry::default();
            }
        }
    }

    /// The addresses the hardware should accept, in slot order.
    pub fn hardware_entries(&self) -> Vec<EthernetAddress, MAC_FILTER_SIZE> {
        self.entries
            .iter()
            .filter(|entry| entry.ref_count > 0)
            .map(|entry| entry.addr)
            .collect()
    }

    /// Query whether `addr` occupies a slot.
    pub fn contains(&self, addr: &EthernetAddress) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.ref_count > 0 && entry.addr == *addr)
    }

    /// Reference count of `addr`, zero when absent.
    pub fn ref_count(&self, addr: &EthernetAddress) -> u32 {
        self.entries
            .iter()
            .find(|entry| entry.ref_count > 0 && entry.addr == *addr)
            .map_or(0, |entry| entry.ref_count)
    }

    /// The destination check applied to every inbound frame: the
    /// interface's own address and broadcast always pass, multicast
    /// passes when subscribed.
    pub fn accepts(&self, local_addr: &EthernetAddress, dst_addr: &EthernetAddress) -> bool {
        if dst_addr == local_addr || dst_addr.is_broadcast() {
            return true;
        }
        dst_addr.is_multicast() && self.contains(dst_addr)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const M1: EthernetAddress = EthernetAddress([0x01, 0x00, 0x5e, 0x00, 0x00, 0x01]);

    #[test]
    fn refcount_lifecycle() {
        let mut filter = MacFilter::new();
        let mut hardware_updates = 0;

        // first accept claims a slot and wants a hardware push
        assert_eq!(filter.accept(M1), Some(FilterUpdate::HardwareUpdate));
        hardware_updates += 1;
        filter.commit();
        assert_eq!(filter.ref_count(&M1), 1);

        // duplicate accept only bumps the count
        assert_eq!(filter.accept(M1), Some(FilterUpdate::RefCountOnly));
        assert_eq!(filter.ref_count(&M1), 2);

        // first drop keeps the entry
        assert_eq!(filter.drop_addr(M1), Some(FilterUpdate::RefCountOnly));
        assert_eq!(filter.ref_count(&M1), 1);
        assert!(filter.contains(&M1));

        // last drop frees and zeroes the slot
        assert_eq!(filter.drop_addr(M1), Some(FilterUpdate::HardwareUpdate));
        hardware_updates += 1;
        filter.commit();
        assert!(!filter.contains(&M1));
        assert!(filter
            .entries
            .iter()
            .all(|entry| entry.addr == EthernetAddress::UNSPECIFIED));

        assert_eq!(hardware_updates, 2);
        assert_eq!(filter.drop_addr(M1), None);
    }

    #[test]
    fn full_table() {
        let mut filter = MacFilter::new();
        for i in 0..MAC_FILTER_SIZE as u8 {
            assert!(filter
                .accept(EthernetAddress([0x01, 0, 0x5e, 0, 0, i]))
                .is_some());
            filter.commit();
        }
        assert_eq!(filter.accept(M1), None);
    }

    #[test]
    fn destination_check() {
        let local = EthernetAddress([0x02, 0, 0, 0, 0, 1]);
        let mut filter = MacFilter::new();

        assert!(filter.accepts(&local, &local));
        assert!(filter.accepts(&local, &EthernetAddress::BROADCAST));
        // unsubscribed multicast and foreign unicast are rejected
        assert!(!filter.accepts(&local, &M1));
        assert!(!filter.accepts(&local, &EthernetAddress([0x02, 0, 0, 0, 0, 2])));

        filter.accept(M1);
        filter.commit();
        assert!(filter.accepts(&local, &M1));
    }
}
