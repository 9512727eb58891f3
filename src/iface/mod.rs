/*! Network interfaces and the link-layer data path.

An [Interface] is a logical object: the physical NIC underneath is found
by walking the `parent` chain, so an 802.1Q virtual interface is just an
interface whose parent owns the driver and whose VLAN/VMAN/port ids
select which tagged frames it sees. The whole table lives in
[Interfaces]; every walk is bounded by the table size, so a
misconfigured parent loop cannot hang the stack.

The inbound path ([Interfaces::process_frame]) verifies and strips the
FCS when the hardware does not, peels 802.1ad/802.1Q tags, demultiplexes
the frame to every matching interface, applies the destination-address
filter and consumes ARP internally; network-layer payloads and
raw-socket copies are handed back to the caller. The outbound path
([Interfaces::send_frame]) does the mirror image: tag insertion into
reserved headroom, padding and FCS emission where the hardware lacks the
offload.
*/

pub mod mac_filter;
pub mod neighbor;

pub use self::mac_filter::{FilterUpdate, MacFilter};
pub use self::neighbor::{Cache as NeighborCache, Neighbor, State as NeighborState};

use core::ops::Range;

use byteorder::{ByteOrder, LittleEndian};
use heapless::Vec;
use log::{debug, trace};

use crate::config::{
    ARP_DELAY_FIRST_PROBE_TIME, ARP_MAX_PROBES, ARP_MAX_REQUESTS, ARP_PROBE_TIMEOUT,
    ARP_REACHABLE_TIME, ARP_REQUEST_TIMEOUT, IFACE_COUNT, IFACE_IPV4_ADDR_COUNT,
};
use crate::iface::neighbor::PendingFrame;
use crate::phy::{Device, LinkState, SwitchDriver, TxAncillary};
use crate::storage::NetBuffer;
use crate::time::Instant;
use crate::wire::{
    crc32_chunks, ArpOperation, ArpPacket, ArpRepr, EthernetAddress, EthernetFrame,
    EthernetProtocol, EthernetRepr, IpAddress, Ipv4Address, Ipv4Cidr, Ipv6Cidr, VlanTag,
    VlanTagControl, ARP_PACKET_LEN, CRC32_RESIDUE, ETHERNET_HEADER_LEN, ETHERNET_MIN_FRAME_LEN,
    FCS_LEN, VLAN_TAG_LEN,
};
use crate::{Error, Result};

/// Headroom reserved in front of every outbound payload: the Ethernet
/// header plus up to three 4-octet tags, so tag insertion never moves
/// the payload.
pub const FRAME_HEADROOM: usize = ETHERNET_HEADER_LEN + 3 * VLAN_TAG_LEN;

/// Allocate a buffer shaped for the outbound frame path.
pub fn alloc_frame_buffer() -> NetBuffer {
    NetBuffer::with_headroom(FRAME_HEADROOM)
}

/// Interface counters of the standard interfaces MIB. The stack only
/// increments them; an SNMP agent (out of scope) owns presentation.
#[derive(Debug, Clone, Copy, Default)]
pub struct InterfaceCounters {
    pub if_in_octets: u64,
    pub if_in_ucast_pkts: u64,
    pub if_in_nucast_pkts: u64,
    pub if_in_discards: u64,
    pub if_in_errors: u64,
    pub if_in_unknown_protos: u64,
    pub if_out_octets: u64,
    pub if_out_ucast_pkts: u64,
    pub if_out_nucast_pkts: u64,
    pub if_out_discards: u64,
    pub if_out_errors: u64,
}

/// Assignment state of a local IPv4 address.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum AddrState {
    /// Uniqueness on the link is still being verified; the address never
    /// answers ARP and never sources traffic.
    Tentative,
    /// Fully usable.
    Preferred,
}

/// A local IPv4 address with the one-way conflict signal read by the
/// address-configuration collaborator.
#[derive(Debug, Clone, Copy)]
pub struct Ipv4AddrEntry {
    pub cidr: Ipv4Cidr,
    pub state: AddrState,
    pub conflict: bool,
}

/// Callback invoked for inbound 802.2 LLC frames, with the interface
/// index, the decoded header and the LLC payload.
pub type LlcCallback = Box<dyn FnMut(usize, &EthernetRepr, &[u8]) + Send>;

/// A logical network interface.
pub struct Interface {
    mac_addr: EthernetAddress,
    parent: Option<usize>,
    has_device: bool,
    vlan_id: Option<u16>,
    vman_id: Option<u16>,
    switch_port: Option<u8>,
    pub(crate) link: LinkState,
    mac_filter: MacFilter,
    neighbor_cache: NeighborCache,
    ipv4_addrs: Vec<Ipv4AddrEntry, IFACE_IPV4_ADDR_COUNT>,
    ipv6_addrs: Vec<Ipv6Cidr, 2>,
    counters: InterfaceCounters,
    llc_rx_callback: Option<LlcCallback>,
    last_arp_tick: Instant,
}

impl core::fmt::Debug for Interface {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("Interface")
            .field("mac_addr", &self.mac_addr)
            .field("parent", &self.parent)
            .field("has_device", &self.has_device)
            .field("vlan_id", &self.vlan_id)
            .field("vman_id", &self.vman_id)
            .field("switch_port", &self.switch_port)
            .finish_non_exhaustive()
    }
}

impl Interface {
    /// Create an interface backed by its own NIC driver.
    pub fn physical(mac_addr: EthernetAddress) -> Interface {
        Interface {
            mac_addr,
            parent: None,
            has_device: true,
            vlan_id: None,
            vman_id: None,
            switch_port: None,
            link: LinkState::default(),
            mac_filter: MacFilter::new(),
            neighbor_cache: NeighborCache::new(),
            ipv4_addrs: Vec::new(),
            ipv6_addrs: Vec::new(),
            counters: InterfaceCounters::default(),
            llc_rx_callback: None,
            last_arp_tick: Instant::ZERO,
        }
    }

    /// Create a virtual interface on top of `parent`. Its MAC and driver
    /// are inherited through the parent chain unless overridden.
    pub fn virtual_on(parent: usize) -> Interface {
        let mut iface = Interface::physical(EthernetAddress::UNSPECIFIED);
        iface.parent = Some(parent);
        iface.has_device = false;
        iface
    }

    pub fn set_vlan_id(&mut self, vid: Option<u16>) {
        self.vlan_id = vid;
    }

    pub fn set_vman_id(&mut self, vid: Option<u16>) {
        self.vman_id = vid;
    }

    pub fn set_switch_port(&mut self, port: Option<u8>) {
        self.switch_port = port;
    }

    pub fn counters(&self) -> &InterfaceCounters {
        &self.counters
    }

    pub(crate) fn counters_mut(&mut self) -> &mut InterfaceCounters {
        &mut self.counters
    }

    pub fn link_state(&self) -> LinkState {
        self.link
    }

    pub fn neighbor_cache(&self) -> &NeighborCache {
        &self.neighbor_cache
    }

    pub fn neighbor_cache_mut(&mut self) -> &mut NeighborCache {
        &mut self.neighbor_cache
    }

    pub fn mac_filter(&self) -> &MacFilter {
        &self.mac_filter
    }

    /// Attach the 802.2 LLC receive callback, replacing any previous one.
    pub fn attach_llc_rx_callback(&mut self, callback: LlcCallback) {
        self.llc_rx_callback = Some(callback);
    }

    pub fn detach_llc_rx_callback(&mut self) {
        self.llc_rx_callback = None;
    }

    /// Assign an IPv4 address. A tentative address takes part in
    /// duplicate address detection before it is promoted by the
    /// configuration collaborator.
    pub fn add_ipv4_addr(&mut self, cidr: Ipv4Cidr, state: AddrState) -> Result<()> {
        self.ipv4_addrs
            .push(Ipv4AddrEntry {
                cidr,
                state,
                conflict: false,
            })
            .map_err(|_| Error::OutOfResources)
    }

    pub fn add_ipv6_addr(&mut self, cidr: Ipv6Cidr) -> Result<()> {
        self.ipv6_addrs.push(cidr).map_err(|_| Error::OutOfResources)
    }

    pub fn ipv4_addrs(&self) -> &[Ipv4AddrEntry] {
        &self.ipv4_addrs
    }

    pub fn ipv4_addrs_mut(&mut self) -> &mut [Ipv4AddrEntry] {
        &mut self.ipv4_addrs
    }

    pub fn ipv6_addrs(&self) -> &[Ipv6Cidr] {
        &self.ipv6_addrs
    }

    /// Query whether `addr` is assigned here, tentative entries included.
    pub fn has_ipv4_addr(&self, addr: Ipv4Address) -> bool {
        self.ipv4_addrs
            .iter()
            .any(|entry| entry.cidr.address() == addr)
    }

    fn ipv4_addr_is_tentative(&self, addr: Ipv4Address) -> bool {
        self.ipv4_addrs
            .iter()
            .any(|entry| entry.cidr.address() == addr && entry.state == AddrState::Tentative)
    }

    /// Query whether `addr` is the limited broadcast or the directed
    /// broadcast of a local subnet.
    pub fn is_broadcast_ipv4(&self, addr: Ipv4Address) -> bool {
        addr.is_broadcast()
            || self
                .ipv4_addrs
                .iter()
                .any(|entry| entry.cidr.broadcast() == Some(addr))
    }

    /// Query whether the address is local to this interface, either
    /// family.
    pub fn has_ip_addr(&self, addr: &IpAddress) -> bool {
        match addr {
            IpAddress::Ipv4(addr) => self.has_ipv4_addr(*addr),
            IpAddress::Ipv6(addr) => self
                .ipv6_addrs
                .iter()
                .any(|cidr| cidr.address() == *addr),
        }
    }

    /// Pick the source address for traffic towards `dst`: prefer a
    /// preferred address on the destination subnet, fall back to the
    /// first preferred address.
    pub fn select_ipv4_source(&self, dst: Ipv4Address) -> Option<Ipv4Address> {
        let usable = || {
            self.ipv4_addrs
                .iter()
                .filter(|entry| entry.state == AddrState::Preferred)
        };
        usable()
            .find(|entry| entry.cidr.contains_addr(&dst))
            .or_else(|| usable().next())
            .map(|entry| entry.cidr.address())
    }
}

/// Where a demultiplexed frame is headed.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum RxKind {
    Ipv4,
    Ipv6,
    /// Consumed by the neighbor engine; listed only for raw sockets.
    Arp,
    /// 802.2 LLC, already fed to the attached callback if any.
    Llc,
    /// EtherType nobody here speaks; counted and otherwise dropped.
    Unknown,
}

/// One delivery produced by the inbound frame path: a matched interface
/// plus where the (tag-free) header and payload sit in the frame buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct RxFrame {
    pub iface: usize,
    pub kind: RxKind,
    pub header: EthernetRepr,
    /// The EtherType field as it appeared on the wire (an 802.3 length
    /// for LLC frames).
    pub raw_ethertype: u16,
    pub payload: Range<usize>,
    pub switch_port: Option<u8>,
}

/// The fixed interface table.
#[derive(Debug, Default)]
pub struct Interfaces {
    ifaces: Vec<Interface, IFACE_COUNT>,
}

impl Interfaces {
    pub fn new() -> Interfaces {
        Interfaces { ifaces: Vec::new() }
    }

    /// Add an interface, returning its index.
    pub fn add(&mut self, iface: Interface) -> Result<usize> {
        self.ifaces.push(iface).map_err(|_| Error::OutOfResources)?;
        Ok(self.ifaces.len() - 1)
    }

    pub fn get(&self, index: usize) -> Result<&Interface> {
        self.ifaces.get(index).ok_or(Error::InvalidInterface)
    }

    pub fn get_mut(&mut self, index: usize) -> Result<&mut Interface> {
        self.ifaces.get_mut(index).ok_or(Error::InvalidInterface)
    }

    pub fn len(&self) -> usize {
        self.ifaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ifaces.is_empty()
    }

    /// The MAC an interface sources frames with: its own if set,
    /// otherwise the first non-zero one up the parent chain. The walk is
    /// bounded by the table size.
    pub fn logical_mac(&self, index: usize) -> EthernetAddress {
        let mut current = index;
        for _ in 0..IFACE_COUNT {
            let Some(iface) = self.ifaces.get(current) else {
                break;
            };
            if !iface.mac_addr.is_unspecified() {
                return iface.mac_addr;
            }
            match iface.parent {
                Some(parent) => current = parent,
                None => break,
            }
        }
        EthernetAddress::UNSPECIFIED
    }

    /// The interface that owns the NIC driver transmitting for `index`.
    pub fn physical_index(&self, index: usize) -> Option<usize> {
        let mut current = index;
        for _ in 0..IFACE_COUNT {
            let iface = self.ifaces.get(current)?;
            if iface.has_device {
                return Some(current);
            }
            current = iface.parent?;
        }
        None
    }

    /// Reference-count a destination address into the filter and push
    /// the acceptance set to the hardware when it changed.
    pub fn accept_mac_addr(
        &mut self,
        device: &mut dyn Device,
        index: usize,
        addr: EthernetAddress,
    ) -> Result<()> {
        let iface = self.get_mut(index)?;
        match iface.mac_filter.accept(addr) {
            None => Err(Error::Failure),
            Some(FilterUpdate::RefCountOnly) => Ok(()),
            Some(FilterUpdate::HardwareUpdate) => {
                device.update_mac_filter(&iface.mac_filter.hardware_entries())?;
                iface.mac_filter.commit();
                Ok(())
            }
        }
    }

    /// Release one reference to a destination address, updating the
    /// hardware filter when the last one goes.
    pub fn drop_mac_addr(
        &mut self,
        device: &mut dyn Device,
        index: usize,
        addr: EthernetAddress,
    ) -> Result<()> {
        let iface = self.get_mut(index)?;
        match iface.mac_filter.drop_addr(addr) {
            None => Err(Error::NotFound),
            Some(FilterUpdate::RefCountOnly) => Ok(()),
            Some(FilterUpdate::HardwareUpdate) => {
                device.update_mac_filter(&iface.mac_filter.hardware_entries())?;
                iface.mac_filter.commit();
                Ok(())
            }
        }
    }

    /// Process one frame received on the physical interface `phys`.
    ///
    /// Returns one delivery per matching interface that accepted the
    /// destination address. ARP is consumed here (possibly emitting
    /// replies through `device`); everything else is the caller's to
    /// route further. Raw-Ethernet sockets are entitled to a copy of
    /// every delivery regardless of its [RxKind].
    pub fn process_frame(
        &mut self,
        device: &mut dyn Device,
        mut switch: Option<&mut dyn SwitchDriver>,
        phys: usize,
        frame: &mut std::vec::Vec<u8>,
        now: Instant,
    ) -> Result<Vec<RxFrame, IFACE_COUNT>> {
        let caps = device.capabilities();

        let octets = frame.len() as u64;
        {
            let counters = &mut self.get_mut(phys)?.counters;
            counters.if_in_octets += octets;
        }

        // FCS handling when the hardware leaves it in place
        if !caps.ethernet.auto_crc_strip {
            if frame.len() < ETHERNET_HEADER_LEN + FCS_LEN {
                self.get_mut(phys)?.counters.if_in_errors += 1;
                return Err(Error::InvalidLength);
            }
            if !caps.ethernet.auto_crc_verify
                && crc32_chunks([&frame[..]]) != CRC32_RESIDUE
            {
                self.get_mut(phys)?.counters.if_in_errors += 1;
                return Err(Error::WrongChecksum);
            }
            frame.truncate(frame.len() - FCS_LEN);
        }

        // proprietary switch tagging, which may name the ingress port
        let switch_port = match switch.as_mut() {
            Some(switch) => switch.untag_frame(frame)?,
            None => None,
        };

        if frame.len() < ETHERNET_HEADER_LEN {
            self.get_mut(phys)?.counters.if_in_errors += 1;
            return Err(Error::InvalidLength);
        }

        let (dst_addr, src_addr, mut raw_ethertype) = {
            let parsed = EthernetFrame::new_unchecked(&frame[..]);
            (parsed.dst_addr(), parsed.src_addr(), parsed.raw_ethertype())
        };

        {
            let counters = &mut self.get_mut(phys)?.counters;
            if dst_addr.is_unicast() {
                counters.if_in_ucast_pkts += 1;
            } else {
                counters.if_in_nucast_pkts += 1;
            }
        }

        // peel the S-tag then the C-tag, 802.1ad order
        let mut offset = ETHERNET_HEADER_LEN;
        let mut vman_id = None;
        let mut vlan_id = None;
        if EthernetProtocol::from(raw_ethertype) == EthernetProtocol::VmanTagged {
            let tag = VlanTag::new_checked(&frame[offset..])?;
            vman_id = Some(tag.tci().vid);
            raw_ethertype = tag.ethertype().into();
            offset += VLAN_TAG_LEN;
        }
        if EthernetProtocol::from(raw_ethertype) == EthernetProtocol::VlanTagged {
            let tag = VlanTag::new_checked(&frame[offset..])?;
            vlan_id = Some(tag.tci().vid);
            raw_ethertype = tag.ethertype().into();
            offset += VLAN_TAG_LEN;
        }

        let ethertype = EthernetProtocol::from(raw_ethertype);
        let payload = offset..frame.len();

        let mut deliveries: Vec<RxFrame, IFACE_COUNT> = Vec::new();
        for index in 0..self.ifaces.len() {
            if self.physical_index(index) != Some(phys) {
                continue;
            }
            let local_mac = self.logical_mac(index);
            let iface = &self.ifaces[index];
            if iface.vlan_id != vlan_id || iface.vman_id != vman_id {
                continue;
            }
            if let Some(port) = iface.switch_port {
                if switch_port != Some(port) {
                    continue;
                }
            }
            if !iface.mac_filter.accepts(&local_mac, &dst_addr) {
                trace!("iface {index}: frame to {dst_addr} rejected by filter");
                continue;
            }

            let kind = if EthernetProtocol::is_llc_length(raw_ethertype) {
                RxKind::Llc
            } else {
                match ethertype {
                    EthernetProtocol::Arp => RxKind::Arp,
                    EthernetProtocol::Ipv4 => RxKind::Ipv4,
                    EthernetProtocol::Ipv6 => RxKind::Ipv6,
                    _ => RxKind::Unknown,
                }
            };

            match kind {
                RxKind::Arp => {
                    if let Ok(packet) = ArpPacket::new_checked(&frame[payload.clone()]) {
                        if let Ok(repr) = ArpRepr::parse(&packet) {
                            self.process_arp(device, index, &repr, now)?;
                        }
                    }
                }
                RxKind::Llc => {
                    // detach during the call so the callback may use the table
                    let callback = self.ifaces[index].llc_rx_callback.take();
                    if let Some(mut callback) = callback {
                        let header = EthernetRepr {
                            src_addr,
                            dst_addr,
                            ethertype,
                        };
                        callback(index, &header, &frame[payload.clone()]);
                        let iface = &mut self.ifaces[index];
                        if iface.llc_rx_callback.is_none() {
                            iface.llc_rx_callback = Some(callback);
                        }
                    }
                }
                RxKind::Unknown => {
                    self.ifaces[index].counters.if_in_unknown_protos += 1;
                    debug!("iface {index}: unknown EtherType 0x{raw_ethertype:04x}");
                }
                RxKind::Ipv4 | RxKind::Ipv6 => (),
            }

            deliveries
                .push(RxFrame {
                    iface: index,
                    kind,
                    header: EthernetRepr {
                        src_addr,
                        dst_addr,
                        ethertype,
                    },
                    raw_ethertype,
                    payload: payload.clone(),
                    switch_port,
                })
                .ok();
        }

        Ok(deliveries)
    }

    /// Frame and transmit a network-layer payload.
    ///
    /// `buffer` must have been allocated with [alloc_frame_buffer] so the
    /// header and tags land in the reserved headroom.
    pub fn send_frame(
        &mut self,
        device: &mut dyn Device,
        mut switch: Option<&mut dyn SwitchDriver>,
        index: usize,
        dst_addr: EthernetAddress,
        ethertype: EthernetProtocol,
        ancillary: &TxAncillary,
        mut buffer: NetBuffer,
    ) -> Result<()> {
        let src_addr = self.logical_mac(index);
        let caps = device.capabilities();
        let (vlan_id, vman_id, switch_port) = {
            let iface = self.get(index)?;
            (iface.vlan_id, iface.vman_id, iface.switch_port)
        };

        // innermost first: [C-tag] then [S-tag], each pushing the
        // previous EtherType inwards
        let mut outer_ethertype = ethertype;
        if let Some(vid) = vlan_id {
            let tag_bytes = buffer.prepend(VLAN_TAG_LEN);
            let mut tag = VlanTag::new_unchecked(tag_bytes);
            tag.set_tci(VlanTagControl {
                pcp: ancillary.vlan_pcp,
                dei: ancillary.vlan_dei,
                vid,
            });
            tag.set_ethertype(outer_ethertype);
            outer_ethertype = EthernetProtocol::VlanTagged;
        }
        if let Some(vid) = vman_id {
            let tag_bytes = buffer.prepend(VLAN_TAG_LEN);
            let mut tag = VlanTag::new_unchecked(tag_bytes);
            tag.set_tci(VlanTagControl {
                pcp: ancillary.vman_pcp,
                dei: ancillary.vman_dei,
                vid,
            });
            tag.set_ethertype(outer_ethertype);
            outer_ethertype = EthernetProtocol::VmanTagged;
        }

        {
            let header = buffer.prepend(ETHERNET_HEADER_LEN);
            let mut frame = EthernetFrame::new_unchecked(header);
            frame.set_dst_addr(dst_addr);
            frame.set_src_addr(src_addr);
            frame.set_ethertype(outer_ethertype);
        }

        if let (Some(switch), Some(port)) = (switch.as_mut(), switch_port) {
            switch.tag_frame(&mut buffer, port)?;
        }

        if !caps.ethernet.auto_padding && buffer.len() < ETHERNET_MIN_FRAME_LEN {
            let padding = [0u8; ETHERNET_MIN_FRAME_LEN];
            let missing = ETHERNET_MIN_FRAME_LEN - buffer.len();
            buffer.append_slice(&padding[..missing]);
        }

        if !caps.ethernet.auto_crc_calc {
            let fcs = crc32_chunks(buffer.chunks(0, buffer.len()));
            let mut fcs_bytes = [0u8; FCS_LEN];
            LittleEndian::write_u32(&mut fcs_bytes, fcs);
            buffer.append_slice(&fcs_bytes);
        }

        let counters = &mut self.get_mut(index)?.counters;
        counters.if_out_octets += buffer.len() as u64;
        if dst_addr.is_unicast() {
            counters.if_out_ucast_pkts += 1;
        } else {
            counters.if_out_nucast_pkts += 1;
        }

        match device.send(&buffer) {
            Ok(()) => Ok(()),
            Err(err) => {
                self.get_mut(index)?.counters.if_out_errors += 1;
                Err(err)
            }
        }
    }

    /// Transmit a complete IP packet, resolving the next-hop hardware
    /// address. A packet whose neighbor is still resolving is queued on
    /// the cache entry and counts as sent.
    pub fn send_ip_frame(
        &mut self,
        device: &mut dyn Device,
        switch: Option<&mut dyn SwitchDriver>,
        index: usize,
        dst_addr: &IpAddress,
        ancillary: &TxAncillary,
        buffer: NetBuffer,
        now: Instant,
    ) -> Result<()> {
        let ethertype = match dst_addr.version() {
            crate::wire::IpVersion::Ipv4 => EthernetProtocol::Ipv4,
            crate::wire::IpVersion::Ipv6 => EthernetProtocol::Ipv6,
        };

        let dst_mac = match dst_addr {
            IpAddress::Ipv4(addr) => {
                if self.get(index)?.is_broadcast_ipv4(*addr) {
                    EthernetAddress::BROADCAST
                } else if addr.is_multicast() {
                    // RFC 1112 mapping: low 23 bits into 01-00-5e
                    let b = addr.as_bytes();
                    EthernetAddress([0x01, 0x00, 0x5e, b[1] & 0x7f, b[2], b[3]])
                } else {
                    match self.arp_resolve(device, index, *addr, now)? {
                        Some(mac) => mac,
                        None => {
                            // resolution went on the wire; park the packet
                            let iface = self.get_mut(index)?;
                            let entry = iface
                                .neighbor_cache
                                .lookup_mut(&IpAddress::Ipv4(*addr))
                                .ok_or(Error::AddressNotFound)?;
                            let pending = PendingFrame {
                                buffer,
                                ethertype,
                                ancillary: *ancillary,
                            };
                            if !entry.enqueue(pending) {
                                iface.counters.if_out_discards += 1;
                            }
                            return Ok(());
                        }
                    }
                }
            }
            IpAddress::Ipv6(addr) => {
                if addr.is_multicast() {
                    let b = addr.as_bytes();
                    EthernetAddress([0x33, 0x33, b[12], b[13], b[14], b[15]])
                } else {
                    // no neighbor discovery here; only static entries
                    // reach IPv6 unicast destinations
                    let hit = self
                        .get(index)?
                        .neighbor_cache
                        .lookup(&IpAddress::Ipv6(*addr))
                        .filter(|entry| entry.state == NeighborState::Permanent)
                        .map(|entry| entry.hardware_addr);
                    match hit {
                        Some(mac) => mac,
                        None => {
                            self.get_mut(index)?.counters.if_out_errors += 1;
                            return Err(Error::AddressNotFound);
                        }
                    }
                }
            }
        };

        self.send_frame(device, switch, index, dst_mac, ethertype, ancillary, buffer)
    }

    /// Resolve an IPv4 next hop.
    ///
    /// `Ok(Some(mac))` resolves immediately (possibly arming the stale
    /// re-probe); `Ok(None)` means a broadcast request just went out and
    /// the caller should queue its packet on the new entry.
    pub fn arp_resolve(
        &mut self,
        device: &mut dyn Device,
        index: usize,
        addr: Ipv4Address,
        now: Instant,
    ) -> Result<Option<EthernetAddress>> {
        let key = IpAddress::Ipv4(addr);
        let iface = self.get_mut(index)?;
        if let Some(entry) = iface.neighbor_cache.lookup_mut(&key) {
            return match entry.state {
                NeighborState::Incomplete => Ok(None),
                NeighborState::Stale => {
                    let mac = entry.hardware_addr;
                    entry.set_state(NeighborState::Delay, now, ARP_DELAY_FIRST_PROBE_TIME);
                    Ok(Some(mac))
                }
                _ => Ok(Some(entry.hardware_addr)),
            };
        }

        let entry = iface
            .neighbor_cache
            .create(key, NeighborState::Incomplete, now, ARP_REQUEST_TIMEOUT)
            .ok_or(Error::OutOfResources)?;
        entry.retransmit_count = 0;
        debug!("arp: resolving {addr}");
        self.arp_send_request(device, index, addr, EthernetAddress::BROADCAST)?;
        Ok(None)
    }

    /// The 200 ms neighbor state timer for one interface.
    pub fn arp_tick(&mut self, device: &mut dyn Device, index: usize, now: Instant) -> Result<()> {
        let iface = self.get_mut(index)?;
        let mut requests: std::vec::Vec<(Ipv4Address, EthernetAddress)> = std::vec::Vec::new();
        let mut removals: std::vec::Vec<IpAddress> = std::vec::Vec::new();

        for entry in iface.neighbor_cache.iter_mut() {
            if !entry.expired(now) {
                continue;
            }
            let IpAddress::Ipv4(ip) = entry.protocol_addr else {
                continue;
            };
            match entry.state {
                NeighborState::Incomplete => {
                    entry.retransmit_count += 1;
                    if entry.retransmit_count < ARP_MAX_REQUESTS {
                        entry.timestamp = now;
                        entry.timeout = ARP_REQUEST_TIMEOUT;
                        requests.push((ip, EthernetAddress::BROADCAST));
                    } else {
                        // resolution failed; queued packets go with it
                        let dropped = entry.take_pending().len() as u64;
                        iface.counters.if_out_discards += dropped;
                        removals.push(entry.protocol_addr);
                    }
                }
                NeighborState::Reachable => {
                    entry.set_state(NeighborState::Stale, now, crate::time::Duration::ZERO);
                }
                NeighborState::Delay => {
                    let mac = entry.hardware_addr;
                    entry.set_state(NeighborState::Probe, now, ARP_PROBE_TIMEOUT);
                    requests.push((ip, mac));
                }
                NeighborState::Probe => {
                    entry.retransmit_count += 1;
                    if entry.retransmit_count < ARP_MAX_PROBES {
                        entry.timestamp = now;
                        entry.timeout = ARP_PROBE_TIMEOUT;
                        requests.push((ip, entry.hardware_addr));
                    } else {
                        removals.push(entry.protocol_addr);
                    }
                }
                NeighborState::Stale | NeighborState::Permanent => (),
            }
        }

        for addr in removals {
            iface.neighbor_cache.remove(&addr);
        }
        for (ip, dst_mac) in requests {
            self.arp_send_request(device, index, ip, dst_mac)?;
        }
        Ok(())
    }

    /// Whether the 200 ms ARP subdivision elapsed for this interface.
    pub(crate) fn arp_tick_due(&mut self, index: usize, now: Instant) -> bool {
        let Ok(iface) = self.get_mut(index) else {
            return false;
        };
        if now >= iface.last_arp_tick + crate::config::ARP_TICK_INTERVAL {
            iface.last_arp_tick = now;
            true
        } else {
            false
        }
    }

    fn process_arp(
        &mut self,
        device: &mut dyn Device,
        index: usize,
        repr: &ArpRepr,
        now: Instant,
    ) -> Result<()> {
        let local_mac = self.logical_mac(index);
        let iface = self.get_mut(index)?;

        // conflict detection: any ARP whose sender claims a local address
        let mut valid_target = false;
        for entry in iface.ipv4_addrs.iter_mut() {
            if entry.cidr.address() == repr.source_protocol_addr {
                if entry.state == AddrState::Tentative {
                    entry.conflict = true;
                    return Ok(());
                } else if repr.source_hardware_addr != local_mac {
                    entry.conflict = true;
                    return Ok(());
                }
            }
            if entry.cidr.address() == repr.target_protocol_addr {
                valid_target = true;
            }
        }
        if !valid_target {
            return Ok(());
        }

        match repr.operation {
            ArpOperation::Request => self.process_arp_request(device, index, repr),
            ArpOperation::Reply => self.process_arp_reply(device, index, repr, now),
            ArpOperation::Unknown(_) => Ok(()),
        }
    }

    fn process_arp_request(
        &mut self,
        device: &mut dyn Device,
        index: usize,
        repr: &ArpRepr,
    ) -> Result<()> {
        let local_mac = self.logical_mac(index);
        let iface = self.get_mut(index)?;

        if iface.is_broadcast_ipv4(repr.source_protocol_addr)
            || repr.source_protocol_addr.is_multicast()
        {
            return Ok(());
        }

        // a host must not answer for an address it is still probing
        let mut valid_target = true;
        for entry in iface.ipv4_addrs.iter_mut() {
            if entry.state == AddrState::Tentative
                && entry.cidr.address() == repr.target_protocol_addr
            {
                valid_target = false;
                if repr.source_protocol_addr.is_unspecified()
                    && repr.source_hardware_addr != local_mac
                {
                    // a competing probe for the same address
                    entry.conflict = true;
                }
            }
        }
        if !valid_target {
            return Ok(());
        }

        trace!(
            "arp: who-has {} from {}",
            repr.target_protocol_addr,
            repr.source_protocol_addr
        );
        self.arp_send_reply(
            device,
            index,
            repr.target_protocol_addr,
            repr.source_protocol_addr,
            repr.source_hardware_addr,
        )
    }

    fn process_arp_reply(
        &mut self,
        device: &mut dyn Device,
        index: usize,
        repr: &ArpRepr,
        now: Instant,
    ) -> Result<()> {
        let iface = self.get_mut(index)?;

        if repr.source_protocol_addr.is_unspecified()
            || iface.is_broadcast_ipv4(repr.source_protocol_addr)
            || repr.source_protocol_addr.is_multicast()
        {
            return Ok(());
        }
        if repr.source_hardware_addr.is_unspecified()
            || repr.source_hardware_addr.is_broadcast()
            || repr.source_hardware_addr.is_multicast()
        {
            return Ok(());
        }
        if iface.ipv4_addr_is_tentative(repr.target_protocol_addr) {
            return Ok(());
        }

        let key = IpAddress::Ipv4(repr.source_protocol_addr);
        let mut flushed = std::vec::Vec::new();
        if let Some(entry) = iface.neighbor_cache.lookup_mut(&key) {
            match entry.state {
                NeighborState::Incomplete => {
                    entry.hardware_addr = repr.source_hardware_addr;
                    flushed = entry.take_pending();
                    entry.set_state(NeighborState::Reachable, now, ARP_REACHABLE_TIME);
                    debug!(
                        "arp: {} is-at {}",
                        repr.source_protocol_addr, repr.source_hardware_addr
                    );
                }
                NeighborState::Reachable => {
                    if entry.hardware_addr != repr.source_hardware_addr {
                        entry.state = NeighborState::Stale;
                    }
                }
                NeighborState::Probe => {
                    entry.hardware_addr = repr.source_hardware_addr;
                    entry.set_state(NeighborState::Reachable, now, ARP_REACHABLE_TIME);
                }
                _ => (),
            }
        }

        let dst_mac = repr.source_hardware_addr;
        for frame in flushed {
            self.send_frame(
                device,
                None,
                index,
                dst_mac,
                frame.ethertype,
                &frame.ancillary,
                frame.buffer,
            )?;
        }
        Ok(())
    }

    fn emit_arp(
        &mut self,
        device: &mut dyn Device,
        index: usize,
        dst_mac: EthernetAddress,
        repr: &ArpRepr,
    ) -> Result<()> {
        let mut buffer = alloc_frame_buffer();
        let mut bytes = [0u8; ARP_PACKET_LEN];
        let mut packet = ArpPacket::new_unchecked(&mut bytes[..]);
        repr.emit(&mut packet);
        buffer.append_slice(&bytes);
        self.send_frame(
            device,
            None,
            index,
            dst_mac,
            EthernetProtocol::Arp,
            &TxAncillary::default(),
            buffer,
        )
    }

    /// Broadcast (or unicast, during probing) a who-has request.
    pub fn arp_send_request(
        &mut self,
        device: &mut dyn Device,
        index: usize,
        target: Ipv4Address,
        dst_mac: EthernetAddress,
    ) -> Result<()> {
        let local_mac = self.logical_mac(index);
        let source = self
            .get(index)?
            .select_ipv4_source(target)
            .unwrap_or(Ipv4Address::UNSPECIFIED);
        let repr = ArpRepr {
            operation: ArpOperation::Request,
            source_hardware_addr: local_mac,
            source_protocol_addr: source,
            target_hardware_addr: EthernetAddress::UNSPECIFIED,
            target_protocol_addr: target,
        };
        self.emit_arp(device, index, dst_mac, &repr)
    }

    /// Duplicate-address-detection probe: the sender protocol address is
    /// unspecified so the question cannot pollute caches.
    pub fn arp_send_probe(
        &mut self,
        device: &mut dyn Device,
        index: usize,
        target: Ipv4Address,
    ) -> Result<()> {
        let local_mac = self.logical_mac(index);
        let repr = ArpRepr {
            operation: ArpOperation::Request,
            source_hardware_addr: local_mac,
            source_protocol_addr: Ipv4Address::UNSPECIFIED,
            target_hardware_addr: EthernetAddress::UNSPECIFIED,
            target_protocol_addr: target,
        };
        self.emit_arp(device, index, EthernetAddress::BROADCAST, &repr)
    }

    /// Gratuitous announcement after an address wins its probes.
    pub fn arp_send_announcement(
        &mut self,
        device: &mut dyn Device,
        index: usize,
        addr: Ipv4Address,
    ) -> Result<()> {
        let local_mac = self.logical_mac(index);
        let repr = ArpRepr {
            operation: ArpOperation::Request,
            source_hardware_addr: local_mac,
            source_protocol_addr: addr,
            target_hardware_addr: EthernetAddress::UNSPECIFIED,
            target_protocol_addr: addr,
        };
        self.emit_arp(device, index, EthernetAddress::BROADCAST, &repr)
    }

    /// Answer a who-has request.
    pub fn arp_send_reply(
        &mut self,
        device: &mut dyn Device,
        index: usize,
        source: Ipv4Address,
        target: Ipv4Address,
        target_mac: EthernetAddress,
    ) -> Result<()> {
        let local_mac = self.logical_mac(index);
        let repr = ArpRepr {
            operation: ArpOperation::Reply,
            source_hardware_addr: local_mac,
            source_protocol_addr: source,
            target_hardware_addr: target_mac,
            target_protocol_addr: target,
        };
        self.emit_arp(device, index, target_mac, &repr)
    }

    /// Bump the inbound-discard counter, the landing spot for allocation
    /// or queue-full drops above the link layer.
    pub fn count_in_discard(&mut self, index: usize) {
        if let Ok(iface) = self.get_mut(index) {
            iface.counters.if_in_discards += 1;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use byteorder::NetworkEndian;

    use crate::phy::{
        ChecksumCapabilities, DeviceCapabilities, EthernetCapabilities, Loopback, Medium,
    };

    const LOCAL_MAC: EthernetAddress = EthernetAddress([0x02, 0x00, 0x00, 0x00, 0x00, 0x01]);
    const PEER_MAC: EthernetAddress = EthernetAddress([0x02, 0x00, 0x00, 0x00, 0x00, 0x02]);
    const LOCAL_IP: Ipv4Address = Ipv4Address([10, 0, 0, 2]);
    const PEER_IP: Ipv4Address = Ipv4Address([10, 0, 0, 1]);

    /// A software-everything device: no padding, no CRC offloads.
    #[derive(Debug, Default)]
    struct BareDevice {
        sent: std::vec::Vec<std::vec::Vec<u8>>,
    }

    impl Device for BareDevice {
        fn capabilities(&self) -> DeviceCapabilities {
            DeviceCapabilities {
                medium: Medium::Ethernet,
                max_transmission_unit: 1514,
                checksum: ChecksumCapabilities::default(),
                ethernet: EthernetCapabilities::default(),
            }
        }

        fn link_state(&self) -> LinkState {
            LinkState {
                up: true,
                speed: 100,
                full_duplex: true,
            }
        }

        fn send(&mut self, frame: &NetBuffer) -> crate::Result<()> {
            self.sent.push(frame.to_vec());
            Ok(())
        }

        fn receive(&mut self, _buffer: &mut [u8]) -> Option<usize> {
            None
        }
    }

    fn table() -> Interfaces {
        let mut ifaces = Interfaces::new();
        let mut iface = Interface::physical(LOCAL_MAC);
        iface
            .add_ipv4_addr(Ipv4Cidr::new(LOCAL_IP, 24), AddrState::Preferred)
            .unwrap();
        ifaces.add(iface).unwrap();
        ifaces
    }

    fn arp_frame(
        operation: ArpOperation,
        sha: EthernetAddress,
        spa: Ipv4Address,
        tha: EthernetAddress,
        tpa: Ipv4Address,
        dst: EthernetAddress,
    ) -> std::vec::Vec<u8> {
        let mut frame = vec![0u8; ETHERNET_HEADER_LEN + ARP_PACKET_LEN];
        {
            let mut eth = EthernetFrame::new_unchecked(&mut frame[..]);
            eth.set_dst_addr(dst);
            eth.set_src_addr(sha);
            eth.set_ethertype(EthernetProtocol::Arp);
        }
        let mut packet = ArpPacket::new_unchecked(&mut frame[ETHERNET_HEADER_LEN..]);
        ArpRepr {
            operation,
            source_hardware_addr: sha,
            source_protocol_addr: spa,
            target_hardware_addr: tha,
            target_protocol_addr: tpa,
        }
        .emit(&mut packet);
        frame
    }

    #[test]
    fn outbound_padding_and_fcs() {
        let mut ifaces = table();
        let mut device = BareDevice::default();

        let mut buffer = alloc_frame_buffer();
        buffer.append_slice(b"short payload");
        ifaces
            .send_frame(
                &mut device,
                None,
                0,
                PEER_MAC,
                EthernetProtocol::Ipv4,
                &TxAncillary::default(),
                buffer,
            )
            .unwrap();

        let frame = &device.sent[0];
        // padded to the 60-octet minimum, plus the 4-octet FCS
        assert_eq!(frame.len(), ETHERNET_MIN_FRAME_LEN + FCS_LEN);
        // the FCS folds the whole frame to the residue
        assert_eq!(crc32_chunks([&frame[..]]), CRC32_RESIDUE);
        let parsed = EthernetFrame::new_unchecked(&frame[..]);
        assert_eq!(parsed.src_addr(), LOCAL_MAC);
        assert_eq!(parsed.dst_addr(), PEER_MAC);
    }

    #[test]
    fn inbound_rejects_bad_fcs_and_runts() {
        let mut ifaces = table();
        let mut device = BareDevice::default();

        // 13-octet body is a runt
        let mut runt = vec![0u8; 13];
        assert_eq!(
            ifaces.process_frame(&mut device, None, 0, &mut runt, Instant::ZERO),
            Err(Error::InvalidLength)
        );
        assert_eq!(ifaces.get(0).unwrap().counters().if_in_errors, 1);

        let mut frame = arp_frame(
            ArpOperation::Request,
            PEER_MAC,
            PEER_IP,
            EthernetAddress::UNSPECIFIED,
            LOCAL_IP,
            EthernetAddress::BROADCAST,
        );
        // corrupt FCS: append four zero octets instead of the CRC
        frame.extend_from_slice(&[0, 0, 0, 0]);
        assert_eq!(
            ifaces.process_frame(&mut device, None, 0, &mut frame, Instant::ZERO),
            Err(Error::WrongChecksum)
        );
    }

    #[test]
    fn inbound_vlan_demux() {
        let mut ifaces = table();
        let vlan_index = {
            let mut iface = Interface::virtual_on(0);
            iface.set_vlan_id(Some(0x123));
            iface
                .add_ipv4_addr(
                    Ipv4Cidr::new(Ipv4Address::new(10, 0, 1, 2), 24),
                    AddrState::Preferred,
                )
                .unwrap();
            ifaces.add(iface).unwrap()
        };
        let mut device = Loopback::new();

        // tagged IPv4 frame: only the VLAN interface may take it
        let mut frame = std::vec::Vec::new();
        frame.extend_from_slice(LOCAL_MAC.as_bytes());
        frame.extend_from_slice(PEER_MAC.as_bytes());
        frame.extend_from_slice(&[0x81, 0x00]);
        let mut tci = [0u8; 2];
        NetworkEndian::write_u16(&mut tci, 0x0123);
        frame.extend_from_slice(&tci);
        frame.extend_from_slice(&[0x08, 0x00]);
        frame.extend_from_slice(&[0x45, 0x00, 0x00, 0x14]);

        let deliveries = ifaces
            .process_frame(&mut device, None, 0, &mut frame, Instant::ZERO)
            .unwrap();
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].iface, vlan_index);
        assert_eq!(deliveries[0].kind, RxKind::Ipv4);
        // the payload range points past the stripped tag
        assert_eq!(deliveries[0].payload.start, ETHERNET_HEADER_LEN + VLAN_TAG_LEN);

        // the virtual interface inherits the parent's MAC
        assert_eq!(ifaces.logical_mac(vlan_index), LOCAL_MAC);
    }

    #[test]
    fn outbound_vlan_tag_insertion() {
        let mut ifaces = table();
        let index = {
            let mut iface = Interface::virtual_on(0);
            iface.set_vlan_id(Some(7));
            ifaces.add(iface).unwrap()
        };
        let mut device = Loopback::new();

        let mut buffer = alloc_frame_buffer();
        buffer.append_slice(&[0xde, 0xad]);
        ifaces
            .send_frame(
                &mut device,
                None,
                index,
                PEER_MAC,
                EthernetProtocol::Ipv4,
                &TxAncillary::default(),
                buffer,
            )
            .unwrap();

        let mut frame = [0u8; 64];
        let len = device.receive(&mut frame).unwrap();
        let parsed = EthernetFrame::new_unchecked(&frame[..len]);
        assert_eq!(parsed.ethertype(), EthernetProtocol::VlanTagged);
        let tag = VlanTag::new_checked(&frame[ETHERNET_HEADER_LEN..len]).unwrap();
        assert_eq!(tag.tci().vid, 7);
        assert_eq!(tag.ethertype(), EthernetProtocol::Ipv4);
    }

    #[test]
    fn arp_request_gets_reply() {
        let mut ifaces = table();
        let mut device = BareDevice::default();

        let mut frame = arp_frame(
            ArpOperation::Request,
            PEER_MAC,
            PEER_IP,
            EthernetAddress::UNSPECIFIED,
            LOCAL_IP,
            EthernetAddress::BROADCAST,
        );
        // give the frame a valid FCS so the software-verify path passes
        let fcs = crate::wire::crc32(&frame);
        let mut fcs_bytes = [0u8; 4];
        LittleEndian::write_u32(&mut fcs_bytes, fcs);
        frame.extend_from_slice(&fcs_bytes);

        let deliveries = ifaces
            .process_frame(&mut device, None, 0, &mut frame, Instant::ZERO)
            .unwrap();
        assert_eq!(deliveries[0].kind, RxKind::Arp);

        // a unicast reply went out with our binding
        assert_eq!(device.sent.len(), 1);
        let reply = &device.sent[0];
        let eth = EthernetFrame::new_unchecked(&reply[..]);
        assert_eq!(eth.dst_addr(), PEER_MAC);
        let packet = ArpPacket::new_checked(&reply[ETHERNET_HEADER_LEN..reply.len() - FCS_LEN])
            .unwrap();
        let repr = ArpRepr::parse(&packet).unwrap();
        assert_eq!(repr.operation, ArpOperation::Reply);
        assert_eq!(repr.source_hardware_addr, LOCAL_MAC);
        assert_eq!(repr.source_protocol_addr, LOCAL_IP);
        assert_eq!(repr.target_protocol_addr, PEER_IP);
        assert_eq!(repr.target_hardware_addr, PEER_MAC);
    }

    #[test]
    fn arp_resolution_flushes_pending() {
        let mut ifaces = table();
        let mut device = BareDevice::default();
        let now = Instant::ZERO;

        // resolving an unknown neighbor broadcasts a request
        let result = ifaces.arp_resolve(&mut device, 0, PEER_IP, now).unwrap();
        assert_eq!(result, None);
        assert_eq!(device.sent.len(), 1);
        {
            let request = &device.sent[0];
            let eth = EthernetFrame::new_unchecked(&request[..]);
            assert!(eth.dst_addr().is_broadcast());
            let packet =
                ArpPacket::new_checked(&request[ETHERNET_HEADER_LEN..request.len() - FCS_LEN])
                    .unwrap();
            let repr = ArpRepr::parse(&packet).unwrap();
            assert_eq!(repr.operation, ArpOperation::Request);
            assert_eq!(repr.source_protocol_addr, LOCAL_IP);
            assert_eq!(repr.target_protocol_addr, PEER_IP);
            assert_eq!(repr.target_hardware_addr, EthernetAddress::UNSPECIFIED);
        }
        assert_eq!(
            ifaces
                .get(0)
                .unwrap()
                .neighbor_cache()
                .lookup(&IpAddress::Ipv4(PEER_IP))
                .unwrap()
                .state,
            NeighborState::Incomplete
        );

        // queue an IP packet behind the resolution
        let mut buffer = alloc_frame_buffer();
        buffer.append_slice(&[0x45, 0x00, 0x00, 0x14]);
        ifaces
            .send_ip_frame(
                &mut device,
                None,
                0,
                &IpAddress::Ipv4(PEER_IP),
                &TxAncillary::default(),
                buffer,
                now,
            )
            .unwrap();
        assert_eq!(device.sent.len(), 1, "parked, not transmitted");

        // the reply resolves the entry and flushes the queue
        let mut reply = arp_frame(
            ArpOperation::Reply,
            PEER_MAC,
            PEER_IP,
            LOCAL_MAC,
            LOCAL_IP,
            LOCAL_MAC,
        );
        let fcs = crate::wire::crc32(&reply);
        let mut fcs_bytes = [0u8; 4];
        LittleEndian::write_u32(&mut fcs_bytes, fcs);
        reply.extend_from_slice(&fcs_bytes);
        ifaces
            .process_frame(&mut device, None, 0, &mut reply, now)
            .unwrap();

        let entry_mac = {
            let entry = ifaces
                .get(0)
                .unwrap()
                .neighbor_cache()
                .lookup(&IpAddress::Ipv4(PEER_IP))
                .unwrap();
            assert_eq!(entry.state, NeighborState::Reachable);
            entry.hardware_addr
        };
        assert_eq!(entry_mac, PEER_MAC);

        assert_eq!(device.sent.len(), 2);
        let flushed = &device.sent[1];
        let eth = EthernetFrame::new_unchecked(&flushed[..]);
        assert_eq!(eth.dst_addr(), PEER_MAC);
        assert_eq!(eth.ethertype(), EthernetProtocol::Ipv4);

        // and a subsequent resolve completes synchronously
        assert_eq!(
            ifaces.arp_resolve(&mut device, 0, PEER_IP, now).unwrap(),
            Some(PEER_MAC)
        );
    }

    #[test]
    fn arp_request_exhaustion_drops_entry() {
        let mut ifaces = table();
        let mut device = BareDevice::default();
        let mut now = Instant::ZERO;

        ifaces.arp_resolve(&mut device, 0, PEER_IP, now).unwrap();

        // two retransmissions then removal
        for _ in 0..ARP_MAX_REQUESTS {
            now += crate::time::Duration::from_millis(1100);
            ifaces.arp_tick(&mut device, 0, now).unwrap();
        }
        assert!(ifaces
            .get(0)
            .unwrap()
            .neighbor_cache()
            .lookup(&IpAddress::Ipv4(PEER_IP))
            .is_none());
        assert_eq!(device.sent.len(), ARP_MAX_REQUESTS as usize);
    }

    #[test]
    fn tentative_address_conflict_flag() {
        let mut ifaces = table();
        ifaces
            .get_mut(0)
            .unwrap()
            .ipv4_addrs_mut()[0]
            .state = AddrState::Tentative;
        let mut device = BareDevice::default();

        // another host claims our tentative address
        let mut frame = arp_frame(
            ArpOperation::Request,
            PEER_MAC,
            LOCAL_IP,
            EthernetAddress::UNSPECIFIED,
            LOCAL_IP,
            EthernetAddress::BROADCAST,
        );
        let fcs = crate::wire::crc32(&frame);
        let mut fcs_bytes = [0u8; 4];
        LittleEndian::write_u32(&mut fcs_bytes, fcs);
        frame.extend_from_slice(&fcs_bytes);

        ifaces
            .process_frame(&mut device, None, 0, &mut frame, Instant::ZERO)
            .unwrap();
        assert!(ifaces.get(0).unwrap().ipv4_addrs()[0].conflict);
        // tentative addresses never answer
        assert!(device.sent.is_empty());
    }
}
