use std::collections::VecDeque;

use log::trace;

use crate::config::RAW_SOCKET_RX_QUEUE_SIZE;
use crate::phy::TxAncillary;
use crate::socket::Events;
use crate::time::Instant;
use crate::wire::{EthernetAddress, IpAddress, IpProtocol};
use crate::{Error, Result};

/// Ancillary data recorded with every queued packet: everything the
/// frame path knew that the payload alone no longer shows.
#[derive(Debug, Clone, Copy)]
pub struct RxAncillary {
    pub timestamp: Instant,
    pub src_mac: EthernetAddress,
    pub dst_mac: EthernetAddress,
    pub switch_port: Option<u8>,
    /// TTL (or hop limit) of the IP packet; zero for raw Ethernet.
    pub hop_limit: u8,
}

/// A packet queued on a raw IP socket.
#[derive(Debug)]
pub struct RawIpPacket {
    pub src_addr: IpAddress,
    pub dst_addr: IpAddress,
    pub payload: Vec<u8>,
    pub ancillary: RxAncillary,
}

/// A raw IP socket: receives whole payloads of one IP protocol number,
/// sends caller-built payloads with a stack-built IP header.
#[derive(Debug)]
pub struct RawIpSocket {
    protocol: IpProtocol,
    local_addr: Option<IpAddress>,
    remote_addr: Option<IpAddress>,
    bound_iface: Option<usize>,
    queue: VecDeque<RawIpPacket>,
    hop_limit: u8,
    dscp: u8,
    tx_ancillary: TxAncillary,
    pub(crate) events: Events,
}

impl RawIpSocket {
    pub fn new(protocol: IpProtocol) -> RawIpSocket {
        RawIpSocket {
            protocol,
            local_addr: None,
            remote_addr: None,
            bound_iface: None,
            queue: VecDeque::new(),
            hop_limit: 64,
            dscp: 0,
            tx_ancillary: TxAncillary::default(),
            events: Events::empty(),
        }
    }

    pub fn protocol(&self) -> IpProtocol {
        self.protocol
    }

    /// Restrict reception to packets addressed to `addr`, and source
    /// outgoing packets from it.
    pub fn bind_addr(&mut self, addr: Option<IpAddress>) {
        self.local_addr = addr;
    }

    /// Restrict reception to packets from `addr`; also the default
    /// destination for sends.
    pub fn connect_addr(&mut self, addr: Option<IpAddress>) {
        self.remote_addr = addr;
    }

    pub fn bind_iface(&mut self, iface: Option<usize>) {
        self.bound_iface = iface;
    }

    pub fn local_addr(&self) -> Option<IpAddress> {
        self.local_addr
    }

    pub fn remote_addr(&self) -> Option<IpAddress> {
        self.remote_addr
    }

    pub fn bound_iface(&self) -> Option<usize> {
        self.bound_iface
    }

    pub fn hop_limit(&self) -> u8 {
        self.hop_limit
    }

    pub fn set_hop_limit(&mut self, hop_limit: u8) {
        self.hop_limit = hop_limit;
    }

    pub fn dscp(&self) -> u8 {
        self.dscp
    }

    pub fn set_dscp(&mut self, dscp: u8) {
        self.dscp = dscp;
    }

    /// Tag priority bits applied when the egress interface is
    /// VLAN/VMAN-tagged.
    pub fn set_tx_ancillary(&mut self, ancillary: TxAncillary) {
        self.tx_ancillary = ancillary;
    }

    pub fn tx_ancillary(&self) -> TxAncillary {
        self.tx_ancillary
    }

    /// Whether this socket wants a packet with the given coordinates.
    pub fn matches(
        &self,
        iface: usize,
        protocol: IpProtocol,
        src_addr: &IpAddress,
        dst_addr: &IpAddress,
    ) -> bool {
        if protocol != self.protocol {
            return false;
        }
        if let Some(bound) = self.bound_iface {
            if bound != iface {
                return false;
            }
        }
        if let Some(local) = self.local_addr {
            if local != *dst_addr {
                return false;
            }
        }
        if let Some(remote) = self.remote_addr {
            if remote != *src_addr {
                return false;
            }
        }
        true
    }

    /// Queue one received packet; the queue is bounded and a full queue
    /// drops the newcomer.
    pub fn enqueue(&mut self, packet: RawIpPacket) -> Result<()> {
        if self.queue.len() >= RAW_SOCKET_RX_QUEUE_SIZE {
            trace!("raw ip socket: queue full, dropping packet");
            return Err(Error::ReceiveQueueFull);
        }
        self.queue.push_back(packet);
        self.update_events();
        Ok(())
    }

    /// Take the oldest received packet.
    pub fn dequeue(&mut self) -> Option<RawIpPacket> {
        let packet = self.queue.pop_front();
        self.update_events();
        packet
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub(crate) fn update_events(&mut self) {
        self.events = if self.queue.is_empty() {
            Events::empty()
        } else {
            Events::RX_READY
        };
    }
}

/// EtherType selector of a raw Ethernet socket.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum EthProtocolFilter {
    /// Every frame the interface accepted.
    All,
    /// Only 802.2 LLC frames (EtherType field is an 802.3 length).
    Llc,
    /// One exact EtherType.
    EtherType(u16),
}

impl EthProtocolFilter {
    pub fn matches(&self, raw_ethertype: u16) -> bool {
        match self {
            EthProtocolFilter::All => true,
            EthProtocolFilter::Llc => raw_ethertype <= 1500,
            EthProtocolFilter::EtherType(value) => *value == raw_ethertype,
        }
    }
}

/// A frame queued on a raw Ethernet socket: the 14-octet header (tags
/// already stripped) followed by the payload.
#[derive(Debug)]
pub struct RawEthFrame {
    pub frame: Vec<u8>,
    pub ancillary: RxAncillary,
}

/// A raw Ethernet socket: receives copies of accepted frames, sends
/// caller-built frames directly to the NIC.
#[derive(Debug)]
pub struct RawEthSocket {
    filter: EthProtocolFilter,
    bound_iface: Option<usize>,
    queue: VecDeque<RawEthFrame>,
    pub(crate) events: Events,
}

impl RawEthSocket {
    pub fn new(filter: EthProtocolFilter) -> RawEthSocket {
        RawEthSocket {
            filter,
            bound_iface: None,
            queue: VecDeque::new(),
            events: Events::empty(),
        }
    }

    pub fn filter(&self) -> EthProtocolFilter {
        self.filter
    }

    pub fn bind_iface(&mut self, iface: Option<usize>) {
        self.bound_iface = iface;
    }

    pub fn bound_iface(&self) -> Option<usize> {
        self.bound_iface
    }

    pub fn matches(&self, iface: usize, raw_ethertype: u16) -> bool {
        if let Some(bound) = self.bound_iface {
            if bound != iface {
                return false;
            }
        }
        self.filter.matches(raw_ethertype)
    }

    /// Queue one received frame; a full queue drops the newcomer.
    pub fn enqueue(&mut self, frame: RawEthFrame) -> Result<()> {
        if self.queue.len() >= RAW_SOCKET_RX_QUEUE_SIZE {
            trace!("raw eth socket: queue full, dropping frame");
            return Err(Error::ReceiveQueueFull);
        }
        self.queue.push_back(frame);
        self.update_events();
        Ok(())
    }

    /// Take the oldest received frame.
    pub fn dequeue(&mut self) -> Option<RawEthFrame> {
        let frame = self.queue.pop_front();
        self.update_events();
        frame
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub(crate) fn update_events(&mut self) {
        self.events = if self.queue.is_empty() {
            Events::empty()
        } else {
            Events::RX_READY
        };
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::wire::Ipv4Address;

    fn ip(last: u8) -> IpAddress {
        IpAddress::Ipv4(Ipv4Address::new(10, 0, 0, last))
    }

    fn packet(src: IpAddress, dst: IpAddress) -> RawIpPacket {
        RawIpPacket {
            src_addr: src,
            dst_addr: dst,
            payload: vec![0x08, 0x00, 0x00, 0x00],
            ancillary: RxAncillary {
                timestamp: Instant::ZERO,
                src_mac: EthernetAddress([0x02, 0, 0, 0, 0, 1]),
                dst_mac: EthernetAddress([0x02, 0, 0, 0, 0, 2]),
                switch_port: None,
                hop_limit: 64,
            },
        }
    }

    #[test]
    fn matching_rules() {
        let mut socket = RawIpSocket::new(IpProtocol::Icmp);
        assert!(socket.matches(0, IpProtocol::Icmp, &ip(1), &ip(2)));
        assert!(!socket.matches(0, IpProtocol::Udp, &ip(1), &ip(2)));

        socket.bind_addr(Some(ip(2)));
        assert!(socket.matches(0, IpProtocol::Icmp, &ip(1), &ip(2)));
        assert!(!socket.matches(0, IpProtocol::Icmp, &ip(1), &ip(3)));

        socket.connect_addr(Some(ip(1)));
        assert!(!socket.matches(0, IpProtocol::Icmp, &ip(9), &ip(2)));

        socket.bind_iface(Some(1));
        assert!(!socket.matches(0, IpProtocol::Icmp, &ip(1), &ip(2)));
        assert!(socket.matches(1, IpProtocol::Icmp, &ip(1), &ip(2)));
    }

    #[test]
    fn queue_bound_and_events() {
        let mut socket = RawIpSocket::new(IpProtocol::Icmp);
        assert_eq!(socket.events, Events::empty());

        for _ in 0..RAW_SOCKET_RX_QUEUE_SIZE {
            socket.enqueue(packet(ip(1), ip(2))).unwrap();
        }
        assert_eq!(socket.events, Events::RX_READY);
        assert_eq!(
            socket.enqueue(packet(ip(1), ip(2))),
            Err(Error::ReceiveQueueFull)
        );
        assert_eq!(socket.queue_len(), RAW_SOCKET_RX_QUEUE_SIZE);

        while socket.dequeue().is_some() {}
        assert_eq!(socket.events, Events::empty());
    }

    #[test]
    fn ethertype_filters() {
        assert!(EthProtocolFilter::All.matches(0x0800));
        assert!(EthProtocolFilter::All.matches(100));
        assert!(EthProtocolFilter::Llc.matches(1500));
        assert!(!EthProtocolFilter::Llc.matches(0x0800));
        assert!(EthProtocolFilter::EtherType(0x88cc).matches(0x88cc));
        assert!(!EthProtocolFilter::EtherType(0x88cc).matches(0x0800));
    }
}
