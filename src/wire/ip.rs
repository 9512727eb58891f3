use core::fmt;

use super::{Error, Result};
use super::{Ipv4Address, Ipv4Cidr, Ipv4Repr, Ipv6Address, Ipv6Cidr, Ipv6Repr};

/// Internet protocol version.
#[derive(Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
pub enum Version {
    Ipv4,
    Ipv6,
}

impl Version {
    /// Return the version of an IP packet stored in the provided buffer.
    ///
    /// This function never returns `Ok(..)` when given a buffer shorter
    /// than one byte.
    pub fn of_packet(data: &[u8]) -> Result<Version> {
        match data.first().ok_or(Error)? >> 4 {
            4 => Ok(Version::Ipv4),
            6 => Ok(Version::Ipv6),
            _ => Err(Error),
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Version::Ipv4 => write!(f, "IPv4"),
            Version::Ipv6 => write!(f, "IPv6"),
        }
    }
}

enum_with_unknown! {
    /// IP payload protocol type.
    pub enum Protocol(u8) {
        Icmp = 0x01,
        Igmp = 0x02,
        Tcp  = 0x06,
        Udp  = 0x11,
        Icmpv6 = 0x3a
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Protocol::Icmp => write!(f, "ICMP"),
            Protocol::Igmp => write!(f, "IGMP"),
            Protocol::Tcp => write!(f, "TCP"),
            Protocol::Udp => write!(f, "UDP"),
            Protocol::Icmpv6 => write!(f, "ICMPv6"),
            Protocol::Unknown(id) => write!(f, "0x{id:02x}"),
        }
    }
}

/// An internetworking address.
#[derive(Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
pub enum Address {
    Ipv4(Ipv4Address),
    Ipv6(Ipv6Address),
}

impl Address {
    /// Return the protocol version of the address.
    pub const fn version(&self) -> Version {
        match self {
            Address::Ipv4(_) => Version::Ipv4,
            Address::Ipv6(_) => Version::Ipv6,
        }
    }

    /// Return the address as a sequence of octets, in big-endian.
    pub const fn as_bytes(&self) -> &[u8] {
        match self {
            Address::Ipv4(addr) => addr.as_bytes(),
            Address::Ipv6(addr) => addr.as_bytes(),
        }
    }

    /// Query whether the address is a unicast address.
    pub fn is_unicast(&self) -> bool {
        match self {
            Address::Ipv4(addr) => addr.is_unicast(),
            Address::Ipv6(addr) => addr.is_unicast(),
        }
    }

    /// Query whether the address is a multicast address.
    pub const fn is_multicast(&self) -> bool {
        match self {
            Address::Ipv4(addr) => addr.is_multicast(),
            Address::Ipv6(addr) => addr.is_multicast(),
        }
    }

    /// Query whether the address is the broadcast address. Only IPv4 has
    /// one.
    pub fn is_broadcast(&self) -> bool {
        match self {
            Address::Ipv4(addr) => addr.is_broadcast(),
            Address::Ipv6(_) => false,
        }
    }

    /// Query whether the address is all zeroes.
    pub fn is_unspecified(&self) -> bool {
        match self {
            Address::Ipv4(addr) => addr.is_unspecified(),
            Address::Ipv6(addr) => addr.is_unspecified(),
        }
    }
}

impl Default for Address {
    fn default() -> Address {
        Address::Ipv4(Ipv4Address::UNSPECIFIED)
    }
}

impl From<Ipv4Address> for Address {
    fn from(addr: Ipv4Address) -> Address {
        Address::Ipv4(addr)
    }
}

impl From<Ipv6Address> for Address {
    fn from(addr: Ipv6Address) -> Address {
        Address::Ipv6(addr)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Address::Ipv4(addr) => write!(f, "{addr}"),
            Address::Ipv6(addr) => write!(f, "{addr}"),
        }
    }
}

/// A subnet, either IPv4 or IPv6.
#[derive(Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
pub enum Cidr {
    Ipv4(Ipv4Cidr),
    Ipv6(Ipv6Cidr),
}

impl Cidr {
    pub const fn address(&self) -> Address {
        match self {
            Cidr::Ipv4(cidr) => Address::Ipv4(cidr.address()),
            Cidr::Ipv6(cidr) => Address::Ipv6(cidr.address()),
        }
    }

    pub const fn prefix_len(&self) -> u8 {
        match self {
            Cidr::Ipv4(cidr) => cidr.prefix_len(),
            Cidr::Ipv6(cidr) => cidr.prefix_len(),
        }
    }

    pub fn contains_addr(&self, addr: &Address) -> bool {
        match (self, addr) {
            (Cidr::Ipv4(cidr), Address::Ipv4(addr)) => cidr.contains_addr(addr),
            (Cidr::Ipv6(cidr), Address::Ipv6(addr)) => cidr.contains_addr(addr),
            _ => false,
        }
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Cidr::Ipv4(cidr) => write!(f, "{cidr}"),
            Cidr::Ipv6(cidr) => write!(f, "{cidr}"),
        }
    }
}

/// An internet endpoint address.
#[derive(Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Default)]
pub struct Endpoint {
    pub addr: Address,
    pub port: u16,
}

impl Endpoint {
    pub const fn new(addr: Address, port: u16) -> Endpoint {
        Endpoint { addr, port }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.addr {
            Address::Ipv6(_) => write!(f, "[{}]:{}", self.addr, self.port),
            _ => write!(f, "{}:{}", self.addr, self.port),
        }
    }
}

impl From<(Address, u16)> for Endpoint {
    fn from((addr, port): (Address, u16)) -> Endpoint {
        Endpoint { addr, port }
    }
}

impl From<(Ipv4Address, u16)> for Endpoint {
    fn from((addr, port): (Ipv4Address, u16)) -> Endpoint {
        Endpoint {
            addr: addr.into(),
            port,
        }
    }
}

/// An internet endpoint address for listening.
///
/// In contrast to [Endpoint], `ListenEndpoint` allows not specifying the
/// address, in order to listen on a given port at all local addresses.
#[derive(Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Default)]
pub struct ListenEndpoint {
    pub addr: Option<Address>,
    pub port: u16,
}

impl ListenEndpoint {
    /// Query whether the endpoint has a specified address and port.
    pub const fn is_specified(&self) -> bool {
        self.addr.is_some() && self.port != 0
    }
}

impl From<u16> for ListenEndpoint {
    fn from(port: u16) -> ListenEndpoint {
        ListenEndpoint { addr: None, port }
    }
}

impl From<Endpoint> for ListenEndpoint {
    fn from(endpoint: Endpoint) -> ListenEndpoint {
        ListenEndpoint {
            addr: Some(endpoint.addr),
            port: endpoint.port,
        }
    }
}

impl fmt::Display for ListenEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.addr {
            Some(addr @ Address::Ipv6(_)) => write!(f, "[{}]:{}", addr, self.port),
            Some(addr) => write!(f, "{}:{}", addr, self.port),
            None => write!(f, "*:{}", self.port),
        }
    }
}

/// An IP packet representation.
///
/// This enum abstracts the various versions of IP packets. It either
/// contains an IPv4 or IPv6 concrete high-level representation.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Repr {
    Ipv4(Ipv4Repr),
    Ipv6(Ipv6Repr),
}

impl From<Ipv4Repr> for Repr {
    fn from(repr: Ipv4Repr) -> Repr {
        Repr::Ipv4(repr)
    }
}

impl From<Ipv6Repr> for Repr {
    fn from(repr: Ipv6Repr) -> Repr {
        Repr::Ipv6(repr)
    }
}

impl Repr {
    /// Create a new IP representation for a packet between `src_addr` and
    /// `dst_addr`, which must be of the same family.
    pub fn new(
        src_addr: Address,
        dst_addr: Address,
        next_header: Protocol,
        payload_len: usize,
        hop_limit: u8,
    ) -> Repr {
        match (src_addr, dst_addr) {
            (Address::Ipv4(src_addr), Address::Ipv4(dst_addr)) => Repr::Ipv4(Ipv4Repr {
                src_addr,
                dst_addr,
                next_header,
                payload_len,
                hop_limit,
                dscp: 0,
            }),
            (Address::Ipv6(src_addr), Address::Ipv6(dst_addr)) => Repr::Ipv6(Ipv6Repr {
                src_addr,
                dst_addr,
                next_header,
                payload_len,
                hop_limit,
            }),
            _ => panic!("IP version mismatch"),
        }
    }

    pub const fn version(&self) -> Version {
        match self {
            Repr::Ipv4(_) => Version::Ipv4,
            Repr::Ipv6(_) => Version::Ipv6,
        }
    }

    pub const fn src_addr(&self) -> Address {
        match self {
            Repr::Ipv4(repr) => Address::Ipv4(repr.src_addr),
            Repr::Ipv6(repr) => Address::Ipv6(repr.src_addr),
        }
    }

    pub const fn dst_addr(&self) -> Address {
        match self {
            Repr::Ipv4(repr) => Address::Ipv4(repr.dst_addr),
            Repr::Ipv6(repr) => Address::Ipv6(repr.dst_addr),
        }
    }

    pub const fn next_header(&self) -> Protocol {
        match self {
            Repr::Ipv4(repr) => repr.next_header,
            Repr::Ipv6(repr) => repr.next_header,
        }
    }

    pub const fn payload_len(&self) -> usize {
        match self {
            Repr::Ipv4(repr) => repr.payload_len,
            Repr::Ipv6(repr) => repr.payload_len,
        }
    }

    pub fn set_payload_len(&mut self, length: usize) {
        match self {
            Repr::Ipv4(repr) => repr.payload_len = length,
            Repr::Ipv6(repr) => repr.payload_len = length,
        }
    }

    pub const fn hop_limit(&self) -> u8 {
        match self {
            Repr::Ipv4(repr) => repr.hop_limit,
            Repr::Ipv6(repr) => repr.hop_limit,
        }
    }

    /// Return the length of a header that will be emitted from this
    /// high-level representation.
    pub const fn buffer_len(&self) -> usize {
        match self {
            Repr::Ipv4(repr) => repr.buffer_len(),
            Repr::Ipv6(repr) => repr.buffer_len(),
        }
    }

    /// Emit this high-level representation into a buffer.
    pub fn emit(&self, buffer: &mut [u8]) {
        match self {
            Repr::Ipv4(repr) => repr.emit(&mut super::Ipv4Packet::new_unchecked(buffer)),
            Repr::Ipv6(repr) => repr.emit(&mut super::Ipv6Packet::new_unchecked(buffer)),
        }
    }
}

/// Internet checksum routines.
///
/// The ones-complement sums here are *not* complemented; callers combine
/// partial sums and complement once at the end. All walks are folds over
/// octet runs and never allocate.
pub mod checksum {
    use byteorder::{ByteOrder, NetworkEndian};

    use super::Address;
    use super::Protocol;

    fn propagate_carries(word: u32) -> u16 {
        let sum = (word >> 16) + (word & 0xffff);
        ((sum >> 16) as u16) + (sum as u16)
    }

    /// Compute an RFC 1071 compliant checksum (without the final
    /// complement).
    pub fn data(data: &[u8]) -> u16 {
        let mut accum = 0u32;
        let mut i = 0;
        while i + 1 < data.len() {
            accum += NetworkEndian::read_u16(&data[i..i + 2]) as u32;
            i += 2;
        }
        if data.len() % 2 != 0 {
            accum += (data[data.len() - 1] as u32) << 8;
        }
        propagate_carries(accum)
    }

    /// Compute the checksum over scattered octet runs, honoring byte
    /// parity across run boundaries.
    pub fn data_chunks<'a, I>(chunks: I) -> u16
    where
        I: IntoIterator<Item = &'a [u8]>,
    {
        let mut accum = 0u32;
        let mut odd = false;
        for chunk in chunks {
            for byte in chunk {
                if odd {
                    accum += *byte as u32;
                } else {
                    accum += (*byte as u32) << 8;
                }
                odd = !odd;
            }
        }
        propagate_carries(accum)
    }

    /// Combine several RFC 1071 compliant checksums.
    pub fn combine(checksums: &[u16]) -> u16 {
        let mut accum = 0u32;
        for &word in checksums {
            accum += word as u32;
        }
        propagate_carries(accum)
    }

    /// Compute the checksum of the pseudo header used by TCP and UDP.
    pub fn pseudo_header(
        src_addr: &Address,
        dst_addr: &Address,
        next_header: Protocol,
        length: u32,
    ) -> u16 {
        match (src_addr, dst_addr) {
            (Address::Ipv4(src_addr), Address::Ipv4(dst_addr)) => {
                let mut proto_len = [0u8; 4];
                proto_len[1] = next_header.into();
                NetworkEndian::write_u16(&mut proto_len[2..4], length as u16);
                combine(&[
                    data(src_addr.as_bytes()),
                    data(dst_addr.as_bytes()),
                    data(&proto_len[..]),
                ])
            }
            (Address::Ipv6(src_addr), Address::Ipv6(dst_addr)) => {
                let mut proto_len = [0u8; 8];
                NetworkEndian::write_u32(&mut proto_len[0..4], length);
                proto_len[7] = next_header.into();
                combine(&[
                    data(src_addr.as_bytes()),
                    data(dst_addr.as_bytes()),
                    data(&proto_len[..]),
                ])
            }
            _ => panic!("IP version mismatch"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn endpoint_display() {
        let v4: Endpoint = (Ipv4Address::new(10, 0, 0, 1), 80).into();
        assert_eq!(format!("{v4}"), "10.0.0.1:80");

        let v6 = Endpoint::new(Address::Ipv6(Ipv6Address::LOOPBACK), 80);
        assert_eq!(format!("{v6}"), "[::1]:80");

        let listen: ListenEndpoint = 80.into();
        assert_eq!(format!("{listen}"), "*:80");
    }

    #[test]
    fn checksum_parity() {
        // splitting at an odd boundary must not change the result
        let bytes = [0x45u8, 0x00, 0x00, 0x54, 0xa6, 0xf2, 0x01, 0x02, 0x03];
        let whole = checksum::data(&bytes);
        assert_eq!(checksum::data_chunks([&bytes[..3], &bytes[3..]]), whole);
        assert_eq!(
            checksum::data_chunks([&bytes[..4], &bytes[4..7], &bytes[7..]]),
            whole
        );
    }

    #[test]
    fn version_of_packet() {
        assert_eq!(Version::of_packet(&[0x45]), Ok(Version::Ipv4));
        assert_eq!(Version::of_packet(&[0x60]), Ok(Version::Ipv6));
        assert_eq!(Version::of_packet(&[0x10]), Err(Error));
        assert_eq!(Version::of_packet(&[]), Err(Error));
    }
}
