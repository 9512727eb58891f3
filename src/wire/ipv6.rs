use core::fmt;

use byteorder::{ByteOrder, NetworkEndian};

use super::ip::Protocol;
use super::{Error, Result};

/// A sixteen-octet IPv6 address.
#[derive(Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Default)]
pub struct Address(pub [u8; 16]);

impl Address {
    /// The unspecified address, all zeroes.
    pub const UNSPECIFIED: Address = Address([0x00; 16]);

    /// The loopback address `::1`.
    pub const LOOPBACK: Address = Address([
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x01,
    ]);

    /// Construct an IPv6 address from a sequence of octets, in big-endian.
    ///
    /// # Panics
    /// The function panics if `data` is not sixteen octets long.
    pub fn from_bytes(data: &[u8]) -> Address {
        let mut bytes = [0; 16];
        bytes.copy_from_slice(data);
        Address(bytes)
    }

    /// Construct an IPv6 address from eight 16-bit groups, in big-endian.
    pub fn from_parts(parts: &[u16; 8]) -> Address {
        let mut bytes = [0; 16];
        for (i, part) in parts.iter().enumerate() {
            NetworkEndian::write_u16(&mut bytes[i * 2..(i + 1) * 2], *part);
        }
        Address(bytes)
    }

    /// Return the address as a sequence of octets, in big-endian.
    pub const fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Return the address as eight 16-bit groups, in big-endian.
    pub fn parts(&self) -> [u16; 8] {
        let mut parts = [0; 8];
        for (i, part) in parts.iter_mut().enumerate() {
            *part = NetworkEndian::read_u16(&self.0[i * 2..(i + 1) * 2]);
        }
        parts
    }

    /// Query whether the address is a unicast address.
    pub fn is_unicast(&self) -> bool {
        !(self.is_multicast() || self.is_unspecified())
    }

    /// Query whether the address is a multicast address.
    pub const fn is_multicast(&self) -> bool {
        self.0[0] == 0xff
    }

    /// Query whether the address is all zeroes.
    pub fn is_unspecified(&self) -> bool {
        *self == Self::UNSPECIFIED
    }

    /// Query whether the address is link-local.
    pub const fn is_link_local(&self) -> bool {
        self.0[0] == 0xfe && self.0[1] & 0xc0 == 0x80
    }

    /// Query whether the address is the loopback address.
    pub fn is_loopback(&self) -> bool {
        *self == Self::LOOPBACK
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let parts = self.parts();

        // find the longest run of zero groups, at least two long
        let mut best = None;
        let mut run_start = None;
        for i in 0..=8 {
            match (run_start, parts.get(i)) {
                (None, Some(0)) => run_start = Some(i),
                (Some(start), part) if part != Some(&0) => {
                    let len = i - start;
                    if len >= 2 && best.map_or(true, |(_, blen)| len > blen) {
                        best = Some((start, len));
                    }
                    run_start = None;
                }
                _ => (),
            }
        }

        match best {
            Some((start, len)) => {
                for (i, part) in parts[..start].iter().enumerate() {
                    if i != 0 {
                        write!(f, ":")?;
                    }
                    write!(f, "{part:x}")?;
                }
                write!(f, "::")?;
                for (i, part) in parts[start + len..].iter().enumerate() {
                    if i != 0 {
                        write!(f, ":")?;
                    }
                    write!(f, "{part:x}")?;
                }
                Ok(())
            }
            None => {
                for (i, part) in parts.iter().enumerate() {
                    if i != 0 {
                        write!(f, ":")?;
                    }
                    write!(f, "{part:x}")?;
                }
                Ok(())
            }
        }
    }
}

/// A specification of an IPv6 CIDR block, containing an address and a
/// prefix length.
#[derive(Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
pub struct Cidr {
    address: Address,
    prefix_len: u8,
}

impl Cidr {
    /// Create an IPv6 CIDR block from the given address and prefix length.
    ///
    /// # Panics
    /// This function panics if the prefix length is larger than 128.
    pub const fn new(address: Address, prefix_len: u8) -> Cidr {
        assert!(prefix_len <= 128);
        Cidr {
            address,
            prefix_len,
        }
    }

    pub const fn address(&self) -> Address {
        self.address
    }

    pub const fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// Query whether the subnetwork described by this IPv6 CIDR block
    /// contains the given address.
    pub fn contains_addr(&self, addr: &Address) -> bool {
        let whole = self.prefix_len as usize / 8;
        let bits = self.prefix_len as usize % 8;
        if self.address.0[..whole] != addr.0[..whole] {
            return false;
        }
        if bits == 0 {
            return true;
        }
        let mask = !0u8 << (8 - bits);
        self.address.0[whole] & mask == addr.0[whole] & mask
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.prefix_len)
    }
}

/// A read/write wrapper around an IPv6 packet buffer.
#[derive(Debug, Clone)]
pub struct Packet<T: AsRef<[u8]>> {
    buffer: T,
}

mod field {
    use crate::wire::field::*;

    pub const VER_TC_FLOW: Field = 0..4;
    pub const LENGTH: Field = 4..6;
    pub const NXT_HDR: usize = 6;
    pub const HOP_LIMIT: usize = 7;
    pub const SRC_ADDR: Field = 8..24;
    pub const DST_ADDR: Field = 24..40;
}

/// The fixed IPv6 header length.
pub const HEADER_LEN: usize = field::DST_ADDR.end;

impl<T: AsRef<[u8]>> Packet<T> {
    /// Imbue a raw octet buffer with IPv6 packet structure.
    pub const fn new_unchecked(buffer: T) -> Packet<T> {
        Packet { buffer }
    }

    /// Shorthand for a combination of [new_unchecked] and [check_len].
    ///
    /// [new_unchecked]: #method.new_unchecked
    /// [check_len]: #method.check_len
    pub fn new_checked(buffer: T) -> Result<Packet<T>> {
        let packet = Self::new_unchecked(buffer);
        packet.check_len()?;
        Ok(packet)
    }

    /// Ensure that no accessor method will panic if called.
    pub fn check_len(&self) -> Result<()> {
        let len = self.buffer.as_ref().len();
        if len < HEADER_LEN || len < HEADER_LEN + self.payload_len() as usize {
            Err(Error)
        } else {
            Ok(())
        }
    }

    /// Consume the packet, returning the underlying buffer.
    pub fn into_inner(self) -> T {
        self.buffer
    }

    /// Return the version field.
    pub fn version(&self) -> u8 {
        self.buffer.as_ref()[0] >> 4
    }

    /// Return the payload length field.
    pub fn payload_len(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[field::LENGTH])
    }

    /// Return the next header field.
    pub fn next_header(&self) -> Protocol {
        Protocol::from(self.buffer.as_ref()[field::NXT_HDR])
    }

    /// Return the hop limit field.
    pub fn hop_limit(&self) -> u8 {
        self.buffer.as_ref()[field::HOP_LIMIT]
    }

    /// Return the source address field.
    pub fn src_addr(&self) -> Address {
        Address::from_bytes(&self.buffer.as_ref()[field::SRC_ADDR])
    }

    /// Return the destination address field.
    pub fn dst_addr(&self) -> Address {
        Address::from_bytes(&self.buffer.as_ref()[field::DST_ADDR])
    }
}

impl<'a, T: AsRef<[u8]> + ?Sized> Packet<&'a T> {
    /// Return a pointer to the payload.
    pub fn payload(&self) -> &'a [u8] {
        let range = HEADER_LEN..HEADER_LEN + self.payload_len() as usize;
        &self.buffer.as_ref()[range]
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> Packet<T> {
    /// Set the version field to 6, and clear the traffic class and flow
    /// label fields.
    pub fn set_version_tc_flow(&mut self) {
        NetworkEndian::write_u32(&mut self.buffer.as_mut()[field::VER_TC_FLOW], 6 << 28)
    }

    /// Set the payload length field.
    pub fn set_payload_len(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::LENGTH], value)
    }

    /// Set the next header field.
    pub fn set_next_header(&mut self, value: Protocol) {
        self.buffer.as_mut()[field::NXT_HDR] = value.into()
    }

    /// Set the hop limit field.
    pub fn set_hop_limit(&mut self, value: u8) {
        self.buffer.as_mut()[field::HOP_LIMIT] = value
    }

    /// Set the source address field.
    pub fn set_src_addr(&mut self, value: Address) {
        self.buffer.as_mut()[field::SRC_ADDR].copy_from_slice(value.as_bytes())
    }

    /// Set the destination address field.
    pub fn set_dst_addr(&mut self, value: Address) {
        self.buffer.as_mut()[field::DST_ADDR].copy_from_slice(value.as_bytes())
    }

    /// Return a mutable pointer to the payload.
    pub fn payload_mut(&mut self) -> &mut [u8] {
        let range = HEADER_LEN..HEADER_LEN + self.payload_len() as usize;
        &mut self.buffer.as_mut()[range]
    }
}

/// A high-level representation of an IPv6 packet header.
///
/// Extension headers are not represented; a packet carrying one is
/// handed to the raw-socket layer only.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Repr {
    pub src_addr: Address,
    pub dst_addr: Address,
    pub next_header: Protocol,
    pub payload_len: usize,
    pub hop_limit: u8,
}

impl Repr {
    /// Parse an IPv6 packet and return a high-level representation.
    pub fn parse<T: AsRef<[u8]>>(packet: &Packet<T>) -> Result<Repr> {
        packet.check_len()?;
        if packet.version() != 6 {
            return Err(Error);
        }
        Ok(Repr {
            src_addr: packet.src_addr(),
            dst_addr: packet.dst_addr(),
            next_header: packet.next_header(),
            payload_len: packet.payload_len() as usize,
            hop_limit: packet.hop_limit(),
        })
    }

    /// Return the length of a header that will be emitted from this
    /// high-level representation.
    pub const fn buffer_len(&self) -> usize {
        HEADER_LEN
    }

    /// Emit a high-level representation into an IPv6 packet.
    pub fn emit<T: AsRef<[u8]> + AsMut<[u8]>>(&self, packet: &mut Packet<T>) {
        packet.set_version_tc_flow();
        packet.set_payload_len(self.payload_len as u16);
        packet.set_next_header(self.next_header);
        packet.set_hop_limit(self.hop_limit);
        packet.set_src_addr(self.src_addr);
        packet.set_dst_addr(self.dst_addr);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn address_display() {
        assert_eq!(format!("{}", Address::LOOPBACK), "::1");
        assert_eq!(format!("{}", Address::UNSPECIFIED), "::");
        let addr = Address::from_parts(&[0xfe80, 0, 0, 0, 1, 0, 0, 7]);
        assert_eq!(format!("{addr}"), "fe80::1:0:0:7");
        let addr = Address::from_parts(&[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(format!("{addr}"), "1:2:3:4:5:6:7:8");
    }

    #[test]
    fn cidr_contains() {
        let cidr = Cidr::new(Address::from_parts(&[0xfe80, 0, 0, 0, 0, 0, 0, 0]), 10);
        assert!(cidr.contains_addr(&Address::from_parts(&[0xfe80, 0, 0, 0, 0, 0, 0, 1])));
        assert!(!cidr.contains_addr(&Address::LOOPBACK));
    }

    #[test]
    fn packet_round_trip() {
        let repr = Repr {
            src_addr: Address::from_parts(&[0xfe80, 0, 0, 0, 0, 0, 0, 1]),
            dst_addr: Address::from_parts(&[0xfe80, 0, 0, 0, 0, 0, 0, 2]),
            next_header: Protocol::Tcp,
            payload_len: 4,
            hop_limit: 64,
        };
        let mut bytes = vec![0; repr.buffer_len() + repr.payload_len];
        let mut packet = Packet::new_unchecked(&mut bytes);
        repr.emit(&mut packet);
        packet.payload_mut().copy_from_slice(&[1, 2, 3, 4]);

        let packet = Packet::new_checked(&bytes[..]).unwrap();
        assert_eq!(packet.version(), 6);
        assert_eq!(Repr::parse(&packet), Ok(repr));
        assert_eq!(packet.payload(), &[1, 2, 3, 4]);
    }
}
