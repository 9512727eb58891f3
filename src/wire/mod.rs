/*! Low-level packet access and construction.

The `wire` module deals with the packet *representation*. It provides two
levels of functionality.

 * First, it provides functions to extract fields from sequences of
   octets, and to insert fields into sequences of octets. This happens
   through the `Packet` family of structures, e.g. [EthernetFrame] or
   [TcpPacket].
 * Second, in cases where the space of valid field values is much smaller
   than the space of possible field values, it provides a compact,
   high-level representation of packet data that can be parsed from and
   emitted into a sequence of octets. This happens through the `Repr`
   family of structs and enums, e.g. [ArpRepr] or [TcpRepr].

The `Packet` family of data structures guarantees that, if the
`Packet::check_len()` method returned `Ok(())`, then no accessor or setter
method will panic. `Packet::new_checked` is a shorthand for a combination
of `Packet::new_unchecked` and `Packet::check_len`; parsing untrusted
input *must* go through it. When emitting output, `new_unchecked` is used
instead: the buffer is sized from `Repr::buffer_len()` and a length check
against stale bytes from a recycled buffer would be meaningless.

In the `Repr` family, `Repr::parse()` never panics as long as the
underlying `Packet` passed its length check, and `Repr::emit()` never
panics as long as the buffer is at least `Repr::buffer_len()` octets.
*/

mod field {
    pub type Field = ::core::ops::Range<usize>;
    pub type Rest = ::core::ops::RangeFrom<usize>;
}

use core::fmt;

mod ethernet;
pub use self::ethernet::{
    crc32, crc32_chunks, Address as EthernetAddress, EtherType as EthernetProtocol, Eui64,
    Frame as EthernetFrame, Repr as EthernetRepr, TagControl as VlanTagControl, VlanTag,
    CRC32_RESIDUE, ETHERNET_HEADER_LEN, ETHERNET_MIN_FRAME_LEN, FCS_LEN, VLAN_TAG_LEN,
};

mod arp;
pub use self::arp::{
    Hardware as ArpHardware, Operation as ArpOperation, Packet as ArpPacket, Repr as ArpRepr,
    PACKET_LEN as ARP_PACKET_LEN,
};

pub(crate) mod ip;
pub use self::ip::{
    checksum, Address as IpAddress, Cidr as IpCidr, Endpoint as IpEndpoint,
    ListenEndpoint as IpListenEndpoint, Protocol as IpProtocol, Repr as IpRepr,
    Version as IpVersion,
};

pub(crate) mod ipv4;
pub use self::ipv4::{
    Address as Ipv4Address, Cidr as Ipv4Cidr, Packet as Ipv4Packet, Repr as Ipv4Repr,
    HEADER_LEN as IPV4_HEADER_LEN,
};

pub(crate) mod ipv6;
pub use self::ipv6::{
    Address as Ipv6Address, Cidr as Ipv6Cidr, Packet as Ipv6Packet, Repr as Ipv6Repr,
    HEADER_LEN as IPV6_HEADER_LEN,
};

mod tcp;
pub use self::tcp::{
    Flags as TcpFlags, Packet as TcpPacket, Repr as TcpRepr, SackRange, SeqNumber as TcpSeqNumber,
    TcpOption, HEADER_LEN as TCP_HEADER_LEN,
};

/// Parsing a packet failed.
///
/// Either it is malformed, or it is not supported by the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Error;

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "wire::Error")
    }
}

pub type Result<T> = core::result::Result<T, Error>;
