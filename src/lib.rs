/*! Embedded dual-stack TCP/IP core for single-NIC controllers.

This crate implements the three subsystems that make up the hot path of a
small embedded network stack:

 * a full TCP engine — RFC 793 state machine, retransmission with
   congestion control, RTT estimation, silly-window avoidance on both
   ends, zero-window probing, keep-alive and a SYN queue for listeners;
 * the Ethernet/ARP data path — frame parsing and emission with
   802.1Q/802.1ad tags, FCS handling, a reference-counted MAC filter
   pushed down to the NIC, and the ARP neighbor state machine;
 * a raw-socket demultiplexer feeding bounded per-socket queues.

The layering follows the module tree: [wire] gives zero-copy access to
packet octets, [storage] provides the ring and scatter/gather buffers,
[phy] abstracts the NIC, [iface] owns interfaces, the neighbor cache and
the MAC filter, [socket] holds the protocol engines, and [stack] wraps
everything behind one mutex with blocking calls and the 100 ms tick.

Anything above the transport layer (DHCP, mDNS, TLS, application
protocols) is out of scope; the stack only exposes sockets.
*/

#[macro_use]
mod macros;

pub mod config;
pub mod iface;
pub mod parsers;
pub mod phy;
pub mod rand;
pub mod socket;
pub mod stack;
pub mod storage;
pub mod time;
pub mod wire;

use core::fmt;

/// The uniform error value returned by every fallible stack operation.
///
/// The taxonomy is closed: drivers and collaborators map their failures
/// onto one of these tags, and no layer invents private error types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    OutOfMemory,
    OutOfResources,
    InvalidParameter,
    InvalidInterface,
    InvalidAddress,
    InvalidLength,
    InvalidProtocol,
    InvalidSyntax,
    WrongChecksum,
    WrongIdentifier,
    AddressNotFound,
    AlreadyConnected,
    NotConnected,
    ConnectionClosing,
    ConnectionReset,
    ConnectionFailed,
    EndOfStream,
    Timeout,
    /// The operation has started and completes asynchronously
    /// (e.g. an ARP resolution that had to go on the wire).
    InProgress,
    Failure,
    ReceiveQueueFull,
    ProtocolUnreachable,
    UnexpectedState,
    NotFound,
    BufferEmpty,
    InvalidPacket,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Error::OutOfMemory => "out of memory",
            Error::OutOfResources => "out of resources",
            Error::InvalidParameter => "invalid parameter",
            Error::InvalidInterface => "invalid interface",
            Error::InvalidAddress => "invalid address",
            Error::InvalidLength => "invalid length",
            Error::InvalidProtocol => "invalid protocol",
            Error::InvalidSyntax => "invalid syntax",
            Error::WrongChecksum => "wrong checksum",
            Error::WrongIdentifier => "wrong identifier",
            Error::AddressNotFound => "address not found",
            Error::AlreadyConnected => "already connected",
            Error::NotConnected => "not connected",
            Error::ConnectionClosing => "connection closing",
            Error::ConnectionReset => "connection reset by peer",
            Error::ConnectionFailed => "connection failed",
            Error::EndOfStream => "end of stream",
            Error::Timeout => "timeout",
            Error::InProgress => "operation in progress",
            Error::Failure => "failure",
            Error::ReceiveQueueFull => "receive queue full",
            Error::ProtocolUnreachable => "protocol unreachable",
            Error::UnexpectedState => "unexpected state",
            Error::NotFound => "not found",
            Error::BufferEmpty => "buffer empty",
            Error::InvalidPacket => "invalid packet",
        };
        write!(f, "{msg}")
    }
}

impl std::error::Error for Error {}

impl From<wire::Error> for Error {
    fn from(_: wire::Error) -> Error {
        Error::InvalidPacket
    }
}

pub type Result<T> = core::result::Result<T, Error>;
