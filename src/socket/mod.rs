/*! Protocol sockets and the table holding them.

A [Socket] is a tagged union over the transport engines: the TCP engine
in [tcp], and the raw IP / raw Ethernet demultiplexers in [raw]. Sockets
hold protocol state and bounded buffers; they do not talk to interfaces
or devices themselves. The [crate::stack] module wires the two together
and adds blocking semantics.
*/

pub mod event;
pub mod raw;
pub mod tcp;

pub use self::event::Events;
pub use self::raw::{EthProtocolFilter, RawEthSocket, RawIpSocket};

use core::fmt;

use crate::config::SOCKET_COUNT;
use crate::{Error, Result};

/// A handle, identifying a socket in a [SocketSet].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SocketHandle(usize);

impl fmt::Display for SocketHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A socket of any kind.
#[derive(Debug)]
pub enum Socket<'a> {
    Tcp(tcp::Socket<'a>),
    RawIp(RawIpSocket),
    RawEth(RawEthSocket),
}

impl<'a> Socket<'a> {
    /// The socket's current event word, before masking and link events.
    pub fn events(&self) -> Events {
        match self {
            Socket::Tcp(socket) => socket.events(),
            Socket::RawIp(socket) => socket.events,
            Socket::RawEth(socket) => socket.events,
        }
    }

    /// The interface the socket is bound to, if any.
    pub fn bound_iface(&self) -> Option<usize> {
        match self {
            Socket::Tcp(socket) => socket.bound_iface(),
            Socket::RawIp(socket) => socket.bound_iface(),
            Socket::RawEth(socket) => socket.bound_iface(),
        }
    }

    pub fn as_tcp_mut(&mut self) -> Result<&mut tcp::Socket<'a>> {
        match self {
            Socket::Tcp(socket) => Ok(socket),
            _ => Err(Error::InvalidParameter),
        }
    }

    pub fn as_raw_ip_mut(&mut self) -> Result<&mut RawIpSocket> {
        match self {
            Socket::RawIp(socket) => Ok(socket),
            _ => Err(Error::InvalidParameter),
        }
    }

    pub fn as_raw_eth_mut(&mut self) -> Result<&mut RawEthSocket> {
        match self {
            Socket::RawEth(socket) => Ok(socket),
            _ => Err(Error::InvalidParameter),
        }
    }
}

impl<'a> From<tcp::Socket<'a>> for Socket<'a> {
    fn from(socket: tcp::Socket<'a>) -> Self {
        Socket::Tcp(socket)
    }
}

impl From<RawIpSocket> for Socket<'_> {
    fn from(socket: RawIpSocket) -> Self {
        Socket::RawIp(socket)
    }
}

impl From<RawEthSocket> for Socket<'_> {
    fn from(socket: RawEthSocket) -> Self {
        Socket::RawEth(socket)
    }
}

/// The socket table. Slots are reused; handles of removed sockets
/// simply stop resolving.
#[derive(Debug, Default)]
pub struct SocketSet<'a> {
    sockets: Vec<Option<Socket<'a>>>,
}

impl<'a> SocketSet<'a> {
    pub fn new() -> SocketSet<'a> {
        SocketSet {
            sockets: Vec::new(),
        }
    }

    /// Add a socket, returning its handle. The table is bounded by the
    /// configured socket count.
    pub fn add<T: Into<Socket<'a>>>(&mut self, socket: T) -> Result<SocketHandle> {
        let socket = socket.into();
        if let Some(index) = self.sockets.iter().position(Option::is_none) {
            self.sockets[index] = Some(socket);
            return Ok(SocketHandle(index));
        }
        if self.sockets.len() >= SOCKET_COUNT {
            return Err(Error::OutOfResources);
        }
        self.sockets.push(Some(socket));
        Ok(SocketHandle(self.sockets.len() - 1))
    }

    pub fn get(&self, handle: SocketHandle) -> Result<&Socket<'a>> {
        self.sockets
            .get(handle.0)
            .and_then(Option::as_ref)
            .ok_or(Error::InvalidParameter)
    }

    pub fn get_mut(&mut self, handle: SocketHandle) -> Result<&mut Socket<'a>> {
        self.sockets
            .get_mut(handle.0)
            .and_then(Option::as_mut)
            .ok_or(Error::InvalidParameter)
    }

    /// Remove a socket, returning it.
    pub fn remove(&mut self, handle: SocketHandle) -> Option<Socket<'a>> {
        self.sockets.get_mut(handle.0).and_then(Option::take)
    }

    pub fn iter(&self) -> impl Iterator<Item = (SocketHandle, &Socket<'a>)> {
        self.sockets
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|socket| (SocketHandle(index), socket)))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (SocketHandle, &mut Socket<'a>)> {
        self.sockets
            .iter_mut()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_mut().map(|socket| (SocketHandle(index), socket)))
    }

    pub fn len(&self) -> usize {
        self.sockets.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
