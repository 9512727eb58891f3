/*! The blocking stack shell.

One mutex guards every piece of stack state: interfaces, devices,
sockets, counters, the PRNG. Every public call takes it; the periodic
tick takes it; frame ingestion takes it. A blocking call releases the
mutex only inside the condition-variable wait and re-derives everything
on wake, so all observable state transitions of one connection are
serialized, and the only suspension points are the waits themselves.

Two entry points drive the data path:

 * [Stack::poll] — drain received frames out of every NIC and run them
   through the interface and socket layers. Call it when a NIC signals
   reception (blocking calls also poll on every wake, so a tick-only
   integration works, just with tick-granular latency).
 * [Stack::tick] — the 100 ms periodic: NIC housekeeping, link-state
   supervision, the 200 ms ARP subdivision, and every TCP timer.
*/

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Instant as StdInstant;

use log::{debug, trace};

use crate::config::{
    SOCKET_EPHEMERAL_PORT_MAX, SOCKET_EPHEMERAL_PORT_MIN, TCP_DEFAULT_RX_BUFFER_SIZE,
    TCP_DEFAULT_TX_BUFFER_SIZE, TCP_MAX_RX_BUFFER_SIZE, TCP_MAX_TX_BUFFER_SIZE,
};
use crate::iface::{
    alloc_frame_buffer, AddrState, Interface, InterfaceCounters, Interfaces, RxKind,
};
use crate::phy::{Device, LinkState, SwitchDriver, TxAncillary};
use crate::rand::Rand;
use crate::socket::raw::{RawEthFrame, RawIpPacket, RxAncillary};
use crate::socket::{
    tcp, EthProtocolFilter, Events, RawEthSocket, RawIpSocket, Socket, SocketHandle, SocketSet,
};
use crate::storage::NetBuffer;
use crate::time::{Duration, Instant};
use crate::wire::{
    EthernetAddress, EthernetFrame, IpAddress, IpEndpoint, IpProtocol, IpRepr, Ipv4Cidr,
    Ipv4Packet, Ipv4Repr, Ipv6Cidr, Ipv6Packet, Ipv6Repr, TcpPacket, TcpRepr,
    ETHERNET_HEADER_LEN,
};
use crate::{Error, Result};

/// Which directions `tcp_shutdown` closes.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Shutdown {
    Send,
    Receive,
    Both,
}

/// A waitable binary event, in the shape of the host-OS event objects
/// this device class provides. Users register one per socket to learn
/// about readiness without polling.
#[derive(Debug, Default)]
pub struct Event {
    signaled: Mutex<bool>,
    cond: Condvar,
}

impl Event {
    pub fn new() -> Arc<Event> {
        Arc::new(Event::default())
    }

    pub fn set(&self) {
        *self.signaled.lock().unwrap() = true;
        self.cond.notify_all();
    }

    pub fn reset(&self) {
        *self.signaled.lock().unwrap() = false;
    }

    /// Wait until the event is signaled; `true` on signal, `false` on
    /// timeout.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        let mut signaled = self.signaled.lock().unwrap();
        let deadline = timeout.map(|t| StdInstant::now() + std::time::Duration::from(t));
        while !*signaled {
            match deadline {
                None => signaled = self.cond.wait(signaled).unwrap(),
                Some(deadline) => {
                    let now = StdInstant::now();
                    if now >= deadline {
                        return false;
                    }
                    let (guard, _) = self.cond.wait_timeout(signaled, deadline - now).unwrap();
                    signaled = guard;
                }
            }
        }
        true
    }
}

struct Registration {
    mask: Events,
    event: Arc<Event>,
}

struct Inner {
    ifaces: Interfaces,
    devices: Vec<Option<Box<dyn Device + Send>>>,
    switch: Option<Box<dyn SwitchDriver + Send>>,
    sockets: SocketSet<'static>,
    tcp_counters: tcp::Counters,
    rand: Rand,
    isn_secret: Option<u64>,
    ephemeral_port: u16,
    registrations: HashMap<SocketHandle, Registration>,
    /// Sockets released by the user, reaped once their state machine
    /// runs out.
    disowned: Vec<SocketHandle>,
    tick_callbacks: Vec<TickCallback>,
}

/// A user callback invoked on every periodic tick, with the stack lock
/// held.
pub type TickCallback = Box<dyn FnMut(Instant) + Send>;

struct Shared {
    inner: Mutex<Inner>,
    cond: Condvar,
}

/// The stack instance. Cheap to clone; all clones share the state.
#[derive(Clone)]
pub struct Stack {
    shared: Arc<Shared>,
    epoch: StdInstant,
}

impl Stack {
    /// Create a stack. `seed` feeds the PRNG used for initial sequence
    /// numbers and ephemeral ports; supply real entropy.
    pub fn new(seed: u64) -> Stack {
        let mut rand = Rand::new(seed);
        let span = (SOCKET_EPHEMERAL_PORT_MAX - SOCKET_EPHEMERAL_PORT_MIN) as u32 + 1;
        let ephemeral_port = SOCKET_EPHEMERAL_PORT_MIN + (rand.rand_u32() % span) as u16;

        Stack {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    ifaces: Interfaces::new(),
                    devices: Vec::new(),
                    switch: None,
                    sockets: SocketSet::new(),
                    tcp_counters: tcp::Counters::default(),
                    rand,
                    isn_secret: None,
                    ephemeral_port,
                    registrations: HashMap::new(),
                    disowned: Vec::new(),
                    tick_callbacks: Vec::new(),
                }),
                cond: Condvar::new(),
            }),
            epoch: StdInstant::now(),
        }
    }

    /// Derive initial sequence numbers from a keyed hash of the
    /// connection 4-tuple instead of the bare PRNG.
    pub fn set_isn_secret(&self, secret: u64) {
        self.lock().isn_secret = Some(secret);
    }

    fn now(&self) -> Instant {
        Instant::from_millis(self.epoch.elapsed().as_millis() as i64)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.shared.inner.lock().unwrap()
    }

    // ------------------------------------------------------------------
    // interfaces
    // ------------------------------------------------------------------

    /// Register an interface; physical interfaces bring their driver.
    /// Returns the interface index.
    pub fn add_interface(
        &self,
        iface: Interface,
        device: Option<Box<dyn Device + Send>>,
    ) -> Result<usize> {
        let mut inner = self.lock();
        let index = inner.ifaces.add(iface)?;
        while inner.devices.len() <= index {
            inner.devices.push(None);
        }
        inner.devices[index] = device;
        Ok(index)
    }

    /// Attach the switch-tagging driver.
    pub fn set_switch_driver(&self, switch: Box<dyn SwitchDriver + Send>) {
        self.lock().switch = Some(switch);
    }

    /// Register a callback run on every periodic tick, after the
    /// protocol timers.
    pub fn register_tick_callback(&self, callback: TickCallback) {
        self.lock().tick_callbacks.push(callback);
    }

    /// Run a closure against one interface, for configuration that has
    /// no dedicated helper.
    pub fn with_interface<R>(
        &self,
        index: usize,
        f: impl FnOnce(&mut Interface) -> R,
    ) -> Result<R> {
        let mut inner = self.lock();
        Ok(f(inner.ifaces.get_mut(index)?))
    }

    pub fn add_ipv4_addr(&self, index: usize, cidr: Ipv4Cidr, state: AddrState) -> Result<()> {
        self.lock().ifaces.get_mut(index)?.add_ipv4_addr(cidr, state)
    }

    pub fn add_ipv6_addr(&self, index: usize, cidr: Ipv6Cidr) -> Result<()> {
        self.lock().ifaces.get_mut(index)?.add_ipv6_addr(cidr)
    }

    /// Whether an ARP conflict was recorded against `addr`; the address
    /// configuration collaborator reads this after probing.
    pub fn ipv4_conflict(&self, index: usize, addr: crate::wire::Ipv4Address) -> Result<bool> {
        let inner = self.lock();
        Ok(inner
            .ifaces
            .get(index)?
            .ipv4_addrs()
            .iter()
            .any(|entry| entry.cidr.address() == addr && entry.conflict))
    }

    /// Promote a tentative address that survived duplicate detection.
    pub fn promote_ipv4_addr(&self, index: usize, addr: crate::wire::Ipv4Address) -> Result<()> {
        let mut inner = self.lock();
        for entry in inner.ifaces.get_mut(index)?.ipv4_addrs_mut() {
            if entry.cidr.address() == addr {
                entry.state = AddrState::Preferred;
                return Ok(());
            }
        }
        Err(Error::AddressNotFound)
    }

    pub fn interface_counters(&self, index: usize) -> Result<InterfaceCounters> {
        Ok(*self.lock().ifaces.get(index)?.counters())
    }

    pub fn tcp_counters(&self) -> tcp::Counters {
        self.lock().tcp_counters
    }

    pub fn link_state(&self, index: usize) -> Result<LinkState> {
        Ok(self.lock().ifaces.get(index)?.link_state())
    }

    /// Accept an additional destination MAC address (typically
    /// multicast), pushing the filter to the hardware.
    pub fn accept_mac_addr(&self, index: usize, addr: EthernetAddress) -> Result<()> {
        let inner = &mut *self.lock();
        let phys = inner
            .ifaces
            .physical_index(index)
            .ok_or(Error::InvalidInterface)?;
        let device = device_mut(&mut inner.devices, phys)?;
        inner.ifaces.accept_mac_addr(device, index, addr)
    }

    pub fn drop_mac_addr(&self, index: usize, addr: EthernetAddress) -> Result<()> {
        let inner = &mut *self.lock();
        let phys = inner
            .ifaces
            .physical_index(index)
            .ok_or(Error::InvalidInterface)?;
        let device = device_mut(&mut inner.devices, phys)?;
        inner.ifaces.drop_mac_addr(device, index, addr)
    }

    /// Resolve an IPv4 neighbor. `InProgress` means a request went on
    /// the wire; retry after the reply had a chance to arrive.
    pub fn arp_resolve(
        &self,
        index: usize,
        addr: crate::wire::Ipv4Address,
    ) -> Result<EthernetAddress> {
        let now = self.now();
        let inner = &mut *self.lock();
        let phys = inner
            .ifaces
            .physical_index(index)
            .ok_or(Error::InvalidInterface)?;
        let device = device_mut(&mut inner.devices, phys)?;
        match inner.ifaces.arp_resolve(device, index, addr, now)? {
            Some(mac) => Ok(mac),
            None => Err(Error::InProgress),
        }
    }

    /// Send an RFC 5227 probe for duplicate address detection.
    pub fn arp_send_probe(&self, index: usize, addr: crate::wire::Ipv4Address) -> Result<()> {
        let inner = &mut *self.lock();
        let phys = inner
            .ifaces
            .physical_index(index)
            .ok_or(Error::InvalidInterface)?;
        let device = device_mut(&mut inner.devices, phys)?;
        inner.ifaces.arp_send_probe(device, index, addr)
    }

    /// Gratuitously announce an address that won its probes.
    pub fn arp_send_announcement(
        &self,
        index: usize,
        addr: crate::wire::Ipv4Address,
    ) -> Result<()> {
        let inner = &mut *self.lock();
        let phys = inner
            .ifaces
            .physical_index(index)
            .ok_or(Error::InvalidInterface)?;
        let device = device_mut(&mut inner.devices, phys)?;
        inner.ifaces.arp_send_announcement(device, index, addr)
    }

    /// Install a static neighbor entry (the only way IPv6 unicast
    /// next-hops resolve here).
    pub fn add_static_neighbor(
        &self,
        index: usize,
        protocol_addr: IpAddress,
        hardware_addr: EthernetAddress,
    ) -> Result<()> {
        let now = self.now();
        let mut inner = self.lock();
        if inner
            .ifaces
            .get_mut(index)?
            .neighbor_cache_mut()
            .add_permanent(protocol_addr, hardware_addr, now)
        {
            Ok(())
        } else {
            Err(Error::OutOfResources)
        }
    }

    // ------------------------------------------------------------------
    // socket lifecycle
    // ------------------------------------------------------------------

    /// Allocate a TCP socket. Buffer sizes of zero select the defaults.
    pub fn socket_tcp(&self, tx_size: usize, rx_size: usize) -> Result<SocketHandle> {
        let tx_size = if tx_size == 0 {
            TCP_DEFAULT_TX_BUFFER_SIZE
        } else {
            tx_size.min(TCP_MAX_TX_BUFFER_SIZE)
        };
        let rx_size = if rx_size == 0 {
            TCP_DEFAULT_RX_BUFFER_SIZE
        } else {
            rx_size.min(TCP_MAX_RX_BUFFER_SIZE)
        };
        let socket = tcp::Socket::new(vec![0; rx_size], vec![0; tx_size]);
        self.lock().sockets.add(socket)
    }

    /// Allocate a raw IP socket for one protocol number.
    pub fn socket_raw_ip(&self, protocol: IpProtocol) -> Result<SocketHandle> {
        self.lock().sockets.add(RawIpSocket::new(protocol))
    }

    /// Allocate a raw Ethernet socket.
    pub fn socket_raw_eth(&self, filter: EthProtocolFilter) -> Result<SocketHandle> {
        self.lock().sockets.add(RawEthSocket::new(filter))
    }

    /// Run a closure against one socket, for per-socket options
    /// (`no_delay`, TTL, DSCP, keep-alive, interface binding).
    pub fn with_socket<R>(
        &self,
        handle: SocketHandle,
        f: impl FnOnce(&mut Socket<'static>) -> R,
    ) -> Result<R> {
        let mut inner = self.lock();
        let result = f(inner.sockets.get_mut(handle)?);
        self.notify(&mut inner);
        Ok(result)
    }

    /// Register a user event to be signaled whenever the socket's
    /// events intersect `mask`.
    pub fn socket_register_events(
        &self,
        handle: SocketHandle,
        event: Arc<Event>,
        mask: Events,
    ) -> Result<()> {
        let mut inner = self.lock();
        inner.sockets.get(handle)?;
        inner
            .registrations
            .insert(handle, Registration { mask, event });
        self.notify(&mut inner);
        Ok(())
    }

    pub fn socket_unregister_events(&self, handle: SocketHandle) {
        self.lock().registrations.remove(&handle);
    }

    /// The socket's current event word (link flags included).
    pub fn socket_events(&self, handle: SocketHandle) -> Result<Events> {
        let inner = self.lock();
        effective_events(&inner, handle)
    }

    /// Release a socket. Raw sockets go away immediately; a TCP socket
    /// is shut down and reaped once its state machine finishes.
    pub fn socket_close(&self, handle: SocketHandle) -> Result<()> {
        let now = self.now();
        let mut inner = self.lock();
        inner.registrations.remove(&handle);
        let is_tcp = matches!(inner.sockets.get(handle)?, Socket::Tcp(_));
        if !is_tcp {
            inner.sockets.remove(handle);
            return Ok(());
        }

        {
            let inner = &mut *inner;
            let socket = inner.sockets.get_mut(handle)?.as_tcp_mut()?;
            let mut cx = tcp::Context {
                now,
                rand: &mut inner.rand,
                counters: &mut inner.tcp_counters,
            };
            let _ = socket.shutdown_send(&mut cx);
        }
        flush_tcp_segments(&mut inner, handle, now)?;

        let finished = matches!(
            inner.sockets.get(handle)?,
            Socket::Tcp(socket) if socket.state() == tcp::State::Closed
        );
        if finished {
            inner.sockets.remove(handle);
        } else {
            inner.disowned.push(handle);
        }
        self.notify(&mut inner);
        Ok(())
    }

    // ------------------------------------------------------------------
    // TCP operations
    // ------------------------------------------------------------------

    /// Put a TCP socket into LISTEN.
    pub fn tcp_listen(
        &self,
        handle: SocketHandle,
        local: impl Into<crate::wire::IpListenEndpoint>,
        backlog: usize,
    ) -> Result<()> {
        let mut inner = self.lock();
        inner
            .sockets
            .get_mut(handle)?
            .as_tcp_mut()?
            .listen(local, backlog)?;
        self.notify(&mut inner);
        Ok(())
    }

    /// Open a connection and wait for establishment.
    pub fn tcp_connect(
        &self,
        handle: SocketHandle,
        iface: Option<usize>,
        remote: IpEndpoint,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let now = self.now();
        let mut inner = self.lock();

        let iface_index = iface.unwrap_or(0);
        let local_addr = select_source_addr(&inner.ifaces, iface_index, &remote.addr)?;
        let local_port = alloc_ephemeral_port(&mut inner);
        let local = IpEndpoint::new(local_addr, local_port);
        let isn_secret = inner.isn_secret;
        let iss = tcp::generate_isn(&mut inner.rand, isn_secret, local, remote, now);

        {
            let inner = &mut *inner;
            let socket = inner.sockets.get_mut(handle)?.as_tcp_mut()?;
            let mut cx = tcp::Context {
                now,
                rand: &mut inner.rand,
                counters: &mut inner.tcp_counters,
            };
            socket.connect(&mut cx, Some(iface_index), local, remote, iss)?;
        }
        flush_tcp_segments(&mut inner, handle, now)?;
        self.notify(&mut inner);

        let events = self.wait_for_events(
            inner,
            handle,
            Events::CONNECTED | Events::CLOSED,
            timeout,
        )?;
        if events.contains(Events::CONNECTED) {
            Ok(())
        } else {
            let inner = self.lock();
            let reset = match inner.sockets.get(handle) {
                Ok(Socket::Tcp(socket)) => socket.reset_received(),
                _ => false,
            };
            if reset {
                Err(Error::ConnectionReset)
            } else {
                Err(Error::ConnectionFailed)
            }
        }
    }

    /// Take one pending connection off a listener, allocating the child
    /// socket and answering with SYN+ACK. Waits for a pending
    /// connection, not for handshake completion.
    pub fn tcp_accept(
        &self,
        handle: SocketHandle,
        timeout: Option<Duration>,
    ) -> Result<SocketHandle> {
        loop {
            self.wait_for_events(self.lock(), handle, Events::ACCEPT, timeout)?;

            let now = self.now();
            let mut inner = self.lock();
            let (item, local_port, tx_size, rx_size, keep_alive, no_delay) = {
                let listener = inner.sockets.get_mut(handle)?.as_tcp_mut()?;
                let Some(item) = listener.pop_syn_queue() else {
                    // lost a race against another accept; wait again
                    continue;
                };
                (
                    item,
                    listener.listen_port(),
                    listener.tx_capacity(),
                    listener.rx_capacity(),
                    listener.keep_alive_config(),
                    listener.no_delay(),
                )
            };

            let mut child = tcp::Socket::new(vec![0; rx_size], vec![0; tx_size]);
            let local = IpEndpoint::new(item.local_addr, local_port);
            let remote = IpEndpoint::new(item.remote_addr, item.remote_port);
            let isn_secret = inner.isn_secret;
            let iss = tcp::generate_isn(&mut inner.rand, isn_secret, local, remote, now);

            child.set_no_delay(no_delay);
            let (ka_enabled, ka_idle, ka_interval, ka_probes) = keep_alive;
            child.set_keep_alive_params(ka_idle, ka_interval, ka_probes);
            child.set_keep_alive(ka_enabled, now);

            {
                let inner = &mut *inner;
                let mut cx = tcp::Context {
                    now,
                    rand: &mut inner.rand,
                    counters: &mut inner.tcp_counters,
                };
                child.open_passive(&mut cx, &item, local_port, iss)?;
            }

            let child_handle = inner.sockets.add(child)?;
            flush_tcp_segments(&mut inner, child_handle, now)?;
            self.notify(&mut inner);
            debug!("tcp: accepted connection from {}", remote);
            return Ok(child_handle);
        }
    }

    /// Send `data`, blocking until all of it is buffered (or the
    /// timeout elapses; the bytes absorbed so far are reported in the
    /// timeout error case as a short count).
    pub fn tcp_send(
        &self,
        handle: SocketHandle,
        data: &[u8],
        timeout: Option<Duration>,
    ) -> Result<usize> {
        let mut written = 0;
        while written < data.len() {
            let now = self.now();
            let mut inner = self.lock();
            let n = {
                let inner = &mut *inner;
                let socket = inner.sockets.get_mut(handle)?.as_tcp_mut()?;
                let mut cx = tcp::Context {
                    now,
                    rand: &mut inner.rand,
                    counters: &mut inner.tcp_counters,
                };
                socket.send(&mut cx, &data[written..])?
            };
            flush_tcp_segments(&mut inner, handle, now)?;
            self.notify(&mut inner);
            drop(inner);
            written += n;
            if written == data.len() {
                break;
            }
            if n == 0 {
                let events = self.wait_for_events(
                    self.lock(),
                    handle,
                    Events::TX_READY | Events::CLOSED,
                    timeout,
                )?;
                if events.contains(Events::CLOSED) {
                    return Err(Error::ConnectionClosing);
                }
            }
        }
        Ok(written)
    }

    /// Receive into `data`, blocking until at least one byte (or
    /// end-of-stream, reset, or timeout).
    pub fn tcp_receive(
        &self,
        handle: SocketHandle,
        data: &mut [u8],
        timeout: Option<Duration>,
    ) -> Result<usize> {
        loop {
            let now = self.now();
            let mut inner = self.lock();
            let n = {
                let inner = &mut *inner;
                let socket = inner.sockets.get_mut(handle)?.as_tcp_mut()?;
                let mut cx = tcp::Context {
                    now,
                    rand: &mut inner.rand,
                    counters: &mut inner.tcp_counters,
                };
                socket.receive(&mut cx, data)?
            };
            flush_tcp_segments(&mut inner, handle, now)?;
            self.notify(&mut inner);
            drop(inner);
            if n > 0 {
                return Ok(n);
            }
            self.wait_for_events(
                self.lock(),
                handle,
                Events::RX_READY | Events::CLOSED,
                timeout,
            )?;
        }
    }

    /// Shut down one or both directions.
    ///
    /// Closing the send side flushes buffered data, emits the FIN and
    /// waits for it to be acknowledged; closing the receive side waits
    /// for the peer's FIN.
    pub fn tcp_shutdown(
        &self,
        handle: SocketHandle,
        how: Shutdown,
        timeout: Option<Duration>,
    ) -> Result<()> {
        if matches!(how, Shutdown::Send | Shutdown::Both) {
            let events = self.wait_for_events(
                self.lock(),
                handle,
                Events::TX_DONE | Events::CLOSED,
                timeout,
            )?;
            if !events.contains(Events::CLOSED) {
                let now = self.now();
                let mut inner = self.lock();
                {
                    let inner = &mut *inner;
                    let socket = inner.sockets.get_mut(handle)?.as_tcp_mut()?;
                    let mut cx = tcp::Context {
                        now,
                        rand: &mut inner.rand,
                        counters: &mut inner.tcp_counters,
                    };
                    socket.shutdown_send(&mut cx)?;
                }
                flush_tcp_segments(&mut inner, handle, now)?;
                self.notify(&mut inner);
            }
            self.wait_for_events(
                self.lock(),
                handle,
                Events::TX_SHUTDOWN | Events::CLOSED,
                timeout,
            )?;
        }
        if matches!(how, Shutdown::Receive | Shutdown::Both) {
            self.wait_for_events(
                self.lock(),
                handle,
                Events::RX_SHUTDOWN | Events::CLOSED,
                timeout,
            )?;
        }
        Ok(())
    }

    /// Reset the connection outright.
    pub fn tcp_abort(&self, handle: SocketHandle) -> Result<()> {
        let now = self.now();
        let mut inner = self.lock();
        {
            let inner = &mut *inner;
            let socket = inner.sockets.get_mut(handle)?.as_tcp_mut()?;
            let mut cx = tcp::Context {
                now,
                rand: &mut inner.rand,
                counters: &mut inner.tcp_counters,
            };
            socket.abort(&mut cx);
        }
        flush_tcp_segments(&mut inner, handle, now)?;
        self.notify(&mut inner);
        Ok(())
    }

    pub fn tcp_state(&self, handle: SocketHandle) -> Result<tcp::State> {
        let mut inner = self.lock();
        Ok(inner.sockets.get_mut(handle)?.as_tcp_mut()?.state())
    }

    // ------------------------------------------------------------------
    // raw sockets
    // ------------------------------------------------------------------

    /// Send a raw IP payload to `dst`. The IP header is built here;
    /// source selection follows the socket binding.
    pub fn raw_ip_send(&self, handle: SocketHandle, data: &[u8], dst: IpAddress) -> Result<()> {
        let now = self.now();
        let inner = &mut *self.lock();

        let (protocol, bound_iface, local_addr, hop_limit, dscp, ancillary) = {
            let socket = inner.sockets.get_mut(handle)?.as_raw_ip_mut()?;
            (
                socket.protocol(),
                socket.bound_iface(),
                socket.local_addr(),
                socket.hop_limit(),
                socket.dscp(),
                socket.tx_ancillary(),
            )
        };
        let iface_index = bound_iface.unwrap_or(0);
        let src = match local_addr {
            Some(addr) => addr,
            None => select_source_addr(&inner.ifaces, iface_index, &dst)?,
        };

        if src.version() != dst.version() {
            return Err(Error::InvalidAddress);
        }
        let mut ip_repr = IpRepr::new(src, dst, protocol, data.len(), hop_limit);
        if let IpRepr::Ipv4(repr) = &mut ip_repr {
            repr.dscp = dscp;
        }

        let mut buffer = alloc_frame_buffer();
        let mut header = vec![0; ip_repr.buffer_len()];
        ip_repr.emit(&mut header);
        buffer.append_chunk(header);
        buffer.append_slice(data);

        let phys = inner
            .ifaces
            .physical_index(iface_index)
            .ok_or(Error::InvalidInterface)?;
        let device = device_mut(&mut inner.devices, phys)?;
        inner.ifaces.send_ip_frame(
            device,
            switch_mut(&mut inner.switch),
            iface_index,
            &dst,
            &ancillary,
            buffer,
            now,
        )
    }

    /// Receive one raw IP packet, blocking until one is queued.
    pub fn raw_ip_receive(
        &self,
        handle: SocketHandle,
        timeout: Option<Duration>,
    ) -> Result<RawIpPacket> {
        loop {
            {
                let mut inner = self.lock();
                if let Some(packet) = inner.sockets.get_mut(handle)?.as_raw_ip_mut()?.dequeue() {
                    self.notify(&mut inner);
                    return Ok(packet);
                }
            }
            self.wait_for_events(self.lock(), handle, Events::RX_READY, timeout)?;
        }
    }

    /// Send a complete Ethernet frame (header included) through the
    /// bound interface's NIC, padding and appending the FCS when the
    /// hardware does not.
    pub fn raw_eth_send(&self, handle: SocketHandle, frame: &[u8]) -> Result<()> {
        if frame.len() < ETHERNET_HEADER_LEN {
            return Err(Error::InvalidLength);
        }
        let inner = &mut *self.lock();
        let bound_iface = inner.sockets.get_mut(handle)?.as_raw_eth_mut()?.bound_iface();
        let iface_index = bound_iface.unwrap_or(0);
        let phys = inner
            .ifaces
            .physical_index(iface_index)
            .ok_or(Error::InvalidInterface)?;
        let device = device_mut(&mut inner.devices, phys)?;
        let caps = device.capabilities();

        let mut buffer = NetBuffer::from(frame);
        if !caps.ethernet.auto_padding && buffer.len() < crate::wire::ETHERNET_MIN_FRAME_LEN {
            let padding = [0u8; crate::wire::ETHERNET_MIN_FRAME_LEN];
            let missing = crate::wire::ETHERNET_MIN_FRAME_LEN - buffer.len();
            buffer.append_slice(&padding[..missing]);
        }
        if !caps.ethernet.auto_crc_calc {
            let fcs = crate::wire::crc32_chunks(buffer.chunks(0, buffer.len()));
            let mut fcs_bytes = [0u8; 4];
            fcs_bytes.copy_from_slice(&fcs.to_le_bytes());
            buffer.append_slice(&fcs_bytes);
        }

        device.send(&buffer)?;

        let dst = EthernetFrame::new_unchecked(frame).dst_addr();
        let counters = inner.ifaces.get_mut(phys)?.counters_mut();
        counters.if_out_octets += buffer.len() as u64;
        if dst.is_unicast() {
            counters.if_out_ucast_pkts += 1;
        } else {
            counters.if_out_nucast_pkts += 1;
        }
        Ok(())
    }

    /// Receive one raw Ethernet frame, blocking until one is queued.
    pub fn raw_eth_receive(
        &self,
        handle: SocketHandle,
        timeout: Option<Duration>,
    ) -> Result<RawEthFrame> {
        loop {
            {
                let mut inner = self.lock();
                if let Some(frame) = inner.sockets.get_mut(handle)?.as_raw_eth_mut()?.dequeue() {
                    self.notify(&mut inner);
                    return Ok(frame);
                }
            }
            self.wait_for_events(self.lock(), handle, Events::RX_READY, timeout)?;
        }
    }

    // ------------------------------------------------------------------
    // data path driving
    // ------------------------------------------------------------------

    /// Ingest every frame the NICs have queued. Call on NIC receive
    /// signal; blocking calls also run it on every wake.
    pub fn poll(&self) {
        let mut inner = self.lock();
        self.poll_inner(&mut inner);
        self.notify(&mut inner);
    }

    /// The 100 ms periodic driver: device housekeeping, link
    /// supervision, ARP state timers on their 200 ms subdivision, and
    /// the TCP timer walk.
    pub fn tick(&self) {
        let now = self.now();
        let mut inner = self.lock();
        let inner = &mut *inner;

        // device tick and link supervision
        for index in 0..inner.ifaces.len() {
            let Ok(device) = device_mut(&mut inner.devices, index) else {
                continue;
            };
            device.tick(now);
            let link = device.link_state();
            if let Ok(iface) = inner.ifaces.get_mut(index) {
                if iface.link != link {
                    debug!(
                        "iface {index}: link {}",
                        if link.up { "up" } else { "down" }
                    );
                    iface.link = link;
                    if !link.up {
                        // cached neighbors did not survive the link
                        iface.neighbor_cache_mut().flush();
                    }
                }
            }
        }

        // ARP runs on a coarser subdivision of the tick
        for index in 0..inner.ifaces.len() {
            if !inner.ifaces.arp_tick_due(index, now) {
                continue;
            }
            let Some(phys) = inner.ifaces.physical_index(index) else {
                continue;
            };
            if let Ok(device) = device_mut(&mut inner.devices, phys) {
                let _ = inner.ifaces.arp_tick(device, index, now);
            }
        }

        // TCP timers
        let handles: Vec<SocketHandle> = inner.sockets.iter().map(|(handle, _)| handle).collect();
        for handle in handles {
            let is_tcp = matches!(inner.sockets.get(handle), Ok(Socket::Tcp(_)));
            if !is_tcp {
                continue;
            }
            {
                let socket = inner
                    .sockets
                    .get_mut(handle)
                    .and_then(|socket| socket.as_tcp_mut());
                let Ok(socket) = socket else { continue };
                let mut cx = tcp::Context {
                    now,
                    rand: &mut inner.rand,
                    counters: &mut inner.tcp_counters,
                };
                socket.tick(&mut cx);
            }
            let _ = flush_tcp_segments(inner, handle, now);
        }

        // reap disowned sockets whose state machine finished
        let disowned = core::mem::take(&mut inner.disowned);
        for handle in disowned {
            let finished = match inner.sockets.get(handle) {
                Ok(Socket::Tcp(socket)) => socket.state() == tcp::State::Closed,
                Ok(_) => false,
                Err(_) => true,
            };
            if finished {
                inner.sockets.remove(handle);
            } else {
                inner.disowned.push(handle);
            }
        }

        for callback in inner.tick_callbacks.iter_mut() {
            callback(now);
        }

        self.poll_inner_raw(inner);
        self.notify_raw(inner);
    }

    fn poll_inner(&self, inner: &mut MutexGuard<'_, Inner>) -> usize {
        self.poll_inner_raw(&mut *inner)
    }

    /// Returns the number of frames ingested.
    fn poll_inner_raw(&self, inner: &mut Inner) -> usize {
        let now = self.now();
        let mut processed = 0;
        for phys in 0..inner.ifaces.len() {
            loop {
                let Ok(device) = device_mut(&mut inner.devices, phys) else {
                    break;
                };
                let mtu = device.capabilities().max_transmission_unit.max(1518);
                let mut frame = vec![0u8; mtu + 18];
                let Some(length) = device.receive(&mut frame) else {
                    break;
                };
                frame.truncate(length);
                processed += 1;
                if let Err(err) = ingress_frame(inner, phys, frame, now) {
                    trace!("ingress drop: {err}");
                }
            }
        }
        processed
    }

    // ------------------------------------------------------------------
    // waiting and signaling
    // ------------------------------------------------------------------

    /// Block until the socket's events intersect `mask`. Polls pending
    /// frames on entry and after every wake; the mutex is released only
    /// inside the condition-variable wait.
    fn wait_for_events(
        &self,
        mut guard: MutexGuard<'_, Inner>,
        handle: SocketHandle,
        mask: Events,
        timeout: Option<Duration>,
    ) -> Result<Events> {
        let deadline = timeout.map(|t| StdInstant::now() + std::time::Duration::from(t));
        loop {
            // frames first: the wake may race the events they imply
            if self.poll_inner(&mut guard) > 0 {
                self.notify(&mut guard);
            }
            let events = effective_events(&guard, handle)? & mask;
            if !events.is_empty() {
                return Ok(events);
            }

            let wait = match deadline {
                None => std::time::Duration::from_millis(100),
                Some(deadline) => {
                    let now = StdInstant::now();
                    if now >= deadline {
                        return Err(Error::Timeout);
                    }
                    (deadline - now).min(std::time::Duration::from_millis(100))
                }
            };
            let (next, _) = self.shared.cond.wait_timeout(guard, wait).unwrap();
            guard = next;
        }
    }

    fn notify(&self, inner: &mut MutexGuard<'_, Inner>) {
        self.notify_raw(&mut *inner);
    }

    fn notify_raw(&self, inner: &mut Inner) {
        for (&handle, registration) in inner.registrations.iter() {
            if let Ok(events) = effective_events(inner, handle) {
                if events.intersects(registration.mask) {
                    registration.event.set();
                }
            }
        }
        self.shared.cond.notify_all();
    }
}

fn device_mut<'d>(
    devices: &'d mut [Option<Box<dyn Device + Send>>],
    index: usize,
) -> Result<&'d mut dyn Device> {
    match devices.get_mut(index) {
        Some(Some(device)) => {
            let device: &mut dyn Device = device.as_mut();
            Ok(device)
        }
        _ => Err(Error::InvalidInterface),
    }
}

fn switch_mut(
    switch: &mut Option<Box<dyn SwitchDriver + Send>>,
) -> Option<&mut dyn SwitchDriver> {
    match switch {
        Some(switch) => {
            let switch: &mut dyn SwitchDriver = switch.as_mut();
            Some(switch)
        }
        None => None,
    }
}

fn effective_events(inner: &Inner, handle: SocketHandle) -> Result<Events> {
    let socket = inner.sockets.get(handle)?;
    let mut events = socket.events();
    if let Some(iface) = socket.bound_iface() {
        if let Ok(iface) = inner.ifaces.get(iface) {
            events |= if iface.link_state().up {
                Events::LINK_UP
            } else {
                Events::LINK_DOWN
            };
        }
    }
    Ok(events)
}

fn alloc_ephemeral_port(inner: &mut Inner) -> u16 {
    let port = inner.ephemeral_port;
    inner.ephemeral_port = if port >= SOCKET_EPHEMERAL_PORT_MAX {
        SOCKET_EPHEMERAL_PORT_MIN
    } else {
        port + 1
    };
    port
}

fn select_source_addr(
    ifaces: &Interfaces,
    index: usize,
    dst: &IpAddress,
) -> Result<IpAddress> {
    let iface = ifaces.get(index)?;
    match dst {
        IpAddress::Ipv4(dst) => iface
            .select_ipv4_source(*dst)
            .map(IpAddress::Ipv4)
            .ok_or(Error::AddressNotFound),
        IpAddress::Ipv6(_) => iface
            .ipv6_addrs()
            .first()
            .map(|cidr| IpAddress::Ipv6(cidr.address()))
            .ok_or(Error::AddressNotFound),
    }
}

/// Wrap one TCP segment in IP and hand it to the interface layer.
fn transmit_tcp_segment(
    inner: &mut Inner,
    iface_index: usize,
    ttl: u8,
    dscp: u8,
    ancillary: TxAncillary,
    segment: tcp::Segment,
    now: Instant,
) -> Result<()> {
    let total_len = segment.repr.header_len() + segment.payload.len();

    let mut tcp_bytes = vec![0u8; total_len];
    {
        let mut packet = TcpPacket::new_unchecked(&mut tcp_bytes[..]);
        segment.repr.emit(&mut packet);
        packet
            .payload_mut()
            .copy_from_slice(&segment.payload);
    }

    let phys = inner
        .ifaces
        .physical_index(iface_index)
        .ok_or(Error::InvalidInterface)?;
    let checksum_caps = device_mut(&mut inner.devices, phys)?
        .capabilities()
        .checksum;
    if checksum_caps.tcp.tx() {
        let mut packet = TcpPacket::new_unchecked(&mut tcp_bytes[..]);
        packet.fill_checksum(&segment.local.addr, &segment.remote.addr);
    }

    if segment.local.addr.version() != segment.remote.addr.version() {
        return Err(Error::InvalidAddress);
    }
    let mut ip_repr = IpRepr::new(
        segment.local.addr,
        segment.remote.addr,
        IpProtocol::Tcp,
        total_len,
        ttl,
    );
    if let IpRepr::Ipv4(repr) = &mut ip_repr {
        repr.dscp = dscp;
    }

    let mut buffer = alloc_frame_buffer();
    let mut header = vec![0; ip_repr.buffer_len()];
    ip_repr.emit(&mut header);
    buffer.append_chunk(header);
    buffer.append_chunk(tcp_bytes);

    let device = device_mut(&mut inner.devices, phys)?;
    inner.ifaces.send_ip_frame(
        device,
        switch_mut(&mut inner.switch),
        iface_index,
        &segment.remote.addr,
        &ancillary,
        buffer,
        now,
    )
}

/// Drain a TCP socket's pending segments onto the wire.
fn flush_tcp_segments(inner: &mut Inner, handle: SocketHandle, now: Instant) -> Result<()> {
    let (segments, iface_index, ttl, dscp, ancillary) = {
        let socket = inner.sockets.get_mut(handle)?.as_tcp_mut()?;
        (
            socket.take_segments(),
            socket.bound_iface().unwrap_or(0),
            socket.ttl(),
            socket.dscp(),
            socket.tx_ancillary(),
        )
    };
    for segment in segments {
        if let Err(err) = transmit_tcp_segment(inner, iface_index, ttl, dscp, ancillary, segment, now)
        {
            trace!("tcp egress drop: {err}");
        }
    }
    Ok(())
}

/// Transmit a stack-generated reset that belongs to no socket.
fn transmit_orphan_reset(
    inner: &mut Inner,
    iface_index: usize,
    local: IpEndpoint,
    remote: IpEndpoint,
    repr: TcpRepr,
    now: Instant,
) {
    inner.tcp_counters.out_segs += 1;
    inner.tcp_counters.out_rsts += 1;
    let segment = tcp::Segment {
        local,
        remote,
        repr,
        payload: Vec::new(),
    };
    let ancillary = TxAncillary::default();
    if let Err(err) = transmit_tcp_segment(inner, iface_index, 64, 0, ancillary, segment, now) {
        trace!("tcp reset drop: {err}");
    }
}

/// Run one received frame through the interface layer and demultiplex
/// the deliveries to sockets.
fn ingress_frame(inner: &mut Inner, phys: usize, mut frame: Vec<u8>, now: Instant) -> Result<()> {
    let deliveries = {
        let device = device_mut(&mut inner.devices, phys)?;
        inner
            .ifaces
            .process_frame(device, switch_mut(&mut inner.switch), phys, &mut frame, now)?
    };

    for delivery in deliveries {
        deliver_raw_eth(inner, &delivery, &frame, now);

        match delivery.kind {
            RxKind::Ipv4 => {
                let payload = &frame[delivery.payload.clone()];
                let _ = deliver_ipv4(inner, &delivery, payload, now);
            }
            RxKind::Ipv6 => {
                let payload = &frame[delivery.payload.clone()];
                let _ = deliver_ipv6(inner, &delivery, payload, now);
            }
            RxKind::Arp | RxKind::Llc | RxKind::Unknown => (),
        }
    }
    Ok(())
}

/// Every accepted frame is offered to the raw Ethernet sockets,
/// whatever its EtherType.
fn deliver_raw_eth(inner: &mut Inner, delivery: &crate::iface::RxFrame, frame: &[u8], now: Instant) {
    let mut targets: Vec<SocketHandle> = Vec::new();
    for (handle, socket) in inner.sockets.iter() {
        if let Socket::RawEth(socket) = socket {
            if socket.matches(delivery.iface, delivery.raw_ethertype) {
                targets.push(handle);
            }
        }
    }
    if targets.is_empty() {
        return;
    }

    // rebuild the canonical 14-octet header in front of the payload;
    // any VLAN tags were peeled by the frame path
    let payload = &frame[delivery.payload.clone()];
    let mut copy = Vec::with_capacity(ETHERNET_HEADER_LEN + payload.len());
    copy.extend_from_slice(delivery.header.dst_addr.as_bytes());
    copy.extend_from_slice(delivery.header.src_addr.as_bytes());
    copy.extend_from_slice(&delivery.raw_ethertype.to_be_bytes());
    copy.extend_from_slice(payload);

    let ancillary = RxAncillary {
        timestamp: now,
        src_mac: delivery.header.src_addr,
        dst_mac: delivery.header.dst_addr,
        switch_port: delivery.switch_port,
        hop_limit: 0,
    };

    for handle in targets {
        let full = {
            let Ok(socket) = inner.sockets.get_mut(handle) else {
                continue;
            };
            let Ok(socket) = socket.as_raw_eth_mut() else {
                continue;
            };
            socket
                .enqueue(RawEthFrame {
                    frame: copy.clone(),
                    ancillary: ancillary.clone(),
                })
                .is_err()
        };
        if full {
            inner.ifaces.count_in_discard(delivery.iface);
        }
    }
}

fn deliver_ipv4(
    inner: &mut Inner,
    delivery: &crate::iface::RxFrame,
    payload: &[u8],
    now: Instant,
) -> Result<()> {
    let phys = inner
        .ifaces
        .physical_index(delivery.iface)
        .ok_or(Error::InvalidInterface)?;
    let checksum_caps = device_mut(&mut inner.devices, phys)?
        .capabilities()
        .checksum;

    let packet = Ipv4Packet::new_checked(payload)?;
    let repr = Ipv4Repr::parse(&packet, &checksum_caps)?;

    // destination must be for us: local, broadcast or multicast
    {
        let iface = inner.ifaces.get(delivery.iface)?;
        let local = iface.has_ipv4_addr(repr.dst_addr)
            || iface.is_broadcast_ipv4(repr.dst_addr)
            || repr.dst_addr.is_multicast();
        if !local {
            inner.ifaces.count_in_discard(delivery.iface);
            return Err(Error::InvalidAddress);
        }
    }

    let src = IpAddress::Ipv4(repr.src_addr);
    let dst = IpAddress::Ipv4(repr.dst_addr);
    match repr.next_header {
        IpProtocol::Tcp => deliver_tcp(
            inner,
            delivery.iface,
            &src,
            &dst,
            packet.payload(),
            now,
        ),
        protocol => deliver_raw_ip(
            inner,
            delivery,
            protocol,
            &src,
            &dst,
            packet.payload(),
            repr.hop_limit,
            now,
        ),
    }
}

fn deliver_ipv6(
    inner: &mut Inner,
    delivery: &crate::iface::RxFrame,
    payload: &[u8],
    now: Instant,
) -> Result<()> {
    let packet = Ipv6Packet::new_checked(payload)?;
    let repr = Ipv6Repr::parse(&packet)?;

    {
        let iface = inner.ifaces.get(delivery.iface)?;
        let dst = IpAddress::Ipv6(repr.dst_addr);
        if !iface.has_ip_addr(&dst) && !repr.dst_addr.is_multicast() {
            inner.ifaces.count_in_discard(delivery.iface);
            return Err(Error::InvalidAddress);
        }
    }

    let src = IpAddress::Ipv6(repr.src_addr);
    let dst = IpAddress::Ipv6(repr.dst_addr);
    match repr.next_header {
        IpProtocol::Tcp => deliver_tcp(
            inner,
            delivery.iface,
            &src,
            &dst,
            packet.payload(),
            now,
        ),
        protocol => deliver_raw_ip(
            inner,
            delivery,
            protocol,
            &src,
            &dst,
            packet.payload(),
            repr.hop_limit,
            now,
        ),
    }
}

fn deliver_tcp(
    inner: &mut Inner,
    iface_index: usize,
    src: &IpAddress,
    dst: &IpAddress,
    segment: &[u8],
    now: Instant,
) -> Result<()> {
    let phys = inner
        .ifaces
        .physical_index(iface_index)
        .ok_or(Error::InvalidInterface)?;
    let checksum_caps = device_mut(&mut inner.devices, phys)?
        .capabilities()
        .checksum;

    let packet = TcpPacket::new_checked(segment)?;
    if checksum_caps.tcp.rx() && !packet.verify_checksum(src, dst) {
        inner.ifaces.count_in_discard(iface_index);
        return Err(Error::WrongChecksum);
    }
    let repr = TcpRepr::parse(&packet)?;
    let payload = packet.payload();

    // exact four-tuple match wins over listeners
    let mut matched = None;
    for (handle, socket) in inner.sockets.iter() {
        if let Socket::Tcp(socket) = socket {
            if socket.matches_exact(dst, repr.dst_port, src, repr.src_port) {
                matched = Some(handle);
                break;
            }
        }
    }
    if matched.is_none() {
        for (handle, socket) in inner.sockets.iter() {
            if let Socket::Tcp(socket) = socket {
                if socket.matches_listen(dst, repr.dst_port) {
                    matched = Some(handle);
                    break;
                }
            }
        }
    }

    match matched {
        Some(handle) => {
            {
                let inner = &mut *inner;
                let socket = inner.sockets.get_mut(handle)?.as_tcp_mut()?;
                let mut cx = tcp::Context {
                    now,
                    rand: &mut inner.rand,
                    counters: &mut inner.tcp_counters,
                };
                socket.process(&mut cx, Some(iface_index), dst, src, &repr, payload);
            }
            flush_tcp_segments(inner, handle, now)?;
        }
        None => {
            // no connection: answer with the RFC 793 reset
            if let Some(reject) = tcp::reject_repr(&repr, payload.len()) {
                trace!("tcp: no socket for {}:{}", dst, repr.dst_port);
                let local = IpEndpoint::new(*dst, repr.dst_port);
                let remote = IpEndpoint::new(*src, repr.src_port);
                transmit_orphan_reset(inner, iface_index, local, remote, reject, now);
            }
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn deliver_raw_ip(
    inner: &mut Inner,
    delivery: &crate::iface::RxFrame,
    protocol: IpProtocol,
    src: &IpAddress,
    dst: &IpAddress,
    payload: &[u8],
    hop_limit: u8,
    now: Instant,
) -> Result<()> {
    let mut targets: Vec<SocketHandle> = Vec::new();
    for (handle, socket) in inner.sockets.iter() {
        if let Socket::RawIp(socket) = socket {
            if socket.matches(delivery.iface, protocol, src, dst) {
                targets.push(handle);
            }
        }
    }

    let ancillary = RxAncillary {
        timestamp: now,
        src_mac: delivery.header.src_addr,
        dst_mac: delivery.header.dst_addr,
        switch_port: delivery.switch_port,
        hop_limit,
    };

    for handle in &targets {
        let full = {
            let Ok(socket) = inner.sockets.get_mut(*handle) else {
                continue;
            };
            let Ok(socket) = socket.as_raw_ip_mut() else {
                continue;
            };
            socket
                .enqueue(RawIpPacket {
                    src_addr: *src,
                    dst_addr: *dst,
                    payload: payload.to_vec(),
                    ancillary: ancillary.clone(),
                })
                .is_err()
        };
        if full {
            inner.ifaces.count_in_discard(delivery.iface);
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::phy::Loopback;
    use crate::wire::{Ipv4Address, Ipv6Address};

    const MAC: EthernetAddress = EthernetAddress([0x02, 0x00, 0x00, 0x00, 0x00, 0x01]);
    const ADDR_A: Ipv4Address = Ipv4Address([10, 0, 0, 1]);
    const ADDR_B: Ipv4Address = Ipv4Address([10, 0, 0, 2]);
    const WAIT: Option<Duration> = Some(Duration::from_secs(5));

    fn loopback_stack() -> Stack {
        // run with RUST_LOG=trace to watch the data path
        let _ = env_logger::builder().is_test(true).try_init();

        let stack = Stack::new(0x5eed);
        let mut iface = Interface::physical(MAC);
        iface
            .add_ipv4_addr(Ipv4Cidr::new(ADDR_A, 24), AddrState::Preferred)
            .unwrap();
        iface
            .add_ipv4_addr(Ipv4Cidr::new(ADDR_B, 24), AddrState::Preferred)
            .unwrap();
        stack
            .add_interface(iface, Some(Box::new(Loopback::new())))
            .unwrap();
        stack
    }

    #[test]
    fn tcp_echo_over_loopback() {
        let stack = loopback_stack();

        let listener = stack.socket_tcp(0, 0).unwrap();
        stack.tcp_listen(listener, 80, 4).unwrap();

        let server_stack = stack.clone();
        let server = std::thread::spawn(move || {
            let child = server_stack.tcp_accept(listener, WAIT).unwrap();
            let mut buffer = [0u8; 64];
            let n = server_stack.tcp_receive(child, &mut buffer, WAIT).unwrap();
            server_stack.tcp_send(child, &buffer[..n], WAIT).unwrap();
            n
        });

        let client = stack.socket_tcp(0, 0).unwrap();
        stack
            .tcp_connect(client, Some(0), IpEndpoint::new(ADDR_A.into(), 80), WAIT)
            .unwrap();
        assert_eq!(stack.tcp_state(client).unwrap(), tcp::State::Established);

        stack.tcp_send(client, b"ping", WAIT).unwrap();
        let mut buffer = [0u8; 64];
        let n = stack.tcp_receive(client, &mut buffer, WAIT).unwrap();
        assert_eq!(&buffer[..n], b"ping");
        assert_eq!(server.join().unwrap(), 4);

        let counters = stack.tcp_counters();
        assert_eq!(counters.active_opens, 1);
        assert_eq!(counters.passive_opens, 1);
        assert!(counters.out_segs >= 6);

        // the neighbor discovered along the way is ours
        let mac = stack.arp_resolve(0, ADDR_A).unwrap();
        assert_eq!(mac, MAC);
    }

    #[test]
    fn bulk_transfer_over_loopback() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};
        use std::sync::atomic::{AtomicBool, Ordering};

        let stack = loopback_stack();
        let wait = Some(Duration::from_secs(20));

        // the periodic driver must run: stalled senders resume through
        // the override and persist timers
        let done = Arc::new(AtomicBool::new(false));
        let ticker = {
            let stack = stack.clone();
            let done = done.clone();
            std::thread::spawn(move || {
                while !done.load(Ordering::Relaxed) {
                    stack.tick();
                    std::thread::sleep(std::time::Duration::from_millis(20));
                }
            })
        };

        // a payload larger than both socket buffers, so the transfer
        // has to ride the window machinery
        let mut payload = vec![0u8; 6000];
        StdRng::seed_from_u64(0x6b756c6b).fill(&mut payload[..]);

        let listener = stack.socket_tcp(0, 0).unwrap();
        stack.tcp_listen(listener, 80, 4).unwrap();

        let server_stack = stack.clone();
        let total = payload.len();
        let server = std::thread::spawn(move || {
            let child = server_stack.tcp_accept(listener, wait).unwrap();
            let mut received = Vec::with_capacity(total);
            while received.len() < total {
                let mut buffer = [0u8; 1024];
                let n = server_stack.tcp_receive(child, &mut buffer, wait).unwrap();
                received.extend_from_slice(&buffer[..n]);
            }
            received
        });

        let client = stack.socket_tcp(0, 0).unwrap();
        stack
            .tcp_connect(client, Some(0), IpEndpoint::new(ADDR_A.into(), 80), wait)
            .unwrap();
        assert_eq!(stack.tcp_send(client, &payload, wait).unwrap(), total);

        let received = server.join().unwrap();
        assert_eq!(received, payload);

        done.store(true, Ordering::Relaxed);
        ticker.join().unwrap();
    }

    #[test]
    fn connect_to_closed_port_is_refused() {
        let stack = loopback_stack();
        let client = stack.socket_tcp(0, 0).unwrap();
        let result = stack.tcp_connect(
            client,
            Some(0),
            IpEndpoint::new(ADDR_A.into(), 9999),
            Some(Duration::from_secs(2)),
        );
        assert_eq!(result, Err(Error::ConnectionReset));
        let counters = stack.tcp_counters();
        assert_eq!(counters.out_rsts, 1);
    }

    #[test]
    fn raw_ip_round_trip() {
        let stack = loopback_stack();
        let socket = stack.socket_raw_ip(IpProtocol::Icmp).unwrap();

        stack
            .raw_ip_send(socket, &[0x08, 0x00, 0x12, 0x34], ADDR_B.into())
            .unwrap();
        stack.poll();

        let packet = stack.raw_ip_receive(socket, WAIT).unwrap();
        assert_eq!(packet.payload, vec![0x08, 0x00, 0x12, 0x34]);
        assert_eq!(packet.dst_addr, IpAddress::Ipv4(ADDR_B));
        assert_eq!(packet.ancillary.dst_mac, MAC);
    }

    #[test]
    fn raw_eth_round_trip() {
        let stack = loopback_stack();
        let socket = stack.socket_raw_eth(EthProtocolFilter::EtherType(0x88cc)).unwrap();

        let mut frame = Vec::new();
        frame.extend_from_slice(MAC.as_bytes());
        frame.extend_from_slice(MAC.as_bytes());
        frame.extend_from_slice(&0x88ccu16.to_be_bytes());
        frame.extend_from_slice(b"lldp-ish payload");
        stack.raw_eth_send(socket, &frame).unwrap();
        stack.poll();

        let received = stack.raw_eth_receive(socket, WAIT).unwrap();
        assert_eq!(received.frame, frame);

        // the unknown EtherType was counted on the interface
        let counters = stack.interface_counters(0).unwrap();
        assert_eq!(counters.if_in_unknown_protos, 1);
    }

    #[test]
    fn registered_event_signals_readability() {
        let stack = loopback_stack();
        let socket = stack.socket_raw_ip(IpProtocol::Igmp).unwrap();
        stack
            .with_socket(socket, |socket| {
                socket.as_raw_ip_mut().unwrap().bind_iface(Some(0))
            })
            .unwrap();
        // link supervision runs on the tick
        stack.tick();

        let event = Event::new();
        stack
            .socket_register_events(socket, event.clone(), Events::RX_READY)
            .unwrap();
        assert!(!event.wait(Some(Duration::from_millis(50))));

        stack
            .raw_ip_send(socket, &[0x11, 0x22], ADDR_A.into())
            .unwrap();
        stack.poll();
        assert!(event.wait(WAIT));
        assert!(stack
            .socket_events(socket)
            .unwrap()
            .contains(Events::RX_READY | Events::LINK_UP));
    }

    #[test]
    fn ipv6_static_neighbor_send() {
        let stack = loopback_stack();
        let local = Ipv6Address::from_parts(&[0xfe80, 0, 0, 0, 0, 0, 0, 1]);
        let peer = Ipv6Address::from_parts(&[0xfe80, 0, 0, 0, 0, 0, 0, 2]);
        stack.add_ipv6_addr(0, Ipv6Cidr::new(local, 64)).unwrap();

        let socket = stack.socket_raw_ip(IpProtocol::Icmpv6).unwrap();

        // no neighbor entry yet: unreachable
        assert_eq!(
            stack.raw_ip_send(socket, &[0x80, 0x00], peer.into()),
            Err(Error::AddressNotFound)
        );

        stack.add_static_neighbor(0, peer.into(), MAC).unwrap();
        stack.raw_ip_send(socket, &[0x80, 0x00], peer.into()).unwrap();
        stack.poll();

        // the frame looped back but the destination address is not
        // ours, so it was discarded at the IP layer
        let counters = stack.interface_counters(0).unwrap();
        assert_eq!(counters.if_in_discards, 1);
    }

    #[test]
    fn ephemeral_ports_advance_and_wrap() {
        let stack = loopback_stack();
        let mut inner = stack.lock();
        inner.ephemeral_port = SOCKET_EPHEMERAL_PORT_MAX - 1;
        assert_eq!(alloc_ephemeral_port(&mut inner), SOCKET_EPHEMERAL_PORT_MAX - 1);
        assert_eq!(alloc_ephemeral_port(&mut inner), SOCKET_EPHEMERAL_PORT_MAX);
        assert_eq!(alloc_ephemeral_port(&mut inner), SOCKET_EPHEMERAL_PORT_MIN);
    }

    #[test]
    fn tick_reaps_disowned_sockets() {
        let stack = loopback_stack();
        let socket = stack.socket_raw_ip(IpProtocol::Icmp).unwrap();
        stack.socket_close(socket).unwrap();
        assert!(stack.socket_events(socket).is_err());

        // a closed TCP socket disappears immediately too
        let socket = stack.socket_tcp(0, 0).unwrap();
        stack.socket_close(socket).unwrap();
        assert!(stack.tcp_state(socket).is_err());
    }
}
