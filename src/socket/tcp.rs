/*! Transmission Control Protocol.

The engine keeps the classic TCB layout: a circular transmit buffer
addressed by sequence number, a retransmission queue of header
descriptors that never hold payload (retransmission re-reads the ring),
a bounded list of out-of-order extents doubling as the reassembly
tracker, NewReno congestion control with a loss-recovery mode entered on
retransmission timeout, Van Jacobson RTT estimation with Karn's rule,
silly-window avoidance on both sides, and the six timers driven by the
100 ms tick: retransmission, persist, keep-alive, SWS override,
FIN-WAIT-2 and 2MSL.

A socket never transmits by itself. Every segment it decides to emit is
queued as a [Segment]; the stack drains the queue with
[Socket::take_segments] while still holding the lock, wraps the
segments in IP and hands them to the interface layer.
*/

use core::fmt;
use std::collections::VecDeque;

use heapless::Vec as BoundedVec;
use log::{debug, trace, warn};

use crate::config::{
    TCP_2MSL_TIMER, TCP_DEFAULT_KEEP_ALIVE_IDLE, TCP_DEFAULT_KEEP_ALIVE_INTERVAL,
    TCP_DEFAULT_KEEP_ALIVE_PROBES, TCP_DEFAULT_MSS, TCP_DEFAULT_PROBE_INTERVAL,
    TCP_DEFAULT_SYN_QUEUE_SIZE, TCP_FAST_RETRANSMIT_THRES, TCP_FIN_WAIT_2_TIMER,
    TCP_INITIAL_RTO, TCP_INITIAL_WINDOW, TCP_LOSS_WINDOW, TCP_MAX_MSS, TCP_MAX_PROBE_INTERVAL,
    TCP_MAX_RETRIES, TCP_MAX_RTO, TCP_MAX_SACK_BLOCKS, TCP_MAX_SYN_QUEUE_SIZE, TCP_MIN_MSS,
    TCP_MIN_RTO, TCP_OVERRIDE_TIMEOUT,
};
use crate::phy::TxAncillary;
use crate::rand::Rand;
use crate::socket::Events;
use crate::storage::RingBuffer;
use crate::time::{Duration, Instant};
use crate::wire::{
    IpAddress, IpEndpoint, IpListenEndpoint, TcpFlags as Flags, TcpRepr, TcpSeqNumber as SeqNumber,
};
use crate::{Error, Result};

/// A TCP socket ring buffer.
pub type SocketBuffer<'a> = RingBuffer<'a, u8>;

/// The state of a TCP socket, according to [RFC 793].
///
/// [RFC 793]: https://tools.ietf.org/html/rfc793
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum State {
    Closed,
    Listen,
    SynSent,
    SynReceived,
    Established,
    FinWait1,
    FinWait2,
    CloseWait,
    Closing,
    LastAck,
    TimeWait,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            State::Closed => write!(f, "CLOSED"),
            State::Listen => write!(f, "LISTEN"),
            State::SynSent => write!(f, "SYN-SENT"),
            State::SynReceived => write!(f, "SYN-RECEIVED"),
            State::Established => write!(f, "ESTABLISHED"),
            State::FinWait1 => write!(f, "FIN-WAIT-1"),
            State::FinWait2 => write!(f, "FIN-WAIT-2"),
            State::CloseWait => write!(f, "CLOSE-WAIT"),
            State::Closing => write!(f, "CLOSING"),
            State::LastAck => write!(f, "LAST-ACK"),
            State::TimeWait => write!(f, "TIME-WAIT"),
        }
    }
}

/// Which congestion response is in force.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
enum CongestState {
    /// Slow start or congestion avoidance.
    Idle,
    /// Fast recovery after three duplicate ACKs (RFC 6582).
    Recovery,
    /// Recovery after a retransmission timeout.
    LossRecovery,
}

/// A one-shot timer.
#[derive(Debug, Clone, Copy, Default)]
struct NetTimer {
    expires_at: Option<Instant>,
}

impl NetTimer {
    fn start(&mut self, now: Instant, delay: Duration) {
        self.expires_at = Some(now + delay);
    }

    fn stop(&mut self) {
        self.expires_at = None;
    }

    const fn running(&self) -> bool {
        self.expires_at.is_some()
    }

    fn expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(at) if now >= at)
    }
}

/// Stack-wide TCP counters of the standard TCP MIB; increment-only.
#[derive(Debug, Clone, Copy, Default)]
pub struct Counters {
    pub active_opens: u64,
    pub passive_opens: u64,
    pub out_segs: u64,
    pub retrans_segs: u64,
    pub out_rsts: u64,
}

/// Per-call environment handed down by the stack.
pub struct Context<'c> {
    pub now: Instant,
    pub rand: &'c mut Rand,
    pub counters: &'c mut Counters,
}

/// A segment the socket wants on the wire. Payload bytes were copied
/// out of the transmit ring when the segment was built.
#[derive(Debug)]
pub struct Segment {
    pub local: IpEndpoint,
    pub remote: IpEndpoint,
    pub repr: TcpRepr,
    pub payload: Vec<u8>,
}

/// A retransmission queue descriptor: the header snapshot and the
/// payload length. The payload itself stays in the transmit ring and is
/// re-read on retransmission.
#[derive(Debug, Clone)]
struct TxQueueItem {
    repr: TcpRepr,
    length: usize,
    #[allow(unused)]
    sacked: bool,
}

impl TxQueueItem {
    /// Sequence space occupied by the segment.
    fn segment_len(&self) -> usize {
        if self.repr.flags.contains(Flags::SYN) {
            1
        } else if self.repr.flags.contains(Flags::FIN) {
            self.length + 1
        } else {
            self.length
        }
    }
}

/// A connection waiting in a listener's SYN queue.
#[derive(Debug, Clone)]
pub struct SynQueueItem {
    pub iface: Option<usize>,
    pub local_addr: IpAddress,
    pub remote_addr: IpAddress,
    pub remote_port: u16,
    /// The peer's initial sequence number.
    pub isn: SeqNumber,
    /// MSS negotiated from the peer's option and our receive MSS.
    pub mss: u16,
}

/// A Transmission Control Protocol socket.
#[derive(Debug)]
pub struct Socket<'a> {
    state: State,
    listen_endpoint: IpListenEndpoint,
    local_endpoint: IpEndpoint,
    remote_endpoint: IpEndpoint,
    bound_iface: Option<usize>,

    tx_buffer: SocketBuffer<'a>,
    rx_buffer: SocketBuffer<'a>,

    // send sequence space
    iss: SeqNumber,
    snd_una: SeqNumber,
    snd_nxt: SeqNumber,
    /// Bytes handed over by the user but not yet segmented.
    snd_user: usize,
    snd_wnd: u16,
    max_snd_wnd: u16,
    snd_wl1: SeqNumber,
    snd_wl2: SeqNumber,
    smss: u16,

    // receive sequence space
    irs: SeqNumber,
    rcv_nxt: SeqNumber,
    /// Bytes readable by the user.
    rcv_user: usize,
    rcv_wnd: u16,
    rmss: u16,
    sack_permitted: bool,
    sack_blocks: BoundedVec<(SeqNumber, SeqNumber), TCP_MAX_SACK_BLOCKS>,

    // round-trip estimation
    srtt: Duration,
    rttvar: Duration,
    rto: Duration,
    rtt_busy: bool,
    rtt_seq: SeqNumber,
    rtt_start: Instant,
    /// Bytes acknowledged during the measured round trip.
    rtt_acked_bytes: usize,

    // congestion control
    cwnd: usize,
    ssthresh: usize,
    recover: SeqNumber,
    dup_ack_count: u8,
    congest_state: CongestState,

    // timers
    retransmit_timer: NetTimer,
    retransmit_count: u8,
    persist_timer: NetTimer,
    wnd_probe_count: u8,
    wnd_probe_interval: Duration,
    override_timer: NetTimer,
    fin_wait_2_timer: NetTimer,
    time_wait_timer: NetTimer,

    // keep-alive
    keep_alive_enabled: bool,
    keep_alive_idle: Duration,
    keep_alive_interval: Duration,
    keep_alive_max_probes: u8,
    keep_alive_probe_count: u8,
    keep_alive_timestamp: Instant,

    retransmit_queue: VecDeque<TxQueueItem>,
    syn_queue: VecDeque<SynQueueItem>,
    backlog: usize,

    fin_received: bool,
    closed_flag: bool,
    reset_flag: bool,
    no_delay: bool,

    ttl: u8,
    dscp: u8,
    tx_ancillary: TxAncillary,

    events: Events,
    out_queue: Vec<Segment>,
}

impl<'a> Socket<'a> {
    /// Create a socket using the given buffers.
    pub fn new<T>(rx_buffer: T, tx_buffer: T) -> Socket<'a>
    where
        T: Into<SocketBuffer<'a>>,
    {
        let rx_buffer = rx_buffer.into();
        let tx_buffer = tx_buffer.into();
        assert!(rx_buffer.capacity() <= u16::MAX as usize);
        let rcv_wnd = rx_buffer.capacity() as u16;
        let rmss = TCP_MAX_MSS.min(rx_buffer.capacity()) as u16;

        Socket {
            state: State::Closed,
            listen_endpoint: IpListenEndpoint::default(),
            local_endpoint: IpEndpoint::default(),
            remote_endpoint: IpEndpoint::default(),
            bound_iface: None,
            tx_buffer,
            rx_buffer,
            iss: SeqNumber(0),
            snd_una: SeqNumber(0),
            snd_nxt: SeqNumber(0),
            snd_user: 0,
            snd_wnd: 0,
            max_snd_wnd: 0,
            snd_wl1: SeqNumber(0),
            snd_wl2: SeqNumber(0),
            smss: TCP_DEFAULT_MSS as u16,
            irs: SeqNumber(0),
            rcv_nxt: SeqNumber(0),
            rcv_user: 0,
            rcv_wnd,
            rmss,
            sack_permitted: false,
            sack_blocks: BoundedVec::new(),
            srtt: Duration::ZERO,
            rttvar: Duration::ZERO,
            rto: TCP_INITIAL_RTO,
            rtt_busy: false,
            rtt_seq: SeqNumber(0),
            rtt_start: Instant::ZERO,
            rtt_acked_bytes: 0,
            cwnd: 0,
            ssthresh: u16::MAX as usize,
            recover: SeqNumber(0),
            dup_ack_count: 0,
            congest_state: CongestState::Idle,
            retransmit_timer: NetTimer::default(),
            retransmit_count: 0,
            persist_timer: NetTimer::default(),
            wnd_probe_count: 0,
            wnd_probe_interval: Duration::ZERO,
            override_timer: NetTimer::default(),
            fin_wait_2_timer: NetTimer::default(),
            time_wait_timer: NetTimer::default(),
            keep_alive_enabled: false,
            keep_alive_idle: TCP_DEFAULT_KEEP_ALIVE_IDLE,
            keep_alive_interval: TCP_DEFAULT_KEEP_ALIVE_INTERVAL,
            keep_alive_max_probes: TCP_DEFAULT_KEEP_ALIVE_PROBES,
            keep_alive_probe_count: 0,
            keep_alive_timestamp: Instant::ZERO,
            retransmit_queue: VecDeque::new(),
            syn_queue: VecDeque::new(),
            backlog: TCP_DEFAULT_SYN_QUEUE_SIZE,
            fin_received: false,
            closed_flag: false,
            reset_flag: false,
            no_delay: false,
            ttl: 64,
            dscp: 0,
            tx_ancillary: TxAncillary::default(),
            events: Events::empty(),
            out_queue: Vec::new(),
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn events(&self) -> Events {
        self.events
    }

    pub fn local_endpoint(&self) -> IpEndpoint {
        self.local_endpoint
    }

    pub fn remote_endpoint(&self) -> IpEndpoint {
        self.remote_endpoint
    }

    pub fn bound_iface(&self) -> Option<usize> {
        self.bound_iface
    }

    pub fn bind_iface(&mut self, iface: Option<usize>) {
        self.bound_iface = iface;
    }

    /// Disable the Nagle hold-back, transmitting every write as soon as
    /// the windows allow.
    pub fn set_no_delay(&mut self, no_delay: bool) {
        self.no_delay = no_delay;
    }

    pub fn set_ttl(&mut self, ttl: u8) {
        self.ttl = ttl;
    }

    pub fn ttl(&self) -> u8 {
        self.ttl
    }

    pub fn set_dscp(&mut self, dscp: u8) {
        self.dscp = dscp;
    }

    pub fn dscp(&self) -> u8 {
        self.dscp
    }

    /// Tag priority bits applied when the egress interface is
    /// VLAN/VMAN-tagged.
    pub fn set_tx_ancillary(&mut self, ancillary: TxAncillary) {
        self.tx_ancillary = ancillary;
    }

    pub fn tx_ancillary(&self) -> TxAncillary {
        self.tx_ancillary
    }

    /// Turn keep-alive probing on or off.
    pub fn set_keep_alive(&mut self, enabled: bool, now: Instant) {
        self.keep_alive_enabled = enabled;
        self.keep_alive_probe_count = 0;
        self.keep_alive_timestamp = now;
    }

    pub fn set_keep_alive_params(&mut self, idle: Duration, interval: Duration, max_probes: u8) {
        self.keep_alive_idle = idle;
        self.keep_alive_interval = interval;
        self.keep_alive_max_probes = max_probes;
    }

    pub(crate) fn keep_alive_config(&self) -> (bool, Duration, Duration, u8) {
        (
            self.keep_alive_enabled,
            self.keep_alive_idle,
            self.keep_alive_interval,
            self.keep_alive_max_probes,
        )
    }

    /// The connection was closed by the retransmission machinery or the
    /// peer's reset.
    pub fn reset_received(&self) -> bool {
        self.reset_flag
    }

    /// The connection ran to orderly completion.
    pub fn closed_gracefully(&self) -> bool {
        self.closed_flag
    }

    /// Bytes of transmit buffer space currently available.
    pub fn tx_window(&self) -> usize {
        self.tx_buffer.window()
    }

    pub fn tx_capacity(&self) -> usize {
        self.tx_buffer.capacity()
    }

    pub fn rx_capacity(&self) -> usize {
        self.rx_buffer.capacity()
    }

    pub fn no_delay(&self) -> bool {
        self.no_delay
    }

    /// Bytes ready for the user to read.
    pub fn rx_available(&self) -> usize {
        self.rcv_user
    }

    /// Segments queued for the wire; the stack drains this after every
    /// operation on the socket.
    pub fn take_segments(&mut self) -> Vec<Segment> {
        core::mem::take(&mut self.out_queue)
    }

    // ------------------------------------------------------------------
    // user calls
    // ------------------------------------------------------------------

    /// Enter the LISTEN state on the given endpoint.
    pub fn listen<T: Into<IpListenEndpoint>>(&mut self, endpoint: T, backlog: usize) -> Result<()> {
        if self.state != State::Closed {
            return Err(Error::UnexpectedState);
        }
        let endpoint = endpoint.into();
        if endpoint.port == 0 {
            return Err(Error::InvalidParameter);
        }
        self.listen_endpoint = endpoint;
        self.backlog = if backlog == 0 {
            TCP_DEFAULT_SYN_QUEUE_SIZE
        } else {
            backlog.min(TCP_MAX_SYN_QUEUE_SIZE)
        };
        self.state = State::Listen;
        self.update_events();
        Ok(())
    }

    /// Start an active open towards `remote`. The SYN goes out
    /// immediately; establishment completes asynchronously.
    pub fn connect(
        &mut self,
        cx: &mut Context,
        iface: Option<usize>,
        local: IpEndpoint,
        remote: IpEndpoint,
        iss: SeqNumber,
    ) -> Result<()> {
        match self.state {
            State::Closed => (),
            State::Listen => return Err(Error::UnexpectedState),
            _ => return Err(Error::AlreadyConnected),
        }
        if remote.port == 0 || remote.addr.is_unspecified() {
            return Err(Error::InvalidAddress);
        }

        self.bound_iface = iface;
        self.local_endpoint = local;
        self.remote_endpoint = remote;

        self.iss = iss;
        self.snd_una = iss;
        self.snd_nxt = iss;
        self.recover = iss;
        self.rto = TCP_INITIAL_RTO;
        self.smss = TCP_DEFAULT_MSS as u16;
        self.cwnd = (TCP_INITIAL_WINDOW * self.smss as usize).min(self.tx_buffer.capacity());

        self.send_segment(cx, Flags::SYN, self.iss, SeqNumber(0), 0, true)?;
        self.snd_nxt = self.iss + 1;
        self.change_state(cx.now, State::SynSent);
        cx.counters.active_opens += 1;
        debug!("tcp: {} -> {}: SYN sent", local, remote);
        Ok(())
    }

    /// Complete a passive open for one SYN-queue entry, sending the
    /// SYN+ACK. Used by `accept` on a freshly allocated socket.
    pub fn open_passive(
        &mut self,
        cx: &mut Context,
        item: &SynQueueItem,
        local_port: u16,
        iss: SeqNumber,
    ) -> Result<()> {
        if self.state != State::Closed {
            return Err(Error::UnexpectedState);
        }

        self.bound_iface = item.iface;
        self.local_endpoint = IpEndpoint::new(item.local_addr, local_port);
        self.remote_endpoint = IpEndpoint::new(item.remote_addr, item.remote_port);

        self.irs = item.isn;
        self.rcv_nxt = item.isn + 1;
        self.smss = item
            .mss
            .clamp(TCP_MIN_MSS as u16, TCP_MAX_MSS as u16);

        self.iss = iss;
        self.snd_una = iss;
        self.snd_nxt = iss;
        self.recover = iss;
        self.rto = TCP_INITIAL_RTO;
        self.cwnd = (TCP_INITIAL_WINDOW * self.smss as usize).min(self.tx_buffer.capacity());

        self.send_segment(cx, Flags::SYN | Flags::ACK, self.iss, self.rcv_nxt, 0, true)?;
        self.snd_nxt = self.iss + 1;
        self.change_state(cx.now, State::SynReceived);
        cx.counters.passive_opens += 1;
        Ok(())
    }

    /// Copy data into the transmit buffer and run the Nagle gate.
    /// Returns the number of bytes absorbed; zero means the buffer is
    /// full and the caller should wait for `TX_READY`.
    pub fn send(&mut self, cx: &mut Context, data: &[u8]) -> Result<usize> {
        if self.reset_flag {
            return Err(Error::ConnectionReset);
        }
        match self.state {
            State::Established | State::CloseWait => (),
            State::Closed | State::Listen | State::SynSent | State::SynReceived => {
                return Err(Error::NotConnected)
            }
            _ => return Err(Error::ConnectionClosing),
        }

        let n = data.len().min(self.tx_buffer.window());
        if n == 0 {
            return Ok(0);
        }
        self.tx_buffer.enqueue_slice(&data[..n]);
        self.snd_user += n;

        self.nagle_algo(cx)?;

        // bound the time SWS gating may hold queued data back
        if self.snd_user > 0 && !self.override_timer.running() {
            self.override_timer.start(cx.now, TCP_OVERRIDE_TIMEOUT);
        }
        self.update_events();
        Ok(n)
    }

    /// Move readable bytes into `data`. Returns zero when nothing is
    /// readable yet; the caller waits for `RX_READY`.
    pub fn receive(&mut self, cx: &mut Context, data: &mut [u8]) -> Result<usize> {
        match self.state {
            State::Closed if !self.closed_flag && !self.reset_flag => {
                return Err(Error::NotConnected)
            }
            State::Listen | State::SynSent | State::SynReceived => {
                return Err(Error::NotConnected)
            }
            _ => (),
        }

        let n = data.len().min(self.rcv_user);
        if n == 0 {
            if self.reset_flag {
                return Err(Error::ConnectionReset);
            }
            if self.fin_received || self.closed_flag {
                return Err(Error::EndOfStream);
            }
            return Ok(0);
        }

        self.rx_buffer.dequeue_slice(&mut data[..n]);
        self.rcv_user -= n;
        self.update_receive_window(cx)?;
        self.update_events();
        Ok(n)
    }

    /// Shut the send direction down by emitting a FIN. The caller is
    /// responsible for flushing buffered data first (waiting on
    /// `TX_DONE`).
    pub fn shutdown_send(&mut self, cx: &mut Context) -> Result<()> {
        match self.state {
            State::Established => {
                self.send_fin(cx)?;
                self.change_state(cx.now, State::FinWait1);
                Ok(())
            }
            State::CloseWait => {
                self.send_fin(cx)?;
                self.change_state(cx.now, State::LastAck);
                Ok(())
            }
            // already shutting down or shut down
            State::FinWait1
            | State::FinWait2
            | State::Closing
            | State::LastAck
            | State::TimeWait
            | State::Closed => Ok(()),
            State::Listen | State::SynSent => {
                self.delete_control_block();
                self.state = State::Closed;
                self.update_events();
                Ok(())
            }
            State::SynReceived => Err(Error::UnexpectedState),
        }
    }

    fn send_fin(&mut self, cx: &mut Context) -> Result<()> {
        self.send_segment(cx, Flags::FIN | Flags::ACK, self.snd_nxt, self.rcv_nxt, 0, true)?;
        self.snd_nxt += 1;
        Ok(())
    }

    /// Reset the connection unconditionally and tear the TCB down.
    pub fn abort(&mut self, cx: &mut Context) {
        let _ = self.send_reset(cx, self.snd_nxt);
        self.delete_control_block();
        if self.state != State::Closed {
            self.reset_flag = true;
        }
        self.state = State::Closed;
        self.update_events();
    }

    // ------------------------------------------------------------------
    // demultiplexing
    // ------------------------------------------------------------------

    /// Whether this socket owns the given connected four-tuple.
    pub fn matches_exact(
        &self,
        local_addr: &IpAddress,
        local_port: u16,
        remote_addr: &IpAddress,
        remote_port: u16,
    ) -> bool {
        !matches!(self.state, State::Closed | State::Listen)
            && self.local_endpoint.port == local_port
            && self.local_endpoint.addr == *local_addr
            && self.remote_endpoint.port == remote_port
            && self.remote_endpoint.addr == *remote_addr
    }

    /// Whether this socket listens on the given local coordinates.
    pub fn matches_listen(&self, local_addr: &IpAddress, local_port: u16) -> bool {
        self.state == State::Listen
            && self.listen_endpoint.port == local_port
            && self
                .listen_endpoint
                .addr
                .map_or(true, |addr| addr == *local_addr)
    }

    /// Take the oldest pending connection off the SYN queue.
    pub fn pop_syn_queue(&mut self) -> Option<SynQueueItem> {
        let item = self.syn_queue.pop_front();
        self.update_events();
        item
    }

    pub fn syn_queue_len(&self) -> usize {
        self.syn_queue.len()
    }

    pub fn listen_port(&self) -> u16 {
        self.listen_endpoint.port
    }

    // ------------------------------------------------------------------
    // segment processing
    // ------------------------------------------------------------------

    /// Process one inbound segment already demultiplexed to this socket.
    pub fn process(
        &mut self,
        cx: &mut Context,
        iface: Option<usize>,
        local_addr: &IpAddress,
        remote_addr: &IpAddress,
        repr: &TcpRepr,
        payload: &[u8],
    ) {
        match self.state {
            State::Closed => (),
            State::Listen => self.state_listen(cx, iface, local_addr, remote_addr, repr),
            State::SynSent => self.state_syn_sent(cx, repr),
            _ => self.state_common(cx, repr, payload),
        }
        self.update_events();
    }

    fn state_listen(
        &mut self,
        cx: &mut Context,
        iface: Option<usize>,
        local_addr: &IpAddress,
        remote_addr: &IpAddress,
        repr: &TcpRepr,
    ) {
        if repr.flags.contains(Flags::RST) {
            return;
        }
        if repr.flags.contains(Flags::ACK) {
            // nothing should be ACKed on a listener
            self.emit_reject(cx, local_addr, remote_addr, repr, 0);
            return;
        }
        if !repr.flags.contains(Flags::SYN) {
            return;
        }

        // duplicate SYNs refresh nothing; the first one won
        let duplicate = self.syn_queue.iter().any(|item| {
            item.remote_addr == *remote_addr
                && item.remote_port == repr.src_port
                && item.local_addr == *local_addr
        });
        if duplicate {
            trace!("tcp: duplicate SYN from {}:{}", remote_addr, repr.src_port);
            return;
        }
        if self.syn_queue.len() >= self.backlog {
            warn!("tcp: SYN queue full, dropping connection request");
            return;
        }

        let peer_mss = repr.max_seg_size.unwrap_or(TCP_DEFAULT_MSS as u16);
        self.syn_queue.push_back(SynQueueItem {
            iface,
            local_addr: *local_addr,
            remote_addr: *remote_addr,
            remote_port: repr.src_port,
            isn: repr.seq_number,
            mss: peer_mss.min(self.rmss),
        });
        debug!(
            "tcp: connection request from {}:{} queued",
            remote_addr, repr.src_port
        );
    }

    fn state_syn_sent(&mut self, cx: &mut Context, repr: &TcpRepr) {
        if repr.flags.contains(Flags::ACK) {
            // the ACK must cover exactly our SYN
            if repr.ack_number <= self.iss || repr.ack_number > self.snd_nxt {
                if !repr.flags.contains(Flags::RST) {
                    let _ =
                        self.send_segment(cx, Flags::RST, repr.ack_number, SeqNumber(0), 0, false);
                }
                return;
            }
        }
        if repr.flags.contains(Flags::RST) {
            if repr.flags.contains(Flags::ACK) {
                self.delete_control_block();
                self.change_state(cx.now, State::Closed);
            }
            return;
        }
        if !repr.flags.contains(Flags::SYN) {
            return;
        }

        self.irs = repr.seq_number;
        self.rcv_nxt = repr.seq_number + 1;
        if let Some(mss) = repr.max_seg_size {
            self.smss = mss.clamp(TCP_MIN_MSS as u16, TCP_MAX_MSS as u16);
        }
        self.sack_permitted = repr.sack_permitted;

        if repr.flags.contains(Flags::ACK) {
            self.snd_una = repr.ack_number;
            self.compute_rto(cx);
            self.update_retransmit_queue(cx);
            self.cwnd = (TCP_INITIAL_WINDOW * self.smss as usize).min(self.tx_buffer.capacity());

            // the very first window advertisement is always taken
            self.snd_wnd = repr.window_len;
            self.max_snd_wnd = repr.window_len;
            self.snd_wl1 = repr.seq_number;
            self.snd_wl2 = repr.ack_number;

            let _ = self.send_segment(cx, Flags::ACK, self.snd_nxt, self.rcv_nxt, 0, false);
            self.change_state(cx.now, State::Established);
            debug!("tcp: {} established", self.remote_endpoint);
        } else {
            // simultaneous open
            let _ =
                self.send_segment(cx, Flags::SYN | Flags::ACK, self.iss, self.rcv_nxt, 0, false);
            self.change_state(cx.now, State::SynReceived);
        }
    }

    fn state_common(&mut self, cx: &mut Context, repr: &TcpRepr, payload: &[u8]) {
        let mut seg_len = payload.len();
        if repr.flags.contains(Flags::SYN) {
            seg_len += 1;
        }
        if repr.flags.contains(Flags::FIN) {
            seg_len += 1;
        }

        if self.check_seq_num(cx, repr, seg_len).is_err() {
            return;
        }

        if repr.flags.contains(Flags::RST) {
            self.delete_control_block();
            self.change_state(cx.now, State::Closed);
            debug!("tcp: {} reset by peer", self.remote_endpoint);
            return;
        }

        if repr.flags.contains(Flags::SYN) {
            // a SYN inside the window is always an error
            self.emit_reject_connected(cx, repr, payload.len());
            return;
        }

        if !repr.flags.contains(Flags::ACK) {
            return;
        }
        if self.check_ack(cx, repr, payload.len()).is_err() {
            return;
        }

        // state-specific consequences of the acknowledgment
        match self.state {
            State::SynReceived => {
                if self.snd_una > self.iss {
                    self.change_state(cx.now, State::Established);
                }
            }
            State::FinWait1 => {
                if self.snd_una == self.snd_nxt {
                    // our FIN is acknowledged
                    self.change_state(cx.now, State::FinWait2);
                }
            }
            State::Closing => {
                if self.snd_una == self.snd_nxt {
                    self.change_state(cx.now, State::TimeWait);
                }
            }
            State::LastAck => {
                if self.snd_una == self.snd_nxt {
                    self.change_state(cx.now, State::Closed);
                }
            }
            _ => (),
        }

        if !payload.is_empty() {
            match self.state {
                State::Established | State::FinWait1 | State::FinWait2 => {
                    self.process_segment_data(cx, repr, payload);
                }
                _ => (),
            }
        }

        if repr.flags.contains(Flags::FIN) {
            self.process_fin(cx, repr, payload.len());
        }
    }

    fn process_fin(&mut self, cx: &mut Context, repr: &TcpRepr, payload_len: usize) {
        // the FIN counts only once all data before it is consumed
        let fin_seq = repr.seq_number + payload_len;
        if self.rcv_nxt != fin_seq {
            return;
        }

        match self.state {
            State::Established | State::FinWait1 | State::FinWait2 => {
                self.rcv_nxt = fin_seq + 1;
                self.fin_received = true;
                let _ = self.send_segment(cx, Flags::ACK, self.snd_nxt, self.rcv_nxt, 0, false);
                match self.state {
                    State::Established => self.change_state(cx.now, State::CloseWait),
                    State::FinWait1 => {
                        if self.snd_una == self.snd_nxt {
                            self.change_state(cx.now, State::TimeWait);
                        } else {
                            self.change_state(cx.now, State::Closing);
                        }
                    }
                    State::FinWait2 => {
                        self.fin_wait_2_timer.stop();
                        self.change_state(cx.now, State::TimeWait);
                    }
                    _ => unreachable!(),
                }
                debug!("tcp: FIN received from {}", self.remote_endpoint);
            }
            State::TimeWait => {
                // a retransmitted FIN restarts the quiet time
                let _ = self.send_segment(cx, Flags::ACK, self.snd_nxt, self.rcv_nxt, 0, false);
                self.time_wait_timer.start(cx.now, TCP_2MSL_TIMER);
            }
            _ => (),
        }
    }

    /// RFC 793 §3.3 acceptability test. On failure an ACK is sent back
    /// (unless the segment carried RST) and the segment is dropped.
    fn check_seq_num(&mut self, cx: &mut Context, repr: &TcpRepr, seg_len: usize) -> Result<()> {
        let seq = repr.seq_number;
        let wnd = self.rcv_wnd as usize;

        let acceptable = if seg_len == 0 && wnd == 0 {
            seq == self.rcv_nxt
        } else if seg_len == 0 {
            seq >= self.rcv_nxt && seq < self.rcv_nxt + wnd
        } else if wnd == 0 {
            false
        } else {
            let first_ok = seq >= self.rcv_nxt && seq < self.rcv_nxt + wnd;
            let last = seq + (seg_len - 1);
            let last_ok = last >= self.rcv_nxt && last < self.rcv_nxt + wnd;
            first_ok || last_ok
        };

        if acceptable {
            Ok(())
        } else {
            if !repr.flags.contains(Flags::RST) {
                let _ = self.send_segment(cx, Flags::ACK, self.snd_nxt, self.rcv_nxt, 0, false);
            }
            trace!("tcp: unacceptable segment seq={}", seq);
            Err(Error::InvalidPacket)
        }
    }

    fn is_duplicate_ack(&self, repr: &TcpRepr, payload_len: usize) -> bool {
        !self.retransmit_queue.is_empty()
            && payload_len == 0
            && !repr.flags.intersects(Flags::SYN | Flags::FIN)
            && repr.ack_number == self.snd_una
            && repr.window_len == self.snd_wnd
    }

    /// Process the acknowledgment field (congestion control included).
    /// `Err` means the segment must be dropped.
    fn check_ack(&mut self, cx: &mut Context, repr: &TcpRepr, payload_len: usize) -> Result<()> {
        if self.keep_alive_enabled {
            self.keep_alive_probe_count = 0;
        }

        if repr.ack_number < self.snd_una {
            // an old duplicate; the rest of the segment is still good
            return Ok(());
        }
        if repr.ack_number > self.snd_nxt {
            // it acknowledges something not yet sent
            let _ = self.send_segment(cx, Flags::ACK, self.snd_nxt, self.rcv_nxt, 0, false);
            return Err(Error::InvalidPacket);
        }

        let duplicate = self.is_duplicate_ack(repr, payload_len);
        self.update_send_window(cx, repr);

        if repr.ack_number > self.snd_una {
            let mut n = repr.ack_number - self.snd_una;
            if self.snd_una == self.iss {
                // our SYN occupies the first unit of the range
                n -= 1;
            }
            self.rtt_acked_bytes += n;

            self.snd_una = repr.ack_number;
            let data_acked = n.min(self.tx_buffer.len());
            self.tx_buffer.dequeue_allocated(data_acked);

            let rtt_complete = self.compute_rto(cx);
            self.update_retransmit_queue(cx);

            match self.congest_state {
                CongestState::Recovery => self.fast_recovery(cx, repr, n),
                CongestState::LossRecovery => {
                    self.dup_ack_count = 0;
                    // the window stays pinned at the loss window until
                    // the recovery point is fully acknowledged
                    self.fast_loss_recovery(cx, repr);
                }
                CongestState::Idle => {
                    self.dup_ack_count = 0;
                    if self.cwnd < self.ssthresh {
                        // slow start opens by at most one SMSS per ACK
                        self.cwnd += n.min(self.smss as usize);
                    } else if rtt_complete {
                        // congestion avoidance opens once per round trip
                        self.cwnd += self.rtt_acked_bytes.min(self.smss as usize);
                    }
                }
            }
            self.cwnd = self.cwnd.min(self.tx_buffer.capacity());
        } else {
            if duplicate {
                self.dup_ack_count = self.dup_ack_count.saturating_add(1);
                trace!("tcp: duplicate ACK #{}", self.dup_ack_count);
            } else {
                self.dup_ack_count = 0;
            }

            match self.congest_state {
                CongestState::Idle => {
                    let mut thresh = TCP_FAST_RETRANSMIT_THRES;
                    let ownd = self.snd_nxt - self.snd_una;

                    // with no new data to clock out, lower the bar
                    // (early retransmit, RFC 5827)
                    if self.snd_user == 0 || self.snd_wnd as usize <= ownd {
                        if ownd <= 3 * self.smss as usize {
                            thresh = 1;
                        } else if ownd <= 4 * self.smss as usize {
                            thresh = 2;
                        }
                    }

                    if self.dup_ack_count >= thresh && repr.ack_number > self.recover + 1 {
                        self.fast_retransmit(cx);
                    }
                }
                CongestState::Recovery => {
                    if duplicate {
                        // one more segment left the network
                        self.cwnd += self.smss as usize;
                    }
                }
                CongestState::LossRecovery => (),
            }
            self.cwnd = self.cwnd.min(self.tx_buffer.capacity());
        }

        self.update_events();
        Ok(())
    }

    /// RFC 1122 §4.2.2.16 send window update.
    fn update_send_window(&mut self, cx: &mut Context, repr: &TcpRepr) {
        if repr.seq_number == self.snd_wl1 && repr.ack_number == self.snd_wl2 {
            // neither number advanced: only ever grow the window
            if repr.window_len > self.snd_wnd {
                self.snd_wnd = repr.window_len;
                self.snd_wl1 = repr.seq_number;
                self.snd_wl2 = repr.ack_number;
                self.max_snd_wnd = self.max_snd_wnd.max(repr.window_len);
            }
        } else if repr.seq_number >= self.snd_wl1 && repr.ack_number >= self.snd_wl2 {
            if repr.window_len == 0 && self.snd_wnd != 0 {
                // the peer closed its window; start probing
                self.wnd_probe_count = 0;
                self.wnd_probe_interval = TCP_DEFAULT_PROBE_INTERVAL;
                self.persist_timer.start(cx.now, self.wnd_probe_interval);
            }
            self.snd_wnd = repr.window_len;
            self.snd_wl1 = repr.seq_number;
            self.snd_wl2 = repr.ack_number;
            self.max_snd_wnd = self.max_snd_wnd.max(repr.window_len);
        }
    }

    /// Van Jacobson RTO computation (RFC 6298). Returns whether the
    /// running measurement completed.
    fn compute_rto(&mut self, cx: &mut Context) -> bool {
        if !self.rtt_busy || self.snd_una <= self.rtt_seq {
            return false;
        }

        let r = cx.now - self.rtt_start;
        if self.srtt == Duration::ZERO && self.rttvar == Duration::ZERO {
            self.srtt = r;
            self.rttvar = r / 2;
        } else {
            let delta = if r > self.srtt {
                r - self.srtt
            } else {
                self.srtt - r
            };
            self.rttvar = (self.rttvar * 3 + delta) / 4;
            self.srtt = (self.srtt * 7 + r) / 8;
        }

        self.rto = (self.srtt + self.rttvar * 4).clamp(TCP_MIN_RTO, TCP_MAX_RTO);
        trace!(
            "tcp: R={} SRTT={} RTTVAR={} RTO={}",
            r,
            self.srtt,
            self.rttvar,
            self.rto
        );
        self.rtt_busy = false;
        true
    }

    /// Drop wholly acknowledged descriptors; each removal restarts the
    /// retransmission timer.
    fn update_retransmit_queue(&mut self, cx: &mut Context) {
        let mut index = 0;
        while index < self.retransmit_queue.len() {
            let item = &self.retransmit_queue[index];
            let end = item.repr.seq_number + item.segment_len();
            if self.snd_una >= end {
                self.retransmit_queue.remove(index);
                self.retransmit_timer.start(cx.now, self.rto);
                self.retransmit_count = 0;
            } else {
                index += 1;
            }
        }
        if self.retransmit_queue.is_empty() {
            self.retransmit_timer.stop();
        }
    }

    fn flush_retransmit_queue(&mut self) {
        self.retransmit_queue.clear();
        self.retransmit_timer.stop();
    }

    /// Resend the head of the retransmission queue, at most one SMSS of
    /// payload in total.
    fn retransmit_segment(&mut self, cx: &mut Context) -> Result<()> {
        let mut total = 0;
        let mut resend = Vec::new();
        for item in &self.retransmit_queue {
            total += item.length;
            if total > self.smss as usize {
                break;
            }
            resend.push(item.clone());
        }

        for item in resend {
            let mut repr = item.repr;
            let mut length = item.length;
            // a partial ACK may have consumed the front of the segment;
            // only the tail is still in the ring
            if repr.seq_number < self.snd_una {
                let skip = (self.snd_una - repr.seq_number).min(length);
                repr.seq_number = repr.seq_number + skip;
                length -= skip;
            }

            let mut payload = vec![0; length];
            if length > 0 {
                let offset = repr.seq_number - self.snd_una;
                let read = self.tx_buffer.read_allocated(offset, &mut payload);
                debug_assert_eq!(read, length);
            }
            cx.counters.retrans_segs += 1;
            self.out_queue.push(Segment {
                local: self.local_endpoint,
                remote: self.remote_endpoint,
                repr,
                payload,
            });
        }
        Ok(())
    }

    /// RFC 6582 fast retransmit entry.
    fn fast_retransmit(&mut self, cx: &mut Context) {
        let flight_size = self.snd_nxt - self.snd_una;
        self.ssthresh = (flight_size / 2).max(2 * self.smss as usize);
        self.recover = self.snd_nxt - 1;

        debug!("tcp: fast retransmit");
        let _ = self.retransmit_segment(cx);

        // three segments are known to have left the network
        self.cwnd = self.ssthresh + TCP_FAST_RETRANSMIT_THRES as usize * self.smss as usize;
        self.congest_state = CongestState::Recovery;
    }

    /// Fast recovery: partial ACKs keep the retransmission flowing;
    /// a full ACK deflates to ssthresh.
    fn fast_recovery(&mut self, cx: &mut Context, repr: &TcpRepr, n: usize) {
        if repr.ack_number > self.recover {
            self.cwnd = self.ssthresh;
            self.congest_state = CongestState::Idle;
        } else {
            let _ = self.retransmit_segment(cx);
            if self.cwnd > n {
                self.cwnd -= n;
            }
            if n >= self.smss as usize {
                self.cwnd += self.smss as usize;
            }
            self.congest_state = CongestState::Recovery;
        }
    }

    /// Loss recovery after a retransmission timeout; no window
    /// inflation games, just keep retransmitting on partial ACKs.
    fn fast_loss_recovery(&mut self, cx: &mut Context, repr: &TcpRepr) {
        if repr.ack_number > self.recover {
            self.congest_state = CongestState::Idle;
        } else {
            let _ = self.retransmit_segment(cx);
            self.congest_state = CongestState::LossRecovery;
        }
    }

    /// Write accepted segment text into the receive ring and advance or
    /// record it, acknowledging either way.
    fn process_segment_data(&mut self, cx: &mut Context, repr: &TcpRepr, payload: &[u8]) {
        let mut left = repr.seq_number;
        let mut right = repr.seq_number + payload.len();
        let mut offset = 0;

        // trim whatever falls outside the receive window
        if left < self.rcv_nxt {
            offset = self.rcv_nxt - left;
            left = self.rcv_nxt;
        }
        let wnd_edge = self.rcv_nxt + self.rcv_wnd as usize;
        if right > wnd_edge {
            right = wnd_edge;
        }
        if right < left {
            return;
        }

        let length = right - left;
        if length > 0 {
            // ring position 0 of the unallocated region is rcv_nxt
            let ring_offset = left - self.rcv_nxt;
            let written = self
                .rx_buffer
                .write_unallocated(ring_offset, &payload[offset..offset + length]);
            debug_assert_eq!(written, length);
        }

        self.update_sack_blocks(&mut left, &mut right);

        if left > self.rcv_nxt {
            // out of order: acknowledge immediately to trigger the
            // peer's loss recovery
            let _ = self.send_segment(cx, Flags::ACK, self.snd_nxt, self.rcv_nxt, 0, false);
        } else {
            // in order, possibly joining previously received blocks
            let contiguous = right - self.rcv_nxt;
            self.rx_buffer.enqueue_unallocated(contiguous);
            self.rcv_nxt += contiguous;
            self.rcv_user += contiguous;
            self.rcv_wnd -= contiguous as u16;

            // no delayed ACKs
            let _ = self.send_segment(cx, Flags::ACK, self.snd_nxt, self.rcv_nxt, 0, false);
        }
    }

    /// Fold a freshly received extent into the out-of-order block list.
    /// On return the extent covers everything contiguous with it.
    fn update_sack_blocks(&mut self, left: &mut SeqNumber, right: &mut SeqNumber) {
        let mut index = 0;
        while index < self.sack_blocks.len() {
            let (block_left, block_right) = self.sack_blocks[index];
            if *right >= block_left && *left <= block_right {
                *left = (*left).min(block_left);
                *right = (*right).max(block_right);
                self.sack_blocks.remove(index);
            } else {
                index += 1;
            }
        }

        if *left > self.rcv_nxt {
            if self.sack_blocks.is_full() {
                self.sack_blocks.pop();
            }
            // newest first
            let _ = self.sack_blocks.insert(0, (*left, *right));
        }
    }

    /// Receiver-side SWS avoidance (RFC 1122 §4.2.3.3): advertise
    /// reclaimed space only in increments worth a segment.
    fn update_receive_window(&mut self, cx: &mut Context) -> Result<()> {
        let capacity = self.rx_buffer.capacity();
        let reduction = capacity - self.rcv_user - self.rcv_wnd as usize;
        let threshold = (self.rmss as usize).min(capacity / 2);

        if self.rcv_wnd as usize + reduction >= threshold {
            if (self.rcv_wnd as usize) < threshold {
                // the sender believes the window is shut; reopen loudly
                self.rcv_wnd += reduction as u16;
                debug!("tcp: sending window update");
                self.send_segment(cx, Flags::ACK, self.snd_nxt, self.rcv_nxt, 0, false)?;
            } else {
                self.rcv_wnd += reduction as u16;
            }
        }
        Ok(())
    }

    /// The sender-side gate: emit segments only when one of the Nagle
    /// conditions allows it.
    fn nagle_algo(&mut self, cx: &mut Context) -> Result<()> {
        let wnd = (self.snd_wnd as usize)
            .min(self.tx_buffer.capacity())
            .min(self.cwnd);
        let flight = self.snd_nxt - self.snd_una;
        let mut usable = wnd.saturating_sub(flight);

        while self.snd_user > 0 && usable > 0 {
            let n = usable.min(self.snd_user).min(self.smss as usize);

            let emit = if self.no_delay {
                n > 0
            } else {
                // a full segment, or everything queued fits unsent, or
                // at least half the best window seen
                self.snd_user.min(usable) >= self.smss as usize
                    || (self.snd_nxt == self.snd_una && self.snd_user <= usable)
                    || self.snd_user.min(usable) >= (self.max_snd_wnd as usize) / 2
            };
            if !emit {
                break;
            }

            self.send_segment(cx, Flags::PSH | Flags::ACK, self.snd_nxt, self.rcv_nxt, n, true)?;
            self.snd_nxt += n;
            self.snd_user -= n;
            usable -= n;
        }

        self.update_events();
        Ok(())
    }

    // ------------------------------------------------------------------
    // timers: invoked by the 100 ms periodic driver
    // ------------------------------------------------------------------

    /// Run every connection timer against `cx.now`.
    pub fn tick(&mut self, cx: &mut Context) {
        if self.state == State::Closed {
            return;
        }
        self.check_retransmit_timer(cx);
        self.check_persist_timer(cx);
        self.check_keep_alive_timer(cx);
        self.check_override_timer(cx);
        self.check_fin_wait_2_timer(cx);
        self.check_time_wait_timer(cx);
    }

    fn check_retransmit_timer(&mut self, cx: &mut Context) {
        if self.retransmit_queue.is_empty() || !self.retransmit_timer.expired(cx.now) {
            return;
        }

        // ssthresh falls once per loss event, not per backoff
        if self.retransmit_count == 0 {
            let flight_size = self.snd_nxt - self.snd_una;
            self.ssthresh = (flight_size / 2).max(2 * self.smss as usize);
        }
        self.cwnd = (TCP_LOSS_WINDOW * self.smss as usize).min(self.tx_buffer.capacity());
        self.recover = self.snd_nxt - 1;
        self.congest_state = CongestState::LossRecovery;

        if self.retransmit_count < TCP_MAX_RETRIES {
            debug!(
                "tcp: segment retransmission #{}",
                self.retransmit_count + 1
            );
            let _ = self.retransmit_segment(cx);
            // exponential backoff
            self.rto = (self.rto * 2).min(TCP_MAX_RTO);
            self.retransmit_timer.start(cx.now, self.rto);
            self.retransmit_count += 1;
        } else {
            warn!("tcp: retransmission limit reached, resetting");
            let _ = self.send_reset(cx, self.snd_nxt);
            self.retransmit_timer.stop();
            self.change_state(cx.now, State::Closed);
        }

        // Karn's rule: samples from retransmitted data are worthless
        self.rtt_busy = false;
    }

    fn check_persist_timer(&mut self, cx: &mut Context) {
        if self.snd_wnd != 0
            || self.wnd_probe_interval == Duration::ZERO
            || !self.persist_timer.expired(cx.now)
        {
            return;
        }

        if self.wnd_probe_count < TCP_MAX_RETRIES {
            debug!("tcp: zero window probe #{}", self.wnd_probe_count + 1);
            // probes sit one octet before the expected sequence number,
            // harmless if the window reopened meanwhile
            let _ = self.send_segment(cx, Flags::ACK, self.snd_una - 1, self.rcv_nxt, 0, false);
            self.wnd_probe_interval = (self.wnd_probe_interval * 2).min(TCP_MAX_PROBE_INTERVAL);
            self.persist_timer.start(cx.now, self.wnd_probe_interval);
            self.wnd_probe_count += 1;
        } else {
            let _ = self.send_reset(cx, self.snd_nxt);
            self.change_state(cx.now, State::Closed);
        }
    }

    fn check_keep_alive_timer(&mut self, cx: &mut Context) {
        if self.state != State::Established || !self.keep_alive_enabled {
            return;
        }

        if self.keep_alive_probe_count == 0 {
            if cx.now >= self.keep_alive_timestamp + self.keep_alive_idle {
                let _ =
                    self.send_segment(cx, Flags::ACK, self.snd_una - 1, self.rcv_nxt, 0, false);
                self.keep_alive_probe_count = 1;
                self.keep_alive_timestamp = cx.now;
            }
        } else {
            let spacing = self.keep_alive_interval.min(self.keep_alive_idle);
            if cx.now >= self.keep_alive_timestamp + spacing {
                if self.keep_alive_probe_count < self.keep_alive_max_probes {
                    let _ = self.send_segment(
                        cx,
                        Flags::ACK,
                        self.snd_una - 1,
                        self.rcv_nxt,
                        0,
                        false,
                    );
                    self.keep_alive_probe_count += 1;
                    self.keep_alive_timestamp = cx.now;
                } else {
                    warn!("tcp: dead peer detected");
                    let _ = self.send_reset(cx, self.snd_nxt);
                    self.change_state(cx.now, State::Closed);
                }
            }
        }
    }

    fn check_override_timer(&mut self, cx: &mut Context) {
        if !matches!(self.state, State::Established | State::CloseWait) {
            return;
        }
        if self.snd_user == 0 || !self.override_timer.expired(cx.now) {
            return;
        }

        // SWS gating starved the connection; push data out regardless
        let wnd = (self.snd_wnd as usize)
            .min(self.tx_buffer.capacity())
            .min(self.cwnd);
        let flight = self.snd_nxt - self.snd_una;
        let mut usable = wnd.saturating_sub(flight);

        while self.snd_user > 0 && usable > 0 {
            let n = usable.min(self.snd_user).min(self.smss as usize);
            if self
                .send_segment(cx, Flags::PSH | Flags::ACK, self.snd_nxt, self.rcv_nxt, n, true)
                .is_err()
            {
                break;
            }
            self.snd_nxt += n;
            self.snd_user -= n;
            usable -= n;
        }

        self.update_events();

        if self.snd_user > 0 {
            self.override_timer.start(cx.now, TCP_OVERRIDE_TIMEOUT);
        } else {
            self.override_timer.stop();
        }
    }

    fn check_fin_wait_2_timer(&mut self, cx: &mut Context) {
        if self.state == State::FinWait2 && self.fin_wait_2_timer.expired(cx.now) {
            debug!("tcp: FIN-WAIT-2 timer elapsed");
            self.change_state(cx.now, State::Closed);
        }
    }

    fn check_time_wait_timer(&mut self, cx: &mut Context) {
        if self.state == State::TimeWait && self.time_wait_timer.expired(cx.now) {
            debug!("tcp: 2MSL timer elapsed");
            self.change_state(cx.now, State::Closed);
        }
    }

    // ------------------------------------------------------------------
    // segment construction
    // ------------------------------------------------------------------

    /// Build and queue one segment for the stack to transmit.
    ///
    /// `seq`/`ack` name absolute sequence numbers; `length` bytes of
    /// payload are read out of the transmit ring at `seq`.
    fn send_segment(
        &mut self,
        cx: &mut Context,
        flags: Flags,
        seq: SeqNumber,
        ack: SeqNumber,
        length: usize,
        add_to_queue: bool,
    ) -> Result<()> {
        let mut repr = TcpRepr {
            src_port: self.local_endpoint.port,
            dst_port: self.remote_endpoint.port,
            flags,
            seq_number: seq,
            ack_number: if flags.contains(Flags::ACK) {
                ack
            } else {
                SeqNumber(0)
            },
            window_len: self.rcv_wnd,
            ..TcpRepr::default()
        };
        if flags.contains(Flags::SYN) {
            repr.max_seg_size = Some(self.rmss);
            repr.sack_permitted = true;
        }

        let mut payload = vec![0; length];
        if length > 0 {
            let offset = seq - self.snd_una;
            let read = self.tx_buffer.read_allocated(offset, &mut payload);
            debug_assert_eq!(read, length, "transmit ring out of sync");
        }

        if add_to_queue {
            self.retransmit_queue.push_back(TxQueueItem {
                repr,
                length,
                sacked: false,
            });

            // one RTT measurement at a time
            if !self.rtt_busy {
                self.rtt_start = cx.now;
                self.rtt_seq = seq;
                self.rtt_busy = true;
                self.rtt_acked_bytes = 0;
            }

            if !self.retransmit_timer.running() {
                self.retransmit_timer.start(cx.now, self.rto);
                self.retransmit_count = 0;
            }
        }

        if self.keep_alive_enabled
            && self.keep_alive_probe_count == 0
            && (flags.contains(Flags::SYN) || length > 0)
        {
            self.keep_alive_timestamp = cx.now;
        }

        cx.counters.out_segs += 1;
        if flags.contains(Flags::RST) {
            cx.counters.out_rsts += 1;
        }

        trace!(
            "tcp: sending segment seq={} ack={} len={} [{}]",
            seq,
            repr.ack_number,
            length,
            flags
        );
        self.out_queue.push(Segment {
            local: self.local_endpoint,
            remote: self.remote_endpoint,
            repr,
            payload,
        });
        Ok(())
    }

    /// Send a reset, but only from states where the connection still
    /// legitimately speaks.
    fn send_reset(&mut self, cx: &mut Context, seq: SeqNumber) -> Result<()> {
        match self.state {
            State::SynReceived
            | State::Established
            | State::FinWait1
            | State::FinWait2
            | State::CloseWait => self.send_segment(cx, Flags::RST, seq, SeqNumber(0), 0, false),
            _ => Ok(()),
        }
    }

    /// Reject a segment aimed at a listener with the RFC 793 reset
    /// rules.
    fn emit_reject(
        &mut self,
        cx: &mut Context,
        local_addr: &IpAddress,
        remote_addr: &IpAddress,
        repr: &TcpRepr,
        payload_len: usize,
    ) {
        let Some(reject) = reject_repr(repr, payload_len) else {
            return;
        };
        cx.counters.out_segs += 1;
        cx.counters.out_rsts += 1;
        self.out_queue.push(Segment {
            local: IpEndpoint::new(*local_addr, repr.dst_port),
            remote: IpEndpoint::new(*remote_addr, repr.src_port),
            repr: reject,
            payload: Vec::new(),
        });
    }

    /// Reject an in-window SYN on a synchronized connection.
    fn emit_reject_connected(&mut self, cx: &mut Context, repr: &TcpRepr, payload_len: usize) {
        let Some(reject) = reject_repr(repr, payload_len) else {
            return;
        };
        cx.counters.out_segs += 1;
        cx.counters.out_rsts += 1;
        self.out_queue.push(Segment {
            local: self.local_endpoint,
            remote: self.remote_endpoint,
            repr: reject,
            payload: Vec::new(),
        });
    }

    // ------------------------------------------------------------------
    // state bookkeeping
    // ------------------------------------------------------------------

    fn change_state(&mut self, now: Instant, new_state: State) {
        if new_state == State::Closed {
            if matches!(self.state, State::LastAck | State::TimeWait) {
                self.closed_flag = true;
            } else {
                self.reset_flag = true;
            }
            self.flush_retransmit_queue();
            self.syn_queue.clear();
            self.persist_timer.stop();
            self.override_timer.stop();
            self.fin_wait_2_timer.stop();
            self.time_wait_timer.stop();
        }

        match new_state {
            State::FinWait2 => self.fin_wait_2_timer.start(now, TCP_FIN_WAIT_2_TIMER),
            State::TimeWait => self.time_wait_timer.start(now, TCP_2MSL_TIMER),
            _ => (),
        }

        trace!("tcp: state {} -> {}", self.state, new_state);
        self.state = new_state;
        self.update_events();
    }

    fn delete_control_block(&mut self) {
        self.flush_retransmit_queue();
        self.syn_queue.clear();
        self.persist_timer.stop();
        self.override_timer.stop();
        self.fin_wait_2_timer.stop();
        self.time_wait_timer.stop();
        self.sack_blocks.clear();
        self.snd_user = 0;
        self.tx_buffer.clear();
    }

    /// Recompute the event word from the connection state.
    pub(crate) fn update_events(&mut self) {
        let mut events = Events::empty();

        match self.state {
            State::Established | State::FinWait1 => events |= Events::CONNECTED,
            State::FinWait2 => events |= Events::CONNECTED | Events::TX_SHUTDOWN,
            State::CloseWait | State::LastAck | State::Closing => {
                events |= Events::CONNECTED | Events::RX_SHUTDOWN
            }
            State::TimeWait | State::Closed => {
                events |= Events::CLOSED | Events::TX_SHUTDOWN | Events::RX_SHUTDOWN
            }
            _ => (),
        }

        match self.state {
            State::SynSent | State::SynReceived => {
                // writes are disallowed until establishment completes
                events |= Events::TX_DONE | Events::TX_ACKED;
            }
            State::Established | State::CloseWait => {
                let inflight = self.snd_nxt - self.snd_una;
                if self.snd_user + inflight < self.tx_buffer.capacity() {
                    events |= Events::TX_READY;
                }
                if self.snd_user == 0 {
                    events |= Events::TX_DONE;
                    if self.snd_una >= self.snd_nxt {
                        events |= Events::TX_ACKED;
                    }
                }
            }
            State::Listen => (),
            _ => {
                // unblock writers while the connection winds down
                events |= Events::TX_READY | Events::TX_DONE | Events::TX_ACKED;
            }
        }

        match self.state {
            State::Established | State::FinWait1 | State::FinWait2 => {
                if self.rcv_user > 0 {
                    events |= Events::RX_READY;
                }
            }
            State::Listen => {
                if !self.syn_queue.is_empty() {
                    events |= Events::ACCEPT | Events::RX_READY;
                }
            }
            State::SynSent | State::SynReceived => (),
            _ => {
                // readability also reports the peer's close
                events |= Events::RX_READY;
            }
        }

        self.events = events;
    }
}

/// Build the RFC 793 reset for a segment that reached no connection (or
/// an in-window SYN). Returns `None` when the offender itself carried
/// RST — resets are never answered with resets.
pub fn reject_repr(repr: &TcpRepr, payload_len: usize) -> Option<TcpRepr> {
    if repr.flags.contains(Flags::RST) {
        return None;
    }

    let mut reject = TcpRepr {
        src_port: repr.dst_port,
        dst_port: repr.src_port,
        window_len: 0,
        ..TcpRepr::default()
    };
    if repr.flags.contains(Flags::ACK) {
        // the reset borrows its sequence number from the ACK field
        reject.flags = Flags::RST;
        reject.seq_number = repr.ack_number;
    } else {
        reject.flags = Flags::RST | Flags::ACK;
        reject.seq_number = SeqNumber(0);
        let mut ack = repr.seq_number + payload_len;
        if repr.flags.contains(Flags::SYN) {
            ack = ack + 1;
        }
        if repr.flags.contains(Flags::FIN) {
            ack = ack + 1;
        }
        reject.ack_number = ack;
    }
    Some(reject)
}

/// Initial sequence number generation.
///
/// The default draws from the stack PRNG. The keyed variant follows the
/// RFC 6528 shape — a per-connection offset derived from the 4-tuple
/// and a secret, plus the monotonic clock — using the standard library's
/// keyed hasher, since this target carries no MD5 implementation.
pub fn generate_isn(
    rand: &mut Rand,
    secret: Option<u64>,
    local: IpEndpoint,
    remote: IpEndpoint,
    now: Instant,
) -> SeqNumber {
    match secret {
        None => SeqNumber(rand.rand_u32() as i32),
        Some(secret) => {
            use core::hash::{Hash, Hasher};
            let mut hasher = std::collections::hash_map::DefaultHasher::new();
            secret.hash(&mut hasher);
            local.addr.as_bytes().hash(&mut hasher);
            local.port.hash(&mut hasher);
            remote.addr.as_bytes().hash(&mut hasher);
            remote.port.hash(&mut hasher);
            let offset = hasher.finish() as u32;
            // the clock term advances the space monotonically
            let clock = (now.total_millis() as u32).wrapping_mul(250);
            SeqNumber::from_wire(offset.wrapping_add(clock))
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::wire::Ipv4Address;

    const LOCAL: IpEndpoint = IpEndpoint {
        addr: IpAddress::Ipv4(Ipv4Address([10, 0, 0, 2])),
        port: 49152,
    };
    const REMOTE: IpEndpoint = IpEndpoint {
        addr: IpAddress::Ipv4(Ipv4Address([10, 0, 0, 1])),
        port: 80,
    };

    struct TestEnv {
        rand: Rand,
        counters: Counters,
        now: Instant,
    }

    impl TestEnv {
        fn new() -> TestEnv {
            TestEnv {
                rand: Rand::new(0x1234),
                counters: Counters::default(),
                now: Instant::ZERO,
            }
        }

        fn cx(&mut self) -> Context<'_> {
            Context {
                now: self.now,
                rand: &mut self.rand,
                counters: &mut self.counters,
            }
        }

        fn advance(&mut self, millis: u64) {
            self.now += Duration::from_millis(millis);
        }
    }

    fn socket() -> Socket<'static> {
        Socket::new(vec![0; 2860], vec![0; 2860])
    }

    fn ack_repr(socket: &Socket, extra: impl FnOnce(&mut TcpRepr)) -> TcpRepr {
        let mut repr = TcpRepr {
            src_port: REMOTE.port,
            dst_port: LOCAL.port,
            flags: Flags::ACK,
            seq_number: socket.rcv_nxt,
            ack_number: socket.snd_nxt,
            window_len: 2860,
            ..TcpRepr::default()
        };
        extra(&mut repr);
        repr
    }

    /// Drive a socket through the client side of the handshake with a
    /// peer whose ISN is 0x4000 and whose MSS option is `mss`.
    fn establish(env: &mut TestEnv, mss: u16) -> Socket<'static> {
        let mut socket = socket();
        socket
            .connect(
                &mut env.cx(),
                None,
                LOCAL,
                REMOTE,
                SeqNumber(0x1000),
            )
            .unwrap();

        let syn = socket.take_segments();
        assert_eq!(syn.len(), 1);
        assert_eq!(syn[0].repr.flags, Flags::SYN);
        assert_eq!(syn[0].repr.seq_number, SeqNumber(0x1000));
        assert_eq!(syn[0].repr.max_seg_size, Some(1430));
        assert!(syn[0].repr.sack_permitted);
        assert_eq!(socket.state(), State::SynSent);

        let syn_ack = TcpRepr {
            src_port: REMOTE.port,
            dst_port: LOCAL.port,
            flags: Flags::SYN | Flags::ACK,
            seq_number: SeqNumber(0x4000),
            ack_number: SeqNumber(0x1001),
            window_len: 2860,
            max_seg_size: Some(mss),
            sack_permitted: true,
            ..TcpRepr::default()
        };
        socket.process(&mut env.cx(), None, &LOCAL.addr, &REMOTE.addr, &syn_ack, &[]);

        assert_eq!(socket.state(), State::Established);
        let out = socket.take_segments();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].repr.flags, Flags::ACK);
        assert_eq!(out[0].repr.seq_number, SeqNumber(0x1001));
        assert_eq!(out[0].repr.ack_number, SeqNumber(0x4001));
        socket
    }

    #[test]
    fn three_way_handshake_and_first_write() {
        let mut env = TestEnv::new();
        let mut socket = establish(&mut env, 1460);
        // the peer's MSS is clamped to the configured maximum
        assert_eq!(socket.smss, 1430);
        assert!(socket.events().contains(Events::CONNECTED | Events::TX_READY));

        // an empty pipe lets the first small write through immediately
        let sent = socket.send(&mut env.cx(), &[0x55; 40]).unwrap();
        assert_eq!(sent, 40);
        let out = socket.take_segments();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].payload.len(), 40);
        assert_eq!(out[0].repr.flags, Flags::PSH | Flags::ACK);
        assert_eq!(out[0].repr.seq_number, SeqNumber(0x1001));
        assert_eq!(socket.snd_nxt, SeqNumber(0x1001) + 40);
        assert_eq!(socket.snd_user, 0);
    }

    #[test]
    fn nagle_holds_second_small_write() {
        let mut env = TestEnv::new();
        let mut socket = establish(&mut env, 1460);

        socket.send(&mut env.cx(), &[1; 10]).unwrap();
        assert_eq!(socket.take_segments().len(), 1);

        // unacknowledged data in flight: a tiny write must wait
        socket.send(&mut env.cx(), &[2; 10]).unwrap();
        assert!(socket.take_segments().is_empty());
        assert_eq!(socket.snd_user, 10);

        // the override timer eventually flushes it
        env.advance(600);
        socket.tick(&mut env.cx());
        let out = socket.take_segments();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].payload, vec![2; 10]);
        assert_eq!(socket.snd_user, 0);
    }

    #[test]
    fn no_delay_skips_nagle() {
        let mut env = TestEnv::new();
        let mut socket = establish(&mut env, 1460);
        socket.set_no_delay(true);

        socket.send(&mut env.cx(), &[1; 10]).unwrap();
        socket.take_segments();
        socket.send(&mut env.cx(), &[2; 10]).unwrap();
        assert_eq!(socket.take_segments().len(), 1);
    }

    #[test]
    fn receive_in_order_data() {
        let mut env = TestEnv::new();
        let mut socket = establish(&mut env, 1460);

        let data = b"hello stack";
        let repr = ack_repr(&socket, |_| ());
        socket.process(&mut env.cx(), None, &LOCAL.addr, &REMOTE.addr, &repr, data);

        // a cumulative ACK went straight out
        let out = socket.take_segments();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].repr.ack_number, SeqNumber(0x4001) + data.len());

        assert!(socket.events().contains(Events::RX_READY));
        let mut buffer = [0u8; 64];
        let read = socket.receive(&mut env.cx(), &mut buffer).unwrap();
        assert_eq!(&buffer[..read], data);
        // nothing more to read
        assert_eq!(socket.receive(&mut env.cx(), &mut buffer), Ok(0));
    }

    #[test]
    fn out_of_order_is_sacked_then_merged() {
        let mut env = TestEnv::new();
        let mut socket = establish(&mut env, 1460);
        let base = socket.rcv_nxt;

        // segment at rcv_nxt+100 goes into the block list
        let repr = ack_repr(&socket, |repr| repr.seq_number = base + 100);
        socket.process(&mut env.cx(), None, &LOCAL.addr, &REMOTE.addr, &repr, &[1; 50]);
        assert_eq!(socket.sack_blocks.len(), 1);
        assert_eq!(socket.sack_blocks[0], (base + 100, base + 150));
        assert_eq!(socket.rcv_nxt, base);
        // out-of-order data forces an immediate duplicate ACK
        let out = socket.take_segments();
        assert_eq!(out[0].repr.ack_number, base);

        // the gap fill merges the block and advances over both
        let repr = ack_repr(&socket, |_| ());
        socket.process(&mut env.cx(), None, &LOCAL.addr, &REMOTE.addr, &repr, &[2; 100]);
        assert_eq!(socket.sack_blocks.len(), 0);
        assert_eq!(socket.rcv_nxt, base + 150);
        assert_eq!(socket.rx_available(), 150);
        let out = socket.take_segments();
        assert_eq!(out[0].repr.ack_number, base + 150);
    }

    #[test]
    fn unacceptable_segment_answered_with_ack() {
        let mut env = TestEnv::new();
        let mut socket = establish(&mut env, 1460);
        let rcv_nxt = socket.rcv_nxt;

        // far outside the window
        let repr = ack_repr(&socket, |repr| repr.seq_number = rcv_nxt + 60000);
        socket.process(&mut env.cx(), None, &LOCAL.addr, &REMOTE.addr, &repr, &[0; 8]);

        let out = socket.take_segments();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].repr.flags, Flags::ACK);
        assert_eq!(out[0].repr.ack_number, rcv_nxt);
        // no state moved
        assert_eq!(socket.rcv_nxt, rcv_nxt);
    }

    #[test]
    fn syn_in_window_gets_reset() {
        let mut env = TestEnv::new();
        let mut socket = establish(&mut env, 1460);

        let repr = ack_repr(&socket, |repr| {
            repr.flags = Flags::SYN | Flags::ACK;
        });
        socket.process(&mut env.cx(), None, &LOCAL.addr, &REMOTE.addr, &repr, &[]);

        let out = socket.take_segments();
        assert_eq!(out.len(), 1);
        assert!(out[0].repr.flags.contains(Flags::RST));
        assert_eq!(env.counters.out_rsts, 1);
    }

    #[test]
    fn fast_retransmit_after_three_dup_acks() {
        let mut env = TestEnv::new();
        // tiny MSS so several segments fit in flight
        let mut socket = establish(&mut env, 100);
        assert_eq!(socket.smss, 100);

        // a first exchange moves the cumulative ACK point past
        // recover + 1, arming fast retransmit for later loss events
        socket.send(&mut env.cx(), &[6; 100]).unwrap();
        socket.take_segments();
        let repr = ack_repr(&socket, |_| ());
        socket.process(&mut env.cx(), None, &LOCAL.addr, &REMOTE.addr, &repr, &[]);
        socket.take_segments();

        // 3 full segments go out; 50 octets stay queued so the
        // duplicate ACK threshold is not lowered
        socket.send(&mut env.cx(), &[7; 350]).unwrap();
        let out = socket.take_segments();
        assert_eq!(out.len(), 3);
        assert_eq!(socket.snd_user, 50);
        let first_seq = out[0].repr.seq_number;

        // two duplicate ACKs are not enough
        for _ in 0..2 {
            let repr = ack_repr(&socket, |repr| repr.ack_number = first_seq);
            socket.process(&mut env.cx(), None, &LOCAL.addr, &REMOTE.addr, &repr, &[]);
        }
        assert_eq!(socket.congest_state, CongestState::Idle);
        assert_eq!(env.counters.retrans_segs, 0);

        // the third one triggers the retransmission
        let repr = ack_repr(&socket, |repr| repr.ack_number = first_seq);
        socket.process(&mut env.cx(), None, &LOCAL.addr, &REMOTE.addr, &repr, &[]);

        assert_eq!(socket.congest_state, CongestState::Recovery);
        assert_eq!(env.counters.retrans_segs, 1);
        let out = socket.take_segments();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].repr.seq_number, first_seq);
        assert_eq!(out[0].payload, vec![7; 100]);
        // cwnd = ssthresh + 3 segments
        assert_eq!(socket.cwnd, socket.ssthresh + 300);

        // a full acknowledgment deflates and leaves recovery
        let repr = ack_repr(&socket, |_| ());
        socket.process(&mut env.cx(), None, &LOCAL.addr, &REMOTE.addr, &repr, &[]);
        assert_eq!(socket.congest_state, CongestState::Idle);
        assert_eq!(socket.cwnd, socket.ssthresh);
    }

    #[test]
    fn zero_window_starts_persist_probing() {
        let mut env = TestEnv::new();
        let mut socket = establish(&mut env, 1460);

        socket.send(&mut env.cx(), &[9; 100]).unwrap();
        socket.take_segments();

        // the peer acknowledges everything and shuts its window
        let repr = ack_repr(&socket, |repr| repr.window_len = 0);
        socket.process(&mut env.cx(), None, &LOCAL.addr, &REMOTE.addr, &repr, &[]);
        assert_eq!(socket.snd_wnd, 0);
        assert!(socket.persist_timer.running());
        socket.take_segments();

        // queued data cannot leave
        socket.send(&mut env.cx(), &[9; 50]).unwrap();
        assert!(socket.take_segments().is_empty());

        // first probe after the default interval, one octet early
        env.advance(1100);
        socket.tick(&mut env.cx());
        let out = socket.take_segments();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].repr.seq_number, socket.snd_una - 1);
        assert!(out[0].payload.is_empty());
        // the interval backs off exponentially
        assert_eq!(socket.wnd_probe_interval, Duration::from_millis(2000));

        // reopening the window releases the data
        let repr = ack_repr(&socket, |repr| {
            repr.seq_number = socket.rcv_nxt + 1; // advance wl1 so the update is taken
        });
        socket.process(&mut env.cx(), None, &LOCAL.addr, &REMOTE.addr, &repr, &[]);
        assert_eq!(socket.snd_wnd, 2860);
    }

    #[test]
    fn retransmission_exhaustion_resets_connection() {
        let mut env = TestEnv::new();
        let mut socket = establish(&mut env, 1460);

        socket.send(&mut env.cx(), &[3; 200]).unwrap();
        socket.take_segments();

        // let the retransmission timer fire MAX_RETRIES times
        for attempt in 0..TCP_MAX_RETRIES {
            env.advance(61_000);
            socket.tick(&mut env.cx());
            let out = socket.take_segments();
            assert_eq!(out.len(), 1, "retransmission #{}", attempt + 1);
            assert_eq!(out[0].payload, vec![3; 200]);
            assert_eq!(socket.state(), State::Established);
        }
        assert_eq!(env.counters.retrans_segs, TCP_MAX_RETRIES as u64);

        // the next expiry gives up
        env.advance(61_000);
        socket.tick(&mut env.cx());
        let out = socket.take_segments();
        assert_eq!(out.len(), 1);
        assert!(out[0].repr.flags.contains(Flags::RST));
        assert_eq!(socket.state(), State::Closed);
        assert!(socket.reset_received());
        assert!(socket.events().contains(Events::CLOSED));
    }

    #[test]
    fn retransmission_timeout_enters_loss_recovery() {
        let mut env = TestEnv::new();
        let mut socket = establish(&mut env, 100);

        socket.send(&mut env.cx(), &[4; 400]).unwrap();
        socket.take_segments();

        env.advance(1500);
        socket.tick(&mut env.cx());
        assert_eq!(socket.congest_state, CongestState::LossRecovery);
        // loss window is one segment
        assert_eq!(socket.cwnd, 100);
        // only the head of the queue is retransmitted
        let out = socket.take_segments();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].payload.len(), 100);
    }

    #[test]
    fn loss_recovery_partial_ack_holds_cwnd() {
        let mut env = TestEnv::new();
        let mut socket = establish(&mut env, 100);

        // 3 segments in flight, 100 octets still queued
        socket.send(&mut env.cx(), &[4; 400]).unwrap();
        let out = socket.take_segments();
        assert_eq!(out.len(), 3);
        let first_seq = out[0].repr.seq_number;

        env.advance(1500);
        socket.tick(&mut env.cx());
        assert_eq!(socket.congest_state, CongestState::LossRecovery);
        assert_eq!(socket.cwnd, 100);
        assert_eq!(env.counters.retrans_segs, 1);
        socket.take_segments();

        // a partial ACK keeps the retransmission flowing but must not
        // reopen the window while the loss is being repaired
        let repr = ack_repr(&socket, |repr| repr.ack_number = first_seq + 100);
        socket.process(&mut env.cx(), None, &LOCAL.addr, &REMOTE.addr, &repr, &[]);
        assert_eq!(socket.congest_state, CongestState::LossRecovery);
        assert_eq!(socket.cwnd, 100);
        assert_eq!(env.counters.retrans_segs, 2);
        let out = socket.take_segments();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].repr.seq_number, first_seq + 100);
        assert_eq!(out[0].payload, vec![4; 100]);

        // the full acknowledgment leaves recovery without inflating
        let repr = ack_repr(&socket, |_| ());
        socket.process(&mut env.cx(), None, &LOCAL.addr, &REMOTE.addr, &repr, &[]);
        assert_eq!(socket.congest_state, CongestState::Idle);
        assert_eq!(socket.cwnd, 100);

        // growth resumes only once recovery is over
        socket.send(&mut env.cx(), &[5; 100]).unwrap();
        socket.take_segments();
        let repr = ack_repr(&socket, |_| ());
        socket.process(&mut env.cx(), None, &LOCAL.addr, &REMOTE.addr, &repr, &[]);
        assert_eq!(socket.congest_state, CongestState::Idle);
        assert_eq!(socket.cwnd, 200);
    }

    #[test]
    fn graceful_close_sequence() {
        let mut env = TestEnv::new();
        let mut socket = establish(&mut env, 1460);

        socket.shutdown_send(&mut env.cx()).unwrap();
        assert_eq!(socket.state(), State::FinWait1);
        let out = socket.take_segments();
        assert!(out[0].repr.flags.contains(Flags::FIN));

        // the peer acknowledges our FIN
        let repr = ack_repr(&socket, |_| ());
        socket.process(&mut env.cx(), None, &LOCAL.addr, &REMOTE.addr, &repr, &[]);
        assert_eq!(socket.state(), State::FinWait2);
        assert!(socket.events().contains(Events::TX_SHUTDOWN));

        // then closes its side
        let repr = ack_repr(&socket, |repr| repr.flags = Flags::FIN | Flags::ACK);
        socket.process(&mut env.cx(), None, &LOCAL.addr, &REMOTE.addr, &repr, &[]);
        assert_eq!(socket.state(), State::TimeWait);
        let out = socket.take_segments();
        assert_eq!(out.last().unwrap().repr.flags, Flags::ACK);

        // quiet time runs out
        env.advance(4100);
        socket.tick(&mut env.cx());
        assert_eq!(socket.state(), State::Closed);
        assert!(socket.closed_gracefully());
        assert!(!socket.reset_received());
    }

    #[test]
    fn passive_close_sequence() {
        let mut env = TestEnv::new();
        let mut socket = establish(&mut env, 1460);

        // peer sends FIN first
        let repr = ack_repr(&socket, |repr| repr.flags = Flags::FIN | Flags::ACK);
        socket.process(&mut env.cx(), None, &LOCAL.addr, &REMOTE.addr, &repr, &[]);
        assert_eq!(socket.state(), State::CloseWait);
        assert!(socket.events().contains(Events::RX_SHUTDOWN));
        socket.take_segments();

        // reading now reports end of stream
        let mut buffer = [0u8; 8];
        assert_eq!(
            socket.receive(&mut env.cx(), &mut buffer),
            Err(Error::EndOfStream)
        );

        socket.shutdown_send(&mut env.cx()).unwrap();
        assert_eq!(socket.state(), State::LastAck);
        socket.take_segments();

        let repr = ack_repr(&socket, |_| ());
        socket.process(&mut env.cx(), None, &LOCAL.addr, &REMOTE.addr, &repr, &[]);
        assert_eq!(socket.state(), State::Closed);
        assert!(socket.closed_gracefully());
    }

    #[test]
    fn fin_wait_2_timer_forces_closed() {
        let mut env = TestEnv::new();
        let mut socket = establish(&mut env, 1460);

        socket.shutdown_send(&mut env.cx()).unwrap();
        let repr = ack_repr(&socket, |_| ());
        socket.process(&mut env.cx(), None, &LOCAL.addr, &REMOTE.addr, &repr, &[]);
        assert_eq!(socket.state(), State::FinWait2);

        env.advance(4100);
        socket.tick(&mut env.cx());
        assert_eq!(socket.state(), State::Closed);
    }

    #[test]
    fn listener_queues_and_rejects() {
        let mut env = TestEnv::new();
        let mut socket = socket();
        socket.listen(80, 2).unwrap();
        assert_eq!(socket.state(), State::Listen);

        let syn = TcpRepr {
            src_port: 49152,
            dst_port: 80,
            flags: Flags::SYN,
            seq_number: SeqNumber(0x7000),
            max_seg_size: Some(1200),
            ..TcpRepr::default()
        };
        socket.process(&mut env.cx(), Some(0), &LOCAL.addr, &REMOTE.addr, &syn, &[]);
        assert_eq!(socket.syn_queue_len(), 1);
        assert!(socket.events().contains(Events::ACCEPT));

        // a duplicate does not take a second slot
        socket.process(&mut env.cx(), Some(0), &LOCAL.addr, &REMOTE.addr, &syn, &[]);
        assert_eq!(socket.syn_queue_len(), 1);

        // a stray ACK is answered with a reset
        let stray = TcpRepr {
            src_port: 1000,
            dst_port: 80,
            flags: Flags::ACK,
            seq_number: SeqNumber(1),
            ack_number: SeqNumber(2),
            ..TcpRepr::default()
        };
        socket.process(&mut env.cx(), Some(0), &LOCAL.addr, &REMOTE.addr, &stray, &[]);
        let out = socket.take_segments();
        assert_eq!(out.len(), 1);
        assert!(out[0].repr.flags.contains(Flags::RST));
        assert_eq!(out[0].repr.seq_number, SeqNumber(2));

        // the queued entry carries the negotiated MSS
        let item = socket.pop_syn_queue().unwrap();
        assert_eq!(item.isn, SeqNumber(0x7000));
        assert_eq!(item.mss, 1200);
        assert_eq!(item.remote_port, 49152);
    }

    #[test]
    fn passive_open_completes_handshake() {
        let mut env = TestEnv::new();
        let item = SynQueueItem {
            iface: Some(0),
            local_addr: LOCAL.addr,
            remote_addr: REMOTE.addr,
            remote_port: 49152,
            isn: SeqNumber(0x7000),
            mss: 1200,
        };

        let mut child = socket();
        child
            .open_passive(&mut env.cx(), &item, 80, SeqNumber(0x9000))
            .unwrap();
        assert_eq!(child.state(), State::SynReceived);
        assert_eq!(env.counters.passive_opens, 1);

        let out = child.take_segments();
        assert_eq!(out[0].repr.flags, Flags::SYN | Flags::ACK);
        assert_eq!(out[0].repr.ack_number, SeqNumber(0x7001));

        // the final ACK of the handshake
        let repr = TcpRepr {
            src_port: 49152,
            dst_port: 80,
            flags: Flags::ACK,
            seq_number: SeqNumber(0x7001),
            ack_number: SeqNumber(0x9001),
            window_len: 1000,
            ..TcpRepr::default()
        };
        child.process(&mut env.cx(), Some(0), &LOCAL.addr, &REMOTE.addr, &repr, &[]);
        assert_eq!(child.state(), State::Established);
    }

    #[test]
    fn keep_alive_probes_then_resets() {
        let mut env = TestEnv::new();
        let mut socket = establish(&mut env, 1460);
        socket.set_keep_alive(true, env.now);
        socket.set_keep_alive_params(Duration::from_secs(10), Duration::from_secs(5), 2);

        // idle long enough for the first probe
        env.advance(10_500);
        socket.tick(&mut env.cx());
        let out = socket.take_segments();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].repr.seq_number, socket.snd_una - 1);
        assert!(out[0].payload.is_empty());

        // second (and last allowed) probe
        env.advance(5_500);
        socket.tick(&mut env.cx());
        assert_eq!(socket.take_segments().len(), 1);

        // no answer: the peer is declared dead
        env.advance(5_500);
        socket.tick(&mut env.cx());
        let out = socket.take_segments();
        assert!(out[0].repr.flags.contains(Flags::RST));
        assert_eq!(socket.state(), State::Closed);
    }

    #[test]
    fn rst_tears_connection_down() {
        let mut env = TestEnv::new();
        let mut socket = establish(&mut env, 1460);

        let repr = ack_repr(&socket, |repr| repr.flags = Flags::RST);
        socket.process(&mut env.cx(), None, &LOCAL.addr, &REMOTE.addr, &repr, &[]);
        assert_eq!(socket.state(), State::Closed);
        assert!(socket.reset_received());
        assert!(socket.events().contains(Events::CLOSED));

        let mut buffer = [0u8; 4];
        assert_eq!(
            socket.receive(&mut env.cx(), &mut buffer),
            Err(Error::ConnectionReset)
        );
    }

    #[test]
    fn sws_receiver_withholds_small_window_updates() {
        let mut env = TestEnv::new();
        let mut socket = establish(&mut env, 1460);

        // fill most of the receive buffer
        let data = vec![0xaa; 2800];
        let repr = ack_repr(&socket, |_| ());
        socket.process(&mut env.cx(), None, &LOCAL.addr, &REMOTE.addr, &repr, &data);
        socket.take_segments();
        assert_eq!(socket.rcv_wnd, 60);

        // a tiny read reclaims less than min(rmss, cap/2): no update
        let mut buffer = vec![0u8; 100];
        socket.receive(&mut env.cx(), &mut buffer).unwrap();
        assert!(socket.take_segments().is_empty());
        assert_eq!(socket.rcv_wnd, 60);

        // reading the bulk crosses the threshold and reopens loudly
        let mut buffer = vec![0u8; 2700];
        socket.receive(&mut env.cx(), &mut buffer).unwrap();
        let out = socket.take_segments();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].repr.flags, Flags::ACK);
        assert_eq!(out[0].repr.window_len, 2860);
        assert_eq!(socket.rcv_wnd, 2860);
    }

    #[test]
    fn invariants_hold_through_transfer() {
        let mut env = TestEnv::new();
        let mut socket = establish(&mut env, 100);

        socket.send(&mut env.cx(), &[1; 350]).unwrap();
        let check = |socket: &Socket| {
            assert!(socket.snd_una <= socket.snd_nxt);
            assert!(socket.rcv_user + (socket.rcv_wnd as usize) <= socket.rx_buffer.capacity());
            for window in socket.sack_blocks.windows(2) {
                let ((_, r0), (l1, _)) = (window[0], window[1]);
                assert!(r0 != l1, "adjacent blocks must have been merged");
            }
            for &(left, right) in socket.sack_blocks.iter() {
                assert!(left > socket.rcv_nxt);
                assert!(right > left);
            }
        };
        check(&socket);
        socket.take_segments();

        // partial ACK
        let una = socket.snd_una;
        let repr = ack_repr(&socket, |repr| repr.ack_number = una + 100);
        socket.process(&mut env.cx(), None, &LOCAL.addr, &REMOTE.addr, &repr, &[]);
        check(&socket);
        assert_eq!(socket.snd_una, una + 100);

        // retransmit queue range invariant
        for item in socket.retransmit_queue.iter() {
            assert!(item.repr.seq_number >= socket.snd_una);
            assert!(item.repr.seq_number + item.segment_len() <= socket.snd_nxt);
        }
    }

    #[test]
    fn reject_repr_rules() {
        // with ACK: reset borrows the ACK as its sequence
        let repr = TcpRepr {
            src_port: 1,
            dst_port: 2,
            flags: Flags::ACK,
            seq_number: SeqNumber(100),
            ack_number: SeqNumber(200),
            ..TcpRepr::default()
        };
        let reject = reject_repr(&repr, 0).unwrap();
        assert_eq!(reject.flags, Flags::RST);
        assert_eq!(reject.seq_number, SeqNumber(200));

        // without ACK: seq 0, ack covers the segment and its SYN
        let repr = TcpRepr {
            src_port: 1,
            dst_port: 2,
            flags: Flags::SYN,
            seq_number: SeqNumber(100),
            ..TcpRepr::default()
        };
        let reject = reject_repr(&repr, 10).unwrap();
        assert_eq!(reject.flags, Flags::RST | Flags::ACK);
        assert_eq!(reject.seq_number, SeqNumber(0));
        assert_eq!(reject.ack_number, SeqNumber(111));

        // resets are never answered
        let repr = TcpRepr {
            flags: Flags::RST,
            ..TcpRepr::default()
        };
        assert!(reject_repr(&repr, 0).is_none());
    }
}
