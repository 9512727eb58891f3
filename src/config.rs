//! Compile-time tunables.
//!
//! One table for every fixed capacity and protocol timing in the stack.
//! The values are the defaults of the target class (a controller with one
//! NIC and a few dozen kilobytes of packet memory); integrators that need
//! different trade-offs change them here.

use crate::time::Duration;

/// Number of slots in the logical interface table. Parent chains of
/// virtual interfaces are walked at most this many times.
pub const IFACE_COUNT: usize = 4;

/// Per-interface MAC filter capacity (unicast + multicast entries).
pub const MAC_FILTER_SIZE: usize = 12;

/// Maximum number of IPv4 addresses assigned to one interface.
pub const IFACE_IPV4_ADDR_COUNT: usize = 2;

/// Interval between two invocations of the periodic driver.
pub const TICK_INTERVAL: Duration = Duration::from_millis(100);

// ARP neighbor engine.

/// Neighbor cache capacity per interface.
pub const ARP_CACHE_SIZE: usize = 8;
/// Frames that may wait on one unresolved neighbor.
pub const ARP_MAX_PENDING_PACKETS: usize = 2;
/// Broadcast requests sent before an INCOMPLETE entry is dropped.
pub const ARP_MAX_REQUESTS: u8 = 3;
/// Unicast probes sent before a PROBE entry is dropped.
pub const ARP_MAX_PROBES: u8 = 2;
/// ARP state machine subdivision of the periodic tick.
pub const ARP_TICK_INTERVAL: Duration = Duration::from_millis(200);
/// Retransmission timeout while a request is outstanding.
pub const ARP_REQUEST_TIMEOUT: Duration = Duration::from_millis(1000);
/// Retransmission timeout while a unicast probe is outstanding.
pub const ARP_PROBE_TIMEOUT: Duration = Duration::from_secs(60);
/// Lifetime of a confirmed (REACHABLE) entry.
pub const ARP_REACHABLE_TIME: Duration = Duration::from_secs(60);
/// Quiet period between STALE use and the first unicast probe.
pub const ARP_DELAY_FIRST_PROBE_TIME: Duration = Duration::from_secs(5);

// Raw sockets.

/// Bound on every raw socket receive queue, in packets.
pub const RAW_SOCKET_RX_QUEUE_SIZE: usize = 4;

// Sockets.

/// Number of slots in the socket table.
pub const SOCKET_COUNT: usize = 10;
/// Ephemeral port range used by dynamic allocation.
pub const SOCKET_EPHEMERAL_PORT_MIN: u16 = 49152;
pub const SOCKET_EPHEMERAL_PORT_MAX: u16 = 65535;

// TCP engine.

/// Largest segment payload the engine will ever advertise or send.
pub const TCP_MAX_MSS: usize = 1430;
/// Smallest acceptable MSS option value.
pub const TCP_MIN_MSS: usize = 64;
/// MSS assumed when the peer sends no option (RFC 9293 default).
pub const TCP_DEFAULT_MSS: usize = 536;
/// Default circular buffer sizes, and the hard cap used when the
/// application asks for more.
pub const TCP_DEFAULT_TX_BUFFER_SIZE: usize = 2860;
pub const TCP_DEFAULT_RX_BUFFER_SIZE: usize = 2860;
pub const TCP_MAX_TX_BUFFER_SIZE: usize = 22880;
pub const TCP_MAX_RX_BUFFER_SIZE: usize = 22880;
/// Default and maximum SYN queue depth of a listening socket.
pub const TCP_DEFAULT_SYN_QUEUE_SIZE: usize = 4;
pub const TCP_MAX_SYN_QUEUE_SIZE: usize = 16;
/// Retransmissions (and window probes, and keep-alive probes) attempted
/// before the connection is reset.
pub const TCP_MAX_RETRIES: u8 = 5;
/// Retransmission timeout bounds (RFC 6298).
pub const TCP_INITIAL_RTO: Duration = Duration::from_millis(1000);
pub const TCP_MIN_RTO: Duration = Duration::from_millis(1000);
pub const TCP_MAX_RTO: Duration = Duration::from_secs(60);
/// Duplicate ACKs that trigger fast retransmit.
pub const TCP_FAST_RETRANSMIT_THRES: u8 = 3;
/// Initial congestion window, in segments (RFC 5681 allows 3 for SMSS
/// below 1095 octets).
pub const TCP_INITIAL_WINDOW: usize = 3;
/// Loss window applied after a retransmission timeout, in segments.
pub const TCP_LOSS_WINDOW: usize = 1;
/// Zero-window probe pacing.
pub const TCP_DEFAULT_PROBE_INTERVAL: Duration = Duration::from_millis(1000);
pub const TCP_MAX_PROBE_INTERVAL: Duration = Duration::from_secs(60);
/// Bound on how long Nagle may hold queued data without transmitting.
pub const TCP_OVERRIDE_TIMEOUT: Duration = Duration::from_millis(500);
/// Inactivity timeout of the FIN-WAIT-2 state.
pub const TCP_FIN_WAIT_2_TIMER: Duration = Duration::from_secs(4);
/// TIME-WAIT hold time (2MSL).
pub const TCP_2MSL_TIMER: Duration = Duration::from_secs(4);
/// Out-of-order extents tracked per connection.
pub const TCP_MAX_SACK_BLOCKS: usize = 4;
/// Keep-alive defaults (per-socket overridable; disabled by default).
pub const TCP_DEFAULT_KEEP_ALIVE_IDLE: Duration = Duration::from_secs(7200);
pub const TCP_DEFAULT_KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(75);
pub const TCP_DEFAULT_KEEP_ALIVE_PROBES: u8 = 9;
