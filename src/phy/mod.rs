/*! Access to networking hardware.

The [Device] trait is the boundary between the stack and an NIC driver.
The stack calls into the driver with its own lock held, mirroring the
interrupt-disabled window a register-level driver would run under, so
implementations must not block; a driver that needs to wait for a free
transmit descriptor reports [crate::Error::OutOfResources] and the frame
is retried from the queues above.

Register programming itself is out of scope: drivers live with the board
support code and only meet the stack through this trait. [Loopback] is
the one device shipped here, used by the test suite and by single-board
self-communication.
*/

mod loopback;

pub use self::loopback::Loopback;

use crate::storage::NetBuffer;
use crate::time::Instant;
use crate::wire::EthernetAddress;

/// The medium of a device, deciding which link-layer headers frames
/// carry. Only Ethernet (and the Ethernet-framed loopback) take part in
/// the ARP and VLAN machinery.
#[derive(Debug, Eq, PartialEq, Copy, Clone, Default)]
pub enum Medium {
    #[default]
    Ethernet,
    Ppp,
    SixLowpan,
    Loopback,
}

/// Link state reported by a driver, refreshed on every tick.
#[derive(Debug, Eq, PartialEq, Copy, Clone, Default)]
pub struct LinkState {
    pub up: bool,
    /// Negotiated speed in Mbit/s, zero when unknown.
    pub speed: u32,
    pub full_duplex: bool,
}

/// Per-packet transmit options riding down from the socket layer:
/// the priority and drop-eligibility bits written into 802.1Q/802.1ad
/// tags, when the egress interface inserts them.
#[derive(Debug, Clone, Copy, Default)]
pub struct TxAncillary {
    pub vlan_pcp: u8,
    pub vlan_dei: bool,
    pub vman_pcp: u8,
    pub vman_dei: bool,
}

/// A description of device capabilities.
///
/// Higher-level protocols may achieve higher throughput or lower latency
/// if they consider the bandwidth or packet size limitations.
#[derive(Debug, Clone, Default)]
#[non_exhaustive]
pub struct DeviceCapabilities {
    /// Medium of the device.
    pub medium: Medium,

    /// Maximum transmission unit.
    ///
    /// The network device is unable to send or receive frames larger
    /// than this. For Ethernet devices this is the maximum frame size
    /// including the 14-octet header but excluding the FCS, i.e.
    /// Ethernet MTU = IP MTU + 14.
    pub max_transmission_unit: usize,

    /// Checksum offloads.
    ///
    /// If the device verifies or computes checksums for some protocols
    /// in hardware, it can request that the stack not do so in software.
    pub checksum: ChecksumCapabilities,

    /// Frame-level offloads of an Ethernet MAC.
    pub ethernet: EthernetCapabilities,
}

/// Frame-level offloads of an Ethernet MAC. A capability the hardware
/// lacks is performed by the stack in software.
#[derive(Debug, Clone, Copy, Default)]
pub struct EthernetCapabilities {
    /// The MAC pads outgoing frames to the 60-octet minimum.
    pub auto_padding: bool,
    /// The MAC appends the FCS to outgoing frames.
    pub auto_crc_calc: bool,
    /// The MAC verifies the FCS of incoming frames.
    pub auto_crc_verify: bool,
    /// The MAC strips the FCS from incoming frames before delivery.
    pub auto_crc_strip: bool,
}

impl EthernetCapabilities {
    /// Everything done in hardware (or not applicable, as on loopback).
    pub const fn offloaded() -> EthernetCapabilities {
        EthernetCapabilities {
            auto_padding: true,
            auto_crc_calc: true,
            auto_crc_verify: true,
            auto_crc_strip: true,
        }
    }
}

/// A description of checksum behavior for every supported protocol.
#[derive(Debug, Clone, Default)]
#[non_exhaustive]
pub struct ChecksumCapabilities {
    pub ipv4: Checksum,
    pub tcp: Checksum,
}

impl ChecksumCapabilities {
    /// Checksum behavior that results in not computing or verifying
    /// checksums for any of the supported protocols.
    pub fn ignored() -> Self {
        ChecksumCapabilities {
            ipv4: Checksum::None,
            tcp: Checksum::None,
        }
    }
}

/// A description of checksum behavior for a particular protocol.
#[derive(Debug, Clone, Copy, Default)]
pub enum Checksum {
    /// Verify checksum when receiving and compute checksum when sending.
    #[default]
    Both,
    /// Verify checksum when receiving.
    Rx,
    /// Compute checksum before sending.
    Tx,
    /// Ignore checksum completely.
    None,
}

impl Checksum {
    /// Returns whether the checksum should be verified when receiving.
    pub const fn rx(&self) -> bool {
        matches!(self, Checksum::Both | Checksum::Rx)
    }

    /// Returns whether the checksum should be computed when sending.
    pub const fn tx(&self) -> bool {
        matches!(self, Checksum::Both | Checksum::Tx)
    }
}

/// An interface for sending and receiving raw network frames.
pub trait Device {
    /// Get a description of device capabilities.
    fn capabilities(&self) -> DeviceCapabilities;

    /// Current link state. Polled on every tick; transitions are turned
    /// into socket events by the stack.
    fn link_state(&self) -> LinkState;

    /// Transmit one frame.
    ///
    /// The frame is complete except for the offloads the device
    /// advertises in [DeviceCapabilities::ethernet]. Called with the
    /// stack lock held; must not block.
    fn send(&mut self, frame: &NetBuffer) -> crate::Result<()>;

    /// Poll one received frame into `buffer`, returning its length.
    ///
    /// Drivers queue frames from their receive interrupt and hand them
    /// over here.
    fn receive(&mut self, buffer: &mut [u8]) -> Option<usize>;

    /// Push the current set of accepted destination addresses down to
    /// the hardware address filter.
    fn update_mac_filter(&mut self, entries: &[EthernetAddress]) -> crate::Result<()> {
        let _ = entries;
        Ok(())
    }

    /// Periodic driver housekeeping, called on every stack tick.
    fn tick(&mut self, now: Instant) {
        let _ = now;
    }
}

/// Port-tagging hooks of an Ethernet switch in front of the MAC.
///
/// A managed switch can prefix frames with a proprietary tag naming the
/// ingress port, and expect one naming the egress port. The stack calls
/// these around the standard tag processing.
pub trait SwitchDriver {
    /// Remove the proprietary tag from an ingress frame, in place.
    /// Returns the ingress port, if the frame carried one.
    fn untag_frame(&mut self, frame: &mut Vec<u8>) -> crate::Result<Option<u8>>;

    /// Add the proprietary tag for the given egress port.
    fn tag_frame(&mut self, frame: &mut NetBuffer, port: u8) -> crate::Result<()>;
}
