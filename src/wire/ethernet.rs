use byteorder::{ByteOrder, NetworkEndian};

use super::{Error, Result};

enum_with_unknown! {
    /// Ethernet protocol type.
    ///
    /// Values at or below 1500 are not protocol types at all but 802.3
    /// lengths; frames carrying them hold an 802.2 LLC payload.
    pub enum EtherType(u16) {
        Ipv4 = 0x0800,
        Arp  = 0x0806,
        VlanTagged = 0x8100,
        Ipv6 = 0x86DD,
        Eapol = 0x888E,
        VmanTagged = 0x88A8,
        Lldp = 0x88CC
    }
}

impl EtherType {
    /// Query whether the raw value denotes an 802.3 length field, i.e.
    /// the frame payload is 802.2 LLC.
    pub fn is_llc_length(value: u16) -> bool {
        value <= 1500
    }
}

impl core::fmt::Display for EtherType {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            EtherType::Ipv4 => write!(f, "IPv4"),
            EtherType::Arp => write!(f, "ARP"),
            EtherType::VlanTagged => write!(f, "VLAN"),
            EtherType::Ipv6 => write!(f, "IPv6"),
            EtherType::Eapol => write!(f, "EAPOL"),
            EtherType::VmanTagged => write!(f, "VMAN"),
            EtherType::Lldp => write!(f, "LLDP"),
            EtherType::Unknown(id) => write!(f, "0x{id:04x}"),
        }
    }
}

/// A six-octet Ethernet II address.
#[derive(Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Default)]
pub struct Address(pub [u8; 6]);

impl Address {
    /// The unspecified address, all zeroes.
    pub const UNSPECIFIED: Address = Address([0x00; 6]);

    /// The broadcast address.
    pub const BROADCAST: Address = Address([0xff; 6]);

    /// Construct an Ethernet address from a sequence of octets, in
    /// big-endian.
    ///
    /// # Panics
    /// The function panics if `data` is not six octets long.
    pub fn from_bytes(data: &[u8]) -> Address {
        let mut bytes = [0; 6];
        bytes.copy_from_slice(data);
        Address(bytes)
    }

    /// Return an Ethernet address as a sequence of octets, in big-endian.
    pub const fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Query whether the address is an unicast address.
    pub fn is_unicast(&self) -> bool {
        !(self.is_broadcast() || self.is_multicast())
    }

    /// Query whether this address is the broadcast address.
    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    /// Query whether the "multicast" bit in the OUI is set.
    pub const fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 != 0
    }

    /// Query whether the address is all zeroes.
    pub fn is_unspecified(&self) -> bool {
        *self == Self::UNSPECIFIED
    }

    /// Query whether the "locally administered" bit in the OUI is set.
    pub const fn is_local(&self) -> bool {
        self.0[0] & 0x02 != 0
    }

    /// Map the address to its modified EUI-64 interface identifier:
    /// `FF FE` is inserted between the two halves and the Universal/Local
    /// bit is toggled (RFC 4291, appendix A).
    pub const fn to_eui64(&self) -> Eui64 {
        let b = &self.0;
        Eui64([
            b[0] ^ 0x02,
            b[1],
            b[2],
            0xff,
            0xfe,
            b[3],
            b[4],
            b[5],
        ])
    }
}

impl core::fmt::Display for Address {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        let bytes = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5]
        )
    }
}

/// An EUI-64 interface identifier.
#[derive(Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Default)]
pub struct Eui64(pub [u8; 8]);

impl Eui64 {
    /// The unspecified identifier, all zeroes.
    pub const UNSPECIFIED: Eui64 = Eui64([0x00; 8]);

    /// Construct an EUI-64 from a sequence of octets, in big-endian.
    ///
    /// # Panics
    /// The function panics if `data` is not eight octets long.
    pub fn from_bytes(data: &[u8]) -> Eui64 {
        let mut bytes = [0; 8];
        bytes.copy_from_slice(data);
        Eui64(bytes)
    }

    /// Return the identifier as a sequence of octets, in big-endian.
    pub const fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl core::fmt::Display for Eui64 {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        let b = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]
        )
    }
}

/// A read/write wrapper around an Ethernet II frame buffer.
#[derive(Debug, Clone)]
pub struct Frame<T: AsRef<[u8]>> {
    buffer: T,
}

mod frame_field {
    use crate::wire::field::*;

    pub const DESTINATION: Field = 0..6;
    pub const SOURCE: Field = 6..12;
    pub const ETHERTYPE: Field = 12..14;
    pub const PAYLOAD: Rest = 14..;
}

/// The Ethernet header length, in octets.
pub const ETHERNET_HEADER_LEN: usize = frame_field::PAYLOAD.start;

/// The minimum frame length on the wire, FCS excluded. Shorter frames
/// are zero-padded before transmission.
pub const ETHERNET_MIN_FRAME_LEN: usize = 60;

/// The frame check sequence length, in octets.
pub const FCS_LEN: usize = 4;

impl<T: AsRef<[u8]>> Frame<T> {
    /// Imbue a raw octet buffer with Ethernet frame structure.
    pub const fn new_unchecked(buffer: T) -> Frame<T> {
        Frame { buffer }
    }

    /// Shorthand for a combination of [new_unchecked] and [check_len].
    ///
    /// [new_unchecked]: #method.new_unchecked
    /// [check_len]: #method.check_len
    pub fn new_checked(buffer: T) -> Result<Frame<T>> {
        let frame = Self::new_unchecked(buffer);
        frame.check_len()?;
        Ok(frame)
    }

    /// Ensure that no accessor method will panic if called.
    /// Returns `Err(Error)` if the buffer is too short.
    pub fn check_len(&self) -> Result<()> {
        if self.buffer.as_ref().len() < ETHERNET_HEADER_LEN {
            Err(Error)
        } else {
            Ok(())
        }
    }

    /// Consume the frame, returning the underlying buffer.
    pub fn into_inner(self) -> T {
        self.buffer
    }

    /// Return the length of a frame header.
    pub const fn header_len() -> usize {
        ETHERNET_HEADER_LEN
    }

    /// Return the length of a buffer required to hold a packet with the
    /// payload of a given length.
    pub const fn buffer_len(payload_len: usize) -> usize {
        ETHERNET_HEADER_LEN + payload_len
    }

    /// Return the destination address field.
    pub fn dst_addr(&self) -> Address {
        let data = self.buffer.as_ref();
        Address::from_bytes(&data[frame_field::DESTINATION])
    }

    /// Return the source address field.
    pub fn src_addr(&self) -> Address {
        let data = self.buffer.as_ref();
        Address::from_bytes(&data[frame_field::SOURCE])
    }

    /// Return the EtherType field, without checking for 802.3 length
    /// encoding.
    pub fn ethertype(&self) -> EtherType {
        EtherType::from(self.raw_ethertype())
    }

    /// Return the raw EtherType field value.
    pub fn raw_ethertype(&self) -> u16 {
        let data = self.buffer.as_ref();
        NetworkEndian::read_u16(&data[frame_field::ETHERTYPE])
    }
}

impl<'a, T: AsRef<[u8]> + ?Sized> Frame<&'a T> {
    /// Return a pointer to the payload, without checking for 802.1Q.
    pub fn payload(&self) -> &'a [u8] {
        let data = self.buffer.as_ref();
        &data[frame_field::PAYLOAD]
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> Frame<T> {
    /// Set the destination address field.
    pub fn set_dst_addr(&mut self, value: Address) {
        let data = self.buffer.as_mut();
        data[frame_field::DESTINATION].copy_from_slice(value.as_bytes())
    }

    /// Set the source address field.
    pub fn set_src_addr(&mut self, value: Address) {
        let data = self.buffer.as_mut();
        data[frame_field::SOURCE].copy_from_slice(value.as_bytes())
    }

    /// Set the EtherType field.
    pub fn set_ethertype(&mut self, value: EtherType) {
        let data = self.buffer.as_mut();
        NetworkEndian::write_u16(&mut data[frame_field::ETHERTYPE], value.into())
    }

    /// Return a mutable pointer to the payload.
    pub fn payload_mut(&mut self) -> &mut [u8] {
        let data = self.buffer.as_mut();
        &mut data[frame_field::PAYLOAD]
    }
}

impl<T: AsRef<[u8]>> AsRef<[u8]> for Frame<T> {
    fn as_ref(&self) -> &[u8] {
        self.buffer.as_ref()
    }
}

/// A high-level representation of an Ethernet II header.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Repr {
    pub src_addr: Address,
    pub dst_addr: Address,
    pub ethertype: EtherType,
}

impl Repr {
    /// Parse an Ethernet II frame and return a high-level representation.
    pub fn parse<T: AsRef<[u8]> + ?Sized>(frame: &Frame<&T>) -> Result<Repr> {
        frame.check_len()?;
        Ok(Repr {
            src_addr: frame.src_addr(),
            dst_addr: frame.dst_addr(),
            ethertype: frame.ethertype(),
        })
    }

    /// Return the length of a header that will be emitted from this
    /// high-level representation.
    pub const fn buffer_len(&self) -> usize {
        ETHERNET_HEADER_LEN
    }

    /// Emit a high-level representation into an Ethernet II frame.
    pub fn emit<T: AsRef<[u8]> + AsMut<[u8]>>(&self, frame: &mut Frame<T>) {
        frame.set_src_addr(self.src_addr);
        frame.set_dst_addr(self.dst_addr);
        frame.set_ethertype(self.ethertype);
    }
}

/// The length of one 802.1Q/802.1ad tag: a TCI word followed by the
/// encapsulated EtherType.
pub const VLAN_TAG_LEN: usize = 4;

/// The decoded Tag Control Information word of an 802.1Q/802.1ad tag.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub struct TagControl {
    /// Priority code point.
    pub pcp: u8,
    /// Drop eligible indicator.
    pub dei: bool,
    /// VLAN identifier.
    pub vid: u16,
}

impl TagControl {
    pub const VID_MASK: u16 = 0x0fff;

    pub fn from_raw(raw: u16) -> TagControl {
        TagControl {
            pcp: (raw >> 13) as u8,
            dei: raw & 0x1000 != 0,
            vid: raw & Self::VID_MASK,
        }
    }

    pub fn to_raw(self) -> u16 {
        (self.pcp as u16) << 13
            | if self.dei { 0x1000 } else { 0 }
            | (self.vid & Self::VID_MASK)
    }
}

/// A read/write wrapper around the four tag octets that follow the
/// source address in an 802.1Q- or 802.1ad-tagged frame.
#[derive(Debug, Clone)]
pub struct VlanTag<T: AsRef<[u8]>> {
    buffer: T,
}

mod tag_field {
    use crate::wire::field::*;

    pub const TCI: Field = 0..2;
    pub const ETHERTYPE: Field = 2..4;
}

impl<T: AsRef<[u8]>> VlanTag<T> {
    pub const fn new_unchecked(buffer: T) -> VlanTag<T> {
        VlanTag { buffer }
    }

    pub fn new_checked(buffer: T) -> Result<VlanTag<T>> {
        let tag = Self::new_unchecked(buffer);
        tag.check_len()?;
        Ok(tag)
    }

    pub fn check_len(&self) -> Result<()> {
        if self.buffer.as_ref().len() < VLAN_TAG_LEN {
            Err(Error)
        } else {
            Ok(())
        }
    }

    /// Return the decoded tag control information.
    pub fn tci(&self) -> TagControl {
        let data = self.buffer.as_ref();
        TagControl::from_raw(NetworkEndian::read_u16(&data[tag_field::TCI]))
    }

    /// Return the EtherType of the encapsulated frame.
    pub fn ethertype(&self) -> EtherType {
        let data = self.buffer.as_ref();
        EtherType::from(NetworkEndian::read_u16(&data[tag_field::ETHERTYPE]))
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> VlanTag<T> {
    pub fn set_tci(&mut self, value: TagControl) {
        let data = self.buffer.as_mut();
        NetworkEndian::write_u16(&mut data[tag_field::TCI], value.to_raw())
    }

    pub fn set_ethertype(&mut self, value: EtherType) {
        let data = self.buffer.as_mut();
        NetworkEndian::write_u16(&mut data[tag_field::ETHERTYPE], value.into())
    }
}

/// The value `crc32` returns over a frame whose trailing FCS is intact.
pub const CRC32_RESIDUE: u32 = 0x2144_df1c;

/// Compute the Ethernet FCS over one contiguous octet run.
///
/// Reflected polynomial 0xEDB88320, preset 0xFFFFFFFF, final complement.
/// The FCS travels little-endian on the wire, so emission is
/// `LittleEndian::write_u32`.
pub fn crc32(data: &[u8]) -> u32 {
    !crc32_step(0xffff_ffff, data)
}

/// Compute the Ethernet FCS over scattered octet runs without gathering
/// them. The fold never allocates.
pub fn crc32_chunks<'a, I>(chunks: I) -> u32
where
    I: IntoIterator<Item = &'a [u8]>,
{
    !chunks.into_iter().fold(0xffff_ffff, crc32_step)
}

fn crc32_step(mut crc: u32, data: &[u8]) -> u32 {
    for byte in data {
        crc ^= *byte as u32;
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xedb8_8320;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

#[cfg(test)]
mod test {
    use super::*;
    use byteorder::LittleEndian;

    // A TCP ACK within an Ethernet frame.
    static FRAME_BYTES: [u8; 64] = [
        0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x11, 0x12, 0x13, 0x14, 0x15, 0x16, 0x08, 0x00, 0xaa,
        0x00, 0x00, 0xff, 0xaa, 0x00, 0x00, 0xff, 0xaa, 0x00, 0x00, 0xff, 0xaa, 0x00, 0x00, 0xff,
        0xaa, 0x00, 0x00, 0xff, 0xaa, 0x00, 0x00, 0xff, 0xaa, 0x00, 0x00, 0xff, 0xaa, 0x00, 0x00,
        0xff, 0xaa, 0x00, 0x00, 0xff, 0xaa, 0x00, 0x00, 0xff, 0xaa, 0x00, 0x00, 0xff, 0xaa, 0x00,
        0x00, 0xff, 0xff, 0xff,
    ];

    #[test]
    fn frame_deconstruct() {
        let frame = Frame::new_unchecked(&FRAME_BYTES[..]);
        assert_eq!(frame.dst_addr(), Address([0x01, 0x02, 0x03, 0x04, 0x05, 0x06]));
        assert_eq!(frame.src_addr(), Address([0x11, 0x12, 0x13, 0x14, 0x15, 0x16]));
        assert_eq!(frame.ethertype(), EtherType::Ipv4);
        assert_eq!(frame.payload().len(), 50);
    }

    #[test]
    fn frame_construct() {
        let mut bytes = vec![0xa5; 64];
        let mut frame = Frame::new_unchecked(&mut bytes);
        frame.set_dst_addr(Address([0x01, 0x02, 0x03, 0x04, 0x05, 0x06]));
        frame.set_src_addr(Address([0x11, 0x12, 0x13, 0x14, 0x15, 0x16]));
        frame.set_ethertype(EtherType::Ipv4);
        frame.payload_mut().copy_from_slice(&FRAME_BYTES[14..]);
        assert_eq!(&frame.into_inner()[..], &FRAME_BYTES[..]);
    }

    #[test]
    fn too_short_frame() {
        assert!(Frame::new_checked(&FRAME_BYTES[..13]).is_err());
        assert!(Frame::new_checked(&FRAME_BYTES[..14]).is_ok());
    }

    #[test]
    fn address_kinds() {
        assert!(Address::BROADCAST.is_broadcast());
        assert!(!Address::BROADCAST.is_unicast());
        assert!(Address::BROADCAST.is_multicast());
        assert!(Address([0x01, 0x00, 0x5e, 0x00, 0x00, 0x01]).is_multicast());
        assert!(Address([0x52, 0x54, 0x00, 0x00, 0x00, 0x01]).is_unicast());
        assert!(Address::UNSPECIFIED.is_unspecified());
    }

    #[test]
    fn eui64_mapping() {
        let mac = Address([0x04, 0x05, 0x06, 0x07, 0x08, 0x09]);
        assert_eq!(
            mac.to_eui64(),
            Eui64([0x06, 0x05, 0x06, 0xff, 0xfe, 0x07, 0x08, 0x09])
        );
        // universal/local bit is toggled both ways
        let mac = Address([0x02, 0x00, 0x00, 0x00, 0x00, 0x01]);
        assert_eq!(mac.to_eui64().0[0], 0x00);
    }

    #[test]
    fn address_display_round_trip() {
        let mac = Address([0x00, 0x1b, 0x63, 0x84, 0x45, 0xe6]);
        assert_eq!(format!("{mac}"), "00:1b:63:84:45:e6");
        assert_eq!(format!("{mac}").parse(), Ok(mac));

        let eui = mac.to_eui64();
        assert_eq!(format!("{eui}").parse(), Ok(eui));
    }

    #[test]
    fn tag_control_round_trip() {
        let tci = TagControl {
            pcp: 5,
            dei: true,
            vid: 0x123,
        };
        assert_eq!(TagControl::from_raw(tci.to_raw()), tci);
        assert_eq!(tci.to_raw(), 0xb123);

        let mut bytes = [0u8; 4];
        let mut tag = VlanTag::new_unchecked(&mut bytes[..]);
        tag.set_tci(tci);
        tag.set_ethertype(EtherType::Ipv4);
        let tag = VlanTag::new_checked(&bytes[..]).unwrap();
        assert_eq!(tag.tci(), tci);
        assert_eq!(tag.ethertype(), EtherType::Ipv4);
    }

    #[test]
    fn crc_check_value() {
        // CRC-32/ISO-HDLC check value
        assert_eq!(crc32(b"123456789"), 0xcbf4_3926);
    }

    #[test]
    fn crc_residue() {
        // appending the FCS little-endian makes any frame fold to the
        // fixed residue
        let payload = [0x00u8, 0x00, 0x00, 0x00];
        let fcs = crc32(&payload);

        let mut framed = payload.to_vec();
        let mut fcs_bytes = [0u8; 4];
        LittleEndian::write_u32(&mut fcs_bytes, fcs);
        framed.extend_from_slice(&fcs_bytes);
        assert_eq!(crc32(&framed), CRC32_RESIDUE);
    }

    #[test]
    fn crc_over_chunks_matches_contiguous() {
        let data = b"some scattered frame bytes";
        let split: Vec<&[u8]> = vec![&data[..5], &data[5..9], &data[9..]];
        assert_eq!(crc32_chunks(split), crc32(data));
    }
}
