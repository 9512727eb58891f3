use core::{cmp, fmt, ops};

use bitflags::bitflags;
use byteorder::{ByteOrder, NetworkEndian};

use super::ip::checksum;
use super::{Error, IpAddress, IpProtocol, Result};

/// A TCP sequence number.
///
/// The sequence number space wraps; all comparisons use the signed
/// difference, so `a < b` means "a precedes b modulo 2^32" and is only
/// meaningful when the two numbers are less than half the space apart.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default, Hash)]
pub struct SeqNumber(pub i32);

impl SeqNumber {
    pub fn max(self, rhs: Self) -> Self {
        if self > rhs {
            self
        } else {
            rhs
        }
    }

    pub fn min(self, rhs: Self) -> Self {
        if self < rhs {
            self
        } else {
            rhs
        }
    }

    pub const fn to_wire(self) -> u32 {
        self.0 as u32
    }

    pub const fn from_wire(raw: u32) -> Self {
        SeqNumber(raw as i32)
    }
}

impl fmt::Display for SeqNumber {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0 as u32)
    }
}

impl ops::Add<usize> for SeqNumber {
    type Output = SeqNumber;

    fn add(self, rhs: usize) -> SeqNumber {
        if rhs > i32::MAX as usize {
            panic!("sequence number increment too large")
        }
        SeqNumber(self.0.wrapping_add(rhs as i32))
    }
}

impl ops::AddAssign<usize> for SeqNumber {
    fn add_assign(&mut self, rhs: usize) {
        *self = *self + rhs;
    }
}

impl ops::Sub<usize> for SeqNumber {
    type Output = SeqNumber;

    fn sub(self, rhs: usize) -> SeqNumber {
        if rhs > i32::MAX as usize {
            panic!("sequence number decrement too large")
        }
        SeqNumber(self.0.wrapping_sub(rhs as i32))
    }
}

impl ops::Sub for SeqNumber {
    type Output = usize;

    /// The distance from `rhs` forward to `self`.
    ///
    /// # Panics
    /// Panics if `rhs` does not precede `self`.
    fn sub(self, rhs: SeqNumber) -> usize {
        let result = self.0.wrapping_sub(rhs.0);
        if result < 0 {
            panic!("sequence underflow")
        }
        result as usize
    }
}

impl cmp::PartialOrd for SeqNumber {
    fn partial_cmp(&self, other: &SeqNumber) -> Option<cmp::Ordering> {
        self.0.wrapping_sub(other.0).partial_cmp(&0)
    }
}

bitflags! {
    /// The TCP flag octet. The low-order six bits travel on the wire;
    /// URG is accepted on input and never set on output.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Flags: u8 {
        const FIN = 0x01;
        const SYN = 0x02;
        const RST = 0x04;
        const PSH = 0x08;
        const ACK = 0x10;
        const URG = 0x20;
    }
}

impl fmt::Display for Flags {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut first = true;
        for (name, flag) in [
            ("SYN", Flags::SYN),
            ("FIN", Flags::FIN),
            ("RST", Flags::RST),
            ("PSH", Flags::PSH),
            ("ACK", Flags::ACK),
            ("URG", Flags::URG),
        ] {
            if self.contains(flag) {
                if !first {
                    write!(f, "|")?;
                }
                write!(f, "{name}")?;
                first = false;
            }
        }
        if first {
            write!(f, "none")?;
        }
        Ok(())
    }
}

/// A read/write wrapper around a Transmission Control Protocol packet
/// buffer.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Packet<T: AsRef<[u8]>> {
    buffer: T,
}

mod field {
    #![allow(non_snake_case)]

    use crate::wire::field::*;

    pub const SRC_PORT: Field = 0..2;
    pub const DST_PORT: Field = 2..4;
    pub const SEQ_NUM: Field = 4..8;
    pub const ACK_NUM: Field = 8..12;
    pub const FLAGS: Field = 12..14;
    pub const WIN_SIZE: Field = 14..16;
    pub const CHECKSUM: Field = 16..18;
    pub const URGENT: Field = 18..20;

    pub const fn OPTIONS(length: u8) -> Field {
        URGENT.end..(length as usize)
    }

    pub const FLG_FIN: u16 = 0x001;
    pub const FLG_SYN: u16 = 0x002;
    pub const FLG_RST: u16 = 0x004;
    pub const FLG_PSH: u16 = 0x008;
    pub const FLG_ACK: u16 = 0x010;
    pub const FLG_URG: u16 = 0x020;

    pub const OPT_END: u8 = 0x00;
    pub const OPT_NOP: u8 = 0x01;
    pub const OPT_MSS: u8 = 0x02;
    pub const OPT_WS: u8 = 0x03;
    pub const OPT_SACKPERM: u8 = 0x04;
    pub const OPT_SACKRNG: u8 = 0x05;
    pub const OPT_TSTAMP: u8 = 0x08;
}

/// The fixed TCP header length, options excluded.
pub const HEADER_LEN: usize = field::URGENT.end;

impl<T: AsRef<[u8]>> Packet<T> {
    /// Imbue a raw octet buffer with TCP packet structure.
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
    /// Returns `Err(Error)` if the buffer is too short or the data offset
    /// is inconsistent.
    pub fn check_len(&self) -> Result<()> {
        let len = self.buffer.as_ref().len();
        if len < HEADER_LEN {
            return Err(Error);
        }
        let header_len = self.header_len() as usize;
        if header_len < HEADER_LEN || len < header_len {
            return Err(Error);
        }
        Ok(())
    }

    /// Consume the packet, returning the underlying buffer.
    pub fn into_inner(self) -> T {
        self.buffer
    }

    /// Return the source port field.
    pub fn src_port(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[field::SRC_PORT])
    }

    /// Return the destination port field.
    pub fn dst_port(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[field::DST_PORT])
    }

    /// Return the sequence number field.
    pub fn seq_number(&self) -> SeqNumber {
        SeqNumber::from_wire(NetworkEndian::read_u32(
            &self.buffer.as_ref()[field::SEQ_NUM],
        ))
    }

    /// Return the acknowledgement number field.
    pub fn ack_number(&self) -> SeqNumber {
        SeqNumber::from_wire(NetworkEndian::read_u32(
            &self.buffer.as_ref()[field::ACK_NUM],
        ))
    }

    /// Return the flags.
    pub fn flags(&self) -> Flags {
        let raw = NetworkEndian::read_u16(&self.buffer.as_ref()[field::FLAGS]);
        Flags::from_bits_truncate((raw & 0x3f) as u8)
    }

    /// Return the header length, in octets.
    pub fn header_len(&self) -> u8 {
        let raw = NetworkEndian::read_u16(&self.buffer.as_ref()[field::FLAGS]);
        ((raw >> 12) * 4) as u8
    }

    /// Return the window size field.
    pub fn window_len(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[field::WIN_SIZE])
    }

    /// Return the checksum field.
    pub fn checksum(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[field::CHECKSUM])
    }

    /// Return the urgent pointer field.
    pub fn urgent_at(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[field::URGENT])
    }

    /// Return the length of the segment, in terms of sequence space.
    pub fn segment_len(&self) -> usize {
        let data = self.buffer.as_ref();
        let mut length = data.len() - self.header_len() as usize;
        let flags = self.flags();
        if flags.contains(Flags::SYN) {
            length += 1;
        }
        if flags.contains(Flags::FIN) {
            length += 1;
        }
        length
    }

    /// Return the options.
    pub fn options(&self) -> &[u8] {
        &self.buffer.as_ref()[field::OPTIONS(self.header_len())]
    }

    /// Validate the packet checksum.
    ///
    /// # Panics
    /// This function panics unless `src_addr` and `dst_addr` belong to
    /// the same family, and that family is IPv4 or IPv6.
    pub fn verify_checksum(&self, src_addr: &IpAddress, dst_addr: &IpAddress) -> bool {
        let data = self.buffer.as_ref();
        checksum::combine(&[
            checksum::pseudo_header(src_addr, dst_addr, IpProtocol::Tcp, data.len() as u32),
            checksum::data(data),
        ]) == !0
    }
}

impl<'a, T: AsRef<[u8]> + ?Sized> Packet<&'a T> {
    /// Return a pointer to the payload.
    pub fn payload(&self) -> &'a [u8] {
        &self.buffer.as_ref()[self.header_len() as usize..]
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> Packet<T> {
    /// Set the source port field.
    pub fn set_src_port(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::SRC_PORT], value)
    }

    /// Set the destination port field.
    pub fn set_dst_port(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::DST_PORT], value)
    }

    /// Set the sequence number field.
    pub fn set_seq_number(&mut self, value: SeqNumber) {
        NetworkEndian::write_u32(&mut self.buffer.as_mut()[field::SEQ_NUM], value.to_wire())
    }

    /// Set the acknowledgement number field.
    pub fn set_ack_number(&mut self, value: SeqNumber) {
        NetworkEndian::write_u32(&mut self.buffer.as_mut()[field::ACK_NUM], value.to_wire())
    }

    /// Set the flags, clearing any present before.
    pub fn set_flags(&mut self, flags: Flags) {
        let data = self.buffer.as_mut();
        let raw = NetworkEndian::read_u16(&data[field::FLAGS]);
        let raw = (raw & !0x0fff) | flags.bits() as u16;
        NetworkEndian::write_u16(&mut data[field::FLAGS], raw)
    }

    /// Set the header length, in octets.
    pub fn set_header_len(&mut self, value: u8) {
        let data = self.buffer.as_mut();
        let raw = NetworkEndian::read_u16(&data[field::FLAGS]);
        let raw = (raw & !0xf000) | ((value as u16) / 4) << 12;
        NetworkEndian::write_u16(&mut data[field::FLAGS], raw)
    }

    /// Set the window size field.
    pub fn set_window_len(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::WIN_SIZE], value)
    }

    /// Set the checksum field.
    pub fn set_checksum(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::CHECKSUM], value)
    }

    /// Set the urgent pointer field.
    pub fn set_urgent_at(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::URGENT], value)
    }

    /// Return a mutable pointer to the options.
    pub fn options_mut(&mut self) -> &mut [u8] {
        let header_len = self.header_len();
        &mut self.buffer.as_mut()[field::OPTIONS(header_len)]
    }

    /// Return a mutable pointer to the payload data.
    pub fn payload_mut(&mut self) -> &mut [u8] {
        let header_len = self.header_len() as usize;
        &mut self.buffer.as_mut()[header_len..]
    }

    /// Compute and fill in the packet checksum.
    ///
    /// # Panics
    /// This function panics unless `src_addr` and `dst_addr` belong to
    /// the same family, and that family is IPv4 or IPv6.
    pub fn fill_checksum(&mut self, src_addr: &IpAddress, dst_addr: &IpAddress) {
        self.set_checksum(0);
        let checksum = {
            let data = self.buffer.as_ref();
            !checksum::combine(&[
                checksum::pseudo_header(src_addr, dst_addr, IpProtocol::Tcp, data.len() as u32),
                checksum::data(data),
            ])
        };
        self.set_checksum(checksum)
    }
}

/// A pair of sequence space edges carried in a SACK option:
/// `left` is the first octet of the block, `right` the octet past it.
pub type SackRange = (u32, u32);

/// A representation of a single TCP option.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum TcpOption<'a> {
    EndOfList,
    NoOperation,
    MaxSegmentSize(u16),
    WindowScale(u8),
    SackPermitted,
    SackRange([Option<SackRange>; 3]),
    TimeStamp { tsval: u32, tsecr: u32 },
    Unknown { kind: u8, data: &'a [u8] },
}

impl<'a> TcpOption<'a> {
    pub fn parse(bytes: &'a [u8]) -> Result<(&'a [u8], TcpOption<'a>)> {
        let (length, option);
        match *bytes.first().ok_or(Error)? {
            field::OPT_END => {
                length = bytes.len();
                option = TcpOption::EndOfList;
            }
            field::OPT_NOP => {
                length = 1;
                option = TcpOption::NoOperation;
            }
            kind => {
                length = *bytes.get(1).ok_or(Error)? as usize;
                let data = bytes.get(2..length).ok_or(Error)?;
                match (kind, length) {
                    (field::OPT_END, _) | (field::OPT_NOP, _) => unreachable!(),
                    (field::OPT_MSS, 4) => {
                        option = TcpOption::MaxSegmentSize(NetworkEndian::read_u16(data))
                    }
                    (field::OPT_MSS, _) => return Err(Error),
                    (field::OPT_WS, 3) => option = TcpOption::WindowScale(data[0]),
                    (field::OPT_WS, _) => return Err(Error),
                    (field::OPT_SACKPERM, 2) => option = TcpOption::SackPermitted,
                    (field::OPT_SACKPERM, _) => return Err(Error),
                    (field::OPT_SACKRNG, _) => {
                        if length < 10 || (length - 2) % 8 != 0 {
                            return Err(Error);
                        }
                        let mut ranges = [None; 3];
                        for (i, range) in data.chunks(8).take(3).enumerate() {
                            ranges[i] = Some((
                                NetworkEndian::read_u32(&range[..4]),
                                NetworkEndian::read_u32(&range[4..]),
                            ));
                        }
                        option = TcpOption::SackRange(ranges);
                    }
                    (field::OPT_TSTAMP, 10) => {
                        option = TcpOption::TimeStamp {
                            tsval: NetworkEndian::read_u32(&data[..4]),
                            tsecr: NetworkEndian::read_u32(&data[4..]),
                        }
                    }
                    (_, _) => option = TcpOption::Unknown { kind, data },
                }
            }
        }
        Ok((&bytes[length..], option))
    }

    pub fn buffer_len(&self) -> usize {
        match self {
            TcpOption::EndOfList => 1,
            TcpOption::NoOperation => 1,
            TcpOption::MaxSegmentSize(_) => 4,
            TcpOption::WindowScale(_) => 3,
            TcpOption::SackPermitted => 2,
            TcpOption::SackRange(ranges) => {
                ranges.iter().filter(|range| range.is_some()).count() * 8 + 2
            }
            TcpOption::TimeStamp { .. } => 10,
            TcpOption::Unknown { data, .. } => 2 + data.len(),
        }
    }

    pub fn emit<'b>(&self, buffer: &'b mut [u8]) -> &'b mut [u8] {
        let length;
        match *self {
            TcpOption::EndOfList => {
                length = 1;
                // all padding is zeroed since it equals EndOfList
                for p in buffer.iter_mut() {
                    *p = field::OPT_END;
                }
            }
            TcpOption::NoOperation => {
                length = 1;
                buffer[0] = field::OPT_NOP;
            }
            _ => {
                length = self.buffer_len();
                buffer[0] = match *self {
                    TcpOption::MaxSegmentSize(_) => field::OPT_MSS,
                    TcpOption::WindowScale(_) => field::OPT_WS,
                    TcpOption::SackPermitted => field::OPT_SACKPERM,
                    TcpOption::SackRange(_) => field::OPT_SACKRNG,
                    TcpOption::TimeStamp { .. } => field::OPT_TSTAMP,
                    TcpOption::Unknown { kind, .. } => kind,
                    _ => unreachable!(),
                };
                buffer[1] = length as u8;
                let data = &mut buffer[2..length];
                match *self {
                    TcpOption::MaxSegmentSize(value) => NetworkEndian::write_u16(data, value),
                    TcpOption::WindowScale(value) => data[0] = value,
                    TcpOption::SackPermitted => (),
                    TcpOption::SackRange(ranges) => {
                        let mut offset = 0;
                        for (left, right) in ranges.iter().flatten() {
                            NetworkEndian::write_u32(&mut data[offset..offset + 4], *left);
                            NetworkEndian::write_u32(&mut data[offset + 4..offset + 8], *right);
                            offset += 8;
                        }
                    }
                    TcpOption::TimeStamp { tsval, tsecr } => {
                        NetworkEndian::write_u32(&mut data[..4], tsval);
                        NetworkEndian::write_u32(&mut data[4..], tsecr);
                    }
                    TcpOption::Unknown {
                        data: option_data, ..
                    } => data.copy_from_slice(option_data),
                    _ => unreachable!(),
                }
            }
        }
        &mut buffer[length..]
    }
}

/// A high-level representation of a Transmission Control Protocol header.
///
/// The payload is not part of the representation: the engine copies it
/// into the emitted packet straight from the transmit ring.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Repr {
    pub src_port: u16,
    pub dst_port: u16,
    pub flags: Flags,
    pub seq_number: SeqNumber,
    /// Zero on the wire whenever ACK is clear.
    pub ack_number: SeqNumber,
    pub window_len: u16,
    pub max_seg_size: Option<u16>,
    /// Parsed for interoperability, never applied.
    pub window_scale: Option<u8>,
    pub sack_permitted: bool,
    pub sack_ranges: [Option<SackRange>; 3],
    pub timestamp: Option<(u32, u32)>,
}

impl Default for Repr {
    fn default() -> Repr {
        Repr {
            src_port: 0,
            dst_port: 0,
            flags: Flags::empty(),
            seq_number: SeqNumber(0),
            ack_number: SeqNumber(0),
            window_len: 0,
            max_seg_size: None,
            window_scale: None,
            sack_permitted: false,
            sack_ranges: [None; 3],
            timestamp: None,
        }
    }
}

impl Repr {
    /// Parse a Transmission Control Protocol packet and return a
    /// high-level representation.
    pub fn parse<T: AsRef<[u8]> + ?Sized>(packet: &Packet<&T>) -> Result<Repr> {
        packet.check_len()?;

        // source and destination ports must be present
        if packet.src_port() == 0 || packet.dst_port() == 0 {
            return Err(Error);
        }

        let mut repr = Repr {
            src_port: packet.src_port(),
            dst_port: packet.dst_port(),
            flags: packet.flags(),
            seq_number: packet.seq_number(),
            ack_number: packet.ack_number(),
            window_len: packet.window_len(),
            ..Repr::default()
        };

        let mut options = packet.options();
        while !options.is_empty() {
            let (next_options, option) = TcpOption::parse(options)?;
            match option {
                TcpOption::EndOfList => break,
                TcpOption::NoOperation => (),
                TcpOption::MaxSegmentSize(value) => repr.max_seg_size = Some(value),
                TcpOption::WindowScale(value) => repr.window_scale = Some(value),
                TcpOption::SackPermitted => repr.sack_permitted = true,
                TcpOption::SackRange(ranges) => repr.sack_ranges = ranges,
                TcpOption::TimeStamp { tsval, tsecr } => repr.timestamp = Some((tsval, tsecr)),
                TcpOption::Unknown { .. } => (),
            }
            options = next_options;
        }

        Ok(repr)
    }

    fn options_len(&self) -> usize {
        let mut length = 0;
        if self.max_seg_size.is_some() {
            length += 4;
        }
        if self.window_scale.is_some() {
            length += 3;
        }
        if self.sack_permitted {
            length += 2;
        }
        if self.timestamp.is_some() {
            length += 10;
        }
        let sack_range_len: usize = self
            .sack_ranges
            .iter()
            .map(|range| if range.is_some() { 8 } else { 0 })
            .sum();
        if sack_range_len > 0 {
            length += sack_range_len + 2;
        }
        // the option list is padded to 32-bit alignment with NOPs
        if length % 4 != 0 {
            length += 4 - length % 4;
        }
        length
    }

    /// Return the length of the header that will be emitted from this
    /// high-level representation, options and padding included.
    pub fn header_len(&self) -> usize {
        HEADER_LEN + self.options_len()
    }

    /// Emit a high-level representation into a Transmission Control
    /// Protocol packet, leaving the checksum unfilled.
    pub fn emit<T: AsRef<[u8]> + AsMut<[u8]>>(&self, packet: &mut Packet<T>) {
        packet.set_src_port(self.src_port);
        packet.set_dst_port(self.dst_port);
        packet.set_seq_number(self.seq_number);
        if self.flags.contains(Flags::ACK) {
            packet.set_ack_number(self.ack_number);
        } else {
            packet.set_ack_number(SeqNumber(0));
        }
        packet.set_window_len(self.window_len);
        packet.set_header_len(self.header_len() as u8);
        packet.set_flags(self.flags);
        {
            let mut options = packet.options_mut();
            if let Some(value) = self.max_seg_size {
                options = TcpOption::MaxSegmentSize(value).emit(options);
            }
            if let Some(value) = self.window_scale {
                options = TcpOption::WindowScale(value).emit(options);
            }
            if self.sack_permitted {
                options = TcpOption::SackPermitted.emit(options);
            }
            if let Some((tsval, tsecr)) = self.timestamp {
                options = TcpOption::TimeStamp { tsval, tsecr }.emit(options);
            }
            if self.sack_ranges.iter().any(|range| range.is_some()) {
                options = TcpOption::SackRange(self.sack_ranges).emit(options);
            }
            while !options.is_empty() {
                options = TcpOption::NoOperation.emit(options);
            }
        }
        packet.set_urgent_at(0);
        packet.set_checksum(0);
    }
}

impl<'a, T: AsRef<[u8]> + ?Sized> fmt::Display for Packet<&'a T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "TCP {}->{} seq={} ack={} win={} [{}] len={}",
            self.src_port(),
            self.dst_port(),
            self.seq_number(),
            self.ack_number(),
            self.window_len(),
            self.flags(),
            self.payload().len(),
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::wire::Ipv4Address;

    const SRC_ADDR: IpAddress = IpAddress::Ipv4(Ipv4Address([10, 0, 0, 2]));
    const DST_ADDR: IpAddress = IpAddress::Ipv4(Ipv4Address([10, 0, 0, 1]));

    static PACKET_BYTES: [u8; 28] = [
        0xbf, 0x00, 0x00, 0x50, 0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef, 0x60, 0x13, 0x01,
        0x23, 0x60, 0x0d, 0x00, 0x00, 0x03, 0x03, 0x0c, 0x01, 0xaa, 0x00, 0x00, 0xff,
    ];

    #[test]
    fn deconstruct() {
        let packet = Packet::new_checked(&PACKET_BYTES[..]).unwrap();
        assert_eq!(packet.src_port(), 48896);
        assert_eq!(packet.dst_port(), 80);
        assert_eq!(packet.seq_number(), SeqNumber(0x01234567));
        assert_eq!(packet.ack_number(), SeqNumber(0x89abcdefu32 as i32));
        assert_eq!(packet.header_len(), 24);
        assert_eq!(packet.flags(), Flags::FIN | Flags::SYN | Flags::ACK);
        assert_eq!(packet.window_len(), 0x0123);
        assert_eq!(packet.urgent_at(), 0);
        assert_eq!(packet.checksum(), 0x600d);
        assert_eq!(packet.options(), &[0x03, 0x03, 0x0c, 0x01]);
        assert_eq!(packet.payload(), &[0xaa, 0x00, 0x00, 0xff]);
        assert_eq!(packet.segment_len(), 4 + 2);
    }

    #[test]
    fn truncated() {
        assert!(Packet::new_checked(&PACKET_BYTES[..19]).is_err());
        // data offset pointing past the buffer
        let mut bytes = PACKET_BYTES;
        bytes[12] = 0xf0;
        assert!(Packet::new_checked(&bytes[..]).is_err());
    }

    #[test]
    fn options_parse_emit() {
        let mut bytes = [0u8; 4];
        TcpOption::MaxSegmentSize(1430).emit(&mut bytes[..]);
        assert_eq!(bytes, [0x02, 0x04, 0x05, 0x96]);
        let (rest, option) = TcpOption::parse(&bytes[..]).unwrap();
        assert_eq!(option, TcpOption::MaxSegmentSize(1430));
        assert!(rest.is_empty());

        let mut bytes = [0u8; 2];
        TcpOption::SackPermitted.emit(&mut bytes[..]);
        assert_eq!(bytes, [0x04, 0x02]);

        // malformed: MSS with a bad length
        assert!(TcpOption::parse(&[0x02, 0x03, 0x05][..]).is_err());
        // malformed: length past the end
        assert!(TcpOption::parse(&[0x02, 0x04, 0x05][..]).is_err());
    }

    #[test]
    fn repr_emit_syn_with_options() {
        let repr = Repr {
            src_port: 49152,
            dst_port: 80,
            flags: Flags::SYN,
            seq_number: SeqNumber(0x01010101),
            ack_number: SeqNumber(0),
            window_len: 2860,
            max_seg_size: Some(1430),
            sack_permitted: true,
            ..Repr::default()
        };
        // 4 (mss) + 2 (sack permitted) + 2 (nop padding)
        assert_eq!(repr.header_len(), HEADER_LEN + 8);

        let mut bytes = vec![0; repr.header_len()];
        let mut packet = Packet::new_unchecked(&mut bytes[..]);
        repr.emit(&mut packet);
        packet.fill_checksum(&SRC_ADDR, &DST_ADDR);

        let packet = Packet::new_checked(&bytes[..]).unwrap();
        assert!(packet.verify_checksum(&SRC_ADDR, &DST_ADDR));
        assert_eq!(packet.header_len() as usize, HEADER_LEN + 8);
        // options are 32-bit aligned with NOP padding
        assert_eq!(
            packet.options(),
            &[0x02, 0x04, 0x05, 0x96, 0x04, 0x02, 0x01, 0x01]
        );

        let parsed = Repr::parse(&packet).unwrap();
        assert_eq!(parsed.max_seg_size, Some(1430));
        assert!(parsed.sack_permitted);
        assert_eq!(parsed.flags, Flags::SYN);
        // ACK clear means the ack field travels as zero
        assert_eq!(parsed.ack_number, SeqNumber(0));
    }

    #[test]
    fn sack_ranges_round_trip() {
        let ranges = [Some((100, 200)), Some((300, 400)), None];
        let mut bytes = [0u8; 18];
        TcpOption::SackRange(ranges).emit(&mut bytes[..]);
        let (_, parsed) = TcpOption::parse(&bytes[..]).unwrap();
        assert_eq!(parsed, TcpOption::SackRange(ranges));
    }

    #[test]
    fn seq_number_ordering() {
        assert!(SeqNumber(5) < SeqNumber(10));
        // wrap-around comparison
        let near_wrap = SeqNumber::from_wire(u32::MAX - 2);
        let wrapped = near_wrap + 10;
        assert!(near_wrap < wrapped);
        assert_eq!(wrapped - near_wrap, 10);
        assert_eq!(SeqNumber::from_wire(7) - 3, SeqNumber(4));
    }
}
