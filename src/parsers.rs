//! Text parsing of hardware and protocol addresses.
//!
//! Everything here backs a `FromStr` impl in [crate::wire]; the stack
//! proper never parses text. Syntax errors surface to API users as
//! [crate::Error::InvalidSyntax].

use core::result;
use core::str::FromStr;

use crate::wire::{Eui64, EthernetAddress};
use crate::wire::{IpAddress, IpCidr, IpEndpoint};
use crate::wire::{Ipv4Address, Ipv4Cidr, Ipv6Address, Ipv6Cidr};

type Result<T> = result::Result<T, ()>;

struct Parser<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(data: &'a str) -> Parser<'a> {
        Parser {
            data: data.as_bytes(),
            pos: 0,
        }
    }

    fn advance(&mut self) -> Result<u8> {
        match self.data.get(self.pos) {
            Some(&chr) => {
                self.pos += 1;
                Ok(chr)
            }
            None => Err(()),
        }
    }

    fn try_do<F, T>(&mut self, f: F) -> Option<T>
    where
        F: FnOnce(&mut Parser<'a>) -> Result<T>,
    {
        let pos = self.pos;
        match f(self) {
            Ok(res) => Some(res),
            Err(()) => {
                self.pos = pos;
                None
            }
        }
    }

    fn accept_eof(&mut self) -> Result<()> {
        if self.data.len() == self.pos {
            Ok(())
        } else {
            Err(())
        }
    }

    fn until_eof<F, T>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Parser<'a>) -> Result<T>,
    {
        let res = f(self)?;
        self.accept_eof()?;
        Ok(res)
    }

    fn accept_char(&mut self, chr: u8) -> Result<()> {
        if self.advance()? == chr {
            Ok(())
        } else {
            Err(())
        }
    }

    fn accept_digit(&mut self, hex: bool) -> Result<u8> {
        let digit = self.advance()?;
        if digit.is_ascii_digit() {
            Ok(digit - b'0')
        } else if hex && (b'a'..=b'f').contains(&digit) {
            Ok(digit - b'a' + 10)
        } else if hex && (b'A'..=b'F').contains(&digit) {
            Ok(digit - b'A' + 10)
        } else {
            Err(())
        }
    }

    fn accept_number(&mut self, max_digits: usize, max_value: u32, hex: bool) -> Result<u32> {
        let mut value = self.accept_digit(hex)? as u32;
        for _ in 1..max_digits {
            match self.try_do(|p| p.accept_digit(hex)) {
                Some(digit) => {
                    value *= if hex { 16 } else { 10 };
                    value += digit as u32;
                }
                None => break,
            }
        }
        if value < max_value {
            Ok(value)
        } else {
            Err(())
        }
    }

    fn accept_octets_joined_with<const N: usize>(&mut self, separator: u8) -> Result<[u8; N]> {
        let mut octets = [0u8; N];
        for (n, octet) in octets.iter_mut().enumerate() {
            *octet = self.accept_number(2, 0x100, true)? as u8;
            if n != N - 1 {
                self.accept_char(separator)?;
            }
        }
        Ok(octets)
    }

    fn accept_mac(&mut self) -> Result<EthernetAddress> {
        if let Some(octets) = self.try_do(|p| p.accept_octets_joined_with::<6>(b'-')) {
            return Ok(EthernetAddress(octets));
        }
        if let Some(octets) = self.try_do(|p| p.accept_octets_joined_with::<6>(b':')) {
            return Ok(EthernetAddress(octets));
        }
        Err(())
    }

    fn accept_eui64(&mut self) -> Result<Eui64> {
        if let Some(octets) = self.try_do(|p| p.accept_octets_joined_with::<8>(b'-')) {
            return Ok(Eui64(octets));
        }
        if let Some(octets) = self.try_do(|p| p.accept_octets_joined_with::<8>(b':')) {
            return Ok(Eui64(octets));
        }
        Err(())
    }

    fn accept_ipv4(&mut self) -> Result<Ipv4Address> {
        let mut octets = [0u8; 4];
        for (n, octet) in octets.iter_mut().enumerate() {
            *octet = self.accept_number(3, 0x100, false)? as u8;
            if n != 3 {
                self.accept_char(b'.')?;
            }
        }
        Ok(Ipv4Address::from_bytes(&octets))
    }

    fn accept_ipv6(&mut self) -> Result<Ipv6Address> {
        let mut head = [0u16; 8];
        let mut head_len = 0;
        let mut tail = [0u16; 8];
        let mut tail_len = 0;
        let mut in_tail = false;
        let mut group_expected = true;

        if self
            .try_do(|p| {
                p.accept_char(b':')?;
                p.accept_char(b':')
            })
            .is_some()
        {
            in_tail = true;
            group_expected = false;
        }

        loop {
            let group = match self.try_do(|p| p.accept_number(4, 0x10000, true)) {
                Some(group) => group as u16,
                None if group_expected => return Err(()),
                None => break,
            };
            if in_tail {
                tail[tail_len] = group;
                tail_len += 1;
            } else {
                head[head_len] = group;
                head_len += 1;
            }
            if head_len + tail_len == 8 {
                break;
            }

            if self
                .try_do(|p| {
                    p.accept_char(b':')?;
                    p.accept_char(b':')
                })
                .is_some()
            {
                if in_tail {
                    return Err(());
                }
                in_tail = true;
                group_expected = false;
            } else if self.try_do(|p| p.accept_char(b':')).is_some() {
                group_expected = true;
            } else {
                break;
            }
        }

        let groups = head_len + tail_len;
        if (in_tail && groups >= 8) || (!in_tail && groups != 8) {
            return Err(());
        }

        let mut parts = [0u16; 8];
        parts[..head_len].copy_from_slice(&head[..head_len]);
        parts[8 - tail_len..].copy_from_slice(&tail[..tail_len]);
        Ok(Ipv6Address::from_parts(&parts))
    }

    fn accept_ip(&mut self) -> Result<IpAddress> {
        if let Some(ipv4) = self.try_do(|p| p.accept_ipv4()) {
            return Ok(IpAddress::Ipv4(ipv4));
        }
        if let Some(ipv6) = self.try_do(|p| p.accept_ipv6()) {
            return Ok(IpAddress::Ipv6(ipv6));
        }
        Err(())
    }

    fn accept_ip_endpoint(&mut self) -> Result<IpEndpoint> {
        if let Some(endpoint) = self.try_do(|p| {
            let addr = p.accept_ipv4()?;
            p.accept_char(b':')?;
            let port = p.accept_number(5, 65536, false)?;
            Ok(IpEndpoint::new(IpAddress::Ipv4(addr), port as u16))
        }) {
            return Ok(endpoint);
        }
        // IPv6 endpoints use the bracketed form, e.g. "[fe80::1]:80".
        if let Some(endpoint) = self.try_do(|p| {
            p.accept_char(b'[')?;
            let addr = p.accept_ipv6()?;
            p.accept_char(b']')?;
            p.accept_char(b':')?;
            let port = p.accept_number(5, 65536, false)?;
            Ok(IpEndpoint::new(IpAddress::Ipv6(addr), port as u16))
        }) {
            return Ok(endpoint);
        }
        Err(())
    }
}

impl FromStr for EthernetAddress {
    type Err = ();

    /// Parse `XX-XX-XX-XX-XX-XX` or `XX:XX:XX:XX:XX:XX`, hex digits in
    /// either case.
    fn from_str(s: &str) -> Result<EthernetAddress> {
        Parser::new(s).until_eof(|p| p.accept_mac())
    }
}

impl FromStr for Eui64 {
    type Err = ();

    /// Parse an 8-octet EUI-64 identifier, `-` or `:` separated.
    fn from_str(s: &str) -> Result<Eui64> {
        Parser::new(s).until_eof(|p| p.accept_eui64())
    }
}

impl FromStr for Ipv4Address {
    type Err = ();

    fn from_str(s: &str) -> Result<Ipv4Address> {
        Parser::new(s).until_eof(|p| p.accept_ipv4())
    }
}

impl FromStr for Ipv6Address {
    type Err = ();

    fn from_str(s: &str) -> Result<Ipv6Address> {
        Parser::new(s).until_eof(|p| p.accept_ipv6())
    }
}

impl FromStr for IpAddress {
    type Err = ();

    fn from_str(s: &str) -> Result<IpAddress> {
        Parser::new(s).until_eof(|p| p.accept_ip())
    }
}

impl FromStr for Ipv4Cidr {
    type Err = ();

    fn from_str(s: &str) -> Result<Ipv4Cidr> {
        Parser::new(s).until_eof(|p| {
            let ip = p.accept_ipv4()?;
            p.accept_char(b'/')?;
            let prefix_len = p.accept_number(2, 33, false)? as u8;
            Ok(Ipv4Cidr::new(ip, prefix_len))
        })
    }
}

impl FromStr for Ipv6Cidr {
    type Err = ();

    fn from_str(s: &str) -> Result<Ipv6Cidr> {
        Parser::new(s).until_eof(|p| {
            let ip = p.accept_ipv6()?;
            p.accept_char(b'/')?;
            let prefix_len = p.accept_number(3, 129, false)? as u8;
            Ok(Ipv6Cidr::new(ip, prefix_len))
        })
    }
}

impl FromStr for IpCidr {
    type Err = ();

    fn from_str(s: &str) -> Result<IpCidr> {
        if let Ok(cidr) = Ipv4Cidr::from_str(s) {
            return Ok(IpCidr::Ipv4(cidr));
        }
        if let Ok(cidr) = Ipv6Cidr::from_str(s) {
            return Ok(IpCidr::Ipv6(cidr));
        }
        Err(())
    }
}

impl FromStr for IpEndpoint {
    type Err = ();

    fn from_str(s: &str) -> Result<IpEndpoint> {
        Parser::new(s).until_eof(|p| p.accept_ip_endpoint())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_mac() {
        assert_eq!(
            EthernetAddress::from_str("00-1B-63-84-45-E6"),
            Ok(EthernetAddress([0x00, 0x1b, 0x63, 0x84, 0x45, 0xe6]))
        );
        assert_eq!(
            EthernetAddress::from_str("02:00:00:00:00:01"),
            Ok(EthernetAddress([0x02, 0x00, 0x00, 0x00, 0x00, 0x01]))
        );
        // lowercase hex is accepted
        assert_eq!(
            EthernetAddress::from_str("00-1b-63-84-45-e6"),
            Ok(EthernetAddress([0x00, 0x1b, 0x63, 0x84, 0x45, 0xe6]))
        );
        assert_eq!(EthernetAddress::from_str("bad:value"), Err(()));
        assert_eq!(EthernetAddress::from_str("02:00:00:00:00"), Err(()));
        assert_eq!(EthernetAddress::from_str("02:00:00:00:00:01:07"), Err(()));
        // mixed separators are rejected
        assert_eq!(EthernetAddress::from_str("02:00-00:00-00:01"), Err(()));
    }

    #[test]
    fn parse_eui64() {
        assert_eq!(
            Eui64::from_str("06:05:06:FF:FE:07:08:09"),
            Ok(Eui64([0x06, 0x05, 0x06, 0xff, 0xfe, 0x07, 0x08, 0x09]))
        );
        assert_eq!(Eui64::from_str("06:05:06:FF:FE:07:08"), Err(()));
    }

    #[test]
    fn parse_ipv4() {
        assert_eq!(
            Ipv4Address::from_str("10.0.0.1"),
            Ok(Ipv4Address::new(10, 0, 0, 1))
        );
        assert_eq!(Ipv4Address::from_str("10.0.0.256"), Err(()));
        assert_eq!(Ipv4Address::from_str("10.0.0"), Err(()));
    }

    #[test]
    fn parse_ipv6() {
        assert_eq!(
            Ipv6Address::from_str("::1"),
            Ok(Ipv6Address::from_parts(&[0, 0, 0, 0, 0, 0, 0, 1]))
        );
        assert_eq!(
            Ipv6Address::from_str("fe80::7"),
            Ok(Ipv6Address::from_parts(&[0xfe80, 0, 0, 0, 0, 0, 0, 7]))
        );
        assert_eq!(
            Ipv6Address::from_str("1:2:3:4:5:6:7:8"),
            Ok(Ipv6Address::from_parts(&[1, 2, 3, 4, 5, 6, 7, 8]))
        );
        assert_eq!(Ipv6Address::from_str("1:2:3:4:5:6:7"), Err(()));
        assert_eq!(Ipv6Address::from_str("1:2:3:4:5:6:7:8:9"), Err(()));
        assert_eq!(Ipv6Address::from_str("1::2::3"), Err(()));
        assert_eq!(Ipv6Address::from_str("1:"), Err(()));
        assert_eq!(Ipv6Address::from_str("1::2:"), Err(()));
    }

    #[test]
    fn parse_endpoint() {
        use crate::wire::IpAddress;
        assert_eq!(
            IpEndpoint::from_str("10.0.0.1:80"),
            Ok(IpEndpoint::new(
                IpAddress::Ipv4(Ipv4Address::new(10, 0, 0, 1)),
                80
            ))
        );
        assert_eq!(
            IpEndpoint::from_str("[fe80::1]:443"),
            Ok(IpEndpoint::new(
                IpAddress::Ipv6(Ipv6Address::from_parts(&[0xfe80, 0, 0, 0, 0, 0, 0, 1])),
                443
            ))
        );
        assert_eq!(IpEndpoint::from_str("10.0.0.1:99999"), Err(()));
    }
}
