use crate::error::BgpError;
use bytes::{BufMut, Bytes, BytesMut};
use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use std::fmt::{Debug, Display, Formatter};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

/// Address family of a [`NetAddr`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AddrFamily {
    #[default]
    Unspec,
    Ipv4,
    Ipv6,
}

impl AddrFamily {
    /// Widest prefix length this family admits, in bits.
    pub const fn max_bitlen(&self) -> u8 {
        match self {
            AddrFamily::Unspec => 0,
            AddrFamily::Ipv4 => 32,
            AddrFamily::Ipv6 => 128,
        }
    }
}

/// Number of bytes needed to store a prefix of `bitlen` bits.
#[inline]
pub const fn netaddr_size(bitlen: u8) -> usize {
    (bitlen as usize + 7) / 8
}

/// A network prefix: family, prefix length in bits and a 16-byte big-endian
/// prefix buffer (IPv4 uses the first 4 bytes).
///
/// Invariant: bits beyond `bitlen` are zero. All constructors and parsers
/// normalize, so two equal prefixes are always byte-wise equal.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NetAddr {
    family: AddrFamily,
    bitlen: u8,
    bytes: [u8; 16],
}

impl NetAddr {
    /// Builds an IPv4 prefix, zeroing any bits beyond `bitlen`.
    pub fn new_v4(addr: Ipv4Addr, bitlen: u8) -> NetAddr {
        debug_assert!(bitlen <= 32);
        let mut bytes = [0u8; 16];
        bytes[..4].copy_from_slice(&addr.octets());
        let mut res = NetAddr {
            family: AddrFamily::Ipv4,
            bitlen,
            bytes,
        };
        res.normalize();
        res
    }

    /// Builds an IPv6 prefix, zeroing any bits beyond `bitlen`.
    pub fn new_v6(addr: Ipv6Addr, bitlen: u8) -> NetAddr {
        debug_assert!(bitlen <= 128);
        let mut res = NetAddr {
            family: AddrFamily::Ipv6,
            bitlen,
            bytes: addr.octets(),
        };
        res.normalize();
        res
    }

    /// Builds a prefix from raw wire bytes (`⌈bitlen/8⌉` of them are read).
    pub fn from_wire(family: AddrFamily, bitlen: u8, data: &[u8]) -> Option<NetAddr> {
        if bitlen > family.max_bitlen() {
            return None;
        }
        let n = netaddr_size(bitlen);
        if data.len() < n {
            return None;
        }
        let mut bytes = [0u8; 16];
        bytes[..n].copy_from_slice(&data[..n]);
        let mut res = NetAddr {
            family,
            bitlen,
            bytes,
        };
        res.normalize();
        Some(res)
    }

    pub const fn family(&self) -> AddrFamily {
        self.family
    }

    pub const fn bitlen(&self) -> u8 {
        self.bitlen
    }

    /// Raw prefix buffer; only the first [`netaddr_size`]`(bitlen)` bytes
    /// carry prefix bits.
    pub const fn octets(&self) -> &[u8; 16] {
        &self.bytes
    }

    /// Prefix bytes on the wire (`⌈bitlen/8⌉` bytes).
    pub fn wire_bytes(&self) -> &[u8] {
        &self.bytes[..netaddr_size(self.bitlen)]
    }

    /// Value of the prefix bit at `pos` (0 = most significant).
    #[inline]
    pub fn bit(&self, pos: u8) -> bool {
        self.bytes[(pos >> 3) as usize] & (0x80 >> (pos & 0x07)) != 0
    }

    /// Big-endian 32-bit limbs of the prefix buffer, used for fast
    /// divergence-bit computation.
    #[inline]
    pub fn limbs(&self) -> [u32; 4] {
        let b = &self.bytes;
        [
            u32::from_be_bytes([b[0], b[1], b[2], b[3]]),
            u32::from_be_bytes([b[4], b[5], b[6], b[7]]),
            u32::from_be_bytes([b[8], b[9], b[10], b[11]]),
            u32::from_be_bytes([b[12], b[13], b[14], b[15]]),
        ]
    }

    /// True when `self` covers `other` (i.e. `other` is equal to or more
    /// specific than `self`). Families must match.
    pub fn covers(&self, other: &NetAddr) -> bool {
        self.family == other.family
            && self.bitlen <= other.bitlen
            && prefix_eq_at(self, other, self.bitlen)
    }

    /// Copy of this prefix truncated to `bitlen` bits.
    pub fn truncated(&self, bitlen: u8) -> NetAddr {
        debug_assert!(bitlen <= self.bitlen);
        let mut res = *self;
        res.bitlen = bitlen;
        res.normalize();
        res
    }

    /// Zero out any bits beyond `bitlen`.
    fn normalize(&mut self) {
        let n = netaddr_size(self.bitlen);
        let partial = self.bitlen & 0x07;
        if partial != 0 {
            self.bytes[n - 1] &= 0xffu8 << (8 - partial);
        }
        for b in &mut self.bytes[n..] {
            *b = 0;
        }
    }

    /// The address part as a std IP address.
    pub fn addr(&self) -> Option<IpAddr> {
        match self.family {
            AddrFamily::Ipv4 => {
                let mut o = [0u8; 4];
                o.copy_from_slice(&self.bytes[..4]);
                Some(IpAddr::V4(Ipv4Addr::from(o)))
            }
            AddrFamily::Ipv6 => Some(IpAddr::V6(Ipv6Addr::from(self.bytes))),
            AddrFamily::Unspec => None,
        }
    }

    /// Converts to an [`IpNet`], if the family is specified.
    pub fn to_ipnet(&self) -> Option<IpNet> {
        match self.addr()? {
            IpAddr::V4(a) => Ipv4Net::new(a, self.bitlen).ok().map(IpNet::V4),
            IpAddr::V6(a) => Ipv6Net::new(a, self.bitlen).ok().map(IpNet::V6),
        }
    }

    /// Renders without the `/bitlen` suffix.
    pub fn to_plain_string(&self) -> String {
        match self.addr() {
            Some(a) => a.to_string(),
            None => String::from("unspec"),
        }
    }

    /// Encodes the prefix as a classic NLRI entry (length octet followed by
    /// `⌈bitlen/8⌉` prefix bytes).
    pub fn encode_nlri(&self) -> Bytes {
        let mut bytes = BytesMut::with_capacity(1 + netaddr_size(self.bitlen));
        bytes.put_u8(self.bitlen);
        bytes.put_slice(self.wire_bytes());
        bytes.freeze()
    }
}

/// True when the first `bits` bits of `a` and `b` are equal.
///
/// Byte-wise compare over the full bytes plus a mask on the residual bits.
pub(crate) fn prefix_eq_at(a: &NetAddr, b: &NetAddr, bits: u8) -> bool {
    let n = (bits >> 3) as usize;
    if a.bytes[..n] != b.bytes[..n] {
        return false;
    }
    let partial = bits & 0x07;
    if partial == 0 {
        return true;
    }
    let mask = 0xffu8 << (8 - partial);
    (a.bytes[n] & mask) == (b.bytes[n] & mask)
}

/// Deduce the address family from a textual representation.
///
/// Scans up to the first four characters: a `.` means an IPv4 candidate, a
/// `:` an IPv6 one. A candidate is not necessarily valid; only parsing
/// decides that. A valid address always matches the family returned here.
pub fn str_addr_family(s: &str) -> AddrFamily {
    for (i, c) in s.chars().enumerate() {
        if c == '.' {
            return AddrFamily::Ipv4;
        }
        if c == ':' {
            return AddrFamily::Ipv6;
        }
        if i == 4 {
            break;
        }
    }
    AddrFamily::Unspec
}

impl From<IpNet> for NetAddr {
    fn from(net: IpNet) -> Self {
        match net {
            IpNet::V4(n) => NetAddr::new_v4(n.addr(), n.prefix_len()),
            IpNet::V6(n) => NetAddr::new_v6(n.addr(), n.prefix_len()),
        }
    }
}

impl From<IpAddr> for NetAddr {
    fn from(addr: IpAddr) -> Self {
        match addr {
            IpAddr::V4(a) => NetAddr::new_v4(a, 32),
            IpAddr::V6(a) => NetAddr::new_v6(a, 128),
        }
    }
}

impl FromStr for NetAddr {
    type Err = BgpError;

    /// Parses `A.B.C.D[/n]` or `h:h:...::h[/n]`; a missing `/n` means a
    /// host route.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr_part, len_part) = match s.split_once('/') {
            Some((a, l)) => (a, Some(l)),
            None => (s, None),
        };

        match str_addr_family(addr_part) {
            AddrFamily::Ipv4 => {
                let addr = Ipv4Addr::from_str(addr_part).map_err(|_| BgpError::BadNlri)?;
                let bitlen = match len_part {
                    Some(l) => l.parse::<u8>().map_err(|_| BgpError::BadNlri)?,
                    None => 32,
                };
                if bitlen > 32 {
                    return Err(BgpError::BadNlri);
                }
                Ok(NetAddr::new_v4(addr, bitlen))
            }
            AddrFamily::Ipv6 => {
                let addr = Ipv6Addr::from_str(addr_part).map_err(|_| BgpError::BadNlri)?;
                let bitlen = match len_part {
                    Some(l) => l.parse::<u8>().map_err(|_| BgpError::BadNlri)?,
                    None => 128,
                };
                if bitlen > 128 {
                    return Err(BgpError::BadNlri);
                }
                Ok(NetAddr::new_v6(addr, bitlen))
            }
            AddrFamily::Unspec => Err(BgpError::BadNlri),
        }
    }
}

impl Display for NetAddr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.to_plain_string(), self.bitlen)
    }
}

impl Debug for NetAddr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

/// A [`NetAddr`] extended with a 32-bit Add-Path identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NetAddrAp {
    pub addr: NetAddr,
    pub path_id: u32,
}

impl NetAddrAp {
    pub fn new(addr: NetAddr, path_id: u32) -> NetAddrAp {
        NetAddrAp { addr, path_id }
    }
}

impl From<NetAddr> for NetAddrAp {
    fn from(addr: NetAddr) -> Self {
        NetAddrAp { addr, path_id: 0 }
    }
}

impl Display for NetAddrAp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.path_id != 0 {
            write!(f, "{}#{}", self.addr, self.path_id)
        } else {
            write!(f, "{}", self.addr)
        }
    }
}
