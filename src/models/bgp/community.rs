use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// A regular community attribute value (RFC 1997).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Community(pub u32);

impl Community {
    pub const PLANNED_SHUT: Community = Community(0xffff0000);
    /// RFC 7611
    pub const ACCEPT_OWN: Community = Community(0xffff0001);
    pub const ROUTE_FILTER_TRANSLATED_V4: Community = Community(0xffff0002);
    pub const ROUTE_FILTER_V4: Community = Community(0xffff0003);
    pub const ROUTE_FILTER_TRANSLATED_V6: Community = Community(0xffff0004);
    pub const ROUTE_FILTER_V6: Community = Community(0xffff0005);
    pub const LLGR_STALE: Community = Community(0xffff0006);
    pub const NO_LLGR: Community = Community(0xffff0007);
    pub const ACCEPT_OWN_NEXTHOP: Community = Community(0xffff0008);
    /// RFC 7999
    pub const BLACKHOLE: Community = Community(0xffff029a);
    /// RFC 1997
    pub const NO_EXPORT: Community = Community(0xffffff01);
    pub const NO_ADVERTISE: Community = Community(0xffffff02);
    pub const NO_EXPORT_SUBCONFED: Community = Community(0xffffff03);
    /// RFC 3765
    pub const NO_PEER: Community = Community(0xffffff04);

    /// Well-known name, when there is one.
    pub const fn well_known_name(&self) -> Option<&'static str> {
        match self.0 {
            0xffff0000 => Some("PLANNED_SHUT"),
            0xffff0001 => Some("ACCEPT_OWN"),
            0xffff0002 => Some("ROUTE_FILTER_TRANSLATED_V4"),
            0xffff0003 => Some("ROUTE_FILTER_V4"),
            0xffff0004 => Some("ROUTE_FILTER_TRANSLATED_V6"),
            0xffff0005 => Some("ROUTE_FILTER_V6"),
            0xffff0006 => Some("LLGR_STALE"),
            0xffff0007 => Some("NO_LLGR"),
            0xffff0008 => Some("ACCEPT_OWN_NEXTHOP"),
            0xffff029a => Some("BLACKHOLE"),
            0xffffff01 => Some("NO_EXPORT"),
            0xffffff02 => Some("NO_ADVERTISE"),
            0xffffff03 => Some("NO_EXPORT_SUBCONFED"),
            0xffffff04 => Some("NO_PEER"),
            _ => None,
        }
    }

    pub const fn asn(&self) -> u16 {
        (self.0 >> 16) as u16
    }

    pub const fn value(&self) -> u16 {
        self.0 as u16
    }
}

impl From<u32> for Community {
    fn from(v: u32) -> Self {
        Community(v)
    }
}

/// Parses a decimal with the leading-zero rule: a lone `0` is fine, `042`
/// is not.
fn parse_decimal<T: FromStr>(s: &str) -> Option<T> {
    if s.is_empty() || (s.len() > 1 && s.starts_with('0')) {
        return None;
    }
    if !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse::<T>().ok()
}

impl FromStr for Community {
    type Err = ();

    /// Accepts a well-known name (`NO_EXPORT`, `BLACKHOLE`, ...), the
    /// `ASN:value` notation, or a plain decimal fallback.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let named = match s {
            "PLANNED_SHUT" => Some(Community::PLANNED_SHUT),
            "ACCEPT_OWN" => Some(Community::ACCEPT_OWN),
            "ROUTE_FILTER_TRANSLATED_V4" => Some(Community::ROUTE_FILTER_TRANSLATED_V4),
            "ROUTE_FILTER_V4" => Some(Community::ROUTE_FILTER_V4),
            "ROUTE_FILTER_TRANSLATED_V6" => Some(Community::ROUTE_FILTER_TRANSLATED_V6),
            "ROUTE_FILTER_V6" => Some(Community::ROUTE_FILTER_V6),
            "LLGR_STALE" => Some(Community::LLGR_STALE),
            "NO_LLGR" => Some(Community::NO_LLGR),
            "ACCEPT_OWN_NEXTHOP" => Some(Community::ACCEPT_OWN_NEXTHOP),
            "BLACKHOLE" => Some(Community::BLACKHOLE),
            "NO_EXPORT" => Some(Community::NO_EXPORT),
            "NO_ADVERTISE" => Some(Community::NO_ADVERTISE),
            "NO_EXPORT_SUBCONFED" => Some(Community::NO_EXPORT_SUBCONFED),
            "NO_PEER" => Some(Community::NO_PEER),
            _ => None,
        };
        if let Some(c) = named {
            return Ok(c);
        }

        if let Some((hi, lo)) = s.split_once(':') {
            let asn: u16 = parse_decimal(hi).ok_or(())?;
            let val: u16 = parse_decimal(lo).ok_or(())?;
            return Ok(Community(((asn as u32) << 16) | val as u32));
        }

        parse_decimal::<u32>(s).map(Community).ok_or(())
    }
}

impl Display for Community {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if let Some(name) = self.well_known_name() {
            write!(f, "{name}")
        } else {
            write!(f, "{}:{}", self.asn(), self.value())
        }
    }
}

/// An extended community attribute value (RFC 4360): 8 opaque bytes kept in
/// wire order within a `u64`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ExtendedCommunity(pub u64);

impl ExtendedCommunity {
    /// Notable bit inside the high-order type octet.
    pub const TRANSITIVE_BIT: u8 = 1 << 6;

    pub const fn from_bytes(bytes: [u8; 8]) -> ExtendedCommunity {
        ExtendedCommunity(u64::from_be_bytes(bytes))
    }

    pub const fn to_bytes(&self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    pub const fn high_type(&self) -> u8 {
        (self.0 >> 56) as u8
    }

    pub const fn is_transitive(&self) -> bool {
        self.high_type() & Self::TRANSITIVE_BIT == 0
    }

    /// Low-order six bytes, the community body.
    pub const fn opaque_value(&self) -> u64 {
        self.0 & 0x0000_ffff_ffff_ffff
    }
}

impl From<u64> for ExtendedCommunity {
    fn from(v: u64) -> Self {
        ExtendedCommunity(v)
    }
}

impl Display for ExtendedCommunity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

/// A large community attribute value (RFC 8092).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LargeCommunity {
    pub global: u32,
    pub hi_local: u32,
    pub lo_local: u32,
}

impl LargeCommunity {
    pub const fn new(global: u32, hi_local: u32, lo_local: u32) -> LargeCommunity {
        LargeCommunity {
            global,
            hi_local,
            lo_local,
        }
    }
}

impl FromStr for LargeCommunity {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut it = s.split(':');
        let global = parse_decimal(it.next().ok_or(())?).ok_or(())?;
        let hi_local = parse_decimal(it.next().ok_or(())?).ok_or(())?;
        let lo_local = parse_decimal(it.next().ok_or(())?).ok_or(())?;
        if it.next().is_some() {
            return Err(());
        }
        Ok(LargeCommunity::new(global, hi_local, lo_local))
    }
}

impl Display for LargeCommunity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.global, self.hi_local, self.lo_local)
    }
}
