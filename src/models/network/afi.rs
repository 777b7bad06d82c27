use crate::models::network::AddrFamily;
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// AFI -- Address Family Identifier
///
/// <https://www.iana.org/assignments/address-family-numbers/address-family-numbers.xhtml>
#[derive(Debug, TryFromPrimitive, IntoPrimitive, PartialEq, Eq, Hash, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u16)]
pub enum Afi {
    Ipv4 = 1,
    Ipv6 = 2,
}

impl Afi {
    pub const fn family(&self) -> AddrFamily {
        match self {
            Afi::Ipv4 => AddrFamily::Ipv4,
            Afi::Ipv6 => AddrFamily::Ipv6,
        }
    }
}

impl From<Afi> for AddrFamily {
    fn from(afi: Afi) -> Self {
        afi.family()
    }
}

/// SAFI -- Subsequent Address Family Identifier
///
/// Only unicast and multicast NLRI streams are iterable; other SAFIs cause
/// the update sub-iterators to report a malformed field.
#[derive(Debug, TryFromPrimitive, IntoPrimitive, PartialEq, Eq, Hash, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum Safi {
    Unicast = 1,
    Multicast = 2,
}
