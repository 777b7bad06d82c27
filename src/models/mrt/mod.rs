//! MRT envelope model types (RFC 6396, RFC 6397, RFC 8050).

use crate::models::network::{Afi, Asn};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::net::IpAddr;

/// MRT record types.
///
/// <https://www.iana.org/assignments/mrt/mrt.xhtml>
#[allow(non_camel_case_types)]
#[derive(Debug, TryFromPrimitive, IntoPrimitive, Copy, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u16)]
pub enum MrtType {
    OSPFv2 = 11,
    TABLE_DUMP = 12,
    TABLE_DUMP_V2 = 13,
    BGP4MP = 16,
    BGP4MP_ET = 17,
    ISIS = 32,
    ISIS_ET = 33,
    OSPFv3 = 48,
    OSPFv3_ET = 49,
}

impl MrtType {
    /// Records of `_ET` types carry a 4-byte microsecond timestamp
    /// extension right after the fixed header.
    pub const fn is_extended(&self) -> bool {
        matches!(self, MrtType::BGP4MP_ET | MrtType::ISIS_ET | MrtType::OSPFv3_ET)
    }
}

/// BGP4MP subtype codes (RFC 6396 §4.2, RFC 8050).
#[allow(non_camel_case_types)]
#[derive(Debug, TryFromPrimitive, IntoPrimitive, Copy, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u16)]
pub enum Bgp4mpSubtype {
    StateChange = 0,
    Message = 1,
    MessageAs4 = 4,
    StateChangeAs4 = 5,
    MessageLocal = 6,
    MessageAs4Local = 7,
    MessageAddpath = 8,
    MessageAs4Addpath = 9,
    MessageLocalAddpath = 10,
    MessageAs4LocalAddpath = 11,
}

impl Bgp4mpSubtype {
    /// True for the subtypes that wrap a verbatim BGP message.
    pub const fn is_message(&self) -> bool {
        !matches!(self, Bgp4mpSubtype::StateChange | Bgp4mpSubtype::StateChangeAs4)
    }

    /// True when peer/local AS fields are 4 octets wide.
    pub const fn is_asn32(&self) -> bool {
        matches!(
            self,
            Bgp4mpSubtype::MessageAs4
                | Bgp4mpSubtype::StateChangeAs4
                | Bgp4mpSubtype::MessageAs4Local
                | Bgp4mpSubtype::MessageAs4Addpath
                | Bgp4mpSubtype::MessageAs4LocalAddpath
        )
    }

    /// True when the wrapped message carries Add-Path identifiers.
    pub const fn is_addpath(&self) -> bool {
        matches!(
            self,
            Bgp4mpSubtype::MessageAddpath
                | Bgp4mpSubtype::MessageAs4Addpath
                | Bgp4mpSubtype::MessageLocalAddpath
                | Bgp4mpSubtype::MessageAs4LocalAddpath
        )
    }
}

/// TABLE_DUMPv2 subtype codes (RFC 6396 §4.3, RFC 6397, RFC 8050).
#[allow(non_camel_case_types)]
#[derive(Debug, TryFromPrimitive, IntoPrimitive, Copy, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u16)]
pub enum TableDumpV2Subtype {
    PeerIndexTable = 1,
    RibIpv4Unicast = 2,
    RibIpv4Multicast = 3,
    RibIpv6Unicast = 4,
    RibIpv6Multicast = 5,
    RibGeneric = 6,
    GeoPeerTable = 7,
    RibIpv4UnicastAddpath = 8,
    RibIpv4MulticastAddpath = 9,
    RibIpv6UnicastAddpath = 10,
    RibIpv6MulticastAddpath = 11,
    RibGenericAddpath = 12,
}

impl TableDumpV2Subtype {
    pub const fn is_addpath(&self) -> bool {
        matches!(
            self,
            TableDumpV2Subtype::RibIpv4UnicastAddpath
                | TableDumpV2Subtype::RibIpv4MulticastAddpath
                | TableDumpV2Subtype::RibIpv6UnicastAddpath
                | TableDumpV2Subtype::RibIpv6MulticastAddpath
                | TableDumpV2Subtype::RibGenericAddpath
        )
    }

    pub const fn afi(&self) -> Option<Afi> {
        match self {
            TableDumpV2Subtype::RibIpv4Unicast
            | TableDumpV2Subtype::RibIpv4Multicast
            | TableDumpV2Subtype::RibIpv4UnicastAddpath
            | TableDumpV2Subtype::RibIpv4MulticastAddpath => Some(Afi::Ipv4),
            TableDumpV2Subtype::RibIpv6Unicast
            | TableDumpV2Subtype::RibIpv6Multicast
            | TableDumpV2Subtype::RibIpv6UnicastAddpath
            | TableDumpV2Subtype::RibIpv6MulticastAddpath => Some(Afi::Ipv6),
            _ => None,
        }
    }
}

/// MRT common header.
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           Timestamp                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |             Type              |            Subtype            |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                             Length                            |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// `_ET` types follow with a 4-byte microsecond timestamp which is part of
/// `length` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MrtHeader {
    pub timestamp: u32,
    pub mrt_type: MrtType,
    pub subtype: u16,
    /// Body length as carried on the wire (microsecond extension included).
    pub length: u32,
    pub microseconds: Option<u32>,
}

/// Fixed header size in bytes, microsecond extension excluded.
pub const MRT_HEADER_SIZE: usize = 12;

/// Peer view of a BGP4MP message record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Bgp4mpPeer {
    pub peer_as: Asn,
    pub local_as: Asn,
    pub interface_index: u16,
    pub afi: Afi,
    pub peer_addr: IpAddr,
    pub local_addr: IpAddr,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extended_types() {
        assert!(MrtType::BGP4MP_ET.is_extended());
        assert!(!MrtType::BGP4MP.is_extended());
        assert!(!MrtType::TABLE_DUMP_V2.is_extended());
    }

    #[test]
    fn test_bgp4mp_subtype_classes() {
        assert!(Bgp4mpSubtype::Message.is_message());
        assert!(!Bgp4mpSubtype::StateChange.is_message());
        assert!(Bgp4mpSubtype::MessageAs4.is_asn32());
        assert!(!Bgp4mpSubtype::Message.is_asn32());
        assert!(Bgp4mpSubtype::MessageAs4Addpath.is_addpath());
        assert!(!Bgp4mpSubtype::MessageAs4.is_addpath());
    }

    #[test]
    fn test_table_dump_v2_afi() {
        assert_eq!(TableDumpV2Subtype::RibIpv6Unicast.afi(), Some(Afi::Ipv6));
        assert_eq!(TableDumpV2Subtype::RibIpv4UnicastAddpath.afi(), Some(Afi::Ipv4));
        assert_eq!(TableDumpV2Subtype::PeerIndexTable.afi(), None);
        assert!(TableDumpV2Subtype::RibIpv6UnicastAddpath.is_addpath());
    }
}
