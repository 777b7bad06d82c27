use bitflags::bitflags;

bitflags! {
    /// The attribute flags octet (RFC 4271, Section 4.3).
    ///
    /// The fourth high-order bit is the Extended Length bit: it selects a
    /// 2-byte attribute length field instead of a 1-byte one. Every length
    /// read or write in the codec goes through this bit.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct AttrFlags: u8 {
        const OPTIONAL   = 0b10000000;
        const TRANSITIVE = 0b01000000;
        const PARTIAL    = 0b00100000;
        const EXTENDED   = 0b00010000;
    }
}

/// Path attribute type codes relevant to the codec.
///
/// <https://www.iana.org/assignments/bgp-parameters/bgp-parameters.xhtml#bgp-parameters-2>
#[allow(non_camel_case_types)]
#[derive(Debug, PartialEq, Eq, Hash, Copy, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AttrType {
    ORIGIN,
    AS_PATH,
    NEXT_HOP,
    MULTI_EXIT_DISC,
    LOCAL_PREF,
    ATOMIC_AGGREGATE,
    AGGREGATOR,
    COMMUNITIES,
    /// <https://tools.ietf.org/html/rfc4456>
    ORIGINATOR_ID,
    /// <https://tools.ietf.org/html/rfc4760>
    MP_REACH_NLRI,
    MP_UNREACH_NLRI,
    /// <https://datatracker.ietf.org/doc/html/rfc4360>
    EXTENDED_COMMUNITIES,
    AS4_PATH,
    AS4_AGGREGATOR,
    LARGE_COMMUNITIES,
    /// Catch all for any other attribute code.
    Unknown(u8),
}

impl From<u8> for AttrType {
    fn from(value: u8) -> Self {
        match value {
            1 => AttrType::ORIGIN,
            2 => AttrType::AS_PATH,
            3 => AttrType::NEXT_HOP,
            4 => AttrType::MULTI_EXIT_DISC,
            5 => AttrType::LOCAL_PREF,
            6 => AttrType::ATOMIC_AGGREGATE,
            7 => AttrType::AGGREGATOR,
            8 => AttrType::COMMUNITIES,
            9 => AttrType::ORIGINATOR_ID,
            14 => AttrType::MP_REACH_NLRI,
            15 => AttrType::MP_UNREACH_NLRI,
            16 => AttrType::EXTENDED_COMMUNITIES,
            17 => AttrType::AS4_PATH,
            18 => AttrType::AS4_AGGREGATOR,
            32 => AttrType::LARGE_COMMUNITIES,
            x => AttrType::Unknown(x),
        }
    }
}

impl From<AttrType> for u8 {
    fn from(value: AttrType) -> Self {
        match value {
            AttrType::ORIGIN => 1,
            AttrType::AS_PATH => 2,
            AttrType::NEXT_HOP => 3,
            AttrType::MULTI_EXIT_DISC => 4,
            AttrType::LOCAL_PREF => 5,
            AttrType::ATOMIC_AGGREGATE => 6,
            AttrType::AGGREGATOR => 7,
            AttrType::COMMUNITIES => 8,
            AttrType::ORIGINATOR_ID => 9,
            AttrType::MP_REACH_NLRI => 14,
            AttrType::MP_UNREACH_NLRI => 15,
            AttrType::EXTENDED_COMMUNITIES => 16,
            AttrType::AS4_PATH => 17,
            AttrType::AS4_AGGREGATOR => 18,
            AttrType::LARGE_COMMUNITIES => 32,
            AttrType::Unknown(x) => x,
        }
    }
}

/// Origin attribute values (RFC 4271).
#[derive(Debug, PartialEq, Eq, Hash, Copy, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum Origin {
    Igp = 0,
    Egp = 1,
    Incomplete = 2,
}

impl TryFrom<u8> for Origin {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Origin::Igp),
            1 => Ok(Origin::Egp),
            2 => Ok(Origin::Incomplete),
            x => Err(x),
        }
    }
}

/// The twelve attributes whose byte offsets are cached per open message so
/// repeated lookups are O(1).
#[derive(Debug, PartialEq, Eq, Hash, Copy, Clone)]
pub enum NotableAttr {
    AsPath = 0,
    Origin = 1,
    AtomicAggregate = 2,
    Aggregator = 3,
    NextHop = 4,
    Communities = 5,
    MpReach = 6,
    MpUnreach = 7,
    ExtendedCommunities = 8,
    As4Path = 9,
    As4Aggregator = 10,
    LargeCommunities = 11,
}

/// Number of slots in the notable-attribute offset table.
pub const NOTABLE_COUNT: usize = 12;

impl NotableAttr {
    /// Maps an attribute code to its offset-table slot, if notable.
    pub const fn from_code(code: u8) -> Option<NotableAttr> {
        match code {
            2 => Some(NotableAttr::AsPath),
            1 => Some(NotableAttr::Origin),
            6 => Some(NotableAttr::AtomicAggregate),
            7 => Some(NotableAttr::Aggregator),
            3 => Some(NotableAttr::NextHop),
            8 => Some(NotableAttr::Communities),
            14 => Some(NotableAttr::MpReach),
            15 => Some(NotableAttr::MpUnreach),
            16 => Some(NotableAttr::ExtendedCommunities),
            17 => Some(NotableAttr::As4Path),
            18 => Some(NotableAttr::As4Aggregator),
            32 => Some(NotableAttr::LargeCommunities),
            _ => None,
        }
    }

    pub const fn code(&self) -> u8 {
        match self {
            NotableAttr::AsPath => 2,
            NotableAttr::Origin => 1,
            NotableAttr::AtomicAggregate => 6,
            NotableAttr::Aggregator => 7,
            NotableAttr::NextHop => 3,
            NotableAttr::Communities => 8,
            NotableAttr::MpReach => 14,
            NotableAttr::MpUnreach => 15,
            NotableAttr::ExtendedCommunities => 16,
            NotableAttr::As4Path => 17,
            NotableAttr::As4Aggregator => 18,
            NotableAttr::LargeCommunities => 32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_round_trip() {
        for code in 0u8..=255 {
            let ty = AttrType::from(code);
            assert_eq!(u8::from(ty), code);
        }
    }

    #[test]
    fn test_notable_mapping() {
        for slot in [
            NotableAttr::AsPath,
            NotableAttr::Origin,
            NotableAttr::AtomicAggregate,
            NotableAttr::Aggregator,
            NotableAttr::NextHop,
            NotableAttr::Communities,
            NotableAttr::MpReach,
            NotableAttr::MpUnreach,
            NotableAttr::ExtendedCommunities,
            NotableAttr::As4Path,
            NotableAttr::As4Aggregator,
            NotableAttr::LargeCommunities,
        ] {
            assert_eq!(NotableAttr::from_code(slot.code()), Some(slot));
            assert!((slot as usize) < NOTABLE_COUNT);
        }
        // MULTI_EXIT_DISC and LOCAL_PREF are decodable but not cached
        assert_eq!(NotableAttr::from_code(4), None);
        assert_eq!(NotableAttr::from_code(5), None);
    }

    #[test]
    fn test_flags() {
        let flags = AttrFlags::OPTIONAL | AttrFlags::TRANSITIVE;
        assert_eq!(flags.bits(), 0xc0);
        assert!(!flags.contains(AttrFlags::EXTENDED));
    }
}
