use crate::models::network::{Asn, AsnLength};
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// AS path segment types (RFC 4271; confederation segments are not
/// interpreted by the codec).
#[derive(Debug, TryFromPrimitive, IntoPrimitive, PartialEq, Eq, Hash, Copy, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum AsSegmentType {
    Set = 1,
    Sequence = 2,
}

/// One element yielded by the AS-path sub-iterator.
///
/// `segment_no` counts segments from 0 in wire order; `as_size` tells which
/// wire width the element was read with (the real-path iterator switches
/// widths when it commutes from AS_PATH to AS4_PATH).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AsPathEntry {
    pub segment_type: AsSegmentType,
    pub segment_no: i32,
    pub as_size: AsnLength,
    pub asn: Asn,
}

/// Maximum AS count of one path segment on the wire.
pub const AS_SEGMENT_COUNT_MAX: usize = 0xff;

/// Segment type + count octets.
pub const AS_SEGMENT_HEADER_SIZE: usize = 2;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_type() {
        assert_eq!(AsSegmentType::try_from(1u8).unwrap(), AsSegmentType::Set);
        assert_eq!(AsSegmentType::try_from(2u8).unwrap(), AsSegmentType::Sequence);
        assert!(AsSegmentType::try_from(3u8).is_err());
    }
}
