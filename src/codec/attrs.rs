//! Path-attribute builders and readers.
//!
//! Every `make_*` helper produces a finished [`Attr`] (flags, code, length
//! discipline included); every `get_*` helper asserts the attribute code
//! before decoding. Length fields always follow the extended-length rule:
//! two bytes when [`AttrFlags::EXTENDED`] is set, one byte otherwise.

use crate::codec::bgp::Attr;
use crate::error::BgpError;
use crate::models::bgp::{
    AsSegmentType, AttrFlags, AttrType, Community, ExtendedCommunity, LargeCommunity, Origin,
    AS_SEGMENT_COUNT_MAX,
};
use crate::models::network::{Afi, Asn, Safi};
use bytes::{BufMut, Bytes, BytesMut};
use std::net::Ipv4Addr;

const WELL_KNOWN: AttrFlags = AttrFlags::TRANSITIVE;
const OPTIONAL: AttrFlags = AttrFlags::OPTIONAL;
const OPTIONAL_TRANSITIVE: AttrFlags = AttrFlags::OPTIONAL.union(AttrFlags::TRANSITIVE);

fn expect_code(attr: &Attr, ty: AttrType) -> Result<(), BgpError> {
    if attr.attr_type() != ty {
        return Err(BgpError::BadAttribute);
    }
    Ok(())
}

fn get_u32_value(attr: &Attr, ty: AttrType) -> Result<u32, BgpError> {
    expect_code(attr, ty)?;
    // the value area begins right after the attribute header; four bytes
    let v = &attr.value;
    if v.len() != 4 {
        return Err(BgpError::BadAttribute);
    }
    Ok(u32::from_be_bytes([v[0], v[1], v[2], v[3]]))
}

// -- ORIGIN -------------------------------------------------------------------

pub fn make_origin(origin: Origin) -> Attr {
    Attr::new(
        WELL_KNOWN,
        AttrType::ORIGIN.into(),
        Bytes::copy_from_slice(&[origin as u8]),
    )
}

pub fn get_origin(attr: &Attr) -> Result<Origin, BgpError> {
    expect_code(attr, AttrType::ORIGIN)?;
    if attr.value.len() != 1 {
        return Err(BgpError::BadAttribute);
    }
    Origin::try_from(attr.value[0]).map_err(|_| BgpError::BadAttribute)
}

// -- NEXT_HOP -----------------------------------------------------------------

pub fn make_next_hop(addr: Ipv4Addr) -> Attr {
    Attr::new(
        WELL_KNOWN,
        AttrType::NEXT_HOP.into(),
        Bytes::copy_from_slice(&addr.octets()),
    )
}

pub fn get_next_hop(attr: &Attr) -> Result<Ipv4Addr, BgpError> {
    expect_code(attr, AttrType::NEXT_HOP)?;
    let v = &attr.value;
    if v.len() != 4 {
        return Err(BgpError::BadAttribute);
    }
    Ok(Ipv4Addr::new(v[0], v[1], v[2], v[3]))
}

// -- MULTI_EXIT_DISC / LOCAL_PREF ---------------------------------------------

pub fn make_med(med: u32) -> Attr {
    Attr::new(
        OPTIONAL,
        AttrType::MULTI_EXIT_DISC.into(),
        Bytes::copy_from_slice(&med.to_be_bytes()),
    )
}

pub fn get_med(attr: &Attr) -> Result<u32, BgpError> {
    get_u32_value(attr, AttrType::MULTI_EXIT_DISC)
}

pub fn make_local_pref(pref: u32) -> Attr {
    Attr::new(
        WELL_KNOWN,
        AttrType::LOCAL_PREF.into(),
        Bytes::copy_from_slice(&pref.to_be_bytes()),
    )
}

pub fn get_local_pref(attr: &Attr) -> Result<u32, BgpError> {
    get_u32_value(attr, AttrType::LOCAL_PREF)
}

// -- ATOMIC_AGGREGATE ---------------------------------------------------------

pub fn make_atomic_aggregate() -> Attr {
    Attr::new(WELL_KNOWN, AttrType::ATOMIC_AGGREGATE.into(), Bytes::new())
}

// -- AGGREGATOR ---------------------------------------------------------------

pub fn make_aggregator(asn: Asn, addr: Ipv4Addr, asn32: bool) -> Attr {
    let mut value = BytesMut::with_capacity(8);
    if asn32 {
        value.put_u32(asn.get());
    } else {
        value.put_u16(asn.get() as u16);
    }
    value.put_slice(&addr.octets());
    Attr::new(OPTIONAL_TRANSITIVE, AttrType::AGGREGATOR.into(), value.freeze())
}

pub fn make_as4_aggregator(asn: Asn, addr: Ipv4Addr) -> Attr {
    let mut value = BytesMut::with_capacity(8);
    value.put_u32(asn.get());
    value.put_slice(&addr.octets());
    Attr::new(
        OPTIONAL_TRANSITIVE,
        AttrType::AS4_AGGREGATOR.into(),
        value.freeze(),
    )
}

/// AS number of an AGGREGATOR or AS4_AGGREGATOR attribute; the wire width
/// follows from the value size.
pub fn aggregator_as(attr: &Attr) -> Result<Asn, BgpError> {
    if attr.attr_type() != AttrType::AGGREGATOR && attr.attr_type() != AttrType::AS4_AGGREGATOR {
        return Err(BgpError::BadAttribute);
    }
    let v = &attr.value;
    match v.len() {
        6 => Ok(Asn::new(u16::from_be_bytes([v[0], v[1]]) as u32)),
        8 => Ok(Asn::new(u32::from_be_bytes([v[0], v[1], v[2], v[3]]))),
        _ => Err(BgpError::BadAttribute),
    }
}

/// Aggregating node address of an AGGREGATOR-family attribute.
pub fn aggregator_addr(attr: &Attr) -> Result<Ipv4Addr, BgpError> {
    let v = &attr.value;
    let off = match v.len() {
        6 => 2,
        8 => 4,
        _ => return Err(BgpError::BadAttribute),
    };
    Ok(Ipv4Addr::new(v[off], v[off + 1], v[off + 2], v[off + 3]))
}

// -- ORIGINATOR_ID ------------------------------------------------------------

/// Builds an ORIGINATOR_ID attribute: flags, code, length and the 4-byte
/// identifier are all written into the returned buffer.
pub fn make_originator_id(id: Ipv4Addr) -> Attr {
    Attr::new(
        OPTIONAL,
        AttrType::ORIGINATOR_ID.into(),
        Bytes::copy_from_slice(&id.octets()),
    )
}

pub fn get_originator_id(attr: &Attr) -> Result<Ipv4Addr, BgpError> {
    expect_code(attr, AttrType::ORIGINATOR_ID)?;
    let v = &attr.value;
    if v.len() != 4 {
        return Err(BgpError::BadAttribute);
    }
    Ok(Ipv4Addr::new(v[0], v[1], v[2], v[3]))
}

// -- AS paths -----------------------------------------------------------------

fn attr_capacity(attr: &Attr) -> usize {
    if attr.flags.contains(AttrFlags::EXTENDED) {
        0xffff
    } else {
        0xff
    }
}

fn put_as_segment(attr: &mut Attr, seg_type: AsSegmentType, ases: &[u32], width: usize) -> Result<(), BgpError> {
    if ases.len() > AS_SEGMENT_COUNT_MAX {
        return Err(BgpError::InvalidOp);
    }
    let seg_size = 2 + ases.len() * width;
    if attr.value.len() + seg_size > attr_capacity(attr) {
        return Err(BgpError::InvalidOp);
    }

    let mut value = BytesMut::with_capacity(attr.value.len() + seg_size);
    value.extend_from_slice(&attr.value);
    value.put_u8(seg_type.into());
    value.put_u8(ases.len() as u8);
    for asn in ases {
        if width == 2 {
            value.put_u16(*asn as u16);
        } else {
            value.put_u32(*asn);
        }
    }
    attr.value = value.freeze();
    Ok(())
}

/// Appends a segment of 2-octet ASes, rewriting the attribute length.
pub fn put_as_seg16(attr: &mut Attr, seg_type: AsSegmentType, ases: &[u32]) -> Result<(), BgpError> {
    expect_code(attr, AttrType::AS_PATH)?;
    put_as_segment(attr, seg_type, ases, 2)
}

/// Appends a segment of 4-octet ASes, rewriting the attribute length.
pub fn put_as_seg32(attr: &mut Attr, seg_type: AsSegmentType, ases: &[u32]) -> Result<(), BgpError> {
    if attr.attr_type() != AttrType::AS_PATH && attr.attr_type() != AttrType::AS4_PATH {
        return Err(BgpError::BadAttribute);
    }
    put_as_segment(attr, seg_type, ases, 4)
}

/// Builds an AS_PATH carrying 2-octet ASes.
pub fn make_as_path_16(segments: &[(AsSegmentType, &[u32])]) -> Attr {
    let mut attr = Attr::new(WELL_KNOWN, AttrType::AS_PATH.into(), Bytes::new());
    for (seg_type, ases) in segments {
        put_as_seg16(&mut attr, *seg_type, ases).expect("oversized AS_PATH literal");
    }
    attr
}

/// Builds an AS_PATH carrying 4-octet ASes.
pub fn make_as_path_32(segments: &[(AsSegmentType, &[u32])]) -> Attr {
    let mut attr = Attr::new(WELL_KNOWN, AttrType::AS_PATH.into(), Bytes::new());
    for (seg_type, ases) in segments {
        put_as_seg32(&mut attr, *seg_type, ases).expect("oversized AS_PATH literal");
    }
    attr
}

/// Builds an AS4_PATH (4-octet ASes by definition).
pub fn make_as4_path(segments: &[(AsSegmentType, &[u32])]) -> Attr {
    let mut attr = Attr::new(OPTIONAL_TRANSITIVE, AttrType::AS4_PATH.into(), Bytes::new());
    for (seg_type, ases) in segments {
        put_as_seg32(&mut attr, *seg_type, ases).expect("oversized AS4_PATH literal");
    }
    attr
}

// -- communities --------------------------------------------------------------

fn extend_value(attr: &mut Attr, extra: &[u8]) -> Result<(), BgpError> {
    if attr.value.len() + extra.len() > attr_capacity(attr) {
        return Err(BgpError::InvalidOp);
    }
    let mut value = BytesMut::with_capacity(attr.value.len() + extra.len());
    value.extend_from_slice(&attr.value);
    value.extend_from_slice(extra);
    attr.value = value.freeze();
    Ok(())
}

/// Appends a batch of communities, rewriting the length.
pub fn append_communities(attr: &mut Attr, comms: &[Community]) -> Result<(), BgpError> {
    expect_code(attr, AttrType::COMMUNITIES)?;
    let mut raw = Vec::with_capacity(comms.len() * 4);
    for c in comms {
        raw.extend_from_slice(&c.0.to_be_bytes());
    }
    extend_value(attr, &raw)
}

pub fn make_communities(comms: &[Community]) -> Attr {
    let mut attr = Attr::new(OPTIONAL_TRANSITIVE, AttrType::COMMUNITIES.into(), Bytes::new());
    append_communities(&mut attr, comms).expect("oversized community list");
    attr
}

pub fn append_ex_communities(attr: &mut Attr, comms: &[ExtendedCommunity]) -> Result<(), BgpError> {
    expect_code(attr, AttrType::EXTENDED_COMMUNITIES)?;
    let mut raw = Vec::with_capacity(comms.len() * 8);
    for c in comms {
        raw.extend_from_slice(&c.to_bytes());
    }
    extend_value(attr, &raw)
}

pub fn make_ex_communities(comms: &[ExtendedCommunity]) -> Attr {
    let mut attr = Attr::new(
        OPTIONAL_TRANSITIVE,
        AttrType::EXTENDED_COMMUNITIES.into(),
        Bytes::new(),
    );
    append_ex_communities(&mut attr, comms).expect("oversized community list");
    attr
}

pub fn append_large_communities(attr: &mut Attr, comms: &[LargeCommunity]) -> Result<(), BgpError> {
    expect_code(attr, AttrType::LARGE_COMMUNITIES)?;
    let mut raw = Vec::with_capacity(comms.len() * 12);
    for c in comms {
        raw.extend_from_slice(&c.global.to_be_bytes());
        raw.extend_from_slice(&c.hi_local.to_be_bytes());
        raw.extend_from_slice(&c.lo_local.to_be_bytes());
    }
    extend_value(attr, &raw)
}

pub fn make_large_communities(comms: &[LargeCommunity]) -> Attr {
    let mut attr = Attr::new(
        OPTIONAL_TRANSITIVE,
        AttrType::LARGE_COMMUNITIES.into(),
        Bytes::new(),
    );
    append_large_communities(&mut attr, comms).expect("oversized community list");
    attr
}

// -- multiprotocol ------------------------------------------------------------

/// Builds an MP_REACH_NLRI attribute from its wire parts:
/// AFI, SAFI, next-hop bytes, one reserved byte, then the NLRI stream.
pub fn make_mp_reach(afi: Afi, safi: Safi, next_hop: &[u8], nlri: &[u8]) -> Attr {
    let mut value = BytesMut::with_capacity(5 + next_hop.len() + nlri.len());
    value.put_u16(afi.into());
    value.put_u8(safi.into());
    value.put_u8(next_hop.len() as u8);
    value.put_slice(next_hop);
    value.put_u8(0); // reserved
    value.put_slice(nlri);
    let mut flags = OPTIONAL;
    if value.len() > 0xff {
        flags |= AttrFlags::EXTENDED;
    }
    Attr::new(flags, AttrType::MP_REACH_NLRI.into(), value.freeze())
}

/// Builds an MP_UNREACH_NLRI attribute: AFI, SAFI, withdrawn stream.
pub fn make_mp_unreach(afi: Afi, safi: Safi, withdrawn: &[u8]) -> Attr {
    let mut value = BytesMut::with_capacity(3 + withdrawn.len());
    value.put_u16(afi.into());
    value.put_u8(safi.into());
    value.put_slice(withdrawn);
    let mut flags = OPTIONAL;
    if value.len() > 0xff {
        flags |= AttrFlags::EXTENDED;
    }
    Attr::new(flags, AttrType::MP_UNREACH_NLRI.into(), value.freeze())
}

pub fn mp_afi(attr: &Attr) -> Result<Afi, BgpError> {
    let v = &attr.value;
    if v.len() < 3 {
        return Err(BgpError::BadAttribute);
    }
    Afi::try_from(u16::from_be_bytes([v[0], v[1]])).map_err(|_| BgpError::BadAttribute)
}

pub fn mp_safi(attr: &Attr) -> Result<Safi, BgpError> {
    let v = &attr.value;
    if v.len() < 3 {
        return Err(BgpError::BadAttribute);
    }
    Safi::try_from(v[2]).map_err(|_| BgpError::BadAttribute)
}

/// Next-hop bytes of an MP_REACH_NLRI value.
pub fn mp_next_hop(attr: &Attr) -> Result<&[u8], BgpError> {
    expect_code(attr, AttrType::MP_REACH_NLRI)?;
    let v = &attr.value;
    if v.len() < 5 {
        return Err(BgpError::BadAttribute);
    }
    let n = v[3] as usize;
    if 4 + n > v.len() {
        return Err(BgpError::BadAttribute);
    }
    Ok(&v[4..4 + n])
}

/// NLRI stream of an MP_REACH_NLRI or MP_UNREACH_NLRI value.
pub fn mp_nlri(attr: &Attr) -> Result<&[u8], BgpError> {
    match attr.attr_type() {
        AttrType::MP_REACH_NLRI => {
            let v = &attr.value;
            if v.len() < 5 {
                return Err(BgpError::BadAttribute);
            }
            let n = v[3] as usize;
            let start = 4 + n + 1;
            if start > v.len() {
                return Err(BgpError::BadAttribute);
            }
            Ok(&v[start..])
        }
        AttrType::MP_UNREACH_NLRI => {
            let v = &attr.value;
            if v.len() < 3 {
                return Err(BgpError::BadAttribute);
            }
            Ok(&v[3..])
        }
        _ => Err(BgpError::BadAttribute),
    }
}
