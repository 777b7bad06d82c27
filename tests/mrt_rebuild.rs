//! MRT envelope parsing and the MRT→BGP UPDATE rebuild, including its
//! policy knobs.

use bgpsieve::codec::{attrs, rebuild_bgp_from_rib, BgpMsg, BgpMsgFlags, MrtMsg};
use bgpsieve::error::{BgpError, MrtError};
use bgpsieve::models::{
    Afi, Bgp4mpSubtype, BgpMsgType, MrtType, NetAddr, NetAddrAp, Safi, TableDumpV2Subtype,
};
use bytes::{BufMut, Bytes, BytesMut};
use std::str::FromStr;

/// Raw attribute blob the way TABLE_DUMPv2 collectors store it: ORIGIN,
/// widened AS_PATH, and an MP_REACH reduced to its next-hop field.
fn rib_attr_blob(truncated_mp: bool) -> Vec<u8> {
    let mut blob = Vec::new();
    // ORIGIN IGP
    blob.extend_from_slice(&[0x40, 0x01, 0x01, 0x00]);
    // AS_PATH, one sequence of (65001, 3356), 32-bit ASes
    blob.extend_from_slice(&[0x40, 0x02, 0x0a, 2, 2]);
    blob.extend_from_slice(&65001u32.to_be_bytes());
    blob.extend_from_slice(&3356u32.to_be_bytes());
    // MP_REACH
    let nh: [u8; 16] = "2001:db8::1".parse::<std::net::Ipv6Addr>().unwrap().octets();
    if truncated_mp {
        // collector form: next-hop length + next hop only
        blob.extend_from_slice(&[0x80, 0x0e, 17, 16]);
        blob.extend_from_slice(&nh);
    } else {
        // full form: AFI + SAFI + next-hop length + next hop (no NLRI)
        blob.extend_from_slice(&[0x80, 0x0e, 20, 0x00, 0x02, 0x01, 16]);
        blob.extend_from_slice(&nh);
    }
    blob
}

#[test]
fn test_rebuild_truncated_mp_reach() {
    // a RIB_IPV6_UNICAST row with the collector-truncated MP_REACH must
    // rebuild into the fully formed wire attribute
    let nlri = NetAddrAp::from(NetAddr::from_str("2001:db8::/32").unwrap());
    let mut msg = BgpMsg::new();
    rebuild_bgp_from_rib(&mut msg, &nlri, &rib_attr_blob(true), BgpMsgFlags::empty()).unwrap();

    assert_eq!(msg.msg_type().unwrap(), BgpMsgType::Update);

    let nh: [u8; 16] = "2001:db8::1".parse::<std::net::Ipv6Addr>().unwrap().octets();
    let expected = attrs::make_mp_reach(
        Afi::Ipv6,
        Safi::Unicast,
        &nh,
        &NetAddr::from_str("2001:db8::/32").unwrap().encode_nlri(),
    );

    let got = msg.get_mp_reach().unwrap().unwrap();
    assert_eq!(got.encode(), expected.encode(), "MP_REACH must be bit-exact");

    // the rebuilt update iterates its v6 prefix through MP_REACH
    msg.start_all_nlri().unwrap();
    let p = msg.next_nlri().unwrap().unwrap();
    assert_eq!(p.addr, NetAddr::from_str("2001:db8::/32").unwrap());
    assert!(msg.next_nlri().unwrap().is_none());
    msg.end_nlri().unwrap();

    // withdrawn-routes length is the two-byte zero
    msg.start_withdrawn().unwrap();
    assert!(msg.next_withdrawn().unwrap().is_none());
    msg.end_withdrawn().unwrap();
}

#[test]
fn test_rebuild_auto_detects_full_form() {
    let nlri = NetAddrAp::from(NetAddr::from_str("2001:db8::/32").unwrap());
    let mut msg = BgpMsg::new();
    rebuild_bgp_from_rib(&mut msg, &nlri, &rib_attr_blob(false), BgpMsgFlags::empty()).unwrap();

    let nh: [u8; 16] = "2001:db8::1".parse::<std::net::Ipv6Addr>().unwrap().octets();
    let expected = attrs::make_mp_reach(
        Afi::Ipv6,
        Safi::Unicast,
        &nh,
        &NetAddr::from_str("2001:db8::/32").unwrap().encode_nlri(),
    );
    let got = msg.get_mp_reach().unwrap().unwrap();
    assert_eq!(got.encode(), expected.encode());
}

#[test]
fn test_rebuild_full_mpreach_knob() {
    // FULL_MPREACH forces the full-form interpretation even for bytes that
    // would auto-detect as truncated
    let nlri = NetAddrAp::from(NetAddr::from_str("2001:db8::/32").unwrap());
    let mut msg = BgpMsg::new();
    rebuild_bgp_from_rib(
        &mut msg,
        &nlri,
        &rib_attr_blob(false),
        BgpMsgFlags::FULL_MPREACH,
    )
    .unwrap();
    let nh: [u8; 16] = "2001:db8::1".parse::<std::net::Ipv6Addr>().unwrap().octets();
    let got = msg.get_mp_reach().unwrap().unwrap();
    assert_eq!(attrs::mp_next_hop(&got).unwrap(), &nh);
}

#[test]
fn test_rebuild_as_path_narrowing() {
    // 2-octet session: the widened 32-bit ASes narrow back to 16 bits
    let nlri = NetAddrAp::from(NetAddr::from_str("2001:db8::/32").unwrap());
    let mut msg = BgpMsg::new();
    rebuild_bgp_from_rib(&mut msg, &nlri, &rib_attr_blob(true), BgpMsgFlags::empty()).unwrap();

    let as_path = msg.get_as_path().unwrap().unwrap();
    assert_eq!(
        as_path.value.as_ref(),
        &[2, 2, 0xfd, 0xe9, 0x0d, 0x1c],
        "ASes must be narrowed to 16 bits"
    );

    // a 32-bit session keeps the attribute verbatim
    let mut msg = BgpMsg::new();
    rebuild_bgp_from_rib(&mut msg, &nlri, &rib_attr_blob(true), BgpMsgFlags::ASN32BIT).unwrap();
    let as_path = msg.get_as_path().unwrap().unwrap();
    assert_eq!(as_path.value.len(), 10);
}

#[test]
fn test_rebuild_rejects_wide_as_on_16bit_session() {
    // AS 200000 cannot be narrowed: the two high-order bytes are not zero
    let nlri = NetAddrAp::from(NetAddr::from_str("10.0.0.0/8").unwrap());
    let mut blob = Vec::new();
    blob.extend_from_slice(&[0x40, 0x02, 0x06, 2, 1]);
    blob.extend_from_slice(&200000u32.to_be_bytes());
    let mut msg = BgpMsg::new();
    assert_eq!(
        rebuild_bgp_from_rib(&mut msg, &nlri, &blob, BgpMsgFlags::empty()).unwrap_err(),
        MrtError::Bgp(BgpError::BadAttribute)
    );
}

#[test]
fn test_rebuild_strip_unreach() {
    let nlri = NetAddrAp::from(NetAddr::from_str("10.0.0.0/8").unwrap());
    let mut blob = vec![0x40, 0x01, 0x01, 0x00]; // ORIGIN
    // MP_UNREACH for 2001:db8::/32
    blob.extend_from_slice(&[0x80, 0x0f, 0x08, 0x00, 0x02, 0x01, 32, 0x20, 0x01, 0x0d, 0xb8]);

    let mut kept = BgpMsg::new();
    rebuild_bgp_from_rib(&mut kept, &nlri, &blob, BgpMsgFlags::empty()).unwrap();
    assert!(kept.get_mp_unreach().unwrap().is_some());

    let mut stripped = BgpMsg::new();
    rebuild_bgp_from_rib(&mut stripped, &nlri, &blob, BgpMsgFlags::STRIP_UNREACH).unwrap();
    assert!(stripped.get_mp_unreach().unwrap().is_none());
}

#[test]
fn test_rebuild_v4_appends_tail_nlri() {
    let nlri = NetAddrAp::from(NetAddr::from_str("10.0.0.0/8").unwrap());
    let blob = vec![0x40, 0x01, 0x01, 0x00];
    let mut msg = BgpMsg::new();
    rebuild_bgp_from_rib(&mut msg, &nlri, &blob, BgpMsgFlags::empty()).unwrap();

    msg.start_nlri().unwrap();
    assert_eq!(
        msg.next_nlri().unwrap().unwrap().addr,
        NetAddr::from_str("10.0.0.0/8").unwrap()
    );
    msg.end_nlri().unwrap();
}

#[test]
fn test_rebuild_addpath_ids() {
    let nlri = NetAddrAp::new(NetAddr::from_str("10.0.0.0/8").unwrap(), 42);
    let blob = vec![0x40, 0x01, 0x01, 0x00];
    let mut msg = BgpMsg::new();
    rebuild_bgp_from_rib(&mut msg, &nlri, &blob, BgpMsgFlags::ADD_PATH).unwrap();

    msg.start_nlri().unwrap();
    let p = msg.next_nlri().unwrap().unwrap();
    assert_eq!(p.path_id, 42);
    msg.end_nlri().unwrap();
}

#[test]
fn test_rebuild_v6_requires_mp_reach() {
    let nlri = NetAddrAp::from(NetAddr::from_str("2001:db8::/32").unwrap());
    let blob = vec![0x40, 0x01, 0x01, 0x00]; // no MP_REACH in the blob
    let mut msg = BgpMsg::new();
    assert_eq!(
        rebuild_bgp_from_rib(&mut msg, &nlri, &blob, BgpMsgFlags::empty()).unwrap_err(),
        MrtError::Bgp(BgpError::BadAttribute)
    );
}

#[test]
fn test_legacy_table_dump_rebuild() {
    // LEGACY_MRT keeps 16-bit ASes verbatim and the v4 NLRI at the tail
    let nlri = NetAddrAp::from(NetAddr::from_str("192.0.2.0/24").unwrap());
    let mut blob = Vec::new();
    blob.extend_from_slice(&[0x40, 0x01, 0x01, 0x00]);
    blob.extend_from_slice(&[0x40, 0x02, 0x06, 2, 2, 0x0a, 0x26, 0x0d, 0x1c]); // 16-bit SEQ
    let mut msg = BgpMsg::new();
    rebuild_bgp_from_rib(
        &mut msg,
        &nlri,
        &blob,
        BgpMsgFlags::LEGACY_MRT | BgpMsgFlags::ASN32BIT | BgpMsgFlags::ADD_PATH,
    )
    .unwrap();

    // the legacy knob forces the session narrow and path-id free
    assert!(!msg.is_asn32bit());
    assert!(!msg.is_addpath());
    let as_path = msg.get_as_path().unwrap().unwrap();
    assert_eq!(as_path.value.as_ref(), &[2, 2, 0x0a, 0x26, 0x0d, 0x1c]);

    msg.start_nlri().unwrap();
    assert_eq!(
        msg.next_nlri().unwrap().unwrap().addr,
        NetAddr::from_str("192.0.2.0/24").unwrap()
    );
    msg.end_nlri().unwrap();
}

#[test]
fn test_bgp4mp_unwrap_and_flags() {
    // wrap a keepalive in a BGP4MP_MESSAGE_AS4_ADDPATH record
    let mut inner = BgpMsg::new();
    inner.set_write(BgpMsgType::KeepAlive, BgpMsgFlags::empty()).unwrap();
    inner.finish().unwrap();

    let mut body = BytesMut::new();
    body.put_u32(200000); // peer AS (4 octets)
    body.put_u32(65010); // local AS
    body.put_u16(0); // interface index
    body.put_u16(1); // AFI v4
    body.put_u32(u32::from("192.0.2.1".parse::<std::net::Ipv4Addr>().unwrap()));
    body.put_u32(u32::from("192.0.2.2".parse::<std::net::Ipv4Addr>().unwrap()));
    body.extend_from_slice(inner.data().unwrap());

    let mut rec = MrtMsg::new();
    rec.set_write(
        MrtType::BGP4MP,
        Bgp4mpSubtype::MessageAs4Addpath.into(),
        1_700_000_000,
    )
    .unwrap();
    rec.put_body(&body).unwrap();
    rec.finish().unwrap();

    assert!(rec.is_bgp_wrapper());
    let (peer, flags, raw) = rec.unwrap_bgp4mp().unwrap();
    assert_eq!(peer.peer_as, bgpsieve::models::Asn::new(200000));
    assert_eq!(peer.peer_addr, "192.0.2.1".parse::<std::net::IpAddr>().unwrap());
    assert!(flags.contains(BgpMsgFlags::ASN32BIT));
    assert!(flags.contains(BgpMsgFlags::ADD_PATH));

    let mut bgp = BgpMsg::new();
    bgp.set_read(raw, flags).unwrap();
    assert_eq!(bgp.msg_type().unwrap(), BgpMsgType::KeepAlive);
}

#[test]
fn test_rib_entries_resolve_through_peer_table() {
    // build a RIB_IPV6_UNICAST record and walk its entries
    let mut body = BytesMut::new();
    body.put_u32(7); // sequence
    let p = NetAddr::from_str("2001:db8::/32").unwrap();
    body.put_u8(p.bitlen());
    body.put_slice(p.wire_bytes());
    body.put_u16(1); // entry count
    body.put_u16(0); // peer index
    body.put_u32(1_600_000_000); // originated
    let blob = rib_attr_blob(true);
    body.put_u16(blob.len() as u16);
    body.put_slice(&blob);

    let mut rec = MrtMsg::new();
    rec.set_write(
        MrtType::TABLE_DUMP_V2,
        TableDumpV2Subtype::RibIpv6Unicast.into(),
        1_700_000_000,
    )
    .unwrap();
    rec.put_body(&body).unwrap();
    rec.finish().unwrap();

    let rib = rec.rib_entries().unwrap();
    assert_eq!(rib.sequence, 7);
    assert_eq!(rib.prefix, p);
    assert_eq!(rib.entries.len(), 1);
    assert_eq!(rib.entries[0].peer_index, 0);
    assert_eq!(rib.entries[0].attrs.as_ref(), blob.as_slice());

    // a rebuild straight out of the decoded entry works end to end
    let mut msg = BgpMsg::new();
    rebuild_bgp_from_rib(
        &mut msg,
        &NetAddrAp::new(rib.prefix, rib.entries[0].path_id),
        &rib.entries[0].attrs,
        BgpMsgFlags::empty(),
    )
    .unwrap();
    assert!(msg.get_mp_reach().unwrap().is_some());
}

#[test]
fn test_stream_reading() {
    let mut rec = MrtMsg::new();
    rec.set_write(MrtType::BGP4MP, Bgp4mpSubtype::Message.into(), 5).unwrap();
    rec.put_body(&[1, 2, 3]).unwrap();
    rec.finish().unwrap();
    let raw = rec.data().unwrap().to_vec();

    let mut reader = MrtMsg::new();
    reader.set_read_from(&mut raw.as_slice()).unwrap();
    assert_eq!(reader.timestamp().unwrap(), 5);
    assert_eq!(reader.body().unwrap(), &[1, 2, 3]);

    let mut short = &raw[..13];
    let mut reader = MrtMsg::new();
    assert_eq!(reader.set_read_from(&mut short).unwrap_err(), MrtError::Io);
}

#[test]
fn test_set_read_slices_trailing_bytes() {
    let mut rec = MrtMsg::new();
    rec.set_write(MrtType::BGP4MP, Bgp4mpSubtype::Message.into(), 5).unwrap();
    rec.put_body(&[9; 8]).unwrap();
    rec.finish().unwrap();

    // extra bytes after the record (as in a concatenated dump) are ignored
    let mut raw = rec.data().unwrap().to_vec();
    raw.extend_from_slice(&[0xde, 0xad]);
    let mut reader = MrtMsg::new();
    reader.set_read(Bytes::from(raw)).unwrap();
    assert_eq!(reader.length().unwrap(), 8);
    assert_eq!(reader.body().unwrap(), &[9; 8]);
}
