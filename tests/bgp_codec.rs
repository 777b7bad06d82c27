//! End-to-end BGP codec scenarios: write a message with the builders, then
//! re-read it field by field.

use bgpsieve::codec::{attrs, BgpMsg, BgpMsgFlags};
use bgpsieve::models::{
    AddPathCapability, AddPathDirection, Afi, AsSegmentType, Asn, Asn32Capability,
    BgpCapabilityCode, BgpMsgType, BgpOpen, Capability, CapabilityValue, FqdnCapability,
    GracefulRestartCapability, MultiprotocolCapability, NetAddr, NetAddrAp, Origin, Safi,
};
use bytes::Bytes;
use std::str::FromStr;

fn prefix(s: &str) -> NetAddrAp {
    NetAddrAp::from(NetAddr::from_str(s).unwrap())
}

#[test]
fn test_open_round_trip_with_capabilities() {
    // version=4, my_as=65517, hold=180, id=127.1.1.2, five capabilities
    let mut msg = BgpMsg::new();
    msg.set_write(BgpMsgType::Open, BgpMsgFlags::empty()).unwrap();
    msg.set_bgp_open(&BgpOpen {
        version: 4,
        my_as: 65517,
        hold_time: 180,
        identifier: "127.1.1.2".parse().unwrap(),
    })
    .unwrap();

    let caps = vec![
        Capability::new(
            BgpCapabilityCode::MULTIPROTOCOL,
            MultiprotocolCapability::new(Afi::Ipv4, Safi::Unicast).encode(),
        ),
        Capability::new(
            BgpCapabilityCode::ASN32,
            Asn32Capability::new(Asn::new(65517)).encode(),
        ),
        Capability::new(
            BgpCapabilityCode::ADD_PATH,
            AddPathCapability::new(vec![(Afi::Ipv4, Safi::Unicast, AddPathDirection::SendReceive)])
                .encode(),
        ),
        Capability::new(BgpCapabilityCode::FQDN, FqdnCapability::new("bgpd", "").encode()),
        Capability::new(
            BgpCapabilityCode::GRACEFUL_RESTART,
            GracefulRestartCapability::new(false, 120, vec![]).encode(),
        ),
    ];
    msg.start_caps().unwrap();
    for cap in &caps {
        msg.put_cap(cap).unwrap();
    }
    msg.end_caps().unwrap();
    let total = msg.finish().unwrap();

    // re-read through a fresh reader over the emitted bytes
    let raw = Bytes::copy_from_slice(msg.data().unwrap());
    assert_eq!(raw.len(), total);

    let mut reader = BgpMsg::new();
    reader.set_read(raw, BgpMsgFlags::empty()).unwrap();
    let open = reader.bgp_open().unwrap();
    assert_eq!(open.version, 4);
    assert_eq!(open.my_as, 65517);
    assert_eq!(open.hold_time, 180);
    assert_eq!(open.identifier, "127.1.1.2".parse::<std::net::Ipv4Addr>().unwrap());

    reader.start_caps().unwrap();
    let mut seen = Vec::new();
    while let Some(cap) = reader.next_cap().unwrap() {
        seen.push(cap);
    }
    reader.end_caps().unwrap();
    assert_eq!(seen, caps);

    // typed values decode as expected, in order
    match seen[1].value().unwrap() {
        CapabilityValue::Asn32(v) => assert_eq!(v.asn, 65517),
        other => panic!("unexpected capability value {other:?}"),
    }
    match seen[3].value().unwrap() {
        CapabilityValue::Fqdn(v) => assert_eq!(v.hostname, "bgpd"),
        other => panic!("unexpected capability value {other:?}"),
    }
    match seen[4].value().unwrap() {
        CapabilityValue::GracefulRestart(v) => {
            assert!(!v.restart_state);
            assert_eq!(v.restart_time, 120);
        }
        other => panic!("unexpected capability value {other:?}"),
    }
}

#[test]
fn test_update_emitted_length_and_offsets() {
    // ORIGIN=IGP, AS_PATH=SEQ[2598,137,3356], NEXT_HOP=1.2.3.4, NLRI 10.0.0.0/8
    let mut msg = BgpMsg::new();
    msg.set_write(BgpMsgType::Update, BgpMsgFlags::empty()).unwrap();
    msg.start_attribs().unwrap();
    msg.put_attrib(&attrs::make_origin(Origin::Igp)).unwrap();
    msg.put_attrib(&attrs::make_as_path_16(&[(
        AsSegmentType::Sequence,
        &[2598, 137, 3356],
    )]))
    .unwrap();
    msg.put_attrib(&attrs::make_next_hop("1.2.3.4".parse().unwrap()))
        .unwrap();
    msg.end_attribs().unwrap();
    msg.start_nlri().unwrap();
    msg.put_nlri(&prefix("10.0.0.0/8")).unwrap();
    msg.end_nlri().unwrap();
    let total = msg.finish().unwrap();

    // 19 header + 2 withdrawn-len + 2 attr-len + (4 + 11 + 7) attributes + 2 NLRI
    assert_eq!(total, 19 + 2 + 2 + 22 + 2);
    assert_eq!(msg.length(), total);

    // the attribute region is byte-exact
    let expected = hex::decode("400101004002080203 0a26 0089 0d1c 40030401020304".replace(' ', ""))
        .unwrap();
    assert_eq!(msg.attributes_raw().unwrap(), expected.as_slice());

    // a single lookup populates the whole notable table
    let as_path = msg.get_as_path().unwrap().unwrap();
    assert_eq!(as_path.value.len(), 2 + 3 * 2);
    assert!(msg.get_origin().unwrap().is_some());
    assert!(msg.get_next_hop().unwrap().is_some());
    assert!(msg.get_mp_reach().unwrap().is_none());
    assert!(msg.get_communities().unwrap().is_none());
}

#[test]
fn test_update_round_trip_bytes() {
    // decode(encode(M)) must reproduce M byte for byte
    let mut msg = BgpMsg::new();
    msg.set_write(BgpMsgType::Update, BgpMsgFlags::empty()).unwrap();
    msg.start_withdrawn().unwrap();
    msg.put_withdrawn(&prefix("192.0.2.0/24")).unwrap();
    msg.end_withdrawn().unwrap();
    msg.start_attribs().unwrap();
    msg.put_attrib(&attrs::make_origin(Origin::Incomplete)).unwrap();
    msg.put_attrib(&attrs::make_next_hop("10.0.0.1".parse().unwrap()))
        .unwrap();
    msg.end_attribs().unwrap();
    msg.start_nlri().unwrap();
    msg.put_nlri(&prefix("198.51.100.0/25")).unwrap();
    msg.end_nlri().unwrap();
    msg.finish().unwrap();
    let original = msg.data().unwrap().to_vec();

    // read every element, then rebuild from what was read
    let mut reader = BgpMsg::new();
    reader
        .set_read(Bytes::copy_from_slice(&original), BgpMsgFlags::empty())
        .unwrap();

    let mut withdrawn = Vec::new();
    reader.start_withdrawn().unwrap();
    while let Some(p) = reader.next_withdrawn().unwrap() {
        withdrawn.push(p);
    }
    reader.end_withdrawn().unwrap();

    let mut attributes = Vec::new();
    reader.start_attribs().unwrap();
    while let Some(a) = reader.next_attrib().unwrap() {
        attributes.push(a);
    }
    reader.end_attribs().unwrap();

    let mut nlri = Vec::new();
    reader.start_nlri().unwrap();
    while let Some(p) = reader.next_nlri().unwrap() {
        nlri.push(p);
    }
    reader.end_nlri().unwrap();

    let mut rebuilt = BgpMsg::new();
    rebuilt.set_write(BgpMsgType::Update, BgpMsgFlags::empty()).unwrap();
    rebuilt.start_withdrawn().unwrap();
    for p in &withdrawn {
        rebuilt.put_withdrawn(p).unwrap();
    }
    rebuilt.end_withdrawn().unwrap();
    rebuilt.start_attribs().unwrap();
    for a in &attributes {
        rebuilt.put_attrib(a).unwrap();
    }
    rebuilt.end_attribs().unwrap();
    rebuilt.start_nlri().unwrap();
    for p in &nlri {
        rebuilt.put_nlri(p).unwrap();
    }
    rebuilt.end_nlri().unwrap();
    rebuilt.finish().unwrap();

    assert_eq!(rebuilt.data().unwrap(), original.as_slice());
}

#[test]
fn test_update_with_mp_reach_all_nlri() {
    // v4 NLRI in the classic field, v6 in MP_REACH; start_all_nlri walks both
    let v6net = NetAddr::from_str("2001:db8::/32").unwrap();
    let nh: [u8; 16] = "2001:db8::1".parse::<std::net::Ipv6Addr>().unwrap().octets();
    let mp = attrs::make_mp_reach(Afi::Ipv6, Safi::Unicast, &nh, &v6net.encode_nlri());

    let mut msg = BgpMsg::new();
    msg.set_write(BgpMsgType::Update, BgpMsgFlags::empty()).unwrap();
    msg.start_attribs().unwrap();
    msg.put_attrib(&attrs::make_origin(Origin::Igp)).unwrap();
    msg.put_attrib(&mp).unwrap();
    msg.end_attribs().unwrap();
    msg.start_nlri().unwrap();
    msg.put_nlri(&prefix("10.0.0.0/8")).unwrap();
    msg.end_nlri().unwrap();
    msg.finish().unwrap();

    let mut seen = Vec::new();
    msg.start_all_nlri().unwrap();
    while let Some(p) = msg.next_nlri().unwrap() {
        seen.push(p.addr);
    }
    msg.end_nlri().unwrap();
    assert_eq!(seen, vec![NetAddr::from_str("10.0.0.0/8").unwrap(), v6net]);

    // the plain iterator stops at the classic field
    let mut seen = Vec::new();
    msg.start_nlri().unwrap();
    while let Some(p) = msg.next_nlri().unwrap() {
        seen.push(p.addr);
    }
    msg.end_nlri().unwrap();
    assert_eq!(seen, vec![NetAddr::from_str("10.0.0.0/8").unwrap()]);
}

#[test]
fn test_shared_read_is_not_copied() {
    let mut msg = BgpMsg::new();
    msg.set_write(BgpMsgType::KeepAlive, BgpMsgFlags::empty()).unwrap();
    msg.finish().unwrap();
    let raw = Bytes::copy_from_slice(msg.data().unwrap());

    let mut reader = BgpMsg::new();
    reader.set_read(raw.clone(), BgpMsgFlags::NO_COPY).unwrap();
    // the shared buffer backs the message directly
    assert_eq!(reader.data().unwrap().as_ptr(), raw.as_ptr());
    reader.close().unwrap();
}
