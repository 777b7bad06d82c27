//! UPDATE sub-iterators: withdrawn routes, path attributes, NLRI, plus the
//! notable-attribute offset table.

use super::{BgpMsg, IterState, MsgState, PreserveBuf, BASE_PACKET_LENGTH, OFFSET_NOT_FOUND};
use crate::error::BgpError;
use crate::models::bgp::{AttrFlags, AttrType, BgpMsgType, NotableAttr};
use crate::models::network::{netaddr_size, AddrFamily, Afi, NetAddr, NetAddrAp, Safi};
use bytes::Bytes;
use log::{debug, warn};

/// One path attribute, decoded header plus undecoded value bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attr {
    pub flags: AttrFlags,
    pub code: u8,
    pub value: Bytes,
}

impl Attr {
    pub fn new(flags: AttrFlags, code: u8, value: Bytes) -> Attr {
        debug_assert!(
            flags.contains(AttrFlags::EXTENDED) || value.len() <= 0xff,
            "oversized value without the extended-length flag"
        );
        Attr { flags, code, value }
    }

    pub fn attr_type(&self) -> AttrType {
        AttrType::from(self.code)
    }

    /// Header size on the wire: 3 bytes, or 4 with the extended-length bit.
    pub fn hdr_size(&self) -> usize {
        if self.flags.contains(AttrFlags::EXTENDED) {
            4
        } else {
            3
        }
    }

    pub fn wire_size(&self) -> usize {
        self.hdr_size() + self.value.len()
    }

    /// Encodes flags, code, length and value.
    pub fn encode(&self) -> Bytes {
        let mut out = Vec::with_capacity(self.wire_size());
        out.push(self.flags.bits());
        out.push(self.code);
        if self.flags.contains(AttrFlags::EXTENDED) {
            out.extend_from_slice(&(self.value.len() as u16).to_be_bytes());
        } else {
            out.push(self.value.len() as u8);
        }
        out.extend_from_slice(&self.value);
        Bytes::from(out)
    }
}

/// Reader cursor (or writer tail preserve) over an NLRI-shaped region.
pub(crate) struct PrefixIter {
    pub(crate) start: usize,
    pub(crate) ptr: usize,
    pub(crate) end: usize,
    /// Continue into the MP attribute once the classic region runs dry.
    pub(crate) all: bool,
    pub(crate) family: AddrFamily,
    pub(crate) writing: bool,
    /// Whether the region carries a leading 2-byte length to patch.
    pub(crate) patch_len: bool,
    pub(crate) preserve: PreserveBuf,
}

/// Reader cursor (or writer tail preserve) over the path attribute list.
pub(crate) struct AttrsIter {
    pub(crate) start: usize,
    pub(crate) ptr: usize,
    pub(crate) end: usize,
    pub(crate) writing: bool,
    pub(crate) preserve: PreserveBuf,
}

impl BgpMsg {
    // -- region arithmetic ---------------------------------------------------

    /// Withdrawn-routes region: `(value_start, len)`.
    pub(crate) fn withdrawn_region(&self) -> Result<(usize, usize), BgpError> {
        let b = self.bytes();
        if b.len() < BASE_PACKET_LENGTH + 2 {
            return Err(BgpError::BadWithdrawn);
        }
        let len = u16::from_be_bytes([b[BASE_PACKET_LENGTH], b[BASE_PACKET_LENGTH + 1]]) as usize;
        let start = BASE_PACKET_LENGTH + 2;
        if start + len > b.len() {
            return Err(BgpError::BadWithdrawn);
        }
        Ok((start, len))
    }

    /// Path-attributes region: `(value_start, len)`.
    pub(crate) fn attrs_region(&self) -> Result<(usize, usize), BgpError> {
        let (wstart, wlen) = self.withdrawn_region()?;
        let b = self.bytes();
        let len_off = wstart + wlen;
        if len_off + 2 > b.len() {
            return Err(BgpError::BadAttribute);
        }
        let len = u16::from_be_bytes([b[len_off], b[len_off + 1]]) as usize;
        let start = len_off + 2;
        if start + len > b.len() {
            return Err(BgpError::BadAttribute);
        }
        Ok((start, len))
    }

    /// NLRI region: everything after the attributes.
    pub(crate) fn nlri_region(&self) -> Result<(usize, usize), BgpError> {
        let (astart, alen) = self.attrs_region().map_err(|_| BgpError::BadNlri)?;
        let start = astart + alen;
        Ok((start, self.pktlen() - start))
    }

    /// Raw withdrawn-routes bytes.
    pub fn withdrawn_raw(&mut self) -> Result<&[u8], BgpError> {
        self.check_type(BgpMsgType::Update)?;
        let (start, len) = match self.withdrawn_region() {
            Ok(r) => r,
            Err(e) => return self.fail(e),
        };
        Ok(&self.bytes()[start..start + len])
    }

    /// Raw path-attribute bytes.
    pub fn attributes_raw(&mut self) -> Result<&[u8], BgpError> {
        self.check_type(BgpMsgType::Update)?;
        let (start, len) = match self.attrs_region() {
            Ok(r) => r,
            Err(e) => return self.fail(e),
        };
        Ok(&self.bytes()[start..start + len])
    }

    /// Raw NLRI bytes.
    pub fn nlri_raw(&mut self) -> Result<&[u8], BgpError> {
        self.check_type(BgpMsgType::Update)?;
        let (start, len) = match self.nlri_region() {
            Ok(r) => r,
            Err(e) => return self.fail(e),
        };
        Ok(&self.bytes()[start..start + len])
    }

    // -- withdrawn sub-iterator ----------------------------------------------

    fn do_start_prefixes(&mut self, withdrawn: bool, all: bool) -> Result<(), BgpError> {
        self.check_type(BgpMsgType::Update)?;
        self.end_pending()?;

        let (start, len) = match if withdrawn {
            self.withdrawn_region()
        } else {
            self.nlri_region()
        } {
            Ok(r) => r,
            Err(e) => return self.fail(e),
        };

        let writing = self.state == MsgState::Writing;
        let mut preserve = PreserveBuf::new();
        if writing {
            // hold the tail aside; puts append in place of the old region
            let region_end = start + len;
            preserve.extend_from_slice(&self.bytes()[region_end..]);
            self.buf_mut().truncate(start);
        }

        let iter = PrefixIter {
            start,
            ptr: start,
            end: start + len,
            all,
            family: AddrFamily::Ipv4,
            writing,
            patch_len: withdrawn,
            preserve,
        };
        self.iter = if withdrawn {
            IterState::Withdrawn(iter)
        } else {
            IterState::Nlri(iter)
        };
        Ok(())
    }

    fn do_start_mp_only(&mut self, withdrawn: bool) -> Result<(), BgpError> {
        self.check_type(BgpMsgType::Update)?;
        self.check_state(MsgState::Reading)?;
        self.end_pending()?;

        // empty classic region forces the first next() onto the MP attribute
        let iter = PrefixIter {
            start: 0,
            ptr: 0,
            end: 0,
            all: true,
            family: AddrFamily::Ipv4,
            writing: false,
            patch_len: withdrawn,
            preserve: PreserveBuf::new(),
        };
        self.iter = if withdrawn {
            IterState::Withdrawn(iter)
        } else {
            IterState::Nlri(iter)
        };
        Ok(())
    }

    /// Starts iteration (or writing) of the withdrawn-routes field.
    pub fn start_withdrawn(&mut self) -> Result<(), BgpError> {
        self.do_start_prefixes(true, false)
    }

    /// Starts iteration of the withdrawn routes continuing into
    /// MP_UNREACH_NLRI (read only).
    pub fn start_all_withdrawn(&mut self) -> Result<(), BgpError> {
        self.check_state(MsgState::Reading)?;
        self.do_start_prefixes(true, true)
    }

    /// Starts iteration over the MP_UNREACH_NLRI prefixes alone (read only).
    pub fn start_mp_unreach(&mut self) -> Result<(), BgpError> {
        self.do_start_mp_only(true)
    }

    /// Starts iteration (or writing) of the NLRI field.
    pub fn start_nlri(&mut self) -> Result<(), BgpError> {
        self.do_start_prefixes(false, false)
    }

    /// Starts iteration of the NLRI continuing into MP_REACH_NLRI (read
    /// only).
    pub fn start_all_nlri(&mut self) -> Result<(), BgpError> {
        self.check_state(MsgState::Reading)?;
        self.do_start_prefixes(false, true)
    }

    /// Starts iteration over the MP_REACH_NLRI prefixes alone (read only).
    pub fn start_mp_reach(&mut self) -> Result<(), BgpError> {
        self.do_start_mp_only(false)
    }

    fn next_prefix(&mut self, withdrawn: bool) -> Result<Option<NetAddrAp>, BgpError> {
        self.check_state(MsgState::Reading)?;
        let bad = if withdrawn {
            BgpError::BadWithdrawn
        } else {
            BgpError::BadNlri
        };

        let mut it = match std::mem::take(&mut self.iter) {
            IterState::Withdrawn(it) if withdrawn => it,
            IterState::Nlri(it) if !withdrawn => it,
            other => {
                self.iter = other;
                return self.fail(BgpError::InvalidOp);
            }
        };

        // an exhausted classic region commutes into the MP attribute; the
        // loop also absorbs an empty MP NLRI stream
        while it.ptr == it.end {
            if !it.all {
                self.iter = restore(withdrawn, it);
                return Ok(None);
            }
            it.all = false;

            let attr_off = if withdrawn {
                self.seek_attribute(NotableAttr::MpUnreach.code())?
            } else {
                self.seek_attribute(NotableAttr::MpReach.code())?
            };
            let Some(off) = attr_off else {
                self.iter = restore(withdrawn, it);
                return Ok(None);
            };

            // decoding the SAFI already rejects anything but unicast and
            // multicast streams
            let (afi, _safi, stream) = match self.mp_attr_stream(off, withdrawn) {
                Ok(v) => v,
                Err(e) => return self.fail(e),
            };
            it.family = afi.family();
            it.start = stream.0;
            it.ptr = stream.0;
            it.end = stream.1;
        }

        let b = self.bytes();
        let mut ptr = it.ptr;
        let mut path_id = 0;
        if self.flags.contains(super::BgpMsgFlags::ADD_PATH) {
            // strict: the path id plus one byte for the length must both fit
            if ptr + 4 >= it.end {
                return self.fail(bad);
            }
            path_id = u32::from_be_bytes([b[ptr], b[ptr + 1], b[ptr + 2], b[ptr + 3]]);
            ptr += 4;
        }

        let bitlen = b[ptr];
        ptr += 1;
        let n = netaddr_size(bitlen);
        if ptr + n > it.end {
            return self.fail(bad);
        }
        let Some(addr) = NetAddr::from_wire(it.family, bitlen, &b[ptr..ptr + n]) else {
            warn!("prefix bit length {bitlen} does not fit its address family");
            return self.fail(bad);
        };
        it.ptr = ptr + n;

        self.iter = restore(withdrawn, it);
        Ok(Some(NetAddrAp { addr, path_id }))
    }

    /// Reads the next withdrawn prefix, in wire order.
    pub fn next_withdrawn(&mut self) -> Result<Option<NetAddrAp>, BgpError> {
        self.next_prefix(true)
    }

    /// Reads the next announced prefix, in wire order.
    pub fn next_nlri(&mut self) -> Result<Option<NetAddrAp>, BgpError> {
        self.next_prefix(false)
    }

    fn put_prefix(&mut self, withdrawn: bool, p: &NetAddrAp) -> Result<(), BgpError> {
        self.check_state(MsgState::Writing)?;
        let addpath = self.flags.contains(super::BgpMsgFlags::ADD_PATH);
        match &mut self.iter {
            IterState::Withdrawn(it) if withdrawn && it.writing => {}
            IterState::Nlri(it) if !withdrawn && it.writing => {}
            _ => return self.fail(BgpError::InvalidOp),
        }

        let addr = p.addr;
        let path_id = p.path_id;
        let buf = self.buf_mut();
        if addpath {
            buf.extend_from_slice(&path_id.to_be_bytes());
        }
        buf.extend_from_slice(&[addr.bitlen()]);
        buf.extend_from_slice(addr.wire_bytes());
        Ok(())
    }

    /// Appends one withdrawn prefix (writer).
    pub fn put_withdrawn(&mut self, p: &NetAddrAp) -> Result<(), BgpError> {
        self.put_prefix(true, p)
    }

    /// Appends one announced prefix (writer).
    pub fn put_nlri(&mut self, p: &NetAddrAp) -> Result<(), BgpError> {
        self.put_prefix(false, p)
    }

    fn end_prefixes(&mut self, withdrawn: bool) -> Result<(), BgpError> {
        let it = match std::mem::take(&mut self.iter) {
            IterState::Withdrawn(it) if withdrawn => it,
            IterState::Nlri(it) if !withdrawn => it,
            other => {
                self.iter = other;
                return self.fail(BgpError::InvalidOp);
            }
        };
        self.check_ok()?;

        if it.writing {
            let region_len = self.pktlen() - it.start;
            if it.patch_len {
                if region_len > u16::MAX as usize {
                    return self.fail(BgpError::InvalidOp);
                }
                let len = (region_len as u16).to_be_bytes();
                self.buf_mut()[it.start - 2..it.start].copy_from_slice(&len);
            }
            self.buf_mut().extend_from_slice(&it.preserve);
        }
        Ok(())
    }

    /// Ends the withdrawn iterator; a writer patches the withdrawn length.
    pub fn end_withdrawn(&mut self) -> Result<(), BgpError> {
        self.end_prefixes(true)
    }

    /// Ends the NLRI iterator.
    pub fn end_nlri(&mut self) -> Result<(), BgpError> {
        self.end_prefixes(false)
    }

    // -- attribute sub-iterator ----------------------------------------------

    /// Starts iteration (or writing) of the path attribute list.
    pub fn start_attribs(&mut self) -> Result<(), BgpError> {
        self.check_type(BgpMsgType::Update)?;
        self.end_pending()?;

        let (start, len) = match self.attrs_region() {
            Ok(r) => r,
            Err(e) => return self.fail(e),
        };

        let writing = self.state == MsgState::Writing;
        let mut preserve = PreserveBuf::new();
        if writing {
            preserve.extend_from_slice(&self.bytes()[start + len..]);
            self.buf_mut().truncate(start);
        }

        self.iter = IterState::Attrs(AttrsIter {
            start,
            ptr: start,
            end: start + len,
            writing,
            preserve,
        });
        Ok(())
    }

    /// Decodes the attribute starting at `off`, returning it and the offset
    /// just past it.
    pub(crate) fn attr_at(&self, off: usize, limit: usize) -> Result<(Attr, usize), BgpError> {
        let b = self.bytes();
        if off + 3 > limit {
            return Err(BgpError::BadAttribute);
        }
        let flags = AttrFlags::from_bits_retain(b[off]);
        let code = b[off + 1];
        let (len, value_off) = if flags.contains(AttrFlags::EXTENDED) {
            if off + 4 > limit {
                return Err(BgpError::BadAttribute);
            }
            (
                u16::from_be_bytes([b[off + 2], b[off + 3]]) as usize,
                off + 4,
            )
        } else {
            (b[off + 2] as usize, off + 3)
        };
        if value_off + len > limit {
            return Err(BgpError::BadAttribute);
        }
        let value = Bytes::copy_from_slice(&b[value_off..value_off + len]);
        Ok((Attr { flags, code, value }, value_off + len))
    }

    /// Reads the next path attribute, recording its offset in the notable
    /// attribute table as a side effect.
    pub fn next_attrib(&mut self) -> Result<Option<Attr>, BgpError> {
        self.check_state(MsgState::Reading)?;
        let (ptr, end) = match &self.iter {
            IterState::Attrs(it) => (it.ptr, it.end),
            _ => return self.fail(BgpError::InvalidOp),
        };
        if ptr == end {
            return Ok(None);
        }

        let (attr, next) = match self.attr_at(ptr, end) {
            Ok(v) => v,
            Err(e) => return self.fail(e),
        };
        debug!(
            "reading attribute: type -- {:?}, length -- {}",
            attr.attr_type(),
            attr.value.len()
        );

        if let Some(slot) = NotableAttr::from_code(attr.code) {
            self.offtab[slot as usize] = ptr as u16;
        }
        if let IterState::Attrs(it) = &mut self.iter {
            it.ptr = next;
        }
        Ok(Some(attr))
    }

    /// Appends one attribute to the list (writer).
    pub fn put_attrib(&mut self, attr: &Attr) -> Result<(), BgpError> {
        self.check_state(MsgState::Writing)?;
        match &self.iter {
            IterState::Attrs(it) if it.writing => {}
            _ => return self.fail(BgpError::InvalidOp),
        }
        let encoded = attr.encode();
        self.buf_mut().extend_from_slice(&encoded);
        Ok(())
    }

    /// Ends the attribute iterator; a writer patches the attribute list
    /// length.
    pub fn end_attribs(&mut self) -> Result<(), BgpError> {
        let it = match std::mem::take(&mut self.iter) {
            IterState::Attrs(it) => it,
            other => {
                self.iter = other;
                return self.fail(BgpError::InvalidOp);
            }
        };
        self.check_ok()?;

        if it.writing {
            let region_len = self.pktlen() - it.start;
            if region_len > u16::MAX as usize {
                return self.fail(BgpError::InvalidOp);
            }
            let len = (region_len as u16).to_be_bytes();
            self.buf_mut()[it.start - 2..it.start].copy_from_slice(&len);
            self.buf_mut().extend_from_slice(&it.preserve);
        }
        Ok(())
    }

    // -- notable attribute offset table --------------------------------------

    /// Looks an attribute up through the offset table; a cold table triggers
    /// one full scan which marks every slot either found or absent.
    ///
    /// Only callable with one of the twelve notable codes.
    pub(crate) fn seek_attribute(&mut self, code: u8) -> Result<Option<usize>, BgpError> {
        self.check_type(BgpMsgType::Update)?;
        self.check_state(MsgState::Reading)?;

        let slot = NotableAttr::from_code(code).expect("seek_attribute on a non-notable code") as usize;

        let mut off = self.offtab[slot];
        if off == 0 {
            // cold: scan all attributes, preserving the caller's iterator
            let saved = std::mem::take(&mut self.iter);
            self.start_attribs()?;
            loop {
                match self.next_attrib() {
                    Ok(Some(_)) => continue,
                    Ok(None) => break,
                    Err(e) => {
                        self.iter = saved;
                        return Err(e);
                    }
                }
            }
            self.iter = saved;

            // anything still unset is definitely absent
            for s in self.offtab.iter_mut() {
                if *s == 0 {
                    *s = OFFSET_NOT_FOUND;
                }
            }
            off = self.offtab[slot];
        }

        if off == OFFSET_NOT_FOUND {
            Ok(None)
        } else {
            Ok(Some(off as usize))
        }
    }

    fn notable_attr(&mut self, slot: NotableAttr) -> Result<Option<Attr>, BgpError> {
        match self.seek_attribute(slot.code())? {
            Some(off) => {
                let limit = self.pktlen();
                match self.attr_at(off, limit) {
                    Ok((attr, _)) => Ok(Some(attr)),
                    Err(e) => self.fail(e),
                }
            }
            None => Ok(None),
        }
    }

    pub fn get_origin(&mut self) -> Result<Option<Attr>, BgpError> {
        self.notable_attr(NotableAttr::Origin)
    }

    pub fn get_next_hop(&mut self) -> Result<Option<Attr>, BgpError> {
        self.notable_attr(NotableAttr::NextHop)
    }

    pub fn get_atomic_aggregate(&mut self) -> Result<Option<Attr>, BgpError> {
        self.notable_attr(NotableAttr::AtomicAggregate)
    }

    pub fn get_aggregator(&mut self) -> Result<Option<Attr>, BgpError> {
        self.notable_attr(NotableAttr::Aggregator)
    }

    pub fn get_as4_aggregator(&mut self) -> Result<Option<Attr>, BgpError> {
        self.notable_attr(NotableAttr::As4Aggregator)
    }

    pub fn get_as_path(&mut self) -> Result<Option<Attr>, BgpError> {
        self.notable_attr(NotableAttr::AsPath)
    }

    pub fn get_as4_path(&mut self) -> Result<Option<Attr>, BgpError> {
        self.notable_attr(NotableAttr::As4Path)
    }

    pub fn get_mp_reach(&mut self) -> Result<Option<Attr>, BgpError> {
        self.notable_attr(NotableAttr::MpReach)
    }

    pub fn get_mp_unreach(&mut self) -> Result<Option<Attr>, BgpError> {
        self.notable_attr(NotableAttr::MpUnreach)
    }

    pub fn get_communities(&mut self) -> Result<Option<Attr>, BgpError> {
        self.notable_attr(NotableAttr::Communities)
    }

    pub fn get_ex_communities(&mut self) -> Result<Option<Attr>, BgpError> {
        self.notable_attr(NotableAttr::ExtendedCommunities)
    }

    pub fn get_large_communities(&mut self) -> Result<Option<Attr>, BgpError> {
        self.notable_attr(NotableAttr::LargeCommunities)
    }

    /// RFC 6793 aggregator selection: AS4_AGGREGATOR replaces AGGREGATOR
    /// when the latter carries the AS_TRANS placeholder.
    pub fn get_real_aggregator(&mut self) -> Result<Option<Attr>, BgpError> {
        let Some(aggr) = self.get_aggregator()? else {
            return Ok(None);
        };
        let asn = crate::codec::attrs::aggregator_as(&aggr)?;
        if asn == crate::models::network::Asn::TRANSITION {
            if let Some(aggr4) = self.get_as4_aggregator()? {
                return Ok(Some(aggr4));
            }
        }
        Ok(Some(aggr))
    }

    /// True when the current UPDATE carries the attribute; notable codes
    /// answer through the offset table.
    pub fn has_attribute(&mut self, code: u8) -> Result<bool, BgpError> {
        if NotableAttr::from_code(code).is_some() {
            return Ok(self.seek_attribute(code)?.is_some());
        }

        // non-notable codes get a plain scan, caller iterator preserved
        let saved = std::mem::take(&mut self.iter);
        self.start_attribs()?;
        let mut found = false;
        loop {
            match self.next_attrib() {
                Ok(Some(attr)) => {
                    if attr.code == code {
                        found = true;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    self.iter = saved;
                    return Err(e);
                }
            }
        }
        self.iter = saved;
        Ok(found)
    }

    /// Locates the NLRI stream of the MP attribute at `off`.
    ///
    /// Returns the AFI, SAFI and the absolute `(start, end)` of the
    /// prefix stream.
    pub(crate) fn mp_attr_stream(
        &self,
        off: usize,
        unreach: bool,
    ) -> Result<(Afi, Safi, (usize, usize)), BgpError> {
        let (attr, _) = self.attr_at(off, self.pktlen())?;
        let v = &attr.value;
        let min = if unreach { 3 } else { 5 };
        if v.len() < min {
            return Err(BgpError::BadAttribute);
        }
        let afi =
            Afi::try_from(u16::from_be_bytes([v[0], v[1]])).map_err(|_| BgpError::BadAttribute)?;
        let safi = Safi::try_from(v[2]).map_err(|_| {
            if unreach {
                BgpError::BadWithdrawn
            } else {
                BgpError::BadNlri
            }
        })?;

        // translate offsets within the value back into the message buffer
        let value_off = off + attr.hdr_size();
        let stream = if unreach {
            (value_off + 3, value_off + v.len())
        } else {
            let nh_len = v[3] as usize;
            let nlri_off = 4 + nh_len + 1; // next hop plus the reserved byte
            if nlri_off > v.len() {
                return Err(BgpError::BadAttribute);
            }
            (value_off + nlri_off, value_off + v.len())
        };
        Ok((afi, safi, stream))
    }
}

fn restore(withdrawn: bool, it: PrefixIter) -> IterState {
    if withdrawn {
        IterState::Withdrawn(it)
    } else {
        IterState::Nlri(it)
    }
}
