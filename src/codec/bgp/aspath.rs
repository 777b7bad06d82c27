//! AS-path, next-hop and community sub-iterators, including the RFC 6793
//! "real" AS-path reconstruction across 16/32-bit ASN worlds.

use super::{BgpMsg, IterState, MsgState};
use crate::error::BgpError;
use crate::models::bgp::{
    AsPathEntry, AsSegmentType, AttrType, BgpMsgType, Community, ExtendedCommunity,
    LargeCommunity, NotableAttr, AS_SEGMENT_HEADER_SIZE,
};
use crate::models::network::{AddrFamily, Afi, Asn, AsnLength, NetAddr};

pub(crate) struct AsPathIter {
    ptr: usize,
    end: usize,
    /// Pending AS4_PATH region the iterator commutes into when rebuilding
    /// the real path.
    as4: Option<(usize, usize)>,
    as_size: AsnLength,
    seg_type: AsSegmentType,
    seg_len: u8,
    seg_i: u8,
    seg_no: i32,
    /// Entries still to emit from AS_PATH before commuting; -1 disables the
    /// countdown for plain iterations.
    ascount: i32,
}

pub(crate) struct NextHopIter {
    ptr: usize,
    end: usize,
    family: AddrFamily,
    /// MP_REACH next-hop field, concatenated after the legacy NEXT_HOP.
    mp: Option<(usize, usize, AddrFamily)>,
}

pub(crate) struct CommunityIter {
    code: u8,
    ptr: usize,
    end: usize,
}

/// One element yielded by the community sub-iterator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommunityItem {
    Plain(Community),
    Extended(ExtendedCommunity),
    Large(LargeCommunity),
}

impl BgpMsg {
    /// Absolute `(start, end)` of the value area of the attribute at `off`.
    pub(crate) fn attr_value_span(&self, off: usize) -> Result<(usize, usize), BgpError> {
        let (attr, next) = self.attr_at(off, self.pktlen())?;
        Ok((off + attr.hdr_size(), next))
    }

    fn notable_span(&mut self, slot: NotableAttr) -> Result<Option<(usize, usize)>, BgpError> {
        match self.seek_attribute(slot.code())? {
            Some(off) => match self.attr_value_span(off) {
                Ok(span) => Ok(Some(span)),
                Err(e) => self.fail(e),
            },
            None => Ok(None),
        }
    }

    fn session_as_size(&self) -> AsnLength {
        if self.is_asn32bit() {
            AsnLength::Bits32
        } else {
            AsnLength::Bits16
        }
    }

    fn install_as_path(&mut self, span: Option<(usize, usize)>, as_size: AsnLength) {
        let (ptr, end) = span.unwrap_or((0, 0));
        self.iter = IterState::AsPath(AsPathIter {
            ptr,
            end,
            as4: None,
            as_size,
            seg_type: AsSegmentType::Sequence,
            seg_len: 0,
            seg_i: 0,
            seg_no: -1,
            ascount: -1,
        });
    }

    /// Starts iteration over AS_PATH, using the session's AS width.
    pub fn start_as_path(&mut self) -> Result<(), BgpError> {
        self.check_type(BgpMsgType::Update)?;
        self.check_state(MsgState::Reading)?;
        self.end_pending()?;

        let span = self.notable_span(NotableAttr::AsPath)?;
        self.install_as_path(span, self.session_as_size());
        Ok(())
    }

    /// Starts iteration over AS4_PATH (always 4-octet ASes).
    pub fn start_as4_path(&mut self) -> Result<(), BgpError> {
        self.check_type(BgpMsgType::Update)?;
        self.check_state(MsgState::Reading)?;
        self.end_pending()?;

        let span = self.notable_span(NotableAttr::As4Path)?;
        self.install_as_path(span, AsnLength::Bits32);
        Ok(())
    }

    /// Starts iteration over the reconstructed AS path.
    ///
    /// On a 2-octet session where the aggregator pair signals AS_TRANS,
    /// AS4_PATH replaces the trailing portion of AS_PATH: the first
    /// `as_count - as4_count` entries come from AS_PATH, the rest from
    /// AS4_PATH. An AS4_PATH longer than AS_PATH is ignored.
    pub fn start_real_as_path(&mut self) -> Result<(), BgpError> {
        self.check_type(BgpMsgType::Update)?;
        self.check_state(MsgState::Reading)?;
        self.end_pending()?;

        let as_size = self.session_as_size();
        let span = self.notable_span(NotableAttr::AsPath)?;
        self.install_as_path(span, as_size);
        let Some(span) = span else {
            return Ok(());
        };
        if as_size == AsnLength::Bits32 {
            return Ok(());
        }

        let aggr = self.get_aggregator()?;
        let aggr4 = self.get_as4_aggregator()?;
        if let (Some(aggr), Some(_)) = (&aggr, &aggr4) {
            let asn = crate::codec::attrs::aggregator_as(aggr)?;
            if asn != Asn::TRANSITION {
                return Ok(());
            }
        }

        let Some(span4) = self.notable_span(NotableAttr::As4Path)? else {
            return Ok(());
        };

        let as_count = match self.count_ases(span, AsnLength::Bits16) {
            Ok(n) => n,
            Err(e) => return self.fail(e),
        };
        let as4_count = match self.count_ases(span4, AsnLength::Bits32) {
            Ok(n) => n,
            Err(e) => return self.fail(e),
        };
        if as_count < as4_count {
            return Ok(());
        }

        if let IterState::AsPath(it) = &mut self.iter {
            it.as4 = Some(span4);
            it.ascount = as_count - as4_count;
        }
        Ok(())
    }

    /// Counts the ASes of a path attribute region; a set counts as one.
    fn count_ases(&self, span: (usize, usize), width: AsnLength) -> Result<i32, BgpError> {
        let b = self.bytes();
        let (mut ptr, end) = span;
        let mut count = 0i32;
        while ptr < end {
            if ptr + AS_SEGMENT_HEADER_SIZE > end {
                return Err(BgpError::BadAttribute);
            }
            let seg_type = b[ptr];
            let seg_count = b[ptr + 1] as usize;
            ptr += AS_SEGMENT_HEADER_SIZE + seg_count * width.size();
            if ptr > end {
                return Err(BgpError::BadAttribute);
            }
            count += if seg_type == u8::from(AsSegmentType::Set) {
                1
            } else {
                seg_count as i32
            };
        }
        Ok(count)
    }

    /// Reads the next AS-path element.
    pub fn next_as_path_entry(&mut self) -> Result<Option<AsPathEntry>, BgpError> {
        let mut it = match std::mem::take(&mut self.iter) {
            IterState::AsPath(it) => it,
            other => {
                self.iter = other;
                return self.fail(BgpError::InvalidOp);
            }
        };

        loop {
            while it.seg_i == it.seg_len {
                if it.ptr == it.end {
                    self.iter = IterState::AsPath(it);
                    return Ok(None);
                }
                if it.ptr + AS_SEGMENT_HEADER_SIZE > it.end {
                    return self.fail(BgpError::BadAttribute);
                }
                let b = self.bytes();
                let Ok(seg_type) = AsSegmentType::try_from(b[it.ptr]) else {
                    return self.fail(BgpError::BadAttribute);
                };
                it.seg_type = seg_type;
                it.seg_len = b[it.ptr + 1];
                it.ptr += AS_SEGMENT_HEADER_SIZE;
                it.seg_i = 0;
                it.seg_no += 1;
            }

            let width = it.as_size.size();
            if it.ptr + width > it.end {
                return self.fail(BgpError::BadAttribute);
            }
            let b = self.bytes();
            let asn = match it.as_size {
                AsnLength::Bits16 => u16::from_be_bytes([b[it.ptr], b[it.ptr + 1]]) as u32,
                AsnLength::Bits32 => {
                    u32::from_be_bytes([b[it.ptr], b[it.ptr + 1], b[it.ptr + 2], b[it.ptr + 3]])
                }
            };
            it.ptr += width;
            it.seg_i += 1;

            if it.ascount != 0 {
                // only count down on the first set element or inside a
                // sequence; sets collapse to one hop
                if it.ascount > 0
                    && (it.seg_type != AsSegmentType::Set || it.seg_i == 1)
                {
                    it.ascount -= 1;
                }
                let entry = AsPathEntry {
                    segment_type: it.seg_type,
                    segment_no: it.seg_no,
                    as_size: it.as_size,
                    asn: Asn::new(asn),
                };
                self.iter = IterState::AsPath(it);
                return Ok(Some(entry));
            }

            // the AS_PATH quota is spent, commute to AS4_PATH
            let (p4, e4) = it.as4.take().expect("commute without AS4_PATH region");
            it.ptr = p4;
            it.end = e4;
            it.as_size = AsnLength::Bits32;
            it.seg_len = 0;
            it.seg_i = 0;
            it.ascount = -1;
        }
    }

    /// Ends the AS-path iterator.
    pub fn end_as_path(&mut self) -> Result<(), BgpError> {
        match std::mem::take(&mut self.iter) {
            IterState::AsPath(_) => self.check_ok(),
            other => {
                self.iter = other;
                self.fail(BgpError::InvalidOp)
            }
        }
    }

    // -- next hops -----------------------------------------------------------

    /// Starts iteration over the next hops: the legacy NEXT_HOP first, then
    /// the MP_REACH next-hop field.
    pub fn start_next_hop(&mut self) -> Result<(), BgpError> {
        self.check_type(BgpMsgType::Update)?;
        self.check_state(MsgState::Reading)?;
        self.end_pending()?;

        let mut iter = NextHopIter {
            ptr: 0,
            end: 0,
            family: AddrFamily::Unspec,
            mp: None,
        };

        if let Some((start, end)) = self.notable_span(NotableAttr::NextHop)? {
            if end - start != 4 {
                return self.fail(BgpError::BadAttribute);
            }
            iter.ptr = start;
            iter.end = end;
            iter.family = AddrFamily::Ipv4;
        }

        if let Some((start, end)) = self.notable_span(NotableAttr::MpReach)? {
            let b = self.bytes();
            if end - start < 5 {
                return self.fail(BgpError::BadAttribute);
            }
            let afi = Afi::try_from(u16::from_be_bytes([b[start], b[start + 1]]));
            let nh_len = b[start + 3] as usize;
            let nh_start = start + 4;
            if nh_start + nh_len > end {
                return self.fail(BgpError::BadAttribute);
            }
            match afi {
                Ok(afi) => iter.mp = Some((nh_start, nh_start + nh_len, afi.family())),
                Err(_) => return self.fail(BgpError::BadAttribute),
            }
        }

        self.iter = IterState::NextHop(iter);
        Ok(())
    }

    /// Reads the next hop address; IPv6 MP_REACH fields may carry a global
    /// and a link-local address back to back.
    pub fn next_next_hop(&mut self) -> Result<Option<NetAddr>, BgpError> {
        let (ptr, end, family) = match &mut self.iter {
            IterState::NextHop(it) => {
                if it.ptr == it.end {
                    match it.mp.take() {
                        Some((p, e, family)) => {
                            it.ptr = p;
                            it.end = e;
                            it.family = family;
                        }
                        None => return Ok(None),
                    }
                }
                (it.ptr, it.end, it.family)
            }
            _ => return self.fail(BgpError::InvalidOp),
        };

        let n = family.max_bitlen() as usize / 8;
        if n == 0 || ptr + n > end {
            return self.fail(BgpError::BadAttribute);
        }
        let addr = NetAddr::from_wire(family, family.max_bitlen(), &self.bytes()[ptr..ptr + n])
            .expect("next hop width already checked");
        if let IterState::NextHop(it) = &mut self.iter {
            it.ptr += n;
        }
        Ok(Some(addr))
    }

    /// Ends the next-hop iterator.
    pub fn end_next_hop(&mut self) -> Result<(), BgpError> {
        match std::mem::take(&mut self.iter) {
            IterState::NextHop(_) => self.check_ok(),
            other => {
                self.iter = other;
                self.fail(BgpError::InvalidOp)
            }
        }
    }

    // -- communities ---------------------------------------------------------

    /// Starts iteration over one community family, selected by attribute
    /// code (COMMUNITIES, EXTENDED_COMMUNITIES or LARGE_COMMUNITIES).
    pub fn start_communities(&mut self, code: AttrType) -> Result<(), BgpError> {
        self.check_type(BgpMsgType::Update)?;
        self.check_state(MsgState::Reading)?;
        self.end_pending()?;

        let slot = match code {
            AttrType::COMMUNITIES => NotableAttr::Communities,
            AttrType::EXTENDED_COMMUNITIES => NotableAttr::ExtendedCommunities,
            AttrType::LARGE_COMMUNITIES => NotableAttr::LargeCommunities,
            _ => return self.fail(BgpError::InvalidOp),
        };

        let (ptr, end) = self.notable_span(slot)?.unwrap_or((0, 0));
        self.iter = IterState::Communities(CommunityIter {
            code: slot.code(),
            ptr,
            end,
        });
        Ok(())
    }

    /// Reads the next community of the selected family.
    pub fn next_community(&mut self) -> Result<Option<CommunityItem>, BgpError> {
        let (code, ptr, end) = match &self.iter {
            IterState::Communities(it) => (it.code, it.ptr, it.end),
            _ => return self.fail(BgpError::InvalidOp),
        };
        if ptr == end {
            return Ok(None);
        }

        let b = self.bytes();
        let (item, size) = match AttrType::from(code) {
            AttrType::COMMUNITIES => {
                if end - ptr < 4 {
                    return self.fail(BgpError::BadAttribute);
                }
                let raw = u32::from_be_bytes([b[ptr], b[ptr + 1], b[ptr + 2], b[ptr + 3]]);
                (CommunityItem::Plain(Community(raw)), 4)
            }
            AttrType::EXTENDED_COMMUNITIES => {
                if end - ptr < 8 {
                    return self.fail(BgpError::BadAttribute);
                }
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&b[ptr..ptr + 8]);
                (CommunityItem::Extended(ExtendedCommunity::from_bytes(raw)), 8)
            }
            AttrType::LARGE_COMMUNITIES => {
                if end - ptr < 12 {
                    return self.fail(BgpError::BadAttribute);
                }
                let g = u32::from_be_bytes([b[ptr], b[ptr + 1], b[ptr + 2], b[ptr + 3]]);
                let hi = u32::from_be_bytes([b[ptr + 4], b[ptr + 5], b[ptr + 6], b[ptr + 7]]);
                let lo = u32::from_be_bytes([b[ptr + 8], b[ptr + 9], b[ptr + 10], b[ptr + 11]]);
                (CommunityItem::Large(LargeCommunity::new(g, hi, lo)), 12)
            }
            _ => unreachable!("community iterator with a non-community code"),
        };

        if let IterState::Communities(it) = &mut self.iter {
            it.ptr += size;
        }
        Ok(Some(item))
    }

    /// Ends the community iterator.
    pub fn end_communities(&mut self) -> Result<(), BgpError> {
        match std::mem::take(&mut self.iter) {
            IterState::Communities(_) => self.check_ok(),
            other => {
                self.iter = other;
                self.fail(BgpError::InvalidOp)
            }
        }
    }
}
