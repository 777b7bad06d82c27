//! MRT envelope codec: record framing, BGP4MP unwrapping, TABLE_DUMP and
//! TABLE_DUMPv2 bodies, and the MRT to BGP UPDATE rebuild.

use crate::codec::bgp::{BgpMsg, BgpMsgFlags, FinishMode};
use crate::error::{BgpError, MrtError};
use crate::models::mrt::{
    Bgp4mpPeer, Bgp4mpSubtype, MrtHeader, MrtType, TableDumpV2Subtype, MRT_HEADER_SIZE,
};
use crate::models::network::{netaddr_size, AddrFamily, Afi, Asn, NetAddr, NetAddrAp};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use log::debug;
use std::cell::RefCell;
use std::io::Read;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum State {
    #[default]
    Idle,
    Reading,
    Writing,
}

/// A single framed MRT record.
#[derive(Default)]
pub struct MrtMsg {
    state: State,
    err: Option<MrtError>,
    buf: BytesMut,
    hdr: Option<MrtHeader>,
}

impl MrtMsg {
    pub fn new() -> MrtMsg {
        MrtMsg::default()
    }

    fn parse_header(data: &[u8]) -> Result<MrtHeader, MrtError> {
        if data.len() < MRT_HEADER_SIZE {
            return Err(MrtError::BadHeader);
        }
        let timestamp = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
        let raw_type = u16::from_be_bytes([data[4], data[5]]);
        let mrt_type = MrtType::try_from(raw_type).map_err(|_| MrtError::BadType)?;
        let subtype = u16::from_be_bytes([data[6], data[7]]);
        let length = u32::from_be_bytes([data[8], data[9], data[10], data[11]]);

        let microseconds = if mrt_type.is_extended() {
            if length < 4 || data.len() < MRT_HEADER_SIZE + 4 {
                return Err(MrtError::BadHeader);
            }
            Some(u32::from_be_bytes([data[12], data[13], data[14], data[15]]))
        } else {
            None
        };

        Ok(MrtHeader {
            timestamp,
            mrt_type,
            subtype,
            length,
            microseconds,
        })
    }

    /// Opens a record for reading; validates the 12-byte header and the
    /// body length.
    pub fn set_read(&mut self, data: Bytes) -> Result<(), MrtError> {
        let hdr = Self::parse_header(&data)?;
        let total = MRT_HEADER_SIZE + hdr.length as usize;
        if data.len() < total {
            return Err(MrtError::BadHeader);
        }

        self.buf = BytesMut::from(&data[..total]);
        self.hdr = Some(hdr);
        self.state = State::Reading;
        self.err = None;
        Ok(())
    }

    /// Reads one record from `src`; a short read is [`MrtError::Io`].
    pub fn set_read_from<R: Read>(&mut self, src: &mut R) -> Result<(), MrtError> {
        let mut hdr_raw = [0u8; MRT_HEADER_SIZE];
        src.read_exact(&mut hdr_raw).map_err(|_| MrtError::Io)?;
        let length = u32::from_be_bytes([hdr_raw[8], hdr_raw[9], hdr_raw[10], hdr_raw[11]]) as usize;

        let mut buf = BytesMut::zeroed(MRT_HEADER_SIZE + length);
        buf[..MRT_HEADER_SIZE].copy_from_slice(&hdr_raw);
        src.read_exact(&mut buf[MRT_HEADER_SIZE..])
            .map_err(|_| MrtError::Io)?;

        let hdr = Self::parse_header(&buf)?;
        self.buf = buf;
        self.hdr = Some(hdr);
        self.state = State::Reading;
        self.err = None;
        Ok(())
    }

    /// Opens a fresh record of `mrt_type`/`subtype` for writing; the length
    /// field is patched by [`finish`](Self::finish).
    pub fn set_write(&mut self, mrt_type: MrtType, subtype: u16, timestamp: u32) -> Result<(), MrtError> {
        let mut buf = BytesMut::with_capacity(64);
        buf.put_u32(timestamp);
        buf.put_u16(mrt_type.into());
        buf.put_u16(subtype);
        buf.put_u32(0);
        if mrt_type.is_extended() {
            buf.put_u32(0);
        }

        self.buf = buf;
        self.hdr = None;
        self.state = State::Writing;
        self.err = None;
        Ok(())
    }

    /// Appends raw body bytes (writer).
    pub fn put_body(&mut self, data: &[u8]) -> Result<(), MrtError> {
        if self.state != State::Writing {
            return Err(*self.err.get_or_insert(MrtError::InvalidOp));
        }
        self.buf.extend_from_slice(data);
        Ok(())
    }

    /// Patches the header length and flips to reading.
    pub fn finish(&mut self) -> Result<usize, MrtError> {
        if self.state != State::Writing {
            return Err(*self.err.get_or_insert(MrtError::InvalidOp));
        }
        let body = self.buf.len() - MRT_HEADER_SIZE;
        if body > u32::MAX as usize {
            return Err(*self.err.get_or_insert(MrtError::LengthOverflow));
        }
        self.buf[8..12].copy_from_slice(&(body as u32).to_be_bytes());
        self.hdr = Some(Self::parse_header(&self.buf)?);
        self.state = State::Reading;
        Ok(self.buf.len())
    }

    /// Drops the buffer, reporting the latched error.
    pub fn close(&mut self) -> Result<(), MrtError> {
        let err = self.err.take();
        self.buf = BytesMut::new();
        self.hdr = None;
        self.state = State::Idle;
        match err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn error(&self) -> Option<MrtError> {
        self.err
    }

    fn header(&self) -> Result<&MrtHeader, MrtError> {
        self.hdr.as_ref().ok_or(MrtError::InvalidOp)
    }

    pub fn mrt_type(&self) -> Result<MrtType, MrtError> {
        Ok(self.header()?.mrt_type)
    }

    pub fn subtype(&self) -> Result<u16, MrtError> {
        Ok(self.header()?.subtype)
    }

    pub fn timestamp(&self) -> Result<u32, MrtError> {
        Ok(self.header()?.timestamp)
    }

    pub fn microseconds(&self) -> Result<Option<u32>, MrtError> {
        Ok(self.header()?.microseconds)
    }

    /// Body length as carried in the header.
    pub fn length(&self) -> Result<usize, MrtError> {
        Ok(self.header()?.length as usize)
    }

    /// Raw record bytes, header included (readable states only).
    pub fn data(&self) -> Option<&[u8]> {
        match self.state {
            State::Reading => Some(&self.buf),
            _ => None,
        }
    }

    /// Writes the finished record to a caller-supplied sink. A short write
    /// maps to [`MrtError::Io`].
    pub fn write_to<W: std::io::Write>(&mut self, sink: &mut W) -> Result<usize, MrtError> {
        if self.state != State::Reading {
            return Err(*self.err.get_or_insert(MrtError::InvalidOp));
        }
        sink.write_all(&self.buf).map_err(|_| MrtError::Io)?;
        Ok(self.buf.len())
    }

    /// Record body, past the microsecond extension when present.
    pub fn body(&self) -> Result<&[u8], MrtError> {
        let hdr = self.header()?;
        let skip = if hdr.microseconds.is_some() { 4 } else { 0 };
        Ok(&self.buf[MRT_HEADER_SIZE + skip..])
    }

    // -- BGP4MP --------------------------------------------------------------

    /// True when the record wraps a verbatim BGP message.
    pub fn is_bgp_wrapper(&self) -> bool {
        let Ok(hdr) = self.header() else {
            return false;
        };
        if hdr.mrt_type != MrtType::BGP4MP && hdr.mrt_type != MrtType::BGP4MP_ET {
            return false;
        }
        Bgp4mpSubtype::try_from(hdr.subtype).map_or(false, |s| s.is_message())
    }

    /// Decodes the BGP4MP peer header and returns it together with the
    /// offset of the wrapped BGP message inside the body.
    fn bgp4mp_header(&self) -> Result<(Bgp4mpPeer, usize), MrtError> {
        let hdr = self.header()?;
        let subtype = Bgp4mpSubtype::try_from(hdr.subtype).map_err(|_| MrtError::BadType)?;
        let body = self.body()?;
        let mut cur = body;

        let as_width = if subtype.is_asn32() { 4 } else { 2 };
        let need = as_width * 2 + 4;
        if cur.len() < need {
            return Err(MrtError::BadHeader);
        }

        let read_as = |cur: &mut &[u8]| -> Asn {
            if as_width == 4 {
                Asn::new(cur.get_u32())
            } else {
                Asn::new(cur.get_u16() as u32)
            }
        };
        let peer_as = read_as(&mut cur);
        let local_as = read_as(&mut cur);
        let interface_index = cur.get_u16();
        let afi = Afi::try_from(cur.get_u16()).map_err(|_| MrtError::BadType)?;

        let addr_size = match afi {
            Afi::Ipv4 => 4,
            Afi::Ipv6 => 16,
        };
        if cur.len() < addr_size * 2 {
            return Err(MrtError::BadHeader);
        }
        let mut read_addr = |cur: &mut &[u8]| -> IpAddr {
            match afi {
                Afi::Ipv4 => IpAddr::V4(Ipv4Addr::from(cur.get_u32())),
                Afi::Ipv6 => IpAddr::V6(Ipv6Addr::from(cur.get_u128())),
            }
        };
        let peer_addr = read_addr(&mut cur);
        let local_addr = read_addr(&mut cur);

        let consumed = body.len() - cur.len();
        Ok((
            Bgp4mpPeer {
                peer_as,
                local_as,
                interface_index,
                afi,
                peer_addr,
                local_addr,
            },
            consumed,
        ))
    }

    /// Peer view of a BGP4MP message record.
    pub fn bgp4mp_peer(&self) -> Result<Bgp4mpPeer, MrtError> {
        self.bgp4mp_header().map(|(peer, _)| peer)
    }

    /// Extracts the wrapped BGP message bytes of a BGP4MP message record,
    /// along with the peer header and the session flags the subtype
    /// implies.
    pub fn unwrap_bgp4mp(&self) -> Result<(Bgp4mpPeer, BgpMsgFlags, Bytes), MrtError> {
        if !self.is_bgp_wrapper() {
            return Err(MrtError::BadType);
        }
        let subtype = Bgp4mpSubtype::try_from(self.header()?.subtype).unwrap();
        let (peer, off) = self.bgp4mp_header()?;

        let mut flags = BgpMsgFlags::NO_COPY;
        if subtype.is_asn32() {
            flags |= BgpMsgFlags::ASN32BIT;
        }
        if subtype.is_addpath() {
            flags |= BgpMsgFlags::ADD_PATH;
        }

        let body = self.body()?;
        Ok((peer, flags, Bytes::copy_from_slice(&body[off..])))
    }

    // -- TABLE_DUMP (legacy) -------------------------------------------------

    /// Decodes a legacy TABLE_DUMP body.
    pub fn table_dump_entry(&self) -> Result<TableDumpEntry, MrtError> {
        let hdr = self.header()?;
        if hdr.mrt_type != MrtType::TABLE_DUMP {
            return Err(MrtError::BadType);
        }
        let afi = Afi::try_from(hdr.subtype).map_err(|_| MrtError::BadType)?;
        let addr_size = match afi {
            Afi::Ipv4 => 4,
            Afi::Ipv6 => 16,
        };
        let mut cur = self.body()?;
        if cur.len() < 2 + 2 + addr_size + 1 + 1 + 4 + addr_size + 2 + 2 {
            return Err(MrtError::BadHeader);
        }

        let view = cur.get_u16();
        let sequence = cur.get_u16();
        let mut read_addr = |cur: &mut &[u8]| -> IpAddr {
            match afi {
                Afi::Ipv4 => IpAddr::V4(Ipv4Addr::from(cur.get_u32())),
                Afi::Ipv6 => IpAddr::V6(Ipv6Addr::from(cur.get_u128())),
            }
        };
        let addr = read_addr(&mut cur);
        let bitlen = cur.get_u8();
        let status = cur.get_u8();
        let originated = cur.get_u32();
        let peer_addr = read_addr(&mut cur);
        let peer_as = Asn::new(cur.get_u16() as u32);
        let attr_len = cur.get_u16() as usize;
        if cur.len() < attr_len {
            return Err(MrtError::BadHeader);
        }

        let prefix = NetAddr::from(ipnet::IpNet::new(addr, bitlen).map_err(|_| MrtError::BadHeader)?);
        Ok(TableDumpEntry {
            view,
            sequence,
            prefix,
            status,
            originated,
            peer_addr,
            peer_as,
            attrs: Bytes::copy_from_slice(&cur[..attr_len]),
        })
    }

    // -- TABLE_DUMP_V2 -------------------------------------------------------

    fn table_dump_v2_subtype(&self) -> Result<TableDumpV2Subtype, MrtError> {
        let hdr = self.header()?;
        if hdr.mrt_type != MrtType::TABLE_DUMP_V2 {
            return Err(MrtError::BadType);
        }
        TableDumpV2Subtype::try_from(hdr.subtype).map_err(|_| MrtError::BadType)
    }

    /// Decodes a PEER_INDEX_TABLE body; any other subtype reports
    /// [`MrtError::NotPeerIndexTable`].
    pub fn peer_index_table(&self) -> Result<PeerIndexTable, MrtError> {
        if self.table_dump_v2_subtype()? != TableDumpV2Subtype::PeerIndexTable {
            return Err(MrtError::NotPeerIndexTable);
        }
        let mut cur = self.body()?;
        if cur.len() < 8 {
            return Err(MrtError::BadHeader);
        }
        let collector_id = Ipv4Addr::from(cur.get_u32());
        let name_len = cur.get_u16() as usize;
        if cur.len() < name_len + 2 {
            return Err(MrtError::BadHeader);
        }
        let view_name = cur[..name_len].iter().map(|&b| b as char).collect();
        cur.advance(name_len);

        let count = cur.get_u16() as usize;
        let mut peers = Vec::with_capacity(count);
        for _ in 0..count {
            if cur.is_empty() {
                return Err(MrtError::BadHeader);
            }
            let peer_type = cur.get_u8();
            let v6 = peer_type & 0x01 != 0;
            let as32 = peer_type & 0x02 != 0;
            let need = 4 + if v6 { 16 } else { 4 } + if as32 { 4 } else { 2 };
            if cur.len() < need {
                return Err(MrtError::BadHeader);
            }
            let bgp_id = Ipv4Addr::from(cur.get_u32());
            let addr = if v6 {
                IpAddr::V6(Ipv6Addr::from(cur.get_u128()))
            } else {
                IpAddr::V4(Ipv4Addr::from(cur.get_u32()))
            };
            let asn = if as32 {
                Asn::new(cur.get_u32())
            } else {
                Asn::new(cur.get_u16() as u32)
            };
            peers.push(PeerEntry {
                peer_type,
                bgp_id,
                addr,
                asn,
            });
        }

        Ok(PeerIndexTable {
            collector_id,
            view_name,
            peers,
        })
    }

    /// Decodes and installs this record's peer index table as the current
    /// one for RIB resolution on this thread.
    pub fn install_peer_index_table(&self) -> Result<(), MrtError> {
        let table = self.peer_index_table()?;
        CURRENT_PEER_INDEX.with(|slot| *slot.borrow_mut() = Some(Rc::new(table)));
        Ok(())
    }

    /// Decodes a TABLE_DUMPv2 RIB_* body into its entries.
    pub fn rib_entries(&self) -> Result<RibAfiEntries, MrtError> {
        let subtype = self.table_dump_v2_subtype()?;
        let Some(afi) = subtype.afi() else {
            return Err(MrtError::BadType);
        };
        let addpath = subtype.is_addpath();

        let mut cur = self.body()?;
        if cur.len() < 5 {
            return Err(MrtError::BadHeader);
        }
        let sequence = cur.get_u32();
        let bitlen = cur.get_u8();
        let n = netaddr_size(bitlen);
        if cur.len() < n + 2 {
            return Err(MrtError::BadHeader);
        }
        let prefix = NetAddr::from_wire(afi.family(), bitlen, &cur[..n]).ok_or(MrtError::BadHeader)?;
        cur.advance(n);

        let count = cur.get_u16() as usize;
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            let need = 2 + 4 + if addpath { 4 } else { 0 } + 2;
            if cur.len() < need {
                return Err(MrtError::BadHeader);
            }
            let peer_index = cur.get_u16();
            let originated = cur.get_u32();
            let path_id = if addpath { cur.get_u32() } else { 0 };
            let attr_len = cur.get_u16() as usize;
            if cur.len() < attr_len {
                return Err(MrtError::BadHeader);
            }
            let attrs = Bytes::copy_from_slice(&cur[..attr_len]);
            cur.advance(attr_len);
            entries.push(RibEntry {
                peer_index,
                originated,
                path_id,
                attrs,
            });
        }

        Ok(RibAfiEntries {
            sequence,
            prefix,
            addpath,
            entries,
        })
    }
}

/// One decoded legacy TABLE_DUMP record body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDumpEntry {
    pub view: u16,
    pub sequence: u16,
    pub prefix: NetAddr,
    pub status: u8,
    pub originated: u32,
    pub peer_addr: IpAddr,
    pub peer_as: Asn,
    pub attrs: Bytes,
}

/// One peer of a PEER_INDEX_TABLE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerEntry {
    pub peer_type: u8,
    pub bgp_id: Ipv4Addr,
    pub addr: IpAddr,
    pub asn: Asn,
}

/// A decoded PEER_INDEX_TABLE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerIndexTable {
    pub collector_id: Ipv4Addr,
    pub view_name: String,
    pub peers: Vec<PeerEntry>,
}

impl PeerIndexTable {
    pub fn entry(&self, index: u16) -> Option<&PeerEntry> {
        self.peers.get(index as usize)
    }
}

/// A decoded RIB_* record body: prefix plus per-peer entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RibAfiEntries {
    pub sequence: u32,
    pub prefix: NetAddr,
    pub addpath: bool,
    pub entries: Vec<RibEntry>,
}

/// One RIB entry: peer, timestamps and the reduced attribute blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RibEntry {
    pub peer_index: u16,
    pub originated: u32,
    pub path_id: u32,
    pub attrs: Bytes,
}

impl RibEntry {
    /// Resolves the peer through the thread's current peer index table.
    pub fn resolve_peer(&self) -> Option<PeerEntry> {
        CURRENT_PEER_INDEX.with(|slot| {
            slot.borrow()
                .as_ref()
                .and_then(|t| t.entry(self.peer_index).cloned())
        })
    }
}

thread_local! {
    /// The peer index table RIB records on this thread resolve against.
    static CURRENT_PEER_INDEX: RefCell<Option<Rc<PeerIndexTable>>> = const { RefCell::new(None) };
}

/// Current peer index table of this thread, if one was installed.
pub fn current_peer_index_table() -> Option<Rc<PeerIndexTable>> {
    CURRENT_PEER_INDEX.with(|slot| slot.borrow().clone())
}

/// Drops the thread's current peer index table.
pub fn clear_peer_index_table() {
    CURRENT_PEER_INDEX.with(|slot| *slot.borrow_mut() = None);
}

// -- MRT to BGP rebuild -------------------------------------------------------

const ATTR_EXTENDED_LENGTH: u8 = 0x10;
const MP_REACH_CODE: u8 = 14;
const MP_UNREACH_CODE: u8 = 15;
const AS_PATH_CODE: u8 = 2;

/// True when an MP_REACH value uses the collector-truncated form (RFC 6396
/// elides AFI/SAFI and keeps only the next-hop field).
fn is_mrt_truncated(value: &[u8], afi: Afi) -> bool {
    value.len() < 3 || value[0] != 0 || value[1] != u16::from(afi) as u8 || value[2] != 1
}

/// Synthesizes a valid BGP UPDATE from a RIB entry's attribute blob and its
/// NLRI, as collected in `msg`.
///
/// Flags select the rebuild policy: [`BgpMsgFlags::LEGACY_MRT`] for
/// TABLE_DUMP sources (implies 2-octet ASes and the full MP_REACH form),
/// [`BgpMsgFlags::STD_MRT`] / [`BgpMsgFlags::FULL_MPREACH`] to force the
/// truncated or full source interpretation (auto-detected when neither is
/// given), [`BgpMsgFlags::STRIP_UNREACH`] to drop MP_UNREACH attributes.
pub fn rebuild_bgp_from_rib(
    msg: &mut BgpMsg,
    nlri: &NetAddrAp,
    attrs: &[u8],
    mut flags: BgpMsgFlags,
) -> Result<(), MrtError> {
    use crate::models::bgp::{BgpMsgType, NotableAttr, NOTABLE_COUNT};

    if flags.contains(BgpMsgFlags::LEGACY_MRT) {
        // legacy TABLE DUMP has 16-bit ASes and no path ids on the wire
        flags &= !(BgpMsgFlags::ASN32BIT | BgpMsgFlags::ADD_PATH | BgpMsgFlags::STD_MRT);
        flags |= BgpMsgFlags::FULL_MPREACH;
    }

    msg.set_write(BgpMsgType::Update, flags).map_err(MrtError::Bgp)?;
    let addpath = msg.is_addpath();
    let asn32 = msg.is_asn32bit();

    // the attribute copy loop records offsets directly; mark every slot
    // absent and fill in what actually gets written
    msg.offtab = [super::bgp::OFFSET_NOT_FOUND; NOTABLE_COUNT];

    let fail = |msg: &mut BgpMsg| -> Result<(), MrtError> {
        let _ = msg.close();
        Err(MrtError::Bgp(BgpError::BadAttribute))
    };

    let mut out: Vec<u8> = Vec::with_capacity(attrs.len() + 32);
    let mut src = attrs;
    let mut seen_mp_reach = false;

    while !src.is_empty() {
        if src.len() < 3 {
            return fail(msg);
        }
        let aflags = src[0];
        let code = src[1];
        let (len, hdr_size) = if aflags & ATTR_EXTENDED_LENGTH != 0 {
            if src.len() < 4 {
                return fail(msg);
            }
            (u16::from_be_bytes([src[2], src[3]]) as usize, 4)
        } else {
            (src[2] as usize, 3)
        };
        if src.len() < hdr_size + len {
            return fail(msg);
        }
        let value = &src[hdr_size..hdr_size + len];

        // record where this attribute lands in the output message
        if let Some(slot) = NotableAttr::from_code(code) {
            msg.offtab[slot as usize] = (out.len() + super::bgp::BASE_PACKET_LENGTH + 4) as u16;
        }

        match code {
            MP_REACH_CODE => {
                seen_mp_reach = true;
                let afi = match nlri.addr.family() {
                    AddrFamily::Ipv4 => Afi::Ipv4,
                    AddrFamily::Ipv6 => Afi::Ipv6,
                    AddrFamily::Unspec => return fail(msg),
                };

                let mut truncated = true; // assume the collector form
                if flags.contains(BgpMsgFlags::FULL_MPREACH) {
                    truncated = false;
                } else if !flags.contains(BgpMsgFlags::STD_MRT) {
                    truncated = is_mrt_truncated(value, afi);
                }

                // keep only the next-hop field from the source bytes
                let nh_field = if truncated {
                    value
                } else {
                    if value.len() < 4 {
                        return fail(msg);
                    }
                    let n = value[3] as usize + 1;
                    if 3 + n > value.len() {
                        return fail(msg);
                    }
                    &value[3..3 + n]
                };

                let addr_len = netaddr_size(nlri.addr.bitlen());
                let mut expanded = 2 + 1 + nh_field.len() + 1 + 1 + addr_len;
                if addpath {
                    expanded += 4;
                }

                if expanded > 0xff {
                    out.push(0x80 | ATTR_EXTENDED_LENGTH);
                    out.push(MP_REACH_CODE);
                    out.extend_from_slice(&(expanded as u16).to_be_bytes());
                } else {
                    out.push(0x80);
                    out.push(MP_REACH_CODE);
                    out.push(expanded as u8);
                }
                out.extend_from_slice(&u16::from(afi).to_be_bytes());
                out.push(1); // SAFI unicast
                out.extend_from_slice(nh_field);
                out.push(0); // reserved
                if addpath {
                    out.extend_from_slice(&nlri.path_id.to_be_bytes());
                }
                out.push(nlri.addr.bitlen());
                out.extend_from_slice(nlri.addr.wire_bytes());
            }
            MP_UNREACH_CODE if flags.contains(BgpMsgFlags::STRIP_UNREACH) => {
                debug!("dropping MP_UNREACH attribute during rebuild");
                msg.offtab[NotableAttr::MpUnreach as usize] = super::bgp::OFFSET_NOT_FOUND;
            }
            AS_PATH_CODE if !asn32 && !flags.contains(BgpMsgFlags::LEGACY_MRT) => {
                // TABLE_DUMP_V2 widens every AS to 32 bits; narrow them back,
                // insisting the two high-order bytes really are zero
                let mut narrowed: Vec<u8> = Vec::with_capacity(len / 2 + 2);
                let mut p = value;
                while !p.is_empty() {
                    if p.len() < 2 {
                        return fail(msg);
                    }
                    let seg_type = p[0];
                    let seg_count = p[1] as usize;
                    p = &p[2..];
                    if p.len() < seg_count * 4 {
                        return fail(msg);
                    }
                    narrowed.push(seg_type);
                    narrowed.push(seg_count as u8);
                    for _ in 0..seg_count {
                        if p[0] != 0 || p[1] != 0 {
                            return fail(msg);
                        }
                        narrowed.extend_from_slice(&p[2..4]);
                        p = &p[4..];
                    }
                }
                if aflags & ATTR_EXTENDED_LENGTH != 0 {
                    out.push(aflags);
                    out.push(code);
                    out.extend_from_slice(&(narrowed.len() as u16).to_be_bytes());
                } else {
                    out.push(aflags);
                    out.push(code);
                    out.push(narrowed.len() as u8);
                }
                out.extend_from_slice(&narrowed);
            }
            _ => {
                // everything else is copied verbatim
                out.extend_from_slice(&src[..hdr_size + len]);
            }
        }

        src = &src[hdr_size + len..];
    }

    // a v6 NLRI can only travel inside MP_REACH
    if nlri.addr.family() == AddrFamily::Ipv6 && !seen_mp_reach {
        return fail(msg);
    }

    // splice the attribute list into the update body
    {
        let buf = msg.buf_mut();
        buf[super::bgp::BASE_PACKET_LENGTH + 2..super::bgp::BASE_PACKET_LENGTH + 4]
            .copy_from_slice(&(out.len() as u16).to_be_bytes());
        buf.extend_from_slice(&out);

        if nlri.addr.family() == AddrFamily::Ipv4 {
            if addpath {
                buf.extend_from_slice(&nlri.path_id.to_be_bytes());
            }
            buf.extend_from_slice(&[nlri.addr.bitlen()]);
            buf.extend_from_slice(nlri.addr.wire_bytes());
        }
    }

    msg.finish_mode(FinishMode::PreserveOffsets)
        .map_err(MrtError::Bgp)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_round_trip() {
        let mut rec = MrtMsg::new();
        rec.set_write(MrtType::BGP4MP, Bgp4mpSubtype::Message.into(), 1_600_000_000)
            .unwrap();
        rec.put_body(&[1, 2, 3, 4]).unwrap();
        let n = rec.finish().unwrap();
        assert_eq!(n, MRT_HEADER_SIZE + 4);

        assert_eq!(rec.mrt_type().unwrap(), MrtType::BGP4MP);
        assert_eq!(rec.subtype().unwrap(), u16::from(Bgp4mpSubtype::Message));
        assert_eq!(rec.timestamp().unwrap(), 1_600_000_000);
        assert_eq!(rec.length().unwrap(), 4);
        assert_eq!(rec.body().unwrap(), &[1, 2, 3, 4]);
        assert_eq!(rec.microseconds().unwrap(), None);
    }

    #[test]
    fn test_extended_timestamp() {
        let mut rec = MrtMsg::new();
        rec.set_write(MrtType::BGP4MP_ET, Bgp4mpSubtype::Message.into(), 1000)
            .unwrap();
        // the microsecond field occupies the first body bytes
        rec.buf[MRT_HEADER_SIZE..MRT_HEADER_SIZE + 4].copy_from_slice(&123456u32.to_be_bytes());
        rec.put_body(&[9]).unwrap();
        rec.finish().unwrap();

        assert_eq!(rec.microseconds().unwrap(), Some(123456));
        assert_eq!(rec.body().unwrap(), &[9]);
        // wire length includes the extension
        assert_eq!(rec.length().unwrap(), 5);
    }

    #[test]
    fn test_short_record_is_bad_header() {
        let mut rec = MrtMsg::new();
        let mut raw = vec![0u8; 12];
        raw[4..6].copy_from_slice(&16u16.to_be_bytes()); // BGP4MP
        raw[8..12].copy_from_slice(&100u32.to_be_bytes()); // body longer than data
        assert_eq!(rec.set_read(Bytes::from(raw)).unwrap_err(), MrtError::BadHeader);
    }

    #[test]
    fn test_unknown_type_is_bad_type() {
        let mut rec = MrtMsg::new();
        let mut raw = vec![0u8; 12];
        raw[4..6].copy_from_slice(&2u16.to_be_bytes()); // deprecated MRT_DIE
        assert_eq!(rec.set_read(Bytes::from(raw)).unwrap_err(), MrtError::BadType);
    }

    #[test]
    fn test_peer_index_table() {
        let mut body = BytesMut::new();
        body.put_u32(u32::from(Ipv4Addr::new(198, 51, 100, 1)));
        body.put_u16(4);
        body.put_slice(b"view");
        body.put_u16(2);
        // v4 peer, 16-bit AS
        body.put_u8(0x00);
        body.put_u32(u32::from(Ipv4Addr::new(10, 0, 0, 1)));
        body.put_u32(u32::from(Ipv4Addr::new(192, 0, 2, 1)));
        body.put_u16(65000);
        // v6 peer, 32-bit AS
        body.put_u8(0x03);
        body.put_u32(u32::from(Ipv4Addr::new(10, 0, 0, 2)));
        body.put_u128(u128::from("2001:db8::2".parse::<Ipv6Addr>().unwrap()));
        body.put_u32(200000);

        let mut rec = MrtMsg::new();
        rec.set_write(
            MrtType::TABLE_DUMP_V2,
            TableDumpV2Subtype::PeerIndexTable.into(),
            0,
        )
        .unwrap();
        rec.put_body(&body).unwrap();
        rec.finish().unwrap();

        let table = rec.peer_index_table().unwrap();
        assert_eq!(table.view_name, "view");
        assert_eq!(table.peers.len(), 2);
        assert_eq!(table.entry(0).unwrap().asn, Asn::new(65000));
        assert_eq!(table.entry(1).unwrap().asn, Asn::new(200000));
        assert_eq!(
            table.entry(1).unwrap().addr,
            "2001:db8::2".parse::<IpAddr>().unwrap()
        );
        assert!(table.entry(2).is_none());

        rec.install_peer_index_table().unwrap();
        assert_eq!(current_peer_index_table().unwrap().view_name, "view");
        clear_peer_index_table();
        assert!(current_peer_index_table().is_none());
    }

    #[test]
    fn test_not_peer_index_table() {
        let mut rec = MrtMsg::new();
        rec.set_write(
            MrtType::TABLE_DUMP_V2,
            TableDumpV2Subtype::RibIpv4Unicast.into(),
            0,
        )
        .unwrap();
        rec.put_body(&[0; 16]).unwrap();
        rec.finish().unwrap();
        assert_eq!(
            rec.peer_index_table().unwrap_err(),
            MrtError::NotPeerIndexTable
        );
    }
}
