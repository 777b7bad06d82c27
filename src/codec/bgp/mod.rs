//! Streaming BGP message codec.
//!
//! A [`BgpMsg`] wraps one framed BGP message and moves through
//! `Idle -> Reading` or `Idle -> Writing -> Reading` states. While a message
//! is open, at most one sub-iterator is active at a time; starting a new one
//! settles any pending one, closing length fields it is responsible for.

mod aspath;
mod caps;
mod update;

pub use aspath::CommunityItem;
pub use update::Attr;

use crate::error::BgpError;
use crate::models::bgp::{BgpMsgType, BgpNotification, BgpOpen, NOTABLE_COUNT};
use crate::models::network::{Afi, Safi};
use bitflags::bitflags;
use bytes::{BufMut, Bytes, BytesMut};
use smallvec::SmallVec;
use std::io::Read;
use std::net::Ipv4Addr;

/// BGP packet marker, prepended to any message.
pub(crate) const BGP_MARKER: [u8; 16] = [0xff; 16];

// Fixed offsets inside a BGP message.
pub(crate) const LENGTH_OFFSET: usize = 16;
pub(crate) const TYPE_OFFSET: usize = 18;
pub(crate) const BASE_PACKET_LENGTH: usize = 19;

// OPEN message offsets.
pub(crate) const VERSION_OFFSET: usize = 19;
pub(crate) const MY_AS_OFFSET: usize = 20;
pub(crate) const HOLD_TIME_OFFSET: usize = 22;
pub(crate) const IDEN_OFFSET: usize = 24;
pub(crate) const PARAMS_LENGTH_OFFSET: usize = 28;
pub(crate) const PARAMS_OFFSET: usize = 29;
const MIN_OPEN_LENGTH: usize = PARAMS_OFFSET;

// NOTIFICATION message offsets.
const ERROR_CODE_OFFSET: usize = 19;
const MIN_NOTIFICATION_LENGTH: usize = 21;

const MIN_UPDATE_LENGTH: usize = BASE_PACKET_LENGTH + 4;
const ROUTE_REFRESH_LENGTH: usize = BASE_PACKET_LENGTH + 4;

/// Offset table sentinel: attribute scanned for and absent.
pub(crate) const OFFSET_NOT_FOUND: u16 = 0xffff;

bitflags! {
    /// Session and rebuild option flags for a [`BgpMsg`].
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
    pub struct BgpMsgFlags: u16 {
        /// Do not copy input bytes; the message borrows the shared buffer.
        const NO_COPY      = 1 << 0;
        /// The session negotiated 4-octet AS numbers.
        const ASN32BIT     = 1 << 1;
        /// NLRI and withdrawn entries carry 32-bit path identifiers.
        const ADD_PATH     = 1 << 2;
        /// MRT rebuild: source is a legacy TABLE_DUMP record.
        const LEGACY_MRT   = 1 << 3;
        /// MRT rebuild: force the collector-truncated MP_REACH form.
        const STD_MRT      = 1 << 4;
        /// MRT rebuild: force the full wire MP_REACH form.
        const FULL_MPREACH = 1 << 5;
        /// MRT rebuild: drop MP_UNREACH attributes entirely.
        const STRIP_UNREACH = 1 << 6;
    }
}

/// Lifecycle state of a message object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum MsgState {
    #[default]
    Idle,
    Reading,
    Writing,
}

/// Whether `finish()` keeps the notable-attribute offset table.
///
/// The MRT rebuild fills the table while emitting attributes and must keep
/// it through the finish; everything else clears it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishMode {
    Plain,
    PreserveOffsets,
}

/// Inline-capacity buffer preserving region tail bytes while a writer
/// sub-iterator appends into the middle of the message.
pub(crate) type PreserveBuf = SmallVec<[u8; 96]>;

/// Active sub-iterator state; at most one at a time.
#[derive(Default)]
pub(crate) enum IterState {
    #[default]
    None,
    /// OPEN optional parameters / capabilities.
    Caps(caps::CapsIter),
    /// Withdrawn routes (optionally continuing into MP_UNREACH).
    Withdrawn(update::PrefixIter),
    /// Path attribute list.
    Attrs(update::AttrsIter),
    /// NLRI (optionally continuing into MP_REACH).
    Nlri(update::PrefixIter),
    /// AS path (AS_PATH / AS4_PATH / reconstructed).
    AsPath(aspath::AsPathIter),
    /// NEXT_HOP concatenated with the MP_REACH next hop.
    NextHop(aspath::NextHopIter),
    /// One of the community families.
    Communities(aspath::CommunityIter),
}

enum MsgBuf {
    None,
    /// Borrowed read-only bytes (`NO_COPY` reads).
    Shared(Bytes),
    /// Owned, growable buffer.
    Owned(BytesMut),
}

impl Default for MsgBuf {
    fn default() -> Self {
        MsgBuf::None
    }
}

/// A single framed BGP message plus reader/writer state.
#[derive(Default)]
pub struct BgpMsg {
    pub(crate) state: MsgState,
    pub(crate) flags: BgpMsgFlags,
    pub(crate) err: Option<BgpError>,
    buf: MsgBuf,
    pub(crate) offtab: [u16; NOTABLE_COUNT],
    pub(crate) iter: IterState,
}

impl BgpMsg {
    pub fn new() -> BgpMsg {
        BgpMsg::default()
    }

    // -- raw buffer access ---------------------------------------------------

    pub(crate) fn bytes(&self) -> &[u8] {
        match &self.buf {
            MsgBuf::None => &[],
            MsgBuf::Shared(b) => b,
            MsgBuf::Owned(b) => b,
        }
    }

    /// Owned buffer for mutation; reading states may use a shared buffer,
    /// writers never do.
    pub(crate) fn buf_mut(&mut self) -> &mut BytesMut {
        match &mut self.buf {
            MsgBuf::Owned(b) => b,
            _ => unreachable!("writer with no owned buffer"),
        }
    }

    pub(crate) fn pktlen(&self) -> usize {
        self.bytes().len()
    }

    // -- error plumbing ------------------------------------------------------

    /// Latches `e` as the message error unless one is already recorded, and
    /// returns the latched error.
    pub(crate) fn fail<T>(&mut self, e: BgpError) -> Result<T, BgpError> {
        let e = *self.err.get_or_insert(e);
        Err(e)
    }

    pub(crate) fn check_ok(&self) -> Result<(), BgpError> {
        match self.err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub(crate) fn check_state(&mut self, state: MsgState) -> Result<(), BgpError> {
        self.check_ok()?;
        if self.state != state {
            return self.fail(BgpError::InvalidOp);
        }
        Ok(())
    }

    pub(crate) fn check_open(&mut self) -> Result<(), BgpError> {
        self.check_ok()?;
        if self.state == MsgState::Idle {
            return self.fail(BgpError::InvalidOp);
        }
        Ok(())
    }

    pub(crate) fn check_type(&mut self, ty: BgpMsgType) -> Result<(), BgpError> {
        self.check_open()?;
        if self.bytes()[TYPE_OFFSET] != u8::from(ty) {
            return self.fail(BgpError::InvalidOp);
        }
        Ok(())
    }

    // -- lifecycle -----------------------------------------------------------

    /// Opens `data` for reading. With [`BgpMsgFlags::NO_COPY`] the shared
    /// buffer is borrowed as-is and treated as immutable; otherwise the
    /// bytes are copied into the message's own buffer.
    pub fn set_read(&mut self, data: Bytes, flags: BgpMsgFlags) -> Result<(), BgpError> {
        if data.len() < BASE_PACKET_LENGTH || data[..16] != BGP_MARKER {
            return Err(BgpError::BadHeader);
        }
        let declared = u16::from_be_bytes([data[LENGTH_OFFSET], data[LENGTH_OFFSET + 1]]) as usize;
        if declared < BASE_PACKET_LENGTH || declared > data.len() {
            return Err(BgpError::BadHeader);
        }

        self.state = MsgState::Reading;
        self.flags = flags;
        self.err = None;
        self.iter = IterState::None;
        self.offtab = [0; NOTABLE_COUNT];
        self.buf = if flags.contains(BgpMsgFlags::NO_COPY) {
            MsgBuf::Shared(data.slice(..declared))
        } else {
            let mut owned = BytesMut::with_capacity(declared);
            owned.extend_from_slice(&data[..declared]);
            MsgBuf::Owned(owned)
        };
        Ok(())
    }

    /// Reads one framed message from `src`. A short read maps to
    /// [`BgpError::Io`], a bad marker or length to [`BgpError::BadHeader`].
    pub fn set_read_from<R: Read>(&mut self, src: &mut R, flags: BgpMsgFlags) -> Result<(), BgpError> {
        let mut hdr = [0u8; BASE_PACKET_LENGTH];
        src.read_exact(&mut hdr).map_err(|_| BgpError::Io)?;

        if hdr[..16] != BGP_MARKER {
            return Err(BgpError::BadHeader);
        }
        let len = u16::from_be_bytes([hdr[LENGTH_OFFSET], hdr[LENGTH_OFFSET + 1]]) as usize;
        if len < BASE_PACKET_LENGTH {
            return Err(BgpError::BadHeader);
        }

        let mut owned = BytesMut::zeroed(len);
        owned[..BASE_PACKET_LENGTH].copy_from_slice(&hdr);
        src.read_exact(&mut owned[BASE_PACKET_LENGTH..])
            .map_err(|_| BgpError::Io)?;

        self.state = MsgState::Reading;
        self.flags = flags & !BgpMsgFlags::NO_COPY;
        self.err = None;
        self.iter = IterState::None;
        self.offtab = [0; NOTABLE_COUNT];
        self.buf = MsgBuf::Owned(owned);
        Ok(())
    }

    /// Opens a fresh message of `ty` for writing: marker, zeroed length
    /// field and the minimum body for the type.
    pub fn set_write(&mut self, ty: BgpMsgType, flags: BgpMsgFlags) -> Result<(), BgpError> {
        let min_len = match ty {
            BgpMsgType::Open => MIN_OPEN_LENGTH,
            BgpMsgType::Update => MIN_UPDATE_LENGTH,
            BgpMsgType::Notification => MIN_NOTIFICATION_LENGTH,
            BgpMsgType::KeepAlive => BASE_PACKET_LENGTH,
            BgpMsgType::RouteRefresh => ROUTE_REFRESH_LENGTH,
        };

        let mut buf = BytesMut::with_capacity(min_len.max(64));
        buf.put_slice(&BGP_MARKER);
        buf.put_bytes(0, min_len - BGP_MARKER.len());
        buf[TYPE_OFFSET] = ty.into();

        self.state = MsgState::Writing;
        self.flags = flags & !BgpMsgFlags::NO_COPY;
        self.err = None;
        self.iter = IterState::None;
        self.offtab = [0; NOTABLE_COUNT];
        self.buf = MsgBuf::Owned(buf);
        Ok(())
    }

    /// Message type from the header.
    pub fn msg_type(&self) -> Result<BgpMsgType, BgpError> {
        if self.state == MsgState::Idle {
            return Err(BgpError::InvalidOp);
        }
        BgpMsgType::try_from(self.bytes()[TYPE_OFFSET]).map_err(|_| BgpError::BadType)
    }

    /// Message length from the header (only meaningful while reading).
    pub fn length(&self) -> usize {
        if self.state != MsgState::Reading {
            return 0;
        }
        let b = self.bytes();
        u16::from_be_bytes([b[LENGTH_OFFSET], b[LENGTH_OFFSET + 1]]) as usize
    }

    /// Latched error, if any.
    pub fn error(&self) -> Option<BgpError> {
        self.err
    }

    pub fn is_asn32bit(&self) -> bool {
        self.flags.contains(BgpMsgFlags::ASN32BIT)
    }

    pub fn is_addpath(&self) -> bool {
        self.flags.contains(BgpMsgFlags::ADD_PATH)
    }

    /// Raw message bytes (reading state only).
    pub fn data(&self) -> Option<&[u8]> {
        match self.state {
            MsgState::Reading => Some(self.bytes()),
            _ => None,
        }
    }

    /// Writes the finished message to a caller-supplied sink. A short write
    /// maps to [`BgpError::Io`].
    pub fn write_to<W: std::io::Write>(&mut self, sink: &mut W) -> Result<usize, BgpError> {
        self.check_state(MsgState::Reading)?;
        let n = self.pktlen();
        sink.write_all(self.bytes()).map_err(|_| BgpError::Io)?;
        Ok(n)
    }

    /// Settles any pending sub-iterator.
    pub(crate) fn end_pending(&mut self) -> Result<(), BgpError> {
        match self.iter {
            IterState::None => self.check_ok(),
            IterState::Caps(_) => self.end_caps(),
            IterState::Withdrawn(_) => self.end_withdrawn(),
            IterState::Attrs(_) => self.end_attribs(),
            IterState::Nlri(_) => self.end_nlri(),
            IterState::AsPath(_) => self.end_as_path(),
            IterState::NextHop(_) => self.end_next_hop(),
            IterState::Communities(_) => self.end_communities(),
        }
    }

    /// Closes the write: settles pending iterators, patches the length
    /// header in place and transitions to reading so the message can be
    /// re-parsed without reallocation.
    pub fn finish(&mut self) -> Result<usize, BgpError> {
        self.finish_mode(FinishMode::Plain)
    }

    pub fn finish_mode(&mut self, mode: FinishMode) -> Result<usize, BgpError> {
        self.check_state(MsgState::Writing)?;
        self.end_pending()?;

        let n = self.pktlen();
        if n > u16::MAX as usize {
            return self.fail(BgpError::InvalidOp);
        }
        let len = (n as u16).to_be_bytes();
        self.buf_mut()[LENGTH_OFFSET..LENGTH_OFFSET + 2].copy_from_slice(&len);

        if mode == FinishMode::Plain {
            self.offtab = [0; NOTABLE_COUNT];
        }
        self.state = MsgState::Reading;
        Ok(n)
    }

    /// Releases the buffer and returns to idle. Reports (and clears) the
    /// latched error.
    pub fn close(&mut self) -> Result<(), BgpError> {
        let err = self.err.take();
        self.buf = MsgBuf::None;
        self.state = MsgState::Idle;
        self.flags = BgpMsgFlags::empty();
        self.iter = IterState::None;
        self.offtab = [0; NOTABLE_COUNT];
        match err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    // -- OPEN fixed fields ---------------------------------------------------

    /// Reads the fixed OPEN fields.
    pub fn bgp_open(&mut self) -> Result<BgpOpen, BgpError> {
        self.check_type(BgpMsgType::Open)?;
        self.check_state(MsgState::Reading)?;
        let b = self.bytes();
        Ok(BgpOpen {
            version: b[VERSION_OFFSET],
            my_as: u16::from_be_bytes([b[MY_AS_OFFSET], b[MY_AS_OFFSET + 1]]),
            hold_time: u16::from_be_bytes([b[HOLD_TIME_OFFSET], b[HOLD_TIME_OFFSET + 1]]),
            identifier: Ipv4Addr::new(
                b[IDEN_OFFSET],
                b[IDEN_OFFSET + 1],
                b[IDEN_OFFSET + 2],
                b[IDEN_OFFSET + 3],
            ),
        })
    }

    /// Writes the fixed OPEN fields in place.
    pub fn set_bgp_open(&mut self, open: &BgpOpen) -> Result<(), BgpError> {
        self.check_type(BgpMsgType::Open)?;
        self.check_state(MsgState::Writing)?;
        let buf = self.buf_mut();
        buf[VERSION_OFFSET] = open.version;
        buf[MY_AS_OFFSET..MY_AS_OFFSET + 2].copy_from_slice(&open.my_as.to_be_bytes());
        buf[HOLD_TIME_OFFSET..HOLD_TIME_OFFSET + 2].copy_from_slice(&open.hold_time.to_be_bytes());
        buf[IDEN_OFFSET..IDEN_OFFSET + 4].copy_from_slice(&open.identifier.octets());
        Ok(())
    }

    // -- NOTIFICATION --------------------------------------------------------

    pub fn notification(&mut self) -> Result<BgpNotification, BgpError> {
        self.check_type(BgpMsgType::Notification)?;
        self.check_state(MsgState::Reading)?;
        let b = self.bytes();
        Ok(BgpNotification {
            error_code: b[ERROR_CODE_OFFSET],
            error_subcode: b[ERROR_CODE_OFFSET + 1],
            data: b[MIN_NOTIFICATION_LENGTH..].to_vec(),
        })
    }

    pub fn set_notification(&mut self, notif: &BgpNotification) -> Result<(), BgpError> {
        self.check_type(BgpMsgType::Notification)?;
        self.check_state(MsgState::Writing)?;
        let buf = self.buf_mut();
        buf[ERROR_CODE_OFFSET] = notif.error_code;
        buf[ERROR_CODE_OFFSET + 1] = notif.error_subcode;
        buf.truncate(MIN_NOTIFICATION_LENGTH);
        buf.extend_from_slice(&notif.data);
        Ok(())
    }

    // -- ROUTE_REFRESH -------------------------------------------------------

    pub fn route_refresh(&mut self) -> Result<(Afi, Safi), BgpError> {
        self.check_type(BgpMsgType::RouteRefresh)?;
        self.check_state(MsgState::Reading)?;
        let b = self.bytes();
        if b.len() < ROUTE_REFRESH_LENGTH {
            return self.fail(BgpError::BadHeader);
        }
        let afi = Afi::try_from(u16::from_be_bytes([b[19], b[20]]));
        let safi = Safi::try_from(b[22]);
        match (afi, safi) {
            (Ok(afi), Ok(safi)) => Ok((afi, safi)),
            _ => self.fail(BgpError::BadType),
        }
    }

    pub fn set_route_refresh(&mut self, afi: Afi, safi: Safi) -> Result<(), BgpError> {
        self.check_type(BgpMsgType::RouteRefresh)?;
        self.check_state(MsgState::Writing)?;
        let buf = self.buf_mut();
        buf[19..21].copy_from_slice(&u16::from(afi).to_be_bytes());
        buf[21] = 0;
        buf[22] = safi.into();
        Ok(())
    }
}
