/*!
error module defines the error types used across the bgpsieve codecs and the
filter virtual machine.
*/
use std::fmt::{Display, Formatter};
use std::{error::Error, fmt, io};

/// Errors reported by the BGP message codec.
///
/// `Ok(())` plays the role of the classic `ENOERR`; every other condition is
/// one of these variants. Misuse of the API (wrong state, wrong message
/// type, nested sub-iterators) is always [`BgpError::InvalidOp`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BgpError {
    /// Short read/write against the caller supplied byte source or sink.
    Io,
    /// Operation does not match the message state (e.g. put on a reader).
    InvalidOp,
    /// Marker or length field of the BGP header is invalid.
    BadHeader,
    /// Unrecognized BGP message type octet.
    BadType,
    /// OPEN optional parameters length is inconsistent with the message.
    BadParamLen,
    /// UPDATE withdrawn routes field is truncated or inconsistent.
    BadWithdrawn,
    /// UPDATE path attribute list is truncated or inconsistent.
    BadAttribute,
    /// UPDATE NLRI field is truncated or inconsistent.
    BadNlri,
}

impl Display for BgpError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            BgpError::Io => write!(f, "I/O error"),
            BgpError::InvalidOp => write!(f, "invalid operation"),
            BgpError::BadHeader => write!(f, "bad BGP header"),
            BgpError::BadType => write!(f, "bad BGP message type"),
            BgpError::BadParamLen => {
                write!(f, "oversized or inconsistent BGP open parameters length")
            }
            BgpError::BadWithdrawn => {
                write!(f, "oversized or inconsistent BGP update withdrawn field")
            }
            BgpError::BadAttribute => write!(f, "malformed attribute list"),
            BgpError::BadNlri => write!(f, "oversized or inconsistent BGP update NLRI field"),
        }
    }
}

impl Error for BgpError {}

impl From<io::Error> for BgpError {
    fn from(_: io::Error) -> Self {
        BgpError::Io
    }
}

/// Errors reported by the MRT envelope codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MrtError {
    /// Short read against the caller supplied byte source.
    Io,
    /// Operation does not match the record state.
    InvalidOp,
    /// MRT header length field shorter than the fixed header.
    BadHeader,
    /// Unrecognized or unsupported MRT type/subtype.
    BadType,
    /// The wrapped BGP message failed to decode or rebuild.
    Bgp(BgpError),
    /// Header length plus wrapped data length overflows the record.
    LengthOverflow,
    /// The record opened as a peer index table is not one.
    NotPeerIndexTable,
}

impl Display for MrtError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            MrtError::Io => write!(f, "I/O error"),
            MrtError::InvalidOp => write!(f, "invalid operation"),
            MrtError::BadHeader => write!(f, "bad MRT header"),
            MrtError::BadType => write!(f, "bad MRT record type"),
            MrtError::Bgp(e) => write!(f, "error in wrapped BGP message: {e}"),
            MrtError::LengthOverflow => write!(f, "MRT length overflow"),
            MrtError::NotPeerIndexTable => write!(f, "record is not a peer index table"),
        }
    }
}

impl Error for MrtError {}

impl From<BgpError> for MrtError {
    fn from(e: BgpError) -> Self {
        MrtError::Bgp(e)
    }
}

impl From<io::Error> for MrtError {
    fn from(_: io::Error) -> Self {
        MrtError::Io
    }
}

/// Filter virtual machine trap codes.
///
/// Any of these aborts the whole `filter()` invocation; the VM resets its
/// temporary heap zone and block stack before surfacing the trap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmError {
    OutOfMemory,
    StackOverflow,
    StackUnderflow,
    /// `CALL` to an index with no registered intrinsic.
    FuncUndefined,
    /// `LOADK` or compare against a constant slot that was never defined.
    KUndefined,
    /// Current trie family does not match the requested operation.
    TrieMismatch,
    /// `SETTRIE`/`SETTRIE6` index beyond the allocated tries.
    TrieUndefined,
    /// Filter requires a packet kind that is not loaded (e.g. BGP opcodes
    /// while only an MRT record without a wrapped BGP message is present).
    PacketMismatch,
    /// Packet iteration failed mid-way; the message is corrupted.
    BadPacket,
    IllegalOpcode,
    /// `BLK` target lands outside the program.
    BadBlock,
    BlocksOverflow,
    /// A cell held bytes no opcode contract gives a meaning to.
    SurprisingBytes,
    /// Access mode bits name no packet collection.
    BadAccessor,
    /// Array cell points outside the VM heap.
    BadArray,
    BadHeapPtr,
}

impl Display for VmError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let msg = match self {
            VmError::OutOfMemory => "out of memory",
            VmError::StackOverflow => "stack overflow",
            VmError::StackUnderflow => "stack underflow",
            VmError::FuncUndefined => "reference to undefined function",
            VmError::KUndefined => "reference to undefined constant",
            VmError::TrieMismatch => "trie/prefix family mismatch",
            VmError::TrieUndefined => "reference to undefined trie",
            VmError::PacketMismatch => "mismatched packet type for this filter",
            VmError::BadPacket => "packet corruption detected",
            VmError::IllegalOpcode => "illegal instruction",
            VmError::BadBlock => "BLK instruction targets out of bounds code",
            VmError::BlocksOverflow => "blocks overflow, too many nested blocks",
            VmError::SurprisingBytes => "cannot make sense of these bytes",
            VmError::BadAccessor => "unknown packet accessor",
            VmError::BadArray => "array cell out of heap bounds",
            VmError::BadHeapPtr => "bad heap pointer",
        };
        write!(f, "{msg}")
    }
}

impl Error for VmError {}

/// Errors reported by the filter compiler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterError {
    /// Source program could not be compiled; `near` holds the offending
    /// token when one is available.
    Syntax { msg: String, near: Option<String> },
    /// Compile-time constant evaluation tripped a VM limit.
    Vm(VmError),
}

impl FilterError {
    pub(crate) fn syntax(msg: impl Into<String>) -> Self {
        FilterError::Syntax {
            msg: msg.into(),
            near: None,
        }
    }

    pub(crate) fn syntax_near(msg: impl Into<String>, near: impl Into<String>) -> Self {
        FilterError::Syntax {
            msg: msg.into(),
            near: Some(near.into()),
        }
    }
}

impl Display for FilterError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            FilterError::Syntax { msg, near: None } => write!(f, "{msg}"),
            FilterError::Syntax {
                msg,
                near: Some(tok),
            } => write!(f, "{msg} (near '{tok}')"),
            FilterError::Vm(e) => write!(f, "{e}"),
        }
    }
}

impl Error for FilterError {}

impl From<VmError> for FilterError {
    fn from(e: VmError) -> Self {
        FilterError::Vm(e)
    }
}
