//! Filter VM bytecode: 16-bit words, low byte opcode, high byte argument.
//!
//! Larger arguments ride in front of their instruction as `EXARG` prefixes,
//! most significant byte first; up to three of them widen the effective
//! argument to 32 bits.

use crate::error::VmError;
use bitflags::bitflags;
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// One bytecode word.
pub type Bytecode = u16;

/// Filter virtual machine opcodes.
#[derive(Debug, TryFromPrimitive, IntoPrimitive, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    /// No operation.
    Nop = 0,
    /// Push a short-circuit block whose target is `pc + arg`.
    Blk,
    /// Pop one short-circuit block.
    EndBlk,
    /// Push the immediate argument as a plain value.
    Load,
    /// Push the constant at index `arg`.
    LoadK,
    /// Expand an array cell into its elements.
    Unpack,
    /// Extend the next instruction's argument (MSB first).
    ExArg,
    /// Pop an address and insert it into the family-matching current trie.
    Store,
    /// Pop an address and remove it from the family-matching current trie.
    Discard,
    /// Negate the boolean at the top of the stack.
    Not,
    /// Short-circuit on true: unwind one block (or terminate) with the
    /// value, otherwise discard it and continue.
    CPass,
    /// Short-circuit on false: unwind one block (or terminate) with the
    /// value, otherwise discard it and continue.
    CFail,
    /// Exact-match the stack (arg 0) or a packet collection (arg = access
    /// mode) against the current tries.
    Exact,
    Subnet,
    Supernet,
    Related,
    /// Any stack prefix covers the address constant at `arg`.
    PfxContains,
    /// Any stack address equals the address constant at `arg`.
    AddrContains,
    /// Any stack AS equals the AS constant at `arg`.
    AsContains,
    /// Stack pattern occurs as a subsequence of the selected AS path.
    AspMatch,
    /// Stack pattern is a prefix of the selected AS path.
    AspStarts,
    /// Stack pattern is a suffix of the selected AS path.
    AspEnds,
    /// Stack pattern equals the selected AS path.
    AspExact,
    /// Every stack community appears in the COMMUNITIES attribute.
    CommExact,
    /// Invoke the VM intrinsic at index `arg`.
    Call,
    /// Select the current IPv4 trie.
    SetTrie,
    /// Select the current IPv6 trie.
    SetTrie6,
    /// Clear the current IPv4 trie.
    ClrTrie,
    /// Clear the current IPv6 trie.
    ClrTrie6,
    /// Compare the top-of-stack prefix with the constant at `arg`.
    PfxCmp,
    /// Compare the top-of-stack address with the constant at `arg`.
    AddrCmp,
    /// Compare the top-of-stack AS with the constant at `arg`.
    AsCmp,
    /// Push whether the current UPDATE carries the attribute `arg`.
    HasAttr,
}

bitflags! {
    /// Which BGP sub-iterator a match opcode drives, plus modifiers.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
    pub struct PacketAccess: u8 {
        const NLRI         = 1 << 0;
        const WITHDRAWN    = 1 << 1;
        const AS_PATH      = 1 << 2;
        const AS4_PATH     = 1 << 3;
        const REAL_AS_PATH = 1 << 4;
        /// Include the multiprotocol attribute's prefixes.
        const ALL          = 1 << 5;
        /// Settle any active sub-iterator first.
        const SETTLE       = 1 << 6;
    }
}

/// Packs one instruction word.
#[inline]
pub fn make_op(op: Opcode, arg: u8) -> Bytecode {
    ((arg as u16) << 8) | u8::from(op) as u16
}

/// Opcode byte of an instruction word.
#[inline]
pub fn opcode(code: Bytecode) -> Result<Opcode, VmError> {
    Opcode::try_from((code & 0xff) as u8).map_err(|_| VmError::IllegalOpcode)
}

/// Argument byte of an instruction word.
#[inline]
pub fn arg(code: Bytecode) -> u32 {
    (code >> 8) as u32
}

/// Combines an instruction argument with accumulated `EXARG` bits.
#[inline]
pub fn extend_arg(arg: u32, exarg: u32) -> u32 {
    ((exarg << 8) | arg) & 0x7fff_ffff
}

/// Emits `op` with an argument of arbitrary width into `code`, prefixing
/// `EXARG` words for the high bytes, most significant first.
pub fn emit_ex(code: &mut Vec<Bytecode>, op: Opcode, idx: u32) {
    let mut msb = 24;
    while msb > 0 {
        if (idx >> msb) & 0xff != 0 {
            break;
        }
        msb -= 8;
    }
    while msb > 0 {
        code.push(make_op(Opcode::ExArg, ((idx >> msb) & 0xff) as u8));
        msb -= 8;
    }
    code.push(make_op(op, (idx & 0xff) as u8));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_packing() {
        let w = make_op(Opcode::LoadK, 7);
        assert_eq!(opcode(w).unwrap(), Opcode::LoadK);
        assert_eq!(arg(w), 7);
        assert_eq!(opcode(0x00ff), Err(VmError::IllegalOpcode));
    }

    #[test]
    fn test_extend_arg() {
        assert_eq!(extend_arg(0x34, 0x12), 0x1234);
        assert_eq!(extend_arg(0x78, 0x123456), 0x12345678 & 0x7fffffff);
    }

    #[test]
    fn test_emit_ex() {
        let mut code = Vec::new();
        emit_ex(&mut code, Opcode::Call, 3);
        assert_eq!(code, vec![make_op(Opcode::Call, 3)]);

        code.clear();
        emit_ex(&mut code, Opcode::LoadK, 0x1234);
        assert_eq!(
            code,
            vec![make_op(Opcode::ExArg, 0x12), make_op(Opcode::LoadK, 0x34)]
        );

        // replaying the EXARG chain reconstructs the argument
        let mut exarg = 0u32;
        let mut final_arg = 0;
        for w in &code {
            match opcode(*w).unwrap() {
                Opcode::ExArg => exarg = (exarg << 8) | arg(*w),
                _ => final_arg = extend_arg(arg(*w), exarg),
            }
        }
        assert_eq!(final_arg, 0x1234);
    }
}
