//! Recursive-descent compiler from the infix predicate language to filter
//! VM bytecode.
//!
//! ```text
//! expr    := term (("AND"|"OR") term)*
//! term    := "NOT" term | "(" expr ")" | "CALL" registry | rel
//! rel     := atom op atom
//! op      := "EXACT" | "SUBNET" | "SUPERNET" | "RELATED"
//!          | "MATCH" | "STARTS" | "ENDS"           (AS-path relations)
//! atom    := registry | ipLiteral | "[" atomList "]" | accessor
//! registry:= "$" integer | "$[" integer "]"
//! ```
//!
//! Every comparison selects a fresh trie pair, loads its left side through
//! a packet access mode or literal pushes, and runs the comparison opcode
//! against the pre-populated tries. Literal right-hand constants are
//! compiled into the Patricia tries at compile time; `$[...]` parameters
//! are loaded at run time via `LOADK`/`STORE` and removed afterwards with a
//! paired `LOADK`/`DISCARD`, so the same trie can be reused across
//! evaluations without leaking state.

use crate::error::FilterError;
use crate::filter::opcodes::{make_op, Opcode, PacketAccess};
use crate::filter::vm::{
    Cell, FilterVm, HeapZone, K_MAX, VM_ALL_NLRI_INSERT_FN, VM_ALL_WITHDRAWN_INSERT_FN,
    VM_NLRI_INSERT_FN, VM_WITHDRAWN_INSERT_FN,
};
use crate::models::network::NetAddr;
use std::str::FromStr;

/// Token source the compiler pulls from; the concrete tokenizer is
/// injected through this seam.
pub trait TokenStream {
    fn next_token(&mut self) -> Option<String>;
    fn unget(&mut self, tok: String);
}

/// Whitespace/punctuation tokenizer over a program string.
pub struct Lexer<'a> {
    rest: &'a str,
    pushed: Vec<String>,
}

impl<'a> Lexer<'a> {
    pub fn new(program: &'a str) -> Lexer<'a> {
        Lexer {
            rest: program,
            pushed: Vec::new(),
        }
    }
}

impl TokenStream for Lexer<'_> {
    fn next_token(&mut self) -> Option<String> {
        if let Some(tok) = self.pushed.pop() {
            return Some(tok);
        }
        let mut chars = self.rest.char_indices().peekable();
        // skip separators
        let start = loop {
            match chars.peek() {
                Some((_, c)) if c.is_whitespace() || *c == ',' => {
                    chars.next();
                }
                Some((i, _)) => break *i,
                None => {
                    self.rest = "";
                    return None;
                }
            }
        };

        let s = &self.rest[start..];
        let mut it = s.char_indices();
        let (_, first) = it.next().unwrap();

        let end = match first {
            '(' | ')' | '[' | ']' => first.len_utf8(),
            '$' if s[1..].starts_with('[') => {
                // "$[N]" stays one token
                match s.find(']') {
                    Some(i) => i + 1,
                    None => s.len(),
                }
            }
            _ => s
                .find(|c: char| c.is_whitespace() || "()[],".contains(c))
                .unwrap_or(s.len()),
        };

        let tok = s[..end].to_string();
        self.rest = &s[end..];
        Some(tok)
    }

    fn unget(&mut self, tok: String) {
        self.pushed.push(tok);
    }
}

/// What the left side of a comparison compiled into.
enum LeftTerm {
    /// Prefix collection accessor: the comparison opcode carries the mode.
    Prefixes(PacketAccess),
    /// AS-path accessor: the comparison lowers to an ASP opcode.
    AsPath(PacketAccess),
    /// Cells pushed on the operand stack at run time.
    Stack,
}

struct Compiler<'v, 't> {
    vm: &'v mut FilterVm,
    toks: &'t mut dyn TokenStream,
    params: &'t [u32],
}

/// Compiles `program` into `vm` using the built-in tokenizer. `params` is
/// the sidecar list resolving `$[N]` references to constant registers.
pub fn compile_filter(vm: &mut FilterVm, program: &str, params: &[u32]) -> Result<(), FilterError> {
    let mut lexer = Lexer::new(program);
    compile_with_tokens(vm, &mut lexer, params)
}

/// Compiles from a caller-supplied token stream.
pub fn compile_with_tokens(
    vm: &mut FilterVm,
    toks: &mut dyn TokenStream,
    params: &[u32],
) -> Result<(), FilterError> {
    let mut c = Compiler { vm, toks, params };
    c.compile_expr()?;
    if let Some(tok) = c.toks.next_token() {
        return Err(FilterError::syntax_near("trailing input", tok));
    }
    Ok(())
}

impl Compiler<'_, '_> {
    fn expect(&mut self, what: &str) -> Result<String, FilterError> {
        self.toks
            .next_token()
            .ok_or_else(|| FilterError::syntax(format!("expected {what}")))
    }

    fn compile_expr(&mut self) -> Result<(), FilterError> {
        loop {
            self.compile_term()?;

            let Some(tok) = self.toks.next_token() else {
                return Ok(());
            };
            if tok.eq_ignore_ascii_case("AND") {
                self.vm.emit_op(Opcode::CFail, 0);
            } else if tok.eq_ignore_ascii_case("OR") {
                self.vm.emit_op(Opcode::CPass, 0);
            } else {
                self.toks.unget(tok);
                return Ok(());
            }
        }
    }

    fn compile_term(&mut self) -> Result<(), FilterError> {
        let tok = self.expect("a term")?;

        if tok.eq_ignore_ascii_case("NOT") {
            self.compile_term()?;
            self.vm.emit_op(Opcode::Not, 0);
            return Ok(());
        }

        if tok == "(" {
            // a parenthesized group runs in its own short-circuit block
            let blk_at = self.vm.code().len();
            self.vm.emit_op(Opcode::Blk, 0); // offset patched below
            self.compile_expr()?;
            let close = self.expect("')'")?;
            if close != ")" {
                return Err(FilterError::syntax_near("expected ')'", close));
            }
            self.vm.emit_op(Opcode::EndBlk, 0);

            let offset = self.vm.code().len() - blk_at - 1;
            if offset > 0xff {
                return Err(FilterError::syntax("parenthesized group is too large"));
            }
            self.vm.code_mut()[blk_at] = make_op(Opcode::Blk, offset as u8);
            return Ok(());
        }

        if tok.eq_ignore_ascii_case("CALL") {
            let reg = self.expect("a function register")?;
            let idx = self.parse_registry(&reg)?;
            self.vm.emit_ex(Opcode::Call, idx as u32);
            return Ok(());
        }

        // rel := atom op atom
        self.toks.unget(tok);
        let left = self.compile_left()?;
        let op = self.expect("an operation")?;

        match left {
            LeftTerm::AsPath(mask) => {
                let opcode = if op.eq_ignore_ascii_case("EXACT") {
                    Opcode::AspExact
                } else if op.eq_ignore_ascii_case("MATCH") {
                    Opcode::AspMatch
                } else if op.eq_ignore_ascii_case("STARTS") {
                    Opcode::AspStarts
                } else if op.eq_ignore_ascii_case("ENDS") {
                    Opcode::AspEnds
                } else {
                    return Err(FilterError::syntax_near("unknown AS path operation", op));
                };
                self.compile_as_pattern()?;
                self.vm.emit_op(opcode, mask.bits());
            }
            LeftTerm::Prefixes(mask) => {
                let opcode = self.prefix_opcode(&op)?;
                let usage = self.compile_right_prefix()?;
                self.vm.emit_op(opcode, mask.bits());
                self.discard_temporaries(usage);
            }
            LeftTerm::Stack => {
                let opcode = self.prefix_opcode(&op)?;
                let usage = self.compile_right_prefix()?;
                self.vm.emit_op(opcode, 0);
                self.discard_temporaries(usage);
            }
        }
        Ok(())
    }

    fn prefix_opcode(&self, op: &str) -> Result<Opcode, FilterError> {
        if op.eq_ignore_ascii_case("EXACT") {
            Ok(Opcode::Exact)
        } else if op.eq_ignore_ascii_case("SUBNET") {
            Ok(Opcode::Subnet)
        } else if op.eq_ignore_ascii_case("SUPERNET") {
            Ok(Opcode::Supernet)
        } else if op.eq_ignore_ascii_case("RELATED") {
            Ok(Opcode::Related)
        } else {
            Err(FilterError::syntax_near("unknown operation", op))
        }
    }

    fn accessor_mask(tok: &str) -> Option<LeftTerm> {
        // keywords are case-insensitive throughout
        let lower = tok.to_ascii_lowercase();
        let field = lower.strip_prefix("packet.")?;
        let mask = match field {
            "withdrawn" => LeftTerm::Prefixes(PacketAccess::WITHDRAWN | PacketAccess::SETTLE),
            "every_withdrawn" => LeftTerm::Prefixes(
                PacketAccess::WITHDRAWN | PacketAccess::ALL | PacketAccess::SETTLE,
            ),
            "nlri" => LeftTerm::Prefixes(PacketAccess::NLRI | PacketAccess::SETTLE),
            "every_nlri" => {
                LeftTerm::Prefixes(PacketAccess::NLRI | PacketAccess::ALL | PacketAccess::SETTLE)
            }
            "aspath" => LeftTerm::AsPath(PacketAccess::AS_PATH | PacketAccess::SETTLE),
            "as4path" => LeftTerm::AsPath(PacketAccess::AS4_PATH | PacketAccess::SETTLE),
            "realaspath" => LeftTerm::AsPath(PacketAccess::REAL_AS_PATH | PacketAccess::SETTLE),
            _ => return None,
        };
        Some(mask)
    }

    fn compile_left(&mut self) -> Result<LeftTerm, FilterError> {
        let tok = self.expect("an atom")?;

        if let Some(access) = Self::accessor_mask(&tok) {
            return Ok(access);
        }
        if tok.to_ascii_lowercase().starts_with("packet.") {
            return Err(FilterError::syntax_near("unknown packet accessor", tok));
        }

        if tok == "[" {
            // arrays expand through the heap: one array constant, UNPACK'd
            // at run time
            let mut cells = Vec::new();
            loop {
                let tok = self.expect("']'")?;
                if tok == "]" {
                    break;
                }
                if tok.starts_with('$') {
                    let idx = self.parse_registry(&tok)?;
                    let cell = *self
                        .vm
                        .k_cell(idx)
                        .map_err(|_| FilterError::syntax_near("undefined register", tok))?;
                    cells.push(cell);
                } else {
                    cells.push(Cell::Addr(self.parse_address(&tok)?));
                }
            }
            let array = self.vm.heap_alloc(&cells, HeapZone::Permanent)?;
            let idx = self.vm.new_k();
            self.vm.set_k(idx, array)?;
            self.vm.emit_ex(Opcode::LoadK, idx as u32);
            self.vm.emit_op(Opcode::Unpack, 0);
            return Ok(LeftTerm::Stack);
        }

        if tok.starts_with('$') {
            let idx = self.parse_registry(&tok)?;
            self.vm.emit_ex(Opcode::LoadK, idx as u32);
            return Ok(LeftTerm::Stack);
        }

        let addr = self.parse_address(&tok)?;
        let idx = self.vm.new_k();
        self.vm.set_k(idx, Cell::Addr(addr))?;
        self.vm.emit_ex(Opcode::LoadK, idx as u32);
        Ok(LeftTerm::Stack)
    }

    /// Compiles the right side of a prefix comparison: sets up the trie
    /// pair and returns the registers to discard after the operation.
    fn compile_right_prefix(&mut self) -> Result<u64, FilterError> {
        let tok = self.expect("an atom")?;

        if let Some(access) = Self::accessor_mask(&tok) {
            // a packet collection on the right preloads the scratch tries
            let LeftTerm::Prefixes(mask) = access else {
                return Err(FilterError::syntax_near(
                    "AS path accessor in a prefix comparison",
                    tok,
                ));
            };
            let all = mask.contains(PacketAccess::ALL);
            let fn_idx = if mask.contains(PacketAccess::WITHDRAWN) {
                if all {
                    VM_ALL_WITHDRAWN_INSERT_FN
                } else {
                    VM_WITHDRAWN_INSERT_FN
                }
            } else if all {
                VM_ALL_NLRI_INSERT_FN
            } else {
                VM_NLRI_INSERT_FN
            };
            self.vm.emit_ex(Opcode::Call, fn_idx);
            return Ok(0);
        }

        // fresh trie pair for this comparison
        let v4 = self.vm.new_trie(crate::models::network::AddrFamily::Ipv4);
        let v6 = self.vm.new_trie(crate::models::network::AddrFamily::Ipv6);
        self.vm.emit_ex(Opcode::SetTrie, v4 as u32);
        self.vm.emit_ex(Opcode::SetTrie6, v6 as u32);
        self.vm.set_current_tries(v4, v6)?;

        let mut usage = 0u64;
        if tok == "[" {
            loop {
                let tok = self.expect("']'")?;
                if tok == "]" {
                    break;
                }
                usage |= self.compile_right_element(&tok)?;
            }
        } else {
            usage |= self.compile_right_element(&tok)?;
        }
        Ok(usage)
    }

    fn compile_right_element(&mut self, tok: &str) -> Result<u64, FilterError> {
        if tok.starts_with('$') {
            // runtime constant: load into the trie now, discard after the op
            let idx = self.parse_registry(tok)?;
            self.vm.emit_ex(Opcode::LoadK, idx as u32);
            self.vm.emit_op(Opcode::Store, 0);
            Ok(1u64 << idx)
        } else {
            // literal: precompile straight into the Patricia trie and
            // release the staging constant for reuse
            let addr = self.parse_address(tok)?;
            let idx = self.vm.new_k();
            self.vm.set_k(idx, Cell::Addr(addr))?;
            self.vm.store_constant(idx)?;
            self.vm.pop_k();
            Ok(0)
        }
    }

    /// Compiles the right side of an AS-path relation: pushes one cell per
    /// expected AS.
    fn compile_as_pattern(&mut self) -> Result<(), FilterError> {
        let tok = self.expect("an AS pattern")?;
        let elements: Vec<String> = if tok == "[" {
            let mut out = Vec::new();
            loop {
                let tok = self.expect("']'")?;
                if tok == "]" {
                    break;
                }
                out.push(tok);
            }
            out
        } else {
            vec![tok]
        };

        for tok in elements {
            if tok.starts_with('$') {
                let idx = self.parse_registry(&tok)?;
                self.vm.emit_ex(Opcode::LoadK, idx as u32);
            } else if tok.eq_ignore_ascii_case("ANY") || tok == "?" {
                let idx = self.vm.new_k();
                self.vm.set_k(idx, Cell::AsAny)?;
                self.vm.emit_ex(Opcode::LoadK, idx as u32);
            } else {
                let asn = tok
                    .parse::<u32>()
                    .map_err(|_| FilterError::syntax_near("invalid AS number", tok))?;
                let idx = self.vm.new_k();
                self.vm.set_k(idx, Cell::As(asn))?;
                self.vm.emit_ex(Opcode::LoadK, idx as u32);
            }
        }
        Ok(())
    }

    /// Emits the paired `LOADK`/`DISCARD` cleanup for every runtime
    /// register the comparison inserted into its tries.
    fn discard_temporaries(&mut self, usage: u64) {
        for idx in 0..=K_MAX {
            if usage & (1u64 << idx) != 0 {
                self.vm.emit_ex(Opcode::LoadK, idx as u32);
                self.vm.emit_op(Opcode::Discard, 0);
            }
        }
    }

    /// Handles `$N` and `$[N]` tokens, returning the constant register.
    fn parse_registry(&mut self, tok: &str) -> Result<usize, FilterError> {
        let body = &tok[1..];
        let (digits, indirect) = match body.strip_prefix('[') {
            Some(rest) => match rest.strip_suffix(']') {
                Some(d) => (d, true),
                None => {
                    return Err(FilterError::syntax_near(
                        "mismatched brackets in register",
                        tok,
                    ))
                }
            },
            None => (body, false),
        };

        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(FilterError::syntax_near(
                "illegal non-numeric register constant",
                tok,
            ));
        }
        let mut idx: usize = digits
            .parse()
            .map_err(|_| FilterError::syntax_near("register index out of range", tok))?;

        if indirect {
            idx = *self.params.get(idx).ok_or_else(|| {
                FilterError::syntax_near("register parameter index out of range", tok)
            })? as usize;
        }
        if idx > K_MAX {
            return Err(FilterError::syntax_near(
                format!("constant register index {idx} is out of range"),
                tok,
            ));
        }
        Ok(idx)
    }

    fn parse_address(&self, tok: &str) -> Result<NetAddr, FilterError> {
        NetAddr::from_str(tok)
            .map_err(|_| FilterError::syntax_near("invalid constant value", tok))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::bgp::{BgpMsg, BgpMsgFlags};
    use crate::models::bgp::BgpMsgType;
    use crate::models::network::NetAddrAp;

    fn update_with_withdrawn(prefixes: &[&str]) -> BgpMsg {
        let mut msg = BgpMsg::new();
        msg.set_write(BgpMsgType::Update, BgpMsgFlags::empty()).unwrap();
        msg.start_withdrawn().unwrap();
        for p in prefixes {
            msg.put_withdrawn(&NetAddrAp::from(NetAddr::from_str(p).unwrap()))
                .unwrap();
        }
        msg.end_withdrawn().unwrap();
        msg.finish().unwrap();
        msg
    }

    #[test]
    fn test_lexer_tokens() {
        let mut lex = Lexer::new("NOT ( packet.nlri EXACT [10.0.0.0/8, $1] ) AND $[0]");
        let mut toks = Vec::new();
        while let Some(t) = lex.next_token() {
            toks.push(t);
        }
        assert_eq!(
            toks,
            vec![
                "NOT",
                "(",
                "packet.nlri",
                "EXACT",
                "[",
                "10.0.0.0/8",
                "$1",
                "]",
                ")",
                "AND",
                "$[0]"
            ]
        );

        let mut lex = Lexer::new("a");
        assert_eq!(lex.next_token(), Some("a".to_string()));
        assert_eq!(lex.next_token(), None);
    }

    #[test]
    fn test_scenario_not_withdrawn_exact() {
        // NOT packet.withdrawn EXACT 127.0.0.1/22 over an update that only
        // withdraws 127.0.0.1/20: the exact match fails, NOT flips to pass
        let mut vm = FilterVm::new();
        compile_filter(&mut vm, "NOT packet.withdrawn EXACT 127.0.0.1/22", &[]).unwrap();

        let mut msg = update_with_withdrawn(&["127.0.0.1/20"]);
        assert!(vm.filter_bgp(&mut msg).unwrap());

        // the exact prefix withdraws: match succeeds, NOT flips to fail
        let mut msg = update_with_withdrawn(&["127.0.0.1/22"]);
        assert!(!vm.filter_bgp(&mut msg).unwrap());
    }

    #[test]
    fn test_and_or_chain() {
        let mut vm = FilterVm::new();
        compile_filter(
            &mut vm,
            "packet.withdrawn EXACT 10.0.0.0/8 OR packet.withdrawn EXACT 11.0.0.0/8",
            &[],
        )
        .unwrap();

        let mut msg = update_with_withdrawn(&["11.0.0.0/8"]);
        assert!(vm.filter_bgp(&mut msg).unwrap());
        let mut msg = update_with_withdrawn(&["12.0.0.0/8"]);
        assert!(!vm.filter_bgp(&mut msg).unwrap());
    }

    #[test]
    fn test_array_literal_right() {
        let mut vm = FilterVm::new();
        compile_filter(
            &mut vm,
            "packet.withdrawn SUBNET [10.0.0.0/8 172.16.0.0/12]",
            &[],
        )
        .unwrap();

        let mut msg = update_with_withdrawn(&["172.16.5.0/24"]);
        assert!(vm.filter_bgp(&mut msg).unwrap());
        let mut msg = update_with_withdrawn(&["192.168.0.0/24"]);
        assert!(!vm.filter_bgp(&mut msg).unwrap());
    }

    #[test]
    fn test_runtime_registry_is_discarded() {
        // $1 is loaded into the comparison trie at run time and must be
        // discarded afterwards so the next run starts clean
        let mut vm = FilterVm::new();
        vm.set_k(1, Cell::Addr(NetAddr::from_str("10.0.0.0/8").unwrap()))
            .unwrap();
        compile_filter(&mut vm, "packet.withdrawn EXACT $1", &[]).unwrap();

        let mut msg = update_with_withdrawn(&["10.0.0.0/8"]);
        assert!(vm.filter_bgp(&mut msg).unwrap());

        // swap the register; stale trie state would still match the old one
        vm.set_k(1, Cell::Addr(NetAddr::from_str("11.0.0.0/8").unwrap()))
            .unwrap();
        let mut msg = update_with_withdrawn(&["10.0.0.0/8"]);
        assert!(!vm.filter_bgp(&mut msg).unwrap());
        let mut msg = update_with_withdrawn(&["11.0.0.0/8"]);
        assert!(vm.filter_bgp(&mut msg).unwrap());
    }

    #[test]
    fn test_indirect_registry() {
        let mut vm = FilterVm::new();
        vm.set_k(5, Cell::Addr(NetAddr::from_str("10.0.0.0/8").unwrap()))
            .unwrap();
        // $[0] resolves through the sidecar parameter list to register 5
        compile_filter(&mut vm, "packet.withdrawn EXACT $[0]", &[5]).unwrap();

        let mut msg = update_with_withdrawn(&["10.0.0.0/8"]);
        assert!(vm.filter_bgp(&mut msg).unwrap());
    }

    #[test]
    fn test_aspath_relation() {
        use crate::codec::attrs;
        use crate::models::bgp::AsSegmentType;

        let mut msg = BgpMsg::new();
        msg.set_write(BgpMsgType::Update, BgpMsgFlags::empty()).unwrap();
        msg.start_attribs().unwrap();
        msg.put_attrib(&attrs::make_as_path_16(&[(
            AsSegmentType::Sequence,
            &[2598, 137, 3356],
        )]))
        .unwrap();
        msg.end_attribs().unwrap();
        msg.finish().unwrap();

        let mut vm = FilterVm::new();
        compile_filter(&mut vm, "packet.aspath ENDS 3356", &[]).unwrap();
        assert!(vm.filter_bgp(&mut msg).unwrap());

        let mut vm = FilterVm::new();
        compile_filter(&mut vm, "packet.aspath EXACT [2598 ANY 3356]", &[]).unwrap();
        assert!(vm.filter_bgp(&mut msg).unwrap());

        let mut vm = FilterVm::new();
        compile_filter(&mut vm, "packet.aspath STARTS 137", &[]).unwrap();
        assert!(!vm.filter_bgp(&mut msg).unwrap());
    }

    #[test]
    fn test_paren_groups() {
        let mut vm = FilterVm::new();
        compile_filter(
            &mut vm,
            "( packet.withdrawn EXACT 10.0.0.0/8 OR packet.withdrawn EXACT 11.0.0.0/8 ) \
             AND NOT packet.withdrawn EXACT 12.0.0.0/8",
            &[],
        )
        .unwrap();

        let mut msg = update_with_withdrawn(&["11.0.0.0/8"]);
        assert!(vm.filter_bgp(&mut msg).unwrap());
        let mut msg = update_with_withdrawn(&["11.0.0.0/8", "12.0.0.0/8"]);
        assert!(!vm.filter_bgp(&mut msg).unwrap());
        let mut msg = update_with_withdrawn(&["13.0.0.0/8"]);
        assert!(!vm.filter_bgp(&mut msg).unwrap());
    }

    #[test]
    fn test_syntax_errors() {
        let mut vm = FilterVm::new();
        let err = compile_filter(&mut vm, "packet.withdrawn FROBNICATE 10.0.0.0/8", &[]);
        assert!(matches!(err, Err(FilterError::Syntax { .. })));

        let mut vm = FilterVm::new();
        let err = compile_filter(&mut vm, "packet.bogus EXACT 10.0.0.0/8", &[]);
        assert!(matches!(err, Err(FilterError::Syntax { .. })));

        let mut vm = FilterVm::new();
        let err = compile_filter(&mut vm, "packet.withdrawn EXACT $99", &[]);
        assert!(matches!(err, Err(FilterError::Syntax { .. })));

        let mut vm = FilterVm::new();
        let err = compile_filter(&mut vm, "packet.withdrawn EXACT not-an-ip", &[]);
        assert!(matches!(err, Err(FilterError::Syntax { .. })));

        let mut vm = FilterVm::new();
        let err = compile_filter(&mut vm, "( packet.withdrawn EXACT 10.0.0.0/8", &[]);
        assert!(matches!(err, Err(FilterError::Syntax { .. })));
    }

    #[test]
    fn test_ipv6_literals() {
        let mut vm = FilterVm::new();
        compile_filter(&mut vm, "packet.every_withdrawn SUBNET 2001:db8::/32", &[]).unwrap();

        // v6 withdrawals ride in MP_UNREACH
        use crate::codec::attrs;
        use crate::models::network::{Afi, Safi};
        let mut msg = BgpMsg::new();
        msg.set_write(BgpMsgType::Update, BgpMsgFlags::empty()).unwrap();
        msg.start_attribs().unwrap();
        let withdrawn = NetAddr::from_str("2001:db8:dead::/48").unwrap().encode_nlri();
        msg.put_attrib(&attrs::make_mp_unreach(Afi::Ipv6, Safi::Unicast, &withdrawn))
            .unwrap();
        msg.end_attribs().unwrap();
        msg.finish().unwrap();

        assert!(vm.filter_bgp(&mut msg).unwrap());
    }
}
