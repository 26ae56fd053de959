// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Expression evaluation.
//!
//! The evaluator is a precedence-climbing recursion over a byte cursor. Each
//! frame carries an accumulator and the operator pending application; a
//! higher-precedence operator on the right is handled by recursing over the
//! remaining text and folding the result back in as a single operand. The
//! ternary evaluates exactly one branch; the skipped branch (and the decided
//! side of a short-circuit operator) is parsed in a quiet mode that performs
//! no host calls and emits no diagnostics.

use crate::cpu::CpuFeatures;
use crate::diagnostics::{
    error_bad_character, error_expression, error_grouping_brackets, error_invalid_value,
    error_invalid_patch_value_type, DiagState, ExprError,
};
use crate::host::PatchHost;
use crate::op::{Assoc, Op, NOOP_PRECEDENCE};
use crate::op_scanner::{byte_at, scan_operator};
use crate::registers::{parse_register, RegisterBank};
use crate::value::{f80_to_f64, PatchValue, ValueKind, Word};

/// Immutable per-evaluation context.
#[derive(Clone, Copy, Default)]
pub struct EvalContext<'a> {
    /// Saved register bank when evaluating at a breakpoint; `None` for
    /// binhack-style evaluation.
    pub regs: Option<&'a RegisterBank>,
    /// Address the current patch byte is being written at; relative patch
    /// values subtract `rel_source + 4` to form a rel32 displacement.
    pub rel_source: Word,
    /// Base address of the module patched, for `Rx...` literals.
    pub module: Word,
}

/// Successful evaluation: the value and the remaining input, which begins at
/// the end sentinel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Evaluated<'e> {
    pub value: Word,
    pub rest: &'e str,
}

/// Pending operand width set by a cast or a `T ptr` qualifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SizeTag {
    Default,
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    U64,
    I64,
    F32,
    F64,
    F80,
}

pub struct Evaluator<'h> {
    pub(crate) host: &'h dyn PatchHost,
    pub(crate) cpu: &'h CpuFeatures,
    pub(crate) diag: DiagState,
}

impl<'h> Evaluator<'h> {
    pub fn new(host: &'h dyn PatchHost, cpu: &'h CpuFeatures) -> Self {
        Self {
            host,
            cpu,
            diag: DiagState::default(),
        }
    }

    /// Suppresses the codecave-not-found warning. Hosts toggle this while
    /// sizing codecaves, before any cave address has been recorded.
    pub fn set_codecave_suppress(&mut self, suppress: bool) {
        self.diag.suppress_codecave = suppress;
    }

    /// Evaluates `expr` up to the `end` sentinel (0 for end of input).
    ///
    /// On success the returned `rest` begins at the sentinel; the caller may
    /// advance past it. On failure the cause has been logged through the
    /// host and no value is produced.
    pub fn eval_expr<'e>(
        &mut self,
        expr: &'e str,
        end: u8,
        ctx: &EvalContext,
    ) -> Result<Evaluated<'e>, ExprError> {
        match self.eval_frame(expr, 0, end, Op::Start, 0, ctx, false) {
            Ok((value, i)) => {
                let bytes = expr.as_bytes();
                let mut i = i.min(expr.len());
                while byte_at(bytes, i) != end
                    && matches!(byte_at(bytes, i), b' ' | b'\t' | 0x0B | 0x0C)
                {
                    i += 1;
                }
                if byte_at(expr.as_bytes(), i) == end {
                    Ok(Evaluated {
                        value,
                        rest: &expr[i..],
                    })
                } else {
                    Err(error_expression(self.host))
                }
            }
            Err(err) => {
                self.host.log_line("EXPRESSION ERROR: Error parsing expression");
                Err(err)
            }
        }
    }

    /// One precedence-climbing frame.
    ///
    /// `end` is the sentinel this frame stops on; encountering an operator
    /// that binds weaker than the pending one rebinds `end` to the current
    /// character so the frame unwinds and the caller resumes there.
    pub(crate) fn eval_frame(
        &mut self,
        s: &str,
        pos: usize,
        end: u8,
        start_op: Op,
        start_value: Word,
        ctx: &EvalContext,
        quiet: bool,
    ) -> Result<(Word, usize), ExprError> {
        let bytes = s.as_bytes();
        let mut end = end;
        let mut value = start_value;
        let mut ops_cur = start_op;
        let mut cur_value: Word = 0;
        let mut i = pos;

        loop {
            // A short-circuit operator whose outcome is already fixed by the
            // left side consumes its right side without host calls or
            // diagnostics.
            let operand_quiet = quiet || short_circuit_decided(ops_cur, value);

            if ops_cur != Op::Null {
                let (v, next) = self.consume_value(s, i, ctx, operand_quiet)?;
                cur_value = v;
                i = next;
            }

            let (mut ops_next, next_op_pos) = scan_operator(bytes, i, end);
            if ops_next == Op::BadBrackets {
                return Err(error_grouping_brackets(self.host));
            }

            let cur_prec = ops_cur.precedence();
            let next_prec = ops_next.precedence();

            if cur_prec < next_prec {
                i = next_op_pos;
                let mut at_ternary = ops_next == Op::Ternary;
                if !at_ternary {
                    let (v, next) =
                        self.eval_frame(s, i, end, ops_next, cur_value, ctx, operand_quiet)?;
                    cur_value = v;
                    i = next;
                    if byte_at(bytes, i) == b'?' {
                        i += 1;
                        at_ternary = true;
                    } else if byte_at(bytes, i) != end {
                        ops_next = Op::Null;
                    }
                }
                if at_ternary {
                    if cur_value != 0 {
                        if byte_at(bytes, i) != b':' {
                            let (v, next) =
                                self.eval_frame(s, i, b':', Op::Start, 0, ctx, operand_quiet)?;
                            cur_value = v;
                            i = next;
                        }
                        i = self.scan_past_colon(bytes, i)?;
                        i = match skip_value(bytes, i, end) {
                            Some(next) => next,
                            None => return Err(error_expression(self.host)),
                        };
                    } else {
                        if byte_at(bytes, i) != b':' {
                            let (_, next) =
                                self.eval_frame(s, i, b':', Op::Start, 0, ctx, true)?;
                            i = next;
                        }
                        i = self.scan_past_colon(bytes, i)?;
                        // The false branch continues this frame with the
                        // pending operator still unapplied. A ternary whose
                        // condition already folded into the accumulator left
                        // no pending operator; restart so the false branch
                        // replaces the condition value.
                        if ops_cur == Op::Null {
                            ops_cur = Op::Start;
                        }
                        if byte_at(bytes, i) == end {
                            break;
                        }
                        continue;
                    }
                }
            } else if cur_prec == next_prec {
                i = next_op_pos;
                if next_prec == NOOP_PRECEDENCE {
                    if byte_at(bytes, i) == end {
                        // Only trailing whitespace remained before the
                        // sentinel.
                        break;
                    }
                    // Nothing pending and nothing ahead: a terminator that is
                    // not this frame's sentinel.
                    return Err(match byte_at(bytes, i) {
                        0 | b')' | b']' => error_grouping_brackets(self.host),
                        _ => error_expression(self.host),
                    });
                }
                if ops_cur.associativity() == Assoc::Right {
                    let (v, next) =
                        self.eval_frame(s, i, end, ops_next, cur_value, ctx, operand_quiet)?;
                    cur_value = v;
                    i = next;
                }
            } else {
                // The next operator binds weaker: apply what is pending and
                // let the caller resume at this character.
                end = byte_at(bytes, i);
            }

            value = self.apply_operator(value, cur_value, ops_cur, quiet);
            ops_cur = ops_next;

            if byte_at(bytes, i) == end {
                break;
            }
        }

        Ok((value, i))
    }

    /// Steps the cursor just past the next `:` of the ternary being handled.
    fn scan_past_colon(&self, bytes: &[u8], mut i: usize) -> Result<usize, ExprError> {
        loop {
            match byte_at(bytes, i) {
                b':' => return Ok(i + 1),
                0 => return Err(error_expression(self.host)),
                _ => i += 1,
            }
        }
    }

    /// Parses one complete operand.
    fn consume_value(
        &mut self,
        s: &str,
        pos: usize,
        ctx: &EvalContext,
        quiet: bool,
    ) -> Result<(Word, usize), ExprError> {
        let bytes = s.as_bytes();
        let mut size = SizeTag::Default;
        let mut i = pos;
        loop {
            let c = byte_at(bytes, i);
            match c {
                b' ' | b'\t' | 0x0B | 0x0C => i += 1,
                0 => return Err(error_invalid_value(self.host, rest_of(s, i))),
                b'b' | b'B' => {
                    if match_keyword(bytes, i, b"byte ptr") {
                        size = SizeTag::U8;
                        i += 8;
                    } else {
                        return self.register_or_literal(s, i, ctx, quiet);
                    }
                }
                b'w' | b'W' => {
                    if match_keyword(bytes, i, b"word ptr") {
                        size = SizeTag::U16;
                        i += 8;
                    } else {
                        return Err(error_bad_character(self.host));
                    }
                }
                b'd' | b'D' => {
                    if match_keyword(bytes, i, b"dword ptr") {
                        size = SizeTag::U32;
                        i += 9;
                    } else if match_keyword(bytes, i, b"double ptr") {
                        size = SizeTag::F64;
                        i += 10;
                    } else {
                        return self.register_or_literal(s, i, ctx, quiet);
                    }
                }
                b'f' | b'F' => {
                    if match_keyword(bytes, i, b"float ptr") {
                        size = SizeTag::F32;
                        i += 9;
                    } else {
                        return self.literal(s, i, ctx, quiet);
                    }
                }
                b'q' | b'Q' => {
                    if match_keyword(bytes, i, b"qword ptr") {
                        size = SizeTag::U64;
                        i += 9;
                    } else {
                        return Err(error_bad_character(self.host));
                    }
                }
                b't' | b'T' => {
                    if match_keyword(bytes, i, b"tbyte ptr") {
                        size = SizeTag::F80;
                        i += 9;
                    } else {
                        return Err(error_bad_character(self.host));
                    }
                }
                b'&' | b'a' | b'A' | b'c' | b'C' | b'e' | b'E' | b's' | b'S' => {
                    return self.register_or_literal(s, i, ctx, quiet);
                }
                b'r' | b'R' => {
                    // On 64-bit targets an R-name may be a register; on
                    // 32-bit it can only start an Rx module-relative literal.
                    #[cfg(target_pointer_width = "64")]
                    return self.register_or_literal(s, i, ctx, quiet);
                    #[cfg(not(target_pointer_width = "64"))]
                    return self.literal(s, i, ctx, quiet);
                }
                b'0'..=b'9' => return self.literal(s, i, ctx, quiet),
                b'!' | b'~' | b'+' | b'-' => {
                    let doubled = byte_at(bytes, i + 1) == c;
                    let (v, next) =
                        self.consume_value(s, i + 1 + doubled as usize, ctx, quiet)?;
                    let v = match (c, doubled) {
                        (b'~', false) => !v,
                        (b'!', false) => (v == 0) as Word,
                        (b'-', false) => v.wrapping_neg(),
                        (b'+', false) => v,
                        (b'~', true) => v,
                        (b'!', true) => (v != 0) as Word,
                        (b'-', true) => {
                            if !quiet {
                                self.diag.warn_inc_dec(self.host);
                            }
                            v.wrapping_sub(1)
                        }
                        _ => {
                            if !quiet {
                                self.diag.warn_inc_dec(self.host);
                            }
                            v.wrapping_add(1)
                        }
                    };
                    return Ok(self.postfix_check(bytes, v, next, quiet));
                }
                b'*' => {
                    let (addr, next) = self.consume_value(s, i + 1, ctx, quiet)?;
                    return self.shared_deref(bytes, addr, next, size, quiet);
                }
                b'(' => {
                    if let Some((tag, after)) = parse_cast(bytes, i + 1) {
                        let (v, next) = self.consume_value(s, after, ctx, quiet)?;
                        return Ok(self.postfix_check(bytes, apply_cast(tag, v), next, quiet));
                    }
                    let (v, next) = self.eval_frame(s, i + 1, b')', Op::Start, 0, ctx, quiet)?;
                    if byte_at(bytes, next) != b')' {
                        return Err(error_grouping_brackets(self.host));
                    }
                    return Ok(self.postfix_check(bytes, v, next + 1, quiet));
                }
                b'[' if ctx.regs.is_some() => {
                    let (addr, next) = self.eval_frame(s, i + 1, b']', Op::Start, 0, ctx, quiet)?;
                    if byte_at(bytes, next) != b']' {
                        return Err(error_grouping_brackets(self.host));
                    }
                    return self.shared_deref(bytes, addr, next + 1, size, quiet);
                }
                b'[' | b'<' | b'{' => {
                    let (pv, next) = self.parse_patch_value(s, i, ctx, quiet)?;
                    let v = self.collapse_patch_value(&pv)?;
                    return Ok(self.postfix_check(bytes, v, next, quiet));
                }
                _ => return Err(error_bad_character(self.host)),
            }
        }
    }

    fn register_or_literal(
        &mut self,
        s: &str,
        pos: usize,
        ctx: &EvalContext,
        quiet: bool,
    ) -> Result<(Word, usize), ExprError> {
        if let Some(bank) = ctx.regs {
            if let Some((r, next)) = parse_register(s.as_bytes(), pos) {
                let v = if r.address_of {
                    bank.slot_addr(r)
                } else {
                    bank.read(r)
                };
                return Ok(self.postfix_check(s.as_bytes(), v, next, quiet));
            }
        }
        self.literal(s, pos, ctx, quiet)
    }

    fn literal(
        &mut self,
        s: &str,
        pos: usize,
        ctx: &EvalContext,
        quiet: bool,
    ) -> Result<(Word, usize), ExprError> {
        match parse_address(s.as_bytes(), pos, ctx.module) {
            Ok((v, next)) if next > pos => Ok(self.postfix_check(s.as_bytes(), v, next, quiet)),
            Ok(_) => Err(error_bad_character(self.host)),
            Err(AddrError::Overflow) => Err(error_invalid_value(self.host, rest_of(s, pos))),
            Err(AddrError::NoProgress) => Err(error_bad_character(self.host)),
        }
    }

    /// Loads through a just-computed address, honoring a pending size tag.
    /// A NULL address warns and produces 0 without loading.
    fn shared_deref(
        &mut self,
        bytes: &[u8],
        addr: Word,
        next: usize,
        size: SizeTag,
        quiet: bool,
    ) -> Result<(Word, usize), ExprError> {
        if addr == 0 {
            if !quiet {
                self.diag.warn_null_deref(self.host);
            }
            return Ok(self.postfix_check(bytes, 0, next, quiet));
        }
        let v = self.read_sized(addr, size);
        Ok(self.postfix_check(bytes, v, next, quiet))
    }

    pub(crate) fn read_sized(&self, addr: Word, size: SizeTag) -> Word {
        let mut buf = [0u8; 10];
        let n = match size {
            SizeTag::Default => std::mem::size_of::<Word>(),
            SizeTag::U8 | SizeTag::I8 => 1,
            SizeTag::U16 | SizeTag::I16 => 2,
            SizeTag::U32 | SizeTag::I32 | SizeTag::F32 => 4,
            SizeTag::U64 | SizeTag::I64 | SizeTag::F64 => 8,
            SizeTag::F80 => 10,
        };
        if !self.host.read_memory(addr, &mut buf[..n]) {
            return 0;
        }
        let le64 = |k: usize| {
            let mut le = [0u8; 8];
            le[..k].copy_from_slice(&buf[..k]);
            u64::from_le_bytes(le)
        };
        match size {
            SizeTag::Default => le64(n) as Word,
            SizeTag::U8 => buf[0] as Word,
            SizeTag::I8 => buf[0] as i8 as isize as Word,
            SizeTag::U16 => le64(2) as u16 as Word,
            SizeTag::I16 => le64(2) as u16 as i16 as isize as Word,
            SizeTag::U32 => le64(4) as u32 as Word,
            SizeTag::I32 => le64(4) as u32 as i32 as isize as Word,
            SizeTag::U64 => le64(8) as Word,
            SizeTag::I64 => le64(8) as i64 as Word,
            SizeTag::F32 => truncate_float(f32::from_bits(le64(4) as u32) as f64),
            SizeTag::F64 => truncate_float(f64::from_bits(le64(8))),
            SizeTag::F80 => truncate_float(f80_to_f64(buf)),
        }
    }

    /// Collapses a typed patch value to a machine word.
    pub(crate) fn collapse_patch_value(&mut self, v: &PatchValue) -> Result<Word, ExprError> {
        Ok(match v.kind {
            ValueKind::Byte(b) => b as Word,
            ValueKind::SByte(b) => b as isize as Word,
            ValueKind::Word(w) => w as Word,
            ValueKind::SWord(w) => w as isize as Word,
            ValueKind::Dword(d) => d as Word,
            ValueKind::SDword(d) => d as isize as Word,
            ValueKind::Qword(q) => q as Word,
            ValueKind::SQword(q) => q as Word,
            ValueKind::Float(f) => truncate_float(f as f64),
            ValueKind::Double(d) | ValueKind::LongDouble(d) => truncate_float(d),
            ValueKind::Bool(b) => b as Word,
            ValueKind::Pointer(p) => p,
            ValueKind::Str(ref bytes) => bytes.as_ptr() as Word,
            ValueKind::Str16(ref units) => units.as_ptr() as Word,
            ValueKind::Str32(ref units) => units.as_ptr() as Word,
            ValueKind::Code(_) | ValueKind::Unknown | ValueKind::None | ValueKind::Default => {
                return Err(error_invalid_patch_value_type(self.host))
            }
        })
    }

    fn postfix_check(
        &mut self,
        bytes: &[u8],
        value: Word,
        pos: usize,
        quiet: bool,
    ) -> (Word, usize) {
        let c = byte_at(bytes, pos);
        if (c == b'+' || c == b'-') && byte_at(bytes, pos + 1) == c {
            if !quiet {
                self.diag.warn_post_inc_dec(self.host);
            }
            (value, pos + 2)
        } else {
            (value, pos)
        }
    }

    /// Applies a binary operator to two machine words.
    fn apply_operator(&mut self, value: Word, arg: Word, op: Op, quiet: bool) -> Word {
        let base = match op.assignment_base() {
            Some(base) => {
                if !quiet {
                    self.diag.warn_assignment(self.host);
                }
                base
            }
            None => {
                if op == Op::Assign && !quiet {
                    self.diag.warn_assignment(self.host);
                }
                op
            }
        };
        match base {
            Op::Power => apply_power(value, arg),
            Op::Multiply => value.wrapping_mul(arg),
            Op::Divide => {
                if arg == 0 {
                    0
                } else {
                    value.wrapping_div(arg)
                }
            }
            Op::Modulo => {
                if arg == 0 {
                    0
                } else {
                    value.wrapping_rem(arg)
                }
            }
            Op::Add => value.wrapping_add(arg),
            Op::Subtract => value.wrapping_sub(arg),
            Op::Shl | Op::LogicalShl => value.wrapping_shl(arg as u32),
            Op::LogicalShr => value.wrapping_shr(arg as u32),
            Op::Shr => (value as isize).wrapping_shr(arg as u32) as Word,
            Op::Rol => value.rotate_left(arg as u32),
            Op::Ror => value.rotate_right(arg as u32),
            Op::Less => (value < arg) as Word,
            Op::LessEqual => (value <= arg) as Word,
            Op::Greater => (value > arg) as Word,
            Op::GreaterEqual => (value >= arg) as Word,
            Op::Equal => (value == arg) as Word,
            Op::NotEqual => (value != arg) as Word,
            Op::ThreeWay => ((value > arg) as Word).wrapping_sub((value < arg) as Word),
            Op::BitAnd => value & arg,
            Op::BitNand => !(value & arg),
            Op::BitXor => value ^ arg,
            Op::BitXnor => !(value ^ arg),
            Op::BitOr => value | arg,
            Op::BitNor => !(value | arg),
            Op::LogicalAnd => (value != 0 && arg != 0) as Word,
            Op::LogicalNand => !(value != 0 && arg != 0) as Word,
            Op::LogicalXor => ((value != 0) ^ (arg != 0)) as Word,
            Op::LogicalXnor => ((value != 0) == (arg != 0)) as Word,
            Op::LogicalOr => (value != 0 || arg != 0) as Word,
            Op::LogicalNor => !(value != 0 || arg != 0) as Word,
            // Assignment, sequencing and the sentinels pass the right side
            // through.
            _ => arg,
        }
    }
}

/// Integer exponentiation by squaring. Exponents of a machine word or more
/// saturate to the maximum word.
fn apply_power(mut value: Word, mut arg: Word) -> Word {
    if arg == 0 {
        return 1;
    }
    if arg >= Word::BITS as Word {
        return Word::MAX;
    }
    let mut result: Word = 1;
    loop {
        if arg & 1 != 0 {
            result = result.wrapping_mul(value);
        }
        arg >>= 1;
        if arg == 0 {
            return result;
        }
        value = value.wrapping_mul(value);
    }
}

fn short_circuit_decided(op: Op, value: Word) -> bool {
    match op {
        Op::LogicalAnd | Op::LogicalNand => value == 0,
        Op::LogicalOr | Op::LogicalNor => value != 0,
        _ => false,
    }
}

fn truncate_float(f: f64) -> Word {
    f as isize as Word
}

fn rest_of(s: &str, pos: usize) -> &str {
    s.get(pos..).unwrap_or("")
}

fn match_keyword(s: &[u8], pos: usize, kw: &[u8]) -> bool {
    s.len() >= pos + kw.len() && s[pos..pos + kw.len()].eq_ignore_ascii_case(kw)
}

/// Skips a syntactically complete run of text until `end` at bracket depth
/// zero. Used to jump over the untaken false branch of a ternary.
pub(crate) fn skip_value(s: &[u8], pos: usize, end: u8) -> Option<usize> {
    let mut depth = 0i32;
    let mut i = pos;
    loop {
        let c = byte_at(s, i);
        match c {
            0 => {
                return if end == 0 && depth == 0 {
                    Some(i.min(s.len()))
                } else {
                    None
                };
            }
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => {
                if c == end && depth == 0 {
                    return Some(i);
                }
                depth -= 1;
                if depth < 0 {
                    return None;
                }
            }
            _ => {
                if c == end && depth == 0 {
                    return Some(i);
                }
            }
        }
        i += 1;
    }
}

/// Parses a `(T)` cast head: `I8`/`U8`/`I16`/`U16`/`I32`/`U32`/`I64`/`U64`/
/// `F32`/`F64`/`F80` followed by `)`. Only the leading letter is
/// case-insensitive.
fn parse_cast(s: &[u8], pos: usize) -> Option<(SizeTag, usize)> {
    let c0 = byte_at(s, pos) & 0xDF;
    let (tag, next) = match c0 {
        b'I' | b'U' => {
            let signed = c0 == b'I';
            match (byte_at(s, pos + 1), byte_at(s, pos + 2)) {
                (b'8', _) => (if signed { SizeTag::I8 } else { SizeTag::U8 }, pos + 2),
                (b'1', b'6') => (if signed { SizeTag::I16 } else { SizeTag::U16 }, pos + 3),
                (b'3', b'2') => (if signed { SizeTag::I32 } else { SizeTag::U32 }, pos + 3),
                (b'6', b'4') => (if signed { SizeTag::I64 } else { SizeTag::U64 }, pos + 3),
                _ => return None,
            }
        }
        b'F' => match (byte_at(s, pos + 1), byte_at(s, pos + 2)) {
            (b'3', b'2') => (SizeTag::F32, pos + 3),
            (b'6', b'4') => (SizeTag::F64, pos + 3),
            (b'8', b'0') => (SizeTag::F80, pos + 3),
            _ => return None,
        },
        _ => return None,
    };
    if byte_at(s, next) == b')' {
        Some((tag, next + 1))
    } else {
        None
    }
}

/// Converts the machine-word view through a cast target and widens back.
/// Floats reinterpret the low bits and truncate toward zero.
fn apply_cast(tag: SizeTag, v: Word) -> Word {
    match tag {
        SizeTag::Default => v,
        SizeTag::U8 => v as u8 as Word,
        SizeTag::I8 => v as u8 as i8 as isize as Word,
        SizeTag::U16 => v as u16 as Word,
        SizeTag::I16 => v as u16 as i16 as isize as Word,
        SizeTag::U32 => v as u32 as Word,
        SizeTag::I32 => v as u32 as i32 as isize as Word,
        SizeTag::U64 | SizeTag::I64 => v as u64 as Word,
        SizeTag::F32 => truncate_float(f32::from_bits(v as u32) as f64),
        SizeTag::F64 | SizeTag::F80 => truncate_float(f64::from_bits(v as u64)),
    }
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum AddrError {
    NoProgress,
    Overflow,
}

/// Literal parser: `0x...` hex, `Rx...` module-relative hex, octal with a
/// leading `0`, decimal otherwise. Overflow of the machine word is a hard
/// error.
pub(crate) fn parse_address(s: &[u8], pos: usize, module: Word) -> Result<(Word, usize), AddrError> {
    let c0 = byte_at(s, pos);
    if c0 == b'0' && byte_at(s, pos + 1) | 0x20 == b'x' {
        return match scan_radix(s, pos + 2, 16)? {
            Some(parsed) => Ok(parsed),
            // A bare "0x" reads as the literal 0 followed by an 'x'.
            None => Ok((0, pos + 1)),
        };
    }
    if c0 | 0x20 == b'r' && byte_at(s, pos + 1) | 0x20 == b'x' {
        return match scan_radix(s, pos + 2, 16)? {
            Some((v, next)) => Ok((module.wrapping_add(v), next)),
            None => Err(AddrError::NoProgress),
        };
    }
    if c0 == b'0' {
        return match scan_radix(s, pos, 8)? {
            Some(parsed) => Ok(parsed),
            None => Err(AddrError::NoProgress),
        };
    }
    if c0.is_ascii_digit() {
        return match scan_radix(s, pos, 10)? {
            Some(parsed) => Ok(parsed),
            None => Err(AddrError::NoProgress),
        };
    }
    Err(AddrError::NoProgress)
}

pub(crate) fn scan_radix(
    s: &[u8],
    pos: usize,
    radix: u32,
) -> Result<Option<(Word, usize)>, AddrError> {
    let mut i = pos;
    let mut value: Word = 0;
    while let Some(digit) = (byte_at(s, i) as char).to_digit(radix) {
        value = value
            .checked_mul(radix as Word)
            .and_then(|v| v.checked_add(digit as Word))
            .ok_or(AddrError::Overflow)?;
        i += 1;
    }
    Ok(if i > pos { Some((value, i)) } else { None })
}
