// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Bracketed patch values.
//!
//! A patch value is a bracketed form with a subtype prefix: `<...>` resolves
//! to an absolute address or value, `[...]` to a rel32 displacement
//! (`target - (rel_source + 4)`), and `{...}` indirects through the resolved
//! address. Inside the brackets, `codecave:`, `option:`, `patch:`, `cpuid:`,
//! `nop:` and `int3:` select the value source; anything else is tried as a
//! breakpoint function name and finally as a sub-expression.

use std::borrow::Cow;

use crate::cpu::Manufacturer;
use crate::diagnostics::{error_option_not_found, error_patch_value_brackets, ExprError};
use crate::eval::{scan_radix, EvalContext, Evaluator, SizeTag};
use crate::op::Op;
use crate::op_scanner::byte_at;
use crate::value::{PatchValue, Word};

/// Recommended multi-byte NOP encodings by length.
static NOP_INTEL: [&[u8]; 16] = [
    &[],
    &[0x90],
    &[0x66, 0x90],
    &[0x0F, 0x1F, 0x00],
    &[0x0F, 0x1F, 0x40, 0x00],
    &[0x0F, 0x1F, 0x44, 0x00, 0x00],
    &[0x66, 0x0F, 0x1F, 0x44, 0x00, 0x00],
    &[0x0F, 0x1F, 0x80, 0x00, 0x00, 0x00, 0x00],
    &[0x0F, 0x1F, 0x84, 0x00, 0x00, 0x00, 0x00, 0x00],
    &[0x66, 0x0F, 0x1F, 0x84, 0x00, 0x00, 0x00, 0x00, 0x00],
    &[0x66, 0x2E, 0x0F, 0x1F, 0x84, 0x00, 0x00, 0x00, 0x00, 0x00],
    &[0x66, 0x66, 0x2E, 0x0F, 0x1F, 0x84, 0x00, 0x00, 0x00, 0x00, 0x00],
    &[0x66, 0x66, 0x66, 0x2E, 0x0F, 0x1F, 0x84, 0x00, 0x00, 0x00, 0x00, 0x00],
    &[0x66, 0x66, 0x66, 0x66, 0x2E, 0x0F, 0x1F, 0x84, 0x00, 0x00, 0x00, 0x00, 0x00],
    &[0x66, 0x66, 0x66, 0x66, 0x66, 0x2E, 0x0F, 0x1F, 0x84, 0x00, 0x00, 0x00, 0x00, 0x00],
    &[
        0x66, 0x66, 0x66, 0x66, 0x66, 0x66, 0x2E, 0x0F, 0x1F, 0x84, 0x00, 0x00, 0x00, 0x00, 0x00,
    ],
];

static NOP_AMD: [&[u8]; 16] = [
    &[],
    &[0x90],
    &[0x66, 0x90],
    &[0x0F, 0x1F, 0x00],
    &[0x0F, 0x1F, 0x40, 0x00],
    &[0x0F, 0x1F, 0x44, 0x00, 0x00],
    &[0x66, 0x0F, 0x1F, 0x44, 0x00, 0x00],
    &[0x0F, 0x1F, 0x80, 0x00, 0x00, 0x00, 0x00],
    &[0x0F, 0x1F, 0x84, 0x00, 0x00, 0x00, 0x00, 0x00],
    &[0x66, 0x0F, 0x1F, 0x84, 0x00, 0x00, 0x00, 0x00, 0x00],
    &[0x66, 0x2E, 0x0F, 0x1F, 0x84, 0x00, 0x00, 0x00, 0x00, 0x00],
    &[0x0F, 0x1F, 0x44, 0x00, 0x00, 0x66, 0x0F, 0x1F, 0x44, 0x00, 0x00],
    &[0x66, 0x0F, 0x1F, 0x44, 0x00, 0x00, 0x66, 0x0F, 0x1F, 0x44, 0x00, 0x00],
    &[0x66, 0x0F, 0x1F, 0x44, 0x00, 0x00, 0x0F, 0x1F, 0x80, 0x00, 0x00, 0x00, 0x00],
    &[
        0x0F, 0x1F, 0x80, 0x00, 0x00, 0x00, 0x00, 0x0F, 0x1F, 0x80, 0x00, 0x00, 0x00, 0x00,
    ],
    &[
        0x0F, 0x1F, 0x80, 0x00, 0x00, 0x00, 0x00, 0x0F, 0x1F, 0x84, 0x00, 0x00, 0x00, 0x00, 0x00,
    ],
];

static INT3: &[u8] = &[0xCC];

/// Finds the closer matching the bracket at `pos`, counting nesting depth of
/// the same bracket pair.
pub(crate) fn find_matching_end(s: &[u8], pos: usize, open: u8, close: u8) -> Option<usize> {
    let mut depth = 0isize;
    let mut i = pos;
    while i < s.len() {
        let c = s[i];
        depth += (c == open) as isize - (c == close) as isize;
        if depth == 0 {
            return Some(i);
        }
        i += 1;
    }
    None
}

fn body_prefix(s: &[u8], start: usize, end: usize, prefix: &[u8]) -> bool {
    end.saturating_sub(start) >= prefix.len()
        && s[start..start + prefix.len()].eq_ignore_ascii_case(prefix)
}

impl<'h> Evaluator<'h> {
    /// Parses exactly one bracketed patch value at `expr[0]`.
    ///
    /// Returns the typed value and the remaining input past the closing
    /// bracket.
    pub fn get_patch_value<'e>(
        &mut self,
        expr: &'e str,
        ctx: &EvalContext,
    ) -> Result<(PatchValue, &'e str), ExprError> {
        match self.parse_patch_value(expr, 0, ctx, false) {
            Ok((value, next)) => Ok((value.into_owned(), &expr[next.min(expr.len())..])),
            Err(err) => {
                self.host.log_line("EXPRESSION ERROR: Error parsing expression");
                Err(err)
            }
        }
    }

    pub(crate) fn parse_patch_value(
        &mut self,
        s: &str,
        pos: usize,
        ctx: &EvalContext,
        quiet: bool,
    ) -> Result<(Cow<'h, PatchValue>, usize), ExprError> {
        let bytes = s.as_bytes();
        let host = self.host;
        let (open, close) = match byte_at(bytes, pos) {
            b'<' => (b'<', b'>'),
            b'[' => (b'[', b']'),
            b'{' => (b'{', b'}'),
            _ => return Err(error_patch_value_brackets(host)),
        };
        let Some(end_idx) = find_matching_end(bytes, pos, open, close) else {
            return Err(error_patch_value_brackets(host));
        };
        let is_relative = open == b'[';
        let is_indirect = open == b'{';
        let body_start = pos + 1;

        let mut value: Cow<'h, PatchValue> = if body_prefix(bytes, body_start, end_idx, b"codecave:")
        {
            let addr =
                self.codecave_address(s, body_start + 9, end_idx, close, is_relative, ctx, quiet)?;
            Cow::Owned(address_value(addr, is_relative))
        } else if body_prefix(bytes, body_start, end_idx, b"option:") {
            let name = &s[body_start + 7..end_idx];
            match host.option_value(name) {
                Some(option) => Cow::Borrowed(option),
                None => {
                    if !quiet {
                        error_option_not_found(host, name);
                    }
                    Cow::Owned(PatchValue::dword(0))
                }
            }
        } else if body_prefix(bytes, body_start, end_idx, b"patch:") {
            let name = &s[body_start + 6..end_idx];
            Cow::Owned(PatchValue::dword(host.patch_loaded(name) as u32))
        } else if body_prefix(bytes, body_start, end_idx, b"cpuid:") {
            let name = &s[body_start + 6..end_idx];
            let present = match self.cpu.feature(name) {
                Some(present) => present,
                None => {
                    if !quiet {
                        self.diag.warn_unknown_cpu_feature(host, name);
                    }
                    true
                }
            };
            Cow::Owned(PatchValue::boolean(present))
        } else if body_prefix(bytes, body_start, end_idx, b"nop:") {
            let count = self
                .eval_frame(s, body_start + 4, close, Op::Start, 0, ctx, quiet)
                .map(|(v, _)| v)
                .unwrap_or(0);
            Cow::Owned(self.multibyte_nop(count))
        } else if body_prefix(bytes, body_start, end_idx, b"int3:") {
            let count = self
                .eval_frame(s, body_start + 5, close, Op::Start, 0, ctx, quiet)
                .map(|(v, _)| v)
                .unwrap_or(0);
            let unit: &'static [u8] = if count != 0 { INT3 } else { &[] };
            Cow::Owned(PatchValue::code(Cow::Borrowed(unit), count))
        } else {
            let addr =
                self.bp_func_or_address(s, body_start, end_idx, close, is_relative, ctx, quiet);
            Cow::Owned(address_value(addr, is_relative))
        };

        if is_indirect {
            let addr = self.collapse_patch_value(&value)?;
            let word = if addr == 0 {
                if !quiet {
                    self.diag.warn_null_deref(host);
                }
                0
            } else {
                self.read_sized(addr, SizeTag::Default)
            };
            value = Cow::Owned(PatchValue::pointer(word));
        }

        Ok((value, end_idx + 1))
    }

    /// Resolves `codecave:NAME[+OFFSET]`. A failed lookup warns
    /// (suppressibly) and produces 0 with neither offset nor relative
    /// adjustment applied.
    #[allow(clippy::too_many_arguments)]
    fn codecave_address(
        &mut self,
        s: &str,
        name_start: usize,
        end_idx: usize,
        close: u8,
        is_relative: bool,
        ctx: &EvalContext,
        quiet: bool,
    ) -> Result<Word, ExprError> {
        let bytes = s.as_bytes();
        let plus = (name_start..end_idx).find(|&j| bytes[j] == b'+');
        let name_end = plus.unwrap_or(end_idx);
        let name = &s[name_start..name_end];

        let mut addr = match self.host.codecave_addr(name) {
            Some(addr) if addr != 0 => addr,
            _ => {
                if !quiet {
                    self.diag.warn_codecave_not_found(self.host, name);
                }
                return Ok(0);
            }
        };

        if let Some(plus) = plus {
            let off_start = plus + 1;
            // A hex offset is tried first for compatibility; anything that
            // is not plain hex is evaluated as a sub-expression.
            match scan_radix(bytes, off_start, 16) {
                Ok(Some((offset, _))) => addr = addr.wrapping_add(offset),
                _ => match self.eval_frame(s, off_start, close, Op::Start, 0, ctx, quiet) {
                    Ok((offset, _)) => addr = addr.wrapping_add(offset),
                    Err(_) => {
                        self.host
                            .log_line("EXPRESSION ERROR: Error parsing expression");
                    }
                },
            }
        }
        if is_relative {
            addr = addr.wrapping_sub(ctx.rel_source.wrapping_add(4));
        }
        Ok(addr)
    }

    /// Resolves a bare bracket body: a breakpoint function name if the host
    /// knows one, otherwise a sub-expression.
    #[allow(clippy::too_many_arguments)]
    fn bp_func_or_address(
        &mut self,
        s: &str,
        body_start: usize,
        end_idx: usize,
        close: u8,
        is_relative: bool,
        ctx: &EvalContext,
        quiet: bool,
    ) -> Word {
        let name = &s[body_start..end_idx];
        let mut addr = match self.host.bp_func_addr(name) {
            Some(addr) => addr,
            None => match self.eval_frame(s, body_start, close, Op::Start, 0, ctx, quiet) {
                Ok((v, _)) => v,
                Err(_) => {
                    self.host
                        .log_line("EXPRESSION ERROR: Error parsing expression");
                    return 0;
                }
            },
        };
        if is_relative {
            addr = addr.wrapping_sub(ctx.rel_source.wrapping_add(4));
        }
        addr
    }

    /// Builds the optimal NOP run for `count` bytes: one instruction up to
    /// 15 bytes, beyond that repeated copies of the longest length that
    /// divides the count.
    fn multibyte_nop(&self, count: Word) -> PatchValue {
        if count == 0 {
            return PatchValue::code(Cow::Borrowed(&[]), 0);
        }
        let mut unit_len = count;
        let mut reps: Word = 1;
        if count > 15 {
            for len in (1..=15usize).rev() {
                if count % len == 0 {
                    unit_len = len;
                    reps = count / len;
                    break;
                }
            }
        }
        let table = if self.cpu.manufacturer == Manufacturer::Amd {
            &NOP_AMD
        } else {
            &NOP_INTEL
        };
        PatchValue::code(Cow::Borrowed(table[unit_len]), reps)
    }
}

fn address_value(addr: Word, is_relative: bool) -> PatchValue {
    if is_relative {
        PatchValue::dword(addr as u32)
    } else {
        PatchValue::pointer(addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::CpuFeatures;
    use crate::host::TableHost;
    use crate::value::{CodeBytes, ValueKind};

    fn patch_value(host: &TableHost, cpu: &CpuFeatures, expr: &str) -> PatchValue {
        let mut ev = Evaluator::new(host, cpu);
        ev.get_patch_value(expr, &EvalContext::default())
            .unwrap_or_else(|e| panic!("patch value {expr:?} failed: {e}"))
            .0
    }

    fn code_of(v: PatchValue) -> CodeBytes {
        match v.kind {
            ValueKind::Code(code) => code,
            other => panic!("expected code, got {other:?}"),
        }
    }

    #[test]
    fn matching_end_counts_depth() {
        assert_eq!(find_matching_end(b"<a<b>c>", 0, b'<', b'>'), Some(6));
        assert_eq!(find_matching_end(b"[a[b]c]", 0, b'[', b']'), Some(6));
        assert_eq!(find_matching_end(b"<abc", 0, b'<', b'>'), None);
        assert_eq!(find_matching_end(b"<>", 0, b'<', b'>'), Some(1));
    }

    #[test]
    fn nop_lengths_up_to_fifteen() {
        let host = TableHost::new();
        let cpu = CpuFeatures::default();
        for len in 1..=15usize {
            let code = code_of(patch_value(&host, &cpu, &format!("<nop:{len}>")));
            assert_eq!(code.unit.len(), len);
            assert_eq!(code.count, 1);
        }
        let code = code_of(patch_value(&host, &cpu, "<nop:0>"));
        assert_eq!(code.total_len(), 0);
    }

    #[test]
    fn nop_counts_above_fifteen_split_by_largest_divisor() {
        let host = TableHost::new();
        let cpu = CpuFeatures::default();
        // 30 = 15 * 2.
        let code = code_of(patch_value(&host, &cpu, "<nop:30>"));
        assert_eq!((code.unit.len(), code.count), (15, 2));
        // 16 = 8 * 2.
        let code = code_of(patch_value(&host, &cpu, "<nop:16>"));
        assert_eq!((code.unit.len(), code.count), (8, 2));
        // 17 is prime: single-byte NOPs.
        let code = code_of(patch_value(&host, &cpu, "<nop:17>"));
        assert_eq!((code.unit.len(), code.count), (1, 17));
        assert_eq!(code.total_len(), 17);
        // 26 = 13 * 2.
        let code = code_of(patch_value(&host, &cpu, "<nop:26>"));
        assert_eq!((code.unit.len(), code.count), (13, 2));
    }

    #[test]
    fn nop_count_accepts_sub_expressions() {
        let host = TableHost::new();
        let cpu = CpuFeatures::default();
        let code = code_of(patch_value(&host, &cpu, "<nop:(3 + 2) * 2>"));
        assert_eq!(code.total_len(), 10);
    }

    #[test]
    fn nop_table_is_per_vendor() {
        let host = TableHost::new();
        let amd = CpuFeatures {
            manufacturer: Manufacturer::Amd,
            ..CpuFeatures::default()
        };
        let code = code_of(patch_value(&host, &amd, "<nop:11>"));
        assert_eq!(&code.unit[..], NOP_AMD[11]);
        let intel = CpuFeatures {
            manufacturer: Manufacturer::Intel,
            ..CpuFeatures::default()
        };
        let code = code_of(patch_value(&host, &intel, "<nop:11>"));
        assert_eq!(&code.unit[..], NOP_INTEL[11]);
    }

    #[test]
    fn int3_repeats_cc() {
        let host = TableHost::new();
        let cpu = CpuFeatures::default();
        let code = code_of(patch_value(&host, &cpu, "<int3:4>"));
        assert_eq!(code.to_vec(), vec![0xCC; 4]);
        let code = code_of(patch_value(&host, &cpu, "<int3:0>"));
        assert_eq!(code.total_len(), 0);
    }

    #[test]
    fn cpuid_known_and_unknown() {
        let host = TableHost::new();
        let cpu = CpuFeatures {
            sse2: true,
            ..CpuFeatures::default()
        };
        assert_eq!(
            patch_value(&host, &cpu, "<cpuid:SSE2>").kind,
            ValueKind::Bool(true)
        );
        assert_eq!(
            patch_value(&host, &cpu, "<cpuid:avx>").kind,
            ValueKind::Bool(false)
        );
        assert_eq!(
            patch_value(&host, &cpu, "<cpuid:warp9>").kind,
            ValueKind::Bool(true)
        );
        let log = host.take_log();
        assert_eq!(log.len(), 1);
        assert!(log[0].contains("WARNING 5") && log[0].contains("warp9"));
    }

    #[test]
    fn patch_test_reports_loaded_state() {
        let mut host = TableHost::new();
        host.add_patch("base_patch");
        let cpu = CpuFeatures::default();
        assert_eq!(
            patch_value(&host, &cpu, "<patch:base_patch>").kind,
            ValueKind::Dword(1)
        );
        assert_eq!(
            patch_value(&host, &cpu, "<patch:missing>").kind,
            ValueKind::Dword(0)
        );
    }

    #[test]
    fn option_returns_full_typed_value() {
        let mut host = TableHost::new();
        host.add_option("scale", PatchValue::new(ValueKind::Float(1.5)));
        let cpu = CpuFeatures::default();
        assert_eq!(
            patch_value(&host, &cpu, "<option:scale>").kind,
            ValueKind::Float(1.5)
        );
        assert_eq!(
            patch_value(&host, &cpu, "<option:none_such>").kind,
            ValueKind::Dword(0)
        );
        let log = host.take_log();
        assert!(log.iter().any(|l| l.contains("ERROR 3")));
    }

    #[test]
    fn codecave_offset_forms() {
        let mut host = TableHost::new();
        host.add_codecave("cave", 0x5000);
        let cpu = CpuFeatures::default();
        let ctx = EvalContext::default();
        let mut ev = Evaluator::new(&host, &cpu);
        // Hex offset first.
        let (v, _) = ev.get_patch_value("<codecave:cave+10>", &ctx).unwrap();
        assert_eq!(v.kind, ValueKind::Pointer(0x5010));
        // Falls back to a sub-expression when the offset is not hex.
        let (v, _) = ev.get_patch_value("<codecave:cave+(2*3)>", &ctx).unwrap();
        assert_eq!(v.kind, ValueKind::Pointer(0x5006));
    }

    #[test]
    fn codecave_not_found_returns_zero_with_warning() {
        let host = TableHost::new();
        let cpu = CpuFeatures::default();
        let ctx = EvalContext {
            rel_source: 0x1000,
            ..EvalContext::default()
        };
        let mut ev = Evaluator::new(&host, &cpu);
        let (v, _) = ev.get_patch_value("[codecave:ghost]", &ctx).unwrap();
        // No relative adjustment on a missed lookup.
        assert_eq!(v.kind, ValueKind::Dword(0));
        assert!(host.take_log().iter().any(|l| l.contains("WARNING 3")));
        // Suppressed while sizing caves.
        ev.set_codecave_suppress(true);
        let _ = ev.get_patch_value("[codecave:ghost]", &ctx).unwrap();
        assert!(host.take_log().is_empty());
    }

    #[test]
    fn bp_func_and_raw_address_fallback() {
        let mut host = TableHost::new();
        host.add_bp_func("draw_hook", 0x40_1000);
        let cpu = CpuFeatures::default();
        let ctx = EvalContext {
            rel_source: 0x40_0000,
            ..EvalContext::default()
        };
        let mut ev = Evaluator::new(&host, &cpu);
        let (v, _) = ev.get_patch_value("<draw_hook>", &ctx).unwrap();
        assert_eq!(v.kind, ValueKind::Pointer(0x40_1000));
        let (v, _) = ev.get_patch_value("[draw_hook]", &ctx).unwrap();
        assert_eq!(v.kind, ValueKind::Dword(0xFFC));
        let (v, _) = ev.get_patch_value("<0x1234 + 2>", &ctx).unwrap();
        assert_eq!(v.kind, ValueKind::Pointer(0x1236));
    }

    #[test]
    fn indirect_braces_read_through_memory() {
        let mut host = TableHost::new();
        host.add_bp_func("slot", 0x2000);
        let mut image = vec![0u8; 16];
        image[..8].copy_from_slice(&0x4455u64.to_le_bytes()[..8]);
        host.set_memory(0x2000, image);
        let cpu = CpuFeatures::default();
        let mut ev = Evaluator::new(&host, &cpu);
        let (v, _) = ev.get_patch_value("{slot}", &EvalContext::default()).unwrap();
        assert_eq!(v.kind, ValueKind::Pointer(0x4455));
    }

    #[test]
    fn unmatched_patch_value_brackets() {
        let host = TableHost::new();
        let cpu = CpuFeatures::default();
        let mut ev = Evaluator::new(&host, &cpu);
        let err = ev
            .get_patch_value("<nop:3", &EvalContext::default())
            .unwrap_err();
        assert_eq!(err, ExprError::UnmatchedPatchValue);
    }

    #[test]
    fn rest_points_past_closing_bracket() {
        let host = TableHost::new();
        let cpu = CpuFeatures::default();
        let mut ev = Evaluator::new(&host, &cpu);
        let (_, rest) = ev
            .get_patch_value("<int3:1> tail", &EvalContext::default())
            .unwrap();
        assert_eq!(rest, " tail");
    }
}
