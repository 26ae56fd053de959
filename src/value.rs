// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Tagged patch values and the option-merge arithmetic.
//!
//! A `PatchValue` is what a patch option or bracketed patch value produces:
//! a machine integer, float, string, or raw code bytes, together with the
//! merge operator applied when a patch stacks a new value onto an existing
//! option. The evaluator usually collapses these to a machine word; the
//! typed arithmetic here is used by the option-merge path, which must respect
//! the stored width.

use std::borrow::Cow;

use crate::host::PatchHost;
use crate::op::Op;
use crate::op_scanner::scan_operator;

/// Machine word of the target process.
pub type Word = usize;

/// A run of instruction bytes, `count` repetitions of `unit`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CodeBytes {
    pub unit: Cow<'static, [u8]>,
    pub count: usize,
}

impl CodeBytes {
    pub fn total_len(&self) -> usize {
        self.unit.len() * self.count
    }

    /// Materializes the repeated byte sequence.
    pub fn to_vec(&self) -> Vec<u8> {
        self.unit.repeat(self.count)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ValueKind {
    Byte(u8),
    SByte(i8),
    Word(u16),
    SWord(i16),
    Dword(u32),
    SDword(i32),
    Qword(u64),
    SQword(i64),
    Float(f32),
    Double(f64),
    LongDouble(f64),
    Bool(bool),
    Pointer(Word),
    Code(CodeBytes),
    Str(Vec<u8>),
    Str16(Vec<u16>),
    Str32(Vec<u32>),
    Unknown,
    None,
    Default,
}

impl ValueKind {
    pub fn tag_name(&self) -> &'static str {
        match self {
            ValueKind::Byte(_) => "byte",
            ValueKind::SByte(_) => "sbyte",
            ValueKind::Word(_) => "word",
            ValueKind::SWord(_) => "sword",
            ValueKind::Dword(_) => "dword",
            ValueKind::SDword(_) => "sdword",
            ValueKind::Qword(_) => "qword",
            ValueKind::SQword(_) => "sqword",
            ValueKind::Float(_) => "float",
            ValueKind::Double(_) => "double",
            ValueKind::LongDouble(_) => "longdouble",
            ValueKind::Bool(_) => "bool",
            ValueKind::Pointer(_) => "pointer",
            ValueKind::Code(_) => "code",
            ValueKind::Str(_) => "string",
            ValueKind::Str16(_) => "string16",
            ValueKind::Str32(_) => "string32",
            ValueKind::Unknown => "unknown",
            ValueKind::None => "none",
            ValueKind::Default => "default",
        }
    }

    /// Raw bit image of a numeric value, used when the right operand of a
    /// merge is reinterpreted in the left operand's width.
    fn to_bits(&self) -> Option<u64> {
        Some(match *self {
            ValueKind::Byte(v) => v as u64,
            ValueKind::SByte(v) => v as u8 as u64,
            ValueKind::Word(v) => v as u64,
            ValueKind::SWord(v) => v as u16 as u64,
            ValueKind::Dword(v) => v as u64,
            ValueKind::SDword(v) => v as u32 as u64,
            ValueKind::Qword(v) => v,
            ValueKind::SQword(v) => v as u64,
            ValueKind::Float(v) => v.to_bits() as u64,
            ValueKind::Double(v) | ValueKind::LongDouble(v) => v.to_bits(),
            ValueKind::Bool(v) => v as u64,
            ValueKind::Pointer(v) => v as u64,
            _ => return None,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PatchValue {
    pub kind: ValueKind,
    pub merge_op: Op,
}

impl PatchValue {
    pub fn new(kind: ValueKind) -> Self {
        Self {
            kind,
            merge_op: Op::Add,
        }
    }

    pub fn dword(v: u32) -> Self {
        Self::new(ValueKind::Dword(v))
    }

    pub fn pointer(v: Word) -> Self {
        Self::new(ValueKind::Pointer(v))
    }

    pub fn boolean(v: bool) -> Self {
        Self::new(ValueKind::Bool(v))
    }

    pub fn code(unit: Cow<'static, [u8]>, count: usize) -> Self {
        Self::new(ValueKind::Code(CodeBytes { unit, count }))
    }

    pub fn none() -> Self {
        Self::new(ValueKind::None)
    }
}

/// Attaches the merge operator parsed from `op_str` to `value`.
///
/// Assignment spellings are accepted and stripped to their base operation.
/// Anything that is not an arithmetic, bitwise, shift or rotate operator
/// falls back to addition.
pub fn set_merge_op(op_str: Option<&str>, value: &mut PatchValue) {
    value.merge_op = Op::Add;
    let Some(op_str) = op_str else { return };
    let (op, _) = scan_operator(op_str.as_bytes(), 0, 0);
    let op = op.assignment_base().unwrap_or(op);
    match op {
        Op::Multiply
        | Op::Divide
        | Op::Modulo
        | Op::Add
        | Op::Subtract
        | Op::Shl
        | Op::Shr
        | Op::LogicalShl
        | Op::LogicalShr
        | Op::Rol
        | Op::Ror
        | Op::BitAnd
        | Op::BitNand
        | Op::BitXor
        | Op::BitXnor
        | Op::BitOr
        | Op::BitNor => value.merge_op = op,
        _ => {}
    }
}

macro_rules! int_value_op {
    ($l:expr, $rb:expr, |$a:ident, $b:ident| $body:expr) => {
        match *$l {
            ValueKind::Byte($a) => {
                let $b = $rb as u8;
                Some(ValueKind::Byte($body))
            }
            ValueKind::SByte($a) => {
                let $b = $rb as i8;
                Some(ValueKind::SByte($body))
            }
            ValueKind::Word($a) => {
                let $b = $rb as u16;
                Some(ValueKind::Word($body))
            }
            ValueKind::SWord($a) => {
                let $b = $rb as i16;
                Some(ValueKind::SWord($body))
            }
            ValueKind::Dword($a) => {
                let $b = $rb as u32;
                Some(ValueKind::Dword($body))
            }
            ValueKind::SDword($a) => {
                let $b = $rb as i32;
                Some(ValueKind::SDword($body))
            }
            ValueKind::Qword($a) => {
                let $b = $rb;
                Some(ValueKind::Qword($body))
            }
            ValueKind::SQword($a) => {
                let $b = $rb as i64;
                Some(ValueKind::SQword($body))
            }
            _ => None,
        }
    };
}

macro_rules! float_value_op {
    ($l:expr, $rb:expr, |$a:ident, $b:ident| $body:expr) => {
        match *$l {
            ValueKind::Float($a) => {
                let $b = f32::from_bits($rb as u32);
                Some(ValueKind::Float($body))
            }
            ValueKind::Double($a) => {
                let $b = f64::from_bits($rb);
                Some(ValueKind::Double($body))
            }
            ValueKind::LongDouble($a) => {
                let $b = f64::from_bits($rb);
                Some(ValueKind::LongDouble($body))
            }
            _ => None,
        }
    };
}

fn bitwise_not(kind: ValueKind) -> ValueKind {
    match kind {
        ValueKind::Byte(v) => ValueKind::Byte(!v),
        ValueKind::SByte(v) => ValueKind::SByte(!v),
        ValueKind::Word(v) => ValueKind::Word(!v),
        ValueKind::SWord(v) => ValueKind::SWord(!v),
        ValueKind::Dword(v) => ValueKind::Dword(!v),
        ValueKind::SDword(v) => ValueKind::SDword(!v),
        ValueKind::Qword(v) => ValueKind::Qword(!v),
        ValueKind::SQword(v) => ValueKind::SQword(!v),
        _ => ValueKind::None,
    }
}

fn merge_kinds(op: Op, left: &ValueKind, right: &ValueKind) -> ValueKind {
    let Some(rb) = right.to_bits() else {
        return ValueKind::None;
    };
    let result = match op {
        Op::Add => int_value_op!(left, rb, |a, b| a.wrapping_add(b))
            .or_else(|| float_value_op!(left, rb, |a, b| a + b)),
        Op::Subtract => int_value_op!(left, rb, |a, b| a.wrapping_sub(b))
            .or_else(|| float_value_op!(left, rb, |a, b| a - b)),
        Op::Multiply => int_value_op!(left, rb, |a, b| a.wrapping_mul(b))
            .or_else(|| float_value_op!(left, rb, |a, b| a * b)),
        Op::Divide => {
            if rb == 0 {
                return match left {
                    ValueKind::Float(_) | ValueKind::Double(_) | ValueKind::LongDouble(_) => {
                        float_value_op!(left, rb, |a, b| a / b).unwrap_or(ValueKind::None)
                    }
                    _ => ValueKind::None,
                };
            }
            // The divisor truncated to the operand width may still be zero.
            int_value_op!(left, rb, |a, b| a.checked_div(b).unwrap_or(0))
                .or_else(|| float_value_op!(left, rb, |a, b| a / b))
        }
        Op::Modulo => {
            // Modulo is integer-only; a float-tagged left operand yields none.
            if rb == 0 {
                return ValueKind::None;
            }
            int_value_op!(left, rb, |a, b| a.checked_rem(b).unwrap_or(0))
        }
        Op::Shl | Op::LogicalShl => int_value_op!(left, rb, |a, b| {
            let _ = b;
            a.wrapping_shl(rb as u32)
        }),
        Op::Shr | Op::LogicalShr => int_value_op!(left, rb, |a, b| {
            let _ = b;
            a.wrapping_shr(rb as u32)
        }),
        Op::Rol => int_value_op!(left, rb, |a, b| {
            let _ = b;
            a.rotate_left(rb as u32)
        }),
        Op::Ror => int_value_op!(left, rb, |a, b| {
            let _ = b;
            a.rotate_right(rb as u32)
        }),
        Op::BitAnd => int_value_op!(left, rb, |a, b| a & b),
        Op::BitOr => int_value_op!(left, rb, |a, b| a | b),
        Op::BitXor => int_value_op!(left, rb, |a, b| a ^ b),
        _ => None,
    };
    result.unwrap_or(ValueKind::None)
}

/// Applies a named merge operation to two tagged values.
///
/// `op_str` is scanned with the expression tokenizer; `None` uses the left
/// value's stored merge operator. The operation runs in the left operand's
/// width. Comparison, logical, assignment and sequencing operators are
/// rejected with a log line; unrecognized names default to addition.
pub fn value_op_str(
    host: &dyn PatchHost,
    op_str: Option<&str>,
    left: &PatchValue,
    right: &PatchValue,
) -> PatchValue {
    let op = match op_str {
        Some(s) => scan_operator(s.as_bytes(), 0, 0).0,
        None => left.merge_op,
    };
    let op = op.assignment_base().unwrap_or(op);
    let kind = match op {
        Op::Multiply
        | Op::Divide
        | Op::Modulo
        | Op::Add
        | Op::Subtract
        | Op::Shl
        | Op::Shr
        | Op::LogicalShl
        | Op::LogicalShr
        | Op::Rol
        | Op::Ror
        | Op::BitAnd
        | Op::BitXor
        | Op::BitOr => merge_kinds(op, &left.kind, &right.kind),
        Op::BitNand => bitwise_not(merge_kinds(Op::BitAnd, &left.kind, &right.kind)),
        Op::BitXnor => bitwise_not(merge_kinds(Op::BitXor, &left.kind, &right.kind)),
        Op::BitNor => bitwise_not(merge_kinds(Op::BitOr, &left.kind, &right.kind)),
        Op::ThreeWay
        | Op::Less
        | Op::LessEqual
        | Op::Greater
        | Op::GreaterEqual
        | Op::Equal
        | Op::NotEqual
        | Op::LogicalAnd
        | Op::LogicalNand
        | Op::LogicalXor
        | Op::LogicalXnor
        | Op::LogicalOr
        | Op::LogicalNor => {
            host.log_line("Options cannot use logical or comparison operators");
            ValueKind::None
        }
        Op::Assign => {
            host.log_line("Options cannot use assignment operators");
            ValueKind::None
        }
        Op::Comma | Op::Gomma => {
            host.log_line("Options cannot use sequencing operators");
            ValueKind::None
        }
        _ => merge_kinds(Op::Add, &left.kind, &right.kind),
    };
    let mut out = PatchValue::new(kind);
    out.merge_op = left.merge_op;
    out
}

/// Converts an 80-bit x87 extended float to `f64`.
///
/// Used when dereferencing through a `tbyte ptr` size qualifier. Unnormal
/// encodings and NaN payloads collapse the way a load-and-store through the
/// FPU would.
pub fn f80_to_f64(bytes: [u8; 10]) -> f64 {
    let mantissa = u64::from_le_bytes(bytes[..8].try_into().unwrap());
    let sign_exp = u16::from_le_bytes(bytes[8..].try_into().unwrap());
    let sign = (sign_exp >> 15) as u64;
    let exp = (sign_exp & 0x7FFF) as i32;
    if exp == 0 && mantissa == 0 {
        return f64::from_bits(sign << 63);
    }
    if exp == 0x7FFF {
        return if mantissa << 1 == 0 {
            if sign == 0 {
                f64::INFINITY
            } else {
                f64::NEG_INFINITY
            }
        } else {
            f64::NAN
        };
    }
    let value = mantissa as f64 * (2.0f64).powi(exp - 16383 - 63);
    if sign != 0 {
        -value
    } else {
        value
    }
}
