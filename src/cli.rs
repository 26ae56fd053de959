// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Command-line interface parsing and context loading.

use std::path::PathBuf;

use clap::{ArgAction, Parser, ValueEnum};
use serde_json::Value;

use crate::host::TableHost;
use crate::registers::RegisterBank;
use crate::value::{set_merge_op, PatchValue, ValueKind, Word};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

const LONG_ABOUT: &str = "Runtime expression evaluator for binary patch definitions.

Expressions may reference breakpoint registers, patch options, codecave
addresses, CPU features and literal numbers, and evaluate exactly as the
patcher evaluates them when writing a patch byte. Supply --context to stand
in for the patch stack of a running target.";

#[derive(Parser, Debug)]
#[command(
    name = "patchForge",
    version = VERSION,
    about = "Expression evaluator for binary patch definitions",
    long_about = LONG_ABOUT
)]
pub struct Cli {
    #[arg(
        long = "format",
        value_enum,
        default_value_t = OutputFormat::Text,
        long_help = "Select output format. text is default; json emits one object per input."
    )]
    pub format: OutputFormat,
    #[arg(
        short = 'q',
        long = "quiet",
        action = ArgAction::SetTrue,
        long_help = "Suppress diagnostic log lines. Results are still printed."
    )]
    pub quiet: bool,
    #[arg(
        long = "context",
        value_name = "FILE",
        long_help = "JSON file supplying options, codecaves, functions, loaded patches, \
                     register values and a memory image."
    )]
    pub context: Option<PathBuf>,
    #[arg(
        long = "end",
        value_name = "CHAR",
        long_help = "End sentinel the expression stops at. Defaults to end of input."
    )]
    pub end: Option<char>,
    #[arg(
        long = "rel-source",
        value_name = "ADDR",
        value_parser = parse_addr,
        long_help = "Address the current patch byte is written at. Relative patch values \
                     subtract ADDR + 4 to form a rel32 displacement."
    )]
    pub rel_source: Option<Word>,
    #[arg(
        long = "module",
        value_name = "ADDR",
        value_parser = parse_addr,
        long_help = "Base address of the patched module, used by Rx literals."
    )]
    pub module: Option<Word>,
    #[arg(
        long = "patch-value",
        action = ArgAction::SetTrue,
        long_help = "Parse each input as a single bracketed patch value instead of a full \
                     expression."
    )]
    pub patch_value: bool,
    #[arg(
        long = "print-cpu",
        action = ArgAction::SetTrue,
        long_help = "Print the detected CPU feature report and exit."
    )]
    pub print_cpu: bool,
    #[arg(value_name = "EXPR")]
    pub exprs: Vec<String>,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

pub fn parse_addr(text: &str) -> Result<Word, String> {
    let text = text.trim();
    let parsed = if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Word::from_str_radix(hex, 16)
    } else {
        text.parse()
    };
    parsed.map_err(|_| format!("invalid address: {text}"))
}

/// Host context assembled from a `--context` JSON document.
pub struct LoadedContext {
    pub host: TableHost,
    pub regs: Option<RegisterBank>,
}

/// Parses the context document. The shape mirrors what the patch stack would
/// supply at runtime:
///
/// ```json
/// {
///   "options": {"speed": 3, "scale": {"type": "float", "value": 1.5, "op": "*"}},
///   "codecaves": {"stage": "0x2000"},
///   "functions": {"draw_hook": "0x401000"},
///   "patches": ["base"],
///   "regs": {"eax": "0x11223344"},
///   "memory": {"base": "0x1000", "bytes": "78563412"}
/// }
/// ```
pub fn load_context(text: &str) -> Result<LoadedContext, String> {
    let root: Value =
        serde_json::from_str(text).map_err(|e| format!("context is not valid JSON: {e}"))?;
    let Some(root) = root.as_object() else {
        return Err("context root must be an object".to_string());
    };

    let mut host = TableHost::new();
    let mut regs = None;

    if let Some(options) = root.get("options") {
        let Some(options) = options.as_object() else {
            return Err("\"options\" must be an object".to_string());
        };
        for (name, value) in options {
            host.add_option(name, option_from_json(name, value)?);
        }
    }
    if let Some(caves) = root.get("codecaves") {
        let Some(caves) = caves.as_object() else {
            return Err("\"codecaves\" must be an object".to_string());
        };
        for (name, value) in caves {
            host.add_codecave(name, addr_from_json(name, value)?);
        }
    }
    if let Some(funcs) = root.get("functions") {
        let Some(funcs) = funcs.as_object() else {
            return Err("\"functions\" must be an object".to_string());
        };
        for (name, value) in funcs {
            host.add_bp_func(name, addr_from_json(name, value)?);
        }
    }
    if let Some(patches) = root.get("patches") {
        let Some(patches) = patches.as_array() else {
            return Err("\"patches\" must be an array of names".to_string());
        };
        for patch in patches {
            let Some(name) = patch.as_str() else {
                return Err("\"patches\" entries must be strings".to_string());
            };
            host.add_patch(name);
        }
    }
    if let Some(reg_values) = root.get("regs") {
        let Some(reg_values) = reg_values.as_object() else {
            return Err("\"regs\" must be an object".to_string());
        };
        let mut bank = RegisterBank::new();
        for (name, value) in reg_values {
            let addr = addr_from_json(name, value)?;
            if !bank.set(name, addr) {
                return Err(format!("unknown register \"{name}\""));
            }
        }
        regs = Some(bank);
    }
    if let Some(memory) = root.get("memory") {
        let Some(memory) = memory.as_object() else {
            return Err("\"memory\" must be an object".to_string());
        };
        let base = memory
            .get("base")
            .map(|v| addr_from_json("memory.base", v))
            .transpose()?
            .unwrap_or(0);
        let bytes = memory
            .get("bytes")
            .and_then(Value::as_str)
            .map(hex_bytes)
            .transpose()?
            .unwrap_or_default();
        host.set_memory(base, bytes);
    }

    Ok(LoadedContext { host, regs })
}

fn addr_from_json(name: &str, value: &Value) -> Result<Word, String> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .map(|v| v as Word)
            .ok_or_else(|| format!("\"{name}\" must be an unsigned address")),
        Value::String(s) => parse_addr(s),
        _ => Err(format!("\"{name}\" must be a number or an address string")),
    }
}

fn option_from_json(name: &str, value: &Value) -> Result<PatchValue, String> {
    match value {
        Value::Number(n) => {
            let kind = if let Some(u) = n.as_u64() {
                if u <= u32::MAX as u64 {
                    ValueKind::Dword(u as u32)
                } else {
                    ValueKind::Qword(u)
                }
            } else if let Some(i) = n.as_i64() {
                if i >= i32::MIN as i64 {
                    ValueKind::SDword(i as i32)
                } else {
                    ValueKind::SQword(i)
                }
            } else {
                ValueKind::Double(n.as_f64().unwrap_or(0.0))
            };
            Ok(PatchValue::new(kind))
        }
        Value::Bool(b) => Ok(PatchValue::boolean(*b)),
        Value::String(s) => Ok(PatchValue::new(ValueKind::Str(s.as_bytes().to_vec()))),
        Value::Object(fields) => {
            let type_name = fields
                .get("type")
                .and_then(Value::as_str)
                .ok_or_else(|| format!("option \"{name}\" needs a \"type\""))?;
            let payload = fields
                .get("value")
                .ok_or_else(|| format!("option \"{name}\" needs a \"value\""))?;
            let mut out = PatchValue::new(typed_kind(name, type_name, payload)?);
            set_merge_op(fields.get("op").and_then(Value::as_str), &mut out);
            Ok(out)
        }
        _ => Err(format!("option \"{name}\" has an unsupported JSON shape")),
    }
}

fn typed_kind(name: &str, type_name: &str, payload: &Value) -> Result<ValueKind, String> {
    let as_u64 = || {
        payload
            .as_u64()
            .or_else(|| payload.as_str().and_then(|s| parse_addr(s).ok().map(|v| v as u64)))
            .ok_or_else(|| format!("option \"{name}\" value must be an unsigned number"))
    };
    let as_i64 = || {
        payload
            .as_i64()
            .ok_or_else(|| format!("option \"{name}\" value must be a signed number"))
    };
    let as_f64 = || {
        payload
            .as_f64()
            .ok_or_else(|| format!("option \"{name}\" value must be a number"))
    };
    Ok(match type_name.to_ascii_lowercase().as_str() {
        "byte" => ValueKind::Byte(as_u64()? as u8),
        "sbyte" => ValueKind::SByte(as_i64()? as i8),
        "word" => ValueKind::Word(as_u64()? as u16),
        "sword" => ValueKind::SWord(as_i64()? as i16),
        "dword" => ValueKind::Dword(as_u64()? as u32),
        "sdword" => ValueKind::SDword(as_i64()? as i32),
        "qword" => ValueKind::Qword(as_u64()?),
        "sqword" => ValueKind::SQword(as_i64()?),
        "float" => ValueKind::Float(as_f64()? as f32),
        "double" => ValueKind::Double(as_f64()?),
        "bool" => ValueKind::Bool(match payload.as_bool() {
            Some(b) => b,
            None => as_u64()? != 0,
        }),
        "pointer" => ValueKind::Pointer(as_u64()? as Word),
        "string" => ValueKind::Str(
            payload
                .as_str()
                .ok_or_else(|| format!("option \"{name}\" value must be a string"))?
                .as_bytes()
                .to_vec(),
        ),
        other => return Err(format!("option \"{name}\" has unknown type \"{other}\"")),
    })
}

fn hex_bytes(text: &str) -> Result<Vec<u8>, String> {
    let text: String = text.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    if text.len() % 2 != 0 {
        return Err("memory bytes must be an even-length hex string".to_string());
    }
    (0..text.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&text[i..i + 2], 16)
                .map_err(|_| format!("bad hex byte at offset {i}"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::PatchHost;
    use crate::op::Op;

    #[test]
    fn parse_addr_accepts_hex_and_decimal() {
        assert_eq!(parse_addr("0x1000"), Ok(0x1000));
        assert_eq!(parse_addr("4096"), Ok(4096));
        assert_eq!(parse_addr(" 0X10 "), Ok(16));
        assert!(parse_addr("zzz").is_err());
    }

    #[test]
    fn context_loads_all_sections() {
        let text = r#"{
            "options": {"speed": 3, "scale": {"type": "float", "value": 1.5, "op": "*"}},
            "codecaves": {"stage": "0x2000"},
            "functions": {"draw_hook": 4198400},
            "patches": ["base"],
            "regs": {"eax": "0x11223344"},
            "memory": {"base": "0x1000", "bytes": "78 56 34 12"}
        }"#;
        let loaded = load_context(text).unwrap();
        assert_eq!(
            loaded.host.option_value("speed").map(|v| &v.kind),
            Some(&ValueKind::Dword(3))
        );
        let scale = loaded.host.option_value("scale").unwrap();
        assert_eq!(scale.kind, ValueKind::Float(1.5));
        assert_eq!(scale.merge_op, Op::Multiply);
        assert_eq!(loaded.host.codecave_addr("stage"), Some(0x2000));
        assert_eq!(loaded.host.bp_func_addr("draw_hook"), Some(4198400));
        assert!(loaded.host.patch_loaded("base"));
        let bank = loaded.regs.unwrap();
        assert_eq!(bank.word(0), 0x11223344);
        let mut buf = [0u8; 4];
        assert!(loaded.host.read_memory(0x1000, &mut buf));
        assert_eq!(buf, [0x78, 0x56, 0x34, 0x12]);
    }

    #[test]
    fn context_rejects_malformed_documents() {
        assert!(load_context("[]").is_err());
        assert!(load_context(r#"{"options": 3}"#).is_err());
        assert!(load_context(r#"{"regs": {"xyz": 1}}"#).is_err());
        assert!(load_context(r#"{"memory": {"bytes": "abc"}}"#).is_err());
        assert!(load_context("not json").is_err());
    }

    #[test]
    fn option_json_shapes() {
        assert_eq!(
            option_from_json("n", &serde_json::json!(-5)).unwrap().kind,
            ValueKind::SDword(-5)
        );
        assert_eq!(
            option_from_json("s", &serde_json::json!("hi")).unwrap().kind,
            ValueKind::Str(b"hi".to_vec())
        );
        assert_eq!(
            option_from_json("b", &serde_json::json!(true)).unwrap().kind,
            ValueKind::Bool(true)
        );
        let big = option_from_json("q", &serde_json::json!(0x1_0000_0000u64)).unwrap();
        assert_eq!(big.kind, ValueKind::Qword(0x1_0000_0000));
        let typed =
            option_from_json("t", &serde_json::json!({"type": "sbyte", "value": -1})).unwrap();
        assert_eq!(typed.kind, ValueKind::SByte(-1));
        assert!(option_from_json("bad", &serde_json::json!(null)).is_err());
        assert!(
            option_from_json("bad", &serde_json::json!({"type": "nope", "value": 0})).is_err()
        );
    }

    #[test]
    fn cli_parses() {
        let cli = Cli::try_parse_from([
            "patchForge",
            "--format",
            "json",
            "--rel-source",
            "0x1000",
            "1 + 2",
        ])
        .unwrap();
        assert_eq!(cli.format, OutputFormat::Json);
        assert_eq!(cli.rel_source, Some(0x1000));
        assert_eq!(cli.exprs, vec!["1 + 2".to_string()]);
    }
}
