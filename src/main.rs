// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

// CLI entrypoint for patchForge.

use std::fs;
use std::process;

use clap::Parser;
use serde_json::json;

use patchforge::cli::{load_context, Cli, LoadedContext, OutputFormat};
use patchforge::cpu::CpuFeatures;
use patchforge::eval::{EvalContext, Evaluator};
use patchforge::host::TableHost;
use patchforge::value::{PatchValue, ValueKind};

fn main() {
    let cli = Cli::parse();
    let cpu = CpuFeatures::detect();

    if cli.print_cpu {
        print!("{}", cpu.report());
        return;
    }
    if cli.exprs.is_empty() {
        eprintln!("patchForge: no expressions given");
        process::exit(2);
    }
    let end = match cli.end {
        Some(c) if c.is_ascii() => c as u8,
        Some(c) => {
            eprintln!("patchForge: end sentinel must be an ASCII character, got {c:?}");
            process::exit(2);
        }
        None => 0,
    };

    let loaded = match &cli.context {
        Some(path) => {
            let text = match fs::read_to_string(path) {
                Ok(text) => text,
                Err(err) => {
                    eprintln!("patchForge: cannot read {}: {err}", path.display());
                    process::exit(2);
                }
            };
            match load_context(&text) {
                Ok(loaded) => loaded,
                Err(err) => {
                    eprintln!("patchForge: {err}");
                    process::exit(2);
                }
            }
        }
        None => LoadedContext {
            host: TableHost::new(),
            regs: None,
        },
    };

    let ctx = EvalContext {
        regs: loaded.regs.as_ref(),
        rel_source: cli.rel_source.unwrap_or(0),
        module: cli.module.unwrap_or(0),
    };
    let mut evaluator = Evaluator::new(&loaded.host, &cpu);

    let mut failed = false;
    for expr in &cli.exprs {
        if cli.patch_value {
            match evaluator.get_patch_value(expr, &ctx) {
                Ok((value, _rest)) => match cli.format {
                    OutputFormat::Text => {
                        println!("{expr} = {}", format_patch_value(&value));
                    }
                    OutputFormat::Json => println!(
                        "{}",
                        json!({
                            "expr": expr,
                            "type": value.kind.tag_name(),
                            "value": patch_value_json(&value),
                        })
                    ),
                },
                Err(err) => {
                    failed = true;
                    report_failure(&cli, expr, &err.to_string());
                }
            }
        } else {
            match evaluator.eval_expr(expr, end, &ctx) {
                Ok(out) => match cli.format {
                    OutputFormat::Text => {
                        println!("{expr} = {:#x} ({})", out.value, out.value);
                    }
                    OutputFormat::Json => println!(
                        "{}",
                        json!({
                            "expr": expr,
                            "value": out.value,
                            "hex": format!("{:#x}", out.value),
                            "rest": out.rest,
                        })
                    ),
                },
                Err(err) => {
                    failed = true;
                    report_failure(&cli, expr, &err.to_string());
                }
            }
        }
        if !cli.quiet {
            for line in loaded.host.take_log() {
                eprintln!("{line}");
            }
        } else {
            let _ = loaded.host.take_log();
        }
    }

    if failed {
        process::exit(1);
    }
}

fn report_failure(cli: &Cli, expr: &str, message: &str) {
    match cli.format {
        OutputFormat::Text => eprintln!("patchForge: {expr}: {message}"),
        OutputFormat::Json => println!("{}", json!({ "expr": expr, "error": message })),
    }
}

fn format_patch_value(value: &PatchValue) -> String {
    match &value.kind {
        ValueKind::Code(code) => format!("code {}", hex_string(&code.to_vec())),
        ValueKind::Str(bytes) => format!("string {:?}", String::from_utf8_lossy(bytes)),
        other => format!("{} {}", other.tag_name(), scalar_string(other)),
    }
}

fn patch_value_json(value: &PatchValue) -> serde_json::Value {
    match &value.kind {
        ValueKind::Byte(v) => json!(v),
        ValueKind::SByte(v) => json!(v),
        ValueKind::Word(v) => json!(v),
        ValueKind::SWord(v) => json!(v),
        ValueKind::Dword(v) => json!(v),
        ValueKind::SDword(v) => json!(v),
        ValueKind::Qword(v) => json!(v),
        ValueKind::SQword(v) => json!(v),
        ValueKind::Float(v) => json!(v),
        ValueKind::Double(v) | ValueKind::LongDouble(v) => json!(v),
        ValueKind::Bool(v) => json!(v),
        ValueKind::Pointer(v) => json!(format!("{v:#x}")),
        ValueKind::Code(code) => json!(hex_string(&code.to_vec())),
        ValueKind::Str(bytes) => json!(String::from_utf8_lossy(bytes)),
        ValueKind::Str16(units) => json!(String::from_utf16_lossy(units)),
        ValueKind::Str32(units) => json!(units),
        ValueKind::Unknown | ValueKind::None | ValueKind::Default => json!(null),
    }
}

fn scalar_string(kind: &ValueKind) -> String {
    match kind {
        ValueKind::Byte(v) => format!("{v:#x}"),
        ValueKind::SByte(v) => format!("{v}"),
        ValueKind::Word(v) => format!("{v:#x}"),
        ValueKind::SWord(v) => format!("{v}"),
        ValueKind::Dword(v) => format!("{v:#x}"),
        ValueKind::SDword(v) => format!("{v}"),
        ValueKind::Qword(v) => format!("{v:#x}"),
        ValueKind::SQword(v) => format!("{v}"),
        ValueKind::Float(v) => format!("{v}"),
        ValueKind::Double(v) | ValueKind::LongDouble(v) => format!("{v}"),
        ValueKind::Bool(v) => format!("{v}"),
        ValueKind::Pointer(v) => format!("{v:#x}"),
        _ => "-".to_string(),
    }
}

fn hex_string(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02X}")).collect()
}
