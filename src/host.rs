// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Host collaborator interfaces.
//!
//! The evaluator never owns the patch-option store, the code-cave registry or
//! the target process memory; it consumes them through `PatchHost`. Hosts
//! must not block: `log_line` is fire-and-forget and lookups are plain map
//! reads in every known implementation.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use crate::value::{PatchValue, Word};

pub trait PatchHost {
    /// Full typed value of a patch option, or `None` when the option does
    /// not exist.
    fn option_value(&self, name: &str) -> Option<&PatchValue>;

    /// Address of a staged code cave, by bare cave name.
    fn codecave_addr(&self, name: &str) -> Option<Word>;

    /// Address of a named breakpoint function.
    fn bp_func_addr(&self, name: &str) -> Option<Word>;

    /// Whether the named patch is loaded.
    fn patch_loaded(&self, name: &str) -> bool;

    /// Reads target memory at `addr` into `buf`. Returns false when the
    /// range is not readable; the caller treats that as a zero read.
    fn read_memory(&self, addr: Word, buf: &mut [u8]) -> bool;

    /// Fire-and-forget diagnostic line.
    fn log_line(&self, line: &str);
}

/// Host with no patch stack behind it: every lookup misses, logs vanish.
pub struct NullHost;

impl PatchHost for NullHost {
    fn option_value(&self, _name: &str) -> Option<&PatchValue> {
        None
    }

    fn codecave_addr(&self, _name: &str) -> Option<Word> {
        None
    }

    fn bp_func_addr(&self, _name: &str) -> Option<Word> {
        None
    }

    fn patch_loaded(&self, _name: &str) -> bool {
        false
    }

    fn read_memory(&self, _addr: Word, _buf: &mut [u8]) -> bool {
        false
    }

    fn log_line(&self, _line: &str) {}
}

/// Map-backed host used by the CLI and by tests.
///
/// The log is captured rather than printed so callers can decide what to do
/// with it (the CLI drains it to stderr, tests assert on it).
#[derive(Default)]
pub struct TableHost {
    options: HashMap<String, PatchValue>,
    codecaves: HashMap<String, Word>,
    bp_funcs: HashMap<String, Word>,
    patches: HashSet<String>,
    memory_base: Word,
    memory: Vec<u8>,
    log: Mutex<Vec<String>>,
}

impl TableHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_option(&mut self, name: &str, value: PatchValue) {
        self.options.insert(name.to_string(), value);
    }

    pub fn add_codecave(&mut self, name: &str, addr: Word) {
        self.codecaves.insert(name.to_string(), addr);
    }

    pub fn add_bp_func(&mut self, name: &str, addr: Word) {
        self.bp_funcs.insert(name.to_string(), addr);
    }

    pub fn add_patch(&mut self, name: &str) {
        self.patches.insert(name.to_string());
    }

    /// Installs a readable memory image at `base`.
    pub fn set_memory(&mut self, base: Word, bytes: Vec<u8>) {
        self.memory_base = base;
        self.memory = bytes;
    }

    /// Drains the captured log.
    pub fn take_log(&self) -> Vec<String> {
        std::mem::take(&mut *self.log.lock().expect("log mutex poisoned"))
    }
}

impl PatchHost for TableHost {
    fn option_value(&self, name: &str) -> Option<&PatchValue> {
        self.options.get(name)
    }

    fn codecave_addr(&self, name: &str) -> Option<Word> {
        self.codecaves.get(name).copied()
    }

    fn bp_func_addr(&self, name: &str) -> Option<Word> {
        self.bp_funcs.get(name).copied()
    }

    fn patch_loaded(&self, name: &str) -> bool {
        self.patches.contains(name)
    }

    fn read_memory(&self, addr: Word, buf: &mut [u8]) -> bool {
        let Some(offset) = addr.checked_sub(self.memory_base) else {
            return false;
        };
        let Some(end) = offset.checked_add(buf.len()) else {
            return false;
        };
        if end > self.memory.len() {
            return false;
        }
        buf.copy_from_slice(&self.memory[offset..end]);
        true
    }

    fn log_line(&self, line: &str) {
        self.log.lock().expect("log mutex poisoned").push(line.to_string());
    }
}
