// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Numbered expression diagnostics.
//!
//! Errors abort an evaluation; warnings continue with a documented fallback
//! value. Every diagnostic is one log line pushed through the host sink.
//! The warn-once flags and the codecave suppression flag are per-evaluator
//! state so that concurrent evaluators do not share diagnostics behavior.

use std::error::Error;
use std::fmt;

use crate::host::PatchHost;

/// Failure of an expression or patch-value parse.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExprError {
    /// An opened `(` or `[` has no matching closer, or a bracket opened at
    /// operator position.
    UnmatchedGroup,
    /// A patch value's `<`, `[` or `{` has no matching closer.
    UnmatchedPatchValue,
    /// A byte that starts no operand form.
    BadCharacter,
    /// A literal failed to parse or exceeded the machine word.
    InvalidValue,
    /// A patch value carried a tag the expression layer cannot collapse.
    InvalidPatchValueType,
    /// A nested parse failed; the cause was already logged.
    Expression,
}

impl fmt::Display for ExprError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            ExprError::UnmatchedGroup => "unmatched grouping brackets",
            ExprError::UnmatchedPatchValue => "unmatched patch value brackets",
            ExprError::BadCharacter => "unknown character",
            ExprError::InvalidValue => "invalid value",
            ExprError::InvalidPatchValueType => "invalid patch value type",
            ExprError::Expression => "error parsing expression",
        };
        f.write_str(msg)
    }
}

impl Error for ExprError {}

/// Per-evaluator diagnostic state.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct DiagState {
    warned_inc_dec: bool,
    warned_assignment: bool,
    warned_post_inc_dec: bool,
    pub(crate) suppress_codecave: bool,
}

impl DiagState {
    pub(crate) fn warn_inc_dec(&mut self, host: &dyn PatchHost) {
        if !self.warned_inc_dec {
            self.warned_inc_dec = true;
            host.log_line(
                "EXPRESSION WARNING 0: Prefix increment and decrement only adjust the \
                 produced value; an option cannot be modified from an expression",
            );
        }
    }

    pub(crate) fn warn_assignment(&mut self, host: &dyn PatchHost) {
        if !self.warned_assignment {
            self.warned_assignment = true;
            host.log_line(
                "EXPRESSION WARNING 1: Assignment operators apply their base operation \
                 only; an option cannot be modified from an expression",
            );
        }
    }

    pub(crate) fn warn_codecave_not_found(&self, host: &dyn PatchHost, name: &str) {
        if !self.suppress_codecave {
            host.log_line(&format!(
                "EXPRESSION WARNING 3: Codecave \"{name}\" not found, returning NULL"
            ));
        }
    }

    pub(crate) fn warn_post_inc_dec(&mut self, host: &dyn PatchHost) {
        if !self.warned_post_inc_dec {
            self.warned_post_inc_dec = true;
            host.log_line(
                "EXPRESSION WARNING 4: Postfix increment and decrement do nothing; an \
                 option cannot be modified from an expression",
            );
        }
    }

    pub(crate) fn warn_unknown_cpu_feature(&self, host: &dyn PatchHost, name: &str) {
        host.log_line(&format!(
            "EXPRESSION WARNING 5: Unknown CPU feature \"{name}\", assuming it is present"
        ));
    }

    pub(crate) fn warn_null_deref(&self, host: &dyn PatchHost) {
        host.log_line("EXPRESSION WARNING 6: Dereference of NULL value, returning NULL");
    }
}

pub(crate) fn error_expression(host: &dyn PatchHost) -> ExprError {
    host.log_line("EXPRESSION ERROR: Error parsing expression");
    ExprError::Expression
}

pub(crate) fn error_grouping_brackets(host: &dyn PatchHost) -> ExprError {
    host.log_line("EXPRESSION ERROR 0: Unmatched grouping brackets");
    ExprError::UnmatchedGroup
}

pub(crate) fn error_patch_value_brackets(host: &dyn PatchHost) -> ExprError {
    host.log_line("EXPRESSION ERROR 1: Unmatched patch value brackets");
    ExprError::UnmatchedPatchValue
}

pub(crate) fn error_bad_character(host: &dyn PatchHost) -> ExprError {
    host.log_line("EXPRESSION ERROR 2: Unknown character");
    ExprError::BadCharacter
}

pub(crate) fn error_option_not_found(host: &dyn PatchHost, name: &str) {
    // Reported but not fatal; the caller continues with 0.
    host.log_line(&format!("EXPRESSION ERROR 3: Option \"{name}\" not found"));
}

pub(crate) fn error_invalid_value(host: &dyn PatchHost, rest: &str) -> ExprError {
    host.log_line(&format!("EXPRESSION ERROR 4: Invalid value \"{rest}\""));
    ExprError::InvalidValue
}

pub(crate) fn error_invalid_patch_value_type(host: &dyn PatchHost) -> ExprError {
    host.log_line("EXPRESSION ERROR 5: Invalid patch value type");
    ExprError::InvalidPatchValueType
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::TableHost;

    #[test]
    fn warn_once_flags_fire_once() {
        let host = TableHost::new();
        let mut diag = DiagState::default();
        diag.warn_inc_dec(&host);
        diag.warn_inc_dec(&host);
        diag.warn_assignment(&host);
        diag.warn_assignment(&host);
        assert_eq!(host.take_log().len(), 2);
    }

    #[test]
    fn codecave_warning_respects_suppression() {
        let host = TableHost::new();
        let mut diag = DiagState::default();
        diag.warn_codecave_not_found(&host, "stage");
        diag.suppress_codecave = true;
        diag.warn_codecave_not_found(&host, "stage");
        let log = host.take_log();
        assert_eq!(log.len(), 1);
        assert!(log[0].contains("stage"));
    }

    #[test]
    fn errors_display() {
        assert_eq!(ExprError::BadCharacter.to_string(), "unknown character");
        assert_eq!(
            ExprError::UnmatchedPatchValue.to_string(),
            "unmatched patch value brackets"
        );
    }
}
