// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error taxonomy for the access-security engine.
//!
//! | Error | Raised by | Effect |
//! |-------|-----------|--------|
//! | [`CompileError`] | `calc::compile` | aborts the rule (and the load it belongs to) |
//! | [`EvalError`] | `calc::evaluate` | the rule condition degrades to false |
//! | [`LoadError`] | builder calls, `end_load` | the new generation is discarded |
//! | [`AccessError`] | member/client lifecycle, input feed | returned to caller |
//! | [`RemoveMemberError`] | `remove_member` | member kept, handle handed back |
//!
//! A denied access is not an error: it is the `NONE` result of an access
//! computation.

use thiserror::Error;

use crate::engine::MemberHandle;

/// Failure to translate an infix CALC expression into a program.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("empty expression")]
    Empty,

    #[error("expression too long ({length} bytes, max {max})")]
    TooLong { length: usize, max: usize },

    #[error("unknown identifier '{name}' at offset {position}")]
    UnknownIdentifier { position: usize, name: String },

    #[error("malformed expression at offset {position}: {detail}")]
    MalformedSequence {
        position: usize,
        detail: &'static str,
    },

    #[error("unbalanced parentheses at offset {position}")]
    UnbalancedParentheses { position: usize },

    #[error("assignment operator at offset {position} is not allowed in a condition")]
    AssignmentNotAllowed { position: usize },

    #[error("{function} takes {expected} argument(s), got {found}")]
    ArgumentCount {
        function: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("bad numeric literal '{text}' at offset {position}")]
    BadLiteral { position: usize, text: String },

    #[error("expression needs {depth} stack entries (max {max})")]
    TooComplex { depth: usize, max: usize },
}

/// Runtime failure of a compiled program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EvalError {
    #[error("division by zero")]
    DivideByZero,

    #[error("invalid operand for {op}")]
    InvalidOperand { op: &'static str },
}

/// Kind of named group, used in duplicate/unknown reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupKind {
    User,
    Host,
    Ip,
    Resource,
}

impl std::fmt::Display for GroupKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            GroupKind::User => "UAG",
            GroupKind::Host => "HAG",
            GroupKind::Ip => "IPAG",
            GroupKind::Resource => "ASG",
        };
        f.write_str(s)
    }
}

/// Failure while building a new generation.
///
/// Any of these discards the generation under construction; the published
/// one stays authoritative.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    #[error("duplicate {kind} '{name}'")]
    DuplicateGroup { kind: GroupKind, name: String },

    #[error("rule references unknown UAG '{0}'")]
    UnknownUserGroup(String),

    #[error("rule references unknown HAG '{0}'")]
    UnknownHostGroup(String),

    #[error("rule references unknown IPAG '{0}'")]
    UnknownIpGroup(String),

    #[error("unknown ASG '{0}'")]
    UnknownResourceGroup(String),

    #[error("bad CALC in ASG '{group}' rule {rule}: {source}")]
    BadCondition {
        group: String,
        rule: usize,
        #[source]
        source: CompileError,
    },

    #[error("input letter '{letter}' is outside A..L")]
    InvalidInput { letter: char },

    #[error("'{text}' is not an IPv4 address")]
    BadAddress { text: String },

    #[error("rule call issued before any rule was declared")]
    NoCurrentRule,

    #[error("handle does not belong to this builder")]
    BadHandle,

    #[error("out of memory while building configuration")]
    OutOfMemory,
}

impl From<std::collections::TryReserveError> for LoadError {
    fn from(_: std::collections::TryReserveError) -> Self {
        LoadError::OutOfMemory
    }
}

/// Runtime failure of a lifecycle or input-feed operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccessError {
    #[error("access security is not active (no configuration published)")]
    NotActive,

    #[error("member handle is not attached to this engine")]
    UnknownMember,

    #[error("client handle is not attached to this engine")]
    UnknownClient,

    #[error("unknown ASG '{0}'")]
    UnknownResourceGroup(String),

    #[error("input letter '{letter}' is outside A..L")]
    InvalidInput { letter: char },
}

/// `remove_member` refused because clients are still attached.
///
/// The member stays bound; its handle is returned so the caller keeps
/// ownership.
#[derive(Debug, Error)]
#[error("member still has {clients} attached client(s)")]
pub struct StillHasClients {
    pub member: MemberHandle,
    pub clients: usize,
}

/// Failure of `remove_member`. Every variant carries the caller's handle.
#[derive(Debug, Error)]
pub enum RemoveMemberError {
    #[error(transparent)]
    StillHasClients(#[from] StillHasClients),

    #[error("member handle is not attached to this engine")]
    UnknownMember(MemberHandle),
}

impl RemoveMemberError {
    /// Take the handle back, whatever the reason.
    pub fn into_handle(self) -> MemberHandle {
        match self {
            RemoveMemberError::StillHasClients(e) => e.member,
            RemoveMemberError::UnknownMember(member) => member,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let e = LoadError::DuplicateGroup {
            kind: GroupKind::User,
            name: "ops".into(),
        };
        assert_eq!(e.to_string(), "duplicate UAG 'ops'");

        let e = CompileError::AssignmentNotAllowed { position: 2 };
        assert!(e.to_string().contains("offset 2"));

        assert_eq!(EvalError::DivideByZero.to_string(), "division by zero");
    }

    #[test]
    fn test_bad_condition_keeps_source() {
        use std::error::Error as _;

        let e = LoadError::BadCondition {
            group: "RF".into(),
            rule: 1,
            source: CompileError::Empty,
        };
        assert!(e.source().is_some());
    }
}
