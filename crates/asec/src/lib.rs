// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # asec - Access Security engine
//!
//! Decides, for every (resource, client) pair, whether the client may read
//! or write the resource. Resources are grouped into access security groups
//! (ASGs); each group carries an ordered rule list that matches clients by
//! user group, host group, IP group and privilege level, optionally gated on
//! a CALC expression over live input values.
//!
//! ## Quick Start
//!
//! ```rust
//! use asec::{AccessEngine, AccessRight, EngineConfig};
//!
//! let engine = AccessEngine::new(EngineConfig::default());
//! engine.load(|b| {
//!     let ops = b.add_user_group("operators")?;
//!     b.add_user(ops, "alice")?;
//!
//!     let rf = b.add_resource_group("RF")?;
//!     b.add_input(rf, 'A', "rf:interlock_ok")?;
//!     let rule = b.add_rule(rf, AccessRight::Write, 1)?;
//!     b.rule_add_user_group(rule, "operators")?;
//!     b.rule_set_condition(rule, "A=1")?;
//!     Ok(())
//! })?;
//!
//! let cavity = engine.add_member("RF")?;
//! let alice = engine.add_client(&cavity, "alice", "opi1", 1)?;
//! assert!(!engine.can_write(&alice));
//!
//! engine.set_input("RF", 'A', 1.0)?;
//! assert!(engine.can_write(&alice));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------------+
//! |                           AccessEngine                              |
//! |   members / clients | observers | input feed | trap listeners       |
//! +---------------------------------------------------------------------+
//! |                      Generation (published)                         |
//! |   GroupRegistry (UAG/HAG/IPAG) | ResourceGroups (inputs, rules)     |
//! +---------------------------------------------------------------------+
//! |                              CALC                                   |
//! |   lexer -> shunting-yard compiler -> postfix Program -> stack VM    |
//! +---------------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`AccessEngine`] | Process-wide engine, owns the live generation and all members |
//! | [`GenerationBuilder`] | Builds a configuration off to the side, then published atomically |
//! | [`AccessRight`] | `NONE < READ < WRITE` |
//! | [`calc::Program`] | Compiled rule condition |
//! | [`EngineConfig`] | Host resolution mode and audit log bound |
//!
//! ## Modules Overview
//!
//! - [`calc`] - CALC expression compiler and evaluator
//! - [`engine`] - Engine, members, clients, observers
//! - [`generation`] - Configuration snapshots and the builder
//! - [`rules`] - Rule scan (access computation)
//! - [`groups`] - User, host and IP groups

/// Reload audit trail.
pub mod audit;
/// CALC expression language (compiler and stack machine).
pub mod calc;
mod catalog;
/// Engine configuration and limits.
pub mod config;
mod dump;
/// Access engine, members and clients.
pub mod engine;
/// Error types.
pub mod error;
/// Configuration generations and the builder that produces them.
pub mod generation;
/// User, host and IP groups.
pub mod groups;
/// Access rights, rules and the rule scan.
pub mod rules;
/// Write-trap notification point.
pub mod trap;

mod asg;

pub use asg::{AsgId, ResourceGroup, DEFAULT_GROUP};
pub use audit::{ReloadAuditEntry, ReloadEventKind};
pub use config::{ConfigError, EngineConfig};
pub use engine::{
    AccessChange, AccessEngine, AccessObserver, ClientHandle, ClientKey, InputBinding,
    MemberHandle, MemberKey, Payload, PublishReport,
};
pub use error::{
    AccessError, CompileError, EvalError, GroupKind, LoadError, RemoveMemberError, StillHasClients,
};
pub use generation::{BuilderCall, Generation, GenerationBuilder, RuleRef};
pub use groups::{HostCanonicalizer, HostResolver, SystemResolver};
pub use rules::{AccessRight, ClientIdentity, Decision};
pub use trap::{TrapListenerId, TrapWriteGuard, TrapWriteListener, TrapWriteMessage};
