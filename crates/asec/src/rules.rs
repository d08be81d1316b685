// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Access rules and the per-client access decision.
//!
//! A resource group holds an ordered rule list. The decision walks it once,
//! refining the client's access upward:
//!
//! ```text
//! access = NONE
//! for rule in rules (declared order), while access != WRITE:
//!     skip if access >= rule.access            (cannot improve)
//!     skip if client.level > rule.level        (privilege too high)
//!     skip if rule.uags non-empty and user in none of them
//!     skip if rule.hags non-empty and host in none of them
//!     skip if rule.ipags non-empty and address in none of them
//!     apply if no CALC, or CALC inputs all valid and last result TRUE
//! ```
//!
//! Empty group lists match anyone. A later, weaker rule never downgrades an
//! earlier grant, and nothing after a WRITE grant is consulted.

use std::fmt;
use std::net::Ipv4Addr;

use crate::calc::{self, InputMask, Program};
use crate::config::CALC_NUM_INPUTS;
use crate::error::EvalError;
use crate::groups::{GroupRegistry, HostGroupId, IpGroupId, UserGroupId};

/// Access granted to a client. Ordered `NoAccess < Read < Write`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum AccessRight {
    #[default]
    NoAccess,
    Read,
    Write,
}

impl AccessRight {
    pub fn can_read(self) -> bool {
        self >= AccessRight::Read
    }

    pub fn can_write(self) -> bool {
        self == AccessRight::Write
    }
}

impl fmt::Display for AccessRight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AccessRight::NoAccess => "NONE",
            AccessRight::Read => "READ",
            AccessRight::Write => "WRITE",
        })
    }
}

/// Compiled rule condition and its cached outcome.
#[derive(Debug, Clone)]
pub struct Condition {
    program: Program,
    result: bool,
    last_error: Option<EvalError>,
}

impl Condition {
    pub(crate) fn new(program: Program) -> Self {
        Self {
            program,
            result: false,
            last_error: None,
        }
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn inputs_used(&self) -> InputMask {
        self.program.inputs_used()
    }

    /// Result of the last evaluation. False until the first one.
    pub fn last_result(&self) -> bool {
        self.result
    }

    /// Error raised by the last evaluation, if any.
    pub fn last_error(&self) -> Option<EvalError> {
        self.last_error
    }

    /// Re-run the program. An evaluation error degrades the result to false.
    pub(crate) fn evaluate(&mut self, inputs: &[f64; CALC_NUM_INPUTS]) -> Result<bool, EvalError> {
        match calc::evaluate(&self.program, inputs) {
            Ok(value) => {
                self.result = calc::is_true(value);
                self.last_error = None;
                Ok(self.result)
            }
            Err(e) => {
                self.result = false;
                self.last_error = Some(e);
                Err(e)
            }
        }
    }
}

/// One clause of a resource group's rule list.
#[derive(Debug, Clone)]
pub struct Rule {
    access: AccessRight,
    level: u32,
    trap_on_write: bool,
    user_groups: Vec<UserGroupId>,
    host_groups: Vec<HostGroupId>,
    ip_groups: Vec<IpGroupId>,
    condition: Option<Condition>,
}

impl Rule {
    pub(crate) fn new(access: AccessRight, level: u32) -> Self {
        Self {
            access,
            level,
            trap_on_write: false,
            user_groups: Vec::new(),
            host_groups: Vec::new(),
            ip_groups: Vec::new(),
            condition: None,
        }
    }

    /// Access granted when the rule applies.
    pub fn access(&self) -> AccessRight {
        self.access
    }

    /// Highest client security level the rule accepts.
    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn trap_on_write(&self) -> bool {
        self.trap_on_write
    }

    pub fn user_groups(&self) -> &[UserGroupId] {
        &self.user_groups
    }

    pub fn host_groups(&self) -> &[HostGroupId] {
        &self.host_groups
    }

    pub fn ip_groups(&self) -> &[IpGroupId] {
        &self.ip_groups
    }

    pub fn condition(&self) -> Option<&Condition> {
        self.condition.as_ref()
    }

    pub(crate) fn condition_mut(&mut self) -> Option<&mut Condition> {
        self.condition.as_mut()
    }

    pub(crate) fn set_trap_on_write(&mut self, trap: bool) {
        self.trap_on_write = trap;
    }

    pub(crate) fn set_condition(&mut self, program: Program) {
        self.condition = Some(Condition::new(program));
    }

    pub(crate) fn add_user_group(&mut self, id: UserGroupId) {
        if !self.user_groups.contains(&id) {
            self.user_groups.push(id);
        }
    }

    pub(crate) fn add_host_group(&mut self, id: HostGroupId) {
        if !self.host_groups.contains(&id) {
            self.host_groups.push(id);
        }
    }

    pub(crate) fn add_ip_group(&mut self, id: IpGroupId) {
        if !self.ip_groups.contains(&id) {
            self.ip_groups.push(id);
        }
    }

    fn matches_identity(&self, registry: &GroupRegistry, client: &ClientIdentity<'_>) -> bool {
        if !self.user_groups.is_empty()
            && !self
                .user_groups
                .iter()
                .any(|&g| registry.is_user_member(g, client.user))
        {
            return false;
        }
        if !self.host_groups.is_empty()
            && !self
                .host_groups
                .iter()
                .any(|&g| registry.is_host_member(g, client.host))
        {
            return false;
        }
        if !self.ip_groups.is_empty() {
            let Some(ip) = client.ip else {
                return false;
            };
            if !self.ip_groups.iter().any(|&g| registry.is_ip_member(g, ip)) {
                return false;
            }
        }
        true
    }

    fn condition_holds(&self, bad: InputMask) -> bool {
        match &self.condition {
            None => true,
            Some(cond) => !cond.inputs_used().intersects(bad) && cond.last_result(),
        }
    }
}

/// Who is asking.
#[derive(Debug, Clone, Copy)]
pub struct ClientIdentity<'a> {
    pub user: &'a str,
    /// Canonical (lower-cased) host.
    pub host: &'a str,
    pub ip: Option<Ipv4Addr>,
    pub level: u32,
}

/// Outcome of a rule scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Decision {
    pub access: AccessRight,
    pub trap_on_write: bool,
}

/// Scan `rules` for `client`. `bad` holds the group's invalid inputs.
pub fn compute_access(
    rules: &[Rule],
    bad: InputMask,
    registry: &GroupRegistry,
    client: &ClientIdentity<'_>,
) -> Decision {
    let mut decision = Decision::default();

    for rule in rules {
        if decision.access == AccessRight::Write {
            break;
        }
        // Also skips every NONE rule: it could not raise access.
        if decision.access >= rule.access {
            continue;
        }
        if client.level > rule.level {
            continue;
        }
        if !rule.matches_identity(registry, client) {
            continue;
        }
        if rule.condition_holds(bad) {
            decision.access = rule.access;
            decision.trap_on_write = rule.trap_on_write;
        }
    }

    decision
}
