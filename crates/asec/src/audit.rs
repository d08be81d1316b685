// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reload audit trail.
//!
//! Every publish or rejected load is recorded, together with a per-group
//! diff against the generation it replaced. The log is bounded; the oldest
//! entries are dropped first.

use std::collections::VecDeque;
use std::time::SystemTime;

use crate::asg::ResourceGroup;
use crate::generation::Generation;
use crate::groups::GroupRegistry;
use crate::rules::Rule;

/// Audit entry for one configuration change.
#[derive(Debug, Clone)]
pub struct ReloadAuditEntry {
    /// When the change occurred
    pub timestamp: SystemTime,
    /// Type of change
    pub kind: ReloadEventKind,
    /// Group affected, or empty for whole-configuration events
    pub subject: String,
    /// Human-readable details
    pub details: String,
}

/// Types of configuration changes tracked in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadEventKind {
    /// A new generation was published
    Published,
    /// A load failed; the previous generation stays live
    Rejected,
    /// A group exists only in the new generation
    GroupAdded,
    /// A group disappeared in the new generation
    GroupRemoved,
    /// A group exists in both generations with different content
    GroupChanged,
}

impl ReloadAuditEntry {
    pub(crate) fn new(kind: ReloadEventKind, subject: &str, details: String) -> Self {
        Self {
            timestamp: SystemTime::now(),
            kind,
            subject: subject.to_string(),
            details,
        }
    }
}

#[derive(Debug)]
pub(crate) struct AuditLog {
    entries: VecDeque<ReloadAuditEntry>,
    capacity: usize,
}

impl AuditLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, entry: ReloadAuditEntry) {
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn extend(&mut self, entries: impl IntoIterator<Item = ReloadAuditEntry>) {
        for entry in entries {
            self.push(entry);
        }
    }

    pub fn snapshot(&self) -> Vec<ReloadAuditEntry> {
        self.entries.iter().cloned().collect()
    }
}

// ---------------------------------------------------------------------------
// Generation diff
// ---------------------------------------------------------------------------

fn rule_signature(rule: &Rule, registry: &GroupRegistry) -> String {
    let uags: Vec<&str> = rule
        .user_groups()
        .iter()
        .filter_map(|&id| registry.user_group(id).map(|g| g.name()))
        .collect();
    let hags: Vec<&str> = rule
        .host_groups()
        .iter()
        .filter_map(|&id| registry.host_group(id).map(|g| g.name()))
        .collect();
    let ipags: Vec<&str> = rule
        .ip_groups()
        .iter()
        .filter_map(|&id| registry.ip_group(id).map(|g| g.name()))
        .collect();
    format!(
        "{}/{}/{}/{:?}/{:?}/{:?}/{:?}",
        rule.level(),
        rule.access(),
        rule.trap_on_write(),
        uags,
        hags,
        ipags,
        rule.condition().map(|c| c.program().source()),
    )
}

fn group_signature(group: &ResourceGroup, registry: &GroupRegistry) -> Vec<String> {
    let inputs = group
        .declared_inputs()
        .map(|(i, source)| format!("INP{}({})", i, source));
    let rules = group.rules().iter().map(|r| rule_signature(r, registry));
    inputs.chain(rules).collect()
}

fn diff_named<'a, T: PartialEq>(
    label: &str,
    old: impl Iterator<Item = (&'a str, T)>,
    new: impl Iterator<Item = (&'a str, T)>,
    out: &mut Vec<ReloadAuditEntry>,
) {
    let old: Vec<(&str, T)> = old.collect();
    let new: Vec<(&str, T)> = new.collect();

    for (name, _) in &old {
        if !new.iter().any(|(n, _)| n == name) {
            out.push(ReloadAuditEntry::new(
                ReloadEventKind::GroupRemoved,
                name,
                format!("{} '{}' removed", label, name),
            ));
        }
    }
    for (name, content) in &new {
        match old.iter().find(|(n, _)| n == name) {
            None => out.push(ReloadAuditEntry::new(
                ReloadEventKind::GroupAdded,
                name,
                format!("{} '{}' added", label, name),
            )),
            Some((_, previous)) if previous != content => out.push(ReloadAuditEntry::new(
                ReloadEventKind::GroupChanged,
                name,
                format!("{} '{}' changed", label, name),
            )),
            Some(_) => {}
        }
    }
}

/// Added, removed and changed groups between two generations.
pub(crate) fn diff_generations(old: &Generation, new: &Generation) -> Vec<ReloadAuditEntry> {
    let mut out = Vec::new();
    let (old_reg, new_reg) = (old.registry(), new.registry());

    diff_named(
        "UAG",
        old_reg.user_groups().map(|g| (g.name(), g.users().to_vec())),
        new_reg.user_groups().map(|g| (g.name(), g.users().to_vec())),
        &mut out,
    );
    diff_named(
        "HAG",
        old_reg.host_groups().map(|g| (g.name(), g.hosts().to_vec())),
        new_reg.host_groups().map(|g| (g.name(), g.hosts().to_vec())),
        &mut out,
    );
    diff_named(
        "IPAG",
        old_reg.ip_groups().map(|g| (g.name(), g.addrs().to_vec())),
        new_reg.ip_groups().map(|g| (g.name(), g.addrs().to_vec())),
        &mut out,
    );
    diff_named(
        "ASG",
        old.resource_groups()
            .map(|g| (g.name(), group_signature(g, old_reg))),
        new.resource_groups()
            .map(|g| (g.name(), group_signature(g, new_reg))),
        &mut out,
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::GenerationBuilder;
    use crate::groups::HostCanonicalizer;
    use crate::rules::AccessRight;

    fn entry(kind: ReloadEventKind) -> ReloadAuditEntry {
        ReloadAuditEntry::new(kind, "", String::new())
    }

    #[test]
    fn test_log_is_bounded() {
        let mut log = AuditLog::new(2);
        log.push(entry(ReloadEventKind::Published));
        log.push(entry(ReloadEventKind::Rejected));
        log.push(entry(ReloadEventKind::GroupAdded));
        let kinds: Vec<_> = log.snapshot().iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![ReloadEventKind::Rejected, ReloadEventKind::GroupAdded]);
    }

    #[test]
    fn test_diff() {
        let mut b = GenerationBuilder::new(HostCanonicalizer::default());
        let ops = b.add_user_group("ops").unwrap();
        b.add_user(ops, "bob").unwrap();
        let rf = b.add_resource_group("RF").unwrap();
        b.add_rule(rf, AccessRight::Read, 1).unwrap();
        b.add_resource_group("VAC").unwrap();
        let old = b.end_load().unwrap();

        let mut b = GenerationBuilder::new(HostCanonicalizer::default());
        let ops = b.add_user_group("ops").unwrap();
        b.add_user(ops, "bob").unwrap();
        let rf = b.add_resource_group("RF").unwrap();
        b.add_rule(rf, AccessRight::Write, 1).unwrap();
        b.add_resource_group("BPM").unwrap();
        let new = b.end_load().unwrap();

        let entries = diff_generations(&old, &new);
        let summary: Vec<_> = entries.iter().map(|e| (e.kind, e.subject.as_str())).collect();
        assert_eq!(
            summary,
            vec![
                (ReloadEventKind::GroupRemoved, "VAC"),
                (ReloadEventKind::GroupAdded, "BPM"),
                (ReloadEventKind::GroupChanged, "RF"),
            ]
        );
    }
}
