// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Resource groups (ASGs).
//!
//! An ASG owns an ordered rule list, twelve input slots feeding the rules'
//! CALC conditions, and the set of members currently bound to it. Inputs
//! carry two bits each: *changed* (a value arrived since the last rule
//! evaluation) and *bad* (no valid value, e.g. the source is disconnected).
//! A declared input starts bad until its first value arrives.

use std::collections::BTreeSet;

use crate::calc::{input_letter, InputMask};
use crate::catalog::Named;
use crate::config::CALC_NUM_INPUTS;
use crate::engine::MemberKey;
use crate::groups::GroupRegistry;
use crate::rules::{compute_access, ClientIdentity, Decision, Rule};

/// Name of the resource group that always exists.
pub const DEFAULT_GROUP: &str = "DEFAULT";

/// Handle to a resource group within one generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AsgId(pub(crate) usize);

#[derive(Debug, Clone)]
pub struct ResourceGroup {
    name: String,
    sources: [Option<String>; CALC_NUM_INPUTS],
    values: [f64; CALC_NUM_INPUTS],
    changed: InputMask,
    bad: InputMask,
    rules: Vec<Rule>,
    members: BTreeSet<MemberKey>,
}

impl Named for ResourceGroup {
    fn name(&self) -> &str {
        &self.name
    }
}

impl ResourceGroup {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            sources: Default::default(),
            values: [0.0; CALC_NUM_INPUTS],
            changed: InputMask::EMPTY,
            bad: InputMask::EMPTY,
            rules: Vec::new(),
            members: BTreeSet::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub(crate) fn rules_mut(&mut self) -> &mut Vec<Rule> {
        &mut self.rules
    }

    /// True when the group has neither inputs nor rules.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty() && self.sources.iter().all(Option::is_none)
    }

    /// External source bound to input `index`, if declared.
    pub fn input_source(&self, index: usize) -> Option<&str> {
        self.sources.get(index).and_then(|s| s.as_deref())
    }

    /// `(index, source)` for every declared input.
    pub fn declared_inputs(&self) -> impl Iterator<Item = (usize, &str)> {
        self.sources
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_deref().map(|s| (i, s)))
    }

    pub fn input_value(&self, index: usize) -> Option<f64> {
        self.values.get(index).copied()
    }

    pub fn inputs(&self) -> &[f64; CALC_NUM_INPUTS] {
        &self.values
    }

    pub fn changed_mask(&self) -> InputMask {
        self.changed
    }

    pub fn bad_mask(&self) -> InputMask {
        self.bad
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub(crate) fn members(&self) -> impl Iterator<Item = MemberKey> + '_ {
        self.members.iter().copied()
    }

    pub(crate) fn attach(&mut self, member: MemberKey) {
        self.members.insert(member);
    }

    pub(crate) fn detach(&mut self, member: MemberKey) -> bool {
        self.members.remove(&member)
    }

    /// Declare input `index`. It stays bad until a value is set.
    pub(crate) fn bind_input(&mut self, index: usize, source: &str) {
        if let Some(slot) = self.sources.get_mut(index) {
            *slot = Some(source.to_string());
            self.bad.insert(index);
        }
    }

    pub(crate) fn set_input(&mut self, index: usize, value: f64) {
        if let Some(slot) = self.values.get_mut(index) {
            *slot = value;
            self.changed.insert(index);
            self.bad.remove(index);
        }
    }

    /// Mark input `index` invalid. Rules reading it stop applying.
    pub(crate) fn invalidate_input(&mut self, index: usize) {
        self.bad.insert(index);
    }

    /// Re-evaluate every condition that reads a changed input, then clear
    /// the changed set. Returns the number of conditions evaluated.
    pub fn recompute(&mut self) -> usize {
        let changed = self.changed;
        self.changed.clear();
        if changed.is_empty() {
            return 0;
        }
        log::debug!("ASG {}: input(s) {} changed", self.name, Self::letters(changed));
        self.evaluate_conditions(|used| used.intersects(changed))
    }

    /// Evaluate every condition regardless of the changed set.
    pub(crate) fn prime(&mut self) -> usize {
        self.changed.clear();
        self.evaluate_conditions(|_| true)
    }

    /// Conditions reading a bad input are skipped: the rule cannot apply,
    /// and setting that input marks it changed, which evaluates them again.
    fn evaluate_conditions(&mut self, select: impl Fn(InputMask) -> bool) -> usize {
        let mut evaluated = 0;
        let name = &self.name;
        let values = &self.values;
        let bad = self.bad;
        for (index, rule) in self.rules.iter_mut().enumerate() {
            let Some(cond) = rule.condition_mut() else {
                continue;
            };
            let used = cond.inputs_used();
            if used.intersects(bad) || !select(used) {
                continue;
            }
            evaluated += 1;
            if let Err(e) = cond.evaluate(values) {
                log::error!(
                    "ASG {} rule {}: CALC(\"{}\") failed: {}",
                    name,
                    index,
                    cond.program().source(),
                    e
                );
            }
        }
        evaluated
    }

    /// Access decision for `client` against the current rule state.
    pub fn decide(&self, registry: &GroupRegistry, client: &ClientIdentity<'_>) -> Decision {
        compute_access(&self.rules, self.bad, registry, client)
    }

    /// Human-readable input letter list, e.g. "A,C".
    pub(crate) fn letters(mask: InputMask) -> String {
        mask.iter()
            .filter_map(input_letter)
            .map(String::from)
            .collect::<Vec<_>>()
            .join(",")
    }
}
