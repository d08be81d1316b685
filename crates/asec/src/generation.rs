// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Configuration generations and the builder that produces them.
//!
//! A configuration loader (file parser, macro expander, test fixture...)
//! drives a [`GenerationBuilder`] with one call per declaration, either
//! directly or as a replayable stream of [`BuilderCall`]s. The builder owns
//! everything it creates; nothing is visible to the running engine until
//! [`GenerationBuilder::end_load`] seals it and the engine publishes it.
//!
//! ```text
//! begin_load()
//!   add_user_group("admins")  add_user(admins, "alice")
//!   add_host_group("consoles") add_host(consoles, "opi1")
//!   add_resource_group("RF")   add_input(RF, 'A', "rf:ready")
//!   add_rule(RF, WRITE, 1)     rule_add_user_group(rule, "admins")
//!                              rule_set_condition(rule, "A=1")
//! end_load()  -> Generation
//! ```

use std::time::SystemTime;

use crate::asg::{AsgId, ResourceGroup, DEFAULT_GROUP};
use crate::calc::{self, input_index};
use crate::catalog::Catalog;
use crate::error::{GroupKind, LoadError};
use crate::groups::{GroupRegistry, HostCanonicalizer, HostGroupId, IpGroupId, UserGroupId};
use crate::rules::{AccessRight, Rule};

/// One complete, versioned configuration snapshot.
#[derive(Debug, Clone)]
pub struct Generation {
    id: u64,
    registry: GroupRegistry,
    groups: Catalog<ResourceGroup>,
    default_group: AsgId,
    loaded_at: SystemTime,
}

impl Generation {
    /// Version number, assigned when the generation is published.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn set_id(&mut self, id: u64) {
        self.id = id;
    }

    pub fn loaded_at(&self) -> SystemTime {
        self.loaded_at
    }

    pub fn registry(&self) -> &GroupRegistry {
        &self.registry
    }

    /// Resource groups in name order.
    pub fn resource_groups(&self) -> impl Iterator<Item = &ResourceGroup> {
        self.groups.values()
    }

    pub(crate) fn resource_group_ids(&self) -> impl Iterator<Item = AsgId> + '_ {
        self.groups.iter().map(|(id, _)| AsgId(id))
    }

    pub fn resource_group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn find_group(&self, name: &str) -> Option<AsgId> {
        self.groups.find(name).map(AsgId)
    }

    pub fn default_group(&self) -> AsgId {
        self.default_group
    }

    /// The group named `name`, or DEFAULT when there is none.
    pub fn resolve(&self, name: &str) -> AsgId {
        self.find_group(name).unwrap_or(self.default_group)
    }

    pub fn group(&self, id: AsgId) -> Option<&ResourceGroup> {
        self.groups.get(id.0)
    }

    pub fn group_by_name(&self, name: &str) -> Option<&ResourceGroup> {
        self.find_group(name).and_then(|id| self.group(id))
    }

    pub(crate) fn group_mut(&mut self, id: AsgId) -> Option<&mut ResourceGroup> {
        self.groups.get_mut(id.0)
    }

    /// Split borrow: registry plus one mutable group.
    pub(crate) fn registry_and_group_mut(
        &mut self,
        id: AsgId,
    ) -> Option<(&GroupRegistry, &mut ResourceGroup)> {
        let group = self.groups.get_mut(id.0)?;
        Some((&self.registry, group))
    }

    /// Evaluate every rule condition once against the initial inputs.
    pub(crate) fn prime_conditions(&mut self) {
        for group in self.groups.values_mut() {
            group.prime();
        }
    }
}

/// A rule inside the generation being built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleRef {
    group: AsgId,
    index: usize,
}

/// Serializable form of the builder calls.
///
/// Groups are referenced by name. Rule calls target the most recently added
/// rule, the way a configuration file nests them inside `RULE(...) { }`.
#[derive(Debug, Clone, PartialEq)]
pub enum BuilderCall {
    AddUserGroup(String),
    AddUser { group: String, user: String },
    AddHostGroup(String),
    AddHost { group: String, host: String },
    AddIpGroup(String),
    AddIp { group: String, addr: String },
    AddResourceGroup(String),
    AddInput {
        group: String,
        letter: char,
        source: String,
    },
    AddRule {
        group: String,
        access: AccessRight,
        level: u32,
    },
    SetRuleTrap(bool),
    RuleAddUserGroup(String),
    RuleAddHostGroup(String),
    RuleAddIpGroup(String),
    RuleSetCondition(String),
}

/// Builds a [`Generation`] off to the side of the published one.
#[derive(Debug)]
pub struct GenerationBuilder {
    registry: GroupRegistry,
    groups: Catalog<ResourceGroup>,
    default_group: AsgId,
    current_rule: Option<RuleRef>,
}

impl GenerationBuilder {
    /// New builder holding only the implicit DEFAULT group.
    pub fn new(canonicalizer: HostCanonicalizer) -> Self {
        let mut groups = Catalog::default();
        // An empty catalog cannot report a duplicate.
        let default_group = match groups.insert(ResourceGroup::new(DEFAULT_GROUP)) {
            Ok(Some(id)) => AsgId(id),
            _ => AsgId(0),
        };
        Self {
            registry: GroupRegistry::new(canonicalizer),
            groups,
            default_group,
            current_rule: None,
        }
    }

    pub fn registry(&self) -> &GroupRegistry {
        &self.registry
    }

    pub fn add_user_group(&mut self, name: &str) -> Result<UserGroupId, LoadError> {
        self.registry.add_user_group(name)
    }

    pub fn add_user(&mut self, group: UserGroupId, user: &str) -> Result<(), LoadError> {
        self.registry.add_user(group, user)
    }

    pub fn add_host_group(&mut self, name: &str) -> Result<HostGroupId, LoadError> {
        self.registry.add_host_group(name)
    }

    pub fn add_host(&mut self, group: HostGroupId, host: &str) -> Result<(), LoadError> {
        self.registry.add_host(group, host)
    }

    pub fn add_ip_group(&mut self, name: &str) -> Result<IpGroupId, LoadError> {
        self.registry.add_ip_group(name)
    }

    pub fn add_ip(&mut self, group: IpGroupId, addr: &str) -> Result<(), LoadError> {
        self.registry.add_ip(group, addr)
    }

    /// Declare a resource group. Re-declaring DEFAULT while it is still
    /// empty returns the existing group.
    pub fn add_resource_group(&mut self, name: &str) -> Result<AsgId, LoadError> {
        if let Some(id) = self.groups.find(name) {
            let reusable = name == DEFAULT_GROUP
                && self.groups.get(id).is_some_and(ResourceGroup::is_empty);
            if reusable {
                return Ok(AsgId(id));
            }
            return Err(LoadError::DuplicateGroup {
                kind: GroupKind::Resource,
                name: name.to_string(),
            });
        }
        match self.groups.insert(ResourceGroup::new(name))? {
            Some(id) => Ok(AsgId(id)),
            None => Err(LoadError::DuplicateGroup {
                kind: GroupKind::Resource,
                name: name.to_string(),
            }),
        }
    }

    pub fn find_resource_group(&self, name: &str) -> Option<AsgId> {
        self.groups.find(name).map(AsgId)
    }

    /// Bind input `letter` (A..L) of `group` to an external source.
    pub fn add_input(&mut self, group: AsgId, letter: char, source: &str) -> Result<(), LoadError> {
        let index = input_index(letter).ok_or(LoadError::InvalidInput { letter })?;
        let group = self.groups.get_mut(group.0).ok_or(LoadError::BadHandle)?;
        group.bind_input(index, source);
        Ok(())
    }

    /// Append a rule to `group` and make it the current rule.
    pub fn add_rule(&mut self, group: AsgId, access: AccessRight, level: u32) -> Result<RuleRef, LoadError> {
        let asg = self.groups.get_mut(group.0).ok_or(LoadError::BadHandle)?;
        let rules = asg.rules_mut();
        rules.try_reserve(1)?;
        rules.push(Rule::new(access, level));
        let rule = RuleRef {
            group,
            index: rules.len() - 1,
        };
        self.current_rule = Some(rule);
        Ok(rule)
    }

    fn rule_mut(&mut self, rule: RuleRef) -> Result<&mut Rule, LoadError> {
        self.groups
            .get_mut(rule.group.0)
            .and_then(|g| g.rules_mut().get_mut(rule.index))
            .ok_or(LoadError::BadHandle)
    }

    pub fn set_rule_trap(&mut self, rule: RuleRef, trap: bool) -> Result<(), LoadError> {
        self.rule_mut(rule)?.set_trap_on_write(trap);
        Ok(())
    }

    pub fn rule_add_user_group(&mut self, rule: RuleRef, name: &str) -> Result<(), LoadError> {
        let id = self
            .registry
            .find_user_group(name)
            .ok_or_else(|| LoadError::UnknownUserGroup(name.to_string()))?;
        self.rule_mut(rule)?.add_user_group(id);
        Ok(())
    }

    pub fn rule_add_host_group(&mut self, rule: RuleRef, name: &str) -> Result<(), LoadError> {
        let id = self
            .registry
            .find_host_group(name)
            .ok_or_else(|| LoadError::UnknownHostGroup(name.to_string()))?;
        self.rule_mut(rule)?.add_host_group(id);
        Ok(())
    }

    pub fn rule_add_ip_group(&mut self, rule: RuleRef, name: &str) -> Result<(), LoadError> {
        let id = self
            .registry
            .find_ip_group(name)
            .ok_or_else(|| LoadError::UnknownIpGroup(name.to_string()))?;
        self.rule_mut(rule)?.add_ip_group(id);
        Ok(())
    }

    pub fn rule_set_condition(&mut self, rule: RuleRef, infix: &str) -> Result<(), LoadError> {
        let group_name = self
            .groups
            .get(rule.group.0)
            .map(|g| g.name().to_string())
            .ok_or(LoadError::BadHandle)?;
        let program = calc::compile(infix).map_err(|source| LoadError::BadCondition {
            group: group_name,
            rule: rule.index,
            source,
        })?;
        self.rule_mut(rule)?.set_condition(program);
        Ok(())
    }

    fn current_rule(&self) -> Result<RuleRef, LoadError> {
        self.current_rule.ok_or(LoadError::NoCurrentRule)
    }

    fn user_group_named(&self, name: &str) -> Result<UserGroupId, LoadError> {
        self.registry
            .find_user_group(name)
            .ok_or_else(|| LoadError::UnknownUserGroup(name.to_string()))
    }

    fn host_group_named(&self, name: &str) -> Result<HostGroupId, LoadError> {
        self.registry
            .find_host_group(name)
            .ok_or_else(|| LoadError::UnknownHostGroup(name.to_string()))
    }

    fn ip_group_named(&self, name: &str) -> Result<IpGroupId, LoadError> {
        self.registry
            .find_ip_group(name)
            .ok_or_else(|| LoadError::UnknownIpGroup(name.to_string()))
    }

    fn resource_group_named(&self, name: &str) -> Result<AsgId, LoadError> {
        self.find_resource_group(name)
            .ok_or_else(|| LoadError::UnknownResourceGroup(name.to_string()))
    }

    /// Apply one serialized builder call.
    pub fn apply(&mut self, call: BuilderCall) -> Result<(), LoadError> {
        match call {
            BuilderCall::AddUserGroup(name) => self.add_user_group(&name).map(drop),
            BuilderCall::AddUser { group, user } => {
                let id = self.user_group_named(&group)?;
                self.add_user(id, &user)
            }
            BuilderCall::AddHostGroup(name) => self.add_host_group(&name).map(drop),
            BuilderCall::AddHost { group, host } => {
                let id = self.host_group_named(&group)?;
                self.add_host(id, &host)
            }
            BuilderCall::AddIpGroup(name) => self.add_ip_group(&name).map(drop),
            BuilderCall::AddIp { group, addr } => {
                let id = self.ip_group_named(&group)?;
                self.add_ip(id, &addr)
            }
            BuilderCall::AddResourceGroup(name) => self.add_resource_group(&name).map(drop),
            BuilderCall::AddInput {
                group,
                letter,
                source,
            } => {
                let id = self.resource_group_named(&group)?;
                self.add_input(id, letter, &source)
            }
            BuilderCall::AddRule {
                group,
                access,
                level,
            } => {
                let id = self.resource_group_named(&group)?;
                self.add_rule(id, access, level).map(drop)
            }
            BuilderCall::SetRuleTrap(trap) => {
                let rule = self.current_rule()?;
                self.set_rule_trap(rule, trap)
            }
            BuilderCall::RuleAddUserGroup(name) => {
                let rule = self.current_rule()?;
                self.rule_add_user_group(rule, &name)
            }
            BuilderCall::RuleAddHostGroup(name) => {
                let rule = self.current_rule()?;
                self.rule_add_host_group(rule, &name)
            }
            BuilderCall::RuleAddIpGroup(name) => {
                let rule = self.current_rule()?;
                self.rule_add_ip_group(rule, &name)
            }
            BuilderCall::RuleSetCondition(infix) => {
                let rule = self.current_rule()?;
                self.rule_set_condition(rule, &infix)
            }
        }
    }

    /// Seal the builder into an unpublished generation.
    pub fn end_load(mut self) -> Result<Generation, LoadError> {
        self.registry.seal()?;
        Ok(Generation {
            id: 0,
            registry: self.registry,
            groups: self.groups,
            default_group: self.default_group,
            loaded_at: SystemTime::now(),
        })
    }
}
