// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Access-security engine with atomic configuration hot-reload.
//!
//! # Architecture
//!
//! ```text
//! AccessEngine
//! +-- state: ReentrantMutex<RefCell<EngineState>>   (single process-wide lock)
//! |   +-- generation: Option<Generation>            (None until first publish)
//! |   +-- members: Arena<MemberSlot>                (bound resource instances)
//! |   +-- clients: Arena<ClientSlot>                (viewers of a member)
//! +-- audit: Mutex<AuditLog>                        (reload history)
//! +-- traps: TrapRegistry                           (write-trap listeners)
//! ```
//!
//! # Reload
//!
//! A load builds a complete [`Generation`] without touching the engine. Any
//! failure discards it and the live generation keeps serving. Publishing
//! takes the lock once and, inside that single critical section, swaps the
//! generation in, moves every member of the old generation into the new one
//! by its configured group name (falling back to `DEFAULT`), recomputes
//! every client, and only then drops the old generation.
//!
//! # Observers
//!
//! Access-change observers run synchronously inside the call that changed
//! access, while the engine lock is held. The state borrow is released
//! first, so an observer may call back into the engine from the same thread.

mod arena;
mod members;

pub use members::{AccessChange, AccessObserver, ClientHandle, ClientKey, MemberHandle, MemberKey, Payload};

use std::cell::RefCell;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, ReentrantMutex};

use crate::asg::AsgId;
use crate::audit::{diff_generations, AuditLog, ReloadAuditEntry, ReloadEventKind};
use crate::calc::{input_index, input_letter};
use crate::config::EngineConfig;
use crate::error::{AccessError, LoadError};
use crate::generation::{BuilderCall, Generation, GenerationBuilder};
use crate::groups::{HostCanonicalizer, HostResolver, SystemResolver};
use crate::trap::{TrapListenerId, TrapRegistry, TrapWriteListener};

use arena::Arena;
use members::{ClientSlot, MemberSlot, Notification};

static NEXT_ENGINE_ID: AtomicU64 = AtomicU64::new(1);

/// Summary of one publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishReport {
    /// Version number of the generation now live
    pub generation: u64,
    /// Members moved from the previous generation
    pub migrated_members: usize,
    /// Clients whose access was recomputed
    pub recomputed_clients: usize,
}

/// Declared input of a resource group, for the external binding layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputBinding {
    pub group: String,
    pub letter: char,
    pub source: String,
}

#[derive(Default)]
pub(crate) struct EngineState {
    pub(crate) generation: Option<Generation>,
    pub(crate) members: Arena<MemberSlot>,
    pub(crate) clients: Arena<ClientSlot>,
    published: u64,
}

impl EngineState {
    fn generation(&self) -> Result<&Generation, AccessError> {
        self.generation.as_ref().ok_or(AccessError::NotActive)
    }

    /// Recompute one client. Queues a notification when access changed.
    pub(crate) fn compute_client(&mut self, key: ClientKey, out: &mut Vec<Notification>) -> bool {
        let Some(generation) = self.generation.as_mut() else {
            return false;
        };
        let Some(client) = self.clients.get_mut(key.0) else {
            return false;
        };
        let Some(member) = self.members.get(client.member.0) else {
            return false;
        };
        let Some((registry, group)) = generation.registry_and_group_mut(member.asg) else {
            return false;
        };
        if !group.changed_mask().is_empty() {
            group.recompute();
        }

        let decision = group.decide(registry, &client.identity());
        client.trap_on_write = decision.trap_on_write;
        if decision.access != client.access {
            client.access = decision.access;
            if let Some(observer) = &client.observer {
                out.push(Notification::new(observer, key, decision));
            }
        }
        true
    }

    pub(crate) fn compute_member(&mut self, key: MemberKey, out: &mut Vec<Notification>) -> usize {
        let clients = match self.members.get(key.0) {
            Some(member) => member.clients.clone(),
            None => return 0,
        };
        clients
            .into_iter()
            .filter(|&c| self.compute_client(c, out))
            .count()
    }

    /// Re-run rule conditions for `group`, then every client bound to it.
    pub(crate) fn compute_group(&mut self, id: AsgId, out: &mut Vec<Notification>) -> usize {
        let members: Vec<MemberKey> = match self.generation.as_mut().and_then(|g| g.group_mut(id)) {
            Some(group) => {
                group.recompute();
                group.members().collect()
            }
            None => return 0,
        };
        members
            .into_iter()
            .map(|m| self.compute_member(m, out))
            .sum()
    }

    pub(crate) fn compute_all(&mut self, out: &mut Vec<Notification>) -> usize {
        let ids: Vec<AsgId> = match &self.generation {
            Some(generation) => generation.resource_group_ids().collect(),
            None => return 0,
        };
        ids.into_iter().map(|id| self.compute_group(id, out)).sum()
    }

    fn publish(&mut self, mut next: Generation, out: &mut Vec<Notification>) -> (PublishReport, Option<Generation>) {
        self.published += 1;
        next.set_id(self.published);
        next.prime_conditions();

        let old = self.generation.replace(next);
        let mut migrated = Vec::new();

        if let (Some(old), Some(new)) = (old.as_ref(), self.generation.as_mut()) {
            for group in old.resource_groups() {
                for key in group.members() {
                    let Some(member) = self.members.get_mut(key.0) else {
                        continue;
                    };
                    let id = new.resolve(&member.asg_name);
                    member.asg = id;
                    if let Some(target) = new.group_mut(id) {
                        target.attach(key);
                    }
                    migrated.push(key);
                }
            }
        }

        let recomputed = migrated
            .iter()
            .map(|&key| self.compute_member(key, out))
            .sum::<usize>();
        log::debug!(
            "Migrated {} member(s), recomputed {} client(s)",
            migrated.len(),
            recomputed
        );

        let report = PublishReport {
            generation: self.published,
            migrated_members: migrated.len(),
            recomputed_clients: recomputed,
        };
        (report, old)
    }
}

/// Process-wide access-security engine.
///
/// Starts inactive; the first successful publish makes it active. All state
/// sits behind one lock shared by readers and writers.
pub struct AccessEngine {
    id: u64,
    config: EngineConfig,
    canonicalizer: HostCanonicalizer,
    state: ReentrantMutex<RefCell<EngineState>>,
    audit: Mutex<AuditLog>,
    traps: TrapRegistry,
}

impl AccessEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_resolver(config, Arc::new(SystemResolver))
    }

    /// Engine using `resolver` for strict host canonicalization.
    pub fn with_resolver(config: EngineConfig, resolver: Arc<dyn HostResolver>) -> Self {
        let canonicalizer = HostCanonicalizer::new(config.strict_host_resolution, resolver);
        let audit = AuditLog::new(config.max_audit_entries);
        Self {
            id: NEXT_ENGINE_ID.fetch_add(1, Ordering::Relaxed),
            config,
            canonicalizer,
            state: ReentrantMutex::new(RefCell::new(EngineState::default())),
            audit: Mutex::new(audit),
            traps: TrapRegistry::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run `f` on the state under the lock, then deliver the notifications
    /// it queued while still holding the lock.
    ///
    /// No caller code may run inside `f`, including the drop of a caller
    /// payload or observer: hand such values back out and drop them after
    /// the borrow ends.
    pub(crate) fn with_state<R>(
        &self,
        f: impl FnOnce(&mut EngineState, &mut Vec<Notification>) -> R,
    ) -> R {
        let guard = self.state.lock();
        let mut pending = Vec::new();
        let result = {
            let mut state = guard.borrow_mut();
            f(&mut state, &mut pending)
        };
        for notification in pending {
            notification.deliver();
        }
        result
    }

    /// Read-only access to the state under the lock.
    pub(crate) fn read_state<R>(&self, f: impl FnOnce(&EngineState) -> R) -> R {
        let guard = self.state.lock();
        let state = guard.borrow();
        f(&state)
    }

    /// True once a generation has been published.
    pub fn is_active(&self) -> bool {
        self.read_state(|s| s.generation.is_some())
    }

    /// Version of the live generation.
    pub fn generation_id(&self) -> Option<u64> {
        self.read_state(|s| s.generation.as_ref().map(Generation::id))
    }

    /// Live members across all groups.
    pub fn member_count(&self) -> usize {
        self.read_state(|s| s.members.len())
    }

    pub fn client_count(&self) -> usize {
        self.read_state(|s| s.clients.len())
    }

    /// Run `f` against a copy of the live generation, taken under the lock.
    /// `f` runs unlocked and may call back into the engine.
    pub fn inspect<R>(&self, f: impl FnOnce(&Generation) -> R) -> Result<R, AccessError> {
        let snapshot = self.read_state(|s| s.generation().cloned())?;
        Ok(f(&snapshot))
    }

    // -----------------------------------------------------------------------
    // Loading
    // -----------------------------------------------------------------------

    /// Start building a new generation. The engine is not touched until
    /// the result is published.
    pub fn begin_load(&self) -> GenerationBuilder {
        GenerationBuilder::new(self.canonicalizer.clone())
    }

    /// Make `next` the live generation and migrate every member into it.
    pub fn publish(&self, next: Generation) -> PublishReport {
        let (report, diff) = self.with_state(|state, out| {
            let (report, old) = state.publish(next, out);
            let diff = match (&old, &state.generation) {
                (Some(old), Some(new)) => diff_generations(old, new),
                _ => Vec::new(),
            };
            drop(old);
            (report, diff)
        });

        log::info!(
            "Published access security generation {} ({} member(s) migrated, {} change(s))",
            report.generation,
            report.migrated_members,
            diff.len()
        );
        let mut audit = self.audit.lock();
        audit.extend(diff);
        audit.push(ReloadAuditEntry::new(
            ReloadEventKind::Published,
            "",
            format!(
                "generation {} published, {} member(s) migrated",
                report.generation, report.migrated_members
            ),
        ));
        report
    }

    fn reject(&self, err: &LoadError) {
        log::warn!("Access security reload rejected, keeping current configuration: {}", err);
        self.audit.lock().push(ReloadAuditEntry::new(
            ReloadEventKind::Rejected,
            "",
            err.to_string(),
        ));
    }

    /// Build a generation with `build` and publish it. On error the live
    /// generation is left exactly as it was.
    pub fn load<F>(&self, build: F) -> Result<PublishReport, LoadError>
    where
        F: FnOnce(&mut GenerationBuilder) -> Result<(), LoadError>,
    {
        let mut builder = self.begin_load();
        let generation = build(&mut builder).and_then(|()| builder.end_load());
        match generation {
            Ok(generation) => Ok(self.publish(generation)),
            Err(e) => {
                self.reject(&e);
                Err(e)
            }
        }
    }

    /// Replay a serialized builder call stream and publish the result.
    pub fn load_calls<I>(&self, calls: I) -> Result<PublishReport, LoadError>
    where
        I: IntoIterator<Item = BuilderCall>,
    {
        self.load(|builder| calls.into_iter().try_for_each(|call| builder.apply(call)))
    }

    // -----------------------------------------------------------------------
    // Input feed
    // -----------------------------------------------------------------------

    fn group_and_index(
        state: &EngineState,
        group: &str,
        letter: char,
    ) -> Result<(AsgId, usize), AccessError> {
        let index = input_index(letter).ok_or(AccessError::InvalidInput { letter })?;
        let id = state
            .generation()?
            .find_group(group)
            .ok_or_else(|| AccessError::UnknownResourceGroup(group.to_string()))?;
        Ok((id, index))
    }

    /// Store a new value for input `letter` of `group` and recompute the
    /// group's clients.
    pub fn set_input(&self, group: &str, letter: char, value: f64) -> Result<(), AccessError> {
        self.with_state(|state, out| {
            let (id, index) = Self::group_and_index(state, group, letter)?;
            if let Some(asg) = state.generation.as_mut().and_then(|g| g.group_mut(id)) {
                asg.set_input(index, value);
            }
            state.compute_group(id, out);
            Ok(())
        })
    }

    /// Mark input `letter` of `group` invalid and recompute the group's clients.
    pub fn invalidate_input(&self, group: &str, letter: char) -> Result<(), AccessError> {
        self.with_state(|state, out| {
            let (id, index) = Self::group_and_index(state, group, letter)?;
            if let Some(asg) = state.generation.as_mut().and_then(|g| g.group_mut(id)) {
                asg.invalidate_input(index);
            }
            state.compute_group(id, out);
            Ok(())
        })
    }

    /// Every declared input of the live generation.
    pub fn input_bindings(&self) -> Vec<InputBinding> {
        self.read_state(|state| {
            let Some(generation) = &state.generation else {
                return Vec::new();
            };
            generation
                .resource_groups()
                .flat_map(|g| {
                    g.declared_inputs().filter_map(move |(i, source)| {
                        Some(InputBinding {
                            group: g.name().to_string(),
                            letter: input_letter(i)?,
                            source: source.to_string(),
                        })
                    })
                })
                .collect()
        })
    }

    // -----------------------------------------------------------------------
    // Recompute
    // -----------------------------------------------------------------------

    /// Re-evaluate every group and client. Returns the clients visited.
    pub fn compute_all(&self) -> usize {
        self.with_state(|state, out| state.compute_all(out))
    }

    /// Re-evaluate one group and its clients.
    pub fn compute_group(&self, group: &str) -> Result<usize, AccessError> {
        self.with_state(|state, out| {
            let id = state
                .generation()?
                .find_group(group)
                .ok_or_else(|| AccessError::UnknownResourceGroup(group.to_string()))?;
            Ok(state.compute_group(id, out))
        })
    }

    // -----------------------------------------------------------------------
    // Audit
    // -----------------------------------------------------------------------

    pub fn audit_log(&self) -> Vec<ReloadAuditEntry> {
        self.audit.lock().snapshot()
    }

    pub fn add_trap_listener(&self, listener: Arc<dyn TrapWriteListener>) -> TrapListenerId {
        self.traps.add(listener)
    }

    pub fn remove_trap_listener(&self, id: TrapListenerId) -> bool {
        self.traps.remove(id)
    }

    pub(crate) fn traps(&self) -> &TrapRegistry {
        &self.traps
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }
}

impl Default for AccessEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl fmt::Debug for AccessEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessEngine")
            .field("id", &self.id)
            .field("config", &self.config)
            .field("generation", &self.generation_id())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::AccessRight;

    fn rf_with_input(b: &mut GenerationBuilder) -> Result<(), LoadError> {
        let rf = b.add_resource_group("RF")?;
        b.add_input(rf, 'A', "rf:ready")?;
        let rule = b.add_rule(rf, AccessRight::Write, 1)?;
        b.rule_set_condition(rule, "A=1")?;
        Ok(())
    }

    #[test]
    fn test_inactive_until_published() {
        let engine = AccessEngine::default();
        assert!(!engine.is_active());
        assert_eq!(engine.generation_id(), None);
        assert_eq!(engine.set_input("RF", 'A', 1.0), Err(AccessError::NotActive));
        engine.load(rf_with_input).unwrap();
        assert!(engine.is_active());
        assert_eq!(engine.generation_id(), Some(1));
    }

    #[test]
    fn test_explicit_publish() {
        let engine = AccessEngine::default();
        let mut builder = engine.begin_load();
        rf_with_input(&mut builder).unwrap();
        let report = engine.publish(builder.end_load().unwrap());
        assert_eq!(report.generation, 1);
        assert_eq!(report.migrated_members, 0);
    }

    #[test]
    fn test_input_feed() {
        let engine = AccessEngine::default();
        engine.load(rf_with_input).unwrap();
        let m = engine.add_member("RF").unwrap();
        let c = engine.add_client(&m, "anyone", "h", 1).unwrap();
        assert_eq!(engine.client_access(&c).unwrap(), AccessRight::NoAccess);

        engine.set_input("RF", 'a', 1.0).unwrap();
        assert_eq!(engine.client_access(&c).unwrap(), AccessRight::Write);

        engine.invalidate_input("RF", 'A').unwrap();
        assert_eq!(engine.client_access(&c).unwrap(), AccessRight::NoAccess);

        assert_eq!(
            engine.set_input("RF", 'Z', 1.0),
            Err(AccessError::InvalidInput { letter: 'Z' })
        );
        assert_eq!(
            engine.set_input("VAC", 'A', 1.0),
            Err(AccessError::UnknownResourceGroup("VAC".into()))
        );
    }

    #[test]
    fn test_input_bindings() {
        let engine = AccessEngine::default();
        assert!(engine.input_bindings().is_empty());
        engine.load(rf_with_input).unwrap();
        assert_eq!(
            engine.input_bindings(),
            vec![InputBinding {
                group: "RF".into(),
                letter: 'A',
                source: "rf:ready".into(),
            }]
        );
    }

    #[test]
    fn test_rejected_load_is_audited() {
        let engine = AccessEngine::default();
        engine.load(rf_with_input).unwrap();
        let err = engine.load(|b| {
            b.add_resource_group("RF")?;
            b.add_resource_group("RF")?;
            Ok(())
        });
        assert!(err.is_err());
        assert_eq!(engine.generation_id(), Some(1));
        let kinds: Vec<_> = engine.audit_log().iter().map(|e| e.kind).collect();
        assert_eq!(kinds.last(), Some(&ReloadEventKind::Rejected));
    }

    #[test]
    fn test_compute_group_unknown() {
        let engine = AccessEngine::default();
        engine.load(rf_with_input).unwrap();
        assert_eq!(engine.compute_group("RF"), Ok(0));
        assert!(engine.compute_group("VAC").is_err());
        assert_eq!(engine.compute_all(), 0);
    }
}
