// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Member and client lifecycle.
//!
//! A member is one protected resource instance bound to a resource group.
//! A client is one viewer of a member (user, host, privilege level) whose
//! access the engine keeps computed. Both live in engine-owned arenas; the
//! caller holds a non-cloneable handle carrying the slot key and the id of
//! the engine that issued it.

use std::any::Any;
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::Arc;

use super::arena::Key;
use super::{AccessEngine, EngineState};
use crate::asg::AsgId;
use crate::error::{AccessError, RemoveMemberError, StillHasClients};
use crate::rules::{AccessRight, ClientIdentity, Decision};
use crate::trap::{TrapWriteGuard, TrapWriteMessage};

/// Opaque caller data attached to a member or client.
pub type Payload = Arc<dyn Any + Send + Sync>;

/// Stable identity of a member inside its engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MemberKey(pub(crate) Key);

/// Stable identity of a client inside its engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientKey(pub(crate) Key);

/// Owning handle to a member. Not cloneable: whoever holds it decides
/// when the member goes away.
#[derive(Debug, PartialEq, Eq)]
pub struct MemberHandle {
    key: MemberKey,
    engine: u64,
}

impl MemberHandle {
    pub fn key(&self) -> MemberKey {
        self.key
    }
}

/// Owning handle to a client.
#[derive(Debug, PartialEq, Eq)]
pub struct ClientHandle {
    key: ClientKey,
    engine: u64,
}

impl ClientHandle {
    pub fn key(&self) -> ClientKey {
        self.key
    }
}

/// New access of a client, delivered to its observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessChange {
    pub client: ClientKey,
    pub access: AccessRight,
    pub trap_on_write: bool,
}

/// Receives access changes of one client.
///
/// Called with the engine lock held but the state released, so the
/// callback may call back into the engine from the same thread.
pub trait AccessObserver: Send + Sync {
    fn access_changed(&self, change: &AccessChange);
}

impl<F> AccessObserver for F
where
    F: Fn(&AccessChange) + Send + Sync,
{
    fn access_changed(&self, change: &AccessChange) {
        self(change)
    }
}

pub(crate) struct Notification {
    observer: Arc<dyn AccessObserver>,
    change: AccessChange,
}

impl Notification {
    pub fn new(observer: &Arc<dyn AccessObserver>, client: ClientKey, decision: Decision) -> Self {
        Self {
            observer: Arc::clone(observer),
            change: AccessChange {
                client,
                access: decision.access,
                trap_on_write: decision.trap_on_write,
            },
        }
    }

    pub fn deliver(self) {
        self.observer.access_changed(&self.change);
    }
}

pub(crate) struct MemberSlot {
    /// Group name as requested; re-resolved on every reload.
    pub asg_name: String,
    pub asg: AsgId,
    pub clients: Vec<ClientKey>,
    pub payload: Option<Payload>,
}

pub(crate) struct ClientSlot {
    pub member: MemberKey,
    pub user: String,
    /// Lower-cased.
    pub host: String,
    pub ip: Option<Ipv4Addr>,
    pub level: u32,
    pub access: AccessRight,
    pub trap_on_write: bool,
    pub observer: Option<Arc<dyn AccessObserver>>,
    pub payload: Option<Payload>,
}

impl ClientSlot {
    pub fn identity(&self) -> ClientIdentity<'_> {
        ClientIdentity {
            user: &self.user,
            host: &self.host,
            ip: self.ip,
            level: self.level,
        }
    }
}

impl fmt::Debug for ClientSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSlot")
            .field("user", &self.user)
            .field("host", &self.host)
            .field("level", &self.level)
            .field("access", &self.access)
            .finish_non_exhaustive()
    }
}

impl EngineState {
    fn member_key(&self, engine: u64, handle: &MemberHandle) -> Result<MemberKey, AccessError> {
        if handle.engine != engine || !self.members.contains(handle.key.0) {
            return Err(AccessError::UnknownMember);
        }
        Ok(handle.key)
    }

    fn client(&self, engine: u64, handle: &ClientHandle) -> Result<&ClientSlot, AccessError> {
        if handle.engine != engine {
            return Err(AccessError::UnknownClient);
        }
        self.clients.get(handle.key.0).ok_or(AccessError::UnknownClient)
    }

    fn client_mut(&mut self, engine: u64, handle: &ClientHandle) -> Result<&mut ClientSlot, AccessError> {
        if handle.engine != engine {
            return Err(AccessError::UnknownClient);
        }
        self.clients.get_mut(handle.key.0).ok_or(AccessError::UnknownClient)
    }

    fn group_name(&self, id: AsgId) -> Option<&str> {
        self.generation.as_ref()?.group(id).map(|g| g.name())
    }
}

impl AccessEngine {
    // -----------------------------------------------------------------------
    // Members
    // -----------------------------------------------------------------------

    /// Bind a new member to `group_name`, or to DEFAULT when no such group
    /// exists in the live generation.
    pub fn add_member(&self, group_name: &str) -> Result<MemberHandle, AccessError> {
        let engine = self.id();
        self.with_state(|state, _| {
            let generation = state.generation.as_mut().ok_or(AccessError::NotActive)?;
            let asg = generation.resolve(group_name);
            let key = MemberKey(state.members.insert(MemberSlot {
                asg_name: group_name.to_string(),
                asg,
                clients: Vec::new(),
                payload: None,
            }));
            if let Some(group) = generation.group_mut(asg) {
                group.attach(key);
            }
            Ok(MemberHandle { key, engine })
        })
    }

    /// Destroy a member. Refused while clients are attached or when the
    /// handle was issued elsewhere; the handle is handed back inside the
    /// error.
    pub fn remove_member(&self, handle: MemberHandle) -> Result<(), RemoveMemberError> {
        let engine = self.id();
        let removed = self.with_state(|state, _| {
            if state.member_key(engine, &handle).is_err() {
                return Err(RemoveMemberError::UnknownMember(handle));
            }
            let clients = state
                .members
                .get(handle.key.0)
                .map_or(0, |m| m.clients.len());
            if clients > 0 {
                return Err(StillHasClients {
                    member: handle,
                    clients,
                }
                .into());
            }
            let slot = state.members.remove(handle.key.0);
            if let Some(slot) = &slot {
                if let Some(group) = state.generation.as_mut().and_then(|g| g.group_mut(slot.asg)) {
                    group.detach(handle.key);
                }
            }
            Ok(slot)
        })?;
        // payload drops here, outside the state borrow
        drop(removed);
        Ok(())
    }

    /// Move a member to another group and recompute its clients.
    pub fn change_group(&self, handle: &MemberHandle, group_name: &str) -> Result<(), AccessError> {
        let engine = self.id();
        self.with_state(|state, out| {
            let key = state.member_key(engine, handle)?;
            let generation = state.generation.as_mut().ok_or(AccessError::NotActive)?;
            let Some(member) = state.members.get_mut(key.0) else {
                return Err(AccessError::UnknownMember);
            };
            if let Some(old) = generation.group_mut(member.asg) {
                old.detach(key);
            }
            let asg = generation.resolve(group_name);
            member.asg = asg;
            member.asg_name = group_name.to_string();
            if let Some(group) = generation.group_mut(asg) {
                group.attach(key);
            }
            state.compute_member(key, out);
            Ok(())
        })
    }

    /// Name of the group the member is currently bound to.
    pub fn member_group(&self, handle: &MemberHandle) -> Result<String, AccessError> {
        self.read_state(|state| {
            let key = state.member_key(self.id(), handle)?;
            let asg = state.members.get(key.0).ok_or(AccessError::UnknownMember)?.asg;
            state
                .group_name(asg)
                .map(str::to_string)
                .ok_or(AccessError::NotActive)
        })
    }

    pub fn member_client_count(&self, handle: &MemberHandle) -> Result<usize, AccessError> {
        self.read_state(|state| {
            let key = state.member_key(self.id(), handle)?;
            Ok(state.members.get(key.0).map_or(0, |m| m.clients.len()))
        })
    }

    pub fn set_member_payload(&self, handle: &MemberHandle, payload: Payload) -> Result<(), AccessError> {
        let previous = self.with_state(|state, _| {
            let key = state.member_key(self.id(), handle)?;
            let member = state.members.get_mut(key.0).ok_or(AccessError::UnknownMember)?;
            Ok::<_, AccessError>(member.payload.replace(payload))
        })?;
        drop(previous);
        Ok(())
    }

    pub fn member_payload(&self, handle: &MemberHandle) -> Result<Option<Payload>, AccessError> {
        self.read_state(|state| {
            let key = state.member_key(self.id(), handle)?;
            Ok(state.members.get(key.0).and_then(|m| m.payload.clone()))
        })
    }

    // -----------------------------------------------------------------------
    // Clients
    // -----------------------------------------------------------------------

    /// Attach a client to `member` and compute its initial access.
    pub fn add_client(
        &self,
        member: &MemberHandle,
        user: &str,
        host: &str,
        level: u32,
    ) -> Result<ClientHandle, AccessError> {
        self.attach_client(member, user, host, None, level)
    }

    /// Like [`add_client`](Self::add_client), with the peer's IPv4 address
    /// for IP group rules.
    pub fn add_client_with_ip(
        &self,
        member: &MemberHandle,
        user: &str,
        host: &str,
        ip: Ipv4Addr,
        level: u32,
    ) -> Result<ClientHandle, AccessError> {
        self.attach_client(member, user, host, Some(ip), level)
    }

    fn attach_client(
        &self,
        member: &MemberHandle,
        user: &str,
        host: &str,
        ip: Option<Ipv4Addr>,
        level: u32,
    ) -> Result<ClientHandle, AccessError> {
        let engine = self.id();
        self.with_state(|state, out| {
            let member_key = state.member_key(engine, member)?;
            let key = ClientKey(state.clients.insert(ClientSlot {
                member: member_key,
                user: user.to_string(),
                host: host.to_ascii_lowercase(),
                ip,
                level,
                access: AccessRight::NoAccess,
                trap_on_write: false,
                observer: None,
                payload: None,
            }));
            if let Some(slot) = state.members.get_mut(member_key.0) {
                slot.clients.push(key);
            }
            state.compute_client(key, out);
            Ok(ClientHandle { key, engine })
        })
    }

    /// Re-identify a client and recompute its access.
    pub fn change_client(
        &self,
        handle: &ClientHandle,
        user: &str,
        host: &str,
        level: u32,
    ) -> Result<(), AccessError> {
        let engine = self.id();
        self.with_state(|state, out| {
            let client = state.client_mut(engine, handle)?;
            client.user = user.to_string();
            client.host = host.to_ascii_lowercase();
            client.level = level;
            state.compute_client(handle.key, out);
            Ok(())
        })
    }

    pub fn remove_client(&self, handle: ClientHandle) -> Result<(), AccessError> {
        let engine = self.id();
        let removed = self.with_state(|state, _| {
            state.client(engine, &handle)?;
            let client = state
                .clients
                .remove(handle.key.0)
                .ok_or(AccessError::UnknownClient)?;
            if let Some(member) = state.members.get_mut(client.member.0) {
                member.clients.retain(|&c| c != handle.key);
            }
            Ok::<_, AccessError>(client)
        })?;
        // observer and payload drop here, outside the state borrow
        drop(removed);
        Ok(())
    }

    /// Install `observer` and call it once right away with the current
    /// access. Replaces any previous observer.
    pub fn register_callback(
        &self,
        handle: &ClientHandle,
        observer: Arc<dyn AccessObserver>,
    ) -> Result<(), AccessError> {
        let engine = self.id();
        let previous = self.with_state(|state, out| {
            let client = state.client_mut(engine, handle)?;
            let decision = Decision {
                access: client.access,
                trap_on_write: client.trap_on_write,
            };
            out.push(Notification::new(&observer, handle.key, decision));
            Ok::<_, AccessError>(client.observer.replace(observer))
        })?;
        drop(previous);
        Ok(())
    }

    pub fn unregister_callback(&self, handle: &ClientHandle) -> Result<(), AccessError> {
        let engine = self.id();
        let previous = self.with_state(|state, _| {
            Ok::<_, AccessError>(state.client_mut(engine, handle)?.observer.take())
        })?;
        drop(previous);
        Ok(())
    }

    /// Current access of a client.
    pub fn client_access(&self, handle: &ClientHandle) -> Result<AccessRight, AccessError> {
        self.read_state(|state| state.client(self.id(), handle).map(|c| c.access))
    }

    /// Whether the rule that granted the client's access traps writes.
    pub fn client_trap_on_write(&self, handle: &ClientHandle) -> Result<bool, AccessError> {
        self.read_state(|state| state.client(self.id(), handle).map(|c| c.trap_on_write))
    }

    pub fn can_read(&self, handle: &ClientHandle) -> bool {
        self.client_access(handle).is_ok_and(AccessRight::can_read)
    }

    pub fn can_write(&self, handle: &ClientHandle) -> bool {
        self.client_access(handle).is_ok_and(AccessRight::can_write)
    }

    pub fn set_client_payload(&self, handle: &ClientHandle, payload: Payload) -> Result<(), AccessError> {
        let engine = self.id();
        let previous = self.with_state(|state, _| {
            Ok::<_, AccessError>(state.client_mut(engine, handle)?.payload.replace(payload))
        })?;
        drop(previous);
        Ok(())
    }

    pub fn client_payload(&self, handle: &ClientHandle) -> Result<Option<Payload>, AccessError> {
        self.read_state(|state| state.client(self.id(), handle).map(|c| c.payload.clone()))
    }

    /// Open a trapped write for `handle`. `None` when the granting rule does
    /// not trap writes or no listener is registered.
    pub fn trap_write(
        &self,
        handle: &ClientHandle,
        element_count: usize,
    ) -> Result<Option<TrapWriteGuard>, AccessError> {
        if self.traps().is_empty() {
            // Still reject foreign or stale handles.
            return self.client_access(handle).map(|_| None);
        }
        let message = self.read_state(|state| {
            let client = state.client(self.id(), handle)?;
            if !client.trap_on_write {
                return Ok(None);
            }
            let group = state
                .members
                .get(client.member.0)
                .and_then(|m| state.group_name(m.asg))
                .unwrap_or_default()
                .to_string();
            Ok(Some(TrapWriteMessage {
                serial: 0,
                user: client.user.clone(),
                host: client.host.clone(),
                group,
                level: client.level,
                element_count,
            }))
        })?;
        Ok(message.and_then(|m| self.traps().begin(m)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::rules::AccessRight;
    use parking_lot::Mutex;

    fn engine() -> AccessEngine {
        let engine = AccessEngine::new(EngineConfig::default());
        engine
            .load(|b| {
                let ops = b.add_user_group("ops")?;
                b.add_user(ops, "bob")?;
                let rf = b.add_resource_group("RF")?;
                let rule = b.add_rule(rf, AccessRight::Write, 1)?;
                b.rule_add_user_group(rule, "ops")?;
                let d = b.add_resource_group("DEFAULT")?;
                b.add_rule(d, AccessRight::Read, 1)?;
                Ok(())
            })
            .unwrap();
        engine
    }

    #[test]
    fn test_inactive_engine_refuses_members() {
        let engine = AccessEngine::default();
        assert_eq!(engine.add_member("RF").unwrap_err(), AccessError::NotActive);
    }

    #[test]
    fn test_unknown_group_binds_default() {
        let engine = engine();
        let m = engine.add_member("NOPE").unwrap();
        assert_eq!(engine.member_group(&m).unwrap(), "DEFAULT");
        engine.remove_member(m).unwrap();
    }

    #[test]
    fn test_host_lowercased() {
        let engine = engine();
        let m = engine.add_member("RF").unwrap();
        let c = engine.add_client(&m, "bob", "OPI1.Example", 1).unwrap();
        let host = engine.read_state(|s| s.clients.get(c.key().0).map(|c| c.host.clone()));
        assert_eq!(host.as_deref(), Some("opi1.example"));
    }

    #[test]
    fn test_remove_member_with_clients() {
        let engine = engine();
        let m = engine.add_member("RF").unwrap();
        let c = engine.add_client(&m, "bob", "h", 1).unwrap();
        let err = engine.remove_member(m).unwrap_err();
        assert!(matches!(
            &err,
            RemoveMemberError::StillHasClients(StillHasClients { clients: 1, .. })
        ));
        let m = err.into_handle();
        engine.remove_client(c).unwrap();
        engine.remove_member(m).unwrap();
    }

    #[test]
    fn test_remove_member_foreign_handle_handed_back() {
        let a = engine();
        let b = engine();
        let m = a.add_member("RF").unwrap();

        let err = b.remove_member(m).unwrap_err();
        assert!(matches!(err, RemoveMemberError::UnknownMember(_)));
        assert_eq!(a.member_count(), 1);

        a.remove_member(err.into_handle()).unwrap();
        assert_eq!(a.member_count(), 0);
    }

    #[test]
    fn test_inspect_closure_may_mutate() {
        let engine = engine();
        let m = engine
            .inspect(|g| {
                assert!(g.group_by_name("RF").is_some());
                engine.add_member("RF")
            })
            .unwrap()
            .unwrap();
        assert_eq!(engine.member_count(), 1);
        engine.remove_member(m).unwrap();
    }

    /// Payload whose drop reads engine state.
    struct CountOnDrop {
        engine: Arc<AccessEngine>,
        seen: Arc<Mutex<Vec<usize>>>,
    }

    impl Drop for CountOnDrop {
        fn drop(&mut self) {
            self.seen.lock().push(self.engine.client_count());
        }
    }

    #[test]
    fn test_payload_drop_may_call_engine() {
        let engine = Arc::new(engine());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let payload = |engine: &Arc<AccessEngine>| -> Payload {
            Arc::new(CountOnDrop {
                engine: Arc::clone(engine),
                seen: Arc::clone(&seen),
            })
        };

        let m = engine.add_member("RF").unwrap();
        let c = engine.add_client(&m, "bob", "h", 1).unwrap();

        engine.set_client_payload(&c, payload(&engine)).unwrap();
        engine.set_client_payload(&c, payload(&engine)).unwrap();
        engine.remove_client(c).unwrap();

        engine.set_member_payload(&m, payload(&engine)).unwrap();
        engine.set_member_payload(&m, payload(&engine)).unwrap();
        engine.remove_member(m).unwrap();

        assert_eq!(*seen.lock(), vec![1, 0, 0, 0]);
    }

    #[test]
    fn test_observer_drop_may_call_engine() {
        struct Watcher(CountOnDrop);

        impl AccessObserver for Watcher {
            fn access_changed(&self, _: &AccessChange) {}
        }

        let engine = Arc::new(engine());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let watcher = || {
            Arc::new(Watcher(CountOnDrop {
                engine: Arc::clone(&engine),
                seen: Arc::clone(&seen),
            }))
        };

        let m = engine.add_member("RF").unwrap();
        let c = engine.add_client(&m, "bob", "h", 1).unwrap();
        engine.register_callback(&c, watcher()).unwrap();
        engine.register_callback(&c, watcher()).unwrap();
        engine.unregister_callback(&c).unwrap();
        engine.register_callback(&c, watcher()).unwrap();
        engine.remove_client(c).unwrap();
        engine.remove_member(m).unwrap();

        assert_eq!(*seen.lock(), vec![1, 1, 0]);
    }

    #[test]
    fn test_foreign_handles() {
        let a = engine();
        let b = engine();
        let m = a.add_member("RF").unwrap();
        let c = a.add_client(&m, "bob", "h", 1).unwrap();
        assert_eq!(b.client_access(&c), Err(AccessError::UnknownClient));
        assert_eq!(b.add_client(&m, "bob", "h", 1).unwrap_err(), AccessError::UnknownMember);
        assert!(!b.can_read(&c));
    }

    #[test]
    fn test_change_client_notifies() {
        let engine = engine();
        let m = engine.add_member("RF").unwrap();
        let c = engine.add_client(&m, "eve", "h", 1).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        engine
            .register_callback(&c, Arc::new(move |ch: &AccessChange| sink.lock().push(ch.access)))
            .unwrap();
        engine.change_client(&c, "bob", "h", 1).unwrap();
        engine.change_client(&c, "bob", "h", 1).unwrap();
        assert_eq!(*seen.lock(), vec![AccessRight::NoAccess, AccessRight::Write]);
    }

    #[test]
    fn test_payloads() {
        let engine = engine();
        let m = engine.add_member("RF").unwrap();
        assert!(engine.member_payload(&m).unwrap().is_none());
        engine.set_member_payload(&m, Arc::new(42u32)).unwrap();
        let payload = engine.member_payload(&m).unwrap().unwrap();
        assert_eq!(payload.downcast_ref::<u32>(), Some(&42));

        let c = engine.add_client(&m, "bob", "h", 1).unwrap();
        engine.set_client_payload(&c, Arc::new("opi")).unwrap();
        let payload = engine.client_payload(&c).unwrap().unwrap();
        assert_eq!(payload.downcast_ref::<&str>(), Some(&"opi"));
    }
}
