// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::uninlined_format_args)] // Test code readability over pedantic
#![allow(clippy::float_cmp)] // Test assertions with constants
#![allow(clippy::missing_panics_doc)] // Tests panic on failure
#![allow(clippy::items_after_statements)] // Test helpers
#![allow(clippy::too_many_lines)] // Scenario tests

//! End-to-end access scenarios
//!
//! Drives the engine the way a channel server does: load a configuration,
//! bind members, attach clients, feed inputs, watch access change.

use std::net::Ipv4Addr;
use std::sync::Arc;

use asec::{
    AccessChange, AccessEngine, AccessError, AccessRight, EngineConfig, GenerationBuilder,
    HostResolver, LoadError, RemoveMemberError, StillHasClients, TrapWriteListener,
    TrapWriteMessage,
};
use parking_lot::Mutex;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn default_read(b: &mut GenerationBuilder) -> Result<(), LoadError> {
    let d = b.add_resource_group("DEFAULT")?;
    b.add_rule(d, AccessRight::Read, 0)?;
    Ok(())
}

#[test]
fn test_default_read_then_admin_write() {
    init_logging();
    let engine = AccessEngine::new(EngineConfig::default());
    engine.load(default_read).unwrap();

    let m = engine.add_member("DEFAULT").unwrap();
    let bob = engine.add_client(&m, "bob", "h1", 0).unwrap();
    assert_eq!(engine.client_access(&bob).unwrap(), AccessRight::Read);

    // WRITE rule for admins, bob not yet an admin
    engine
        .load(|b| {
            b.add_user_group("admins")?;
            default_read(b)?;
            let d = b.find_resource_group("DEFAULT").ok_or(LoadError::BadHandle)?;
            let rule = b.add_rule(d, AccessRight::Write, 0)?;
            b.rule_add_user_group(rule, "admins")?;
            Ok(())
        })
        .unwrap();
    assert_eq!(engine.client_access(&bob).unwrap(), AccessRight::Read);

    // bob joins admins
    engine
        .load(|b| {
            let admins = b.add_user_group("admins")?;
            b.add_user(admins, "bob")?;
            default_read(b)?;
            let d = b.find_resource_group("DEFAULT").ok_or(LoadError::BadHandle)?;
            let rule = b.add_rule(d, AccessRight::Write, 0)?;
            b.rule_add_user_group(rule, "admins")?;
            Ok(())
        })
        .unwrap();
    assert_eq!(engine.client_access(&bob).unwrap(), AccessRight::Write);
    assert!(engine.can_write(&bob));
}

#[test]
fn test_observer_fires_on_registration_and_change_only() {
    init_logging();
    let engine = AccessEngine::default();
    engine
        .load(|b| {
            let rf = b.add_resource_group("RF")?;
            b.add_input(rf, 'A', "rf:ready")?;
            b.add_input(rf, 'B', "rf:unused")?;
            let rule = b.add_rule(rf, AccessRight::Write, 1)?;
            b.rule_set_condition(rule, "A>0")?;
            Ok(())
        })
        .unwrap();

    let m = engine.add_member("RF").unwrap();
    let c = engine.add_client(&m, "alice", "opi1", 1).unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    engine
        .register_callback(
            &c,
            Arc::new(move |change: &AccessChange| sink.lock().push(change.access)),
        )
        .unwrap();
    assert_eq!(*seen.lock(), vec![AccessRight::NoAccess]);

    engine.set_input("RF", 'A', 5.0).unwrap();
    engine.set_input("RF", 'A', 6.0).unwrap();
    engine.set_input("RF", 'B', 1.0).unwrap();
    engine.invalidate_input("RF", 'A').unwrap();
    assert_eq!(
        *seen.lock(),
        vec![AccessRight::NoAccess, AccessRight::Write, AccessRight::NoAccess]
    );

    engine.unregister_callback(&c).unwrap();
    engine.set_input("RF", 'A', 1.0).unwrap();
    assert_eq!(seen.lock().len(), 3);
    assert_eq!(engine.client_access(&c).unwrap(), AccessRight::Write);
}

#[test]
fn test_observer_may_read_engine() {
    let engine = Arc::new(AccessEngine::default());
    engine.load(default_read).unwrap();
    let m = engine.add_member("anything").unwrap();
    let c = Arc::new(engine.add_client(&m, "bob", "h", 0).unwrap());

    let seen = Arc::new(Mutex::new(None));
    let (sink, inner, client) = (Arc::clone(&seen), Arc::clone(&engine), Arc::clone(&c));
    engine
        .register_callback(
            &c,
            Arc::new(move |_: &AccessChange| {
                *sink.lock() = Some((inner.can_read(&client), inner.generation_id()));
            }),
        )
        .unwrap();
    assert_eq!(*seen.lock(), Some((true, Some(1))));
}

#[test]
fn test_level_and_host_groups() {
    let engine = AccessEngine::default();
    engine
        .load(|b| {
            let consoles = b.add_host_group("consoles")?;
            b.add_host(consoles, "OPI1")?;
            let vac = b.add_resource_group("VAC")?;
            let rule = b.add_rule(vac, AccessRight::Write, 0)?;
            b.rule_add_host_group(rule, "consoles")?;
            b.add_rule(vac, AccessRight::Read, 1)?;
            Ok(())
        })
        .unwrap();

    let m = engine.add_member("VAC").unwrap();
    let at_console = engine.add_client(&m, "x", "opi1", 0).unwrap();
    let elsewhere = engine.add_client(&m, "x", "laptop", 0).unwrap();
    let high_level = engine.add_client(&m, "x", "opi1", 1).unwrap();
    let too_high = engine.add_client(&m, "x", "opi1", 2).unwrap();

    assert_eq!(engine.client_access(&at_console).unwrap(), AccessRight::Write);
    assert_eq!(engine.client_access(&elsewhere).unwrap(), AccessRight::Read);
    assert_eq!(engine.client_access(&high_level).unwrap(), AccessRight::Read);
    assert_eq!(engine.client_access(&too_high).unwrap(), AccessRight::NoAccess);
}

/// Name service with a fixed table.
struct StaticResolver;

impl HostResolver for StaticResolver {
    fn resolve_ipv4(&self, host: &str) -> Option<Ipv4Addr> {
        match host {
            "opi1" => Some(Ipv4Addr::new(10, 0, 0, 1)),
            "opi2" => Some(Ipv4Addr::new(10, 0, 0, 2)),
            _ => host.parse().ok(),
        }
    }
}

#[test]
fn test_strict_host_resolution() {
    init_logging();
    let config = EngineConfig {
        strict_host_resolution: true,
        ..EngineConfig::default()
    };
    let engine = AccessEngine::with_resolver(config, Arc::new(StaticResolver));
    engine
        .load(|b| {
            let consoles = b.add_host_group("consoles")?;
            b.add_host(consoles, "opi1")?;
            b.add_host(consoles, "192.168.5.5")?;
            b.add_host(consoles, "ghost")?;
            let vac = b.add_resource_group("VAC")?;
            let rule = b.add_rule(vac, AccessRight::Write, 1)?;
            b.rule_add_host_group(rule, "consoles")?;
            Ok(())
        })
        .unwrap();

    let hosts = engine
        .inspect(|g| {
            let reg = g.registry();
            let id = reg.find_host_group("consoles").unwrap();
            reg.host_group(id).unwrap().hosts().to_vec()
        })
        .unwrap();
    assert_eq!(hosts, vec!["10.0.0.1", "192.168.5.5", "unresolved:ghost"]);

    let m = engine.add_member("VAC").unwrap();
    let resolved = engine.add_client(&m, "x", "10.0.0.1", 1).unwrap();
    let literal = engine.add_client(&m, "x", "192.168.5.5", 1).unwrap();
    let by_name = engine.add_client(&m, "x", "opi1", 1).unwrap();
    let other = engine.add_client(&m, "x", "10.0.0.2", 1).unwrap();
    let ghost = engine.add_client(&m, "x", "ghost", 1).unwrap();
    let spoofed = engine.add_client(&m, "x", "unresolved:ghost", 1).unwrap();

    assert_eq!(engine.client_access(&resolved).unwrap(), AccessRight::Write);
    assert_eq!(engine.client_access(&literal).unwrap(), AccessRight::Write);
    assert_eq!(engine.client_access(&by_name).unwrap(), AccessRight::NoAccess);
    assert_eq!(engine.client_access(&other).unwrap(), AccessRight::NoAccess);
    assert_eq!(engine.client_access(&ghost).unwrap(), AccessRight::NoAccess);
    assert_eq!(engine.client_access(&spoofed).unwrap(), AccessRight::NoAccess);
}

#[test]
fn test_ip_groups() {
    let engine = AccessEngine::default();
    engine
        .load(|b| {
            let lab = b.add_ip_group("lab")?;
            b.add_ip(lab, "10.0.0.5")?;
            let rf = b.add_resource_group("RF")?;
            let rule = b.add_rule(rf, AccessRight::Write, 1)?;
            b.rule_add_ip_group(rule, "lab")?;
            Ok(())
        })
        .unwrap();
    let m = engine.add_member("RF").unwrap();
    let inside = engine
        .add_client_with_ip(&m, "u", "h", "10.0.0.5".parse().unwrap(), 1)
        .unwrap();
    let outside = engine
        .add_client_with_ip(&m, "u", "h", "10.0.0.6".parse().unwrap(), 1)
        .unwrap();
    let unknown = engine.add_client(&m, "u", "h", 1).unwrap();
    assert!(engine.can_write(&inside));
    assert!(!engine.can_read(&outside));
    assert!(!engine.can_read(&unknown));
}

#[test]
fn test_change_group_recomputes() {
    let engine = AccessEngine::default();
    engine
        .load(|b| {
            let rf = b.add_resource_group("RF")?;
            b.add_rule(rf, AccessRight::Write, 1)?;
            let vac = b.add_resource_group("VAC")?;
            b.add_rule(vac, AccessRight::Read, 1)?;
            Ok(())
        })
        .unwrap();
    let m = engine.add_member("RF").unwrap();
    let c = engine.add_client(&m, "u", "h", 1).unwrap();
    assert_eq!(engine.client_access(&c).unwrap(), AccessRight::Write);

    engine.change_group(&m, "VAC").unwrap();
    assert_eq!(engine.member_group(&m).unwrap(), "VAC");
    assert_eq!(engine.client_access(&c).unwrap(), AccessRight::Read);

    engine.change_group(&m, "GONE").unwrap();
    assert_eq!(engine.member_group(&m).unwrap(), "DEFAULT");
    assert_eq!(engine.client_access(&c).unwrap(), AccessRight::NoAccess);
}

#[test]
fn test_remove_member_hands_back_handle() {
    let engine = AccessEngine::default();
    engine.load(default_read).unwrap();
    let m = engine.add_member("DEFAULT").unwrap();
    let c1 = engine.add_client(&m, "a", "h", 0).unwrap();
    let c2 = engine.add_client(&m, "b", "h", 0).unwrap();

    let err = engine.remove_member(m).unwrap_err();
    assert!(matches!(
        &err,
        RemoveMemberError::StillHasClients(StillHasClients { clients: 2, .. })
    ));
    let m = err.into_handle();
    assert_eq!(engine.member_client_count(&m).unwrap(), 2);

    engine.remove_client(c1).unwrap();
    engine.remove_client(c2).unwrap();
    engine.remove_member(m).unwrap();
}

#[test]
fn test_removed_client_stops_resolving() {
    let engine = AccessEngine::default();
    engine.load(default_read).unwrap();
    let m = engine.add_member("DEFAULT").unwrap();
    let c = engine.add_client(&m, "a", "h", 0).unwrap();
    let key = c.key();
    engine.remove_client(c).unwrap();
    let again = engine.add_client(&m, "a", "h", 0).unwrap();
    assert_ne!(again.key(), key);
    assert_eq!(engine.member_client_count(&m).unwrap(), 1);
}

#[derive(Default)]
struct TrapLog {
    events: Mutex<Vec<String>>,
}

impl TrapWriteListener for TrapLog {
    fn before_write(&self, m: &TrapWriteMessage) {
        self.events
            .lock()
            .push(format!("before {} {} {} {}", m.user, m.host, m.group, m.element_count));
    }

    fn after_write(&self, m: &TrapWriteMessage) {
        self.events.lock().push(format!("after {}", m.user));
    }
}

#[test]
fn test_trap_write() {
    let engine = AccessEngine::default();
    engine
        .load(|b| {
            let ops = b.add_user_group("ops")?;
            b.add_user(ops, "bob")?;
            let rf = b.add_resource_group("RF")?;
            let rule = b.add_rule(rf, AccessRight::Write, 1)?;
            b.set_rule_trap(rule, true)?;
            b.rule_add_user_group(rule, "ops")?;
            b.add_rule(rf, AccessRight::Write, 1)?;
            Ok(())
        })
        .unwrap();
    let m = engine.add_member("RF").unwrap();
    let bob = engine.add_client(&m, "bob", "opi1", 1).unwrap();
    let eve = engine.add_client(&m, "eve", "opi1", 1).unwrap();
    assert!(engine.client_trap_on_write(&bob).unwrap());
    assert!(!engine.client_trap_on_write(&eve).unwrap());

    // nobody listening yet
    assert!(engine.trap_write(&bob, 1).unwrap().is_none());

    let log = Arc::new(TrapLog::default());
    let id = engine.add_trap_listener(log.clone());
    {
        let guard = engine.trap_write(&bob, 4).unwrap();
        assert!(guard.is_some());
        assert!(engine.trap_write(&eve, 1).unwrap().is_none());
    }
    assert_eq!(
        *log.events.lock(),
        vec!["before bob opi1 RF 4".to_string(), "after bob".to_string()]
    );

    assert!(engine.remove_trap_listener(id));
    assert!(engine.trap_write(&bob, 1).unwrap().is_none());
}

#[test]
fn test_compute_all_after_input_change() {
    let engine = AccessEngine::default();
    engine
        .load(|b| {
            let rf = b.add_resource_group("RF")?;
            b.add_input(rf, 'C', "rf:mode")?;
            let rule = b.add_rule(rf, AccessRight::Read, 1)?;
            b.rule_set_condition(rule, "C=2 ? 1 : 0")?;
            Ok(())
        })
        .unwrap();
    let m = engine.add_member("RF").unwrap();
    let c = engine.add_client(&m, "u", "h", 1).unwrap();
    engine.set_input("RF", 'C', 2.0).unwrap();
    assert_eq!(engine.compute_all(), 1);
    assert!(engine.can_read(&c));
    assert_eq!(engine.compute_group("RF"), Ok(1));
    assert_eq!(
        engine.compute_group("VAC"),
        Err(AccessError::UnknownResourceGroup("VAC".into()))
    );
}
