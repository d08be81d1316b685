// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! User, host and IP groups.
//!
//! Groups are kept in alphabetic order as they are declared. Membership is
//! answered from a hash index built once by [`GroupRegistry::seal`] after the
//! last builder call; duplicate entries inside a group are dropped at that
//! point with a warning, keeping the first occurrence.
//!
//! Host entries are canonicalized when they are added, never at lookup:
//! lower-cased hostnames by default, resolved IPv4 dotted quads in strict
//! mode. A host that cannot be resolved is stored as `unresolved:<host>` so
//! it can never match a client.

use std::collections::HashMap;
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, ToSocketAddrs};
use std::sync::Arc;

use crate::catalog::{Catalog, Named};
use crate::config::UNRESOLVED_HOST_PREFIX;
use crate::error::{GroupKind, LoadError};

// ---------------------------------------------------------------------------
// Host canonicalization
// ---------------------------------------------------------------------------

/// Name service used in strict host mode.
pub trait HostResolver: Send + Sync {
    fn resolve_ipv4(&self, host: &str) -> Option<Ipv4Addr>;
}

/// Resolver backed by the system name service.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemResolver;

impl HostResolver for SystemResolver {
    fn resolve_ipv4(&self, host: &str) -> Option<Ipv4Addr> {
        if let Ok(ip) = host.parse::<Ipv4Addr>() {
            return Some(ip);
        }
        (host, 0)
            .to_socket_addrs()
            .ok()?
            .find_map(|addr| match addr {
                SocketAddr::V4(v4) => Some(*v4.ip()),
                SocketAddr::V6(_) => None,
            })
    }
}

/// Turns configured host names into the form clients are matched against.
#[derive(Clone)]
pub struct HostCanonicalizer {
    strict: bool,
    resolver: Arc<dyn HostResolver>,
}

impl HostCanonicalizer {
    pub fn new(strict: bool, resolver: Arc<dyn HostResolver>) -> Self {
        Self { strict, resolver }
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    pub fn canonicalize(&self, host: &str) -> String {
        if !self.strict {
            return host.to_ascii_lowercase();
        }
        match self.resolver.resolve_ipv4(host) {
            Some(ip) => ip.to_string(),
            None => {
                log::warn!("HAG host '{}' could not be resolved", host);
                format!("{}{}", UNRESOLVED_HOST_PREFIX, host)
            }
        }
    }
}

impl Default for HostCanonicalizer {
    fn default() -> Self {
        Self::new(false, Arc::new(SystemResolver))
    }
}

impl fmt::Debug for HostCanonicalizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostCanonicalizer")
            .field("strict", &self.strict)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

/// Handle to a user group (UAG) within one generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UserGroupId(pub(crate) usize);

/// Handle to a host group (HAG) within one generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HostGroupId(pub(crate) usize);

/// Handle to an IP group (IPAG) within one generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IpGroupId(pub(crate) usize);

/// Any named group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupRef {
    User(UserGroupId),
    Host(HostGroupId),
    Ip(IpGroupId),
}

#[derive(Debug, Clone)]
pub struct UserGroup {
    name: String,
    users: Vec<String>,
}

impl UserGroup {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn users(&self) -> &[String] {
        &self.users
    }
}

impl Named for UserGroup {
    fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Clone)]
pub struct HostGroup {
    name: String,
    hosts: Vec<String>,
}

impl HostGroup {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Canonicalized host identifiers.
    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }
}

impl Named for HostGroup {
    fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Clone)]
pub struct IpGroup {
    name: String,
    addrs: Vec<Ipv4Addr>,
}

impl IpGroup {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn addrs(&self) -> &[Ipv4Addr] {
        &self.addrs
    }
}

impl Named for IpGroup {
    fn name(&self) -> &str {
        &self.name
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct GroupRegistry {
    users: Catalog<UserGroup>,
    hosts: Catalog<HostGroup>,
    ips: Catalog<IpGroup>,
    canonicalizer: HostCanonicalizer,
    /// user or host name -> groups listing it
    name_index: HashMap<String, Vec<GroupRef>>,
    ip_index: HashMap<Ipv4Addr, Vec<IpGroupId>>,
}

impl GroupRegistry {
    pub fn new(canonicalizer: HostCanonicalizer) -> Self {
        Self {
            canonicalizer,
            ..Self::default()
        }
    }

    pub fn add_user_group(&mut self, name: &str) -> Result<UserGroupId, LoadError> {
        let group = UserGroup {
            name: name.to_string(),
            users: Vec::new(),
        };
        match self.users.insert(group)? {
            Some(id) => Ok(UserGroupId(id)),
            None => Err(LoadError::DuplicateGroup {
                kind: GroupKind::User,
                name: name.to_string(),
            }),
        }
    }

    pub fn add_user(&mut self, group: UserGroupId, user: &str) -> Result<(), LoadError> {
        let group = self.users.get_mut(group.0).ok_or(LoadError::BadHandle)?;
        group.users.try_reserve(1)?;
        group.users.push(user.to_string());
        Ok(())
    }

    pub fn add_host_group(&mut self, name: &str) -> Result<HostGroupId, LoadError> {
        let group = HostGroup {
            name: name.to_string(),
            hosts: Vec::new(),
        };
        match self.hosts.insert(group)? {
            Some(id) => Ok(HostGroupId(id)),
            None => Err(LoadError::DuplicateGroup {
                kind: GroupKind::Host,
                name: name.to_string(),
            }),
        }
    }

    /// Add a host, canonicalized according to the registry's host mode.
    pub fn add_host(&mut self, group: HostGroupId, host: &str) -> Result<(), LoadError> {
        let canonical = self.canonicalizer.canonicalize(host);
        let group = self.hosts.get_mut(group.0).ok_or(LoadError::BadHandle)?;
        group.hosts.try_reserve(1)?;
        group.hosts.push(canonical);
        Ok(())
    }

    pub fn add_ip_group(&mut self, name: &str) -> Result<IpGroupId, LoadError> {
        let group = IpGroup {
            name: name.to_string(),
            addrs: Vec::new(),
        };
        match self.ips.insert(group)? {
            Some(id) => Ok(IpGroupId(id)),
            None => Err(LoadError::DuplicateGroup {
                kind: GroupKind::Ip,
                name: name.to_string(),
            }),
        }
    }

    pub fn add_ip(&mut self, group: IpGroupId, addr: &str) -> Result<(), LoadError> {
        let ip: Ipv4Addr = addr.trim().parse().map_err(|_| LoadError::BadAddress {
            text: addr.to_string(),
        })?;
        let group = self.ips.get_mut(group.0).ok_or(LoadError::BadHandle)?;
        group.addrs.try_reserve(1)?;
        group.addrs.push(ip);
        Ok(())
    }

    /// Look a group up by name: user groups first, then host, then IP groups.
    pub fn find(&self, name: &str) -> Option<GroupRef> {
        self.find_user_group(name)
            .map(GroupRef::User)
            .or_else(|| self.find_host_group(name).map(GroupRef::Host))
            .or_else(|| self.find_ip_group(name).map(GroupRef::Ip))
    }

    pub fn find_user_group(&self, name: &str) -> Option<UserGroupId> {
        self.users.find(name).map(UserGroupId)
    }

    pub fn find_host_group(&self, name: &str) -> Option<HostGroupId> {
        self.hosts.find(name).map(HostGroupId)
    }

    pub fn find_ip_group(&self, name: &str) -> Option<IpGroupId> {
        self.ips.find(name).map(IpGroupId)
    }

    pub fn user_group(&self, id: UserGroupId) -> Option<&UserGroup> {
        self.users.get(id.0)
    }

    pub fn host_group(&self, id: HostGroupId) -> Option<&HostGroup> {
        self.hosts.get(id.0)
    }

    pub fn ip_group(&self, id: IpGroupId) -> Option<&IpGroup> {
        self.ips.get(id.0)
    }

    /// User groups in name order.
    pub fn user_groups(&self) -> impl Iterator<Item = &UserGroup> {
        self.users.values()
    }

    pub fn host_groups(&self) -> impl Iterator<Item = &HostGroup> {
        self.hosts.values()
    }

    pub fn ip_groups(&self) -> impl Iterator<Item = &IpGroup> {
        self.ips.values()
    }

    pub fn canonicalizer(&self) -> &HostCanonicalizer {
        &self.canonicalizer
    }

    /// Build the membership index. Called once, after the last builder call.
    pub fn seal(&mut self) -> Result<(), LoadError> {
        let mut name_index: HashMap<String, Vec<GroupRef>> = HashMap::new();
        let mut ip_index: HashMap<Ipv4Addr, Vec<IpGroupId>> = HashMap::new();

        for (id, group) in self.users.iter() {
            for user in &group.users {
                name_index
                    .entry(user.clone())
                    .or_default()
                    .push(GroupRef::User(UserGroupId(id)));
            }
        }
        for (id, group) in self.hosts.iter() {
            // unresolved entries stay listed but never match a client
            for host in group
                .hosts
                .iter()
                .filter(|h| !h.starts_with(UNRESOLVED_HOST_PREFIX))
            {
                name_index
                    .entry(host.clone())
                    .or_default()
                    .push(GroupRef::Host(HostGroupId(id)));
            }
        }
        for (id, group) in self.ips.iter() {
            for ip in &group.addrs {
                ip_index.entry(*ip).or_default().push(IpGroupId(id));
            }
        }

        for refs in name_index.values_mut() {
            refs.dedup();
        }
        for ids in ip_index.values_mut() {
            ids.dedup();
        }
        self.drop_duplicate_entries();

        self.name_index = name_index;
        self.ip_index = ip_index;
        Ok(())
    }

    fn drop_duplicate_entries(&mut self) {
        fn dedup_first<T: PartialEq + fmt::Display>(kind: &str, group: &str, entries: &mut Vec<T>) {
            let mut kept: Vec<T> = Vec::with_capacity(entries.len());
            for entry in entries.drain(..) {
                if kept.contains(&entry) {
                    log::warn!("Duplicate {} '{}' in {} ignored", kind, entry, group);
                } else {
                    kept.push(entry);
                }
            }
            *entries = kept;
        }

        for group in self.users.values_mut() {
            dedup_first("user", &group.name, &mut group.users);
        }
        for group in self.hosts.values_mut() {
            dedup_first("host", &group.name, &mut group.hosts);
        }
        for group in self.ips.values_mut() {
            dedup_first("address", &group.name, &mut group.addrs);
        }
    }

    pub fn is_user_member(&self, group: UserGroupId, user: &str) -> bool {
        self.name_index
            .get(user)
            .is_some_and(|refs| refs.contains(&GroupRef::User(group)))
    }

    /// `host` must already be in canonical form.
    pub fn is_host_member(&self, group: HostGroupId, host: &str) -> bool {
        self.name_index
            .get(host)
            .is_some_and(|refs| refs.contains(&GroupRef::Host(group)))
    }

    pub fn is_ip_member(&self, group: IpGroupId, addr: Ipv4Addr) -> bool {
        self.ip_index
            .get(&addr)
            .is_some_and(|ids| ids.contains(&group))
    }
}
