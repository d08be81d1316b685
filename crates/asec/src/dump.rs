// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Text dump of the live configuration.
//!
//! ```text
//! UAG(ops) {alice,bob}
//! HAG(consoles) {opi1,opi2}
//! No IPAGs
//! ASG(RF) {
//!     INPA(rf:ready)   VALID value=1.000000
//!     RULE(1,WRITE,TRAPWRITE) {
//!         UAG(ops)
//!         CALC("A=1") result=TRUE
//!     }
//!     MEMBERLIST
//!         RF:CAV1
//!             bob opi1 ASL1 WRITE TRAPWRITE
//! }
//! ```
//!
//! Inputs values, condition results and member lists appear only in verbose
//! mode. Nothing is written while the engine is inactive.

use std::io::{self, Write};

use crate::asg::ResourceGroup;
use crate::calc::input_letter;
use crate::engine::{AccessEngine, EngineState};
use crate::generation::Generation;
use crate::groups::GroupRegistry;
use crate::rules::Rule;

fn trap_name(trap: bool) -> &'static str {
    if trap {
        "TRAPWRITE"
    } else {
        "NOTRAPWRITE"
    }
}

fn selected(filter: Option<&str>, name: &str) -> bool {
    filter.map_or(true, |f| f == name)
}

fn write_list<W: Write, T: std::fmt::Display>(
    w: &mut W,
    label: &str,
    name: &str,
    items: &[T],
) -> io::Result<()> {
    write!(w, "{}({})", label, name)?;
    if !items.is_empty() {
        let joined: Vec<String> = items.iter().map(ToString::to_string).collect();
        write!(w, " {{{}}}", joined.join(","))?;
    }
    writeln!(w)
}

fn write_user_groups<W: Write>(w: &mut W, reg: &GroupRegistry, filter: Option<&str>) -> io::Result<()> {
    if reg.user_groups().next().is_none() {
        return writeln!(w, "No UAGs");
    }
    for group in reg.user_groups().filter(|g| selected(filter, g.name())) {
        write_list(w, "UAG", group.name(), group.users())?;
    }
    Ok(())
}

fn write_host_groups<W: Write>(w: &mut W, reg: &GroupRegistry, filter: Option<&str>) -> io::Result<()> {
    if reg.host_groups().next().is_none() {
        return writeln!(w, "No HAGs");
    }
    for group in reg.host_groups().filter(|g| selected(filter, g.name())) {
        write_list(w, "HAG", group.name(), group.hosts())?;
    }
    Ok(())
}

fn write_ip_groups<W: Write>(w: &mut W, reg: &GroupRegistry, filter: Option<&str>) -> io::Result<()> {
    if reg.ip_groups().next().is_none() {
        return writeln!(w, "No IPAGs");
    }
    for group in reg.ip_groups().filter(|g| selected(filter, g.name())) {
        write_list(w, "IPAG", group.name(), group.addrs())?;
    }
    Ok(())
}

fn write_rule<W: Write>(w: &mut W, rule: &Rule, reg: &GroupRegistry, verbose: bool) -> io::Result<()> {
    write!(
        w,
        "\tRULE({},{},{})",
        rule.level(),
        rule.access(),
        trap_name(rule.trap_on_write())
    )?;

    let uags: Vec<&str> = rule
        .user_groups()
        .iter()
        .filter_map(|&id| reg.user_group(id).map(|g| g.name()))
        .collect();
    let hags: Vec<&str> = rule
        .host_groups()
        .iter()
        .filter_map(|&id| reg.host_group(id).map(|g| g.name()))
        .collect();
    let ipags: Vec<&str> = rule
        .ip_groups()
        .iter()
        .filter_map(|&id| reg.ip_group(id).map(|g| g.name()))
        .collect();

    let has_body =
        !uags.is_empty() || !hags.is_empty() || !ipags.is_empty() || rule.condition().is_some();
    if !has_body {
        return writeln!(w);
    }
    writeln!(w, " {{")?;
    for (label, names) in [("UAG", &uags), ("HAG", &hags), ("IPAG", &ipags)] {
        if !names.is_empty() {
            writeln!(w, "\t\t{}({})", label, names.join(","))?;
        }
    }
    if let Some(cond) = rule.condition() {
        write!(w, "\t\tCALC(\"{}\")", cond.program().source())?;
        if verbose {
            let result = if cond.last_result() { "TRUE" } else { "FALSE" };
            write!(w, " result={}", result)?;
        }
        writeln!(w)?;
    }
    writeln!(w, "\t}}")
}

fn write_members<W: Write>(w: &mut W, group: &ResourceGroup, state: &EngineState) -> io::Result<()> {
    let mut members = group.members().peekable();
    if members.peek().is_none() {
        return Ok(());
    }
    writeln!(w, "\tMEMBERLIST")?;
    for key in members {
        let Some(member) = state.members.get(key.0) else {
            continue;
        };
        if member.asg_name.is_empty() {
            writeln!(w, "\t\t<null>")?;
        } else {
            writeln!(w, "\t\t{}", member.asg_name)?;
        }
        for client in member.clients.iter().filter_map(|c| state.clients.get(c.0)) {
            write!(w, "\t\t\t {} {}", client.user, client.host)?;
            if let Some(ip) = client.ip {
                write!(w, " {}", ip)?;
            }
            writeln!(
                w,
                " ASL{} {} {}",
                client.level,
                client.access,
                trap_name(client.trap_on_write)
            )?;
        }
    }
    Ok(())
}

fn write_resource_group<W: Write>(
    w: &mut W,
    group: &ResourceGroup,
    generation: &Generation,
    state: &EngineState,
    verbose: bool,
) -> io::Result<()> {
    write!(w, "ASG({})", group.name())?;
    let has_body = !group.is_empty() || (verbose && group.member_count() > 0);
    if !has_body {
        return writeln!(w);
    }
    writeln!(w, " {{")?;

    for (index, source) in group.declared_inputs() {
        let letter = input_letter(index).unwrap_or('?');
        write!(w, "\tINP{}({})", letter, source)?;
        if verbose {
            let validity = if group.bad_mask().contains(index) {
                " INVALID"
            } else {
                "   VALID"
            };
            let value = group.input_value(index).unwrap_or_default();
            write!(w, "{} value={:.6}", validity, value)?;
        }
        writeln!(w)?;
    }
    for rule in group.rules() {
        write_rule(w, rule, generation.registry(), verbose)?;
    }
    if verbose {
        write_members(w, group, state)?;
    }
    writeln!(w, "}}")
}

fn write_resource_groups<W: Write>(
    w: &mut W,
    state: &EngineState,
    filter: Option<&str>,
    verbose: bool,
) -> io::Result<()> {
    let Some(generation) = &state.generation else {
        return Ok(());
    };
    for group in generation
        .resource_groups()
        .filter(|g| selected(filter, g.name()))
    {
        write_resource_group(w, group, generation, state, verbose)?;
    }
    Ok(())
}

impl AccessEngine {
    /// Render into a buffer under the lock, then hand it to `w` once the
    /// lock is released, so a writer may call back into the engine.
    fn render<W: Write>(
        &self,
        w: &mut W,
        f: impl FnOnce(&mut Vec<u8>, &EngineState) -> io::Result<()>,
    ) -> io::Result<()> {
        let mut buf = Vec::new();
        self.read_state(|state| f(&mut buf, state))?;
        w.write_all(&buf)
    }

    /// Dump the whole live configuration: user groups, host groups, IP
    /// groups, then resource groups.
    pub fn dump<W: Write>(&self, w: &mut W, verbose: bool) -> io::Result<()> {
        self.render(w, |buf, state| {
            let Some(generation) = &state.generation else {
                return Ok(());
            };
            let reg = generation.registry();
            write_user_groups(buf, reg, None)?;
            write_host_groups(buf, reg, None)?;
            write_ip_groups(buf, reg, None)?;
            write_resource_groups(buf, state, None, verbose)
        })
    }

    /// Dump user groups, or only `name`.
    pub fn dump_user_groups<W: Write>(&self, w: &mut W, name: Option<&str>) -> io::Result<()> {
        self.render(w, |buf, state| match &state.generation {
            Some(generation) => write_user_groups(buf, generation.registry(), name),
            None => Ok(()),
        })
    }

    pub fn dump_host_groups<W: Write>(&self, w: &mut W, name: Option<&str>) -> io::Result<()> {
        self.render(w, |buf, state| match &state.generation {
            Some(generation) => write_host_groups(buf, generation.registry(), name),
            None => Ok(()),
        })
    }

    pub fn dump_ip_groups<W: Write>(&self, w: &mut W, name: Option<&str>) -> io::Result<()> {
        self.render(w, |buf, state| match &state.generation {
            Some(generation) => write_ip_groups(buf, generation.registry(), name),
            None => Ok(()),
        })
    }

    /// Dump resource groups, or only `name`.
    pub fn dump_resource_groups<W: Write>(
        &self,
        w: &mut W,
        name: Option<&str>,
        verbose: bool,
    ) -> io::Result<()> {
        self.render(w, |buf, state| write_resource_groups(buf, state, name, verbose))
    }
}
