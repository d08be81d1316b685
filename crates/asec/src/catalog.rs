// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Name-keyed collection with stable ids and alphabetic iteration.
//!
//! Entries are stored in insertion order so the ids handed out by the
//! builder never move; a separate index vector is kept sorted by name for
//! lookups and for dump order.

use crate::error::LoadError;

pub(crate) trait Named {
    fn name(&self) -> &str;
}

#[derive(Debug, Clone)]
pub(crate) struct Catalog<T> {
    items: Vec<T>,
    order: Vec<usize>,
}

impl<T> Default for Catalog<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            order: Vec::new(),
        }
    }
}

impl<T: Named> Catalog<T> {
    fn search(&self, name: &str) -> Result<usize, usize> {
        self.order
            .binary_search_by(|&i| self.items[i].name().cmp(name))
    }

    /// Insert at its alphabetic position. `Ok(None)` means the name is taken.
    pub fn insert(&mut self, item: T) -> Result<Option<usize>, LoadError> {
        let slot = match self.search(item.name()) {
            Ok(_) => return Ok(None),
            Err(slot) => slot,
        };
        self.items.try_reserve(1)?;
        self.order.try_reserve(1)?;
        let id = self.items.len();
        self.items.push(item);
        self.order.insert(slot, id);
        Ok(Some(id))
    }

    pub fn find(&self, name: &str) -> Option<usize> {
        self.search(name).ok().map(|pos| self.order[pos])
    }

    pub fn get(&self, id: usize) -> Option<&T> {
        self.items.get(id)
    }

    pub fn get_mut(&mut self, id: usize) -> Option<&mut T> {
        self.items.get_mut(id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// `(id, item)` pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &T)> {
        self.order.iter().map(move |&i| (i, &self.items[i]))
    }

    /// Items in name order.
    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.order.iter().map(move |&i| &self.items[i])
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.items.iter_mut()
    }
}
