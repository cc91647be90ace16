//! Subkey index operations over `ListCell`.
//!
//! A key's children hang off one list cell. Small sets live in a single
//! hashed leaf sorted by name. Once a leaf holds `max_leaf_entries` entries
//! the next link splits it: a top-level leaf becomes two halves under a new
//! `ri` root, and a full leaf already under an `ri` is split in place with
//! its right half inserted as the following partition.
//!
//! Lists move when they grow, and move to a smaller cell when an unlink
//! leaves them over-allocated, so `link_sub_key` returns the list's index
//! and `unlink_sub_key` returns a [`ListUpdate`]; callers must store what they
//! get back. Emptied lists are reported, not freed: the owner frees them.

use std::cmp::Ordering;
use std::io::{Read, Seek, Write};

use tracing::{debug, trace};

use crate::cell::{
    CellCodec, HashKind, HashedEntry, HashedListCell, IndirectKind, IndirectListCell, KeyNodeCell,
    ListCell,
};
use crate::error::{HiveError, HiveResult};
use crate::format::{round_up, CELL_ALIGNMENT};
use crate::hive::Hive;
use crate::names;

/// Where a name falls relative to a list's contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPosition {
    /// Present; the child key's cell index
    Found(u32),
    /// Sorts before every entry
    Before,
    /// Absent but inside the list's range
    Within,
    /// Sorts after every entry (or the list is empty)
    After,
}

impl KeyPosition {
    /// The child's index when found.
    pub fn found(self) -> Option<u32> {
        match self {
            KeyPosition::Found(index) => Some(index),
            _ => None,
        }
    }
}

/// Result of unlinking a child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListUpdate {
    /// The list's index after the update
    pub index: u32,
    /// The list holds no entries any more and should be freed by its owner
    pub is_empty: bool,
}

fn child_name<S: Read + Write + Seek>(hive: &mut Hive<S>, key_index: u32) -> HiveResult<String> {
    Ok(hive.get_cell::<KeyNodeCell>(key_index)?.name)
}

/// Position of `name` among key cells sorted by name.
fn search_sorted<S: Read + Write + Seek>(
    hive: &mut Hive<S>,
    keys: &[u32],
    name: &str,
) -> HiveResult<KeyPosition> {
    let (Some(&first), Some(&last)) = (keys.first(), keys.last()) else {
        return Ok(KeyPosition::After);
    };
    match names::compare(name, &child_name(hive, first)?) {
        Ordering::Less => return Ok(KeyPosition::Before),
        Ordering::Equal => return Ok(KeyPosition::Found(first)),
        Ordering::Greater => {}
    }
    match names::compare(name, &child_name(hive, last)?) {
        Ordering::Greater => return Ok(KeyPosition::After),
        Ordering::Equal => return Ok(KeyPosition::Found(last)),
        Ordering::Less => {}
    }

    let (mut lo, mut hi) = (0usize, keys.len());
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        match names::compare(name, &child_name(hive, keys[mid])?) {
            Ordering::Less => hi = mid,
            Ordering::Greater => lo = mid + 1,
            Ordering::Equal => return Ok(KeyPosition::Found(keys[mid])),
        }
    }
    Ok(KeyPosition::Within)
}

/// Index of the first key whose name sorts after `name`.
fn insertion_point<S: Read + Write + Seek>(
    hive: &mut Hive<S>,
    keys: &[u32],
    name: &str,
) -> HiveResult<usize> {
    for (i, &key) in keys.iter().enumerate() {
        if names::compare(&child_name(hive, key)?, name) == Ordering::Greater {
            return Ok(i);
        }
    }
    Ok(keys.len())
}

/// Rewrite a list that just lost an entry. A list left in a cell larger
/// than it needs moves to a right-sized one, so growth followed by shrink
/// hands the space back.
fn store_shrunk<S: Read + Write + Seek, C: CellCodec>(
    hive: &mut Hive<S>,
    index: u32,
    list: &C,
) -> HiveResult<u32> {
    let needed = round_up(list.serialized_size() + 4, CELL_ALIGNMENT);
    if needed >= hive.allocated_size(index)? {
        return hive.update_cell(Some(index), list, true);
    }
    let moved = hive.update_cell(None, list, true)?;
    hive.free_cell(index)?;
    trace!(from = index, to = moved, size = needed, "subkeys.shrink");
    Ok(moved)
}

impl HashedListCell {
    fn keys(&self) -> Vec<u32> {
        self.entries.iter().map(|e| e.key_index).collect()
    }

    fn find<S: Read + Write + Seek>(
        &self,
        hive: &mut Hive<S>,
        name: &str,
    ) -> HiveResult<KeyPosition> {
        if self.kind == HashKind::Lf {
            return search_sorted(hive, &self.keys(), name);
        }

        let (Some(first), Some(last)) = (self.entries.first(), self.entries.last()) else {
            return Ok(KeyPosition::After);
        };
        if names::compare(name, &child_name(hive, first.key_index)?) == Ordering::Less {
            return Ok(KeyPosition::Before);
        }
        if names::compare(name, &child_name(hive, last.key_index)?) == Ordering::Greater {
            return Ok(KeyPosition::After);
        }
        let hash = self.kind.hash(name);
        for entry in self.entries.iter().filter(|e| e.hash == hash) {
            if names::eq_ignore_case(&child_name(hive, entry.key_index)?, name) {
                return Ok(KeyPosition::Found(entry.key_index));
            }
        }
        Ok(KeyPosition::Within)
    }

    fn insert<S: Read + Write + Seek>(
        &mut self,
        hive: &mut Hive<S>,
        name: &str,
        key_index: u32,
    ) -> HiveResult<()> {
        let at = insertion_point(hive, &self.keys(), name)?;
        self.entries.insert(at, HashedEntry { key_index, hash: self.kind.hash(name) });
        Ok(())
    }

    fn remove<S: Read + Write + Seek>(
        &mut self,
        hive: &mut Hive<S>,
        name: &str,
    ) -> HiveResult<bool> {
        let hash = self.kind.hash(name);
        for i in 0..self.entries.len() {
            let entry = self.entries[i];
            if self.kind == HashKind::Lh && entry.hash != hash {
                continue;
            }
            if names::eq_ignore_case(&child_name(hive, entry.key_index)?, name) {
                self.entries.remove(i);
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Split into two halves sorted the same way.
    fn split(mut self) -> (HashedListCell, HashedListCell) {
        let right = self.entries.split_off(self.entries.len() / 2);
        let kind = self.kind;
        (self, HashedListCell { kind, entries: right })
    }
}

impl ListCell {
    /// Create a one-entry leaf for a key's first child and return its index.
    pub fn create<S: Read + Write + Seek>(
        hive: &mut Hive<S>,
        name: &str,
        key_index: u32,
    ) -> HiveResult<u32> {
        let kind = if hive.uses_lh_leaves() { HashKind::Lh } else { HashKind::Lf };
        let leaf = HashedListCell {
            kind,
            entries: vec![HashedEntry { key_index, hash: kind.hash(name) }],
        };
        hive.update_cell(None, &leaf, true)
    }

    /// Number of child keys reachable from this list.
    pub fn count<S: Read + Write + Seek>(&self, hive: &mut Hive<S>) -> HiveResult<u32> {
        match self {
            ListCell::Hashed(list) => Ok(list.entries.len() as u32),
            ListCell::Indirect(list) if list.kind == IndirectKind::Li => {
                Ok(list.indices.len() as u32)
            }
            ListCell::Indirect(list) => {
                let mut total = 0;
                for &partition in &list.indices {
                    total += hive.get_cell::<ListCell>(partition)?.count(hive)?;
                }
                Ok(total)
            }
        }
    }

    /// Locate `name` among this list's children.
    pub fn find_key<S: Read + Write + Seek>(
        &self,
        hive: &mut Hive<S>,
        name: &str,
    ) -> HiveResult<KeyPosition> {
        match self {
            ListCell::Hashed(list) => list.find(hive, name),
            ListCell::Indirect(list) if list.kind == IndirectKind::Li => {
                search_sorted(hive, &list.indices, name)
            }
            ListCell::Indirect(list) => {
                for (slot, &partition) in list.indices.iter().enumerate() {
                    let position = hive.get_cell::<ListCell>(partition)?.find_key(hive, name)?;
                    match position {
                        KeyPosition::After => continue,
                        KeyPosition::Before if slot == 0 => return Ok(KeyPosition::Before),
                        KeyPosition::Before => return Ok(KeyPosition::Within),
                        other => return Ok(other),
                    }
                }
                Ok(KeyPosition::After)
            }
        }
    }

    /// Child key cell indices in name order.
    pub fn enumerate_keys<S: Read + Write + Seek>(
        &self,
        hive: &mut Hive<S>,
    ) -> HiveResult<Vec<u32>> {
        match self {
            ListCell::Hashed(list) => Ok(list.keys()),
            ListCell::Indirect(list) if list.kind == IndirectKind::Li => Ok(list.indices.clone()),
            ListCell::Indirect(list) => {
                let mut keys = Vec::new();
                for &partition in &list.indices {
                    keys.extend(hive.get_cell::<ListCell>(partition)?.enumerate_keys(hive)?);
                }
                Ok(keys)
            }
        }
    }

    /// Partition of an `ri` that should hold `name`: the first one whose range
    /// does not end before it, else the last.
    fn route<S: Read + Write + Seek>(
        hive: &mut Hive<S>,
        partitions: &[u32],
        name: &str,
    ) -> HiveResult<usize> {
        for (slot, &partition) in partitions.iter().enumerate() {
            if hive.get_cell::<ListCell>(partition)?.find_key(hive, name)? != KeyPosition::After {
                return Ok(slot);
            }
        }
        Ok(partitions.len().saturating_sub(1))
    }

    /// Add `key_index` under `name`. Returns this list's (possibly new) index.
    pub fn link_sub_key<S: Read + Write + Seek>(
        self,
        hive: &mut Hive<S>,
        self_index: u32,
        name: &str,
        key_index: u32,
    ) -> HiveResult<u32> {
        let max_entries = hive.config().max_leaf_entries;
        match self {
            ListCell::Hashed(mut leaf) => {
                leaf.insert(hive, name, key_index)?;
                if leaf.entries.len() <= max_entries {
                    return hive.update_cell(Some(self_index), &leaf, true);
                }

                let entries = leaf.entries.len();
                let (left, right) = leaf.split();
                let left_index = hive.update_cell(None, &left, true)?;
                let right_index = hive.update_cell(None, &right, true)?;
                let root = IndirectListCell {
                    kind: IndirectKind::Ri,
                    indices: vec![left_index, right_index],
                };
                let root_index = hive.update_cell(None, &root, true)?;
                hive.free_cell(self_index)?;
                debug!(
                    entries,
                    left = left_index,
                    right = right_index,
                    root = root_index,
                    "subkeys.split"
                );
                Ok(root_index)
            }
            ListCell::Indirect(mut list) if list.kind == IndirectKind::Li => {
                let at = insertion_point(hive, &list.indices, name)?;
                list.indices.insert(at, key_index);
                hive.update_cell(Some(self_index), &list, true)
            }
            ListCell::Indirect(mut list) => {
                if list.indices.is_empty() {
                    let leaf = ListCell::create(hive, name, key_index)?;
                    list.indices.push(leaf);
                    return hive.update_cell(Some(self_index), &list, true);
                }

                let slot = Self::route(hive, &list.indices, name)?;
                let partition_index = list.indices[slot];
                match hive.get_cell::<ListCell>(partition_index)? {
                    ListCell::Hashed(mut leaf) if leaf.entries.len() >= max_entries => {
                        leaf.insert(hive, name, key_index)?;
                        let entries = leaf.entries.len();
                        let (left, right) = leaf.split();
                        let left_index = hive.update_cell(Some(partition_index), &left, true)?;
                        let right_index = hive.update_cell(None, &right, true)?;
                        list.indices[slot] = left_index;
                        list.indices.insert(slot + 1, right_index);
                        debug!(
                            entries,
                            left = left_index,
                            right = right_index,
                            root = self_index,
                            "subkeys.split"
                        );
                    }
                    partition => {
                        list.indices[slot] =
                            partition.link_sub_key(hive, partition_index, name, key_index)?;
                    }
                }
                hive.update_cell(Some(self_index), &list, true)
            }
        }
    }

    /// Remove the child called `name`.
    pub fn unlink_sub_key<S: Read + Write + Seek>(
        self,
        hive: &mut Hive<S>,
        self_index: u32,
        name: &str,
    ) -> HiveResult<ListUpdate> {
        let not_found = || HiveError::KeyNotFound { name: name.to_string() };
        match self {
            ListCell::Hashed(mut leaf) => {
                if !leaf.remove(hive, name)? {
                    return Err(not_found());
                }
                if leaf.entries.is_empty() {
                    return Ok(ListUpdate { index: self_index, is_empty: true });
                }
                let index = store_shrunk(hive, self_index, &leaf)?;
                Ok(ListUpdate { index, is_empty: false })
            }
            ListCell::Indirect(mut list) if list.kind == IndirectKind::Li => {
                let KeyPosition::Found(key_index) = search_sorted(hive, &list.indices, name)? else {
                    return Err(not_found());
                };
                list.indices.retain(|&k| k != key_index);
                if list.indices.is_empty() {
                    return Ok(ListUpdate { index: self_index, is_empty: true });
                }
                let index = store_shrunk(hive, self_index, &list)?;
                Ok(ListUpdate { index, is_empty: false })
            }
            ListCell::Indirect(mut list) => {
                let mut target = None;
                for (slot, &partition) in list.indices.iter().enumerate() {
                    let cell = hive.get_cell::<ListCell>(partition)?;
                    if let KeyPosition::Found(_) = cell.find_key(hive, name)? {
                        target = Some((slot, partition, cell));
                        break;
                    }
                }
                let Some((slot, partition_index, partition)) = target else {
                    return Err(not_found());
                };

                let update = partition.unlink_sub_key(hive, partition_index, name)?;
                if update.is_empty {
                    hive.free_cell(update.index)?;
                    list.indices.remove(slot);
                } else {
                    list.indices[slot] = update.index;
                }

                if list.indices.is_empty() {
                    return Ok(ListUpdate { index: self_index, is_empty: true });
                }
                let index = store_shrunk(hive, self_index, &list)?;
                Ok(ListUpdate { index, is_empty: false })
            }
        }
    }

    /// Free this list and every list below it. Key cells are left alone.
    pub fn free<S: Read + Write + Seek>(
        self,
        hive: &mut Hive<S>,
        self_index: u32,
    ) -> HiveResult<()> {
        if let ListCell::Indirect(list) = &self {
            if list.kind == IndirectKind::Ri {
                for &partition in &list.indices {
                    hive.get_cell::<ListCell>(partition)?.free(hive, partition)?;
                }
            }
        }
        hive.free_cell(self_index)
    }
}
