//! Registry keys: the tree-mutation API.
//!
//! A [`RegistryKey`] is a cell index plus a borrow of the hive. It holds no
//! copy of its key node; every call reloads the cell, applies the change and
//! writes it back, so handles never go stale against the stream.

use std::io::{Read, Seek, Write};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::cell::{KeyFlags, KeyNodeCell, ListCell, SecurityCell, ValueCell, ValueType};
use crate::error::{HiveError, HiveResult};
use crate::format::{filetime_to_datetime, round_up, NO_CELL};
use crate::hive::Hive;
use crate::names::{self, PATH_SEPARATOR};
use crate::security;
use crate::value::{self, RegistryValue, ValueData};

/// Value lists are allocated in steps of this many bytes
const VALUE_LIST_GRANULE: usize = 16;

/// A key in an open hive.
pub struct RegistryKey<'h, S> {
    hive: &'h mut Hive<S>,
    index: u32,
}

fn find_child<S: Read + Write + Seek>(
    hive: &mut Hive<S>,
    parent: &KeyNodeCell,
    name: &str,
) -> HiveResult<Option<u32>> {
    if parent.sub_keys_index == NO_CELL {
        return Ok(None);
    }
    let list: ListCell = hive.get_cell(parent.sub_keys_index)?;
    Ok(list.find_key(hive, name)?.found())
}

/// Walk `path` below `start`.
fn resolve<S: Read + Write + Seek>(
    hive: &mut Hive<S>,
    start: u32,
    path: &str,
) -> HiveResult<Option<u32>> {
    let mut current = start;
    let mut rest = Some(path);
    while let Some(path) = rest {
        let (head, tail) = names::split_first(path);
        rest = tail;
        if head.is_empty() {
            continue;
        }
        let cell: KeyNodeCell = hive.get_cell(current)?;
        match find_child(hive, &cell, head)? {
            Some(child) => current = child,
            None => return Ok(None),
        }
    }
    Ok(Some(current))
}

fn add_child<S: Read + Write + Seek>(
    hive: &mut Hive<S>,
    parent_index: u32,
    name: &str,
) -> HiveResult<u32> {
    if !names::is_valid_component(name) {
        return Err(HiveError::InvalidName {
            name: name.to_string(),
            reason: "key names must be 1 to 255 characters without a path separator",
        });
    }
    let mut parent: KeyNodeCell = hive.get_cell(parent_index)?;

    let mut child = KeyNodeCell::new(name, parent_index);
    child.security_index = parent.security_index;
    if child.security_index != NO_CELL {
        security::add_reference(hive, child.security_index)?;
    }
    let child_index = hive.update_cell(None, &child, true)?;

    parent.sub_keys_index = if parent.sub_keys_index == NO_CELL {
        ListCell::create(hive, name, child_index)?
    } else {
        let list: ListCell = hive.get_cell(parent.sub_keys_index)?;
        list.link_sub_key(hive, parent.sub_keys_index, name, child_index)?
    };
    parent.num_sub_keys += 1;
    parent.max_sub_key_name_bytes = parent.max_sub_key_name_bytes.max(names::utf16_len(name));
    parent.touch();
    hive.update_cell(Some(parent_index), &parent, false)?;

    debug!(name, index = child_index, parent = parent_index, "key.create");
    Ok(child_index)
}

fn value_indices<S: Read + Write + Seek>(
    hive: &mut Hive<S>,
    key: &KeyNodeCell,
) -> HiveResult<Vec<u32>> {
    if key.num_values == 0 || key.value_list_index == NO_CELL {
        return Ok(Vec::new());
    }
    let len = key.num_values as usize * 4;
    let raw = hive.raw_cell_data(key.value_list_index, len)?;
    if raw.len() < len {
        return Err(HiveError::corrupt(
            key.value_list_index,
            format!("value list holds {} of {} entries", raw.len() / 4, key.num_values),
        ));
    }
    Ok(raw.chunks_exact(4).map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]])).collect())
}

/// Persist a key's value list, moving it when it outgrows its cell.
fn write_value_list<S: Read + Write + Seek>(
    hive: &mut Hive<S>,
    key: &mut KeyNodeCell,
    indices: &[u32],
) -> HiveResult<()> {
    key.num_values = indices.len() as u32;
    if indices.is_empty() {
        if key.value_list_index != NO_CELL {
            hive.free_cell(key.value_list_index)?;
        }
        key.value_list_index = NO_CELL;
        return Ok(());
    }

    let bytes: Vec<u8> = indices.iter().flat_map(|i| i.to_le_bytes()).collect();
    if key.value_list_index != NO_CELL && hive.write_raw_cell_data(key.value_list_index, &bytes)? {
        return Ok(());
    }
    let list = hive.allocate_raw_cell(round_up(bytes.len(), VALUE_LIST_GRANULE))?;
    hive.write_raw_cell_data(list, &bytes)?;
    if key.value_list_index != NO_CELL {
        hive.free_cell(key.value_list_index)?;
    }
    key.value_list_index = list;
    Ok(())
}

fn find_value<S: Read + Write + Seek>(
    hive: &mut Hive<S>,
    indices: &[u32],
    name: &str,
) -> HiveResult<Option<(usize, u32, ValueCell)>> {
    for (slot, &index) in indices.iter().enumerate() {
        let value: ValueCell = hive.get_cell(index)?;
        if names::eq_ignore_case(&value.name, name) {
            return Ok(Some((slot, index, value)));
        }
    }
    Ok(None)
}

fn free_values<S: Read + Write + Seek>(
    hive: &mut Hive<S>,
    key: &mut KeyNodeCell,
) -> HiveResult<()> {
    for index in value_indices(hive, key)? {
        let mut value: ValueCell = hive.get_cell(index)?;
        value::free_data(hive, &mut value)?;
        hive.free_cell(index)?;
    }
    write_value_list(hive, key, &[])
}

/// Unlink and free one childless subkey of `parent_index`.
fn remove_child<S: Read + Write + Seek>(
    hive: &mut Hive<S>,
    parent_index: u32,
    name: &str,
    strict: bool,
) -> HiveResult<()> {
    let missing = || -> HiveResult<()> {
        if strict {
            Err(HiveError::KeyNotFound { name: name.to_string() })
        } else {
            Ok(())
        }
    };

    let mut parent: KeyNodeCell = hive.get_cell(parent_index)?;
    if parent.sub_keys_index == NO_CELL {
        return missing();
    }
    let list: ListCell = hive.get_cell(parent.sub_keys_index)?;
    let Some(child_index) = list.find_key(hive, name)?.found() else {
        return missing();
    };

    let mut child: KeyNodeCell = hive.get_cell(child_index)?;
    if child.num_sub_keys != 0 {
        return Err(HiveError::KeyHasSubKeys { name: child.name });
    }

    // Unlink before releasing the child so a shrinking list can take back the slot it outgrew.
    let update = list.unlink_sub_key(hive, parent.sub_keys_index, name)?;
    if update.is_empty {
        hive.free_cell(update.index)?;
        parent.sub_keys_index = NO_CELL;
    } else {
        parent.sub_keys_index = update.index;
    }

    if child.class_name_index != NO_CELL {
        hive.free_cell(child.class_name_index)?;
    }
    if child.security_index != NO_CELL {
        security::release(hive, child.security_index)?;
    }
    free_values(hive, &mut child)?;
    if child.sub_keys_index != NO_CELL {
        let stale: ListCell = hive.get_cell(child.sub_keys_index)?;
        stale.free(hive, child.sub_keys_index)?;
    }
    hive.free_cell(child_index)?;

    parent.num_sub_keys = parent.num_sub_keys.saturating_sub(1);
    parent.touch();
    hive.update_cell(Some(parent_index), &parent, false)?;

    debug!(name, index = child_index, parent = parent_index, "key.delete");
    Ok(())
}

fn child_names<S: Read + Write + Seek>(
    hive: &mut Hive<S>,
    key: &KeyNodeCell,
) -> HiveResult<Vec<String>> {
    if key.sub_keys_index == NO_CELL {
        return Ok(Vec::new());
    }
    let list: ListCell = hive.get_cell(key.sub_keys_index)?;
    let mut out = Vec::new();
    for index in list.enumerate_keys(hive)? {
        out.push(hive.get_cell::<KeyNodeCell>(index)?.name);
    }
    Ok(out)
}

fn remove_tree<S: Read + Write + Seek>(
    hive: &mut Hive<S>,
    parent_index: u32,
    name: &str,
) -> HiveResult<()> {
    let parent: KeyNodeCell = hive.get_cell(parent_index)?;
    let Some(child_index) = find_child(hive, &parent, name)? else {
        return Ok(());
    };
    let child: KeyNodeCell = hive.get_cell(child_index)?;
    for grandchild in child_names(hive, &child)? {
        remove_tree(hive, child_index, &grandchild)?;
    }
    remove_child(hive, parent_index, name, true)
}

/// Split `path` into the parent path and the last component.
fn split_last(path: &str) -> (&str, &str) {
    path.rsplit_once(PATH_SEPARATOR).unwrap_or(("", path))
}

impl<'h, S: Read + Write + Seek> RegistryKey<'h, S> {
    pub(crate) fn new(hive: &'h mut Hive<S>, index: u32) -> Self {
        Self { hive, index }
    }

    /// Cell index of this key's node.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Snapshot of the key node, including the cached size hints.
    pub fn key_node(&mut self) -> HiveResult<KeyNodeCell> {
        self.hive.get_cell(self.index)
    }

    fn store(&mut self, key: &mut KeyNodeCell) -> HiveResult<()> {
        key.touch();
        self.hive.update_cell(Some(self.index), key, false)?;
        Ok(())
    }

    /// Path of this key below the root. The root reports its own name.
    pub fn name(&mut self) -> HiveResult<String> {
        let mut key = self.key_node()?;
        if key.is_root() {
            return Ok(key.name);
        }
        let mut parts = vec![key.name.clone()];
        while key.parent_index != NO_CELL {
            key = self.hive.get_cell(key.parent_index)?;
            if key.is_root() {
                break;
            }
            parts.push(key.name.clone());
        }
        parts.reverse();
        let separator = PATH_SEPARATOR.to_string();
        Ok(parts.join(separator.as_str()))
    }

    /// This key's own name.
    pub fn leaf_name(&mut self) -> HiveResult<String> {
        Ok(self.key_node()?.name)
    }

    pub fn flags(&mut self) -> HiveResult<KeyFlags> {
        Ok(self.key_node()?.flags)
    }

    /// Last time this key was written.
    pub fn timestamp(&mut self) -> HiveResult<Option<DateTime<Utc>>> {
        Ok(filetime_to_datetime(self.key_node()?.timestamp))
    }

    /// The parent key; `None` for the root.
    pub fn parent(&mut self) -> HiveResult<Option<RegistryKey<'_, S>>> {
        let key = self.key_node()?;
        if key.is_root() || key.parent_index == NO_CELL {
            return Ok(None);
        }
        Ok(Some(RegistryKey::new(self.hive, key.parent_index)))
    }

    pub fn sub_key_count(&mut self) -> HiveResult<u32> {
        Ok(self.key_node()?.num_sub_keys)
    }

    /// Names of the direct subkeys in index order.
    pub fn sub_key_names(&mut self) -> HiveResult<Vec<String>> {
        let key = self.key_node()?;
        child_names(self.hive, &key)
    }

    /// Open a descendant by path. An empty path opens this key again.
    pub fn open_sub_key(&mut self, path: &str) -> HiveResult<Option<RegistryKey<'_, S>>> {
        match resolve(self.hive, self.index, path)? {
            Some(index) => Ok(Some(RegistryKey::new(self.hive, index))),
            None => Ok(None),
        }
    }

    /// Open a descendant, creating every missing key along `path`.
    pub fn create_sub_key(&mut self, path: &str) -> HiveResult<RegistryKey<'_, S>> {
        let mut current = self.index;
        let mut rest = Some(path);
        while let Some(path) = rest {
            let (head, tail) = names::split_first(path);
            rest = tail;
            if head.is_empty() {
                continue;
            }
            let cell: KeyNodeCell = self.hive.get_cell(current)?;
            current = match find_child(self.hive, &cell, head)? {
                Some(child) => child,
                None => add_child(self.hive, current, head)?,
            };
        }
        Ok(RegistryKey::new(self.hive, current))
    }

    fn refuse_self_delete(&mut self) -> HiveResult<()> {
        if self.key_node()?.is_root() {
            return Err(HiveError::CannotDeleteRoot);
        }
        Err(HiveError::CannotDeleteSelf { name: self.name()? })
    }

    /// Delete a childless descendant. A missing key is an error only when
    /// `throw_on_missing` is set.
    pub fn delete_sub_key(&mut self, path: &str, throw_on_missing: bool) -> HiveResult<()> {
        let path = path.trim_matches(PATH_SEPARATOR);
        if path.is_empty() {
            return self.refuse_self_delete();
        }
        let (parent_path, leaf) = split_last(path);
        match resolve(self.hive, self.index, parent_path)? {
            Some(parent) => remove_child(self.hive, parent, leaf, throw_on_missing),
            None if throw_on_missing => Err(HiveError::KeyNotFound { name: path.to_string() }),
            None => Ok(()),
        }
    }

    /// Delete a descendant and everything below it, depth first.
    pub fn delete_sub_key_tree(&mut self, path: &str) -> HiveResult<()> {
        let path = path.trim_matches(PATH_SEPARATOR);
        if path.is_empty() {
            return self.refuse_self_delete();
        }
        let (parent_path, leaf) = split_last(path);
        match resolve(self.hive, self.index, parent_path)? {
            Some(parent) => remove_tree(self.hive, parent, leaf),
            None => Ok(()),
        }
    }

    pub fn value_count(&mut self) -> HiveResult<u32> {
        Ok(self.key_node()?.num_values)
    }

    /// Value names in list order. The default value appears as "".
    pub fn value_names(&mut self) -> HiveResult<Vec<String>> {
        let key = self.key_node()?;
        let mut out = Vec::new();
        for index in value_indices(self.hive, &key)? {
            out.push(self.hive.get_cell::<ValueCell>(index)?.name);
        }
        Ok(out)
    }

    /// Every value with its payload.
    pub fn values(&mut self) -> HiveResult<Vec<RegistryValue>> {
        let key = self.key_node()?;
        let mut out = Vec::new();
        for index in value_indices(self.hive, &key)? {
            let cell: ValueCell = self.hive.get_cell(index)?;
            let raw = value::read_data(self.hive, &cell)?;
            out.push(RegistryValue { name: cell.name, value_type: cell.data_type, raw });
        }
        Ok(out)
    }

    /// Look up a value by case-insensitive name.
    pub fn get_value(&mut self, name: &str) -> HiveResult<Option<RegistryValue>> {
        let key = self.key_node()?;
        let indices = value_indices(self.hive, &key)?;
        let Some((_, _, cell)) = find_value(self.hive, &indices, name)? else {
            return Ok(None);
        };
        let raw = value::read_data(self.hive, &cell)?;
        Ok(Some(RegistryValue { name: cell.name, value_type: cell.data_type, raw }))
    }

    /// Decoded payload of a value.
    pub fn get_value_data(&mut self, name: &str) -> HiveResult<Option<ValueData>> {
        self.get_value(name)?.map(|v| v.data()).transpose()
    }

    pub fn set_value(&mut self, name: &str, data: &ValueData) -> HiveResult<()> {
        self.set_value_raw(name, data.value_type(), &data.to_bytes())
    }

    /// Create or overwrite a value with raw bytes of the given type.
    pub fn set_value_raw(
        &mut self,
        name: &str,
        value_type: ValueType,
        data: &[u8],
    ) -> HiveResult<()> {
        if name.encode_utf16().count() > names::MAX_VALUE_NAME_CHARS {
            return Err(HiveError::InvalidName {
                name: name.to_string(),
                reason: "value names are at most 16383 characters",
            });
        }

        let mut key = self.key_node()?;
        let mut indices = value_indices(self.hive, &key)?;
        match find_value(self.hive, &indices, name)? {
            Some((slot, index, mut cell)) => {
                value::set_data(self.hive, &mut cell, value_type, data)?;
                let moved = self.hive.update_cell(Some(index), &cell, true)?;
                if moved != index {
                    indices[slot] = moved;
                    write_value_list(self.hive, &mut key, &indices)?;
                }
            }
            None => {
                let mut cell = ValueCell::new(name);
                value::set_data(self.hive, &mut cell, value_type, data)?;
                let index = self.hive.update_cell(None, &cell, true)?;

                let mut at = indices.len();
                for (slot, &other) in indices.iter().enumerate() {
                    let other: ValueCell = self.hive.get_cell(other)?;
                    if names::compare(&other.name, name) == std::cmp::Ordering::Greater {
                        at = slot;
                        break;
                    }
                }
                indices.insert(at, index);
                write_value_list(self.hive, &mut key, &indices)?;
            }
        }

        key.max_value_name_bytes = key.max_value_name_bytes.max(names::utf16_len(name));
        key.max_value_data_bytes = key.max_value_data_bytes.max(data.len() as u32);
        self.store(&mut key)
    }

    /// Delete a value and its payload.
    pub fn delete_value(&mut self, name: &str, throw_on_missing: bool) -> HiveResult<()> {
        let mut key = self.key_node()?;
        let mut indices = value_indices(self.hive, &key)?;
        let Some((slot, index, mut cell)) = find_value(self.hive, &indices, name)? else {
            if throw_on_missing {
                return Err(HiveError::ValueNotFound { name: name.to_string() });
            }
            return Ok(());
        };

        value::free_data(self.hive, &mut cell)?;
        self.hive.free_cell(index)?;
        indices.remove(slot);
        write_value_list(self.hive, &mut key, &indices)?;
        self.store(&mut key)
    }

    pub fn class_name(&mut self) -> HiveResult<Option<String>> {
        let key = self.key_node()?;
        if key.class_name_index == NO_CELL {
            return Ok(None);
        }
        let len = usize::from(key.class_name_length);
        let raw = self.hive.raw_cell_data(key.class_name_index, len)?;
        Ok(Some(names::from_utf16_bytes(&raw)))
    }

    /// Set or clear the class name.
    pub fn set_class_name(&mut self, class: Option<&str>) -> HiveResult<()> {
        let mut key = self.key_node()?;
        match class {
            None => {
                if key.class_name_index != NO_CELL {
                    self.hive.free_cell(key.class_name_index)?;
                }
                key.class_name_index = NO_CELL;
                key.class_name_length = 0;
            }
            Some(class) => {
                let bytes = names::utf16_bytes(class);
                let length = u16::try_from(bytes.len()).map_err(|_| HiveError::InvalidName {
                    name: class.to_string(),
                    reason: "class names are at most 32767 characters",
                })?;
                let existing = (key.class_name_index != NO_CELL).then_some(key.class_name_index);
                key.class_name_index = self.hive.store_raw(existing, &bytes)?;
                key.class_name_length = length;

                if !key.is_root() && key.parent_index != NO_CELL {
                    let mut parent: KeyNodeCell = self.hive.get_cell(key.parent_index)?;
                    if u32::from(length) > parent.max_class_name_bytes {
                        parent.max_class_name_bytes = u32::from(length);
                        self.hive.update_cell(Some(key.parent_index), &parent, false)?;
                    }
                }
            }
        }
        self.store(&mut key)
    }

    /// This key's security descriptor bytes, if it has one.
    pub fn security_descriptor(&mut self) -> HiveResult<Option<Vec<u8>>> {
        let key = self.key_node()?;
        if key.security_index == NO_CELL {
            return Ok(None);
        }
        let cell: SecurityCell = self.hive.get_cell(key.security_index)?;
        Ok(Some(cell.descriptor))
    }

    /// Point this key at a record carrying `descriptor`, sharing an existing
    /// identical record when there is one.
    pub fn set_security_descriptor(&mut self, descriptor: &[u8]) -> HiveResult<()> {
        let root_index = self.hive.header().root_cell;
        let anchor = self.hive.get_cell::<KeyNodeCell>(root_index)?.security_index;
        let shared = if anchor == NO_CELL {
            security::create_ring(self.hive, descriptor.to_vec())?
        } else {
            security::find_or_insert(self.hive, anchor, descriptor)?
        };

        let mut key = self.key_node()?;
        let previous = key.security_index;
        key.security_index = shared;
        self.store(&mut key)?;
        if previous != NO_CELL {
            security::release(self.hive, previous)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HiveConfig;
    use crate::registry::RegistryHive;
    use std::io::Cursor;

    fn registry() -> RegistryHive<Cursor<Vec<u8>>> {
        RegistryHive::create(Cursor::new(Vec::new()), HiveConfig::default()).unwrap()
    }

    fn free_list(
        registry: &mut RegistryHive<Cursor<Vec<u8>>>,
    ) -> Vec<(u32, Vec<crate::bin::FreeCell>)> {
        let hive = registry.hive_mut();
        let headers = hive.bins().to_vec();
        headers
            .iter()
            .map(|h| (h.file_offset, hive.load_bin(h).unwrap().free_cells().to_vec()))
            .collect()
    }

    #[test]
    fn test_names_and_paths() {
        let mut reg = registry();
        let mut root = reg.root().unwrap();
        assert_eq!(root.name().unwrap(), "root");
        let mut test = root.create_sub_key("Software\\Test").unwrap();
        assert_eq!(test.name().unwrap(), "Software\\Test");
        assert_eq!(test.leaf_name().unwrap(), "Test");
        let mut parent = test.parent().unwrap().unwrap();
        assert_eq!(parent.name().unwrap(), "Software");
    }

    #[test]
    fn test_create_is_idempotent() {
        let mut reg = registry();
        let mut root = reg.root().unwrap();
        let a = root.create_sub_key("A\\B").unwrap().index();
        let b = root.create_sub_key("a\\b").unwrap().index();
        assert_eq!(a, b);
        assert_eq!(root.sub_key_count().unwrap(), 1);
    }

    #[test]
    fn test_create_then_delete_leaves_no_trace() {
        let mut reg = registry();
        let before = free_list(&mut reg);
        {
            let mut root = reg.root().unwrap();
            root.create_sub_key("Transient").unwrap();
            root.delete_sub_key("Transient", true).unwrap();
            assert_eq!(root.key_node().unwrap().sub_keys_index, NO_CELL);
        }
        assert_eq!(free_list(&mut reg), before);
    }

    #[test]
    fn test_delete_with_children_refused() {
        let mut reg = registry();
        let mut root = reg.root().unwrap();
        root.create_sub_key("P\\C").unwrap();
        assert!(matches!(root.delete_sub_key("P", true), Err(HiveError::KeyHasSubKeys { .. })));
        assert!(matches!(root.delete_sub_key("missing", true), Err(HiveError::KeyNotFound { .. })));
        root.delete_sub_key("missing", false).unwrap();
    }

    #[test]
    fn test_empty_path_names_the_key_that_cannot_delete_itself() {
        let mut reg = registry();
        let mut root = reg.root().unwrap();
        let mut key = root.create_sub_key("Outer\\Inner").unwrap();
        match key.delete_sub_key("", true) {
            Err(HiveError::CannotDeleteSelf { name }) => assert_eq!(name, "Outer\\Inner"),
            other => panic!("unexpected result {:?}", other),
        }
        assert!(matches!(key.delete_sub_key_tree("\\"), Err(HiveError::CannotDeleteSelf { .. })));
        assert!(root.open_sub_key("Outer\\Inner").unwrap().is_some());
    }

    #[test]
    fn test_dword_is_inlined() {
        let mut reg = registry();
        let mut root = reg.root().unwrap();
        let mut key = root.create_sub_key("K").unwrap();
        key.set_value("Count", &ValueData::Dword(42)).unwrap();
        key.set_value("Blob", &ValueData::Binary(vec![1, 2, 3, 4, 5])).unwrap();

        let node = key.key_node().unwrap();
        let indices = value_indices(key.hive, &node).unwrap();
        assert_eq!(indices.len(), 2);
        // sorted by name: Blob, Count
        let blob: ValueCell = key.hive.get_cell(indices[0]).unwrap();
        let count: ValueCell = key.hive.get_cell(indices[1]).unwrap();
        assert!(count.is_inline());
        assert!(!blob.is_inline());
        assert_eq!(node.max_value_data_bytes, 5);
    }

    #[test]
    fn test_delete_value_frees_everything() {
        let mut reg = registry();
        {
            let mut root = reg.root().unwrap();
            root.create_sub_key("K").unwrap();
        }
        let before = free_list(&mut reg);
        {
            let mut root = reg.root().unwrap();
            let mut key = root.open_sub_key("K").unwrap().unwrap();
            key.set_value("Blob", &ValueData::Binary(vec![7; 40])).unwrap();
            key.delete_value("Blob", true).unwrap();
            assert_eq!(key.key_node().unwrap().value_list_index, NO_CELL);
            assert!(matches!(key.delete_value("Blob", true), Err(HiveError::ValueNotFound { .. })));
        }
        assert_eq!(free_list(&mut reg), before);
    }

    #[test]
    fn test_class_name() {
        let mut reg = registry();
        let mut root = reg.root().unwrap();
        let mut key = root.create_sub_key("K").unwrap();
        assert_eq!(key.class_name().unwrap(), None);
        key.set_class_name(Some("Shell")).unwrap();
        assert_eq!(key.class_name().unwrap().as_deref(), Some("Shell"));
        key.set_class_name(None).unwrap();
        assert_eq!(key.class_name().unwrap(), None);
        assert_eq!(root.key_node().unwrap().max_class_name_bytes, 10);
    }
}
