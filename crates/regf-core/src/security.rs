//! Security record ring.
//!
//! Every `sk` cell in a hive sits on one circular doubly-linked list threaded
//! through `previous_index` / `next_index`. Keys share records by index and
//! the record's `usage_count` tracks how many keys point at it. A ring of one
//! points at itself in both directions.

use std::io::{Read, Seek, Write};

use hashbrown::HashSet;
use tracing::trace;

use crate::cell::SecurityCell;
use crate::error::{HiveError, HiveResult};
use crate::hive::Hive;

const SE_DACL_PRESENT: u16 = 0x0004;
const SE_DACL_AUTO_INHERITED: u16 = 0x0400;
const SE_DACL_PROTECTED: u16 = 0x1000;
const SE_SELF_RELATIVE: u16 = 0x8000;

const ACCESS_ALLOWED_ACE: u8 = 0;
const CONTAINER_INHERIT_ACE: u8 = 0x02;
const KEY_ALL_ACCESS: u32 = 0x000F_003F;

fn sid(sub_authorities: &[u32]) -> Vec<u8> {
    let mut out = vec![1, sub_authorities.len() as u8, 0, 0, 0, 0, 0, 5];
    for sub in sub_authorities {
        out.extend_from_slice(&sub.to_le_bytes());
    }
    out
}

fn allowed_ace(flags: u8, trustee: &[u8]) -> Vec<u8> {
    let size = (8 + trustee.len()) as u16;
    let mut out = vec![ACCESS_ALLOWED_ACE, flags];
    out.extend_from_slice(&size.to_le_bytes());
    out.extend_from_slice(&KEY_ALL_ACCESS.to_le_bytes());
    out.extend_from_slice(trustee);
    out
}

/// Self-relative descriptor given to the root of a new hive.
///
/// Owner and group are BUILTIN\Administrators; the protected DACL grants
/// full control to LocalSystem and, inherited by subkeys, to Administrators.
pub fn default_security_descriptor() -> Vec<u8> {
    let administrators = sid(&[32, 544]);
    let system = sid(&[18]);

    let aces = [allowed_ace(0, &system), allowed_ace(CONTAINER_INHERIT_ACE, &administrators)];
    let acl_size = 8 + aces.iter().map(Vec::len).sum::<usize>();
    let mut acl = vec![2, 0];
    acl.extend_from_slice(&(acl_size as u16).to_le_bytes());
    acl.extend_from_slice(&(aces.len() as u16).to_le_bytes());
    acl.extend_from_slice(&[0, 0]);
    for ace in &aces {
        acl.extend_from_slice(ace);
    }

    let owner_offset = 20u32;
    let group_offset = owner_offset + administrators.len() as u32;
    let dacl_offset = group_offset + administrators.len() as u32;
    let control = SE_SELF_RELATIVE | SE_DACL_PROTECTED | SE_DACL_AUTO_INHERITED | SE_DACL_PRESENT;

    let mut sd = vec![1, 0];
    sd.extend_from_slice(&control.to_le_bytes());
    sd.extend_from_slice(&owner_offset.to_le_bytes());
    sd.extend_from_slice(&group_offset.to_le_bytes());
    sd.extend_from_slice(&0u32.to_le_bytes());
    sd.extend_from_slice(&dacl_offset.to_le_bytes());
    sd.extend_from_slice(&administrators);
    sd.extend_from_slice(&administrators);
    sd.extend_from_slice(&acl);
    sd
}

/// Allocate a ring of one: the record links to itself, with one user.
pub fn create_ring<S: Read + Write + Seek>(
    hive: &mut Hive<S>,
    descriptor: Vec<u8>,
) -> HiveResult<u32> {
    let mut cell = SecurityCell::new(descriptor);
    cell.usage_count = 1;
    let index = hive.update_cell(None, &cell, true)?;
    cell.previous_index = index;
    cell.next_index = index;
    hive.update_cell(Some(index), &cell, false)?;
    Ok(index)
}

/// Count one more key pointing at `index`.
pub fn add_reference<S: Read + Write + Seek>(hive: &mut Hive<S>, index: u32) -> HiveResult<()> {
    let mut cell: SecurityCell = hive.get_cell(index)?;
    cell.usage_count += 1;
    hive.update_cell(Some(index), &cell, false)?;
    Ok(())
}

/// Drop one reference; at zero the record leaves the ring and is freed.
pub fn release<S: Read + Write + Seek>(hive: &mut Hive<S>, index: u32) -> HiveResult<()> {
    let mut cell: SecurityCell = hive.get_cell(index)?;
    if cell.usage_count > 1 {
        cell.usage_count -= 1;
        hive.update_cell(Some(index), &cell, false)?;
        return Ok(());
    }

    if cell.previous_index != index {
        let mut previous: SecurityCell = hive.get_cell(cell.previous_index)?;
        previous.next_index = cell.next_index;
        hive.update_cell(Some(cell.previous_index), &previous, false)?;

        let mut next: SecurityCell = hive.get_cell(cell.next_index)?;
        next.previous_index = cell.previous_index;
        hive.update_cell(Some(cell.next_index), &next, false)?;
    }
    hive.free_cell(index)?;
    trace!(index, previous = cell.previous_index, next = cell.next_index, "security.unlink");
    Ok(())
}

/// Indices of every record on the ring starting at `anchor`, in ring order.
pub fn ring_members<S: Read + Write + Seek>(
    hive: &mut Hive<S>,
    anchor: u32,
) -> HiveResult<Vec<u32>> {
    let mut members = Vec::new();
    let mut seen = HashSet::new();
    let mut current = anchor;
    loop {
        if !seen.insert(current) {
            return Err(HiveError::corrupt(
                current,
                "security ring loops without returning to its start",
            ));
        }
        members.push(current);
        current = hive.get_cell::<SecurityCell>(current)?.next_index;
        if current == anchor {
            return Ok(members);
        }
    }
}

/// Reference a record carrying `descriptor`: an identical one already on the
/// ring through `anchor` is shared, otherwise a new record is spliced in
/// right after `anchor`.
pub fn find_or_insert<S: Read + Write + Seek>(
    hive: &mut Hive<S>,
    anchor: u32,
    descriptor: &[u8],
) -> HiveResult<u32> {
    for index in ring_members(hive, anchor)? {
        let cell: SecurityCell = hive.get_cell(index)?;
        if cell.descriptor == descriptor {
            add_reference(hive, index)?;
            return Ok(index);
        }
    }

    let head: SecurityCell = hive.get_cell(anchor)?;
    let mut cell = SecurityCell::new(descriptor.to_vec());
    cell.previous_index = anchor;
    cell.next_index = head.next_index;
    cell.usage_count = 1;
    let index = hive.update_cell(None, &cell, true)?;

    let mut head: SecurityCell = hive.get_cell(anchor)?;
    head.next_index = index;
    hive.update_cell(Some(anchor), &head, false)?;

    let mut next: SecurityCell = hive.get_cell(cell.next_index)?;
    next.previous_index = index;
    hive.update_cell(Some(cell.next_index), &next, false)?;

    trace!(index, after = anchor, len = descriptor.len(), "security.insert");
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HiveConfig;
    use std::io::Cursor;

    fn hive() -> Hive<Cursor<Vec<u8>>> {
        Hive::format(Cursor::new(Vec::new()), HiveConfig::default()).unwrap()
    }

    #[test]
    fn test_default_descriptor_layout() {
        let sd = default_security_descriptor();
        assert_eq!(sd.len(), 104);
        assert_eq!(sd[0], 1);
        assert_eq!(u16::from_le_bytes([sd[2], sd[3]]), 0x9404);
        // DACL offset and ACL size
        assert_eq!(u32::from_le_bytes([sd[16], sd[17], sd[18], sd[19]]), 52);
        assert_eq!(u16::from_le_bytes([sd[54], sd[55]]), 52);
        assert_eq!(u16::from_le_bytes([sd[56], sd[57]]), 2);
    }

    #[test]
    fn test_ring_of_one_points_at_itself() {
        let mut hive = hive();
        let root = create_ring(&mut hive, vec![1, 2, 3]).unwrap();
        let cell: SecurityCell = hive.get_cell(root).unwrap();
        assert_eq!(cell.previous_index, root);
        assert_eq!(cell.next_index, root);
        assert_eq!(cell.usage_count, 1);
        assert_eq!(ring_members(&mut hive, root).unwrap(), vec![root]);
    }

    #[test]
    fn test_identical_descriptor_is_shared() {
        let mut hive = hive();
        let root = create_ring(&mut hive, vec![1, 2, 3]).unwrap();
        assert_eq!(find_or_insert(&mut hive, root, &[1, 2, 3]).unwrap(), root);
        assert_eq!(hive.get_cell::<SecurityCell>(root).unwrap().usage_count, 2);
    }

    #[test]
    fn test_splice_and_unlink() {
        let mut hive = hive();
        let root = create_ring(&mut hive, vec![1]).unwrap();
        let a = find_or_insert(&mut hive, root, &[2]).unwrap();
        let b = find_or_insert(&mut hive, root, &[3]).unwrap();
        assert_eq!(ring_members(&mut hive, root).unwrap(), vec![root, b, a]);

        release(&mut hive, b).unwrap();
        assert_eq!(ring_members(&mut hive, root).unwrap(), vec![root, a]);
        assert!(hive.get_cell::<SecurityCell>(b).is_err());

        release(&mut hive, a).unwrap();
        assert_eq!(ring_members(&mut hive, root).unwrap(), vec![root]);
        let cell: SecurityCell = hive.get_cell(root).unwrap();
        assert_eq!((cell.previous_index, cell.next_index), (root, root));
    }

    #[test]
    fn test_release_decrements_before_unlinking() {
        let mut hive = hive();
        let root = create_ring(&mut hive, vec![1]).unwrap();
        let a = find_or_insert(&mut hive, root, &[2]).unwrap();
        add_reference(&mut hive, a).unwrap();
        release(&mut hive, a).unwrap();
        assert_eq!(hive.get_cell::<SecurityCell>(a).unwrap().usage_count, 1);
        assert_eq!(ring_members(&mut hive, root).unwrap().len(), 2);
    }
}
