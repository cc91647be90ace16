//! Structural verification of an open hive.
//!
//! Walks every bin and then the key tree from the root, collecting findings
//! instead of stopping at the first problem. Reading errors that make the
//! walk itself impossible (I/O, an unparseable cell) are still returned as
//! errors.

use std::cmp::Ordering;
use std::io::{Read, Seek, Write};

use hashbrown::{HashMap, HashSet};
use tracing::warn;

use crate::cell::{KeyNodeCell, ListCell, SecurityCell, ValueCell};
use crate::error::HiveResult;
use crate::format::NO_CELL;
use crate::hive::Hive;
use crate::names;
use crate::registry::RegistryHive;
use crate::security;

const MAX_FINDINGS: usize = 64;

/// How serious a finding is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VerifySeverity {
    /// Wasted space or stale hints; the hive still reads correctly
    Warning,
    /// Structure is inconsistent
    Error,
}

/// One problem found during verification.
#[derive(Clone, Debug)]
pub struct VerifyFinding {
    pub severity: VerifySeverity,
    pub message: String,
}

/// What the walk saw.
#[derive(Clone, Debug, Default)]
pub struct VerifyCounts {
    pub bins: u64,
    pub allocated_cells: u64,
    pub free_cells: u64,
    pub keys: u64,
    pub values: u64,
    pub security_cells: u64,
}

/// Result of [`verify`].
#[derive(Clone, Debug)]
pub struct VerifyReport {
    /// No error-level findings
    pub success: bool,
    pub findings: Vec<VerifyFinding>,
    pub counts: VerifyCounts,
}

struct Findings(Vec<VerifyFinding>);

impl Findings {
    fn push(&mut self, severity: VerifySeverity, message: String) {
        warn!(?severity, %message, "verify.finding");
        if self.0.len() < MAX_FINDINGS {
            self.0.push(VerifyFinding { severity, message });
        }
    }

    fn error(&mut self, message: String) {
        self.push(VerifySeverity::Error, message);
    }

    fn warning(&mut self, message: String) {
        self.push(VerifySeverity::Warning, message);
    }
}

/// Check allocator and tree invariants of `registry`.
pub fn verify<S: Read + Write + Seek>(registry: &mut RegistryHive<S>) -> HiveResult<VerifyReport> {
    let hive = registry.hive_mut();
    let mut findings = Findings(Vec::new());
    let mut counts = VerifyCounts::default();

    check_bins(hive, &mut findings, &mut counts)?;
    let references = check_tree(hive, &mut findings, &mut counts)?;
    check_security(hive, &references, &mut findings, &mut counts)?;

    let success = findings.0.iter().all(|f| f.severity != VerifySeverity::Error);
    Ok(VerifyReport { success, findings: findings.0, counts })
}

fn check_bins<S: Read + Write + Seek>(
    hive: &mut Hive<S>,
    findings: &mut Findings,
    counts: &mut VerifyCounts,
) -> HiveResult<()> {
    let headers = hive.bins().to_vec();
    let total: u64 = headers.iter().map(|h| u64::from(h.bin_size)).sum();
    if total != u64::from(hive.header().length) {
        let length = hive.header().length;
        findings.error(format!("header length {:#x} but bins cover {:#x}", length, total));
    }

    for header in &headers {
        counts.bins += 1;
        let bin = match hive.load_bin(header) {
            Ok(bin) => bin,
            Err(err) => {
                findings.error(format!("bin at {:#x} does not tile: {}", header.file_offset, err));
                continue;
            }
        };
        let records = bin.records()?;
        for pair in records.windows(2) {
            if !pair[0].allocated && !pair[1].allocated {
                findings.warning(format!(
                    "free cells at {:#x} and {:#x} are adjacent but not merged",
                    pair[0].index, pair[1].index
                ));
            }
        }
        for record in &records {
            if record.allocated {
                counts.allocated_cells += 1;
            } else {
                counts.free_cells += 1;
            }
        }
    }
    Ok(())
}

/// Walk the key tree; returns how many keys reference each security cell.
fn check_tree<S: Read + Write + Seek>(
    hive: &mut Hive<S>,
    findings: &mut Findings,
    counts: &mut VerifyCounts,
) -> HiveResult<HashMap<u32, u32>> {
    let mut references: HashMap<u32, u32> = HashMap::new();
    let mut visited = HashSet::new();
    let mut stack = vec![hive.header().root_cell];

    while let Some(index) = stack.pop() {
        if !visited.insert(index) {
            findings.error(format!("key {:#x} is reachable twice", index));
            continue;
        }
        let key: KeyNodeCell = hive.get_cell(index)?;
        counts.keys += 1;

        if key.security_index != NO_CELL {
            *references.entry(key.security_index).or_insert(0) += 1;
        }

        check_values(hive, index, &key, findings, counts)?;

        if key.sub_keys_index == NO_CELL {
            if key.num_sub_keys != 0 {
                findings.error(format!(
                    "key {:#x} counts {} subkeys but has no index",
                    index, key.num_sub_keys
                ));
            }
            continue;
        }
        let list: ListCell = hive.get_cell(key.sub_keys_index)?;
        let children = list.enumerate_keys(hive)?;
        if children.len() as u32 != key.num_sub_keys {
            findings.error(format!(
                "key {:#x} counts {} subkeys, index holds {}",
                index,
                key.num_sub_keys,
                children.len()
            ));
        }

        let mut previous: Option<String> = None;
        for &child_index in &children {
            let child: KeyNodeCell = hive.get_cell(child_index)?;
            if child.parent_index != index {
                findings.error(format!(
                    "key {:#x} names parent {:#x}, found under {:#x}",
                    child_index, child.parent_index, index
                ));
            }
            if let Some(prev) = &previous {
                if names::compare(prev, &child.name) != Ordering::Less {
                    findings.error(format!(
                        "subkeys of {:#x} out of order at '{}'",
                        index, child.name
                    ));
                }
            }
            previous = Some(child.name);
            stack.push(child_index);
        }
    }
    Ok(references)
}

fn check_values<S: Read + Write + Seek>(
    hive: &mut Hive<S>,
    index: u32,
    key: &KeyNodeCell,
    findings: &mut Findings,
    counts: &mut VerifyCounts,
) -> HiveResult<()> {
    if key.num_values == 0 {
        return Ok(());
    }
    if key.value_list_index == NO_CELL {
        findings.error(format!(
            "key {:#x} counts {} values but has no value list",
            index, key.num_values
        ));
        return Ok(());
    }
    let raw = hive.raw_cell_data(key.value_list_index, key.num_values as usize * 4)?;
    for chunk in raw.chunks_exact(4) {
        let value_index = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        let value: ValueCell = hive.get_cell(value_index)?;
        counts.values += 1;
        if names::utf16_len(&value.name) > key.max_value_name_bytes {
            findings.warning(format!("key {:#x} value name hint is below '{}'", index, value.name));
        }
    }
    Ok(())
}

fn check_security<S: Read + Write + Seek>(
    hive: &mut Hive<S>,
    references: &HashMap<u32, u32>,
    findings: &mut Findings,
    counts: &mut VerifyCounts,
) -> HiveResult<()> {
    let root: KeyNodeCell = hive.get_cell(hive.header().root_cell)?;
    if root.security_index == NO_CELL {
        if !references.is_empty() {
            findings.error("keys reference security cells but the root has none".to_string());
        }
        return Ok(());
    }

    let ring = match security::ring_members(hive, root.security_index) {
        Ok(ring) => ring,
        Err(err) => {
            findings.error(format!("security ring is broken: {}", err));
            return Ok(());
        }
    };

    let members: HashSet<u32> = ring.iter().copied().collect();
    for &index in &ring {
        let cell: SecurityCell = hive.get_cell(index)?;
        counts.security_cells += 1;
        let next: SecurityCell = hive.get_cell(cell.next_index)?;
        if next.previous_index != index {
            findings.error(format!(
                "security cell {:#x} is not the predecessor of its successor",
                index
            ));
        }
        let observed = references.get(&index).copied().unwrap_or(0);
        if cell.usage_count != observed {
            findings.error(format!(
                "security cell {:#x} refcount {} but {} keys reference it",
                index, cell.usage_count, observed
            ));
        }
    }
    for index in references.keys() {
        if !members.contains(index) {
            findings.error(format!("security cell {:#x} is referenced but not on the ring", index));
        }
    }
    Ok(())
}
