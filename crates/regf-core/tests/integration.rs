//! End-to-end behaviour of the hive through the public API.

use std::io::Cursor;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use regf_core::cell::IndirectKind;
use regf_core::security;
use regf_core::{
    verify, FreeCell, Hive, HiveConfig, HiveError, ListCell, RegistryHive, SecurityCell, ValueData,
    ValueType, NO_CELL,
};

type MemRegistry = RegistryHive<Cursor<Vec<u8>>>;

fn registry(config: HiveConfig) -> MemRegistry {
    RegistryHive::create(Cursor::new(Vec::new()), config).unwrap()
}

fn free_state(reg: &mut MemRegistry) -> Vec<(u32, Vec<FreeCell>)> {
    let hive = reg.hive_mut();
    let headers = hive.bins().to_vec();
    headers
        .iter()
        .map(|h| (h.file_offset, hive.load_bin(h).unwrap().free_cells().to_vec()))
        .collect()
}

fn free_bytes(reg: &mut MemRegistry) -> u64 {
    free_state(reg)
        .iter()
        .flat_map(|(_, cells)| cells.iter().map(|c| u64::from(c.size)))
        .sum()
}

fn root_list(reg: &mut MemRegistry, path: &str) -> ListCell {
    let index = reg
        .root()
        .unwrap()
        .open_sub_key(path)
        .unwrap()
        .unwrap()
        .key_node()
        .unwrap()
        .sub_keys_index;
    reg.hive_mut().get_cell(index).unwrap()
}

#[test]
fn test_format_then_roundtrip_a_value() {
    let mut hive = Hive::format(Cursor::new(vec![0u8; 8192]), HiveConfig::default()).unwrap();
    assert_eq!(hive.bins().len(), 1);
    assert_eq!(hive.bins()[0].bin_size, 4096);
    let header = hive.bins()[0];
    let bin = hive.load_bin(&header).unwrap();
    assert_eq!(bin.free_cells(), &[FreeCell { offset: 32, size: 4096 - 32 }]);

    let mut reg =
        RegistryHive::create(Cursor::new(vec![0u8; 8192]), HiveConfig::default()).unwrap();
    {
        let mut root = reg.root().unwrap();
        let mut key = root.create_sub_key("Software\\Test").unwrap();
        key.set_value("Count", &ValueData::Dword(42)).unwrap();
    }
    let stream = reg.into_inner();

    let mut reopened = RegistryHive::open(stream, HiveConfig::default()).unwrap();
    let mut root = reopened.root().unwrap();
    let mut key = root.open_sub_key("Software\\Test").unwrap().unwrap();
    assert_eq!(key.get_value_data("Count").unwrap(), Some(ValueData::Dword(42)));
}

#[test]
fn test_create_delete_restores_free_list() {
    let mut reg = registry(HiveConfig::default());
    reg.root().unwrap().create_sub_key("Parent").unwrap();
    let before = free_state(&mut reg);

    {
        let mut root = reg.root().unwrap();
        root.create_sub_key("Parent\\Child").unwrap();
        root.delete_sub_key("Parent\\Child", true).unwrap();
    }
    assert_eq!(free_state(&mut reg), before);
}

#[test]
fn test_create_delete_beside_a_sibling_restores_free_list() {
    let mut reg = registry(HiveConfig::default());
    reg.root().unwrap().create_sub_key("A").unwrap();
    let before = free_state(&mut reg);

    {
        let mut root = reg.root().unwrap();
        root.create_sub_key("B").unwrap();
        root.delete_sub_key("B", true).unwrap();
    }
    assert_eq!(free_state(&mut reg), before);

    // a value-bearing child, placed before the existing sibling
    {
        let mut root = reg.root().unwrap();
        let mut key = root.create_sub_key("@first").unwrap();
        key.set_value("v", &ValueData::Binary(vec![7; 24])).unwrap();
        root.delete_sub_key("@first", true).unwrap();
    }
    assert_eq!(free_state(&mut reg), before);
}

#[test]
fn test_lookup_matches_linear_scan() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let prefixes = ["Key", "key", "KEY", "Ke", "Kez", "k\u{e9}y", "\u{3042}"];
    let mut reg = registry(HiveConfig::default());
    let mut created: Vec<(String, u32)> = Vec::new();
    let mut queries = Vec::new();

    {
        let mut root = reg.root().unwrap();
        for _ in 0..1000 {
            let prefix = prefixes[rng.gen_range(0..prefixes.len())];
            let name = format!("{}{}", prefix, rng.gen_range(0..400u32));
            let index = root.create_sub_key(&name).unwrap().index();
            match created.iter().find(|(n, _)| n.to_uppercase() == name.to_uppercase()) {
                Some((_, existing)) => assert_eq!(*existing, index),
                None => created.push((name.clone(), index)),
            }
            queries.push(name.to_lowercase());
            queries.push(format!("{}x", name));
        }
        assert_eq!(root.sub_key_count().unwrap() as usize, created.len());

        for query in &queries {
            let expected = created
                .iter()
                .find(|(n, _)| n.to_uppercase() == query.to_uppercase())
                .map(|(_, i)| *i);
            let found = root.open_sub_key(query).unwrap().map(|k| k.index());
            assert_eq!(found, expected, "lookup of {}", query);
        }
    }
    let report = verify(&mut reg).unwrap();
    assert!(report.success, "{:?}", report.findings);
}

#[test]
fn test_split_threshold_boundary() {
    let mut reg = registry(HiveConfig::compact());
    {
        let mut root = reg.root().unwrap();
        for i in 0..8 {
            root.create_sub_key(&format!("Base\\Child{}", i)).unwrap();
        }
    }
    assert!(matches!(
        root_list(&mut reg, "Base"),
        ListCell::Hashed(ref leaf) if leaf.entries.len() == 8
    ));

    reg.root().unwrap().create_sub_key("Base\\Child8").unwrap();
    match root_list(&mut reg, "Base") {
        ListCell::Indirect(ri) => assert!(ri.kind == IndirectKind::Ri && ri.indices.len() == 2),
        other => panic!("expected an ri root, got {:?}", other),
    }

    let mut root = reg.root().unwrap();
    let mut base = root.open_sub_key("Base").unwrap().unwrap();
    let names = base.sub_key_names().unwrap();
    assert_eq!(names, (0..9).map(|i| format!("Child{}", i)).collect::<Vec<_>>());
    for name in &names {
        base.delete_sub_key(name, true).unwrap();
    }
    assert_eq!(base.key_node().unwrap().sub_keys_index, NO_CELL);
}

#[test]
fn test_security_refcount_follows_children() {
    let mut reg = registry(HiveConfig::default());
    let descriptor = vec![1, 0, 4, 0x80, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
    let n = 12;

    let parent_sk = {
        let mut root = reg.root().unwrap();
        let mut parent = root.create_sub_key("Secured").unwrap();
        parent.set_security_descriptor(&descriptor).unwrap();
        for i in 0..n {
            parent.create_sub_key(&format!("S{}", i)).unwrap();
        }
        parent.key_node().unwrap().security_index
    };
    let root_sk = reg.root().unwrap().key_node().unwrap().security_index;

    let cell: SecurityCell = reg.hive_mut().get_cell(parent_sk).unwrap();
    assert_eq!(cell.usage_count, n + 1);
    assert_eq!(cell.descriptor, descriptor);
    assert_eq!(security::ring_members(reg.hive_mut(), root_sk).unwrap(), vec![root_sk, parent_sk]);

    {
        let mut root = reg.root().unwrap();
        let mut parent = root.open_sub_key("Secured").unwrap().unwrap();
        for i in 0..n {
            parent.delete_sub_key(&format!("S{}", i), true).unwrap();
        }
    }
    let cell: SecurityCell = reg.hive_mut().get_cell(parent_sk).unwrap();
    assert_eq!(cell.usage_count, 1);

    reg.root().unwrap().delete_sub_key("Secured", true).unwrap();
    assert!(matches!(
        reg.hive_mut().get_cell::<SecurityCell>(parent_sk),
        Err(HiveError::CellNotAllocated { .. })
    ));
    assert_eq!(security::ring_members(reg.hive_mut(), root_sk).unwrap(), vec![root_sk]);
    let root_cell: SecurityCell = reg.hive_mut().get_cell(root_sk).unwrap();
    assert_eq!(root_cell.usage_count, 1);
    assert_eq!((root_cell.previous_index, root_cell.next_index), (root_sk, root_sk));
}

#[test]
fn test_value_inline_boundary_moves_storage() {
    let mut reg = registry(HiveConfig::default());
    reg.root().unwrap().create_sub_key("V").unwrap();

    let set = |reg: &mut MemRegistry, data: ValueData| {
        let mut root = reg.root().unwrap();
        root.open_sub_key("V").unwrap().unwrap().set_value("v", &data).unwrap();
    };

    set(&mut reg, ValueData::Dword(42));
    let inline = free_bytes(&mut reg);

    set(&mut reg, ValueData::Binary(vec![1, 2, 3, 4, 5]));
    assert_eq!(free_bytes(&mut reg), inline - 16);

    set(&mut reg, ValueData::Dword(7));
    assert_eq!(free_bytes(&mut reg), inline);

    let mut root = reg.root().unwrap();
    let mut key = root.open_sub_key("V").unwrap().unwrap();
    assert_eq!(key.value_count().unwrap(), 1);
    assert_eq!(key.get_value_data("V").unwrap(), Some(ValueData::Dword(7)));
}

#[test]
fn test_every_value_type_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("values.hive");
    let values = vec![
        ("", ValueData::String("default".into())),
        ("Expand", ValueData::ExpandString("%SystemRoot%\\x".into())),
        ("Bin", ValueData::Binary((0..=255).collect())),
        ("Big", ValueData::Binary(vec![0xAB; 20_000])),
        ("Dw", ValueData::Dword(0xDEAD_BEEF)),
        ("DwBe", ValueData::DwordBigEndian(0x0102_0304)),
        ("Link", ValueData::Link("\\Registry\\Machine".into())),
        ("Multi", ValueData::MultiString(vec!["a".into(), "\u{65e5}\u{672c}".into(), "c".into()])),
        ("Q", ValueData::QWord(u64::MAX - 1)),
        ("Raw", ValueData::Other { value_type: ValueType::ResourceList, bytes: vec![9, 9, 9] }),
        ("Nothing", ValueData::None),
    ];

    {
        let mut reg = RegistryHive::create_file(&path, HiveConfig::default()).unwrap();
        let mut root = reg.root().unwrap();
        let mut key = root.create_sub_key("Types").unwrap();
        for (name, data) in &values {
            key.set_value(name, data).unwrap();
        }
        drop(root);
        assert!(reg.hive().bins().len() > 1);
        reg.flush().unwrap();
    }

    let mut reg = RegistryHive::open_file(&path, HiveConfig::default()).unwrap();
    let mut root = reg.root().unwrap();
    let mut key = root.open_sub_key("Types").unwrap().unwrap();
    for (name, data) in &values {
        assert_eq!(key.get_value_data(name).unwrap().as_ref(), Some(data), "value {:?}", name);
    }
    let mut names = key.value_names().unwrap();
    assert_eq!(names.remove(0), "");
    assert_eq!(key.values().unwrap().len(), values.len());
}

#[test]
fn test_delete_tree_and_root_protection() {
    let mut reg = registry(HiveConfig::compact());
    {
        let mut root = reg.root().unwrap();
        for i in 0..20 {
            let mut key = root.create_sub_key(&format!("Tree\\Branch{}\\Leaf", i)).unwrap();
            key.set_value("payload", &ValueData::Binary(vec![i as u8; 64])).unwrap();
            key.set_class_name(Some("leaf")).unwrap();
        }
        assert!(matches!(root.delete_sub_key("Tree", true), Err(HiveError::KeyHasSubKeys { .. })));

        root.delete_sub_key_tree("Tree").unwrap();
        assert!(root.open_sub_key("Tree").unwrap().is_none());
        assert_eq!(root.sub_key_count().unwrap(), 0);

        assert!(matches!(root.delete_sub_key_tree(""), Err(HiveError::CannotDeleteRoot)));
        assert!(matches!(root.delete_sub_key("", true), Err(HiveError::CannotDeleteRoot)));
        root.delete_sub_key_tree("NotThere").unwrap();
    }

    let report = verify(&mut reg).unwrap();
    assert!(report.success, "{:?}", report.findings);
    assert_eq!(report.counts.keys, 1);
    assert_eq!(report.counts.values, 0);
}

#[test]
fn test_random_churn_stays_consistent() {
    let mut rng = StdRng::seed_from_u64(7);
    let mut reg = registry(HiveConfig::compact());
    {
        let mut root = reg.root().unwrap();
        for _ in 0..400 {
            let name = format!("k{}", rng.gen_range(0..60u32));
            match rng.gen_range(0..4) {
                0 => root.delete_sub_key(&name, false).unwrap(),
                1 => {
                    let mut key = root.create_sub_key(&name).unwrap();
                    key.delete_value("v", false).unwrap();
                }
                _ => {
                    let len = rng.gen_range(0..40usize);
                    let mut key = root.create_sub_key(&name).unwrap();
                    key.set_value("v", &ValueData::Binary(vec![1; len])).unwrap();
                }
            }
        }
    }
    let report = verify(&mut reg).unwrap();
    assert!(report.success, "{:?}", report.findings);
    assert!(report.findings.is_empty());
}

#[test]
fn test_header_tracks_growth() {
    let mut reg = registry(HiveConfig::default());
    let start = reg.header().sequence1;
    {
        let mut root = reg.root().unwrap();
        let mut key = root.create_sub_key("Large").unwrap();
        key.set_value("blob", &ValueData::Binary(vec![0; 10_000])).unwrap();
    }
    let header = reg.header().clone();
    assert!(header.sequence1 > start);
    assert_eq!(header.sequence1, header.sequence2);
    let total: u32 = reg.hive().bins().iter().map(|b| b.bin_size).sum();
    assert_eq!(header.length, total);
    assert!(header.last_written().is_some());
    assert_eq!(header.major_version, 1);
    assert_eq!(header.minor_version, 5);
}
