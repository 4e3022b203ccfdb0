//! Split/assemble round trip tests
//!
//! Splitting a file and assembling the containing directory must reproduce
//! the original bytes for any content and any part size.

use pgvault_storage::{part_path, FileAssembler, FileSplitter};
use proptest::prelude::*;
use std::path::Path;
use tempfile::TempDir;

fn round_trip(content: &[u8], threshold: u64) -> Vec<u8> {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("3001.dat.gz");
    std::fs::write(&path, content).unwrap();

    FileSplitter::new(threshold).split_file(&path).unwrap();
    FileAssembler::new().assemble_files(dir.path()).unwrap();

    let leftovers: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .filter(|n| n.contains(".part"))
        .collect();
    assert!(leftovers.is_empty(), "parts left behind: {:?}", leftovers);

    std::fs::read(&path).unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_split_then_assemble_is_identity(
        content in proptest::collection::vec(any::<u8>(), 0..4096),
        threshold in 1u64..512,
    ) {
        prop_assert_eq!(round_trip(&content, threshold), content);
    }
}

#[test]
fn test_round_trip_large_single_byte_parts() {
    let content: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
    assert_eq!(round_trip(&content, 1), content);
}

#[test]
fn test_round_trip_threshold_larger_than_file() {
    let content = b"tiny".to_vec();
    assert_eq!(round_trip(&content, 1 << 20), content);
}

#[test]
fn test_part_count_and_sizes() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("blob");
    std::fs::write(&path, vec![9u8; 2500]).unwrap();

    let info = FileSplitter::new(1000).split_file(&path).unwrap();
    let sizes: Vec<u64> = info
        .parts
        .iter()
        .map(|p| std::fs::metadata(p).unwrap().len())
        .collect();
    assert_eq!(sizes, vec![1000, 1000, 500]);
    assert_eq!(info.parts[2], part_path(&path, 3));
}

#[test]
fn test_split_tree_then_assemble_tree() {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    std::fs::create_dir_all(root.join("wal")).unwrap();

    let files: Vec<(&str, Vec<u8>)> = vec![
        ("toc.dat", (0..200u8).collect()),
        ("3001.dat.gz", vec![42u8; 1234]),
        ("wal/000000010000000000000003", (0..=255u8).cycle().take(700).collect()),
        ("small", b"ok".to_vec()),
    ];
    for (name, data) in &files {
        std::fs::write(root.join(name), data).unwrap();
    }

    let split = FileSplitter::new(128).split_large_files(root).unwrap();
    assert_eq!(split.len(), 3);
    assert!(!root.join("toc.dat").exists());
    assert!(root.join("small").exists());

    FileAssembler::new().assemble_files(root).unwrap();
    for (name, data) in &files {
        assert_eq!(&std::fs::read(root.join(name)).unwrap(), data, "{}", name);
    }
    assert!(!Path::new(&part_path(&root.join("toc.dat"), 1)).exists());
}
