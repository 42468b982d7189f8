//! End-to-end scenarios against a real image file, exercising the public
//! `fastdevl` API the way a consumer would.

use std::fs;
use std::io::Write;

use fastdevl::{format, mount, EntryType, FormatOptions, ROOT_DIR_ID};
use tempfile::NamedTempFile;

fn image(bytes: u64) -> NamedTempFile {
	let f = NamedTempFile::new().unwrap();
	f.as_file().set_len(bytes).unwrap();
	f
}

/// S1: a freshly formatted image has an empty root directory.
#[test]
fn s1_fresh_image_has_empty_root() {
	let f = image(1024 * 1024);
	format(f.path(), FormatOptions::default()).unwrap();
	let mut session = mount(f.path()).unwrap();

	assert!(session.list(ROOT_DIR_ID).unwrap().is_empty());
}

/// S2: two directories created under root both show up, as directories.
#[test]
fn s2_mkdir_twice_lists_both_names() {
	let f = image(1024 * 1024);
	format(f.path(), FormatOptions::default()).unwrap();
	let mut session = mount(f.path()).unwrap();

	session.mkdir("a", ROOT_DIR_ID).unwrap();
	session.mkdir("b", ROOT_DIR_ID).unwrap();

	let mut names: Vec<String> = session.list(ROOT_DIR_ID).unwrap().into_iter().map(|e| e.name).collect();
	names.sort();
	assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
	for entry in session.list(ROOT_DIR_ID).unwrap() {
		assert_eq!(entry.kind, EntryType::Dir);
	}
}

/// S3: enough entries under one directory to force at least one B+ tree
/// split, and `list` still returns every one of them.
#[test]
fn s3_many_files_force_a_split_and_all_are_listed() {
	// spec.md §3 provisions one inode per 10 blocks, so 400 files needs an
	// image with at least 4000 blocks' worth of inode budget; 32 MiB gives
	// ample headroom for that plus every stat/data block they need.
	let f = image(32 * 1024 * 1024);
	format(f.path(), FormatOptions::default()).unwrap();
	let mut session = mount(f.path()).unwrap();

	for i in 0..400 {
		session.create(&format!("file{i:04}"), ROOT_DIR_ID, EntryType::File).unwrap();
	}

	let entries = session.list(ROOT_DIR_ID).unwrap();
	assert_eq!(entries.len(), 400);
	let mut ids: Vec<u32> = entries.iter().map(|e| e.id).collect();
	let mut sorted = ids.clone();
	sorted.sort_unstable();
	ids.sort_unstable();
	assert_eq!(ids, sorted);
}

/// S4: a 5000-byte import spans exactly two blocks, with the documented
/// partial final block.
#[test]
fn s4_import_5000_bytes_spans_two_blocks_with_correct_remainder() {
	let f = image(1024 * 1024);
	format(f.path(), FormatOptions::default()).unwrap();
	let mut session = mount(f.path()).unwrap();

	let mut src = NamedTempFile::new().unwrap();
	let payload = vec![0xabu8; 5000];
	src.write_all(&payload).unwrap();

	let copied = session.import(src.path(), ROOT_DIR_ID, "x").unwrap();
	assert_eq!(copied, 5000);

	let dst = NamedTempFile::new().unwrap();
	let extracted = session.extract(ROOT_DIR_ID, "x", dst.path()).unwrap();
	assert_eq!(extracted, 5000);
	assert_eq!(fs::read(dst.path()).unwrap(), payload);
	assert_eq!(5000 % 4096, 904);
}

/// S5: a multi-megabyte import exercises direct and single-indirect
/// addressing and still round-trips exactly.
#[test]
fn s5_large_import_uses_indirect_blocks_and_round_trips() {
	let f = image(16 * 1024 * 1024);
	format(f.path(), FormatOptions::default()).unwrap();
	let mut session = mount(f.path()).unwrap();

	let mut src = NamedTempFile::new().unwrap();
	let payload = vec![0x42u8; 5_000_000];
	src.write_all(&payload).unwrap();

	let copied = session.import(src.path(), ROOT_DIR_ID, "big").unwrap();
	assert_eq!(copied, 5_000_000);
	// 13 direct blocks (53248 bytes) are not enough; this must have used
	// the single-indirect table.
	assert!(payload.len() > 13 * 4096);

	let dst = NamedTempFile::new().unwrap();
	let extracted = session.extract(ROOT_DIR_ID, "big", dst.path()).unwrap();
	assert_eq!(extracted, 5_000_000);
	assert_eq!(fs::read(dst.path()).unwrap(), payload);
}

/// S6: creating the same name and kind twice is rejected.
#[test]
fn s6_duplicate_create_is_rejected() {
	let f = image(1024 * 1024);
	format(f.path(), FormatOptions::default()).unwrap();
	let mut session = mount(f.path()).unwrap();

	session.create("a", ROOT_DIR_ID, EntryType::File).unwrap();
	let err = session.create("a", ROOT_DIR_ID, EntryType::File).unwrap_err();
	assert!(matches!(err, fastdevl::FsError::Exists));
}

/// S7: a corrupted primary superblock is recovered transparently from
/// the mirror, and the namespace built before the corruption is intact.
#[test]
fn s7_mount_recovers_from_a_corrupted_primary_superblock() {
	let f = image(1024 * 1024);
	format(f.path(), FormatOptions::default()).unwrap();
	{
		let mut session = mount(f.path()).unwrap();
		session.mkdir("a", ROOT_DIR_ID).unwrap();
		session.mkdir("b", ROOT_DIR_ID).unwrap();
		session.close().unwrap();
	}

	// Stomp block 0 (the primary superblock) while leaving the mirror at
	// block 1 intact.
	{
		use std::io::{Seek, SeekFrom, Write as _};
		let mut raw = fs::OpenOptions::new().write(true).open(f.path()).unwrap();
		raw.seek(SeekFrom::Start(0)).unwrap();
		raw.write_all(&[0xff; 4096]).unwrap();
	}

	let mut session = mount(f.path()).expect("mount should recover from the mirror");
	let mut names: Vec<String> = session.list(ROOT_DIR_ID).unwrap().into_iter().map(|e| e.name).collect();
	names.sort();
	assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
}

/// Invariant 5: the id counter never repeats, across an arbitrary
/// sequence of creates.
#[test]
fn idcounter_is_strictly_monotonic() {
	// 50 files need 50 inodes; at one inode per 10 blocks (spec.md §3) a
	// bare 1 MiB image wouldn't have enough, so size up.
	let f = image(4 * 1024 * 1024);
	format(f.path(), FormatOptions::default()).unwrap();
	let mut session = mount(f.path()).unwrap();

	let mut ids = Vec::new();
	for i in 0..50 {
		ids.push(session.create(&format!("f{i}"), ROOT_DIR_ID, EntryType::File).unwrap());
	}
	let mut sorted = ids.clone();
	sorted.sort_unstable();
	sorted.dedup();
	assert_eq!(sorted.len(), ids.len(), "no id should repeat");
}

/// Invariant 2: `list` returns exactly the entries created under that
/// parent, none from sibling directories.
#[test]
fn list_is_scoped_to_its_own_directory() {
	let f = image(1024 * 1024);
	format(f.path(), FormatOptions::default()).unwrap();
	let mut session = mount(f.path()).unwrap();

	let dir_a = session.mkdir("a", ROOT_DIR_ID).unwrap();
	let dir_b = session.mkdir("b", ROOT_DIR_ID).unwrap();
	session.create("in_a.txt", dir_a, EntryType::File).unwrap();
	session.create("in_b.txt", dir_b, EntryType::File).unwrap();

	// Each directory also carries its own synthetic ".." entry, keyed under
	// its own id (spec.md §3/§4.6), so it shows up in its own listing but
	// never in a sibling's.
	let a_names: Vec<String> = session.list(dir_a).unwrap().into_iter().map(|e| e.name).collect();
	assert_eq!(a_names.len(), 2);
	assert!(a_names.contains(&"in_a.txt".to_string()));
	assert!(a_names.contains(&"..".to_string()));

	let b_names: Vec<String> = session.list(dir_b).unwrap().into_iter().map(|e| e.name).collect();
	assert_eq!(b_names.len(), 2);
	assert!(b_names.contains(&"in_b.txt".to_string()));
	assert!(b_names.contains(&"..".to_string()));
}

/// Every created directory gets a hidden ".." entry keyed under its own id
/// and pointing at its parent — but the root directory (id 1) never gets
/// one, since it is never created through `create`/`mkdir` (spec.md §3.1).
#[test]
fn mkdir_creates_a_dotdot_entry_pointing_at_its_parent() {
	let f = image(1024 * 1024);
	format(f.path(), FormatOptions::default()).unwrap();
	let mut session = mount(f.path()).unwrap();

	let dir_a = session.mkdir("a", ROOT_DIR_ID).unwrap();
	let (dotdot_id, _) = session.lookup(dir_a, "..", EntryType::Dir).unwrap().expect("a/.. must exist");
	assert_eq!(dotdot_id, ROOT_DIR_ID);

	// Root's own listing has no ".." of its own mixed in.
	let root_names: Vec<String> = session.list(ROOT_DIR_ID).unwrap().into_iter().map(|e| e.name).collect();
	assert_eq!(root_names, vec!["a".to_string()]);
}
