//! The stat block: a file or directory's metadata, pointed to by its
//! inode's `f[0]` slot.
//!
//! Grounded on `fs1.c`'s `init_stat`/`struct stat` and Design Notes §3.1:
//! timestamps are computed once at creation and never revisited (no
//! touch/rename path exists), and `perm` is stored as three raw digit
//! values, not an ASCII string or a bitmask.

use fastdevl_util::{format_timestamp, pad_bytes, string_from_bytes, unix_seconds, TIMESTAMP_LEN};

use crate::block::{BlockDevice, Offset, BS};
use crate::error::Result;
use crate::wire;

/// Maximum length of a stored file/directory name, including the NUL
/// terminator, per spec.md §3's 256-byte `name` field.
pub const NAME_LEN: usize = 256;

const FIXED_FIELDS_SIZE: usize = NAME_LEN + 1 + 3 + 2 + 2 + 4 + TIMESTAMP_LEN * 3 + 4 + 4 + 4;
const PADDING_SIZE: usize = BS - FIXED_FIELDS_SIZE;

/// The two entry kinds this format distinguishes, stored as `is_dir` on
/// disk (`0`/`1`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
	File,
	Dir,
}

impl EntryType {
	fn to_flag(self) -> u8 {
		match self {
			EntryType::File => 0,
			EntryType::Dir => 1,
		}
	}

	fn from_flag(flag: u8) -> Self {
		if flag != 0 { EntryType::Dir } else { EntryType::File }
	}
}

/// Unix-style permission digits (e.g. owner `7`, group `5`, other `5`),
/// stored as raw byte values `0..=7`, not ASCII digits and not a single
/// packed bitmask (Design Notes §3.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Permissions {
	pub owner: u8,
	pub group: u8,
	pub other: u8,
}

impl Permissions {
	/// The default new files and directories are created with (`fs1.c`'s
	/// `init_stat`: `7 5 5`).
	pub const DEFAULT: Self = Self { owner: 7, group: 5, other: 5 };
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
struct RawStat {
	name: [u8; NAME_LEN],
	is_dir: u8,
	perm: [u8; 3],
	uid: u16,
	gid: u16,
	size: u32,
	ctime: [u8; TIMESTAMP_LEN],
	ltime: [u8; TIMESTAMP_LEN],
	mtime: [u8; TIMESTAMP_LEN],
	lastblock: Offset,
	lastblockbytes: u32,
	blocks: u32,
	_padding: [u8; PADDING_SIZE],
}

/// A file or directory's metadata record. `ctime`, `ltime` (last access)
/// and `mtime` are always identical: this format computes a timestamp
/// once at creation (`fs1.c`'s `get_time`) and never updates it again, so
/// a single stamp is kept rather than three independent ones.
#[derive(Debug, Clone)]
pub struct Stat {
	pub name: String,
	pub kind: EntryType,
	pub perm: Permissions,
	/// Owner id, per spec.md §3's 16-bit `uid` field (`fs1.c`'s
	/// `unsigned short uid`).
	pub uid: u16,
	/// Owning group id, per spec.md §3's 16-bit `gid` field.
	pub gid: u16,
	/// Total byte size. Beyond `fs1.c`'s `struct stat` (which derives this
	/// from `blocks`/`lastblockbytes` on demand) but stored here too so
	/// `list()` doesn't need to reopen every indirect block just to report
	/// a size.
	pub size: u32,
	/// The `asctime`-style creation stamp shared by `ctime`/`ltime`/`mtime`.
	pub created_at: [u8; TIMESTAMP_LEN],
	pub lastblock: Offset,
	pub lastblockbytes: u32,
	/// Number of data blocks the entry occupies (files only; spec.md §3's
	/// `blocks` field).
	pub blocks: u32,
}

impl Stat {
	/// Builds a freshly-created file or directory's metadata, per `fs1.c`'s
	/// `init_stat`: uid 1000, gid 100, permissions 7/5/5, zero size, no
	/// data block allocated yet.
	pub fn new(name: &str, kind: EntryType) -> Self {
		Self {
			name: name.to_owned(),
			kind,
			perm: Permissions::DEFAULT,
			uid: 1000,
			gid: 100,
			size: 0,
			created_at: format_timestamp(unix_seconds()),
			lastblock: crate::block::NONE,
			lastblockbytes: 0,
			blocks: 0,
		}
	}

	/// The stamp as text, for display (`ls -l`-style listings).
	pub fn created_at_text(&self) -> String {
		string_from_bytes(&self.created_at)
	}

	fn to_raw(&self) -> RawStat {
		RawStat {
			name: pad_bytes(&self.name),
			is_dir: self.kind.to_flag(),
			perm: [self.perm.owner, self.perm.group, self.perm.other],
			uid: self.uid,
			gid: self.gid,
			size: self.size,
			ctime: self.created_at,
			ltime: self.created_at,
			mtime: self.created_at,
			lastblock: self.lastblock,
			lastblockbytes: self.lastblockbytes,
			blocks: self.blocks,
			_padding: [0; PADDING_SIZE],
		}
	}

	fn from_raw(raw: RawStat) -> Self {
		Self {
			name: string_from_bytes(&raw.name),
			kind: EntryType::from_flag(raw.is_dir),
			perm: Permissions { owner: raw.perm[0], group: raw.perm[1], other: raw.perm[2] },
			uid: raw.uid,
			gid: raw.gid,
			size: raw.size,
			created_at: raw.ctime,
			lastblock: raw.lastblock,
			lastblockbytes: raw.lastblockbytes,
			blocks: raw.blocks,
		}
	}
}

/// Reads the stat block at `offset`.
pub fn read(device: &mut BlockDevice, offset: Offset) -> Result<Stat> {
	let mut buf = [0u8; BS];
	device.read_at(offset, &mut buf)?;
	Ok(Stat::from_raw(wire::from_bytes(&buf)))
}

/// Writes `stat` at `offset`.
pub fn write(device: &mut BlockDevice, offset: Offset, stat: &Stat) -> Result<()> {
	let buf = wire::to_bytes::<RawStat, BS>(&stat.to_raw());
	device.write_at(offset, &buf)
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::block::BlockIndex;
	use tempfile::NamedTempFile;

	fn sized_file(blocks: u32) -> NamedTempFile {
		let f = NamedTempFile::new().unwrap();
		f.as_file().set_len(blocks as u64 * BS as u64).unwrap();
		f
	}

	#[test]
	fn raw_stat_is_exactly_one_block() {
		assert_eq!(std::mem::size_of::<RawStat>(), BS);
	}

	#[test]
	fn stat_roundtrips_through_a_block() {
		let f = sized_file(1);
		let mut dev = BlockDevice::open(f.path()).unwrap();
		let mut stat = Stat::new("report.txt", EntryType::File);
		stat.size = 1234;
		stat.lastblock = 8192;
		stat.lastblockbytes = 42;
		stat.blocks = 1;

		let offset = BlockIndex(0).to_offset();
		write(&mut dev, offset, &stat).unwrap();
		let back = read(&mut dev, offset).unwrap();

		assert_eq!(back.name, "report.txt");
		assert_eq!(back.kind, EntryType::File);
		assert_eq!(back.perm, Permissions::DEFAULT);
		assert_eq!(back.uid, 1000);
		assert_eq!(back.gid, 100);
		assert_eq!(back.size, 1234);
		assert_eq!(back.lastblock, 8192);
		assert_eq!(back.lastblockbytes, 42);
		assert_eq!(back.blocks, 1);
	}

	#[test]
	fn dir_kind_roundtrips() {
		let f = sized_file(1);
		let mut dev = BlockDevice::open(f.path()).unwrap();
		let stat = Stat::new("docs", EntryType::Dir);
		let offset = BlockIndex(0).to_offset();
		write(&mut dev, offset, &stat).unwrap();
		assert_eq!(read(&mut dev, offset).unwrap().kind, EntryType::Dir);
	}

	#[test]
	fn ctime_ltime_mtime_agree_at_creation() {
		let stat = Stat::new("docs", EntryType::Dir);
		let raw = stat.to_raw();
		assert_eq!(raw.ctime, raw.ltime);
		assert_eq!(raw.ltime, raw.mtime);
	}
}
