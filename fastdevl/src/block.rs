//! L0: typed random-access read/write of fixed-size blocks on the backing
//! host file.
//!
//! Grounded on `mkfs::ext2`'s use of `Seek`/`Read`/`Write` against a held-open
//! `std::fs::File`, generalized from ext2's sector-based addressing to this
//! format's block addressing.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::Result;

/// The fixed block size of the image format, in bytes.
pub const BS: usize = 4096;

/// A signed byte offset as stored in on-disk pointer fields (inode slots,
/// stat `lastblock`, B+ tree node `parent`/`left`/`right`/`link[]`,
/// superblock `root`). `-1` is the universal "absent" sentinel.
pub type Offset = i32;

/// The sentinel value meaning "no block" wherever an [`Offset`] is stored.
pub const NONE: Offset = -1;

/// A 0-based block number, distinct from the byte [`Offset`] it addresses.
///
/// Keeping this as its own type (Design Notes' "typed newtype" guidance)
/// means the `* BS` / `/ BS` arithmetic happens in exactly one place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockIndex(pub u32);

impl BlockIndex {
	/// Returns the byte offset of the start of this block.
	pub fn to_offset(self) -> Offset {
		(self.0 as i64 * BS as i64) as Offset
	}

	/// Recovers a block index from a byte offset that is known to be
	/// block-aligned (every on-disk pointer in this format is).
	pub fn from_offset(offset: Offset) -> Self {
		debug_assert!(offset >= 0);
		debug_assert_eq!(offset as usize % BS, 0);
		BlockIndex((offset as u32) / BS as u32)
	}
}

/// Random-access block device backed by a single host file, kept open for
/// the lifetime of a [`crate::Session`].
pub struct BlockDevice {
	file: File,
}

impl BlockDevice {
	/// Opens an existing file read-write for use as the backing store.
	pub fn open(path: &Path) -> Result<Self> {
		let file = File::options().read(true).write(true).open(path)?;
		Ok(Self { file })
	}

	/// Returns the size of the backing file, in whole blocks (truncating any
	/// partial trailing block).
	pub fn size_blocks(&self) -> Result<u32> {
		let len = self.file.metadata()?.len();
		Ok((len / BS as u64) as u32)
	}

	/// Reads exactly one block at the given index.
	pub fn read_block(&mut self, idx: BlockIndex) -> Result<[u8; BS]> {
		let mut buf = [0u8; BS];
		self.read_at(idx.to_offset(), &mut buf)?;
		Ok(buf)
	}

	/// Writes exactly one block at the given index.
	pub fn write_block(&mut self, idx: BlockIndex, buf: &[u8; BS]) -> Result<()> {
		self.write_at(idx.to_offset(), buf)
	}

	/// Reads `buf.len()` bytes starting at the given signed byte offset.
	/// `offset` must not be [`NONE`].
	pub fn read_at(&mut self, offset: Offset, buf: &mut [u8]) -> Result<()> {
		debug_assert_ne!(offset, NONE, "attempted to read at the absent sentinel");
		self.file.seek(SeekFrom::Start(offset as u64))?;
		self.file.read_exact(buf)?;
		Ok(())
	}

	/// Writes `buf` starting at the given signed byte offset.
	pub fn write_at(&mut self, offset: Offset, buf: &[u8]) -> Result<()> {
		debug_assert_ne!(offset, NONE, "attempted to write at the absent sentinel");
		self.file.seek(SeekFrom::Start(offset as u64))?;
		self.file.write_all(buf)?;
		Ok(())
	}

	/// Flushes any buffered writes to the underlying OS file handle.
	pub fn flush(&mut self) -> Result<()> {
		self.file.flush()?;
		Ok(())
	}
}
