//! L5: the namespace and file I/O layer built on top of the B+ tree index.
//!
//! Grounded on `fs1.c`'s `new_empty_file_dir`/`ls`/`import`/`export`, with
//! the direct(13)/single-indirect(1024)/double-indirect(1024×1024) block
//! addressing scheme those functions hand-roll pulled out into
//! [`data_block_for_write`]/[`data_block_for_read`] so `import` and
//! `extract` share one addressing implementation instead of two.
//!
//! Design Notes §3.1: the root directory (id 1) is never itself inserted
//! into the B+ tree — it has no parent entry anywhere, only children keyed
//! under `dir_id == 1` — so there is no special-case "create the root"
//! step here; [`crate::superblock::format`] simply starts `idcounter` at
//! 2 and leaves id 1 unused as a key but valid as a `dir_id`.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use log::{info, warn};

use crate::bitmap::{self, BitmapGeometry};
use crate::block::{BlockDevice, Offset, BS, NONE};
use crate::btree;
use crate::error::{FsError, Result};
use crate::inode::{self, Inode};
use crate::key::Key;
use crate::stat::{self, EntryType, Stat};
use crate::superblock::{self, FormatOptions, Superblock};

/// The id every directory listing implicitly descends from. Not a key
/// present in the B+ tree itself (Design Notes §3.1).
pub const ROOT_DIR_ID: u32 = 1;

/// A signed byte offset into the image, as returned by [`Session::lookup`]
/// for use with later operations.
pub type ByteOffset = Offset;

/// One row of a [`Session::list`] result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
	pub id: u32,
	pub name: String,
	pub kind: EntryType,
	pub size: u32,
	/// The `asctime`-style creation stamp (`ctime == ltime == mtime`
	/// always, per Design Notes §3.1).
	pub mtime: String,
}

/// Creates a new, empty image at `path`. The backing file must already
/// exist and be sized to the image's intended length; `format` does not
/// grow or create it.
pub fn format(path: &Path, options: FormatOptions) -> Result<()> {
	let mut device = BlockDevice::open(path)?;
	superblock::format(&mut device, &options)?;
	Ok(())
}

/// Opens an existing image for use.
pub fn mount(path: &Path) -> Result<Session> {
	let mut device = BlockDevice::open(path)?;
	let sb = superblock::load(&mut device)?;
	info!("mounted image: {} blocks, {} inodes, label {:?}", sb.total_blocks, sb.inodes, sb.label);
	Ok(Session { device, sb })
}

/// A mounted image: the open backing file plus the live superblock.
pub struct Session {
	device: BlockDevice,
	sb: Superblock,
}

impl Session {
	/// The image's fixed block size.
	pub fn block_size(&self) -> usize {
		BS
	}

	/// The image's total size, in blocks.
	pub fn total_blocks(&self) -> u32 {
		self.sb.total_blocks
	}

	pub fn set_label(&mut self, label: &str) -> Result<()> {
		superblock::set_label(&mut self.device, &mut self.sb, label)
	}

	/// Creates a new file or directory entry under `parent_id`. Fails with
	/// [`FsError::Exists`] if an entry of the same name and kind is
	/// already there.
	pub fn create(&mut self, name: &str, parent_id: u32, kind: EntryType) -> Result<u32> {
		self.create_entry(name, parent_id, kind)
	}

	/// Convenience wrapper over [`Session::create`] for directories.
	pub fn mkdir(&mut self, name: &str, parent_id: u32) -> Result<u32> {
		self.create_entry(name, parent_id, EntryType::Dir)
	}

	fn create_entry(&mut self, name: &str, parent_id: u32, kind: EntryType) -> Result<u32> {
		if self.lookup(parent_id, name, kind)?.is_some() {
			return Err(FsError::Exists);
		}

		let id = self.sb.next_id(&mut self.device)?;
		let bitmap_geo = self.sb.bitmap_geometry();
		let inode_geo = self.sb.inode_geometry();

		let inode_off = self.write_entry_record(name, kind, &bitmap_geo, &inode_geo)?;
		btree::insert(&mut self.device, &bitmap_geo, &mut self.sb.root, Key::new(parent_id, id), inode_off)?;

		// §3/§4.6: every directory (other than the root, which is never
		// created through this path) carries a synthetic ".." entry keyed
		// under its own new id, pointing at its parent. An independent
		// stat/inode pair, not a reuse of the parent's own record.
		if kind == EntryType::Dir {
			let dotdot_off = self.write_entry_record("..", EntryType::Dir, &bitmap_geo, &inode_geo)?;
			btree::insert(&mut self.device, &bitmap_geo, &mut self.sb.root, Key::new(id, parent_id), dotdot_off)?;
		}

		self.sb.persist(&mut self.device)?;
		Ok(id)
	}

	/// Allocates and writes a fresh stat block + inode pair for a new
	/// directory-less entry record, returning the inode's offset. Shared by
	/// `create`'s own entry and its `".."` sibling.
	fn write_entry_record(&mut self, name: &str, kind: EntryType, bitmap_geo: &BitmapGeometry, inode_geo: &inode::InodeGeometry) -> Result<Offset> {
		let stat_off = bitmap::allocate(&mut self.device, bitmap_geo)?.to_offset();
		stat::write(&mut self.device, stat_off, &Stat::new(name, kind))?;

		let inode_off = inode::allocate(&mut self.device, inode_geo)?;
		let mut node = Inode::empty();
		node.stat = stat_off;
		inode::write(&mut self.device, inode_off, &node)?;
		Ok(inode_off)
	}

	/// Lists every entry directly under `dir_id`, in ascending id order.
	pub fn list(&mut self, dir_id: u32) -> Result<Vec<DirEntry>> {
		let entries = btree::scan_dir(&mut self.device, self.sb.root, dir_id)?;
		let mut out = Vec::with_capacity(entries.len());
		for (key, inode_off) in entries {
			let node = inode::read(&mut self.device, inode_off)?;
			let st = stat::read(&mut self.device, node.stat)?;
			out.push(DirEntry { id: key.id, name: st.name, kind: st.kind, size: st.size, mtime: st.created_at_text() });
		}
		Ok(out)
	}

	/// Finds the entry named `name` of kind `kind` directly under
	/// `parent_id`, returning its id and inode offset.
	pub fn lookup(&mut self, parent_id: u32, name: &str, kind: EntryType) -> Result<Option<(u32, ByteOffset)>> {
		for (key, inode_off) in btree::scan_dir(&mut self.device, self.sb.root, parent_id)? {
			let node = inode::read(&mut self.device, inode_off)?;
			let st = stat::read(&mut self.device, node.stat)?;
			if st.name == name && st.kind == kind {
				return Ok(Some((key.id, inode_off)));
			}
		}
		Ok(None)
	}

	/// Copies a host file's contents into a new file entry under
	/// `parent_id`. Returns the number of bytes copied.
	pub fn import(&mut self, host_path: &Path, parent_id: u32, name: &str) -> Result<u64> {
		if self.lookup(parent_id, name, EntryType::File)?.is_some() {
			return Err(FsError::Exists);
		}
		let mut host = File::open(host_path).map_err(FsError::HostIo)?;

		let id = self.sb.next_id(&mut self.device)?;
		let bitmap_geo = self.sb.bitmap_geometry();
		let inode_geo = self.sb.inode_geometry();

		let stat_off = bitmap::allocate(&mut self.device, &bitmap_geo)?.to_offset();
		let inode_off = inode::allocate(&mut self.device, &inode_geo)?;

		let mut node = Inode::empty();
		let mut buf = [0u8; BS];
		let mut logical = 0u32;
		let mut total = 0u64;
		let mut last_block = NONE;
		let mut last_n = 0u32;

		loop {
			let n = read_full_or_partial(&mut host, &mut buf)?;
			if n == 0 {
				break;
			}
			let data_off = data_block_for_write(&mut self.device, &bitmap_geo, &mut node, logical)?;
			if n < BS {
				let mut zeroed = [0u8; BS];
				zeroed[..n].copy_from_slice(&buf[..n]);
				self.device.write_at(data_off, &zeroed)?;
			} else {
				self.device.write_at(data_off, &buf)?;
			}
			total += n as u64;
			last_block = data_off;
			last_n = n as u32;
			logical += 1;
			if n < BS {
				break;
			}
		}

		node.stat = stat_off;
		inode::write(&mut self.device, inode_off, &node)?;

		let mut st = Stat::new(name, EntryType::File);
		st.size = total as u32;
		st.lastblock = last_block;
		st.lastblockbytes = last_n;
		st.blocks = logical;
		stat::write(&mut self.device, stat_off, &st)?;

		btree::insert(&mut self.device, &bitmap_geo, &mut self.sb.root, Key::new(parent_id, id), inode_off)?;
		self.sb.persist(&mut self.device)?;
		Ok(total)
	}

	/// Copies a file entry's contents out to a host path. Returns the
	/// number of bytes written.
	pub fn extract(&mut self, parent_id: u32, name: &str, host_path: &Path) -> Result<u64> {
		let (_, inode_off) = self.lookup(parent_id, name, EntryType::File)?.ok_or(FsError::NotFound)?;
		let node = inode::read(&mut self.device, inode_off)?;
		let st = stat::read(&mut self.device, node.stat)?;
		let mut host = File::create(host_path).map_err(FsError::HostIo)?;

		// `st.size` is a truncating `u32` byte count and wraps for files at or
		// above 4 GiB (spec §8 property 3 requires round-tripping files well
		// past that); `blocks` tops out around 1,049,613 and never wraps, so
		// gate the empty case on it instead.
		if st.blocks == 0 {
			return Ok(0);
		}

		let mut logical = 0u32;
		let mut written = 0u64;
		// spec.md §4.6: walk data blocks in order, stopping either at the
		// recorded `lastblock` (writing its partial byte count) or once
		// `blocks` data blocks have been emitted, whichever comes first.
		while logical < st.blocks {
			let data_off = data_block_for_read(&mut self.device, &node, logical)?;
			if data_off == NONE {
				warn!("file {name} ended before reaching its recorded lastblock");
				break;
			}
			let mut buf = [0u8; BS];
			self.device.read_at(data_off, &mut buf)?;

			if data_off == st.lastblock {
				host.write_all(&buf[..st.lastblockbytes as usize]).map_err(FsError::HostIo)?;
				written += st.lastblockbytes as u64;
				break;
			}
			host.write_all(&buf).map_err(FsError::HostIo)?;
			written += BS as u64;
			logical += 1;
		}
		Ok(written)
	}

	/// Flushes and releases the image. Equivalent to dropping the
	/// session, spelled out for callers that want the flush errors
	/// surfaced rather than logged.
	pub fn close(mut self) -> Result<()> {
		self.device.flush()
	}
}

impl Drop for Session {
	fn drop(&mut self) {
		if let Err(e) = self.device.flush() {
			warn!("failed to flush image on drop: {e}");
		}
	}
}

fn read_full_or_partial(host: &mut File, buf: &mut [u8; BS]) -> Result<usize> {
	let mut filled = 0;
	while filled < BS {
		let n = host.read(&mut buf[filled..]).map_err(FsError::HostIo)?;
		if n == 0 {
			break;
		}
		filled += n;
	}
	Ok(filled)
}

const DIRECT_COUNT: u32 = 13;
const PTRS_PER_BLOCK: u32 = (BS / 4) as u32;

fn pointer_block(device: &mut BlockDevice, offset: Offset) -> Result<[Offset; PTRS_PER_BLOCK as usize]> {
	let mut buf = [0u8; BS];
	device.read_at(offset, &mut buf)?;
	Ok(crate::wire::from_bytes(&buf))
}

fn write_pointer_block(device: &mut BlockDevice, offset: Offset, block: &[Offset; PTRS_PER_BLOCK as usize]) -> Result<()> {
	let buf = crate::wire::to_bytes::<[Offset; PTRS_PER_BLOCK as usize], BS>(block);
	device.write_at(offset, &buf)
}

fn new_pointer_block(device: &mut BlockDevice, bitmap_geo: &BitmapGeometry) -> Result<Offset> {
	let idx = bitmap::allocate(device, bitmap_geo)?;
	write_pointer_block(device, idx.to_offset(), &[NONE; PTRS_PER_BLOCK as usize])?;
	Ok(idx.to_offset())
}

/// Resolves (allocating as needed) the data block for `logical_index`,
/// per the direct/single-indirect/double-indirect addressing scheme.
fn data_block_for_write(device: &mut BlockDevice, bitmap_geo: &BitmapGeometry, node: &mut Inode, logical_index: u32) -> Result<Offset> {
	if logical_index < DIRECT_COUNT {
		let blk = bitmap::allocate(device, bitmap_geo)?;
		node.direct[logical_index as usize] = blk.to_offset();
		return Ok(blk.to_offset());
	}

	let idx = logical_index - DIRECT_COUNT;
	if idx < PTRS_PER_BLOCK {
		if node.single_indirect == NONE {
			node.single_indirect = new_pointer_block(device, bitmap_geo)?;
		}
		let mut table = pointer_block(device, node.single_indirect)?;
		let data_blk = bitmap::allocate(device, bitmap_geo)?;
		table[idx as usize] = data_blk.to_offset();
		write_pointer_block(device, node.single_indirect, &table)?;
		return Ok(data_blk.to_offset());
	}

	let idx2 = idx - PTRS_PER_BLOCK;
	let outer = (idx2 / PTRS_PER_BLOCK) as usize;
	let inner = (idx2 % PTRS_PER_BLOCK) as usize;

	if node.double_indirect == NONE {
		node.double_indirect = new_pointer_block(device, bitmap_geo)?;
	}
	let mut outer_table = pointer_block(device, node.double_indirect)?;
	if outer_table[outer] == NONE {
		outer_table[outer] = new_pointer_block(device, bitmap_geo)?;
		write_pointer_block(device, node.double_indirect, &outer_table)?;
	}
	let mut inner_table = pointer_block(device, outer_table[outer])?;
	let data_blk = bitmap::allocate(device, bitmap_geo)?;
	inner_table[inner] = data_blk.to_offset();
	write_pointer_block(device, outer_table[outer], &inner_table)?;
	Ok(data_blk.to_offset())
}

/// The read-side counterpart of [`data_block_for_write`]: resolves an
/// existing data block without allocating, returning [`NONE`] if the
/// file doesn't extend that far.
fn data_block_for_read(device: &mut BlockDevice, node: &Inode, logical_index: u32) -> Result<Offset> {
	if logical_index < DIRECT_COUNT {
		return Ok(node.direct[logical_index as usize]);
	}

	let idx = logical_index - DIRECT_COUNT;
	if idx < PTRS_PER_BLOCK {
		if node.single_indirect == NONE {
			return Ok(NONE);
		}
		let table = pointer_block(device, node.single_indirect)?;
		return Ok(table[idx as usize]);
	}

	let idx2 = idx - PTRS_PER_BLOCK;
	let outer = (idx2 / PTRS_PER_BLOCK) as usize;
	let inner = (idx2 % PTRS_PER_BLOCK) as usize;
	if node.double_indirect == NONE {
		return Ok(NONE);
	}
	let outer_table = pointer_block(device, node.double_indirect)?;
	if outer_table[outer] == NONE {
		return Ok(NONE);
	}
	let inner_table = pointer_block(device, outer_table[outer])?;
	Ok(inner_table[inner])
}
