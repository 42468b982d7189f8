//! L3: the flat inode table.
//!
//! Grounded on `mkfs::ext2`'s `INode`/`get_disk_offset` (a fixed-size record
//! array addressed by linear offset arithmetic from a block-group-relative
//! start), simplified to this format's single contiguous region with no
//! groups.

use log::debug;

use crate::block::{BlockDevice, BlockIndex, Offset, BS, NONE};
use crate::error::{FsError, Result};
use crate::wire;

/// Size in bytes of one inode record (16 `i32` slots).
pub const INODE_SIZE: usize = 64;
/// Inodes packed per block, per the superblock's fixed `inodes` field.
pub const INODES_PER_BLOCK: u32 = 64;

#[repr(C, packed)]
#[derive(Clone, Copy)]
struct RawInode {
	f: [i32; 16],
}

/// An inode: a stat-block pointer plus the direct/single-indirect/
/// double-indirect data block pointers (`f[0]` and `f[1..16]` of §3).
#[derive(Debug, Clone, Copy)]
pub struct Inode {
	pub stat: Offset,
	pub direct: [Offset; 13],
	pub single_indirect: Offset,
	pub double_indirect: Offset,
}

impl Inode {
	/// A freshly-allocated, empty inode (`f[0] = -1`, as the slot scan in
	/// [`allocate`] expects).
	pub fn empty() -> Self {
		Self { stat: NONE, direct: [NONE; 13], single_indirect: NONE, double_indirect: NONE }
	}

	fn to_raw(self) -> RawInode {
		let mut f = [NONE; 16];
		f[0] = self.stat;
		f[1..14].copy_from_slice(&self.direct);
		f[14] = self.single_indirect;
		f[15] = self.double_indirect;
		RawInode { f }
	}

	fn from_raw(raw: RawInode) -> Self {
		let mut direct = [NONE; 13];
		direct.copy_from_slice(&raw.f[1..14]);
		Self { stat: raw.f[0], direct, single_indirect: raw.f[14], double_indirect: raw.f[15] }
	}
}

/// The geometry [`allocate`]/[`read`]/[`write`] need: where the inode
/// region starts and how many slots it holds.
#[derive(Debug, Clone, Copy)]
pub struct InodeGeometry {
	pub first_inode_block: u32,
	pub n_inodes: u32,
}

fn slot_offset(first_inode_block: u32, index: u32) -> Offset {
	(first_inode_block as i64 * BS as i64 + index as i64 * INODE_SIZE as i64) as Offset
}

/// Zero-fills the inode region with `f[0] = -1` slots, marking every slot
/// free.
pub fn init(device: &mut BlockDevice, geo: &InodeGeometry) -> Result<()> {
	let raw_bytes = wire::to_bytes::<RawInode, INODE_SIZE>(&Inode::empty().to_raw());
	let mut block = [0u8; BS];
	for i in 0..INODES_PER_BLOCK as usize {
		block[i * INODE_SIZE..(i + 1) * INODE_SIZE].copy_from_slice(&raw_bytes);
	}

	let inode_blocks = fastdevl_util::ceil_division(geo.n_inodes as u64, INODES_PER_BLOCK as u64) as u32;
	for b in 0..inode_blocks {
		device.write_block(BlockIndex(geo.first_inode_block + b), &block)?;
	}
	Ok(())
}

/// Linear scan for the first slot with `f[0] == -1`. Returns its byte
/// offset without marking it occupied; the caller commits that by writing a
/// populated inode there (spec.md §4.4).
pub fn allocate(device: &mut BlockDevice, geo: &InodeGeometry) -> Result<Offset> {
	for index in 0..geo.n_inodes {
		let offset = slot_offset(geo.first_inode_block, index);
		if read(device, offset)?.stat == NONE {
			debug!("allocated inode slot at offset {offset}");
			return Ok(offset);
		}
	}
	Err(FsError::NoInodes)
}

/// Reads the inode at the given byte offset.
pub fn read(device: &mut BlockDevice, offset: Offset) -> Result<Inode> {
	let mut buf = [0u8; INODE_SIZE];
	device.read_at(offset, &mut buf)?;
	Ok(Inode::from_raw(wire::from_bytes(&buf)))
}

/// Writes `inode` at the given byte offset.
pub fn write(device: &mut BlockDevice, offset: Offset, inode: &Inode) -> Result<()> {
	let buf = wire::to_bytes::<RawInode, INODE_SIZE>(&inode.to_raw());
	device.write_at(offset, &buf)
}
