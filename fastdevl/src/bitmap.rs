//! L2: free-block bitmap.
//!
//! Grounded on `mkfs::ext2`'s `fill_bitmap` (a bit-per-block usage map
//! packed 8-to-a-byte, LSB first) generalized from ext2's per-group bitmaps
//! to this format's single flat bitmap spanning the whole image, and on
//! Design Notes §9 item 3 (explicit `set`/`clear` replacing the source's
//! XOR-toggling `use_block`, each asserting the expected pre-state).

use log::{debug, warn};

use crate::block::{BlockDevice, BlockIndex, BS};
use crate::error::{FsError, Result};

/// Block index of the first bitmap block; blocks 0 and 1 hold the
/// superblock and its mirror.
const FIRST_BITMAP_BLOCK: u32 = 2;

/// The geometry an allocation/bit-test call needs: where the bitmap starts,
/// where the scan for a free block may start, and how many blocks exist in
/// total. Derived from the live superblock by [`crate::fs::Session`].
#[derive(Debug, Clone, Copy)]
pub struct BitmapGeometry {
	pub freeblocksmap: u32,
	pub first_free_block: u32,
	pub total_blocks: u32,
}

/// Splits a block index into (bitmap block, byte within block, bit within
/// byte), per §3: block `i` lives at bitmap block `2 + i/(8*BS)`, byte
/// `(i % (8*BS))/8`, bit `i % 8`, LSB first.
fn bit_location(block: BlockIndex) -> (u32, usize, u8) {
	let bits_per_block = 8 * BS as u32;
	let i = block.0;
	let bitmap_block = FIRST_BITMAP_BLOCK + i / bits_per_block;
	let byte = ((i % bits_per_block) / 8) as usize;
	let bit = (i % 8) as u8;
	(bitmap_block, byte, bit)
}

/// Reads whether `block` is marked allocated.
pub fn is_used(device: &mut BlockDevice, block: BlockIndex) -> Result<bool> {
	let (bitmap_block, byte, bit) = bit_location(block);
	let buf = device.read_block(BlockIndex(bitmap_block))?;
	Ok((buf[byte] >> bit) & 1 == 1)
}

fn write_bit(device: &mut BlockDevice, block: BlockIndex, value: bool) -> Result<()> {
	let (bitmap_block, byte, bit) = bit_location(block);
	let mut buf = device.read_block(BlockIndex(bitmap_block))?;
	if value {
		buf[byte] |= 1 << bit;
	} else {
		buf[byte] &= !(1 << bit);
	}
	device.write_block(BlockIndex(bitmap_block), &buf)
}

/// Marks `block` allocated. Asserts it was previously free: unlike the
/// source's XOR toggle, calling this twice on the same block is a bug, not
/// a silent free.
pub fn set_used(device: &mut BlockDevice, block: BlockIndex) -> Result<()> {
	debug_assert!(!is_used(device, block)?, "double allocation of block {block:?}");
	write_bit(device, block, true)
}

/// Marks `block` free. Asserts it was previously allocated.
pub fn clear_used(device: &mut BlockDevice, block: BlockIndex) -> Result<()> {
	debug_assert!(is_used(device, block)?, "freeing an already-free block {block:?}");
	write_bit(device, block, false)
}

/// Scans from `geo.first_free_block` upward for the first unset bit
/// (lowest-index wins) and returns it, without marking it used — callers
/// call [`set_used`] once they've decided to keep the block. Returns
/// [`FsError::NoSpace`] if the image has no free block left.
pub fn find_free(device: &mut BlockDevice, geo: &BitmapGeometry) -> Result<BlockIndex> {
	for i in geo.first_free_block..geo.total_blocks {
		let idx = BlockIndex(i);
		if !is_used(device, idx)? {
			return Ok(idx);
		}
	}
	warn!("bitmap exhausted: no free block above index {}", geo.first_free_block);
	Err(FsError::NoSpace)
}

/// Finds a free block and immediately marks it used, the common case for
/// every caller in this crate.
pub fn allocate(device: &mut BlockDevice, geo: &BitmapGeometry) -> Result<BlockIndex> {
	let idx = find_free(device, geo)?;
	set_used(device, idx)?;
	debug!("allocated block {}", idx.0);
	Ok(idx)
}

/// Zeroes the bitmap region and marks every block in `0..reserved_end`
/// allocated in one pass (superblock, mirror, bitmap and inode table
/// together — Design Notes §9 item 2, replacing the source's two-pass
/// `init_freemap`/`init_inodes` split).
pub fn init_reserved(device: &mut BlockDevice, freeblocksmap: u32, reserved_end: u32) -> Result<()> {
	let zero = [0u8; BS];
	for i in 0..freeblocksmap {
		device.write_block(BlockIndex(FIRST_BITMAP_BLOCK + i), &zero)?;
	}
	for i in 0..reserved_end {
		write_bit(device, BlockIndex(i), true)?;
	}
	Ok(())
}
