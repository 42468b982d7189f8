//! L1: the superblock, mirrored at blocks 0 and 1.
//!
//! Grounded on `fs1.c`'s `makefs`/`setlabel`/`mount` (a fixed-layout
//! header block, duplicated so a torn write to one copy can be recovered
//! from the other) and on `mkfs::ext2`'s `Superblock`/`Ext2Factory` for
//! the Rust shape of that idea: a packed on-disk record plus a builder
//! struct for format-time options.

use log::{info, warn};

use crate::bitmap::{self, BitmapGeometry};
use crate::block::{BlockDevice, BlockIndex, Offset, BS};
use crate::error::{FsError, Result};
use crate::inode::{self, InodeGeometry, INODES_PER_BLOCK};
use fastdevl_util::{ceil_division, pad_bytes, string_from_bytes};

/// The magic stamped into every valid superblock.
const MAGIC: u32 = 0xFA57_DE11;
/// Length of the on-disk label field, including its NUL terminator.
const LABEL_LEN: usize = 32;
/// Superblock lives at block 0; block 1 holds an identical mirror.
const MIRROR_BLOCK: u32 = 1;

#[repr(C, packed)]
#[derive(Clone, Copy)]
struct RawSuperblock {
	magic: u32,
	total_blocks: u32,
	freeblocksmap: u32,
	first_free_block: u32,
	inodes: u32,
	first_inode_block: u32,
	idcounter: u32,
	root: Offset,
	label: [u8; LABEL_LEN],
	_padding: [u8; BS - 4 - 4 - 4 - 4 - 4 - 4 - 4 - 4 - LABEL_LEN],
}

/// Options accepted by [`format`]. Everything but `label` defaults to the
/// values `fs1.c`'s `makefs` hard-codes.
#[derive(Debug, Clone, Default)]
pub struct FormatOptions {
	/// Override the number of inodes to provision. Defaults to
	/// `ceil(blocks / 10)`, matching spec.md §3's fixed ratio.
	pub inode_count: Option<u32>,
	/// The volume label, truncated to 31 bytes plus a NUL terminator.
	pub label: Option<String>,
}

/// The live, parsed superblock. Kept in memory by [`crate::fs::Session`]
/// and written back through [`Superblock::persist`] after any mutation.
#[derive(Debug, Clone)]
pub struct Superblock {
	pub total_blocks: u32,
	pub freeblocksmap: u32,
	pub first_free_block: u32,
	pub inodes: u32,
	pub first_inode_block: u32,
	pub idcounter: u32,
	pub root: Offset,
	pub label: String,
}

impl Superblock {
	pub fn bitmap_geometry(&self) -> BitmapGeometry {
		BitmapGeometry {
			freeblocksmap: self.freeblocksmap,
			first_free_block: self.first_free_block,
			total_blocks: self.total_blocks,
		}
	}

	pub fn inode_geometry(&self) -> InodeGeometry {
		InodeGeometry { first_inode_block: self.first_inode_block, n_inodes: self.inodes }
	}

	/// Draws the next globally-unique id used to key B+ tree entries
	/// (`fs1.c`'s `idcounter`), persisting the bump immediately so a
	/// crash between draws never hands out the same id twice.
	pub fn next_id(&mut self, device: &mut BlockDevice) -> Result<u32> {
		let id = self.idcounter;
		self.idcounter += 1;
		self.persist(device)?;
		Ok(id)
	}

	fn to_raw(&self) -> RawSuperblock {
		RawSuperblock {
			magic: MAGIC,
			total_blocks: self.total_blocks,
			freeblocksmap: self.freeblocksmap,
			first_free_block: self.first_free_block,
			inodes: self.inodes,
			first_inode_block: self.first_inode_block,
			idcounter: self.idcounter,
			root: self.root,
			label: pad_bytes(&self.label),
			_padding: [0; BS - 4 - 4 - 4 - 4 - 4 - 4 - 4 - 4 - LABEL_LEN],
		}
	}

	fn from_raw(raw: &RawSuperblock) -> Result<Self> {
		if raw.magic != MAGIC {
			return Err(FsError::InvalidMagic);
		}
		Ok(Self {
			total_blocks: raw.total_blocks,
			freeblocksmap: raw.freeblocksmap,
			first_free_block: raw.first_free_block,
			inodes: raw.inodes,
			first_inode_block: raw.first_inode_block,
			idcounter: raw.idcounter,
			root: raw.root,
			label: string_from_bytes(&raw.label),
		})
	}

	/// Writes this superblock to both block 0 and its mirror at block 1.
	pub fn persist(&self, device: &mut BlockDevice) -> Result<()> {
		let buf = crate::wire::to_bytes::<RawSuperblock, BS>(&self.to_raw());
		device.write_block(BlockIndex(0), &buf)?;
		device.write_block(BlockIndex(MIRROR_BLOCK), &buf)?;
		device.flush()
	}
}

fn read_copy(device: &mut BlockDevice, block: u32) -> Result<RawSuperblock> {
	let buf = device.read_block(BlockIndex(block))?;
	Ok(crate::wire::from_bytes(&buf))
}

/// Loads the superblock, falling back to the mirror if the primary copy
/// is missing its magic (scenario S7: recovery from a corrupted primary
/// superblock).
pub fn load(device: &mut BlockDevice) -> Result<Superblock> {
	match read_copy(device, 0).and_then(|raw| Superblock::from_raw(&raw)) {
		Ok(sb) => Ok(sb),
		Err(FsError::InvalidMagic) => {
			warn!("primary superblock invalid, recovering from mirror");
			let raw = read_copy(device, MIRROR_BLOCK)?;
			let sb = Superblock::from_raw(&raw)?;
			sb.persist(device)?;
			Ok(sb)
		}
		Err(e) => Err(e),
	}
}

/// Lays out a brand new image: superblock + mirror, free-block bitmap, and
/// inode table, per `fs1.c`'s `makefs`. Geometry: one inode per 10 blocks
/// (spec.md §3's `n_inodes = ceil(blocks/10)`), unless overridden.
pub fn format(device: &mut BlockDevice, options: &FormatOptions) -> Result<Superblock> {
	let total_blocks = device.size_blocks()?;
	if total_blocks < 4 {
		return Err(FsError::InvalidSize);
	}

	let inodes = options.inode_count.unwrap_or_else(|| ceil_division(total_blocks as u64, 10).max(1) as u32);
	let inode_blocks = ceil_division(inodes as u64, INODES_PER_BLOCK as u64) as u32;

	let bits_per_bitmap_block = 8 * BS as u32;
	let freeblocksmap = ceil_division(total_blocks as u64, bits_per_bitmap_block as u64) as u32;

	let first_bitmap_block = 2u32;
	let first_inode_block = first_bitmap_block + freeblocksmap;
	let reserved_end = first_inode_block + inode_blocks;
	if reserved_end >= total_blocks {
		return Err(FsError::InvalidSize);
	}

	bitmap::init_reserved(device, freeblocksmap, reserved_end)?;

	let inode_geo = InodeGeometry { first_inode_block, n_inodes: inodes };
	inode::init(device, &inode_geo)?;

	// spec.md §3/§4.2: the tree starts empty, `root = -1`; the first
	// `Session::create`/`mkdir` call is what allocates the initial leaf
	// (see `btree::insert`'s `root == NONE` branch).
	let label = options.label.clone().unwrap_or_default();
	info!("formatting image: {total_blocks} blocks, {inodes} inodes, empty root");

	let sb = Superblock {
		total_blocks,
		freeblocksmap,
		first_free_block: reserved_end,
		inodes,
		first_inode_block,
		idcounter: 2, // id 1 is reserved for the (never-materialized) root directory
		root: crate::block::NONE,
		label,
	};
	sb.persist(device)?;
	Ok(sb)
}

/// Updates the volume label and persists the change to both superblock
/// copies.
pub fn set_label(device: &mut BlockDevice, sb: &mut Superblock, label: &str) -> Result<()> {
	sb.label = label.to_owned();
	sb.persist(device)
}

#[cfg(test)]
mod test {
	use super::*;
	use tempfile::NamedTempFile;

	fn sized_file(blocks: u32) -> NamedTempFile {
		let f = NamedTempFile::new().unwrap();
		f.as_file().set_len(blocks as u64 * BS as u64).unwrap();
		f
	}

	#[test]
	fn raw_superblock_is_exactly_one_block() {
		assert_eq!(std::mem::size_of::<RawSuperblock>(), BS);
	}

	#[test]
	fn format_then_load_roundtrips() {
		let f = sized_file(256);
		let mut dev = BlockDevice::open(f.path()).unwrap();
		let opts = FormatOptions { inode_count: Some(32), label: Some("vol".into()) };
		let formatted = format(&mut dev, &opts).unwrap();

		let loaded = load(&mut dev).unwrap();
		assert_eq!(loaded.total_blocks, formatted.total_blocks);
		assert_eq!(loaded.inodes, 32);
		assert_eq!(loaded.label, "vol");
		assert_eq!(loaded.root, formatted.root);
		assert_eq!(loaded.idcounter, 2);
	}

	#[test]
	fn set_label_persists_to_both_copies() {
		let f = sized_file(256);
		let mut dev = BlockDevice::open(f.path()).unwrap();
		let mut sb = format(&mut dev, &FormatOptions::default()).unwrap();
		set_label(&mut dev, &mut sb, "renamed").unwrap();

		let primary = Superblock::from_raw(&read_copy(&mut dev, 0).unwrap()).unwrap();
		let mirror = Superblock::from_raw(&read_copy(&mut dev, MIRROR_BLOCK).unwrap()).unwrap();
		assert_eq!(primary.label, "renamed");
		assert_eq!(mirror.label, "renamed");
	}

	#[test]
	fn load_recovers_from_mirror_when_primary_is_corrupt() {
		let f = sized_file(256);
		let mut dev = BlockDevice::open(f.path()).unwrap();
		format(&mut dev, &FormatOptions::default()).unwrap();

		let mut garbage = [0u8; BS];
		garbage[0] = 0xff;
		dev.write_block(BlockIndex(0), &garbage).unwrap();

		let recovered = load(&mut dev).unwrap();
		assert_eq!(recovered.idcounter, 2);

		// The recovery should have repaired the primary copy in place.
		let primary = read_copy(&mut dev, 0).unwrap();
		assert_eq!(primary.magic, MAGIC);
	}

	#[test]
	fn format_rejects_an_undersized_image() {
		let f = sized_file(1);
		let mut dev = BlockDevice::open(f.path()).unwrap();
		assert!(matches!(format(&mut dev, &FormatOptions::default()), Err(FsError::InvalidSize)));
	}

	#[test]
	fn next_id_is_monotonic_and_survives_a_reload() {
		let f = sized_file(256);
		let mut dev = BlockDevice::open(f.path()).unwrap();
		let mut sb = format(&mut dev, &FormatOptions::default()).unwrap();

		let a = sb.next_id(&mut dev).unwrap();
		let b = sb.next_id(&mut dev).unwrap();
		assert_eq!(b, a + 1);

		let reloaded = load(&mut dev).unwrap();
		assert_eq!(reloaded.idcounter, b + 1);
	}
}
