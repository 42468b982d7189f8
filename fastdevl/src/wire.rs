//! Byte-level (de)serialization of the fixed-size on-disk records.
//!
//! Grounded on `mkfs::ext2`'s `#[repr(C, packed)]` structs reinterpreted
//! directly as byte slices (its `reinterpret`/`slice::from_raw_parts`
//! pattern, see `Superblock`/`BlockGroupDescriptor`/`INode` there). Records
//! here are `packed` for the same reason ext2's are: the byte layout is the
//! format, and packing removes any compiler-chosen padding from the
//! equation, leaving only the padding fields this module writes explicitly.

use std::mem::size_of;

/// Reinterprets a `#[repr(C, packed)]`, `Copy` record of exactly `N` bytes as
/// a fixed-size byte array, ready to hand to [`crate::block::BlockDevice`].
pub fn to_bytes<T: Copy, const N: usize>(value: &T) -> [u8; N] {
	debug_assert_eq!(size_of::<T>(), N);
	let mut buf = [0u8; N];
	unsafe {
		std::ptr::copy_nonoverlapping(value as *const T as *const u8, buf.as_mut_ptr(), N);
	}
	buf
}

/// The inverse of [`to_bytes`]: reinterprets a fixed-size byte array as a
/// `#[repr(C, packed)]` record. Uses an unaligned read since packed structs
/// carry no alignment guarantee.
pub fn from_bytes<T: Copy, const N: usize>(buf: &[u8; N]) -> T {
	debug_assert_eq!(size_of::<T>(), N);
	unsafe { std::ptr::read_unaligned(buf.as_ptr() as *const T) }
}
