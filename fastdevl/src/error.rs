//! Error kinds surfaced by the core filesystem API.

use std::io;

use thiserror::Error;

/// Every error the core can return. None of these are swallowed internally;
/// split/promote failures on the B+ tree propagate [`FsError::NoSpace`]
/// immediately and may leave partial state on disk, per the format's
/// documented lack of crash consistency.
#[derive(Debug, Error)]
pub enum FsError {
	/// The superblock (and its mirror) do not carry the expected magic.
	#[error("invalid or missing superblock magic")]
	InvalidMagic,
	/// The backing file is too small to hold a superblock, bitmap and at
	/// least one inode block.
	#[error("backing file too small for superblock, bitmap and inode table")]
	InvalidSize,
	/// The free-block bitmap has no remaining unset bit.
	#[error("no free blocks remaining in the image")]
	NoSpace,
	/// The inode table has no free slot.
	#[error("no free inodes remaining in the image")]
	NoInodes,
	/// An entry with the same `(parent_id, name, type)` already exists.
	#[error("entry already exists")]
	Exists,
	/// A lookup that required a match found none.
	#[error("entry not found")]
	NotFound,
	/// A read or write against the image's backing file failed.
	#[error("image I/O error: {0}")]
	Io(#[from] io::Error),
	/// A read or write against a host file (import source / extract
	/// destination) failed.
	#[error("host file I/O error: {0}")]
	HostIo(io::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, FsError>;
