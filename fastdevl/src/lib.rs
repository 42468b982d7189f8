//! `fastdevl`: a self-contained, single-file block-oriented filesystem
//! image with a B+ tree directory index.
//!
//! The crate is organized bottom-up, each module owning one layer of the
//! on-disk format:
//!
//! - [`block`] (L0): fixed-size block I/O against the backing host file.
//! - [`bitmap`] (L2): the free-block bitmap.
//! - [`inode`] (L3): the flat inode table.
//! - [`stat`]: the per-entry metadata record an inode points at.
//! - [`superblock`] (L1): the mirrored image header.
//! - [`btree`] (L4): the order-340 B+ tree keyed on `(dir_id, id)` that
//!   implements directory listings.
//! - [`fs`] (L5): [`Session`], the namespace and file I/O API most
//!   callers want.
//!
//! Top-level [`format`] and [`mount`] plus [`Session`] are the intended
//! entry points; the layer modules are public so callers needing direct
//! block-level access (an `fsck`-style tool, say) aren't shut out, but
//! ordinary use never touches them.

mod key;
mod wire;

pub mod bitmap;
pub mod block;
pub mod btree;
pub mod error;
pub mod fs;
pub mod inode;
pub mod stat;
pub mod superblock;

pub use error::{FsError, Result};
pub use fs::{format, mount, ByteOffset, DirEntry, Session, ROOT_DIR_ID};
pub use key::Key;
pub use stat::{EntryType, Permissions};
pub use superblock::FormatOptions;
