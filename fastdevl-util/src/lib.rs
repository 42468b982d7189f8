//! Small utility helpers shared across the `fastdevl` crate, kept separate so
//! they can be unit-tested in isolation from disk I/O.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};

/// The length, in bytes, of a formatted timestamp including the trailing NUL.
pub const TIMESTAMP_LEN: usize = 25;

/// Returns the number of whole seconds since the Unix epoch.
pub fn unix_seconds() -> u64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.unwrap_or(Duration::ZERO)
		.as_secs()
}

/// Formats a Unix timestamp the way `asctime(3)` does, truncated to its
/// 24 visible characters (`"Www Mmm dd hh:mm:ss yyyy"`, no trailing
/// newline), NUL-padded to [`TIMESTAMP_LEN`] bytes.
pub fn format_timestamp(unix_secs: u64) -> [u8; TIMESTAMP_LEN] {
	let dt: DateTime<Utc> = match DateTime::from_timestamp(unix_secs as i64, 0) {
		Some(dt) => dt,
		None => DateTime::from_timestamp(0, 0).expect("unix epoch is always a valid timestamp"),
	};
	let text = dt.format("%a %b %e %H:%M:%S %Y").to_string();

	let mut buf = [0u8; TIMESTAMP_LEN];
	let bytes = text.as_bytes();
	let len = bytes.len().min(TIMESTAMP_LEN - 1);
	buf[..len].copy_from_slice(&bytes[..len]);
	buf
}

/// Ceiling division for unsigned integers: `ceil(numerator / denominator)`.
pub fn ceil_division(numerator: u64, denominator: u64) -> u64 {
	(numerator + denominator - 1) / denominator
}

/// Copies `src` into a fixed-size, NUL-padded byte array of length `N`,
/// truncating if necessary. Used for the on-disk `label` and `name` fields.
pub fn pad_bytes<const N: usize>(src: &str) -> [u8; N] {
	let mut buf = [0u8; N];
	let bytes = src.as_bytes();
	let len = bytes.len().min(N - 1);
	buf[..len].copy_from_slice(&bytes[..len]);
	buf
}

/// Reads a NUL-terminated (or fully-populated) byte array back into a
/// lossy UTF-8 `String`, stopping at the first NUL.
pub fn string_from_bytes(src: &[u8]) -> String {
	let end = src.iter().position(|&b| b == 0).unwrap_or(src.len());
	String::from_utf8_lossy(&src[..end]).into_owned()
}
