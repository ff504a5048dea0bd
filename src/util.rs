#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{
	reader::{MapByteReader, MapValue},
	writer::MapByteWriter,
	CdmapResult,
};

/// Displays bytes in string form if they make up a string, else just displays them as bytes.
pub(crate) fn display_magic_number(bytes: &[u8]) -> String {
	std::str::from_utf8(bytes)
		.map(|s| s.trim_end_matches('\0').to_owned())
		.unwrap_or(format!("{bytes:?}"))
}

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// 64-bit FNV-1a over `bytes`, starting from `seed` instead of the usual offset basis.
///
/// Stable across processes and platforms, so hashes can be stored in compiled maps and sent over the network.
pub const fn hash64(bytes: &[u8], seed: u64) -> u64 {
	let mut hash = seed;
	let mut i = 0;
	while i < bytes.len() {
		hash ^= bytes[i] as u64;
		hash = hash.wrapping_mul(FNV_PRIME);
		i += 1;
	}
	hash
}

/// Stable 64-bit hash identifying a named asset such as a map, a sub-model (`"*3"` seeded with its map's hash), or a material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct StringHash(pub u64);

impl StringHash {
	pub const fn new(s: &str) -> Self {
		Self(hash64(s.as_bytes(), FNV_OFFSET_BASIS))
	}

	/// Hashes `s` continuing from another hash, used to derive sub-model hashes from their map.
	pub const fn with_seed(s: &str, seed: StringHash) -> Self {
		Self(hash64(s.as_bytes(), seed.0))
	}
}

impl From<&str> for StringHash {
	fn from(value: &str) -> Self {
		Self::new(value)
	}
}

impl std::fmt::Display for StringHash {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{:016x}", self.0)
	}
}

impl MapValue for StringHash {
	const SIZE: usize = u64::SIZE;
	const ALIGN: usize = u64::ALIGN;

	fn map_parse(reader: &mut MapByteReader) -> CdmapResult<Self> {
		reader.read().map(Self)
	}
	fn map_write(&self, writer: &mut MapByteWriter) {
		self.0.map_write(writer);
	}
}

/// Returned by [`FixedHashtable::insert`] when every slot is taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashtableFull;

/// Open-addressed `u64 -> u64` table that never grows past the capacity it was created with.
///
/// Lookups and inserts never allocate, so memory use is known up front.
#[derive(Debug, Clone)]
pub struct FixedHashtable {
	slots: Box<[Option<(u64, u64)>]>,
	len: usize,
	capacity: usize,
}

impl FixedHashtable {
	pub fn with_capacity(capacity: usize) -> Self {
		// Keep the load factor at or below one half so probe chains stay short.
		let slot_count = (capacity * 2).max(1).next_power_of_two();
		Self {
			slots: vec![None; slot_count].into_boxed_slice(),
			len: 0,
			capacity,
		}
	}

	#[inline]
	pub fn len(&self) -> usize {
		self.len
	}

	#[inline]
	pub fn is_empty(&self) -> bool {
		self.len == 0
	}

	#[inline]
	pub fn capacity(&self) -> usize {
		self.capacity
	}

	/// Slot indices to visit for `key` in a table of `slot_count` (a power of two) slots.
	fn probe(slot_count: usize, key: u64) -> impl Iterator<Item = usize> {
		let mask = slot_count - 1;
		let start = key as usize & mask;
		(0..slot_count).map(move |i| (start + i) & mask)
	}

	pub fn get(&self, key: u64) -> Option<u64> {
		for slot in Self::probe(self.slots.len(), key) {
			match self.slots[slot] {
				Some((k, v)) if k == key => return Some(v),
				Some(_) => continue,
				None => return None,
			}
		}
		None
	}

	/// Inserts or replaces `key`. Returns the previous value if there was one.
	pub fn insert(&mut self, key: u64, value: u64) -> Result<Option<u64>, HashtableFull> {
		let mut free = None;
		for slot in Self::probe(self.slots.len(), key) {
			match self.slots[slot] {
				Some((k, v)) if k == key => {
					self.slots[slot] = Some((key, value));
					return Ok(Some(v));
				}
				Some(_) => continue,
				None => {
					free = Some(slot);
					break;
				}
			}
		}

		if self.len >= self.capacity {
			return Err(HashtableFull);
		}
		let Some(slot) = free else { return Err(HashtableFull) };
		self.slots[slot] = Some((key, value));
		self.len += 1;
		Ok(None)
	}

	pub fn clear(&mut self) {
		self.slots.fill(None);
		self.len = 0;
	}
}
