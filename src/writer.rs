//! Serializing structured data back into a cdmap blob.

use crate::reader::MapValue;

/// Append-only byte buffer with helpers for writing [`MapValue`]s and padding sections.
#[derive(Debug, Clone, Default)]
pub struct MapByteWriter {
	bytes: Vec<u8>,
}

impl MapByteWriter {
	#[inline]
	pub fn new() -> Self {
		Self::default()
	}

	#[inline]
	pub fn pos(&self) -> usize {
		self.bytes.len()
	}

	#[inline]
	pub fn write_bytes(&mut self, bytes: &[u8]) {
		self.bytes.extend_from_slice(bytes);
	}

	#[inline]
	pub fn write<T: MapValue>(&mut self, value: &T) {
		value.map_write(self);
	}

	/// Pads with zero bytes until the position is a multiple of `align`.
	pub fn align_to(&mut self, align: usize) {
		let align = align.max(1);
		let padding = (align - self.bytes.len() % align) % align;
		self.bytes.resize(self.bytes.len() + padding, 0);
	}

	/// Overwrites already written bytes starting at `pos`. Used for patching headers once offsets are known.
	pub fn overwrite(&mut self, pos: usize, bytes: &[u8]) {
		let end = (pos + bytes.len()).min(self.bytes.len());
		let count = end.saturating_sub(pos);
		self.bytes[pos..end].copy_from_slice(&bytes[..count]);
	}

	#[inline]
	pub fn into_bytes(self) -> Vec<u8> {
		self.bytes
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn alignment_pads_with_zeros() {
		let mut writer = MapByteWriter::new();
		writer.write(&7u8);
		writer.align_to(8);
		assert_eq!(writer.pos(), 8);
		writer.align_to(8);
		assert_eq!(writer.pos(), 8);
		writer.write(&0xFFFF_FFFFu32);
		writer.overwrite(1, &[9, 9]);
		assert_eq!(writer.into_bytes(), [7, 9, 9, 0, 0, 0, 0, 0, 0xFF, 0xFF, 0xFF, 0xFF]);
	}
}
