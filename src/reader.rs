//! Module containing the core of reading a compiled cdmap blob and interpreting it into structured data.

use std::mem;

use crate::{prelude::*, CdmapError};

/// Like a [`Cursor`](std::io::Cursor), but without juggling buffers or `io::Error`s.
#[derive(Clone)]
pub struct MapByteReader<'a> {
	bytes: &'a [u8],
	pos: usize,
}

impl<'a> MapByteReader<'a> {
	#[inline]
	pub fn new(bytes: &'a [u8]) -> Self {
		Self { bytes, pos: 0 }
	}

	fn rest(&self) -> &[u8] {
		&self.bytes[self.pos.min(self.bytes.len())..]
	}

	#[inline]
	pub fn len(&self) -> usize {
		self.rest().len()
	}

	#[inline]
	pub fn is_empty(&self) -> bool {
		self.rest().is_empty()
	}

	#[inline]
	pub fn read<T: MapValue>(&mut self) -> CdmapResult<T> {
		T::map_parse(self)
	}

	#[inline]
	pub fn read_bytes(&mut self, count: usize) -> CdmapResult<&'a [u8]> {
		let (from, to) = (self.pos, self.pos + count);
		if to > self.bytes.len() {
			return Err(CdmapError::BufferOutOfBounds {
				from,
				to,
				size: self.bytes.len(),
			});
		}
		let bytes = &self.bytes[from..to];
		self.pos += count;
		Ok(bytes)
	}

	#[inline]
	pub fn with_pos(&self, pos: usize) -> Self {
		Self { bytes: self.bytes, pos }
	}

	#[inline]
	pub fn pos(&self) -> usize {
		self.pos
	}
}

/// Defines how a type is laid out in a cdmap blob.
///
/// Values are little-endian and records are packed field by field. `ALIGN` only matters for the start of sections, which the
/// writer pads to the alignment of their element type.
pub trait MapValue: Sized {
	/// Size of the value on disk in bytes.
	const SIZE: usize;
	/// Alignment the section holding this value is padded to.
	const ALIGN: usize;

	fn map_parse(reader: &mut MapByteReader) -> CdmapResult<Self>;
	fn map_write(&self, writer: &mut crate::writer::MapByteWriter);
}

macro_rules! impl_map_value_primitive {
	($ty:ty) => {
		impl MapValue for $ty {
			const SIZE: usize = size_of::<$ty>();
			const ALIGN: usize = size_of::<$ty>();

			#[inline]
			fn map_parse(reader: &mut MapByteReader) -> CdmapResult<Self> {
				let mut buf = [0; size_of::<$ty>()];
				buf.copy_from_slice(reader.read_bytes(size_of::<$ty>())?);
				Ok(<$ty>::from_le_bytes(buf))
			}
			#[inline]
			fn map_write(&self, writer: &mut crate::writer::MapByteWriter) {
				writer.write_bytes(&self.to_le_bytes());
			}
		}
	};
}

macro_rules! impl_map_value_vector {
	($ty:ty : [$element:ty; $count:expr]) => {
		impl MapValue for $ty {
			const SIZE: usize = <$element as MapValue>::SIZE * $count;
			const ALIGN: usize = <$element as MapValue>::ALIGN;

			fn map_parse(reader: &mut MapByteReader) -> CdmapResult<Self> {
				Ok(<$ty>::from_array(reader.read::<[$element; $count]>()?))
			}
			fn map_write(&self, writer: &mut crate::writer::MapByteWriter) {
				self.to_array().map_write(writer);
			}
		}
	};
}

impl_map_value_primitive!(u8);
impl_map_value_primitive!(u16);
impl_map_value_primitive!(u32);
impl_map_value_primitive!(u64);

impl_map_value_primitive!(i32);

impl_map_value_primitive!(f32);

impl_map_value_vector!(Vec2: [f32; 2]);
impl_map_value_vector!(Vec3: [f32; 3]);

impl<T: MapValue, const N: usize> MapValue for [T; N] {
	const SIZE: usize = T::SIZE * N;
	const ALIGN: usize = T::ALIGN;

	#[inline]
	fn map_parse(reader: &mut MapByteReader) -> CdmapResult<Self> {
		// Look ma, no heap allocations!
		let mut out = [(); N].map(|_| mem::MaybeUninit::<T>::uninit());
		for i in 0..N {
			match reader.read() {
				Ok(value) => {
					out[i].write(value);
				}
				Err(err) => {
					// Drop what was already read before bailing.
					for written in &mut out[..i] {
						unsafe { written.assume_init_drop() };
					}
					return Err(err);
				}
			}
		}
		Ok(out.map(|v| unsafe { v.assume_init() }))
	}
	#[inline]
	fn map_write(&self, writer: &mut crate::writer::MapByteWriter) {
		for value in self {
			value.map_write(writer);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::writer::MapByteWriter;

	#[test]
	fn out_of_bounds() {
		let mut reader = MapByteReader::new(&[1, 2, 3]);
		assert_eq!(reader.read::<u16>().unwrap(), 0x0201);
		assert!(matches!(
			reader.read::<u32>(),
			Err(CdmapError::BufferOutOfBounds { from: 2, to: 6, size: 3 })
		));
	}

	#[test]
	fn vectors_are_little_endian_floats() {
		let mut writer = MapByteWriter::new();
		vec3(1., -2., 0.5).map_write(&mut writer);
		let bytes = writer.into_bytes();
		assert_eq!(bytes.len(), Vec3::SIZE);
		assert_eq!(&bytes[0..4], &1f32.to_le_bytes());

		let mut reader = MapByteReader::new(&bytes);
		assert_eq!(reader.read::<Vec3>().unwrap(), vec3(1., -2., 0.5));
		assert!(reader.is_empty());
	}
}
