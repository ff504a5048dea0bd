//! Data definitions for the kd-tree and the brushes it indexes.

use crate::prelude::*;
use crate::CdmapError;

/// Axis a kd-tree node splits along.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum Axis {
	X = 0,
	Y = 1,
	Z = 2,
}

impl Axis {
	pub const ALL: [Self; 3] = [Self::X, Self::Y, Self::Z];

	#[inline]
	pub const fn index(self) -> usize {
		self as usize
	}

	#[inline]
	pub fn from_index(index: usize) -> Option<Self> {
		Self::ALL.get(index).copied()
	}

	/// The next axis, wrapping from Z back to X.
	#[inline]
	pub fn next(self) -> Self {
		Self::ALL[(self.index() + 1) % 3]
	}
}

/// A node of a model's kd-tree.
///
/// Stored in 16 bytes: a `u32` tag (0-2 for the split axis of an interior node, 3 for a leaf) followed by 3 `u32`-sized fields.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum KdTreeNode {
	/// Splits space at `distance` along `axis`. Both children are indices into the node array, always greater than the node's own index.
	Interior { axis: Axis, distance: f32, below: u32, above: u32 },
	/// A range into the brush index array.
	Leaf { first_brush: u32, num_brushes: u32 },
}

impl KdTreeNode {
	const LEAF_TAG: u32 = 3;

	#[inline]
	pub fn is_leaf(&self) -> bool {
		matches!(self, Self::Leaf { .. })
	}
}

impl MapValue for KdTreeNode {
	const SIZE: usize = u32::SIZE * 4;
	const ALIGN: usize = u32::ALIGN;

	fn map_parse(reader: &mut MapByteReader) -> CdmapResult<Self> {
		let tag: u32 = reader.read()?;

		if tag == Self::LEAF_TAG {
			let node = Self::Leaf {
				first_brush: reader.read()?,
				num_brushes: reader.read()?,
			};
			reader.read::<u32>()?;
			return Ok(node);
		}

		let Some(axis) = Axis::from_index(tag as usize) else {
			return Err(CdmapError::InvalidVariant {
				value: tag,
				acceptable: "0 (X split), 1 (Y split), 2 (Z split), 3 (leaf)",
			});
		};
		Ok(Self::Interior {
			axis,
			distance: reader.read()?,
			below: reader.read()?,
			above: reader.read()?,
		})
	}

	fn map_write(&self, writer: &mut MapByteWriter) {
		match *self {
			Self::Interior { axis, distance, below, above } => {
				writer.write(&(axis.index() as u32));
				writer.write(&distance);
				writer.write(&below);
				writer.write(&above);
			}
			Self::Leaf { first_brush, num_brushes } => {
				writer.write(&Self::LEAF_TAG);
				writer.write(&first_brush);
				writer.write(&num_brushes);
				writer.write(&0u32);
			}
		}
	}
}

/// A convex brush used for collision. Its planes start with the 6 planes of its bounding box, followed by its own face planes.
#[derive(MapValue, Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MapBrush {
	/// Index into the brush-plane index array.
	pub first_plane: u32,
	pub num_planes: u16,
	pub solidity: SolidBits,
}
