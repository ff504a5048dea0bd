//! Data definitions related to entities, models and render meshes.

use crate::prelude::*;

/// An entity's key/value pairs and the model it owns, if any.
#[derive(MapValue, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MapEntityRecord {
	/// Byte range into the entity data section, holding `key\0value\0` pairs.
	pub data_offset: u32,
	pub data_len: u32,
	pub num_key_values: u32,
	/// Index into the model array, `-1` for point entities.
	pub model: i32,
}

impl MapEntityRecord {
	#[inline]
	pub fn model(&self) -> Option<usize> {
		usize::try_from(self.model).ok()
	}
}

/// Geometry owned by one entity. Model 0 is the world.
#[derive(MapValue, Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MapModel {
	/// Bounds of all brushes and patches of the model, in the model's own space.
	pub bounds: MinMax3,
	/// Index of the kd-tree root, always an interior node.
	pub root_node: u32,
	pub first_mesh: u32,
	pub num_meshes: u32,
}

/// All triangles of one material within a model. Indices are relative to `first_vertex`.
#[derive(MapValue, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MapMesh {
	pub material: StringHash,
	pub first_vertex: u32,
	pub num_vertices: u32,
	pub first_index: u32,
	pub num_indices: u32,
}

#[derive(MapValue, Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MapVertex {
	pub position: Vec3,
	pub normal: Vec3,
	pub uv: Vec2,
}
