//! Loaded collision data, looked up by name hash.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::{
	data::{MapData, MapModel},
	geom::{POINT_IN_BRUSH_EPSILON, POSITION_EPSILON},
	prelude::*,
};

pub const MAX_GLTF_COLLISION_MODELS: usize = 4096;
pub const MAX_MAPS: usize = 128;
/// Across all loaded maps.
pub const MAX_MAP_MODELS: usize = 4096;

#[derive(Debug, Clone, Error)]
pub enum CollisionError {
	#[error("Can't load more than {max} {what}")]
	StorageFull { what: &'static str, max: usize },
	#[error("Invalid map data: {0}")]
	InvalidMap(#[from] CdmapError),
	#[error("{count} indices don't make up whole triangles")]
	PartialTriangle { count: usize },
	#[error("Vertex index {index} out of range ({num_vertices} vertices)")]
	VertexIndexOutOfRange { index: u32, num_vertices: usize },
	#[error("Triangle {triangle} is degenerate")]
	DegenerateTriangle { triangle: usize },
	#[error("Mesh isn't convex, vertex {vertex} is {distance} units in front of plane {plane}")]
	NonConvex { vertex: usize, plane: usize, distance: f32 },

	/// For telling the user exactly where the error occurred in the process.
	#[error("{0} - {1}")]
	DoingJob(String, Box<CollisionError>),
}
crate::impl_doing_job!(CollisionError);

/// A node of a collision mesh, such as one from a GLTF scene. Every node with an editor material becomes one convex brush.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CollisionMeshNode {
	/// Node to model space.
	pub transform: Mat4,
	pub material: String,
	pub positions: Vec<Vec3>,
	/// Triangle list, counter-clockwise when seen from outside.
	pub indices: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ConvexBrush {
	/// Bounding box planes, followed by the distinct planes of the triangles.
	pub planes: SmallVec<[Plane; 16]>,
	pub vertices: Vec<Vec3>,
	pub solidity: SolidBits,
}

/// The convex brushes of one collision model.
#[derive(Debug, Clone, PartialEq, Default, derive_more::Deref, derive_more::IntoIterator)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct GltfCollisionData {
	pub bounds: MinMax3,
	#[deref]
	#[into_iterator(owned, ref)]
	pub brushes: Vec<ConvexBrush>,
}

impl ConvexBrush {
	/// Builds a brush out of the triangles of `node`, which must enclose a convex volume.
	pub fn from_mesh_node(node: &CollisionMeshNode, solidity: SolidBits) -> Result<Self, CollisionError> {
		if node.indices.len() % 3 != 0 {
			return Err(CollisionError::PartialTriangle { count: node.indices.len() });
		}

		let mut vertices: Vec<Vec3> = Vec::with_capacity(node.positions.len());
		let remap: Vec<usize> = node
			.positions
			.iter()
			.map(|&position| {
				let point = node.transform.transform_point3(position);
				match vertices.iter().position(|vertex| vertex.distance(point) <= POSITION_EPSILON) {
					Some(index) => index,
					None => {
						vertices.push(point);
						vertices.len() - 1
					}
				}
			})
			.collect();

		let bounds = MinMax3::from_points(vertices.iter().copied());
		let mut planes: SmallVec<[Plane; 16]> = SmallVec::from_slice(&bounds.planes());
		let num_bevels = planes.len();

		for (triangle_idx, triangle) in node.indices.chunks_exact(3).enumerate() {
			let mut corners = [Vec3::ZERO; 3];
			for (corner, &index) in corners.iter_mut().zip(triangle) {
				let Some(&vertex) = remap.get(index as usize) else {
					return Err(CollisionError::VertexIndexOutOfRange {
						index,
						num_vertices: node.positions.len(),
					});
				};
				*corner = vertices[vertex];
			}

			let [a, b, c] = corners;
			let plane = Plane::from_points(a, c, b).ok_or(CollisionError::DegenerateTriangle { triangle: triangle_idx })?;
			if !planes.iter().any(|existing| existing.approx_eq(&plane)) {
				planes.push(plane);
			}
		}

		for (vertex_idx, &vertex) in vertices.iter().enumerate() {
			for (plane_idx, plane) in planes.iter().enumerate().skip(num_bevels) {
				let distance = plane.point_side(vertex);
				if distance > POINT_IN_BRUSH_EPSILON {
					return Err(CollisionError::NonConvex {
						vertex: vertex_idx,
						plane: plane_idx,
						distance,
					});
				}
			}
		}

		Ok(Self { planes, vertices, solidity })
	}
}

/// A loaded map and the name its sub-model names are seeded with.
#[derive(Debug, Clone)]
pub struct MapCollisionData {
	pub name: StringHash,
	pub data: MapData,
}

/// Owns every loaded map and convex collision model. Lookups are by [`StringHash`], into tables of fixed capacity.
#[derive(Debug, Clone)]
pub struct CollisionModelStorage {
	maps: Vec<MapCollisionData>,
	map_table: FixedHashtable,
	/// Sub-model hash to `map index << 32 | model index`.
	map_model_table: FixedHashtable,
	gltf: Vec<GltfCollisionData>,
	gltf_table: FixedHashtable,
}

impl Default for CollisionModelStorage {
	fn default() -> Self {
		Self::new()
	}
}

impl CollisionModelStorage {
	pub fn new() -> Self {
		Self {
			maps: Vec::new(),
			map_table: FixedHashtable::with_capacity(MAX_MAPS),
			map_model_table: FixedHashtable::with_capacity(MAX_MAP_MODELS),
			gltf: Vec::new(),
			gltf_table: FixedHashtable::with_capacity(MAX_GLTF_COLLISION_MODELS),
		}
	}

	/// The hash models of the map `map` are found by, such as `*0` for the world.
	#[inline]
	pub fn sub_model_hash(map: StringHash, model: usize) -> StringHash {
		StringHash::with_seed(&format!("*{model}"), map)
	}

	#[inline]
	pub fn num_map_models(&self) -> usize {
		self.map_model_table.len()
	}

	/// Loads (or replaces) the map named `name`, making its models available as [`Self::sub_model_hash`]`(name, i)`.
	///
	/// Nothing changes if an error is returned.
	pub fn load_map_collision_data(&mut self, name: StringHash, data: MapData) -> Result<(), CollisionError> {
		data.validate().job(format!("Loading map {name}"))?;

		let existing = self.map_table.get(name.0).map(|index| index as usize);
		if existing.is_none() && self.maps.len() >= MAX_MAPS {
			return Err(CollisionError::StorageFull { what: "maps", max: MAX_MAPS });
		}
		let replaced_models = existing.map_or(0, |index| self.maps[index].data.models.len());
		if self.num_map_models() - replaced_models + data.models.len() > MAX_MAP_MODELS {
			return Err(CollisionError::StorageFull {
				what: "map models",
				max: MAX_MAP_MODELS,
			});
		}

		log::debug!("Loaded map {name} with {} models and {} brushes", data.models.len(), data.brushes.len());
		let map = MapCollisionData { name, data };
		match existing {
			Some(index) => self.maps[index] = map,
			None => {
				self.map_table.insert(name.0, self.maps.len() as u64).map_err(|_| CollisionError::StorageFull { what: "maps", max: MAX_MAPS })?;
				self.maps.push(map);
			}
		}

		self.map_model_table.clear();
		for (map_idx, map) in self.maps.iter().enumerate() {
			for model_idx in 0..map.data.models.len() {
				self.map_model_table
					.insert(Self::sub_model_hash(map.name, model_idx).0, (map_idx as u64) << 32 | model_idx as u64)
					.map_err(|_| CollisionError::StorageFull {
						what: "map models",
						max: MAX_MAP_MODELS,
					})?;
			}
		}

		Ok(())
	}

	/// Builds a convex brush from every node whose material is an editor material, and stores them as `name`, replacing what was there.
	///
	/// Nodes without an editor material or without triangles are skipped. If no brushes are left, nothing is stored.
	pub fn load_gltf_collision_data<M: MaterialLookup + ?Sized>(
		&mut self,
		name: StringHash,
		nodes: &[CollisionMeshNode],
		materials: &M,
	) -> Result<(), CollisionError> {
		let mut data = GltfCollisionData::default();

		for (node_idx, node) in nodes.iter().enumerate() {
			let Some(material) = materials.find_editor_material(StringHash::new(&node.material)) else {
				log::warn!(
					"Collision model {name} node {node_idx} has material \"{}\", which isn't an editor material. Skipping",
					node.material
				);
				continue;
			};
			if node.indices.is_empty() {
				log::warn!("Collision model {name} node {node_idx} has no triangles. Skipping");
				continue;
			}

			let brush = ConvexBrush::from_mesh_node(node, material.solidity).job(format!("Collision model {name} node {node_idx}"))?;
			data.bounds = data.bounds.union(MinMax3::from_points(brush.vertices.iter().copied()));
			data.brushes.push(brush);
		}

		if data.brushes.is_empty() {
			log::debug!("Collision model {name} has no brushes");
			return Ok(());
		}

		match self.gltf_table.get(name.0) {
			Some(index) => self.gltf[index as usize] = data,
			None => {
				self.gltf_table.insert(name.0, self.gltf.len() as u64).map_err(|_| CollisionError::StorageFull {
					what: "collision models",
					max: MAX_GLTF_COLLISION_MODELS,
				})?;
				self.gltf.push(data);
			}
		}
		Ok(())
	}

	pub fn find_map(&self, name: StringHash) -> Option<&MapData> {
		let index = self.map_table.get(name.0)?;
		self.maps.get(index as usize).map(|map| &map.data)
	}

	/// Looks up a model by the hash of its sub-model name, see [`Self::sub_model_hash`].
	pub fn find_map_model(&self, sub_model: StringHash) -> Option<(&MapData, &MapModel)> {
		let packed = self.map_model_table.get(sub_model.0)?;
		let map = &self.maps.get((packed >> 32) as usize)?.data;
		Some((map, map.models.get((packed & u32::MAX as u64) as usize)?))
	}

	pub fn find_gltf_collision_data(&self, name: StringHash) -> Option<&GltfCollisionData> {
		let index = self.gltf_table.get(name.0)?;
		self.gltf.get(index as usize)
	}
}

/// Storage shared between threads that query it, which can be swapped out wholesale when maps are hotloaded.
///
/// Readers hold onto a snapshot, so a swap never changes data under a query in progress.
#[derive(Debug, Default)]
pub struct SharedCollisionStorage {
	current: RwLock<Arc<CollisionModelStorage>>,
}

impl SharedCollisionStorage {
	pub fn new(storage: CollisionModelStorage) -> Self {
		Self {
			current: RwLock::new(Arc::new(storage)),
		}
	}

	#[inline]
	pub fn snapshot(&self) -> Arc<CollisionModelStorage> {
		self.current.read().clone()
	}

	/// Makes `storage` current, returning the previous one.
	pub fn replace(&self, storage: CollisionModelStorage) -> Arc<CollisionModelStorage> {
		std::mem::replace(&mut *self.current.write(), Arc::new(storage))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{
		collision::{trace_vs_ent, CollisionModel, EntityState, Ray, Shape},
		data::KdTreeNode,
		material::EditorMaterials,
	};

	fn cube_node(material: &str, transform: Mat4) -> CollisionMeshNode {
		let positions = (0..8)
			.map(|i| vec3(if i & 1 != 0 { 1. } else { -1. }, if i & 2 != 0 { 1. } else { -1. }, if i & 4 != 0 { 1. } else { -1. }))
			.collect::<Vec<_>>();

		let mut indices = Vec::new();
		for axis in 0..3 {
			for side in 0..2 {
				let (u, v) = ((axis + 1) % 3, (axis + 2) % 3);
				let quad = [(0, 0), (1, 0), (1, 1), (0, 1)].map(|(bu, bv)| {
					let mut bits = [0u32; 3];
					bits[axis] = side;
					bits[u] = bu;
					bits[v] = bv;
					bits[0] | bits[1] << 1 | bits[2] << 2
				});
				for [a, b, c] in [[quad[0], quad[1], quad[2]], [quad[0], quad[2], quad[3]]] {
					let [pa, pb, pc] = [a, b, c].map(|i| positions[i as usize]);
					// Counter-clockwise from outside.
					if (pb - pa).cross(pc - pa).dot(pa + pb + pc) > 0. {
						indices.extend([a, b, c]);
					} else {
						indices.extend([a, c, b]);
					}
				}
			}
		}

		CollisionMeshNode {
			transform,
			material: material.into(),
			positions,
			indices,
		}
	}

	/// A map with `num_models` empty models.
	fn empty_map(num_models: usize) -> MapData {
		MapData {
			models: vec![
				MapModel {
					bounds: MinMax3::EMPTY,
					root_node: 0,
					first_mesh: 0,
					num_meshes: 0,
				};
				num_models
			],
			nodes: vec![KdTreeNode::Leaf { first_brush: 0, num_brushes: 0 }],
			..Default::default()
		}
	}

	#[test]
	fn gltf_cube() {
		let mut storage = CollisionModelStorage::new();
		let name = StringHash::new("models/crate.glb");
		let node = cube_node("editor/nodraw", Mat4::from_translation(vec3(100., 0., 0.)));
		storage.load_gltf_collision_data(name, &[node], &EditorMaterials).unwrap();

		let data = storage.find_gltf_collision_data(name).unwrap();
		assert_eq!(data.len(), 1);
		assert_eq!(data.bounds, MinMax3::new(vec3(99., -1., -1.), vec3(101., 1., 1.)));
		for brush in data {
			// The triangle planes are the same as the bounding box planes.
			assert_eq!(brush.planes.len(), 6);
			assert_eq!(brush.vertices.len(), 8);
			assert_eq!(brush.solidity, SolidBits::WORLD);
		}

		let hit = data.sweep(&Ray::from_points(Vec3::ZERO, vec3(200., 0., 0.)), &Shape::Ray, SolidBits::EVERYTHING).unwrap();
		assert!((hit.t - 99.).abs() < 1e-4);
		assert_eq!(hit.normal, Vec3::NEG_X);
		assert_eq!(data.sweep(&Ray::from_points(Vec3::ZERO, vec3(200., 0., 0.)), &Shape::Ray, SolidBits::SHOT), None);

		let ent = EntityState {
			number: 4,
			origin: vec3(0., 50., 0.),
			override_collision_model: Some(CollisionModel::Gltf(name)),
			..Default::default()
		};
		let trace = trace_vs_ent(&storage, &Ray::from_points(vec3(0., 50., 0.), vec3(200., 50., 0.)), &Shape::Ray, &ent, SolidBits::WORLD);
		assert_eq!(trace.ent, 4);
		assert!((trace.fraction - 99. / 200.).abs() < 1e-5);
	}

	#[test]
	fn rotated_and_scaled_node() {
		let transform = Mat4::from_scale_rotation_translation(vec3(2., 3., 4.), Quat::from_rotation_z(std::f32::consts::FRAC_PI_4), Vec3::Z * 10.);
		let brush = ConvexBrush::from_mesh_node(&cube_node("editor/nodraw", transform), SolidBits::WORLD).unwrap();
		assert_eq!(brush.vertices.len(), 8);
		// The top and bottom are still axis aligned, the sides aren't.
		assert_eq!(brush.planes.len(), 10);
	}

	#[test]
	fn mesh_errors() {
		let mut dented = cube_node("editor/nodraw", Mat4::IDENTITY);
		dented.positions[7] = Vec3::splat(0.2);
		let mut storage = CollisionModelStorage::new();
		let err = storage.load_gltf_collision_data(StringHash::new("dented"), &[dented], &EditorMaterials).unwrap_err();
		assert!(matches!(err, CollisionError::DoingJob(..)));
		assert!(matches!(err.root(), CollisionError::NonConvex { .. }));
		assert!(storage.find_gltf_collision_data(StringHash::new("dented")).is_none());

		let flat = CollisionMeshNode {
			positions: vec![Vec3::ZERO, Vec3::X, Vec3::X * 2.],
			indices: vec![0, 1, 2],
			..Default::default()
		};
		assert!(matches!(
			ConvexBrush::from_mesh_node(&flat, SolidBits::WORLD),
			Err(CollisionError::DegenerateTriangle { triangle: 0 })
		));

		let mut partial = cube_node("editor/nodraw", Mat4::IDENTITY);
		partial.indices.pop();
		assert!(matches!(
			ConvexBrush::from_mesh_node(&partial, SolidBits::WORLD),
			Err(CollisionError::PartialTriangle { count: 35 })
		));

		let mut out_of_range = cube_node("editor/nodraw", Mat4::IDENTITY);
		out_of_range.indices[4] = 8;
		assert!(matches!(
			ConvexBrush::from_mesh_node(&out_of_range, SolidBits::WORLD),
			Err(CollisionError::VertexIndexOutOfRange { index: 8, num_vertices: 8 })
		));
	}

	#[test]
	fn nodes_without_editor_materials_are_skipped() {
		let mut storage = CollisionModelStorage::new();
		let name = StringHash::new("rock");
		let nodes = [
			cube_node("rock", Mat4::IDENTITY),
			CollisionMeshNode {
				material: "editor/clip".into(),
				..Default::default()
			},
		];
		storage.load_gltf_collision_data(name, &nodes, &EditorMaterials).unwrap();
		assert!(storage.find_gltf_collision_data(name).is_none());
	}

	#[test]
	fn reloading_replaces() {
		let mut storage = CollisionModelStorage::new();
		let name = StringHash::new("crate");
		storage.load_gltf_collision_data(name, &[cube_node("editor/clip", Mat4::IDENTITY)], &EditorMaterials).unwrap();
		storage
			.load_gltf_collision_data(name, &[cube_node("editor/clip", Mat4::from_translation(Vec3::X * 10.))], &EditorMaterials)
			.unwrap();
		assert_eq!(storage.find_gltf_collision_data(name).unwrap().bounds.center(), Vec3::X * 10.);
		assert_eq!(storage.gltf.len(), 1);

		let map = StringHash::new("maps/a");
		storage.load_map_collision_data(map, empty_map(3)).unwrap();
		assert!(storage.find_map(map).is_some());
		assert_eq!(storage.num_map_models(), 3);
		assert!(storage.find_map_model(CollisionModelStorage::sub_model_hash(map, 2)).is_some());

		storage.load_map_collision_data(map, empty_map(1)).unwrap();
		assert_eq!(storage.num_map_models(), 1);
		assert!(storage.find_map_model(CollisionModelStorage::sub_model_hash(map, 0)).is_some());
		assert!(storage.find_map_model(CollisionModelStorage::sub_model_hash(map, 2)).is_none());
		assert!(storage.find_map_model(StringHash::new("*0")).is_none());
	}

	#[test]
	fn capacity() {
		let mut storage = CollisionModelStorage::new();
		for i in 0..MAX_MAPS {
			storage.load_map_collision_data(StringHash::new(&format!("maps/{i}")), empty_map(1)).unwrap();
		}
		assert!(matches!(
			storage.load_map_collision_data(StringHash::new("maps/one_too_many"), empty_map(1)),
			Err(CollisionError::StorageFull { what: "maps", .. })
		));
		// Replacing still works when full.
		storage.load_map_collision_data(StringHash::new("maps/0"), empty_map(2)).unwrap();

		let mut storage = CollisionModelStorage::new();
		assert!(matches!(
			storage.load_map_collision_data(StringHash::new("maps/huge"), empty_map(MAX_MAP_MODELS + 1)),
			Err(CollisionError::StorageFull { what: "map models", .. })
		));
		assert!(storage.find_map(StringHash::new("maps/huge")).is_none());
		assert_eq!(storage.num_map_models(), 0);

		let node = cube_node("editor/clip", Mat4::IDENTITY);
		for i in 0..MAX_GLTF_COLLISION_MODELS {
			storage.load_gltf_collision_data(StringHash(i as u64), std::slice::from_ref(&node), &EditorMaterials).unwrap();
		}
		assert!(matches!(
			storage.load_gltf_collision_data(StringHash(u64::MAX), std::slice::from_ref(&node), &EditorMaterials),
			Err(CollisionError::StorageFull { .. })
		));
	}

	#[test]
	fn invalid_map_is_rejected() {
		let mut map = empty_map(1);
		map.models[0].root_node = 5;
		let mut storage = CollisionModelStorage::new();
		let err = storage.load_map_collision_data(StringHash::new("maps/broken"), map).unwrap_err();
		assert!(matches!(err, CollisionError::InvalidMap(_)));
	}

	#[test]
	fn hotload_swap() {
		let shared = SharedCollisionStorage::default();
		let before = shared.snapshot();

		let map = StringHash::new("maps/a");
		let mut next = (*before).clone();
		next.load_map_collision_data(map, empty_map(1)).unwrap();
		let previous = shared.replace(next);

		assert!(Arc::ptr_eq(&before, &previous));
		assert!(before.find_map(map).is_none());
		assert!(shared.snapshot().find_map(map).is_some());
	}
}
