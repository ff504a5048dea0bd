//! Compiles parsed `.map` entities into [`MapData`].

pub mod brush;
pub mod kdtree;
pub mod mesh;
pub mod patch;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::{
	data::{KdTreeNode, MapBrush, MapData, MapEntityRecord, MapMesh, MapModel, MapVertex},
	map::{fold_func_groups, parse_map, MapEntity, MapParseError},
	material::{MaterialLookup, SolidBits},
	prelude::*,
};

use brush::BrushGeometry;
use kdtree::{KdTree, KdTreeSettings};
use mesh::{CompiledMesh, MeshBuilder};
use patch::{tessellate_patch, DEFAULT_MAX_PATCH_ERROR};

#[derive(Debug, Clone, Error)]
pub enum CompileError {
	#[error(transparent)]
	Parse(#[from] MapParseError),
	#[error("Face {face}'s points are collinear, it has no plane")]
	DegenerateFace { face: usize },
	#[error("Face {face} has more than {max} vertices", max = brush::MAX_FACE_VERTICES)]
	TooManyFaceVertices { face: usize },
	#[error("Brush only has {polygons} faces with any area, it doesn't enclose a volume")]
	UnboundedBrush { polygons: usize },
	#[error("Brush is not convex, vertex {vertex} is {distance} units in front of plane {plane}")]
	NonConvex { vertex: Vec3, plane: usize, distance: f32 },
	#[error("Too many {what}: {count}, the format holds at most {max}")]
	LimitExceeded { what: &'static str, count: usize, max: usize },

	/// For telling the user exactly where the error occurred in the process.
	#[error("{0} - {1}")]
	DoingJob(String, Box<CompileError>),
}
crate::impl_doing_job!(CompileError);

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CompileSettings {
	/// Maximum distance between a patch's curve and its tessellation.
	pub patch_max_error: f32,
	pub kd_tree: KdTreeSettings,
}

impl Default for CompileSettings {
	fn default() -> Self {
		Self {
			patch_max_error: DEFAULT_MAX_PATCH_ERROR,
			kd_tree: KdTreeSettings::default(),
		}
	}
}

/// Parses and compiles `.map` source text. `func_group` entities are folded into the world first.
pub fn compile_map<M: MaterialLookup + ?Sized>(source: &str, settings: &CompileSettings, materials: &M) -> Result<MapData, CompileError> {
	let mut entities = parse_map(source)?;
	fold_func_groups(&mut entities);
	compile_entities(&entities, settings, materials)
}

/// A brush as it's stored for collision.
#[derive(Debug, Clone, PartialEq)]
pub struct CollisionBrush {
	/// Bounding box planes, followed by face planes.
	pub planes: SmallVec<[Plane; 16]>,
	pub bounds: MinMax3,
	pub solidity: SolidBits,
}

/// Everything compiled from a single entity, in the entity's own space.
#[derive(Debug, Clone, Default)]
pub struct EntityGeometry {
	pub meshes: Vec<CompiledMesh>,
	/// Brushes without solidity are left out.
	pub brushes: Vec<CollisionBrush>,
	pub tree: KdTree,
	pub bounds: MinMax3,
}

/// Compiles the geometry of one entity. Entities other than the world are moved so that their `origin` is at zero.
pub fn compile_entity<M: MaterialLookup + ?Sized>(
	entity: &MapEntity,
	is_world: bool,
	settings: &CompileSettings,
	materials: &M,
) -> Result<EntityGeometry, CompileError> {
	let offset = match (is_world, entity.get("origin")) {
		(true, _) | (false, None) => Vec3::ZERO,
		(false, Some(origin)) => match entity.origin() {
			Some(origin) => -origin,
			None => {
				log::warn!("Entity on line {} has malformed origin \"{origin}\", using 0 0 0", entity.line);
				Vec3::ZERO
			}
		},
	};

	let mut meshes = MeshBuilder::default();
	let mut brushes = Vec::with_capacity(entity.brushes.len());
	let mut bounds = MinMax3::EMPTY;

	for (brush_idx, brush) in entity.brushes.iter().enumerate() {
		let geometry = BrushGeometry::from_brush(brush).job(format!("Brush {brush_idx} (line {})", brush.line))?;

		for polygon in &geometry.polygons {
			let face = &brush.faces[polygon.face];
			if !materials.material_or_default(&face.material).visible {
				continue;
			}
			let vertices: SmallVec<[MapVertex; 8]> = polygon
				.vertices
				.iter()
				.map(|&position| MapVertex {
					position: position + offset,
					normal: polygon.plane.normal,
					uv: brush::face_uv(face, &polygon.plane, position),
				})
				.collect();
			meshes.add_triangles(&face.material, &vertices, polygon.triangle_indices());
		}

		let brush_bounds = geometry.bounds.translated(offset);
		bounds = bounds.union(brush_bounds);

		let solidity = brush
			.faces
			.iter()
			.fold(SolidBits::empty(), |solidity, face| solidity | materials.material_or_default(&face.material).solidity);
		if solidity.is_empty() {
			continue;
		}
		brushes.push(CollisionBrush {
			planes: brush_bounds.planes().into_iter().chain(geometry.planes.iter().map(|plane| plane.translated(offset))).collect(),
			bounds: brush_bounds,
			solidity,
		});
	}

	for patch in &entity.patches {
		let mut tessellated = tessellate_patch(patch, settings.patch_max_error);
		for vertex in &mut tessellated.vertices {
			vertex.position += offset;
			bounds = bounds.union_point(vertex.position);
		}
		if !materials.material_or_default(&patch.material).visible {
			continue;
		}
		let triangles = tessellated.indices.chunks_exact(3).map(|triangle| [triangle[0], triangle[1], triangle[2]]);
		meshes.add_triangles(&patch.material, &tessellated.vertices, triangles);
	}

	let brush_bounds: Vec<MinMax3> = brushes.iter().map(|brush| brush.bounds).collect();
	let tree = KdTree::build(&brush_bounds, &settings.kd_tree);

	Ok(EntityGeometry {
		meshes: meshes.finish(),
		brushes,
		tree,
		bounds,
	})
}

fn check_limit(what: &'static str, count: usize, max: usize) -> Result<(), CompileError> {
	if count > max {
		return Err(CompileError::LimitExceeded { what, count, max });
	}
	Ok(())
}

/// Gives nearly equal planes the same index.
#[derive(Debug, Default)]
struct PlaneSet {
	/// Plane indices by `floor(distance)`.
	buckets: HashMap<i64, SmallVec<[u32; 4]>>,
}

impl PlaneSet {
	fn insert(&mut self, plane: Plane, planes: &mut Vec<Plane>) -> u32 {
		let bucket = plane.distance.floor() as i64;
		for key in bucket - 1..=bucket + 1 {
			let Some(candidates) = self.buckets.get(&key) else { continue };
			if let Some(&index) = candidates.iter().find(|&&i| planes[i as usize].approx_eq(&plane)) {
				return index;
			}
		}

		let index = planes.len() as u32;
		planes.push(plane);
		self.buckets.entry(bucket).or_default().push(index);
		index
	}
}

/// Appends `entity`'s key/value pairs to `data`, returning how many were written. Repeated keys are written once, with their last value.
fn write_entity_data(data: &mut String, entity: &MapEntity, model: Option<usize>) -> u32 {
	let model_value = model.filter(|&model| model > 0).map(|model| format!("*{model}"));
	let mut num_key_values = 0;
	let mut push = |key: &str, value: &str| {
		data.push_str(key);
		data.push('\0');
		data.push_str(value);
		data.push('\0');
		num_key_values += 1;
	};

	for (i, (key, value)) in entity.properties.iter().enumerate() {
		if entity.properties[i + 1..].iter().any(|(later, _)| later == key) {
			continue;
		}
		match &model_value {
			Some(model_value) if key == "model" => push(key.as_str(), model_value.as_str()),
			_ => push(key.as_str(), value.as_str()),
		}
	}
	if let Some(model_value) = &model_value {
		if entity.get("model").is_none() {
			push("model", model_value.as_str());
		}
	}

	num_key_values
}

/// Compiles entities into a map. The first entity is the world and always gets model 0, other entities get a model if they have brushes or patches.
pub fn compile_entities<M: MaterialLookup + ?Sized>(entities: &[MapEntity], settings: &CompileSettings, materials: &M) -> Result<MapData, CompileError> {
	let with_model: Vec<usize> = (0..entities.len()).filter(|&i| i == 0 || entities[i].has_geometry()).collect();

	let compile = |&entity_idx: &usize| {
		let entity = &entities[entity_idx];
		compile_entity(entity, entity_idx == 0, settings, materials).job(format!(
			"Compiling entity {entity_idx} ({}, line {})",
			entity.classname().unwrap_or("no classname"),
			entity.line
		))
	};
	#[cfg(feature = "parallel")]
	let geometry: Vec<EntityGeometry> = with_model.par_iter().map(compile).collect::<Result<_, _>>()?;
	#[cfg(not(feature = "parallel"))]
	let geometry: Vec<EntityGeometry> = with_model.iter().map(compile).collect::<Result<_, _>>()?;

	check_limit("models", with_model.len(), i32::MAX as usize)?;

	let mut map = MapData::default();
	let mut plane_set = PlaneSet::default();
	let mut entity_models = vec![None; entities.len()];

	for (model_idx, (&entity_idx, geometry)) in with_model.iter().zip(geometry).enumerate() {
		entity_models[entity_idx] = Some(model_idx);

		let brush_base = map.brushes.len() as u32;
		for brush in &geometry.brushes {
			let first_plane = map.brush_plane_indices.len() as u32;
			for plane in &brush.planes {
				let index = plane_set.insert(*plane, &mut map.brush_planes);
				map.brush_plane_indices.push(index);
			}
			map.brushes.push(MapBrush {
				first_plane,
				num_planes: brush.planes.len() as u16,
				solidity: brush.solidity,
			});
		}

		let node_base = map.nodes.len() as u32;
		let brush_index_base = map.brush_indices.len() as u32;
		map.nodes.extend(geometry.tree.nodes.iter().map(|node| match *node {
			KdTreeNode::Interior { axis, distance, below, above } => KdTreeNode::Interior {
				axis,
				distance,
				below: below + node_base,
				above: above + node_base,
			},
			KdTreeNode::Leaf { first_brush, num_brushes } => KdTreeNode::Leaf {
				first_brush: first_brush + brush_index_base,
				num_brushes,
			},
		}));
		map.brush_indices.extend(geometry.tree.brush_indices.iter().map(|&brush| brush + brush_base));

		let first_mesh = map.meshes.len() as u32;
		for mesh in geometry.meshes {
			map.meshes.push(MapMesh {
				material: StringHash::new(&mesh.material),
				first_vertex: map.vertices.len() as u32,
				num_vertices: mesh.vertices.len() as u32,
				first_index: map.vertex_indices.len() as u32,
				num_indices: mesh.indices.len() as u32,
			});
			map.vertices.extend(mesh.vertices);
			map.vertex_indices.extend(mesh.indices);
		}

		map.models.push(MapModel {
			bounds: geometry.bounds,
			root_node: node_base,
			first_mesh,
			num_meshes: map.meshes.len() as u32 - first_mesh,
		});
	}

	for (entity, model) in entities.iter().zip(entity_models) {
		let data_offset = map.entity_data.len() as u32;
		let num_key_values = write_entity_data(&mut map.entity_data, entity, model);
		map.entities.push(MapEntityRecord {
			data_offset,
			data_len: map.entity_data.len() as u32 - data_offset,
			num_key_values,
			model: model.map_or(-1, |model| model as i32),
		});
	}

	for (what, count) in [
		("entity data bytes", map.entity_data.len()),
		("nodes", map.nodes.len()),
		("brushes", map.brushes.len()),
		("brush indices", map.brush_indices.len()),
		("brush planes", map.brush_planes.len()),
		("brush plane indices", map.brush_plane_indices.len()),
		("vertices", map.vertices.len()),
		("vertex indices", map.vertex_indices.len()),
	] {
		check_limit(what, count, u32::MAX as usize)?;
	}

	log::info!(
		"Compiled {} entities into {} models: {} brushes, {} planes, {} kd-tree nodes, {} meshes with {} vertices and {} triangles",
		map.entities.len(),
		map.models.len(),
		map.brushes.len(),
		map.brush_planes.len(),
		map.nodes.len(),
		map.meshes.len(),
		map.vertices.len(),
		map.vertex_indices.len() / 3,
	);

	Ok(map)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::material::{EditorMaterial, EditorMaterials};

	const CUBE: &str = "{
( -1 -1 -1 ) ( -1 0 -1 ) ( -1 -1 0 ) rock 0 0 0 1 1
( -1 -1 -1 ) ( -1 -1 0 ) ( 0 -1 -1 ) rock 0 0 0 1 1
( -1 -1 -1 ) ( 0 -1 -1 ) ( -1 0 -1 ) rock 0 0 0 1 1
( 1 1 1 ) ( 1 1 2 ) ( 1 2 1 ) rock 0 0 0 1 1
( 1 1 1 ) ( 2 1 1 ) ( 1 1 2 ) rock 0 0 0 1 1
( 1 1 1 ) ( 1 2 1 ) ( 2 1 1 ) rock 0 0 0 1 1
}";

	fn compile(source: &str) -> MapData {
		compile_map(source, &CompileSettings::default(), &EditorMaterials).unwrap()
	}

	#[test]
	fn plane_set_merges_close_planes() {
		let mut planes = Vec::new();
		let mut set = PlaneSet::default();
		let a = set.insert(Plane::new(Vec3::Z, 0.999), &mut planes);
		let b = set.insert(Plane::new(Vec3::Z, 1.004), &mut planes);
		let c = set.insert(Plane::new(Vec3::NEG_Z, -1.), &mut planes);
		assert_eq!(a, b);
		assert_ne!(a, c);
		assert_eq!(planes.len(), 2);
	}

	#[test]
	fn shared_planes_are_stored_once() {
		let map = compile(&format!("{{ \"classname\" \"worldspawn\" {CUBE} {CUBE} }}"));
		assert_eq!(map.brushes.len(), 2);
		assert_eq!(map.brush_plane_indices.len(), 2 * 12);
		// The bounding box planes coincide with the face planes.
		assert_eq!(map.brush_planes.len(), 6);
	}

	#[test]
	fn brush_entities_get_models() {
		let map = compile(&format!(
			"{{ \"classname\" \"worldspawn\" {CUBE} }}
{{ \"classname\" \"info_player_start\" \"origin\" \"0 0 64\" }}
{{ \"classname\" \"func_door\" \"origin\" \"0 0 1\" \"model\" \"junk\" {CUBE} }}"
		));
		assert_eq!(map.models.len(), 2);
		assert_eq!(map.entities.iter().map(|entity| entity.model).collect::<Vec<_>>(), [0, -1, 1]);
		assert_eq!(map.entity_value(2, "model"), Some("*1"));
		assert_eq!(map.entity_value(1, "model"), None);
		assert_eq!(map.entity_value(0, "model"), None);
		assert_eq!(map.entities[2].num_key_values, 3);

		// Moved so the origin is at zero.
		assert_eq!(map.models[1].bounds, MinMax3::new(vec3(-1., -1., -2.), vec3(1., 1., 0.)));
		let KdTreeNode::Interior { below, .. } = map.nodes[map.models[1].root_node as usize] else { panic!("root is a leaf") };
		assert!(below > map.models[1].root_node);
	}

	#[test]
	fn repeated_keys_keep_the_last_value() {
		let map = compile("{ \"classname\" \"worldspawn\" \"message\" \"a\" \"message\" \"b\" }");
		assert_eq!(map.entity_value(0, "message"), Some("b"));
		assert_eq!(map.entities[0].num_key_values, 2);
	}

	#[test]
	fn invisible_and_nonsolid_materials() {
		let clip = CUBE.replace("rock", "editor/clip");
		let nonsolid = CUBE.replace("rock", "editor/nonsolid");
		let map = compile(&format!("{{ \"classname\" \"worldspawn\" {clip} {nonsolid} }}"));

		assert_eq!(map.meshes.len(), 1);
		assert_eq!(map.meshes[0].material, StringHash::new("editor/nonsolid"));
		assert_eq!(map.brushes.len(), 1);
		assert_eq!(map.brushes[0].solidity, SolidBits::PLAYER_CLIP);
	}

	#[test]
	fn custom_material_lookup() {
		let mut materials = HashMap::new();
		materials.insert(StringHash::new("rock"), EditorMaterial::new(SolidBits::LADDER, false));
		let map = compile_map(&format!("{{ {CUBE} }}"), &CompileSettings::default(), &materials).unwrap();
		assert!(map.meshes.is_empty());
		assert_eq!(map.brushes[0].solidity, SolidBits::LADDER);
	}

	#[test]
	fn errors_name_the_entity_and_brush() {
		let collinear = CUBE.replacen("( -1 -1 -1 ) ( -1 0 -1 ) ( -1 -1 0 )", "( 0 0 0 ) ( 1 0 0 ) ( 2 0 0 )", 1);
		let err = compile_map(
			&format!("{{ \"classname\" \"worldspawn\" {CUBE} {collinear} }}"),
			&CompileSettings::default(),
			&EditorMaterials,
		)
		.unwrap_err();
		assert!(matches!(err.root(), CompileError::DegenerateFace { face: 0 }));
		let message = err.to_string();
		assert!(message.contains("entity 0 (worldspawn"), "{message}");
		assert!(message.contains("Brush 1"), "{message}");
	}
}
