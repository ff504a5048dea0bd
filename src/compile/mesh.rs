//! Gathers triangles into one mesh per material, welding matching vertices.

use crate::{
	data::MapVertex,
	geom::{NORMAL_DOT_EPSILON, POSITION_EPSILON},
	prelude::*,
};

/// Maximum texture coordinate difference for two vertices to be welded.
pub const UV_EPSILON: f32 = 0.001;
/// Edge length of the grid cells used to look up weld candidates. Larger than [`POSITION_EPSILON`] so only neighboring cells need checking.
const WELD_CELL_SIZE: f32 = 1.;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompiledMesh {
	pub material: String,
	pub vertices: Vec<MapVertex>,
	pub indices: Vec<u32>,
}

fn can_weld(a: &MapVertex, b: &MapVertex) -> bool {
	a.position.distance(b.position) <= POSITION_EPSILON
		&& a.normal.dot(b.normal) >= NORMAL_DOT_EPSILON
		&& a.uv.abs_diff_eq(b.uv, UV_EPSILON)
}

#[derive(Debug, Default)]
struct VertexWelder {
	cells: HashMap<IVec3, SmallVec<[u32; 4]>>,
}

impl VertexWelder {
	#[inline]
	fn cell(position: Vec3) -> IVec3 {
		(position / WELD_CELL_SIZE).floor().as_ivec3()
	}

	/// Returns the index of a vertex in `vertices` that `vertex` can be welded with, adding it if there's none.
	fn weld(&mut self, vertices: &mut Vec<MapVertex>, vertex: MapVertex) -> u32 {
		let cell = Self::cell(vertex.position);

		for z in -1..=1 {
			for y in -1..=1 {
				for x in -1..=1 {
					let Some(candidates) = self.cells.get(&(cell + ivec3(x, y, z))) else { continue };
					if let Some(&index) = candidates.iter().find(|&&i| can_weld(&vertices[i as usize], &vertex)) {
						return index;
					}
				}
			}
		}

		let index = vertices.len() as u32;
		vertices.push(vertex);
		self.cells.entry(cell).or_default().push(index);
		index
	}
}

/// Builds the meshes of one model.
#[derive(Debug, Default)]
pub struct MeshBuilder {
	meshes: Vec<(CompiledMesh, VertexWelder)>,
	by_material: HashMap<String, usize>,
}

impl MeshBuilder {
	fn mesh(&mut self, material: &str) -> &mut (CompiledMesh, VertexWelder) {
		let index = match self.by_material.get(material) {
			Some(&index) => index,
			None => {
				let index = self.meshes.len();
				self.meshes.push((
					CompiledMesh {
						material: material.to_owned(),
						..Default::default()
					},
					VertexWelder::default(),
				));
				self.by_material.insert(material.to_owned(), index);
				index
			}
		};
		&mut self.meshes[index]
	}

	/// Adds triangles indexing into `vertices`. Triangles that collapse after welding are dropped.
	pub fn add_triangles(&mut self, material: &str, vertices: &[MapVertex], triangles: impl IntoIterator<Item = [u32; 3]>) {
		let (mesh, welder) = self.mesh(material);
		let mut remap: SmallVec<[Option<u32>; 16]> = smallvec![None; vertices.len()];

		for triangle in triangles {
			let welded = triangle.map(|i| *remap[i as usize].get_or_insert_with(|| welder.weld(&mut mesh.vertices, vertices[i as usize])));
			let [a, b, c] = welded;
			if a == b || b == c || a == c {
				continue;
			}
			mesh.indices.extend(welded);
		}
	}

	#[inline]
	pub fn is_empty(&self) -> bool {
		self.meshes.is_empty()
	}

	/// Meshes in the order their materials were first seen. Materials whose triangles all collapsed are left out.
	pub fn finish(self) -> Vec<CompiledMesh> {
		self.meshes.into_iter().map(|(mesh, _)| mesh).filter(|mesh| !mesh.indices.is_empty()).collect()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn vertex(position: Vec3, normal: Vec3) -> MapVertex {
		MapVertex {
			position,
			normal,
			uv: position.truncate(),
		}
	}

	#[test]
	fn shared_vertices_are_welded() {
		let quad = [Vec3::ZERO, Vec3::X, vec3(1., 1., 0.), Vec3::Y].map(|p| vertex(p, Vec3::Z));
		let mut builder = MeshBuilder::default();
		// The same quad as two separate triangles.
		builder.add_triangles("floor", &quad[..3], [[0, 2, 1]]);
		builder.add_triangles("floor", &[quad[0], quad[3], quad[2]], [[0, 1, 2]]);

		let meshes = builder.finish();
		assert_eq!(meshes.len(), 1);
		assert_eq!(meshes[0].vertices.len(), 4);
		assert_eq!(meshes[0].indices.len(), 6);
	}

	#[test]
	fn different_normals_are_kept_apart() {
		let mut builder = MeshBuilder::default();
		builder.add_triangles("rock", &[Vec3::ZERO, Vec3::X, Vec3::Y].map(|p| vertex(p, Vec3::Z)), [[0, 2, 1]]);
		builder.add_triangles("rock", &[Vec3::ZERO, Vec3::X, Vec3::Z].map(|p| vertex(p, Vec3::NEG_Y)), [[0, 1, 2]]);
		assert_eq!(builder.finish()[0].vertices.len(), 6);
	}

	#[test]
	fn near_vertices_weld_across_cells() {
		let mut builder = MeshBuilder::default();
		let a = [vec3(0.999, 0., 0.), Vec3::Y, Vec3::Z].map(|p| vertex(p, Vec3::X));
		let mut b = a;
		b[0].position.x = 1.001;
		b[0].uv = a[0].uv;
		builder.add_triangles("rock", &a, [[0, 1, 2]]);
		builder.add_triangles("rock", &b, [[0, 1, 2]]);
		assert_eq!(builder.finish()[0].vertices.len(), 3);
	}

	#[test]
	fn materials_get_separate_meshes() {
		let triangle = [Vec3::ZERO, Vec3::X, Vec3::Y].map(|p| vertex(p, Vec3::Z));
		let mut builder = MeshBuilder::default();
		builder.add_triangles("a", &triangle, [[0, 2, 1]]);
		builder.add_triangles("b", &triangle, [[0, 2, 1]]);
		builder.add_triangles("a", &triangle, [[0, 2, 1]]);
		let meshes = builder.finish();
		assert_eq!(meshes.iter().map(|mesh| mesh.material.as_str()).collect::<Vec<_>>(), ["a", "b"]);
		assert_eq!(meshes[0].indices.len(), 6);
	}

	#[test]
	fn collapsed_triangles_are_dropped() {
		let sliver = [Vec3::ZERO, vec3(0.001, 0., 0.), Vec3::Y].map(|p| MapVertex {
			position: p,
			normal: Vec3::Z,
			uv: Vec2::ZERO,
		});
		let mut builder = MeshBuilder::default();
		builder.add_triangles("a", &sliver, [[0, 2, 1]]);
		assert!(!builder.is_empty());
		assert!(builder.finish().is_empty());
	}
}
