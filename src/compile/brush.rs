//! Turns brushes (sets of half-spaces) into convex polygons.

use crate::{
	geom::{intersect_3_planes, point_inside_planes, tangent_basis, POINT_IN_BRUSH_EPSILON, POSITION_EPSILON},
	map::{Brush, Face, TextureProjection, MIN_BRUSH_FACES},
	prelude::*,
};

use super::CompileError;

/// A single face can't have more corners than this.
pub const MAX_FACE_VERTICES: usize = 64;

/// The convex polygon a face of a brush bounds.
#[derive(Debug, Clone, PartialEq)]
pub struct FacePolygon {
	/// Index of the face in its brush.
	pub face: usize,
	pub plane: Plane,
	/// Counter-clockwise around the plane normal.
	pub vertices: SmallVec<[Vec3; 8]>,
}

impl FacePolygon {
	/// Fan triangulation from vertex 0, as indices into [`Self::vertices`]. Triangles are clockwise when looking at the front of the face.
	pub fn triangle_indices(&self) -> impl Iterator<Item = [u32; 3]> {
		(0..self.vertices.len().saturating_sub(2) as u32).map(|j| [0, j + 2, j + 1])
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct BrushGeometry {
	/// One plane per face, in face order.
	pub planes: SmallVec<[Plane; 8]>,
	/// Faces that don't bound any area are left out.
	pub polygons: Vec<FacePolygon>,
	pub bounds: MinMax3,
}

impl BrushGeometry {
	pub fn from_brush(brush: &Brush) -> Result<Self, CompileError> {
		let planes = brush
			.faces
			.iter()
			.enumerate()
			.map(|(face, Face { points: [a, b, c], .. })| Plane::from_points(*a, *b, *c).ok_or(CompileError::DegenerateFace { face }))
			.collect::<Result<SmallVec<[Plane; 8]>, _>>()?;

		let mut polygons = Vec::with_capacity(planes.len());
		for face in 0..planes.len() {
			let vertices = face_vertices(&planes, face)?;
			if vertices.len() >= 3 {
				polygons.push(FacePolygon {
					face,
					plane: planes[face],
					vertices,
				});
			}
		}

		if polygons.len() < MIN_BRUSH_FACES {
			return Err(CompileError::UnboundedBrush { polygons: polygons.len() });
		}

		check_convexity(&planes, polygons.iter().flat_map(|polygon| polygon.vertices.iter().copied()))?;

		let bounds = MinMax3::from_points(polygons.iter().flat_map(|polygon| polygon.vertices.iter().copied()));

		Ok(Self { planes, polygons, bounds })
	}
}

/// Corners of face `face`, sorted counter-clockwise around its normal.
fn face_vertices(planes: &[Plane], face: usize) -> Result<SmallVec<[Vec3; 8]>, CompileError> {
	let mut vertices: SmallVec<[Vec3; 8]> = SmallVec::new();

	for j in 0..planes.len() {
		if j == face {
			continue;
		}
		for k in j + 1..planes.len() {
			if k == face {
				continue;
			}
			let Some(point) = intersect_3_planes(&planes[face], &planes[j], &planes[k]) else { continue };
			if !point_inside_planes(planes, point, POINT_IN_BRUSH_EPSILON) {
				continue;
			}
			if vertices.iter().any(|v| v.distance(point) <= POSITION_EPSILON) {
				continue;
			}
			if vertices.len() == MAX_FACE_VERTICES {
				return Err(CompileError::TooManyFaceVertices { face });
			}
			vertices.push(point);
		}
	}

	if vertices.len() >= 3 {
		sort_around_normal(&mut vertices, planes[face].normal);
	}
	Ok(vertices)
}

/// Sorts coplanar points by angle around their centroid, counter-clockwise around `normal`.
fn sort_around_normal(points: &mut [Vec3], normal: Vec3) {
	let centroid = points.iter().sum::<Vec3>() / points.len() as f32;
	let (tangent, bitangent) = tangent_basis(normal);
	let angle = |p: &Vec3| {
		let d = *p - centroid;
		d.dot(bitangent).atan2(d.dot(tangent))
	};
	points.sort_by(|a, b| angle(a).total_cmp(&angle(b)));
}

/// Makes sure every vertex is inside every plane.
pub fn check_convexity(planes: &[Plane], vertices: impl IntoIterator<Item = Vec3>) -> Result<(), CompileError> {
	for vertex in vertices {
		for (plane_idx, plane) in planes.iter().enumerate() {
			let distance = plane.point_side(vertex);
			if distance > POINT_IN_BRUSH_EPSILON {
				return Err(CompileError::NonConvex {
					vertex,
					plane: plane_idx,
					distance,
				});
			}
		}
	}
	Ok(())
}

/// Quake's texture axes: for each of the 6 axis directions, the face normal it's chosen for, followed by the U and V axes.
const QUAKE_BASE_AXES: [[Vec3; 3]; 6] = [
	[Vec3::Z, Vec3::X, Vec3::NEG_Y],     // floor
	[Vec3::NEG_Z, Vec3::X, Vec3::NEG_Y], // ceiling
	[Vec3::X, Vec3::Y, Vec3::NEG_Z],     // west wall
	[Vec3::NEG_X, Vec3::Y, Vec3::NEG_Z], // east wall
	[Vec3::Y, Vec3::X, Vec3::NEG_Z],     // south wall
	[Vec3::NEG_Y, Vec3::X, Vec3::NEG_Z], // north wall
];

fn quake_texture_axes(normal: Vec3) -> (Vec3, Vec3) {
	let mut best = 0;
	let mut best_dot = 0.;
	for (i, [axis_normal, ..]) in QUAKE_BASE_AXES.iter().enumerate() {
		let dot = normal.dot(*axis_normal);
		if dot > best_dot {
			best_dot = dot;
			best = i;
		}
	}
	(QUAKE_BASE_AXES[best][1], QUAKE_BASE_AXES[best][2])
}

/// Sine and cosine, exact for multiples of 90 degrees.
fn sin_cos_degrees(degrees: f32) -> (f32, f32) {
	if degrees == 0. {
		(0., 1.)
	} else if degrees == 90. {
		(1., 0.)
	} else if degrees == 180. {
		(0., -1.)
	} else if degrees == 270. {
		(-1., 0.)
	} else {
		degrees.to_radians().sin_cos()
	}
}

/// Rotates texture axes in the plane of the two world axes they lie on.
fn rotate_texture_axes(axes: [Vec3; 2], degrees: f32) -> [Vec3; 2] {
	let (sin, cos) = sin_cos_degrees(degrees);
	let component = |v: Vec3| (0..3).find(|&i| v[i] != 0.).unwrap_or(0);
	let (s, t) = (component(axes[0]), component(axes[1]));

	axes.map(|mut axis| {
		let (ns, nt) = (cos * axis[s] - sin * axis[t], sin * axis[s] + cos * axis[t]);
		axis[s] = ns;
		axis[t] = nt;
		axis
	})
}

fn nonzero_scale(scale: Vec2) -> Vec2 {
	vec2(
		if scale.x == 0. { 1. } else { scale.x },
		if scale.y == 0. { 1. } else { scale.y },
	)
}

/// Quake 3's texture base for brush primitives.
fn brush_primitive_axis_base(normal: Vec3) -> (Vec3, Vec3) {
	// Snap near-zero components so axis-aligned faces get exact axes.
	let normal = Vec3::select(normal.abs().cmplt(Vec3::splat(1e-6)), Vec3::ZERO, normal);

	let rot_y = -normal.z.atan2((normal.x * normal.x + normal.y * normal.y).sqrt());
	let rot_z = normal.y.atan2(normal.x);
	let (sin_y, cos_y) = rot_y.sin_cos();
	let (sin_z, cos_z) = rot_z.sin_cos();

	(vec3(-sin_z, cos_z, 0.), vec3(-sin_y * cos_z, -sin_y * sin_z, -cos_y))
}

/// Texture coordinates of `position` on `face`. Quake 1 style projections are in texels, brush primitives are normalized.
pub fn face_uv(face: &Face, plane: &Plane, position: Vec3) -> Vec2 {
	match face.projection {
		TextureProjection::Standard { offset, rotation, scale } => {
			let (u, v) = quake_texture_axes(plane.normal);
			let [u, v] = rotate_texture_axes([u, v], rotation);
			let scale = nonzero_scale(scale);
			vec2(position.dot(u) / scale.x, position.dot(v) / scale.y) + offset
		}
		TextureProjection::Valve {
			u_axis,
			u_offset,
			v_axis,
			v_offset,
			scale,
			..
		} => {
			let scale = nonzero_scale(scale);
			vec2(position.dot(u_axis) / scale.x + u_offset, position.dot(v_axis) / scale.y + v_offset)
		}
		TextureProjection::BrushPrimitive { rows } => {
			let (tex_x, tex_y) = brush_primitive_axis_base(plane.normal);
			let base = vec3(position.dot(tex_x), position.dot(tex_y), 1.);
			vec2(rows[0].dot(base), rows[1].dot(base))
		}
	}
}
