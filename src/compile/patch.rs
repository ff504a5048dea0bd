//! Tessellation of quadratic bezier patches into triangle grids.

use crate::{
	data::MapVertex,
	geom::{closest_point_on_segment, safe_normalize},
	map::{ControlPoint, Patch},
	prelude::*,
};

/// Default maximum distance between a curve and its tessellated chord.
pub const DEFAULT_MAX_PATCH_ERROR: f32 = 0.5;
/// Upper bound of the subdivision count along either patch direction.
pub const MAX_PATCH_SUBDIVISIONS: u32 = 16;

/// Quadratic Bernstein basis, multiplied by `(t², t, 1)`.
const BEZIER_BASIS: Mat3 = Mat3::from_cols(Vec3::new(1., -2., 1.), Vec3::new(-2., 2., 0.), Vec3::new(1., 0., 0.));
/// Keeps derivatives away from the patch edges, where control points often coincide.
const DERIVATIVE_PARAM_EPSILON: f32 = 1e-6;

#[inline]
fn bezier_weights(t: f32) -> Vec3 {
	BEZIER_BASIS * vec3(t * t, t, 1.)
}

#[inline]
fn bezier_derivative_weights(t: f32) -> Vec3 {
	BEZIER_BASIS * vec3(2. * t, 1., 0.)
}

/// How many times a quadratic curve needs to be halved until its midpoint is within `max_error` of its chord.
pub fn bezier_subdivisions(p0: Vec3, p1: Vec3, p2: Vec3, max_error: f32, depth_left: u32) -> u32 {
	if p0 == p1 || p1 == p2 || depth_left == 0 {
		return 1;
	}

	let mid = p0 * 0.25 + p1 * 0.5 + p2 * 0.25;
	if mid.distance(closest_point_on_segment(p0, p2, mid)) <= max_error {
		return 1;
	}

	let left = bezier_subdivisions(p0, (p0 + p1) * 0.5, mid, max_error, depth_left - 1);
	let right = bezier_subdivisions(mid, (p1 + p2) * 0.5, p2, max_error, depth_left - 1);
	1 + left.max(right)
}

/// Origins of the 3x3 sub-patches of `patch`, which share their edge rows/columns.
fn sub_patches(patch: &Patch) -> impl Iterator<Item = (usize, usize)> + '_ {
	(0..patch.width.saturating_sub(1))
		.step_by(2)
		.flat_map(move |x| (0..patch.height.saturating_sub(1)).step_by(2).map(move |y| (x, y)))
}

fn sub_patch_control_points(patch: &Patch, x: usize, y: usize) -> [[ControlPoint; 3]; 3] {
	std::array::from_fn(|i| std::array::from_fn(|j| *patch.control_point(x + i, y + j)))
}

/// Grid resolution used for every sub-patch, at least 2 in either direction.
pub fn tessellation_factors(patch: &Patch, max_error: f32) -> UVec2 {
	let mut tess = UVec2::splat(2);

	for (x, y) in sub_patches(patch) {
		let cp = sub_patch_control_points(patch, x, y);
		for j in 0..3 {
			let subdivisions = bezier_subdivisions(cp[0][j].position, cp[1][j].position, cp[2][j].position, max_error, MAX_PATCH_SUBDIVISIONS);
			tess.x = tess.x.max(subdivisions);
		}
		for i in 0..3 {
			let subdivisions = bezier_subdivisions(cp[i][0].position, cp[i][1].position, cp[i][2].position, max_error, MAX_PATCH_SUBDIVISIONS);
			tess.y = tess.y.max(subdivisions);
		}
	}

	tess.min(UVec2::splat(MAX_PATCH_SUBDIVISIONS))
}

fn sample(cp: &[[ControlPoint; 3]; 3], t: Vec2) -> MapVertex {
	let wx = bezier_weights(t.x);
	let wy = bezier_weights(t.y);

	let tc = t.clamp(Vec2::splat(DERIVATIVE_PARAM_EPSILON), Vec2::splat(1. - DERIVATIVE_PARAM_EPSILON));
	let (cwx, cwy) = (bezier_weights(tc.x), bezier_weights(tc.y));
	let (dwx, dwy) = (bezier_derivative_weights(tc.x), bezier_derivative_weights(tc.y));

	let mut vertex = MapVertex::default();
	let mut tangent = Vec3::ZERO;
	let mut bitangent = Vec3::ZERO;
	for i in 0..3 {
		for j in 0..3 {
			let ControlPoint { position, uv } = cp[i][j];
			vertex.position += position * wx[i] * wy[j];
			vertex.uv += uv * wx[i] * wy[j];
			tangent += position * dwx[i] * cwy[j];
			bitangent += position * cwx[i] * dwy[j];
		}
	}
	vertex.normal = safe_normalize(tangent.cross(bitangent));
	vertex
}

#[derive(Debug, Clone, Default)]
pub struct TessellatedPatch {
	pub vertices: Vec<MapVertex>,
	/// Triangles with the same winding as brush faces, clockwise from the side the normals point to.
	pub indices: Vec<u32>,
	pub tessellation: UVec2,
}

/// Tessellates every sub-patch of `patch` into a `(tess.x + 1) * (tess.y + 1)` vertex grid. Vertices on shared edges are left duplicated.
pub fn tessellate_patch(patch: &Patch, max_error: f32) -> TessellatedPatch {
	let tess = tessellation_factors(patch, max_error);
	let mut out = TessellatedPatch {
		tessellation: tess,
		..Default::default()
	};
	let row = tess.x + 1;

	for (x, y) in sub_patches(patch) {
		let cp = sub_patch_control_points(patch, x, y);
		let base = out.vertices.len() as u32;

		for gy in 0..=tess.y {
			for gx in 0..=tess.x {
				let t = vec2(gx as f32 / tess.x as f32, gy as f32 / tess.y as f32);
				out.vertices.push(sample(&cp, t));
			}
		}

		for gy in 0..tess.y {
			for gx in 0..tess.x {
				let bottom_left = base + gy * row + gx;
				let bottom_right = bottom_left + 1;
				let top_left = bottom_left + row;
				let top_right = top_left + 1;
				out.indices.extend([bottom_left, top_left, bottom_right, bottom_right, top_left, top_right]);
			}
		}
	}

	out
}
