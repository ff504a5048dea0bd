//! Geometric primitives shared by the compiler and the collision engine.

use crate::prelude::*;

/// How far outside a brush's planes a point may be while still counting as inside the brush.
pub const POINT_IN_BRUSH_EPSILON: f32 = 0.001;
/// Three planes whose normals' triple product is below this don't meet in a single point.
pub const PLANE_INTERSECTION_EPSILON: f32 = 0.001;
/// Maximum distance between two positions considered the same point.
pub const POSITION_EPSILON: f32 = 0.01;
/// Maximum distance between two plane distances considered the same plane.
pub const PLANE_DISTANCE_EPSILON: f32 = 0.01;
/// Minimum dot product between two unit normals considered the same direction.
pub const NORMAL_DOT_EPSILON: f32 = 0.99999;

/// Normalizes `v`, returning zero instead of NaN for zero-length (or non-finite) input.
#[inline]
pub fn safe_normalize(v: Vec3) -> Vec3 {
	v.normalize_or_zero()
}

/// Right handed tangent basis `(tangent, bitangent)` perpendicular to unit vector `normal`, so that `tangent × bitangent = normal`.
pub fn tangent_basis(normal: Vec3) -> (Vec3, Vec3) {
	let tangent = normal.any_orthonormal_vector();
	(tangent, normal.cross(tangent))
}

/// The point of the segment from `a` to `b` closest to `point`.
pub fn closest_point_on_segment(a: Vec3, b: Vec3, point: Vec3) -> Vec3 {
	let ab = b - a;
	let length_squared = ab.length_squared();
	if length_squared == 0. {
		return a;
	}
	a + ab * ((point - a).dot(ab) / length_squared).clamp(0., 1.)
}

/// Plane made of all points `p` where `normal · p = distance`. The normal points out of the solid side.
#[derive(MapValue, Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Plane {
	pub normal: Vec3,
	pub distance: f32,
}

impl Plane {
	#[inline]
	pub const fn new(normal: Vec3, distance: f32) -> Self {
		Self { normal, distance }
	}

	/// Plane through 3 points. The normal is `(c - a) × (b - a)`, so with Quake's clockwise point order it faces out of the brush.
	///
	/// Returns `None` if the points are collinear.
	pub fn from_points(a: Vec3, b: Vec3, c: Vec3) -> Option<Self> {
		let normal = safe_normalize((c - a).cross(b - a));
		if normal == Vec3::ZERO {
			return None;
		}
		Some(Self::new(normal, a.dot(normal)))
	}

	/// `>0` = front, `<0` = back, `0` = on plane
	#[inline]
	pub fn point_side(&self, point: Vec3) -> f32 {
		self.normal.dot(point) - self.distance
	}

	/// Whether two planes are the same within [`PLANE_DISTANCE_EPSILON`] and [`NORMAL_DOT_EPSILON`].
	pub fn approx_eq(&self, other: &Self) -> bool {
		(self.distance - other.distance).abs() <= PLANE_DISTANCE_EPSILON && self.normal.dot(other.normal) >= NORMAL_DOT_EPSILON
	}

	#[inline]
	pub fn translated(&self, offset: Vec3) -> Self {
		Self::new(self.normal, self.distance + self.normal.dot(offset))
	}
}

/// The single point where 3 planes meet, or `None` if any two are (nearly) parallel.
pub fn intersect_3_planes(a: &Plane, b: &Plane, c: &Plane) -> Option<Vec3> {
	let det = a.normal.dot(b.normal.cross(c.normal));
	if det.abs() < PLANE_INTERSECTION_EPSILON {
		return None;
	}

	Some(
		(b.normal.cross(c.normal) * a.distance + c.normal.cross(a.normal) * b.distance + a.normal.cross(b.normal) * c.distance)
			/ det,
	)
}

/// Whether `point` is behind or within `epsilon` of every plane.
pub fn point_inside_planes<'a>(planes: impl IntoIterator<Item = &'a Plane>, point: Vec3, epsilon: f32) -> bool {
	planes.into_iter().all(|plane| plane.point_side(point) <= epsilon)
}

/// Axis-aligned bounding box.
#[derive(MapValue, Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MinMax3 {
	pub min: Vec3,
	pub max: Vec3,
}

impl Default for MinMax3 {
	fn default() -> Self {
		Self::EMPTY
	}
}

impl MinMax3 {
	/// Inverted box, the identity for [`Self::union`].
	pub const EMPTY: Self = Self {
		min: Vec3::INFINITY,
		max: Vec3::NEG_INFINITY,
	};

	#[inline]
	pub const fn new(min: Vec3, max: Vec3) -> Self {
		Self { min, max }
	}

	#[inline]
	pub fn from_center_extents(center: Vec3, extents: Vec3) -> Self {
		Self::new(center - extents, center + extents)
	}

	pub fn from_points(points: impl IntoIterator<Item = Vec3>) -> Self {
		points.into_iter().fold(Self::EMPTY, Self::union_point)
	}

	/// Whether the box contains no points at all.
	#[inline]
	pub fn is_empty(&self) -> bool {
		self.min.cmpgt(self.max).any()
	}

	/// Build a new box formed of the union of this box and a point.
	#[inline]
	pub fn union_point(self, point: Vec3) -> Self {
		Self::new(self.min.min(point), self.max.max(point))
	}

	#[inline]
	pub fn union(self, other: Self) -> Self {
		Self::new(self.min.min(other.min), self.max.max(other.max))
	}

	#[inline]
	pub fn size(&self) -> Vec3 {
		self.max - self.min
	}

	#[inline]
	pub fn center(&self) -> Vec3 {
		(self.min + self.max) * 0.5
	}

	#[inline]
	pub fn extents(&self) -> Vec3 {
		self.size() * 0.5
	}

	pub fn surface_area(&self) -> f32 {
		if self.is_empty() {
			return 0.;
		}
		let size = self.size();
		2. * (size.x * size.y + size.y * size.z + size.z * size.x)
	}

	/// Index of the longest axis.
	pub fn longest_axis(&self) -> usize {
		let size = self.size();
		if size.x >= size.y && size.x >= size.z {
			0
		} else if size.y >= size.z {
			1
		} else {
			2
		}
	}

	/// Splits the box in two along `axis` at `distance`, returning `(below, above)`.
	pub fn split(&self, axis: usize, distance: f32) -> (Self, Self) {
		let mut below = *self;
		let mut above = *self;
		below.max[axis] = distance;
		above.min[axis] = distance;
		(below, above)
	}

	/// Whether the boxes overlap, touching counts.
	#[inline]
	pub fn intersects(&self, other: &Self) -> bool {
		self.min.cmple(other.max).all() && other.min.cmple(self.max).all()
	}

	#[inline]
	pub fn contains_point(&self, point: Vec3) -> bool {
		self.min.cmple(point).all() && point.cmple(self.max).all()
	}

	#[inline]
	pub fn translated(&self, offset: Vec3) -> Self {
		Self::new(self.min + offset, self.max + offset)
	}

	/// Grows the box by `amount` on every side.
	#[inline]
	pub fn expanded(&self, amount: Vec3) -> Self {
		Self::new(self.min - amount, self.max + amount)
	}

	/// The 6 outward facing planes of the box, ordered `-X, +X, -Y, +Y, -Z, +Z`.
	pub fn planes(&self) -> [Plane; 6] {
		std::array::from_fn(|i| {
			let axis = i / 2;
			let sign = if i % 2 == 0 { -1. } else { 1. };
			let mut normal = Vec3::ZERO;
			normal[axis] = sign;
			let bound = if i % 2 == 0 { self.min[axis] } else { self.max[axis] };
			Plane::new(normal, sign * bound)
		})
	}
}
