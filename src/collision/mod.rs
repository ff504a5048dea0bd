//! Swept shape queries against compiled maps and other entity collision models.

pub mod intersect;
pub mod storage;
pub mod sweep;

use crate::{geom::safe_normalize, material::SolidBits, prelude::*};

use storage::CollisionModelStorage;

/// How far traces stop short of the surface they hit, so that shapes placed at the end never start inside it.
pub const TRACE_STEP_BACK: f32 = 1. / 32.;

/// A line segment from `origin`, `length` units along `direction`.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Ray {
	pub origin: Vec3,
	/// Unit length, or zero if `length` is zero.
	pub direction: Vec3,
	pub length: f32,
}

impl Ray {
	/// Ray from `origin` along `translation`.
	pub fn new(origin: Vec3, translation: Vec3) -> Self {
		Self {
			origin,
			direction: safe_normalize(translation),
			length: translation.length(),
		}
	}

	#[inline]
	pub fn from_points(start: Vec3, end: Vec3) -> Self {
		Self::new(start, end - start)
	}

	#[inline]
	pub fn at(&self, t: f32) -> Vec3 {
		self.origin + self.direction * t
	}

	#[inline]
	pub fn end(&self) -> Vec3 {
		self.at(self.length)
	}

	#[inline]
	pub fn translation(&self) -> Vec3 {
		self.direction * self.length
	}
}

/// The shape being swept along a ray, relative to the ray's origin.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Shape {
	/// A single point.
	#[default]
	Ray,
	Aabb { center: Vec3, extents: Vec3 },
	Sphere { center: Vec3, radius: f32 },
	/// Every point within `radius` of the segment from `a` to `b`.
	Capsule { a: Vec3, b: Vec3, radius: f32 },
}

impl Shape {
	/// The point of the shape furthest along `direction`.
	pub fn support(&self, direction: Vec3) -> Vec3 {
		match *self {
			Self::Ray => Vec3::ZERO,
			Self::Aabb { center, extents } => center + extents.copysign(direction),
			Self::Sphere { center, radius } => center + safe_normalize(direction) * radius,
			Self::Capsule { a, b, radius } => {
				let end = if (b - a).dot(direction) > 0. { b } else { a };
				end + safe_normalize(direction) * radius
			}
		}
	}

	/// Like [`Self::support`], but centered on the touching face or edge when several points tie.
	/// A box landing flat on a floor touches it under its center, not at a corner.
	pub fn contact_point(&self, direction: Vec3) -> Vec3 {
		match *self {
			Self::Aabb { center, extents } => {
				let flat = direction.abs().cmple(Vec3::splat(f32::EPSILON));
				center + Vec3::select(flat, Vec3::ZERO, extents.copysign(direction))
			}
			Self::Capsule { a, b, radius } => {
				let along = (b - a).dot(direction);
				let end = if along.abs() <= f32::EPSILON {
					(a + b) * 0.5
				} else if along > 0. {
					b
				} else {
					a
				};
				end + safe_normalize(direction) * radius
			}
			_ => self.support(direction),
		}
	}

	/// Bounds of the shape relative to the ray origin.
	pub fn bounds(&self) -> MinMax3 {
		match *self {
			Self::Ray => MinMax3::new(Vec3::ZERO, Vec3::ZERO),
			Self::Aabb { center, extents } => MinMax3::from_center_extents(center, extents),
			Self::Sphere { center, radius } => MinMax3::from_center_extents(center, Vec3::splat(radius)),
			Self::Capsule { a, b, radius } => MinMax3::new(a.min(b), a.max(b)).expanded(Vec3::splat(radius)),
		}
	}

	/// Center and radius of a sphere containing the shape.
	pub fn bounding_sphere(&self) -> (Vec3, f32) {
		match *self {
			Self::Ray => (Vec3::ZERO, 0.),
			Self::Aabb { center, extents } => (center, extents.length()),
			Self::Sphere { center, radius } => (center, radius),
			Self::Capsule { a, b, radius } => ((a + b) * 0.5, a.distance(b) * 0.5 + radius),
		}
	}
}

/// What an entity presents for collision, in its own space.
#[derive(Debug, Clone, Copy, PartialEq, strum::EnumDiscriminants)]
#[strum_discriminants(name(CollisionModelType), derive(strum::Display, Hash))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum CollisionModel {
	/// Never hit by anything.
	Point,
	Aabb(MinMax3),
	Sphere { center: Vec3, radius: f32 },
	Capsule { a: Vec3, b: Vec3, radius: f32 },
	/// A model of a loaded map, by submodel name (`*N` seeded with the map's name).
	MapModel(StringHash),
	/// Convex brushes loaded with [`CollisionModelStorage::load_gltf_collision_data`].
	Gltf(StringHash),
}

/// A hit along a ray. `t` is the distance along the ray.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Intersection {
	pub t: f32,
	/// Zero when the ray started inside.
	pub normal: Vec3,
	pub solidity: SolidBits,
}

impl Intersection {
	/// A hit at the very start of a ray that starts inside something.
	pub const STARTS_INSIDE: Self = Self {
		t: 0.,
		normal: Vec3::ZERO,
		solidity: SolidBits::empty(),
	};
}

/// The result of a swept shape query.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Trace {
	/// How much of the ray was travelled before hitting something, from 0 to 1.
	pub fraction: f32,
	/// Where the shape ends up, stepped back slightly from the surface it hit.
	pub end_pos: Vec3,
	/// Point on the shape touching the surface.
	pub contact: Vec3,
	pub normal: Vec3,
	pub solidity: SolidBits,
	/// Number of the entity hit, `-1` if nothing was hit.
	pub ent: i32,
}

impl Trace {
	pub fn missed(ray: &Ray) -> Self {
		Self {
			fraction: 1.,
			end_pos: ray.end(),
			contact: Vec3::ZERO,
			normal: Vec3::ZERO,
			solidity: SolidBits::empty(),
			ent: -1,
		}
	}

	/// `t` is the distance along `ray`, `normal` is in the same space as `ray`.
	pub fn hit(ray: &Ray, shape: &Shape, t: f32, normal: Vec3, solidity: SolidBits, ent: i32) -> Self {
		let mut stepped_back_t = t;
		if normal != Vec3::ZERO {
			let rate = ray.direction.dot(normal);
			if rate.abs() > f32::EPSILON {
				stepped_back_t = (stepped_back_t + TRACE_STEP_BACK / rate).max(0.);
			}
		}

		Self {
			fraction: if ray.length == 0. { 1. } else { t / ray.length },
			end_pos: ray.at(stepped_back_t),
			contact: ray.at(t) + shape.contact_point(-normal),
			normal,
			solidity,
			ent,
		}
	}

	#[inline]
	pub fn hit_something(&self) -> bool {
		self.ent > -1
	}
	#[inline]
	pub fn hit_nothing(&self) -> bool {
		self.ent == -1
	}
	#[inline]
	pub fn got_somewhere(&self) -> bool {
		self.fraction > 0.
	}
	#[inline]
	pub fn got_nowhere(&self) -> bool {
		self.fraction == 0.
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum EntityKind {
	#[default]
	Other,
	/// Players can be rotated freely, everything else only in steps of 90 degrees.
	Player,
}

/// The parts of an entity's networked state collision cares about.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EntityState {
	pub number: i32,
	pub kind: EntityKind,
	pub origin: Vec3,
	/// Euler angles in degrees.
	pub angles: Vec3,
	pub scale: Vec3,
	/// Name of the map model the entity uses, unless overridden.
	pub model: StringHash,
	pub override_collision_model: Option<CollisionModel>,
	/// Solidity of non map model collision models. Entities without one are never hit by them.
	pub solidity: Option<SolidBits>,
}

impl Default for EntityState {
	fn default() -> Self {
		Self {
			number: 0,
			kind: EntityKind::default(),
			origin: Vec3::ZERO,
			angles: Vec3::ZERO,
			scale: Vec3::ONE,
			model: StringHash::default(),
			override_collision_model: None,
			solidity: None,
		}
	}
}

impl EntityState {
	/// The override if there is one, otherwise the map model named by [`Self::model`].
	pub fn collision_model(&self) -> CollisionModel {
		self.override_collision_model.unwrap_or(CollisionModel::MapModel(self.model))
	}
}

/// Bounds of an entity's collision model in its own space, empty if its map model isn't loaded.
pub fn entity_bounds(storage: &CollisionModelStorage, ent: &EntityState) -> MinMax3 {
	match ent.collision_model() {
		CollisionModel::Point => MinMax3::new(Vec3::ZERO, Vec3::ZERO),
		CollisionModel::Aabb(aabb) => aabb,
		CollisionModel::Sphere { center, radius } => MinMax3::from_center_extents(center, Vec3::splat(radius)),
		CollisionModel::Capsule { a, b, radius } => MinMax3::new(a.min(b), a.max(b)).expanded(Vec3::splat(radius)),
		CollisionModel::MapModel(name) => storage.find_map_model(name).map_or(MinMax3::EMPTY, |(_, model)| model.bounds),
		CollisionModel::Gltf(name) => storage.find_gltf_collision_data(name).map_or(MinMax3::EMPTY, |data| data.bounds),
	}
}

/// Sweeps `shape` along `ray` against the collision model of `ent`. Surfaces not sharing a bit with `solid_mask` are ignored.
///
/// Missing collision data and zero length rays give a missed trace.
pub fn trace_vs_ent(storage: &CollisionModelStorage, ray: &Ray, shape: &Shape, ent: &EntityState, solid_mask: SolidBits) -> Trace {
	let trace = Trace::missed(ray);
	if ray.length == 0. {
		return trace;
	}

	if ent.kind != EntityKind::Player {
		debug_assert!(
			ent.angles.to_array().iter().all(|angle| angle.rem_euclid(90.) == 0.),
			"entity {} is rotated by {}, only multiples of 90 degrees are supported",
			ent.number,
			ent.angles
		);
	}

	let inv_scale = ent.scale.recip();
	let object_ray = Ray::new((ray.origin - ent.origin) * inv_scale, ray.translation() * inv_scale);
	if object_ray.length == 0. {
		return trace;
	}

	let intersection = match ent.collision_model() {
		CollisionModel::MapModel(name) => {
			let Some((map, model)) = storage.find_map_model(name) else { return trace };
			map.sweep_model(model, &object_ray, shape, solid_mask)
		}
		CollisionModel::Gltf(name) => {
			let Some(data) = storage.find_gltf_collision_data(name) else { return trace };
			data.sweep(&object_ray, shape, solid_mask)
		}
		primitive => {
			let solidity = ent.solidity.unwrap_or_default();
			if !solidity.intersects(solid_mask) {
				return trace;
			}
			intersect::shape_vs_collision_model(&object_ray, shape, &primitive).map(|intersection| Intersection { solidity, ..intersection })
		}
	};

	let Some(intersection) = intersection else { return trace };

	let fraction = intersection.t / object_ray.length;
	Trace::hit(
		ray,
		shape,
		fraction * ray.length,
		safe_normalize(intersection.normal * inv_scale),
		intersection.solidity,
		ent.number,
	)
}
