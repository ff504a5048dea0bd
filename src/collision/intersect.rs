//! Closed-form ray tests against boxes, spheres and capsules, and the dispatch from swept shapes to them.

use crate::{
	geom::{closest_point_on_segment, safe_normalize},
	prelude::*,
};

use super::{sweep::sweep_planes, CollisionModel, Intersection, Ray, Shape};

/// `ray` with its origin moved by `offset`.
#[inline]
fn offset_ray(ray: &Ray, offset: Vec3) -> Ray {
	Ray {
		origin: ray.origin + offset,
		..*ray
	}
}

/// Slab test. Rays starting strictly inside the box give [`Intersection::STARTS_INSIDE`].
pub fn ray_vs_aabb(ray: &Ray, bounds: &MinMax3) -> Option<Intersection> {
	if ray.origin.cmpgt(bounds.min).all() && ray.origin.cmplt(bounds.max).all() {
		return Some(Intersection::STARTS_INSIDE);
	}

	let mut enter = f32::NEG_INFINITY;
	let mut leave = f32::INFINITY;
	let mut normal = Vec3::ZERO;

	for axis in 0..3 {
		let (origin, direction) = (ray.origin[axis], ray.direction[axis]);
		if direction == 0. {
			if origin < bounds.min[axis] || origin > bounds.max[axis] {
				return None;
			}
			continue;
		}

		let (near, far, sign) = if direction > 0. {
			(bounds.min[axis], bounds.max[axis], -1.)
		} else {
			(bounds.max[axis], bounds.min[axis], 1.)
		};
		let t_near = (near - origin) / direction;
		let t_far = (far - origin) / direction;

		if t_near > enter {
			enter = t_near;
			normal = Vec3::ZERO;
			normal[axis] = sign;
		}
		leave = leave.min(t_far);
	}

	if enter < 0. || enter > leave || enter > ray.length {
		return None;
	}
	Some(Intersection {
		t: enter,
		normal,
		solidity: SolidBits::empty(),
	})
}

pub fn ray_vs_sphere(ray: &Ray, center: Vec3, radius: f32) -> Option<Intersection> {
	let m = ray.origin - center;
	let c = m.length_squared() - radius * radius;
	if c < 0. {
		return Some(Intersection::STARTS_INSIDE);
	}

	let b = m.dot(ray.direction);
	if b > 0. {
		return None;
	}
	let discriminant = b * b - c;
	if discriminant < 0. {
		return None;
	}

	let t = (-b - discriminant.sqrt()).max(0.);
	if t > ray.length {
		return None;
	}
	Some(Intersection {
		t,
		normal: safe_normalize(ray.at(t) - center),
		solidity: SolidBits::empty(),
	})
}

/// Tests against every point within `radius` of the segment from `a` to `b`.
pub fn ray_vs_capsule(ray: &Ray, a: Vec3, b: Vec3, radius: f32) -> Option<Intersection> {
	if ray.origin.distance_squared(closest_point_on_segment(a, b, ray.origin)) < radius * radius {
		return Some(Intersection::STARTS_INSIDE);
	}

	let mut best: Option<Intersection> = None;

	// Cylinder body, only where it lies between the two caps.
	let ba = b - a;
	let oa = ray.origin - a;
	let baba = ba.length_squared();
	let bard = ba.dot(ray.direction);
	let baoa = ba.dot(oa);
	let qa = baba - bard * bard;
	if baba > 0. && qa.abs() > f32::EPSILON * baba {
		let qb = baba * ray.direction.dot(oa) - baoa * bard;
		let qc = baba * oa.length_squared() - baoa * baoa - radius * radius * baba;
		let h = qb * qb - qa * qc;
		if h >= 0. {
			let t = (-qb - h.sqrt()) / qa;
			let y = baoa + t * bard;
			if (0. ..=ray.length).contains(&t) && y > 0. && y < baba {
				let axis_point = a + ba * (y / baba);
				best = Some(Intersection {
					t,
					normal: safe_normalize(ray.at(t) - axis_point),
					solidity: SolidBits::empty(),
				});
			}
		}
	}

	for cap in [a, b] {
		let Some(hit) = ray_vs_sphere(ray, cap, radius) else { continue };
		if best.map_or(true, |best| hit.t < best.t) {
			best = Some(hit);
		}
	}

	best
}

/// Sweeps `shape` along `ray` against an analytic collision model.
///
/// Pairs without a closed form use a conservative stand-in: the shape's bounding sphere against spheres and capsules,
/// and the box's planes against boxes. Map and GLTF models aren't analytic and never hit here.
pub fn shape_vs_collision_model(ray: &Ray, shape: &Shape, model: &CollisionModel) -> Option<Intersection> {
	match *model {
		CollisionModel::Point | CollisionModel::MapModel(_) | CollisionModel::Gltf(_) => None,

		CollisionModel::Aabb(bounds) => match *shape {
			Shape::Ray => ray_vs_aabb(ray, &bounds),
			Shape::Aabb { center, extents } => ray_vs_aabb(&offset_ray(ray, center), &bounds.expanded(extents)),
			Shape::Sphere { .. } | Shape::Capsule { .. } => sweep_planes(ray, shape, bounds.planes()),
		},

		CollisionModel::Sphere { center, radius } => match *shape {
			Shape::Ray => ray_vs_sphere(ray, center, radius),
			Shape::Sphere { center: offset, radius: shape_radius } => ray_vs_sphere(&offset_ray(ray, offset), center, radius + shape_radius),
			// The set of origins where the shape touches the sphere is a capsule along the mirrored segment.
			Shape::Capsule { a, b, radius: shape_radius } => ray_vs_capsule(ray, center - b, center - a, radius + shape_radius),
			Shape::Aabb { .. } => {
				let (offset, shape_radius) = shape.bounding_sphere();
				ray_vs_sphere(&offset_ray(ray, offset), center, radius + shape_radius)
			}
		},

		CollisionModel::Capsule { a, b, radius } => match *shape {
			Shape::Ray => ray_vs_capsule(ray, a, b, radius),
			_ => {
				let (offset, shape_radius) = shape.bounding_sphere();
				ray_vs_capsule(&offset_ray(ray, offset), a, b, radius + shape_radius)
			}
		},
	}
}
