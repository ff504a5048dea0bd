//! Sweeping shapes against convex brushes, and through the kd-trees of compiled maps.

use crate::{
	data::{KdTreeNode, MapData, MapModel, MAX_TREE_DEPTH},
	prelude::*,
};

use super::{storage::GltfCollisionData, Intersection, Ray, Shape};

/// Sweeps `shape` along `ray` against the convex volume behind every plane in `planes`.
///
/// Each plane is pushed out by the shape's extent along its normal, so the volume must include bevel planes (such as the
/// planes of its bounding box) for boxes to stop at its edges. Starting inside gives [`Intersection::STARTS_INSIDE`].
pub fn sweep_planes(ray: &Ray, shape: &Shape, planes: impl IntoIterator<Item = Plane>) -> Option<Intersection> {
	let mut enter = f32::NEG_INFINITY;
	let mut leave = f32::INFINITY;
	let mut normal = Vec3::ZERO;

	for plane in planes {
		let distance = plane.distance - plane.normal.dot(shape.support(-plane.normal));
		let start = plane.normal.dot(ray.origin) - distance;
		let rate = plane.normal.dot(ray.direction);

		if rate.abs() <= f32::EPSILON {
			if start > 0. {
				return None;
			}
			continue;
		}

		let t = -start / rate;
		if rate < 0. {
			if t > enter {
				enter = t;
				normal = plane.normal;
			}
		} else {
			leave = leave.min(t);
		}

		if enter > leave {
			return None;
		}
	}

	if leave < 0. || enter > ray.length {
		return None;
	}
	if enter < 0. {
		return Some(Intersection::STARTS_INSIDE);
	}
	Some(Intersection {
		t: enter,
		normal,
		solidity: SolidBits::empty(),
	})
}

/// Sweeps against every brush (its planes and solidity) sharing a bit with `solid_mask`, returning the closest hit.
pub fn sweep_shape_vs_brushes<P: IntoIterator<Item = Plane>>(
	ray: &Ray,
	shape: &Shape,
	brushes: impl IntoIterator<Item = (P, SolidBits)>,
	solid_mask: SolidBits,
) -> Option<Intersection> {
	let mut best: Option<Intersection> = None;

	for (planes, solidity) in brushes {
		if !solidity.intersects(solid_mask) {
			continue;
		}
		let Some(hit) = sweep_planes(ray, shape, planes) else { continue };
		if best.map_or(true, |best| hit.t < best.t) {
			best = Some(Intersection { solidity, ..hit });
		}
	}

	best
}

struct TreeSweep<'a> {
	map: &'a MapData,
	ray: &'a Ray,
	shape: &'a Shape,
	shape_bounds: MinMax3,
	solid_mask: SolidBits,
	best: Option<Intersection>,
}

impl TreeSweep<'_> {
	fn visit(&mut self, index: u32, depth: usize) {
		if depth > MAX_TREE_DEPTH {
			return;
		}
		let map = self.map;
		let Some(&node) = map.nodes.get(index as usize) else { return };

		match node {
			KdTreeNode::Leaf { first_brush, num_brushes } => {
				let brushes = map.leaf_brushes(first_brush, num_brushes).map(|brush| (map.brush_planes_of(brush), brush.solidity));
				let Some(hit) = sweep_shape_vs_brushes(self.ray, self.shape, brushes, self.solid_mask) else { return };
				if self.best.map_or(true, |best| hit.t < best.t) {
					self.best = Some(hit);
				}
			}
			KdTreeNode::Interior { axis, distance, below, above } => {
				let axis = axis.index();
				// Only the part of the ray before the closest hit so far matters.
				let t_end = self.best.map_or(self.ray.length, |best| best.t);
				let start = self.ray.origin[axis];
				let end = start + self.ray.direction[axis] * t_end;
				let lo = start.min(end) + self.shape_bounds.min[axis];
				let hi = start.max(end) + self.shape_bounds.max[axis];

				if hi < distance {
					self.visit(below, depth + 1);
				} else if lo > distance {
					self.visit(above, depth + 1);
				} else {
					let (near, far) = if start < distance { (below, above) } else { (above, below) };
					self.visit(near, depth + 1);
					self.visit(far, depth + 1);
				}
			}
		}
	}
}

impl MapData {
	/// Sweeps `shape` along `ray` through the kd-tree of `model`, with everything in the model's own space.
	///
	/// Returns the closest hit against a brush sharing a bit with `solid_mask`. Zero length rays never hit.
	pub fn sweep_model(&self, model: &MapModel, ray: &Ray, shape: &Shape, solid_mask: SolidBits) -> Option<Intersection> {
		if ray.length == 0. {
			return None;
		}

		let mut sweep = TreeSweep {
			map: self,
			ray,
			shape,
			shape_bounds: shape.bounds(),
			solid_mask,
			best: None,
		};
		sweep.visit(model.root_node, 0);
		sweep.best
	}

	/// [`Self::sweep_model`] by model index. Model 0 is the world.
	pub fn trace(&self, model: usize, ray: &Ray, shape: &Shape, solid_mask: SolidBits) -> Option<Intersection> {
		self.sweep_model(self.models.get(model)?, ray, shape, solid_mask)
	}
}

impl GltfCollisionData {
	/// Sweeps against every brush, in the space the data was loaded in.
	pub fn sweep(&self, ray: &Ray, shape: &Shape, solid_mask: SolidBits) -> Option<Intersection> {
		if ray.length == 0. {
			return None;
		}
		sweep_shape_vs_brushes(ray, shape, self.iter().map(|brush| (brush.planes.iter().copied(), brush.solidity)), solid_mask)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::material::EditorMaterials;

	/// Brush text for the box from `min` to `max`.
	fn block(min: Vec3, max: Vec3, material: &str) -> String {
		let ([x0, y0, z0], [x1, y1, z1]) = (min.to_array(), max.to_array());
		let (xa, ya, za) = (x0 + 1., y0 + 1., z0 + 1.);
		let (xb, yb, zb) = (x1 + 1., y1 + 1., z1 + 1.);
		format!(
			"{{
( {x0} {y0} {z0} ) ( {x0} {ya} {z0} ) ( {x0} {y0} {za} ) {material} 0 0 0 1 1
( {x0} {y0} {z0} ) ( {x0} {y0} {za} ) ( {xa} {y0} {z0} ) {material} 0 0 0 1 1
( {x0} {y0} {z0} ) ( {xa} {y0} {z0} ) ( {x0} {ya} {z0} ) {material} 0 0 0 1 1
( {x1} {y1} {z1} ) ( {x1} {y1} {zb} ) ( {x1} {yb} {z1} ) {material} 0 0 0 1 1
( {x1} {y1} {z1} ) ( {xb} {y1} {z1} ) ( {x1} {y1} {zb} ) {material} 0 0 0 1 1
( {x1} {y1} {z1} ) ( {x1} {yb} {z1} ) ( {xb} {y1} {z1} ) {material} 0 0 0 1 1
}}
"
		)
	}

	fn world(brushes: &[String]) -> MapData {
		let source = format!("{{\n\"classname\" \"worldspawn\"\n{}}}\n", brushes.concat());
		crate::compile::compile_map(&source, &CompileSettings::default(), &EditorMaterials).unwrap()
	}

	fn two_blocks() -> MapData {
		world(&[
			block(vec3(-64., -16., -16.), vec3(-32., 16., 16.), "rock"),
			block(vec3(32., -16., -16.), vec3(64., 16., 16.), "editor/clip"),
		])
	}

	#[test]
	fn closest_brush_is_hit() {
		let map = two_blocks();

		let hit = map.trace(0, &Ray::from_points(vec3(-100., 0., 0.), vec3(100., 0., 0.)), &Shape::Ray, SolidBits::EVERYTHING).unwrap();
		assert!((hit.t - 36.).abs() < 1e-4);
		assert_eq!(hit.normal, Vec3::NEG_X);
		assert_eq!(hit.solidity, SolidBits::WORLD);

		let hit = map.trace(0, &Ray::from_points(vec3(100., 0., 0.), vec3(-100., 0., 0.)), &Shape::Ray, SolidBits::EVERYTHING).unwrap();
		assert!((hit.t - 36.).abs() < 1e-4);
		assert_eq!(hit.normal, Vec3::X);
		assert_eq!(hit.solidity, SolidBits::PLAYER_CLIP);

		assert_eq!(map.trace(0, &Ray::from_points(vec3(0., 0., 100.), vec3(0., 0., -100.)), &Shape::Ray, SolidBits::EVERYTHING), None);
		assert_eq!(map.trace(1, &Ray::from_points(vec3(-100., 0., 0.), vec3(100., 0., 0.)), &Shape::Ray, SolidBits::EVERYTHING), None);
	}

	#[test]
	fn mask_filters_brushes() {
		let map = two_blocks();
		let ray = Ray::from_points(Vec3::ZERO, vec3(100., 0., 0.));
		assert_eq!(map.trace(0, &ray, &Shape::Ray, SolidBits::SHOT), None);
		let hit = map.trace(0, &ray, &Shape::Ray, SolidBits::PLAYER_CLIP).unwrap();
		assert!((hit.t - 32.).abs() < 1e-4);
	}

	#[test]
	fn swept_box_stops_early() {
		let map = two_blocks();
		let shape = Shape::Aabb {
			center: Vec3::ZERO,
			extents: Vec3::splat(8.),
		};
		let hit = map.trace(0, &Ray::from_points(Vec3::ZERO, vec3(100., 0., 0.)), &shape, SolidBits::EVERYTHING).unwrap();
		assert!((hit.t - 24.).abs() < 1e-4);
		assert_eq!(hit.normal, Vec3::NEG_X);

		// Passes just above the block's top.
		let ray = Ray::from_points(vec3(0., 0., 24.5), vec3(100., 0., 24.5));
		assert_eq!(map.trace(0, &ray, &shape, SolidBits::EVERYTHING), None);
	}

	#[test]
	fn starting_inside() {
		let map = two_blocks();
		let hit = map.trace(0, &Ray::from_points(vec3(-48., 0., 0.), vec3(100., 0., 0.)), &Shape::Ray, SolidBits::EVERYTHING).unwrap();
		assert_eq!(hit.t, 0.);
		assert_eq!(hit.normal, Vec3::ZERO);
		assert_eq!(hit.solidity, SolidBits::WORLD);
	}

	#[test]
	fn zero_length_ray() {
		let map = two_blocks();
		assert_eq!(map.trace(0, &Ray::from_points(vec3(-48., 0., 0.), vec3(-48., 0., 0.)), &Shape::Ray, SolidBits::EVERYTHING), None);
	}

	#[test]
	fn parallel_outside_misses() {
		let planes = MinMax3::new(-Vec3::ONE, Vec3::ONE).planes();
		assert_eq!(sweep_planes(&Ray::from_points(vec3(-5., 2., 0.), vec3(5., 2., 0.)), &Shape::Ray, planes), None);
		let hit = sweep_planes(&Ray::from_points(vec3(-5., 0.5, 0.), vec3(5., 0.5, 0.)), &Shape::Ray, planes).unwrap();
		assert_eq!(hit.t, 4.);
	}

	#[test]
	fn tree_matches_brute_force() {
		let mut brushes = Vec::new();
		for x in 0..5 {
			for y in 0..5 {
				let min = vec3(x as f32 * 48., y as f32 * 48., (x + y) as f32 * 4.);
				brushes.push(block(min, min + vec3(16., 24., 32.), "rock"));
			}
		}
		let map = world(&brushes);
		assert!(map.nodes.len() > 1);

		let shapes = [
			Shape::Ray,
			Shape::Aabb {
				center: Vec3::Z * 2.,
				extents: vec3(4., 4., 8.),
			},
			Shape::Sphere {
				center: Vec3::ZERO,
				radius: 6.,
			},
		];

		let mut seed = 12345u32;
		let mut random = move || {
			seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12345);
			(seed >> 8) as f32 / (1 << 24) as f32
		};
		let mut hits = 0;
		for _ in 0..200 {
			let start = vec3(random() * 300. - 30., random() * 300. - 30., random() * 80. - 20.);
			let end = vec3(random() * 300. - 30., random() * 300. - 30., random() * 80. - 20.);
			let ray = Ray::from_points(start, end);
			for shape in &shapes {
				let tree = map.trace(0, &ray, shape, SolidBits::EVERYTHING);
				let brute = sweep_shape_vs_brushes(
					&ray,
					shape,
					map.brushes.iter().map(|brush| (map.brush_planes_of(brush), brush.solidity)),
					SolidBits::EVERYTHING,
				);
				match (tree, brute) {
					(Some(tree), Some(brute)) => {
						assert!((tree.t - brute.t).abs() < 1e-3, "{ray:?} {shape:?}: {tree:?} != {brute:?}");
						hits += 1;
					}
					(None, None) => {}
					_ => panic!("{ray:?} {shape:?}: {tree:?} != {brute:?}"),
				}
			}
		}
		assert!(hits > 0);
	}
}
