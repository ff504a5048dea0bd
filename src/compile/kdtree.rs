//! Surface area heuristic kd-tree construction over brush bounding boxes.

use crate::{
	data::{Axis, KdTreeNode},
	prelude::*,
};

/// Costs steering the surface area heuristic.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct KdTreeSettings {
	/// Cost of visiting an interior node.
	pub traversal_cost: f32,
	/// Cost of testing a single brush.
	pub intersect_cost: f32,
	/// Cost multiplier for splits where one side has no brushes.
	pub empty_bonus: f32,
}

impl Default for KdTreeSettings {
	fn default() -> Self {
		Self {
			traversal_cost: 1.,
			intersect_cost: 80.,
			empty_bonus: 0.5,
		}
	}
}

/// A kd-tree whose root is node 0, always an interior node. Children always come after their parent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KdTree {
	pub nodes: Vec<KdTreeNode>,
	/// What leaves index into. A brush may show up in several leaves.
	pub brush_indices: Vec<u32>,
	pub bounds: MinMax3,
}

impl KdTree {
	/// Recursion depth limit for a tree over `num_brushes` brushes.
	pub fn max_depth(num_brushes: usize) -> u32 {
		if num_brushes == 0 {
			return 0;
		}
		(8. + 1.3 * num_brushes.ilog2() as f32).round() as u32
	}

	pub fn build(brush_bounds: &[MinMax3], settings: &KdTreeSettings) -> Self {
		let bounds = brush_bounds.iter().fold(MinMax3::EMPTY, |acc, b| acc.union(*b));
		let mut builder = KdTreeBuilder {
			brush_bounds,
			settings,
			nodes: vec![EMPTY_LEAF],
			brush_indices: Vec::new(),
		};

		let all: Vec<u32> = (0..brush_bounds.len() as u32).collect();
		builder.build_node(0, &all, bounds, Self::max_depth(brush_bounds.len()));

		// Keep the root an interior node so traversal never starts at a leaf.
		if builder.nodes[0].is_leaf() {
			let leaf = builder.nodes[0];
			let child = builder.nodes.len() as u32;
			builder.nodes.push(leaf);
			builder.nodes[0] = KdTreeNode::Interior {
				axis: Axis::X,
				distance: if bounds.is_empty() { 0. } else { bounds.max.x },
				below: child,
				above: child,
			};
		}

		Self {
			nodes: builder.nodes,
			brush_indices: builder.brush_indices,
			bounds,
		}
	}

	/// The brushes of every leaf.
	pub fn leaves(&self) -> impl Iterator<Item = &[u32]> + '_ {
		self.nodes.iter().filter_map(|node| match *node {
			KdTreeNode::Leaf { first_brush, num_brushes } => Some(&self.brush_indices[first_brush as usize..(first_brush + num_brushes) as usize]),
			KdTreeNode::Interior { .. } => None,
		})
	}
}

const EMPTY_LEAF: KdTreeNode = KdTreeNode::Leaf { first_brush: 0, num_brushes: 0 };

#[derive(Debug, Clone, Copy)]
struct Event {
	distance: f32,
	start: bool,
	brush: u32,
}

struct Split {
	axis: Axis,
	distance: f32,
	below: Vec<u32>,
	above: Vec<u32>,
}

struct KdTreeBuilder<'a> {
	brush_bounds: &'a [MinMax3],
	settings: &'a KdTreeSettings,
	nodes: Vec<KdTreeNode>,
	brush_indices: Vec<u32>,
}

impl KdTreeBuilder<'_> {
	/// Fills in the node at `slot`, which has already been allocated.
	fn build_node(&mut self, slot: usize, brushes: &[u32], bounds: MinMax3, depth_left: u32) {
		let split = if brushes.len() > 1 && depth_left > 0 { self.find_split(brushes, &bounds) } else { None };

		let Some(Split { axis, distance, below, above }) = split else {
			self.nodes[slot] = KdTreeNode::Leaf {
				first_brush: self.brush_indices.len() as u32,
				num_brushes: brushes.len() as u32,
			};
			self.brush_indices.extend_from_slice(brushes);
			return;
		};

		let (below_bounds, above_bounds) = bounds.split(axis.index(), distance);
		let below_slot = self.nodes.len();
		let above_slot = below_slot + 1;
		self.nodes.extend([EMPTY_LEAF; 2]);
		self.nodes[slot] = KdTreeNode::Interior {
			axis,
			distance,
			below: below_slot as u32,
			above: above_slot as u32,
		};

		self.build_node(below_slot, &below, below_bounds, depth_left - 1);
		self.build_node(above_slot, &above, above_bounds, depth_left - 1);
	}

	/// The cheapest split of the first axis (longest first) that has a candidate plane strictly inside `bounds`, if it beats making a leaf.
	fn find_split(&self, brushes: &[u32], bounds: &MinMax3) -> Option<Split> {
		let total_area = bounds.surface_area();
		if total_area <= 0. {
			return None;
		}
		let KdTreeSettings {
			traversal_cost,
			intersect_cost,
			empty_bonus,
		} = *self.settings;
		let num_brushes = brushes.len();
		let leaf_cost = intersect_cost * num_brushes as f32;

		let mut axis = Axis::from_index(bounds.longest_axis()).unwrap_or(Axis::X);
		let mut events = Vec::with_capacity(num_brushes * 2);

		for _ in 0..3 {
			let a = axis.index();
			events.clear();
			for &brush in brushes {
				let brush_bounds = &self.brush_bounds[brush as usize];
				events.push(Event {
					distance: brush_bounds.min[a],
					start: true,
					brush,
				});
				events.push(Event {
					distance: brush_bounds.max[a],
					start: false,
					brush,
				});
			}
			// Starts before ends at the same distance, then by brush.
			events.sort_by(|x, y| x.distance.total_cmp(&y.distance).then(y.start.cmp(&x.start)).then(x.brush.cmp(&y.brush)));

			let mut best: Option<(f32, usize)> = None;
			let (mut num_below, mut num_above) = (0, num_brushes);

			for (i, event) in events.iter().enumerate() {
				if !event.start {
					num_above -= 1;
				}

				if event.distance > bounds.min[a] && event.distance < bounds.max[a] {
					let (below_bounds, above_bounds) = bounds.split(a, event.distance);
					let below_probability = below_bounds.surface_area() / total_area;
					let above_probability = above_bounds.surface_area() / total_area;
					let bonus = if num_below == 0 || num_above == 0 { empty_bonus } else { 1. };
					let cost = traversal_cost + intersect_cost * bonus * (below_probability * num_below as f32 + above_probability * num_above as f32);

					if best.map_or(true, |(best_cost, _)| cost < best_cost) {
						best = Some((cost, i));
					}
				}

				if event.start {
					num_below += 1;
				}
			}

			if let Some((cost, index)) = best {
				if cost >= leaf_cost {
					return None;
				}
				return Some(Split {
					axis,
					distance: events[index].distance,
					below: events[..index].iter().filter(|e| e.start).map(|e| e.brush).collect(),
					above: events[index + 1..].iter().filter(|e| !e.start).map(|e| e.brush).collect(),
				});
			}

			axis = axis.next();
		}

		None
	}
}
