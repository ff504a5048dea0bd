pub(crate) use glam::*;
#[cfg(feature = "serde")]
pub(crate) use serde::{Deserialize, Serialize};
pub(crate) use smallvec::*;
pub(crate) use std::collections::HashMap;
pub(crate) use thiserror::Error;

pub(crate) use cdmap_macros::MapValue;
pub(crate) use crate::{
	reader::{MapByteReader, MapValue},
	util::*,
	writer::MapByteWriter,
};

pub use crate::{
	collision::{
		entity_bounds, storage::CollisionModelStorage, storage::SharedCollisionStorage, trace_vs_ent, CollisionModel, EntityKind, EntityState,
		Ray, Shape, Trace,
	},
	compile::{compile_map, CompileError, CompileSettings},
	data::{MapData, Section, SectionEntry},
	geom::{MinMax3, Plane},
	map::{parse_map, MapEntity, MapParseError},
	material::{EditorMaterial, EditorMaterials, MaterialLookup, SolidBits},
	util::StringHash,
	CdmapError, CdmapResult, ResultDoingJobExt,
};
