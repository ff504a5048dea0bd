//! The compiled cdmap format: a header table of sections followed by the sections themselves.

pub mod models;
pub mod nodes;

use std::io::Read;

use flate2::{read::GzDecoder, read::GzEncoder, Compression};

use crate::prelude::*;
use crate::CdmapError;

pub use models::*;
pub use nodes::*;

pub const MAGIC: [u8; 8] = *b"cdmap\0\0\0";
/// Bumped whenever the layout of any section changes. Files of other versions are rejected, not reinterpreted.
pub const FORMAT_VERSION: u32 = 1;
/// Deeper trees are treated as corrupt, and traversal never goes further.
pub const MAX_TREE_DEPTH: usize = 256;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// The sections of a cdmap file, in the order they appear.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumCount, strum::EnumIter)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[strum(serialize_all = "snake_case")]
pub enum Section {
	EntityData,
	Entities,
	Models,
	Nodes,
	Brushes,
	BrushIndices,
	BrushPlanes,
	BrushPlaneIndices,
	Meshes,
	Vertices,
	VertexIndices,
}

pub const SECTION_COUNT: usize = <Section as strum::EnumCount>::COUNT;

/// Points to the chunk of data in the file a section resides in.
#[derive(MapValue, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SectionEntry {
	pub offset: u32,
	pub size: u32,
}

impl SectionEntry {
	/// Returns the slice of `data` (cdmap file input) that this entry points to.
	pub fn get<'a>(&self, data: &'a [u8], section: Section) -> CdmapResult<&'a [u8]> {
		let (from, to) = (self.offset as usize, self.offset as usize + self.size as usize);
		if to > data.len() {
			Err(CdmapError::SectionOutOfBounds { section, entry: *self })
		} else {
			Ok(&data[from..to])
		}
	}
}

#[derive(MapValue, Debug, Clone, Copy, PartialEq)]
pub struct Header {
	pub magic: [u8; 8],
	pub format_version: u32,
	pub sections: [SectionEntry; SECTION_COUNT],
}

/// Helper function to read an array of data of type `T` from a section.
fn read_section<T: MapValue>(data: &[u8], sections: &[SectionEntry; SECTION_COUNT], section: Section) -> CdmapResult<Vec<T>> {
	let entry = sections[section as usize];
	let section_data = entry.get(data, section)?;
	if section_data.len() % T::SIZE != 0 {
		return Err(CdmapError::SectionSizeMismatch {
			section,
			size: entry.size,
			element_size: T::SIZE,
		});
	}

	let mut reader = MapByteReader::new(section_data);
	let count = section_data.len() / T::SIZE;
	let mut out = Vec::with_capacity(count);
	for i in 0..count {
		out.push(reader.read().job(format!("Parsing {section} section entry {i}"))?);
	}
	Ok(out)
}

fn write_section<T: MapValue>(writer: &mut MapByteWriter, items: &[T]) -> SectionEntry {
	writer.align_to(T::ALIGN);
	let offset = writer.pos();
	for item in items {
		writer.write(item);
	}
	SectionEntry {
		offset: offset as u32,
		size: (writer.pos() - offset) as u32,
	}
}

fn check_index(what: &'static str, index: u32, len: usize) -> CdmapResult<()> {
	if index as usize >= len {
		return Err(CdmapError::IndexOutOfRange {
			what,
			index: index as usize,
			len,
		});
	}
	Ok(())
}

fn check_range(what: &'static str, first: u32, count: u32, len: usize) -> CdmapResult<()> {
	let end = first as u64 + count as u64;
	if end > len as u64 {
		return Err(CdmapError::IndexOutOfRange {
			what,
			index: end as usize,
			len,
		});
	}
	Ok(())
}

/// A compiled map: entity metadata, collision brushes indexed by a kd-tree per model, and render meshes.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MapData {
	/// `key\0value\0` pairs of every entity, back to back.
	pub entity_data: String,
	pub entities: Vec<MapEntityRecord>,
	pub models: Vec<MapModel>,
	pub nodes: Vec<KdTreeNode>,
	pub brushes: Vec<MapBrush>,
	/// Referenced by kd-tree leaves.
	pub brush_indices: Vec<u32>,
	pub brush_planes: Vec<Plane>,
	/// Referenced by brushes.
	pub brush_plane_indices: Vec<u32>,
	pub meshes: Vec<MapMesh>,
	pub vertices: Vec<MapVertex>,
	pub vertex_indices: Vec<u32>,
}

impl MapData {
	/// Parses and validates a cdmap file. Gzip compressed input is decompressed first.
	pub fn parse(data: &[u8]) -> CdmapResult<Self> {
		if data.starts_with(&GZIP_MAGIC) {
			let mut decompressed = Vec::new();
			GzDecoder::new(data)
				.read_to_end(&mut decompressed)
				.map_err(|err| CdmapError::Decompress(err.to_string()))?;
			return Self::parse_uncompressed(&decompressed);
		}

		Self::parse_uncompressed(data)
	}

	fn parse_uncompressed(data: &[u8]) -> CdmapResult<Self> {
		let mut reader = MapByteReader::new(data);

		let magic: [u8; 8] = reader.read().job("Reading magic number")?;
		if magic != MAGIC {
			return Err(CdmapError::WrongMagicNumber {
				found: magic,
				expected: "cdmap",
			});
		}
		let format_version: u32 = reader.read().job("Reading format version")?;
		if format_version != FORMAT_VERSION {
			return Err(CdmapError::UnsupportedVersion {
				found: format_version,
				expected: FORMAT_VERSION,
			});
		}
		let sections: [SectionEntry; SECTION_COUNT] = reader.read().job("Reading section table")?;

		let entity_data = Section::EntityData;
		let entity_bytes = sections[entity_data as usize].get(data, entity_data)?;

		let map = Self {
			entity_data: std::str::from_utf8(entity_bytes)
				.map_err(CdmapError::map_utf8_error(entity_bytes))
				.job("Reading entity data section")?
				.to_string(),
			entities: read_section(data, &sections, Section::Entities)?,
			models: read_section(data, &sections, Section::Models)?,
			nodes: read_section(data, &sections, Section::Nodes)?,
			brushes: read_section(data, &sections, Section::Brushes)?,
			brush_indices: read_section(data, &sections, Section::BrushIndices)?,
			brush_planes: read_section(data, &sections, Section::BrushPlanes)?,
			brush_plane_indices: read_section(data, &sections, Section::BrushPlaneIndices)?,
			meshes: read_section(data, &sections, Section::Meshes)?,
			vertices: read_section(data, &sections, Section::Vertices)?,
			vertex_indices: read_section(data, &sections, Section::VertexIndices)?,
		};
		map.validate().job("Validating indices")?;

		Ok(map)
	}

	/// Serializes into a cdmap file. Padding between sections is zeroed.
	pub fn write(&self) -> Vec<u8> {
		let mut writer = MapByteWriter::new();
		writer.write_bytes(&[0; Header::SIZE]);

		let mut sections = [SectionEntry::default(); SECTION_COUNT];
		sections[Section::EntityData as usize] = write_section(&mut writer, self.entity_data.as_bytes());
		sections[Section::Entities as usize] = write_section(&mut writer, &self.entities);
		sections[Section::Models as usize] = write_section(&mut writer, &self.models);
		sections[Section::Nodes as usize] = write_section(&mut writer, &self.nodes);
		sections[Section::Brushes as usize] = write_section(&mut writer, &self.brushes);
		sections[Section::BrushIndices as usize] = write_section(&mut writer, &self.brush_indices);
		sections[Section::BrushPlanes as usize] = write_section(&mut writer, &self.brush_planes);
		sections[Section::BrushPlaneIndices as usize] = write_section(&mut writer, &self.brush_plane_indices);
		sections[Section::Meshes as usize] = write_section(&mut writer, &self.meshes);
		sections[Section::Vertices as usize] = write_section(&mut writer, &self.vertices);
		sections[Section::VertexIndices as usize] = write_section(&mut writer, &self.vertex_indices);

		for section in <Section as strum::IntoEnumIterator>::iter() {
			log::debug!("section {section:<20} is size {:>10}", sections[section as usize].size);
		}

		let mut header = MapByteWriter::new();
		header.write(&Header {
			magic: MAGIC,
			format_version: FORMAT_VERSION,
			sections,
		});
		writer.overwrite(0, &header.into_bytes());

		writer.into_bytes()
	}

	/// Like [`Self::write`], but gzip compressed. [`Self::parse`] reads both.
	pub fn write_compressed(&self) -> std::io::Result<Vec<u8>> {
		let bytes = self.write();
		let mut compressed = Vec::new();
		GzEncoder::new(bytes.as_slice(), Compression::default()).read_to_end(&mut compressed)?;
		Ok(compressed)
	}

	/// Checks that every index into another section is in range, so that queries can index without bounds failures.
	pub fn validate(&self) -> CdmapResult<()> {
		for (i, entity) in self.entities.iter().enumerate() {
			let (from, len) = (entity.data_offset as usize, entity.data_len as usize);
			if self.entity_data.get(from..from + len).is_none() {
				return Err(CdmapError::IndexOutOfRange {
					what: "Entity data",
					index: from + len,
					len: self.entity_data.len(),
				})
				.job(format!("Entity {i}"));
			}
			if entity.model != -1 {
				check_index("Model", entity.model as u32, self.models.len()).job(format!("Entity {i}"))?;
			}
		}

		for (i, model) in self.models.iter().enumerate() {
			check_index("Node", model.root_node, self.nodes.len()).job(format!("Model {i}"))?;
			check_range("Mesh", model.first_mesh, model.num_meshes, self.meshes.len()).job(format!("Model {i}"))?;
		}

		for (i, node) in self.nodes.iter().enumerate() {
			match *node {
				KdTreeNode::Interior { below, above, .. } => {
					for child in [below, above] {
						check_index("Node", child, self.nodes.len()).job(format!("Node {i}"))?;
						// Children always come after their parent, so trees can't contain cycles.
						if child as usize <= i {
							return Err(CdmapError::IndexOutOfRange {
								what: "Child node",
								index: child as usize,
								len: i,
							})
							.job(format!("Node {i}"));
						}
					}
				}
				KdTreeNode::Leaf { first_brush, num_brushes } => {
					check_range("Brush index", first_brush, num_brushes, self.brush_indices.len()).job(format!("Node {i}"))?;
				}
			}
		}

		for (i, &brush) in self.brush_indices.iter().enumerate() {
			check_index("Brush", brush, self.brushes.len()).job(format!("Brush index {i}"))?;
		}
		for (i, brush) in self.brushes.iter().enumerate() {
			check_range(
				"Brush plane index",
				brush.first_plane,
				brush.num_planes as u32,
				self.brush_plane_indices.len(),
			)
			.job(format!("Brush {i}"))?;
		}
		for (i, &plane) in self.brush_plane_indices.iter().enumerate() {
			check_index("Brush plane", plane, self.brush_planes.len()).job(format!("Brush plane index {i}"))?;
		}

		for (i, mesh) in self.meshes.iter().enumerate() {
			check_range("Vertex", mesh.first_vertex, mesh.num_vertices, self.vertices.len()).job(format!("Mesh {i}"))?;
			check_range("Vertex index", mesh.first_index, mesh.num_indices, self.vertex_indices.len()).job(format!("Mesh {i}"))?;
			let indices = &self.vertex_indices[mesh.first_index as usize..(mesh.first_index + mesh.num_indices) as usize];
			for &index in indices {
				check_index("Vertex", index, mesh.num_vertices as usize).job(format!("Mesh {i}"))?;
			}
		}

		Ok(())
	}

	/// Iterates over the key/value pairs of an entity.
	pub fn entity_key_values<'a>(&'a self, entity: &MapEntityRecord) -> impl Iterator<Item = (&'a str, &'a str)> + 'a {
		let from = entity.data_offset as usize;
		let data = self.entity_data.get(from..from + entity.data_len as usize).unwrap_or_default();
		let mut parts = data.split('\0');
		std::iter::from_fn(move || Some((parts.next()?, parts.next()?)))
	}

	/// Returns the value of `key` on the entity at `entity_idx`.
	pub fn entity_value(&self, entity_idx: usize, key: &str) -> Option<&str> {
		let entity = self.entities.get(entity_idx)?;
		self.entity_key_values(entity).find(|(k, _)| *k == key).map(|(_, v)| v)
	}

	/// The planes of a brush, bounding box planes first.
	pub fn brush_planes_of<'a>(&'a self, brush: &MapBrush) -> impl Iterator<Item = Plane> + 'a {
		let first = brush.first_plane as usize;
		self.brush_plane_indices[first..first + brush.num_planes as usize]
			.iter()
			.map(|&plane| self.brush_planes[plane as usize])
	}

	/// The brushes listed by a leaf.
	pub fn leaf_brushes(&self, first_brush: u32, num_brushes: u32) -> impl Iterator<Item = &MapBrush> + '_ {
		let first = first_brush as usize;
		self.brush_indices[first..first + num_brushes as usize]
			.iter()
			.map(|&brush| &self.brushes[brush as usize])
	}

	/// The vertices and (mesh-relative) indices of a mesh.
	pub fn mesh_geometry(&self, mesh: &MapMesh) -> (&[MapVertex], &[u32]) {
		let (first_vertex, first_index) = (mesh.first_vertex as usize, mesh.first_index as usize);
		(
			&self.vertices[first_vertex..first_vertex + mesh.num_vertices as usize],
			&self.vertex_indices[first_index..first_index + mesh.num_indices as usize],
		)
	}
}
