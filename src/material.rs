//! Solidity classification of surfaces, and the lookup from material names to it.

use bitflags::bitflags;

use crate::prelude::*;

bitflags! {
	/// What categories of query a surface blocks. Traces pass a mask and only hit surfaces sharing a bit with it.
	#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
	#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
	#[repr(transparent)]
	pub struct SolidBits: u16 {
		const WORLD = 1 << 0;

		const PLAYER_CLIP = 1 << 1;
		const WEAPON_CLIP = 1 << 2;
		const WALLBANGABLE = 1 << 3;
		const LADDER = 1 << 4;
		const TRIGGER = 1 << 5;

		const PLAYER_TEAM_ONE = 1 << 6;
		const PLAYER_TEAM_TWO = 1 << 7;
		const PLAYER_TEAM_THREE = 1 << 8;
		const PLAYER_TEAM_FOUR = 1 << 9;

		/// Any player, regardless of team.
		const PLAYER = Self::PLAYER_TEAM_ONE.bits() | Self::PLAYER_TEAM_TWO.bits() | Self::PLAYER_TEAM_THREE.bits() | Self::PLAYER_TEAM_FOUR.bits();
		/// Everything that stops movement.
		const ANY_SOLID = Self::WORLD.bits() | Self::PLAYER_CLIP.bits() | Self::WEAPON_CLIP.bits() | Self::WALLBANGABLE.bits() | Self::PLAYER.bits();
		/// Everything that blocks sight.
		const OPAQUE = Self::WORLD.bits() | Self::WEAPON_CLIP.bits() | Self::WALLBANGABLE.bits();
		/// What a bullet that already went through a wall still hits.
		const WALLBANG_SHOT = Self::WEAPON_CLIP.bits() | Self::PLAYER.bits();
		const SHOT = Self::WALLBANG_SHOT.bits() | Self::WALLBANGABLE.bits();

		const EVERYTHING = (1 << 10) - 1;
	}
}

impl MapValue for SolidBits {
	const SIZE: usize = u16::SIZE;
	const ALIGN: usize = u16::ALIGN;

	fn map_parse(reader: &mut MapByteReader) -> CdmapResult<Self> {
		u16::map_parse(reader).map(Self::from_bits_retain)
	}
	fn map_write(&self, writer: &mut MapByteWriter) {
		self.bits().map_write(writer);
	}
}

/// Collision and visibility properties of a material the level editor knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EditorMaterial {
	pub solidity: SolidBits,
	/// Whether faces with this material produce render meshes.
	pub visible: bool,
}

impl EditorMaterial {
	/// What a material without an editor entry behaves like: solid world geometry you can see.
	pub const DEFAULT: Self = Self {
		solidity: SolidBits::WORLD,
		visible: true,
	};

	pub const fn new(solidity: SolidBits, visible: bool) -> Self {
		Self { solidity, visible }
	}
}

impl Default for EditorMaterial {
	fn default() -> Self {
		Self::DEFAULT
	}
}

/// Resolves material names to their editor properties.
///
/// Implemented by the game's material system; [`EditorMaterials`] is the built-in table.
pub trait MaterialLookup: Sync {
	/// Returns `None` for materials that aren't editor materials.
	fn find_editor_material(&self, name: StringHash) -> Option<EditorMaterial>;

	/// Like [`Self::find_editor_material`], but falls back to [`EditorMaterial::DEFAULT`].
	fn material_or_default(&self, name: &str) -> EditorMaterial {
		self.find_editor_material(StringHash::new(name)).unwrap_or_default()
	}
}

/// The built-in editor material table.
#[derive(Debug, Clone, Copy, Default)]
pub struct EditorMaterials;

impl EditorMaterials {
	pub const TABLE: &'static [(&'static str, EditorMaterial)] = &[
		("editor/clip", EditorMaterial::new(SolidBits::PLAYER_CLIP, false)),
		("editor/weaponclip", EditorMaterial::new(SolidBits::WEAPON_CLIP, false)),
		("editor/wallbangable", EditorMaterial::new(SolidBits::WALLBANGABLE, true)),
		("editor/ladder", EditorMaterial::new(SolidBits::LADDER, false)),
		("editor/trigger", EditorMaterial::new(SolidBits::TRIGGER, false)),
		("editor/nodraw", EditorMaterial::new(SolidBits::WORLD, false)),
		("editor/nonsolid", EditorMaterial::new(SolidBits::empty(), true)),
	];
}

impl MaterialLookup for EditorMaterials {
	fn find_editor_material(&self, name: StringHash) -> Option<EditorMaterial> {
		Self::TABLE
			.iter()
			.find(|(material_name, _)| StringHash::new(material_name) == name)
			.map(|(_, material)| *material)
	}
}

/// Lets callers pass their own table as a map from name hash to material.
impl MaterialLookup for HashMap<StringHash, EditorMaterial> {
	fn find_editor_material(&self, name: StringHash) -> Option<EditorMaterial> {
		self.get(&name).copied()
	}
}
