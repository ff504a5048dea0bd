//! Parsing of Quake-family `.map` source text into entities, brushes and patches.
//!
//! Supports Quake 1 (standard and Valve 220 texturing) and Quake 3 (`brushDef` brush primitives and `patchDef2`) syntax.

use std::borrow::Cow;

use crate::prelude::*;

/// Brushes with fewer faces can't enclose a volume.
pub const MIN_BRUSH_FACES: usize = 4;
pub const MAX_BRUSH_FACES: usize = 32;
/// Control point capacity of a single patch.
pub const MAX_PATCH_CONTROL_POINTS: usize = 1024;
pub const MAX_ENTITY_KEY_VALUES: usize = 64;

#[derive(Debug, Clone, Error)]
pub enum MapParseError {
	#[error("Line {line}: Expected {expected}, found end of file")]
	UnexpectedEof { line: usize, expected: &'static str },
	#[error("Line {line}: Expected {expected}, found \"{found}\"")]
	UnexpectedToken { line: usize, found: String, expected: &'static str },
	#[error("Line {line}: \"{token}\" is not a valid number")]
	InvalidNumber { line: usize, token: String },
	#[error("Line {line}: Unterminated string")]
	UnterminatedString { line: usize },
	#[error("Line {line}: Brush has {count} faces, at least {min} are needed to bound a volume", min = MIN_BRUSH_FACES)]
	TooFewBrushFaces { line: usize, count: usize },
	#[error("Line {line}: Brush has more than {max} faces", max = MAX_BRUSH_FACES)]
	TooManyBrushFaces { line: usize },
	#[error("Line {line}: Invalid patch size {width}x{height}, dimensions must be odd, at least 3, and hold at most {max} control points", max = MAX_PATCH_CONTROL_POINTS)]
	InvalidPatchSize { line: usize, width: i64, height: i64 },
	#[error("Line {line}: Entity has more than {max} key/value pairs", max = MAX_ENTITY_KEY_VALUES)]
	TooManyKeyValues { line: usize },
	#[error("Map contains no entities")]
	NoEntities,

	/// For telling the user exactly where the error occurred in the process.
	#[error("{0} - {1}")]
	DoingJob(String, Box<MapParseError>),
}
crate::impl_doing_job!(MapParseError);

/// How a face maps positions to texture coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum TextureProjection {
	/// Quake 1 `u v angle su sv`, projected along the closest axis plane. Offsets are in texels.
	Standard { offset: Vec2, rotation: f32, scale: Vec2 },
	/// Valve 220 `[ ux uy uz u ] [ vx vy vz v ] angle su sv`, with explicit texture axes. Offsets are in texels.
	Valve {
		u_axis: Vec3,
		u_offset: f32,
		v_axis: Vec3,
		v_offset: f32,
		rotation: f32,
		scale: Vec2,
	},
	/// Quake 3 brush primitive 2x3 matrix, mapping positions in the face's axis base to normalized texture space.
	BrushPrimitive { rows: [Vec3; 2] },
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Face {
	/// 3 points on the plane, clockwise when looking at the front of the face.
	pub points: [Vec3; 3],
	pub material: String,
	pub projection: TextureProjection,
	/// Content, surface and value flags, zero if the face didn't specify them.
	pub flags: [i32; 3],
}

#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Brush {
	pub faces: SmallVec<[Face; 6]>,
	/// Line in the source the brush starts on, for diagnostics.
	pub line: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ControlPoint {
	pub position: Vec3,
	pub uv: Vec2,
}

/// Grid of quadratic bezier control points. Neighboring 3x3 sub-patches share their edge rows/columns.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Patch {
	pub material: String,
	pub width: usize,
	pub height: usize,
	/// `width` rows of `height` points each.
	pub control_points: Vec<ControlPoint>,
	pub line: usize,
}

impl Patch {
	#[inline]
	pub fn control_point(&self, x: usize, y: usize) -> &ControlPoint {
		&self.control_points[x * self.height + y]
	}
}

#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MapEntity {
	/// Key/value pairs in source order.
	pub properties: Vec<(String, String)>,
	pub brushes: Vec<Brush>,
	pub patches: Vec<Patch>,
	pub line: usize,
}

impl MapEntity {
	/// Returns the value of `key`. When a key is repeated, the last one wins.
	pub fn get(&self, key: &str) -> Option<&str> {
		self.properties.iter().rev().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
	}

	/// Sets `key` to `value`, replacing an existing value.
	pub fn set(&mut self, key: &str, value: impl Into<String>) {
		let value = value.into();
		match self.properties.iter_mut().rev().find(|(k, _)| k == key) {
			Some((_, v)) => *v = value,
			None => self.properties.push((key.to_owned(), value)),
		}
	}

	#[inline]
	pub fn classname(&self) -> Option<&str> {
		self.get("classname")
	}

	/// Parses the `origin` key, `None` if it's missing or malformed.
	pub fn origin(&self) -> Option<Vec3> {
		let mut components = self.get("origin")?.split_whitespace().map(str::parse::<f32>);
		let origin = vec3(components.next()?.ok()?, components.next()?.ok()?, components.next()?.ok()?);
		components.next().is_none().then_some(origin)
	}

	/// Whether the entity has any brushes or patches.
	#[inline]
	pub fn has_geometry(&self) -> bool {
		!self.brushes.is_empty() || !self.patches.is_empty()
	}

	/// Writes the key/value pairs back out in `.map` syntax, one pair per line.
	pub fn write_key_values(&self) -> String {
		fn escape(s: &str) -> String {
			s.replace('\\', "\\\\").replace('"', "\\\"")
		}

		let mut out = String::new();
		for (key, value) in &self.properties {
			out.push_str(&format!("\"{}\" \"{}\"\n", escape(key), escape(value)));
		}
		out
	}
}

/// Replaces `//` comments outside of quoted strings with spaces, keeping byte offsets and line breaks where they were.
pub fn blank_comments(source: &str) -> String {
	let mut out = String::with_capacity(source.len());
	let mut chars = source.chars().peekable();
	let mut in_string = false;
	let mut in_comment = false;

	while let Some(c) = chars.next() {
		if in_comment {
			if c == '\n' {
				in_comment = false;
				out.push(c);
			} else {
				for _ in 0..c.len_utf8() {
					out.push(' ');
				}
			}
			continue;
		}

		match c {
			'\\' if in_string => {
				out.push(c);
				if let Some(escaped) = chars.next() {
					out.push(escaped);
				}
				continue;
			}
			'"' => in_string = !in_string,
			'\n' => in_string = false,
			'/' if !in_string && chars.peek() == Some(&'/') => {
				in_comment = true;
				out.push(' ');
				continue;
			}
			_ => {}
		}
		out.push(c);
	}

	out
}

struct Token<'a> {
	text: Cow<'a, str>,
	line: usize,
	quoted: bool,
}

fn tokenize(source: &str) -> Result<Vec<Token<'_>>, MapParseError> {
	let mut tokens = Vec::new();
	let mut line = 1;
	let mut chars = source.char_indices().peekable();

	while let Some(&(start, c)) = chars.peek() {
		if c == '\n' {
			line += 1;
			chars.next();
			continue;
		}
		if c.is_whitespace() {
			chars.next();
			continue;
		}

		if c == '"' {
			chars.next();
			let token_line = line;
			let mut value = String::new();
			let mut closed = false;

			while let Some((_, c)) = chars.next() {
				match c {
					'"' => {
						closed = true;
						break;
					}
					'\\' => match chars.peek() {
						Some(&(_, escaped @ ('"' | '\\'))) => {
							value.push(escaped);
							chars.next();
						}
						_ => value.push(c),
					},
					'\n' => {
						line += 1;
						value.push(c);
					}
					_ => value.push(c),
				}
			}

			if !closed {
				return Err(MapParseError::UnterminatedString { line: token_line });
			}
			tokens.push(Token {
				text: Cow::Owned(value),
				line: token_line,
				quoted: true,
			});
			continue;
		}

		let mut end = source.len();
		while let Some(&(i, c)) = chars.peek() {
			if c.is_whitespace() {
				end = i;
				break;
			}
			chars.next();
		}
		tokens.push(Token {
			text: Cow::Borrowed(&source[start..end]),
			line,
			quoted: false,
		});
	}

	Ok(tokens)
}

/// Recursive descent over the token list.
struct MapParser<'a> {
	tokens: Vec<Token<'a>>,
	pos: usize,
}

enum Block {
	Brush(Brush),
	Patch(Patch),
}

impl<'a> MapParser<'a> {
	/// Line of the next token, or of the last one at the end of the file.
	fn line(&self) -> usize {
		self.tokens
			.get(self.pos)
			.or(self.tokens.last())
			.map(|token| token.line)
			.unwrap_or(1)
	}

	fn peek(&self) -> Option<&Token<'a>> {
		self.tokens.get(self.pos)
	}

	/// Whether the next token is the unquoted `literal`.
	fn peek_is(&self, literal: &str) -> bool {
		self.peek().is_some_and(|token| !token.quoted && token.text == literal)
	}

	fn peek_is_number(&self) -> bool {
		self.peek().is_some_and(|token| !token.quoted && token.text.parse::<f64>().is_ok())
	}

	fn next(&mut self, expected: &'static str) -> Result<&Token<'a>, MapParseError> {
		let line = self.line();
		let token = self.tokens.get(self.pos).ok_or(MapParseError::UnexpectedEof { line, expected })?;
		self.pos += 1;
		Ok(token)
	}

	fn expect(&mut self, literal: &'static str) -> Result<(), MapParseError> {
		let token = self.next(literal)?;
		if token.quoted || token.text != literal {
			return Err(MapParseError::UnexpectedToken {
				line: token.line,
				found: token.text.to_string(),
				expected: literal,
			});
		}
		Ok(())
	}

	fn quoted(&mut self, expected: &'static str) -> Result<String, MapParseError> {
		let token = self.next(expected)?;
		if !token.quoted {
			return Err(MapParseError::UnexpectedToken {
				line: token.line,
				found: token.text.to_string(),
				expected,
			});
		}
		Ok(token.text.to_string())
	}

	/// A bare word, such as a material name.
	fn word(&mut self, expected: &'static str) -> Result<String, MapParseError> {
		Ok(self.next(expected)?.text.to_string())
	}

	fn float(&mut self) -> Result<f32, MapParseError> {
		let token = self.next("number")?;
		token.text.parse().map_err(|_| MapParseError::InvalidNumber {
			line: token.line,
			token: token.text.to_string(),
		})
	}

	fn int(&mut self) -> Result<i64, MapParseError> {
		let token = self.next("integer")?;
		token.text.parse().map_err(|_| MapParseError::InvalidNumber {
			line: token.line,
			token: token.text.to_string(),
		})
	}

	/// `( x y z )`
	fn vec3(&mut self) -> Result<Vec3, MapParseError> {
		self.expect("(")?;
		let v = vec3(self.float()?, self.float()?, self.float()?);
		self.expect(")")?;
		Ok(v)
	}

	fn points(&mut self) -> Result<[Vec3; 3], MapParseError> {
		Ok([self.vec3()?, self.vec3()?, self.vec3()?])
	}

	/// Up to 3 trailing integer flags.
	fn flags(&mut self) -> Result<[i32; 3], MapParseError> {
		let mut flags = [0; 3];
		for flag in &mut flags {
			if !self.peek_is_number() {
				break;
			}
			*flag = self.int()? as i32;
		}
		Ok(flags)
	}

	fn parse_entities(&mut self) -> Result<Vec<MapEntity>, MapParseError> {
		let mut entities = Vec::new();
		while self.peek().is_some() {
			let line = self.line();
			let entity = self.parse_entity().job(format!("Parsing entity {} (line {line})", entities.len()))?;
			entities.push(entity);
		}
		if entities.is_empty() {
			return Err(MapParseError::NoEntities);
		}
		Ok(entities)
	}

	fn parse_entity(&mut self) -> Result<MapEntity, MapParseError> {
		let mut entity = MapEntity {
			line: self.line(),
			..Default::default()
		};
		self.expect("{")?;

		while self.peek().is_some_and(|token| token.quoted) {
			if entity.properties.len() == MAX_ENTITY_KEY_VALUES {
				return Err(MapParseError::TooManyKeyValues { line: self.line() });
			}
			let key = self.quoted("key")?;
			let value = self.quoted("value")?;
			entity.properties.push((key, value));
		}

		loop {
			if self.peek_is("}") {
				self.pos += 1;
				break;
			}
			let line = self.line();
			match self.peek() {
				None => return Err(MapParseError::UnexpectedEof { line, expected: "}" }),
				Some(token) if !token.quoted && token.text == "{" => {}
				Some(token) => {
					return Err(MapParseError::UnexpectedToken {
						line,
						found: token.text.to_string(),
						expected: "{ or }",
					})
				}
			}

			let block_index = entity.brushes.len() + entity.patches.len();
			match self.parse_block().job(format!("Parsing brush {block_index} (line {line})"))? {
				Block::Brush(brush) => entity.brushes.push(brush),
				Block::Patch(patch) => entity.patches.push(patch),
			}
		}

		Ok(entity)
	}

	fn parse_block(&mut self) -> Result<Block, MapParseError> {
		let line = self.line();
		self.expect("{")?;

		if self.peek_is("brushDef") {
			self.pos += 1;
			self.expect("{")?;
			let brush = self.parse_brush_faces(line, Self::parse_brush_primitive_face)?;
			self.expect("}")?;
			Ok(Block::Brush(brush))
		} else if self.peek_is("patchDef2") {
			self.pos += 1;
			let patch = self.parse_patch(line)?;
			self.expect("}")?;
			Ok(Block::Patch(patch))
		} else {
			Ok(Block::Brush(self.parse_brush_faces(line, Self::parse_standard_face)?))
		}
	}

	/// Faces up to and including the closing `}`.
	fn parse_brush_faces(&mut self, line: usize, parse_face: fn(&mut Self) -> Result<Face, MapParseError>) -> Result<Brush, MapParseError> {
		let mut brush = Brush { faces: SmallVec::new(), line };

		while self.peek_is("(") {
			if brush.faces.len() == MAX_BRUSH_FACES {
				return Err(MapParseError::TooManyBrushFaces { line });
			}
			let face_line = self.line();
			let face = parse_face(self).job(format!("Parsing face {} (line {face_line})", brush.faces.len()))?;
			brush.faces.push(face);
		}
		self.expect("}")?;

		if brush.faces.len() < MIN_BRUSH_FACES {
			return Err(MapParseError::TooFewBrushFaces {
				line,
				count: brush.faces.len(),
			});
		}
		Ok(brush)
	}

	/// `( p0 ) ( p1 ) ( p2 ) material u v angle su sv [flags]`, or the Valve 220 form
	/// `( p0 ) ( p1 ) ( p2 ) material [ ux uy uz u ] [ vx vy vz v ] angle su sv [flags]`.
	fn parse_standard_face(&mut self) -> Result<Face, MapParseError> {
		let points = self.points()?;
		let material = self.word("material")?;

		let projection = if self.peek_is("[") {
			let mut axis = || -> Result<(Vec3, f32), MapParseError> {
				self.expect("[")?;
				let axis = vec3(self.float()?, self.float()?, self.float()?);
				let offset = self.float()?;
				self.expect("]")?;
				Ok((axis, offset))
			};
			let (u_axis, u_offset) = axis()?;
			let (v_axis, v_offset) = axis()?;
			TextureProjection::Valve {
				u_axis,
				u_offset,
				v_axis,
				v_offset,
				rotation: self.float()?,
				scale: vec2(self.float()?, self.float()?),
			}
		} else {
			TextureProjection::Standard {
				offset: vec2(self.float()?, self.float()?),
				rotation: self.float()?,
				scale: vec2(self.float()?, self.float()?),
			}
		};

		Ok(Face {
			points,
			material,
			projection,
			flags: self.flags()?,
		})
	}

	/// `( p0 ) ( p1 ) ( p2 ) ( ( a b c ) ( d e f ) ) material [flags]`
	fn parse_brush_primitive_face(&mut self) -> Result<Face, MapParseError> {
		let points = self.points()?;
		self.expect("(")?;
		let rows = [self.vec3()?, self.vec3()?];
		self.expect(")")?;

		Ok(Face {
			points,
			material: self.word("material")?,
			projection: TextureProjection::BrushPrimitive { rows },
			flags: self.flags()?,
		})
	}

	/// `{ material ( w h 0 0 0 ) ( ( ( x y z u v ) ... ) ... ) }`, after `patchDef2`.
	fn parse_patch(&mut self, line: usize) -> Result<Patch, MapParseError> {
		self.expect("{")?;
		let material = self.word("material")?;

		self.expect("(")?;
		let (width, height) = (self.int()?, self.int()?);
		let valid_dimension = |d: i64| d >= 3 && d % 2 == 1;
		if !valid_dimension(width)
			|| !valid_dimension(height)
			|| width.checked_mul(height).is_none_or(|count| count > MAX_PATCH_CONTROL_POINTS as i64)
		{
			return Err(MapParseError::InvalidPatchSize { line, width, height });
		}
		for _ in 0..3 {
			self.int()?;
		}
		self.expect(")")?;

		let (width, height) = (width as usize, height as usize);
		let mut control_points = Vec::with_capacity(width * height);
		self.expect("(")?;
		for _ in 0..width {
			self.expect("(")?;
			for _ in 0..height {
				self.expect("(")?;
				let position = vec3(self.float()?, self.float()?, self.float()?);
				let uv = vec2(self.float()?, self.float()?);
				self.expect(")")?;
				control_points.push(ControlPoint { position, uv });
			}
			self.expect(")")?;
		}
		self.expect(")")?;
		self.expect("}")?;

		Ok(Patch {
			material,
			width,
			height,
			control_points,
			line,
		})
	}
}

/// Parses `.map` source text into its entities. The first entity is the world.
pub fn parse_map(source: &str) -> Result<Vec<MapEntity>, MapParseError> {
	let source = blank_comments(source);
	let mut parser = MapParser {
		tokens: tokenize(&source)?,
		pos: 0,
	};
	parser.parse_entities()
}

/// Moves the brushes and patches of every `func_group` entity into the world entity, and removes the groups.
pub fn fold_func_groups(entities: &mut Vec<MapEntity>) {
	if entities.len() < 2 {
		return;
	}

	let rest = entities.split_off(1);
	for entity in rest {
		if entity.classname() == Some("func_group") {
			let world = &mut entities[0];
			world.brushes.extend(entity.brushes);
			world.patches.extend(entity.patches);
		} else {
			entities.push(entity);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	const CUBE_BRUSH: &str = "
{
( -1 -1 -1 ) ( -1 0 -1 ) ( -1 -1 0 ) rock 0 0 0 1 1
( -1 -1 -1 ) ( -1 -1 0 ) ( 0 -1 -1 ) rock 0 0 0 1 1
( -1 -1 -1 ) ( 0 -1 -1 ) ( -1 0 -1 ) rock 0 0 0 1 1
( 1 1 1 ) ( 1 1 2 ) ( 1 2 1 ) rock 0 0 0 1 1
( 1 1 1 ) ( 2 1 1 ) ( 1 1 2 ) rock 0 0 0 1 1
( 1 1 1 ) ( 1 2 1 ) ( 2 1 1 ) rock 0 0 0 1 1
}";

	#[test]
	fn quake1_brush() {
		let source = format!("{{\n\"classname\" \"worldspawn\"\n{CUBE_BRUSH}\n}}");
		let entities = parse_map(&source).unwrap();
		assert_eq!(entities.len(), 1);
		assert_eq!(entities[0].classname(), Some("worldspawn"));
		let brush = &entities[0].brushes[0];
		assert_eq!(brush.faces.len(), 6);
		assert_eq!(brush.line, 4);
		assert_eq!(brush.faces[3].points[0], Vec3::ONE);
		assert_eq!(brush.faces[0].material, "rock");
		assert_eq!(
			brush.faces[0].projection,
			TextureProjection::Standard {
				offset: Vec2::ZERO,
				rotation: 0.,
				scale: Vec2::ONE
			}
		);
	}

	#[test]
	fn quake3_brush_and_flags() {
		let face = "( 0 0 0 ) ( 0 1 0 ) ( 1 0 0 ) ( ( 0.0625 0 0 ) ( 0 0.0625 0 ) ) textures/base/floor 134217728 0 0";
		let source = format!("{{ \"classname\" \"worldspawn\" {{ brushDef {{ {face} {face} {face} {face} }} }} }}");
		let entities = parse_map(&source).unwrap();
		let face = &entities[0].brushes[0].faces[0];
		assert_eq!(face.material, "textures/base/floor");
		assert_eq!(face.flags, [134217728, 0, 0]);
		assert_eq!(
			face.projection,
			TextureProjection::BrushPrimitive {
				rows: [vec3(0.0625, 0., 0.), vec3(0., 0.0625, 0.)]
			}
		);
	}

	#[test]
	fn valve_220_face() {
		let face = "( 0 0 0 ) ( 0 1 0 ) ( 1 0 0 ) brick [ 1 0 0 8 ] [ 0 -1 0 4 ] 0 0.5 0.5";
		let source = format!("{{ {{ {face} {face} {face} {face} }} }}");
		let entities = parse_map(&source).unwrap();
		let TextureProjection::Valve { u_offset, v_axis, scale, .. } = entities[0].brushes[0].faces[0].projection else {
			panic!("expected a Valve 220 projection");
		};
		assert_eq!(u_offset, 8.);
		assert_eq!(v_axis, Vec3::NEG_Y);
		assert_eq!(scale, Vec2::splat(0.5));
	}

	#[test]
	fn patch() {
		let source = "{
\"classname\" \"worldspawn\"
{
patchDef2
{
textures/pipe
( 3 3 0 0 0 )
(
( ( 0 0 0 0 0 ) ( 0 1 0 0 0.5 ) ( 0 2 0 0 1 ) )
( ( 1 0 0 0.5 0 ) ( 1 1 4 0.5 0.5 ) ( 1 2 0 0.5 1 ) )
( ( 2 0 0 1 0 ) ( 2 1 0 1 0.5 ) ( 2 2 0 1 1 ) )
)
}
}
}";
		let entities = parse_map(source).unwrap();
		let patch = &entities[0].patches[0];
		assert_eq!((patch.width, patch.height), (3, 3));
		assert_eq!(patch.material, "textures/pipe");
		assert_eq!(patch.control_point(1, 1).position, vec3(1., 1., 4.));
		assert_eq!(patch.control_point(2, 0).uv, vec2(1., 0.));
	}

	#[test]
	fn invalid_patch_size() {
		let source = "{ { patchDef2 { mat ( 4 3 0 0 0 ) ( ) } } }";
		let err = parse_map(source).unwrap_err();
		assert!(matches!(err.root(), MapParseError::InvalidPatchSize { width: 4, height: 3, .. }));

		let source = "{ { patchDef2 { mat ( 35 31 0 0 0 ) ( ) } } }";
		let err = parse_map(source).unwrap_err();
		assert!(matches!(err.root(), MapParseError::InvalidPatchSize { width: 35, height: 31, .. }));

		// The product doesn't fit in an i64.
		let source = "{ { patchDef2 { mat ( 4611686018427387905 3 0 0 0 ) ( ) } } }";
		let err = parse_map(source).unwrap_err();
		assert!(matches!(err.root(), MapParseError::InvalidPatchSize { height: 3, .. }), "{err}");
	}

	#[test]
	fn three_face_brush_rejected() {
		let face = "( 0 0 0 ) ( 0 1 0 ) ( 1 0 0 ) rock 0 0 0 1 1";
		let source = format!("{{\n\"classname\" \"worldspawn\"\n{{\n{face}\n{face}\n{face}\n}}\n}}");
		let err = parse_map(&source).unwrap_err();
		assert!(matches!(err.root(), MapParseError::TooFewBrushFaces { line: 3, count: 3 }), "{err}");
		// The context chain names the entity and the brush.
		let message = err.to_string();
		assert!(message.contains("entity 0"), "{message}");
		assert!(message.contains("brush 0"), "{message}");
	}

	#[test]
	fn too_many_faces_rejected() {
		let face = "( 0 0 0 ) ( 0 1 0 ) ( 1 0 0 ) rock 0 0 0 1 1\n";
		let source = format!("{{ {{ {} }} }}", face.repeat(MAX_BRUSH_FACES + 1));
		assert!(matches!(parse_map(&source).unwrap_err().root(), MapParseError::TooManyBrushFaces { .. }));
	}

	#[test]
	fn comments_are_blanked() {
		let source = "// header\n{ // world\n\"message\" \"http://example.com\" // trailing\n}";
		let blanked = blank_comments(source);
		assert_eq!(blanked.len(), source.len());
		assert_eq!(blanked.lines().count(), source.lines().count());
		assert!(!blanked.contains("header"));
		assert!(blanked.contains("http://example.com"));

		let entities = parse_map(source).unwrap();
		assert_eq!(entities[0].get("message"), Some("http://example.com"));
	}

	#[test]
	fn errors_name_the_line() {
		let source = "{\n\"classname\" \"worldspawn\"\n{\n( 0 0 0 ) ( 0 1 zero ) ( 1 0 0 ) rock 0 0 0 1 1\n}\n}";
		let err = parse_map(source).unwrap_err();
		let MapParseError::InvalidNumber { line, token } = err.root() else {
			panic!("unexpected error: {err}");
		};
		assert_eq!((*line, token.as_str()), (4, "zero"));

		assert!(matches!(parse_map("").unwrap_err(), MapParseError::NoEntities));
		assert!(matches!(
			parse_map("{ \"a\" \"b").unwrap_err().root(),
			MapParseError::UnterminatedString { line: 1 }
		));
		assert!(matches!(parse_map("{ \"a\" \"b\"").unwrap_err().root(), MapParseError::UnexpectedEof { .. }));
	}

	#[test]
	fn key_value_limit() {
		let pairs: String = (0..=MAX_ENTITY_KEY_VALUES).map(|i| format!("\"k{i}\" \"v\"\n")).collect();
		let err = parse_map(&format!("{{\n{pairs}}}")).unwrap_err();
		assert!(matches!(err.root(), MapParseError::TooManyKeyValues { .. }));
	}

	#[test]
	fn key_values_round_trip() {
		let source = r#"{
"classname" "info_player_start"
"origin" "16 -32 24.5"
"message" "say \"hi\" C:\\maps\\"
"angle" "90"
}"#;
		let entity = &parse_map(source).unwrap()[0];
		assert_eq!(entity.get("message"), Some(r#"say "hi" C:\maps\"#));
		assert_eq!(entity.origin(), Some(vec3(16., -32., 24.5)));

		let reparsed = &parse_map(&format!("{{\n{}}}", entity.write_key_values())).unwrap()[0];
		let mut a = entity.properties.clone();
		let mut b = reparsed.properties.clone();
		a.sort();
		b.sort();
		assert_eq!(a, b);
	}

	#[test]
	fn func_groups_fold_into_world() {
		let source = format!(
			"{{ \"classname\" \"worldspawn\" }}
{{ \"classname\" \"func_group\" {CUBE_BRUSH} }}
{{ \"classname\" \"func_door\" {CUBE_BRUSH} }}
{{ \"classname\" \"func_group\" {CUBE_BRUSH} {CUBE_BRUSH} }}"
		);
		let mut entities = parse_map(&source).unwrap();
		fold_func_groups(&mut entities);
		assert_eq!(entities.len(), 2);
		assert_eq!(entities[0].brushes.len(), 3);
		assert_eq!(entities[1].classname(), Some("func_door"));
	}
}
