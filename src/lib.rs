// Lets `cdmap_macros` refer to `::cdmap` from inside this crate.
extern crate self as cdmap;

/// Implements [`DoingJob`] and a `root()` accessor for an error enum with a `DoingJob(String, Box<Self>)` variant.
macro_rules! impl_doing_job {
	($ty:ty) => {
		impl $crate::DoingJob for $ty {
			fn doing_job(job: String, err: Self) -> Self {
				Self::DoingJob(job, Box::new(err))
			}
		}
		impl $ty {
			/// The error behind any `DoingJob` context.
			pub fn root(&self) -> &Self {
				let mut err = self;
				loop {
					match err {
						Self::DoingJob(_, child) => err = child,
						_ => return err,
					}
				}
			}
		}
	};
}
pub(crate) use impl_doing_job;

pub mod prelude;
pub(crate) use prelude::*;

pub mod collision;
pub mod compile;
pub mod data;
pub mod geom;
pub mod map;
pub mod material;
pub mod reader;
pub mod util;
pub mod writer;


// Re-exports
pub use glam;
pub use smallvec;

/// Errors produced while reading a compiled cdmap blob.
#[derive(Debug, Clone, Error)]
pub enum CdmapError {
	#[error("Tried to read bytes from {from} to {to} from buffer of size {size}")]
	BufferOutOfBounds { from: usize, to: usize, size: usize },
	#[error("Section {section} ({entry:?}) out of bounds of data! Malformed/corrupted cdmap?")]
	SectionOutOfBounds { section: Section, entry: SectionEntry },
	#[error("Section {section} is {size} bytes, which is not a multiple of its element size {element_size}")]
	SectionSizeMismatch { section: Section, size: u32, element_size: usize },
	#[error("Wrong magic number! Expected {expected}, found \"{}\"", display_magic_number(found))]
	WrongMagicNumber { found: [u8; 8], expected: &'static str },
	#[error("Unsupported format version {found}, this build reads version {expected}. Recompile the map.")]
	UnsupportedVersion { found: u32, expected: u32 },
	#[error("Failed to parse string at index {index}, invalid utf-8 sequence: {sequence:?}")]
	InvalidString { index: usize, sequence: Vec<u8> },
	#[error("Invalid value: {value}, acceptable:\n{acceptable}")]
	InvalidVariant { value: u32, acceptable: &'static str },
	#[error("{what} index {index} out of range (length {len})")]
	IndexOutOfRange { what: &'static str, index: usize, len: usize },
	#[error("Failed to decompress: {0}")]
	Decompress(String),

	/// For telling the user exactly where the error occurred in the process.
	#[error("{0} - {1}")]
	DoingJob(String, Box<CdmapError>),
}
impl_doing_job!(CdmapError);

impl CdmapError {
	#[inline]
	pub fn map_utf8_error(data: &[u8]) -> impl FnOnce(std::str::Utf8Error) -> Self + '_ {
		|err| CdmapError::InvalidString {
			index: err.valid_up_to(),
			sequence: data[err.valid_up_to()..err.valid_up_to() + err.error_len().unwrap_or(1)].to_vec(),
		}
	}
}

pub type CdmapResult<T> = Result<T, CdmapError>;

/// Error types that can wrap themselves in a message describing what was being done when they occurred.
pub trait DoingJob: Sized {
	fn doing_job(job: String, err: Self) -> Self;
}

pub trait ResultDoingJobExt {
	/// Like `map_err`, but specifically for adding messages to errors to tell the user exactly what was going on when the error occurred.
	fn job(self, job: impl ToString) -> Self;
}
impl<T, E: DoingJob> ResultDoingJobExt for Result<T, E> {
	fn job(self, job: impl ToString) -> Self {
		match self {
			Ok(v) => Ok(v),
			Err(err) => Err(E::doing_job(job.to_string(), err)),
		}
	}
}
