//! Firmware image registry.
//!
//! Images are read-only inputs loaded once at startup. A CE container
//! bundles sub-images for several device classes behind 32-byte
//! description keys; U-Boot and Zyxel files are opaque blobs served
//! whole. The registry keeps one slot per container type; an unloaded
//! slot behaves like an empty image, which detection turns into a
//! no-flash classification.

use std::fs;
use std::path::Path;

use crate::error::ImageError;

/// Magic bytes opening a CE container.
pub const CE_MAGIC: [u8; 4] = *b"CE01";

const CE_DESC_LEN: usize = 32;
const CE_ENTRY_LEN: usize = CE_DESC_LEN + 8;
const CE_MAX_ENTRIES: usize = 4096;

/// Container type of a firmware file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
	/// Multi-device container with per-class sub-images.
	Ce,
	/// U-Boot image, served whole.
	Uboot,
	/// Zyxel ras image, served whole.
	Zyxel,
}

#[derive(Debug, Clone)]
struct CeEntry {
	desc: String,
	offset: usize,
	size: usize,
}

/// One loaded firmware file.
#[derive(Debug, Clone)]
pub struct RouterImage {
	kind: ImageKind,
	data: Vec<u8>,
	directory: Vec<CeEntry>,
}

impl RouterImage {
	/// Placeholder for a container that was not given on the command line.
	pub fn unloaded(kind: ImageKind) -> Self {
		Self {
			kind,
			data: Vec::new(),
			directory: Vec::new(),
		}
	}

	pub fn from_file(kind: ImageKind, path: &Path) -> Result<Self, ImageError> {
		let data = fs::read(path).map_err(|source| ImageError::Io {
			path: path.to_owned(),
			source,
		})?;
		Self::from_bytes(kind, data)
	}

	pub fn from_bytes(kind: ImageKind, data: Vec<u8>) -> Result<Self, ImageError> {
		let directory = match kind {
			ImageKind::Ce => parse_ce_directory(&data)?,
			ImageKind::Uboot | ImageKind::Zyxel => Vec::new(),
		};
		Ok(Self {
			kind,
			data,
			directory,
		})
	}

	pub fn kind(&self) -> ImageKind {
		self.kind
	}

	/// Container size in bytes; zero for unloaded slots.
	pub fn len(&self) -> usize {
		self.data.len()
	}

	pub fn is_empty(&self) -> bool {
		self.data.is_empty()
	}

	/// Payload to stream for a device class. For CE containers `key` is
	/// matched against the directory; other kinds serve the whole file.
	pub fn payload(&self, key: &str) -> Option<&[u8]> {
		if self.is_empty() {
			return None;
		}

		match self.kind {
			ImageKind::Ce => {
				let entry = self.directory.iter().find(|entry| entry.desc == key)?;
				Some(&self.data[entry.offset..entry.offset + entry.size])
			}
			ImageKind::Uboot | ImageKind::Zyxel => Some(&self.data),
		}
	}
}

fn parse_ce_directory(data: &[u8]) -> Result<Vec<CeEntry>, ImageError> {
	if data.is_empty() {
		// An absent container is legal; it just never matches anything.
		return Ok(Vec::new());
	}
	if data.len() < CE_MAGIC.len() + 4 || data[..CE_MAGIC.len()] != CE_MAGIC {
		return Err(ImageError::Malformed("missing CE01 magic"));
	}

	let count = u32::from_be_bytes(data[4..8].try_into().unwrap()) as usize;
	if count > CE_MAX_ENTRIES {
		return Err(ImageError::Malformed("implausible directory size"));
	}

	let payload_base = 8 + count * CE_ENTRY_LEN;
	if data.len() < payload_base {
		return Err(ImageError::Malformed("truncated directory"));
	}
	let payload_len = data.len() - payload_base;

	let mut directory = Vec::with_capacity(count);
	for raw in data[8..payload_base].chunks_exact(CE_ENTRY_LEN) {
		let desc_end = raw[..CE_DESC_LEN]
			.iter()
			.position(|&b| b == 0)
			.unwrap_or(CE_DESC_LEN);
		let desc = core::str::from_utf8(&raw[..desc_end])
			.map_err(|_| ImageError::Malformed("non-utf8 description"))?;

		let offset = u32::from_be_bytes(raw[CE_DESC_LEN..CE_DESC_LEN + 4].try_into().unwrap());
		let size = u32::from_be_bytes(raw[CE_DESC_LEN + 4..CE_ENTRY_LEN].try_into().unwrap());
		let (offset, size) = (offset as usize, size as usize);

		if offset.checked_add(size).is_none_or(|end| end > payload_len) {
			return Err(ImageError::Malformed("sub-image outside container"));
		}

		directory.push(CeEntry {
			desc: desc.to_owned(),
			offset: payload_base + offset,
			size,
		});
	}

	Ok(directory)
}

/// All containers known to one run, indexed by [`ImageKind`].
#[derive(Debug, Clone)]
pub struct ImageRegistry {
	ce: RouterImage,
	uboot: RouterImage,
	zyxel: RouterImage,
}

impl ImageRegistry {
	pub fn new() -> Self {
		Self {
			ce: RouterImage::unloaded(ImageKind::Ce),
			uboot: RouterImage::unloaded(ImageKind::Uboot),
			zyxel: RouterImage::unloaded(ImageKind::Zyxel),
		}
	}

	pub fn set(&mut self, image: RouterImage) {
		match image.kind() {
			ImageKind::Ce => self.ce = image,
			ImageKind::Uboot => self.uboot = image,
			ImageKind::Zyxel => self.zyxel = image,
		}
	}

	pub fn get(&self, kind: ImageKind) -> &RouterImage {
		match kind {
			ImageKind::Ce => &self.ce,
			ImageKind::Uboot => &self.uboot,
			ImageKind::Zyxel => &self.zyxel,
		}
	}
}

impl Default for ImageRegistry {
	fn default() -> Self {
		Self::new()
	}
}
