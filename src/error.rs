//! Error taxonomy of the crate.
//!
//! Only configuration problems abort a run. Everything that happens on the
//! wire after initialization is either logged and dropped (per-frame) or
//! classifies a single node (per-node) without ever unwinding the loop.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Raw-link failures.
#[derive(Debug, Error)]
pub enum TransportError {
	#[error("cannot open raw socket on '{iface}': {source}")]
	Open {
		iface: String,
		#[source]
		source: io::Error,
	},
	#[error("link read failed: {0}")]
	Read(#[source] io::Error),
	#[error("link write failed: {0}")]
	Write(#[source] io::Error),
}

/// Firmware container failures, all raised at load time.
#[derive(Debug, Error)]
pub enum ImageError {
	#[error("cannot read image '{}': {source}", path.display())]
	Io {
		path: PathBuf,
		#[source]
		source: io::Error,
	},
	#[error("malformed CE container: {0}")]
	Malformed(&'static str),
}

/// Fatal, pre-loop errors surfaced to the caller of [`crate::flash_start`].
#[derive(Debug, Error)]
pub enum FlashError {
	#[error("router profile '{0}' has an all-zero MAC mask")]
	ProfileMask(&'static str),
	#[error(transparent)]
	Transport(#[from] TransportError),
	#[error(transparent)]
	Image(#[from] ImageError),
	#[error("cannot install signal handlers: {0}")]
	Signal(#[source] io::Error),
}
