//! Cooperative shutdown.
//!
//! The supervisor loop polls a [`ShutdownToken`] between reads; INT and
//! TERM trip the token from a signal handler, so shutdown latency is
//! bounded by the read timeout.

use std::io;
use std::mem;
use std::ptr;
use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};

/// Cloneable cancellation token threaded into [`crate::flash::Flasher::run`].
#[derive(Clone, Default)]
pub struct ShutdownToken {
	stop: Arc<AtomicBool>,
}

impl ShutdownToken {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn stop(&self) {
		self.stop.store(true, Ordering::Relaxed);
	}

	pub fn is_stopping(&self) -> bool {
		self.stop.load(Ordering::Relaxed)
	}
}

static SIGNAL_TOKEN: OnceLock<ShutdownToken> = OnceLock::new();

extern "C" fn handle_signal(_signum: libc::c_int) {
	// Only lock-free atomics in here.
	if let Some(token) = SIGNAL_TOKEN.get() {
		token.stop.store(true, Ordering::Relaxed);
	}
}

/// Route SIGINT and SIGTERM to `token`. Only the token of the first call
/// is wired up; later calls keep the handlers but are otherwise ignored.
pub fn install(token: &ShutdownToken) -> io::Result<()> {
	if SIGNAL_TOKEN.set(token.clone()).is_err() {
		debug!("signal handlers already installed, keeping the first token");
	}

	unsafe {
		let mut action: libc::sigaction = mem::zeroed();
		action.sa_sigaction = handle_signal as usize;
		libc::sigemptyset(&mut action.sa_mask);

		for signum in [libc::SIGINT, libc::SIGTERM] {
			if libc::sigaction(signum, &action, ptr::null_mut()) != 0 {
				return Err(io::Error::last_os_error());
			}
		}
	}

	Ok(())
}
