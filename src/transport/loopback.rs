//! In-memory transport used by the test suite.

use std::collections::VecDeque;
use std::thread;

use crate::error::TransportError;
use crate::transport::{LinkTransport, RecvOutcome, SleepBudget};

/// Scriptable link: frames queued with [`Loopback::inject`] come back out
/// of `recv`, everything the supervisor sends is captured for inspection.
#[derive(Default)]
pub struct Loopback {
	rx: VecDeque<Vec<u8>>,
	tx: Vec<Vec<u8>>,
}

impl Loopback {
	pub fn new() -> Self {
		Self::default()
	}

	/// Queue a frame for the next `recv`.
	pub fn inject(&mut self, frame: &[u8]) {
		self.rx.push_back(frame.to_vec());
	}

	/// Drain everything sent so far.
	pub fn take_sent(&mut self) -> Vec<Vec<u8>> {
		core::mem::take(&mut self.tx)
	}

	pub fn sent(&self) -> &[Vec<u8>] {
		&self.tx
	}
}

impl LinkTransport for Loopback {
	fn recv(
		&mut self,
		buf: &mut [u8],
		budget: &mut SleepBudget,
	) -> Result<RecvOutcome, TransportError> {
		if let Some(frame) = self.rx.pop_front() {
			let len = frame.len().min(buf.len());
			buf[..len].copy_from_slice(&frame[..len]);
			return Ok(RecvOutcome::Frame(len));
		}

		// Idle wire: burn the whole budget like a quiet interface would.
		let remaining = budget.remaining();
		thread::sleep(std::time::Duration::from_micros(remaining.total_micros()));
		budget.consume(std::time::Duration::from_micros(remaining.total_micros()));
		Ok(RecvOutcome::TimedOut)
	}

	fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
		self.tx.push(frame.to_vec());
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn frames_round_trip() {
		let mut link = Loopback::new();
		let mut budget = SleepBudget::default();
		let mut buf = [0u8; 64];

		link.inject(&[1, 2, 3]);
		assert!(matches!(
			link.recv(&mut buf, &mut budget),
			Ok(RecvOutcome::Frame(3))
		));
		assert_eq!(&buf[..3], &[1, 2, 3]);

		link.send(&[4, 5]).unwrap();
		assert_eq!(link.take_sent(), vec![vec![4, 5]]);
		assert!(link.sent().is_empty());
	}
}
