//! AF_PACKET transport.
//!
//! Opens the interface in promiscuous mode and reads whole Ethernet
//! frames. Frames we emitted ourselves show up on packet sockets as
//! `PACKET_OUTGOING` and are skipped so the detector never chases its own
//! ARP replies.

use std::ffi::CString;
use std::io;
use std::mem;
use std::os::fd::RawFd;
use std::time::Instant;

use crate::error::TransportError;
use crate::transport::{LinkTransport, RecvOutcome, SleepBudget};

/// Raw packet socket bound to one interface.
pub struct RawLink {
	fd: RawFd,
}

impl RawLink {
	/// Open `iface` for promiscuous L2 traffic. Needs CAP_NET_RAW.
	pub fn open(iface: &str) -> Result<Self, TransportError> {
		Self::open_inner(iface).map_err(|source| TransportError::Open {
			iface: iface.to_owned(),
			source,
		})
	}

	fn open_inner(iface: &str) -> io::Result<Self> {
		let name = CString::new(iface).map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?;
		let protocol = (libc::ETH_P_ALL as u16).to_be();

		let fd = unsafe {
			libc::socket(
				libc::AF_PACKET,
				libc::SOCK_RAW | libc::SOCK_CLOEXEC,
				i32::from(protocol),
			)
		};
		if fd < 0 {
			return Err(io::Error::last_os_error());
		}
		let link = Self { fd };

		let ifindex = unsafe { libc::if_nametoindex(name.as_ptr()) };
		if ifindex == 0 {
			return Err(io::Error::last_os_error());
		}

		let mut addr: libc::sockaddr_ll = unsafe { mem::zeroed() };
		addr.sll_family = libc::AF_PACKET as u16;
		addr.sll_protocol = protocol;
		addr.sll_ifindex = ifindex as i32;

		let ret = unsafe {
			libc::bind(
				link.fd,
				(&raw const addr).cast(),
				mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
			)
		};
		if ret != 0 {
			return Err(io::Error::last_os_error());
		}

		let mut mreq: libc::packet_mreq = unsafe { mem::zeroed() };
		mreq.mr_ifindex = ifindex as i32;
		mreq.mr_type = libc::PACKET_MR_PROMISC as u16;

		let ret = unsafe {
			libc::setsockopt(
				link.fd,
				libc::SOL_PACKET,
				libc::PACKET_ADD_MEMBERSHIP,
				(&raw const mreq).cast(),
				mem::size_of::<libc::packet_mreq>() as libc::socklen_t,
			)
		};
		if ret != 0 {
			return Err(io::Error::last_os_error());
		}

		Ok(link)
	}
}

impl LinkTransport for RawLink {
	fn recv(
		&mut self,
		buf: &mut [u8],
		budget: &mut SleepBudget,
	) -> Result<RecvOutcome, TransportError> {
		loop {
			if budget.is_exhausted() {
				return Ok(RecvOutcome::TimedOut);
			}

			let mut pollfd = libc::pollfd {
				fd: self.fd,
				events: libc::POLLIN,
				revents: 0,
			};
			let timeout = budget.remaining().total_millis().min(i32::MAX as u64) as i32;

			let started = Instant::now();
			let ready = unsafe { libc::poll(&mut pollfd, 1, timeout) };
			budget.consume(started.elapsed());

			match ready {
				// A signal is allowed to cut the wait short; the
				// supervisor re-checks its token on the error path.
				-1 => return Err(TransportError::Read(io::Error::last_os_error())),
				0 => continue,
				_ => {}
			}

			let mut addr: libc::sockaddr_ll = unsafe { mem::zeroed() };
			let mut addrlen = mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t;
			let len = unsafe {
				libc::recvfrom(
					self.fd,
					buf.as_mut_ptr().cast(),
					buf.len(),
					0,
					(&raw mut addr).cast(),
					&mut addrlen,
				)
			};
			if len < 0 {
				return Err(TransportError::Read(io::Error::last_os_error()));
			}

			if u32::from(addr.sll_pkttype) == libc::PACKET_OUTGOING as u32 {
				continue;
			}

			return Ok(RecvOutcome::Frame(len as usize));
		}
	}

	fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
		let ret = unsafe { libc::send(self.fd, frame.as_ptr().cast(), frame.len(), 0) };
		if ret < 0 {
			return Err(TransportError::Write(io::Error::last_os_error()));
		}
		Ok(())
	}
}

impl Drop for RawLink {
	fn drop(&mut self) {
		unsafe {
			libc::close(self.fd);
		}
	}
}
