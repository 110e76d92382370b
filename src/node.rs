//! Per-device bookkeeping: node state, the registry and the local MAC
//! pool.

use smoltcp::time::Instant;
use smoltcp::wire::{EthernetAddress, Ipv4Address};

use crate::config::LOCAL_MAC_BASE;
use crate::router::RouterClass;

/// Lifecycle position of a discovered device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
	Unknown,
	ResetSent,
	Detecting,
	Detected,
	Flashing,
	Finished,
	Rebooted,
	NoFlash,
}

/// Delivery channel negotiated for a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashMode {
	Unknown,
	TftpClient,
	TftpServer,
	Redboot,
}

/// MR500 scratch state.
#[derive(Debug, Clone, Copy, Default)]
pub struct Mr500State {
	pub start_flash: Option<Instant>,
}

/// Scratch state shared by the OM2P-style TFTP-client classes.
#[derive(Debug, Clone, Copy, Default)]
pub struct Om2pFamilyState {
	pub start_flash: Option<Instant>,
}

/// Profile-private node data, allocated when a profile matches.
#[derive(Debug, Clone, Copy, Default)]
pub enum NodePriv {
	#[default]
	None,
	Mr500(Mr500State),
	Om2pFamily(Om2pFamilyState),
}

impl NodePriv {
	pub fn start_flash(&self) -> Option<Instant> {
		match *self {
			NodePriv::None => None,
			NodePriv::Mr500(state) => state.start_flash,
			NodePriv::Om2pFamily(state) => state.start_flash,
		}
	}

	pub fn set_start_flash(&mut self, now: Instant) {
		match self {
			NodePriv::None => {}
			NodePriv::Mr500(state) => state.start_flash = Some(now),
			NodePriv::Om2pFamily(state) => state.start_flash = Some(now),
		}
	}
}

/// Progress of the image transfer towards one node.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageState {
	/// Block number of the DATA packet in flight (1-based, wraps).
	pub block: u16,
	/// Payload offset of that block.
	pub block_start: usize,
	/// Payload length of that block.
	pub block_len: usize,
	/// Running count of payload bytes handed to the wire, retransmits
	/// excluded.
	pub total_bytes_sent: u64,
	/// Transmit timestamp of the block in flight.
	pub last_sent: Option<Instant>,
	/// Peer transfer identifier, taken from the read request.
	pub peer_port: u16,
	pub started: bool,
}

impl ImageState {
	/// Rewind the block bookkeeping for a fresh read request without
	/// touching the monotonic byte counter.
	pub fn restart(&mut self) {
		self.block = 0;
		self.block_start = 0;
		self.block_len = 0;
		self.last_sent = None;
		self.started = false;
	}
}

/// One device on the segment.
#[derive(Debug, Clone)]
pub struct Node {
	/// Peer hardware address as first observed.
	pub his_mac_addr: EthernetAddress,
	/// Synthesised local MAC for the session.
	pub our_mac_addr: EthernetAddress,
	pub router_type: Option<RouterClass>,
	pub router_priv: NodePriv,
	pub his_ip_addr: Ipv4Address,
	pub our_ip_addr: Ipv4Address,
	pub status: NodeStatus,
	pub flash_mode: FlashMode,
	pub image_state: ImageState,
	/// Set when the node reaches a terminal state; drives reaping.
	pub completed_at: Option<Instant>,
}

impl Node {
	fn new(his_mac_addr: EthernetAddress) -> Self {
		Self {
			his_mac_addr,
			our_mac_addr: EthernetAddress([0; 6]),
			router_type: None,
			router_priv: NodePriv::None,
			his_ip_addr: Ipv4Address::UNSPECIFIED,
			our_ip_addr: Ipv4Address::UNSPECIFIED,
			status: NodeStatus::Unknown,
			flash_mode: FlashMode::Unknown,
			image_state: ImageState::default(),
			completed_at: None,
		}
	}

	/// Rewind to a never-seen state. MR500 devices keep one MAC across
	/// flash sessions, so a replugged unit has to pass detection again.
	pub fn rewind_for_reflash(&mut self) {
		let mac = self.his_mac_addr;
		*self = Self::new(mac);
	}
}

fn masked_eq(a: EthernetAddress, b: EthernetAddress, mask: EthernetAddress) -> bool {
	a.0.iter()
		.zip(b.0)
		.zip(mask.0)
		.all(|((&a, b), m)| a & m == b & m)
}

/// All devices seen this run, in arrival order.
///
/// Linear scan on purpose: equality is masked per node with the mask of
/// whatever profile the node already carries, which no hash key can
/// express, and the registry holds tens of entries. Arrival order also
/// keeps maintenance deterministic.
#[derive(Default)]
pub struct NodeRegistry {
	nodes: Vec<Node>,
}

impl NodeRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn len(&self) -> usize {
		self.nodes.len()
	}

	pub fn is_empty(&self) -> bool {
		self.nodes.is_empty()
	}

	pub fn iter(&self) -> impl Iterator<Item = &Node> {
		self.nodes.iter()
	}

	pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Node> {
		self.nodes.iter_mut()
	}

	fn position(&self, mac_addr: EthernetAddress) -> Option<usize> {
		self.nodes.iter().position(|node| {
			let mask = node
				.router_type
				.map_or(EthernetAddress::BROADCAST, |class| class.mac_mask());
			masked_eq(node.his_mac_addr, mac_addr, mask)
		})
	}

	pub fn find_mut(&mut self, mac_addr: EthernetAddress) -> Option<&mut Node> {
		self.position(mac_addr).map(|at| &mut self.nodes[at])
	}

	/// Look up the node owning `mac_addr`, creating it on first sight.
	pub fn get_or_insert(&mut self, mac_addr: EthernetAddress) -> &mut Node {
		let at = match self.position(mac_addr) {
			Some(at) => at,
			None => {
				self.nodes.push(Node::new(mac_addr));
				self.nodes.len() - 1
			}
		};
		&mut self.nodes[at]
	}

	/// Drop terminal nodes whose grace period has passed.
	pub fn reap(&mut self, now: Instant) {
		self.nodes.retain(|node| {
			let expired = matches!(node.status, NodeStatus::Rebooted | NodeStatus::NoFlash)
				&& node
					.completed_at
					.is_some_and(|at| now >= at + crate::config::NODE_REAP_GRACE);
			if expired {
				debug!("[{}]: dropping finished node", node.his_mac_addr);
			}
			!expired
		});
	}
}

/// Session MAC allocator, seeded at `00:ba:be:ca:ff:00`.
///
/// The trailing 16 bits are bumped per assignment; once they lap the
/// seed the pool refuses further nodes instead of handing out
/// duplicates.
pub struct LocalMacPool {
	next: [u8; 6],
	assigned: u32,
}

impl LocalMacPool {
	pub fn new() -> Self {
		Self {
			next: LOCAL_MAC_BASE,
			assigned: 0,
		}
	}

	/// The address the next node will get; also what pre-detect probes
	/// advertise as the process's own MAC.
	pub fn current(&self) -> EthernetAddress {
		EthernetAddress(self.next)
	}

	pub fn allocate(&mut self) -> Option<EthernetAddress> {
		if self.assigned == 0x1_0000 {
			return None;
		}
		self.assigned += 1;

		let mac = self.next;
		let bumped = u16::from_be_bytes([mac[4], mac[5]]).wrapping_add(1);
		[self.next[4], self.next[5]] = bumped.to_be_bytes();
		Some(EthernetAddress(mac))
	}
}

impl Default for LocalMacPool {
	fn default() -> Self {
		Self::new()
	}
}
