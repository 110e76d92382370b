//! Supervisor loop and per-node state machine.
//!
//! Single-threaded and cooperative: the only suspension point is the
//! bounded transport read, so node state needs no locking and every
//! invariant holds at tick boundaries. A read timeout drives the slow
//! tick (pre-detect probes, maintenance); a frame drives detection or
//! whatever delivery driver the node is bound to.

use smoltcp::time::Instant;
use smoltcp::wire::{
	ArpHardware, ArpOperation, ArpPacket, EthernetFrame, EthernetProtocol, IpProtocol, Ipv4Packet,
	UdpPacket,
};

use crate::config::{PACKET_BUFF_LEN, TFTP_PORT};
use crate::error::FlashError;
use crate::image::ImageRegistry;
use crate::node::{FlashMode, LocalMacPool, NodeRegistry, NodeStatus};
use crate::router;
use crate::router::RouterClass;
use crate::router::tftp_client;
use crate::signal::{self, ShutdownToken};
use crate::transport::raw::RawLink;
use crate::transport::{LinkTransport, RecvOutcome, SleepBudget};

/// Orchestrates every device on one interface.
pub struct Flasher<T: LinkTransport> {
	link: T,
	nodes: NodeRegistry,
	images: ImageRegistry,
	macs: LocalMacPool,
	flashed: u32,
}

impl<T: LinkTransport> Flasher<T> {
	pub fn new(link: T, images: ImageRegistry) -> Result<Self, FlashError> {
		router::validate()?;
		Ok(Self {
			link,
			nodes: NodeRegistry::new(),
			images,
			macs: LocalMacPool::new(),
			flashed: 0,
		})
	}

	/// Devices successfully flashed so far.
	pub fn flashed(&self) -> u32 {
		self.flashed
	}

	pub fn nodes(&self) -> &NodeRegistry {
		&self.nodes
	}

	pub fn link(&self) -> &T {
		&self.link
	}

	pub fn link_mut(&mut self) -> &mut T {
		&mut self.link
	}

	/// Run until the token trips. Per-frame and per-node problems never
	/// abort the loop.
	pub fn run(&mut self, token: &ShutdownToken) -> Result<(), FlashError> {
		let mut buf = [0u8; PACKET_BUFF_LEN];
		let mut budget = SleepBudget::default();

		while !token.is_stopping() {
			match self.link.recv(&mut buf, &mut budget) {
				Ok(RecvOutcome::TimedOut) => {
					self.tick(Instant::now());
					budget.reset();
				}
				Ok(RecvOutcome::Frame(len)) => {
					self.handle_frame(&buf[..len], Instant::now());
				}
				Err(err) => {
					debug!("transport read error: {err}");
					budget.reset();
				}
			}
		}

		Ok(())
	}

	/// Slow tick: pre-detect probes, then node maintenance.
	pub fn tick(&mut self, now: Instant) {
		router::detect_pre_all(self.macs.current());
		self.maintain(now);
	}

	/// One pass of the per-node state machine over the registry.
	fn maintain(&mut self, now: Instant) {
		let Self {
			link,
			nodes,
			images,
			flashed,
			..
		} = self;

		for node in nodes.iter_mut() {
			match node.status {
				NodeStatus::Unknown | NodeStatus::ResetSent | NodeStatus::Detecting => {}
				NodeStatus::Detected => match node.flash_mode {
					// TFTP-client nodes engage straight from detection;
					// the server-side modes are driven by their own
					// inbound traffic.
					FlashMode::TftpClient | FlashMode::TftpServer | FlashMode::Redboot => {}
					FlashMode::Unknown => {
						error!("[{}]: Error, flash mode unknown.", node.his_mac_addr);
					}
				},
				NodeStatus::Flashing => {
					if node.flash_mode == FlashMode::TftpClient {
						tftp_client::maintain(node, images, link, now);
					}
				}
				NodeStatus::Finished => {
					if node.flash_mode != FlashMode::TftpClient {
						continue;
					}
					if !tftp_client::flash_completed(node, now) {
						continue;
					}

					let desc = node.router_type.map_or("?", RouterClass::desc);
					info!(
						"[{}]: {desc} router: flash complete. Device ready to unplug.",
						node.his_mac_addr
					);
					node.status = NodeStatus::Rebooted;
					node.completed_at = Some(now);
					*flashed += 1;

					// MR500 devices reuse one MAC across sessions; treat
					// a replugged unit as brand new.
					if node.router_type == Some(RouterClass::Mr500) {
						node.rewind_for_reflash();
					}
				}
				NodeStatus::Rebooted | NodeStatus::NoFlash => {}
			}
		}

		nodes.reap(now);
	}

	/// Dispatch one inbound frame.
	pub fn handle_frame(&mut self, frame: &[u8], now: Instant) {
		let Ok(eth) = EthernetFrame::new_checked(frame) else {
			debug!("dropping runt frame ({} bytes)", frame.len());
			return;
		};

		match eth.ethertype() {
			EthernetProtocol::Arp => self.handle_arp(&eth, now),
			EthernetProtocol::Ipv4 => self.handle_ipv4(&eth, now),
			_ => {}
		}
	}

	fn handle_arp(&mut self, eth: &EthernetFrame<&[u8]>, now: Instant) {
		let Ok(arp) = ArpPacket::new_checked(eth.payload()) else {
			debug!("dropping short ARP from {}", eth.src_addr());
			return;
		};
		if arp.hardware_type() != ArpHardware::Ethernet
			|| arp.protocol_type() != EthernetProtocol::Ipv4
			|| usize::from(arp.hardware_len()) != 6
			|| usize::from(arp.protocol_len()) != 4
		{
			return;
		}

		let Self {
			link,
			nodes,
			images,
			macs,
			..
		} = self;

		let node = nodes.get_or_insert(eth.src_addr());
		if node.router_type.is_none() {
			if router::detect(node, &arp, images, macs, now)
				&& node.status == NodeStatus::Detected
				&& node.flash_mode == FlashMode::TftpClient
			{
				tftp_client::engage(node, link, now);
			}
			return;
		}

		// A bound node keeps asking for its gateway while it boots and
		// transfers; keep claiming the address.
		let ours = crate::proto::ipv4_addr(arp.target_protocol_addr()) == Some(node.our_ip_addr);
		if node.flash_mode == FlashMode::TftpClient
			&& matches!(node.status, NodeStatus::Flashing | NodeStatus::Finished)
			&& arp.operation() == ArpOperation::Request
			&& ours
		{
			tftp_client::answer_arp(node, link);
		}
	}

	fn handle_ipv4(&mut self, eth: &EthernetFrame<&[u8]>, now: Instant) {
		let Ok(ip) = Ipv4Packet::new_checked(eth.payload()) else {
			return;
		};
		if !ip.verify_checksum() {
			debug!("dropping IPv4 frame with bad checksum from {}", eth.src_addr());
			return;
		}
		if ip.next_header() != IpProtocol::Udp {
			return;
		}
		let Ok(udp) = UdpPacket::new_checked(ip.payload()) else {
			debug!("dropping short UDP from {}", eth.src_addr());
			return;
		};

		let Self {
			link,
			nodes,
			images,
			..
		} = self;

		// TFTP only ever flows towards a node we already bound.
		let Some(node) = nodes.find_mut(eth.src_addr()) else {
			return;
		};
		if node.flash_mode != FlashMode::TftpClient
			|| udp.dst_port() != TFTP_PORT
			|| ip.dst_addr() != node.our_ip_addr
		{
			return;
		}

		tftp_client::handle_tftp(node, images, link, udp.src_port(), udp.payload(), now);
	}
}

/// Entry point of the binary: flash everything that shows up on `iface`
/// until interrupted. Returns the number of devices flashed.
pub fn flash_start(iface: &str, images: ImageRegistry) -> Result<u32, FlashError> {
	let link = RawLink::open(iface)?;
	let token = ShutdownToken::new();
	signal::install(&token).map_err(FlashError::Signal)?;

	let mut flasher = Flasher::new(link, images)?;
	info!("listening on {iface}");
	flasher.run(&token)?;

	info!("{} device(s) flashed", flasher.flashed());
	Ok(flasher.flashed())
}

#[cfg(test)]
mod tests {
	use smoltcp::time::Duration;
	use smoltcp::wire::{ArpOperation, EthernetAddress, Ipv4Address};

	use super::*;
	use crate::test_utils::{
		ack_frame, arp_request, data_payload, parse_arp_reply, registry_with_ce, rrq_frame,
	};
	use crate::transport::loopback::Loopback;

	const PEER: EthernetAddress = EthernetAddress([0x04, 0xf0, 0x21, 0x00, 0x00, 0x01]);
	const OM2P_IP: Ipv4Address = Ipv4Address::new(192, 168, 100, 8);
	const PEER_IP: Ipv4Address = Ipv4Address::new(192, 168, 100, 81);

	fn flasher_with_om2p_image(image: &[u8]) -> Flasher<Loopback> {
		let images = registry_with_ce(&[("OM2P", image)]);
		Flasher::new(Loopback::new(), images).unwrap()
	}

	#[test]
	fn om2p_happy_path() {
		let image: Vec<u8> = (0..700u32).map(|b| b as u8).collect();
		let mut flasher = flasher_with_om2p_image(&image);
		let t0 = Instant::from_secs(0);

		// The booting device probes for its gateway.
		flasher.handle_frame(&arp_request(PEER, OM2P_IP, b"OM2PV4"), t0);

		assert_eq!(flasher.nodes().len(), 1);
		let node = flasher.nodes().iter().next().unwrap();
		assert_eq!(node.router_type, Some(RouterClass::Om2p));
		assert_eq!(node.status, NodeStatus::Flashing);

		let sent = flasher.link_mut().take_sent();
		assert_eq!(sent.len(), 1);
		let (sender_mac, sender_ip) = parse_arp_reply(&sent[0]);
		assert_eq!(sender_mac, EthernetAddress(crate::config::LOCAL_MAC_BASE));
		assert_eq!(sender_ip, OM2P_IP);

		// The device opens its read request; block 1 comes back.
		flasher.handle_frame(
			&rrq_frame(PEER, PEER_IP, sender_mac, OM2P_IP, "firmware.bin"),
			t0,
		);
		let sent = flasher.link_mut().take_sent();
		assert_eq!(sent.len(), 1);
		assert_eq!(data_payload(&sent[0]), (1, image[..512].to_vec()));
	}

	#[test]
	fn full_transfer_reaches_rebooted() {
		let image = vec![0x42u8; 700];
		let mut flasher = flasher_with_om2p_image(&image);
		let t0 = Instant::from_secs(0);

		flasher.handle_frame(&arp_request(PEER, OM2P_IP, b"OM2PV4"), t0);
		let our_mac = EthernetAddress(crate::config::LOCAL_MAC_BASE);
		flasher.link_mut().take_sent();

		flasher.handle_frame(&rrq_frame(PEER, PEER_IP, our_mac, OM2P_IP, "fw"), t0);
		flasher.handle_frame(&ack_frame(PEER, PEER_IP, our_mac, OM2P_IP, 1), t0);
		flasher.handle_frame(&ack_frame(PEER, PEER_IP, our_mac, OM2P_IP, 2), t0);

		let node = flasher.nodes().iter().next().unwrap();
		assert_eq!(node.status, NodeStatus::Finished);
		assert_eq!(node.image_state.total_bytes_sent, 700);

		// 700 bytes round down to no extra wait: 10 s flat.
		flasher.tick(t0 + Duration::from_secs(9));
		assert_eq!(
			flasher.nodes().iter().next().unwrap().status,
			NodeStatus::Finished
		);

		flasher.tick(t0 + Duration::from_secs(10));
		assert_eq!(
			flasher.nodes().iter().next().unwrap().status,
			NodeStatus::Rebooted
		);
		assert_eq!(flasher.flashed(), 1);
	}

	#[test]
	fn mr500_rewinds_after_completion() {
		let uboot = vec![0x11u8; 300];
		let mut images = ImageRegistry::new();
		images.set(
			crate::image::RouterImage::from_bytes(crate::image::ImageKind::Uboot, uboot).unwrap(),
		);
		let mut flasher = Flasher::new(Loopback::new(), images).unwrap();
		let t0 = Instant::from_secs(0);
		let mr500_ip = Ipv4Address::new(192, 168, 99, 8);

		flasher.handle_frame(&arp_request(PEER, mr500_ip, &[0; 6]), t0);
		let our_mac = EthernetAddress(crate::config::LOCAL_MAC_BASE);
		flasher.link_mut().take_sent();
		flasher.handle_frame(&rrq_frame(PEER, PEER_IP, our_mac, mr500_ip, "fw"), t0);
		flasher.handle_frame(&ack_frame(PEER, PEER_IP, our_mac, mr500_ip, 1), t0);

		assert_eq!(
			flasher.nodes().iter().next().unwrap().status,
			NodeStatus::Finished
		);

		flasher.tick(t0 + Duration::from_secs(45));
		let node = flasher.nodes().iter().next().unwrap();
		assert_eq!(node.status, NodeStatus::Unknown);
		assert_eq!(node.flash_mode, FlashMode::Unknown);
		assert_eq!(node.router_type, None);
		assert_eq!(node.image_state.total_bytes_sent, 0);
		assert_eq!(flasher.flashed(), 1);

		// The replugged unit passes detection again and flashes afresh.
		flasher.handle_frame(&arp_request(PEER, mr500_ip, &[0; 6]), t0);
		let node = flasher.nodes().iter().next().unwrap();
		assert_eq!(node.status, NodeStatus::Flashing);
		assert_eq!(node.image_state.total_bytes_sent, 0);
		assert_eq!(flasher.nodes().len(), 1);
	}

	#[test]
	fn mask_collapses_recovery_macs_into_one_node() {
		let image = vec![0x42u8; 4096];
		let mut flasher = flasher_with_om2p_image(&image);
		let t0 = Instant::from_secs(0);

		let mac = |last| EthernetAddress([0x00, 0x27, 0x22, 0xa0, 0x00, last]);
		flasher.handle_frame(&arp_request(mac(0x01), OM2P_IP, b"OM2PV4"), t0);
		flasher.handle_frame(&arp_request(mac(0x07), OM2P_IP, b"OM2PV4"), t0);
		assert_eq!(flasher.nodes().len(), 1);

		flasher.handle_frame(&arp_request(mac(0x09), OM2P_IP, b"OM2PV4"), t0);
		assert_eq!(flasher.nodes().len(), 2);
	}

	#[test]
	fn no_image_classifies_without_output() {
		let mut flasher = Flasher::new(Loopback::new(), ImageRegistry::new()).unwrap();
		let t0 = Instant::from_secs(0);

		flasher.handle_frame(&arp_request(PEER, OM2P_IP, b"D200\0\0"), t0);

		let node = flasher.nodes().iter().next().unwrap();
		assert_eq!(node.status, NodeStatus::NoFlash);
		assert!(flasher.link().sent().is_empty());
	}

	#[test]
	fn runt_frames_are_dropped_without_a_node() {
		let mut flasher = flasher_with_om2p_image(&[0u8; 600]);
		let t0 = Instant::from_secs(0);

		let full = arp_request(PEER, OM2P_IP, b"OM2PV4");
		flasher.handle_frame(&full[..20], t0);
		assert!(flasher.nodes().is_empty());
	}

	#[test]
	fn gateway_arp_is_answered_while_flashing() {
		let image = vec![0x42u8; 4096];
		let mut flasher = flasher_with_om2p_image(&image);
		let t0 = Instant::from_secs(0);

		flasher.handle_frame(&arp_request(PEER, OM2P_IP, b"OM2PV4"), t0);
		flasher.link_mut().take_sent();

		// A plain gateway probe (no class literal) during the transfer.
		flasher.handle_frame(&arp_request(PEER, OM2P_IP, b"\x01\x02\x03\x04\x05\x06"), t0);
		let sent = flasher.link_mut().take_sent();
		assert_eq!(sent.len(), 1);
		let (sender_mac, sender_ip) = parse_arp_reply(&sent[0]);
		assert_eq!(sender_mac, EthernetAddress(crate::config::LOCAL_MAC_BASE));
		assert_eq!(sender_ip, OM2P_IP);
	}

	#[test]
	fn unknown_flash_mode_is_flagged_not_fatal() {
		let mut flasher = flasher_with_om2p_image(&[0u8; 600]);
		let t0 = Instant::from_secs(0);

		flasher.handle_frame(&arp_request(PEER, OM2P_IP, b"OM2PV4"), t0);
		{
			let node = flasher.nodes.iter_mut().next().unwrap();
			node.status = NodeStatus::Detected;
			node.flash_mode = FlashMode::Unknown;
		}
		flasher.tick(t0 + Duration::from_secs(1));

		// The node is left wedged but the loop keeps running.
		assert_eq!(
			flasher.nodes().iter().next().unwrap().status,
			NodeStatus::Detected
		);
	}

	#[test]
	fn arp_operation_is_checked_on_bound_nodes() {
		let image = vec![0x42u8; 4096];
		let mut flasher = flasher_with_om2p_image(&image);
		let t0 = Instant::from_secs(0);

		flasher.handle_frame(&arp_request(PEER, OM2P_IP, b"OM2PV4"), t0);
		flasher.link_mut().take_sent();

		let mut reply = arp_request(PEER, OM2P_IP, &[0; 6]);
		let opcode_at = 14 + 6;
		reply[opcode_at..opcode_at + 2]
			.copy_from_slice(&u16::from(ArpOperation::Reply).to_be_bytes());
		flasher.handle_frame(&reply, t0);
		assert!(flasher.link().sent().is_empty());
	}
}
