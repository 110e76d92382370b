//! TFTP-client delivery.
//!
//! The device probes for its hard-coded gateway via ARP, then pulls its
//! firmware with a TFTP read request. We impersonate that gateway: claim
//! the address with a synthesised ARP reply, serve the read request and
//! stream DATA blocks against the device's ACKs. Because the device
//! gives no explicit applied-the-image signal, completion is declared by
//! a per-class time-plus-bytes heuristic.

use smoltcp::time::{Duration, Instant};
use smoltcp::wire::ArpPacket;

use crate::config::{TFTP_BLOCK_LEN, TFTP_PORT, TFTP_RETRANSMIT};
use crate::image::ImageRegistry;
use crate::node::{FlashMode, Node, NodeStatus};
use crate::proto;
use crate::tftp;
use crate::transport::LinkTransport;

/// Bind hook run when a profile matches: the peer expects its gateway at
/// the ARP target address, and is itself reachable at the sender address.
pub(crate) fn detect_post(node: &mut Node, arp: &ArpPacket<&[u8]>) {
	let Some(his_ip) = proto::ipv4_addr(arp.source_protocol_addr()) else {
		return;
	};
	let Some(our_ip) = proto::ipv4_addr(arp.target_protocol_addr()) else {
		return;
	};

	node.flash_mode = FlashMode::TftpClient;
	node.his_ip_addr = his_ip;
	node.our_ip_addr = our_ip;
	node.status = NodeStatus::Detected;
}

/// Engage the driver on a freshly detected node: claim the gateway
/// address and start the completion clock.
pub fn engage(node: &mut Node, link: &mut impl LinkTransport, now: Instant) {
	node.status = NodeStatus::Flashing;
	flash_time_set(node, now);
	answer_arp(node, link);
}

/// Reply to an ARP request for the address we claimed.
pub fn answer_arp(node: &mut Node, link: &mut impl LinkTransport) {
	let frame = proto::arp_reply_frame(
		node.our_mac_addr,
		node.our_ip_addr,
		node.his_mac_addr,
		node.his_ip_addr,
	);
	if let Err(err) = link.send(&frame) {
		warn!("[{}]: dropped ARP reply: {err}", node.his_mac_addr);
	}
}

/// Drive the transfer with a TFTP packet addressed to us.
pub fn handle_tftp(
	node: &mut Node,
	images: &ImageRegistry,
	link: &mut impl LinkTransport,
	peer_port: u16,
	payload: &[u8],
	now: Instant,
) {
	let packet = match tftp::Packet::parse(payload) {
		Ok(packet) => packet,
		Err(_) => {
			debug!("[{}]: dropping malformed tftp packet", node.his_mac_addr);
			return;
		}
	};

	match packet {
		tftp::Packet::ReadRequest { filename, .. } => {
			if node.status != NodeStatus::Flashing {
				debug!(
					"[{}]: unexpected tftp read request for '{filename}'",
					node.his_mac_addr
				);
				return;
			}
			let Some(image) = image_payload(node, images) else {
				return;
			};

			// A repeated RRQ restarts the stream; the byte counter
			// feeding the completion heuristic keeps accumulating.
			node.image_state.restart();
			node.image_state.peer_port = peer_port;
			debug!(
				"[{}]: tftp read request for '{filename}', serving {} bytes",
				node.his_mac_addr,
				image.len()
			);
			send_block(node, images, link, 1, 0, now);
		}
		tftp::Packet::Ack { block } => handle_ack(node, images, link, block, now),
		tftp::Packet::Error { code, message } => {
			warn!(
				"[{}]: peer aborted transfer: error {code}: {message}",
				node.his_mac_addr
			);
		}
		tftp::Packet::WriteRequest { filename, .. } => {
			debug!(
				"[{}]: rejecting tftp write request for '{filename}'",
				node.his_mac_addr
			);
		}
		tftp::Packet::Data { .. } => {
			debug!("[{}]: ignoring unexpected tftp data", node.his_mac_addr);
		}
	}
}

fn handle_ack(
	node: &mut Node,
	images: &ImageRegistry,
	link: &mut impl LinkTransport,
	block: u16,
	now: Instant,
) {
	if node.status != NodeStatus::Flashing || !node.image_state.started {
		return;
	}

	if block != node.image_state.block {
		// Duplicate or stale ACK: the block in flight went missing.
		retransmit(node, images, link, now);
		return;
	}

	if node.image_state.block_len < TFTP_BLOCK_LEN {
		// The short block has been acknowledged; the stream is done.
		node.status = NodeStatus::Finished;
		debug!(
			"[{}]: tftp transfer finished ({} bytes sent)",
			node.his_mac_addr, node.image_state.total_bytes_sent
		);
		return;
	}

	let next_block = node.image_state.block.wrapping_add(1);
	let next_start = node.image_state.block_start + node.image_state.block_len;
	send_block(node, images, link, next_block, next_start, now);
}

/// Resend the block in flight when its ACK is overdue. Piggy-backs on
/// the slow tick, which is the only clock the loop has.
pub fn maintain(node: &mut Node, images: &ImageRegistry, link: &mut impl LinkTransport, now: Instant) {
	if node.status != NodeStatus::Flashing || !node.image_state.started {
		return;
	}
	let overdue = node
		.image_state
		.last_sent
		.is_some_and(|at| now >= at + TFTP_RETRANSMIT);
	if overdue {
		retransmit(node, images, link, now);
	}
}

fn retransmit(
	node: &mut Node,
	images: &ImageRegistry,
	link: &mut impl LinkTransport,
	now: Instant,
) {
	let (block, start) = (node.image_state.block, node.image_state.block_start);
	send_block_inner(node, images, link, block, start, now, false);
}

fn send_block(
	node: &mut Node,
	images: &ImageRegistry,
	link: &mut impl LinkTransport,
	block: u16,
	start: usize,
	now: Instant,
) {
	send_block_inner(node, images, link, block, start, now, true);
}

fn send_block_inner(
	node: &mut Node,
	images: &ImageRegistry,
	link: &mut impl LinkTransport,
	block: u16,
	start: usize,
	now: Instant,
	first_transmission: bool,
) {
	let Some(image) = image_payload(node, images) else {
		return;
	};

	let end = image.len().min(start + TFTP_BLOCK_LEN);
	let chunk = &image[start.min(end)..end];

	let packet = tftp::Packet::Data {
		block,
		payload: chunk,
	};
	let frame = proto::udp_frame(
		node.our_mac_addr,
		node.his_mac_addr,
		node.our_ip_addr,
		node.his_ip_addr,
		TFTP_PORT,
		node.image_state.peer_port,
		packet.buffer_len(),
		|buf| packet.emit(buf),
	);
	if let Err(err) = link.send(&frame) {
		// The retransmit clock recovers from a dropped send.
		warn!("[{}]: dropped DATA block {block}: {err}", node.his_mac_addr);
	}

	let state = &mut node.image_state;
	state.block = block;
	state.block_start = start;
	state.block_len = chunk.len();
	state.last_sent = Some(now);
	state.started = true;
	if first_transmission {
		state.total_bytes_sent += chunk.len() as u64;
	}
}

fn image_payload<'a>(node: &Node, images: &'a ImageRegistry) -> Option<&'a [u8]> {
	let class = node.router_type?;
	images.get(class.image()).payload(class.image_key())
}

/// Stamp the start of the flash window on the profile scratch state.
pub fn flash_time_set(node: &mut Node, now: Instant) {
	node.router_priv.set_start_flash(now);
}

/// Completion heuristic: the device has absorbed the image and rebooted
/// once the class's fixed settle time plus one second per 64 KiB sent
/// has elapsed since the flash started.
pub fn flash_completed(node: &Node, now: Instant) -> bool {
	let Some(class) = node.router_type else {
		return false;
	};
	let Some(start_flash) = node.router_priv.start_flash() else {
		return false;
	};

	let secs = class.completion_offset_secs() + node.image_state.total_bytes_sent / 65536;
	now >= start_flash + Duration::from_secs(secs)
}
