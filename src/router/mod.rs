//! Router profiles and the detection dispatcher.
//!
//! Every supported class announces itself during its boot-time recovery
//! window with an ARP request towards a hard-coded gateway address,
//! most with a class literal planted in the target-hardware-address
//! slot. The profile table is iterated in a fixed order because two
//! predicates may share a target address and only differ in that
//! literal.

pub mod tftp_client;

use smoltcp::time::Instant;
use smoltcp::wire::{ArpOperation, ArpPacket, EthernetAddress, Ipv4Address};

use crate::error::FlashError;
use crate::image::{ImageKind, ImageRegistry};
use crate::node::{LocalMacPool, Mr500State, Node, NodePriv, NodeStatus, Om2pFamilyState};

const MR500_IP: Ipv4Address = Ipv4Address::new(192, 168, 99, 8);
const OM2P_IP: Ipv4Address = Ipv4Address::new(192, 168, 100, 8);
const ZYXEL_IP: Ipv4Address = Ipv4Address::new(192, 168, 1, 99);

const MASK_FF: EthernetAddress = EthernetAddress([0xff, 0xff, 0xff, 0xff, 0xff, 0xff]);
const MASK_F8: EthernetAddress = EthernetAddress([0xff, 0xff, 0xff, 0xff, 0xff, 0xf8]);
const MASK_F0: EthernetAddress = EthernetAddress([0xff, 0xff, 0xff, 0xff, 0xff, 0xf0]);

/// A supported device class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterClass {
	A40,
	A42,
	A60,
	A62,
	D200,
	G200,
	Mr1750,
	Mr500,
	Mr600,
	Mr900,
	Om2p,
	Om5p,
	Om5pAc,
	Om5pAn,
	P60,
	Zyxel,
}

/// Profile table in dispatch order. The order is load-bearing: OM2P and
/// OM5P share a target address and are told apart by the THA literal
/// alone.
pub const ROUTER_CLASSES: [RouterClass; 16] = [
	RouterClass::A40,
	RouterClass::A42,
	RouterClass::A60,
	RouterClass::A62,
	RouterClass::D200,
	RouterClass::G200,
	RouterClass::Mr1750,
	RouterClass::Mr500,
	RouterClass::Mr600,
	RouterClass::Mr900,
	RouterClass::Om2p,
	RouterClass::Om5p,
	RouterClass::Om5pAc,
	RouterClass::Om5pAn,
	RouterClass::P60,
	RouterClass::Zyxel,
];

impl RouterClass {
	pub fn desc(self) -> &'static str {
		match self {
			RouterClass::A40 => "A40",
			RouterClass::A42 => "A42",
			RouterClass::A60 => "A60",
			RouterClass::A62 => "A62",
			RouterClass::D200 => "D200",
			RouterClass::G200 => "G200",
			RouterClass::Mr1750 => "MR1750",
			RouterClass::Mr500 => "MR500 router",
			RouterClass::Mr600 => "MR600",
			RouterClass::Mr900 => "MR900",
			RouterClass::Om2p => "OM2P",
			RouterClass::Om5p => "OM5P",
			RouterClass::Om5pAc => "OM5P-AC",
			RouterClass::Om5pAn => "OM5P-AN",
			RouterClass::P60 => "P60",
			RouterClass::Zyxel => "Zyxel",
		}
	}

	/// Mask collapsing the several recovery MACs of one physical device
	/// to a single node identity.
	pub fn mac_mask(self) -> EthernetAddress {
		match self {
			RouterClass::Mr500 | RouterClass::Om2p | RouterClass::Om5p | RouterClass::P60 => {
				MASK_F8
			}
			RouterClass::A40
			| RouterClass::A42
			| RouterClass::A60
			| RouterClass::A62
			| RouterClass::Mr1750
			| RouterClass::Mr600
			| RouterClass::Mr900
			| RouterClass::Om5pAc
			| RouterClass::Om5pAn => MASK_F0,
			RouterClass::D200 | RouterClass::G200 | RouterClass::Zyxel => MASK_FF,
		}
	}

	pub fn image(self) -> ImageKind {
		match self {
			RouterClass::Mr500 => ImageKind::Uboot,
			RouterClass::Zyxel => ImageKind::Zyxel,
			_ => ImageKind::Ce,
		}
	}

	/// Override key for the sub-image lookup in multi-device containers.
	pub fn image_desc(self) -> Option<&'static str> {
		match self {
			RouterClass::A40 => Some("A60"),
			RouterClass::Om5pAn => Some("OM5P"),
			RouterClass::Om5pAc => Some("OM5PAC"),
			RouterClass::P60 => Some("P60"),
			RouterClass::D200 => Some("D200"),
			RouterClass::G200 => Some("G200"),
			RouterClass::Zyxel => Some("Zyxel"),
			_ => None,
		}
	}

	pub fn image_key(self) -> &'static str {
		self.image_desc().unwrap_or_else(|| self.desc())
	}

	fn recovery_ip(self) -> Ipv4Address {
		match self {
			RouterClass::Mr500 => MR500_IP,
			RouterClass::Zyxel => ZYXEL_IP,
			_ => OM2P_IP,
		}
	}

	fn tha_matches(self, tha: &[u8]) -> bool {
		match self {
			RouterClass::Mr500 => true,
			// MR600 and MR900 historically leave the sixth byte open.
			RouterClass::Mr600 => tha.starts_with(b"MR600"),
			RouterClass::Mr900 => tha.starts_with(b"MR900"),
			RouterClass::Mr1750 => tha == b"MR1750",
			RouterClass::Om2p => tha == [0u8; 6] || tha == b"OM2PV4",
			RouterClass::Om5p => tha == b"OM5P\0\0",
			RouterClass::Om5pAn => tha == b"OM5PAN",
			RouterClass::Om5pAc => tha == b"OM5PAC",
			RouterClass::A40 => tha == b"A40\0\0\0",
			RouterClass::A42 => tha == b"A42\0\0\0",
			RouterClass::A60 => tha == b"A60\0\0\0",
			RouterClass::A62 => tha == b"A62\0\0\0",
			RouterClass::P60 => tha == b"P60\0\0\0",
			RouterClass::D200 => tha == b"D200\0\0",
			RouterClass::G200 => tha == b"G200\0\0",
			RouterClass::Zyxel => tha == [0u8; 6],
		}
	}

	/// Fingerprint predicate: an ARP request towards the class's
	/// recovery gateway, with the class's THA literal where one exists.
	pub fn detect_main(self, arp: &ArpPacket<&[u8]>) -> bool {
		arp.operation() == ArpOperation::Request
			&& arp.target_protocol_addr() == self.recovery_ip().octets()
			&& self.tha_matches(arp.target_hardware_addr())
	}

	/// Bind peer state from the frame that triggered the match.
	pub fn detect_post(self, node: &mut Node, arp: &ArpPacket<&[u8]>) {
		// Every ARP-probing class negotiates the same way: it expects
		// to pull its image from the gateway it just asked for.
		tftp_client::detect_post(node, arp);
	}

	/// Periodic broadcast hook, invoked once per slow tick. None of the
	/// ARP-probing classes solicit beacons, so this is currently a seam.
	pub fn detect_pre(self, _our_mac: EthernetAddress) {}

	/// Seconds a class needs from start-of-flash before the write is
	/// assumed durable, before the size-dependent part.
	pub fn completion_offset_secs(self) -> u64 {
		match self {
			RouterClass::Mr500 => 45,
			_ => 10,
		}
	}

	fn new_priv(self) -> NodePriv {
		match self {
			RouterClass::Mr500 => NodePriv::Mr500(Mr500State::default()),
			_ => NodePriv::Om2pFamily(Om2pFamilyState::default()),
		}
	}
}

/// Startup validation of the profile table.
pub fn validate() -> Result<(), FlashError> {
	for class in ROUTER_CLASSES {
		if class.mac_mask() == EthernetAddress([0; 6]) {
			return Err(FlashError::ProfileMask(class.desc()));
		}
	}
	Ok(())
}

/// Run every `detect_pre` hook; called once per slow tick.
pub fn detect_pre_all(our_mac: EthernetAddress) {
	for class in ROUTER_CLASSES {
		class.detect_pre(our_mac);
	}
}

/// Detection dispatcher. Tries the profile table in order against an
/// ARP frame from an unbound node; on the first hit the node is either
/// bound to the class and handed to `detect_post`, or classified
/// `NO_FLASH` when no usable image is loaded.
///
/// Returns whether the node was bound.
pub fn detect(
	node: &mut Node,
	arp: &ArpPacket<&[u8]>,
	images: &ImageRegistry,
	macs: &mut LocalMacPool,
	now: Instant,
) -> bool {
	for class in ROUTER_CLASSES {
		if !class.detect_main(arp) {
			continue;
		}

		let image = images.get(class.image());
		if image.is_empty() {
			error!(
				"[{}]: is of type '{}' that we have no image for",
				node.his_mac_addr,
				class.desc()
			);
			classify_no_flash(node, class, now);
			return false;
		}

		if image.kind() == ImageKind::Ce && image.payload(class.image_key()).is_none() {
			error!(
				"[{}]: is of type '{}' that we have no image for (ce)",
				node.his_mac_addr,
				class.desc()
			);
			classify_no_flash(node, class, now);
			return false;
		}

		let Some(our_mac) = macs.allocate() else {
			error!(
				"[{}]: local MAC pool exhausted, cannot start session",
				node.his_mac_addr
			);
			return false;
		};

		node.our_mac_addr = our_mac;
		node.router_type = Some(class);
		node.router_priv = class.new_priv();

		info!(
			"[{}]: type '{} router' detected",
			node.his_mac_addr,
			class.desc()
		);

		class.detect_post(node, arp);
		return true;
	}

	false
}

fn classify_no_flash(node: &mut Node, class: RouterClass, now: Instant) {
	node.router_type = Some(class);
	node.router_priv = NodePriv::None;
	node.status = NodeStatus::NoFlash;
	node.completed_at = Some(now);
}
