//! Frame and container builders shared by the unit tests.

use smoltcp::wire::{
	ArpOperation, ArpPacket, ArpRepr, EthernetAddress, EthernetFrame, EthernetProtocol,
	EthernetRepr, Ipv4Address, Ipv4Packet, UdpPacket,
};

use crate::image::{CE_MAGIC, ImageKind, ImageRegistry, RouterImage};
use crate::proto;
use crate::tftp;

const PEER_IP: Ipv4Address = Ipv4Address::new(192, 168, 100, 81);

/// A boot-time gateway probe as the recovering devices emit it.
pub(crate) fn arp_request(
	src_mac: EthernetAddress,
	target_ip: Ipv4Address,
	tha: &[u8; 6],
) -> Vec<u8> {
	let arp = ArpRepr::EthernetIpv4 {
		operation: ArpOperation::Request,
		source_hardware_addr: src_mac,
		source_protocol_addr: PEER_IP,
		target_hardware_addr: EthernetAddress(*tha),
		target_protocol_addr: target_ip,
	};
	let eth = EthernetRepr {
		src_addr: src_mac,
		dst_addr: EthernetAddress::BROADCAST,
		ethertype: EthernetProtocol::Arp,
	};

	let mut buf = vec![0u8; proto::ETHER_HDR_LEN + arp.buffer_len()];
	let mut frame = EthernetFrame::new_unchecked(&mut buf[..]);
	eth.emit(&mut frame);
	arp.emit(&mut ArpPacket::new_unchecked(frame.payload_mut()));
	buf
}

pub(crate) fn rrq_frame(
	src_mac: EthernetAddress,
	src_ip: Ipv4Address,
	dst_mac: EthernetAddress,
	dst_ip: Ipv4Address,
	filename: &str,
) -> Vec<u8> {
	let packet = tftp::Packet::ReadRequest {
		filename,
		mode: "octet",
	};
	proto::udp_frame(
		src_mac,
		dst_mac,
		src_ip,
		dst_ip,
		69,
		69,
		packet.buffer_len(),
		|buf| packet.emit(buf),
	)
}

pub(crate) fn ack_frame(
	src_mac: EthernetAddress,
	src_ip: Ipv4Address,
	dst_mac: EthernetAddress,
	dst_ip: Ipv4Address,
	block: u16,
) -> Vec<u8> {
	let packet = tftp::Packet::Ack { block };
	proto::udp_frame(
		src_mac,
		dst_mac,
		src_ip,
		dst_ip,
		69,
		69,
		packet.buffer_len(),
		|buf| packet.emit(buf),
	)
}

/// Pull block number and payload out of an outbound DATA frame.
pub(crate) fn data_payload(frame: &[u8]) -> (u16, Vec<u8>) {
	let eth = EthernetFrame::new_checked(frame).unwrap();
	let ip = Ipv4Packet::new_checked(eth.payload()).unwrap();
	let udp = UdpPacket::new_checked(ip.payload()).unwrap();
	match tftp::Packet::parse(udp.payload()).unwrap() {
		tftp::Packet::Data { block, payload } => (block, payload.to_vec()),
		other => panic!("expected DATA, got {other:?}"),
	}
}

/// Sender MAC and IP of an outbound ARP reply.
pub(crate) fn parse_arp_reply(frame: &[u8]) -> (EthernetAddress, Ipv4Address) {
	let eth = EthernetFrame::new_checked(frame).unwrap();
	let arp = ArpPacket::new_checked(eth.payload()).unwrap();
	assert_eq!(arp.operation(), ArpOperation::Reply);
	(
		proto::ether_addr(arp.source_hardware_addr()).unwrap(),
		proto::ipv4_addr(arp.source_protocol_addr()).unwrap(),
	)
}

/// CE container with the given description/payload pairs.
pub(crate) fn ce_container(entries: &[(&str, &[u8])]) -> Vec<u8> {
	let mut data = Vec::new();
	data.extend_from_slice(&CE_MAGIC);
	data.extend_from_slice(&(entries.len() as u32).to_be_bytes());

	let mut offset = 0u32;
	for (desc, payload) in entries {
		let mut name = [0u8; 32];
		name[..desc.len()].copy_from_slice(desc.as_bytes());
		data.extend_from_slice(&name);
		data.extend_from_slice(&offset.to_be_bytes());
		data.extend_from_slice(&(payload.len() as u32).to_be_bytes());
		offset += payload.len() as u32;
	}
	for (_, payload) in entries {
		data.extend_from_slice(payload);
	}
	data
}

pub(crate) fn registry_with_ce(entries: &[(&str, &[u8])]) -> ImageRegistry {
	let mut registry = ImageRegistry::new();
	registry.set(RouterImage::from_bytes(ImageKind::Ce, ce_container(entries)).unwrap());
	registry
}
