//! Frame synthesis and small parsing helpers on top of `smoltcp::wire`.

use smoltcp::phy::ChecksumCapabilities;
use smoltcp::wire::{
	ArpOperation, ArpPacket, ArpRepr, EthernetAddress, EthernetFrame, EthernetProtocol,
	EthernetRepr, IpAddress, IpProtocol, Ipv4Address, Ipv4Packet, Ipv4Repr, UdpPacket, UdpRepr,
};

pub const ETHER_HDR_LEN: usize = 14;

/// Default TTL for synthesised datagrams.
const HOP_LIMIT: u8 = 64;

pub fn ether_addr(bytes: &[u8]) -> Option<EthernetAddress> {
	let octets: [u8; 6] = bytes.try_into().ok()?;
	Some(EthernetAddress(octets))
}

pub fn ipv4_addr(bytes: &[u8]) -> Option<Ipv4Address> {
	let octets: [u8; 4] = bytes.try_into().ok()?;
	Some(Ipv4Address::from(octets))
}

/// Build the ARP reply that claims `src_ip` for our session MAC.
pub fn arp_reply_frame(
	src_mac: EthernetAddress,
	src_ip: Ipv4Address,
	dst_mac: EthernetAddress,
	dst_ip: Ipv4Address,
) -> Vec<u8> {
	let arp = ArpRepr::EthernetIpv4 {
		operation: ArpOperation::Reply,
		source_hardware_addr: src_mac,
		source_protocol_addr: src_ip,
		target_hardware_addr: dst_mac,
		target_protocol_addr: dst_ip,
	};
	let eth = EthernetRepr {
		src_addr: src_mac,
		dst_addr: dst_mac,
		ethertype: EthernetProtocol::Arp,
	};

	let mut buf = vec![0u8; ETHER_HDR_LEN + arp.buffer_len()];
	let mut frame = EthernetFrame::new_unchecked(&mut buf[..]);
	eth.emit(&mut frame);
	arp.emit(&mut ArpPacket::new_unchecked(frame.payload_mut()));
	buf
}

/// Build a UDP/IPv4/Ethernet frame around a payload written by `emit`.
#[allow(clippy::too_many_arguments)]
pub fn udp_frame(
	src_mac: EthernetAddress,
	dst_mac: EthernetAddress,
	src_ip: Ipv4Address,
	dst_ip: Ipv4Address,
	src_port: u16,
	dst_port: u16,
	payload_len: usize,
	emit: impl FnOnce(&mut [u8]),
) -> Vec<u8> {
	let checksum = ChecksumCapabilities::default();
	let udp = UdpRepr { src_port, dst_port };
	let ip = Ipv4Repr {
		src_addr: src_ip,
		dst_addr: dst_ip,
		next_header: IpProtocol::Udp,
		payload_len: udp.header_len() + payload_len,
		hop_limit: HOP_LIMIT,
	};
	let eth = EthernetRepr {
		src_addr: src_mac,
		dst_addr: dst_mac,
		ethertype: EthernetProtocol::Ipv4,
	};

	let mut buf = vec![0u8; ETHER_HDR_LEN + ip.buffer_len() + udp.header_len() + payload_len];
	let mut frame = EthernetFrame::new_unchecked(&mut buf[..]);
	eth.emit(&mut frame);

	let mut ip_packet = Ipv4Packet::new_unchecked(frame.payload_mut());
	ip.emit(&mut ip_packet, &checksum);

	let mut udp_packet = UdpPacket::new_unchecked(ip_packet.payload_mut());
	udp.emit(
		&mut udp_packet,
		&IpAddress::Ipv4(src_ip),
		&IpAddress::Ipv4(dst_ip),
		payload_len,
		emit,
		&checksum,
	);

	buf
}
