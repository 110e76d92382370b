//! RFC 1350 packet codec.
//!
//! Only the read side matters here: a recovering device opens an RRQ and
//! acknowledges the DATA stream we feed it. WRQ is parsed so it can be
//! rejected by name instead of falling into the unknown-opcode bucket.

use smoltcp::wire::Error;

pub const OPCODE_RRQ: u16 = 1;
pub const OPCODE_WRQ: u16 = 2;
pub const OPCODE_DATA: u16 = 3;
pub const OPCODE_ACK: u16 = 4;
pub const OPCODE_ERROR: u16 = 5;

/// A parsed TFTP packet borrowing from the UDP payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet<'a> {
	ReadRequest { filename: &'a str, mode: &'a str },
	WriteRequest { filename: &'a str, mode: &'a str },
	Data { block: u16, payload: &'a [u8] },
	Ack { block: u16 },
	Error { code: u16, message: &'a str },
}

fn take_cstr(buf: &[u8]) -> Result<(&str, &[u8]), Error> {
	let nul = buf.iter().position(|&b| b == 0).ok_or(Error)?;
	let s = core::str::from_utf8(&buf[..nul]).map_err(|_| Error)?;
	Ok((s, &buf[nul + 1..]))
}

impl<'a> Packet<'a> {
	pub fn parse(buf: &'a [u8]) -> Result<Self, Error> {
		if buf.len() < 4 {
			return Err(Error);
		}

		let opcode = u16::from_be_bytes([buf[0], buf[1]]);
		let rest = &buf[2..];

		match opcode {
			OPCODE_RRQ | OPCODE_WRQ => {
				let (filename, rest) = take_cstr(rest)?;
				let (mode, _) = take_cstr(rest)?;
				if opcode == OPCODE_RRQ {
					Ok(Packet::ReadRequest { filename, mode })
				} else {
					Ok(Packet::WriteRequest { filename, mode })
				}
			}
			OPCODE_DATA => Ok(Packet::Data {
				block: u16::from_be_bytes([rest[0], rest[1]]),
				payload: &rest[2..],
			}),
			OPCODE_ACK => Ok(Packet::Ack {
				block: u16::from_be_bytes([rest[0], rest[1]]),
			}),
			OPCODE_ERROR => {
				let code = u16::from_be_bytes([rest[0], rest[1]]);
				let (message, _) = take_cstr(&rest[2..])?;
				Ok(Packet::Error { code, message })
			}
			_ => Err(Error),
		}
	}

	/// Length of the encoded packet.
	pub fn buffer_len(&self) -> usize {
		match self {
			Packet::ReadRequest { filename, mode } | Packet::WriteRequest { filename, mode } => {
				2 + filename.len() + 1 + mode.len() + 1
			}
			Packet::Data { payload, .. } => 4 + payload.len(),
			Packet::Ack { .. } => 4,
			Packet::Error { message, .. } => 4 + message.len() + 1,
		}
	}

	/// Encode into `buf`, which must hold exactly [`Self::buffer_len`] bytes.
	pub fn emit(&self, buf: &mut [u8]) {
		match *self {
			Packet::ReadRequest { filename, mode } => emit_request(buf, OPCODE_RRQ, filename, mode),
			Packet::WriteRequest { filename, mode } => {
				emit_request(buf, OPCODE_WRQ, filename, mode);
			}
			Packet::Data { block, payload } => {
				buf[0..2].copy_from_slice(&OPCODE_DATA.to_be_bytes());
				buf[2..4].copy_from_slice(&block.to_be_bytes());
				buf[4..].copy_from_slice(payload);
			}
			Packet::Ack { block } => {
				buf[0..2].copy_from_slice(&OPCODE_ACK.to_be_bytes());
				buf[2..4].copy_from_slice(&block.to_be_bytes());
			}
			Packet::Error { code, message } => {
				buf[0..2].copy_from_slice(&OPCODE_ERROR.to_be_bytes());
				buf[2..4].copy_from_slice(&code.to_be_bytes());
				buf[4..4 + message.len()].copy_from_slice(message.as_bytes());
				buf[4 + message.len()] = 0;
			}
		}
	}
}

fn emit_request(buf: &mut [u8], opcode: u16, filename: &str, mode: &str) {
	buf[0..2].copy_from_slice(&opcode.to_be_bytes());
	let mut at = 2;
	buf[at..at + filename.len()].copy_from_slice(filename.as_bytes());
	at += filename.len();
	buf[at] = 0;
	at += 1;
	buf[at..at + mode.len()].copy_from_slice(mode.as_bytes());
	buf[at + mode.len()] = 0;
}
