//! Process-wide tunables.

use smoltcp::time::Duration;

/// Size of the frame receive buffer.
pub const PACKET_BUFF_LEN: usize = 2000;

/// Slow-tick interval: the bounded transport read returns after at most
/// this long without data, which paces pre-detect probes, node
/// maintenance and the TFTP retransmit clock.
pub const READ_SLEEP: Duration = Duration::from_millis(250);

/// Seed of the local MAC pool; every detected node gets the next address.
pub const LOCAL_MAC_BASE: [u8; 6] = [0x00, 0xba, 0xbe, 0xca, 0xff, 0x00];

/// TFTP well-known port. Recovering devices direct their read requests
/// here and we answer from the same port.
pub const TFTP_PORT: u16 = 69;

/// Maximum TFTP DATA payload; a shorter block terminates the transfer.
pub const TFTP_BLOCK_LEN: usize = 512;

/// Age after which an unacknowledged DATA block is sent again.
pub const TFTP_RETRANSMIT: Duration = Duration::from_secs(1);

/// Grace period before finished or unserviceable nodes are dropped from
/// the registry.
pub const NODE_REAP_GRACE: Duration = Duration::from_secs(120);
