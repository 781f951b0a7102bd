//! Shared session state and enums (§3 "Session state").

use std::fs::File;
use std::path::PathBuf;

use clap::ValueEnum;

/// Which side of the transfer this engine instance plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Sender,
    Receiver,
}

/// Which ARQ strategy governs this transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Strategy {
    #[value(name = "udp_saw")]
    StopAndWait,
    #[value(name = "udp_sr")]
    SelectiveRepeat,
}

impl Default for Strategy {
    fn default() -> Self {
        Strategy::StopAndWait
    }
}

/// The file-system side of a session: the handle being read from or
/// written to, plus the identifying metadata carried in the handshake.
pub struct FileSession {
    pub file: File,
    pub path: PathBuf,
    pub filename: String,
    pub file_size: u64,
    /// Known up front for uploads (client-declared); computed and sent at
    /// the end for downloads (§3).
    pub expected_digest: Option<String>,
}

/// The terminal state of a completed session, used by the binaries to decide
/// what to print and which exit code to return (§6.2, §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    Success,
    IntegrityMismatch,
}

/// Packet count for a file of the given size under the protocol's fixed
/// chunking rule (§3 invariant 2): `N = floor(size / DATA_MAX_SIZE) + 1`.
pub fn packet_count(file_size: u64) -> u32 {
    let n = file_size / crate::message::DATA_MAX_SIZE as u64 + 1;
    n.try_into().expect("packet count exceeds u32 range")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::DATA_MAX_SIZE;

    #[test]
    fn packet_count_exact_multiple_adds_one() {
        let size = DATA_MAX_SIZE as u64 * 3;
        assert_eq!(packet_count(size), 4);
    }

    #[test]
    fn packet_count_zero_is_one() {
        assert_eq!(packet_count(0), 1);
    }
}
