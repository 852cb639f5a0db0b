//! Host-link (SDP) frame format and word codec

use crate::error::{FabricError, Result};

/// Flag byte for frames expecting no reply
pub const FLAGS_NO_REPLY: u8 = 0x07;

/// Destination port for all host-bound frames
pub const HOST_PORT: u8 = 0xff;

/// Destination address of the host gateway chip
pub const HOST_ADDR: u16 = 0x0000;

/// IP tag for Tx-bridge uplink frames
pub const TAG_UPLINK: u8 = 1;

/// IP tag for simulation-controller reply frames
pub const TAG_CONTROLLER_REPLY: u8 = 2;

/// `cmd_rc` value marking a dimensional payload (both directions)
pub const CMD_DIMENSIONAL: u16 = 1;

/// Host command codes accepted by the simulation controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum HostCommand {
    /// Reply with the controller's reference time
    GetTime,
    /// Reply with the drift metric of the last ping round
    GetDrift,
    /// Broadcast a synchronized start tick
    StartAt,
    /// Broadcast a synchronized stop tick
    StopAt,
}

impl HostCommand {
    /// Decode a `cmd_rc` word; unknown codes are reserved
    pub fn from_cmd(cmd: u16) -> Option<Self> {
        match cmd {
            0 => Some(Self::GetTime),
            1 => Some(Self::GetDrift),
            2 => Some(Self::StartAt),
            3 => Some(Self::StopAt),
            _ => None,
        }
    }

    /// Wire code for this command
    pub fn cmd(self) -> u16 {
        match self {
            Self::GetTime => 0,
            Self::GetDrift => 1,
            Self::StartAt => 2,
            Self::StopAt => 3,
        }
    }
}

/// One host-link frame
///
/// Only the fields this runtime reads or writes are modelled; transport
/// framing belongs to the gateway firmware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdpFrame {
    /// Flag byte; always [`FLAGS_NO_REPLY`] for traffic we originate
    pub flags: u8,
    /// IP tag selecting the host-side stream
    pub tag: u8,
    /// Destination P2P address
    pub dest_addr: u16,
    /// Destination port
    pub dest_port: u8,
    /// Source P2P address of the emitting core
    pub srce_addr: u16,
    /// Source core id
    pub srce_port: u8,
    /// Command / return code
    pub cmd: u16,
    /// First scalar argument
    pub arg1: u32,
    /// Second scalar argument
    pub arg2: u32,
    /// Data payload (little-endian 32-bit words)
    pub data: Vec<u8>,
}

impl SdpFrame {
    /// Build a host-bound frame from the given core
    pub fn to_host(srce_addr: u16, srce_port: u8, tag: u8, cmd: u16) -> Self {
        Self {
            flags: FLAGS_NO_REPLY,
            tag,
            dest_addr: HOST_ADDR,
            dest_port: HOST_PORT,
            srce_addr,
            srce_port,
            cmd,
            arg1: 0,
            arg2: 0,
            data: Vec::new(),
        }
    }

    /// Set the scalar arguments
    pub fn with_args(mut self, arg1: u32, arg2: u32) -> Self {
        self.arg1 = arg1;
        self.arg2 = arg2;
        self
    }

    /// Attach a word payload
    pub fn with_words(mut self, words: &[i32]) -> Self {
        self.data = encode_words(words);
        self
    }

    /// Decode the data payload into words
    pub fn words(&self) -> Result<Vec<i32>> {
        decode_words(&self.data)
    }
}

/// Encode fixed-point words as a little-endian byte payload
pub fn encode_words(words: &[i32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(words.len() * 4);
    for &w in words {
        bytes.extend_from_slice(&w.to_le_bytes());
    }
    bytes
}

/// Decode a little-endian byte payload into fixed-point words
pub fn decode_words(bytes: &[u8]) -> Result<Vec<i32>> {
    if bytes.len() % 4 != 0 {
        return Err(FabricError::PayloadAlignment { bytes: bytes.len() });
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

/// Outbound host-link seam
pub trait HostTx {
    /// Queue one frame for transmission over the host link
    fn send(&mut self, frame: SdpFrame);
}

/// Recording fake for tests
#[derive(Debug, Default)]
pub struct VecHostTx {
    /// Frames in the order they were sent
    pub sent: Vec<SdpFrame>,
}

impl VecHostTx {
    /// Create an empty recording sink
    pub fn new() -> Self {
        Self::default()
    }
}

impl HostTx for VecHostTx {
    fn send(&mut self, frame: SdpFrame) {
        self.sent.push(frame);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prop_word_codec_round_trips(words in proptest::collection::vec(any::<i32>(), 0..64)) {
            let bytes = encode_words(&words);
            prop_assert_eq!(decode_words(&bytes).unwrap(), words);
        }
    }

    #[test]
    fn test_word_codec_round_trip() {
        let words = [0x0000_8000i32, -1, 0, i32::MIN];
        let bytes = encode_words(&words);
        assert_eq!(bytes.len(), 16);
        assert_eq!(decode_words(&bytes).unwrap(), words.to_vec());
    }

    #[test]
    fn test_unaligned_payload_rejected() {
        assert!(matches!(
            decode_words(&[1, 2, 3]),
            Err(FabricError::PayloadAlignment { bytes: 3 })
        ));
    }

    #[test]
    fn test_host_frame_defaults() {
        let frame = SdpFrame::to_host(0x0102, 3, TAG_UPLINK, CMD_DIMENSIONAL).with_args(5, 0);
        assert_eq!(frame.flags, FLAGS_NO_REPLY);
        assert_eq!(frame.dest_addr, HOST_ADDR);
        assert_eq!(frame.dest_port, HOST_PORT);
        assert_eq!(frame.srce_addr, 0x0102);
        assert_eq!(frame.srce_port, 3);
        assert_eq!(frame.arg1, 5);
    }

    #[test]
    fn test_host_command_codes() {
        for cmd in [
            HostCommand::GetTime,
            HostCommand::GetDrift,
            HostCommand::StartAt,
            HostCommand::StopAt,
        ] {
            assert_eq!(HostCommand::from_cmd(cmd.cmd()), Some(cmd));
        }
        assert_eq!(HostCommand::from_cmd(9), None);
    }
}
