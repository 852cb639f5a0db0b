//! Error types for the fabric platform layer

use crate::region::Region;
use thiserror::Error;

/// Result type for fabric operations
pub type Result<T> = std::result::Result<T, FabricError>;

/// Errors that can occur in the fabric platform layer
#[derive(Error, Debug)]
pub enum FabricError {
    /// A parameter region was absent from the region table
    #[error("Region {region} missing from region table")]
    MissingRegion {
        /// Region that was looked up
        region: Region,
    },

    /// A parameter region ended before the reader consumed what it needed
    #[error("Region {region} truncated: needed {needed} words, {available} available")]
    RegionTruncated {
        /// Region being read
        region: Region,
        /// Words the reader asked for
        needed: usize,
        /// Words left in the region
        available: usize,
    },

    /// A parameter region held more words than its schema accounts for
    #[error("Region {region} has {unread} trailing words past its schema")]
    RegionTrailing {
        /// Region being read
        region: Region,
        /// Words left unread
        unread: usize,
    },

    /// A binary layout violated its schema
    #[error("Invalid format: {reason}")]
    InvalidFormat {
        /// Reason the layout was rejected
        reason: String,
    },

    /// An index exceeded its container
    #[error("Index {index} out of bounds (max {max})")]
    OutOfBounds {
        /// Offending index
        index: usize,
        /// Exclusive upper bound
        max: usize,
    },

    /// The recording region has no room for another frame
    #[error("Recording region full: capacity {capacity_frames} frames")]
    RecordingFull {
        /// Frames the region was sized for
        capacity_frames: usize,
    },

    /// A frame of the wrong width was offered to the recording region
    #[error("Recording frame length {actual} does not match region frame length {expected}")]
    FrameLength {
        /// Frame length the region was created with
        expected: usize,
        /// Length of the offered frame
        actual: usize,
    },

    /// A DMA request was issued while another was outstanding
    #[error("DMA engine busy: a transfer is already outstanding")]
    DmaBusy,

    /// A DMA request referenced memory outside the source image
    #[error("DMA request [{start}, {start}+{len}) exceeds source of {source_len} words")]
    DmaRange {
        /// First word of the request
        start: usize,
        /// Words requested
        len: usize,
        /// Words in the source image
        source_len: usize,
    },

    /// A host-link data payload was not a whole number of 32-bit words
    #[error("Host-link payload of {bytes} bytes is not word-aligned")]
    PayloadAlignment {
        /// Byte length of the payload
        bytes: usize,
    },
}

impl FabricError {
    /// Create an invalid format error
    pub fn invalid_format(reason: impl Into<String>) -> Self {
        Self::InvalidFormat {
            reason: reason.into(),
        }
    }

    /// Create a missing region error
    pub fn missing_region(region: Region) -> Self {
        Self::MissingRegion { region }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = FabricError::RegionTruncated {
            region: Region::System,
            needed: 11,
            available: 4,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("truncated"));
        assert!(msg.contains("11"));

        let err = FabricError::invalid_format("bad PES layout tag");
        assert!(matches!(err, FabricError::InvalidFormat { .. }));
    }
}
