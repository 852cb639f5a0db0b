//! Fabric platform layer for the nefab on-chip runtime
//!
//! This crate models the surfaces a per-core kernel touches on the
//! neuromorphic fabric: the multicast packet network, the host-link (SDP)
//! message channel, the off-chip parameter regions read at startup, the
//! write-only recording region, the background DMA unit, and the
//! free-running hardware timer. The kernels themselves live in
//! `nefab-runtime`.

#![deny(missing_docs)]
#![warn(clippy::all)]

// Core modules
pub mod dma;
pub mod error;
pub mod packet;
pub mod record;
pub mod region;
pub mod schemas;
pub mod sdp;
pub mod timer;

// Re-export essential types
pub use dma::{DmaEngine, DmaTag};
pub use error::{FabricError, Result};
pub use packet::{MulticastTx, NullTx, Packet, VecTx};
pub use record::RecordingRegion;
pub use region::{Region, RegionTable, WordReader};
pub use sdp::{HostCommand, HostTx, SdpFrame, VecHostTx};
pub use timer::HardwareTimer;

/// Fabric crate version for compatibility checking
pub const FABRIC_VERSION: u32 = 1;
