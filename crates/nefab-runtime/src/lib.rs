//! Per-core simulation kernels for the nefab NEF ensemble runtime
//!
//! A running simulation is a heterogeneous graph of single-core kernels
//! connected by the fabric's multicast network: LIF ensembles, pure filter
//! relays, value-source playback cores, Rx/Tx host-link bridges, and one
//! simulation controller that keeps every worker's tick schedule locked to
//! a shared reference clock. All kernels speak S16.15 fixed-point values
//! and obey the same per-tick contract: finalise filtered input, run the
//! kernel-specific update, emit outgoing traffic.

#![deny(missing_docs)]
#![warn(clippy::all)]

// Core modules
pub mod bridge;
pub mod clock;
pub mod controller;
pub mod ensemble;
pub mod error;
pub mod fixed;
pub mod input;
pub mod kernel;
pub mod neuron;
pub mod pes;
pub mod record;
pub mod relay;
pub mod source;

// Re-export essential types
pub use bridge::{RxBridgeKernel, TxBridgeKernel, RX_MAX_DIMS};
pub use clock::{ClockKeys, DisciplinedClock};
pub use controller::ControllerKernel;
pub use ensemble::{EnsembleKernel, EnsembleParams, OutputPacing};
pub use error::{Result, RuntimeError};
pub use fixed::Value;
pub use input::{Filter, FilterRoute, FilteredInput};
pub use kernel::{Kernel, TickContext};
pub use neuron::{Lfsr, NeuronStatus};
pub use pes::PesState;
pub use record::RecordingBuffer;
pub use relay::FilterKernel;
pub use source::{SourceState, ValueSourceKernel};

/// Runtime crate version for compatibility checking
pub const RUNTIME_VERSION: u32 = 1;

/// Default simulation timestep in microseconds (one tick = 1 ms)
pub const DEFAULT_TIMESTEP_US: u32 = 1000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_integration() {
        // All component types can be constructed through the public surface
        let params = EnsembleParams::new(10, 1, 1).unwrap();
        assert_eq!(params.n_neurons, 10);

        let bank = FilteredInput::unit(1, 0, 0, 0).unwrap();
        assert_eq!(bank.n_dimensions(), 1);

        let lfsr = Lfsr::new(1).unwrap();
        assert_eq!(lfsr.state(), 1);
    }
}
