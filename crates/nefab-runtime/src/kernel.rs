//! The sealed per-core handler surface
//!
//! A core hosts exactly one kernel. The fabric dispatches three interrupt
//! sources into it: multicast reception (highest priority), the simulation
//! timer, and host-link reception (lowest). Handlers are non-preemptive
//! with respect to each other here, which models the single-writer
//! discipline the hardware enforces with priority levels.

use nefab_fabric::{HostTx, MulticastTx, SdpFrame};

pub(crate) mod sealed {
    //! Seal keeping the kernel set closed

    /// Marker implemented only by this crate's kernels
    pub trait Sealed {}
}

/// Outbound sinks handed to a kernel for the duration of one handler call
pub struct TickContext<'a> {
    /// Multicast transmit seam
    pub mc: &'a mut dyn MulticastTx,
    /// Host-link transmit seam
    pub host: &'a mut dyn HostTx,
}

impl<'a> TickContext<'a> {
    /// Borrow the two sinks for one handler invocation
    pub fn new(mc: &'a mut dyn MulticastTx, host: &'a mut dyn HostTx) -> Self {
        Self { mc, host }
    }
}

/// One per-core simulation kernel
///
/// The kernel set is closed: the `Sealed` supertrait lives in a
/// crate-private module, so only the kernels defined here can implement
/// this trait.
pub trait Kernel: sealed::Sealed {
    /// Multicast packet reception
    fn on_packet(&mut self, key: u32, payload: u32, ctx: &mut TickContext<'_>);

    /// Simulation timer interrupt
    fn on_tick(&mut self, ctx: &mut TickContext<'_>);

    /// Host-link frame reception
    fn on_host_frame(&mut self, _frame: &SdpFrame, _ctx: &mut TickContext<'_>) {}

    /// Whether the kernel has shut down cleanly
    fn finished(&self) -> bool {
        false
    }
}
