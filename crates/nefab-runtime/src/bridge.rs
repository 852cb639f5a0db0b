//! Tx / Rx bridge kernels between the multicast and host-link domains
//!
//! The Rx side injects host data as multicast, one dimension per timer
//! tick (the tick period is `dt / n_dims` so every dimension is visited
//! each simulation step). The Tx side aggregates filtered multicast values
//! and emits host-link frames.

use crate::clock::DisciplinedClock;
use crate::error::{Result, RuntimeError};
use crate::fixed::Value;
use crate::input::FilteredInput;
use crate::kernel::{Kernel, TickContext};
use log::{info, warn};
use nefab_fabric::schemas::{read_filters, read_keys, read_routes, RelaySystemParams};
use nefab_fabric::sdp::{CMD_DIMENSIONAL, TAG_UPLINK};
use nefab_fabric::{Packet, Region, RegionTable, SdpFrame};

/// Most dimensions an Rx bridge can carry
pub const RX_MAX_DIMS: usize = 64;

/// One Rx (host to fabric) bridge core
#[derive(Debug)]
pub struct RxBridgeKernel {
    keys: Vec<u32>,
    output: Vec<Value>,
    fresh: u64,
    current_dim: usize,
}

impl RxBridgeKernel {
    /// Create an Rx bridge emitting on the given keys
    pub fn new(keys: Vec<u32>) -> Result<Self> {
        if keys.is_empty() || keys.len() > RX_MAX_DIMS {
            return Err(RuntimeError::invalid_parameter(
                "n_dims",
                keys.len().to_string(),
                "1..=64",
            ));
        }
        info!("rx-bridge: configured {} dims", keys.len());
        Ok(Self {
            output: vec![Value::ZERO; keys.len()],
            fresh: 0,
            keys,
            current_dim: 0,
        })
    }

    /// Build an Rx bridge from its off-chip parameter regions
    pub fn from_regions(table: &RegionTable) -> Result<Self> {
        let mut r = table.reader(Region::System)?;
        let n_dims = r.word()? as usize;
        r.finish()?;
        let mut r = table.reader(Region::OutputKeys)?;
        let keys = read_keys(&mut r, n_dims)?;
        r.finish()?;
        Self::new(keys)
    }

    /// Dimensions carried
    pub fn n_dims(&self) -> usize {
        self.keys.len()
    }
}

impl crate::kernel::sealed::Sealed for RxBridgeKernel {}

impl Kernel for RxBridgeKernel {
    fn on_packet(&mut self, key: u32, _payload: u32, _ctx: &mut TickContext<'_>) {
        warn!("rx-bridge: dropped unrouted packet key {:#010x}", key);
    }

    fn on_tick(&mut self, ctx: &mut TickContext<'_>) {
        let bit = 1u64 << self.current_dim;
        if self.fresh & bit != 0 {
            ctx.mc.send(Packet::with_payload(
                self.keys[self.current_dim],
                self.output[self.current_dim].to_payload(),
            ));
            self.fresh &= !bit;
        }
        self.current_dim = (self.current_dim + 1) % self.keys.len();
    }

    fn on_host_frame(&mut self, frame: &SdpFrame, _ctx: &mut TickContext<'_>) {
        if frame.cmd != CMD_DIMENSIONAL {
            warn!("rx-bridge: ignoring host frame with cmd {}", frame.cmd);
            return;
        }
        let words = match frame.words() {
            Ok(words) => words,
            Err(e) => {
                warn!("rx-bridge: dropped malformed host frame: {}", e);
                return;
            }
        };
        // arg1 carries the starting dimension for partial updates
        let start = frame.arg1 as usize;
        if start + words.len() > self.keys.len() {
            warn!(
                "rx-bridge: dropped update of dims {}..{} (only {} dims)",
                start,
                start + words.len(),
                self.keys.len()
            );
            return;
        }
        for (i, &w) in words.iter().enumerate() {
            self.output[start + i] = Value::from_bits(w);
            self.fresh |= 1u64 << (start + i);
        }
    }
}

/// One Tx (fabric to host) bridge core
#[derive(Debug)]
pub struct TxBridgeKernel {
    input: FilteredInput,
    transmission_delay: u32,
    delay_remaining: u32,
    srce_addr: u16,
    srce_port: u8,
    clock: Option<DisciplinedClock>,
    end_tick: Option<u64>,
    tick: u64,
    finished: bool,
}

impl TxBridgeKernel {
    /// Create a Tx bridge aggregating the given input bank
    pub fn new(
        input: FilteredInput,
        transmission_delay: u32,
        srce_addr: u16,
        srce_port: u8,
    ) -> Result<Self> {
        if transmission_delay == 0 {
            return Err(RuntimeError::invalid_parameter(
                "transmission_delay",
                "0",
                ">= 1",
            ));
        }
        info!(
            "tx-bridge: configured {} dims, delay {}",
            input.n_dimensions(),
            transmission_delay
        );
        Ok(Self {
            delay_remaining: transmission_delay,
            input,
            transmission_delay,
            srce_addr,
            srce_port,
            clock: None,
            end_tick: None,
            tick: 0,
            finished: false,
        })
    }

    /// Build a Tx bridge from its off-chip parameter regions
    pub fn from_regions(table: &RegionTable, srce_addr: u16, srce_port: u8) -> Result<Self> {
        let mut r = table.reader(Region::System)?;
        let sys = RelaySystemParams::read(&mut r)?;
        r.finish()?;
        if sys.n_dims > u16::MAX as u32 {
            return Err(RuntimeError::invalid_config(
                "tx-bridge dimensionality exceeds 16 bits",
            ));
        }

        let mut r = table.reader(Region::Filters)?;
        let filters = read_filters(&mut r)?;
        r.finish()?;
        let mut r = table.reader(Region::FilterRoutes)?;
        let routes = read_routes(&mut r)?;
        r.finish()?;
        let input = FilteredInput::from_params(sys.n_dims as u16, &filters, &routes)?;

        Self::new(input, sys.transmission_delay, srce_addr, srce_port)
    }

    /// Attach a disciplined clock
    pub fn with_clock(mut self, clock: DisciplinedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Fix the simulation end tick
    pub fn with_end_tick(mut self, tick: u64) -> Self {
        self.end_tick = Some(tick);
        self
    }

    fn effective_end_tick(&self) -> Option<u64> {
        let stop = self.clock.as_ref().and_then(|c| c.stop_tick());
        match (self.end_tick, stop) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}

impl crate::kernel::sealed::Sealed for TxBridgeKernel {}

impl Kernel for TxBridgeKernel {
    fn on_packet(&mut self, key: u32, payload: u32, ctx: &mut TickContext<'_>) {
        if let Some(clock) = &mut self.clock {
            if clock.on_packet(key, payload, ctx.mc) {
                return;
            }
        }
        if !self.input.on_packet(key, payload) {
            warn!("tx-bridge: dropped unrouted packet key {:#010x}", key);
        }
    }

    fn on_tick(&mut self, ctx: &mut TickContext<'_>) {
        if self.finished {
            return;
        }
        if let Some(clock) = &self.clock {
            if !clock.is_armed() {
                return;
            }
        }
        if let Some(end) = self.effective_end_tick() {
            if self.tick >= end {
                self.finished = true;
                info!("tx-bridge: simulation complete after {} ticks", self.tick);
                return;
            }
        }

        self.input.step();
        self.delay_remaining -= 1;
        if self.delay_remaining == 0 {
            let words: Vec<i32> = self.input.input().iter().map(|v| v.to_bits()).collect();
            ctx.host.send(
                SdpFrame::to_host(self.srce_addr, self.srce_port, TAG_UPLINK, CMD_DIMENSIONAL)
                    .with_words(&words),
            );
            self.delay_remaining = self.transmission_delay;
        }
        self.tick += 1;
    }

    fn finished(&self) -> bool {
        self.finished
    }
}
