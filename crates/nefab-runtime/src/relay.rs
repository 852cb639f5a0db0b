//! Filter kernel: a pure input-filter / relay node
//!
//! No neuron state. Accumulated dimensional input is low-pass filtered
//! and re-transmitted on the kernel's own output keys every
//! `transmission_delay` ticks.

use crate::clock::DisciplinedClock;
use crate::error::{Result, RuntimeError};
use crate::input::FilteredInput;
use crate::kernel::{Kernel, TickContext};
use log::{info, warn};
use nefab_fabric::schemas::{read_filters, read_keys, read_routes, RelaySystemParams};
use nefab_fabric::{Packet, Region, RegionTable};

/// One filter (relay) core
#[derive(Debug)]
pub struct FilterKernel {
    input: FilteredInput,
    output_keys: Vec<u32>,
    transmission_delay: u32,
    delay_remaining: u32,
    clock: Option<DisciplinedClock>,
    end_tick: Option<u64>,
    tick: u64,
    finished: bool,
}

impl FilterKernel {
    /// Create a relay over an input bank
    pub fn new(
        input: FilteredInput,
        output_keys: Vec<u32>,
        transmission_delay: u32,
    ) -> Result<Self> {
        if transmission_delay == 0 {
            return Err(RuntimeError::invalid_parameter(
                "transmission_delay",
                "0",
                ">= 1",
            ));
        }
        if output_keys.len() != input.n_dimensions() as usize {
            return Err(RuntimeError::size_mismatch(
                "output keys",
                input.n_dimensions() as usize,
                output_keys.len(),
            ));
        }
        info!(
            "filter: configured {} dims, delay {}",
            input.n_dimensions(),
            transmission_delay
        );
        Ok(Self {
            delay_remaining: transmission_delay,
            input,
            output_keys,
            transmission_delay,
            clock: None,
            end_tick: None,
            tick: 0,
            finished: false,
        })
    }

    /// Build a relay from its off-chip parameter regions
    pub fn from_regions(table: &RegionTable) -> Result<Self> {
        let mut r = table.reader(Region::System)?;
        let sys = RelaySystemParams::read(&mut r)?;
        r.finish()?;
        if sys.n_dims > u16::MAX as u32 {
            return Err(RuntimeError::invalid_config(
                "relay dimensionality exceeds 16 bits",
            ));
        }

        let mut r = table.reader(Region::Filters)?;
        let filters = read_filters(&mut r)?;
        r.finish()?;
        let mut r = table.reader(Region::FilterRoutes)?;
        let routes = read_routes(&mut r)?;
        r.finish()?;
        let input = FilteredInput::from_params(sys.n_dims as u16, &filters, &routes)?;

        let mut r = table.reader(Region::OutputKeys)?;
        let output_keys = read_keys(&mut r, sys.n_dims as usize)?;
        r.finish()?;

        Self::new(input, output_keys, sys.transmission_delay)
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

    /// Mutable access to the attached clock
    pub fn clock_mut(&mut self) -> Option<&mut DisciplinedClock> {
        self.clock.as_mut()
    }

    fn effective_end_tick(&self) -> Option<u64> {
        let stop = self.clock.as_ref().and_then(|c| c.stop_tick());
        match (self.end_tick, stop) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}

impl crate::kernel::sealed::Sealed for FilterKernel {}

impl Kernel for FilterKernel {
    fn on_packet(&mut self, key: u32, payload: u32, ctx: &mut TickContext<'_>) {
        if let Some(clock) = &mut self.clock {
            if clock.on_packet(key, payload, ctx.mc) {
                return;
            }
        }
        if !self.input.on_packet(key, payload) {
            warn!("filter: dropped unrouted packet key {:#010x}", key);
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
                info!("filter: simulation complete after {} ticks", self.tick);
                return;
            }
        }

        self.input.step();
        self.delay_remaining -= 1;
        if self.delay_remaining == 0 {
            for (d, &key) in self.output_keys.iter().enumerate() {
                ctx.mc
                    .send(Packet::with_payload(key, self.input.input()[d].to_payload()));
            }
            self.delay_remaining = self.transmission_delay;
        }
        self.tick += 1;
    }

    fn finished(&self) -> bool {
        self.finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixed::Value;
    use crate::input::{Filter, FilterRoute};
    use nefab_fabric::{VecHostTx, VecTx};

    fn half_filter_bank() -> FilteredInput {
        let half = Value::from_f32(0.5);
        FilteredInput::new(
            1,
            vec![Filter::new(half, half, 1)],
            [FilterRoute {
                key: 0x1000,
                mask: 0xFF00,
                filter_id: 0,
                dimension_mask: 0xFF,
            }],
        )
        .unwrap()
    }

    #[test]
    fn test_iir_decay_sequence() {
        let mut kernel = FilterKernel::new(half_filter_bank(), vec![0x9000], 1).unwrap();
        let mut mc = VecTx::new();
        let mut host = VecHostTx::new();

        let mut ctx = TickContext::new(&mut mc, &mut host);
        kernel.on_packet(0x1000, Value::ONE.to_payload(), &mut ctx);
        for _ in 0..4 {
            let mut ctx = TickContext::new(&mut mc, &mut host);
            kernel.on_tick(&mut ctx);
        }

        let values: Vec<Value> = mc
            .sent
            .iter()
            .map(|p| Value::from_payload(p.payload_or_zero()))
            .collect();
        assert_eq!(
            values,
            vec![
                Value::from_f32(0.5),
                Value::from_f32(0.25),
                Value::from_f32(0.125),
                Value::from_f32(0.0625),
            ]
        );
        assert!(mc.sent.iter().all(|p| p.key == 0x9000));
    }

    #[test]
    fn test_transmission_delay_countdown() {
        let mut kernel = FilterKernel::new(half_filter_bank(), vec![0x9000], 3).unwrap();
        let mut mc = VecTx::new();
        let mut host = VecHostTx::new();
        for _ in 0..9 {
            let mut ctx = TickContext::new(&mut mc, &mut host);
            kernel.on_tick(&mut ctx);
        }
        // emits on ticks 2, 5, 8
        assert_eq!(mc.sent.len(), 3);
    }

    #[test]
    fn test_zero_delay_rejected() {
        assert!(FilterKernel::new(half_filter_bank(), vec![1], 0).is_err());
    }

    #[test]
    fn test_from_regions() {
        let half = Value::from_f32(0.5).to_bits() as u32;
        let mut table = RegionTable::new();
        table.insert(Region::System, vec![1, 1]);
        table.insert(Region::Filters, vec![1, half, half, 0]);
        table.insert(
            Region::FilterRoutes,
            vec![1, 0x1000, 0xFF00, 0, 0xFF],
        );
        table.insert(Region::OutputKeys, vec![0x9000]);

        let kernel = FilterKernel::from_regions(&table).unwrap();
        assert_eq!(kernel.output_keys, vec![0x9000]);
        assert_eq!(kernel.transmission_delay, 1);
    }
}
