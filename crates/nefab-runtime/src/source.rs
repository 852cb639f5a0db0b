//! Value-source kernel: plays back a precomputed time-series
//!
//! The series lives off-chip as a sequence of blocks; two local slots are
//! double-buffered through the DMA engine so the next block is already
//! resident when the current one runs out. The partial block, if any, is
//! the block at index `n_full_blocks` and has `partial_block` frames.

use crate::clock::DisciplinedClock;
use crate::error::{Result, RuntimeError};
use crate::fixed::Value;
use crate::kernel::{Kernel, TickContext};
use log::{info, warn};
use nefab_fabric::schemas::SourceParams;
use nefab_fabric::{DmaEngine, Packet, Region, RegionTable};

/// Playback state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    /// Emitting frames
    Running,
    /// Aperiodic playback reached its last frame
    Stopping,
}

/// One local double-buffer slot
#[derive(Debug, Default)]
struct Slot {
    data: Vec<Value>,
    /// Frames resident in this slot
    length: u32,
    /// Next frame to emit from this slot
    current_pos: u32,
}

/// One value-source core
#[derive(Debug)]
pub struct ValueSourceKernel {
    params: SourceParams,
    keys: Vec<u32>,
    dram: Vec<i32>,
    dma: DmaEngine,
    current: Slot,
    next: Slot,
    current_block: u32,
    state: SourceState,
    step_countdown: u32,
    clock: Option<DisciplinedClock>,
    finished: bool,
}

impl ValueSourceKernel {
    /// Create a source over the off-chip sample image
    ///
    /// `dram` holds `total_frames * n_dims` fixed-point words, blocks
    /// back-to-back.
    pub fn new(params: SourceParams, keys: Vec<u32>, dram: Vec<i32>) -> Result<Self> {
        if params.n_dims == 0 {
            return Err(RuntimeError::invalid_parameter("n_dims", "0", "> 0"));
        }
        if params.block_length == 0 {
            return Err(RuntimeError::invalid_parameter("block_length", "0", "> 0"));
        }
        if params.time_step == 0 {
            return Err(RuntimeError::invalid_parameter("time_step", "0", ">= 1"));
        }
        if params.total_frames() == 0 {
            return Err(RuntimeError::invalid_config("source holds no frames"));
        }
        if params.partial_block >= params.block_length {
            return Err(RuntimeError::invalid_parameter(
                "partial_block",
                params.partial_block.to_string(),
                "< block_length",
            ));
        }
        if keys.len() != params.n_dims as usize {
            return Err(RuntimeError::size_mismatch(
                "source keys",
                params.n_dims as usize,
                keys.len(),
            ));
        }
        let expected_words = params.total_frames() as usize * params.n_dims as usize;
        if dram.len() != expected_words {
            return Err(RuntimeError::size_mismatch(
                "source sample image",
                expected_words,
                dram.len(),
            ));
        }

        let mut kernel = Self {
            step_countdown: params.time_step,
            params,
            keys,
            dram,
            dma: DmaEngine::new(),
            current: Slot::default(),
            next: Slot::default(),
            current_block: 0,
            state: SourceState::Running,
            clock: None,
            finished: false,
        };
        // block 0 must be resident before the first tick
        kernel.fetch_into_current(0)?;
        info!(
            "source: configured {} dims, {} frames, periodic {}",
            kernel.params.n_dims,
            kernel.params.total_frames(),
            kernel.params.periodic
        );
        Ok(kernel)
    }

    /// Build a source from its off-chip parameter regions plus the sample
    /// image
    pub fn from_regions(table: &RegionTable, dram: Vec<i32>) -> Result<Self> {
        let mut r = table.reader(Region::Source)?;
        let params = SourceParams::read(&mut r)?;
        r.finish()?;

        let mut r = table.reader(Region::OutputKeys)?;
        let keys = nefab_fabric::schemas::read_keys(&mut r, params.n_dims as usize)?;
        r.finish()?;

        Self::new(params, keys, dram)
    }

    /// Attach a disciplined clock
    pub fn with_clock(mut self, clock: DisciplinedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Current playback state
    pub fn state(&self) -> SourceState {
        self.state
    }

    fn block_frames(&self, block: u32) -> u32 {
        if block == self.params.n_full_blocks {
            self.params.partial_block
        } else {
            self.params.block_length
        }
    }

    fn block_word_offset(&self, block: u32) -> usize {
        block as usize * self.params.block_length as usize * self.params.n_dims as usize
    }

    fn fetch_into_current(&mut self, block: u32) -> Result<()> {
        let frames = self.block_frames(block);
        self.dma.request(
            self.block_word_offset(block),
            frames as usize * self.params.n_dims as usize,
        )?;
        if let Some((_tag, words)) = self.dma.service(&self.dram)? {
            self.current.data = words.into_iter().map(Value::from_bits).collect();
            self.current.length = frames;
            self.current.current_pos = 0;
        }
        Ok(())
    }

    /// Block to prefetch while the current one plays, if any
    fn next_block(&self) -> Option<u32> {
        let n_blocks = self.params.n_blocks();
        if self.current_block + 1 < n_blocks {
            Some(self.current_block + 1)
        } else if self.params.periodic && n_blocks > 1 {
            Some(0)
        } else {
            None
        }
    }

    fn prefetch_next(&mut self) -> Result<()> {
        let Some(block) = self.next_block() else {
            return Ok(());
        };
        let frames = self.block_frames(block);
        self.dma.request(
            self.block_word_offset(block),
            frames as usize * self.params.n_dims as usize,
        )?;
        if let Some((_tag, words)) = self.dma.service(&self.dram)? {
            self.next.data = words.into_iter().map(Value::from_bits).collect();
            self.next.length = frames;
            self.next.current_pos = 0;
        }
        Ok(())
    }

    fn advance(&mut self) {
        self.current.current_pos += 1;
        debug_assert!(self.current.current_pos <= self.current.length);
        if self.current.current_pos < self.current.length {
            return;
        }
        let n_blocks = self.params.n_blocks();
        if n_blocks == 1 && self.params.periodic {
            self.current.current_pos = 0;
        } else if !self.params.periodic && self.current_block + 1 == n_blocks {
            self.state = SourceState::Stopping;
            self.finished = true;
            info!("source: aperiodic playback complete");
        } else {
            std::mem::swap(&mut self.current, &mut self.next);
            self.current.current_pos = 0;
            self.current_block = (self.current_block + 1) % n_blocks;
        }
    }
}

impl crate::kernel::sealed::Sealed for ValueSourceKernel {}

impl Kernel for ValueSourceKernel {
    fn on_packet(&mut self, key: u32, payload: u32, ctx: &mut TickContext<'_>) {
        if let Some(clock) = &mut self.clock {
            if clock.on_packet(key, payload, ctx.mc) {
                return;
            }
        }
        warn!("source: dropped unrouted packet key {:#010x}", key);
    }

    fn on_tick(&mut self, ctx: &mut TickContext<'_>) {
        if self.finished || self.state == SourceState::Stopping {
            return;
        }
        if let Some(clock) = &self.clock {
            if !clock.is_armed() {
                return;
            }
        }
        self.step_countdown -= 1;
        if self.step_countdown > 0 {
            return;
        }
        self.step_countdown = self.params.time_step;

        let n_dims = self.params.n_dims as usize;
        let base = self.current.current_pos as usize * n_dims;
        for d in 0..n_dims {
            ctx.mc.send(Packet::with_payload(
                self.keys[d],
                self.current.data[base + d].to_payload(),
            ));
        }

        if self.current.current_pos == 0 {
            if let Err(e) = self.prefetch_next() {
                warn!("source: prefetch failed: {}", e);
                self.finished = true;
                return;
            }
        }

        self.advance();
    }

    fn finished(&self) -> bool {
        self.finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nefab_fabric::{VecHostTx, VecTx};

    fn frames_of(samples: &[f32]) -> Vec<i32> {
        samples.iter().map(|&v| Value::from_f32(v).to_bits()).collect()
    }

    fn drive(kernel: &mut ValueSourceKernel, ticks: usize) -> Vec<Packet> {
        let mut mc = VecTx::new();
        let mut host = VecHostTx::new();
        for _ in 0..ticks {
            let mut ctx = TickContext::new(&mut mc, &mut host);
            kernel.on_tick(&mut ctx);
        }
        mc.sent
    }

    fn single_block_params(periodic: bool) -> SourceParams {
        SourceParams {
            n_dims: 1,
            block_length: 4,
            n_full_blocks: 1,
            partial_block: 0,
            periodic,
            time_step: 1,
        }
    }

    #[test]
    fn test_single_block_periodic_cycles_forever() {
        let samples = frames_of(&[0.25, 0.5, 0.75, 1.0]);
        let mut kernel =
            ValueSourceKernel::new(single_block_params(true), vec![0x42], samples.clone()).unwrap();

        let sent = drive(&mut kernel, 12);
        assert_eq!(sent.len(), 12);
        for (t, p) in sent.iter().enumerate() {
            assert_eq!(p.key, 0x42);
            assert_eq!(p.payload, Some(samples[t % 4] as u32));
        }
        assert_eq!(kernel.state(), SourceState::Running);
    }

    #[test]
    fn test_aperiodic_stops_at_end() {
        let samples = frames_of(&[0.25, 0.5, 0.75, 1.0]);
        let mut kernel =
            ValueSourceKernel::new(single_block_params(false), vec![0x42], samples).unwrap();

        let sent = drive(&mut kernel, 10);
        assert_eq!(sent.len(), 4);
        assert_eq!(kernel.state(), SourceState::Stopping);
        assert!(kernel.finished());
    }

    #[test]
    fn test_multi_block_with_partial_boundary() {
        // two full blocks of 2 frames plus a partial block of 1 frame
        let params = SourceParams {
            n_dims: 1,
            block_length: 2,
            n_full_blocks: 2,
            partial_block: 1,
            periodic: true,
            time_step: 1,
        };
        let samples = frames_of(&[0.1, 0.2, 0.3, 0.4, 0.5]);
        let mut kernel = ValueSourceKernel::new(params, vec![7], samples.clone()).unwrap();

        let sent = drive(&mut kernel, 10);
        let expected: Vec<u32> = (0..10).map(|t| samples[t % 5] as u32).collect();
        let got: Vec<u32> = sent.iter().map(|p| p.payload_or_zero()).collect();
        assert_eq!(got, expected);
    }

    #[test]
    fn test_aperiodic_multi_block_ends_after_partial() {
        let params = SourceParams {
            n_dims: 2,
            block_length: 2,
            n_full_blocks: 1,
            partial_block: 1,
            periodic: false,
            time_step: 1,
        };
        let samples = frames_of(&[0.1, 0.2, 0.3, 0.4, 0.5, 0.6]);
        let mut kernel = ValueSourceKernel::new(params, vec![1, 2], samples).unwrap();

        let sent = drive(&mut kernel, 8);
        // 3 frames of 2 dims each
        assert_eq!(sent.len(), 6);
        assert!(kernel.finished());
    }

    #[test]
    fn test_time_step_divides_emission() {
        let samples = frames_of(&[0.25, 0.5, 0.75, 1.0]);
        let mut params = single_block_params(true);
        params.time_step = 3;
        let mut kernel = ValueSourceKernel::new(params, vec![9], samples).unwrap();

        let sent = drive(&mut kernel, 9);
        assert_eq!(sent.len(), 3);
    }

    #[test]
    fn test_image_size_validated() {
        let err = ValueSourceKernel::new(
            single_block_params(true),
            vec![1],
            frames_of(&[0.1, 0.2]), // 2 words, 4 expected
        )
        .unwrap_err();
        assert!(matches!(err, RuntimeError::SizeMismatch { .. }));
    }
}
