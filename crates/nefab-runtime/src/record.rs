//! Double-buffered spike-bitmap recording
//!
//! One frame of `ceil(n_neurons / 32)` words is written per tick: bit `n`
//! of the frame is set iff neuron `n` spiked. Two local frames alternate
//! so the frame being copied off-chip is never the one being marked.

use crate::error::{Result, RuntimeError};
use nefab_fabric::RecordingRegion;

/// Double-buffered writer of per-tick spike bitmaps
#[derive(Debug)]
pub struct RecordingBuffer {
    n_neurons: usize,
    frames: [Vec<u32>; 2],
    active: usize,
    region: RecordingRegion,
}

impl RecordingBuffer {
    /// Words per frame for a population of `n_neurons`
    pub fn frame_length(n_neurons: usize) -> usize {
        n_neurons.div_ceil(32)
    }

    /// Create a buffer writing into `region`
    pub fn new(n_neurons: usize, region: RecordingRegion) -> Result<Self> {
        if n_neurons == 0 {
            return Err(RuntimeError::invalid_parameter("n_neurons", "0", "> 0"));
        }
        let frame_length = Self::frame_length(n_neurons);
        if region.frame_length() != frame_length {
            return Err(RuntimeError::size_mismatch(
                "recording region frame",
                frame_length,
                region.frame_length(),
            ));
        }
        Ok(Self {
            n_neurons,
            frames: [vec![0; frame_length], vec![0; frame_length]],
            active: 0,
            region,
        })
    }

    /// Advance the write position by one frame and clear the new frame
    pub fn prepare(&mut self) {
        self.active ^= 1;
        self.frames[self.active].fill(0);
    }

    /// Mark neuron `n` as having spiked this tick
    pub fn mark_spike(&mut self, n: usize) {
        debug_assert!(n < self.n_neurons);
        self.frames[self.active][n / 32] |= 1 << (n % 32);
    }

    /// Copy the local frame to the off-chip region
    pub fn flush(&mut self) -> Result<()> {
        self.region.write_frame(&self.frames[self.active])?;
        Ok(())
    }

    /// The off-chip image, for host-side verification
    pub fn region(&self) -> &RecordingRegion {
        &self.region
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_length() {
        assert_eq!(RecordingBuffer::frame_length(1), 1);
        assert_eq!(RecordingBuffer::frame_length(32), 1);
        assert_eq!(RecordingBuffer::frame_length(33), 2);
        assert_eq!(RecordingBuffer::frame_length(100), 4);
    }

    #[test]
    fn test_region_frame_length_validated() {
        let region = RecordingRegion::new(1, 10);
        assert!(RecordingBuffer::new(100, region).is_err());
    }

    #[test]
    fn test_one_frame_per_tick_with_spike_bits() {
        let region = RecordingRegion::new(2, 4);
        let mut rec = RecordingBuffer::new(40, region).unwrap();

        rec.prepare();
        rec.mark_spike(0);
        rec.mark_spike(33);
        rec.flush().unwrap();

        rec.prepare();
        rec.flush().unwrap();

        rec.prepare();
        rec.mark_spike(31);
        rec.flush().unwrap();

        let region = rec.region();
        assert_eq!(region.frames_written(), 3);
        assert_eq!(region.frame(0), Some(&[0x0000_0001u32, 0x0000_0002][..]));
        assert_eq!(region.frame(1), Some(&[0u32, 0][..]));
        assert_eq!(region.frame(2), Some(&[0x8000_0000u32, 0][..]));
    }

    #[test]
    fn test_prepare_clears_stale_bits() {
        let region = RecordingRegion::new(1, 4);
        let mut rec = RecordingBuffer::new(8, region).unwrap();
        rec.prepare();
        rec.mark_spike(3);
        rec.flush().unwrap();
        // two prepares later the same local frame comes back around
        rec.prepare();
        rec.prepare();
        rec.flush().unwrap();
        assert_eq!(rec.region().frame(1), Some(&[0u32][..]));
    }
}
