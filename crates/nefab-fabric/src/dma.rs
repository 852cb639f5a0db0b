//! Background DMA transfer model
//!
//! Models the fabric's transfer unit with an explicit completion step so
//! double-buffering kernels can be driven deterministically: `request`
//! enqueues a read, `service` completes it. A core owns one engine and may
//! have at most one transfer outstanding.

use crate::error::{FabricError, Result};

/// Tag identifying a completed transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaTag(u32);

/// One queued read request, in words
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DmaRequest {
    tag: DmaTag,
    start: usize,
    len: usize,
}

/// The per-core DMA engine
#[derive(Debug, Default)]
pub struct DmaEngine {
    pending: Option<DmaRequest>,
    next_tag: u32,
}

impl DmaEngine {
    /// Create an idle engine
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether no transfer is outstanding
    pub fn is_idle(&self) -> bool {
        self.pending.is_none()
    }

    /// Queue a read of `len` words starting at word offset `start`
    ///
    /// Issuing a second request while one is outstanding is a programming
    /// invariant violation.
    pub fn request(&mut self, start: usize, len: usize) -> Result<DmaTag> {
        debug_assert!(self.pending.is_none(), "DMA request while busy");
        if self.pending.is_some() {
            return Err(FabricError::DmaBusy);
        }
        let tag = DmaTag(self.next_tag);
        self.next_tag = self.next_tag.wrapping_add(1);
        self.pending = Some(DmaRequest { tag, start, len });
        Ok(tag)
    }

    /// Complete the outstanding transfer against the off-chip image
    pub fn service(&mut self, source: &[i32]) -> Result<Option<(DmaTag, Vec<i32>)>> {
        let Some(req) = self.pending.take() else {
            return Ok(None);
        };
        let end = req.start.checked_add(req.len).ok_or(FabricError::DmaRange {
            start: req.start,
            len: req.len,
            source_len: source.len(),
        })?;
        if end > source.len() {
            return Err(FabricError::DmaRange {
                start: req.start,
                len: req.len,
                source_len: source.len(),
            });
        }
        Ok(Some((req.tag, source[req.start..end].to_vec())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_then_service() {
        let dram: Vec<i32> = (0..10).collect();
        let mut dma = DmaEngine::new();
        assert!(dma.is_idle());

        let tag = dma.request(4, 3).unwrap();
        assert!(!dma.is_idle());

        let (done, words) = dma.service(&dram).unwrap().unwrap();
        assert_eq!(done, tag);
        assert_eq!(words, vec![4, 5, 6]);
        assert!(dma.is_idle());
        assert!(dma.service(&dram).unwrap().is_none());
    }

    #[test]
    fn test_out_of_range_request() {
        let dram: Vec<i32> = (0..4).collect();
        let mut dma = DmaEngine::new();
        dma.request(2, 3).unwrap();
        assert!(matches!(
            dma.service(&dram),
            Err(FabricError::DmaRange { start: 2, len: 3, source_len: 4 })
        ));
    }
}
