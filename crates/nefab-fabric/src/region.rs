//! Off-chip parameter region table and bounds-checked word reader
//!
//! Every core reads its static parameters at startup from a table of
//! off-chip regions. Regions are plain arrays of 32-bit words with no
//! header; each kernel's schema fixes their interpretation. Reads are
//! bounds-checked and a region with trailing unread words fails
//! initialisation (impossible region size).

use crate::error::{FabricError, Result};
use core::fmt;
use std::collections::BTreeMap;

/// Identifier of one parameter region within a core's region table
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Region {
    /// Kernel-wide scalar parameters
    System,
    /// Per-neuron bias currents
    Bias,
    /// Encoder matrix, row-major
    Encoders,
    /// Decoder matrix, row-major
    Decoders,
    /// Decoded-output routing keys
    OutputKeys,
    /// Input filter coefficient table
    Filters,
    /// Input filter route table
    FilterRoutes,
    /// Inhibitory filter coefficient table
    InhibFilters,
    /// Inhibitory filter route table
    InhibRoutes,
    /// PES learning parameters
    Pes,
    /// Spike recording pointer
    Recording,
    /// Value-source playback geometry
    Source,
    /// Simulation-controller node key table
    NodeTable,
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Region::System => "system",
            Region::Bias => "bias",
            Region::Encoders => "encoders",
            Region::Decoders => "decoders",
            Region::OutputKeys => "output-keys",
            Region::Filters => "filters",
            Region::FilterRoutes => "filter-routes",
            Region::InhibFilters => "inhib-filters",
            Region::InhibRoutes => "inhib-routes",
            Region::Pes => "pes",
            Region::Recording => "recording",
            Region::Source => "source",
            Region::NodeTable => "node-table",
        };
        f.write_str(name)
    }
}

/// The per-core table of parameter regions
///
/// Read-only to kernels; the boot loader that places the word images is an
/// external collaborator.
#[derive(Debug, Default, Clone)]
pub struct RegionTable {
    regions: BTreeMap<Region, Vec<u32>>,
}

impl RegionTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Place a region's word image, replacing any previous image
    pub fn insert(&mut self, region: Region, words: Vec<u32>) -> &mut Self {
        self.regions.insert(region, words);
        self
    }

    /// Whether the table holds the given region
    pub fn contains(&self, region: Region) -> bool {
        self.regions.contains_key(&region)
    }

    /// Begin reading a region; missing regions are init-fatal
    pub fn reader(&self, region: Region) -> Result<WordReader<'_>> {
        let words = self
            .regions
            .get(&region)
            .ok_or(FabricError::MissingRegion { region })?;
        Ok(WordReader {
            region,
            words,
            pos: 0,
        })
    }

    /// Begin reading a region that may legitimately be absent
    pub fn reader_opt(&self, region: Region) -> Option<WordReader<'_>> {
        self.regions.get(&region).map(|words| WordReader {
            region,
            words,
            pos: 0,
        })
    }
}

/// Sequential bounds-checked reader over one region's words
#[derive(Debug)]
pub struct WordReader<'a> {
    region: Region,
    words: &'a [u32],
    pos: usize,
}

impl<'a> WordReader<'a> {
    /// Wrap a raw word slice, for kernels configured without a full table
    pub fn from_words(region: Region, words: &'a [u32]) -> Self {
        Self {
            region,
            words,
            pos: 0,
        }
    }

    /// Region this reader walks
    pub fn region(&self) -> Region {
        self.region
    }

    /// Words not yet consumed
    pub fn remaining(&self) -> usize {
        self.words.len() - self.pos
    }

    /// Read the next word
    pub fn word(&mut self) -> Result<u32> {
        let slice = self.words_slice(1)?;
        Ok(slice[0])
    }

    /// Read the next word as a signed fixed-point bit pattern
    pub fn word_signed(&mut self) -> Result<i32> {
        Ok(self.word()? as i32)
    }

    /// Read the next `n` words as a slice
    pub fn words_slice(&mut self, n: usize) -> Result<&'a [u32]> {
        if self.remaining() < n {
            return Err(FabricError::RegionTruncated {
                region: self.region,
                needed: n,
                available: self.remaining(),
            });
        }
        let slice = &self.words[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    /// Read the next `n` words as signed bit patterns
    pub fn words_signed(&mut self, n: usize) -> Result<Vec<i32>> {
        Ok(self.words_slice(n)?.iter().map(|&w| w as i32).collect())
    }

    /// Finish reading; trailing words mean the image and schema disagree
    pub fn finish(self) -> Result<()> {
        if self.remaining() != 0 {
            return Err(FabricError::RegionTrailing {
                region: self.region,
                unread: self.remaining(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_sequential() {
        let mut table = RegionTable::new();
        table.insert(Region::System, vec![1, 2, 3]);

        let mut r = table.reader(Region::System).unwrap();
        assert_eq!(r.word().unwrap(), 1);
        assert_eq!(r.words_slice(2).unwrap(), &[2, 3]);
        assert!(r.finish().is_ok());
    }

    #[test]
    fn test_truncation_detected() {
        let mut table = RegionTable::new();
        table.insert(Region::Bias, vec![5]);

        let mut r = table.reader(Region::Bias).unwrap();
        assert_eq!(r.word().unwrap(), 5);
        assert!(matches!(
            r.word(),
            Err(FabricError::RegionTruncated {
                region: Region::Bias,
                needed: 1,
                available: 0,
            })
        ));
    }

    #[test]
    fn test_trailing_words_detected() {
        let mut table = RegionTable::new();
        table.insert(Region::Filters, vec![1, 2]);

        let mut r = table.reader(Region::Filters).unwrap();
        let _ = r.word().unwrap();
        assert!(matches!(
            r.finish(),
            Err(FabricError::RegionTrailing { unread: 1, .. })
        ));
    }

    #[test]
    fn test_missing_region() {
        let table = RegionTable::new();
        assert!(matches!(
            table.reader(Region::Pes),
            Err(FabricError::MissingRegion { region: Region::Pes })
        ));
        assert!(table.reader_opt(Region::Pes).is_none());
    }

    #[test]
    fn test_signed_reads() {
        let mut table = RegionTable::new();
        table.insert(Region::Bias, vec![0xFFFF_FFFF, 0x0000_8000]);
        let mut r = table.reader(Region::Bias).unwrap();
        assert_eq!(r.word_signed().unwrap(), -1);
        assert_eq!(r.word_signed().unwrap(), 0x8000);
    }
}
