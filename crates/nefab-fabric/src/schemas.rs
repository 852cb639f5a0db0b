//! Parameter-region schemas for every kernel
//!
//! These structs are the raw word-level view of the off-chip parameter
//! regions; fixed-point words stay as `i32` bit patterns here and are
//! interpreted by the runtime crate. Each `read` consumes exactly the words
//! its schema covers so callers can compose readers and then `finish()`.

use crate::error::{FabricError, Result};
use crate::region::WordReader;

/// System region of an ensemble kernel (11 words)
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SystemParams {
    /// Input dimensionality
    pub n_input_dims: u32,
    /// Output dimensionality
    pub n_output_dims: u32,
    /// Population size
    pub n_neurons: u32,
    /// Simulation timestep in microseconds
    pub machine_timestep_us: u32,
    /// Refractory period in ticks
    pub t_ref: u32,
    /// `dt / t_rc` as a fixed-point bit pattern
    pub dt_over_t_rc: i32,
    /// Number of input filters (cross-checked against the filter region)
    pub n_filters: u32,
    /// Number of filter routes (cross-checked against the route region)
    pub n_filter_keys: u32,
    /// Whether spike recording is enabled
    pub record_spikes: bool,
    /// Inhibitory input dimensionality (0 disables the inhibitory term)
    pub n_inhibitory_dims: u32,
    /// Inhibitory gain as a fixed-point bit pattern
    pub inhibitory_gain: i32,
}

impl SystemParams {
    /// Read the system region words
    pub fn read(r: &mut WordReader<'_>) -> Result<Self> {
        Ok(Self {
            n_input_dims: r.word()?,
            n_output_dims: r.word()?,
            n_neurons: r.word()?,
            machine_timestep_us: r.word()?,
            t_ref: r.word()?,
            dt_over_t_rc: r.word_signed()?,
            n_filters: r.word()?,
            n_filter_keys: r.word()?,
            record_spikes: r.word()? != 0,
            n_inhibitory_dims: r.word()?,
            inhibitory_gain: r.word_signed()?,
        })
    }
}

/// One entry of a filter coefficient region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FilterParams {
    /// Decay coefficient `a` as a fixed-point bit pattern
    pub a: i32,
    /// `1 - a` as a fixed-point bit pattern
    pub one_minus_a: i32,
    /// Replacement (latest-wins) accumulation instead of addition
    pub modulatory: bool,
}

/// Read a filter region: a count word followed by 3-word entries
pub fn read_filters(r: &mut WordReader<'_>) -> Result<Vec<FilterParams>> {
    let count = r.word()? as usize;
    let mut filters = Vec::with_capacity(count);
    for _ in 0..count {
        filters.push(FilterParams {
            a: r.word_signed()?,
            one_minus_a: r.word_signed()?,
            modulatory: r.word()? != 0,
        });
    }
    Ok(filters)
}

/// One entry of a filter route region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RouteParams {
    /// Key the masked incoming key must equal
    pub key: u32,
    /// Mask applied to the incoming key before comparison
    pub mask: u32,
    /// Target filter index
    pub filter_id: u16,
    /// Mask extracting the dimension index from the incoming key
    pub dimension_mask: u32,
}

/// Read a route region: a count word followed by 4-word entries
pub fn read_routes(r: &mut WordReader<'_>) -> Result<Vec<RouteParams>> {
    let count = r.word()? as usize;
    let mut routes = Vec::with_capacity(count);
    for _ in 0..count {
        let key = r.word()?;
        let mask = r.word()?;
        let filter_id = r.word()?;
        let dimension_mask = r.word()?;
        if filter_id > u16::MAX as u32 {
            return Err(FabricError::invalid_format(format!(
                "route filter id {} exceeds 16 bits",
                filter_id
            )));
        }
        routes.push(RouteParams {
            key,
            mask,
            filter_id: filter_id as u16,
            dimension_mask,
        });
    }
    Ok(routes)
}

/// Read a key table of `n` routing keys
pub fn read_keys(r: &mut WordReader<'_>, n: usize) -> Result<Vec<u32>> {
    Ok(r.words_slice(n)?.to_vec())
}

/// PES layout tag selecting the on-spike variant
pub const PES_LAYOUT_ON_SPIKE: u32 = 0;

/// PES layout tag selecting the filtered-activity variant
pub const PES_LAYOUT_FILTERED_ACTIVITY: u32 = 1;

/// PES region (5 words: layout tag then the parameter quad)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PesParams {
    /// Layout tag; anything but the two known tags is init-fatal
    pub layout: u32,
    /// Learning rate as a fixed-point bit pattern
    pub learning_rate: i32,
    /// Activity decay as a fixed-point bit pattern (filtered-activity only)
    pub activity_decay: i32,
    /// Index of the error-signal filter within the input filter bank
    pub error_filter_id: u16,
    /// Column offset into the decoder matrix
    pub decoder_output_offset: u16,
}

impl PesParams {
    /// Read the PES region words, rejecting ambiguous layouts
    pub fn read(r: &mut WordReader<'_>) -> Result<Self> {
        let layout = r.word()?;
        if layout != PES_LAYOUT_ON_SPIKE && layout != PES_LAYOUT_FILTERED_ACTIVITY {
            return Err(FabricError::invalid_format(format!(
                "ambiguous PES layout tag {}",
                layout
            )));
        }
        let learning_rate = r.word_signed()?;
        let activity_decay = r.word_signed()?;
        let error_filter_id = r.word()?;
        let decoder_output_offset = r.word()?;
        if error_filter_id > u16::MAX as u32 || decoder_output_offset > u16::MAX as u32 {
            return Err(FabricError::invalid_format(
                "PES filter id or decoder offset exceeds 16 bits",
            ));
        }
        Ok(Self {
            layout,
            learning_rate,
            activity_decay,
            error_filter_id: error_filter_id as u16,
            decoder_output_offset: decoder_output_offset as u16,
        })
    }
}

/// Value-source region (6 words of playback geometry)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SourceParams {
    /// Samples per frame
    pub n_dims: u32,
    /// Frames per full block
    pub block_length: u32,
    /// Number of full blocks
    pub n_full_blocks: u32,
    /// Frames in the trailing partial block (0 for none)
    pub partial_block: u32,
    /// Wrap to the first frame after the last
    pub periodic: bool,
    /// Emission period in ticks
    pub time_step: u32,
}

impl SourceParams {
    /// Read the source region words
    pub fn read(r: &mut WordReader<'_>) -> Result<Self> {
        Ok(Self {
            n_dims: r.word()?,
            block_length: r.word()?,
            n_full_blocks: r.word()?,
            partial_block: r.word()?,
            periodic: r.word()? != 0,
            time_step: r.word()?,
        })
    }

    /// Total playback frames across all blocks
    pub fn total_frames(&self) -> u64 {
        self.n_full_blocks as u64 * self.block_length as u64 + self.partial_block as u64
    }

    /// Number of blocks including the partial one
    pub fn n_blocks(&self) -> u32 {
        self.n_full_blocks + u32::from(self.partial_block > 0)
    }
}

/// System words shared by the filter and Tx-bridge kernels (2 words)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RelaySystemParams {
    /// Dimensionality of the filtered vector
    pub n_dims: u32,
    /// Ticks between transmissions
    pub transmission_delay: u32,
}

impl RelaySystemParams {
    /// Read the relay system words
    pub fn read(r: &mut WordReader<'_>) -> Result<Self> {
        Ok(Self {
            n_dims: r.word()?,
            transmission_delay: r.word()?,
        })
    }
}

/// Key triple for one node in the controller's table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NodeKeys {
    /// Key the controller pings the node on
    pub ping_key: u32,
    /// Key the node answers on
    pub pong_key: u32,
    /// Key the controller sends phase corrections on
    pub correction_key: u32,
}

/// Controller node-table region: start/stop broadcast keys, a count word,
/// then 3-word node entries
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NodeTableParams {
    /// Broadcast key for synchronized start
    pub start_at_key: u32,
    /// Broadcast key for synchronized stop
    pub stop_at_key: u32,
    /// Per-node key triples
    pub nodes: Vec<NodeKeys>,
}

impl NodeTableParams {
    /// Read the node-table region words
    pub fn read(r: &mut WordReader<'_>) -> Result<Self> {
        let start_at_key = r.word()?;
        let stop_at_key = r.word()?;
        let count = r.word()? as usize;
        let mut nodes = Vec::with_capacity(count);
        for _ in 0..count {
            nodes.push(NodeKeys {
                ping_key: r.word()?,
                pong_key: r.word()?,
                correction_key: r.word()?,
            });
        }
        Ok(Self {
            start_at_key,
            stop_at_key,
            nodes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::Region;

    #[test]
    fn test_system_params_read() {
        let words = vec![2, 3, 100, 1000, 2, 3277, 1, 1, 1, 0, 0];
        let mut r = WordReader::from_words(Region::System, &words);
        let sys = SystemParams::read(&mut r).unwrap();
        r.finish().unwrap();
        assert_eq!(sys.n_input_dims, 2);
        assert_eq!(sys.n_output_dims, 3);
        assert_eq!(sys.n_neurons, 100);
        assert_eq!(sys.t_ref, 2);
        assert_eq!(sys.dt_over_t_rc, 3277);
        assert!(sys.record_spikes);
        assert_eq!(sys.n_inhibitory_dims, 0);
    }

    #[test]
    fn test_filters_and_routes_read() {
        let words = vec![1, 16384, 16384, 0];
        let mut r = WordReader::from_words(Region::Filters, &words);
        let filters = read_filters(&mut r).unwrap();
        r.finish().unwrap();
        assert_eq!(filters.len(), 1);
        assert_eq!(filters[0].a, 16384);
        assert!(!filters[0].modulatory);

        let words = vec![1, 0x1000_0000, 0xFFFF_FFF0, 0, 0xF];
        let mut r = WordReader::from_words(Region::FilterRoutes, &words);
        let routes = read_routes(&mut r).unwrap();
        r.finish().unwrap();
        assert_eq!(routes[0].filter_id, 0);
        assert_eq!(routes[0].dimension_mask, 0xF);
    }

    #[test]
    fn test_pes_rejects_ambiguous_layout() {
        let words = vec![7, 33, 0, 0, 0];
        let mut r = WordReader::from_words(Region::Pes, &words);
        assert!(matches!(
            PesParams::read(&mut r),
            Err(FabricError::InvalidFormat { .. })
        ));

        let words = vec![PES_LAYOUT_ON_SPIKE, 33, 0, 0, 0];
        let mut r = WordReader::from_words(Region::Pes, &words);
        let pes = PesParams::read(&mut r).unwrap();
        assert_eq!(pes.learning_rate, 33);
    }

    #[test]
    fn test_source_geometry() {
        let words = vec![1, 4, 1, 0, 1, 1];
        let mut r = WordReader::from_words(Region::Source, &words);
        let src = SourceParams::read(&mut r).unwrap();
        r.finish().unwrap();
        assert_eq!(src.total_frames(), 4);
        assert_eq!(src.n_blocks(), 1);
        assert!(src.periodic);

        let partial = SourceParams {
            n_dims: 2,
            block_length: 8,
            n_full_blocks: 3,
            partial_block: 5,
            periodic: false,
            time_step: 1,
        };
        assert_eq!(partial.total_frames(), 29);
        assert_eq!(partial.n_blocks(), 4);
    }

    #[test]
    fn test_node_table_read() {
        let words = vec![100, 101, 2, 1, 2, 3, 4, 5, 6];
        let mut r = WordReader::from_words(Region::NodeTable, &words);
        let table = NodeTableParams::read(&mut r).unwrap();
        r.finish().unwrap();
        assert_eq!(table.start_at_key, 100);
        assert_eq!(table.nodes.len(), 2);
        assert_eq!(table.nodes[1].correction_key, 6);
    }
}
