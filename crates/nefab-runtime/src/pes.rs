//! PES decoder learning
//!
//! Two variants, fixed at init by the parameter region's layout tag: the
//! on-spike variant adjusts a neuron's decoder row once per spike; the
//! filtered-activity variant maintains a decayed activity trace per neuron
//! and applies the adjustment in a separate pass each tick. Either is a
//! no-op while the learning rate is not positive.

use crate::error::{Result, RuntimeError};
use crate::fixed::Value;
use nefab_fabric::schemas::{PesParams, PES_LAYOUT_FILTERED_ACTIVITY, PES_LAYOUT_ON_SPIKE};

/// PES learning state
#[derive(Debug, Clone)]
pub enum PesState {
    /// Decoder rows adjusted once per spike
    OnSpike {
        /// Learning rate
        learning_rate: Value,
        /// Error-signal filter within the input bank
        error_filter_id: u16,
        /// Column offset into the decoder matrix
        decoder_output_offset: u16,
    },
    /// Decoder rows adjusted from a decayed per-neuron activity trace
    FilteredActivity {
        /// Learning rate
        learning_rate: Value,
        /// Per-tick decay of the activity trace
        activity_decay: Value,
        /// Error-signal filter within the input bank
        error_filter_id: u16,
        /// Column offset into the decoder matrix
        decoder_output_offset: u16,
        /// Decayed spike trace, one entry per neuron
        filtered_activity: Vec<Value>,
    },
}

impl PesState {
    /// Build from a parameter-region image
    pub fn from_params(p: PesParams, n_neurons: usize) -> Result<Self> {
        match p.layout {
            PES_LAYOUT_ON_SPIKE => Ok(Self::OnSpike {
                learning_rate: Value::from_bits(p.learning_rate),
                error_filter_id: p.error_filter_id,
                decoder_output_offset: p.decoder_output_offset,
            }),
            PES_LAYOUT_FILTERED_ACTIVITY => Ok(Self::FilteredActivity {
                learning_rate: Value::from_bits(p.learning_rate),
                activity_decay: Value::from_bits(p.activity_decay),
                error_filter_id: p.error_filter_id,
                decoder_output_offset: p.decoder_output_offset,
                filtered_activity: vec![Value::ZERO; n_neurons],
            }),
            tag => Err(RuntimeError::invalid_config(format!(
                "ambiguous PES layout tag {}",
                tag
            ))),
        }
    }

    /// Filter index supplying the error signal
    pub fn error_filter_id(&self) -> u16 {
        match self {
            Self::OnSpike {
                error_filter_id, ..
            }
            | Self::FilteredActivity {
                error_filter_id, ..
            } => *error_filter_id,
        }
    }

    /// Column offset into the decoder matrix
    pub fn decoder_output_offset(&self) -> u16 {
        match self {
            Self::OnSpike {
                decoder_output_offset,
                ..
            }
            | Self::FilteredActivity {
                decoder_output_offset,
                ..
            } => *decoder_output_offset,
        }
    }

    /// Whether learning is active
    pub fn enabled(&self) -> bool {
        match self {
            Self::OnSpike { learning_rate, .. }
            | Self::FilteredActivity { learning_rate, .. } => learning_rate.is_positive(),
        }
    }

    /// Per-neuron hook, called for every neuron every tick
    ///
    /// `decoder_row` is neuron `n`'s row of the decoder matrix and `error`
    /// the error filter's current output.
    pub fn on_neuron(&mut self, n: usize, spiked: bool, decoder_row: &mut [Value], error: &[Value]) {
        if !self.enabled() {
            return;
        }
        match self {
            Self::OnSpike {
                learning_rate,
                decoder_output_offset,
                ..
            } => {
                if spiked {
                    let offset = *decoder_output_offset as usize;
                    for (d, &e) in error.iter().enumerate() {
                        decoder_row[offset + d] += *learning_rate * e;
                    }
                }
            }
            Self::FilteredActivity {
                activity_decay,
                filtered_activity,
                ..
            } => {
                filtered_activity[n] = *activity_decay * filtered_activity[n];
                if spiked {
                    filtered_activity[n] += Value::ONE - *activity_decay;
                }
            }
        }
    }

    /// End-of-tick pass over the whole decoder matrix
    ///
    /// Only the filtered-activity variant does work here.
    pub fn end_tick(&mut self, decoders: &mut [Value], n_output_dims: usize, error: &[Value]) {
        if !self.enabled() {
            return;
        }
        if let Self::FilteredActivity {
            learning_rate,
            decoder_output_offset,
            filtered_activity,
            ..
        } = self
        {
            let offset = *decoder_output_offset as usize;
            for (n, &activity) in filtered_activity.iter().enumerate() {
                let row = &mut decoders[n * n_output_dims..(n + 1) * n_output_dims];
                for (d, &e) in error.iter().enumerate() {
                    row[offset + d] += *learning_rate * activity * e;
                }
            }
        }
    }
}
