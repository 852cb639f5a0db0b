//! Filtered-input subsystem shared by every kernel
//!
//! Incoming keyed payloads are routed to a per-filter, per-dimension
//! accumulator; at each tick boundary `step` folds the accumulators through
//! first-order IIR decay and republishes the summed `input` vector.
//!
//! On hardware the packet handler runs at a higher interrupt priority than
//! the timer handler, so each filter's drain (read accumulator, zero it)
//! happens under a brief packet-interrupt mask. Here handlers are `&mut
//! self` calls and never overlap; a packet "during" a tick lands in the
//! next tick's accumulator.

use crate::error::{Result, RuntimeError};
use crate::fixed::Value;
use nefab_fabric::schemas::{FilterParams, RouteParams};
use smallvec::SmallVec;

/// One route table entry, matched in insertion order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FilterRoute {
    /// Key the masked incoming key must equal
    pub key: u32,
    /// Mask applied to the incoming key before comparison
    pub mask: u32,
    /// Target filter index
    pub filter_id: u16,
    /// Mask extracting the dimension index from the incoming key
    pub dimension_mask: u32,
}

impl FilterRoute {
    /// Whether this route matches the incoming key
    pub fn matches(&self, incoming: u32) -> bool {
        incoming & self.mask == self.key
    }

    /// Dimension index this key addresses within the target filter
    pub fn dimension(&self, incoming: u32) -> usize {
        (incoming & self.dimension_mask) as usize
    }
}

impl From<RouteParams> for FilterRoute {
    fn from(p: RouteParams) -> Self {
        Self {
            key: p.key,
            mask: p.mask,
            filter_id: p.filter_id,
            dimension_mask: p.dimension_mask,
        }
    }
}

/// A first-order IIR low-pass over one accumulator vector
#[derive(Debug, Clone)]
pub struct Filter {
    a: Value,
    one_minus_a: Value,
    modulatory: bool,
    accumulator: Vec<Value>,
    filtered: Vec<Value>,
}

impl Filter {
    /// Create an additive filter
    pub fn new(a: Value, one_minus_a: Value, n_dims: usize) -> Self {
        Self {
            a,
            one_minus_a,
            modulatory: false,
            accumulator: vec![Value::ZERO; n_dims],
            filtered: vec![Value::ZERO; n_dims],
        }
    }

    /// Switch to replacement (latest-wins) accumulation
    pub fn with_modulatory(mut self) -> Self {
        self.modulatory = true;
        self
    }

    /// Build from a parameter-region entry
    pub fn from_params(p: FilterParams, n_dims: usize) -> Self {
        Self {
            a: Value::from_bits(p.a),
            one_minus_a: Value::from_bits(p.one_minus_a),
            modulatory: p.modulatory,
            accumulator: vec![Value::ZERO; n_dims],
            filtered: vec![Value::ZERO; n_dims],
        }
    }

    /// Whether accumulation is replacement rather than addition
    pub fn is_modulatory(&self) -> bool {
        self.modulatory
    }

    /// Deliver one contribution into dimension `d`
    fn accumulate(&mut self, d: usize, v: Value) {
        if self.modulatory {
            self.accumulator[d] = v;
        } else {
            self.accumulator[d] += v;
        }
    }

    /// Finalise one tick: decay into `filtered`, zero the accumulator
    fn step(&mut self) {
        for d in 0..self.filtered.len() {
            self.filtered[d] = self.a * self.filtered[d] + self.one_minus_a * self.accumulator[d];
            self.accumulator[d] = Value::ZERO;
        }
    }

    /// Decayed state visible to consumers
    pub fn filtered(&self) -> &[Value] {
        &self.filtered
    }

    /// Current accumulator contents (test visibility)
    pub fn accumulator(&self) -> &[Value] {
        &self.accumulator
    }
}

/// A bank of filters, a route table and the summed consumer-visible input
#[derive(Debug, Clone)]
pub struct FilteredInput {
    n_dimensions: u16,
    filters: Vec<Filter>,
    routes: SmallVec<[FilterRoute; 8]>,
    input: Vec<Value>,
}

impl FilteredInput {
    /// Create a bank, verifying every route targets an existing filter
    pub fn new(
        n_dimensions: u16,
        filters: Vec<Filter>,
        routes: impl IntoIterator<Item = FilterRoute>,
    ) -> Result<Self> {
        let routes: SmallVec<[FilterRoute; 8]> = routes.into_iter().collect();
        for route in &routes {
            if route.filter_id as usize >= filters.len() {
                return Err(RuntimeError::MissingFilter {
                    filter_id: route.filter_id,
                    n_filters: filters.len(),
                });
            }
        }
        for (i, f) in filters.iter().enumerate() {
            if f.filtered.len() != n_dimensions as usize {
                return Err(RuntimeError::size_mismatch(
                    format!("filter {} state", i),
                    n_dimensions as usize,
                    f.filtered.len(),
                ));
            }
        }
        Ok(Self {
            n_dimensions,
            filters,
            routes,
            input: vec![Value::ZERO; n_dimensions as usize],
        })
    }

    /// Build a bank from parameter-region entries
    pub fn from_params(
        n_dimensions: u16,
        filters: &[FilterParams],
        routes: &[RouteParams],
    ) -> Result<Self> {
        let filters = filters
            .iter()
            .map(|&p| Filter::from_params(p, n_dimensions as usize))
            .collect();
        Self::new(n_dimensions, filters, routes.iter().map(|&p| p.into()))
    }

    /// Bank with a single unit filter (`a = 0`) and a whole-key route,
    /// the common test topology
    pub fn unit(n_dimensions: u16, key: u32, mask: u32, dimension_mask: u32) -> Result<Self> {
        Self::new(
            n_dimensions,
            vec![Filter::new(Value::ZERO, Value::ONE, n_dimensions as usize)],
            [FilterRoute {
                key,
                mask,
                filter_id: 0,
                dimension_mask,
            }],
        )
    }

    /// Deliver one dimensional contribution
    ///
    /// Returns `false` when no route matches or the extracted dimension is
    /// out of range; callers log and drop such packets.
    pub fn on_packet(&mut self, key: u32, payload: u32) -> bool {
        for route in &self.routes {
            if !route.matches(key) {
                continue;
            }
            let d = route.dimension(key);
            if d >= self.n_dimensions as usize {
                return false;
            }
            self.filters[route.filter_id as usize].accumulate(d, Value::from_payload(payload));
            return true;
        }
        false
    }

    /// Finalise the tick: step every filter, republish the summed input
    pub fn step(&mut self) {
        for f in &mut self.filters {
            f.step();
        }
        for d in 0..self.n_dimensions as usize {
            self.input[d] = self
                .filters
                .iter()
                .fold(Value::ZERO, |acc, f| acc + f.filtered[d]);
        }
    }

    /// Consumer-visible input vector
    pub fn input(&self) -> &[Value] {
        &self.input
    }

    /// Filter by index
    pub fn filter(&self, id: u16) -> Option<&Filter> {
        self.filters.get(id as usize)
    }

    /// Number of filters in the bank
    pub fn n_filters(&self) -> usize {
        self.filters.len()
    }

    /// Input dimensionality
    pub fn n_dimensions(&self) -> u16 {
        self.n_dimensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(v: f32) -> u32 {
        Value::from_f32(v).to_payload()
    }

    #[test]
    fn test_route_referencing_missing_filter_fails_init() {
        let err = FilteredInput::new(
            1,
            vec![Filter::new(Value::ZERO, Value::ONE, 1)],
            [FilterRoute {
                key: 0,
                mask: 0,
                filter_id: 1,
                dimension_mask: 0,
            }],
        )
        .unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::MissingFilter {
                filter_id: 1,
                n_filters: 1
            }
        ));
    }

    #[test]
    fn test_first_matching_route_wins() {
        let mut bank = FilteredInput::new(
            1,
            vec![
                Filter::new(Value::ZERO, Value::ONE, 1),
                Filter::new(Value::ZERO, Value::ONE, 1),
            ],
            [
                FilterRoute {
                    key: 0x10,
                    mask: 0xF0,
                    filter_id: 0,
                    dimension_mask: 0,
                },
                FilterRoute {
                    key: 0x10,
                    mask: 0xF0,
                    filter_id: 1,
                    dimension_mask: 0,
                },
            ],
        )
        .unwrap();

        assert!(bank.on_packet(0x10, payload(1.0)));
        bank.step();
        assert_eq!(bank.filter(0).unwrap().filtered()[0], Value::ONE);
        assert_eq!(bank.filter(1).unwrap().filtered()[0], Value::ZERO);
    }

    #[test]
    fn test_unrouted_packet_dropped() {
        let mut bank = FilteredInput::unit(1, 0x100, 0xF00, 0xF).unwrap();
        assert!(!bank.on_packet(0x200, payload(1.0)));
        // dimension out of range
        assert!(!bank.on_packet(0x105, payload(1.0)));
    }

    #[test]
    fn test_additive_vs_modulatory_accumulation() {
        let mut bank = FilteredInput::new(
            1,
            vec![
                Filter::new(Value::ZERO, Value::ONE, 1),
                Filter::new(Value::ZERO, Value::ONE, 1).with_modulatory(),
            ],
            [
                FilterRoute {
                    key: 0x10,
                    mask: 0xF0,
                    filter_id: 0,
                    dimension_mask: 0,
                },
                FilterRoute {
                    key: 0x20,
                    mask: 0xF0,
                    filter_id: 1,
                    dimension_mask: 0,
                },
            ],
        )
        .unwrap();

        bank.on_packet(0x10, payload(1.0));
        bank.on_packet(0x10, payload(1.0));
        bank.on_packet(0x20, payload(1.0));
        bank.on_packet(0x20, payload(2.0));
        bank.step();

        assert_eq!(bank.filter(0).unwrap().filtered()[0], Value::from_f32(2.0));
        assert_eq!(bank.filter(1).unwrap().filtered()[0], Value::from_f32(2.0));
    }

    #[test]
    fn test_step_zeroes_accumulator_and_decays_exactly() {
        let half = Value::from_f32(0.5);
        let mut bank = FilteredInput::new(
            1,
            vec![Filter::new(half, half, 1)],
            [FilterRoute {
                key: 0,
                mask: 0,
                filter_id: 0,
                dimension_mask: 0,
            }],
        )
        .unwrap();

        bank.on_packet(0, payload(1.0));
        bank.step();
        assert_eq!(bank.filter(0).unwrap().accumulator()[0], Value::ZERO);
        assert_eq!(bank.input()[0], Value::from_f32(0.5));

        // no further input: 0.25, 0.125, ...
        bank.step();
        assert_eq!(bank.input()[0], Value::from_f32(0.25));
        bank.step();
        assert_eq!(bank.input()[0], Value::from_f32(0.125));
    }

    #[test]
    fn test_input_is_sum_of_filtered() {
        let mut bank = FilteredInput::new(
            2,
            vec![
                Filter::new(Value::ZERO, Value::ONE, 2),
                Filter::new(Value::ZERO, Value::ONE, 2),
            ],
            [
                FilterRoute {
                    key: 0x10,
                    mask: 0xF0,
                    filter_id: 0,
                    dimension_mask: 0xF,
                },
                FilterRoute {
                    key: 0x20,
                    mask: 0xF0,
                    filter_id: 1,
                    dimension_mask: 0xF,
                },
            ],
        )
        .unwrap();

        bank.on_packet(0x11, payload(0.5));
        bank.on_packet(0x21, payload(0.25));
        bank.step();
        assert_eq!(bank.input()[0], Value::ZERO);
        assert_eq!(bank.input()[1], Value::from_f32(0.75));
    }

    #[test]
    fn test_modulatory_accumulator_also_zeroes_after_step() {
        let mut bank = FilteredInput::new(
            1,
            vec![Filter::new(Value::ZERO, Value::ONE, 1).with_modulatory()],
            [FilterRoute {
                key: 0,
                mask: 0,
                filter_id: 0,
                dimension_mask: 0,
            }],
        )
        .unwrap();

        bank.on_packet(0, payload(-1.0));
        bank.step();
        assert_eq!(bank.filter(0).unwrap().accumulator()[0], Value::ZERO);
        assert_eq!(bank.input()[0], Value::from_f32(-1.0));
        // an error signal must be re-sent each tick to persist
        bank.step();
        assert_eq!(bank.input()[0], Value::ZERO);
    }
}
