//! LIF ensemble kernel
//!
//! Simulates one population of leaky integrate-and-fire neurons under the
//! Neural Engineering Framework: filtered dimensional input is encoded
//! into per-neuron currents, membranes integrate and spike, spikes are
//! decoded back into dimensional output and emitted as multicast, with
//! optional PES decoder learning and spike recording.

use crate::clock::DisciplinedClock;
use crate::error::{Result, RuntimeError};
use crate::fixed::{self, Value};
use crate::input::FilteredInput;
use crate::kernel::{Kernel, TickContext};
use crate::neuron::{Lfsr, NeuronStatus};
use crate::pes::PesState;
use crate::record::RecordingBuffer;
use log::{info, warn};
use nefab_fabric::schemas::{
    read_filters, read_keys, read_routes, PesParams, SystemParams,
};
use nefab_fabric::{Packet, RecordingRegion, Region, RegionTable, SdpFrame};

/// Inter-packet gap used by batched emission, in microseconds
///
/// Back-to-back decoded packets are spaced by this much so downstream
/// routers are not saturated; the gap is a property of the emission
/// schedule and does not change which packets a tick produces.
pub const BATCH_EMIT_GAP_US: u32 = 1;

/// How decoded output leaves the core within a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum OutputPacing {
    /// One dimension every `floor(N / D_out)` neuron steps
    #[default]
    Interleaved,
    /// All dimensions back-to-back after the neuron loop
    Batched,
}

/// Static configuration of an ensemble kernel
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EnsembleParams {
    /// Population size
    pub n_neurons: u32,
    /// Input dimensionality
    pub n_input_dims: u16,
    /// Output dimensionality
    pub n_output_dims: u16,
    /// Refractory period in ticks (4-bit field)
    pub t_ref: u8,
    /// `dt / t_rc`
    pub dt_over_t_rc: Value,
    /// Inhibitory input dimensionality (0 disables inhibition)
    pub n_inhibitory_dims: u16,
    /// Gain applied to summed inhibitory input
    pub inhibitory_gain: Value,
    /// Emission schedule for decoded output
    pub pacing: OutputPacing,
    /// Whether spike bitmaps are recorded
    pub record_spikes: bool,
    /// Simulation timestep in microseconds
    pub machine_timestep_us: u32,
    /// Seed for the spike-timing LFSR
    pub lfsr_seed: u16,
    /// Tick at which the kernel shuts down, if fixed at init
    pub end_tick: Option<u64>,
}

impl EnsembleParams {
    /// Create parameters with validation; remaining fields take defaults
    pub fn new(n_neurons: u32, n_input_dims: u16, n_output_dims: u16) -> Result<Self> {
        if n_neurons == 0 {
            return Err(RuntimeError::invalid_parameter("n_neurons", "0", "> 0"));
        }
        if n_input_dims == 0 {
            return Err(RuntimeError::invalid_parameter("n_input_dims", "0", "> 0"));
        }
        if n_output_dims == 0 {
            return Err(RuntimeError::invalid_parameter("n_output_dims", "0", "> 0"));
        }
        Ok(Self {
            n_neurons,
            n_input_dims,
            n_output_dims,
            t_ref: 2,
            dt_over_t_rc: Value::from_f32(0.05),
            n_inhibitory_dims: 0,
            inhibitory_gain: Value::ZERO,
            pacing: OutputPacing::Interleaved,
            record_spikes: false,
            machine_timestep_us: 1000,
            lfsr_seed: 1,
            end_tick: None,
        })
    }

    /// Set the refractory period
    pub fn with_t_ref(mut self, t_ref: u8) -> Self {
        self.t_ref = t_ref;
        self
    }

    /// Set `dt / t_rc`
    pub fn with_dt_over_t_rc(mut self, v: Value) -> Self {
        self.dt_over_t_rc = v;
        self
    }

    /// Set the emission schedule
    pub fn with_pacing(mut self, pacing: OutputPacing) -> Self {
        self.pacing = pacing;
        self
    }

    /// Enable spike recording
    pub fn with_recording(mut self) -> Self {
        self.record_spikes = true;
        self
    }

    /// Set the inhibitory input configuration
    pub fn with_inhibition(mut self, n_dims: u16, gain: Value) -> Self {
        self.n_inhibitory_dims = n_dims;
        self.inhibitory_gain = gain;
        self
    }

    /// Fix the simulation end tick
    pub fn with_end_tick(mut self, tick: u64) -> Self {
        self.end_tick = Some(tick);
        self
    }

    fn validate(&self) -> Result<()> {
        if self.t_ref >= 16 {
            return Err(RuntimeError::invalid_parameter(
                "t_ref",
                self.t_ref.to_string(),
                "< 16 (4-bit field)",
            ));
        }
        if self.pacing == OutputPacing::Interleaved && self.n_neurons < self.n_output_dims as u32 {
            return Err(RuntimeError::invalid_config(format!(
                "interleaved pacing needs n_neurons >= n_output_dims ({} < {})",
                self.n_neurons, self.n_output_dims
            )));
        }
        Ok(())
    }
}

/// One LIF ensemble core
#[derive(Debug)]
pub struct EnsembleKernel {
    params: EnsembleParams,
    i_bias: Vec<Value>,
    encoders: Vec<Value>,
    decoders: Vec<Value>,
    encoder_mags: Vec<Value>,
    status: Vec<NeuronStatus>,
    input: FilteredInput,
    inhib: Option<FilteredInput>,
    output: Vec<Value>,
    output_keys: Vec<u32>,
    recording: Option<RecordingBuffer>,
    pes: Option<PesState>,
    error_buf: Vec<Value>,
    lfsr: Lfsr,
    clock: Option<DisciplinedClock>,
    tick: u64,
    finished: bool,
}

impl EnsembleKernel {
    /// Assemble a kernel from its parts, validating every size
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        params: EnsembleParams,
        i_bias: Vec<Value>,
        encoders: Vec<Value>,
        decoders: Vec<Value>,
        output_keys: Vec<u32>,
        input: FilteredInput,
        inhib: Option<FilteredInput>,
        recording: Option<RecordingBuffer>,
        pes: Option<PesState>,
    ) -> Result<Self> {
        params.validate()?;
        let n = params.n_neurons as usize;
        let d_in = params.n_input_dims as usize;
        let d_out = params.n_output_dims as usize;

        if i_bias.len() != n {
            return Err(RuntimeError::size_mismatch("bias", n, i_bias.len()));
        }
        if encoders.len() != n * d_in {
            return Err(RuntimeError::size_mismatch(
                "encoders",
                n * d_in,
                encoders.len(),
            ));
        }
        if decoders.len() != n * d_out {
            return Err(RuntimeError::size_mismatch(
                "decoders",
                n * d_out,
                decoders.len(),
            ));
        }
        if output_keys.len() != d_out {
            return Err(RuntimeError::size_mismatch(
                "output keys",
                d_out,
                output_keys.len(),
            ));
        }
        if input.n_dimensions() != params.n_input_dims {
            return Err(RuntimeError::size_mismatch(
                "input bank",
                d_in,
                input.n_dimensions() as usize,
            ));
        }
        match (&inhib, params.n_inhibitory_dims) {
            (None, 0) => {}
            (Some(bank), dims) if dims > 0 && bank.n_dimensions() == dims => {}
            _ => {
                return Err(RuntimeError::invalid_config(
                    "inhibitory bank does not match n_inhibitory_dims",
                ))
            }
        }
        if params.record_spikes != recording.is_some() {
            return Err(RuntimeError::invalid_config(
                "recording flag does not match recording buffer",
            ));
        }
        if let Some(pes) = &pes {
            let id = pes.error_filter_id();
            if id as usize >= input.n_filters() {
                return Err(RuntimeError::MissingErrorFilter {
                    filter_id: id,
                    n_filters: input.n_filters(),
                });
            }
            let span = pes.decoder_output_offset() as usize + d_in;
            if span > d_out {
                return Err(RuntimeError::invalid_config(format!(
                    "PES update spans {} decoder columns but only {} exist",
                    span, d_out
                )));
            }
        }

        let encoder_mags = (0..n)
            .map(|i| fixed::sum_abs(&encoders[i * d_in..(i + 1) * d_in]))
            .collect();

        info!(
            "ensemble: configured {} neurons, {} -> {} dims, pacing {:?}",
            n, d_in, d_out, params.pacing
        );

        Ok(Self {
            lfsr: Lfsr::new(params.lfsr_seed)?,
            status: vec![NeuronStatus::resting(); n],
            output: vec![Value::ZERO; d_out],
            error_buf: Vec::with_capacity(d_in),
            params,
            i_bias,
            encoders,
            decoders,
            encoder_mags,
            input,
            inhib,
            output_keys,
            recording,
            pes,
            clock: None,
            tick: 0,
            finished: false,
        })
    }

    /// Build a kernel from its off-chip parameter regions
    ///
    /// `pacing` is the per-kernel build constant; `recording_capacity`
    /// sizes the off-chip spike area in ticks.
    pub fn from_regions(
        table: &RegionTable,
        pacing: OutputPacing,
        lfsr_seed: u16,
        recording_capacity: usize,
    ) -> Result<Self> {
        let mut r = table.reader(Region::System)?;
        let sys = SystemParams::read(&mut r)?;
        r.finish()?;

        if sys.n_input_dims > u16::MAX as u32
            || sys.n_output_dims > u16::MAX as u32
            || sys.n_inhibitory_dims > u16::MAX as u32
        {
            return Err(RuntimeError::invalid_config(
                "system region dimensionality exceeds 16 bits",
            ));
        }
        if sys.t_ref >= 16 {
            return Err(RuntimeError::invalid_parameter(
                "t_ref",
                sys.t_ref.to_string(),
                "< 16 (4-bit field)",
            ));
        }

        let n = sys.n_neurons as usize;
        let d_in = sys.n_input_dims as usize;
        let d_out = sys.n_output_dims as usize;

        let params = EnsembleParams {
            n_neurons: sys.n_neurons,
            n_input_dims: sys.n_input_dims as u16,
            n_output_dims: sys.n_output_dims as u16,
            t_ref: sys.t_ref as u8,
            dt_over_t_rc: Value::from_bits(sys.dt_over_t_rc),
            n_inhibitory_dims: sys.n_inhibitory_dims as u16,
            inhibitory_gain: Value::from_bits(sys.inhibitory_gain),
            pacing,
            record_spikes: sys.record_spikes,
            machine_timestep_us: sys.machine_timestep_us,
            lfsr_seed,
            end_tick: None,
        };

        let mut r = table.reader(Region::Bias)?;
        let i_bias = r.words_signed(n)?.into_iter().map(Value::from_bits).collect();
        r.finish()?;

        let mut r = table.reader(Region::Encoders)?;
        let encoders = r
            .words_signed(n * d_in)?
            .into_iter()
            .map(Value::from_bits)
            .collect();
        r.finish()?;

        let mut r = table.reader(Region::Decoders)?;
        let decoders = r
            .words_signed(n * d_out)?
            .into_iter()
            .map(Value::from_bits)
            .collect();
        r.finish()?;

        let mut r = table.reader(Region::OutputKeys)?;
        let output_keys = read_keys(&mut r, d_out)?;
        r.finish()?;

        let mut r = table.reader(Region::Filters)?;
        let filters = read_filters(&mut r)?;
        r.finish()?;
        if filters.len() != sys.n_filters as usize {
            return Err(RuntimeError::size_mismatch(
                "filter region count",
                sys.n_filters as usize,
                filters.len(),
            ));
        }

        let mut r = table.reader(Region::FilterRoutes)?;
        let routes = read_routes(&mut r)?;
        r.finish()?;
        if routes.len() != sys.n_filter_keys as usize {
            return Err(RuntimeError::size_mismatch(
                "route region count",
                sys.n_filter_keys as usize,
                routes.len(),
            ));
        }

        let input = FilteredInput::from_params(params.n_input_dims, &filters, &routes)?;

        let inhib = if sys.n_inhibitory_dims > 0 {
            let mut r = table.reader(Region::InhibFilters)?;
            let filters = read_filters(&mut r)?;
            r.finish()?;
            let mut r = table.reader(Region::InhibRoutes)?;
            let routes = read_routes(&mut r)?;
            r.finish()?;
            Some(FilteredInput::from_params(
                params.n_inhibitory_dims,
                &filters,
                &routes,
            )?)
        } else {
            None
        };

        let pes = match table.reader_opt(Region::Pes) {
            Some(mut r) => {
                let p = PesParams::read(&mut r)?;
                r.finish()?;
                Some(PesState::from_params(p, n)?)
            }
            None => None,
        };

        let recording = if sys.record_spikes {
            let region = RecordingRegion::new(RecordingBuffer::frame_length(n), recording_capacity);
            Some(RecordingBuffer::new(n, region)?)
        } else {
            None
        };

        Self::new(
            params,
            i_bias,
            encoders,
            decoders,
            output_keys,
            input,
            inhib,
            recording,
            pes,
        )
    }

    /// Attach a disciplined clock; ticks are then gated on the start
    /// broadcast and the stop tick
    pub fn with_clock(mut self, clock: DisciplinedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Current decoder matrix, row-major (test and host visibility)
    pub fn decoders(&self) -> &[Value] {
        &self.decoders
    }

    /// Per-neuron status words
    pub fn status(&self) -> &[NeuronStatus] {
        &self.status
    }

    /// The recording buffer, when spike recording is enabled
    pub fn recording(&self) -> Option<&RecordingBuffer> {
        self.recording.as_ref()
    }

    /// Ticks completed
    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Mutable access to the attached clock
    pub fn clock_mut(&mut self) -> Option<&mut DisciplinedClock> {
        self.clock.as_mut()
    }

    fn effective_end_tick(&self) -> Option<u64> {
        let stop = self.clock.as_ref().and_then(|c| c.stop_tick());
        match (self.params.end_tick, stop) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}

impl crate::kernel::sealed::Sealed for EnsembleKernel {}

impl Kernel for EnsembleKernel {
    fn on_packet(&mut self, key: u32, payload: u32, ctx: &mut TickContext<'_>) {
        if let Some(clock) = &mut self.clock {
            if clock.on_packet(key, payload, ctx.mc) {
                return;
            }
        }
        if self.input.on_packet(key, payload) {
            return;
        }
        if let Some(inhib) = &mut self.inhib {
            if inhib.on_packet(key, payload) {
                return;
            }
        }
        warn!("ensemble: dropped unrouted packet key {:#010x}", key);
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
                info!("ensemble: simulation complete after {} ticks", self.tick);
                return;
            }
        }

        if let Some(rec) = &mut self.recording {
            rec.prepare();
        }
        self.input.step();
        if let Some(inhib) = &mut self.inhib {
            inhib.step();
        }

        self.error_buf.clear();
        if let Some(pes) = &self.pes {
            // the error filter lives in the signal bank; snapshot its output
            if let Some(filter) = self.input.filter(pes.error_filter_id()) {
                self.error_buf.extend_from_slice(filter.filtered());
            }
        }

        let inhib_current = match &self.inhib {
            Some(bank) => self.params.inhibitory_gain * fixed::sum(bank.input()),
            None => Value::ZERO,
        };

        let n = self.params.n_neurons as usize;
        let d_in = self.params.n_input_dims as usize;
        let d_out = self.params.n_output_dims as usize;
        let period = match self.params.pacing {
            OutputPacing::Interleaved => n / d_out,
            OutputPacing::Batched => 0,
        };
        let mut next_dim = 0usize;

        for i in 0..n {
            let mut spiked = false;
            if self.status[i].refractory_time() > 0 {
                self.status[i].decrement_refractory();
            } else {
                let row = &self.encoders[i * d_in..(i + 1) * d_in];
                let mut j = self.i_bias[i] + fixed::dot(row, self.input.input());
                if self.params.n_inhibitory_dims > 0 {
                    j -= inhib_current * self.encoder_mags[i];
                }

                let v_prev = self.status[i].voltage();
                let dv = (j - v_prev) * self.params.dt_over_t_rc;
                let v = (v_prev + dv).max(Value::ZERO);

                if v <= Value::ONE {
                    self.status[i].set_voltage(v);
                } else {
                    spiked = true;
                    self.status[i].set_refractory_time(self.params.t_ref);
                    self.status[i].set_voltage(Value::ZERO);

                    // sub-tick correction: a spike early enough in the tick
                    // leaves the refractory period one tick sooner
                    let r = self.lfsr.fract();
                    if r * dv < v - Value::ONE && self.status[i].refractory_time() > 0 {
                        self.status[i].decrement_refractory();
                    }

                    for d in 0..d_out {
                        self.output[d] += self.decoders[i * d_out + d];
                    }
                    if let Some(rec) = &mut self.recording {
                        rec.mark_spike(i);
                    }
                }
            }

            if let Some(pes) = &mut self.pes {
                let row = &mut self.decoders[i * d_out..(i + 1) * d_out];
                pes.on_neuron(i, spiked, row, &self.error_buf);
            }

            if period > 0 && (i + 1) % period == 0 && next_dim < d_out {
                ctx.mc.send(Packet::with_payload(
                    self.output_keys[next_dim],
                    self.output[next_dim].to_payload(),
                ));
                self.output[next_dim] = Value::ZERO;
                next_dim += 1;
            }
        }

        if let Some(pes) = &mut self.pes {
            pes.end_tick(&mut self.decoders, d_out, &self.error_buf);
        }

        if self.params.pacing == OutputPacing::Batched {
            for d in 0..d_out {
                ctx.mc.send(Packet::with_payload(
                    self.output_keys[d],
                    self.output[d].to_payload(),
                ));
                self.output[d] = Value::ZERO;
            }
        }

        if let Some(rec) = &mut self.recording {
            if let Err(e) = rec.flush() {
                warn!("ensemble: recording flush failed: {}", e);
            }
        }
        self.tick += 1;
    }

    fn on_host_frame(&mut self, _frame: &SdpFrame, _ctx: &mut TickContext<'_>) {}

    fn finished(&self) -> bool {
        self.finished
    }
}
