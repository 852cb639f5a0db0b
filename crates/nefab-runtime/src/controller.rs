//! Simulation controller kernel
//!
//! Owns the reference clock for the whole simulation: it pings workers
//! round-robin, measures round-trip latency, broadcasts phase corrections,
//! and serves the host command surface (time, drift, synchronized
//! start/stop). Lost pings or pongs are never retransmitted; the next
//! round supersedes.

use crate::error::{Result, RuntimeError};
use crate::kernel::{Kernel, TickContext};
use log::{debug, info, warn};
use nefab_fabric::schemas::{NodeKeys, NodeTableParams};
use nefab_fabric::sdp::TAG_CONTROLLER_REPLY;
use nefab_fabric::{HardwareTimer, HostCommand, Packet, Region, RegionTable, SdpFrame};
use smallvec::SmallVec;

/// One simulation-controller core
#[derive(Debug)]
pub struct ControllerKernel {
    nodes: SmallVec<[NodeKeys; 8]>,
    start_at_key: u32,
    stop_at_key: u32,
    current_node: usize,
    ping_send_time: u32,
    expecting_pong: bool,
    pong_received: bool,
    last_correction: i32,
    min_correction: i32,
    max_correction: i32,
    correction_range: u32,
    timer: HardwareTimer,
    srce_addr: u16,
    srce_port: u8,
}

impl ControllerKernel {
    /// Create a controller over the given node table
    pub fn new(
        nodes: impl IntoIterator<Item = NodeKeys>,
        start_at_key: u32,
        stop_at_key: u32,
        srce_addr: u16,
        srce_port: u8,
    ) -> Result<Self> {
        let nodes: SmallVec<[NodeKeys; 8]> = nodes.into_iter().collect();
        if nodes.is_empty() {
            return Err(RuntimeError::invalid_config("controller has no nodes"));
        }
        info!("controller: configured {} nodes", nodes.len());
        Ok(Self {
            nodes,
            start_at_key,
            stop_at_key,
            current_node: 0,
            ping_send_time: 0,
            expecting_pong: false,
            pong_received: false,
            last_correction: 0,
            min_correction: i32::MAX,
            max_correction: i32::MIN,
            correction_range: 0,
            timer: HardwareTimer::new(),
            srce_addr,
            srce_port,
        })
    }

    /// Build a controller from its off-chip parameter regions
    pub fn from_regions(table: &RegionTable, srce_addr: u16, srce_port: u8) -> Result<Self> {
        let mut r = table.reader(Region::NodeTable)?;
        let params = NodeTableParams::read(&mut r)?;
        r.finish()?;
        Self::new(
            params.nodes,
            params.start_at_key,
            params.stop_at_key,
            srce_addr,
            srce_port,
        )
    }

    /// Advance the reference timer by `us` microseconds
    pub fn advance(&mut self, us: u32) {
        self.timer.advance(us);
    }

    /// Reference time, the value `GET_TIME` reports
    pub fn now(&self) -> u32 {
        self.timer.now()
    }

    /// Drift metric published at the end of the last complete round
    pub fn correction_range(&self) -> u32 {
        self.correction_range
    }

    /// Correction sent to the most recently sampled node
    pub fn last_correction(&self) -> i32 {
        self.last_correction
    }

    fn fold_round_sample(&mut self) {
        if !self.pong_received {
            warn!(
                "controller: node {} missed its pong this round",
                self.current_node
            );
            return;
        }
        self.min_correction = self.min_correction.min(self.last_correction);
        self.max_correction = self.max_correction.max(self.last_correction);
    }

    fn advance_round(&mut self) {
        self.current_node = (self.current_node + 1) % self.nodes.len();
        if self.current_node != 0 {
            return;
        }
        if self.min_correction <= self.max_correction {
            self.correction_range = self.max_correction.wrapping_sub(self.min_correction) as u32;
            debug!(
                "controller: round complete, correction range {}",
                self.correction_range
            );
        } else {
            debug!("controller: round complete with no pongs");
        }
        self.min_correction = i32::MAX;
        self.max_correction = i32::MIN;
    }
}

impl crate::kernel::sealed::Sealed for ControllerKernel {}

impl Kernel for ControllerKernel {
    fn on_packet(&mut self, key: u32, payload: u32, ctx: &mut TickContext<'_>) {
        let node = self.nodes[self.current_node];
        if self.expecting_pong && !self.pong_received && key == node.pong_key {
            let now = self.timer.now();
            let latency = now.wrapping_sub(self.ping_send_time) / 2;
            let adjusted_remote = payload.wrapping_add(latency);
            let error = now.wrapping_sub(adjusted_remote) as i32;
            ctx.mc
                .send(Packet::with_payload(node.correction_key, error as u32));
            self.last_correction = error;
            self.pong_received = true;
            return;
        }
        warn!("controller: dropped unrouted packet key {:#010x}", key);
    }

    fn on_tick(&mut self, ctx: &mut TickContext<'_>) {
        if self.expecting_pong {
            self.fold_round_sample();
            self.advance_round();
        }
        self.expecting_pong = true;
        self.pong_received = false;
        self.ping_send_time = self.timer.now();
        ctx.mc
            .send(Packet::bare(self.nodes[self.current_node].ping_key));
    }

    fn on_host_frame(&mut self, frame: &SdpFrame, ctx: &mut TickContext<'_>) {
        let Some(command) = HostCommand::from_cmd(frame.cmd) else {
            warn!("controller: reserved host command {}", frame.cmd);
            return;
        };
        match command {
            HostCommand::GetTime => {
                ctx.host.send(
                    SdpFrame::to_host(
                        self.srce_addr,
                        self.srce_port,
                        TAG_CONTROLLER_REPLY,
                        command.cmd(),
                    )
                    .with_args(self.timer.now(), 0),
                );
            }
            HostCommand::GetDrift => {
                ctx.host.send(
                    SdpFrame::to_host(
                        self.srce_addr,
                        self.srce_port,
                        TAG_CONTROLLER_REPLY,
                        command.cmd(),
                    )
                    .with_args(self.correction_range, 0),
                );
            }
            HostCommand::StartAt => {
                info!("controller: broadcasting start at tick {}", frame.arg1);
                ctx.mc
                    .send(Packet::with_payload(self.start_at_key, frame.arg1));
            }
            HostCommand::StopAt => {
                info!("controller: broadcasting stop at tick {}", frame.arg1);
                ctx.mc
                    .send(Packet::with_payload(self.stop_at_key, frame.arg1));
            }
        }
    }
}
