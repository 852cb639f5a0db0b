//! Worker-side disciplined clock
//!
//! Each worker keeps its tick schedule locked to the simulation
//! controller's reference: it answers pings with its raw timer value,
//! folds received corrections into a phase offset (first correction sets
//! the phase absolutely, later ones adjust it), and arms or disarms its
//! simulation timer on the start/stop broadcasts.

use log::{debug, info};
use nefab_fabric::{HardwareTimer, MulticastTx, Packet};

/// The reserved keys a worker's clock listens on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ClockKeys {
    /// Controller pings arrive on this key
    pub ping: u32,
    /// Pong replies leave on this key
    pub pong: u32,
    /// Phase corrections arrive on this key
    pub correction: u32,
    /// Synchronized start broadcasts
    pub start_at: u32,
    /// Synchronized stop broadcasts
    pub stop_at: u32,
}

/// Per-core logical clock kept in lockstep with the controller
#[derive(Debug)]
pub struct DisciplinedClock {
    keys: ClockKeys,
    timer: HardwareTimer,
    phase: u32,
    synchronized: bool,
    last_correction: i32,
    start_tick: Option<u64>,
    stop_tick: Option<u64>,
}

impl DisciplinedClock {
    /// Create an unsynchronized clock
    pub fn new(keys: ClockKeys) -> Self {
        Self {
            keys,
            timer: HardwareTimer::new(),
            phase: 0,
            synchronized: false,
            last_correction: 0,
            start_tick: None,
            stop_tick: None,
        }
    }

    /// Offer an incoming packet; returns `true` when it was clock traffic
    pub fn on_packet(&mut self, key: u32, payload: u32, mc: &mut dyn MulticastTx) -> bool {
        if key == self.keys.ping {
            mc.send(Packet::with_payload(self.keys.pong, self.timer.now()));
            true
        } else if key == self.keys.correction {
            let error = payload as i32;
            if self.synchronized {
                self.phase = self.phase.wrapping_add(error as u32);
            } else {
                self.phase = error as u32;
                self.synchronized = true;
            }
            self.last_correction = error;
            debug!("clock: applied correction {}", error);
            true
        } else if key == self.keys.start_at {
            self.start_tick = Some(payload as u64);
            info!("clock: simulation armed at tick {}", payload);
            true
        } else if key == self.keys.stop_at {
            self.stop_tick = Some(payload as u64);
            info!("clock: simulation stop set at tick {}", payload);
            true
        } else {
            false
        }
    }

    /// Advance the underlying hardware timer by `us` microseconds
    pub fn advance(&mut self, us: u32) {
        self.timer.advance(us);
    }

    /// Raw local timestamp, as sent in pong replies
    pub fn raw_time(&self) -> u32 {
        self.timer.now()
    }

    /// Disciplined timestamp: raw time plus the accumulated phase
    pub fn local_time(&self) -> u32 {
        self.timer.now().wrapping_add(self.phase)
    }

    /// Last correction received
    pub fn last_correction(&self) -> i32 {
        self.last_correction
    }

    /// Whether at least one correction has been applied
    pub fn is_synchronized(&self) -> bool {
        self.synchronized
    }

    /// Whether the simulation timer is armed
    pub fn is_armed(&self) -> bool {
        self.start_tick.is_some()
    }

    /// Stop tick from the most recent stop broadcast
    pub fn stop_tick(&self) -> Option<u64> {
        self.stop_tick
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nefab_fabric::VecTx;

    const KEYS: ClockKeys = ClockKeys {
        ping: 0x100,
        pong: 0x101,
        correction: 0x102,
        start_at: 0x200,
        stop_at: 0x201,
    };

    #[test]
    fn test_ping_answered_with_raw_time() {
        let mut clock = DisciplinedClock::new(KEYS);
        clock.advance(500);
        let mut mc = VecTx::new();
        assert!(clock.on_packet(KEYS.ping, 0, &mut mc));
        assert_eq!(mc.sent.len(), 1);
        assert_eq!(mc.sent[0].key, KEYS.pong);
        assert_eq!(mc.sent[0].payload, Some(clock.raw_time()));
    }

    #[test]
    fn test_first_correction_absolute_then_relative() {
        let mut clock = DisciplinedClock::new(KEYS);
        let mut mc = VecTx::new();
        let raw = clock.local_time();

        clock.on_packet(KEYS.correction, 100u32, &mut mc);
        assert!(clock.is_synchronized());
        assert_eq!(clock.local_time().wrapping_sub(raw), 100);

        clock.on_packet(KEYS.correction, (-30i32) as u32, &mut mc);
        assert_eq!(clock.local_time().wrapping_sub(raw), 70);
        assert_eq!(clock.last_correction(), -30);
    }

    #[test]
    fn test_start_stop_arming() {
        let mut clock = DisciplinedClock::new(KEYS);
        let mut mc = VecTx::new();
        assert!(!clock.is_armed());
        clock.on_packet(KEYS.start_at, 5, &mut mc);
        assert!(clock.is_armed());
        clock.on_packet(KEYS.stop_at, 900, &mut mc);
        assert_eq!(clock.stop_tick(), Some(900));
    }

    #[test]
    fn test_foreign_key_ignored() {
        let mut clock = DisciplinedClock::new(KEYS);
        let mut mc = VecTx::new();
        assert!(!clock.on_packet(0xDEAD, 1, &mut mc));
        assert!(mc.sent.is_empty());
    }
}
