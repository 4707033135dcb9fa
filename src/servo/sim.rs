// In-memory servo bus and manual clock
//
// Used by the test-suite and by `--simulate`. A recording bus keeps every
// angle write so motions can be inspected tick by tick; a plain bus only
// remembers the last angle per pin.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use super::hardware::{Clock, HardwareError, ServoBus};

/// Clock whose time only moves when someone sleeps on it.
///
/// Clones share the same time source, so a `SimBus` holding a clone can
/// timestamp writes with the executor's notion of time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Jump forward without going through `sleep_ms`
    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }

    fn sleep_ms(&mut self, ms: u64) {
        self.advance(ms);
    }
}

/// One recorded `set_angle` call
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ServoWrite {
    pub pin: u8,
    pub angle: f32,
    pub at_ms: u64,
}

/// Servo bus that accepts writes instead of driving hardware
#[derive(Debug, Clone)]
pub struct SimBus {
    channels: u8,
    attached: Vec<bool>,
    angles: Vec<Option<f32>>,
    writes: Vec<ServoWrite>,
    record: bool,
    failing: HashSet<u8>,
    clock: Option<ManualClock>,
}

impl SimBus {
    /// Bus without write history, safe to drive indefinitely
    pub fn new(channels: u8) -> Self {
        Self {
            channels,
            attached: vec![false; channels as usize],
            angles: vec![None; channels as usize],
            writes: Vec::new(),
            record: false,
            failing: HashSet::new(),
            clock: None,
        }
    }

    /// Bus that keeps every write for later inspection
    pub fn recording(channels: u8) -> Self {
        Self {
            record: true,
            ..Self::new(channels)
        }
    }

    /// Stamp writes with the time of a shared manual clock
    pub fn with_clock(mut self, clock: ManualClock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Make every future write to `pin` fail, as a dead PWM output would
    pub fn fail_pin(&mut self, pin: u8) {
        self.failing.insert(pin);
    }

    pub fn is_attached(&self, pin: u8) -> bool {
        self.attached.get(pin as usize).copied().unwrap_or(false)
    }

    pub fn writes(&self) -> &[ServoWrite] {
        &self.writes
    }

    /// Writes to a single pin, in order
    pub fn writes_for(&self, pin: u8) -> Vec<ServoWrite> {
        self.writes.iter().filter(|w| w.pin == pin).copied().collect()
    }

    pub fn last_angle(&self, pin: u8) -> Option<f32> {
        self.angles.get(pin as usize).copied().flatten()
    }

    pub fn clear_writes(&mut self) {
        self.writes.clear();
    }

    fn check_pin(&self, pin: u8) -> Result<(), HardwareError> {
        if pin >= self.channels {
            return Err(HardwareError::InvalidPin {
                pin,
                channels: self.channels,
            });
        }
        Ok(())
    }
}

impl ServoBus for SimBus {
    fn channel_count(&self) -> u8 {
        self.channels
    }

    fn attach(&mut self, pin: u8) -> Result<(), HardwareError> {
        self.check_pin(pin)?;
        self.attached[pin as usize] = true;
        Ok(())
    }

    fn detach(&mut self, pin: u8) -> Result<(), HardwareError> {
        self.check_pin(pin)?;
        self.attached[pin as usize] = false;
        Ok(())
    }

    fn set_angle(&mut self, pin: u8, degrees: f32) -> Result<(), HardwareError> {
        self.check_pin(pin)?;
        if self.failing.contains(&pin) || !self.attached[pin as usize] {
            return Err(HardwareError::Detached { pin });
        }

        let at_ms = self.clock.as_ref().map_or(0, |c| c.now_ms());
        debug!("sim write: pin={} angle={:.2} t={}ms", pin, degrees, at_ms);
        self.angles[pin as usize] = Some(degrees);
        if self.record {
            self.writes.push(ServoWrite {
                pin,
                angle: degrees,
                at_ms,
            });
        }
        Ok(())
    }
}
