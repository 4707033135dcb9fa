// Hardware capabilities consumed by the motion executor
//
// The executor only needs to write angles, bind/unbind PWM outputs and keep
// time. Real backends (serial controller) and the simulator implement these.

use std::time::{Duration, Instant};

/// Errors raised by a servo bus backend
#[derive(Debug, thiserror::Error)]
pub enum HardwareError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("PWM channel {pin} is not attached")]
    Detached { pin: u8 },

    #[error("PWM channel {pin} does not exist on this controller ({channels} channels)")]
    InvalidPin { pin: u8, channels: u8 },

    #[error("Controller reported error flags 0x{code:04X}")]
    Device { code: u16 },
}

/// PWM output stage driving hobby servos.
///
/// Channels are identified by their hardware pin. Angles are servo degrees
/// in 0..=180 with 90 at center.
pub trait ServoBus {
    /// Number of PWM channels the controller exposes
    fn channel_count(&self) -> u8;

    /// Bind a PWM output so subsequent writes produce pulses
    fn attach(&mut self, pin: u8) -> Result<(), HardwareError>;

    /// Stop pulses on a channel, letting the servo go limp
    fn detach(&mut self, pin: u8) -> Result<(), HardwareError>;

    /// Command one servo position
    fn set_angle(&mut self, pin: u8, degrees: f32) -> Result<(), HardwareError>;
}

/// Timing primitives for the control-tick loop
pub trait Clock {
    /// Monotonic milliseconds since an arbitrary origin
    fn now_ms(&self) -> u64;

    /// Block the calling context
    fn sleep_ms(&mut self, ms: u64);
}

/// Wall clock backed by `Instant`, sleeping with `spin_sleep` so the control
/// tick does not drift by the OS scheduler granularity
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    fn sleep_ms(&mut self, ms: u64) {
        if ms > 0 {
            spin_sleep::sleep(Duration::from_millis(ms));
        }
    }
}

/// Map a servo angle to a pulse width in microseconds (500..2500 us over 0..180 deg)
pub fn angle_to_pulse_us(degrees: f32) -> f32 {
    const MIN_PULSE_US: f32 = 500.0;
    const MAX_PULSE_US: f32 = 2500.0;

    let degrees = degrees.clamp(0.0, 180.0);
    MIN_PULSE_US + degrees / 180.0 * (MAX_PULSE_US - MIN_PULSE_US)
}
