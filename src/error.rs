// Errors raised while configuring or driving the robot
use std::path::PathBuf;

use crate::servo::{HardwareError, ServoId};

#[derive(Debug, thiserror::Error)]
pub enum OttoError {
    #[error("Failed to read config {}: {source}", .path.display())]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    ConfigParse(#[from] serde_json::Error),

    #[error("Control tick must be at least 1 ms")]
    InvalidTick,

    #[error("Speed limit must be positive, got {0}")]
    InvalidSpeedLimit(f32),

    #[error("Pin {pin} is assigned to both {first} and {second}")]
    DuplicatePin {
        pin: u8,
        first: ServoId,
        second: ServoId,
    },

    #[error("{servo} uses pin {pin} but the controller only has {channels} channels")]
    PinOutOfRange { servo: ServoId, pin: u8, channels: u8 },

    #[error("Hand servos must be configured as a pair")]
    UnpairedHands,

    #[error("{servo} has invalid bounds [{min}, {max}]")]
    InvalidBounds { servo: ServoId, min: f32, max: f32 },

    #[error("{servo} has invalid velocity limit {value} deg/s")]
    InvalidVelocity { servo: ServoId, value: f32 },

    #[error("{0} is not configured on this robot")]
    ServoNotConfigured(ServoId),

    #[error("No servo with index {0}")]
    UnknownServo(usize),

    #[error("Robot can only be marked resting at the home pose")]
    NotAtHome,

    #[error("Hardware error on {servo}: {source}")]
    Hardware {
        servo: ServoId,
        #[source]
        source: HardwareError,
    },
}
