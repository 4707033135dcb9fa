// Control tick, motion constants, robot wiring configuration
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::error::OttoError;
use crate::servo::{ServoArray, ServoId};

// Motion executor control tick
pub const CONTROL_TICK_MS: u32 = 10;

// Default speed limit, degree / sec
pub const SERVO_LIMIT_DEFAULT: f32 = 240.0;

// Servo geometry (degrees). Oscillator offsets are relative to center.
pub const SERVO_CENTER: f32 = 90.0;
pub const DEFAULT_MIN_ANGLE: f32 = 0.0;
pub const DEFAULT_MAX_ANGLE: f32 = 180.0;

// Left hand rests at 45, right hand mirrored at 135
pub const HAND_HOME_POSITION: f32 = 45.0;

/// Neutral pose for all six servos
pub const HOME_POSE: [f32; 6] = [
    SERVO_CENTER,
    SERVO_CENTER,
    SERVO_CENTER,
    SERVO_CENTER,
    HAND_HOME_POSITION,
    180.0 - HAND_HOME_POSITION,
];

// Home transition and the pause after it
pub const HOME_MOVE_MS: u32 = 500;
pub const HOME_SETTLE_MS: u64 = 200;

// How close (deg) every servo must be to count as "at home"
pub const HOME_TOLERANCE: f32 = 1.0;

// Extra ticks a direct move may spend re-issuing its target
pub const MAX_SETTLE_TICKS: u32 = 10;

// Gait magnitudes
pub const SMALL: f32 = 5.0;
pub const MEDIUM: f32 = 15.0;
pub const BIG: f32 = 30.0;

// Runtime: home and detach after this long without commands
pub const IDLE_REST_TIMEOUT: Duration = Duration::from_secs(30);

// Serial servo controller
pub const SERVO_PORT: &str = "/dev/ttyACM0";
pub const SERVO_CONTROLLER_CHANNELS: u8 = 6;

/// Wiring and calibration for a single servo
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServoConfig {
    pub pin: u8,
    #[serde(default)]
    pub trim: f32,
    #[serde(default = "default_min_angle")]
    pub min_angle: f32,
    #[serde(default = "default_max_angle")]
    pub max_angle: f32,
    /// deg/s, only enforced while the global speed limit is on
    #[serde(default = "default_max_velocity")]
    pub max_velocity: f32,
    #[serde(default = "default_true")]
    pub limit_enabled: bool,
}

impl ServoConfig {
    pub fn on_pin(pin: u8) -> Self {
        Self {
            pin,
            trim: 0.0,
            min_angle: DEFAULT_MIN_ANGLE,
            max_angle: DEFAULT_MAX_ANGLE,
            max_velocity: SERVO_LIMIT_DEFAULT,
            limit_enabled: true,
        }
    }
}

/// Legs and feet are mandatory, hands are an optional pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServoLayout {
    pub left_leg: ServoConfig,
    pub right_leg: ServoConfig,
    pub left_foot: ServoConfig,
    pub right_foot: ServoConfig,
    #[serde(default)]
    pub left_hand: Option<ServoConfig>,
    #[serde(default)]
    pub right_hand: Option<ServoConfig>,
}

impl ServoLayout {
    pub fn to_array(&self) -> ServoArray<Option<ServoConfig>> {
        ServoArray::new([
            Some(self.left_leg.clone()),
            Some(self.right_leg.clone()),
            Some(self.left_foot.clone()),
            Some(self.right_foot.clone()),
            self.left_hand.clone(),
            self.right_hand.clone(),
        ])
    }
}

/// Robot configuration, loadable from JSON
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobotConfig {
    pub servos: ServoLayout,
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u32,
    /// Global speed limit applied at init (deg/s); `null` starts unlimited
    #[serde(default = "default_speed_limit")]
    pub speed_limit: Option<f32>,
}

impl Default for RobotConfig {
    /// Six servos on PWM channels 0..5, no trims, default speed limit
    fn default() -> Self {
        Self {
            servos: ServoLayout {
                left_leg: ServoConfig::on_pin(0),
                right_leg: ServoConfig::on_pin(1),
                left_foot: ServoConfig::on_pin(2),
                right_foot: ServoConfig::on_pin(3),
                left_hand: Some(ServoConfig::on_pin(4)),
                right_hand: Some(ServoConfig::on_pin(5)),
            },
            tick_ms: CONTROL_TICK_MS,
            speed_limit: Some(SERVO_LIMIT_DEFAULT),
        }
    }
}

impl RobotConfig {
    /// Four-servo robot without arms
    pub fn without_hands() -> Self {
        let mut config = Self::default();
        config.servos.left_hand = None;
        config.servos.right_hand = None;
        config
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, OttoError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| OttoError::ConfigIo {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text)?;
        debug!("Loaded robot config from {}", path.display());
        Ok(config)
    }

    /// Check the configuration against a controller with `channels` outputs.
    ///
    /// Runs before any hardware is touched.
    pub fn validate(&self, channels: u8) -> Result<(), OttoError> {
        if self.tick_ms == 0 {
            return Err(OttoError::InvalidTick);
        }
        if let Some(limit) = self.speed_limit
            && !(limit > 0.0)
        {
            return Err(OttoError::InvalidSpeedLimit(limit));
        }
        if self.servos.left_hand.is_some() != self.servos.right_hand.is_some() {
            return Err(OttoError::UnpairedHands);
        }

        let mut seen: Vec<(u8, ServoId)> = Vec::new();
        for (id, servo) in self.servos.to_array().iter() {
            let Some(servo) = servo else { continue };

            if servo.pin >= channels {
                return Err(OttoError::PinOutOfRange {
                    servo: id,
                    pin: servo.pin,
                    channels,
                });
            }
            if let Some(&(_, first)) = seen.iter().find(|(pin, _)| *pin == servo.pin) {
                return Err(OttoError::DuplicatePin {
                    pin: servo.pin,
                    first,
                    second: id,
                });
            }
            seen.push((servo.pin, id));

            let bounds_ok = servo.min_angle >= DEFAULT_MIN_ANGLE
                && servo.max_angle <= DEFAULT_MAX_ANGLE
                && servo.min_angle < servo.max_angle;
            if !bounds_ok {
                return Err(OttoError::InvalidBounds {
                    servo: id,
                    min: servo.min_angle,
                    max: servo.max_angle,
                });
            }
            if !(servo.max_velocity > 0.0) {
                return Err(OttoError::InvalidVelocity {
                    servo: id,
                    value: servo.max_velocity,
                });
            }
        }
        Ok(())
    }
}

fn default_min_angle() -> f32 {
    DEFAULT_MIN_ANGLE
}

fn default_max_angle() -> f32 {
    DEFAULT_MAX_ANGLE
}

fn default_max_velocity() -> f32 {
    SERVO_LIMIT_DEFAULT
}

fn default_true() -> bool {
    true
}

fn default_tick_ms() -> u32 {
    CONTROL_TICK_MS
}

fn default_speed_limit() -> Option<f32> {
    Some(SERVO_LIMIT_DEFAULT)
}
