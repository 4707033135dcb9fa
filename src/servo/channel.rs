// Servo identity and per-channel state
//
// The six Otto servos are addressed through a closed enum instead of raw
// indices, and per-servo data lives in a fixed-size `ServoArray`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Index, IndexMut};

use crate::config::{DEFAULT_MAX_ANGLE, DEFAULT_MIN_ANGLE, SERVO_LIMIT_DEFAULT};

/// Number of servo slots on the robot (4 leg servos + 2 optional hands)
pub const SERVO_COUNT: usize = 6;

/// Servo slot. The discriminant is the positional index (0 = left leg).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServoId {
    LeftLeg = 0,
    RightLeg = 1,
    LeftFoot = 2,
    RightFoot = 3,
    LeftHand = 4,
    RightHand = 5,
}

impl ServoId {
    pub const ALL: [ServoId; SERVO_COUNT] = [
        ServoId::LeftLeg,
        ServoId::RightLeg,
        ServoId::LeftFoot,
        ServoId::RightFoot,
        ServoId::LeftHand,
        ServoId::RightHand,
    ];

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Checked conversion from a positional index
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub const fn is_hand(self) -> bool {
        matches!(self, ServoId::LeftHand | ServoId::RightHand)
    }

    pub const fn name(self) -> &'static str {
        match self {
            ServoId::LeftLeg => "left_leg",
            ServoId::RightLeg => "right_leg",
            ServoId::LeftFoot => "left_foot",
            ServoId::RightFoot => "right_foot",
            ServoId::LeftHand => "left_hand",
            ServoId::RightHand => "right_hand",
        }
    }
}

impl fmt::Display for ServoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One value per servo slot, indexed by `ServoId`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServoArray<T>([T; SERVO_COUNT]);

impl<T: Copy> Copy for ServoArray<T> {}

impl<T> ServoArray<T> {
    pub const fn new(data: [T; SERVO_COUNT]) -> Self {
        Self(data)
    }

    pub fn from_fn(mut f: impl FnMut(ServoId) -> T) -> Self {
        Self(ServoId::ALL.map(&mut f))
    }

    pub fn as_array(&self) -> &[T; SERVO_COUNT] {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = (ServoId, &T)> {
        ServoId::ALL.into_iter().zip(self.0.iter())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (ServoId, &mut T)> {
        ServoId::ALL.into_iter().zip(self.0.iter_mut())
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> ServoArray<U> {
        ServoArray(self.0.map(f))
    }
}

impl<T: Copy> ServoArray<T> {
    /// Same value in every slot
    pub const fn splat(value: T) -> Self {
        Self([value; SERVO_COUNT])
    }
}

impl<T> Index<ServoId> for ServoArray<T> {
    type Output = T;

    #[inline]
    fn index(&self, id: ServoId) -> &T {
        &self.0[id.index()]
    }
}

impl<T> IndexMut<ServoId> for ServoArray<T> {
    #[inline]
    fn index_mut(&mut self, id: ServoId) -> &mut T {
        &mut self.0[id.index()]
    }
}

impl<T> From<[T; SERVO_COUNT]> for ServoArray<T> {
    fn from(data: [T; SERVO_COUNT]) -> Self {
        Self(data)
    }
}

/// Runtime state of one configured servo.
///
/// `angle` is the logical (pre-trim) position last commanded, `None` until
/// the first write after init.
#[derive(Debug, Clone, PartialEq)]
pub struct ServoChannel {
    pub id: ServoId,
    pub pin: u8,
    pub trim: f32,
    pub angle: Option<f32>,
    pub min_angle: f32,
    pub max_angle: f32,
    /// deg/s
    pub max_velocity: f32,
    pub limit_enabled: bool,
    pub attached: bool,
}

impl ServoChannel {
    pub fn new(id: ServoId, pin: u8) -> Self {
        Self {
            id,
            pin,
            trim: 0.0,
            angle: None,
            min_angle: DEFAULT_MIN_ANGLE,
            max_angle: DEFAULT_MAX_ANGLE,
            max_velocity: SERVO_LIMIT_DEFAULT,
            limit_enabled: true,
            attached: false,
        }
    }

    /// Angle that reaches the hardware for a logical position: trim added,
    /// then clamped into the safe bounds. Returns the angle and whether it
    /// had to be clamped.
    pub fn output_angle(&self, position: f32) -> (f32, bool) {
        let raw = position + self.trim;
        let clamped = raw.clamp(self.min_angle, self.max_angle);
        (clamped, clamped != raw)
    }
}
