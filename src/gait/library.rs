// Named gaits for the Otto biped
//
// Oscillating gaits are pure functions from (direction, magnitude) to the six
// (amplitude, offset, phase-difference) triples; the executor runs them for
// the requested number of steps. Keyframe gaits (jump, bend, shake, hand
// moves) are sequences of timed direct moves between fixed poses.
//
// Directions are sign/phase choices inside the vectors, not separate paths.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::executor::MotionReport;
use super::oscillator::OscillatorBank;
use crate::config::{BIG, HAND_HOME_POSITION, HOME_POSE, MEDIUM, SERVO_CENTER, SMALL};
use crate::robot::Otto;
use crate::servo::{Clock, ServoArray, ServoBus, ServoId};

// Hands hold their home angle while the legs oscillate
const LEFT_HAND_HOLD: f32 = HAND_HOME_POSITION - SERVO_CENTER;
const RIGHT_HAND_HOLD: f32 = (180.0 - HAND_HOME_POSITION) - SERVO_CENTER;

// Raised hand angles and wave swing
const LEFT_HAND_RAISED: f32 = 170.0;
const RIGHT_HAND_RAISED: f32 = 10.0;
const WAVE_AMPLITUDE: f32 = 30.0;
const WAVE_CYCLES: u32 = 5;
const WAVE_RAISE_MS: u32 = 300;

// Keyframe gait timings, fixed to avoid falls
const BEND_MOVE_MS: u32 = 800;
const SHAKE_BEND_MS: u32 = 1000;
const SHAKE_LEG_MOVES: u32 = 2;
const SHAKE_MIN_MS: u32 = 400;
const RETURN_HOME_MS: u32 = 500;

const SHOW_PAUSE_MS: u64 = 1000;

/// Forward / backward
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Forward,
    Backward,
}

impl Direction {
    pub fn sign(self) -> f32 {
        match self {
            Direction::Forward => 1.0,
            Direction::Backward => -1.0,
        }
    }
}

/// Left / right
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn sign(self) -> f32 {
        match self {
            Side::Left => 1.0,
            Side::Right => -1.0,
        }
    }
}

/// Which hand(s) a hand gesture uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Hands {
    Left,
    Right,
    Both,
}

impl Hands {
    fn left(self) -> bool {
        matches!(self, Hands::Left | Hands::Both)
    }

    fn right(self) -> bool {
        matches!(self, Hands::Right | Hands::Both)
    }
}

/// Oscillator vectors for one gait. Offsets are relative to servo center,
/// phases in radians.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GaitParams {
    pub amplitude: ServoArray<f32>,
    pub offset: ServoArray<f32>,
    pub phase_diff: ServoArray<f32>,
}

impl GaitParams {
    /// Leg/foot vectors `[left leg, right leg, left foot, right foot]`,
    /// phases in degrees; hands hold their home angle
    fn legs(amplitude: [f32; 4], offset: [f32; 4], phase_deg: [f32; 4]) -> Self {
        let [la, ra, lfa, rfa] = amplitude;
        let [lo, ro, lfo, rfo] = offset;
        let [lp, rp, lfp, rfp] = phase_deg.map(f32::to_radians);
        Self {
            amplitude: ServoArray::new([la, ra, lfa, rfa, 0.0, 0.0]),
            offset: ServoArray::new([lo, ro, lfo, rfo, LEFT_HAND_HOLD, RIGHT_HAND_HOLD]),
            phase_diff: ServoArray::new([lp, rp, lfp, rfp, 0.0, 0.0]),
        }
    }

    pub fn bank(&self, period_ms: u32) -> OscillatorBank {
        OscillatorBank::new(&self.amplitude, &self.offset, &self.phase_diff, period_ms)
    }

    /// Same offsets and phases with every amplitude zeroed
    pub fn with_zero_amplitude(mut self) -> Self {
        self.amplitude = ServoArray::splat(0.0);
        self
    }

    /// Widest excursion from center each servo can reach
    pub fn reach(&self) -> ServoArray<f32> {
        ServoArray::from_fn(|id| self.amplitude[id].abs() + self.offset[id].abs())
    }
}

/// Oscillator-driven gaits
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OscillatingGait {
    Walk { dir: Direction, amount: f32 },
    Turn { side: Side, amount: f32 },
    UpDown { height: f32 },
    Swing { height: f32 },
    TiptoeSwing { height: f32 },
    Jitter { height: f32 },
    AscendingTurn { height: f32 },
    Moonwalker { height: f32, side: Side },
    Crusaito { height: f32, side: Side },
    Flapping { height: f32, dir: Direction },
}

impl OscillatingGait {
    pub fn name(&self) -> &'static str {
        match self {
            OscillatingGait::Walk { .. } => "walk",
            OscillatingGait::Turn { .. } => "turn",
            OscillatingGait::UpDown { .. } => "up_down",
            OscillatingGait::Swing { .. } => "swing",
            OscillatingGait::TiptoeSwing { .. } => "tiptoe_swing",
            OscillatingGait::Jitter { .. } => "jitter",
            OscillatingGait::AscendingTurn { .. } => "ascending_turn",
            OscillatingGait::Moonwalker { .. } => "moonwalker",
            OscillatingGait::Crusaito { .. } => "crusaito",
            OscillatingGait::Flapping { .. } => "flapping",
        }
    }

    /// Oscillator vectors; hand swing only applies when `has_hands`
    pub fn params(&self, has_hands: bool) -> GaitParams {
        match *self {
            // Hips in phase, feet in phase, hips and feet 90 deg apart:
            // -90 walks forward, +90 backward. Feet tiptoe slightly.
            OscillatingGait::Walk { dir, amount } => {
                let feet = -90.0 * dir.sign();
                let mut params =
                    GaitParams::legs([30.0, 30.0, 30.0, 30.0], [0.0, 0.0, 5.0, -5.0], [
                        0.0, 0.0, feet, feet,
                    ]);
                swing_hands(&mut params, has_hands, amount, ServoId::RightLeg, ServoId::LeftLeg);
                params
            }
            // Walking coordination with one hip silenced: the robot arcs
            // toward the side whose hip still swings
            OscillatingGait::Turn { side, amount } => {
                let (left_hip, right_hip) = match side {
                    Side::Left => (30.0, 0.0),
                    Side::Right => (0.0, 30.0),
                };
                let mut params = GaitParams::legs(
                    [left_hip, right_hip, 30.0, 30.0],
                    [0.0, 0.0, 5.0, -5.0],
                    [0.0, 0.0, -90.0, -90.0],
                );
                swing_hands(&mut params, has_hands, amount, ServoId::LeftLeg, ServoId::RightLeg);
                params
            }
            // Feet 180 deg apart, starting at an extreme
            OscillatingGait::UpDown { height } => GaitParams::legs(
                [0.0, 0.0, height, height],
                [0.0, 0.0, height, -height],
                [0.0, 0.0, -90.0, 90.0],
            ),
            // Feet in phase, offset half the amplitude
            OscillatingGait::Swing { height } => GaitParams::legs(
                [0.0, 0.0, height, height],
                [0.0, 0.0, height / 2.0, -height / 2.0],
                [0.0; 4],
            ),
            // Offset equal to amplitude keeps the heels off the floor
            OscillatingGait::TiptoeSwing { height } => GaitParams::legs(
                [0.0, 0.0, height, height],
                [0.0, 0.0, height, -height],
                [0.0; 4],
            ),
            OscillatingGait::Jitter { height } => {
                let height = height.min(25.0);
                GaitParams::legs([height, height, 0.0, 0.0], [0.0; 4], [-90.0, 90.0, 0.0, 0.0])
            }
            OscillatingGait::AscendingTurn { height } => {
                let height = height.min(13.0);
                GaitParams::legs(
                    [height; 4],
                    [0.0, 0.0, height + 4.0, -height + 4.0],
                    [-90.0, 90.0, -90.0, 90.0],
                )
            }
            // Two mirrored feet 60 deg apart make a travelling wave
            OscillatingGait::Moonwalker { height, side } => {
                let phi = -90.0 * side.sign();
                GaitParams::legs(
                    [0.0, 0.0, height, height],
                    [0.0, 0.0, height / 2.0 + 2.0, -height / 2.0 - 2.0],
                    [0.0, 0.0, phi, -60.0 * side.sign() + phi],
                )
            }
            OscillatingGait::Crusaito { height, side } => GaitParams::legs(
                [25.0, 25.0, height, height],
                [0.0, 0.0, height / 2.0 + 4.0, -height / 2.0 - 4.0],
                [90.0, 90.0, 0.0, -60.0 * side.sign()],
            ),
            OscillatingGait::Flapping { height, dir } => GaitParams::legs(
                [12.0, 12.0, height, height],
                [0.0, 0.0, height - 10.0, -height + 10.0],
                [0.0, 180.0, -90.0 * dir.sign(), 90.0 * dir.sign()],
            ),
        }
    }
}

/// Swing both hands with `amount`, each following the phase of a hip
fn swing_hands(params: &mut GaitParams, has_hands: bool, amount: f32, left: ServoId, right: ServoId) {
    if !has_hands || amount <= 0.0 {
        return;
    }
    params.amplitude[ServoId::LeftHand] = amount;
    params.amplitude[ServoId::RightHand] = amount;
    params.phase_diff[ServoId::LeftHand] = params.phase_diff[left];
    params.phase_diff[ServoId::RightHand] = params.phase_diff[right];
}

pub fn home_pose() -> ServoArray<f32> {
    ServoArray::new(HOME_POSE)
}

/// Crouched pose at the top of a jump
pub fn jump_pose() -> ServoArray<f32> {
    with_feet(150.0, 30.0)
}

/// The two bend keyframes. Right bends are not a plain mirror: the robot is
/// unbalanced at 65 so the standing foot stays at 120.
pub fn bend_poses(side: Side) -> [ServoArray<f32>; 2] {
    match side {
        Side::Left => [with_feet(62.0, 35.0), with_feet(62.0, 105.0)],
        Side::Right => [with_feet(145.0, 120.0), with_feet(75.0, 120.0)],
    }
}

/// Lift, extend and shake keyframes for `shake_leg`
pub fn shake_poses(side: Side) -> [ServoArray<f32>; 3] {
    match side {
        Side::Left => [with_feet(58.0, 35.0), with_feet(58.0, 120.0), with_feet(58.0, 60.0)],
        Side::Right => [
            with_feet(145.0, 122.0),
            with_feet(60.0, 122.0),
            with_feet(120.0, 122.0),
        ],
    }
}

/// Home pose with custom foot angles
fn with_feet(left_foot: f32, right_foot: f32) -> ServoArray<f32> {
    let mut pose = home_pose();
    pose[ServoId::LeftFoot] = left_foot;
    pose[ServoId::RightFoot] = right_foot;
    pose
}

impl<B: ServoBus, C: Clock> Otto<B, C> {
    /// Run an oscillating gait for `steps` cycles of `period_ms`
    pub fn run_gait(&mut self, gait: OscillatingGait, steps: f32, period_ms: u32) -> MotionReport {
        self.begin_gait(gait.name());
        self.wake();
        let params = gait.params(self.state.has_hands());
        self.oscillate(&params, period_ms, steps);
        self.finish_gait()
    }

    /// Walk forward or backward. `amount` swings the hands (0 keeps them
    /// still). Whole steps end with the hips centered and the feet at the
    /// bottom of their swing.
    pub fn walk(&mut self, steps: f32, period_ms: u32, dir: Direction, amount: f32) -> MotionReport {
        self.run_gait(OscillatingGait::Walk { dir, amount }, steps, period_ms)
    }

    pub fn turn(&mut self, steps: f32, period_ms: u32, side: Side, amount: f32) -> MotionReport {
        self.run_gait(OscillatingGait::Turn { side, amount }, steps, period_ms)
    }

    /// `height`: SMALL / MEDIUM / BIG or degrees 0..90
    pub fn up_down(&mut self, steps: f32, period_ms: u32, height: f32) -> MotionReport {
        self.run_gait(OscillatingGait::UpDown { height }, steps, period_ms)
    }

    /// Side to side swing, `height` roughly 0..50
    pub fn swing(&mut self, steps: f32, period_ms: u32, height: f32) -> MotionReport {
        self.run_gait(OscillatingGait::Swing { height }, steps, period_ms)
    }

    pub fn tiptoe_swing(&mut self, steps: f32, period_ms: u32, height: f32) -> MotionReport {
        self.run_gait(OscillatingGait::TiptoeSwing { height }, steps, period_ms)
    }

    /// Hip jitter; `height` is capped at 25 so the feet never collide
    pub fn jitter(&mut self, steps: f32, period_ms: u32, height: f32) -> MotionReport {
        self.run_gait(OscillatingGait::Jitter { height }, steps, period_ms)
    }

    /// Jitter while moving up and down; `height` is capped at 13
    pub fn ascending_turn(&mut self, steps: f32, period_ms: u32, height: f32) -> MotionReport {
        self.run_gait(OscillatingGait::AscendingTurn { height }, steps, period_ms)
    }

    pub fn moonwalker(&mut self, steps: f32, period_ms: u32, height: f32, side: Side) -> MotionReport {
        self.run_gait(OscillatingGait::Moonwalker { height, side }, steps, period_ms)
    }

    /// Mix of moonwalker and walk
    pub fn crusaito(&mut self, steps: f32, period_ms: u32, height: f32, side: Side) -> MotionReport {
        self.run_gait(OscillatingGait::Crusaito { height, side }, steps, period_ms)
    }

    pub fn flapping(&mut self, steps: f32, period_ms: u32, height: f32, dir: Direction) -> MotionReport {
        self.run_gait(OscillatingGait::Flapping { height, dir }, steps, period_ms)
    }

    /// Crouch and extend `ceil(steps)` times, each phase taking `period_ms`.
    /// Ends at the home pose.
    pub fn jump(&mut self, steps: f32, period_ms: u32) -> MotionReport {
        self.begin_gait("jump");
        self.wake();
        for _ in 0..repeat_count(steps) {
            self.ramp_to(period_ms, &jump_pose());
            self.ramp_to(period_ms, &home_pose());
        }
        self.finish_gait()
    }

    /// Lateral bend, holding for `0.8 * period_ms`. Ends at the home pose.
    pub fn bend(&mut self, steps: u32, period_ms: u32, side: Side) -> MotionReport {
        self.begin_gait("bend");
        self.wake();
        let [lean, tilt] = bend_poses(side);
        for _ in 0..steps {
            self.ramp_to(BEND_MOVE_MS / 2, &lean);
            self.ramp_to(BEND_MOVE_MS / 2, &tilt);
            self.pause(period_ms as u64 * 4 / 5);
            self.ramp_to(RETURN_HOME_MS, &home_pose());
        }
        self.finish_gait()
    }

    /// Lift one leg and shake it. `period_ms` includes the fixed 1 s lift;
    /// the shaking part never drops below 400 ms. Ends at the home pose.
    pub fn shake_leg(&mut self, steps: u32, period_ms: u32, side: Side) -> MotionReport {
        self.begin_gait("shake_leg");
        self.wake();
        let [lift, extend, shake] = shake_poses(side);
        let shake_ms = period_ms.saturating_sub(SHAKE_BEND_MS).max(SHAKE_MIN_MS);
        let move_ms = shake_ms / (2 * SHAKE_LEG_MOVES);

        for _ in 0..steps {
            self.ramp_to(SHAKE_BEND_MS / 2, &lift);
            self.ramp_to(SHAKE_BEND_MS / 2, &extend);
            for _ in 0..SHAKE_LEG_MOVES {
                self.ramp_to(move_ms, &shake);
                self.ramp_to(move_ms, &extend);
            }
            self.ramp_to(RETURN_HOME_MS, &home_pose());
        }
        self.pause(shake_ms as u64);
        self.finish_gait()
    }

    /// Raise the selected hand(s); legs go to home, an unselected hand stays
    pub fn hands_up(&mut self, period_ms: u32, hands: Hands) -> MotionReport {
        self.begin_gait("hands_up");
        if self.skip_without_hands() {
            return self.finish_gait();
        }
        self.wake();

        let current = self.current_pose();
        let mut target = home_pose();
        target[ServoId::LeftHand] = if hands.left() {
            LEFT_HAND_RAISED
        } else {
            current[ServoId::LeftHand]
        };
        target[ServoId::RightHand] = if hands.right() {
            RIGHT_HAND_RAISED
        } else {
            current[ServoId::RightHand]
        };
        self.ramp_to(period_ms, &target);
        self.finish_gait()
    }

    /// Lower the selected hand(s) to home; an unselected hand stays
    pub fn hands_down(&mut self, period_ms: u32, hands: Hands) -> MotionReport {
        self.begin_gait("hands_down");
        if self.skip_without_hands() {
            return self.finish_gait();
        }
        self.wake();

        let current = self.current_pose();
        let mut target = home_pose();
        if !hands.left() {
            target[ServoId::LeftHand] = current[ServoId::LeftHand];
        }
        if !hands.right() {
            target[ServoId::RightHand] = current[ServoId::RightHand];
        }
        self.ramp_to(period_ms, &target);
        self.finish_gait()
    }

    /// Raise, wave five times (`period_ms / 10` per half wave), lower.
    /// Legs keep their current pose.
    pub fn hand_wave(&mut self, period_ms: u32, hands: Hands) -> MotionReport {
        self.begin_gait("hand_wave");
        if self.skip_without_hands() {
            return self.finish_gait();
        }
        self.wake();

        let wave_ms = period_ms / 10;
        let mut pose = self.current_pose();
        let set_hands = |pose: &mut ServoArray<f32>, left: f32, right: f32| {
            if hands.left() {
                pose[ServoId::LeftHand] = left.clamp(0.0, 180.0);
            }
            if hands.right() {
                pose[ServoId::RightHand] = right.clamp(0.0, 180.0);
            }
        };

        set_hands(&mut pose, LEFT_HAND_RAISED, RIGHT_HAND_RAISED);
        self.ramp_to(WAVE_RAISE_MS, &pose);

        for _ in 0..WAVE_CYCLES {
            set_hands(
                &mut pose,
                LEFT_HAND_RAISED - WAVE_AMPLITUDE,
                RIGHT_HAND_RAISED + WAVE_AMPLITUDE,
            );
            self.ramp_to(wave_ms, &pose);
            set_hands(
                &mut pose,
                LEFT_HAND_RAISED + WAVE_AMPLITUDE,
                RIGHT_HAND_RAISED - WAVE_AMPLITUDE,
            );
            self.ramp_to(wave_ms, &pose);
        }

        set_hands(&mut pose, HAND_HOME_POSITION, 180.0 - HAND_HOME_POSITION);
        self.ramp_to(WAVE_RAISE_MS, &pose);
        self.finish_gait()
    }

    /// Demo choreography: most gaits back to back, home at both ends
    pub fn show(&mut self) -> MotionReport {
        let mut report = self.home(true);
        report.merge(self.pause_gait(SHOW_PAUSE_MS));
        report.merge(self.walk(4.0, 1000, Direction::Forward, 20.0));
        report.merge(self.pause_gait(SHOW_PAUSE_MS / 2));
        report.merge(self.turn(4.0, 1000, Side::Left, 25.0));
        report.merge(self.pause_gait(SHOW_PAUSE_MS / 2));
        report.merge(self.swing(4.0, 1000, MEDIUM));
        report.merge(self.up_down(4.0, 1000, BIG));
        report.merge(self.bend(2, 1000, Side::Left));
        report.merge(self.jitter(4.0, 500, SMALL));
        report.merge(self.moonwalker(4.0, 1000, MEDIUM, Side::Left));
        report.merge(self.jump(2.0, 1000));
        report.merge(self.hand_wave(1000, Hands::Both));
        report.merge(self.pause_gait(SHOW_PAUSE_MS));
        report.merge(self.home(true));
        report
    }

    fn pause_gait(&mut self, ms: u64) -> MotionReport {
        self.begin_gait("pause");
        self.pause(ms);
        self.finish_gait()
    }

    fn skip_without_hands(&self) -> bool {
        if !self.state.has_hands() {
            debug!("No hand servos configured, skipping {}", self.log_name());
            return true;
        }
        false
    }
}

/// Whole repetitions for keyframe gaits taking a float step count
fn repeat_count(steps: f32) -> u32 {
    if !steps.is_finite() || steps <= 0.0 {
        return 0;
    }
    steps.ceil() as u32
}
