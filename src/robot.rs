// Otto robot handle
//
// Owns the servo bus, the clock and the robot state. Every public motion
// entry point is a method on `Otto`; the executor and the gait library add
// theirs in `gait::executor` and `gait::library`.
//
// Calls block for the whole motion and must not overlap: one owner drives
// the robot at a time.

use tracing::{debug, info, warn};

use crate::config::{
    HOME_MOVE_MS, HOME_SETTLE_MS, HOME_TOLERANCE, RobotConfig, SERVO_CENTER, SERVO_LIMIT_DEFAULT,
};
use crate::error::OttoError;
use crate::gait::executor::GaitLog;
use crate::gait::library::home_pose;
use crate::gait::{Direction, Hands, MotionReport, Side};
use crate::messages::{Action, ActionCommand};
use crate::servo::{Clock, ServoArray, ServoBus, ServoChannel, ServoId};

/// Global velocity limit. Per-servo `max_velocity` caps it further.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeedLimit {
    pub enabled: bool,
    /// deg/s
    pub deg_per_sec: f32,
}

impl SpeedLimit {
    /// Effective limit for one channel, `None` when unlimited
    pub fn for_channel(&self, ch: &ServoChannel) -> Option<f32> {
        if self.enabled && ch.limit_enabled {
            Some(self.deg_per_sec.min(ch.max_velocity))
        } else {
            None
        }
    }
}

/// Snapshot of the robot, updated on every control tick
#[derive(Debug, Clone)]
pub struct RobotState {
    pub(crate) resting: bool,
    pub(crate) has_hands: bool,
    pub(crate) channels: ServoArray<Option<ServoChannel>>,
    pub(crate) speed_limit: SpeedLimit,
}

impl RobotState {
    pub fn is_resting(&self) -> bool {
        self.resting
    }

    pub fn has_hands(&self) -> bool {
        self.has_hands
    }

    pub fn channel(&self, id: ServoId) -> Option<&ServoChannel> {
        self.channels[id].as_ref()
    }

    /// Last commanded logical angle per servo; `None` for unconfigured or
    /// never-moved servos
    pub fn angles(&self) -> ServoArray<Option<f32>> {
        ServoArray::from_fn(|id| self.channels[id].as_ref().and_then(|ch| ch.angle))
    }

    pub fn trims(&self) -> ServoArray<f32> {
        ServoArray::from_fn(|id| self.channels[id].as_ref().map_or(0.0, |ch| ch.trim))
    }

    pub fn speed_limit(&self) -> SpeedLimit {
        self.speed_limit
    }

    /// Every configured servo within `HOME_TOLERANCE` of the home pose
    pub fn is_at_home(&self) -> bool {
        let home = home_pose();
        self.channels.iter().all(|(id, channel)| match channel {
            Some(ch) => ch
                .angle
                .is_some_and(|angle| (angle - home[id]).abs() <= HOME_TOLERANCE),
            None => true,
        })
    }
}

/// Handle to one Otto robot
pub struct Otto<B: ServoBus, C: Clock> {
    pub(crate) bus: B,
    pub(crate) clock: C,
    pub(crate) state: RobotState,
    pub(crate) tick_ms: u32,
    pub(crate) log: GaitLog,
}

impl<B: ServoBus, C: Clock> Otto<B, C> {
    /// Validate `config`, then attach every configured servo.
    ///
    /// Configuration errors are returned before the bus is touched. The robot
    /// starts active with unknown angles; call `home` before anything else.
    pub fn init(config: &RobotConfig, mut bus: B, clock: C) -> Result<Self, OttoError> {
        config.validate(bus.channel_count())?;

        let channels = config.servos.to_array();
        let channels = ServoArray::from_fn(|id| {
            channels[id].as_ref().map(|servo| ServoChannel {
                trim: servo.trim,
                min_angle: servo.min_angle,
                max_angle: servo.max_angle,
                max_velocity: servo.max_velocity,
                limit_enabled: servo.limit_enabled,
                ..ServoChannel::new(id, servo.pin)
            })
        });
        let has_hands = channels[ServoId::LeftHand].is_some();

        // Fail fast: release what was already bound and give up
        let mut attached: Vec<u8> = Vec::new();
        for (id, channel) in channels.iter() {
            let Some(ch) = channel else { continue };
            if let Err(source) = bus.attach(ch.pin) {
                for &pin in &attached {
                    if let Err(e) = bus.detach(pin) {
                        warn!("Failed to release pin {} after init error: {}", pin, e);
                    }
                }
                return Err(OttoError::Hardware { servo: id, source });
            }
            attached.push(ch.pin);
        }

        let channels = channels.map(|channel| {
            channel.map(|ch| ServoChannel {
                attached: true,
                ..ch
            })
        });

        let speed_limit = SpeedLimit {
            enabled: config.speed_limit.is_some(),
            deg_per_sec: config.speed_limit.unwrap_or(SERVO_LIMIT_DEFAULT),
        };

        info!(
            "Otto initialized: {} servos ({}), {}ms tick, speed limit {}",
            attached.len(),
            if has_hands { "with hands" } else { "no hands" },
            config.tick_ms,
            match config.speed_limit {
                Some(limit) => format!("{} deg/s", limit),
                None => "off".to_string(),
            }
        );

        Ok(Self {
            bus,
            clock,
            state: RobotState {
                resting: false,
                has_hands,
                channels,
                speed_limit,
            },
            tick_ms: config.tick_ms,
            log: GaitLog::new("init"),
        })
    }

    pub fn state(&self) -> &RobotState {
        &self.state
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn tick_ms(&self) -> u32 {
        self.tick_ms
    }

    /// Bind every configured servo. All channels are tried; the first
    /// failure is returned.
    pub fn attach_servos(&mut self) -> Result<(), OttoError> {
        info!("Attaching servos");
        let mut first_error = None;
        for (id, channel) in self.state.channels.iter_mut() {
            let Some(ch) = channel else { continue };
            match self.bus.attach(ch.pin) {
                Ok(()) => ch.attached = true,
                Err(source) => {
                    warn!("Failed to attach {} (pin {}): {}", id, ch.pin, source);
                    first_error.get_or_insert(OttoError::Hardware { servo: id, source });
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Release every configured servo. Does not change the rest state.
    pub fn detach_servos(&mut self) -> Result<(), OttoError> {
        info!("Detaching servos");
        let mut first_error = None;
        for (id, channel) in self.state.channels.iter_mut() {
            let Some(ch) = channel else { continue };
            match self.bus.detach(ch.pin) {
                Ok(()) => ch.attached = false,
                Err(source) => {
                    warn!("Failed to detach {} (pin {}): {}", id, ch.pin, source);
                    first_error.get_or_insert(OttoError::Hardware { servo: id, source });
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Leave the rest state before a motion, re-attaching the servos
    pub(crate) fn wake(&mut self) {
        if !self.state.resting {
            return;
        }
        debug!("Waking from rest for {}", self.log_name());
        if let Err(e) = self.attach_servos() {
            warn!("Could not re-attach every servo: {}", e);
        }
        self.state.resting = false;
    }

    /// Set all trims at once. Hand trims are ignored on robots without hands.
    pub fn set_trims(&mut self, trims: ServoArray<f32>) {
        for (id, channel) in self.state.channels.iter_mut() {
            if let Some(ch) = channel {
                ch.trim = trims[id];
            }
        }
        debug!("Trims set: {:?}", trims);
    }

    pub fn set_trim(&mut self, id: ServoId, trim: f32) -> Result<(), OttoError> {
        let ch = self.state.channels[id]
            .as_mut()
            .ok_or(OttoError::ServoNotConfigured(id))?;
        ch.trim = trim;
        debug!("{} trim set to {}", id, trim);
        Ok(())
    }

    /// `set_trim` by positional servo index (0 = left leg .. 5 = right hand)
    pub fn set_trim_at(&mut self, index: usize, trim: f32) -> Result<(), OttoError> {
        let id = ServoId::from_index(index).ok_or(OttoError::UnknownServo(index))?;
        self.set_trim(id, trim)
    }

    /// Turn the global speed limit on. Takes effect from the next tick.
    pub fn enable_speed_limit(&mut self, deg_per_sec: f32) -> Result<(), OttoError> {
        if !deg_per_sec.is_finite() || deg_per_sec <= 0.0 {
            return Err(OttoError::InvalidSpeedLimit(deg_per_sec));
        }
        self.state.speed_limit = SpeedLimit {
            enabled: true,
            deg_per_sec,
        };
        info!("Speed limit enabled: {} deg/s", deg_per_sec);
        Ok(())
    }

    /// Turn the global speed limit off. Takes effect from the next tick.
    pub fn disable_speed_limit(&mut self) {
        self.state.speed_limit.enabled = false;
        info!("Speed limit disabled");
    }

    /// Move every servo to the home pose and mark the robot resting.
    ///
    /// With `hands_down` false the hands keep their angle. A robot already
    /// resting does not move. Always pauses `HOME_SETTLE_MS` afterwards.
    pub fn home(&mut self, hands_down: bool) -> MotionReport {
        self.begin_gait("home");
        if !self.state.resting {
            let home = home_pose();
            let target = if hands_down {
                home
            } else {
                let current = self.current_pose();
                ServoArray::from_fn(|id| if id.is_hand() { current[id] } else { home[id] })
            };
            self.ramp_to(HOME_MOVE_MS, &target);
            self.state.resting = true;
            info!("Robot at home, resting");
        }
        self.pause(HOME_SETTLE_MS);
        self.finish_gait()
    }

    pub fn get_rest_state(&self) -> bool {
        self.state.resting
    }

    /// Clearing the rest state is always allowed. Setting it is refused
    /// unless the robot already stands at the home pose; `home` is the way
    /// to get there.
    pub fn set_rest_state(&mut self, resting: bool) -> Result<(), OttoError> {
        if resting && !self.state.resting && !self.state.is_at_home() {
            return Err(OttoError::NotAtHome);
        }
        self.state.resting = resting;
        Ok(())
    }

    /// Write one servo immediately, bypassing the control tick.
    ///
    /// Angles outside 0..=180 are replaced by the center position.
    pub fn move_single(&mut self, id: ServoId, angle: f32) -> Result<(), OttoError> {
        if self.state.channels[id].is_none() {
            return Err(OttoError::ServoNotConfigured(id));
        }
        let angle = if (0.0..=180.0).contains(&angle) {
            angle
        } else {
            warn!("{} asked for {} deg, using center instead", id, angle);
            SERVO_CENTER
        };

        self.wake();
        let ch = self.state.channels[id]
            .as_mut()
            .ok_or(OttoError::ServoNotConfigured(id))?;
        let (output, _) = ch.output_angle(angle);
        self.bus
            .set_angle(ch.pin, output)
            .map_err(|source| OttoError::Hardware { servo: id, source })?;
        ch.angle = Some(angle);
        Ok(())
    }

    /// Run one dispatcher action with its default arguments (overridable
    /// per command), then return home with the hands down.
    pub fn perform(&mut self, command: &ActionCommand) -> MotionReport {
        info!("Performing {}", command.action.name());
        let steps = |default: f32| command.steps.unwrap_or(default);
        let whole_steps = |default: u32| {
            command
                .steps
                .map_or(default, |steps| steps.max(0.0).round() as u32)
        };
        let period = |default: u32| command.period_ms.unwrap_or(default);
        let amount = |default: f32| command.amount.unwrap_or(default);

        let mut report = match command.action {
            Action::None => MotionReport::default(),
            Action::WalkForward => {
                self.walk(steps(2.0), period(1000), Direction::Forward, amount(20.0))
            }
            Action::WalkBackward => {
                self.walk(steps(2.0), period(1000), Direction::Backward, amount(15.0))
            }
            Action::TurnLeft => self.turn(steps(2.0), period(1000), Side::Left, amount(25.0)),
            Action::TurnRight => self.turn(steps(2.0), period(1000), Side::Right, amount(25.0)),
            Action::Jump => self.jump(steps(2.0), period(1000)),
            Action::BendLeft => self.bend(whole_steps(2), period(1000), Side::Left),
            Action::BendRight => self.bend(whole_steps(2), period(1000), Side::Right),
            Action::ShakeLeft => self.shake_leg(whole_steps(1), period(2000), Side::Left),
            Action::ShakeRight => self.shake_leg(whole_steps(1), period(2000), Side::Right),
            Action::UpDown => self.up_down(steps(4.0), period(1000), amount(20.0)),
            Action::Swing => self.swing(steps(4.0), period(1000), amount(20.0)),
            Action::HandsUp => self.hands_up(period(1000), Hands::Both),
            Action::HandsDown => self.hands_down(period(1000), Hands::Both),
            Action::WaveLeft => self.hand_wave(period(1000), Hands::Left),
            Action::WaveRight => self.hand_wave(period(1000), Hands::Right),
            Action::WaveBoth => self.hand_wave(period(1000), Hands::Both),
            Action::Jitter => self.jitter(steps(4.0), period(500), amount(20.0)),
            Action::Moonwalker => {
                self.moonwalker(steps(4.0), period(1000), amount(20.0), Side::Left)
            }
            Action::Show => self.show(),
        };
        report.merge(self.home(true));
        report
    }

    /// Detach every servo and release the robot. Callers home first if
    /// the robot should be left in its neutral pose.
    pub fn shutdown(mut self) -> Result<(), OttoError> {
        info!("Shutting down");
        self.detach_servos()
    }

    /// Current logical pose, home angles for servos never moved
    pub(crate) fn current_pose(&self) -> ServoArray<f32> {
        let home = home_pose();
        ServoArray::from_fn(|id| {
            self.state
                .channel(id)
                .and_then(|ch| ch.angle)
                .unwrap_or(home[id])
        })
    }
}

impl<B: ServoBus, C: Clock> Drop for Otto<B, C> {
    fn drop(&mut self) {
        // Leave no PWM output driving a servo once the handle is gone
        for (id, channel) in self.state.channels.iter_mut() {
            let Some(ch) = channel else { continue };
            if !ch.attached {
                continue;
            }
            match self.bus.detach(ch.pin) {
                Ok(()) => ch.attached = false,
                Err(e) => warn!("Failed to detach {} on drop: {}", id, e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServoConfig;
    use crate::servo::{HardwareError, ManualClock, SimBus};

    fn robot() -> Otto<SimBus, ManualClock> {
        let clock = ManualClock::new();
        let bus = SimBus::recording(6).with_clock(clock.clone());
        Otto::init(&RobotConfig::default(), bus, clock).unwrap()
    }

    /// Bus whose attach fails on one pin
    struct BrokenAttach {
        inner: SimBus,
        broken: u8,
    }

    impl ServoBus for BrokenAttach {
        fn channel_count(&self) -> u8 {
            self.inner.channel_count()
        }
        fn attach(&mut self, pin: u8) -> Result<(), HardwareError> {
            if pin == self.broken {
                return Err(HardwareError::Detached { pin });
            }
            self.inner.attach(pin)
        }
        fn detach(&mut self, pin: u8) -> Result<(), HardwareError> {
            self.inner.detach(pin)
        }
        fn set_angle(&mut self, pin: u8, degrees: f32) -> Result<(), HardwareError> {
            self.inner.set_angle(pin, degrees)
        }
    }

    #[test]
    fn test_init_attaches_configured_servos() {
        let otto = robot();
        for pin in 0..6 {
            assert!(otto.bus().is_attached(pin));
        }
        assert!(!otto.get_rest_state());
        assert!(otto.state().has_hands());
        // Angles are undefined until the first move
        assert!(otto.state().angles().iter().all(|(_, a)| a.is_none()));
        assert!(otto.state().speed_limit().enabled);
    }

    #[test]
    fn test_init_without_hands() {
        let clock = ManualClock::new();
        let otto = Otto::init(&RobotConfig::without_hands(), SimBus::new(4), clock).unwrap();
        assert!(!otto.state().has_hands());
        assert!(otto.state().channel(ServoId::LeftHand).is_none());
    }

    /// Bus that must never be driven
    struct Untouchable;

    impl ServoBus for Untouchable {
        fn channel_count(&self) -> u8 {
            6
        }
        fn attach(&mut self, pin: u8) -> Result<(), HardwareError> {
            panic!("attach({}) called", pin)
        }
        fn detach(&mut self, pin: u8) -> Result<(), HardwareError> {
            panic!("detach({}) called", pin)
        }
        fn set_angle(&mut self, pin: u8, _degrees: f32) -> Result<(), HardwareError> {
            panic!("set_angle({}) called", pin)
        }
    }

    #[test]
    fn test_invalid_config_touches_no_hardware() {
        let mut config = RobotConfig::default();
        config.servos.left_hand = Some(ServoConfig::on_pin(1));
        let result = Otto::init(&config, Untouchable, ManualClock::new());
        assert!(matches!(result, Err(OttoError::DuplicatePin { .. })));
    }

    #[test]
    fn test_attach_failure_releases_bound_pins() {
        let bus = BrokenAttach {
            inner: SimBus::new(6),
            broken: 2,
        };
        match Otto::init(&RobotConfig::default(), bus, ManualClock::new()) {
            Err(OttoError::Hardware { servo, .. }) => assert_eq!(servo, ServoId::LeftFoot),
            Err(e) => panic!("unexpected error {}", e),
            Ok(_) => panic!("init should fail"),
        }
    }

    #[test]
    fn test_home_sets_resting_and_pose() {
        let mut otto = robot();
        let report = otto.home(true);
        assert!(otto.get_rest_state());
        assert!(otto.state().is_at_home());
        assert_eq!(report.elapsed_ms, HOME_MOVE_MS as u64 + HOME_SETTLE_MS);

        // Already resting: only the settle pause
        let again = otto.home(true);
        assert_eq!(again.ticks, 0);
        assert_eq!(again.elapsed_ms, HOME_SETTLE_MS);
    }

    #[test]
    fn test_home_keeps_hands_when_asked() {
        let mut otto = robot();
        otto.home(true);
        otto.hands_up(300, Hands::Both);
        otto.home(false);
        let angles = otto.state().angles();
        assert_eq!(angles[ServoId::LeftHand], Some(170.0));
        assert_eq!(angles[ServoId::RightHand], Some(10.0));
        assert_eq!(angles[ServoId::LeftLeg], Some(90.0));
    }

    #[test]
    fn test_rest_state_setter_requires_home() {
        let mut otto = robot();
        assert!(matches!(otto.set_rest_state(true), Err(OttoError::NotAtHome)));

        otto.home(true);
        otto.set_rest_state(false).unwrap();
        otto.set_rest_state(true).unwrap();
        assert!(otto.get_rest_state());
    }

    #[test]
    fn test_motion_wakes_resting_robot() {
        let mut otto = robot();
        otto.home(true);
        otto.detach_servos().unwrap();
        assert!(!otto.bus().is_attached(0));

        otto.walk(1.0, 500, Direction::Forward, 0.0);
        assert!(!otto.get_rest_state());
        assert!(otto.bus().is_attached(0));
    }

    #[test]
    fn test_trim_errors() {
        let clock = ManualClock::new();
        let mut otto = Otto::init(&RobotConfig::without_hands(), SimBus::new(4), clock).unwrap();
        assert!(matches!(
            otto.set_trim(ServoId::RightHand, 3.0),
            Err(OttoError::ServoNotConfigured(ServoId::RightHand))
        ));
        assert!(matches!(otto.set_trim_at(9, 1.0), Err(OttoError::UnknownServo(9))));

        otto.set_trims(ServoArray::new([1.0, -2.0, 3.0, -4.0, 5.0, 6.0]));
        assert_eq!(otto.state().trims()[ServoId::RightFoot], -4.0);
        assert_eq!(otto.state().trims()[ServoId::LeftHand], 0.0);
    }

    #[test]
    fn test_speed_limit_validation() {
        let mut otto = robot();
        assert!(otto.enable_speed_limit(0.0).is_err());
        assert!(otto.enable_speed_limit(f32::NAN).is_err());
        otto.enable_speed_limit(120.0).unwrap();
        assert_eq!(otto.state().speed_limit().deg_per_sec, 120.0);
        otto.disable_speed_limit();
        assert!(!otto.state().speed_limit().enabled);
    }

    #[test]
    fn test_channel_velocity_caps_global_limit() {
        let limit = SpeedLimit {
            enabled: true,
            deg_per_sec: 500.0,
        };
        let mut ch = ServoChannel::new(ServoId::LeftLeg, 0);
        ch.max_velocity = 180.0;
        assert_eq!(limit.for_channel(&ch), Some(180.0));
        ch.limit_enabled = false;
        assert_eq!(limit.for_channel(&ch), None);
    }

    #[test]
    fn test_move_single_out_of_range_centers() {
        let mut otto = robot();
        otto.set_trim(ServoId::RightLeg, 2.0).unwrap();
        otto.move_single(ServoId::RightLeg, 200.0).unwrap();
        assert_eq!(otto.state().angles()[ServoId::RightLeg], Some(90.0));
        assert_eq!(otto.bus().last_angle(1), Some(92.0));

        otto.move_single(ServoId::LeftLeg, 30.0).unwrap();
        assert_eq!(otto.bus().last_angle(0), Some(30.0));
    }

    #[test]
    fn test_perform_ends_home() {
        let mut otto = robot();
        otto.home(true);
        let report = otto.perform(&ActionCommand::new(Action::WalkForward));
        assert!(otto.get_rest_state());
        assert!(otto.state().is_at_home());
        assert!(report.ticks > 0);
    }

    /// Bus the test keeps a handle to after the robot is consumed
    struct SharedBus(std::sync::Arc<std::sync::Mutex<SimBus>>);

    impl ServoBus for SharedBus {
        fn channel_count(&self) -> u8 {
            self.0.lock().unwrap().channel_count()
        }

        fn attach(&mut self, pin: u8) -> Result<(), HardwareError> {
            self.0.lock().unwrap().attach(pin)
        }

        fn detach(&mut self, pin: u8) -> Result<(), HardwareError> {
            self.0.lock().unwrap().detach(pin)
        }

        fn set_angle(&mut self, pin: u8, degrees: f32) -> Result<(), HardwareError> {
            self.0.lock().unwrap().set_angle(pin, degrees)
        }
    }

    #[test]
    fn test_shutdown_detaches_without_moving() {
        let sim = std::sync::Arc::new(std::sync::Mutex::new(SimBus::recording(6)));
        let clock = ManualClock::new();
        let mut otto =
            Otto::init(&RobotConfig::default(), SharedBus(sim.clone()), clock).unwrap();
        otto.move_servos(100, &ServoArray::splat(100.0));
        sim.lock().unwrap().clear_writes();

        assert!(otto.shutdown().is_ok());
        let sim = sim.lock().unwrap();
        assert!(sim.writes().is_empty());
        assert!((0..6).all(|pin| !sim.is_attached(pin)));
        assert_eq!(sim.last_angle(0), Some(100.0));
    }
}
