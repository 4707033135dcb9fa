// Servo motion executor
//
// Drives every configured servo toward per-tick targets at a fixed control
// tick. A motion window is described by a `MotionPlan` (straight ramp or
// oscillator bank) and stepped through a `MotionRun` cursor. The blocking
// entry points sleep between ticks; `Otto::tick` steps a run by hand.
//
// Per tick and servo: velocity clamp (if the speed limit is on), trim,
// clamp into safe bounds, one hardware write.

use tracing::{debug, warn};

use super::library::GaitParams;
use super::oscillator::OscillatorBank;
use crate::config::MAX_SETTLE_TICKS;
use crate::robot::Otto;
use crate::servo::{Clock, ServoArray, ServoBus, ServoId};

// Positions closer than this count as reached
const TARGET_EPSILON: f32 = 1e-3;

// Slack on the per-tick velocity clamp, degrees
const STEP_EPSILON: f32 = 1e-4;

/// Trajectory followed during one motion window
#[derive(Debug, Clone, PartialEq)]
pub enum MotionPlan {
    /// Linear interpolation from `start` to `target`
    Ramp {
        start: ServoArray<f32>,
        target: ServoArray<f32>,
        duration_ms: u32,
    },
    /// Oscillator output, phase starting at 0
    Oscillate {
        bank: OscillatorBank,
        duration_ms: u32,
    },
}

impl MotionPlan {
    pub fn duration_ms(&self) -> u32 {
        match self {
            MotionPlan::Ramp { duration_ms, .. } | MotionPlan::Oscillate { duration_ms, .. } => {
                *duration_ms
            }
        }
    }

    /// Absolute positions the servos should be at `elapsed_ms` into the window
    pub fn targets_at(&self, elapsed_ms: u32) -> ServoArray<f32> {
        match self {
            MotionPlan::Ramp {
                start,
                target,
                duration_ms,
            } => {
                if *duration_ms == 0 {
                    return *target;
                }
                let progress = (elapsed_ms as f32 / *duration_ms as f32).min(1.0);
                ServoArray::from_fn(|id| start[id] + (target[id] - start[id]) * progress)
            }
            MotionPlan::Oscillate { bank, .. } => bank.positions_at(elapsed_ms as f32),
        }
    }

    /// Final pose of a ramp; oscillations have none
    fn final_target(&self) -> Option<&ServoArray<f32>> {
        match self {
            MotionPlan::Ramp { target, .. } => Some(target),
            MotionPlan::Oscillate { .. } => None,
        }
    }
}

/// Tick cursor over a `MotionPlan`.
///
/// The window is split into `ceil(duration / tick)` ticks (at least one);
/// tick `k` targets `min(k * tick, duration)`, so the last tick always lands
/// exactly on the end of the window.
#[derive(Debug, Clone)]
pub struct MotionRun {
    plan: MotionPlan,
    tick_ms: u32,
    total_ticks: u32,
    ticks_done: u32,
    settle_left: u32,
}

impl MotionRun {
    pub fn new(plan: MotionPlan, tick_ms: u32) -> Self {
        let tick_ms = tick_ms.max(1);
        let total_ticks = plan.duration_ms().div_ceil(tick_ms).max(1);
        Self {
            plan,
            tick_ms,
            total_ticks,
            ticks_done: 0,
            settle_left: MAX_SETTLE_TICKS,
        }
    }

    pub fn tick_ms(&self) -> u32 {
        self.tick_ms
    }

    /// Ticks in the planned window (settle ticks excluded)
    pub fn total_ticks(&self) -> u32 {
        self.total_ticks
    }

    pub fn ticks_done(&self) -> u32 {
        self.ticks_done
    }
}

/// Outcome of a motion call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MotionReport {
    /// Control ticks issued
    pub ticks: u32,
    /// Wall-clock time spent blocking
    pub elapsed_ms: u64,
    /// Servos whose output was clamped into their safe bounds
    pub clamped: Vec<ServoId>,
    /// Servos skipped because their channel was detached or failing
    pub faulted: Vec<ServoId>,
}

impl MotionReport {
    /// Fold a later motion into this one
    pub fn merge(&mut self, other: MotionReport) {
        self.ticks += other.ticks;
        self.elapsed_ms += other.elapsed_ms;
        for id in other.clamped {
            if !self.clamped.contains(&id) {
                self.clamped.push(id);
            }
        }
        for id in other.faulted {
            if !self.faulted.contains(&id) {
                self.faulted.push(id);
            }
        }
    }
}

/// Per-invocation bookkeeping so warnings fire once per gait, not per tick
#[derive(Debug, Clone)]
pub(crate) struct GaitLog {
    name: &'static str,
    ticks: u32,
    elapsed_ms: u64,
    clamped: ServoArray<bool>,
    faulted: ServoArray<bool>,
    detached: ServoArray<bool>,
}

impl GaitLog {
    pub(crate) fn new(name: &'static str) -> Self {
        Self {
            name,
            ticks: 0,
            elapsed_ms: 0,
            clamped: ServoArray::splat(false),
            faulted: ServoArray::splat(false),
            detached: ServoArray::splat(false),
        }
    }

    fn report(&self) -> MotionReport {
        let flagged = |flags: &ServoArray<bool>| {
            flags
                .iter()
                .filter(|(_, flag)| **flag)
                .map(|(id, _)| id)
                .collect()
        };
        MotionReport {
            ticks: self.ticks,
            elapsed_ms: self.elapsed_ms,
            clamped: flagged(&self.clamped),
            faulted: flagged(&self.faulted),
        }
    }
}

impl<B: ServoBus, C: Clock> Otto<B, C> {
    /// Start a new gait invocation: resets warn-once flags and counters
    pub(crate) fn begin_gait(&mut self, name: &'static str) {
        debug!("Gait {} starting", name);
        self.log = GaitLog::new(name);
    }

    pub(crate) fn finish_gait(&mut self) -> MotionReport {
        let report = self.log.report();
        let detached: Vec<String> = self
            .log
            .detached
            .iter()
            .filter(|(_, flag)| **flag)
            .map(|(id, _)| id.to_string())
            .collect();
        if !detached.is_empty() {
            warn!(
                "Skipped detached servos during {}: {}",
                self.log.name,
                detached.join(", ")
            );
        }
        debug!(
            "Gait {} finished: {} ticks in {}ms",
            self.log.name, report.ticks, report.elapsed_ms
        );
        report
    }

    pub(crate) fn log_name(&self) -> &'static str {
        self.log.name
    }

    /// Hold the current pose, counted in the gait's elapsed time
    pub(crate) fn pause(&mut self, ms: u64) {
        let started = self.clock.now_ms();
        self.clock.sleep_ms(ms);
        self.log.elapsed_ms += self.clock.now_ms() - started;
    }

    /// Move every servo to `targets` (absolute degrees) over `time_ms`.
    ///
    /// Unconfigured slots in `targets` are ignored. With the speed limit on,
    /// the window is stretched so the slowest servo can still arrive; all
    /// servos reach their target on the same tick.
    pub fn move_servos(&mut self, time_ms: u32, targets: &ServoArray<f32>) -> MotionReport {
        self.begin_gait("move_servos");
        self.wake();
        self.ramp_to(time_ms, targets);
        self.finish_gait()
    }

    /// Run one oscillation window of `cycles` periods
    pub fn oscillate_servos(
        &mut self,
        params: &GaitParams,
        period_ms: u32,
        cycles: f32,
    ) -> MotionReport {
        self.begin_gait("oscillate_servos");
        self.wake();
        self.oscillate(params, period_ms, cycles);
        self.finish_gait()
    }

    /// Oscillate for `steps` cycles (fractional steps end mid-cycle)
    pub fn execute(&mut self, params: &GaitParams, period_ms: u32, steps: f32) -> MotionReport {
        self.begin_gait("execute");
        self.wake();
        self.oscillate(params, period_ms, steps);
        self.finish_gait()
    }

    /// Build a ramp from the current pose, stretched to honor the speed limit
    pub fn plan_ramp(&self, time_ms: u32, targets: &ServoArray<f32>) -> MotionPlan {
        let start = ServoArray::from_fn(|id| {
            self.state
                .channel(id)
                .and_then(|ch| ch.angle)
                .unwrap_or(targets[id])
        });

        let mut duration_ms = time_ms;
        for (id, channel) in self.state.channels.iter() {
            let Some(ch) = channel else { continue };
            let Some(limit) = self.state.speed_limit.for_channel(ch) else {
                continue;
            };
            let travel = (targets[id] - start[id]).abs();
            let required = (travel * 1000.0 / limit - TARGET_EPSILON).ceil() as u32;
            if required > duration_ms {
                debug!(
                    "{} needs {}ms for {:.1} deg at {} deg/s, stretching move",
                    id, required, travel, limit
                );
                duration_ms = required;
            }
        }

        MotionPlan::Ramp {
            start,
            target: *targets,
            duration_ms,
        }
    }

    /// Oscillation window for `cycles` periods of `params`
    pub fn plan_oscillation(&self, params: &GaitParams, period_ms: u32, cycles: f32) -> MotionPlan {
        let duration_ms = (cycles * period_ms as f32).round() as u32;
        let bank = params.bank(period_ms);
        for (id, osc) in bank.oscillators().iter() {
            let Some(ch) = self.state.channel(id) else {
                continue;
            };
            let Some(limit) = self.state.speed_limit.for_channel(ch) else {
                continue;
            };
            if osc.peak_velocity() > limit {
                debug!(
                    "{} peaks at {:.0} deg/s over the {} deg/s limit, it will lag",
                    id,
                    osc.peak_velocity(),
                    limit
                );
            }
        }
        MotionPlan::Oscillate { bank, duration_ms }
    }

    /// Cursor for stepping `plan` by hand with `tick`
    pub fn start_motion(&self, plan: MotionPlan) -> MotionRun {
        MotionRun::new(plan, self.tick_ms)
    }

    /// Issue the next control tick of `run` without sleeping.
    ///
    /// Returns false once the run is complete. The first tick leaves the
    /// rest state. Each tick is assumed to be one nominal tick after the
    /// previous one; speed-limit changes made between calls apply from the
    /// next tick on.
    pub fn tick(&mut self, run: &mut MotionRun) -> bool {
        if run.ticks_done == 0 {
            self.wake();
        }
        match self.next_targets(run) {
            Some(targets) => {
                self.apply_tick(&targets, run.tick_ms as u64);
                true
            }
            None => false,
        }
    }

    pub(crate) fn ramp_to(&mut self, time_ms: u32, targets: &ServoArray<f32>) {
        let plan = self.plan_ramp(time_ms, targets);
        self.run_motion(plan);
    }

    pub(crate) fn oscillate(&mut self, params: &GaitParams, period_ms: u32, cycles: f32) {
        if !cycles.is_finite() || cycles <= 0.0 {
            debug!("Ignoring oscillation with {} cycles", cycles);
            return;
        }
        let plan = self.plan_oscillation(params, period_ms, cycles);
        self.run_motion(plan);
    }

    /// Step a plan to completion, sleeping until each tick's deadline.
    ///
    /// The speed limit is applied over the time actually elapsed since the
    /// previous tick, so a late tick followed by an on-time one never moves
    /// a servo faster than allowed.
    pub(crate) fn run_motion(&mut self, plan: MotionPlan) {
        let mut run = self.start_motion(plan);
        let started = self.clock.now_ms();
        let mut deadline = started;
        let mut last_tick: Option<u64> = None;

        debug!(
            "Motion window: {}ms in {} ticks of {}ms",
            run.plan.duration_ms(),
            run.total_ticks,
            run.tick_ms
        );

        while let Some(targets) = self.next_targets(&mut run) {
            deadline += run.tick_ms as u64;
            let now = self.clock.now_ms();
            self.clock.sleep_ms(deadline.saturating_sub(now));

            let now = self.clock.now_ms();
            let since_last = last_tick.map_or(run.tick_ms as u64, |prev| now - prev);
            self.apply_tick(&targets, since_last);
            last_tick = Some(now);
        }

        self.log.elapsed_ms += self.clock.now_ms() - started;
    }

    /// Targets for the next tick, or `None` when the run is over.
    ///
    /// After the planned window a ramp may spend a few settle ticks
    /// re-issuing its target if some servo has not arrived (for example the
    /// speed limit was switched on mid-move).
    fn next_targets(&self, run: &mut MotionRun) -> Option<ServoArray<f32>> {
        if run.ticks_done < run.total_ticks {
            run.ticks_done += 1;
            let elapsed = (run.ticks_done * run.tick_ms).min(run.plan.duration_ms());
            return Some(run.plan.targets_at(elapsed));
        }

        let target = *run.plan.final_target()?;
        if run.settle_left == 0 || self.at_targets(&target) {
            return None;
        }
        run.settle_left -= 1;
        Some(target)
    }

    /// Whether every live servo sits on its target
    fn at_targets(&self, targets: &ServoArray<f32>) -> bool {
        self.state.channels.iter().all(|(id, channel)| match channel {
            Some(ch) if ch.attached && !self.log.faulted[id] => ch
                .angle
                .is_some_and(|angle| (angle - targets[id]).abs() < TARGET_EPSILON),
            _ => true,
        })
    }

    /// One control tick: one write per live servo, each moving at most
    /// `limit * since_last_ms` away from its previous angle
    fn apply_tick(&mut self, targets: &ServoArray<f32>, since_last_ms: u64) {
        let speed_limit = self.state.speed_limit;

        for id in ServoId::ALL {
            let Some(ch) = self.state.channels[id].as_mut() else {
                continue;
            };
            if self.log.faulted[id] {
                continue;
            }
            if !ch.attached {
                self.log.faulted[id] = true;
                self.log.detached[id] = true;
                continue;
            }

            let desired = targets[id];
            let next = match (ch.angle, speed_limit.for_channel(ch)) {
                (Some(current), Some(limit)) => {
                    let max_step = limit * since_last_ms as f32 / 1000.0;
                    let delta = desired - current;
                    // Rounding noise must not hold a servo one step short
                    if delta.abs() <= max_step + STEP_EPSILON {
                        desired
                    } else {
                        current + delta.signum() * max_step
                    }
                }
                _ => desired,
            };

            let (output, clamped) = ch.output_angle(next);
            if clamped && !self.log.clamped[id] {
                warn!(
                    "{} clamped to {:.1} deg (asked {:.1} with trim {:.1}) during {}",
                    id,
                    output,
                    next,
                    ch.trim,
                    self.log.name
                );
                self.log.clamped[id] = true;
            }

            match self.bus.set_angle(ch.pin, output) {
                Ok(()) => ch.angle = Some(next),
                Err(e) => {
                    warn!(
                        "Write to {} (pin {}) failed, skipping it for {}: {}",
                        id, ch.pin, self.log.name, e
                    );
                    self.log.faulted[id] = true;
                }
            }
        }

        self.log.ticks += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RobotConfig;
    use crate::servo::{ManualClock, SimBus};

    fn robot() -> (Otto<SimBus, ManualClock>, ManualClock) {
        let clock = ManualClock::new();
        let bus = SimBus::recording(6).with_clock(clock.clone());
        let mut config = RobotConfig::default();
        config.speed_limit = None;
        (Otto::init(&config, bus, clock.clone()).unwrap(), clock)
    }

    #[test]
    fn test_run_tick_count_rounds_up() {
        let plan = MotionPlan::Ramp {
            start: ServoArray::splat(90.0),
            target: ServoArray::splat(100.0),
            duration_ms: 25,
        };
        let run = MotionRun::new(plan.clone(), 10);
        assert_eq!(run.total_ticks(), 3);

        let instant = MotionPlan::Ramp {
            start: ServoArray::splat(90.0),
            target: ServoArray::splat(100.0),
            duration_ms: 0,
        };
        assert_eq!(MotionRun::new(instant, 10).total_ticks(), 1);
    }

    #[test]
    fn test_ramp_interpolates_linearly() {
        let plan = MotionPlan::Ramp {
            start: ServoArray::splat(80.0),
            target: ServoArray::splat(120.0),
            duration_ms: 400,
        };
        assert_eq!(plan.targets_at(0)[ServoId::LeftLeg], 80.0);
        assert_eq!(plan.targets_at(100)[ServoId::LeftLeg], 90.0);
        assert_eq!(plan.targets_at(400)[ServoId::LeftLeg], 120.0);
        assert_eq!(plan.targets_at(900)[ServoId::LeftLeg], 120.0);
    }

    #[test]
    fn test_move_servos_reaches_target_on_last_tick() {
        let (mut otto, _) = robot();
        let target = ServoArray::new([100.0, 80.0, 110.0, 70.0, 60.0, 120.0]);
        let report = otto.move_servos(200, &target);

        assert_eq!(report.ticks, 20);
        assert_eq!(report.elapsed_ms, 200);
        for (id, angle) in otto.state().angles().iter() {
            assert_eq!(*angle, Some(target[id]));
        }
    }

    #[test]
    fn test_speed_limit_stretches_every_channel_equally() {
        let (mut otto, clock) = robot();
        otto.move_servos(0, &ServoArray::splat(90.0));
        otto.enable_speed_limit(100.0).unwrap();

        // Left leg needs 60 deg at 100 deg/s = 600ms; others travel less
        let mut target = ServoArray::splat(90.0);
        target[ServoId::LeftLeg] = 150.0;
        target[ServoId::RightLeg] = 80.0;
        let plan = otto.plan_ramp(100, &target);
        assert_eq!(plan.duration_ms(), 600);

        otto.bus_mut().clear_writes();
        let started = clock.now_ms();
        let report = otto.move_servos(100, &target);
        assert_eq!(report.elapsed_ms, 600);

        // Both moving servos finish on the same tick
        let left = otto.bus().writes_for(0);
        let right = otto.bus().writes_for(1);
        let arrived = |writes: &[crate::servo::ServoWrite], goal: f32| {
            writes
                .iter()
                .find(|w| (w.angle - goal).abs() < 1e-3)
                .map(|w| w.at_ms)
        };
        assert_eq!(arrived(&left, 150.0), Some(started + 600));
        assert_eq!(arrived(&right, 80.0), Some(started + 600));
    }

    #[test]
    fn test_clamped_output_warns_once_per_gait() {
        let (mut otto, _) = robot();
        otto.set_trim(ServoId::LeftFoot, 20.0).unwrap();
        let mut target = ServoArray::splat(90.0);
        target[ServoId::LeftFoot] = 175.0;

        let report = otto.move_servos(100, &target);
        assert_eq!(report.clamped, vec![ServoId::LeftFoot]);
        assert_eq!(otto.bus().last_angle(2), Some(180.0));
        // Logical position keeps the requested target
        assert_eq!(otto.state().angles()[ServoId::LeftFoot], Some(175.0));
    }

    #[test]
    fn test_failing_channel_skipped_others_continue() {
        let (mut otto, _) = robot();
        otto.bus_mut().fail_pin(3);

        let report = otto.move_servos(100, &ServoArray::splat(100.0));
        assert_eq!(report.faulted, vec![ServoId::RightFoot]);
        // Only the first failed attempt reaches the bus; others run all ticks
        assert!(otto.bus().writes_for(3).is_empty());
        assert_eq!(otto.bus().writes_for(0).len(), 10);
        assert_eq!(otto.state().angles()[ServoId::LeftLeg], Some(100.0));
    }

    #[test]
    fn test_settle_ticks_finish_a_clamped_ramp() {
        let (mut otto, _) = robot();
        otto.move_servos(0, &ServoArray::splat(90.0));

        // Plan without the limit, then turn it on before stepping
        let mut target = ServoArray::splat(90.0);
        target[ServoId::LeftLeg] = 110.0;
        let plan = otto.plan_ramp(10, &target);
        let mut run = otto.start_motion(plan);
        otto.enable_speed_limit(200.0).unwrap();

        let mut ticks = 0;
        while otto.tick(&mut run) {
            ticks += 1;
        }
        // 20 deg at 2 deg per tick: 1 planned tick + 9 settle ticks
        assert_eq!(ticks, 10);
        assert_eq!(otto.state().angles()[ServoId::LeftLeg], Some(110.0));
    }
    #[test]
    fn test_manual_ticks_leave_rest_state() {
        let (mut otto, _) = robot();
        otto.home(true);
        otto.detach_servos().unwrap();
        assert!(otto.get_rest_state());

        let plan = otto.plan_ramp(100, &ServoArray::splat(100.0));
        let mut run = otto.start_motion(plan);
        while otto.tick(&mut run) {}

        assert!(!otto.get_rest_state());
        assert!(otto.bus().is_attached(0));
        assert_eq!(otto.state().angles()[ServoId::LeftLeg], Some(100.0));

        otto.home(true);
        assert!(otto.state().is_at_home());
    }

    #[test]
    fn test_detached_servos_listed_once_in_report() {
        let (mut otto, _) = robot();
        otto.move_servos(0, &ServoArray::splat(90.0));
        otto.detach_servos().unwrap();
        otto.bus_mut().clear_writes();

        let report = otto.move_servos(200, &ServoArray::splat(100.0));
        assert_eq!(report.faulted, ServoId::ALL.to_vec());
        assert_eq!(report.ticks, 20);
        assert!(otto.bus().writes().is_empty());
        assert_eq!(otto.state().angles()[ServoId::LeftLeg], Some(90.0));
    }

    #[test]
    fn test_late_tick_limits_next_step() {
        let (mut otto, _) = robot();
        otto.move_servos(0, &ServoArray::splat(90.0));
        let mut target = ServoArray::splat(90.0);
        target[ServoId::LeftLeg] = 150.0;
        let plan = otto.plan_ramp(10, &target);
        let mut run = otto.start_motion(plan);

        // 100 deg/s allows 1.8 deg after an 18ms gap, then 0.2 deg after 2ms
        otto.enable_speed_limit(100.0).unwrap();
        let targets = otto.next_targets(&mut run).unwrap();
        otto.apply_tick(&targets, 18);
        assert!((otto.state().angles()[ServoId::LeftLeg].unwrap() - 91.8).abs() < 1e-3);
        let targets = otto.next_targets(&mut run).unwrap();
        otto.apply_tick(&targets, 2);
        assert!((otto.state().angles()[ServoId::LeftLeg].unwrap() - 92.0).abs() < 1e-3);
    }
}
