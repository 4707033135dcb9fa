// Sinusoidal joint oscillators
//
// Each servo follows
//   angle(f) = offset + amplitude * sin(2*pi*f + phase_diff)
// where f is the cycle-relative time (0 at cycle start, 1 at cycle end,
// growing past 1 over several cycles). Offsets are relative to the servo
// center; the bank adds the center when producing absolute positions.

use std::f32::consts::TAU;

use crate::config::SERVO_CENTER;
use crate::servo::ServoArray;

/// Oscillation parameters for one servo
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Oscillator {
    /// degrees
    pub amplitude: f32,
    /// degrees from center
    pub offset: f32,
    /// 0 disables oscillation
    pub period_ms: u32,
    /// radians
    pub phase_diff: f32,
}

impl Oscillator {
    pub fn new(amplitude: f32, offset: f32, period_ms: u32, phase_diff: f32) -> Self {
        Self {
            amplitude,
            offset,
            period_ms,
            phase_diff,
        }
    }

    /// Angle (relative to center) at a cycle-relative time
    pub fn angle_at(&self, elapsed_fraction: f32) -> f32 {
        if self.period_ms == 0 || self.amplitude == 0.0 {
            return self.offset;
        }
        // f64 keeps the phase accurate over many cycles
        let phase = std::f64::consts::TAU * elapsed_fraction as f64 + self.phase_diff as f64;
        self.offset + self.amplitude * phase.sin() as f32
    }

    /// Cycle-relative time for a wall-clock offset from the start of the gait
    pub fn elapsed_fraction(&self, elapsed_ms: f32) -> f32 {
        if self.period_ms == 0 {
            return 0.0;
        }
        elapsed_ms / self.period_ms as f32
    }

    pub fn angle_at_ms(&self, elapsed_ms: f32) -> f32 {
        self.angle_at(self.elapsed_fraction(elapsed_ms))
    }

    /// Peak angular speed of the sinusoid in deg/s
    pub fn peak_velocity(&self) -> f32 {
        if self.period_ms == 0 {
            return 0.0;
        }
        self.amplitude.abs() * TAU * 1000.0 / self.period_ms as f32
    }
}

/// One oscillator per servo slot, all sharing the gait period
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OscillatorBank {
    oscillators: ServoArray<Oscillator>,
}

impl OscillatorBank {
    pub fn new(
        amplitude: &ServoArray<f32>,
        offset: &ServoArray<f32>,
        phase_diff: &ServoArray<f32>,
        period_ms: u32,
    ) -> Self {
        Self {
            oscillators: ServoArray::from_fn(|id| {
                Oscillator::new(amplitude[id], offset[id], period_ms, phase_diff[id])
            }),
        }
    }

    pub fn oscillators(&self) -> &ServoArray<Oscillator> {
        &self.oscillators
    }

    /// Absolute servo positions (degrees, center = 90) at `elapsed_ms`
    pub fn positions_at(&self, elapsed_ms: f32) -> ServoArray<f32> {
        self.oscillators
            .map(|osc| SERVO_CENTER + osc.angle_at_ms(elapsed_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::servo::ServoId;
    use proptest::prelude::*;
    use std::f32::consts::FRAC_PI_2;

    const EPS: f32 = 1e-3;

    #[test]
    fn test_zero_amplitude_is_constant_offset() {
        let osc = Oscillator::new(0.0, 12.0, 1000, 1.0);
        for ms in [0.0, 125.0, 500.0, 999.0, 4321.0] {
            assert_eq!(osc.angle_at_ms(ms), 12.0);
        }
    }

    #[test]
    fn test_zero_period_freezes_at_offset() {
        let osc = Oscillator::new(30.0, -5.0, 0, FRAC_PI_2);
        assert_eq!(osc.angle_at_ms(0.0), -5.0);
        assert_eq!(osc.angle_at_ms(777.0), -5.0);
        assert_eq!(osc.peak_velocity(), 0.0);
    }

    #[test]
    fn test_quarter_cycle_values() {
        let osc = Oscillator::new(30.0, 5.0, 1000, 0.0);
        assert!((osc.angle_at(0.0) - 5.0).abs() < EPS);
        assert!((osc.angle_at(0.25) - 35.0).abs() < EPS);
        assert!((osc.angle_at(0.75) + 25.0).abs() < EPS);
    }

    #[test]
    fn test_phase_difference_shifts_cycle() {
        // -90 deg phase starts the servo at its trough
        let osc = Oscillator::new(30.0, 0.0, 1000, -FRAC_PI_2);
        assert!((osc.angle_at(0.0) + 30.0).abs() < EPS);
        // Half a cycle later it sits at the crest
        assert!((osc.angle_at(0.5) - 30.0).abs() < EPS);
    }

    #[test]
    fn test_bank_adds_center() {
        let bank = OscillatorBank::new(
            &ServoArray::splat(0.0),
            &ServoArray::new([0.0, 0.0, 5.0, -5.0, -45.0, 45.0]),
            &ServoArray::splat(0.0),
            1000,
        );
        let positions = bank.positions_at(300.0);
        assert_eq!(positions[ServoId::LeftFoot], 95.0);
        assert_eq!(positions[ServoId::RightFoot], 85.0);
        assert_eq!(positions[ServoId::LeftHand], 45.0);
        assert_eq!(positions[ServoId::RightHand], 135.0);
    }

    #[test]
    fn test_peak_velocity() {
        // 30 deg amplitude over 1 s: 30 * 2pi deg/s
        let osc = Oscillator::new(30.0, 0.0, 1000, 0.0);
        assert!((osc.peak_velocity() - 188.495).abs() < 0.01);
    }

    proptest! {
        #[test]
        fn prop_periodic(
            amplitude in 0.0f32..60.0,
            offset in -40.0f32..40.0,
            period in 100u32..4000,
            phase in -6.3f32..6.3,
            t in 0.0f32..5000.0,
        ) {
            let osc = Oscillator::new(amplitude, offset, period, phase);
            let a = osc.angle_at_ms(t);
            let b = osc.angle_at_ms(t + period as f32);
            prop_assert!((a - b).abs() < 1e-2, "angle({}) = {} but angle(t + T) = {}", t, a, b);
        }

        #[test]
        fn prop_bounded_by_amplitude(
            amplitude in 0.0f32..60.0,
            offset in -40.0f32..40.0,
            period in 1u32..4000,
            phase in -6.3f32..6.3,
            t in 0.0f32..10000.0,
        ) {
            let osc = Oscillator::new(amplitude, offset, period, phase);
            let angle = osc.angle_at_ms(t);
            prop_assert!((angle - offset).abs() <= amplitude + EPS);
        }
    }
}
