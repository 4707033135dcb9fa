// Oscillator gait engine: oscillators, motion executor, named gaits
pub mod executor;
pub mod library;
pub mod oscillator;

pub use executor::{MotionPlan, MotionReport, MotionRun};
pub use library::{Direction, GaitParams, Hands, OscillatingGait, Side};
pub use oscillator::{Oscillator, OscillatorBank};
