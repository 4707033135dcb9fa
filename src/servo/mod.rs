// Servo hardware layer for the Otto biped
//
// Provides:
// - Servo identity (closed enum) and per-channel state
// - Bus/clock traits the motion executor drives
// - Pololu Maestro serial backend
// - In-memory simulator for tests and dry runs

pub mod channel;
pub mod hardware;
pub mod maestro;
pub mod sim;

pub use channel::{SERVO_COUNT, ServoArray, ServoChannel, ServoId};
pub use hardware::{Clock, HardwareError, ServoBus, SystemClock};
pub use maestro::MaestroBus;
pub use sim::{ManualClock, ServoWrite, SimBus};
