pub mod config;
pub mod error;
pub mod gait;
pub mod messages;
pub mod robot;
pub mod runtime;
pub mod servo;

pub use error::OttoError;
pub use robot::{Otto, RobotState, SpeedLimit};
