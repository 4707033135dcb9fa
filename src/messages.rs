// Message types for the action runtime

use serde::{Deserialize, Serialize};

use crate::gait::MotionReport;
use crate::servo::ServoId;

/// Actions a command dispatcher can request, one per gait entry point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Return to the home pose
    None,
    WalkForward,
    WalkBackward,
    TurnLeft,
    TurnRight,
    Jump,
    BendLeft,
    BendRight,
    ShakeLeft,
    ShakeRight,
    UpDown,
    Swing,
    HandsUp,
    HandsDown,
    WaveLeft,
    WaveRight,
    WaveBoth,
    Jitter,
    Moonwalker,
    /// Demo choreography chaining most gaits
    Show,
}

impl Action {
    pub fn name(self) -> &'static str {
        match self {
            Action::None => "none",
            Action::WalkForward => "walk_forward",
            Action::WalkBackward => "walk_backward",
            Action::TurnLeft => "turn_left",
            Action::TurnRight => "turn_right",
            Action::Jump => "jump",
            Action::BendLeft => "bend_left",
            Action::BendRight => "bend_right",
            Action::ShakeLeft => "shake_left",
            Action::ShakeRight => "shake_right",
            Action::UpDown => "up_down",
            Action::Swing => "swing",
            Action::HandsUp => "hands_up",
            Action::HandsDown => "hands_down",
            Action::WaveLeft => "wave_left",
            Action::WaveRight => "wave_right",
            Action::WaveBoth => "wave_both",
            Action::Jitter => "jitter",
            Action::Moonwalker => "moonwalker",
            Action::Show => "show",
        }
    }
}

// Command from a dispatcher -> runtime. Missing fields fall back to the
// action's defaults.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ActionCommand {
    pub action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period_ms: Option<u32>,
    /// Hand swing for walks/turns, height for the other oscillating gaits
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<f32>,
}

impl ActionCommand {
    pub fn new(action: Action) -> Self {
        Self {
            action,
            steps: None,
            period_ms: None,
            amount: None,
        }
    }
}

/// Robot state published by the runtime
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeState {
    Idle,
    Busy,
    /// Homed and detached after the idle timeout
    Resting,
    Stopped,
}

/// Status line written after every state change
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RobotStatus {
    pub state: RuntimeState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<Action>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub clamped: Vec<ServoId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub faulted: Vec<ServoId>,
}

impl RobotStatus {
    pub fn new(state: RuntimeState) -> Self {
        Self {
            state,
            action: None,
            elapsed_ms: None,
            clamped: Vec::new(),
            faulted: Vec::new(),
        }
    }

    /// Status after an action completed
    pub fn finished(action: Action, report: MotionReport) -> Self {
        Self {
            state: RuntimeState::Idle,
            action: Some(action),
            elapsed_ms: Some(report.elapsed_ms),
            clamped: report.clamped,
            faulted: report.faulted,
        }
    }
}
