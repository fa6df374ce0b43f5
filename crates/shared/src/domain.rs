use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies one recording run inside a test session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStep {
    #[default]
    Calibration,
    WearDevice,
    StartTest,
}

impl WorkflowStep {
    pub const ALL: [WorkflowStep; 3] = [
        WorkflowStep::Calibration,
        WorkflowStep::WearDevice,
        WorkflowStep::StartTest,
    ];

    pub fn index(self) -> usize {
        match self {
            WorkflowStep::Calibration => 0,
            WorkflowStep::WearDevice => 1,
            WorkflowStep::StartTest => 2,
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn previous(self) -> Option<Self> {
        self.index().checked_sub(1).and_then(Self::from_index)
    }

    pub fn next(self) -> Option<Self> {
        Self::from_index(self.index() + 1)
    }

    pub fn label(self) -> &'static str {
        match self {
            WorkflowStep::Calibration => "Calibration",
            WorkflowStep::WearDevice => "Wear Device",
            WorkflowStep::StartTest => "Start Test",
        }
    }
}

/// A flag that can only move from `Unknown` to `Confirmed`.
///
/// It cannot be reset; a new session starts from a fresh value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confirmation {
    #[default]
    Unknown,
    Confirmed,
}

impl Confirmation {
    /// Confirms the flag. Returns `true` only on the first confirmation.
    pub fn confirm(&mut self) -> bool {
        let newly = *self == Confirmation::Unknown;
        *self = Confirmation::Confirmed;
        newly
    }

    pub fn is_confirmed(self) -> bool {
        self == Confirmation::Confirmed
    }
}

/// Per-axis calibration confidence reported by the device, each axis 0..=3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CalibrationReading {
    pub status: bool,
    #[serde(default)]
    pub sys: i32,
    #[serde(default)]
    pub gyro: i32,
    #[serde(default)]
    pub accel: i32,
    #[serde(default)]
    pub mag: i32,
}

pub const MAX_AXIS_CONFIDENCE: i32 = 3;

impl CalibrationReading {
    /// Mean axis confidence as a percentage of the maximum, rounded half up.
    pub fn progress(&self) -> u8 {
        let sum = f64::from(self.sys) + f64::from(self.gyro) + f64::from(self.accel)
            + f64::from(self.mag);
        let percent = (sum / 4.0) / f64::from(MAX_AXIS_CONFIDENCE) * 100.0;
        (percent + 0.5).floor().clamp(0.0, 100.0) as u8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub device_alive: Confirmation,
    pub device_calibrated: Confirmation,
    pub orientation_captured: Confirmation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RecordingSession {
    pub is_recording: bool,
    pub elapsed_seconds: u64,
    pub session_id: Option<SessionId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
    Failed,
}
