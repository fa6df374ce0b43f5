use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::CalibrationReading;

/// Command names understood by the device control endpoint.
pub mod commands {
    pub const CHECK_CALIBRATION: &str = "check_calibration";
    pub const CAPTURE_ORIENTATION: &str = "capture_orientation";
    pub const START_STREAMING: &str = "start_streaming";
}

pub const COMMANDS_PATH: &str = "/api/commands";
pub const HEARTBEAT_DESTINATION: &str = "/app/heartbeat";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRequest {
    pub command: String,
    pub timestamp: String,
}

impl CommandRequest {
    pub fn new(command: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            command: command.into(),
            timestamp: at.to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatPayload {
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    DeviceAlive,
    Calibration,
    Orientation,
    ResultsReady,
    SensorData,
}

impl Topic {
    pub const ALL: [Topic; 5] = [
        Topic::DeviceAlive,
        Topic::Calibration,
        Topic::Orientation,
        Topic::ResultsReady,
        Topic::SensorData,
    ];

    pub fn destination(self) -> &'static str {
        match self {
            Topic::DeviceAlive => "/user/topic/status/alive",
            Topic::Calibration => "/user/topic/status/calibration",
            Topic::Orientation => "/user/topic/status/orientation",
            Topic::ResultsReady => "/user/topic/status/results",
            Topic::SensorData => "/user/topic/data/sensor",
        }
    }

    pub fn from_destination(destination: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|topic| topic.destination() == destination)
    }
}

/// A decoded message from one of the status/data topics.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    DeviceAlive,
    Calibration(CalibrationReading),
    OrientationCaptured,
    SensorData(serde_json::Value),
    ResultsReady(serde_json::Value),
}

impl ChannelEvent {
    /// Decodes a message body received on `topic`.
    ///
    /// Liveness and orientation messages carry no information beyond their arrival,
    /// so any body is accepted for them.
    pub fn decode(topic: Topic, body: &str) -> Result<Self, serde_json::Error> {
        match topic {
            Topic::DeviceAlive => Ok(ChannelEvent::DeviceAlive),
            Topic::Orientation => Ok(ChannelEvent::OrientationCaptured),
            Topic::Calibration => serde_json::from_str(body).map(ChannelEvent::Calibration),
            Topic::SensorData => serde_json::from_str(body).map(ChannelEvent::SensorData),
            Topic::ResultsReady => serde_json::from_str(body).map(ChannelEvent::ResultsReady),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ChannelEvent::DeviceAlive => "device_alive",
            ChannelEvent::Calibration(_) => "calibration",
            ChannelEvent::OrientationCaptured => "orientation_captured",
            ChannelEvent::SensorData(_) => "sensor_data",
            ChannelEvent::ResultsReady(_) => "results_ready",
        }
    }
}
