//! Per-step presentation of the session state.
//!
//! A [`StepView`] is a plain value derived from [`SessionState`]; it owns no behavior
//! beyond naming the [`Intent`] each of its buttons triggers. Rendering is plain text so
//! the same view can back a terminal front end or a test assertion.

use std::fmt::Write as _;

use shared::domain::{Confirmation, DeviceStatus, WorkflowStep};

use crate::machine::SessionState;

/// A user action offered by one of the step views.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    StartCalibration,
    Next,
    CaptureOrientation,
    Back,
    ToggleRecording,
    GoTo(WorkflowStep),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    /// Short key a text front end binds the button to.
    pub key: &'static str,
    pub label: &'static str,
    pub intent: Intent,
    pub enabled: bool,
}

impl Button {
    fn new(key: &'static str, label: &'static str, intent: Intent, enabled: bool) -> Self {
        Self {
            key,
            label,
            intent,
            enabled,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalibrationView {
    pub status: DeviceStatus,
    pub is_calibrating: bool,
    pub progress: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WearDeviceView {
    pub orientation_captured: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartTestView {
    pub status: DeviceStatus,
    pub is_recording: bool,
    pub elapsed_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepView {
    Calibration(CalibrationView),
    WearDevice(WearDeviceView),
    StartTest(StartTestView),
}

impl StepView {
    pub fn from_state(state: &SessionState) -> Self {
        match state.active_step {
            WorkflowStep::Calibration => StepView::Calibration(CalibrationView {
                status: state.device_status,
                is_calibrating: state.is_calibrating,
                progress: state.calibration_progress,
            }),
            WorkflowStep::WearDevice => StepView::WearDevice(WearDeviceView {
                orientation_captured: state.device_status.orientation_captured.is_confirmed(),
            }),
            WorkflowStep::StartTest => StepView::StartTest(StartTestView {
                status: state.device_status,
                is_recording: state.recording.is_recording,
                elapsed_seconds: state.recording.elapsed_seconds,
            }),
        }
    }

    pub fn step(&self) -> WorkflowStep {
        match self {
            StepView::Calibration(_) => WorkflowStep::Calibration,
            StepView::WearDevice(_) => WorkflowStep::WearDevice,
            StepView::StartTest(_) => WorkflowStep::StartTest,
        }
    }

    /// Buttons currently shown, in display order. Hidden buttons are omitted; visible but
    /// inactive ones carry `enabled: false`.
    pub fn buttons(&self) -> Vec<Button> {
        match self {
            StepView::Calibration(view) => {
                let label = if view.is_calibrating {
                    "Calibrating..."
                } else {
                    "Start Calibration"
                };
                let mut buttons = vec![Button::new(
                    "start",
                    label,
                    Intent::StartCalibration,
                    !view.is_calibrating,
                )];
                if view.status.device_calibrated.is_confirmed() {
                    buttons.push(Button::new("next", "Next Step", Intent::Next, true));
                }
                buttons
            }
            StepView::WearDevice(view) => vec![
                Button::new("back", "Back", Intent::Back, true),
                Button::new(
                    "ready",
                    if view.orientation_captured {
                        "Processing..."
                    } else {
                        "I'm Ready"
                    },
                    Intent::CaptureOrientation,
                    !view.orientation_captured,
                ),
            ],
            StepView::StartTest(view) => {
                let toggle = if view.is_recording {
                    Button::new("stop", "Stop Recording", Intent::ToggleRecording, true)
                } else {
                    Button::new("go", "Let's Go", Intent::ToggleRecording, true)
                };
                vec![
                    toggle,
                    Button::new(
                        "setup",
                        "Back to Setup",
                        Intent::GoTo(WorkflowStep::WearDevice),
                        true,
                    ),
                ]
            }
        }
    }

    /// The enabled button bound to `key`, if any.
    pub fn offers(&self, key: &str) -> Option<Intent> {
        self.buttons()
            .into_iter()
            .find(|button| button.key == key && button.enabled)
            .map(|button| button.intent)
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let step = self.step();
        let _ = writeln!(
            out,
            "== Step {} of {}: {} ==",
            step.index() + 1,
            WorkflowStep::ALL.len(),
            step.label()
        );

        match self {
            StepView::Calibration(view) => {
                let _ = writeln!(out, "{}", CALIBRATION_SUBTITLE);
                render_status(&mut out, &view.status);
                render_instructions(&mut out, "Instructions", &CALIBRATION_INSTRUCTIONS);
                let _ = writeln!(out, "Calibration Progress: {}%", view.progress);
            }
            StepView::WearDevice(_) => {
                let _ = writeln!(out, "{}", WEAR_DEVICE_SUBTITLE);
                render_instructions(&mut out, "Setup Instructions", &WEAR_DEVICE_INSTRUCTIONS);
            }
            StepView::StartTest(view) => {
                let _ = writeln!(out, "{}", START_TEST_SUBTITLE);
                render_status(&mut out, &view.status);
                render_instructions(&mut out, "Test Instructions", &START_TEST_INSTRUCTIONS);
                if view.is_recording {
                    let _ = writeln!(
                        out,
                        "Recording Active: {} (Session Duration)",
                        format_elapsed(view.elapsed_seconds)
                    );
                }
            }
        }

        for button in self.buttons() {
            let marker = if button.enabled { "" } else { " (disabled)" };
            let _ = writeln!(out, "  [{}] {}{}", button.key, button.label, marker);
        }
        out
    }
}

const CALIBRATION_SUBTITLE: &str =
    "Ensure your device is properly calibrated before starting the test";
const CALIBRATION_INSTRUCTIONS: [&str; 3] = [
    "Position your device firmly for few seconds",
    "Tilt your device 45° and hold for a few seconds, repeat for 90°",
    "Follow the video instructions for proper calibration",
];
const WEAR_DEVICE_SUBTITLE: &str = "Position the device correctly and get ready for the test";
const WEAR_DEVICE_INSTRUCTIONS: [&str; 3] = [
    "Wear your device and get comfortable",
    "When you are relaxed and ready click \"I'm Ready\"",
    "We will prepare your session for the gait analysis",
];
const START_TEST_SUBTITLE: &str = "Begin your gait analysis test";
const START_TEST_INSTRUCTIONS: [&str; 2] = [
    "When you start walking press \"Let's Go\" Button",
    "To finish the Session press \"Stop Recording\"",
];

fn render_instructions(out: &mut String, heading: &str, lines: &[&str]) {
    let _ = writeln!(out, "{heading}:");
    for (index, line) in lines.iter().enumerate() {
        let _ = writeln!(out, "  {}. {line}", index + 1);
    }
}

fn render_status(out: &mut String, status: &DeviceStatus) {
    let indicators = [
        ("Device Alive", status.device_alive),
        ("Device Calibrated", status.device_calibrated),
        ("Orientation Captured", status.orientation_captured),
    ];
    for (label, flag) in indicators {
        let mark = match flag {
            Confirmation::Confirmed => "x",
            Confirmation::Unknown => " ",
        };
        let _ = writeln!(out, "  [{mark}] {label}");
    }
}

/// Formats elapsed recording time as `mm:ss`. Minutes are not capped at 59.
pub fn format_elapsed(seconds: u64) -> String {
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}

#[cfg(test)]
#[path = "tests/views_tests.rs"]
mod tests;
