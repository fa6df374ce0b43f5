//! Test-session workflow as a pure reducer.
//!
//! [`transition`] folds one [`SessionEvent`] into a new [`SessionState`] and returns the
//! side effects the owner must run (timers, device commands). Timer callbacks come back
//! in as events tagged with the ticket or generation they were issued for, so a late
//! timer can never act on state it no longer belongs to.

use shared::{
    domain::{DeviceStatus, RecordingSession, SessionId, WorkflowStep},
    protocol::{commands, ChannelEvent},
};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingAdvance {
    pub ticket: u64,
    pub to: WorkflowStep,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionState {
    pub active_step: WorkflowStep,
    pub device_status: DeviceStatus,
    pub is_calibrating: bool,
    pub calibration_progress: u8,
    pub recording: RecordingSession,
    pending_advance: Option<PendingAdvance>,
    last_ticket: u64,
    ticker_generation: u64,
}

impl SessionState {
    pub fn pending_advance(&self) -> Option<PendingAdvance> {
        self.pending_advance
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Channel(ChannelEvent),
    StartCalibration,
    /// The capture itself is requested by the wear-device view; the state only changes
    /// once the orientation topic confirms it.
    CaptureOrientation,
    SetActiveStep(WorkflowStep),
    StartRecording(SessionId),
    StopRecording,
    AdvanceElapsed { ticket: u64 },
    RecordingTick { generation: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    ScheduleAdvance { ticket: u64, to: WorkflowStep },
    CancelAdvance,
    StartTicker { generation: u64 },
    StopTicker,
    SendCommand(&'static str),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub state: SessionState,
    pub effects: Vec<Effect>,
}

pub fn transition(state: &SessionState, event: SessionEvent) -> Transition {
    let mut next = state.clone();
    let mut effects = Vec::new();

    match event {
        SessionEvent::Channel(ChannelEvent::DeviceAlive) => {
            if next.device_status.device_alive.confirm() {
                effects.push(Effect::SendCommand(commands::CHECK_CALIBRATION));
            }
        }
        SessionEvent::Channel(ChannelEvent::Calibration(reading)) => {
            next.is_calibrating = !reading.status;
            next.calibration_progress = reading.progress();
            if reading.status
                && next.device_status.device_calibrated.confirm()
                && next.active_step == WorkflowStep::Calibration
            {
                schedule_advance(&mut next, &mut effects, WorkflowStep::WearDevice);
            }
        }
        SessionEvent::Channel(ChannelEvent::OrientationCaptured) => {
            if next.device_status.orientation_captured.confirm() {
                if next.active_step == WorkflowStep::WearDevice {
                    schedule_advance(&mut next, &mut effects, WorkflowStep::StartTest);
                } else if next.pending_advance.is_some() {
                    next.pending_advance = None;
                    effects.push(Effect::CancelAdvance);
                }
                next.active_step = WorkflowStep::StartTest;
            }
        }
        SessionEvent::Channel(ChannelEvent::SensorData(_) | ChannelEvent::ResultsReady(_)) => {}
        SessionEvent::StartCalibration => {
            next.is_calibrating = true;
            next.calibration_progress = 0;
        }
        SessionEvent::CaptureOrientation => {}
        SessionEvent::SetActiveStep(step) => {
            next.active_step = step;
            if next.pending_advance.take().is_some() {
                effects.push(Effect::CancelAdvance);
            }
        }
        SessionEvent::StartRecording(session_id) => {
            if !next.recording.is_recording {
                next.ticker_generation += 1;
                next.recording = RecordingSession {
                    is_recording: true,
                    elapsed_seconds: 0,
                    session_id: Some(session_id),
                };
                effects.push(Effect::StartTicker {
                    generation: next.ticker_generation,
                });
            }
        }
        SessionEvent::StopRecording => {
            if next.recording.is_recording {
                next.recording.is_recording = false;
                effects.push(Effect::StopTicker);
            }
        }
        SessionEvent::AdvanceElapsed { ticket } => match next.pending_advance {
            Some(pending) if pending.ticket == ticket => {
                next.pending_advance = None;
                // Automatic moves never go backwards.
                if pending.to >= next.active_step {
                    next.active_step = pending.to;
                } else {
                    debug!(to = ?pending.to, active = ?next.active_step, "session: skipping backward advance");
                }
            }
            _ => debug!(ticket, "session: ignoring stale advance"),
        },
        SessionEvent::RecordingTick { generation } => {
            if next.recording.is_recording && generation == next.ticker_generation {
                next.recording.elapsed_seconds += 1;
            }
        }
    }

    Transition {
        state: next,
        effects,
    }
}

fn schedule_advance(next: &mut SessionState, effects: &mut Vec<Effect>, to: WorkflowStep) {
    next.last_ticket += 1;
    let ticket = next.last_ticket;
    next.pending_advance = Some(PendingAdvance { ticket, to });
    effects.push(Effect::ScheduleAdvance { ticket, to });
}

#[cfg(test)]
#[path = "tests/machine_tests.rs"]
mod tests;
