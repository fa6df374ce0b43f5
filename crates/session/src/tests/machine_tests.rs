use super::*;
use shared::domain::CalibrationReading;

fn reading(status: bool, level: i32) -> CalibrationReading {
    CalibrationReading {
        status,
        sys: level,
        gyro: level,
        accel: level,
        mag: level,
    }
}

fn run(state: SessionState, events: impl IntoIterator<Item = SessionEvent>) -> Transition {
    let mut state = state;
    let mut effects = Vec::new();
    for event in events {
        let step = transition(&state, event);
        state = step.state;
        effects.extend(step.effects);
    }
    Transition { state, effects }
}

fn scheduled_ticket(effects: &[Effect], target: WorkflowStep) -> u64 {
    effects
        .iter()
        .find_map(|effect| match effect {
            Effect::ScheduleAdvance { ticket, to } if *to == target => Some(*ticket),
            _ => None,
        })
        .expect("advance scheduled")
}

#[test]
fn initial_state_is_calibration_with_nothing_confirmed() {
    let state = SessionState::default();
    assert_eq!(state.active_step, WorkflowStep::Calibration);
    assert_eq!(state.device_status, DeviceStatus::default());
    assert!(!state.is_calibrating);
    assert!(!state.recording.is_recording);
}

#[test]
fn first_liveness_requests_calibration_check_once() {
    let result = run(
        SessionState::default(),
        [
            SessionEvent::Channel(ChannelEvent::DeviceAlive),
            SessionEvent::Channel(ChannelEvent::DeviceAlive),
        ],
    );
    assert!(result.state.device_status.device_alive.is_confirmed());
    assert_eq!(
        result.effects,
        vec![Effect::SendCommand(commands::CHECK_CALIBRATION)]
    );
}

#[test]
fn uncalibrated_reading_updates_progress_only() {
    let result = run(
        SessionState::default(),
        [
            SessionEvent::Channel(ChannelEvent::DeviceAlive),
            SessionEvent::Channel(ChannelEvent::Calibration(reading(false, 1))),
        ],
    );
    assert!(result.state.is_calibrating);
    assert_eq!(result.state.calibration_progress, 33);
    assert!(!result.state.device_status.device_calibrated.is_confirmed());
    assert_eq!(result.state.active_step, WorkflowStep::Calibration);
}

#[test]
fn calibrated_reading_schedules_a_single_advance_to_wear_device() {
    let result = run(
        SessionState::default(),
        [
            SessionEvent::Channel(ChannelEvent::Calibration(reading(true, 3))),
            SessionEvent::Channel(ChannelEvent::Calibration(reading(true, 3))),
        ],
    );
    assert!(result.state.device_status.device_calibrated.is_confirmed());
    assert!(!result.state.is_calibrating);
    assert_eq!(result.state.calibration_progress, 100);
    assert_eq!(result.state.active_step, WorkflowStep::Calibration);
    let advances = result
        .effects
        .iter()
        .filter(|effect| matches!(effect, Effect::ScheduleAdvance { .. }))
        .count();
    assert_eq!(advances, 1);

    let ticket = scheduled_ticket(&result.effects, WorkflowStep::WearDevice);
    let advanced = transition(&result.state, SessionEvent::AdvanceElapsed { ticket });
    assert_eq!(advanced.state.active_step, WorkflowStep::WearDevice);
    assert_eq!(advanced.state.pending_advance(), None);
}

#[test]
fn calibrated_flag_survives_later_uncalibrated_reading() {
    let result = run(
        SessionState::default(),
        [
            SessionEvent::Channel(ChannelEvent::Calibration(reading(true, 3))),
            SessionEvent::Channel(ChannelEvent::Calibration(reading(false, 0))),
        ],
    );
    assert!(result.state.device_status.device_calibrated.is_confirmed());
    assert!(result.state.is_calibrating);
    assert_eq!(result.state.calibration_progress, 0);
}

#[test]
fn calibration_outside_calibration_step_does_not_schedule() {
    let result = run(
        SessionState::default(),
        [
            SessionEvent::SetActiveStep(WorkflowStep::WearDevice),
            SessionEvent::Channel(ChannelEvent::Calibration(reading(true, 3))),
        ],
    );
    assert!(result.effects.is_empty());
    assert_eq!(result.state.active_step, WorkflowStep::WearDevice);
}

#[test]
fn orientation_jumps_straight_to_start_test_from_calibration() {
    let result = run(
        SessionState::default(),
        [SessionEvent::Channel(ChannelEvent::OrientationCaptured)],
    );
    assert_eq!(result.state.active_step, WorkflowStep::StartTest);
    assert!(result.state.device_status.orientation_captured.is_confirmed());
    assert!(result.effects.is_empty());
}

#[test]
fn orientation_supersedes_pending_wear_device_advance() {
    let calibrated = run(
        SessionState::default(),
        [SessionEvent::Channel(ChannelEvent::Calibration(reading(true, 3)))],
    );
    let ticket = scheduled_ticket(&calibrated.effects, WorkflowStep::WearDevice);

    let result = run(
        calibrated.state,
        [
            SessionEvent::Channel(ChannelEvent::OrientationCaptured),
            SessionEvent::AdvanceElapsed { ticket },
        ],
    );
    assert_eq!(result.effects, vec![Effect::CancelAdvance]);
    assert_eq!(result.state.active_step, WorkflowStep::StartTest);
}

#[test]
fn orientation_during_wear_device_jumps_and_schedules_redundant_advance() {
    let result = run(
        SessionState::default(),
        [
            SessionEvent::SetActiveStep(WorkflowStep::WearDevice),
            SessionEvent::Channel(ChannelEvent::OrientationCaptured),
        ],
    );
    assert_eq!(result.state.active_step, WorkflowStep::StartTest);
    let ticket = scheduled_ticket(&result.effects, WorkflowStep::StartTest);

    let delayed = transition(&result.state, SessionEvent::AdvanceElapsed { ticket });
    assert_eq!(delayed.state.active_step, WorkflowStep::StartTest);
    assert!(delayed.effects.is_empty());
}

#[test]
fn repeated_orientation_events_have_no_further_effect() {
    let first = run(
        SessionState::default(),
        [
            SessionEvent::Channel(ChannelEvent::OrientationCaptured),
            SessionEvent::SetActiveStep(WorkflowStep::WearDevice),
        ],
    );
    let again = transition(
        &first.state,
        SessionEvent::Channel(ChannelEvent::OrientationCaptured),
    );
    assert_eq!(again.state, first.state);
    assert!(again.effects.is_empty());
}

#[test]
fn manual_navigation_cancels_pending_advance() {
    let calibrated = run(
        SessionState::default(),
        [SessionEvent::Channel(ChannelEvent::Calibration(reading(true, 3)))],
    );
    let ticket = scheduled_ticket(&calibrated.effects, WorkflowStep::WearDevice);

    let navigated = transition(
        &calibrated.state,
        SessionEvent::SetActiveStep(WorkflowStep::StartTest),
    );
    assert_eq!(navigated.effects, vec![Effect::CancelAdvance]);
    assert_eq!(navigated.state.pending_advance(), None);

    let late = transition(&navigated.state, SessionEvent::AdvanceElapsed { ticket });
    assert_eq!(late.state.active_step, WorkflowStep::StartTest);
}

#[test]
fn manual_navigation_may_go_backwards_and_skip_steps() {
    let result = run(
        SessionState::default(),
        [
            SessionEvent::SetActiveStep(WorkflowStep::StartTest),
            SessionEvent::SetActiveStep(WorkflowStep::Calibration),
        ],
    );
    assert_eq!(result.state.active_step, WorkflowStep::Calibration);
    assert!(result.effects.is_empty());
}

#[test]
fn start_calibration_resets_progress() {
    let result = run(
        SessionState::default(),
        [
            SessionEvent::Channel(ChannelEvent::Calibration(reading(false, 2))),
            SessionEvent::StartCalibration,
        ],
    );
    assert!(result.state.is_calibrating);
    assert_eq!(result.state.calibration_progress, 0);
    assert!(result.effects.is_empty());
}

#[test]
fn capture_orientation_intent_changes_nothing() {
    let state = SessionState::default();
    let result = transition(&state, SessionEvent::CaptureOrientation);
    assert_eq!(result.state, state);
    assert!(result.effects.is_empty());
}

#[test]
fn sensor_and_results_events_do_not_touch_workflow_state() {
    let state = SessionState::default();
    let result = run(
        state.clone(),
        [
            SessionEvent::Channel(ChannelEvent::SensorData(serde_json::json!({"fsr": 1}))),
            SessionEvent::Channel(ChannelEvent::ResultsReady(serde_json::json!({}))),
        ],
    );
    assert_eq!(result.state, state);
}

#[test]
fn recording_ticks_only_count_for_the_current_run() {
    let first_id = SessionId::new();
    let started = run(
        SessionState::default(),
        [
            SessionEvent::StartRecording(first_id),
            SessionEvent::RecordingTick { generation: 1 },
            SessionEvent::RecordingTick { generation: 1 },
        ],
    );
    assert_eq!(started.effects, vec![Effect::StartTicker { generation: 1 }]);
    assert_eq!(started.state.recording.elapsed_seconds, 2);
    assert_eq!(started.state.recording.session_id, Some(first_id));

    let stopped = run(
        started.state,
        [
            SessionEvent::StopRecording,
            SessionEvent::RecordingTick { generation: 1 },
        ],
    );
    assert_eq!(stopped.effects, vec![Effect::StopTicker]);
    assert!(!stopped.state.recording.is_recording);
    assert_eq!(stopped.state.recording.elapsed_seconds, 2);
    assert_eq!(stopped.state.recording.session_id, Some(first_id));

    let second_id = SessionId::new();
    let restarted = run(
        stopped.state,
        [
            SessionEvent::StartRecording(second_id),
            SessionEvent::RecordingTick { generation: 1 },
        ],
    );
    assert_eq!(
        restarted.effects,
        vec![Effect::StartTicker { generation: 2 }]
    );
    assert_eq!(restarted.state.recording.elapsed_seconds, 0);
    assert_eq!(restarted.state.recording.session_id, Some(second_id));
}

#[test]
fn start_while_recording_and_stop_while_idle_are_ignored() {
    let started = run(
        SessionState::default(),
        [
            SessionEvent::StartRecording(SessionId::new()),
            SessionEvent::RecordingTick { generation: 1 },
        ],
    );
    let again = transition(&started.state, SessionEvent::StartRecording(SessionId::new()));
    assert_eq!(again.state, started.state);
    assert!(again.effects.is_empty());

    let idle = transition(&SessionState::default(), SessionEvent::StopRecording);
    assert!(idle.effects.is_empty());
}

#[test]
fn status_flags_never_revert_under_any_event_order() {
    let events = [
        SessionEvent::Channel(ChannelEvent::DeviceAlive),
        SessionEvent::Channel(ChannelEvent::Calibration(reading(true, 3))),
        SessionEvent::Channel(ChannelEvent::OrientationCaptured),
        SessionEvent::Channel(ChannelEvent::Calibration(reading(false, 0))),
        SessionEvent::SetActiveStep(WorkflowStep::Calibration),
        SessionEvent::StartCalibration,
        SessionEvent::StartRecording(SessionId::new()),
        SessionEvent::StopRecording,
    ];

    let mut state = SessionState::default();
    let mut seen = DeviceStatus::default();
    for event in events {
        state = transition(&state, event).state;
        let status = state.device_status;
        assert!(!seen.device_alive.is_confirmed() || status.device_alive.is_confirmed());
        assert!(
            !seen.device_calibrated.is_confirmed() || status.device_calibrated.is_confirmed()
        );
        assert!(
            !seen.orientation_captured.is_confirmed()
                || status.orientation_captured.is_confirmed()
        );
        seen = status;
    }
    assert!(seen.device_alive.is_confirmed());
    assert!(seen.device_calibrated.is_confirmed());
    assert!(seen.orientation_captured.is_confirmed());
}
