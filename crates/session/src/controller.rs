//! Actor that owns a live [`SessionState`].
//!
//! The actor is the only writer: channel events, user intents and timer callbacks all
//! funnel into one task, pass through [`transition`], and the resulting effects are run
//! here. Every new state is published on a `watch` channel.

use std::time::Duration;

use client_core::{CommandSender, StatusSnapshot};
use futures::{stream, Stream, StreamExt};
use shared::{
    domain::SessionId,
    protocol::{commands, ChannelEvent},
};
use tokio::{
    sync::{broadcast, mpsc, watch},
    task::JoinHandle,
    time::{interval_at, Instant},
};
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tracing::{debug, info, warn};

use crate::{
    machine::{transition, Effect, SessionEvent, SessionState},
    views::{Intent, StepView},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTimings {
    /// Delay before an automatic step advance lands.
    pub advance_delay: Duration,
    pub tick_period: Duration,
    /// Delay between `capture_orientation` and the `start_streaming` that follows it.
    pub streaming_follow_up: Duration,
}

impl Default for SessionTimings {
    fn default() -> Self {
        Self {
            advance_delay: Duration::from_secs(1),
            tick_period: Duration::from_secs(1),
            streaming_follow_up: Duration::from_secs(1),
        }
    }
}

/// Adapts a status channel subscription into the event stream a session consumes.
///
/// A receiver that lags loses events it cannot get back, including one-shot liveness and
/// orientation confirmations. On lag the stream replays what `snapshot` already holds:
/// confirmed flags and the latest calibration reading.
pub fn channel_stream(
    events: broadcast::Receiver<ChannelEvent>,
    snapshot: watch::Receiver<StatusSnapshot>,
) -> impl Stream<Item = ChannelEvent> + Send + 'static {
    BroadcastStream::new(events).flat_map(move |item| {
        let batch = match item {
            Ok(event) => vec![event],
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                let replay = resync_events(&snapshot.borrow());
                warn!(
                    skipped,
                    replayed = replay.len(),
                    "session: channel events dropped while lagging; resyncing from snapshot"
                );
                replay
            }
        };
        stream::iter(batch)
    })
}

fn resync_events(snapshot: &StatusSnapshot) -> Vec<ChannelEvent> {
    let mut events = Vec::new();
    if snapshot.device_alive.is_confirmed() {
        events.push(ChannelEvent::DeviceAlive);
    }
    if let Some(reading) = snapshot.calibration {
        events.push(ChannelEvent::Calibration(reading));
    }
    if snapshot.orientation_captured.is_confirmed() {
        events.push(ChannelEvent::OrientationCaptured);
    }
    events
}

pub struct SessionHandle {
    intents: mpsc::UnboundedSender<Intent>,
    state: watch::Receiver<SessionState>,
    task: Option<JoinHandle<()>>,
}

impl SessionHandle {
    /// Starts a session actor fed by `channel`. Must be called from within a Tokio
    /// runtime.
    pub fn spawn<S>(timings: SessionTimings, commands: CommandSender, channel: S) -> Self
    where
        S: Stream<Item = ChannelEvent> + Send + 'static,
    {
        let (intents, intents_rx) = mpsc::unbounded_channel();
        let (published, state) = watch::channel(SessionState::default());
        let (timers, timers_rx) = mpsc::unbounded_channel();

        let actor = SessionActor {
            state: SessionState::default(),
            timings,
            commands,
            published,
            timers,
            advance_timer: None,
            ticker: None,
            follow_ups: Vec::new(),
        };
        let task = tokio::spawn(actor.run(channel, intents_rx, timers_rx));

        Self {
            intents,
            state,
            task: Some(task),
        }
    }

    /// Queues `intent` for the actor. Returns `false` once the session has stopped.
    pub fn perform(&self, intent: Intent) -> bool {
        self.intents.send(intent).is_ok()
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    pub fn view(&self) -> StepView {
        StepView::from_state(&self.state.borrow())
    }

    /// Stops the actor and waits for it, cancelling every pending timer.
    pub async fn shutdown(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
        info!("session: stopped");
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

struct SessionActor {
    state: SessionState,
    timings: SessionTimings,
    commands: CommandSender,
    published: watch::Sender<SessionState>,
    timers: mpsc::UnboundedSender<SessionEvent>,
    advance_timer: Option<JoinHandle<()>>,
    ticker: Option<JoinHandle<()>>,
    follow_ups: Vec<JoinHandle<()>>,
}

impl SessionActor {
    async fn run<S>(
        mut self,
        channel: S,
        mut intents: mpsc::UnboundedReceiver<Intent>,
        mut timers: mpsc::UnboundedReceiver<SessionEvent>,
    ) where
        S: Stream<Item = ChannelEvent>,
    {
        tokio::pin!(channel);
        let mut channel_open = true;

        loop {
            tokio::select! {
                event = channel.next(), if channel_open => match event {
                    Some(event) => self.apply(SessionEvent::Channel(event)),
                    None => {
                        debug!("session: channel stream ended");
                        channel_open = false;
                    }
                },
                intent = intents.recv() => match intent {
                    Some(intent) => self.perform(intent),
                    None => break,
                },
                Some(event) = timers.recv() => self.apply(event),
            }
        }
        debug!("session: handle dropped; actor exiting");
    }

    fn perform(&mut self, intent: Intent) {
        debug!(?intent, step = ?self.state.active_step, "session: intent");
        match intent {
            Intent::StartCalibration => {
                self.commands.send(commands::CHECK_CALIBRATION);
                self.apply(SessionEvent::StartCalibration);
            }
            Intent::CaptureOrientation => {
                self.commands.send(commands::CAPTURE_ORIENTATION);
                self.schedule_follow_up(commands::START_STREAMING);
                self.apply(SessionEvent::CaptureOrientation);
            }
            Intent::Next => {
                if let Some(step) = self.state.active_step.next() {
                    self.apply(SessionEvent::SetActiveStep(step));
                }
            }
            Intent::Back => {
                if let Some(step) = self.state.active_step.previous() {
                    self.apply(SessionEvent::SetActiveStep(step));
                }
            }
            Intent::ToggleRecording => {
                let event = if self.state.recording.is_recording {
                    SessionEvent::StopRecording
                } else {
                    SessionEvent::StartRecording(SessionId::new())
                };
                self.apply(event);
            }
            Intent::GoTo(step) => self.apply(SessionEvent::SetActiveStep(step)),
        }
    }

    fn apply(&mut self, event: SessionEvent) {
        let result = transition(&self.state, event);
        let previous_step = self.state.active_step;
        self.state = result.state;
        if self.state.active_step != previous_step {
            info!(
                from = ?previous_step,
                to = ?self.state.active_step,
                "session: step changed"
            );
        }

        for effect in result.effects {
            self.run_effect(effect);
        }

        let state = &self.state;
        self.published.send_if_modified(|current| {
            if current == state {
                return false;
            }
            *current = state.clone();
            true
        });
    }

    fn run_effect(&mut self, effect: Effect) {
        match effect {
            Effect::ScheduleAdvance { ticket, to } => {
                debug!(ticket, ?to, "session: advance scheduled");
                abort(self.advance_timer.take());
                let timers = self.timers.clone();
                let delay = self.timings.advance_delay;
                self.advance_timer = Some(tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = timers.send(SessionEvent::AdvanceElapsed { ticket });
                }));
            }
            Effect::CancelAdvance => {
                debug!("session: pending advance cancelled");
                abort(self.advance_timer.take());
            }
            Effect::StartTicker { generation } => {
                abort(self.ticker.take());
                let timers = self.timers.clone();
                let period = self.timings.tick_period;
                self.ticker = Some(tokio::spawn(async move {
                    let mut ticks = interval_at(Instant::now() + period, period);
                    loop {
                        ticks.tick().await;
                        if timers
                            .send(SessionEvent::RecordingTick { generation })
                            .is_err()
                        {
                            break;
                        }
                    }
                }));
                if let Some(session_id) = self.state.recording.session_id {
                    info!(%session_id, "session: recording started");
                }
            }
            Effect::StopTicker => {
                abort(self.ticker.take());
                info!(
                    elapsed_seconds = self.state.recording.elapsed_seconds,
                    "session: recording stopped"
                );
            }
            Effect::SendCommand(command) => self.commands.send(command),
        }
    }

    fn schedule_follow_up(&mut self, command: &'static str) {
        self.follow_ups.retain(|task| !task.is_finished());
        let commands = self.commands.clone();
        let delay = self.timings.streaming_follow_up;
        self.follow_ups.push(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            commands.dispatch(command).await;
        }));
    }
}

impl Drop for SessionActor {
    fn drop(&mut self) {
        abort(self.advance_timer.take());
        abort(self.ticker.take());
        for task in self.follow_ups.drain(..) {
            task.abort();
        }
    }
}

fn abort(task: Option<JoinHandle<()>>) {
    if let Some(task) = task {
        task.abort();
    }
}

#[cfg(test)]
#[path = "tests/controller_tests.rs"]
mod tests;
