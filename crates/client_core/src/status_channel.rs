//! Real-time device status listener over STOMP-on-WebSocket.
//!
//! One [`StatusChannel`] owns one broker connection. It keeps the latest value of each
//! status field in a `watch` snapshot and re-broadcasts every decoded event in the order
//! it was received. Transport failures are logged and reflected in
//! [`StatusSnapshot::connection`]; they never surface to callers.

use std::{collections::HashMap, time::Duration};

use chrono::Utc;
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::Serialize;
use shared::{
    domain::{CalibrationReading, Confirmation, ConnectionState},
    protocol::{ChannelEvent, HeartbeatPayload, Topic, HEARTBEAT_DESTINATION},
};
use tokio::{
    sync::{broadcast, mpsc, oneshot, watch},
    task::JoinHandle,
};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
    error::ChannelError,
    stomp::{decode_frames, Command, Frame},
};

const EVENT_BUFFER: usize = 256;
const OUTBOUND_BUFFER: usize = 16;
const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub enabled: bool,
    pub delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}

impl ReconnectPolicy {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Backoff before reconnect attempt `attempt` (1-based); `None` once attempts are
    /// exhausted or reconnecting is disabled.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if !self.enabled || attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        let factor = 2u32.saturating_pow(attempt - 1);
        Some(self.delay.saturating_mul(factor).min(self.max_delay))
    }
}

#[derive(Debug, Clone)]
pub struct StatusChannelConfig {
    pub api_base_url: String,
    pub ws_path: String,
    pub auth_token: Option<String>,
    pub reconnect: ReconnectPolicy,
    pub connect_timeout: Duration,
}

impl StatusChannelConfig {
    pub fn new(api_base_url: impl Into<String>) -> Self {
        Self {
            api_base_url: api_base_url.into(),
            ws_path: "/ws/websocket".to_string(),
            auth_token: None,
            reconnect: ReconnectPolicy::default(),
            connect_timeout: Duration::from_secs(10),
        }
    }

    pub fn websocket_url(&self) -> Result<Url, ChannelError> {
        let invalid = |reason: String| ChannelError::InvalidUrl {
            url: self.api_base_url.clone(),
            reason,
        };
        let mut url = Url::parse(&self.api_base_url).map_err(|err| invalid(err.to_string()))?;
        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => return Err(invalid(format!("unsupported scheme {other}"))),
        };
        url.set_scheme(scheme)
            .map_err(|()| invalid("cannot switch to websocket scheme".to_string()))?;
        let path = format!(
            "{}/{}",
            url.path().trim_end_matches('/'),
            self.ws_path.trim_start_matches('/')
        );
        url.set_path(&path);
        Ok(url)
    }
}

/// Latest known value of every status field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusSnapshot {
    pub connection: ConnectionState,
    pub device_alive: Confirmation,
    pub calibration: Option<CalibrationReading>,
    pub orientation_captured: Confirmation,
    pub sensor_data: Option<serde_json::Value>,
}

impl StatusSnapshot {
    /// Folds one event into the snapshot. Readings and samples replace the previous
    /// value wholesale; flags only ever get confirmed.
    pub fn apply(&mut self, event: &ChannelEvent) {
        match event {
            ChannelEvent::DeviceAlive => {
                self.device_alive.confirm();
            }
            ChannelEvent::Calibration(reading) => self.calibration = Some(*reading),
            ChannelEvent::OrientationCaptured => {
                self.orientation_captured.confirm();
            }
            ChannelEvent::SensorData(sample) => self.sensor_data = Some(sample.clone()),
            ChannelEvent::ResultsReady(_) => {}
        }
    }
}

pub struct StatusChannel {
    snapshot: watch::Receiver<StatusSnapshot>,
    events: broadcast::Sender<ChannelEvent>,
    outbound: mpsc::Sender<Frame>,
    reconnect: mpsc::Sender<()>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl StatusChannel {
    /// Starts the connection task. Must be called from within a Tokio runtime.
    pub fn connect(config: StatusChannelConfig) -> Self {
        let (snapshot_tx, snapshot) = watch::channel(StatusSnapshot::default());
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_BUFFER);
        let (reconnect, reconnect_rx) = mpsc::channel(1);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let task = tokio::spawn(run_connection(
            config,
            snapshot_tx,
            events.clone(),
            outbound_rx,
            reconnect_rx,
            shutdown_rx,
        ));

        Self {
            snapshot,
            events,
            outbound,
            reconnect,
            shutdown: Some(shutdown_tx),
            task: Some(task),
        }
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<StatusSnapshot> {
        self.snapshot.clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ChannelEvent> {
        self.events.subscribe()
    }

    /// Queues `payload` as a JSON SEND frame for `destination`. Returns `false` when not
    /// connected, when the payload cannot be encoded, or when the outbound queue is full.
    pub fn send<T: Serialize>(&self, destination: &str, payload: &T) -> bool {
        if self.snapshot.borrow().connection != ConnectionState::Connected {
            warn!(destination, "channel: cannot send while not connected");
            return false;
        }
        let body = match serde_json::to_string(payload) {
            Ok(body) => body,
            Err(err) => {
                warn!(destination, error = %err, "channel: failed to encode payload");
                return false;
            }
        };
        match self.outbound.try_send(Frame::send_json(destination, body)) {
            Ok(()) => true,
            Err(err) => {
                warn!(destination, error = %err, "channel: outbound frame dropped");
                false
            }
        }
    }

    pub fn send_heartbeat(&self) -> bool {
        let payload = HeartbeatPayload {
            timestamp: Utc::now().timestamp_millis(),
        };
        self.send(HEARTBEAT_DESTINATION, &payload)
    }

    /// Drops the current connection, if any, and connects again with a fresh attempt
    /// budget. This is the only way out of [`ConnectionState::Failed`].
    pub fn reconnect(&self) {
        info!("channel: reconnect requested");
        let _ = self.reconnect.try_send(());
    }

    /// Sends DISCONNECT and waits briefly for the connection task to wind down.
    pub async fn disconnect(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(mut task) = self.task.take() {
            if tokio::time::timeout(DISCONNECT_GRACE, &mut task)
                .await
                .is_err()
            {
                warn!("channel: connection task did not stop in time; aborting");
                task.abort();
            }
        }
    }
}

impl Drop for StatusChannel {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

enum SessionEnd {
    Shutdown,
    Reconnect,
}

enum Wake {
    Shutdown,
    Reconnect,
}

async fn idle(reconnect: &mut mpsc::Receiver<()>, shutdown: &mut oneshot::Receiver<()>) -> Wake {
    tokio::select! {
        _ = shutdown => Wake::Shutdown,
        Some(()) = reconnect.recv() => Wake::Reconnect,
    }
}

fn set_connection(snapshot: &watch::Sender<StatusSnapshot>, state: ConnectionState) {
    snapshot.send_if_modified(|current| {
        let changed = current.connection != state;
        current.connection = state;
        changed
    });
}

async fn run_connection(
    config: StatusChannelConfig,
    snapshot: watch::Sender<StatusSnapshot>,
    events: broadcast::Sender<ChannelEvent>,
    mut outbound: mpsc::Receiver<Frame>,
    mut reconnect: mpsc::Receiver<()>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let url = match config.websocket_url() {
        Ok(url) => url,
        Err(err) => {
            error!(error = %err, "channel: refusing to connect");
            set_connection(&snapshot, ConnectionState::Failed);
            return;
        }
    };

    if config.auth_token.as_deref().map_or(true, str::is_empty) {
        warn!(url = %url, "channel: no auth token; staying disconnected");
        while let Wake::Reconnect = idle(&mut reconnect, &mut shutdown).await {
            warn!("channel: reconnect ignored without an auth token");
        }
        return;
    }

    let mut attempt = 0u32;
    loop {
        set_connection(&snapshot, ConnectionState::Connecting);
        let result = run_session(
            &config,
            &url,
            &snapshot,
            &events,
            &mut outbound,
            &mut reconnect,
            &mut shutdown,
            &mut attempt,
        )
        .await;

        let err = match result {
            Ok(SessionEnd::Shutdown) => break,
            Ok(SessionEnd::Reconnect) => {
                attempt = 0;
                continue;
            }
            Err(err) => err,
        };

        set_connection(&snapshot, ConnectionState::Error);
        attempt += 1;
        let Some(delay) = config.reconnect.delay_for(attempt) else {
            error!(
                url = %url,
                error = %err,
                attempts = attempt,
                "channel: connection failed; giving up until a reconnect is requested"
            );
            set_connection(&snapshot, ConnectionState::Failed);
            match idle(&mut reconnect, &mut shutdown).await {
                Wake::Shutdown => break,
                Wake::Reconnect => {
                    attempt = 0;
                    continue;
                }
            }
        };
        warn!(
            url = %url,
            error = %err,
            attempt,
            max_attempts = config.reconnect.max_attempts,
            delay_ms = delay.as_millis() as u64,
            "channel: connection failed; reconnecting"
        );
        tokio::select! {
            _ = &mut shutdown => break,
            Some(()) = reconnect.recv() => attempt = 0,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    set_connection(&snapshot, ConnectionState::Disconnected);
    info!(url = %url, "channel: disconnected");
}

async fn run_session(
    config: &StatusChannelConfig,
    url: &Url,
    snapshot: &watch::Sender<StatusSnapshot>,
    events: &broadcast::Sender<ChannelEvent>,
    outbound: &mut mpsc::Receiver<Frame>,
    reconnect: &mut mpsc::Receiver<()>,
    shutdown: &mut oneshot::Receiver<()>,
    attempt: &mut u32,
) -> Result<SessionEnd, ChannelError> {
    let (stream, _) = tokio::time::timeout(config.connect_timeout, connect_async(url.as_str()))
        .await
        .map_err(|_| ChannelError::ConnectTimeout(config.connect_timeout))?
        .map_err(|source| ChannelError::Connect {
            url: url.to_string(),
            source,
        })?;
    let (mut writer, mut reader) = stream.split();

    let host = url.host_str().unwrap_or("localhost");
    write_frame(
        &mut writer,
        &Frame::connect(host, config.auth_token.as_deref()),
    )
    .await?;
    let connected = tokio::time::timeout(config.connect_timeout, await_connected(&mut reader))
        .await
        .map_err(|_| ChannelError::ConnectTimeout(config.connect_timeout))??;

    info!(
        url = %url,
        version = connected.get("version").unwrap_or("unknown"),
        "channel: connected"
    );
    *attempt = 0;
    while reconnect.try_recv().is_ok() {}
    set_connection(snapshot, ConnectionState::Connected);

    let mut routes = HashMap::new();
    for (index, topic) in Topic::ALL.into_iter().enumerate() {
        let id = format!("sub-{index}");
        write_frame(&mut writer, &Frame::subscribe(&id, topic.destination())).await?;
        routes.insert(id, topic);
    }
    debug!(subscriptions = routes.len(), "channel: subscribed to status topics");

    loop {
        tokio::select! {
            _ = &mut *shutdown => {
                let _ = write_frame(&mut writer, &Frame::disconnect()).await;
                let _ = writer.close().await;
                return Ok(SessionEnd::Shutdown);
            }
            Some(()) = reconnect.recv() => {
                info!(url = %url, "channel: dropping connection to reconnect");
                let _ = write_frame(&mut writer, &Frame::disconnect()).await;
                let _ = writer.close().await;
                return Ok(SessionEnd::Reconnect);
            }
            Some(frame) = outbound.recv() => {
                write_frame(&mut writer, &frame).await?;
            }
            message = reader.next() => match message {
                Some(Ok(Message::Text(text))) => handle_text(&text, &routes, snapshot, events)?,
                Some(Ok(Message::Close(_))) | None => return Err(ChannelError::Closed),
                Some(Ok(_)) => {}
                Some(Err(err)) => return Err(err.into()),
            },
        }
    }
}

async fn write_frame<S>(writer: &mut S, frame: &Frame) -> Result<(), ChannelError>
where
    S: Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    writer.send(Message::Text(frame.encode())).await?;
    Ok(())
}

async fn await_connected<S>(reader: &mut S) -> Result<Frame, ChannelError>
where
    S: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    while let Some(message) = reader.next().await {
        let text = match message? {
            Message::Text(text) => text,
            Message::Close(_) => return Err(ChannelError::Closed),
            _ => continue,
        };
        for frame in decode_frames(&text)? {
            match frame.command {
                Command::Connected => return Ok(frame),
                Command::Error => return Err(broker_error(&frame)),
                other => debug!(command = %other, "channel: ignoring frame before CONNECTED"),
            }
        }
    }
    Err(ChannelError::Closed)
}

fn broker_error(frame: &Frame) -> ChannelError {
    let message = frame
        .get("message")
        .map(str::to_string)
        .unwrap_or_else(|| frame.body.clone());
    ChannelError::Broker(message)
}

fn handle_text(
    text: &str,
    routes: &HashMap<String, Topic>,
    snapshot: &watch::Sender<StatusSnapshot>,
    events: &broadcast::Sender<ChannelEvent>,
) -> Result<(), ChannelError> {
    let frames = match decode_frames(text) {
        Ok(frames) => frames,
        Err(err) => {
            warn!(error = %err, "channel: dropping malformed frame");
            return Ok(());
        }
    };

    for frame in frames {
        match frame.command {
            Command::Message => dispatch_message(&frame, routes, snapshot, events),
            Command::Error => return Err(broker_error(&frame)),
            other => debug!(command = %other, "channel: ignoring frame"),
        }
    }
    Ok(())
}

fn dispatch_message(
    frame: &Frame,
    routes: &HashMap<String, Topic>,
    snapshot: &watch::Sender<StatusSnapshot>,
    events: &broadcast::Sender<ChannelEvent>,
) {
    let topic = frame
        .get("subscription")
        .and_then(|id| routes.get(id).copied())
        .or_else(|| frame.get("destination").and_then(Topic::from_destination));
    let Some(topic) = topic else {
        debug!(
            destination = frame.get("destination").unwrap_or_default(),
            "channel: message for unknown subscription"
        );
        return;
    };

    match ChannelEvent::decode(topic, &frame.body) {
        Ok(event) => {
            debug!(topic = topic.destination(), kind = event.kind(), "channel: event");
            snapshot.send_modify(|current| current.apply(&event));
            let _ = events.send(event);
        }
        Err(err) => warn!(
            topic = topic.destination(),
            error = %err,
            "channel: dropping undecodable payload"
        ),
    }
}

#[cfg(test)]
#[path = "tests/status_channel_tests.rs"]
mod tests;
