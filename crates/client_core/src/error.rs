use std::time::Duration;

use shared::error::ApiError;
use thiserror::Error;
use tokio_tungstenite::tungstenite;

use crate::stomp::FrameError;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("invalid channel url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("failed to connect websocket {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: tungstenite::Error,
    },
    #[error("no CONNECTED frame within {0:?}")]
    ConnectTimeout(Duration),
    #[error("broker rejected the session: {0}")]
    Broker(String),
    #[error("malformed STOMP frame: {0}")]
    Frame(#[from] FrameError),
    #[error("websocket transport failed: {0}")]
    Transport(#[from] tungstenite::Error),
    #[error("connection closed by broker")]
    Closed,
}

#[derive(Debug, Error)]
pub enum CommandDeliveryError {
    #[error("command endpoint is unavailable: {0}")]
    Unavailable(String),
    #[error("command request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("server rejected command with status {status}: {detail}")]
    Rejected {
        status: u16,
        detail: String,
        api_error: Option<ApiError>,
    },
}
