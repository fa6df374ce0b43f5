//! Fire-and-forget device commands.
//!
//! Delivery is best effort and at most once: failures are logged and published as a
//! [`CommandReport`], never returned to the caller and never retried. Whether a command
//! took effect is only observable through the status channel.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use shared::{
    error::ApiError,
    protocol::{CommandRequest, COMMANDS_PATH},
};
use tokio::sync::broadcast;
use tracing::{info, warn};
use url::Url;

use crate::error::CommandDeliveryError;

const REPORT_BUFFER: usize = 64;

#[derive(Debug, Clone)]
pub struct CommandSenderConfig {
    pub api_base_url: String,
    pub auth_token: Option<String>,
    pub request_timeout: Duration,
}

impl CommandSenderConfig {
    pub fn new(api_base_url: impl Into<String>) -> Self {
        Self {
            api_base_url: api_base_url.into(),
            auth_token: None,
            request_timeout: Duration::from_secs(10),
        }
    }

    pub fn endpoint(&self) -> Result<Url, url::ParseError> {
        Url::parse(&format!(
            "{}{COMMANDS_PATH}",
            self.api_base_url.trim_end_matches('/')
        ))
    }
}

#[async_trait]
pub trait CommandTransport: Send + Sync {
    async fn post_command(&self, request: &CommandRequest) -> Result<(), CommandDeliveryError>;
}

pub struct HttpCommandTransport {
    http: Client,
    endpoint: Url,
    auth_token: Option<String>,
}

impl HttpCommandTransport {
    pub fn new(config: &CommandSenderConfig) -> Result<Self, CommandDeliveryError> {
        let endpoint = config
            .endpoint()
            .map_err(|err| CommandDeliveryError::Unavailable(err.to_string()))?;
        let http = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self {
            http,
            endpoint,
            auth_token: config.auth_token.clone(),
        })
    }
}

#[async_trait]
impl CommandTransport for HttpCommandTransport {
    async fn post_command(&self, request: &CommandRequest) -> Result<(), CommandDeliveryError> {
        let mut builder = self.http.post(self.endpoint.clone()).json(request);
        if let Some(token) = &self.auth_token {
            builder = builder.bearer_auth(token);
        }
        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        let api_error = ApiError::from_body(&body);
        let detail = match &api_error {
            Some(api_error) => api_error.to_string(),
            None if body.is_empty() => status.to_string(),
            None => body,
        };
        Err(CommandDeliveryError::Rejected {
            status: status.as_u16(),
            detail,
            api_error,
        })
    }
}

pub struct MissingCommandTransport {
    reason: String,
}

impl MissingCommandTransport {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl CommandTransport for MissingCommandTransport {
    async fn post_command(&self, _request: &CommandRequest) -> Result<(), CommandDeliveryError> {
        Err(CommandDeliveryError::Unavailable(self.reason.clone()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Delivered,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandReport {
    pub command: String,
    pub outcome: CommandOutcome,
}

#[derive(Clone)]
pub struct CommandSender {
    transport: Arc<dyn CommandTransport>,
    reports: broadcast::Sender<CommandReport>,
}

impl CommandSender {
    pub fn new(config: &CommandSenderConfig) -> Self {
        let transport: Arc<dyn CommandTransport> = match HttpCommandTransport::new(config) {
            Ok(transport) => Arc::new(transport),
            Err(err) => {
                warn!(
                    api_base_url = %config.api_base_url,
                    error = %err,
                    "command: endpoint unusable; commands will be dropped"
                );
                Arc::new(MissingCommandTransport::new(err.to_string()))
            }
        };
        Self::with_transport(transport)
    }

    pub fn with_transport(transport: Arc<dyn CommandTransport>) -> Self {
        let (reports, _) = broadcast::channel(REPORT_BUFFER);
        Self { transport, reports }
    }

    pub fn subscribe_reports(&self) -> broadcast::Receiver<CommandReport> {
        self.reports.subscribe()
    }

    /// Issues `command` in the background and returns immediately.
    pub fn send(&self, command: &str) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(command, "command: no async runtime; dropping command");
            return;
        };
        let sender = self.clone();
        let command = command.to_string();
        runtime.spawn(async move {
            sender.dispatch(&command).await;
        });
    }

    /// Delivers `command` once and reports the outcome. Never fails.
    pub async fn dispatch(&self, command: &str) {
        let request = CommandRequest::new(command, Utc::now());
        let outcome = match self.transport.post_command(&request).await {
            Ok(()) => {
                info!(command, timestamp = %request.timestamp, "command: delivered");
                CommandOutcome::Delivered
            }
            Err(err) => {
                warn!(command, error = %err, "command: delivery failed");
                CommandOutcome::Failed(err.to_string())
            }
        };
        let _ = self.reports.send(CommandReport {
            command: command.to_string(),
            outcome,
        });
    }
}

#[cfg(test)]
#[path = "tests/command_sender_tests.rs"]
mod tests;
