//! Boundary components of a gait test session: the real-time status channel and the
//! device command sender. Both swallow their own transport failures.

pub mod command_sender;
pub mod error;
pub mod status_channel;
pub mod stomp;

pub use command_sender::{
    CommandOutcome, CommandReport, CommandSender, CommandSenderConfig, CommandTransport,
    HttpCommandTransport, MissingCommandTransport,
};
pub use error::{ChannelError, CommandDeliveryError};
pub use status_channel::{ReconnectPolicy, StatusChannel, StatusChannelConfig, StatusSnapshot};
