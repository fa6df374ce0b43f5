//! Gait test-session workflow: the pure state machine, the actor that drives it, and the
//! per-step views rendered from its state.

pub mod controller;
pub mod machine;
pub mod views;

pub use controller::{channel_stream, SessionHandle, SessionTimings};
pub use machine::{transition, Effect, SessionEvent, SessionState, Transition};
pub use views::{format_elapsed, Button, Intent, StepView};
