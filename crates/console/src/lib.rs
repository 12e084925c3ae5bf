//! pvetui console
//!
//! Authenticates against the ticket endpoint, negotiates a console ticket
//! for a guest and bridges the local terminal to the remote console over a
//! WebSocket.

pub mod api;
pub mod auth;
pub mod bridge;
pub mod classify;
pub mod events;
pub mod frame;
pub mod negotiator;
pub mod terminal;

pub use api::ApiEndpoint;
pub use auth::AuthenticationClient;
pub use bridge::{
    BridgeError, BridgeOptions, BridgeState, TerminalBridge, CONNECT_TIMEOUT, DETACH_KEY,
    RESIZE_SETTLE_DELAY,
};
pub use classify::{classify, ClassifiedError, ErrorCategory};
pub use events::{EventStreams, LocalEvents, StdioEvents};
pub use frame::OutboundFrame;
pub use negotiator::ConsoleNegotiator;
pub use terminal::{TerminalControl, TerminalModeManager};
