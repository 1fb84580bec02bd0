//! Protocol Module - Upstream Game Server Connection
//!
//! This module handles:
//! 1. The tagged wire-message boundary (all raw parsing lives in `messages`)
//! 2. The per-connection lifecycle: handshake, heartbeat, bet framing
//! 3. Reconnection with exponential backoff wrapped around the client

pub mod client;
pub mod messages;
pub mod reconnect;

pub use client::{
    ClientCommand, ClientHandle, ConnectionExit, ProtocolClient, ProtocolEvent, SubmitError,
};
pub use messages::{ClientMessage, FrameError, ServerMessage};
pub use reconnect::{run_connection_supervisor, BackoffPolicy, ReconnectConfig, SupervisorEnd};
