// Copyright (c) 2025 Meshkit Contributors. Licensed under Apache License, Version 2.0.

//! Client connections to local services, layered on scheduler tasks.
//!
//! A [`ServiceClient`] owns an outbound queue of framed messages, pumps it
//! whenever the link is writable, reassembles inbound frames through a
//! [`FrameTokenizer`], and redials with doubling backoff whenever the
//! transport fails.

pub mod config;
pub mod connection;
pub mod frame;

#[cfg(test)]
mod tests;

pub use config::ClientConfig;
pub use connection::{
    AssemblerFn, ClientError, CompletionFn, MessageHandler, ResponseFn, ServiceClient,
    TransmitStatus, TransmitTicket,
};
pub use frame::{FRAME_HEADER_LEN, Frame, FrameError, FrameTokenizer, MAX_FRAME_LEN, MessageBuf};
