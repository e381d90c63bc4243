//! IPC bridge between the build cache (parent) and a persistent worker.
//!
//! # Architecture
//!
//! - **protocol**: Message envelope and payload types
//! - **codec**: Newline-delimited JSON framing for AsyncRead/AsyncWrite
//! - **channel**: The send/receive contract the orchestrator is driven through

pub mod channel;
pub mod codec;
pub mod protocol;
