//! # flightrpc-client
//!
//! Async UDP client for flightrpc.
//!
//! Requests are framed into packets, resent under the same request ID until a
//! complete reply arrives, and callbacks pushed by the server are queued for
//! [`Client::next_callback`].

pub mod client;
pub mod error;

pub use client::{Callback, Client, ClientConfig, MAX_QUEUED_CALLBACKS};
pub use error::ClientError;
