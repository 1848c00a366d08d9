//! # flightrpc-server
//!
//! UDP server for flightrpc.
//!
//! This crate provides:
//! - A UDP listener that handles each datagram in its own task
//! - Reassembly of multi-packet requests with timeout eviction
//! - A duplicate filter for at-most-once semantics, with optional reply replay
//! - A router mapping request type tags to typed async handlers
//! - A subscription registry with bounded callback fan-out
//! - Layered configuration (defaults, YAML file, environment)

pub mod callback;
pub mod config;
pub mod dedup;
pub mod dispatch;
pub mod error;
pub mod listener;
pub mod reassembly;
pub mod router;
pub mod server;

pub use callback::{
    CallbackSender, SubscriptionRegistry, UdpCallbackSender, MAX_SUBSCRIPTION_DURATION,
};
pub use config::{
    CallbackConfig, Config, ConfigError, DedupConfig, InvocationSemantics, NetworkConfig,
    ReassemblyConfig,
};
pub use dedup::{Admission, DuplicateFilter};
pub use dispatch::Dispatcher;
pub use error::{CallbackError, DispatchError, ReassemblyError, ServerError};
pub use listener::{DatagramHandler, UdpListener};
pub use reassembly::{AssembledRequest, RequestBuffer};
pub use router::{RequestContext, Router};
pub use server::{Server, ServerConfig, ServerStats};
