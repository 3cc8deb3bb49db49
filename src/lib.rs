//! # Flowwire
//!
//! The message-dispatch core of a flow-graph engine: addressable units wired
//! into a directed graph, routing of their output with identity-aware cloning,
//! and a graceful, possibly asynchronous, shutdown protocol.
//!
//! ## Features
//!
//! - **Compact output**: send nothing, one message, or one entry per port (each a message or a batch)
//! - **Safe fan-out**: one recipient gets the original message, everyone else an isolated copy
//! - **Shared handles**: reserved fields (`req`/`res` by default) are shared by every copy, never duplicated
//! - **Uniform shutdown**: sync and async close handlers behind a single `close` call
//!
//! ## Quick Start
//!
//! ```rust
//! use flowwire::prelude::*;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let registry = Arc::new(UnitRegistry::new());
//! let source = registry
//!     .register(Unit::new(UnitConfig::new("n1", "inject").with_port(["n2"])))
//!     .unwrap();
//! let sink = registry.register(Unit::new(UnitConfig::new("n2", "debug"))).unwrap();
//! sink.on_input(|msg| println!("got {}", msg.to_json()));
//!
//! let dispatcher = Dispatcher::new(registry.clone());
//! let delivered = source.send(&dispatcher, Message::from_json(json!({"payload": "hello"})));
//! assert_eq!(delivered, 1);
//! ```
//!
//! ## Module Organization
//!
//! - [`prelude`]: Commonly used types and traits (import with `use flowwire::prelude::*`)
//! - [`diagnostics`]: log levels, records and a `log`-facade sink
//! - [`status`]: the status bus contract and an in-memory bus

// ============================================================================
// Core Module
// ============================================================================

mod core;

// ============================================================================
// Public Re-exports - Granular Imports
// ============================================================================

// Units and wiring
pub use crate::core::config::UnitConfig;
pub use crate::core::unit::Unit;

// Messages
pub use crate::core::message::{Field, Handle, Message, NodeValue};

// Dispatch
pub use crate::core::dispatch::{
    ClonePolicy, CloneMode, DEFAULT_RESERVED_KEYS, Dispatcher, Output, PortOutput,
};

// Directory
pub use crate::core::directory::{FlowDirectory, UnitRegistry};

// Lifecycle
pub use crate::core::lifecycle::{CloseReason, Closing, Done, ShutdownHandler};

// Errors
pub use crate::core::error::{FlowError, Result};

/// Diagnostics emitted by units.
pub mod diagnostics {
    pub use crate::core::diagnostics::{LogLevel, LogRecord, forward_to_log};
}

/// Status publication.
pub mod status {
    pub use crate::core::status::{
        MemoryBus, Publication, STATUS_TOPIC_PREFIX, Status, StatusBus, status_topic,
    };
}

// ============================================================================
// Prelude Module - Convenient Bulk Imports
// ============================================================================

/// The main prelude: everything needed to wire units and move messages.
///
/// # Example
/// ```rust
/// use flowwire::prelude::*;
/// ```
pub mod prelude {
    pub use super::diagnostics::{LogLevel, LogRecord};
    pub use super::status::{MemoryBus, Status, StatusBus};
    pub use super::{
        ClonePolicy, CloneMode, CloseReason, Closing, Dispatcher, Done, FlowDirectory, FlowError,
        Handle, Message, NodeValue, Output, PortOutput, ShutdownHandler, Unit, UnitConfig,
        UnitRegistry,
    };
}

// ============================================================================
// Re-export commonly used external types for convenience
// ============================================================================

pub use serde_json::Value as JsonValue;

// ============================================================================
// Library Metadata
// ============================================================================

/// The version of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The name of this crate.
pub const NAME: &str = env!("CARGO_PKG_NAME");
