//! The dispatch core.
//!
//! - [`unit`]: the addressable node, its wiring table and event surfaces
//! - [`dispatch`]: expansion of unit output into deliveries, and the clone policy
//! - [`lifecycle`]: the close protocol with sync and async handlers
//! - [`diagnostics`] / [`status`]: log records and status publication
//! - [`directory`]: id → unit lookup, plus an in-memory registry
//! - [`message`]: messages with object identity
//! - [`config`] / [`error`]: unit definitions and the crate error type

pub mod config;
pub mod diagnostics;
pub mod directory;
pub mod dispatch;
pub mod error;
pub mod lifecycle;
pub mod message;
pub mod status;
pub mod unit;
