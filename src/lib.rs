//! interchatd - InterChat relay daemon.
//!
//! A cross-server chat relay: messages posted in a connected channel are
//! fan-out broadcast to every sibling channel in the same hub, and two
//! channels can be paired into an ephemeral 1:1 call through a matchmaker.
//!
//! The binary wires a chat-platform gateway into [`runtime::Runtime`]; the
//! library surface exists so gateway adapters and the integration suite can
//! drive the same components in-process.

pub mod admission;
pub mod broadcast;
pub mod cache;
pub mod calls;
pub mod config;
pub mod db;
pub mod error;
pub mod http;
pub mod hub_service;
pub mod interactions;
pub mod kv;
pub mod metrics;
pub mod moderation;
pub mod processor;
pub mod rules;
pub mod stats;
pub mod store;
pub mod transport;
pub mod webhooks;

mod runtime;

pub use runtime::{Runtime, RuntimeParams};
