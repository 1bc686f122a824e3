//! MQTT Runtime Module
//!
//! Provides a runtime abstraction for building modular MQTT applications.
//!
//! # Overview
//!
//! The runtime owns the broker session and hands everything else to an
//! [`MqttModule`]:
//! - Topic registration, replayed as SUBSCRIBE requests after every accepted handshake
//! - Connection results, accepted or refused
//! - Incoming message handling
//!
//! Modules never perform async I/O. Their callbacks run synchronously on the
//! task driving [`MqttRuntime::run`], between two reads of the connection.
//!
//! # Shutdown
//!
//! Signal the [`ShutdownSignal`] passed to the runtime to end the session:
//! the runtime sends DISCONNECT and drops the transport before `run` returns.

pub(crate) mod event_loop;
pub(crate) mod registry;
pub(crate) mod traits;

pub use event_loop::{MqttRuntime, ShutdownSignal, Stopped};
pub use registry::{MAX_TOPIC_LEN, RegistryError, TopicRegistry};
pub use traits::{MqttModule, TopicCollector};

// Re-export Publish for convenient use in modules
pub use crate::packet::Publish;
