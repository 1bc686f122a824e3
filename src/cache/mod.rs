//! Last-value cache
//!
//! Keeps the most recent value of every field published on one topic.
//!
//! # Overview
//!
//! - [`payload`] classifies each payload as a JSON object, plain text or
//!   undecodable bytes
//! - [`policy`] turns that class into one store action
//! - [`LastValueStore`] holds the values behind a critical-section mutex
//! - [`LastValueModule`] plugs the store into an [`MqttRuntime`](crate::runtime::MqttRuntime)
//!
//! JSON object members are merged into the store, keeping keys the message
//! does not mention. Any other payload replaces the text under
//! [`FALLBACK_KEY`] and leaves every other key alone.

pub mod payload;
pub mod policy;

mod module;
mod store;

pub use crate::client::DEFAULT_KEEP_ALIVE_SECS;
pub use module::LastValueModule;
pub use payload::Value;
pub use policy::FALLBACK_KEY;
pub use store::{Applied, LastValueStore, Snapshot, StoreError};

use crate::client::MqttOptions;

/// Public test broker.
pub const DEFAULT_BROKER_HOST: &str = "test.mosquitto.org";
pub const DEFAULT_BROKER_PORT: u16 = 1883;
pub const DEFAULT_TOPIC: &str = "emqx/esp32";

/// Options for [`DEFAULT_BROKER_HOST`]:[`DEFAULT_BROKER_PORT`] with a
/// [`DEFAULT_KEEP_ALIVE_SECS`] keep-alive.
pub fn default_options(client_id: &str) -> MqttOptions<'_> {
    MqttOptions::new(client_id, DEFAULT_BROKER_HOST, DEFAULT_BROKER_PORT)
        .with_keep_alive(DEFAULT_KEEP_ALIVE_SECS)
}
