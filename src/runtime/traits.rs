//! MQTT Module trait.
//!
//! This module defines the object-safe `MqttModule` trait, the callback
//! registration point of the runtime: modules declare their topics, learn the
//! result of every connection handshake and receive every incoming publish.
//!
//! # Object Safety
//!
//! The `MqttModule` trait is designed to be dyn-compatible, meaning you can use
//! `&mut dyn MqttModule` as a trait object. This is essential for `no_std`
//! embedded environments where you want to:
//!
//! - Store modules in `StaticCell` and pass them to Embassy tasks
//! - Avoid generic type parameters on task functions
//! - Decouple runtime infrastructure from module-specific logic

use crate::error::ConnectReasonCode;
use crate::packet::Publish;

/// Object-safe trait for collecting topics during registration.
///
/// The runtime provides this to modules during `register()`. Modules
/// call `add()` for each topic they want to subscribe to.
pub trait TopicCollector {
    /// Add a topic to subscribe to.
    ///
    /// The topic string is copied internally, so it only needs to live
    /// for the duration of this call.
    ///
    /// Returns `true` if the topic was accepted.
    fn add(&mut self, topic: &str) -> bool;
}

/// Object-safe trait for MQTT modules that react to connection results and
/// incoming messages.
///
/// # Example
///
/// ```ignore
/// const CMD_TOPIC: &str = "device/cmd";
///
/// struct MyModule {
///     last_command: Option<u8>,
/// }
///
/// impl MqttModule for MyModule {
///     fn register(&self, collector: &mut dyn TopicCollector) {
///         collector.add(CMD_TOPIC);
///     }
///
///     fn on_message(&mut self, msg: &Publish<'_>) {
///         if msg.topic == CMD_TOPIC {
///             self.last_command = msg.payload.first().copied();
///         }
///     }
/// }
/// ```
pub trait MqttModule {
    /// Register topics that this module wants to subscribe to.
    ///
    /// Called after every accepted connection handshake, right before the
    /// runtime issues the SUBSCRIBE requests.
    fn register(&self, collector: &mut dyn TopicCollector);

    /// Handle an incoming MQTT message (synchronous processing only).
    ///
    /// Called for every incoming publish, on the task driving the runtime.
    /// Blocking here stalls delivery of every later message on the connection.
    fn on_message(&mut self, msg: &Publish<'_>);

    /// Called with the result of every connection handshake, accepted or not.
    ///
    /// The default implementation does nothing.
    fn on_connect(&mut self, _code: ConnectReasonCode) {}
}

/// Blanket implementation for mutable references to trait objects.
///
/// This allows using `&mut dyn MqttModule` wherever `MqttModule` is expected.
impl<M: MqttModule + ?Sized> MqttModule for &mut M {
    fn register(&self, collector: &mut dyn TopicCollector) {
        (**self).register(collector)
    }

    fn on_message(&mut self, msg: &Publish<'_>) {
        (**self).on_message(msg)
    }

    fn on_connect(&mut self, code: ConnectReasonCode) {
        (**self).on_connect(code)
    }
}
