//! # MQTT Last-Value Cache for Embedded Systems
//!
//! `myrtio-mqtt-cache` subscribes to one MQTT topic and keeps the most recent
//! value of every field published on it. It is `no_std` and `no_alloc`, built
//! upon the [Embassy](https://embassy.dev/) async ecosystem.
//!
//! ## Core Features
//!
//! - **`no_std` & `no_alloc`:** Store, codec and buffers are fixed-capacity, managed with `heapless`.
//! - **Tolerant decoding:** JSON object payloads are merged field by field; anything else,
//!   including invalid UTF-8, lands under a single fallback key without touching other fields.
//! - **Shared store:** [`LastValueStore`] can live in a `static` and be read from any task
//!   while the MQTT task writes to it.
//! - **Transport Agnostic:** The `MqttTransport` trait runs the client over any reliable,
//!   ordered byte stream. A TCP implementation over `embassy-net` is included.
//! - **MQTT v3.1.1:** CONNECT, SUBSCRIBE, keep-alive pings, QoS 0 and 1 reception, DISCONNECT.
//!
//! ## Architecture
//!
//! ### 1. Runtime with the cache module
//!
//! ```ignore
//! use myrtio_mqtt_cache::cache::{LastValueModule, LastValueStore, default_options};
//! use myrtio_mqtt_cache::runtime::{MqttRuntime, ShutdownSignal};
//!
//! static STORE: LastValueStore<16, 32, 64> = LastValueStore::new();
//! static SHUTDOWN: ShutdownSignal = ShutdownSignal::new();
//!
//! #[embassy_executor::task]
//! async fn mqtt_task(stack: Stack<'static>) {
//!     let mut rx = [0; 1024];
//!     let mut tx = [0; 1024];
//!     let socket = TcpSocket::new(stack, &mut rx, &mut tx);
//!     let options = default_options("esp32-cache");
//!     let transport = TcpTransport::connect(
//!         stack, socket, options.host(), options.port(), Duration::from_secs(5),
//!     ).await.unwrap();
//!
//!     let module = LastValueModule::with_default_topic(&STORE);
//!     let mut runtime = MqttRuntime::<_, 1, 1024>::new(options, module, &SHUTDOWN);
//!     let _ = runtime.run(transport).await;
//! }
//!
//! // Any other task:
//! let temp = STORE.get("temp").and_then(|v| v.as_f64());
//! ```
//!
//! ### 2. Direct Client Usage
//!
//! ```ignore
//! let mut client = MqttClient::<_, 1, 512>::new(transport, options);
//! client.connect().await?;
//! client.subscribe("emqx/esp32", QoS::AtMostOnce).await?;
//! while let Some(event) = client.poll().await? {
//!     // ...
//! }
//! ```
//!
//! ## Logging
//!
//! Enable one of the `log`, `defmt` or `esp32-log` features to get connection,
//! subscription and decoding diagnostics.

#![cfg_attr(not(test), no_std)]

// This must go first so its macros are visible to every other module.
#[macro_use]
mod fmt;

pub mod cache;
pub mod client;
pub mod error;
pub mod packet;
pub mod runtime;
pub mod transport;
pub mod util;

#[cfg(test)]
mod testing;

// Re-export key types for easier access at the crate root.
pub use cache::{LastValueModule, LastValueStore, Value};
pub use client::{MqttClient, MqttEvent, MqttOptions};
pub use error::MqttError;
pub use packet::QoS;
pub use transport::{MqttTransport, TcpTransport};
