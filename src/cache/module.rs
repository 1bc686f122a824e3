//! Runtime module feeding a [`LastValueStore`].

use crate::error::ConnectReasonCode;
use crate::runtime::{MqttModule, Publish, TopicCollector};

use super::DEFAULT_TOPIC;
use super::store::{Applied, LastValueStore};

/// Subscribes to one topic and applies every message on it to a store.
///
/// Messages on other topics are ignored. Store errors are logged and never
/// end the session.
///
/// # Example
///
/// ```ignore
/// static STORE: LastValueStore<16, 32, 64> = LastValueStore::new();
/// static SHUTDOWN: ShutdownSignal = ShutdownSignal::new();
///
/// let module = LastValueModule::with_default_topic(&STORE);
/// let mut runtime = MqttRuntime::<_, 1, 1024>::new(default_options("esp32-cache"), module, &SHUTDOWN);
/// runtime.run(transport).await?;
/// ```
pub struct LastValueModule<'s, const ENTRIES: usize, const KEY_LEN: usize, const VALUE_LEN: usize> {
    store: &'s LastValueStore<ENTRIES, KEY_LEN, VALUE_LEN>,
    topic: &'s str,
}

impl<'s, const ENTRIES: usize, const KEY_LEN: usize, const VALUE_LEN: usize>
    LastValueModule<'s, ENTRIES, KEY_LEN, VALUE_LEN>
{
    pub fn new(store: &'s LastValueStore<ENTRIES, KEY_LEN, VALUE_LEN>, topic: &'s str) -> Self {
        Self { store, topic }
    }

    /// Module for [`DEFAULT_TOPIC`].
    pub fn with_default_topic(store: &'s LastValueStore<ENTRIES, KEY_LEN, VALUE_LEN>) -> Self {
        Self::new(store, DEFAULT_TOPIC)
    }

    pub fn topic(&self) -> &'s str {
        self.topic
    }

    pub fn store(&self) -> &'s LastValueStore<ENTRIES, KEY_LEN, VALUE_LEN> {
        self.store
    }
}

impl<const ENTRIES: usize, const KEY_LEN: usize, const VALUE_LEN: usize> MqttModule
    for LastValueModule<'_, ENTRIES, KEY_LEN, VALUE_LEN>
{
    fn register(&self, collector: &mut dyn TopicCollector) {
        collector.add(self.topic);
    }

    fn on_connect(&mut self, code: ConnectReasonCode) {
        if code.is_success() {
            debug!("Cache ready for {}", self.topic);
        }
    }

    fn on_message(&mut self, msg: &Publish<'_>) {
        if msg.topic != self.topic {
            trace!("Ignoring message on {}", msg.topic);
            return;
        }

        match self.store.apply(msg.topic, msg.payload) {
            Ok(Applied::Merged { stored, skipped }) => {
                debug!("Merged {} fields, skipped {}", stored, skipped);
            }
            Ok(Applied::Fallback { lossy: true, .. }) => {
                warn!("Payload on {} is not valid UTF-8", msg.topic);
            }
            Ok(Applied::Fallback { .. }) => {
                info!("Payload on {} is not a JSON object, stored as text", msg.topic);
            }
            Err(_e) => {
                error!("Failed to store message on {}: {:?}", msg.topic, _e);
            }
        }
    }
}
