//! Topic registration for MQTT modules.

use heapless::{String, Vec};

use super::traits::TopicCollector;

/// Maximum length for a single topic string.
pub const MAX_TOPIC_LEN: usize = 128;

/// Why a topic was not added to a [`TopicRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RegistryError {
    Empty,
    TooLong,
    /// Topic filters with `+` or `#` are not supported.
    Wildcard,
    Duplicate,
    Full,
}

/// The exact-match topics a module subscribes to.
///
/// The registry owns copies of the topic strings, so modules can register
/// topics that live only as long as the `register` call.
#[derive(Default)]
pub struct TopicRegistry<const MAX_TOPICS: usize> {
    topics: Vec<String<MAX_TOPIC_LEN>, MAX_TOPICS>,
}

impl<const MAX_TOPICS: usize> TopicRegistry<MAX_TOPICS> {
    /// Create a new empty topic registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies `topic` into the registry.
    pub fn add_topic(&mut self, topic: &str) -> Result<(), RegistryError> {
        if topic.is_empty() {
            return Err(RegistryError::Empty);
        }
        if topic.contains(['+', '#']) {
            return Err(RegistryError::Wildcard);
        }
        if self.iter().any(|t| t == topic) {
            return Err(RegistryError::Duplicate);
        }

        let mut owned = String::new();
        owned.push_str(topic).map_err(|_| RegistryError::TooLong)?;
        self.topics.push(owned).map_err(|_| RegistryError::Full)
    }

    /// Get an iterator over the registered topics.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.topics.iter().map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }

    pub fn clear(&mut self) {
        self.topics.clear();
    }
}

impl<const MAX_TOPICS: usize> TopicCollector for TopicRegistry<MAX_TOPICS> {
    fn add(&mut self, topic: &str) -> bool {
        match self.add_topic(topic) {
            Ok(()) => true,
            Err(_e) => {
                warn!("Topic {} not registered: {:?}", topic, _e);
                false
            }
        }
    }
}
