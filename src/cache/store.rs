//! The synchronized last-value store.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_time::{Duration, Instant};
use heapless::{LinearMap, String};

use super::payload::{Fields, Value, decode};
use super::policy::{FALLBACK_KEY, Update, plan};
use crate::runtime::MAX_TOPIC_LEN;

/// Why a message could not be stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StoreError {
    /// The fallback key is longer than the key capacity.
    KeyTooLong,
    /// The key is new and every entry slot is taken.
    Full,
}

/// What a message did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Applied {
    /// JSON members merged; `skipped` members did not fit.
    Merged { stored: usize, skipped: usize },
    /// Text written under the fallback key.
    Fallback { truncated: bool, lossy: bool },
}

/// Collects as much of `chars` as fits; the flag reports a cut.
fn collect_truncated<const N: usize>(chars: impl Iterator<Item = char>) -> (String<N>, bool) {
    let mut out = String::new();
    for c in chars {
        if out.push(c).is_err() {
            return (out, true);
        }
    }
    (out, false)
}

/// A message decoded into store values, ready to be written.
#[derive(Debug, Clone, PartialEq)]
enum Prepared<const ENTRIES: usize, const KEY_LEN: usize, const VALUE_LEN: usize> {
    Merge(Fields<ENTRIES, KEY_LEN, VALUE_LEN>),
    Fallback {
        text: String<VALUE_LEN>,
        truncated: bool,
        lossy: bool,
    },
}

impl<const ENTRIES: usize, const KEY_LEN: usize, const VALUE_LEN: usize>
    Prepared<ENTRIES, KEY_LEN, VALUE_LEN>
{
    fn new(payload: &[u8]) -> Self {
        match plan(decode(payload)) {
            Update::Merge(fields) => Prepared::Merge(fields),
            Update::Fallback(text) => {
                let (value, truncated) = collect_truncated(text.chars());
                if truncated {
                    warn!("Fallback text truncated to {} bytes", VALUE_LEN);
                }
                Prepared::Fallback {
                    text: value,
                    truncated,
                    lossy: text.is_lossy(),
                }
            }
        }
    }
}

/// The cache contents plus metadata about the latest message.
#[derive(Debug, Clone)]
pub struct Snapshot<const ENTRIES: usize, const KEY_LEN: usize, const VALUE_LEN: usize> {
    entries: LinearMap<String<KEY_LEN>, Value<VALUE_LEN>, ENTRIES>,
    last_topic: Option<String<MAX_TOPIC_LEN>>,
    updates: u32,
    updated_at: Option<Instant>,
}

impl<const ENTRIES: usize, const KEY_LEN: usize, const VALUE_LEN: usize>
    Snapshot<ENTRIES, KEY_LEN, VALUE_LEN>
{
    pub const fn new() -> Self {
        Self {
            entries: LinearMap::new(),
            last_topic: None,
            updates: 0,
            updated_at: None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value<VALUE_LEN>> {
        self.entries.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value<VALUE_LEN>)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Topic of the latest applied message.
    pub fn last_topic(&self) -> Option<&str> {
        self.last_topic.as_deref()
    }

    /// Number of messages applied since creation or the last `clear`.
    pub fn updates(&self) -> u32 {
        self.updates
    }

    pub fn updated_at(&self) -> Option<Instant> {
        self.updated_at
    }

    /// Decodes `payload` and applies it according to the update policy.
    pub fn apply(&mut self, topic: &str, payload: &[u8], now: Instant) -> Result<Applied, StoreError> {
        self.commit(topic, Prepared::new(payload), now)
    }

    fn commit(
        &mut self,
        topic: &str,
        prepared: Prepared<ENTRIES, KEY_LEN, VALUE_LEN>,
        now: Instant,
    ) -> Result<Applied, StoreError> {
        let applied = match prepared {
            Prepared::Merge(fields) => {
                let mut stored = 0;
                let mut skipped = fields.skipped();
                for (key, value) in fields {
                    match self.entries.insert(key, value) {
                        Ok(_) => stored += 1,
                        Err((_key, _)) => {
                            warn!("Field {} not stored, {} keys max", _key.as_str(), ENTRIES);
                            skipped += 1;
                        }
                    }
                }
                Applied::Merged { stored, skipped }
            }
            Prepared::Fallback {
                text,
                truncated,
                lossy,
            } => {
                let key = String::try_from(FALLBACK_KEY).map_err(|_| StoreError::KeyTooLong)?;
                self.entries
                    .insert(key, Value::Text(text))
                    .map_err(|_| StoreError::Full)?;
                Applied::Fallback { truncated, lossy }
            }
        };

        self.last_topic = Some(collect_truncated(topic.chars()).0);
        self.updates = self.updates.wrapping_add(1);
        self.updated_at = Some(now);
        Ok(applied)
    }

    pub fn clear(&mut self) {
        *self = Self::new();
    }
}

impl<const ENTRIES: usize, const KEY_LEN: usize, const VALUE_LEN: usize> Default
    for Snapshot<ENTRIES, KEY_LEN, VALUE_LEN>
{
    fn default() -> Self {
        Self::new()
    }
}

/// A last-value cache shared between the MQTT task and its readers.
///
/// Payloads are decoded before the critical-section mutex is taken; the lock
/// is held only to write the decoded entries or to run one read closure, so
/// the store can live in a `static`:
///
/// ```ignore
/// static STORE: LastValueStore<16, 32, 64> = LastValueStore::new();
///
/// let temp = STORE.get("temp").and_then(|v| v.as_f64());
/// ```
///
/// # Type Parameters
///
/// - `ENTRIES`: Maximum number of keys
/// - `KEY_LEN`: Maximum key length in bytes
/// - `VALUE_LEN`: Maximum text length of a value in bytes
pub struct LastValueStore<const ENTRIES: usize, const KEY_LEN: usize, const VALUE_LEN: usize> {
    inner: Mutex<CriticalSectionRawMutex, RefCell<Snapshot<ENTRIES, KEY_LEN, VALUE_LEN>>>,
}

impl<const ENTRIES: usize, const KEY_LEN: usize, const VALUE_LEN: usize>
    LastValueStore<ENTRIES, KEY_LEN, VALUE_LEN>
{
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(RefCell::new(Snapshot::new())),
        }
    }

    /// Applies one message, timestamped now.
    pub fn apply(&self, topic: &str, payload: &[u8]) -> Result<Applied, StoreError> {
        let prepared = Prepared::new(payload);
        let now = Instant::now();
        self.inner
            .lock(|cell| cell.borrow_mut().commit(topic, prepared, now))
    }

    /// Runs `f` with the store locked.
    ///
    /// Keep `f` short: it holds a critical section.
    pub fn read<R>(&self, f: impl FnOnce(&Snapshot<ENTRIES, KEY_LEN, VALUE_LEN>) -> R) -> R {
        self.inner.lock(|cell| f(&cell.borrow()))
    }

    pub fn get(&self, key: &str) -> Option<Value<VALUE_LEN>> {
        self.read(|snapshot| snapshot.get(key).cloned())
    }

    /// An owned copy of the current contents.
    pub fn snapshot(&self) -> Snapshot<ENTRIES, KEY_LEN, VALUE_LEN> {
        self.read(Clone::clone)
    }

    pub fn len(&self) -> usize {
        self.read(|snapshot| snapshot.len())
    }

    pub fn is_empty(&self) -> bool {
        self.read(|snapshot| snapshot.is_empty())
    }

    pub fn last_topic(&self) -> Option<String<MAX_TOPIC_LEN>> {
        self.read(|snapshot| snapshot.last_topic.clone())
    }

    pub fn updates(&self) -> u32 {
        self.read(|snapshot| snapshot.updates)
    }

    pub fn updated_at(&self) -> Option<Instant> {
        self.read(|snapshot| snapshot.updated_at)
    }

    /// Time since the latest applied message.
    pub fn age(&self) -> Option<Duration> {
        self.updated_at().map(|at| at.elapsed())
    }

    /// `true` if nothing was applied within `max_age`, or ever.
    pub fn is_stale(&self, max_age: Duration) -> bool {
        self.age().is_none_or(|age| age > max_age)
    }

    pub fn clear(&self) {
        self.inner.lock(|cell| cell.borrow_mut().clear());
    }
}

impl<const ENTRIES: usize, const KEY_LEN: usize, const VALUE_LEN: usize> Default
    for LastValueStore<ENTRIES, KEY_LEN, VALUE_LEN>
{
    fn default() -> Self {
        Self::new()
    }
}
