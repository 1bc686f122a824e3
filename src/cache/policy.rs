//! Store update policy.
//!
//! Maps each [`Decoded`] payload class to exactly one store action:
//!
//! | Payload                      | Action                                        |
//! |------------------------------|-----------------------------------------------|
//! | JSON object                  | merge every member, keep unrelated keys       |
//! | other UTF-8 text             | write the text under [`FALLBACK_KEY`]         |
//! | invalid UTF-8                | write the lossy text under [`FALLBACK_KEY`]   |

use super::payload::{Decoded, Fields};

/// Key holding payloads that are not JSON objects.
pub const FALLBACK_KEY: &str = "value";

/// The store action chosen for one message.
#[derive(Debug, Clone, PartialEq)]
pub enum Update<'a, const ENTRIES: usize, const KEY_LEN: usize, const VALUE_LEN: usize> {
    Merge(Fields<ENTRIES, KEY_LEN, VALUE_LEN>),
    Fallback(FallbackText<'a>),
}

/// Text destined for [`FALLBACK_KEY`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackText<'a> {
    Text(&'a str),
    /// Invalid UTF-8; each invalid sequence reads as U+FFFD.
    Lossy(&'a [u8]),
}

impl<'a> FallbackText<'a> {
    pub fn is_lossy(&self) -> bool {
        matches!(self, FallbackText::Lossy(_))
    }

    pub fn chars(self) -> impl Iterator<Item = char> + 'a {
        let (text, bytes) = match self {
            FallbackText::Text(text) => (Some(text), None),
            FallbackText::Lossy(bytes) => (None, Some(bytes)),
        };
        let lossy = bytes.into_iter().flat_map(|b| {
            b.utf8_chunks().flat_map(|chunk| {
                let replacement = (!chunk.invalid().is_empty()).then_some(char::REPLACEMENT_CHARACTER);
                chunk.valid().chars().chain(replacement)
            })
        });
        text.into_iter().flat_map(str::chars).chain(lossy)
    }
}

pub fn plan<const ENTRIES: usize, const KEY_LEN: usize, const VALUE_LEN: usize>(
    decoded: Decoded<'_, ENTRIES, KEY_LEN, VALUE_LEN>,
) -> Update<'_, ENTRIES, KEY_LEN, VALUE_LEN> {
    match decoded {
        Decoded::Structured(fields) => Update::Merge(fields),
        Decoded::Raw(text) => Update::Fallback(FallbackText::Text(text)),
        Decoded::Undecodable(bytes) => Update::Fallback(FallbackText::Lossy(bytes)),
    }
}
