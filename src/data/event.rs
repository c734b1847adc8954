//! Event bucket: a short tag string plus its stable hash.
//!
//! Mirrors `eventdata.hpp`: equality is hash equality, not string
//! comparison, so two events with the same tag compare equal without
//! re-hashing on every comparison.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::constants::EVENT_STRING_LENGTH;

/// A bounded-length tag string plus its stable hash.
#[derive(Debug, Clone)]
pub struct EventData {
    tag: String,
    hash: u64,
}

impl EventData {
    /// Build an event, truncating `tag` to `EVENT_STRING_LENGTH` bytes if
    /// needed and computing its stable hash once at construction.
    pub fn new(tag: impl Into<String>) -> Self {
        let mut tag = tag.into();
        if tag.len() > EVENT_STRING_LENGTH {
            tag.truncate(EVENT_STRING_LENGTH);
        }
        let mut hasher = DefaultHasher::new();
        tag.hash(&mut hasher);
        let hash = hasher.finish();
        Self { tag, hash }
    }

    /// The event tag string.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// The event's stable hash.
    pub fn hash(&self) -> u64 {
        self.hash
    }
}

impl PartialEq for EventData {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

impl Eq for EventData {}

impl Default for EventData {
    fn default() -> Self {
        Self::new("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_tag_is_equal_via_hash() {
        let a = EventData::new("spike");
        let b = EventData::new("spike");
        assert_eq!(a, b);
        assert_eq!(a.hash(), b.hash());
    }

    #[test]
    fn different_tags_are_unequal() {
        let a = EventData::new("spike");
        let b = EventData::new("spikes");
        assert_ne!(a, b);
    }

    #[test]
    fn tag_is_truncated_to_bound() {
        let long = "x".repeat(EVENT_STRING_LENGTH + 50);
        let event = EventData::new(long);
        assert_eq!(event.tag().len(), EVENT_STRING_LENGTH);
    }
}
