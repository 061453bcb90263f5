//! Cache entries and write options
//!
//! Tiers store [`RawEntry`] values: the caller's payload converted to a
//! `serde_json::Value` (or, when compressed, a codec-encoded string of its JSON
//! text). The same envelope is persisted verbatim in the remote tier.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::{
    collections::BTreeSet,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use crate::{CacheError, Codec};

/// Milliseconds since the Unix epoch
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn duration_millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// A cached value together with its lifetime metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub data: T,
    /// Write time, milliseconds since the Unix epoch
    pub timestamp: u64,
    /// Lifetime in milliseconds
    pub ttl: u64,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub compressed: bool,
}

/// Payload-agnostic entry as held by the tiers
pub type RawEntry = CacheEntry<Value>;

impl<T> CacheEntry<T> {
    /// An entry is live while `now - timestamp <= ttl`.
    pub fn is_live_at(&self, now: u64) -> bool {
        now.saturating_sub(self.timestamp) <= self.ttl
    }

    pub fn is_live(&self) -> bool {
        self.is_live_at(now_millis())
    }

    pub fn age(&self) -> Duration {
        Duration::from_millis(now_millis().saturating_sub(self.timestamp))
    }

    pub fn lifetime(&self) -> Duration {
        Duration::from_millis(self.ttl)
    }

    /// Time left before the entry stops being live
    pub fn remaining(&self) -> Duration {
        self.lifetime().saturating_sub(self.age())
    }

    pub fn has_any_tag(&self, tags: &[String]) -> bool {
        tags.iter().any(|t| self.tags.contains(t))
    }
}

impl RawEntry {
    /// Convert a payload into a raw entry stamped with the current time.
    pub fn seal<T: Serialize + ?Sized>(
        data: &T,
        ttl: Duration,
        tags: BTreeSet<String>,
        compress: bool,
        codec: &dyn Codec,
    ) -> Result<Self, CacheError> {
        let value = serde_json::to_value(data)?;
        let data = if compress {
            Value::String(codec.encode(&serde_json::to_string(&value)?))
        } else {
            value
        };

        Ok(Self {
            data,
            timestamp: now_millis(),
            ttl: duration_millis(ttl),
            tags,
            compressed: compress,
        })
    }

    /// Decode the payload back into the caller's type.
    pub fn open<T: DeserializeOwned>(&self, codec: &dyn Codec) -> Result<CacheEntry<T>, CacheError> {
        let data = if self.compressed {
            let Value::String(encoded) = &self.data else {
                return Err(CacheError::Codec(
                    "compressed payload is not a string".to_owned(),
                ));
            };
            serde_json::from_str(&codec.decode(encoded)?)?
        } else {
            T::deserialize(&self.data)?
        };

        Ok(CacheEntry {
            data,
            timestamp: self.timestamp,
            ttl: self.ttl,
            tags: self.tags.clone(),
            compressed: self.compressed,
        })
    }

    /// Same payload and tags, restamped now with a new lifetime.
    pub fn renewed(&self, ttl: Duration) -> Self {
        Self {
            data: self.data.clone(),
            timestamp: now_millis(),
            ttl: duration_millis(ttl),
            tags: self.tags.clone(),
            compressed: self.compressed,
        }
    }
}

/// Options accepted by `set`
#[derive(Debug, Clone, Default)]
pub struct SetOptions {
    /// Entry lifetime; the manager's default TTL when `None`
    pub ttl: Option<Duration>,
    pub tags: Vec<String>,
    /// Route the payload through the configured [`Codec`]
    pub compress: bool,
}

impl SetOptions {
    pub fn ttl(ttl: Duration) -> Self {
        Self {
            ttl: Some(ttl),
            ..Self::default()
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn compressed(mut self) -> Self {
        self.compress = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Base64Codec;

    #[test]
    fn test_liveness_boundary() {
        let entry = CacheEntry {
            data: 1,
            timestamp: 1_000,
            ttl: 500,
            tags: BTreeSet::new(),
            compressed: false,
        };
        assert!(entry.is_live_at(1_000));
        assert!(entry.is_live_at(1_500));
        assert!(!entry.is_live_at(1_501));
        // Timestamps from a clock running ahead count as age zero
        assert!(entry.is_live_at(900));
    }

    #[test]
    fn test_compressed_payload_is_encoded() {
        let entry = RawEntry::seal(
            &vec!["a", "b"],
            Duration::from_secs(10),
            BTreeSet::new(),
            true,
            &Base64Codec,
        )
        .unwrap();
        assert!(entry.compressed);
        assert!(entry.data.is_string());

        let opened: CacheEntry<Vec<String>> = entry.open(&Base64Codec).unwrap();
        assert_eq!(opened.data, vec!["a".to_owned(), "b".to_owned()]);
    }

    #[test]
    fn test_open_with_wrong_type_fails() {
        let entry = RawEntry::seal(
            &"text",
            Duration::from_secs(10),
            BTreeSet::new(),
            false,
            &Base64Codec,
        )
        .unwrap();
        let err = entry.open::<u32>(&Base64Codec).unwrap_err();
        assert!(matches!(err, CacheError::Serialization(_)));
    }

    #[test]
    fn test_envelope_field_names() {
        let entry = RawEntry::seal(
            &42,
            Duration::from_secs(2),
            BTreeSet::from(["x".to_owned()]),
            false,
            &Base64Codec,
        )
        .unwrap();
        let json: Value = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["data"], 42);
        assert_eq!(json["ttl"], 2000);
        assert_eq!(json["tags"], serde_json::json!(["x"]));
        assert_eq!(json["compressed"], false);
        assert!(json["timestamp"].as_u64().is_some());
    }

    #[test]
    fn test_set_options_builder() {
        let opts = SetOptions::ttl(Duration::from_secs(5))
            .with_tags(["a", "b"])
            .compressed();
        assert_eq!(opts.ttl, Some(Duration::from_secs(5)));
        assert_eq!(opts.tags, vec!["a".to_owned(), "b".to_owned()]);
        assert!(opts.compress);
    }
}
