//! Persisted cache index.
//!
//! The index is a single JSON document mapping each key's hex digest to its
//! metadata:
//!
//! ```json
//! {
//!   "d5eefa915a939c9a1eaafdd3366b2310": {
//!     "dish_name": "Omelette",
//!     "created_at": "2024-05-01T12:00:00.000000",
//!     "size_kb": 84.2,
//!     "recipe_hash": "d41d8cd9"
//!   }
//! }
//! ```
//!
//! It is loaded once when the cache opens and rewritten as a whole after
//! every mutation (temp file + rename, never patched in place).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{NaiveDateTime, TimeDelta};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::key::{CacheKey, recipe_digest};
use crate::Result;

/// File name of the index inside the cache directory.
pub const INDEX_FILE: &str = "index.json";

/// Display-only dish names are cut to this many characters.
const DISH_SNIPPET_CHARS: usize = 100;

/// Metadata for one cached image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    #[serde(rename = "dish_name")]
    pub dish_name_snippet: String,
    #[serde(with = "iso_timestamp")]
    pub created_at: NaiveDateTime,
    #[serde(rename = "size_kb", with = "kilobytes")]
    pub size_bytes: u64,
    #[serde(rename = "recipe_hash")]
    pub recipe_digest: String,
}

impl CacheEntry {
    pub fn new(
        dish_name: &str,
        recipe_text: Option<&str>,
        size_bytes: u64,
        created_at: NaiveDateTime,
    ) -> Self {
        Self {
            dish_name_snippet: dish_name.chars().take(DISH_SNIPPET_CHARS).collect(),
            created_at,
            size_bytes,
            recipe_digest: recipe_digest(recipe_text),
        }
    }

    /// Strictly older than `ttl` at `now`. An entry exactly `ttl` old is
    /// still served.
    pub fn is_expired(&self, now: NaiveDateTime, ttl: TimeDelta) -> bool {
        now - self.created_at > ttl
    }
}

/// In-memory view of `index.json`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheIndex {
    entries: BTreeMap<CacheKey, CacheEntry>,
}

impl CacheIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Path of the index document for a cache directory.
    pub fn path_in(dir: &Path) -> PathBuf {
        dir.join(INDEX_FILE)
    }

    /// Read the index from disk.
    ///
    /// A missing file yields an empty index. An unreadable or corrupt file
    /// also yields an empty index (with a warning): losing cache metadata is
    /// preferable to refusing to start.
    pub async fn load(path: &Path) -> Self {
        match tokio::fs::read(path).await {
            Ok(bytes) => Self::from_json(&bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no cache index yet, starting empty");
                Self::new()
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read cache index, starting empty");
                Self::new()
            }
        }
    }

    /// Parse an index document, skipping entries that do not validate.
    pub fn from_json(bytes: &[u8]) -> Self {
        let raw: serde_json::Map<String, serde_json::Value> = match serde_json::from_slice(bytes) {
            Ok(map) => map,
            Err(e) => {
                warn!(error = %e, "cache index is corrupt, starting empty");
                return Self::new();
            }
        };

        let mut entries = BTreeMap::new();
        for (raw_key, value) in raw {
            let Some(key) = CacheKey::parse(&raw_key) else {
                warn!(key = %raw_key, "skipping cache index entry with invalid key");
                continue;
            };
            match serde_json::from_value::<CacheEntry>(value) {
                Ok(entry) => {
                    entries.insert(key, entry);
                }
                Err(e) => warn!(key = %raw_key, error = %e, "skipping malformed cache index entry"),
            }
        }
        Self { entries }
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        let doc: BTreeMap<&str, &CacheEntry> = self
            .entries
            .iter()
            .map(|(key, entry)| (key.as_str(), entry))
            .collect();
        Ok(serde_json::to_vec_pretty(&doc)?)
    }

    /// Rewrite the whole document atomically.
    pub async fn persist(&self, path: &Path) -> Result<()> {
        let bytes = self.to_json()?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    pub fn get(&self, key: &CacheKey) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Insert or overwrite; returns the previous entry.
    pub fn insert(&mut self, key: CacheKey, entry: CacheEntry) -> Option<CacheEntry> {
        self.entries.insert(key, entry)
    }

    pub fn remove(&mut self, key: &CacheKey) -> Option<CacheEntry> {
        self.entries.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&CacheKey, &CacheEntry)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of recorded blob sizes.
    pub fn total_bytes(&self) -> u64 {
        self.entries.values().map(|e| e.size_bytes).sum()
    }
}

/// `created_at` as a naive local ISO-8601 timestamp with microseconds.
///
/// Date-only values (`2000-01-01`) are accepted on read and mean midnight.
mod iso_timestamp {
    use chrono::{NaiveDate, NaiveDateTime};
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    const FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

    pub fn serialize<S: Serializer>(value: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&value.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(d)?;
        if let Ok(ts) = raw.parse::<NaiveDateTime>() {
            return Ok(ts);
        }
        raw.parse::<NaiveDate>()
            .ok()
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .ok_or_else(|| D::Error::custom(format!("invalid timestamp '{raw}'")))
    }
}

/// Sizes are stored as fractional kilobytes in the document.
mod kilobytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &u64, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(*bytes as f64 / 1024.0)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
        let kb = f64::deserialize(d)?;
        if kb.is_finite() && kb > 0.0 {
            Ok((kb * 1024.0).round() as u64)
        } else {
            Ok(0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(day: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, day)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    #[test]
    fn snippet_is_truncated_to_100_chars() {
        let long_name = "щ".repeat(150);
        let entry = CacheEntry::new(&long_name, None, 10, at(1, 0));
        assert_eq!(entry.dish_name_snippet.chars().count(), 100);
    }

    #[test]
    fn expiry_is_strictly_after_ttl() {
        let entry = CacheEntry::new("Soup", None, 10, at(1, 0));
        let ttl = TimeDelta::days(2);
        assert!(!entry.is_expired(at(3, 0), ttl));
        assert!(entry.is_expired(at(3, 1), ttl));
    }

    #[test]
    fn reads_documents_written_by_the_bot() {
        let doc = r#"{
          "d5eefa915a939c9a1eaafdd3366b2310": {
            "dish_name": "Omelette",
            "created_at": "2024-05-01T12:34:56.789012",
            "size_kb": 2.0,
            "recipe_hash": "d41d8cd9"
          },
          "9e0fe9b0af768aaf7dab4d6a8447f5bd": {
            "dish_name": "Борщ",
            "created_at": "2024-05-02",
            "size_kb": 0.5,
            "recipe_hash": "0123abcd"
          }
        }"#;
        let index = CacheIndex::from_json(doc.as_bytes());
        assert_eq!(index.len(), 2);

        let omelette = index
            .get(&CacheKey::parse("d5eefa915a939c9a1eaafdd3366b2310").unwrap())
            .unwrap();
        assert_eq!(omelette.size_bytes, 2048);
        assert_eq!(omelette.dish_name_snippet, "Omelette");

        let borscht = index
            .get(&CacheKey::parse("9e0fe9b0af768aaf7dab4d6a8447f5bd").unwrap())
            .unwrap();
        assert_eq!(borscht.created_at, at(2, 0));
        assert_eq!(index.total_bytes(), 2048 + 512);
    }

    #[test]
    fn corrupt_document_yields_empty_index() {
        assert!(CacheIndex::from_json(b"{ not json").is_empty());
        assert!(CacheIndex::from_json(b"[1, 2, 3]").is_empty());
    }

    #[test]
    fn malformed_entries_are_skipped() {
        let doc = br#"{
          "../escape": {"dish_name": "x", "created_at": "2024-05-01", "size_kb": 1.0, "recipe_hash": "00000000"},
          "d5eefa915a939c9a1eaafdd3366b2310": {"dish_name": "missing fields"},
          "9e0fe9b0af768aaf7dab4d6a8447f5bd": {"dish_name": "ok", "created_at": "2024-05-01T00:00:00", "size_kb": 1.0, "recipe_hash": "00000000"}
        }"#;
        let index = CacheIndex::from_json(doc);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn json_round_trip_preserves_entries() {
        let mut index = CacheIndex::new();
        let key = CacheKey::derive("Tacos", Some("tortillas"));
        index.insert(
            key.clone(),
            CacheEntry::new("Tacos", Some("tortillas"), 4096, at(3, 12)),
        );

        let restored = CacheIndex::from_json(&index.to_json().unwrap());
        assert_eq!(restored, index);

        let text = String::from_utf8(index.to_json().unwrap()).unwrap();
        assert!(text.contains("\"created_at\": \"2024-05-03T12:00:00.000000\""));
        assert!(text.contains("\"size_kb\": 4.0"));
    }
}
