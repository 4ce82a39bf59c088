//! The in-memory revalidation index and its merge rule.

use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use url::Url;

/// Revalidation metadata for one cached URL.
///
/// Records are replaced wholesale, either by a fresh successful fetch or by
/// the merge during a flush; individual fields are never patched in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevalidationRecord {
    /// The cache key. Unique within an index.
    pub url: Url,

    /// Opaque revalidation token from the last successful fetch.
    #[serde(rename = "eTag", default)]
    pub etag: String,

    /// Hex digest of the cached content. Blank means no content has been
    /// stored yet and must be treated as a cache miss.
    #[serde(default)]
    pub hash: String,

    /// Mtime (ms since epoch) of the content file at the moment it was
    /// cached. A later mtime mismatch is the cheap corruption signal that
    /// triggers a full re-hash.
    #[serde(rename = "local", default)]
    pub local_last_modified: i64,

    /// Raw `Last-Modified` header text from the origin server, RFC 1123.
    /// Only used as a tie-breaker when merging records for the same URL.
    #[serde(rename = "remote", default, skip_serializing_if = "Option::is_none")]
    pub remote_last_modified: Option<String>,
}

impl RevalidationRecord {
    /// The parsed `Last-Modified` date, if the raw header text parses.
    ///
    /// RFC 1123 dates are the fixed-format subset of RFC 2822, which is what
    /// chrono exposes a parser for.
    pub fn remote_date(&self) -> Option<DateTime<FixedOffset>> {
        let raw = self.remote_last_modified.as_deref()?;
        DateTime::parse_from_rfc2822(raw).ok()
    }

    /// Whether this record should replace `incumbent` when both claim the
    /// same URL.
    ///
    /// A strictly later parseable date wins; a parseable date always beats
    /// an unparseable or absent one. When neither side parses, the incumbent
    /// is kept, so within one merge pass the first-seen record survives.
    pub fn supersedes(&self, incumbent: &RevalidationRecord) -> bool {
        match (self.remote_date(), incumbent.remote_date()) {
            (Some(new), Some(old)) => new > old,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }
}

/// A mapping from URL to [`RevalidationRecord`], at most one record per URL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RevalidationIndex {
    entries: BTreeMap<Url, RevalidationRecord>,
}

impl RevalidationIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds an index from raw records, resolving duplicate URLs with the
    /// merge rule. Used when decoding an on-disk document that a buggy or
    /// concurrent writer may have left with colliding entries.
    pub fn from_records(records: impl IntoIterator<Item = RevalidationRecord>) -> Self {
        let mut index = Self::new();
        for record in records {
            index.absorb(record);
        }
        index
    }

    pub fn get(&self, url: &Url) -> Option<&RevalidationRecord> {
        self.entries.get(url)
    }

    /// Replaces the record for the URL wholesale, returning the superseded
    /// record. This is the fresh-fetch path and does not consult the merge
    /// rule: a successful revalidated download always wins.
    pub fn replace(&mut self, record: RevalidationRecord) -> Option<RevalidationRecord> {
        self.entries.insert(record.url.clone(), record)
    }

    pub fn remove(&mut self, url: &Url) -> Option<RevalidationRecord> {
        self.entries.remove(url)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn records(&self) -> impl Iterator<Item = &RevalidationRecord> {
        self.entries.values()
    }

    pub fn into_records(self) -> impl Iterator<Item = RevalidationRecord> {
        self.entries.into_values()
    }

    /// Merges any number of indexes into one.
    ///
    /// For every URL the surviving record is the one whose remote date is
    /// chronologically latest (see [`RevalidationRecord::supersedes`]). The
    /// result does not depend on input order whenever at least one of the
    /// competing records carries a parseable date.
    pub fn merged(inputs: impl IntoIterator<Item = RevalidationIndex>) -> Self {
        let mut merged = Self::new();
        for index in inputs {
            for record in index.into_records() {
                merged.absorb(record);
            }
        }
        merged
    }

    fn absorb(&mut self, record: RevalidationRecord) {
        match self.entries.get(&record.url) {
            Some(incumbent) if !record.supersedes(incumbent) => {}
            _ => {
                self.entries.insert(record.url.clone(), record);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(remote: Option<&str>, etag: &str) -> RevalidationRecord {
        RevalidationRecord {
            url: Url::parse("https://example.com/resource").unwrap(),
            etag: etag.to_owned(),
            hash: String::new(),
            local_last_modified: 0,
            remote_last_modified: remote.map(str::to_owned),
        }
    }

    fn index_of(records: [RevalidationRecord; 1]) -> RevalidationIndex {
        RevalidationIndex::from_records(records)
    }

    #[test]
    fn test_later_date_wins_either_order() {
        let older = record(Some("Wed, 21 Oct 2015 07:28:00 GMT"), "a");
        let newer = record(Some("Thu, 22 Oct 2015 07:28:00 GMT"), "b");

        for input in [
            [index_of([older.clone()]), index_of([newer.clone()])],
            [index_of([newer.clone()]), index_of([older.clone()])],
        ] {
            let merged = RevalidationIndex::merged(input);
            assert_eq!(merged.len(), 1);
            assert_eq!(merged.records().next().unwrap().etag, "b");
        }
    }

    #[test]
    fn test_parseable_date_beats_null() {
        let dated = record(Some("Wed, 21 Oct 2015 07:28:00 GMT"), "dated");
        let undated = record(None, "undated");

        for input in [
            [index_of([undated.clone()]), index_of([dated.clone()])],
            [index_of([dated.clone()]), index_of([undated.clone()])],
        ] {
            let merged = RevalidationIndex::merged(input);
            assert_eq!(merged.records().next().unwrap().etag, "dated");
        }
    }

    #[test]
    fn test_unparseable_tie_keeps_first_seen() {
        let first = record(Some("not a date"), "first");
        let second = record(None, "second");

        let merged = RevalidationIndex::merged([index_of([first]), index_of([second])]);
        assert_eq!(merged.records().next().unwrap().etag, "first");
    }

    #[test]
    fn test_equal_dates_keep_incumbent() {
        let a = record(Some("Wed, 21 Oct 2015 07:28:00 GMT"), "a");
        let b = record(Some("Wed, 21 Oct 2015 07:28:00 GMT"), "b");

        let merged = RevalidationIndex::merged([index_of([a]), index_of([b])]);
        assert_eq!(merged.records().next().unwrap().etag, "a");
    }

    #[test]
    fn test_replace_is_wholesale() {
        let mut index = RevalidationIndex::new();
        index.replace(record(Some("Thu, 22 Oct 2015 07:28:00 GMT"), "old"));
        // A fresh fetch replaces even an entry with a newer remote date.
        let old = index.replace(record(None, "new")).unwrap();
        assert_eq!(old.etag, "old");
        assert_eq!(index.get(&old.url).unwrap().etag, "new");
    }
}
