use std::{fmt::Debug, hash::Hash};

use serde::{Deserialize, Serialize};

/// A row that can be selected by id.
pub trait Record: Clone + Send + Sync + 'static {
    type Id: Clone + Eq + Hash + Debug + Send + Sync + 'static;

    fn record_id(&self) -> Self::Id;
}

/// One page of a remote listing.
///
/// `record_count` is the server-side total when the API reports one. Listings
/// driven by `continue_token` leave it meaningless.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", bound(deserialize = "T: Deserialize<'de>"))]
pub struct RecordSet<T> {
    #[serde(default)]
    pub records: Vec<T>,
    #[serde(default)]
    pub record_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continue_token: Option<String>,
}

impl<T> RecordSet<T> {
    pub fn new(records: Vec<T>) -> Self {
        Self {
            record_count: records.len() as u64,
            records,
            continue_token: None,
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn with_record_count(mut self, record_count: u64) -> Self {
        self.record_count = record_count;
        self
    }

    pub fn with_continue_token(mut self, token: impl Into<String>) -> Self {
        self.continue_token = Some(token.into());
        self
    }

    pub fn has_more(&self) -> bool {
        self.continue_token.is_some()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Accumulates the next continuation page onto this one.
    pub fn append(mut self, next: RecordSet<T>) -> Self {
        self.records.extend(next.records);
        self.record_count = next.record_count;
        self.continue_token = next.continue_token;
        self
    }
}

impl<T> Default for RecordSet<T> {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_camel_case_payload() {
        let set: RecordSet<String> = serde_json::from_str(
            r#"{"records":["cls-1","cls-2"],"recordCount":7,"continueToken":"abc"}"#,
        )
        .expect("decode");
        assert_eq!(set.records, vec!["cls-1", "cls-2"]);
        assert_eq!(set.record_count, 7);
        assert!(set.has_more());
    }

    #[test]
    fn decodes_rows_without_default_and_missing_records() {
        let set: RecordSet<crate::domain::ResourceSummary> =
            serde_json::from_str(r#"{"recordCount":0}"#).expect("decode");
        assert!(set.is_empty());
        assert!(!set.has_more());

        let set: RecordSet<crate::domain::ResourceSummary> =
            serde_json::from_str(r#"{"records":[{"id":"cls-1","phase":"Running"}]}"#)
                .expect("decode");
        assert!(set.records[0].in_phase("running"));
        assert_eq!(set.record_count, 0);
    }

    #[test]
    fn append_keeps_order_and_takes_latest_cursor() {
        let first = RecordSet::new(vec![1, 2]).with_continue_token("p2");
        let merged = first.append(RecordSet::new(vec![3]));
        assert_eq!(merged.records, vec![1, 2, 3]);
        assert_eq!(merged.continue_token, None);
    }
}
