//! Query description for list fetches.

use std::{collections::BTreeMap, fmt::Debug};

use serde::{Deserialize, Serialize};

pub const FIRST_PAGE: u32 = 1;
pub const DEFAULT_PAGE_SIZE: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Paging {
    pub page_index: u32,
    pub page_size: u32,
}

impl Paging {
    pub fn new(page_index: u32, page_size: u32) -> Self {
        Self {
            page_index,
            page_size,
        }
    }

    pub fn first(page_size: u32) -> Self {
        Self::new(FIRST_PAGE, page_size)
    }
}

impl Default for Paging {
    fn default() -> Self {
        Self::first(DEFAULT_PAGE_SIZE)
    }
}

/// Caller-defined list criteria that can absorb a partial update.
pub trait Filter: Clone + PartialEq + Debug + Send + Sync + 'static {
    type Patch: Send;

    fn merge(&mut self, patch: Self::Patch);
}

/// Key/value filter used by most resource lists (`clusterId`, `regionId`, ...).
pub type FilterMap = BTreeMap<String, String>;

impl Filter for FilterMap {
    type Patch = FilterMap;

    /// An empty value removes the key.
    fn merge(&mut self, patch: Self::Patch) {
        for (key, value) in patch {
            if value.is_empty() {
                self.remove(&key);
            } else {
                self.insert(key, value);
            }
        }
    }
}

/// What a list should show. Compared structurally: two queries built
/// independently with the same values are the same query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryState<F> {
    pub filter: F,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paging: Option<Paging>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continue_token: Option<String>,
}

impl<F> QueryState<F> {
    pub fn new(filter: F) -> Self {
        Self {
            filter,
            search: None,
            paging: None,
            continue_token: None,
        }
    }

    pub fn with_paging(mut self, page_index: u32, page_size: u32) -> Self {
        self.paging = Some(Paging::new(page_index, page_size));
        self
    }

    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }

    pub fn is_search(&self) -> bool {
        self.search.is_some()
    }

    /// Back to the first page with no continuation cursor.
    pub fn rewind(&mut self) {
        if let Some(paging) = self.paging.as_mut() {
            paging.page_index = FIRST_PAGE;
        }
        self.continue_token = None;
    }

    pub fn continued(&self, token: impl Into<String>) -> Self
    where
        F: Clone,
    {
        let mut query = self.clone();
        query.continue_token = Some(token.into());
        query
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(pairs: &[(&str, &str)]) -> FilterMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn rebuilt_queries_compare_equal() {
        let a = QueryState::new(filter(&[("clusterId", "cls-1"), ("regionId", "gz")]))
            .with_paging(1, 20);
        let b = QueryState::new(filter(&[("regionId", "gz"), ("clusterId", "cls-1")]))
            .with_paging(1, 20);
        assert_eq!(a, b);
        assert_ne!(a, b.clone().with_search("web"));
    }

    #[test]
    fn merge_overwrites_and_removes_keys() {
        let mut current = filter(&[("clusterId", "cls-1"), ("namespace", "default")]);
        current.merge(filter(&[("clusterId", "cls-2"), ("namespace", "")]));
        assert_eq!(current, filter(&[("clusterId", "cls-2")]));
    }

    #[test]
    fn rewind_resets_page_and_cursor() {
        let mut query = QueryState::new(FilterMap::new())
            .with_paging(4, 50)
            .continued("c-2");
        query.rewind();
        assert_eq!(query.paging, Some(Paging::new(FIRST_PAGE, 50)));
        assert_eq!(query.continue_token, None);
    }
}
