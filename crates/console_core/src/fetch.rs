//! Fetch lifecycle state machine and authoritative-fetch bookkeeping.

use shared::{error::ApiException, record::RecordSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchState {
    Ready,
    Fetching,
    Failed,
}

/// Freshness of a fetched list.
///
/// `data` always holds the last successful payload, so a failed refetch still
/// leaves something to render. `loading` is a display hint raised only when a
/// fetch outlives its grace period; it never gates a transition.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchLifecycle<T> {
    pub state: FetchState,
    pub fetched: bool,
    pub data: RecordSet<T>,
    pub error: Option<ApiException>,
    pub loading: bool,
}

impl<T> FetchLifecycle<T> {
    pub fn new() -> Self {
        Self {
            state: FetchState::Ready,
            fetched: false,
            data: RecordSet::empty(),
            error: None,
            loading: false,
        }
    }

    pub fn is_fetching(&self) -> bool {
        self.state == FetchState::Fetching
    }

    pub fn is_failed(&self) -> bool {
        self.state == FetchState::Failed
    }

    pub fn begin(&mut self) {
        self.state = FetchState::Fetching;
    }

    pub fn mark_loading(&mut self) {
        if self.is_fetching() {
            self.loading = true;
        }
    }

    pub fn succeed(&mut self, data: RecordSet<T>) {
        self.state = FetchState::Ready;
        self.fetched = true;
        self.data = data;
        self.error = None;
        self.loading = false;
    }

    pub fn fail(&mut self, error: ApiException) {
        self.state = FetchState::Failed;
        self.fetched = true;
        self.error = Some(error);
        self.loading = false;
    }

    /// Drops an in-flight fetch without a result, restoring the terminal
    /// state held before it began.
    pub fn abandon(&mut self) {
        if self.is_fetching() {
            self.state = if self.error.is_some() {
                FetchState::Failed
            } else {
                FetchState::Ready
            };
        }
        self.loading = false;
    }
}

impl<T> Default for FetchLifecycle<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FetchTicket(u64);

/// Hands out tickets for issued fetches. Only the most recently issued ticket
/// is authoritative; issuing a new one supersedes whatever is still in flight.
#[derive(Debug, Default)]
pub struct FetchTracker {
    issued: u64,
    in_flight: Option<FetchTicket>,
}

impl FetchTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issue(&mut self) -> FetchTicket {
        self.issued += 1;
        let ticket = FetchTicket(self.issued);
        self.in_flight = Some(ticket);
        ticket
    }

    pub fn is_authoritative(&self, ticket: FetchTicket) -> bool {
        self.in_flight == Some(ticket)
    }

    /// Returns whether `ticket` was still authoritative; afterwards nothing is in flight.
    pub fn settle(&mut self, ticket: FetchTicket) -> bool {
        if !self.is_authoritative(ticket) {
            return false;
        }
        self.in_flight = None;
        true
    }

    pub fn invalidate(&mut self) -> Option<FetchTicket> {
        self.in_flight.take()
    }

    pub fn in_flight(&self) -> Option<FetchTicket> {
        self.in_flight
    }

    pub fn issued(&self) -> u64 {
        self.issued
    }
}

#[cfg(test)]
#[path = "tests/fetch_tests.rs"]
mod tests;
