//! List orchestration: query tracking, authoritative fetches, selection and
//! continuation paging for one resource list.

use std::{
    collections::HashSet,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use shared::{
    error::ApiException,
    query::{Filter, Paging, QueryState},
    record::{Record, RecordSet},
};
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, warn};

use crate::{
    context::ConsoleContext,
    fetch::{FetchLifecycle, FetchTicket, FetchTracker},
    source::RecordSource,
};

const DEFAULT_LOADING_GRACE: Duration = Duration::from_millis(300);

pub type ErrorPredicate = Arc<dyn Fn(&ApiException) -> bool + Send + Sync>;

/// Treats a `NotFound` answer to a search query as "no matches".
pub fn not_found_as_empty() -> ErrorPredicate {
    Arc::new(ApiException::is_not_found)
}

#[derive(Clone)]
pub struct ListConfig {
    /// Label attached to log lines.
    pub name: String,
    pub loading_grace: Duration,
    /// Drop selected ids that are absent from a freshly replaced list.
    pub reconcile_selection: bool,
    /// Consulted only for errors on search queries; `None` fails every error.
    pub search_error_as_empty: Option<ErrorPredicate>,
}

impl ListConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_loading_grace(mut self, grace: Duration) -> Self {
        self.loading_grace = grace;
        self
    }

    pub fn with_search_error_as_empty(mut self, predicate: ErrorPredicate) -> Self {
        self.search_error_as_empty = Some(predicate);
        self
    }

    pub fn keep_stale_selection(mut self) -> Self {
        self.reconcile_selection = false;
        self
    }
}

impl Default for ListConfig {
    fn default() -> Self {
        Self {
            name: "list".to_string(),
            loading_grace: DEFAULT_LOADING_GRACE,
            reconcile_selection: true,
            search_error_as_empty: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Applied,
    Failed(ApiException),
    /// A newer fetch was issued (or polling was cleared) before this one landed.
    Superseded,
    /// Nothing to fetch: the query did not change, there is no continuation
    /// cursor, or a poll tick yielded to an outstanding manual fetch.
    Skipped,
}

impl FetchOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

#[derive(Debug, Clone)]
pub struct ListSnapshot<F, T: Record> {
    pub query: QueryState<F>,
    pub lifecycle: FetchLifecycle<T>,
    pub selections: HashSet<T::Id>,
    pub polling: bool,
}

impl<F, T: Record> ListSnapshot<F, T> {
    pub fn records(&self) -> &[T] {
        &self.lifecycle.data.records
    }

    pub fn is_selected(&self, id: &T::Id) -> bool {
        self.selections.contains(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FetchOrigin {
    Manual,
    Poll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FetchMode {
    Replace,
    Append,
}

pub(crate) struct FetchPlan<F> {
    query: QueryState<F>,
    mode: FetchMode,
}

pub(crate) struct ActivePoll {
    pub(crate) id: u64,
    pub(crate) task: JoinHandle<()>,
}

pub(crate) struct ListCore<F: Filter, T: Record> {
    query: QueryState<F>,
    initial_query: QueryState<F>,
    last_requested: Option<QueryState<F>>,
    /// Query the current `lifecycle.data` was fetched for.
    data_query: Option<QueryState<F>>,
    pub(crate) lifecycle: FetchLifecycle<T>,
    selections: HashSet<T::Id>,
    tracker: FetchTracker,
    in_flight: Option<(FetchOrigin, FetchMode)>,
    manual_in_flight: usize,
    pub(crate) poll: Option<ActivePoll>,
    pub(crate) poll_seq: u64,
}

impl<F: Filter, T: Record> ListCore<F, T> {
    fn snapshot(&self) -> ListSnapshot<F, T> {
        ListSnapshot {
            query: self.query.clone(),
            lifecycle: self.lifecycle.clone(),
            selections: self.selections.clone(),
            polling: self.poll.is_some(),
        }
    }

    fn requery(&mut self) -> Option<FetchPlan<F>> {
        if self.last_requested.as_ref() == Some(&self.query) {
            return None;
        }
        Some(self.refresh())
    }

    fn refresh(&mut self) -> FetchPlan<F> {
        self.last_requested = Some(self.query.clone());
        FetchPlan {
            query: self.query.clone(),
            mode: FetchMode::Replace,
        }
    }

    /// `None` once poll `id` has been cleared or replaced.
    pub(crate) fn poll_plan(&self, id: u64) -> Option<FetchPlan<F>> {
        if !self.is_current_poll(id) {
            return None;
        }
        Some(FetchPlan {
            query: self.query.clone(),
            mode: FetchMode::Replace,
        })
    }

    pub(crate) fn is_current_poll(&self, id: u64) -> bool {
        self.poll.as_ref().is_some_and(|poll| poll.id == id)
    }

    /// A continuation cursor is only valid for the query its page came from,
    /// and only while no replacing fetch is about to swap the data.
    fn continuation_plan(&self) -> Option<FetchPlan<F>> {
        if matches!(self.in_flight, Some((_, FetchMode::Replace))) {
            return None;
        }
        if self.data_query.as_ref() != Some(&self.query) {
            return None;
        }
        let token = self.lifecycle.data.continue_token.clone()?;
        Some(FetchPlan {
            query: self.query.continued(token),
            mode: FetchMode::Append,
        })
    }

    pub(crate) fn abandon_poll_fetch(&mut self) {
        if matches!(self.in_flight, Some((FetchOrigin::Poll, _))) && self.tracker.invalidate().is_some() {
            self.in_flight = None;
            self.lifecycle.abandon();
        }
    }
}

pub struct ListOrchestrator<F: Filter, T: Record> {
    context: ConsoleContext,
    source: Arc<dyn RecordSource<F, T>>,
    config: ListConfig,
    core: Mutex<ListCore<F, T>>,
    snapshots: watch::Sender<ListSnapshot<F, T>>,
    pub(crate) manual_fetches: watch::Sender<usize>,
}

impl<F: Filter, T: Record> ListOrchestrator<F, T> {
    pub fn new(
        context: ConsoleContext,
        source: Arc<dyn RecordSource<F, T>>,
        query: QueryState<F>,
    ) -> Arc<Self> {
        Self::with_config(context, source, query, ListConfig::default())
    }

    pub fn with_config(
        context: ConsoleContext,
        source: Arc<dyn RecordSource<F, T>>,
        query: QueryState<F>,
        config: ListConfig,
    ) -> Arc<Self> {
        let core = ListCore {
            initial_query: query.clone(),
            query,
            last_requested: None,
            data_query: None,
            lifecycle: FetchLifecycle::new(),
            selections: HashSet::new(),
            tracker: FetchTracker::new(),
            in_flight: None,
            manual_in_flight: 0,
            poll: None,
            poll_seq: 0,
        };
        let (snapshots, _) = watch::channel(core.snapshot());
        let (manual_fetches, _) = watch::channel(0);
        Arc::new(Self {
            context,
            source,
            config,
            core: Mutex::new(core),
            snapshots,
            manual_fetches,
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn snapshot(&self) -> ListSnapshot<F, T> {
        self.snapshots.borrow().clone()
    }

    /// Receivers see the latest snapshot and are woken on every transition.
    pub fn subscribe(&self) -> watch::Receiver<ListSnapshot<F, T>> {
        self.snapshots.subscribe()
    }

    pub fn query(&self) -> QueryState<F> {
        self.lock_core().query.clone()
    }

    /// Merges `patch` into the filter and goes back to the first page.
    pub async fn apply_filter(&self, patch: F::Patch) -> FetchOutcome {
        self.dispatch(FetchOrigin::Manual, move |core| {
            core.query.filter.merge(patch);
            core.query.rewind();
            core.requery()
        })
        .await
    }

    /// Blank text clears the search.
    pub async fn perform_search(&self, text: &str) -> FetchOutcome {
        let text = text.trim();
        let search = (!text.is_empty()).then(|| text.to_string());
        self.dispatch(FetchOrigin::Manual, move |core| {
            core.query.search = search;
            core.query.rewind();
            core.requery()
        })
        .await
    }

    pub async fn set_paging(&self, page_index: u32, page_size: u32) -> FetchOutcome {
        self.dispatch(FetchOrigin::Manual, move |core| {
            core.query.paging = Some(Paging::new(page_index, page_size));
            core.query.continue_token = None;
            core.requery()
        })
        .await
    }

    pub async fn reset_query(&self) -> FetchOutcome {
        self.dispatch(FetchOrigin::Manual, |core| {
            core.query = core.initial_query.clone();
            core.requery()
        })
        .await
    }

    /// Refetches the current query even when it has not changed.
    pub async fn fetch(&self) -> FetchOutcome {
        self.dispatch(FetchOrigin::Manual, |core| Some(core.refresh()))
            .await
    }

    /// Fetches the page after the current continuation cursor and appends it.
    /// Skipped when the held data does not belong to the current query or a
    /// replacing fetch is still in flight.
    pub async fn continue_paging(&self) -> FetchOutcome {
        self.dispatch(FetchOrigin::Manual, |core| core.continuation_plan())
            .await
    }

    /// Replaces the selection with `ids`.
    pub fn select<I>(&self, ids: I)
    where
        I: IntoIterator<Item = T::Id>,
    {
        let mut core = self.lock_core();
        core.selections = ids.into_iter().collect();
        self.publish(&core);
    }

    pub fn selects(&self, items: &[T]) {
        self.select(items.iter().map(Record::record_id));
    }

    pub fn clear_selection(&self) {
        let mut core = self.lock_core();
        core.selections.clear();
        self.publish(&core);
    }

    /// Selected rows of the current data, in list order.
    pub fn selected_records(&self) -> Vec<T> {
        let core = self.lock_core();
        core.lifecycle
            .data
            .records
            .iter()
            .filter(|record| core.selections.contains(&record.record_id()))
            .cloned()
            .collect()
    }

    pub(crate) fn lock_core(&self) -> MutexGuard<'_, ListCore<F, T>> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn publish(&self, core: &ListCore<F, T>) {
        self.snapshots.send_replace(core.snapshot());
    }

    pub(crate) async fn dispatch<P>(&self, origin: FetchOrigin, prepare: P) -> FetchOutcome
    where
        P: FnOnce(&mut ListCore<F, T>) -> Option<FetchPlan<F>>,
    {
        self.dispatch_then(origin, prepare, |_| ()).await.0
    }

    /// Like `dispatch`, additionally running `on_applied` over the data an
    /// applied fetch produced, under the same lock that applied it.
    pub(crate) async fn dispatch_then<P, A, R>(
        &self,
        origin: FetchOrigin,
        prepare: P,
        on_applied: A,
    ) -> (FetchOutcome, Option<R>)
    where
        P: FnOnce(&mut ListCore<F, T>) -> Option<FetchPlan<F>>,
        A: FnOnce(&RecordSet<T>) -> R,
    {
        let (ticket, plan) = {
            let mut core = self.lock_core();
            if origin == FetchOrigin::Poll && core.manual_in_flight > 0 {
                return (FetchOutcome::Skipped, None);
            }
            let Some(plan) = prepare(&mut core) else {
                self.publish(&core);
                return (FetchOutcome::Skipped, None);
            };
            if origin == FetchOrigin::Manual {
                core.manual_in_flight += 1;
                self.manual_fetches.send_replace(core.manual_in_flight);
            }
            let ticket = core.tracker.issue();
            core.in_flight = Some((origin, plan.mode));
            core.lifecycle.begin();
            self.publish(&core);
            (ticket, plan)
        };
        debug!(list = %self.config.name, ?origin, mode = ?plan.mode, "fetch issued");

        let mut guard = InFlight {
            list: self,
            ticket,
            origin,
            settled: false,
        };
        let mut call = self.source.fetch(plan.query.clone());
        let result = match tokio::time::timeout(self.config.loading_grace, &mut call).await {
            Ok(result) => result,
            Err(_) => {
                self.mark_loading(ticket);
                call.await
            }
        };
        guard.settled = true;
        self.settle(ticket, &plan, result, on_applied)
    }

    fn mark_loading(&self, ticket: FetchTicket) {
        let mut core = self.lock_core();
        if core.tracker.is_authoritative(ticket) {
            core.lifecycle.mark_loading();
            self.publish(&core);
        }
    }

    fn settle<A, R>(
        &self,
        ticket: FetchTicket,
        plan: &FetchPlan<F>,
        result: Result<RecordSet<T>, ApiException>,
        on_applied: A,
    ) -> (FetchOutcome, Option<R>)
    where
        A: FnOnce(&RecordSet<T>) -> R,
    {
        let mut core = self.lock_core();
        if !core.tracker.settle(ticket) {
            debug!(list = %self.config.name, "discarding superseded response");
            return (FetchOutcome::Superseded, None);
        }
        core.in_flight = None;

        let result = match result {
            Err(error) if plan.query.is_search() && self.treats_as_empty(&error) => {
                debug!(list = %self.config.name, %error, "search error treated as empty result");
                Ok(RecordSet::empty())
            }
            other => other,
        };

        let mut inspected = None;
        let outcome = match result {
            Ok(records) => {
                let data = match plan.mode {
                    FetchMode::Replace => records,
                    FetchMode::Append => std::mem::take(&mut core.lifecycle.data).append(records),
                };
                if plan.mode == FetchMode::Replace {
                    if self.config.reconcile_selection {
                        reconcile_selection(&mut core.selections, &data);
                    }
                    core.data_query = Some(plan.query.clone());
                }
                debug!(list = %self.config.name, records = data.len(), "fetch applied");
                core.lifecycle.succeed(data);
                inspected = Some(on_applied(&core.lifecycle.data));
                FetchOutcome::Applied
            }
            Err(error) => {
                warn!(list = %self.config.name, %error, "fetch failed");
                core.lifecycle.fail(error.clone());
                FetchOutcome::Failed(error)
            }
        };
        self.publish(&core);
        drop(core);

        if let FetchOutcome::Failed(error) = &outcome {
            self.context.report_error(error);
        }
        (outcome, inspected)
    }

    fn treats_as_empty(&self, error: &ApiException) -> bool {
        self.config
            .search_error_as_empty
            .as_ref()
            .is_some_and(|predicate| predicate(error))
    }
}

impl<F: Filter, T: Record> Drop for ListOrchestrator<F, T> {
    fn drop(&mut self) {
        let core = self.core.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(poll) = core.poll.take() {
            poll.task.abort();
        }
    }
}

fn reconcile_selection<T: Record>(selections: &mut HashSet<T::Id>, data: &RecordSet<T>) {
    if selections.is_empty() {
        return;
    }
    let present: HashSet<T::Id> = data.records.iter().map(Record::record_id).collect();
    selections.retain(|id| present.contains(id));
}

/// Releases an issued fetch when its future goes away, settled or not.
struct InFlight<'a, F: Filter, T: Record> {
    list: &'a ListOrchestrator<F, T>,
    ticket: FetchTicket,
    origin: FetchOrigin,
    settled: bool,
}

impl<F: Filter, T: Record> Drop for InFlight<'_, F, T> {
    fn drop(&mut self) {
        let mut core = self.list.lock_core();
        if !self.settled && core.tracker.settle(self.ticket) {
            core.in_flight = None;
            core.lifecycle.abandon();
            // The abandoned query was never fetched; asking for it again must refetch.
            core.last_requested = core.data_query.clone();
            debug!(list = %self.list.config.name, "in-flight fetch abandoned");
        }
        if self.origin == FetchOrigin::Manual {
            core.manual_in_flight = core.manual_in_flight.saturating_sub(1);
            self.list.manual_fetches.send_replace(core.manual_in_flight);
        }
        self.list.publish(&core);
    }
}

#[cfg(test)]
#[path = "tests/list_tests.rs"]
mod tests;
