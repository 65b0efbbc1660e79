use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use shared::{
    error::ApiException,
    query::{FilterMap, QueryState},
    record::{Record, RecordSet},
};

use crate::{
    context::ConsoleContext,
    fetch::FetchState,
    list::{FetchOutcome, ListConfig, ListOrchestrator},
    source::source_fn,
};

#[derive(Debug, Clone, PartialEq)]
struct Cluster {
    id: String,
    phase: &'static str,
}

impl Record for Cluster {
    type Id = String;

    fn record_id(&self) -> Self::Id {
        self.id.clone()
    }
}

fn cluster(phase: &'static str) -> RecordSet<Cluster> {
    RecordSet::new(vec![Cluster {
        id: "cls-1".to_string(),
        phase,
    }])
}

fn all_running(data: &RecordSet<Cluster>) -> bool {
    data.records.iter().all(|cluster| cluster.phase == "Running")
}

/// A list whose source answers `reply(call_number)` after `delay(call_number)`.
fn counting_list<R, D>(
    reply: R,
    delay: D,
) -> (Arc<ListOrchestrator<FilterMap, Cluster>>, Arc<AtomicUsize>)
where
    R: Fn(usize) -> RecordSet<Cluster> + Send + Sync + 'static,
    D: Fn(usize) -> Duration + Send + Sync + 'static,
{
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let reply = Arc::new(reply);
    let delay = Arc::new(delay);
    let source = source_fn(move |_query: QueryState<FilterMap>| {
        let call = counter.fetch_add(1, Ordering::SeqCst) + 1;
        let reply = Arc::clone(&reply);
        let wait = delay(call);
        async move {
            tokio::time::sleep(wait).await;
            Ok::<_, ApiException>(reply(call))
        }
    });
    let list = ListOrchestrator::with_config(
        ConsoleContext::new(),
        Arc::new(source),
        QueryState::new(FilterMap::new()),
        ListConfig::named("clusters"),
    );
    (list, calls)
}

#[tokio::test(start_paused = true)]
async fn polling_stops_once_predicate_holds() {
    let (list, calls) = counting_list(
        |call| cluster(if call >= 3 { "Running" } else { "Initializing" }),
        |_| Duration::ZERO,
    );

    list.poll(Duration::from_millis(100), all_running);
    assert!(list.is_polling());

    let mut updates = list.subscribe();
    let _ = updates
        .wait_for(|snapshot| !snapshot.polling)
        .await
        .expect("polling ends");

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(list.snapshot().records()[0].phase, "Running");

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 3, "no fetch after stopping");
    assert!(!list.is_polling());
}

#[tokio::test(start_paused = true)]
async fn clear_polling_before_third_tick_stops_fetching() {
    let (list, calls) = counting_list(|_| cluster("Initializing"), |_| Duration::ZERO);

    list.poll(Duration::from_millis(100), all_running);
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    list.clear_polling();
    assert!(!list.snapshot().polling);

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn clear_polling_discards_inflight_poll_response() {
    let (list, calls) = counting_list(|_| cluster("Running"), |_| Duration::from_millis(500));

    list.poll(Duration::from_millis(100), all_running);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(list.snapshot().lifecycle.state, FetchState::Fetching);

    list.clear_polling();
    let snapshot = list.snapshot();
    assert_eq!(snapshot.lifecycle.state, FetchState::Ready);
    assert!(!snapshot.polling);

    tokio::time::sleep(Duration::from_secs(1)).await;
    let snapshot = list.snapshot();
    assert!(!snapshot.lifecycle.fetched);
    assert!(snapshot.records().is_empty());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn clear_polling_is_idempotent() {
    let (list, _calls) = counting_list(|_| cluster("Running"), |_| Duration::ZERO);
    list.clear_polling();
    list.clear_polling();
    assert!(!list.is_polling());

    list.poll(Duration::from_millis(50), |_| false);
    list.clear_polling();
    list.clear_polling();
    assert!(!list.is_polling());
}

#[tokio::test(start_paused = true)]
async fn poll_ticks_yield_to_outstanding_manual_fetch() {
    let (list, calls) = counting_list(
        |_| cluster("Initializing"),
        |call| {
            if call == 2 {
                Duration::from_secs(1)
            } else {
                Duration::ZERO
            }
        },
    );

    list.poll(Duration::from_millis(100), all_running);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let manual = tokio::spawn({
        let list = Arc::clone(&list);
        async move { list.fetch().await }
    });

    tokio::time::sleep(Duration::from_millis(890)).await;
    assert_eq!(
        calls.load(Ordering::SeqCst),
        2,
        "poll must not fetch while the manual fetch is outstanding"
    );

    assert_eq!(manual.await.expect("join"), FetchOutcome::Applied);
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 3, "poll resumes one interval later");
    assert!(list.is_polling());
    list.clear_polling();
}

#[tokio::test(start_paused = true)]
async fn restarting_poll_replaces_previous_loop() {
    let (list, calls) = counting_list(|_| cluster("Initializing"), |_| Duration::ZERO);

    list.poll(Duration::from_millis(100), all_running);
    list.poll(Duration::from_secs(10), all_running);
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert!(calls.load(Ordering::SeqCst) <= 2);
    assert!(list.is_polling());
    list.clear_polling();
}

#[tokio::test(start_paused = true)]
async fn dropping_the_list_ends_its_poll() {
    let (list, calls) = counting_list(|_| cluster("Initializing"), |_| Duration::ZERO);

    list.poll(Duration::from_millis(100), all_running);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let handle = Arc::downgrade(&list);
    drop(list);
    assert!(handle.upgrade().is_none(), "poll task must not keep the list alive");

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn stale_poll_loop_never_fetches() {
    let (list, calls) = counting_list(|_| cluster("Initializing"), |_| Duration::ZERO);

    list.poll(Duration::from_millis(100), all_running);
    let first = list.lock_core().poll_seq;
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    list.clear_polling();
    assert!(list.lock_core().poll_plan(first).is_none());
    ListOrchestrator::run_poll(Arc::downgrade(&list), first, Duration::from_millis(100), all_running).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    list.poll(Duration::from_secs(60), all_running);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(list.lock_core().poll_plan(first).is_none());

    ListOrchestrator::run_poll(Arc::downgrade(&list), first, Duration::from_millis(100), all_running).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(list.is_polling(), "a stale loop must not end the current poll");
    list.clear_polling();
}

#[tokio::test(start_paused = true)]
async fn stop_condition_sees_each_polled_payload() {
    let (list, calls) = counting_list(
        |call| {
            cluster(match call {
                1 => "Initializing",
                2 => "Stopped",
                _ => "Running",
            })
        },
        |_| Duration::ZERO,
    );
    let seen = Arc::new(Mutex::new(Vec::new()));
    let observed = Arc::clone(&seen);

    list.poll(Duration::from_millis(100), move |data: &RecordSet<Cluster>| {
        observed.lock().unwrap().push(data.records[0].phase);
        all_running(data)
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(*seen.lock().unwrap(), vec!["Initializing"]);

    assert_eq!(list.fetch().await, FetchOutcome::Applied);
    assert_eq!(list.snapshot().records()[0].phase, "Stopped");
    assert_eq!(*seen.lock().unwrap(), vec!["Initializing"], "manual fetches are not polled payloads");

    let mut updates = list.subscribe();
    let _ = updates
        .wait_for(|snapshot| !snapshot.polling)
        .await
        .expect("polling ends");
    assert_eq!(*seen.lock().unwrap(), vec!["Initializing", "Running"]);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}
