use super::*;
use shared::error::ErrorCode;

#[test]
fn starts_ready_and_unfetched() {
    let lifecycle = FetchLifecycle::<u32>::new();
    assert_eq!(lifecycle.state, FetchState::Ready);
    assert!(!lifecycle.fetched);
    assert!(lifecycle.data.is_empty());
    assert!(lifecycle.error.is_none());
    assert!(!lifecycle.loading);
}

#[test]
fn failure_keeps_previous_data() {
    let mut lifecycle = FetchLifecycle::new();
    lifecycle.begin();
    lifecycle.succeed(RecordSet::new(vec!["cls-1"]));

    lifecycle.begin();
    lifecycle.mark_loading();
    assert!(lifecycle.loading);
    lifecycle.fail(ApiException::new(ErrorCode::Internal, "boom"));

    assert_eq!(lifecycle.state, FetchState::Failed);
    assert!(lifecycle.fetched);
    assert!(!lifecycle.loading);
    assert_eq!(lifecycle.data.records, vec!["cls-1"]);
    assert_eq!(
        lifecycle.error.as_ref().map(|err| err.code),
        Some(ErrorCode::Internal)
    );
}

#[test]
fn retry_from_failed_clears_error_on_success() {
    let mut lifecycle = FetchLifecycle::<u8>::new();
    lifecycle.begin();
    lifecycle.fail(ApiException::transport("connection reset"));

    lifecycle.begin();
    assert_eq!(lifecycle.state, FetchState::Fetching);
    assert!(lifecycle.error.is_some(), "error stays visible while retrying");

    lifecycle.succeed(RecordSet::empty());
    assert_eq!(lifecycle.state, FetchState::Ready);
    assert!(lifecycle.error.is_none());
    assert!(lifecycle.fetched);
}

#[test]
fn loading_only_marks_inflight_fetches() {
    let mut lifecycle = FetchLifecycle::<u8>::new();
    lifecycle.mark_loading();
    assert!(!lifecycle.loading);
}

#[test]
fn abandon_restores_last_terminal_state() {
    let mut lifecycle = FetchLifecycle::<u8>::new();
    lifecycle.begin();
    lifecycle.mark_loading();
    lifecycle.abandon();
    assert_eq!(lifecycle.state, FetchState::Ready);
    assert!(!lifecycle.loading);
    assert!(!lifecycle.fetched);

    lifecycle.begin();
    lifecycle.fail(ApiException::transport("timeout"));
    lifecycle.begin();
    lifecycle.abandon();
    assert_eq!(lifecycle.state, FetchState::Failed);
}

#[test]
fn newer_ticket_supersedes_older() {
    let mut tracker = FetchTracker::new();
    let first = tracker.issue();
    let second = tracker.issue();

    assert!(!tracker.is_authoritative(first));
    assert!(tracker.settle(second));
    assert!(!tracker.settle(first), "late response must be discarded");
    assert_eq!(tracker.in_flight(), None);
    assert_eq!(tracker.issued(), 2);
}

#[test]
fn invalidated_ticket_cannot_settle() {
    let mut tracker = FetchTracker::new();
    let ticket = tracker.issue();
    assert_eq!(tracker.invalidate(), Some(ticket));
    assert!(!tracker.settle(ticket));
}
